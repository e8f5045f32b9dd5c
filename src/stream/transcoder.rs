//! Per-session state machine turning upstream records into chat chunks.
//!
//! Each record is classified once (see [`RecordKind`]) and dispatched to a
//! branch handler that takes the [`Session`] explicitly and returns an
//! [`Emission`]. The transcoder owns framing and the single-terminator rule:
//! every exit path funnels through [`EventTranscoder::finish`].

use std::sync::Arc;

use bytes::Bytes;
use serde_json::Value;
use tracing::{error, info, warn};

use crate::assets::AssetLinker;
use crate::config::TranscodeOptions;
use crate::error::BridgeError;
use crate::protocol::openai_chat::stream::{encode_content_delta, ChunkHeader, DONE_FRAME};
use crate::protocol::render::{
    format_tool_buffer, image_alt, normalize_image_urls, prefix_lines, render_code_result,
    render_image_markdown, render_image_progress, render_search_bullets, render_search_count,
    render_structured_call, render_video, render_video_progress, search_result_list,
    summarize_tool_call, ToolDialect, THINK_CLOSE, THINK_OPEN,
};
use crate::protocol::upstream::{
    CodeExecutionResult, FunctionCall, ImageFrame, RecordKind, ResponsePayload, UpstreamRecord,
    VideoGeneration, TAG_FUNCTION_CALL, TAG_FUNCTION_RESULT, TAG_HEADER,
};
use crate::session::{Session, ThinkingPhase};

/// Output of one branch handler.
#[derive(Debug, PartialEq, Eq)]
pub enum Emission {
    Nothing,
    /// Non-terminal content delta.
    Delta(String),
    /// Content for the stop delta; the session ends after it.
    Final(String),
}

impl Emission {
    fn from_content(content: String) -> Self {
        if content.is_empty() {
            Self::Nothing
        } else {
            Self::Delta(content)
        }
    }
}

/// Immutable inputs shared by every branch handler of one session.
pub struct TranscodeContext<'a> {
    pub options: &'a TranscodeOptions,
    pub linker: &'a AssetLinker,
}

pub struct EventTranscoder {
    options: Arc<TranscodeOptions>,
    linker: AssetLinker,
    session: Session,
    terminated: bool,
}

impl EventTranscoder {
    #[must_use]
    pub fn new(session: Session, options: Arc<TranscodeOptions>, linker: AssetLinker) -> Self {
        Self {
            options,
            linker,
            session,
            terminated: false,
        }
    }

    #[must_use]
    pub fn session(&self) -> &Session {
        &self.session
    }

    #[must_use]
    pub fn status(&self) -> u16 {
        self.session.status
    }

    #[must_use]
    pub fn is_terminated(&self) -> bool {
        self.terminated
    }

    /// Decode and process one NDJSON line. Returns whether the line was a
    /// well-formed record.
    pub fn process_line(&mut self, line: &str, out: &mut Vec<Bytes>) -> bool {
        match UpstreamRecord::decode(line) {
            Some(record) => {
                self.process_record(record, out);
                true
            }
            None => false,
        }
    }

    pub fn process_record(&mut self, record: UpstreamRecord, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }
        let response = match record {
            UpstreamRecord::Error { message } => {
                warn!(session_id = %self.session.id, "upstream error record: {message}");
                self.session.mark_failed();
                self.finish(&format!("Error: {message}"), out);
                return;
            }
            UpstreamRecord::Envelope => return,
            UpstreamRecord::Response(response) => response,
        };

        let ctx = TranscodeContext {
            options: &self.options,
            linker: &self.linker,
        };
        match transcode_response(&mut self.session, &ctx, &response) {
            Ok(Emission::Nothing) => {}
            Ok(Emission::Delta(content)) => self.push_delta(&content, None, out),
            Ok(Emission::Final(content)) => self.finish(&content, out),
            Err(err) => self.fail(&err, out),
        }
    }

    /// Graceful end of input: natural end of stream or an expired deadline.
    pub fn finish_input(&mut self, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }
        if let Some((tag, content)) = self.session.tool_buffer.take() {
            let formatted = format_tool_buffer(&tag, &content);
            if !formatted.is_empty() && self.options.show_tool_calls {
                self.push_delta(&formatted, None, out);
            }
        }
        if self.session.thinking == ThinkingPhase::Open {
            self.session.close_thinking();
            if self.options.show_thinking {
                self.push_delta(THINK_CLOSE, None, out);
            }
        }
        self.finish("", out);
    }

    /// Unexpected failure: surfaced as content, status marked failed.
    pub fn fail(&mut self, err: &BridgeError, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }
        error!(session_id = %self.session.id, "stream processing failed: {err}");
        self.session.mark_failed();
        self.finish(&format!("Stream processing failed: {err}"), out);
    }

    /// Emit the stop delta and the terminator, at most once per session.
    pub fn finish(&mut self, content: &str, out: &mut Vec<Bytes>) {
        if self.terminated {
            return;
        }
        self.terminated = true;
        self.push_delta(content, Some("stop"), out);
        out.push(Bytes::from_static(DONE_FRAME.as_bytes()));
    }

    fn push_delta(&self, content: &str, finish_reason: Option<&str>, out: &mut Vec<Bytes>) {
        let header = ChunkHeader {
            id: &self.session.id,
            created: self.session.created,
            model: &self.session.model,
            system_fingerprint: self.session.system_fingerprint.as_deref(),
        };
        out.push(Bytes::from(encode_content_delta(&header, content, finish_reason)));
    }
}

/// Apply one response payload to the session.
///
/// # Errors
///
/// Returns an error when generated media cannot be linked.
pub fn transcode_response(
    session: &mut Session,
    ctx: &TranscodeContext<'_>,
    response: &ResponsePayload,
) -> Result<Emission, BridgeError> {
    if let Some(model) = response.model_name() {
        if model != session.model {
            session.model = model.to_owned();
        }
    }
    if session.system_fingerprint.is_none() {
        session.system_fingerprint = response.model_hash().map(str::to_owned);
    }
    if response.signals_image() {
        session.image_mode = true;
    }

    let prefix = response.routing_prefix();
    match response.kind(session.image_mode) {
        RecordKind::Video(video) => on_video(session, ctx, video),
        RecordKind::Image(frame) => on_image(session, ctx, &frame),
        RecordKind::ToolCall(call) => Ok(on_tool_call(session, ctx.options, call, &prefix)),
        RecordKind::ToolResult { search, code } => {
            Ok(on_tool_result(session, ctx.options, search, code, &prefix))
        }
        RecordKind::TextToken(token) => Ok(on_text_token(
            session,
            ctx.options,
            response,
            token,
            &prefix,
        )),
        RecordKind::Unrecognized => Ok(Emission::Nothing),
    }
}

fn push_open_marker(session: &mut Session, out: &mut String) {
    if session.open_thinking() {
        out.push_str(THINK_OPEN);
    }
}

fn push_close_marker(session: &mut Session, show_thinking: bool, out: &mut String) {
    if session.thinking == ThinkingPhase::Open {
        session.close_thinking();
        if show_thinking {
            out.push_str(THINK_CLOSE);
        }
    }
}

#[allow(clippy::cast_possible_truncation)]
fn progress_percent(progress: f64) -> i64 {
    if progress.is_finite() {
        progress as i64
    } else {
        0
    }
}

fn on_video(
    session: &mut Session,
    ctx: &TranscodeContext<'_>,
    video: &VideoGeneration,
) -> Result<Emission, BridgeError> {
    let show_thinking = ctx.options.show_thinking;
    let mut content = String::new();

    if let Some(progress) = video.progress.map(progress_percent) {
        if session.advance_video_progress(progress) && show_thinking {
            push_open_marker(session, &mut content);
            content.push_str(&render_video_progress(progress));
            if progress >= 100 {
                push_close_marker(session, show_thinking, &mut content);
            }
        }
    }

    let video_url = video.video_url.as_deref().map(str::trim).unwrap_or_default();
    if !video_url.is_empty() {
        push_close_marker(session, show_thinking, &mut content);
        let video_link = ctx.linker.link(video_url)?;
        let thumbnail = video
            .thumbnail_image_url
            .as_deref()
            .map(str::trim)
            .filter(|thumb| !thumb.is_empty());
        let thumb_link = match thumbnail {
            Some(thumb) => ctx.linker.link(thumb)?,
            None => String::new(),
        };
        info!(session_id = %session.id, "generated video ready");
        content.push_str(&render_video(
            &video_link,
            &thumb_link,
            ctx.options.video_poster_preview,
        ));
    }

    Ok(Emission::from_content(content))
}

fn on_image(
    session: &mut Session,
    ctx: &TranscodeContext<'_>,
    frame: &ImageFrame<'_>,
) -> Result<Emission, BridgeError> {
    let show_thinking = ctx.options.show_thinking;

    if let Some(urls) = frame.final_urls {
        let normalized = normalize_image_urls(urls);
        if !normalized.is_empty() {
            let mut content = String::new();
            push_close_marker(session, show_thinking, &mut content);
            for (i, url) in normalized.iter().enumerate() {
                let link = ctx.linker.link(url)?;
                if i > 0 {
                    content.push('\n');
                }
                content.push_str(&render_image_markdown(image_alt(url), &link));
            }
            info!(
                session_id = %session.id,
                count = normalized.len(),
                "generated images ready"
            );
            return Ok(Emission::Final(content));
        }
    }

    let mut content = String::new();
    if let Some(progress) = frame.progress {
        if show_thinking && session.thinking != ThinkingPhase::Closed {
            push_open_marker(session, &mut content);
            content.push_str(&render_image_progress(
                progress.image_index.unwrap_or(0),
                progress.progress.map_or(0, progress_percent),
            ));
        }
    }
    if let Some(token) = frame.token {
        content.push_str(token);
    }
    Ok(Emission::from_content(content))
}

fn on_tool_call(
    session: &mut Session,
    options: &TranscodeOptions,
    call: &FunctionCall,
    prefix: &str,
) -> Emission {
    if !options.show_thinking {
        return Emission::Nothing;
    }
    let mut content = String::new();
    push_open_marker(session, &mut content);
    let name = call.name.as_deref().unwrap_or_default();
    if let Some(summary) =
        summarize_tool_call(ToolDialect::Structured, name, call.arguments.as_ref())
    {
        content.push_str(&render_structured_call(&summary, prefix));
    }
    Emission::from_content(content)
}

fn on_tool_result(
    session: &mut Session,
    options: &TranscodeOptions,
    search: Option<&Value>,
    code: Option<&CodeExecutionResult>,
    prefix: &str,
) -> Emission {
    if !options.show_thinking {
        return Emission::Nothing;
    }
    let mut content = String::new();
    push_open_marker(session, &mut content);
    if let Some(search) = search {
        let results = search_result_list(search);
        if !results.is_empty() {
            content.push_str(&render_search_count(results.len(), prefix));
        }
    }
    if let Some(code) = code {
        content.push_str(&render_code_result(code, prefix));
    }
    Emission::from_content(content)
}

fn on_text_token(
    session: &mut Session,
    options: &TranscodeOptions,
    response: &ResponsePayload,
    token: &str,
    prefix: &str,
) -> Emission {
    let is_thinking = response.is_thinking;
    if options.filter_tags.iter().any(|tag| token.contains(tag.as_str())) {
        return Emission::Nothing;
    }
    if is_thinking && session.thinking == ThinkingPhase::Closed {
        return Emission::Nothing;
    }

    let tag = response.tag();
    let mut content = String::new();

    if session
        .tool_buffer
        .active_tag()
        .is_some_and(|active| active != tag)
    {
        if let Some((buffered_tag, buffered)) = session.tool_buffer.take() {
            if options.show_tool_calls {
                content.push_str(&format_tool_buffer(&buffered_tag, &buffered));
            }
        }
    }
    if tag == TAG_FUNCTION_CALL || tag == TAG_FUNCTION_RESULT {
        session.tool_buffer.push(tag, token);
        return Emission::from_content(content);
    }

    let was_thinking = session.upstream_thinking;
    if is_thinking && !was_thinking {
        if session.open_thinking() && options.show_thinking {
            content.push_str(THINK_OPEN);
        }
    } else if !is_thinking && (was_thinking || session.thinking == ThinkingPhase::Open) {
        if session.close_thinking() && options.show_thinking {
            content.push_str(THINK_CLOSE);
        }
    }
    session.upstream_thinking = is_thinking;

    if is_thinking && !options.show_thinking {
        return Emission::from_content(content);
    }

    let mut text = if is_thinking {
        prefix_lines(prefix, token)
    } else {
        token.to_owned()
    };

    if response.tool_usage_card_id.is_some() {
        let attachments = response
            .web_search_results
            .as_ref()
            .and_then(|results| results.get("results"))
            .and_then(Value::as_array);
        if let Some(results) = attachments {
            if !is_thinking {
                return Emission::from_content(content);
            }
            text.push_str(&render_search_bullets(results));
        }
    }

    if tag == TAG_HEADER {
        content.push_str("\n\n");
        content.push_str(&text);
        content.push_str("\n\n");
    } else {
        content.push_str(&text);
    }
    Emission::from_content(content)
}
