//! Non-streaming collection of an upstream NDJSON response into one completion.

use bytes::Bytes;
use futures_util::Stream;
use tracing::{info, warn};

use crate::assets::AssetLinker;
use crate::error::BridgeError;
use crate::observability::log_stream_complete;
use crate::protocol::openai_chat::OpenAiChatResponse;
use crate::protocol::render::{image_alt, normalize_image_urls, render_image_markdown, render_video};
use crate::protocol::upstream::{model_response_error, ResponsePayload, UpstreamRecord};
use crate::session::{Session, STATUS_FAILED, STATUS_OK};
use crate::stream::{DeadlineReader, NdjsonReassembler, ReadOutcome, StreamOutcome, TranscodeRequest};

/// Folds upstream records into a single assistant message.
pub struct BatchAggregator {
    session: Session,
    linker: AssetLinker,
    poster_preview: bool,
    content: Option<String>,
}

impl BatchAggregator {
    #[must_use]
    pub fn new(session: Session, linker: AssetLinker, poster_preview: bool) -> Self {
        Self {
            session,
            linker,
            poster_preview,
            content: None,
        }
    }

    /// Whether a final message has been chosen.
    #[must_use]
    pub fn is_complete(&self) -> bool {
        self.content.is_some()
    }

    /// Consume one NDJSON line; returns whether it was a well-formed record.
    /// Lines after completion are ignored.
    ///
    /// # Errors
    ///
    /// Returns [`BridgeError::Upstream`] for an error record or a model
    /// response error, and [`BridgeError::Config`] when media cannot be linked.
    pub fn push_line(&mut self, line: &str) -> Result<bool, BridgeError> {
        if self.is_complete() {
            return Ok(false);
        }
        match UpstreamRecord::decode(line) {
            Some(UpstreamRecord::Error { message }) => Err(BridgeError::Upstream {
                status: STATUS_FAILED,
                message,
            }),
            Some(UpstreamRecord::Response(response)) => {
                self.push_response(&response)?;
                Ok(true)
            }
            Some(UpstreamRecord::Envelope) => Ok(true),
            None => Ok(false),
        }
    }

    fn push_response(&mut self, response: &ResponsePayload) -> Result<(), BridgeError> {
        if let Some(model) = response.model_name() {
            model.clone_into(&mut self.session.model);
        }
        if self.session.system_fingerprint.is_none() {
            self.session.system_fingerprint = response.model_hash().map(str::to_owned);
        }
        if let Some(message) = model_response_error(response) {
            return Err(BridgeError::Upstream {
                status: STATUS_FAILED,
                message,
            });
        }

        if let Some(video) = &response.streaming_video_generation_response {
            let video_url = video.video_url.as_deref().map(str::trim).unwrap_or_default();
            if !video_url.is_empty() {
                let video_link = self.linker.link(video_url)?;
                let thumb_link = match video
                    .thumbnail_image_url
                    .as_deref()
                    .map(str::trim)
                    .filter(|thumb| !thumb.is_empty())
                {
                    Some(thumb) => self.linker.link(thumb)?,
                    None => String::new(),
                };
                self.content = Some(render_video(&video_link, &thumb_link, self.poster_preview));
            }
            return Ok(());
        }

        let Some(model_response) = &response.model_response else {
            return Ok(());
        };
        let message = model_response.message.as_deref().unwrap_or_default();
        if message.is_empty() {
            return Ok(());
        }
        let images = match model_response.generated_image_urls.as_deref() {
            Some(urls) => {
                let normalized = normalize_image_urls(urls);
                if normalized.is_empty() && !urls.is_empty() {
                    // Placeholder list; the real one arrives in a later record.
                    return Ok(());
                }
                normalized
            }
            None => Vec::new(),
        };

        let mut content = message.to_owned();
        if !images.is_empty() {
            content.push('\n');
            for url in &images {
                let link = self.linker.link(url)?;
                content.push_str(&render_image_markdown(image_alt(url), &link));
                content.push('\n');
            }
            info!(session_id = %self.session.id, count = images.len(), "generated images ready");
        }
        self.content = Some(content);
        Ok(())
    }

    #[must_use]
    pub fn into_completion(self) -> OpenAiChatResponse {
        let mut completion = OpenAiChatResponse::assistant(
            self.session.id,
            self.session.created,
            self.session.model,
            self.content.unwrap_or_default(),
        );
        completion.system_fingerprint = self.session.system_fingerprint;
        completion
    }
}

/// Read an upstream byte stream to completion and aggregate it.
///
/// Deadlines end collection early with whatever content was chosen so far.
/// The completion hook, if any, is awaited before returning.
///
/// # Errors
///
/// Returns the upstream error for error records, [`BridgeError::Transport`]
/// when the byte stream fails, and [`BridgeError::Config`] when media cannot
/// be linked.
pub async fn collect_completion<S, E>(
    byte_stream: S,
    request: TranscodeRequest,
) -> Result<OpenAiChatResponse, BridgeError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let parts = request.into_parts();
    let mut aggregator = BatchAggregator::new(
        parts.session,
        parts.linker,
        parts.options.video_poster_preview,
    );
    let mut reader = DeadlineReader::new(byte_stream, parts.deadlines);
    let started = reader.started();

    let result = drain_into(&mut reader, &mut aggregator).await;
    drop(reader);

    let status = if result.is_ok() { STATUS_OK } else { STATUS_FAILED };
    let outcome = StreamOutcome {
        status,
        duration: started.elapsed(),
    };
    log_stream_complete(
        &aggregator.session.id,
        &aggregator.session.model,
        outcome.status,
        outcome.duration,
    );
    if let Some(hook) = parts.on_complete {
        hook(outcome).await;
    }
    result.map(|()| aggregator.into_completion())
}

async fn drain_into<S, E>(
    reader: &mut DeadlineReader<S>,
    aggregator: &mut BatchAggregator,
) -> Result<(), BridgeError>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: std::fmt::Display,
{
    let mut reassembler = NdjsonReassembler::new();
    let mut lines = Vec::with_capacity(8);
    loop {
        match reader.read().await {
            ReadOutcome::Data(bytes) => reassembler.feed_into(&bytes, &mut lines),
            ReadOutcome::End => {
                reassembler.finish_into(&mut lines);
                for line in lines.drain(..) {
                    aggregator.push_line(&line)?;
                }
                return Ok(());
            }
            ReadOutcome::TimedOut(kind) => {
                warn!(
                    session_id = %aggregator.session.id,
                    "upstream {kind} deadline expired, returning collected content"
                );
                return Ok(());
            }
            ReadOutcome::Failed(err) => return Err(BridgeError::Transport(err.to_string())),
        }
        for line in lines.drain(..) {
            if aggregator.push_line(&line)? {
                reader.mark_record();
            }
        }
        if aggregator.is_complete() {
            return Ok(());
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn aggregator() -> BatchAggregator {
        BatchAggregator::new(
            Session::with_id("chatcmpl-batch".to_string(), 1_700_000_000, "fallback"),
            AssetLinker::new(Some("https://proxy.example"), None),
            false,
        )
    }

    #[test]
    fn first_message_with_real_images_wins() {
        let mut agg = aggregator();
        for line in [
            r#"{"result":{"response":{"model":"m-2","llmInfo":{"modelHash":"fp1"}}}}"#,
            r#"{"result":{"response":{"modelResponse":{"message":"wait","generatedImageUrls":["https://assets.example.com/"]}}}}"#,
            r#"{"result":{"response":{"modelResponse":{"message":"here","generatedImageUrls":["https://x/gen/abc/y.png"]}}}}"#,
            r#"{"result":{"response":{"modelResponse":{"message":"ignored"}}}}"#,
        ] {
            agg.push_line(line).unwrap();
        }
        let link = agg.linker.link("https://x/gen/abc/y.png").unwrap();
        let completion = agg.into_completion();
        assert_eq!(completion.model, "m-2");
        assert_eq!(completion.system_fingerprint.as_deref(), Some("fp1"));
        assert_eq!(
            completion.choices[0].message.content.as_deref(),
            Some(format!("here\n![abc]({link})\n").as_str())
        );
    }

    #[test]
    fn completed_video_short_circuits() {
        let mut agg = aggregator();
        agg.push_line(
            r#"{"result":{"response":{"streamingVideoGenerationResponse":{"progress":100,"videoUrl":"/v.mp4"}}}}"#,
        )
        .unwrap();
        assert!(agg.is_complete());
        agg.push_line(r#"{"result":{"response":{"modelResponse":{"message":"text"}}}}"#)
            .unwrap();
        let content = agg.into_completion().choices[0].message.content.clone().unwrap();
        assert!(content.starts_with("<a href=\"https://proxy.example/images/p_"));
    }

    #[test]
    fn error_record_and_model_error_fail() {
        let mut agg = aggregator();
        let err = agg
            .push_line(r#"{"error":{"message":"quota exceeded"}}"#)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Upstream { ref message, .. } if message == "quota exceeded"));

        let mut agg = aggregator();
        let err = agg
            .push_line(r#"{"result":{"response":{"modelResponse":{"error":"blocked"}}}}"#)
            .unwrap_err();
        assert!(matches!(err, BridgeError::Upstream { .. }));
    }

    #[test]
    fn empty_input_yields_empty_content() {
        let completion = aggregator().into_completion();
        assert_eq!(completion.choices[0].message.content.as_deref(), Some(""));
        assert!(completion.usage.is_none());
    }
}
