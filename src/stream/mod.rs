pub mod deadline;
pub mod ndjson;
pub mod transcoder;

pub use deadline::{DeadlineKind, DeadlineReader, Deadlines, ReadOutcome};
pub use ndjson::NdjsonReassembler;
pub use transcoder::EventTranscoder;

use std::fmt;
use std::sync::Arc;
use std::time::Duration;

use bytes::Bytes;
use futures_util::future::BoxFuture;
use futures_util::Stream;
use smallvec::SmallVec;
use tokio::time::Instant;
use tracing::warn;

use crate::assets::AssetLinker;
use crate::config::TranscodeOptions;
use crate::error::BridgeError;
use crate::observability::log_stream_complete;
use crate::session::Session;

/// Final status of one transcoded session.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOutcome {
    pub status: u16,
    pub duration: Duration,
}

impl StreamOutcome {
    #[must_use]
    pub fn duration_secs(&self) -> f64 {
        self.duration.as_secs_f64()
    }
}

/// Invoked once per session, and awaited, before the output stream ends. When
/// the consumer drops the stream early the hook is spawned onto the runtime
/// instead.
pub type CompletionHook = Box<dyn FnOnce(StreamOutcome) -> BoxFuture<'static, ()> + Send>;

/// Per-request inputs to [`transcode_stream`].
pub struct TranscodeRequest {
    pub options: Arc<TranscodeOptions>,
    /// Model the client asked for; empty selects the configured fallback.
    pub requested_model: String,
    /// `scheme://host` of the inbound request, used when no asset base is set.
    pub request_origin: Option<String>,
    pub on_complete: Option<CompletionHook>,
}

impl TranscodeRequest {
    #[must_use]
    pub fn new(options: Arc<TranscodeOptions>, requested_model: impl Into<String>) -> Self {
        Self {
            options,
            requested_model: requested_model.into(),
            request_origin: None,
            on_complete: None,
        }
    }

    #[must_use]
    pub fn with_request_origin(mut self, origin: impl Into<String>) -> Self {
        self.request_origin = Some(origin.into());
        self
    }

    #[must_use]
    pub fn with_completion_hook<F>(mut self, hook: F) -> Self
    where
        F: FnOnce(StreamOutcome) -> BoxFuture<'static, ()> + Send + 'static,
    {
        self.on_complete = Some(Box::new(hook));
        self
    }

    pub(crate) fn into_parts(self) -> RequestParts {
        let options = self.options;
        let deadlines = Deadlines {
            first_record: options.first_record_timeout,
            idle: options.idle_timeout,
            total: options.total_timeout,
        };
        let session = Session::new(&self.requested_model, &options.fallback_model);
        let linker = AssetLinker::new(
            options.asset_base_url.as_deref(),
            self.request_origin.as_deref(),
        );
        RequestParts {
            session,
            options,
            linker,
            deadlines,
            on_complete: self.on_complete,
        }
    }
}

pub(crate) struct RequestParts {
    pub session: Session,
    pub options: Arc<TranscodeOptions>,
    pub linker: AssetLinker,
    pub deadlines: Deadlines,
    pub on_complete: Option<CompletionHook>,
}

struct PendingFrames {
    frames: SmallVec<[Bytes; 8]>,
    head: usize,
}

impl PendingFrames {
    fn new() -> Self {
        Self {
            frames: SmallVec::new(),
            head: 0,
        }
    }

    #[inline]
    fn pop_front(&mut self) -> Option<Bytes> {
        if self.head >= self.frames.len() {
            return None;
        }
        let frame = std::mem::take(&mut self.frames[self.head]);
        self.head += 1;
        if self.head == self.frames.len() {
            self.frames.clear();
            self.head = 0;
        }
        Some(frame)
    }

    #[inline]
    fn extend_from_vec(&mut self, frames: &mut Vec<Bytes>) {
        self.frames.extend(frames.drain(..));
    }
}

struct Driver<S> {
    reader: Option<DeadlineReader<S>>,
    reassembler: NdjsonReassembler,
    transcoder: EventTranscoder,
    lines: Vec<String>,
    frames: Vec<Bytes>,
    pending: PendingFrames,
    on_complete: Option<CompletionHook>,
    started: Instant,
    closed: bool,
}

impl<S, E> Driver<S>
where
    S: Stream<Item = Result<Bytes, E>>,
    E: fmt::Display,
{
    /// One upstream read, fully processed into pending frames.
    async fn pump(&mut self) {
        let Some(reader) = self.reader.as_mut() else {
            self.transcoder.finish_input(&mut self.frames);
            return;
        };
        match reader.read().await {
            ReadOutcome::Data(bytes) => {
                self.reassembler.feed_into(&bytes, &mut self.lines);
                for line in self.lines.drain(..) {
                    if self.transcoder.process_line(&line, &mut self.frames) {
                        reader.mark_record();
                    }
                    if self.transcoder.is_terminated() {
                        break;
                    }
                }
                self.lines.clear();
            }
            ReadOutcome::End => {
                self.reassembler.finish_into(&mut self.lines);
                for line in self.lines.drain(..) {
                    self.transcoder.process_line(&line, &mut self.frames);
                }
                self.transcoder.finish_input(&mut self.frames);
            }
            ReadOutcome::TimedOut(kind) => {
                warn!(
                    session_id = %self.transcoder.session().id,
                    "upstream {kind} deadline expired, ending stream"
                );
                self.transcoder.finish_input(&mut self.frames);
            }
            ReadOutcome::Failed(err) => {
                let err = BridgeError::Transport(err.to_string());
                self.transcoder.fail(&err, &mut self.frames);
            }
        }
    }

    /// Release upstream, then report the outcome.
    async fn close(&mut self) {
        self.reader = None;
        self.closed = true;
        let outcome = self.outcome();
        if let Some(hook) = self.on_complete.take() {
            hook(outcome).await;
        }
    }
}

impl<S> Driver<S> {
    fn outcome(&self) -> StreamOutcome {
        let outcome = StreamOutcome {
            status: self.transcoder.status(),
            duration: self.started.elapsed(),
        };
        let session = self.transcoder.session();
        log_stream_complete(&session.id, &session.model, outcome.status, outcome.duration);
        outcome
    }
}

impl<S> Drop for Driver<S> {
    /// The consumer went away before the session finished. The hook can no
    /// longer be awaited in line, so it runs detached on the current runtime.
    fn drop(&mut self) {
        let Some(hook) = self.on_complete.take() else {
            return;
        };
        warn!(
            session_id = %self.transcoder.session().id,
            "output stream dropped before completion"
        );
        let outcome = self.outcome();
        match tokio::runtime::Handle::try_current() {
            Ok(handle) => {
                handle.spawn(hook(outcome));
            }
            Err(_) => warn!(
                session_id = %self.transcoder.session().id,
                "no runtime available, completion hook skipped"
            ),
        }
    }
}

/// Transcode an upstream NDJSON byte stream into OpenAI chat-completion SSE
/// frames.
///
/// The returned stream always ends with exactly one stop delta followed by
/// `data: [DONE]`, whether upstream finished, went silent past a deadline,
/// reported an error, or failed mid-transfer. The upstream stream is dropped
/// and the completion hook awaited before the final frames are yielded.
pub fn transcode_stream<S, E>(
    byte_stream: S,
    request: TranscodeRequest,
) -> impl Stream<Item = Bytes> + Send
where
    S: Stream<Item = Result<Bytes, E>> + Send + 'static,
    E: fmt::Display + Send + 'static,
{
    let parts = request.into_parts();
    let transcoder = EventTranscoder::new(parts.session, parts.options, parts.linker);
    let reader = DeadlineReader::new(byte_stream, parts.deadlines);
    let driver = Driver {
        started: reader.started(),
        reader: Some(reader),
        reassembler: NdjsonReassembler::new(),
        transcoder,
        lines: Vec::with_capacity(8),
        frames: Vec::with_capacity(8),
        pending: PendingFrames::new(),
        on_complete: parts.on_complete,
        closed: false,
    };

    futures_util::stream::unfold(driver, |mut driver| async move {
        loop {
            if let Some(frame) = driver.pending.pop_front() {
                return Some((frame, driver));
            }
            if driver.closed {
                return None;
            }
            driver.pump().await;
            if driver.transcoder.is_terminated() {
                driver.close().await;
            }
            driver.pending.extend_from_vec(&mut driver.frames);
        }
    })
}
