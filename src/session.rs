use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::LazyLock;

use crate::util::unix_now_secs;

pub const STATUS_OK: u16 = 200;
pub const STATUS_FAILED: u16 = 500;

struct ResponseIdGenerator {
    seed: u64,
    counter: AtomicU64,
}

impl ResponseIdGenerator {
    fn new() -> Self {
        Self {
            seed: fastrand::u64(..),
            counter: AtomicU64::new(1),
        }
    }

    fn next_id(&self) -> String {
        let seq = self.counter.fetch_add(1, Ordering::Relaxed);
        let mixed = self.seed ^ seq.wrapping_mul(0x9e37_79b9_7f4a_7c15);
        format!("chatcmpl-{mixed:016x}")
    }
}

static RESPONSE_IDS: LazyLock<ResponseIdGenerator> = LazyLock::new(ResponseIdGenerator::new);

/// Allocate a fresh `chatcmpl-` identifier.
#[must_use]
pub fn next_response_id() -> String {
    RESPONSE_IDS.next_id()
}

/// Thinking block latch: `NotStarted -> Open -> Closed`, never reopened.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum ThinkingPhase {
    #[default]
    NotStarted,
    Open,
    Closed,
}

/// Accumulates legacy tool-call fragments for one message tag at a time.
#[derive(Debug, Default)]
pub struct ToolBuffer {
    tag: Option<String>,
    content: String,
}

impl ToolBuffer {
    #[must_use]
    pub fn active_tag(&self) -> Option<&str> {
        self.tag.as_deref()
    }

    pub fn push(&mut self, tag: &str, token: &str) {
        if self.tag.as_deref() != Some(tag) {
            self.tag = Some(tag.to_owned());
            self.content.clear();
        }
        self.content.push_str(token);
    }

    /// Drain the buffer, returning `(tag, content)` when anything was pending.
    pub fn take(&mut self) -> Option<(String, String)> {
        let tag = self.tag.take()?;
        let content = std::mem::take(&mut self.content);
        Some((tag, content))
    }
}

/// Per-request transcoding state.
#[derive(Debug)]
pub struct Session {
    pub id: String,
    pub created: u64,
    pub model: String,
    pub system_fingerprint: Option<String>,
    pub thinking: ThinkingPhase,
    /// Thinking flag of the previous text token.
    pub upstream_thinking: bool,
    pub tool_buffer: ToolBuffer,
    /// Highest video progress seen so far; `-1` before the first report.
    pub video_progress: i64,
    pub image_mode: bool,
    pub status: u16,
}

impl Session {
    /// Start a session; an empty `requested_model` falls back to `fallback_model`.
    #[must_use]
    pub fn new(requested_model: &str, fallback_model: &str) -> Self {
        let model = if requested_model.trim().is_empty() {
            fallback_model
        } else {
            requested_model
        };
        Self::with_id(next_response_id(), unix_now_secs(), model)
    }

    #[must_use]
    pub fn with_id(id: String, created: u64, model: &str) -> Self {
        Self {
            id,
            created,
            model: model.to_owned(),
            system_fingerprint: None,
            thinking: ThinkingPhase::NotStarted,
            upstream_thinking: false,
            tool_buffer: ToolBuffer::default(),
            video_progress: -1,
            image_mode: false,
            status: STATUS_OK,
        }
    }

    /// Open the thinking block if it never was; returns whether it did.
    pub fn open_thinking(&mut self) -> bool {
        if self.thinking == ThinkingPhase::NotStarted {
            self.thinking = ThinkingPhase::Open;
            return true;
        }
        false
    }

    /// Close an open thinking block; returns whether it was open.
    pub fn close_thinking(&mut self) -> bool {
        let was_open = self.thinking == ThinkingPhase::Open;
        self.thinking = ThinkingPhase::Closed;
        was_open
    }

    /// Raise the video watermark; returns `true` only on a strict increase.
    pub fn advance_video_progress(&mut self, progress: i64) -> bool {
        if progress > self.video_progress {
            self.video_progress = progress;
            return true;
        }
        false
    }

    pub fn mark_failed(&mut self) {
        self.status = STATUS_FAILED;
    }
}
