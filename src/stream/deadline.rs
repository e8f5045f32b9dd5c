//! Upstream reads bounded by first-record, idle and total deadlines.

use std::fmt;
use std::pin::Pin;
use std::time::Duration;

use bytes::Bytes;
use futures_util::{Stream, StreamExt};
use tokio::time::Instant;

/// Which deadline ended a read.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DeadlineKind {
    FirstRecord,
    Idle,
    Total,
}

impl fmt::Display for DeadlineKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::FirstRecord => "first record",
            Self::Idle => "idle",
            Self::Total => "total",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Deadlines {
    pub first_record: Duration,
    pub idle: Duration,
    /// `None` disables the total cap.
    pub total: Option<Duration>,
}

#[derive(Debug)]
pub enum ReadOutcome<E> {
    Data(Bytes),
    End,
    TimedOut(DeadlineKind),
    Failed(E),
}

/// Serialized reader over an upstream byte stream.
///
/// The first-record budget runs from construction until [`Self::mark_record`]
/// is first called; afterwards each read gets the idle budget measured from
/// the most recent record. Every read is also capped by what remains of the
/// total budget.
pub struct DeadlineReader<S> {
    stream: Pin<Box<S>>,
    deadlines: Deadlines,
    started: Instant,
    last_record: Option<Instant>,
}

impl<S, E> DeadlineReader<S>
where
    S: Stream<Item = Result<Bytes, E>>,
{
    pub fn new(stream: S, deadlines: Deadlines) -> Self {
        Self {
            stream: Box::pin(stream),
            deadlines,
            started: Instant::now(),
            last_record: None,
        }
    }

    /// Record that a complete upstream record was parsed.
    pub fn mark_record(&mut self) {
        self.last_record = Some(Instant::now());
    }

    #[must_use]
    pub fn started(&self) -> Instant {
        self.started
    }

    fn budget(&self, now: Instant) -> (Duration, DeadlineKind) {
        let (phase_budget, kind) = match self.last_record {
            None => (
                self.deadlines
                    .first_record
                    .saturating_sub(now.saturating_duration_since(self.started)),
                DeadlineKind::FirstRecord,
            ),
            Some(last) => (
                self.deadlines
                    .idle
                    .saturating_sub(now.saturating_duration_since(last)),
                DeadlineKind::Idle,
            ),
        };
        match self.deadlines.total {
            Some(total) => {
                let remaining = total.saturating_sub(now.saturating_duration_since(self.started));
                if remaining < phase_budget {
                    (remaining, DeadlineKind::Total)
                } else {
                    (phase_budget, kind)
                }
            }
            None => (phase_budget, kind),
        }
    }

    /// Wait for the next chunk under the current budget.
    ///
    /// A budget already at zero times out without polling the stream.
    pub async fn read(&mut self) -> ReadOutcome<E> {
        let (budget, kind) = self.budget(Instant::now());
        if budget.is_zero() {
            return ReadOutcome::TimedOut(kind);
        }
        match tokio::time::timeout(budget, self.stream.next()).await {
            Ok(Some(Ok(bytes))) => ReadOutcome::Data(bytes),
            Ok(Some(Err(err))) => ReadOutcome::Failed(err),
            Ok(None) => ReadOutcome::End,
            Err(_) => ReadOutcome::TimedOut(kind),
        }
    }
}
