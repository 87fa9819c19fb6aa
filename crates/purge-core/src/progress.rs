//! Progress reporting
//!
//! The engine never decides how progress is shown. It hands each
//! [`ProgressEvent`] to an injected [`ProgressSink`], which may be called
//! from any dispatch worker concurrently.

use std::fmt;
use std::time::Duration;

/// Immutable status update
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum ProgressEvent {
    /// A round is about to dispatch
    Started {
        /// Batches in this round
        batches: usize,
        /// Requests in this round
        items: usize,
        /// Requests in the whole operation
        total: usize,
        /// Retry attempt this round belongs to (0 for the first round)
        attempt: u32,
    },
    /// One batch resolved
    BatchCompleted {
        /// Requests applied so far across all rounds
        processed: usize,
        /// Requests in the whole operation
        total: usize,
        /// Requests from this batch left for the next round
        unprocessed: usize,
        /// Whether the store throttled the whole batch
        throttled: bool,
    },
    /// Leftovers will be retried after `delay`
    RetryScheduled {
        /// Requests carried into the next round
        remaining: usize,
        /// Attempt number of the next round
        attempt: u32,
        /// Retry ceiling
        max_attempts: u32,
        /// Backoff including jitter
        delay: Duration,
    },
    /// Every request applied
    Finished {
        /// Requests applied
        applied: usize,
        /// Requests in the whole operation
        total: usize,
        /// Rounds it took
        rounds: u32,
    },
}

impl fmt::Display for ProgressEvent {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Started {
                batches,
                items,
                total,
                attempt: 0,
            } => write!(f, "Deleting {items} items in {batches} batches ({total} total)"),
            Self::Started {
                batches,
                items,
                attempt,
                ..
            } => write!(f, "Retry {attempt}: deleting {items} items in {batches} batches"),
            Self::BatchCompleted {
                processed, total, ..
            } => write!(f, "Deleted {processed}/{total} items"),
            Self::RetryScheduled {
                remaining,
                attempt,
                max_attempts,
                delay,
            } => write!(
                f,
                "Retrying {remaining} unprocessed items (attempt {attempt}/{max_attempts}) in {} ms",
                delay.as_millis()
            ),
            Self::Finished {
                applied,
                total,
                rounds,
            } => write!(f, "Deleted {applied}/{total} items in {rounds} round(s)"),
        }
    }
}

/// Receiver of progress events
pub trait ProgressSink: Send + Sync {
    /// Called once per event; must not block for long
    fn report(&self, event: &ProgressEvent);
}

impl<F> ProgressSink for F
where
    F: Fn(&ProgressEvent) + Send + Sync,
{
    fn report(&self, event: &ProgressEvent) {
        self(event);
    }
}

/// Discards everything
#[derive(Debug, Clone, Copy, Default)]
pub struct NoopProgress;

impl ProgressSink for NoopProgress {
    fn report(&self, _event: &ProgressEvent) {}
}

/// Forwards the rendered status line to `tracing` at info level
#[derive(Debug, Clone, Copy, Default)]
pub struct TracingProgress;

impl ProgressSink for TracingProgress {
    fn report(&self, event: &ProgressEvent) {
        tracing::info!(target: "purge::progress", "{event}");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use std::sync::Mutex;

    #[test]
    fn status_lines() {
        let started = ProgressEvent::Started {
            batches: 3,
            items: 60,
            total: 60,
            attempt: 0,
        };
        assert_eq!(started.to_string(), "Deleting 60 items in 3 batches (60 total)");

        let retry = ProgressEvent::RetryScheduled {
            remaining: 3,
            attempt: 1,
            max_attempts: 10,
            delay: Duration::from_millis(1250),
        };
        assert_eq!(
            retry.to_string(),
            "Retrying 3 unprocessed items (attempt 1/10) in 1250 ms"
        );

        let done = ProgressEvent::BatchCompleted {
            processed: 25,
            total: 60,
            unprocessed: 0,
            throttled: false,
        };
        assert_eq!(done.to_string(), "Deleted 25/60 items");
    }

    #[test]
    fn closures_are_sinks() {
        let seen = Mutex::new(Vec::new());
        let sink = |event: &ProgressEvent| seen.lock().unwrap().push(event.to_string());
        sink.report(&ProgressEvent::Finished {
            applied: 1,
            total: 1,
            rounds: 1,
        });
        assert_eq!(seen.lock().unwrap().len(), 1);
    }
}
