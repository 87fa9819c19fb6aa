//! Parallel dispatcher
//!
//! Runs one round: `K` worker tasks pull batches off a shared lock-free
//! queue and send each through the store's batch-write call. Per batch:
//! - applied requests bump an atomic counter
//! - requests the store hands back are appended to the round's unprocessed
//!   queue
//! - a throttled batch goes back whole
//! - any other store error stops the round
//!
//! No worker holds a lock while another is working; aggregation is an
//! append-only [`SegQueue`] plus atomics.

use crate::error::PurgeError;
use crate::progress::{ProgressEvent, ProgressSink};
use crate::store::BatchWriter;
use crate::types::{Batch, DeleteRequest};
use crossbeam::queue::SegQueue;
use std::collections::HashMap;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use tokio::task::JoinSet;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// What one round achieved
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct RoundReport {
    /// Requests the round started with
    pub submitted: usize,
    /// Requests confirmed applied in this round
    pub applied: usize,
    /// Requests handed back by the store or throttled
    pub unprocessed: Vec<DeleteRequest>,
    /// Requests never sent because the round was stopped
    pub undispatched: Vec<DeleteRequest>,
    /// Batches rejected whole by throttling
    pub throttled_batches: usize,
}

impl RoundReport {
    /// Requests not known to be applied
    #[inline]
    #[must_use]
    pub fn outstanding(&self) -> usize {
        self.unprocessed.len() + self.undispatched.len()
    }

    /// Everything the round was given is applied
    #[inline]
    #[must_use]
    pub fn is_settled(&self) -> bool {
        self.outstanding() == 0
    }

    /// Working set for the next round
    #[must_use]
    pub fn into_outstanding(mut self) -> Vec<DeleteRequest> {
        self.unprocessed.append(&mut self.undispatched);
        self.unprocessed
    }
}

/// Operation-wide progress counter shared by every round
#[derive(Debug, Clone)]
pub struct ProgressCounter {
    processed: Arc<AtomicUsize>,
    total: usize,
}

impl ProgressCounter {
    /// Counter for an operation of `total` requests
    #[inline]
    #[must_use]
    pub fn new(total: usize) -> Self {
        Self {
            processed: Arc::new(AtomicUsize::new(0)),
            total,
        }
    }

    /// Requests applied so far
    #[inline]
    #[must_use]
    pub fn processed(&self) -> usize {
        self.processed.load(Ordering::Acquire)
    }

    /// Requests in the operation
    #[inline]
    #[must_use]
    pub fn total(&self) -> usize {
        self.total
    }

    #[inline]
    fn add(&self, applied: usize) -> usize {
        self.processed.fetch_add(applied, Ordering::AcqRel) + applied
    }
}

/// State shared by the workers of one round
struct RoundShared {
    table: Arc<str>,
    store: Arc<dyn BatchWriter>,
    progress: Arc<dyn ProgressSink>,
    counter: ProgressCounter,
    pending: SegQueue<Batch>,
    unprocessed: SegQueue<DeleteRequest>,
    applied: AtomicUsize,
    throttled: AtomicUsize,
}

/// Sends batches with bounded parallelism
#[derive(Clone)]
pub struct Dispatcher {
    store: Arc<dyn BatchWriter>,
    table: Arc<str>,
    concurrency: usize,
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for Dispatcher {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Dispatcher")
            .field("table", &self.table)
            .field("concurrency", &self.concurrency)
            .finish_non_exhaustive()
    }
}

impl Dispatcher {
    /// Create a dispatcher for one table
    #[must_use]
    pub fn new(
        store: Arc<dyn BatchWriter>,
        table: Arc<str>,
        concurrency: usize,
        progress: Arc<dyn ProgressSink>,
    ) -> Self {
        Self {
            store,
            table,
            concurrency: concurrency.max(1),
            progress,
        }
    }

    /// Concurrency degree
    #[inline]
    #[must_use]
    pub fn concurrency(&self) -> usize {
        self.concurrency
    }

    /// Dispatch one round of batches
    ///
    /// Emits a `Started` event, then one `BatchCompleted` per resolved batch.
    /// Stops taking new batches once `cancel` fires; batches never sent are
    /// returned in [`RoundReport::undispatched`].
    ///
    /// # Errors
    /// - the first non-throttling [`StoreError`](crate::error::StoreError) any worker hit; sibling
    ///   workers finish their in-flight call and take nothing new
    /// - [`PurgeError::Worker`] if a worker task panicked
    pub async fn dispatch(
        &self,
        batches: Vec<Batch>,
        counter: &ProgressCounter,
        attempt: u32,
        cancel: &CancellationToken,
    ) -> Result<RoundReport, PurgeError> {
        let submitted: usize = batches.iter().map(Batch::len).sum();
        let batch_count = batches.len();
        if batch_count == 0 {
            return Ok(RoundReport::default());
        }

        self.progress.report(&ProgressEvent::Started {
            batches: batch_count,
            items: submitted,
            total: counter.total(),
            attempt,
        });

        let shared = Arc::new(RoundShared {
            table: Arc::clone(&self.table),
            store: Arc::clone(&self.store),
            progress: Arc::clone(&self.progress),
            counter: counter.clone(),
            pending: SegQueue::new(),
            unprocessed: SegQueue::new(),
            applied: AtomicUsize::new(0),
            throttled: AtomicUsize::new(0),
        });
        for batch in batches {
            shared.pending.push(batch);
        }

        // Siblings stop on a store error without cancelling the caller's token.
        let round = cancel.child_token();
        let mut workers = JoinSet::new();
        for worker in 0..self.concurrency.min(batch_count) {
            let shared = Arc::clone(&shared);
            let round = round.clone();
            let span = tracing::debug_span!("dispatch_worker", worker);
            workers.spawn(run_worker(shared, round).instrument(span));
        }

        let mut first_error = None;
        while let Some(joined) = workers.join_next().await {
            let result = joined.map_err(|e| PurgeError::Worker(e.to_string()));
            if let Err(e) = result.and_then(|r| r) {
                round.cancel();
                first_error.get_or_insert(e);
            }
        }
        if let Some(e) = first_error {
            return Err(e);
        }

        let mut unprocessed = Vec::with_capacity(shared.unprocessed.len());
        while let Some(request) = shared.unprocessed.pop() {
            unprocessed.push(request);
        }
        let mut undispatched = Vec::new();
        while let Some(batch) = shared.pending.pop() {
            undispatched.extend(batch.into_requests());
        }

        let report = RoundReport {
            submitted,
            applied: shared.applied.load(Ordering::Acquire),
            unprocessed,
            undispatched,
            throttled_batches: shared.throttled.load(Ordering::Acquire),
        };
        debug_assert_eq!(report.applied + report.outstanding(), report.submitted);
        tracing::debug!(
            submitted = report.submitted,
            applied = report.applied,
            unprocessed = report.unprocessed.len(),
            undispatched = report.undispatched.len(),
            throttled = report.throttled_batches,
            "round resolved"
        );
        Ok(report)
    }
}

/// Worker loop: take a batch, send it, fold the outcome in, repeat
async fn run_worker(shared: Arc<RoundShared>, round: CancellationToken) -> Result<(), PurgeError> {
    loop {
        if round.is_cancelled() {
            return Ok(());
        }
        let Some(batch) = shared.pending.pop() else {
            return Ok(());
        };

        let size = batch.len();
        let (leftover, throttled) = match shared.store.batch_delete(&shared.table, batch.requests()).await {
            Ok(mut output) => {
                let reported = output.take_unprocessed(&shared.table);
                let leftover = reconcile_leftovers(batch.index(), batch.requests(), reported);
                if output.unprocessed_count() > 0 {
                    tracing::warn!(
                        batch = batch.index(),
                        foreign = output.unprocessed_count(),
                        "store returned unprocessed items for other tables; ignoring"
                    );
                }
                (leftover, false)
            }
            Err(e) if e.is_throttling() => {
                tracing::warn!(batch = batch.index(), size, "batch throttled; will retry whole batch");
                metrics::counter!("purge_batches_total", "outcome" => "throttled").increment(1);
                shared.throttled.fetch_add(1, Ordering::AcqRel);
                (batch.into_requests(), true)
            }
            Err(e) => {
                tracing::error!(batch = batch.index(), error = %e, "batch write failed");
                metrics::counter!("purge_batches_total", "outcome" => "error").increment(1);
                round.cancel();
                return Err(e.into());
            }
        };

        let returned = leftover.len();
        let applied = size - returned;
        if !throttled {
            let outcome = if returned == 0 { "applied" } else { "partial" };
            metrics::counter!("purge_batches_total", "outcome" => outcome).increment(1);
        }
        metrics::counter!("purge_items_applied_total").increment(applied as u64);

        for request in leftover {
            shared.unprocessed.push(request);
        }
        shared.applied.fetch_add(applied, Ordering::AcqRel);
        let processed = shared.counter.add(applied);

        tracing::debug!(processed, total = shared.counter.total(), returned, "batch resolved");
        shared.progress.report(&ProgressEvent::BatchCompleted {
            processed,
            total: shared.counter.total(),
            unprocessed: returned,
            throttled,
        });
    }
}

/// Keep only reported leftovers that match a request of the batch, each
/// batch request at most once
fn reconcile_leftovers(
    index: usize,
    sent: &[DeleteRequest],
    reported: Vec<DeleteRequest>,
) -> Vec<DeleteRequest> {
    let mut unmatched: HashMap<&DeleteRequest, usize> = HashMap::with_capacity(sent.len());
    for request in sent {
        *unmatched.entry(request).or_default() += 1;
    }

    let reported_len = reported.len();
    let kept: Vec<_> = reported
        .into_iter()
        .filter(|request| match unmatched.get_mut(request) {
            Some(count) if *count > 0 => {
                *count -= 1;
                true
            }
            _ => false,
        })
        .collect();

    let discarded = reported_len - kept.len();
    if discarded > 0 {
        tracing::warn!(
            batch = index,
            discarded,
            "store returned unprocessed items that were not in the batch; ignoring"
        );
    }
    kept
}
