//! Purge engine
//!
//! Owns the round loop:
//! 1. Chunk the working set
//! 2. Dispatch the batches with bounded parallelism
//! 3. Evaluate what came back
//! 4. Back off and go again with exactly the leftovers, or stop
//!
//! Rounds run strictly one after another; the next working set is only
//! known once the current round has fully resolved.

use crate::backoff::BackoffPolicy;
use crate::chunker::chunk;
use crate::config::PurgeConfig;
use crate::dispatcher::{Dispatcher, ProgressCounter};
use crate::error::PurgeError;
use crate::progress::{NoopProgress, ProgressEvent, ProgressSink};
use crate::state_machine::{validate_transition, RoundState};
use crate::store::{collect_keys, BatchWriter, KeySelector, KeySource};
use crate::types::{DeleteRequest, OperationId, PurgeOutcome, RetryState};
use std::sync::Arc;
use tokio_util::sync::CancellationToken;
use tracing::Instrument;

/// Page ceiling for key discovery in [`PurgeEngine::purge_matching`]
pub const DEFAULT_MAX_PAGES: usize = 100_000;

/// Batched, retrying deleter bound to one table
pub struct PurgeEngine {
    /// Target table
    table: Arc<str>,
    /// Validated configuration
    config: PurgeConfig,
    /// Delay between rounds
    backoff: BackoffPolicy,
    /// Round executor
    dispatcher: Dispatcher,
    /// Shared store handle, kept to rebuild the dispatcher
    store: Arc<dyn BatchWriter>,
    /// Status receiver
    progress: Arc<dyn ProgressSink>,
}

impl std::fmt::Debug for PurgeEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("PurgeEngine")
            .field("table", &self.table)
            .field("config", &self.config)
            .field("backoff", &self.backoff)
            .finish_non_exhaustive()
    }
}

impl PurgeEngine {
    /// Create an engine for `table`
    ///
    /// # Errors
    /// - [`PurgeError::Config`] if `config` does not validate
    pub fn new(
        store: Arc<dyn BatchWriter>,
        table: impl Into<String>,
        config: PurgeConfig,
    ) -> Result<Self, PurgeError> {
        config.validate()?;
        let table: Arc<str> = Arc::from(table.into());
        let progress: Arc<dyn ProgressSink> = Arc::new(NoopProgress);
        Ok(Self {
            dispatcher: Dispatcher::new(
                Arc::clone(&store),
                Arc::clone(&table),
                config.concurrency,
                Arc::clone(&progress),
            ),
            backoff: BackoffPolicy::new(&config.backoff),
            table,
            config,
            store,
            progress,
        })
    }

    /// With a progress sink
    #[must_use]
    pub fn with_progress(mut self, progress: Arc<dyn ProgressSink>) -> Self {
        self.dispatcher = Dispatcher::new(
            Arc::clone(&self.store),
            Arc::clone(&self.table),
            self.config.concurrency,
            Arc::clone(&progress),
        );
        self.progress = progress;
        self
    }

    /// Target table
    #[inline]
    #[must_use]
    pub fn table(&self) -> &str {
        &self.table
    }

    /// Effective configuration
    #[inline]
    #[must_use]
    pub fn config(&self) -> &PurgeConfig {
        &self.config
    }

    /// Delete every request, retrying leftovers until none remain
    ///
    /// # Errors
    /// - [`PurgeError::Exhausted`] when leftovers survive `max_attempts` rounds
    /// - [`PurgeError::Store`] on any non-throttling store failure
    pub async fn delete(&self, requests: Vec<DeleteRequest>) -> Result<PurgeOutcome, PurgeError> {
        self.delete_from(requests, RetryState::new(self.config.max_attempts))
            .await
    }

    /// Like [`delete`](Self::delete), resuming from an explicit retry state
    ///
    /// # Errors
    /// - [`PurgeError::Exhausted`] when leftovers survive the remaining attempts of `state`
    /// - [`PurgeError::Store`] on any non-throttling store failure
    pub async fn delete_from(
        &self,
        requests: Vec<DeleteRequest>,
        retry: RetryState,
    ) -> Result<PurgeOutcome, PurgeError> {
        self.run(requests, retry, &CancellationToken::new()).await
    }

    /// Like [`delete`](Self::delete), stopping early when `cancel` fires
    ///
    /// # Errors
    /// Additionally [`PurgeError::Cancelled`] once the token is cancelled
    /// with work still outstanding.
    pub async fn delete_with_cancel(
        &self,
        requests: Vec<DeleteRequest>,
        cancel: &CancellationToken,
    ) -> Result<PurgeOutcome, PurgeError> {
        self.run(requests, RetryState::new(self.config.max_attempts), cancel)
            .await
    }

    /// Discover every key matching `selector`, then delete them
    ///
    /// # Errors
    /// - [`PurgeError::Store`] if listing keys fails, including
    ///   [`StoreError::Pagination`](crate::error::StoreError::Pagination) when the page limit is hit
    /// - everything [`delete_with_cancel`](Self::delete_with_cancel) returns
    pub async fn purge_matching(
        &self,
        source: &dyn KeySource,
        selector: &KeySelector,
        cancel: &CancellationToken,
    ) -> Result<PurgeOutcome, PurgeError> {
        let keys = collect_keys(source, &self.table, selector, Some(DEFAULT_MAX_PAGES)).await?;
        tracing::info!(table = %self.table, keys = keys.len(), "collected keys to purge");
        self.run(keys, RetryState::new(self.config.max_attempts), cancel)
            .await
    }

    async fn run(
        &self,
        requests: Vec<DeleteRequest>,
        retry: RetryState,
        cancel: &CancellationToken,
    ) -> Result<PurgeOutcome, PurgeError> {
        if requests.is_empty() {
            return Ok(PurgeOutcome::empty());
        }

        let id = OperationId::new();
        let span = tracing::info_span!("purge", op = %id, table = %self.table);
        self.round_loop(requests, retry, cancel).instrument(span).await
    }

    async fn round_loop(
        &self,
        requests: Vec<DeleteRequest>,
        mut retry: RetryState,
        cancel: &CancellationToken,
    ) -> Result<PurgeOutcome, PurgeError> {
        let counter = ProgressCounter::new(requests.len());
        let mut outcome = PurgeOutcome {
            total: requests.len(),
            ..PurgeOutcome::default()
        };
        let mut state = RoundState::Dispatching;
        let mut pending = requests;

        tracing::info!(
            total = outcome.total,
            batch_size = self.config.batch_size,
            concurrency = self.config.concurrency,
            attempt = retry.attempt,
            max_attempts = retry.max_attempts,
            "purge started"
        );

        loop {
            let batches = chunk(pending, self.config.batch_size);
            let round = self
                .dispatcher
                .dispatch(batches, &counter, retry.attempt, cancel)
                .await;
            outcome.rounds += 1;

            let report = match round {
                Ok(report) => report,
                Err(e) => {
                    transition(&mut state, RoundState::Failed)?;
                    tracing::error!(error = %e, applied = counter.processed(), "purge aborted");
                    return Err(e);
                }
            };
            outcome.throttled_batches += report.throttled_batches;

            if cancel.is_cancelled() && !report.is_settled() {
                return self.cancelled(&mut state, &counter, report.outstanding());
            }

            transition(&mut state, RoundState::Evaluating)?;
            if report.is_settled() {
                transition(&mut state, RoundState::Done)?;
                outcome.applied = counter.processed();
                tracing::info!(
                    applied = outcome.applied,
                    rounds = outcome.rounds,
                    retries = outcome.retries,
                    "purge finished"
                );
                self.progress.report(&ProgressEvent::Finished {
                    applied: outcome.applied,
                    total: outcome.total,
                    rounds: outcome.rounds,
                });
                return Ok(outcome);
            }

            let failed_attempt = retry.attempt;
            retry = retry.advance();
            let remaining = report.outstanding();
            if retry.is_exhausted() {
                transition(&mut state, RoundState::Failed)?;
                tracing::error!(
                    remaining,
                    max_attempts = retry.max_attempts,
                    applied = counter.processed(),
                    "retry budget exhausted"
                );
                return Err(PurgeError::Exhausted {
                    remaining,
                    max_attempts: retry.max_attempts,
                    applied: counter.processed(),
                });
            }

            transition(&mut state, RoundState::Waiting)?;
            let delay = self.backoff.delay(failed_attempt);
            tracing::warn!(
                remaining,
                attempt = retry.attempt,
                max_attempts = retry.max_attempts,
                delay_ms = delay.as_millis(),
                "unprocessed items remain, will retry after delay"
            );
            metrics::counter!("purge_retry_rounds_total").increment(1);
            self.progress.report(&ProgressEvent::RetryScheduled {
                remaining,
                attempt: retry.attempt,
                max_attempts: retry.max_attempts,
                delay,
            });

            tokio::select! {
                () = cancel.cancelled() => {
                    return self.cancelled(&mut state, &counter, remaining);
                }
                () = tokio::time::sleep(delay) => {}
            }
            outcome.retries += 1;

            transition(&mut state, RoundState::Dispatching)?;
            pending = report.into_outstanding();
        }
    }

    fn cancelled(
        &self,
        state: &mut RoundState,
        counter: &ProgressCounter,
        remaining: usize,
    ) -> Result<PurgeOutcome, PurgeError> {
        transition(state, RoundState::Cancelled)?;
        let applied = counter.processed();
        tracing::warn!(applied, remaining, "purge cancelled");
        Err(PurgeError::Cancelled { applied, remaining })
    }
}

fn transition(state: &mut RoundState, to: RoundState) -> Result<(), PurgeError> {
    validate_transition(*state, to)?;
    tracing::debug!(from = ?*state, ?to, "round state");
    *state = to;
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::store::{BatchWriteOutput, MockBatchWriter};

    fn requests(n: usize) -> Vec<DeleteRequest> {
        (0..n)
            .map(|i| DeleteRequest::single("pk", format!("k{i}")))
            .collect()
    }

    #[test]
    fn invalid_config_is_rejected_at_construction() {
        let store = Arc::new(MockBatchWriter::new());
        let err = PurgeEngine::new(store, "t", PurgeConfig::new().with_concurrency(0)).unwrap_err();
        assert!(matches!(err, PurgeError::Config(_)));
    }

    #[tokio::test]
    async fn empty_input_never_touches_the_store() {
        let mut store = MockBatchWriter::new();
        store.expect_batch_delete().never();
        let engine = PurgeEngine::new(Arc::new(store), "t", PurgeConfig::default()).unwrap();

        let outcome = engine.delete(Vec::new()).await.unwrap();
        assert_eq!(outcome, PurgeOutcome::empty());
    }

    #[tokio::test(start_paused = true)]
    async fn exhaustion_reports_remaining() {
        let mut store = MockBatchWriter::new();
        store.expect_batch_delete().times(3).returning(|table, batch| {
            Ok(BatchWriteOutput::with_unprocessed(table, batch[..2].to_vec()))
        });
        let engine = PurgeEngine::new(
            Arc::new(store),
            "t",
            PurgeConfig::new().with_max_attempts(3),
        )
        .unwrap();

        let err = engine.delete(requests(5)).await.unwrap_err();
        assert!(matches!(
            err,
            PurgeError::Exhausted {
                remaining: 2,
                max_attempts: 3,
                applied: 3
            }
        ));
    }

    #[tokio::test(start_paused = true)]
    async fn resumed_state_has_smaller_budget() {
        let mut store = MockBatchWriter::new();
        store
            .expect_batch_delete()
            .times(1)
            .returning(|table, _| Err(crate::error::StoreError::throttled(table)));
        let engine = PurgeEngine::new(Arc::new(store), "t", PurgeConfig::default()).unwrap();

        let err = engine
            .delete_from(requests(4), RetryState::starting_at(9, 10))
            .await
            .unwrap_err();
        assert_eq!(err.remaining(), Some(4));
    }
}
