//! Fault-injecting store wrapper
//!
//! Wraps any [`BatchWriter`] and, driven by a seeded RNG, either throttles a
//! whole call or forwards only part of the batch and reports the rest as
//! unprocessed. Also records how many calls were outstanding at once.

use async_trait::async_trait;
use parking_lot::Mutex;
use purge_core::{BatchWriteOutput, BatchWriter, DeleteRequest, StoreError};
use rand::rngs::StdRng;
use rand::seq::index;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

/// Fault counters
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct FaultStats {
    /// Calls received
    pub calls: usize,
    /// Calls rejected whole
    pub throttled: usize,
    /// Calls that applied only part of their batch
    pub partial: usize,
    /// Requests handed back by partial calls
    pub held_back: usize,
}

enum Fault {
    None,
    Throttle,
    /// Sorted batch positions to hand back
    HoldBack(Vec<usize>),
}

#[derive(Debug, Default)]
struct Counters {
    calls: AtomicUsize,
    throttled: AtomicUsize,
    partial: AtomicUsize,
    held_back: AtomicUsize,
    in_flight: AtomicUsize,
    peak_in_flight: AtomicUsize,
}

/// Store wrapper injecting throttling and partial failures
#[derive(Debug)]
pub struct FlakyStore<S: ?Sized> {
    rng: Mutex<StdRng>,
    throttle_rate: f64,
    partial_rate: f64,
    latency: Option<Duration>,
    counters: Counters,
    inner: Arc<S>,
}

/// Clamp into `[0, 1]`; NaN means never
fn probability(rate: f64) -> f64 {
    if rate.is_nan() {
        0.0
    } else {
        rate.clamp(0.0, 1.0)
    }
}

impl<S: BatchWriter + ?Sized> FlakyStore<S> {
    /// Wrap `inner`; identical seeds give identical fault sequences
    pub fn new(inner: Arc<S>, seed: u64, throttle_rate: f64, partial_rate: f64) -> Self {
        Self {
            rng: Mutex::new(StdRng::seed_from_u64(seed)),
            throttle_rate: probability(throttle_rate),
            partial_rate: probability(partial_rate),
            latency: None,
            counters: Counters::default(),
            inner,
        }
    }

    /// Sleep this long inside every call
    #[must_use]
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency).filter(|l| !l.is_zero());
        self
    }

    /// Wrapped store
    #[must_use]
    pub fn inner(&self) -> &Arc<S> {
        &self.inner
    }

    /// Snapshot of the fault counters
    #[must_use]
    pub fn stats(&self) -> FaultStats {
        FaultStats {
            calls: self.counters.calls.load(Ordering::Relaxed),
            throttled: self.counters.throttled.load(Ordering::Relaxed),
            partial: self.counters.partial.load(Ordering::Relaxed),
            held_back: self.counters.held_back.load(Ordering::Relaxed),
        }
    }

    /// Most calls ever outstanding at once
    #[must_use]
    pub fn peak_in_flight(&self) -> usize {
        self.counters.peak_in_flight.load(Ordering::SeqCst)
    }

    fn draw(&self, len: usize) -> Fault {
        let mut rng = self.rng.lock();
        if rng.random_bool(self.throttle_rate) {
            return Fault::Throttle;
        }
        if len == 0 || !rng.random_bool(self.partial_rate) {
            return Fault::None;
        }
        let amount = rng.random_range(1..=len);
        let mut positions = index::sample(&mut *rng, len, amount).into_vec();
        positions.sort_unstable();
        Fault::HoldBack(positions)
    }

    async fn call(&self, table: &str, requests: &[DeleteRequest]) -> Result<BatchWriteOutput, StoreError> {
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }

        let positions = match self.draw(requests.len()) {
            Fault::None => return self.inner.batch_delete(table, requests).await,
            Fault::Throttle => {
                self.counters.throttled.fetch_add(1, Ordering::Relaxed);
                tracing::trace!(table, size = requests.len(), "injected throttle");
                return Err(StoreError::throttled(table));
            }
            Fault::HoldBack(positions) => positions,
        };

        let mut held = Vec::with_capacity(positions.len());
        let mut forwarded = Vec::with_capacity(requests.len() - positions.len());
        let mut next = positions.iter().peekable();
        for (i, request) in requests.iter().enumerate() {
            if next.next_if_eq(&&i).is_some() {
                held.push(request.clone());
            } else {
                forwarded.push(request.clone());
            }
        }
        self.counters.partial.fetch_add(1, Ordering::Relaxed);
        self.counters.held_back.fetch_add(held.len(), Ordering::Relaxed);
        tracing::trace!(table, size = requests.len(), held = held.len(), "injected partial failure");

        if !forwarded.is_empty() {
            let mut output = self.inner.batch_delete(table, &forwarded).await?;
            held.extend(output.take_unprocessed(table));
        }
        Ok(BatchWriteOutput::with_unprocessed(table, held))
    }
}

#[async_trait]
impl<S: BatchWriter + ?Sized> BatchWriter for FlakyStore<S> {
    async fn batch_delete(
        &self,
        table: &str,
        requests: &[DeleteRequest],
    ) -> Result<BatchWriteOutput, StoreError> {
        self.counters.calls.fetch_add(1, Ordering::Relaxed);
        let now = self.counters.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
        self.counters.peak_in_flight.fetch_max(now, Ordering::SeqCst);

        let result = self.call(table, requests).await;

        self.counters.in_flight.fetch_sub(1, Ordering::SeqCst);
        result
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::memory_store::MemoryStore;

    fn keys(n: usize) -> Vec<DeleteRequest> {
        (0..n).map(|i| DeleteRequest::single("pk", i as i64)).collect()
    }

    fn seeded(store: &Arc<MemoryStore>, seed: u64, throttle: f64, partial: f64) -> FlakyStore<MemoryStore> {
        FlakyStore::new(Arc::clone(store), seed, throttle, partial)
    }

    #[tokio::test]
    async fn zero_rates_pass_through() {
        let memory = Arc::new(MemoryStore::new());
        memory.insert("t", keys(25));
        let flaky = seeded(&memory, 7, 0.0, 0.0);

        let output = flaky.batch_delete("t", &keys(25)).await.unwrap();

        assert_eq!(output.unprocessed_count(), 0);
        assert!(memory.is_empty("t"));
        assert_eq!(flaky.stats().calls, 1);
        assert_eq!(flaky.peak_in_flight(), 1);
    }

    #[tokio::test]
    async fn certain_throttle_never_reaches_inner() {
        let memory = Arc::new(MemoryStore::new());
        memory.insert("t", keys(10));
        let flaky = seeded(&memory, 7, 1.0, 0.0);

        let err = flaky.batch_delete("t", &keys(10)).await.unwrap_err();

        assert!(err.is_throttling());
        assert_eq!(memory.len("t"), 10);
        assert_eq!(memory.write_calls(), 0);
        assert_eq!(flaky.stats().throttled, 1);
    }

    #[tokio::test]
    async fn held_back_items_stay_in_the_store() {
        let memory = Arc::new(MemoryStore::new());
        memory.insert("t", keys(20));
        let flaky = seeded(&memory, 11, 0.0, 1.0);

        let mut output = flaky.batch_delete("t", &keys(20)).await.unwrap();
        let held = output.take_unprocessed("t");

        assert!(!held.is_empty());
        assert_eq!(memory.len("t"), held.len());
        assert!(held.iter().all(|k| memory.contains("t", k)));
        assert_eq!(flaky.stats().held_back, held.len());
    }

    #[tokio::test]
    async fn same_seed_same_faults() {
        let mut runs = Vec::new();
        for _ in 0..2 {
            let memory = Arc::new(MemoryStore::new());
            memory.insert("t", keys(100));
            let flaky = seeded(&memory, 99, 0.3, 0.5);
            let mut leftovers = Vec::new();
            for batch in keys(100).chunks(25) {
                match flaky.batch_delete("t", batch).await {
                    Ok(mut output) => leftovers.push(output.take_unprocessed("t").len()),
                    Err(_) => leftovers.push(usize::MAX),
                }
            }
            runs.push(leftovers);
        }
        assert_eq!(runs[0], runs[1]);
    }

    #[test]
    fn rates_are_clamped() {
        assert_eq!(probability(f64::NAN), 0.0);
        assert_eq!(probability(-0.5), 0.0);
        assert_eq!(probability(1.5), 1.0);
        assert_eq!(probability(0.25), 0.25);
    }
}
