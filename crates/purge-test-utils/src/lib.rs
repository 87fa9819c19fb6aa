//! Testing utilities for Purge workspace
//!
//! Shared test stores, progress capture and request fixtures.

#![allow(missing_docs)]

use async_trait::async_trait;
use parking_lot::Mutex;
use purge_core::{
    BatchWriteOutput, BatchWriter, DeleteRequest, ProgressEvent, ProgressSink, StoreError,
};
use std::collections::{HashMap, VecDeque};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

pub const TEST_TABLE: &str = "test-items";

/// `n` single-key requests `item#0000 .. item#{n-1}`
pub fn requests(n: usize) -> Vec<DeleteRequest> {
    (0..n)
        .map(|i| DeleteRequest::single("pk", format!("item#{i:04}")))
        .collect()
}

/// `n` composite-key requests spread over `partitions` partitions
pub fn composite_requests(n: usize, partitions: usize) -> Vec<DeleteRequest> {
    (0..n)
        .map(|i| {
            DeleteRequest::composite(
                ("pk", format!("tenant#{}", i % partitions.max(1))),
                ("sk", i as i64),
            )
        })
        .collect()
}

/// One scripted reply
#[derive(Debug, Clone)]
pub enum Reply {
    /// Apply the whole batch
    ApplyAll,
    /// Hand back the first `n` requests of the batch
    Unprocess(usize),
    /// Hand back the whole batch
    UnprocessAll,
    /// Throttle the whole batch
    Throttle,
    /// Fail the call
    Fail(StoreError),
}

/// Tracks concurrent calls and their high-water mark
#[derive(Debug, Default)]
pub struct InFlight {
    current: AtomicUsize,
    peak: AtomicUsize,
}

impl InFlight {
    pub fn enter(&self) {
        let now = self.current.fetch_add(1, Ordering::SeqCst) + 1;
        self.peak.fetch_max(now, Ordering::SeqCst);
    }

    pub fn exit(&self) {
        self.current.fetch_sub(1, Ordering::SeqCst);
    }

    pub fn peak(&self) -> usize {
        self.peak.load(Ordering::SeqCst)
    }
}

/// Store answering calls from a queue of replies (then `ApplyAll`)
#[derive(Debug, Default)]
pub struct ScriptedStore {
    replies: Mutex<VecDeque<Reply>>,
    calls: Mutex<Vec<Vec<DeleteRequest>>>,
    latency: Option<Duration>,
    in_flight: InFlight,
}

impl ScriptedStore {
    pub fn new(replies: impl IntoIterator<Item = Reply>) -> Self {
        Self {
            replies: Mutex::new(replies.into_iter().collect()),
            ..Self::default()
        }
    }

    /// Never fails
    pub fn reliable() -> Self {
        Self::default()
    }

    /// Sleep this long inside every call
    pub fn with_latency(mut self, latency: Duration) -> Self {
        self.latency = Some(latency);
        self
    }

    /// Batches received, in call order
    pub fn calls(&self) -> Vec<Vec<DeleteRequest>> {
        self.calls.lock().clone()
    }

    pub fn call_count(&self) -> usize {
        self.calls.lock().len()
    }

    /// Most calls ever outstanding at once
    pub fn peak_in_flight(&self) -> usize {
        self.in_flight.peak()
    }
}

#[async_trait]
impl BatchWriter for ScriptedStore {
    async fn batch_delete(
        &self,
        table: &str,
        requests: &[DeleteRequest],
    ) -> Result<BatchWriteOutput, StoreError> {
        self.in_flight.enter();
        self.calls.lock().push(requests.to_vec());
        let reply = self.replies.lock().pop_front().unwrap_or(Reply::ApplyAll);
        if let Some(latency) = self.latency {
            tokio::time::sleep(latency).await;
        }
        self.in_flight.exit();

        match reply {
            Reply::ApplyAll => Ok(BatchWriteOutput::applied()),
            Reply::Unprocess(n) => Ok(BatchWriteOutput::with_unprocessed(
                table,
                requests[..n.min(requests.len())].to_vec(),
            )),
            Reply::UnprocessAll => Ok(BatchWriteOutput::with_unprocessed(table, requests.to_vec())),
            Reply::Throttle => Err(StoreError::throttled(table)),
            Reply::Fail(e) => Err(e),
        }
    }
}

/// Store that applies a request only on its `succeed_on`-th submission
///
/// Used for "fails K-1 times, then works" scenarios regardless of how the
/// engine regroups leftovers into batches.
#[derive(Debug)]
pub struct StubbornStore {
    succeed_on: u32,
    seen: Mutex<HashMap<DeleteRequest, u32>>,
    calls: AtomicUsize,
}

impl StubbornStore {
    pub fn new(succeed_on: u32) -> Self {
        Self {
            succeed_on,
            seen: Mutex::new(HashMap::new()),
            calls: AtomicUsize::new(0),
        }
    }

    /// Never applies anything
    pub fn never() -> Self {
        Self::new(u32::MAX)
    }

    pub fn call_count(&self) -> usize {
        self.calls.load(Ordering::SeqCst)
    }

    /// Times `request` was submitted
    pub fn submissions(&self, request: &DeleteRequest) -> u32 {
        self.seen.lock().get(request).copied().unwrap_or(0)
    }
}

#[async_trait]
impl BatchWriter for StubbornStore {
    async fn batch_delete(
        &self,
        table: &str,
        requests: &[DeleteRequest],
    ) -> Result<BatchWriteOutput, StoreError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        let mut seen = self.seen.lock();
        let leftover = requests
            .iter()
            .filter(|request| {
                let count = seen.entry((*request).clone()).or_insert(0);
                *count += 1;
                *count < self.succeed_on
            })
            .cloned()
            .collect();
        Ok(BatchWriteOutput::with_unprocessed(table, leftover))
    }
}

/// Progress sink that records every event
#[derive(Debug, Default)]
pub struct CapturingSink {
    events: Mutex<Vec<ProgressEvent>>,
}

impl CapturingSink {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn events(&self) -> Vec<ProgressEvent> {
        self.events.lock().clone()
    }

    /// Rendered status lines
    pub fn messages(&self) -> Vec<String> {
        self.events.lock().iter().map(ToString::to_string).collect()
    }

    /// `processed` values of every `BatchCompleted`, in emission order
    pub fn processed_counts(&self) -> Vec<usize> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::BatchCompleted { processed, .. } => Some(*processed),
                _ => None,
            })
            .collect()
    }

    /// Delays of every `RetryScheduled`
    pub fn retry_delays(&self) -> Vec<Duration> {
        self.events
            .lock()
            .iter()
            .filter_map(|e| match e {
                ProgressEvent::RetryScheduled { delay, .. } => Some(*delay),
                _ => None,
            })
            .collect()
    }
}

impl ProgressSink for CapturingSink {
    fn report(&self, event: &ProgressEvent) {
        self.events.lock().push(event.clone());
    }
}
