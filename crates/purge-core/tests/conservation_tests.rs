//! Nothing the engine is given is lost or double counted, whatever the store does.

use proptest::prelude::*;
use purge_core::prelude::*;
use purge_core::{chunk, BackoffConfig, Dispatcher, ProgressCounter};
use purge_test_utils::{requests, CapturingSink, Reply, ScriptedStore, TEST_TABLE};
use std::collections::HashSet;
use std::sync::Arc;

fn paused_runtime() -> tokio::runtime::Runtime {
    tokio::runtime::Builder::new_current_thread()
        .enable_time()
        .start_paused(true)
        .build()
        .unwrap()
}

fn reply() -> impl Strategy<Value = Reply> {
    prop_oneof![
        4 => Just(Reply::ApplyAll),
        2 => (0usize..30).prop_map(Reply::Unprocess),
        1 => Just(Reply::UnprocessAll),
        1 => Just(Reply::Throttle),
    ]
}

proptest! {
    #![proptest_config(ProptestConfig::with_cases(64))]

    #[test]
    fn prop_round_conserves_requests(
        items in 0usize..200,
        concurrency in 1usize..8,
        replies in prop::collection::vec(reply(), 0..12),
    ) {
        let store = Arc::new(ScriptedStore::new(replies));
        let dispatcher = Dispatcher::new(
            store,
            Arc::from(TEST_TABLE),
            concurrency,
            Arc::new(CapturingSink::new()),
        );
        let input = requests(items);
        let counter = ProgressCounter::new(items);

        let report = paused_runtime()
            .block_on(dispatcher.dispatch(chunk(input.clone(), 25), &counter, 0, &CancellationToken::new()))
            .unwrap();

        prop_assert_eq!(report.submitted, items);
        prop_assert_eq!(report.applied + report.outstanding(), items);
        prop_assert_eq!(counter.processed(), report.applied);

        // Leftovers are a duplicate-free subset of the input.
        let known: HashSet<_> = input.iter().collect();
        let leftovers = report.into_outstanding();
        let unique: HashSet<_> = leftovers.iter().collect();
        prop_assert_eq!(unique.len(), leftovers.len());
        prop_assert!(leftovers.iter().all(|r| known.contains(r)));
    }

    #[test]
    fn prop_operation_applied_plus_remaining_is_total(
        items in 1usize..150,
        max_attempts in 1u32..5,
        replies in prop::collection::vec(reply(), 0..24),
    ) {
        let store = Arc::new(ScriptedStore::new(replies));
        let sink = Arc::new(CapturingSink::new());
        let config = PurgeConfig::new()
            .with_max_attempts(max_attempts)
            .with_backoff(BackoffConfig::default().without_jitter());
        let engine = PurgeEngine::new(store, TEST_TABLE, config)
            .unwrap()
            .with_progress(sink.clone());

        let result = paused_runtime().block_on(engine.delete(requests(items)));

        match result {
            Ok(outcome) => {
                prop_assert_eq!(outcome.applied, items);
                prop_assert!(outcome.rounds <= max_attempts);
                prop_assert_eq!(outcome.retries + 1, outcome.rounds);
            }
            Err(PurgeError::Exhausted { remaining, applied, .. }) => {
                prop_assert!(remaining > 0);
                prop_assert_eq!(applied + remaining, items);
                prop_assert_eq!(sink.retry_delays().len() as u32, max_attempts - 1);
            }
            Err(other) => prop_assert!(false, "unexpected error: {}", other),
        }
        prop_assert!(sink.processed_counts().iter().all(|&p| p <= items));
    }
}
