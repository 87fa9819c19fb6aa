use purge_harness::{run_simulator, run_simulator_with_cancel, RunResult, SimulatorConfig};
use purge_core::CancellationToken;

fn config(seed: u64) -> SimulatorConfig {
    SimulatorConfig {
        seed,
        items: 400,
        latency_ms: 1,
        ..SimulatorConfig::default()
    }
}

#[tokio::test(start_paused = true)]
async fn test_simulation_passes_across_seeds() {
    for seed in [1, 42, 1337, 9001] {
        let report = run_simulator(config(seed)).await.unwrap();
        assert!(report.passed(), "seed {seed}:\n{}", report.generate_text());
        assert!(report.peak_in_flight <= report.config.purge.concurrency);
    }
}

#[tokio::test(start_paused = true)]
async fn test_report_json_shape() {
    let report = run_simulator(config(5)).await.unwrap();
    let json = serde_json::to_value(&report).unwrap();

    assert_eq!(json["config"]["seed"], 5);
    assert_eq!(json["config"]["purge"]["batch_size"], 25);
    assert!(json["result"]["status"].is_string());
    assert!(json["violations"].as_array().unwrap().is_empty());
}

#[tokio::test(start_paused = true)]
async fn test_cancelled_simulation_accounts_for_everything() {
    let cancel = CancellationToken::new();
    cancel.cancel();

    let report = run_simulator_with_cancel(config(8), &cancel).await.unwrap();

    assert!(report.passed(), "{}", report.generate_text());
    assert_eq!(
        report.result,
        RunResult::Cancelled {
            applied: 0,
            remaining: 400
        }
    );
    assert_eq!(report.remaining_in_store, 400);
    assert_eq!(report.faults.calls, 0);
}
