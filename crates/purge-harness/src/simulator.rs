//! Purge Simulator - seeded end-to-end runs against an unreliable store
//!
//! Seeds an in-memory table, discovers its keys, and purges them through a
//! fault-injecting wrapper. Afterwards the store itself is checked:
//! - Reported success means the table is empty
//! - Reported exhaustion or cancellation matches what is left in the table
//! - The wrapper never saw more concurrent calls than configured
//!
//! Fault sequences depend only on the seed; interleaving of concurrent
//! workers may still differ between runs.

use crate::flaky::{FaultStats, FlakyStore};
use crate::memory_store::MemoryStore;
use purge_core::{
    BackoffConfig, CancellationToken, DeleteRequest, KeySelector, PurgeConfig, PurgeEngine,
    PurgeError, PurgeOutcome, TracingProgress,
};
use serde::{Deserialize, Serialize};
use std::fmt::Write as _;
use std::sync::Arc;
use std::time::{Duration, Instant};

/// Table the simulator seeds and purges
pub const SIMULATED_TABLE: &str = "simulated-items";

/// Partitions the seeded keys are spread over
const PARTITIONS: usize = 16;

/// Simulator configuration
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SimulatorConfig {
    /// Random seed for reproducibility
    pub seed: u64,
    /// Items seeded into the table
    pub items: usize,
    /// Probability that a call is throttled whole
    pub throttle_rate: f64,
    /// Probability that a call applies only part of its batch
    pub partial_rate: f64,
    /// Simulated per-call latency
    pub latency_ms: u64,
    /// Engine configuration
    pub purge: PurgeConfig,
}

impl Default for SimulatorConfig {
    fn default() -> Self {
        Self {
            seed: 42,
            items: 1000,
            throttle_rate: 0.1,
            partial_rate: 0.2,
            latency_ms: 2,
            purge: Self::fast_purge_config(),
        }
    }
}

impl SimulatorConfig {
    /// Engine defaults with backoff scaled down to milliseconds
    #[must_use]
    pub fn fast_purge_config() -> PurgeConfig {
        PurgeConfig::new().with_backoff(BackoffConfig {
            base_delay_ms: 5,
            max_delay_ms: 100,
            jitter_min_ms: 0,
            jitter_max_ms: 5,
        })
    }
}

/// Simulator setup errors
#[derive(Debug, thiserror::Error)]
pub enum SimulatorError {
    #[error("{name} must be within [0, 1], got {value}")]
    Rate { name: &'static str, value: f64 },

    #[error(transparent)]
    Engine(#[from] PurgeError),
}

/// A broken guarantee detected after the run
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Violation {
    /// Engine reported success but items survived
    ItemsLeftAfterSuccess { left: usize },
    /// Reported remaining count disagrees with the table
    RemainingMismatch { reported: usize, in_store: usize },
    /// Applied plus remaining does not add up to the input
    AccountingMismatch {
        applied: usize,
        remaining: usize,
        total: usize,
    },
    /// More store calls in flight than the concurrency limit
    ConcurrencyExceeded { peak: usize, limit: usize },
    /// Engine failed in a way faults alone cannot cause
    UnexpectedError { error: String },
}

/// How the purge ended
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum RunResult {
    Completed(PurgeOutcome),
    Exhausted {
        applied: usize,
        remaining: usize,
        max_attempts: u32,
    },
    Cancelled {
        applied: usize,
        remaining: usize,
    },
    Failed {
        error: String,
    },
}

/// Final report from simulator
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SimulatorReport {
    pub config: SimulatorConfig,
    pub result: RunResult,
    /// Keys the engine was handed (0 if the run failed outright)
    pub discovered: usize,
    /// Items still in the table afterwards
    pub remaining_in_store: usize,
    pub peak_in_flight: usize,
    pub faults: FaultStats,
    pub violations: Vec<Violation>,
    pub elapsed_ms: u64,
}

impl SimulatorReport {
    /// No guarantee was broken (exhaustion alone is not a violation)
    #[must_use]
    pub fn passed(&self) -> bool {
        self.violations.is_empty()
    }

    /// Generate text report
    #[must_use]
    pub fn generate_text(&self) -> String {
        let mut report = String::new();
        let purge = &self.config.purge;

        let _ = writeln!(report, "=== Purge Simulator Report ===\n");
        let _ = writeln!(report, "Seed: {}", self.config.seed);
        let _ = writeln!(report, "Items: {}", self.config.items);
        let _ = writeln!(
            report,
            "Batch Size: {} | Concurrency: {} | Max Attempts: {}",
            purge.batch_size, purge.concurrency, purge.max_attempts
        );
        let _ = writeln!(
            report,
            "Throttle Rate: {:.2} | Partial Rate: {:.2}",
            self.config.throttle_rate, self.config.partial_rate
        );
        let _ = writeln!(report, "Keys Discovered: {}", self.discovered);
        let _ = writeln!(report, "Store Calls: {}", self.faults.calls);
        let _ = writeln!(report, "Throttled Calls: {}", self.faults.throttled);
        let _ = writeln!(
            report,
            "Partial Calls: {} ({} items held back)",
            self.faults.partial, self.faults.held_back
        );
        let _ = writeln!(
            report,
            "Peak In-Flight: {} (limit {})",
            self.peak_in_flight, purge.concurrency
        );

        match &self.result {
            RunResult::Completed(outcome) => {
                let _ = writeln!(
                    report,
                    "Outcome: deleted {}/{} in {} round(s), {} retries",
                    outcome.applied, outcome.total, outcome.rounds, outcome.retries
                );
            }
            RunResult::Exhausted {
                applied,
                remaining,
                max_attempts,
            } => {
                let _ = writeln!(
                    report,
                    "Outcome: exhausted after {max_attempts} attempts, {applied} deleted, {remaining} left"
                );
            }
            RunResult::Cancelled { applied, remaining } => {
                let _ = writeln!(report, "Outcome: cancelled, {applied} deleted, {remaining} left");
            }
            RunResult::Failed { error } => {
                let _ = writeln!(report, "Outcome: failed: {error}");
            }
        }
        let _ = writeln!(report, "Remaining In Store: {}", self.remaining_in_store);
        let _ = writeln!(report, "Elapsed: {}ms", self.elapsed_ms);
        let _ = writeln!(report, "Violations: {}", self.violations.len());

        if !self.violations.is_empty() {
            report.push_str("\n=== Violations ===\n");
            for (i, v) in self.violations.iter().enumerate() {
                let _ = writeln!(report, "{}. {:?}", i + 1, v);
            }
        }

        let _ = writeln!(
            report,
            "\n=== Result: {} ===",
            if self.passed() { "PASS" } else { "FAIL" }
        );
        report
    }
}

fn seed_keys(items: usize) -> impl Iterator<Item = DeleteRequest> {
    (0..items).map(|i| {
        DeleteRequest::composite(
            ("pk", format!("tenant#{:02}", i % PARTITIONS)),
            ("sk", format!("item#{i:08}")),
        )
    })
}

fn check_rate(name: &'static str, value: f64) -> Result<(), SimulatorError> {
    if (0.0..=1.0).contains(&value) {
        Ok(())
    } else {
        Err(SimulatorError::Rate { name, value })
    }
}

/// Run the purge simulator
///
/// # Errors
/// - [`SimulatorError::Rate`] for a fault rate outside `[0, 1]`
/// - [`SimulatorError::Engine`] if the engine configuration is invalid
pub async fn run_simulator(config: SimulatorConfig) -> Result<SimulatorReport, SimulatorError> {
    run_simulator_with_cancel(config, &CancellationToken::new()).await
}

/// [`run_simulator`] that stops early once `cancel` fires
pub async fn run_simulator_with_cancel(
    config: SimulatorConfig,
    cancel: &CancellationToken,
) -> Result<SimulatorReport, SimulatorError> {
    check_rate("throttle_rate", config.throttle_rate)?;
    check_rate("partial_rate", config.partial_rate)?;

    let memory = Arc::new(MemoryStore::new());
    memory.create_table(SIMULATED_TABLE);
    memory.insert(SIMULATED_TABLE, seed_keys(config.items));

    let flaky = Arc::new(
        FlakyStore::new(
            Arc::clone(&memory),
            config.seed,
            config.throttle_rate,
            config.partial_rate,
        )
        .with_latency(Duration::from_millis(config.latency_ms)),
    );
    let engine = PurgeEngine::new(flaky.clone(), SIMULATED_TABLE, config.purge.clone())?
        .with_progress(Arc::new(TracingProgress));

    tracing::info!(
        seed = config.seed,
        items = config.items,
        throttle_rate = config.throttle_rate,
        partial_rate = config.partial_rate,
        "simulation started"
    );
    let started = Instant::now();
    let selector = KeySelector::prefix("pk", "tenant#");
    let result = engine
        .purge_matching(memory.as_ref(), &selector, cancel)
        .await;
    let elapsed_ms = u64::try_from(started.elapsed().as_millis()).unwrap_or(u64::MAX);

    let remaining_in_store = memory.len(SIMULATED_TABLE);
    let peak_in_flight = flaky.peak_in_flight();
    let total = config.items;
    let mut violations = Vec::new();
    let mut discovered = 0;

    let result = match result {
        Ok(outcome) => {
            discovered = outcome.total;
            if remaining_in_store > 0 {
                violations.push(Violation::ItemsLeftAfterSuccess {
                    left: remaining_in_store,
                });
            }
            if outcome.applied != total {
                violations.push(Violation::AccountingMismatch {
                    applied: outcome.applied,
                    remaining: 0,
                    total,
                });
            }
            RunResult::Completed(outcome)
        }
        Err(PurgeError::Exhausted {
            remaining,
            max_attempts,
            applied,
        }) => {
            discovered = applied + remaining;
            check_leftovers(&mut violations, applied, remaining, remaining_in_store, total);
            RunResult::Exhausted {
                applied,
                remaining,
                max_attempts,
            }
        }
        Err(PurgeError::Cancelled { applied, remaining }) => {
            discovered = applied + remaining;
            check_leftovers(&mut violations, applied, remaining, remaining_in_store, total);
            RunResult::Cancelled { applied, remaining }
        }
        Err(e) => {
            violations.push(Violation::UnexpectedError {
                error: e.to_string(),
            });
            RunResult::Failed {
                error: e.to_string(),
            }
        }
    };

    if peak_in_flight > config.purge.concurrency {
        violations.push(Violation::ConcurrencyExceeded {
            peak: peak_in_flight,
            limit: config.purge.concurrency,
        });
    }

    if violations.is_empty() {
        tracing::info!(remaining_in_store, peak_in_flight, elapsed_ms, "simulation passed");
    } else {
        tracing::error!(violations = violations.len(), "simulation found violations");
    }

    Ok(SimulatorReport {
        discovered,
        remaining_in_store,
        peak_in_flight,
        faults: flaky.stats(),
        violations,
        elapsed_ms,
        result,
        config,
    })
}

fn check_leftovers(
    violations: &mut Vec<Violation>,
    applied: usize,
    remaining: usize,
    in_store: usize,
    total: usize,
) {
    if remaining != in_store {
        violations.push(Violation::RemainingMismatch {
            reported: remaining,
            in_store,
        });
    }
    if applied + remaining != total {
        violations.push(Violation::AccountingMismatch {
            applied,
            remaining,
            total,
        });
    }
}
