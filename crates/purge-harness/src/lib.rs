//! Purge Harness
//!
//! Runs the purge engine against stores that misbehave on purpose:
//! 1. **MemoryStore**: size-limited batch deletes and paginated key discovery
//! 2. **FlakyStore**: seeded throttling and partial failures around any store
//! 3. **Simulator**: seed, purge, then check the store for broken guarantees
//!
//! # Quick Start
//!
//! ```rust,ignore
//! use purge_harness::{run_simulator, SimulatorConfig};
//!
//! let report = run_simulator(SimulatorConfig::default()).await?;
//! println!("{}", report.generate_text());
//! assert!(report.passed());
//! ```

pub mod flaky;
pub mod memory_store;
pub mod simulator;

pub use flaky::{FaultStats, FlakyStore};
pub use memory_store::{MemoryStore, DEFAULT_PAGE_SIZE};
pub use simulator::{
    run_simulator, run_simulator_with_cancel, RunResult, SimulatorConfig, SimulatorError,
    SimulatorReport, Violation, SIMULATED_TABLE,
};

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
