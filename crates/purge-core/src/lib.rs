//! Purge Core - batched deletion engine
//!
//! Removes an arbitrary number of keyed items from a store whose
//! batch-write call is size-limited, may hand items back unprocessed and
//! may throttle whole calls:
//! - Splits the input into store-sized batches
//! - Dispatches batches with bounded parallelism
//! - Retries exactly the leftovers with exponential backoff and jitter
//! - Fails loudly once the retry budget is spent
//!
//! # Example
//!
//! ```rust,ignore
//! use purge_core::prelude::*;
//! use std::sync::Arc;
//!
//! # async fn example(store: Arc<dyn BatchWriter>) -> Result<(), PurgeError> {
//! let engine = PurgeEngine::new(store, "sessions", PurgeConfig::new())?
//!     .with_progress(Arc::new(|event: &ProgressEvent| println!("{event}")));
//!
//! let keys = vec![DeleteRequest::single("pk", "session#1")];
//! let outcome = engine.delete(keys).await?;
//!
//! println!("Deleted {} items in {} rounds", outcome.applied, outcome.rounds);
//! # Ok(())
//! # }
//! ```

#![warn(unreachable_pub)]
#![allow(missing_docs)]

// Core modules
pub mod backoff;
pub mod chunker;
pub mod config;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod progress;
pub mod state_machine;
pub mod store;
pub mod types;

// Re-exports for convenience
pub use backoff::BackoffPolicy;
pub use chunker::chunk;
pub use config::{BackoffConfig, PurgeConfig};
pub use dispatcher::{Dispatcher, ProgressCounter, RoundReport};
pub use engine::PurgeEngine;
pub use error::{ConfigError, PurgeError, StoreError};
pub use progress::{NoopProgress, ProgressEvent, ProgressSink, TracingProgress};
pub use state_machine::RoundState;
pub use store::{
    collect_keys, BatchWriteOutput, BatchWriter, Cursor, KeyPage, KeySelector, KeySource,
    MAX_BATCH_SIZE,
};
pub use types::{AttributeValue, Batch, DeleteRequest, OperationId, PurgeOutcome, RetryState};

/// Re-exported so callers can cancel without a direct `tokio-util` dependency
pub use tokio_util::sync::CancellationToken;

/// Prelude module for common imports
pub mod prelude {
    //! Common imports for working with Purge Core
    pub use crate::{
        AttributeValue, BatchWriteOutput, BatchWriter, CancellationToken, DeleteRequest,
        KeySelector, KeySource, ProgressEvent, ProgressSink, PurgeConfig, PurgeEngine,
        PurgeError, PurgeOutcome, StoreError,
    };
}

/// Version of this crate
pub const VERSION: &str = env!("CARGO_PKG_VERSION");
