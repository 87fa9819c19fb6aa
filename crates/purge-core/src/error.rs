//! Error types for Purge Core
//!
//! Provides error handling for:
//! - Store-side conditions (throttling vs. everything else)
//! - Retry exhaustion and cancellation
//! - Configuration problems
//! - Round state machine violations

use crate::state_machine::RoundState;

/// Errors raised by a store's batch-write or key-discovery calls
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum StoreError {
    /// Provisioned capacity exceeded; the call had no effect
    #[error("provisioned throughput exceeded on table {table}")]
    ThroughputExceeded { table: String },

    /// Batch larger than the store accepts per call
    #[error("batch of {size} requests exceeds the per-call limit of {limit}")]
    BatchTooLarge { size: usize, limit: usize },

    /// Unknown table
    #[error("table not found: {0}")]
    TableNotFound(String),

    /// Network or connection failure
    #[error("transport error: {0}")]
    Transport(String),

    /// Key discovery never ran out of pages
    #[error("pagination did not finish within {max_pages} pages")]
    Pagination { max_pages: usize },

    /// Anything else the store reports
    #[error("store error: {0}")]
    Other(String),
}

impl StoreError {
    /// Throttling is the only store condition the engine absorbs
    #[inline]
    #[must_use]
    pub fn is_throttling(&self) -> bool {
        matches!(self, Self::ThroughputExceeded { .. })
    }

    /// Throttling signal for a table
    #[inline]
    pub fn throttled(table: impl Into<String>) -> Self {
        Self::ThroughputExceeded {
            table: table.into(),
        }
    }
}

/// Main Purge error type
#[derive(Debug, thiserror::Error)]
pub enum PurgeError {
    /// Items remain after the last permitted round
    #[error(
        "retry budget exhausted: {remaining} items still unprocessed after {max_attempts} attempts ({applied} applied)"
    )]
    Exhausted {
        /// Items still outstanding
        remaining: usize,
        /// Retry ceiling that was reached
        max_attempts: u32,
        /// Items confirmed applied before giving up
        applied: usize,
    },

    /// Caller aborted the operation
    #[error("purge cancelled: {applied} applied, {remaining} outstanding")]
    Cancelled {
        /// Items confirmed applied before the abort
        applied: usize,
        /// Items neither applied nor confirmed
        remaining: usize,
    },

    /// Unexpected store failure; not retried
    #[error("store error: {0}")]
    Store(#[from] StoreError),

    /// Invalid configuration
    #[error("configuration error: {0}")]
    Config(#[from] ConfigError),

    /// Round state machine violation
    #[error("illegal round transition: {from:?} -> {to:?}")]
    IllegalTransition { from: RoundState, to: RoundState },

    /// A dispatch worker panicked or was aborted
    #[error("dispatch worker failed: {0}")]
    Worker(String),
}

impl PurgeError {
    /// Items still outstanding when the operation stopped, if known
    #[inline]
    #[must_use]
    pub fn remaining(&self) -> Option<usize> {
        match self {
            Self::Exhausted { remaining, .. } | Self::Cancelled { remaining, .. } => {
                Some(*remaining)
            }
            _ => None,
        }
    }

    /// Whether retrying the same call can never help
    #[inline]
    #[must_use]
    pub fn is_terminal(&self) -> bool {
        matches!(
            self,
            Self::Config(_) | Self::IllegalTransition { .. } | Self::Worker(_)
        )
    }

    /// Whether the caller asked for this
    #[inline]
    #[must_use]
    pub fn is_cancelled(&self) -> bool {
        matches!(self, Self::Cancelled { .. })
    }
}

/// Configuration errors
#[derive(Debug, Clone, PartialEq, Eq, thiserror::Error)]
pub enum ConfigError {
    /// Field value out of range
    #[error("invalid {field}: {reason}")]
    Invalid { field: &'static str, reason: String },

    /// TOML could not be parsed
    #[error("parse error: {0}")]
    Parse(String),

    /// Config file could not be read
    #[error("cannot read {path}: {reason}")]
    Io { path: String, reason: String },
}

impl ConfigError {
    #[inline]
    pub(crate) fn invalid(field: &'static str, reason: impl Into<String>) -> Self {
        Self::Invalid {
            field,
            reason: reason.into(),
        }
    }
}

impl From<toml::de::Error> for ConfigError {
    fn from(value: toml::de::Error) -> Self {
        Self::Parse(value.to_string())
    }
}
