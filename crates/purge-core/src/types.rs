//! Core types for Purge
//!
//! Defines the fundamental values the engine moves around:
//! - Key attribute values and delete requests
//! - Batches produced by the chunker
//! - Retry counters threaded through rounds
//! - The outcome reported to callers

use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::fmt;
use ulid::Ulid;

/// Unique identifier of one top-level purge operation (ULID for sortability)
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct OperationId(pub Ulid);

impl OperationId {
    /// Generate new operation ID
    #[inline]
    #[must_use]
    pub fn new() -> Self {
        Self(Ulid::new())
    }
}

impl Default for OperationId {
    fn default() -> Self {
        Self::new()
    }
}

impl fmt::Display for OperationId {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", self.0)
    }
}

/// Typed value of a key attribute
///
/// Numbers are carried in their textual form, the way batch-write stores
/// transport them, so keys stay `Eq + Hash + Ord`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub enum AttributeValue {
    /// String value
    S(String),
    /// Number value
    N(String),
    /// Binary value
    B(Vec<u8>),
    /// Boolean value
    Bool(bool),
}

impl AttributeValue {
    /// String view, if this is a string attribute
    #[inline]
    #[must_use]
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::S(s) => Some(s),
            _ => None,
        }
    }
}

impl From<&str> for AttributeValue {
    fn from(value: &str) -> Self {
        Self::S(value.to_string())
    }
}

impl From<String> for AttributeValue {
    fn from(value: String) -> Self {
        Self::S(value)
    }
}

impl From<i64> for AttributeValue {
    fn from(value: i64) -> Self {
        Self::N(value.to_string())
    }
}

impl From<bool> for AttributeValue {
    fn from(value: bool) -> Self {
        Self::Bool(value)
    }
}

impl fmt::Display for AttributeValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::S(s) => write!(f, "{s:?}"),
            Self::N(n) => write!(f, "{n}"),
            Self::B(b) => write!(f, "<{} bytes>", b.len()),
            Self::Bool(b) => write!(f, "{b}"),
        }
    }
}

/// Key of exactly one item to remove
///
/// Attribute name to value, possibly composite (partition + sort key).
/// Immutable once built.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
pub struct DeleteRequest {
    key: BTreeMap<String, AttributeValue>,
}

impl DeleteRequest {
    /// Create from a full key mapping
    #[inline]
    #[must_use]
    pub fn new(key: BTreeMap<String, AttributeValue>) -> Self {
        Self { key }
    }

    /// Single-attribute key
    #[must_use]
    pub fn single(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::from_iter([(attribute.into(), value.into())])
    }

    /// Partition + sort key
    #[must_use]
    pub fn composite(
        partition: (impl Into<String>, impl Into<AttributeValue>),
        sort: (impl Into<String>, impl Into<AttributeValue>),
    ) -> Self {
        Self::from_iter([
            (partition.0.into(), partition.1.into()),
            (sort.0.into(), sort.1.into()),
        ])
    }

    /// The key mapping
    #[inline]
    #[must_use]
    pub fn key(&self) -> &BTreeMap<String, AttributeValue> {
        &self.key
    }

    /// Value of one key attribute
    #[inline]
    #[must_use]
    pub fn attribute(&self, name: &str) -> Option<&AttributeValue> {
        self.key.get(name)
    }
}

impl FromIterator<(String, AttributeValue)> for DeleteRequest {
    fn from_iter<I: IntoIterator<Item = (String, AttributeValue)>>(iter: I) -> Self {
        Self {
            key: iter.into_iter().collect(),
        }
    }
}

impl fmt::Display for DeleteRequest {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str("{")?;
        for (i, (name, value)) in self.key.iter().enumerate() {
            if i > 0 {
                f.write_str(", ")?;
            }
            write!(f, "{name}: {value}")?;
        }
        f.write_str("}")
    }
}

/// Ordered, bounded group of requests sent in one batch-write call
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Batch {
    index: usize,
    requests: Vec<DeleteRequest>,
}

impl Batch {
    #[inline]
    pub(crate) fn new(index: usize, requests: Vec<DeleteRequest>) -> Self {
        Self { index, requests }
    }

    /// Position of this batch within its round
    #[inline]
    #[must_use]
    pub fn index(&self) -> usize {
        self.index
    }

    /// Requests in submission order
    #[inline]
    #[must_use]
    pub fn requests(&self) -> &[DeleteRequest] {
        &self.requests
    }

    /// Number of requests
    #[inline]
    #[must_use]
    pub fn len(&self) -> usize {
        self.requests.len()
    }

    /// Whether the batch is empty (never produced by the chunker)
    #[inline]
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.requests.is_empty()
    }

    /// Take back the requests
    #[inline]
    #[must_use]
    pub fn into_requests(self) -> Vec<DeleteRequest> {
        self.requests
    }
}

/// Attempt counters threaded through rounds
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct RetryState {
    /// Rounds already retried; starts at 0
    pub attempt: u32,
    /// Ceiling at which the operation fails terminally
    pub max_attempts: u32,
}

impl RetryState {
    /// Fresh state with the given ceiling
    #[inline]
    #[must_use]
    pub fn new(max_attempts: u32) -> Self {
        Self {
            attempt: 0,
            max_attempts,
        }
    }

    /// Resume from an explicit attempt count
    #[inline]
    #[must_use]
    pub fn starting_at(attempt: u32, max_attempts: u32) -> Self {
        Self {
            attempt,
            max_attempts,
        }
    }

    /// State for the next round
    #[inline]
    #[must_use]
    pub fn advance(self) -> Self {
        Self {
            attempt: self.attempt.saturating_add(1),
            ..self
        }
    }

    /// Whether the retry budget is spent
    #[inline]
    #[must_use]
    pub fn is_exhausted(&self) -> bool {
        self.attempt >= self.max_attempts
    }
}

/// Result of a successful purge
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct PurgeOutcome {
    /// Requests handed to the engine
    pub total: usize,
    /// Requests the store confirmed applied
    pub applied: usize,
    /// Dispatch rounds run
    pub rounds: u32,
    /// Backoff waits between rounds
    pub retries: u32,
    /// Batches rejected whole by throttling
    pub throttled_batches: usize,
}

impl PurgeOutcome {
    /// Outcome for an operation that had nothing to do
    #[inline]
    #[must_use]
    pub fn empty() -> Self {
        Self::default()
    }
}
