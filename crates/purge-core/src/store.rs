//! Store seams
//!
//! The engine talks to the outside world through two traits:
//! - [`BatchWriter`]: the store's batch-write primitive
//! - [`KeySource`]: paginated key discovery feeding the engine
//!
//! Both are shared read-only across workers, so implementations must be
//! `Send + Sync` and stateless per call.

use crate::error::StoreError;
use crate::types::{AttributeValue, DeleteRequest};
use async_trait::async_trait;
use futures::stream::{self, Stream, TryStreamExt};
use std::collections::HashMap;
use std::pin::pin;

/// Most requests a batch-write call accepts
pub const MAX_BATCH_SIZE: usize = 25;

/// What a batch-write call reports back
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct BatchWriteOutput {
    /// Requests the store did not apply, keyed by table
    pub unprocessed: HashMap<String, Vec<DeleteRequest>>,
}

impl BatchWriteOutput {
    /// Everything applied
    #[inline]
    #[must_use]
    pub fn applied() -> Self {
        Self::default()
    }

    /// Some requests left unapplied on one table
    #[must_use]
    pub fn with_unprocessed(table: impl Into<String>, requests: Vec<DeleteRequest>) -> Self {
        let mut unprocessed = HashMap::new();
        if !requests.is_empty() {
            unprocessed.insert(table.into(), requests);
        }
        Self { unprocessed }
    }

    /// Remove and return the leftovers for `table`
    #[inline]
    pub fn take_unprocessed(&mut self, table: &str) -> Vec<DeleteRequest> {
        self.unprocessed.remove(table).unwrap_or_default()
    }

    /// Total leftovers across tables
    #[inline]
    #[must_use]
    pub fn unprocessed_count(&self) -> usize {
        self.unprocessed.values().map(Vec::len).sum()
    }
}

/// A store's batch-write primitive
///
/// # Errors
/// - [`StoreError::ThroughputExceeded`]: nothing was applied, retry later
/// - anything else: the call itself is broken
#[cfg_attr(test, mockall::automock)]
#[async_trait]
pub trait BatchWriter: Send + Sync {
    /// Delete up to [`MAX_BATCH_SIZE`] items in one round trip
    async fn batch_delete(
        &self,
        table: &str,
        requests: &[DeleteRequest],
    ) -> Result<BatchWriteOutput, StoreError>;
}

/// Which keys a [`KeySource`] should produce
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum KeySelector {
    /// Exact match on one attribute (query)
    Exact {
        attribute: String,
        value: AttributeValue,
    },
    /// String prefix match on one attribute (scan)
    Prefix { attribute: String, prefix: String },
}

impl KeySelector {
    /// Exact-match selector
    pub fn exact(attribute: impl Into<String>, value: impl Into<AttributeValue>) -> Self {
        Self::Exact {
            attribute: attribute.into(),
            value: value.into(),
        }
    }

    /// Prefix-match selector
    pub fn prefix(attribute: impl Into<String>, prefix: impl Into<String>) -> Self {
        Self::Prefix {
            attribute: attribute.into(),
            prefix: prefix.into(),
        }
    }

    /// Whether a key satisfies this selector
    #[must_use]
    pub fn matches(&self, key: &DeleteRequest) -> bool {
        match self {
            Self::Exact { attribute, value } => key.attribute(attribute) == Some(value),
            Self::Prefix { attribute, prefix } => key
                .attribute(attribute)
                .and_then(AttributeValue::as_str)
                .is_some_and(|s| s.starts_with(prefix.as_str())),
        }
    }
}

/// Opaque resume point: the last key of the previous page
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Cursor(pub DeleteRequest);

/// One page of discovered keys
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct KeyPage {
    pub keys: Vec<DeleteRequest>,
    /// `None` once the source is exhausted
    pub next: Option<Cursor>,
}

/// Paginated key discovery
#[async_trait]
pub trait KeySource: Send + Sync {
    /// Fetch the page after `cursor` (or the first page)
    async fn fetch_page(
        &self,
        table: &str,
        selector: &KeySelector,
        cursor: Option<Cursor>,
    ) -> Result<KeyPage, StoreError>;
}

enum PageState {
    Start,
    Next(Cursor),
    Done,
}

/// Stream of key pages, following cursors until the source runs dry
pub fn key_pages<'a>(
    source: &'a dyn KeySource,
    table: &'a str,
    selector: &'a KeySelector,
) -> impl Stream<Item = Result<Vec<DeleteRequest>, StoreError>> + 'a {
    stream::try_unfold(PageState::Start, move |state| async move {
        let cursor = match state {
            PageState::Start => None,
            PageState::Next(cursor) => Some(cursor),
            PageState::Done => return Ok::<_, StoreError>(None),
        };
        let page = source.fetch_page(table, selector, cursor).await?;
        let next = page.next.map_or(PageState::Done, PageState::Next);
        Ok(Some((page.keys, next)))
    })
}

/// Collect every matching key in source order
///
/// # Errors
/// - whatever the source raises
/// - [`StoreError::Pagination`] if more than `max_pages` pages arrive
pub async fn collect_keys(
    source: &dyn KeySource,
    table: &str,
    selector: &KeySelector,
    max_pages: Option<usize>,
) -> Result<Vec<DeleteRequest>, StoreError> {
    let mut pages = pin!(key_pages(source, table, selector));
    let mut keys = Vec::new();
    let mut fetched = 0usize;

    while let Some(page) = pages.try_next().await? {
        fetched += 1;
        if let Some(max_pages) = max_pages {
            if fetched > max_pages {
                return Err(StoreError::Pagination { max_pages });
            }
        }
        tracing::trace!(page = fetched, keys = page.len(), "fetched key page");
        keys.extend(page);
    }

    tracing::debug!(pages = fetched, keys = keys.len(), "key discovery finished");
    Ok(keys)
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Serves `keys` in pages of `page_size`, optionally never ending
    struct PagedSource {
        keys: Vec<DeleteRequest>,
        page_size: usize,
        endless: bool,
    }

    #[async_trait]
    impl KeySource for PagedSource {
        async fn fetch_page(
            &self,
            _table: &str,
            selector: &KeySelector,
            cursor: Option<Cursor>,
        ) -> Result<KeyPage, StoreError> {
            let start = match cursor {
                Some(Cursor(last)) => self.keys.iter().position(|k| *k == last).map_or(0, |i| i + 1),
                None => 0,
            };
            let keys: Vec<_> = self.keys[start..]
                .iter()
                .filter(|k| selector.matches(k))
                .take(self.page_size)
                .cloned()
                .collect();
            let next = if self.endless {
                Some(Cursor(keys.last().unwrap_or(&self.keys[0]).clone()))
            } else if start + keys.len() < self.keys.len() {
                keys.last().cloned().map(Cursor)
            } else {
                None
            };
            Ok(KeyPage { keys, next })
        }
    }

    fn keys(n: usize) -> Vec<DeleteRequest> {
        (0..n)
            .map(|i| DeleteRequest::single("pk", format!("user#{i:03}")))
            .collect()
    }

    #[tokio::test]
    async fn follows_cursors_until_exhausted() {
        let source = PagedSource {
            keys: keys(23),
            page_size: 5,
            endless: false,
        };
        let selector = KeySelector::prefix("pk", "user#");

        let collected = collect_keys(&source, "t", &selector, None).await.unwrap();
        assert_eq!(collected, keys(23));
    }

    #[tokio::test]
    async fn page_guard_stops_runaway_pagination() {
        let source = PagedSource {
            keys: keys(4),
            page_size: 2,
            endless: true,
        };
        let selector = KeySelector::prefix("pk", "user#");

        let err = collect_keys(&source, "t", &selector, Some(3)).await.unwrap_err();
        assert_eq!(err, StoreError::Pagination { max_pages: 3 });
    }

    #[test]
    fn selectors_match_keys() {
        let key = DeleteRequest::composite(("pk", "order#9"), ("sk", 3));
        assert!(KeySelector::exact("pk", "order#9").matches(&key));
        assert!(!KeySelector::exact("pk", "order#1").matches(&key));
        assert!(KeySelector::prefix("pk", "order#").matches(&key));
        assert!(!KeySelector::prefix("sk", "3").matches(&key));
    }

    #[test]
    fn output_takes_only_its_table() {
        let mut output = BatchWriteOutput::with_unprocessed("a", keys(2));
        assert_eq!(output.unprocessed_count(), 2);
        assert!(output.take_unprocessed("b").is_empty());
        assert_eq!(output.take_unprocessed("a").len(), 2);
        assert_eq!(output.unprocessed_count(), 0);
    }
}
