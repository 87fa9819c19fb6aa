//! Splits a working set into store-sized batches.

use crate::types::{Batch, DeleteRequest};

/// Partition `requests` into batches of at most `batch_size`, in order.
///
/// Every request lands in exactly one batch; only the last batch may be
/// short. An empty input yields no batches. A `batch_size` of zero is
/// treated as one.
#[must_use]
pub fn chunk(requests: Vec<DeleteRequest>, batch_size: usize) -> Vec<Batch> {
    let size = batch_size.max(1);
    let mut batches = Vec::with_capacity(requests.len().div_ceil(size));
    let mut remaining = requests.into_iter();

    loop {
        let requests: Vec<_> = remaining.by_ref().take(size).collect();
        if requests.is_empty() {
            break;
        }
        batches.push(Batch::new(batches.len(), requests));
    }

    batches
}

#[cfg(test)]
mod tests {
    use super::*;
    use proptest::prelude::*;

    fn requests(n: usize) -> Vec<DeleteRequest> {
        (0..n).map(|i| DeleteRequest::single("id", i as i64)).collect()
    }

    #[test]
    fn sixty_items_make_three_batches() {
        let batches = chunk(requests(60), 25);
        let sizes: Vec<_> = batches.iter().map(Batch::len).collect();
        assert_eq!(sizes, vec![25, 25, 10]);
        assert_eq!(batches[2].index(), 2);
    }

    #[test]
    fn empty_input_yields_nothing() {
        assert!(chunk(Vec::new(), 25).is_empty());
    }

    #[test]
    fn zero_size_degrades_to_singletons() {
        assert_eq!(chunk(requests(3), 0).len(), 3);
    }

    proptest! {
        #[test]
        fn prop_batches_cover_input_in_order(len in 0usize..400, size in 1usize..40) {
            let input = requests(len);
            let batches = chunk(input.clone(), size);

            prop_assert_eq!(batches.len(), len.div_ceil(size));
            prop_assert!(batches.iter().all(|b| !b.is_empty() && b.len() <= size));
            prop_assert!(batches.iter().rev().skip(1).all(|b| b.len() == size));

            let rejoined: Vec<_> = batches.into_iter().flat_map(Batch::into_requests).collect();
            prop_assert_eq!(rejoined, input);
        }
    }
}
