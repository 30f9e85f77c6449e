//! Round-robin sharding of work items.
//!
//! Item `i` goes to shard `i % count`. Shards that end up empty are dropped,
//! so asking for more shards than there are items yields one singleton shard
//! per item. Returned shards are re-indexed contiguously from 0.

use crate::error::{FanoutError, Result};
use crate::models::{Shard, WorkItem};

/// Partition `items` into at most `count` non-empty shards.
pub fn shard_items(items: &[WorkItem], count: usize) -> Result<Vec<Shard>> {
    if count < 1 {
        return Err(FanoutError::invalid_argument(format!(
            "shard count must be >= 1, got {}",
            count
        )));
    }

    let mut buckets: Vec<Vec<WorkItem>> = vec![Vec::new(); count.min(items.len())];
    let width = buckets.len();
    for (i, item) in items.iter().enumerate() {
        buckets[i % width].push(item.clone());
    }

    Ok(buckets
        .into_iter()
        .filter(|b| !b.is_empty())
        .enumerate()
        .map(|(index, items)| Shard { index, items })
        .collect())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn items(names: &[&str]) -> Vec<WorkItem> {
        names.iter().map(|s| s.to_string()).collect()
    }

    fn contents(shards: &[Shard]) -> Vec<Vec<&str>> {
        shards
            .iter()
            .map(|s| s.items.iter().map(String::as_str).collect())
            .collect()
    }

    #[test]
    fn test_round_robin_five_into_three() {
        let shards = shard_items(&items(&["a", "b", "c", "d", "e"]), 3).unwrap();
        assert_eq!(
            contents(&shards),
            vec![vec!["a", "d"], vec!["b", "e"], vec!["c"]]
        );
    }

    #[test]
    fn test_seven_into_three_by_position() {
        let input = items(&["u0", "u1", "u2", "u3", "u4", "u5", "u6"]);
        let shards = shard_items(&input, 3).unwrap();
        assert_eq!(
            contents(&shards),
            vec![vec!["u0", "u3", "u6"], vec!["u1", "u4"], vec!["u2", "u5"]]
        );
        for (i, s) in shards.iter().enumerate() {
            assert_eq!(s.index, i);
        }
    }

    #[test]
    fn test_more_shards_than_items() {
        let shards = shard_items(&items(&["x", "y"]), 5).unwrap();
        assert_eq!(contents(&shards), vec![vec!["x"], vec!["y"]]);
    }

    #[test]
    fn test_single_shard_keeps_everything() {
        let input = items(&["a", "b", "c", "d", "e"]);
        let shards = shard_items(&input, 1).unwrap();
        assert_eq!(shards.len(), 1);
        assert_eq!(shards[0].items, input);
    }

    #[test]
    fn test_empty_input_yields_no_shards() {
        assert!(shard_items(&[], 3).unwrap().is_empty());
    }

    #[test]
    fn test_zero_count_rejected() {
        let err = shard_items(&items(&["a"]), 0).unwrap_err();
        assert!(matches!(err, FanoutError::InvalidArgument(_)));
    }

    #[test]
    fn test_partition_property() {
        // Includes duplicates; every position must land in exactly one shard.
        let input: Vec<WorkItem> = (0..103).map(|i| format!("url-{}", i % 17)).collect();
        for count in 1..=40 {
            let shards = shard_items(&input, count).unwrap();
            assert!(shards.len() <= count);
            assert_eq!(shards.len(), count.min(input.len()));
            assert!(shards.iter().all(|s| !s.is_empty()));

            let mut flat: Vec<WorkItem> = shards.iter().flat_map(|s| s.items.clone()).collect();
            let mut expected = input.clone();
            flat.sort();
            expected.sort();
            assert_eq!(flat, expected, "multiset mismatch for count={}", count);

            let max = shards.iter().map(Shard::len).max().unwrap();
            let min = shards.iter().map(Shard::len).min().unwrap();
            assert!(max - min <= 1, "unbalanced shards for count={}", count);
        }
    }

    #[test]
    fn test_deterministic() {
        let input: Vec<WorkItem> = (0..50).map(|i| format!("u{}", i)).collect();
        assert_eq!(
            shard_items(&input, 7).unwrap(),
            shard_items(&input, 7).unwrap()
        );
    }
}
