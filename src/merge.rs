//! Merging shard outputs into one aggregate result.
//!
//! [`merge_outputs`] is a pure function of its input sequence:
//!
//! - `searched_files` and `matched_files` are summed, saturating at `u64::MAX`;
//! - `duration_seconds` is the slowest shard's own duration (the driver later
//!   replaces it with the job's wall-clock time);
//! - `npis` is taken from the first shard that reported a non-empty list;
//! - `results` is the concatenation of every shard's records, in input order.
//!
//! Records are neither sorted, deduplicated, nor validated.

use crate::error::{FanoutError, Result};
use crate::models::{SearchOutput, SearchParams, ShardOutput};

/// Combine shard outputs, given in shard-index order.
pub fn merge_outputs(outputs: &[SearchOutput]) -> SearchOutput {
    let mut params = SearchParams::default();
    let mut results = Vec::with_capacity(outputs.iter().map(|o| o.results.len()).sum());

    for out in outputs {
        if params.npis.is_empty() {
            params.npis = out.search_params.npis.clone();
        }
        params.searched_files = params
            .searched_files
            .saturating_add(out.search_params.searched_files);
        params.matched_files = params
            .matched_files
            .saturating_add(out.search_params.matched_files);
        if out.search_params.duration_seconds > params.duration_seconds {
            params.duration_seconds = out.search_params.duration_seconds;
        }
        results.extend(out.results.iter().cloned());
    }

    SearchOutput {
        search_params: params,
        results,
    }
}

/// Check that every shard searched the same targets as the first shard that
/// reported any. Shards with an empty list are skipped.
pub fn verify_targets(outputs: &[ShardOutput]) -> Result<()> {
    let mut reference: Option<&ShardOutput> = None;
    for out in outputs {
        if out.output.search_params.npis.is_empty() {
            continue;
        }
        match reference {
            None => reference = Some(out),
            Some(first) if first.output.search_params.npis != out.output.search_params.npis => {
                return Err(FanoutError::TargetMismatch {
                    index: out.index,
                    first: first.index,
                });
            }
            Some(_) => {}
        }
    }
    Ok(())
}
