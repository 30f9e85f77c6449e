//! Core data models used throughout fanout.
//!
//! These types represent the work items, shards, job parameters, and search
//! outputs that flow through the load → shard → dispatch → merge pipeline.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;

/// A single unit of work: one MRF URL handed to the search binary.
pub type WorkItem = String;

/// One opaque result entry emitted by the search binary.
///
/// The schema is owned by the search binary; fanout passes records through
/// without inspecting them.
pub type MatchRecord = serde_json::Value;

/// A disjoint subset of the work items, executed as one unit.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Shard {
    /// 0-based position of this shard in the job's shard list.
    pub index: usize,
    pub items: Vec<WorkItem>,
}

impl Shard {
    /// Short label used in diagnostics, e.g. `shard-007`.
    pub fn label(&self) -> String {
        shard_label(self.index)
    }

    pub fn len(&self) -> usize {
        self.items.len()
    }

    pub fn is_empty(&self) -> bool {
        self.items.is_empty()
    }
}

pub fn shard_label(index: usize) -> String {
    format!("shard-{:03}", index)
}

/// Immutable parameters for one job run, supplied once at job start.
#[derive(Debug, Clone)]
pub struct JobParams {
    /// Search subject passed to every shard (an NPI, or a comma-separated list).
    pub target: String,
    pub urls_file: PathBuf,
    /// Requested shard count. The effective count may be lower.
    pub shards: usize,
    /// Worker concurrency inside each shard's search process.
    pub workers: usize,
    /// Artifact destination. `-` writes to stdout.
    pub output: PathBuf,
}

/// Summary block of a [`SearchOutput`].
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchParams {
    /// Target identifiers as emitted by the search binary (numbers or strings).
    #[serde(default)]
    pub npis: Vec<serde_json::Value>,
    #[serde(default)]
    pub searched_files: u64,
    #[serde(default)]
    pub matched_files: u64,
    #[serde(default)]
    pub duration_seconds: f64,
}

/// The JSON document produced by one shard, and the shape of the final
/// merged artifact.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct SearchOutput {
    pub search_params: SearchParams,
    #[serde(default)]
    pub results: Vec<MatchRecord>,
}

impl SearchOutput {
    /// Parse a raw shard payload.
    pub fn from_slice(bytes: &[u8]) -> serde_json::Result<Self> {
        serde_json::from_slice(bytes)
    }
}

/// The parsed output of one successful shard.
#[derive(Debug, Clone, PartialEq)]
pub struct ShardOutput {
    pub index: usize,
    pub output: SearchOutput,
}

/// Why a shard produced no usable payload.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FailureKind {
    /// The executor reported an error (exit status, transport, timeout, empty payload).
    Execution,
    /// The payload was not a valid `SearchOutput` document.
    Malformed,
}

/// A shard that did not produce a usable payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ShardFailure {
    pub index: usize,
    pub kind: FailureKind,
    pub detail: String,
}

/// What one shard produced: a parsed payload or a failure.
pub type ShardResult = std::result::Result<ShardOutput, ShardFailure>;
