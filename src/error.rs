//! Error types for the orchestration core.
//!
//! Driver-level code uses `anyhow` and attaches context as it goes. The
//! loader, sharder, dispatcher and merger return [`FanoutError`] so callers
//! (and tests) can tell a bad argument from a failed shard.

use std::io;
use std::path::PathBuf;

use thiserror::Error;

use crate::models::{FailureKind, ShardFailure};

#[derive(Error, Debug)]
pub enum FanoutError {
    #[error("invalid argument: {0}")]
    InvalidArgument(String),

    #[error("failed to read {}: {source}", path.display())]
    Io {
        path: PathBuf,
        #[source]
        source: io::Error,
    },

    /// A shard execution failed: non-zero exit, transport error, timeout, or
    /// an empty payload.
    #[error("shard {index} failed: {detail}")]
    ShardFailed { index: usize, detail: String },

    #[error("shard {index} returned malformed output: {detail}")]
    MalformedOutput { index: usize, detail: String },

    #[error("shard {index} searched different targets than shard {first}")]
    TargetMismatch { index: usize, first: usize },

    #[error("all {total} shards failed")]
    AllShardsFailed { total: usize },

    #[error("interrupted")]
    Interrupted,
}

pub type Result<T> = std::result::Result<T, FanoutError>;

impl From<ShardFailure> for FanoutError {
    fn from(failure: ShardFailure) -> Self {
        match failure.kind {
            FailureKind::Execution => FanoutError::ShardFailed {
                index: failure.index,
                detail: failure.detail,
            },
            FailureKind::Malformed => FanoutError::MalformedOutput {
                index: failure.index,
                detail: failure.detail,
            },
        }
    }
}

impl FanoutError {
    pub fn invalid_argument<S: Into<String>>(msg: S) -> Self {
        FanoutError::InvalidArgument(msg.into())
    }

    /// Index of the shard this error is about, if any.
    pub fn shard_index(&self) -> Option<usize> {
        match self {
            FanoutError::ShardFailed { index, .. }
            | FanoutError::MalformedOutput { index, .. }
            | FanoutError::TargetMismatch { index, .. } => Some(*index),
            _ => None,
        }
    }
}
