//! # fanout
//!
//! Scatter-gather orchestration for price-transparency rate searches.
//!
//! A job takes a list of machine-readable-file URLs, splits it into shards,
//! runs an external search for every shard in parallel, and merges the
//! per-shard JSON outputs into one aggregate result file.
//!
//! ## Architecture
//!
//! ```text
//! ┌──────────┐   ┌──────────┐   ┌─────────────────────────┐
//! │  Loader  │──▶│ Sharder  │──▶│       Dispatcher        │
//! │ urls.txt │   │ round-   │   │  shard 0 ─▶ Executor ─┐ │
//! └──────────┘   │ robin    │   │  shard 1 ─▶ Executor ─┤ │
//!                └──────────┘   │  shard N ─▶ Executor ─┘ │
//!                               └────────────┬────────────┘
//!                                            ▼  (barrier)
//!                               ┌──────────┐   ┌──────────┐
//!                               │  Merger  │──▶│  Output  │
//!                               └──────────┘   └──────────┘
//! ```
//!
//! ## Quick Start
//!
//! ```bash
//! fanout plan --urls-file urls.txt --shards 10
//! fanout run --target 1770671182 --urls-file urls.txt --shards 10 -o results.json
//! fanout merge shard-*.json -o merged.json
//! ```
//!
//! ## Modules
//!
//! | Module | Purpose |
//! |--------|---------|
//! | [`config`] | TOML configuration parsing |
//! | [`models`] | Core data types |
//! | [`error`] | Typed errors at the library seams |
//! | [`loader`] | URL list loading |
//! | [`shard`] | Round-robin sharding |
//! | [`executor`] | Shard executor trait + process/HTTP backends |
//! | [`dispatch`] | Parallel dispatch with a single join barrier |
//! | [`merge`] | Aggregating shard outputs |
//! | [`output`] | Writing the result artifact |
//! | [`progress`] | Progress events on stderr |
//! | [`job`] | End-to-end job orchestration |

pub mod config;
pub mod dispatch;
pub mod error;
pub mod executor;
pub mod job;
pub mod loader;
pub mod merge;
pub mod models;
pub mod output;
pub mod progress;
pub mod shard;
