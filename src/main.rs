//! # fanout CLI
//!
//! The `fanout` binary runs sharded rate searches: it splits a URL list into
//! shards, runs the search for each shard in parallel, and merges the results.
//!
//! ## Usage
//!
//! ```bash
//! fanout --config ./config/fanout.toml <command>
//! ```
//!
//! ## Commands
//!
//! | Command | Description |
//! |---------|-------------|
//! | `fanout run` | Shard, dispatch, merge, and write the result file |
//! | `fanout plan` | Show how a URL list would be sharded |
//! | `fanout merge` | Merge previously collected shard outputs |
//!
//! ## Examples
//!
//! ```bash
//! # Search 10 shards with 4 workers each
//! fanout run --target 1770671182 --urls-file urls.txt --shards 10 --workers 4
//!
//! # Keep going when a shard fails, print the result to stdout
//! fanout run --target 1770671182 --urls-file urls.txt --best-effort -o - | jq .
//!
//! # Preview the shard layout
//! fanout plan --urls-file urls.txt --shards 10
//! ```

use anyhow::bail;
use clap::{Parser, Subcommand};
use std::path::PathBuf;
use std::sync::Arc;

use fanout::config;
use fanout::dispatch::DispatchOptions;
use fanout::executor::create_executor;
use fanout::job;
use fanout::models::JobParams;
use fanout::output::default_output_path;
use fanout::progress::{DispatchReporter, ProgressMode};

const DEFAULT_CONFIG: &str = "./config/fanout.toml";

/// fanout: scatter-gather runner for sharded rate searches.
///
/// Settings come from an optional TOML file; command-line flags override
/// them. See `config/fanout.example.toml` for every option.
#[derive(Parser)]
#[command(
    name = "fanout",
    about = "Scatter-gather runner for sharded rate searches",
    version,
    long_about = "fanout splits a list of machine-readable-file URLs into shards, runs the \
    search for every shard in parallel (as local processes or against an HTTP worker), and \
    merges the per-shard outputs into a single JSON result file."
)]
struct Cli {
    /// Path to configuration file (TOML).
    ///
    /// Defaults to `./config/fanout.toml`; built-in defaults are used when
    /// that file does not exist.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Progress output on stderr: `off`, `human`, or `json`.
    ///
    /// Defaults to `human` when stderr is a terminal, otherwise `off`.
    #[arg(long, global = true)]
    progress: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

/// Top-level CLI commands.
#[derive(Subcommand)]
enum Commands {
    /// Run a sharded search job.
    ///
    /// Loads the URL file, splits it round-robin into shards, runs every
    /// shard in parallel, merges the outputs, and writes the result file.
    /// Any failed shard fails the job unless `--best-effort` is given.
    Run {
        /// Target identifier passed to every shard (an NPI, or a comma-separated list).
        #[arg(long)]
        target: String,

        /// File with one URL per line. Blank lines and `#` comments are ignored.
        #[arg(long)]
        urls_file: PathBuf,

        /// Number of shards (capped at the number of URLs).
        #[arg(long)]
        shards: Option<usize>,

        /// Concurrent workers inside each shard's search.
        #[arg(long)]
        workers: Option<usize>,

        /// Result file. `-` writes to stdout. Defaults to a timestamped
        /// file in `job.output_dir`.
        #[arg(short, long)]
        output: Option<PathBuf>,

        /// Merge whatever succeeded; fail only if every shard failed.
        #[arg(long)]
        best_effort: bool,

        /// Retries per shard before it counts as failed.
        #[arg(long)]
        max_retries: Option<u32>,

        /// Maximum shards in flight (0 = all at once).
        #[arg(long)]
        max_concurrency: Option<usize>,

        /// Print the shard plan without running anything.
        #[arg(long)]
        dry_run: bool,
    },

    /// Show how a URL file would be sharded.
    Plan {
        #[arg(long)]
        urls_file: PathBuf,

        #[arg(long)]
        shards: Option<usize>,
    },

    /// Merge shard output files into one result file.
    ///
    /// Files are merged in the order given.
    Merge {
        /// Shard output files (SearchOutput JSON).
        #[arg(required = true)]
        files: Vec<PathBuf>,

        /// Result file. `-` writes to stdout.
        #[arg(short, long)]
        output: Option<PathBuf>,
    },
}

#[tokio::main]
async fn main() -> anyhow::Result<()> {
    let cli = Cli::parse();

    let cfg = match &cli.config {
        Some(path) => config::load_config(path, true)?,
        None => config::load_config(&PathBuf::from(DEFAULT_CONFIG), false)?,
    };

    let mode = match cli.progress.as_deref() {
        Some(s) => match ProgressMode::parse(s) {
            Some(mode) => mode,
            None => bail!("Unknown progress mode: '{}'. Must be off, human, or json.", s),
        },
        None => ProgressMode::default_for_tty(),
    };

    match cli.command {
        Commands::Run {
            target,
            urls_file,
            shards,
            workers,
            output,
            best_effort,
            max_retries,
            max_concurrency,
            dry_run,
        } => {
            let shards = shards.unwrap_or(cfg.job.shards);
            if dry_run {
                job::run_plan(&urls_file, shards)?;
                return Ok(());
            }

            let workers = workers.unwrap_or(cfg.job.workers);
            if workers == 0 {
                bail!("--workers must be >= 1");
            }

            let params = JobParams {
                target,
                urls_file,
                shards,
                workers,
                output: output.unwrap_or_else(|| default_output_path(&cfg.job.output_dir)),
            };

            let mut options = DispatchOptions::from(&cfg.dispatch);
            options.best_effort |= best_effort;
            if let Some(n) = max_retries {
                options.max_retries = n;
            }
            if let Some(n) = max_concurrency {
                options.max_concurrency = n;
            }

            let executor = create_executor(&cfg.executor)?;
            let reporter: Arc<dyn DispatchReporter> = Arc::from(mode.reporter());
            job::run_search(&params, &options, cfg.job.verify_targets, executor, reporter).await?;
        }
        Commands::Plan { urls_file, shards } => {
            job::run_plan(&urls_file, shards.unwrap_or(cfg.job.shards))?;
        }
        Commands::Merge { files, output } => {
            let output = output.unwrap_or_else(|| default_output_path(&cfg.job.output_dir));
            job::run_merge(&files, &output)?;
        }
    }

    Ok(())
}
