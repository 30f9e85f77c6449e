//! Job orchestration: load → shard → dispatch → merge → persist.
//!
//! [`run_job`] wires the pipeline stages together for one run. It owns the
//! job's wall clock, replaces the merged `duration_seconds` with the real
//! end-to-end time, writes the artifact, and always calls the executor's
//! teardown, on success, failure, and Ctrl-C alike. Teardown problems are
//! reported as warnings and never replace the job's own result.
//!
//! The CLI-facing helpers ([`run_search`], [`run_plan`], [`run_merge`])
//! print human summaries to stdout; everything else goes through the
//! [`DispatchReporter`].

use anyhow::{bail, Context, Result};
use std::future::Future;
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::dispatch::{dispatch_all, DispatchOptions};
use crate::error::FanoutError;
use crate::executor::ShardExecutor;
use crate::loader::load_urls;
use crate::merge::{merge_outputs, verify_targets};
use crate::models::{JobParams, SearchOutput, Shard, ShardFailure};
use crate::output::{is_stdout, write_output};
use crate::progress::{format_number, DispatchEvent, DispatchReporter};
use crate::shard::shard_items;

/// What a completed job produced.
#[derive(Debug, Clone)]
pub struct JobSummary {
    pub items: usize,
    pub shards: usize,
    pub searched_files: u64,
    pub matched_files: u64,
    /// Number of match records in the artifact.
    pub records: usize,
    pub elapsed: Duration,
    pub output: PathBuf,
    /// Shards that failed but were tolerated (best-effort mode only).
    pub failures: Vec<ShardFailure>,
}

/// Load the URL file and split it into shards.
///
/// An input with no work items is an error.
pub fn plan_shards(urls_file: &Path, shards: usize) -> Result<(usize, Vec<Shard>)> {
    let items = load_urls(urls_file)?;
    if items.is_empty() {
        bail!("no URLs found in {}", urls_file.display());
    }
    let planned = shard_items(&items, shards)?;
    Ok((items.len(), planned))
}

/// Run one job end to end, stopping early on Ctrl-C.
///
/// Teardown runs exactly once whatever the outcome.
pub async fn run_job(
    params: &JobParams,
    options: &DispatchOptions,
    verify: bool,
    executor: Arc<dyn ShardExecutor>,
    reporter: Arc<dyn DispatchReporter>,
) -> Result<JobSummary> {
    run_job_until(params, options, verify, executor, reporter, ctrl_c()).await
}

/// Like [`run_job`], but dispatch is abandoned with
/// [`FanoutError::Interrupted`] as soon as `shutdown` completes. In-flight
/// shards are aborted before teardown runs.
pub async fn run_job_until<F>(
    params: &JobParams,
    options: &DispatchOptions,
    verify: bool,
    executor: Arc<dyn ShardExecutor>,
    reporter: Arc<dyn DispatchReporter>,
    shutdown: F,
) -> Result<JobSummary>
where
    F: Future<Output = ()>,
{
    let result = execute(
        params,
        options,
        verify,
        executor.clone(),
        reporter.clone(),
        shutdown,
    )
    .await;

    if let Err(e) = executor.teardown().await {
        reporter.report(DispatchEvent::Warning {
            message: format!("teardown of {} executor failed: {:#}", executor.name(), e),
        });
    }

    result
}

/// Resolves on Ctrl-C. Never resolves if the handler cannot be installed.
async fn ctrl_c() {
    if tokio::signal::ctrl_c().await.is_err() {
        std::future::pending::<()>().await;
    }
}

async fn execute<F>(
    params: &JobParams,
    options: &DispatchOptions,
    verify: bool,
    executor: Arc<dyn ShardExecutor>,
    reporter: Arc<dyn DispatchReporter>,
    shutdown: F,
) -> Result<JobSummary>
where
    F: Future<Output = ()>,
{
    let (items, shards) = plan_shards(&params.urls_file, params.shards)?;

    reporter.report(DispatchEvent::JobStarted {
        target: params.target.clone(),
        items,
        shards: shards.len(),
        workers: params.workers,
    });

    let start = Instant::now();
    let report = tokio::select! {
        report = dispatch_all(executor, &shards, params, options, reporter.clone()) => report?,
        _ = shutdown => {
            reporter.report(DispatchEvent::Warning {
                message: "interrupted, aborting in-flight shards".to_string(),
            });
            return Err(FanoutError::Interrupted.into());
        }
    };
    let elapsed = start.elapsed();

    if verify {
        verify_targets(&report.outputs)?;
    }

    let mut merged = merge_outputs(&report.search_outputs());
    merged.search_params.duration_seconds = elapsed.as_secs_f64();

    write_output(&params.output, &merged)?;

    reporter.report(DispatchEvent::JobFinished {
        succeeded: report.outputs.len(),
        failed: report.failures.len(),
        elapsed_secs: elapsed.as_secs_f64(),
    });

    Ok(JobSummary {
        items,
        shards: shards.len(),
        searched_files: merged.search_params.searched_files,
        matched_files: merged.search_params.matched_files,
        records: merged.results.len(),
        elapsed,
        output: params.output.clone(),
        failures: report.failures,
    })
}

/// `fanout run`: run the job and print the summary.
///
/// When the artifact goes to stdout the summary is printed to stderr
/// instead, so the artifact stays parseable.
pub async fn run_search(
    params: &JobParams,
    options: &DispatchOptions,
    verify: bool,
    executor: Arc<dyn ShardExecutor>,
    reporter: Arc<dyn DispatchReporter>,
) -> Result<()> {
    let summary = run_job(params, options, verify, executor, reporter).await?;

    let lines = summary_lines(&summary);
    if is_stdout(&summary.output) {
        for line in lines {
            eprintln!("{}", line);
        }
    } else {
        for line in lines {
            println!("{}", line);
        }
    }
    Ok(())
}

fn summary_lines(summary: &JobSummary) -> Vec<String> {
    let mut lines = Vec::new();
    if !summary.failures.is_empty() {
        lines.push(format!(
            "Warning: {}/{} shards failed",
            summary.failures.len(),
            summary.shards
        ));
        for failure in &summary.failures {
            lines.push(format!("  shard {}: {}", failure.index, failure.detail));
        }
    }
    lines.push(format!(
        "Search complete: {} files searched, {} matched, {} rates found in {:.1}s",
        format_number(summary.searched_files),
        format_number(summary.matched_files),
        format_number(summary.records as u64),
        summary.elapsed.as_secs_f64()
    ));
    if !is_stdout(&summary.output) {
        lines.push(format!("Results saved to {}", summary.output.display()));
    }
    lines
}

/// `fanout plan` and `fanout run --dry-run`: print the shard layout.
pub fn run_plan(urls_file: &Path, shards: usize) -> Result<()> {
    let (items, planned) = plan_shards(urls_file, shards)?;

    println!(
        "{} URLs → {} shards (requested {})",
        format_number(items as u64),
        planned.len(),
        shards
    );
    for shard in &planned {
        let first = shard.items.first().map(String::as_str).unwrap_or("");
        println!("  {}  {:>6} URLs  {}", shard.label(), shard.len(), first);
    }
    Ok(())
}

/// Merge previously collected shard output files into one artifact.
///
/// Inputs are merged in the order given.
pub fn merge_files(inputs: &[PathBuf]) -> Result<SearchOutput> {
    if inputs.is_empty() {
        bail!("no input files given");
    }

    let mut outputs = Vec::with_capacity(inputs.len());
    for path in inputs {
        let bytes = std::fs::read(path)
            .with_context(|| format!("Failed to read shard output: {}", path.display()))?;
        let output = SearchOutput::from_slice(&bytes)
            .with_context(|| format!("Malformed shard output: {}", path.display()))?;
        outputs.push(output);
    }
    Ok(merge_outputs(&outputs))
}

/// `fanout merge`: merge files and write the artifact.
pub fn run_merge(inputs: &[PathBuf], output: &Path) -> Result<()> {
    let merged = merge_files(inputs)?;
    write_output(output, &merged)?;

    let line = format!(
        "Merged {} files: {} files searched, {} matched, {} rates",
        inputs.len(),
        format_number(merged.search_params.searched_files),
        format_number(merged.search_params.matched_files),
        format_number(merged.results.len() as u64)
    );
    if is_stdout(output) {
        eprintln!("{}", line);
    } else {
        println!("{}", line);
        println!("Results saved to {}", output.display());
    }
    Ok(())
}
