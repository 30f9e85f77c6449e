//! Shard execution backends.
//!
//! The dispatcher only knows the [`ShardExecutor`] trait: hand it one shard,
//! get back the raw bytes of a `SearchOutput` JSON document or an error.
//! How the search actually runs is up to the implementation:
//!
//! - **[`ProcessExecutor`]**: runs the search binary as a local child
//!   process in a private scratch directory per shard.
//! - **[`HttpExecutor`]**: POSTs the shard request to a remote compute
//!   endpoint and returns the response body.
//!
//! Implementations must keep shards isolated from each other: no shared
//! working directory, no shared mutable state. Tests substitute an in-memory
//! executor returning canned payloads.
//!
//! # Example
//!
//! ```rust
//! use anyhow::Result;
//! use async_trait::async_trait;
//! use fanout::executor::{ShardExecutor, ShardRequest};
//! use fanout::progress::DispatchReporter;
//!
//! struct Canned;
//!
//! #[async_trait]
//! impl ShardExecutor for Canned {
//!     fn name(&self) -> &str { "canned" }
//!
//!     async fn execute(
//!         &self,
//!         request: &ShardRequest,
//!         _reporter: &dyn DispatchReporter,
//!     ) -> Result<Vec<u8>> {
//!         let body = format!(
//!             r#"{{"search_params":{{"searched_files":{}}},"results":[]}}"#,
//!             request.items.len()
//!         );
//!         Ok(body.into_bytes())
//!     }
//! }
//! ```

use anyhow::{anyhow, bail, Context, Result};
use async_trait::async_trait;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};
use std::process::Stdio;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::io::{AsyncBufReadExt, BufReader};
use tokio::process::Command;
use uuid::Uuid;

use crate::config::ExecutorConfig;
use crate::models::{shard_label, JobParams, Shard, WorkItem};
use crate::progress::{DispatchEvent, DispatchReporter};

/// The request sent for one shard. This is also the JSON body of the HTTP
/// backend.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ShardRequest {
    pub shard_index: usize,
    pub items: Vec<WorkItem>,
    pub target_id: String,
    pub worker_concurrency: usize,
}

impl ShardRequest {
    pub fn new(shard: &Shard, params: &JobParams) -> Self {
        Self {
            shard_index: shard.index,
            items: shard.items.clone(),
            target_id: params.target.clone(),
            worker_concurrency: params.workers,
        }
    }
}

/// Executes one shard of a search job.
///
/// # Lifecycle
///
/// 1. [`execute`](ShardExecutor::execute) is called once per shard attempt,
///    concurrently across shards.
/// 2. [`teardown`](ShardExecutor::teardown) is called once after the job,
///    whether it succeeded or not. Teardown errors are reported as warnings
///    and never replace the job's own result.
#[async_trait]
pub trait ShardExecutor: Send + Sync {
    /// Backend name for diagnostics (e.g. `"process"`, `"http"`).
    fn name(&self) -> &str;

    /// Run the search for one shard and return the raw output bytes.
    async fn execute(
        &self,
        request: &ShardRequest,
        reporter: &dyn DispatchReporter,
    ) -> Result<Vec<u8>>;

    /// Release job-level resources held by this backend.
    async fn teardown(&self) -> Result<()> {
        Ok(())
    }
}

/// Build the executor selected by `config.backend`.
pub fn create_executor(config: &ExecutorConfig) -> Result<Arc<dyn ShardExecutor>> {
    match config.backend.as_str() {
        "process" => Ok(Arc::new(ProcessExecutor::new(config))),
        "http" => Ok(Arc::new(HttpExecutor::new(config)?)),
        other => bail!("Unknown executor backend: {}", other),
    }
}

// ============ Process Executor ============

/// Runs the search binary as a child process.
///
/// Each shard attempt gets `<scratch_root>/shard-NNN-<uuid>/` containing
/// `urls.txt` (the shard's items) and, after the run, `results.json`. The
/// process's stderr is forwarded line by line as [`DispatchEvent::ShardLog`];
/// stdout is drained and discarded.
pub struct ProcessExecutor {
    program: String,
    args: Vec<String>,
    timeout: Duration,
    scratch_root: PathBuf,
    closed: AtomicBool,
}

impl ProcessExecutor {
    pub fn new(config: &ExecutorConfig) -> Self {
        let base = config
            .scratch_dir
            .clone()
            .unwrap_or_else(std::env::temp_dir);
        Self {
            program: config.process.program.clone(),
            args: config.process.args.clone(),
            timeout: Duration::from_secs(config.timeout_secs),
            scratch_root: base.join(format!("fanout-{}", Uuid::new_v4().simple())),
            closed: AtomicBool::new(false),
        }
    }

    async fn remove_scratch_root(&self) -> Result<()> {
        match tokio::fs::remove_dir_all(&self.scratch_root).await {
            Ok(()) => Ok(()),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(()),
            Err(e) => Err(e)
                .with_context(|| format!("removing {}", self.scratch_root.display())),
        }
    }

    /// Directory holding every shard's scratch space for this job.
    pub fn scratch_root(&self) -> &Path {
        &self.scratch_root
    }

    async fn run_in(
        &self,
        work_dir: &Path,
        request: &ShardRequest,
        reporter: &dyn DispatchReporter,
    ) -> Result<Vec<u8>> {
        let urls_file = work_dir.join("urls.txt");
        let output_file = work_dir.join("results.json");

        let mut url_data = request.items.join("\n");
        url_data.push('\n');
        tokio::fs::write(&urls_file, url_data)
            .await
            .context("writing urls file")?;

        let args = render_args(&self.args, request, &urls_file, &output_file);
        let mut child = Command::new(&self.program)
            .args(&args)
            .current_dir(work_dir)
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .kill_on_drop(true)
            .spawn()
            .with_context(|| format!("spawning {}", self.program))?;

        let stderr = child.stderr.take();
        let stdout = child.stdout.take();
        let shard = request.shard_index;

        let forward_stderr = async {
            if let Some(stderr) = stderr {
                // Raw lines: log encoding must never close the pipe early.
                let mut lines = BufReader::new(stderr).split(b'\n');
                while let Ok(Some(raw)) = lines.next_segment().await {
                    let line = String::from_utf8_lossy(&raw).trim_end_matches('\r').to_string();
                    reporter.report(DispatchEvent::ShardLog { shard, line });
                }
            }
        };
        let drain_stdout = async {
            if let Some(mut stdout) = stdout {
                let _ = tokio::io::copy(&mut stdout, &mut tokio::io::sink()).await;
            }
        };
        let run = async {
            let (_, _, status) = tokio::join!(forward_stderr, drain_stdout, child.wait());
            status
        };

        let status = tokio::time::timeout(self.timeout, run)
            .await
            .map_err(|_| anyhow!("timed out after {}s", self.timeout.as_secs()))?
            .context("waiting for search")?;

        if !status.success() {
            match status.code() {
                Some(code) => bail!("exit code {}", code),
                None => bail!("search process terminated by signal"),
            }
        }

        let data = tokio::fs::read(&output_file)
            .await
            .context("reading results file")?;
        if data.is_empty() {
            bail!("empty output");
        }
        Ok(data)
    }
}

#[async_trait]
impl ShardExecutor for ProcessExecutor {
    fn name(&self) -> &str {
        "process"
    }

    async fn execute(
        &self,
        request: &ShardRequest,
        reporter: &dyn DispatchReporter,
    ) -> Result<Vec<u8>> {
        if self.closed.load(Ordering::SeqCst) {
            bail!("executor already torn down");
        }
        let work_dir = self.scratch_root.join(format!(
            "{}-{}",
            shard_label(request.shard_index),
            Uuid::new_v4().simple()
        ));
        tokio::fs::create_dir_all(&work_dir)
            .await
            .with_context(|| format!("creating {}", work_dir.display()))?;

        let result = self.run_in(&work_dir, request, reporter).await;

        if let Err(e) = tokio::fs::remove_dir_all(&work_dir).await {
            reporter.report(DispatchEvent::Warning {
                message: format!("could not remove {}: {}", work_dir.display(), e),
            });
        }
        result
    }

    async fn teardown(&self) -> Result<()> {
        self.closed.store(true, Ordering::SeqCst);
        self.remove_scratch_root().await?;

        // Aborted shards may still have a blocking-pool create/write in
        // flight that recreates a shard directory; sweep once more.
        tokio::time::sleep(TEARDOWN_SETTLE).await;
        self.remove_scratch_root().await
    }
}

const TEARDOWN_SETTLE: Duration = Duration::from_millis(100);

/// Substitute per-shard values into the argument template.
fn render_args(
    template: &[String],
    request: &ShardRequest,
    urls_file: &Path,
    output_file: &Path,
) -> Vec<String> {
    let urls_file = urls_file.display().to_string();
    let output_file = output_file.display().to_string();
    let workers = request.worker_concurrency.to_string();
    let shard = request.shard_index.to_string();
    template
        .iter()
        .map(|arg| {
            arg.replace("{target}", &request.target_id)
                .replace("{urls_file}", &urls_file)
                .replace("{workers}", &workers)
                .replace("{output}", &output_file)
                .replace("{shard}", &shard)
        })
        .collect()
}

// ============ HTTP Executor ============

/// Sends each shard to a remote search endpoint.
///
/// The request body is a JSON [`ShardRequest`]. A 2xx response body is the
/// shard's `SearchOutput`; any other status is a failure carrying the status
/// and response text.
pub struct HttpExecutor {
    client: reqwest::Client,
    url: String,
}

impl HttpExecutor {
    pub fn new(config: &ExecutorConfig) -> Result<Self> {
        let url = config
            .http
            .as_ref()
            .map(|h| h.url.clone())
            .ok_or_else(|| anyhow!("executor.http.url required for http backend"))?;
        let client = reqwest::Client::builder()
            .timeout(Duration::from_secs(config.timeout_secs))
            .build()?;
        Ok(Self { client, url })
    }
}

#[async_trait]
impl ShardExecutor for HttpExecutor {
    fn name(&self) -> &str {
        "http"
    }

    async fn execute(
        &self,
        request: &ShardRequest,
        _reporter: &dyn DispatchReporter,
    ) -> Result<Vec<u8>> {
        let response = self
            .client
            .post(&self.url)
            .json(request)
            .send()
            .await
            .with_context(|| format!("sending request to {}", self.url))?;

        let status = response.status();
        if !status.is_success() {
            let body_text = response.text().await.unwrap_or_default();
            bail!("HTTP {}: {}", status, body_text.trim());
        }

        let body = response.bytes().await.context("reading response body")?;
        if body.is_empty() {
            bail!("empty output");
        }
        Ok(body.to_vec())
    }
}
