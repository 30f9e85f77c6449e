//! Job progress and diagnostic reporting.
//!
//! Every observable step of a job (shards starting, search-binary log lines,
//! retries, failures, teardown warnings) is emitted as a [`DispatchEvent`].
//! Events go to **stderr** so stdout stays parseable for scripts; the only
//! stdout output is the final summary, or the artifact itself with `-o -`.

use std::io::Write;

/// A single progress event for a job run.
#[derive(Clone, Debug, PartialEq)]
pub enum DispatchEvent {
    /// Job parameters after sharding.
    JobStarted {
        target: String,
        items: usize,
        shards: usize,
        workers: usize,
    },
    ShardStarted { shard: usize, items: usize },
    /// A stderr line from the shard's search process.
    ShardLog { shard: usize, line: String },
    ShardRetrying {
        shard: usize,
        attempt: u32,
        error: String,
    },
    ShardCompleted { shard: usize, bytes: usize },
    ShardFailed { shard: usize, error: String },
    /// Non-fatal problem, e.g. a teardown step that could not complete.
    Warning { message: String },
    JobFinished {
        succeeded: usize,
        failed: usize,
        elapsed_secs: f64,
    },
}

/// Receives progress events. Implementations write to stderr (human or JSON).
pub trait DispatchReporter: Send + Sync {
    /// Emit an event. Called concurrently from shard tasks.
    fn report(&self, event: DispatchEvent);
}

/// Human-friendly lines on stderr: `14:02:11 [shard-003] Completed (8,192 bytes)`.
pub struct StderrProgress;

impl DispatchReporter for StderrProgress {
    fn report(&self, event: DispatchEvent) {
        let lines = match &event {
            DispatchEvent::JobStarted {
                target,
                items,
                shards,
                workers,
            } => vec![
                format!("Target: {}", target),
                format!(
                    "Files: {} URLs across {} shards",
                    format_number(*items as u64),
                    shards
                ),
                format!("Workers per shard: {}", workers),
            ],
            DispatchEvent::ShardStarted { shard, items } => {
                vec![format!("[{}] Starting ({} URLs)", label(*shard), items)]
            }
            DispatchEvent::ShardLog { shard, line } => {
                vec![format!("[{}] {}", label(*shard), line)]
            }
            DispatchEvent::ShardRetrying {
                shard,
                attempt,
                error,
            } => vec![format!(
                "[{}] Retry {} after error: {}",
                label(*shard),
                attempt,
                error
            )],
            DispatchEvent::ShardCompleted { shard, bytes } => vec![format!(
                "[{}] Completed ({} bytes)",
                label(*shard),
                format_number(*bytes as u64)
            )],
            DispatchEvent::ShardFailed { shard, error } => {
                vec![format!("[{}] FAILED: {}", label(*shard), error)]
            }
            DispatchEvent::Warning { message } => vec![format!("Warning: {}", message)],
            DispatchEvent::JobFinished {
                succeeded,
                failed,
                elapsed_secs,
            } => vec![format!(
                "All shards finished: {} succeeded, {} failed in {:.1}s",
                succeeded, failed, elapsed_secs
            )],
        };
        let ts = timestamp();
        let mut stderr = std::io::stderr().lock();
        for msg in lines {
            let _ = writeln!(stderr, "{} {}", ts, msg);
        }
        let _ = stderr.flush();
    }
}

/// Machine-readable progress: one JSON object per line on stderr.
pub struct JsonProgress;

impl DispatchReporter for JsonProgress {
    fn report(&self, event: DispatchEvent) {
        let obj = match &event {
            DispatchEvent::JobStarted {
                target,
                items,
                shards,
                workers,
            } => serde_json::json!({
                "event": "job_started",
                "target": target,
                "items": items,
                "shards": shards,
                "workers": workers
            }),
            DispatchEvent::ShardStarted { shard, items } => serde_json::json!({
                "event": "shard_started",
                "shard": shard,
                "items": items
            }),
            DispatchEvent::ShardLog { shard, line } => serde_json::json!({
                "event": "shard_log",
                "shard": shard,
                "line": line
            }),
            DispatchEvent::ShardRetrying {
                shard,
                attempt,
                error,
            } => serde_json::json!({
                "event": "shard_retrying",
                "shard": shard,
                "attempt": attempt,
                "error": error
            }),
            DispatchEvent::ShardCompleted { shard, bytes } => serde_json::json!({
                "event": "shard_completed",
                "shard": shard,
                "bytes": bytes
            }),
            DispatchEvent::ShardFailed { shard, error } => serde_json::json!({
                "event": "shard_failed",
                "shard": shard,
                "error": error
            }),
            DispatchEvent::Warning { message } => serde_json::json!({
                "event": "warning",
                "message": message
            }),
            DispatchEvent::JobFinished {
                succeeded,
                failed,
                elapsed_secs,
            } => serde_json::json!({
                "event": "job_finished",
                "succeeded": succeeded,
                "failed": failed,
                "elapsed_secs": elapsed_secs
            }),
        };
        if let Ok(line) = serde_json::to_string(&obj) {
            let mut stderr = std::io::stderr().lock();
            let _ = writeln!(stderr, "{}", line);
            let _ = stderr.flush();
        }
    }
}

/// No-op reporter when progress is disabled.
pub struct NoProgress;

impl DispatchReporter for NoProgress {
    fn report(&self, _event: DispatchEvent) {}
}

fn label(shard: usize) -> String {
    crate::models::shard_label(shard)
}

fn timestamp() -> String {
    chrono::Local::now().format("%H:%M:%S").to_string()
}

pub(crate) fn format_number(n: u64) -> String {
    let s = n.to_string();
    let mut result = String::with_capacity(s.len() + (s.len() - 1) / 3);
    let chars: Vec<char> = s.chars().rev().collect();
    for (i, c) in chars.iter().enumerate() {
        if i > 0 && i % 3 == 0 {
            result.push(',');
        }
        result.push(*c);
    }
    result.chars().rev().collect()
}

/// Progress mode for the CLI: off, human (stderr), or JSON (stderr).
#[derive(Clone, Copy, Debug, Eq, PartialEq)]
pub enum ProgressMode {
    Off,
    Human,
    Json,
}

impl ProgressMode {
    /// Default: human progress when stderr is a TTY, otherwise off.
    pub fn default_for_tty() -> Self {
        if atty::is(atty::Stream::Stderr) {
            ProgressMode::Human
        } else {
            ProgressMode::Off
        }
    }

    pub fn parse(s: &str) -> Option<Self> {
        match s {
            "off" => Some(ProgressMode::Off),
            "human" => Some(ProgressMode::Human),
            "json" => Some(ProgressMode::Json),
            _ => None,
        }
    }

    /// Build a reporter for this mode.
    pub fn reporter(&self) -> Box<dyn DispatchReporter> {
        match self {
            ProgressMode::Off => Box::new(NoProgress),
            ProgressMode::Human => Box::new(StderrProgress),
            ProgressMode::Json => Box::new(JsonProgress),
        }
    }
}
