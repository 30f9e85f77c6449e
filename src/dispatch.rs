//! Parallel shard dispatch.
//!
//! Every shard is spawned as its own tokio task; tasks share nothing but the
//! executor and the reporter, and each returns its own [`ShardResult`]. The
//! dispatcher joins all of them at a single barrier and re-associates each
//! outcome with its shard index, so the returned outputs are in shard order
//! no matter which shard finished first.
//!
//! # Failure policy
//!
//! - **Fail-fast** (default): any failed shard fails the whole dispatch.
//!   Successful outputs are discarded. The failure is reported as soon as it
//!   is observed; in-flight siblings are not cancelled and are awaited
//!   before returning, so teardown never races a running shard.
//! - **Best-effort**: failures are reported and returned alongside the
//!   successes; the dispatch fails only when every shard failed.
//!
//! Retries are off by default. With `max_retries > 0` a failed attempt is
//! retried with exponential backoff (`base`, `2*base`, `4*base`, ... capped at
//! `32*base`) before the shard counts as failed.

use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

use tokio::sync::Semaphore;
use tokio::task::{AbortHandle, JoinHandle};

use crate::config::DispatchConfig;
use crate::error::{FanoutError, Result};
use crate::executor::{ShardExecutor, ShardRequest};
use crate::models::{
    FailureKind, JobParams, SearchOutput, Shard, ShardFailure, ShardOutput, ShardResult,
};
use crate::progress::{DispatchEvent, DispatchReporter};

/// Knobs for one dispatch round.
#[derive(Debug, Clone)]
pub struct DispatchOptions {
    /// Maximum shards in flight. 0 launches every shard at once.
    pub max_concurrency: usize,
    pub best_effort: bool,
    pub max_retries: u32,
    pub retry_backoff: Duration,
}

impl Default for DispatchOptions {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            best_effort: false,
            max_retries: 0,
            retry_backoff: Duration::from_secs(1),
        }
    }
}

impl From<&DispatchConfig> for DispatchOptions {
    fn from(config: &DispatchConfig) -> Self {
        Self {
            max_concurrency: config.max_concurrency,
            best_effort: config.is_best_effort(),
            max_retries: config.max_retries,
            retry_backoff: Duration::from_secs(config.retry_backoff_secs),
        }
    }
}

/// Outcome of a dispatch round that did not fail as a whole.
#[derive(Debug, Clone, Default)]
pub struct DispatchReport {
    /// Parsed outputs of successful shards, ordered by shard index.
    pub outputs: Vec<ShardOutput>,
    /// Failed shards, ordered by shard index. Always empty in fail-fast mode.
    pub failures: Vec<ShardFailure>,
}

impl DispatchReport {
    pub fn total(&self) -> usize {
        self.outputs.len() + self.failures.len()
    }

    /// The successful payloads in shard order, ready for merging.
    pub fn search_outputs(&self) -> Vec<SearchOutput> {
        self.outputs.iter().map(|o| o.output.clone()).collect()
    }
}

/// Aborts the spawned shard tasks if the dispatch future is dropped early
/// (e.g. on Ctrl-C).
struct AbortOnDrop(Vec<AbortHandle>);

impl Drop for AbortOnDrop {
    fn drop(&mut self) {
        for handle in &self.0 {
            handle.abort();
        }
    }
}

/// Run every shard concurrently and wait for all of them.
pub async fn dispatch_all(
    executor: Arc<dyn ShardExecutor>,
    shards: &[Shard],
    params: &JobParams,
    options: &DispatchOptions,
    reporter: Arc<dyn DispatchReporter>,
) -> Result<DispatchReport> {
    let semaphore = (options.max_concurrency > 0)
        .then(|| Arc::new(Semaphore::new(options.max_concurrency)));
    let completion_seq = Arc::new(AtomicUsize::new(0));

    let mut handles: Vec<JoinHandle<(usize, ShardResult)>> = Vec::with_capacity(shards.len());
    for shard in shards {
        let executor = executor.clone();
        let reporter = reporter.clone();
        let semaphore = semaphore.clone();
        let completion_seq = completion_seq.clone();
        let request = ShardRequest::new(shard, params);
        let options = options.clone();

        handles.push(tokio::spawn(async move {
            let _permit = match semaphore {
                Some(sem) => sem.acquire_owned().await.ok(),
                None => None,
            };
            let result = run_shard(executor.as_ref(), &request, &options, reporter.as_ref()).await;
            (completion_seq.fetch_add(1, Ordering::SeqCst), result)
        }));
    }
    let guard = AbortOnDrop(handles.iter().map(|h| h.abort_handle()).collect());

    // Single barrier: every shard runs to completion or failure.
    let mut outputs = Vec::new();
    let mut failures: Vec<(usize, ShardFailure)> = Vec::new();
    for (position, handle) in handles.into_iter().enumerate() {
        let index = shards[position].index;
        match handle.await {
            Ok((_, Ok(output))) => outputs.push(output),
            Ok((seq, Err(failure))) => failures.push((seq, failure)),
            Err(join_err) => {
                let failure = ShardFailure {
                    index,
                    kind: FailureKind::Execution,
                    detail: format!("shard task aborted: {}", join_err),
                };
                reporter.report(DispatchEvent::ShardFailed {
                    shard: index,
                    error: failure.detail.clone(),
                });
                failures.push((usize::MAX, failure));
            }
        }
    }
    drop(guard);

    if failures.is_empty() {
        return Ok(DispatchReport {
            outputs,
            failures: Vec::new(),
        });
    }

    if !options.best_effort {
        // Surface the failure that was observed first.
        let (_, first) = failures
            .into_iter()
            .min_by_key(|(seq, _)| *seq)
            .ok_or(FanoutError::AllShardsFailed { total: shards.len() })?;
        return Err(first.into());
    }

    if outputs.is_empty() {
        return Err(FanoutError::AllShardsFailed {
            total: shards.len(),
        });
    }

    let mut failures: Vec<ShardFailure> = failures.into_iter().map(|(_, f)| f).collect();
    failures.sort_by_key(|f| f.index);
    Ok(DispatchReport { outputs, failures })
}

/// Execute one shard, retrying as configured, and parse its payload.
async fn run_shard(
    executor: &dyn ShardExecutor,
    request: &ShardRequest,
    options: &DispatchOptions,
    reporter: &dyn DispatchReporter,
) -> ShardResult {
    let index = request.shard_index;
    reporter.report(DispatchEvent::ShardStarted {
        shard: index,
        items: request.items.len(),
    });

    let mut attempt = 0u32;
    loop {
        let outcome = match executor.execute(request, reporter).await {
            Ok(bytes) => match SearchOutput::from_slice(&bytes) {
                Ok(output) => Ok((output, bytes.len())),
                Err(e) => Err(ShardFailure {
                    index,
                    kind: FailureKind::Malformed,
                    detail: format!("{} ({} bytes)", e, bytes.len()),
                }),
            },
            Err(e) => Err(ShardFailure {
                index,
                kind: FailureKind::Execution,
                detail: format!("{:#}", e),
            }),
        };

        match outcome {
            Ok((output, bytes)) => {
                reporter.report(DispatchEvent::ShardCompleted {
                    shard: index,
                    bytes,
                });
                return Ok(ShardOutput { index, output });
            }
            Err(failure) if attempt < options.max_retries => {
                attempt += 1;
                reporter.report(DispatchEvent::ShardRetrying {
                    shard: index,
                    attempt,
                    error: failure.detail,
                });
                tokio::time::sleep(backoff(options.retry_backoff, attempt)).await;
            }
            Err(failure) => {
                reporter.report(DispatchEvent::ShardFailed {
                    shard: index,
                    error: failure.detail.clone(),
                });
                return Err(failure);
            }
        }
    }
}

/// Delay before retry number `attempt` (1-based): base, 2*base, 4*base, ...
fn backoff(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(1 << (attempt.saturating_sub(1)).min(5))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::progress::NoProgress;
    use anyhow::bail;
    use async_trait::async_trait;
    use std::collections::HashMap;
    use std::path::PathBuf;
    use std::sync::Mutex;

    fn params() -> JobParams {
        JobParams {
            target: "1770671182".to_string(),
            urls_file: PathBuf::from("urls.txt"),
            shards: 3,
            workers: 2,
            output: PathBuf::from("-"),
        }
    }

    fn shards(sizes: &[usize]) -> Vec<Shard> {
        sizes
            .iter()
            .enumerate()
            .map(|(index, n)| Shard {
                index,
                items: (0..*n).map(|i| format!("https://mrf/{}/{}", index, i)).collect(),
            })
            .collect()
    }

    fn payload(searched: usize, matched: u64, records: usize) -> Vec<u8> {
        let results: Vec<serde_json::Value> = (0..records)
            .map(|i| serde_json::json!({ "row": i }))
            .collect();
        serde_json::to_vec(&serde_json::json!({
            "search_params": {
                "npis": [1770671182],
                "searched_files": searched,
                "matched_files": matched,
                "duration_seconds": 1.0
            },
            "results": results
        }))
        .unwrap()
    }

    /// Canned executor: per-shard behaviour plus bookkeeping.
    #[derive(Default)]
    struct FakeExecutor {
        fail: HashMap<usize, usize>,
        malformed: Vec<usize>,
        delay_ms: HashMap<usize, u64>,
        calls: Mutex<HashMap<usize, usize>>,
        in_flight: AtomicUsize,
        max_in_flight: AtomicUsize,
    }

    /// Decrements the in-flight count even when the call is aborted.
    struct InFlight<'a>(&'a AtomicUsize);

    impl Drop for InFlight<'_> {
        fn drop(&mut self) {
            self.0.fetch_sub(1, Ordering::SeqCst);
        }
    }

    impl FakeExecutor {
        fn total_calls(&self) -> usize {
            self.calls.lock().unwrap().values().sum()
        }

        fn calls(&self, shard: usize) -> usize {
            self.calls.lock().unwrap().get(&shard).copied().unwrap_or(0)
        }
    }

    #[async_trait]
    impl ShardExecutor for FakeExecutor {
        fn name(&self) -> &str {
            "fake"
        }

        async fn execute(
            &self,
            request: &ShardRequest,
            _reporter: &dyn DispatchReporter,
        ) -> anyhow::Result<Vec<u8>> {
            let index = request.shard_index;
            let call = {
                let mut calls = self.calls.lock().unwrap();
                let c = calls.entry(index).or_insert(0);
                *c += 1;
                *c
            };
            let now = self.in_flight.fetch_add(1, Ordering::SeqCst) + 1;
            self.max_in_flight.fetch_max(now, Ordering::SeqCst);
            let guard = InFlight(&self.in_flight);
            let delay = self.delay_ms.get(&index).copied().unwrap_or(5);
            tokio::time::sleep(Duration::from_millis(delay)).await;
            drop(guard);

            if let Some(failing_calls) = self.fail.get(&index) {
                if call <= *failing_calls {
                    bail!("exit code 1");
                }
            }
            if self.malformed.contains(&index) {
                return Ok(b"<html>502</html>".to_vec());
            }
            Ok(payload(request.items.len(), 1, request.items.len()))
        }
    }

    async fn run(
        exec: Arc<FakeExecutor>,
        shards: &[Shard],
        options: DispatchOptions,
    ) -> Result<DispatchReport> {
        dispatch_all(exec, shards, &params(), &options, Arc::new(NoProgress)).await
    }

    #[tokio::test]
    async fn test_all_succeed_in_shard_order() {
        let exec = Arc::new(FakeExecutor {
            // Shard 0 finishes last.
            delay_ms: HashMap::from([(0, 60), (1, 20), (2, 1)]),
            ..Default::default()
        });
        let shards = shards(&[3, 2, 2]);
        let report = run(exec, &shards, DispatchOptions::default()).await.unwrap();

        assert!(report.failures.is_empty());
        let indices: Vec<usize> = report.outputs.iter().map(|o| o.index).collect();
        assert_eq!(indices, vec![0, 1, 2]);
        let searched: Vec<u64> = report
            .outputs
            .iter()
            .map(|o| o.output.search_params.searched_files)
            .collect();
        assert_eq!(searched, vec![3, 2, 2]);
    }

    #[tokio::test]
    async fn test_fail_fast_discards_successes() {
        let exec = Arc::new(FakeExecutor {
            fail: HashMap::from([(1, usize::MAX)]),
            ..Default::default()
        });
        let shards = shards(&[2, 2, 2]);
        let err = run(exec.clone(), &shards, DispatchOptions::default())
            .await
            .unwrap_err();

        match err {
            FanoutError::ShardFailed { index, detail } => {
                assert_eq!(index, 1);
                assert_eq!(detail, "exit code 1");
            }
            other => panic!("unexpected error: {:?}", other),
        }
        // Siblings were not cancelled: every shard ran exactly once.
        for i in 0..3 {
            assert_eq!(exec.calls(i), 1);
        }
    }

    #[tokio::test]
    async fn test_malformed_payload_is_fatal_with_index() {
        let exec = Arc::new(FakeExecutor {
            malformed: vec![2],
            ..Default::default()
        });
        let shards = shards(&[1, 1, 1]);
        let err = run(exec, &shards, DispatchOptions::default())
            .await
            .unwrap_err();
        assert!(matches!(err, FanoutError::MalformedOutput { index: 2, .. }));
    }

    #[tokio::test]
    async fn test_best_effort_keeps_successes() {
        let exec = Arc::new(FakeExecutor {
            fail: HashMap::from([(0, usize::MAX)]),
            malformed: vec![2],
            ..Default::default()
        });
        let shards = shards(&[1, 1, 1, 1]);
        let options = DispatchOptions {
            best_effort: true,
            ..Default::default()
        };
        let report = run(exec, &shards, options).await.unwrap();

        let ok: Vec<usize> = report.outputs.iter().map(|o| o.index).collect();
        let failed: Vec<usize> = report.failures.iter().map(|f| f.index).collect();
        assert_eq!(ok, vec![1, 3]);
        assert_eq!(failed, vec![0, 2]);
        assert_eq!(report.failures[1].kind, FailureKind::Malformed);
        assert_eq!(report.total(), 4);
    }

    #[tokio::test]
    async fn test_best_effort_all_failed() {
        let exec = Arc::new(FakeExecutor {
            fail: HashMap::from([(0, usize::MAX), (1, usize::MAX)]),
            ..Default::default()
        });
        let shards = shards(&[1, 1]);
        let options = DispatchOptions {
            best_effort: true,
            ..Default::default()
        };
        let err = run(exec, &shards, options).await.unwrap_err();
        assert!(matches!(err, FanoutError::AllShardsFailed { total: 2 }));
    }

    #[tokio::test]
    async fn test_retry_recovers_transient_failure() {
        let exec = Arc::new(FakeExecutor {
            fail: HashMap::from([(1, 2)]),
            ..Default::default()
        });
        let shards = shards(&[1, 1]);
        let options = DispatchOptions {
            max_retries: 2,
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let report = run(exec.clone(), &shards, options).await.unwrap();
        assert_eq!(report.outputs.len(), 2);
        assert_eq!(exec.calls(1), 3);
        assert_eq!(exec.calls(0), 1);
    }

    #[tokio::test]
    async fn test_retry_exhausted_still_fails() {
        let exec = Arc::new(FakeExecutor {
            fail: HashMap::from([(0, 5)]),
            ..Default::default()
        });
        let shards = shards(&[1]);
        let options = DispatchOptions {
            max_retries: 1,
            retry_backoff: Duration::from_millis(1),
            ..Default::default()
        };
        let err = run(exec.clone(), &shards, options).await.unwrap_err();
        assert_eq!(err.shard_index(), Some(0));
        assert_eq!(exec.calls(0), 2);
    }

    #[tokio::test]
    async fn test_bounded_concurrency() {
        let exec = Arc::new(FakeExecutor {
            delay_ms: (0..12).map(|i| (i, 15)).collect(),
            ..Default::default()
        });
        let shards = shards(&[1; 12]);
        let options = DispatchOptions {
            max_concurrency: 3,
            ..Default::default()
        };
        run(exec.clone(), &shards, options).await.unwrap();
        assert!(exec.max_in_flight.load(Ordering::SeqCst) <= 3);
    }

    #[tokio::test]
    async fn test_unbounded_launches_everything() {
        let exec = Arc::new(FakeExecutor {
            delay_ms: (0..8).map(|i| (i, 40)).collect(),
            ..Default::default()
        });
        let shards = shards(&[1; 8]);
        run(exec.clone(), &shards, DispatchOptions::default())
            .await
            .unwrap();
        assert_eq!(exec.max_in_flight.load(Ordering::SeqCst), 8);
    }

    #[tokio::test]
    async fn test_dropping_dispatch_aborts_shards() {
        let exec = Arc::new(FakeExecutor {
            delay_ms: (0..6).map(|i| (i, 30_000)).collect(),
            ..Default::default()
        });
        let shards = shards(&[1; 6]);
        let options = DispatchOptions {
            max_concurrency: 2,
            ..Default::default()
        };

        let outcome = tokio::time::timeout(
            Duration::from_millis(50),
            run(exec.clone(), &shards, options),
        )
        .await;
        assert!(outcome.is_err(), "dispatch should still be running");
        assert_eq!(exec.total_calls(), 2);

        // Give the aborted tasks a chance to unwind.
        tokio::time::sleep(Duration::from_millis(100)).await;
        assert_eq!(exec.in_flight.load(Ordering::SeqCst), 0);
        // Queued shards never start.
        assert_eq!(exec.total_calls(), 2);
    }

    #[tokio::test]
    async fn test_no_shards() {
        let exec = Arc::new(FakeExecutor::default());
        let report = run(exec, &[], DispatchOptions::default()).await.unwrap();
        assert_eq!(report.total(), 0);
    }

    #[test]
    fn test_backoff_doubles_and_caps() {
        let base = Duration::from_secs(1);
        assert_eq!(backoff(base, 1), Duration::from_secs(1));
        assert_eq!(backoff(base, 2), Duration::from_secs(2));
        assert_eq!(backoff(base, 3), Duration::from_secs(4));
        assert_eq!(backoff(base, 6), Duration::from_secs(32));
        assert_eq!(backoff(base, 20), Duration::from_secs(32));
    }
}
