use anyhow::{Context, Result};
use serde::Deserialize;
use std::path::{Path, PathBuf};

#[derive(Debug, Deserialize, Clone, Default)]
pub struct Config {
    #[serde(default)]
    pub job: JobConfig,
    #[serde(default)]
    pub dispatch: DispatchConfig,
    #[serde(default)]
    pub executor: ExecutorConfig,
}

#[derive(Debug, Deserialize, Clone)]
pub struct JobConfig {
    #[serde(default = "default_shards")]
    pub shards: usize,
    #[serde(default = "default_workers")]
    pub workers: usize,
    /// Directory for timestamped result files when no output path is given.
    #[serde(default = "default_output_dir")]
    pub output_dir: PathBuf,
    /// Fail the job when shards report different target identifiers.
    #[serde(default)]
    pub verify_targets: bool,
}

impl Default for JobConfig {
    fn default() -> Self {
        Self {
            shards: default_shards(),
            workers: default_workers(),
            output_dir: default_output_dir(),
            verify_targets: false,
        }
    }
}

fn default_shards() -> usize {
    100
}
fn default_workers() -> usize {
    1
}
fn default_output_dir() -> PathBuf {
    PathBuf::from(".")
}

#[derive(Debug, Deserialize, Clone)]
pub struct DispatchConfig {
    /// Maximum shards in flight at once. 0 launches every shard immediately.
    #[serde(default)]
    pub max_concurrency: usize,
    #[serde(default = "default_mode")]
    pub mode: String,
    #[serde(default)]
    pub max_retries: u32,
    #[serde(default = "default_retry_backoff_secs")]
    pub retry_backoff_secs: u64,
}

impl Default for DispatchConfig {
    fn default() -> Self {
        Self {
            max_concurrency: 0,
            mode: default_mode(),
            max_retries: 0,
            retry_backoff_secs: default_retry_backoff_secs(),
        }
    }
}

fn default_mode() -> String {
    "fail_fast".to_string()
}
fn default_retry_backoff_secs() -> u64 {
    1
}

#[derive(Debug, Deserialize, Clone)]
pub struct ExecutorConfig {
    #[serde(default = "default_backend")]
    pub backend: String,
    #[serde(default = "default_timeout_secs")]
    pub timeout_secs: u64,
    /// Parent directory for per-shard scratch space. Defaults to the system temp dir.
    #[serde(default)]
    pub scratch_dir: Option<PathBuf>,
    #[serde(default)]
    pub process: ProcessExecutorConfig,
    #[serde(default)]
    pub http: Option<HttpExecutorConfig>,
}

impl Default for ExecutorConfig {
    fn default() -> Self {
        Self {
            backend: default_backend(),
            timeout_secs: default_timeout_secs(),
            scratch_dir: None,
            process: ProcessExecutorConfig::default(),
            http: None,
        }
    }
}

fn default_backend() -> String {
    "process".to_string()
}
fn default_timeout_secs() -> u64 {
    3600
}

#[derive(Debug, Deserialize, Clone)]
pub struct ProcessExecutorConfig {
    #[serde(default = "default_program")]
    pub program: String,
    /// Argument template. `{target}`, `{urls_file}`, `{workers}`, `{output}`
    /// and `{shard}` are substituted per shard.
    #[serde(default = "default_args")]
    pub args: Vec<String>,
}

impl Default for ProcessExecutorConfig {
    fn default() -> Self {
        Self {
            program: default_program(),
            args: default_args(),
        }
    }
}

fn default_program() -> String {
    "npi-rates".to_string()
}
fn default_args() -> Vec<String> {
    [
        "search",
        "--npi",
        "{target}",
        "--urls-file",
        "{urls_file}",
        "--workers",
        "{workers}",
        "-o",
        "{output}",
        "--stream",
        "--log-progress",
    ]
    .iter()
    .map(|s| s.to_string())
    .collect()
}

#[derive(Debug, Deserialize, Clone)]
pub struct HttpExecutorConfig {
    /// Endpoint that accepts one shard request per POST.
    pub url: String,
}

impl DispatchConfig {
    pub fn is_best_effort(&self) -> bool {
        self.mode == "best_effort"
    }
}

/// Load the config file at `path`.
///
/// When `required` is false and the file does not exist, built-in defaults
/// are returned instead.
pub fn load_config(path: &Path, required: bool) -> Result<Config> {
    if !required && !path.exists() {
        return Ok(Config::default());
    }

    let content = std::fs::read_to_string(path)
        .with_context(|| format!("Failed to read config file: {}", path.display()))?;

    let config: Config = toml::from_str(&content).with_context(|| "Failed to parse config file")?;
    validate(&config)?;
    Ok(config)
}

/// Check value ranges and enumerated strings.
pub fn validate(config: &Config) -> Result<()> {
    // Validate job
    if config.job.shards == 0 {
        anyhow::bail!("job.shards must be >= 1");
    }
    if config.job.workers == 0 {
        anyhow::bail!("job.workers must be >= 1");
    }

    // Validate dispatch
    match config.dispatch.mode.as_str() {
        "fail_fast" | "best_effort" => {}
        other => anyhow::bail!(
            "Unknown dispatch mode: '{}'. Must be fail_fast or best_effort.",
            other
        ),
    }

    // Validate executor
    if config.executor.timeout_secs == 0 {
        anyhow::bail!("executor.timeout_secs must be >= 1");
    }
    match config.executor.backend.as_str() {
        "process" => {
            if config.executor.process.program.trim().is_empty() {
                anyhow::bail!("executor.process.program must not be empty");
            }
        }
        "http" => match &config.executor.http {
            Some(http) if !http.url.trim().is_empty() => {}
            _ => anyhow::bail!("executor.http.url must be set when backend is 'http'"),
        },
        other => anyhow::bail!(
            "Unknown executor backend: '{}'. Must be process or http.",
            other
        ),
    }

    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;

    fn parse(toml_src: &str) -> Result<Config> {
        let config: Config = toml::from_str(toml_src)?;
        validate(&config)?;
        Ok(config)
    }

    #[test]
    fn test_empty_config_uses_defaults() {
        let cfg = parse("").unwrap();
        assert_eq!(cfg.job.shards, 100);
        assert_eq!(cfg.job.workers, 1);
        assert!(!cfg.job.verify_targets);
        assert_eq!(cfg.dispatch.max_concurrency, 0);
        assert_eq!(cfg.dispatch.max_retries, 0);
        assert!(!cfg.dispatch.is_best_effort());
        assert_eq!(cfg.executor.backend, "process");
        assert_eq!(cfg.executor.timeout_secs, 3600);
        assert_eq!(cfg.executor.process.program, "npi-rates");
        assert!(cfg.executor.process.args.contains(&"{urls_file}".to_string()));
    }

    #[test]
    fn test_full_config() {
        let cfg = parse(
            r#"
[job]
shards = 8
workers = 4
output_dir = "out"
verify_targets = true

[dispatch]
max_concurrency = 50
mode = "best_effort"
max_retries = 2
retry_backoff_secs = 3

[executor]
backend = "http"
timeout_secs = 120

[executor.http]
url = "http://127.0.0.1:9000/search"
"#,
        )
        .unwrap();
        assert_eq!(cfg.job.shards, 8);
        assert_eq!(cfg.job.output_dir, PathBuf::from("out"));
        assert!(cfg.job.verify_targets);
        assert_eq!(cfg.dispatch.max_concurrency, 50);
        assert!(cfg.dispatch.is_best_effort());
        assert_eq!(cfg.dispatch.retry_backoff_secs, 3);
        assert_eq!(
            cfg.executor.http.as_ref().map(|h| h.url.as_str()),
            Some("http://127.0.0.1:9000/search")
        );
    }

    #[test]
    fn test_rejects_zero_shards() {
        let err = parse("[job]\nshards = 0\n").unwrap_err();
        assert!(err.to_string().contains("job.shards"));
    }

    #[test]
    fn test_rejects_unknown_mode() {
        let err = parse("[dispatch]\nmode = \"yolo\"\n").unwrap_err();
        assert!(err.to_string().contains("Unknown dispatch mode"));
    }

    #[test]
    fn test_http_backend_requires_url() {
        let err = parse("[executor]\nbackend = \"http\"\n").unwrap_err();
        assert!(err.to_string().contains("executor.http.url"));
    }

    #[test]
    fn test_example_config_parses() {
        let cfg = parse(include_str!("../config/fanout.example.toml")).unwrap();
        assert_eq!(cfg.executor.process.args, default_args());
    }

    #[test]
    fn test_missing_optional_file_falls_back() {
        let cfg = load_config(Path::new("/no/such/fanout.toml"), false).unwrap();
        assert_eq!(cfg.job.shards, 100);
        assert!(load_config(Path::new("/no/such/fanout.toml"), true).is_err());
    }
}
