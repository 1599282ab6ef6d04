use anyhow::{Context, Result};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_common::admission::{AdmissionConfig, StoreFailurePolicy};

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "API gateway with sliding-window request admission", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "GATEWAY_PORT", help = "Port to listen on for API requests.")]
    pub port: Option<u16>,

    #[clap(long, env = "GATEWAY_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "GATEWAY_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "GATEWAY_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "REDIS_URL", help = "Redis instance holding the admission counters.")]
    pub redis_url: Option<String>,

    #[clap(long, env = "RATE_LIMIT", help = "Requests admitted per identity per window.")]
    pub rate_limit: Option<u32>,

    #[clap(long, env = "RATE_WINDOW_SECONDS", help = "Length of the sliding admission window in seconds.")]
    pub window_seconds: Option<u64>,

    #[clap(
        long,
        env = "TRUSTED_IDENTITIES",
        value_delimiter = ',',
        help = "Comma-separated identities checked against the trusted limit."
    )]
    pub trusted_identities: Option<Vec<String>>,

    #[clap(long, env = "TRUSTED_RATE_LIMIT", help = "Requests admitted per trusted identity per window.")]
    pub trusted_rate_limit: Option<u32>,

    #[clap(long, env = "STORE_TIMEOUT_MS", help = "Milliseconds one admission store round trip may take.")]
    pub store_timeout_ms: Option<u64>,

    #[clap(long, env = "STORE_FAILURE_POLICY", help = "fail-closed (refuse) or fail-open (admit) when the store is down.")]
    pub store_failure_policy: Option<StoreFailurePolicy>,

    #[clap(long, env = "HUB_BROADCAST_URL", help = "Hub endpoint that receives query updates, e.g. http://127.0.0.1:8081/broadcast.")]
    pub hub_broadcast_url: Option<String>,

    #[clap(long, env = "HUB_NOTIFY_TIMEOUT_MS", help = "Milliseconds a hub notification may take.")]
    pub hub_notify_timeout_ms: Option<u64>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            redis_url: other.redis_url.or(self.redis_url),
            rate_limit: other.rate_limit.or(self.rate_limit),
            window_seconds: other.window_seconds.or(self.window_seconds),
            trusted_identities: other.trusted_identities.or(self.trusted_identities),
            trusted_rate_limit: other.trusted_rate_limit.or(self.trusted_rate_limit),
            store_timeout_ms: other.store_timeout_ms.or(self.store_timeout_ms),
            store_failure_policy: other.store_failure_policy.or(self.store_failure_policy),
            hub_broadcast_url: other.hub_broadcast_url.or(self.hub_broadcast_url),
            hub_notify_timeout_ms: other.hub_notify_timeout_ms.or(self.hub_notify_timeout_ms),
        }
    }

    fn defaults() -> Config {
        Config {
            port: Some(8080),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            redis_url: Some("redis://127.0.0.1:6379/".to_string()),
            rate_limit: Some(60),
            window_seconds: Some(60),
            trusted_identities: Some(Vec::new()),
            trusted_rate_limit: Some(600),
            store_timeout_ms: Some(250),
            store_failure_policy: Some(StoreFailurePolicy::FailClosed),
            hub_notify_timeout_ms: Some(2000),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(8080)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn redis_url(&self) -> &str {
        self.redis_url.as_deref().unwrap_or("redis://127.0.0.1:6379/")
    }

    pub fn policy(&self) -> StoreFailurePolicy {
        self.store_failure_policy.unwrap_or_default()
    }

    pub fn trusted_identities(&self) -> Vec<String> {
        self.trusted_identities
            .iter()
            .flatten()
            .map(|id| id.trim().to_string())
            .filter(|id| !id.is_empty())
            .collect()
    }

    pub fn hub_notify_timeout(&self) -> Duration {
        Duration::from_millis(self.hub_notify_timeout_ms.unwrap_or(2000))
    }

    fn window(&self) -> Duration {
        Duration::from_secs(self.window_seconds.unwrap_or(60))
    }

    fn store_timeout(&self) -> Duration {
        Duration::from_millis(self.store_timeout_ms.unwrap_or(250))
    }

    /// Limits for ordinary callers.
    pub fn admission_config(&self) -> Result<AdmissionConfig> {
        let config = AdmissionConfig::new(self.rate_limit.unwrap_or(60), self.window())
            .and_then(|c| c.with_store_timeout(self.store_timeout()))
            .context("invalid admission settings")?;
        Ok(config)
    }

    /// Limits for trusted callers.
    pub fn trusted_admission_config(&self) -> Result<AdmissionConfig> {
        let config = AdmissionConfig::new(self.trusted_rate_limit.unwrap_or(600), self.window())
            .and_then(|c| c.with_store_timeout(self.store_timeout()))
            .context("invalid trusted admission settings")?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<()> {
        self.admission_config()?;
        self.trusted_admission_config()?;
        if let Some(url) = &self.hub_broadcast_url {
            reqwest::Url::parse(url).with_context(|| format!("invalid hub broadcast url '{url}'"))?;
        }
        Ok(())
    }
}

/// Defaults, then the JSON file, then environment and CLI.
pub fn load_config() -> Result<Config> {
    load_from(Config::parse())
}

pub fn load_from(cli: Config) -> Result<Config> {
    let file_path = cli
        .config_path
        .clone()
        .unwrap_or_else(|| PathBuf::from("server_gateway.conf"));

    let mut current = Config::defaults();
    if let Some(file_config) = read_config_file(&file_path)? {
        current = current.merge(file_config);
    }
    current = current.merge(cli);
    current.validate()?;
    Ok(current)
}

fn read_config_file(path: &Path) -> Result<Option<Config>> {
    if !path.exists() {
        return Ok(None);
    }
    let raw = fs::read_to_string(path)
        .with_context(|| format!("failed to read config file {}", path.display()))?;
    let parsed = serde_json::from_str::<Config>(&raw)
        .with_context(|| format!("failed to parse config file {}", path.display()))?;
    Ok(Some(parsed))
}
