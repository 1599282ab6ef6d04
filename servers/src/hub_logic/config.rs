use anyhow::{Context, Result, bail};
use clap::Parser;
use serde::{Deserialize, Serialize};
use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use lib_common::core::hub::{DEFAULT_WELCOME_TEXT, HubConfig};
use lib_common::core::session::SessionConfig;

#[derive(Parser, Deserialize, Serialize, Debug, Clone, Default)]
#[clap(about = "Live update hub: push-channel sessions with broadcast fan-out", version)]
#[serde(rename_all = "camelCase")]
pub struct Config {
    #[clap(long, env = "HUB_PORT", help = "Port to listen on for client connections.")]
    pub port: Option<u16>,

    #[clap(long, env = "HUB_CONFIG_PATH", help = "Path to the JSON configuration file.")]
    pub config_path: Option<PathBuf>,

    #[clap(long, env = "HUB_LOG_DIR", help = "Directory for log files.")]
    pub log_dir: Option<PathBuf>,

    #[clap(long, env = "HUB_LOG_LEVEL", help = "Logging level (trace, debug, info, warn, error).")]
    pub log_level: Option<String>,

    #[clap(long, env = "HUB_QUEUE_CAPACITY", help = "Outbound messages buffered per session before it is evicted.")]
    pub queue_capacity: Option<usize>,

    #[clap(long, env = "HUB_PING_PERIOD_SECONDS", help = "Seconds between keepalive probes.")]
    pub ping_period_seconds: Option<u64>,

    #[clap(long, env = "HUB_READ_DEADLINE_SECONDS", help = "Seconds of client silence before the session is torn down.")]
    pub read_deadline_seconds: Option<u64>,

    #[clap(long, env = "HUB_WRITE_DEADLINE_SECONDS", help = "Seconds a single frame write may take.")]
    pub write_deadline_seconds: Option<u64>,

    #[clap(long, env = "HUB_MAX_MESSAGE_SIZE", help = "Largest inbound client message in bytes.")]
    pub max_message_size: Option<usize>,

    #[clap(long, env = "HUB_WELCOME_TEXT", help = "Greeting pushed to every new session.")]
    pub welcome_text: Option<String>,

    #[clap(long, env = "HUB_COMMAND_BUFFER", help = "Pending hub commands before callers wait.")]
    pub command_buffer: Option<usize>,
}

impl Config {
    // Merge two Config structs, where 'other' overrides 'self' for Some values
    fn merge(self, other: Config) -> Config {
        Config {
            port: other.port.or(self.port),
            config_path: other.config_path.or(self.config_path),
            log_dir: other.log_dir.or(self.log_dir),
            log_level: other.log_level.or(self.log_level),
            queue_capacity: other.queue_capacity.or(self.queue_capacity),
            ping_period_seconds: other.ping_period_seconds.or(self.ping_period_seconds),
            read_deadline_seconds: other.read_deadline_seconds.or(self.read_deadline_seconds),
            write_deadline_seconds: other.write_deadline_seconds.or(self.write_deadline_seconds),
            max_message_size: other.max_message_size.or(self.max_message_size),
            welcome_text: other.welcome_text.or(self.welcome_text),
            command_buffer: other.command_buffer.or(self.command_buffer),
        }
    }

    fn defaults() -> Config {
        let session = SessionConfig::default();
        Config {
            port: Some(8081),
            log_dir: Some(PathBuf::from("./logs")),
            log_level: Some("info".to_string()),
            queue_capacity: Some(session.queue_capacity),
            ping_period_seconds: Some(session.ping_period.as_secs()),
            read_deadline_seconds: Some(session.read_deadline.as_secs()),
            write_deadline_seconds: Some(session.write_deadline.as_secs()),
            max_message_size: Some(session.max_message_size),
            welcome_text: Some(DEFAULT_WELCOME_TEXT.to_string()),
            command_buffer: Some(HubConfig::default().command_buffer),
            ..Default::default()
        }
    }

    pub fn port(&self) -> u16 {
        self.port.unwrap_or(8081)
    }

    pub fn log_dir(&self) -> PathBuf {
        self.log_dir.clone().unwrap_or_else(|| PathBuf::from("./logs"))
    }

    pub fn log_level(&self) -> &str {
        self.log_level.as_deref().unwrap_or("info")
    }

    pub fn session_config(&self) -> SessionConfig {
        let d = SessionConfig::default();
        SessionConfig {
            queue_capacity: self.queue_capacity.unwrap_or(d.queue_capacity),
            ping_period: self.ping_period_seconds.map_or(d.ping_period, Duration::from_secs),
            read_deadline: self.read_deadline_seconds.map_or(d.read_deadline, Duration::from_secs),
            write_deadline: self.write_deadline_seconds.map_or(d.write_deadline, Duration::from_secs),
            max_message_size: self.max_message_size.unwrap_or(d.max_message_size),
        }
    }

    pub fn hub_config(&self) -> HubConfig {
        let d = HubConfig::default();
        HubConfig {
            welcome_text: self.welcome_text.clone().unwrap_or(d.welcome_text),
            command_buffer: self.command_buffer.unwrap_or(d.command_buffer),
        }
    }

    /// Rejects settings under which sessions could never stay alive.
    pub fn validate(&self) -> Result<()> {
        let s = self.session_config();
        if s.queue_capacity == 0 {
            bail!("queue capacity must be at least 1");
        }
        if s.max_message_size == 0 {
            bail!("max message size must be at least 1 byte");
        }
        if s.ping_period.is_zero() || s.write_deadline.is_zero() {
            bail!("ping period and write deadline must be greater than zero");
        }
        if s.ping_period >= s.read_deadline {
            bail!(
                "ping period ({:?}) must be shorter than the read deadline ({:?})",
                s.ping_period,
                s.read_deadline
            );
        }
        if self.hub_config().command_buffer == 0 {
            bail!("command buffer must be at least 1");
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
        .unwrap_or_else(|| PathBuf::from("server_hub.conf"));

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

#[cfg(test)]
mod tests {
    use super::*;

    fn cli(args: &[&str]) -> Config {
        let mut argv = vec!["server_hub", "--config-path", "/nonexistent/server_hub.conf"];
        argv.extend_from_slice(args);
        Config::try_parse_from(argv).unwrap()
    }

    #[test]
    fn defaults_match_session_limits() {
        let config = load_from(cli(&[])).unwrap();
        assert_eq!(config.port(), 8081);
        let s = config.session_config();
        assert_eq!(s.queue_capacity, 256);
        assert_eq!(s.ping_period, Duration::from_secs(54));
        assert_eq!(s.read_deadline, Duration::from_secs(60));
        assert_eq!(s.write_deadline, Duration::from_secs(10));
        assert_eq!(s.max_message_size, 512);
        assert_eq!(config.hub_config().command_buffer, 1024);
    }

    #[test]
    fn file_values_are_overridden_by_cli() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.conf");
        fs::write(&path, r#"{"port": 9100, "queueCapacity": 32, "welcomeText": "hello"}"#).unwrap();

        let path_arg = path.to_string_lossy().into_owned();
        let config = load_from(
            Config::try_parse_from(["server_hub", "--config-path", path_arg.as_str(), "--port", "9200"]).unwrap(),
        )
        .unwrap();
        assert_eq!(config.port(), 9200);
        assert_eq!(config.session_config().queue_capacity, 32);
        assert_eq!(config.hub_config().welcome_text, "hello");
    }

    #[test]
    fn malformed_file_fails_fast() {
        let dir = tempfile::tempdir().unwrap();
        let path = dir.path().join("hub.conf");
        fs::write(&path, "{not json").unwrap();
        let path_arg = path.to_string_lossy().into_owned();
        let parsed = Config::try_parse_from(["server_hub", "--config-path", path_arg.as_str()]).unwrap();
        assert!(load_from(parsed).is_err());
    }

    #[test]
    fn ping_period_must_be_shorter_than_read_deadline() {
        let err = load_from(cli(&["--ping-period-seconds", "60", "--read-deadline-seconds", "60"])).unwrap_err();
        assert!(err.to_string().contains("ping period"));
        assert!(load_from(cli(&["--queue-capacity", "0"])).is_err());
    }
}
