use std::path::Path;
use std::path::PathBuf;
use std::time::Duration;

use serde::Deserialize;
use serde::Serialize;
use thiserror::Error;

use crate::adapter::AdapterSettings;

pub const DEFAULT_EVENTS_FILE: &str = "memory/bank/private/gameplay_events.ndjson";

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("failed to read config file {}: {source}", path.display())]
    Read {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("failed to parse config file {}: {source}", path.display())]
    Parse {
        path: PathBuf,
        #[source]
        source: toml::de::Error,
    },
}

/// Top-level configuration file.
///
/// ```toml
/// [supervisor]
/// root_dir = "/srv/toybox"
/// shutdown_timeout_ms = 5000
///
/// [adapter]
/// id = "hethack"
/// command = "nethack -u wizard"
///
/// [server]
/// listen = "127.0.0.1:7421"
/// ```
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ToyboxConfig {
    pub supervisor: SupervisorSettings,
    pub adapter: AdapterSettings,
    pub server: ServerSettings,
}

impl ToyboxConfig {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let contents = std::fs::read_to_string(path).map_err(|source| ConfigError::Read {
            path: path.to_path_buf(),
            source,
        })?;
        toml::from_str(&contents).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SupervisorSettings {
    /// Working directory of the child process. Relative event file paths are
    /// resolved against it.
    #[serde(default = "default_root_dir")]
    pub root_dir: PathBuf,

    #[serde(default)]
    pub events_file: Option<PathBuf>,

    /// Number of raw output chunks kept for `/output`.
    #[serde(default = "default_output_capacity")]
    pub output_capacity: usize,

    /// Characters returned by the output tail.
    #[serde(default = "default_output_tail_chars")]
    pub output_tail_chars: usize,

    #[serde(default = "default_shutdown_timeout_ms")]
    pub shutdown_timeout_ms: u64,

    #[serde(default = "default_stop_poll_interval_ms")]
    pub stop_poll_interval_ms: u64,

    /// Sleep between reads that returned no data.
    #[serde(default = "default_read_backoff_ms")]
    pub read_backoff_ms: u64,

    /// Send SIGKILL once the graceful shutdown timeout elapses.
    #[serde(default = "default_escalate_on_timeout")]
    pub escalate_on_timeout: bool,

    #[serde(default = "default_pty_rows")]
    pub pty_rows: u16,

    #[serde(default = "default_pty_cols")]
    pub pty_cols: u16,
}

impl Default for SupervisorSettings {
    fn default() -> Self {
        Self {
            root_dir: default_root_dir(),
            events_file: None,
            output_capacity: default_output_capacity(),
            output_tail_chars: default_output_tail_chars(),
            shutdown_timeout_ms: default_shutdown_timeout_ms(),
            stop_poll_interval_ms: default_stop_poll_interval_ms(),
            read_backoff_ms: default_read_backoff_ms(),
            escalate_on_timeout: default_escalate_on_timeout(),
            pty_rows: default_pty_rows(),
            pty_cols: default_pty_cols(),
        }
    }
}

impl SupervisorSettings {
    pub fn events_path(&self) -> PathBuf {
        let path = self
            .events_file
            .clone()
            .unwrap_or_else(|| PathBuf::from(DEFAULT_EVENTS_FILE));
        if path.is_absolute() {
            path
        } else {
            self.root_dir.join(path)
        }
    }

    pub fn shutdown_timeout(&self) -> Duration {
        Duration::from_millis(self.shutdown_timeout_ms)
    }

    pub fn stop_poll_interval(&self) -> Duration {
        Duration::from_millis(self.stop_poll_interval_ms.max(1))
    }

    pub fn read_backoff(&self) -> Duration {
        Duration::from_millis(self.read_backoff_ms.max(1))
    }
}

fn default_root_dir() -> PathBuf {
    PathBuf::from(".")
}

fn default_output_capacity() -> usize {
    2_000
}

fn default_output_tail_chars() -> usize {
    16_000
}

fn default_shutdown_timeout_ms() -> u64 {
    3_000
}

fn default_stop_poll_interval_ms() -> u64 {
    100
}

fn default_read_backoff_ms() -> u64 {
    50
}

fn default_escalate_on_timeout() -> bool {
    true
}

fn default_pty_rows() -> u16 {
    30
}

fn default_pty_cols() -> u16 {
    100
}

#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ServerSettings {
    /// Socket address for the control surface; defaults to loopback on the
    /// adapter's port.
    pub listen: Option<String>,
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::parser::ParserKind;
    use assert_matches::assert_matches;
    use pretty_assertions::assert_eq;
    use tempfile::tempdir;

    #[test]
    fn empty_file_uses_defaults() {
        let config: ToyboxConfig = toml::from_str("").expect("parse empty config");
        assert_eq!(config, ToyboxConfig::default());
        assert_eq!(config.supervisor.output_capacity, 2_000);
        assert_eq!(config.supervisor.shutdown_timeout(), Duration::from_secs(3));
        assert!(config.supervisor.escalate_on_timeout);
    }

    #[test]
    fn partial_tables_keep_remaining_defaults() {
        let config: ToyboxConfig = toml::from_str(
            r#"
            [supervisor]
            root_dir = "/srv/toybox"
            output_capacity = 8

            [adapter]
            id = "elite"
            parser = "rules"

            [[adapter.rules]]
            pattern = "(?i)game over"
            type = "ELITE_GAME_OVER"

            [server]
            listen = "0.0.0.0:9000"
            "#,
        )
        .expect("parse config");
        assert_eq!(config.supervisor.output_capacity, 8);
        assert_eq!(config.supervisor.read_backoff_ms, 50);
        assert_eq!(
            config.supervisor.events_path(),
            PathBuf::from("/srv/toybox").join(DEFAULT_EVENTS_FILE)
        );
        assert_eq!(config.adapter.parser, Some(ParserKind::Rules));
        assert_eq!(config.adapter.rules.len(), 1);
        assert_eq!(config.server.listen.as_deref(), Some("0.0.0.0:9000"));
    }

    #[test]
    fn absolute_events_file_is_kept() {
        let settings = SupervisorSettings {
            events_file: Some(PathBuf::from("/var/log/toybox.ndjson")),
            ..SupervisorSettings::default()
        };
        assert_eq!(settings.events_path(), PathBuf::from("/var/log/toybox.ndjson"));
    }

    #[test]
    fn load_reports_path_on_errors() {
        let dir = tempdir().expect("tempdir");
        let missing = dir.path().join("missing.toml");
        assert_matches!(ToyboxConfig::load(&missing), Err(ConfigError::Read { .. }));

        let broken = dir.path().join("broken.toml");
        std::fs::write(&broken, "[supervisor\n").expect("write broken config");
        let err = ToyboxConfig::load(&broken).expect_err("invalid toml");
        assert!(err.to_string().contains("broken.toml"));
    }
}
