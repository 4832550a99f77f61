use thiserror::Error;

use crate::adapter::AdapterSpec;

#[derive(Debug, Error)]
pub enum SupervisorError {
    /// Nothing to run, or the adapter itself is misconfigured. Not retried.
    #[error("{message}")]
    Configuration { message: String },
    #[error("runtime `{adapter_id}` is not running")]
    NotRunning { adapter_id: String },
    #[error("terminal channel I/O failed: {source}")]
    ChannelIo {
        #[source]
        source: std::io::Error,
    },
    #[error("failed to launch `{program}` in a pseudo-terminal: {pty_error}")]
    Spawn {
        program: String,
        #[source]
        pty_error: anyhow::Error,
    },
    #[error("runtime `{adapter_id}` did not exit within {timeout_ms}ms of graceful termination")]
    ShutdownTimeout { adapter_id: String, timeout_ms: u64 },
}

impl SupervisorError {
    pub(crate) fn configuration(message: impl Into<String>) -> Self {
        Self::Configuration {
            message: message.into(),
        }
    }

    pub(crate) fn no_runtime(spec: &AdapterSpec) -> Self {
        Self::configuration(format!(
            "No upstream runtime found for {}. Set {} or install one of: {}",
            spec.id,
            spec.env_cmd_var,
            spec.candidates.join(", ")
        ))
    }

    pub(crate) fn not_running(adapter_id: &str) -> Self {
        Self::NotRunning {
            adapter_id: adapter_id.to_string(),
        }
    }

    pub(crate) fn channel_io(source: std::io::Error) -> Self {
        Self::ChannelIo { source }
    }

    pub(crate) fn spawn(program: &str, pty_error: anyhow::Error) -> Self {
        Self::Spawn {
            program: program.to_string(),
            pty_error,
        }
    }

    pub fn is_not_running(&self) -> bool {
        matches!(self, Self::NotRunning { .. })
    }
}
