use std::path::{Path, PathBuf};
use std::time::Duration;

use serde::{Deserialize, Serialize};

use crate::errors::TerminalError;
use crate::paths::TermexecPaths;

/// Terminal subsystem configuration.
///
/// Read from the `[terminal]` section of `~/.termexec/config.toml`. Every
/// field has a default so a partial section is fine.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct TerminalConfig {
    /// Quiet interval after which a process stops being "hot".
    /// Default: 2000
    #[serde(default = "default_hot_timeout_ms")]
    pub hot_timeout_ms: u64,

    /// Quiet interval used when the last output looked like compiler progress.
    /// Default: 15000
    #[serde(default = "default_hot_compiling_timeout_ms")]
    pub hot_compiling_timeout_ms: u64,

    /// Wrap host-shell commands in shell-integration markers.
    /// Default: true
    #[serde(default = "default_shell_integration")]
    pub shell_integration: bool,

    /// How long a process without a line stream waits for a late-bound one.
    /// Default: 4000
    #[serde(default = "default_shell_integration_timeout_ms")]
    pub shell_integration_timeout_ms: u64,

    /// Upper bound on output draining once the exit has been observed.
    /// Default: 500
    #[serde(default = "default_drain_timeout_ms")]
    pub drain_timeout_ms: u64,

    /// Delay between SIGTERM and SIGKILL when aborting.
    /// Default: 2000
    #[serde(default = "default_terminate_grace_ms")]
    pub terminate_grace_ms: u64,

    /// Completed processes kept per terminal for diagnostics.
    /// Default: 10
    #[serde(default = "default_completed_queue_capacity")]
    pub completed_queue_capacity: usize,

    /// Retrieved output longer than this many lines keeps only head and tail.
    /// Default: 500
    #[serde(default = "default_output_line_limit")]
    pub output_line_limit: usize,

    /// Shell used with `-c` by the detached backend.
    /// Default: `/bin/sh`
    #[serde(default = "default_detached_shell")]
    pub detached_shell: PathBuf,

    /// Interactive shell for the host backend. None = `$SHELL`, then bash, then sh.
    #[serde(default)]
    pub host_shell: Option<PathBuf>,

    #[serde(default = "default_pty_rows")]
    pub pty_rows: u16,

    #[serde(default = "default_pty_cols")]
    pub pty_cols: u16,
}

impl TerminalConfig {
    /// Validate configuration values.
    ///
    /// Called after loading config to catch misconfiguration early.
    pub fn validate(&self) -> Result<(), TerminalError> {
        let non_zero = [
            ("hot_timeout_ms", self.hot_timeout_ms),
            ("shell_integration_timeout_ms", self.shell_integration_timeout_ms),
            ("drain_timeout_ms", self.drain_timeout_ms),
            ("terminate_grace_ms", self.terminate_grace_ms),
        ];
        for (name, value) in non_zero {
            if value == 0 {
                return Err(TerminalError::ConfigInvalid(format!("{} must be > 0", name)));
            }
        }
        if self.hot_compiling_timeout_ms < self.hot_timeout_ms {
            return Err(TerminalError::ConfigInvalid(
                "hot_compiling_timeout_ms must be >= hot_timeout_ms".to_string(),
            ));
        }
        if self.completed_queue_capacity == 0 {
            return Err(TerminalError::ConfigInvalid(
                "completed_queue_capacity must be > 0".to_string(),
            ));
        }
        if self.output_line_limit < 2 {
            return Err(TerminalError::ConfigInvalid(
                "output_line_limit must be >= 2".to_string(),
            ));
        }
        if self.pty_rows == 0 || self.pty_cols == 0 {
            return Err(TerminalError::ConfigInvalid(
                "pty_rows and pty_cols must be > 0".to_string(),
            ));
        }
        Ok(())
    }

    pub fn hot_timeout(&self) -> Duration {
        Duration::from_millis(self.hot_timeout_ms)
    }

    pub fn hot_compiling_timeout(&self) -> Duration {
        Duration::from_millis(self.hot_compiling_timeout_ms)
    }

    pub fn shell_integration_timeout(&self) -> Duration {
        Duration::from_millis(self.shell_integration_timeout_ms)
    }

    pub fn drain_timeout(&self) -> Duration {
        Duration::from_millis(self.drain_timeout_ms)
    }

    pub fn terminate_grace(&self) -> Duration {
        Duration::from_millis(self.terminate_grace_ms)
    }
}

impl Default for TerminalConfig {
    fn default() -> Self {
        Self {
            hot_timeout_ms: default_hot_timeout_ms(),
            hot_compiling_timeout_ms: default_hot_compiling_timeout_ms(),
            shell_integration: default_shell_integration(),
            shell_integration_timeout_ms: default_shell_integration_timeout_ms(),
            drain_timeout_ms: default_drain_timeout_ms(),
            terminate_grace_ms: default_terminate_grace_ms(),
            completed_queue_capacity: default_completed_queue_capacity(),
            output_line_limit: default_output_line_limit(),
            detached_shell: default_detached_shell(),
            host_shell: None,
            pty_rows: default_pty_rows(),
            pty_cols: default_pty_cols(),
        }
    }
}

fn default_hot_timeout_ms() -> u64 {
    2_000
}

fn default_hot_compiling_timeout_ms() -> u64 {
    15_000
}

fn default_shell_integration() -> bool {
    true
}

fn default_shell_integration_timeout_ms() -> u64 {
    4_000
}

fn default_drain_timeout_ms() -> u64 {
    500
}

fn default_terminate_grace_ms() -> u64 {
    2_000
}

fn default_completed_queue_capacity() -> usize {
    10
}

fn default_output_line_limit() -> usize {
    500
}

fn default_detached_shell() -> PathBuf {
    PathBuf::from("/bin/sh")
}

fn default_pty_rows() -> u16 {
    24
}

fn default_pty_cols() -> u16 {
    80
}

/// Mirrors just enough of the config file to extract the `[terminal]` section.
#[derive(Debug, Deserialize)]
struct ConfigFile {
    #[serde(default)]
    terminal: TerminalConfig,
}

/// Load terminal configuration from `~/.termexec/config.toml`.
///
/// Falls back to defaults if the file doesn't exist or the section is missing.
pub fn load_config() -> Result<TerminalConfig, TerminalError> {
    let paths = TermexecPaths::resolve().unwrap_or_else(|e| {
        tracing::warn!(
            event = "termexec.config.home_dir_fallback",
            error = %e,
            fallback = "/tmp/.termexec",
        );
        TermexecPaths::from_dir(PathBuf::from("/tmp/.termexec"))
    });
    load_config_from(&paths.user_config())
}

/// Load terminal configuration from an explicit file path.
pub fn load_config_from(config_path: &Path) -> Result<TerminalConfig, TerminalError> {
    let config = match std::fs::read_to_string(config_path) {
        Ok(contents) => match toml::from_str::<ConfigFile>(&contents) {
            Ok(file) => file.terminal,
            Err(e) => {
                tracing::warn!(
                    event = "termexec.config.parse_failed",
                    path = %config_path.display(),
                    error = %e,
                );
                TerminalConfig::default()
            }
        },
        Err(e) if e.kind() == std::io::ErrorKind::NotFound => TerminalConfig::default(),
        Err(e) => {
            tracing::warn!(
                event = "termexec.config.read_failed",
                path = %config_path.display(),
                error = %e,
            );
            TerminalConfig::default()
        }
    };
    config.validate()?;
    Ok(config)
}
