use std::io;
use std::sync::Arc;

/// All error types for the termexec crate.
///
/// `Clone` so a single failure can settle a process handle and be handed to
/// every waiter.
#[derive(Debug, Clone, thiserror::Error)]
pub enum TerminalError {
    #[error("failed to start `{command}`: {reason}")]
    Spawn { command: String, reason: String },

    #[error("invalid process state: expected {expected}, found {actual}")]
    InvalidState {
        expected: &'static str,
        actual: String,
    },

    #[error("terminal {0} is busy")]
    TerminalBusy(u32),

    #[error("terminal {0} has no active process")]
    NoActiveProcess(u32),

    #[error("an output stream is already bound to this process")]
    StreamAlreadyBound,

    #[error("terminal not found: {0}")]
    TerminalNotFound(u32),

    #[error("terminal {0} is closed")]
    TerminalClosed(u32),

    #[error("PTY error: {0}")]
    Pty(String),

    #[error("invalid configuration: {0}")]
    ConfigInvalid(String),

    #[error("configuration error: {0}")]
    Config(String),

    #[error("IO error: {0}")]
    Io(Arc<io::Error>),

    #[error("process driver stopped before the command settled")]
    DriverStopped,
}

impl From<io::Error> for TerminalError {
    fn from(e: io::Error) -> Self {
        TerminalError::Io(Arc::new(e))
    }
}

impl TerminalError {
    pub fn spawn(command: &str, reason: impl Into<String>) -> Self {
        TerminalError::Spawn {
            command: command.to_string(),
            reason: reason.into(),
        }
    }

    /// Stable error code string for reporting boundaries.
    pub fn error_code(&self) -> &'static str {
        match self {
            TerminalError::Spawn { .. } => "spawn_failed",
            TerminalError::InvalidState { .. } => "invalid_state",
            TerminalError::TerminalBusy(_) => "terminal_busy",
            TerminalError::NoActiveProcess(_) => "no_active_process",
            TerminalError::StreamAlreadyBound => "stream_already_bound",
            TerminalError::TerminalNotFound(_) => "terminal_not_found",
            TerminalError::TerminalClosed(_) => "terminal_closed",
            TerminalError::Pty(_) => "pty_error",
            TerminalError::ConfigInvalid(_) => "config_invalid",
            TerminalError::Config(_) => "config_error",
            TerminalError::Io(_) => "io_error",
            TerminalError::DriverStopped => "driver_stopped",
        }
    }

    /// Whether this error is caused by the caller misusing the API.
    pub fn is_user_error(&self) -> bool {
        matches!(
            self,
            TerminalError::InvalidState { .. }
                | TerminalError::TerminalBusy(_)
                | TerminalError::NoActiveProcess(_)
                | TerminalError::StreamAlreadyBound
                | TerminalError::TerminalNotFound(_)
                | TerminalError::TerminalClosed(_)
        )
    }

    /// The command never ran. Distinct from a command that ran and exited non-zero.
    pub fn is_spawn_failure(&self) -> bool {
        matches!(self, TerminalError::Spawn { .. })
    }
}

/// Failure reported by a single task during bulk cancellation.
#[derive(Debug, Clone, thiserror::Error)]
pub enum CancelError {
    #[error("abort failed: {0}")]
    AbortFailed(String),

    #[error("stream termination failed: {0}")]
    StreamTerminationFailed(String),

    #[error("task panicked during cancellation")]
    Panicked,
}
