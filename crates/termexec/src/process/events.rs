use termexec_protocol::ExitDetails;

use crate::errors::TerminalError;

/// One step in the event sequence of a command invocation.
///
/// For a normal run the order is fixed: `ShellExecutionStarted`, any number
/// of `Line`, `Completed`, `ShellExecutionComplete`, `Continue`. A spawn
/// failure produces a single `Error` and nothing else.
#[derive(Debug, Clone)]
pub enum ProcessEvent {
    ShellExecutionStarted { pid: Option<u32> },
    Line(String),
    Completed { output: Option<String> },
    ShellExecutionComplete(ExitDetails),
    Continue,
    Error(TerminalError),
    NoShellIntegration(String),
}

impl ProcessEvent {
    /// Short event name used in logs and tests.
    pub fn kind(&self) -> &'static str {
        match self {
            ProcessEvent::ShellExecutionStarted { .. } => "shell_execution_started",
            ProcessEvent::Line(_) => "line",
            ProcessEvent::Completed { .. } => "completed",
            ProcessEvent::ShellExecutionComplete(_) => "shell_execution_complete",
            ProcessEvent::Continue => "continue",
            ProcessEvent::Error(_) => "error",
            ProcessEvent::NoShellIntegration(_) => "no_shell_integration",
        }
    }
}
