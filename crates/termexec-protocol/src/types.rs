use serde::{Deserialize, Serialize};

/// Which execution backend a terminal uses. Fixed at construction.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum TerminalProvider {
    /// Reuses a long-lived interactive shell session.
    HostIntegrated,
    /// Spawns and owns one child process per command.
    DetachedSubprocess,
}

impl std::fmt::Display for TerminalProvider {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            TerminalProvider::HostIntegrated => write!(f, "host_integrated"),
            TerminalProvider::DetachedSubprocess => write!(f, "detached_subprocess"),
        }
    }
}

/// Lifecycle state of one command invocation, as reported outside the library.
#[non_exhaustive]
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ProcessStatus {
    Idle,
    Starting,
    Running,
    Draining,
    Completed,
    Errored,
    Aborted,
}

impl std::fmt::Display for ProcessStatus {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessStatus::Idle => write!(f, "idle"),
            ProcessStatus::Starting => write!(f, "starting"),
            ProcessStatus::Running => write!(f, "running"),
            ProcessStatus::Draining => write!(f, "draining"),
            ProcessStatus::Completed => write!(f, "completed"),
            ProcessStatus::Errored => write!(f, "errored"),
            ProcessStatus::Aborted => write!(f, "aborted"),
        }
    }
}
