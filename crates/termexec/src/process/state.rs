use termexec_protocol::ProcessStatus;

/// Lifecycle of one command invocation.
///
/// `Completed`, `Errored` and `Aborted` are absorbing: once entered, no
/// further transition is accepted.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ProcessState {
    Idle,
    Starting,
    /// `hot` is true while the process is believed to still be producing output.
    Running {
        hot: bool,
    },
    Draining,
    Completed,
    Errored,
    Aborted,
}

impl ProcessState {
    /// Completed, Errored or Aborted.
    pub fn is_terminal(self) -> bool {
        matches!(
            self,
            ProcessState::Completed | ProcessState::Errored | ProcessState::Aborted
        )
    }

    /// Starting, Running or Draining.
    pub fn is_active(self) -> bool {
        matches!(
            self,
            ProcessState::Starting | ProcessState::Running { .. } | ProcessState::Draining
        )
    }

    pub fn is_hot(self) -> bool {
        matches!(self, ProcessState::Running { hot: true })
    }

    /// Whether `next` is a legal successor of `self`.
    pub fn can_transition_to(self, next: ProcessState) -> bool {
        use ProcessState::*;
        match (self, next) {
            (Idle, Starting) => true,
            (Starting, Running { .. }) => true,
            (Running { .. }, Running { .. }) => true,
            (Running { .. }, Draining) => true,
            (Running { .. } | Draining, Completed) => true,
            (Idle | Starting | Running { .. } | Draining, Errored) => true,
            (Starting | Running { .. } | Draining, Aborted) => true,
            _ => false,
        }
    }

    pub fn status(self) -> ProcessStatus {
        match self {
            ProcessState::Idle => ProcessStatus::Idle,
            ProcessState::Starting => ProcessStatus::Starting,
            ProcessState::Running { .. } => ProcessStatus::Running,
            ProcessState::Draining => ProcessStatus::Draining,
            ProcessState::Completed => ProcessStatus::Completed,
            ProcessState::Errored => ProcessStatus::Errored,
            ProcessState::Aborted => ProcessStatus::Aborted,
        }
    }
}

impl std::fmt::Display for ProcessState {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            ProcessState::Running { hot: true } => write!(f, "running(hot)"),
            ProcessState::Running { hot: false } => write!(f, "running(cool)"),
            other => write!(f, "{}", other.status()),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    const ALL: [ProcessState; 8] = [
        ProcessState::Idle,
        ProcessState::Starting,
        ProcessState::Running { hot: true },
        ProcessState::Running { hot: false },
        ProcessState::Draining,
        ProcessState::Completed,
        ProcessState::Errored,
        ProcessState::Aborted,
    ];

    #[test]
    fn test_terminal_states_are_absorbing() {
        for from in ALL.iter().filter(|s| s.is_terminal()) {
            for to in ALL {
                assert!(
                    !from.can_transition_to(to),
                    "{} -> {} should be rejected",
                    from,
                    to
                );
            }
        }
    }

    #[test]
    fn test_happy_path_transitions() {
        assert!(ProcessState::Idle.can_transition_to(ProcessState::Starting));
        assert!(ProcessState::Starting.can_transition_to(ProcessState::Running { hot: true }));
        assert!(
            ProcessState::Running { hot: true }.can_transition_to(ProcessState::Running {
                hot: false
            })
        );
        assert!(ProcessState::Running { hot: false }.can_transition_to(ProcessState::Draining));
        assert!(ProcessState::Draining.can_transition_to(ProcessState::Completed));
    }

    #[test]
    fn test_abort_not_reachable_from_idle() {
        assert!(!ProcessState::Idle.can_transition_to(ProcessState::Aborted));
        assert!(ProcessState::Starting.can_transition_to(ProcessState::Aborted));
        assert!(ProcessState::Draining.can_transition_to(ProcessState::Aborted));
    }

    #[test]
    fn test_errored_reachable_from_any_non_terminal() {
        for from in ALL.iter().filter(|s| !s.is_terminal()) {
            assert!(from.can_transition_to(ProcessState::Errored));
        }
    }

    #[test]
    fn test_run_only_from_idle() {
        for from in ALL.iter().filter(|s| **s != ProcessState::Idle) {
            assert!(!from.can_transition_to(ProcessState::Starting));
        }
    }

    #[test]
    fn test_display_and_status() {
        assert_eq!(ProcessState::Running { hot: true }.to_string(), "running(hot)");
        assert_eq!(ProcessState::Running { hot: false }.to_string(), "running(cool)");
        assert_eq!(ProcessState::Draining.to_string(), "draining");
        assert_eq!(
            ProcessState::Running { hot: false }.status(),
            ProcessStatus::Running
        );
    }

    #[test]
    fn test_activity_flags() {
        assert!(!ProcessState::Idle.is_active());
        assert!(ProcessState::Starting.is_active());
        assert!(ProcessState::Draining.is_active());
        assert!(!ProcessState::Completed.is_active());
        assert!(ProcessState::Running { hot: true }.is_hot());
        assert!(!ProcessState::Draining.is_hot());
    }
}
