use termexec_protocol::ExitDetails;

use crate::process::events::ProcessEvent;

type LineFn = Box<dyn FnMut(&str) + Send>;
type CompletedFn = Box<dyn FnOnce(Option<&str>) + Send>;
type StartedFn = Box<dyn FnOnce(Option<u32>) + Send>;
type ExecutionCompleteFn = Box<dyn FnOnce(&ExitDetails) + Send>;
type NoShellIntegrationFn = Box<dyn FnOnce(&str) + Send>;

/// Caller-supplied callbacks for one `run_command` invocation.
///
/// `on_line` is persistent. The others fire at most once: each slot is
/// emptied on first delivery.
pub struct CommandCallbacks {
    on_line: LineFn,
    on_completed: Option<CompletedFn>,
    on_shell_execution_started: Option<StartedFn>,
    on_shell_execution_complete: Option<ExecutionCompleteFn>,
    on_no_shell_integration: Option<NoShellIntegrationFn>,
}

impl CommandCallbacks {
    pub fn new(
        on_line: impl FnMut(&str) + Send + 'static,
        on_completed: impl FnOnce(Option<&str>) + Send + 'static,
        on_shell_execution_started: impl FnOnce(Option<u32>) + Send + 'static,
        on_shell_execution_complete: impl FnOnce(&ExitDetails) + Send + 'static,
    ) -> Self {
        Self {
            on_line: Box::new(on_line),
            on_completed: Some(Box::new(on_completed)),
            on_shell_execution_started: Some(Box::new(on_shell_execution_started)),
            on_shell_execution_complete: Some(Box::new(on_shell_execution_complete)),
            on_no_shell_integration: None,
        }
    }

    pub fn with_no_shell_integration(
        mut self,
        on_no_shell_integration: impl FnOnce(&str) + Send + 'static,
    ) -> Self {
        self.on_no_shell_integration = Some(Box::new(on_no_shell_integration));
        self
    }

    /// Callbacks that ignore everything. For callers that only await the handle
    /// or subscribe to the event stream.
    pub fn noop() -> Self {
        Self::new(|_| {}, |_| {}, |_| {}, |_| {})
    }

    pub(crate) fn deliver(&mut self, event: &ProcessEvent) {
        match event {
            ProcessEvent::Line(line) => (self.on_line)(line),
            ProcessEvent::Completed { output } => {
                if let Some(f) = self.on_completed.take() {
                    f(output.as_deref());
                }
            }
            ProcessEvent::ShellExecutionStarted { pid } => {
                if let Some(f) = self.on_shell_execution_started.take() {
                    f(*pid);
                }
            }
            ProcessEvent::ShellExecutionComplete(details) => {
                if let Some(f) = self.on_shell_execution_complete.take() {
                    f(details);
                }
            }
            ProcessEvent::NoShellIntegration(message) => {
                if let Some(f) = self.on_no_shell_integration.take() {
                    f(message);
                }
            }
            // Delivered through the process handle, not the callback set.
            ProcessEvent::Continue | ProcessEvent::Error(_) => {}
        }
    }
}

impl std::fmt::Debug for CommandCallbacks {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("CommandCallbacks")
            .field("on_completed", &self.on_completed.is_some())
            .field(
                "on_shell_execution_started",
                &self.on_shell_execution_started.is_some(),
            )
            .field(
                "on_shell_execution_complete",
                &self.on_shell_execution_complete.is_some(),
            )
            .field(
                "on_no_shell_integration",
                &self.on_no_shell_integration.is_some(),
            )
            .finish()
    }
}
