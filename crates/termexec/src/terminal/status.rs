use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};

use tokio::sync::mpsc;
use tracing::debug;

use termexec_protocol::CommandStatus;

use crate::process::CommandCallbacks;

/// Publishes [`CommandStatus`] messages for one command execution.
///
/// Each reporter carries a fresh execution id so a receiver can tell
/// concurrent executions apart on a shared channel.
#[derive(Debug, Clone)]
pub struct StatusReporter {
    execution_id: String,
    tx: mpsc::UnboundedSender<CommandStatus>,
}

impl StatusReporter {
    pub fn new(tx: mpsc::UnboundedSender<CommandStatus>) -> Self {
        Self {
            execution_id: uuid::Uuid::new_v4().to_string(),
            tx,
        }
    }

    pub fn execution_id(&self) -> &str {
        &self.execution_id
    }

    /// Callbacks translating process events into status messages.
    ///
    /// Lines are reported as `output` one by one. When a command produced no
    /// line events (degraded capture), its completed output is reported once
    /// instead.
    pub fn callbacks(&self, command: &str) -> CommandCallbacks {
        let saw_line = Arc::new(AtomicBool::new(false));

        let on_line = {
            let reporter = self.clone();
            let saw_line = saw_line.clone();
            move |line: &str| {
                saw_line.store(true, Ordering::Relaxed);
                reporter.send(CommandStatus::Output {
                    execution_id: reporter.execution_id.clone(),
                    output: line.to_string(),
                });
            }
        };
        let on_completed = {
            let reporter = self.clone();
            move |output: Option<&str>| {
                if saw_line.load(Ordering::Relaxed) {
                    return;
                }
                if let Some(output) = output {
                    reporter.send(CommandStatus::Output {
                        execution_id: reporter.execution_id.clone(),
                        output: output.to_string(),
                    });
                }
            }
        };
        let on_started = {
            let reporter = self.clone();
            let command = command.to_string();
            move |pid: Option<u32>| {
                reporter.send(CommandStatus::Started {
                    execution_id: reporter.execution_id.clone(),
                    pid,
                    command,
                });
            }
        };
        let on_complete = {
            let reporter = self.clone();
            move |exit: &termexec_protocol::ExitDetails| {
                reporter.send(CommandStatus::Exited {
                    execution_id: reporter.execution_id.clone(),
                    exit_code: exit.exit_code,
                });
            }
        };
        let on_fallback = {
            let reporter = self.clone();
            move |_: &str| {
                reporter.send(CommandStatus::Fallback {
                    execution_id: reporter.execution_id.clone(),
                });
            }
        };

        CommandCallbacks::new(on_line, on_completed, on_started, on_complete)
            .with_no_shell_integration(on_fallback)
    }

    fn send(&self, status: CommandStatus) {
        if self.tx.send(status).is_err() {
            debug!(
                event = "termexec.status.receiver_dropped",
                execution_id = %self.execution_id,
            );
        }
    }
}
