use std::sync::Arc;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};
use tokio::time::Instant;
use tracing::{debug, error, info, warn};

use termexec_protocol::ExitDetails;

use super::callbacks::CommandCallbacks;
use super::events::ProcessEvent;
use super::handle::ProcessOutcome;
use super::hot::HotTracker;
use super::lines::{LineBuffer, strip_ansi};
use super::state::ProcessState;
use super::{Control, ProcessShared};
use crate::backend::{
    OutputStream, ProcessBackend, SpawnRequest, SpawnedCommand, Terminator, sleep_until_opt,
};
use crate::config::TerminalConfig;
use crate::errors::TerminalError;

const NO_SHELL_INTEGRATION_MESSAGE: &str =
    "shell integration unavailable; command output could not be framed";

enum StreamSlot {
    /// No line-capable stream yet; one may still be bound.
    Pending,
    Open(OutputStream),
    Closed,
}

/// The single task that turns backend activity into process events.
///
/// Every event for a process is emitted from here, so the event order
/// invariants only have to hold within one sequential loop.
pub(crate) struct Driver {
    shared: Arc<ProcessShared>,
    backend: Arc<dyn ProcessBackend>,
    request: SpawnRequest,
    callbacks: CommandCallbacks,
    config: TerminalConfig,
    control_rx: mpsc::UnboundedReceiver<Control>,
    lines: LineBuffer,
    hot: HotTracker,
    output: String,
    continue_emitted: bool,
}

impl Driver {
    pub(crate) fn new(
        shared: Arc<ProcessShared>,
        backend: Arc<dyn ProcessBackend>,
        request: SpawnRequest,
        callbacks: CommandCallbacks,
        config: TerminalConfig,
        control_rx: mpsc::UnboundedReceiver<Control>,
    ) -> Self {
        let hot = HotTracker::new(&config);
        Self {
            shared,
            backend,
            request,
            callbacks,
            config,
            control_rx,
            lines: LineBuffer::new(),
            hot,
            output: String::new(),
            continue_emitted: false,
        }
    }

    pub(crate) async fn run(mut self) {
        let spawned = match self.backend.spawn(&self.request) {
            Ok(spawned) => spawned,
            Err(e) => return self.fail(e),
        };
        let SpawnedCommand {
            pid,
            stream,
            exit: exit_rx,
            raw_capture,
            terminator,
        } = spawned;

        let mut stream = match stream {
            Some(stream) => StreamSlot::Open(stream),
            None => StreamSlot::Pending,
        };
        let mut exit_rx = exit_rx;
        let mut raw_capture = raw_capture;
        let mut raw_output: Vec<u8> = Vec::new();
        let mut exit: Option<ExitDetails> = None;

        let mut degraded = false;
        let mut terminated = false;
        let mut drain_expired = false;
        let mut quiet_expired = false;
        let mut raw_closed = false;

        let mut drain_deadline: Option<Instant> = None;
        let mut abort_deadline: Option<Instant> = None;
        let mut integration_deadline = matches!(stream, StreamSlot::Pending)
            .then(|| Instant::now() + self.config.shell_integration_timeout());

        if self.mark_running(pid, matches!(stream, StreamSlot::Open(_))) {
            self.emit(ProcessEvent::ShellExecutionStarted { pid });
            self.hot.arm();
        }

        loop {
            if !terminated && self.shared.state() == ProcessState::Aborted {
                terminated = true;
                self.hot.clear();
                self.terminate(terminator.as_ref());
                abort_deadline = Some(
                    Instant::now() + self.config.terminate_grace() + self.config.drain_timeout(),
                );
            }
            if terminated && let Some(details) = exit.take() {
                return self.finish_aborted(details);
            }

            tokio::select! {
                chunk = next_chunk(&mut stream) => match chunk {
                    Some(bytes) => {
                        if !terminated {
                            self.on_chunk(&bytes);
                        }
                    }
                    None => {
                        stream = StreamSlot::Closed;
                        if exit.is_none() && exit_rx.is_none() && drain_deadline.is_none() {
                            // Nothing else will report an exit; give an external report a moment.
                            drain_deadline = Some(Instant::now() + self.config.drain_timeout());
                        }
                    }
                },
                raw = next_raw(&mut raw_capture), if degraded => match raw {
                    Some(bytes) => {
                        if !terminated {
                            raw_output.extend_from_slice(&bytes);
                            self.hot.on_output(&String::from_utf8_lossy(&bytes));
                            self.set_hot(true);
                        }
                    }
                    None => {
                        raw_capture = None;
                        raw_closed = true;
                    }
                },
                details = wait_exit(&mut exit_rx) => {
                    exit_rx = None;
                    if exit.is_none() {
                        exit = Some(details);
                        self.on_exit_observed();
                        drain_deadline = Some(Instant::now() + self.config.drain_timeout());
                    }
                }
                Some(control) = self.control_rx.recv() => match control {
                    // State already moved to Aborted; handled at the top of the loop.
                    Control::Abort => {}
                    Control::Continue => self.emit_continue(ProcessOutcome::continued()),
                    Control::BindStream { stream: bound, pid: bound_pid } => {
                        if matches!(stream, StreamSlot::Pending) && !degraded && !terminated {
                            stream = StreamSlot::Open(bound);
                            integration_deadline = None;
                            if bound_pid.is_some() {
                                self.shared.lock().pid = bound_pid;
                            }
                            info!(
                                event = "termexec.process.stream_bound",
                                process_id = self.shared.id,
                                pid = ?bound_pid,
                            );
                        } else {
                            warn!(
                                event = "termexec.process.stream_bind_ignored",
                                process_id = self.shared.id,
                                degraded = degraded,
                            );
                        }
                    }
                    Control::ExternalExit(details) => {
                        if exit.is_none() {
                            exit = Some(details);
                            self.on_exit_observed();
                            drain_deadline = Some(Instant::now() + self.config.drain_timeout());
                        }
                    }
                },
                _ = sleep_until_opt(self.hot.deadline()) => {
                    self.hot.clear();
                    self.set_hot(false);
                    if degraded {
                        quiet_expired = true;
                    }
                }
                _ = sleep_until_opt(drain_deadline) => {
                    drain_deadline = None;
                    drain_expired = true;
                }
                _ = sleep_until_opt(integration_deadline) => {
                    integration_deadline = None;
                    if matches!(stream, StreamSlot::Pending) && !terminated {
                        degraded = true;
                        self.enter_degraded();
                        if exit.is_some() {
                            drain_deadline = Some(Instant::now() + self.config.drain_timeout());
                        }
                    }
                }
                _ = sleep_until_opt(abort_deadline) => {
                    abort_deadline = None;
                    warn!(
                        event = "termexec.process.abort_exit_timeout",
                        process_id = self.shared.id,
                    );
                    exit.get_or_insert_with(ExitDetails::unknown);
                }
            }

            if terminated {
                continue;
            }
            if degraded {
                if quiet_expired || raw_closed || (exit.is_some() && drain_expired) {
                    return self.finish_degraded(exit, &raw_output);
                }
            } else if !matches!(stream, StreamSlot::Pending) {
                let stream_closed = matches!(stream, StreamSlot::Closed);
                if (exit.is_some() && stream_closed) || drain_expired {
                    return self.finish_completed(exit.unwrap_or_else(ExitDetails::unknown));
                }
            }
        }
    }

    /// Move Starting to Running. False when the process was aborted first.
    fn mark_running(&self, pid: Option<u32>, has_stream: bool) -> bool {
        let mut inner = self.shared.lock();
        inner.pid = pid;
        if has_stream {
            inner.stream_bound = true;
        }
        if inner.state != ProcessState::Starting {
            return false;
        }
        inner.state = ProcessState::Running { hot: true };
        drop(inner);
        info!(
            event = "termexec.process.running",
            process_id = self.shared.id,
            pid = ?pid,
            stream = has_stream,
        );
        true
    }

    fn set_hot(&self, hot: bool) {
        let mut inner = self.shared.lock();
        if let ProcessState::Running { .. } = inner.state {
            inner.state = ProcessState::Running { hot };
        }
    }

    fn on_exit_observed(&mut self) {
        self.hot.clear();
        let mut inner = self.shared.lock();
        if inner.state.can_transition_to(ProcessState::Draining) {
            inner.state = ProcessState::Draining;
        }
    }

    fn on_chunk(&mut self, bytes: &Bytes) {
        self.hot.on_output(&String::from_utf8_lossy(bytes));
        self.set_hot(true);
        for line in self.lines.push(bytes) {
            self.deliver_line(line);
        }
    }

    fn deliver_line(&mut self, line: String) {
        {
            let mut inner = self.shared.lock();
            // No line events once an abort has been accepted.
            if inner.state == ProcessState::Aborted {
                return;
            }
            inner.unretrieved.push_str(&line);
            inner.unretrieved.push('\n');
        }
        self.output.push_str(&line);
        self.output.push('\n');
        self.emit(ProcessEvent::Line(line));
    }

    fn emit(&mut self, event: ProcessEvent) {
        if !matches!(event, ProcessEvent::Line(_)) {
            debug!(
                event = "termexec.process.event_emitted",
                process_id = self.shared.id,
                kind = event.kind(),
            );
        }
        self.shared.publish(&event);
        self.callbacks.deliver(&event);
    }

    fn emit_continue(&mut self, outcome: ProcessOutcome) {
        if self.continue_emitted {
            return;
        }
        self.continue_emitted = true;
        self.emit(ProcessEvent::Continue);
        self.shared.settle(Ok(outcome));
    }

    fn terminate(&self, terminator: &dyn Terminator) {
        if let Err(e) = terminator.terminate() {
            warn!(
                event = "termexec.process.terminate_failed",
                process_id = self.shared.id,
                error = %e,
            );
        }
    }

    fn enter_degraded(&mut self) {
        warn!(
            event = "termexec.process.no_shell_integration",
            process_id = self.shared.id,
            command = %self.request.command,
        );
        self.emit(ProcessEvent::NoShellIntegration(
            NO_SHELL_INTEGRATION_MESSAGE.to_string(),
        ));
        self.hot.arm();
    }

    fn fail(&mut self, e: TerminalError) {
        let aborted = {
            let mut inner = self.shared.lock();
            if inner.state == ProcessState::Aborted {
                true
            } else {
                inner.state = ProcessState::Errored;
                false
            }
        };
        if aborted {
            debug!(
                event = "termexec.process.spawn_failed_after_abort",
                process_id = self.shared.id,
                error = %e,
            );
            return self.finish_aborted(ExitDetails::unknown());
        }
        error!(
            event = "termexec.process.spawn_failed",
            process_id = self.shared.id,
            command = %self.request.command,
            error = %e,
            error_code = e.error_code(),
        );
        self.emit(ProcessEvent::Error(e.clone()));
        self.shared.settle(Err(e));
    }

    /// Claim the Completed state. False when an abort won the race.
    fn claim_completed(&self, exit: &ExitDetails) -> bool {
        let mut inner = self.shared.lock();
        if !inner.state.can_transition_to(ProcessState::Completed) {
            return false;
        }
        inner.state = ProcessState::Completed;
        inner.exit = Some(exit.clone());
        true
    }

    fn finish_completed(&mut self, exit: ExitDetails) {
        if self.shared.state() == ProcessState::Aborted {
            return self.finish_aborted(exit);
        }
        if let Some(line) = self.lines.finish()
            && !line.is_empty()
        {
            self.deliver_line(line);
        }
        if !self.claim_completed(&exit) {
            return self.finish_aborted(exit);
        }

        info!(
            event = "termexec.process.completed",
            process_id = self.shared.id,
            exit = %exit,
            output_bytes = self.output.len(),
        );
        let output = (!self.output.is_empty()).then(|| self.output.clone());
        self.emit(ProcessEvent::Completed { output });
        self.emit(ProcessEvent::ShellExecutionComplete(exit.clone()));
        self.emit_continue(ProcessOutcome::finished(exit));
    }

    fn finish_degraded(&mut self, exit: Option<ExitDetails>, raw_output: &[u8]) {
        let exit = exit.unwrap_or_else(ExitDetails::unknown);
        if !self.claim_completed(&exit) {
            return self.finish_aborted(exit);
        }

        let text = strip_ansi(&String::from_utf8_lossy(raw_output)).replace("\r\n", "\n");
        let text = text.trim();
        let output = (!text.is_empty()).then(|| text.to_string());
        if let Some(output) = &output {
            let mut inner = self.shared.lock();
            inner.unretrieved.push_str(output);
            inner.unretrieved.push('\n');
        }

        info!(
            event = "termexec.process.completed_degraded",
            process_id = self.shared.id,
            exit = %exit,
            output_bytes = raw_output.len(),
        );
        self.emit(ProcessEvent::Completed { output });
        self.emit(ProcessEvent::ShellExecutionComplete(exit.clone()));
        self.emit_continue(ProcessOutcome::finished(exit));
    }

    fn finish_aborted(&mut self, exit: ExitDetails) {
        self.shared.lock().exit = Some(exit.clone());
        info!(
            event = "termexec.process.aborted",
            process_id = self.shared.id,
            exit = %exit,
        );
        self.emit(ProcessEvent::ShellExecutionComplete(exit.clone()));
        self.emit_continue(ProcessOutcome::aborted(exit));
    }
}

impl Drop for Driver {
    fn drop(&mut self) {
        {
            let mut inner = self.shared.lock();
            if !inner.state.is_terminal() {
                inner.state = ProcessState::Errored;
            }
        }
        if self.shared.settle(Err(TerminalError::DriverStopped)) {
            error!(
                event = "termexec.process.driver_stopped",
                process_id = self.shared.id,
            );
        }
        self.shared.close_events();
    }
}

async fn next_chunk(stream: &mut StreamSlot) -> Option<Bytes> {
    match stream {
        StreamSlot::Open(stream) => stream.read_chunk().await,
        StreamSlot::Pending | StreamSlot::Closed => std::future::pending().await,
    }
}

async fn next_raw(raw: &mut Option<mpsc::UnboundedReceiver<Bytes>>) -> Option<Bytes> {
    match raw {
        Some(raw) => raw.recv().await,
        None => std::future::pending().await,
    }
}

async fn wait_exit(exit: &mut Option<oneshot::Receiver<ExitDetails>>) -> ExitDetails {
    match exit {
        // A dropped sender means the backend lost track of the command.
        Some(rx) => rx.await.unwrap_or_else(|_| ExitDetails::unknown()),
        None => std::future::pending().await,
    }
}
