//! One command invocation: its state machine, event stream and output.

mod callbacks;
mod driver;
mod events;
mod handle;
mod hot;
mod lines;
mod state;

use std::path::Path;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use tokio::sync::{mpsc, watch};
use tracing::{debug, info};

use termexec_protocol::{ExitDetails, ProcessStatus, TerminalProvider};

use crate::backend::{OutputStream, ProcessBackend, SpawnRequest};
use crate::config::TerminalConfig;
use crate::errors::TerminalError;

pub use callbacks::CommandCallbacks;
pub use events::ProcessEvent;
pub use handle::{ProcessHandle, ProcessOutcome};
pub use lines::{LineBuffer, strip_ansi, trim_prompt_artifacts, truncate_lines};
pub use state::ProcessState;

static NEXT_PROCESS_ID: AtomicU64 = AtomicU64::new(1);

pub(crate) type Settlement = Result<ProcessOutcome, TerminalError>;

/// Requests from the public API to the driver task.
#[derive(Debug)]
pub(crate) enum Control {
    Abort,
    Continue,
    BindStream {
        stream: OutputStream,
        pid: Option<u32>,
    },
    ExternalExit(ExitDetails),
}

#[derive(Debug)]
pub(crate) struct ProcessInner {
    pub(crate) state: ProcessState,
    pub(crate) pid: Option<u32>,
    pub(crate) exit: Option<ExitDetails>,
    pub(crate) unretrieved: String,
    pub(crate) stream_bound: bool,
    /// Strip trailing shell prompt characters on retrieval.
    pub(crate) trim_prompt: bool,
    continue_requested: bool,
    control: Option<mpsc::UnboundedSender<Control>>,
}

pub(crate) struct ProcessShared {
    id: u64,
    command: String,
    inner: Mutex<ProcessInner>,
    /// One unbounded sender per listener; `None` once the driver has stopped.
    subscribers: Mutex<Option<Vec<mpsc::UnboundedSender<ProcessEvent>>>>,
    settled: watch::Sender<Option<Settlement>>,
    finished: watch::Sender<bool>,
}

impl ProcessShared {
    pub(crate) fn lock(&self) -> MutexGuard<'_, ProcessInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    pub(crate) fn state(&self) -> ProcessState {
        self.lock().state
    }

    /// First settlement wins; later calls are ignored.
    pub(crate) fn settle(&self, result: Settlement) -> bool {
        self.settled.send_if_modified(|current| {
            if current.is_some() {
                return false;
            }
            *current = Some(result);
            true
        })
    }

    pub(crate) fn is_settled(&self) -> bool {
        self.settled.borrow().is_some()
    }

    fn subscribers(&self) -> MutexGuard<'_, Option<Vec<mpsc::UnboundedSender<ProcessEvent>>>> {
        self.subscribers.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Deliver `event` to every listener still holding its receiver.
    pub(crate) fn publish(&self, event: &ProcessEvent) {
        if let Some(subscribers) = self.subscribers().as_mut() {
            subscribers.retain(|tx| tx.send(event.clone()).is_ok());
        }
    }

    /// No more events will be emitted: close every listener stream and wake
    /// `wait_finished`.
    pub(crate) fn close_events(&self) {
        self.subscribers().take();
        self.finished.send_replace(true);
    }
}

/// A single command invocation.
///
/// Cheap to clone; clones share state. The process starts `Idle` and is
/// started once with [`TerminalProcess::run`]. A background task then drives
/// it through `Starting`, `Running`, `Draining` into one of the terminal
/// states, emitting [`ProcessEvent`]s along the way.
#[derive(Clone)]
pub struct TerminalProcess {
    shared: Arc<ProcessShared>,
}

impl TerminalProcess {
    pub fn new(command: impl Into<String>) -> Self {
        let (settled, _) = watch::channel(None);
        let (finished, _) = watch::channel(false);
        Self {
            shared: Arc::new(ProcessShared {
                id: NEXT_PROCESS_ID.fetch_add(1, Ordering::Relaxed),
                command: command.into(),
                inner: Mutex::new(ProcessInner {
                    state: ProcessState::Idle,
                    pid: None,
                    exit: None,
                    unretrieved: String::new(),
                    stream_bound: false,
                    trim_prompt: false,
                    continue_requested: false,
                    control: None,
                }),
                subscribers: Mutex::new(Some(Vec::new())),
                settled,
                finished,
            }),
        }
    }

    /// Start the command on `backend` in `cwd`.
    ///
    /// Returns as soon as the driver task is scheduled; spawn failures are
    /// reported through the `error` event and the handle. Fails synchronously
    /// only when the process was already run or there is no Tokio runtime.
    pub fn run(
        &self,
        backend: Arc<dyn ProcessBackend>,
        cwd: &Path,
        callbacks: CommandCallbacks,
        config: &TerminalConfig,
    ) -> Result<ProcessHandle, TerminalError> {
        let runtime = tokio::runtime::Handle::try_current().map_err(|e| {
            TerminalError::spawn(&self.shared.command, format!("no async runtime: {}", e))
        })?;

        let (control_tx, control_rx) = mpsc::unbounded_channel();
        {
            let mut inner = self.shared.lock();
            if inner.state != ProcessState::Idle {
                return Err(TerminalError::InvalidState {
                    expected: "idle",
                    actual: inner.state.to_string(),
                });
            }
            inner.state = ProcessState::Starting;
            inner.control = Some(control_tx);
            inner.trim_prompt = backend.provider() == TerminalProvider::HostIntegrated;
        }

        info!(
            event = "termexec.process.run_started",
            process_id = self.shared.id,
            command = %self.shared.command,
            provider = %backend.provider(),
            cwd = %cwd.display(),
        );

        let handle = ProcessHandle::new(self.clone());
        let request = SpawnRequest::new(self.shared.command.clone(), cwd);
        let driver = driver::Driver::new(
            self.shared.clone(),
            backend,
            request,
            callbacks,
            config.clone(),
            control_rx,
        );
        runtime.spawn(driver.run());
        Ok(handle)
    }

    /// Stop the command. Acts only while Starting, Running or Draining;
    /// returns whether the abort was accepted.
    ///
    /// The backend is asked to terminate exactly once. The process then
    /// emits `shell_execution_complete` and `continue` and settles with an
    /// aborted outcome.
    pub fn abort(&self) -> bool {
        let mut inner = self.shared.lock();
        if !inner.state.can_transition_to(ProcessState::Aborted) {
            debug!(
                event = "termexec.process.abort_ignored",
                process_id = self.shared.id,
                state = %inner.state,
            );
            return false;
        }
        inner.state = ProcessState::Aborted;
        if let Some(control) = &inner.control {
            let _ = control.send(Control::Abort);
        }
        info!(
            event = "termexec.process.abort_requested",
            process_id = self.shared.id,
            command = %self.shared.command,
        );
        true
    }

    /// Emit `continue` now and settle the handle while the command keeps
    /// running. Returns false when the process is not active or was already
    /// continued.
    pub fn continue_in_background(&self) -> bool {
        let mut inner = self.shared.lock();
        if !inner.state.is_active() || inner.continue_requested {
            return false;
        }
        inner.continue_requested = true;
        if let Some(control) = &inner.control {
            let _ = control.send(Control::Continue);
        }
        info!(
            event = "termexec.process.continue_requested",
            process_id = self.shared.id,
        );
        true
    }

    /// Attach a line-capable output stream to a process that started
    /// without one. Only one stream may ever be bound.
    pub fn bind_stream(&self, stream: OutputStream, pid: Option<u32>) -> Result<(), TerminalError> {
        let mut inner = self.shared.lock();
        if inner.stream_bound {
            return Err(TerminalError::StreamAlreadyBound);
        }
        if !inner.state.is_active() {
            return Err(TerminalError::InvalidState {
                expected: "starting, running or draining",
                actual: inner.state.to_string(),
            });
        }
        inner.stream_bound = true;
        if let Some(control) = &inner.control {
            let _ = control.send(Control::BindStream { stream, pid });
        }
        Ok(())
    }

    /// Report an exit observed outside the backend (a host terminal's own
    /// end-of-execution signal). The first exit observed wins.
    pub fn report_exit(&self, exit: ExitDetails) -> bool {
        let inner = self.shared.lock();
        if !inner.state.is_active() {
            return false;
        }
        match &inner.control {
            Some(control) => control.send(Control::ExternalExit(exit)).is_ok(),
            None => false,
        }
    }

    /// Subscribe to events emitted from now on.
    ///
    /// Each listener gets its own unbounded queue, so a slow reader never
    /// loses events. The stream ends once the process has finished; a
    /// subscription taken after that is already closed.
    pub fn subscribe(&self) -> mpsc::UnboundedReceiver<ProcessEvent> {
        let (tx, rx) = mpsc::unbounded_channel();
        if let Some(subscribers) = self.shared.subscribers().as_mut() {
            subscribers.push(tx);
        }
        rx
    }

    /// Wait until the process reached a terminal state and emitted its last
    /// event. Unlike awaiting the handle, this does not return early for
    /// `continue_in_background`.
    pub async fn wait_finished(&self) {
        let mut finished = self.shared.finished.subscribe();
        let _ = finished.wait_for(|done| *done).await;
    }

    /// Take everything delivered since the last call, lines joined by `\n`.
    ///
    /// For host shell processes a trailing prompt on the last line is
    /// removed as well.
    pub fn get_unretrieved_output(&self) -> String {
        let (taken, trim_prompt) = {
            let mut inner = self.shared.lock();
            (std::mem::take(&mut inner.unretrieved), inner.trim_prompt)
        };
        if trim_prompt {
            trim_prompt_artifacts(&taken)
        } else {
            taken.strip_suffix('\n').unwrap_or(&taken).to_string()
        }
    }

    pub fn has_unretrieved_output(&self) -> bool {
        !self.shared.lock().unretrieved.is_empty()
    }

    pub fn id(&self) -> u64 {
        self.shared.id
    }

    pub fn command(&self) -> &str {
        &self.shared.command
    }

    pub fn state(&self) -> ProcessState {
        self.shared.state()
    }

    pub fn status(&self) -> ProcessStatus {
        self.state().status()
    }

    pub fn pid(&self) -> Option<u32> {
        self.shared.lock().pid
    }

    pub fn is_hot(&self) -> bool {
        self.state().is_hot()
    }

    /// Starting, Running or Draining.
    pub fn is_active(&self) -> bool {
        self.state().is_active()
    }

    /// Reached Completed, Errored or Aborted.
    pub fn is_finished(&self) -> bool {
        self.state().is_terminal()
    }

    /// Whether `continue` (or `error`) has been delivered.
    pub fn is_settled(&self) -> bool {
        self.shared.is_settled()
    }

    pub fn exit_details(&self) -> Option<ExitDetails> {
        self.shared.lock().exit.clone()
    }
}

impl std::fmt::Debug for TerminalProcess {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let inner = self.shared.lock();
        f.debug_struct("TerminalProcess")
            .field("id", &self.shared.id)
            .field("command", &self.shared.command)
            .field("state", &inner.state)
            .field("pid", &inner.pid)
            .finish()
    }
}
