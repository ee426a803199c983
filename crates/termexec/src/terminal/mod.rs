//! Terminals: a backend plus the processes run on it.

mod manager;
mod status;

use std::collections::VecDeque;
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use chrono::{DateTime, Utc};
use tracing::{debug, info};

use termexec_protocol::{ExitDetails, TerminalProvider};

use crate::backend::{DetachedBackend, HostShellBackend, OutputStream, ProcessBackend};
use crate::config::TerminalConfig;
use crate::errors::TerminalError;
use crate::process::{CommandCallbacks, ProcessHandle, TerminalProcess};

pub use manager::TerminalManager;
pub use status::StatusReporter;

pub type TerminalId = u32;

struct TerminalInner {
    current: Option<ProcessHandle>,
    completed: VecDeque<TerminalProcess>,
    last_command: Option<String>,
    task_id: Option<String>,
    last_active: DateTime<Utc>,
}

/// One execution terminal. Runs at most one command at a time.
///
/// The provider is fixed at construction. Processes that finish are kept in
/// a bounded queue so their unretrieved output can still be collected.
pub struct Terminal {
    id: TerminalId,
    cwd: PathBuf,
    backend: Arc<dyn ProcessBackend>,
    config: TerminalConfig,
    inner: Mutex<TerminalInner>,
}

impl Terminal {
    /// Create a terminal with the stock backend for `provider`.
    pub fn new(
        id: TerminalId,
        provider: TerminalProvider,
        cwd: impl Into<PathBuf>,
        config: TerminalConfig,
    ) -> Self {
        let backend: Arc<dyn ProcessBackend> = match provider {
            TerminalProvider::DetachedSubprocess => Arc::new(DetachedBackend::new(&config)),
            TerminalProvider::HostIntegrated => Arc::new(HostShellBackend::new(&config)),
        };
        Self::with_backend(id, cwd, config, backend)
    }

    /// Create a terminal over a caller-supplied backend.
    pub fn with_backend(
        id: TerminalId,
        cwd: impl Into<PathBuf>,
        config: TerminalConfig,
        backend: Arc<dyn ProcessBackend>,
    ) -> Self {
        Self {
            id,
            cwd: cwd.into(),
            backend,
            config,
            inner: Mutex::new(TerminalInner {
                current: None,
                completed: VecDeque::new(),
                last_command: None,
                task_id: None,
                last_active: Utc::now(),
            }),
        }
    }

    fn lock(&self) -> MutexGuard<'_, TerminalInner> {
        self.inner.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Start `command` on this terminal.
    ///
    /// Fails with `TerminalBusy` while the previous command has not settled or
    /// is still running, and with `TerminalClosed` once the terminal was closed.
    pub fn run_command(
        &self,
        command: &str,
        callbacks: CommandCallbacks,
    ) -> Result<ProcessHandle, TerminalError> {
        if self.is_closed() {
            return Err(TerminalError::TerminalClosed(self.id));
        }

        let mut inner = self.lock();
        if let Some(current) = &inner.current
            && (!current.is_settled() || current.is_active())
        {
            return Err(TerminalError::TerminalBusy(self.id));
        }

        let process = TerminalProcess::new(command);
        let handle = process.run(self.backend.clone(), &self.cwd, callbacks, &self.config)?;

        if let Some(previous) = inner.current.take() {
            inner.completed.push_back(previous.process().clone());
            while inner.completed.len() > self.config.completed_queue_capacity {
                if let Some(evicted) = inner.completed.pop_front() {
                    debug!(
                        event = "termexec.terminal.completed_evicted",
                        terminal_id = self.id,
                        process_id = evicted.id(),
                    );
                }
            }
        }
        inner.current = Some(handle.clone());
        inner.last_command = Some(command.to_string());
        inner.last_active = Utc::now();

        info!(
            event = "termexec.terminal.command_started",
            terminal_id = self.id,
            provider = %self.backend.provider(),
            process_id = handle.id(),
        );
        Ok(handle)
    }

    /// Bind a line-capable stream to the running process.
    pub fn set_active_stream(
        &self,
        stream: OutputStream,
        pid: Option<u32>,
    ) -> Result<(), TerminalError> {
        let process = self
            .active_process()
            .ok_or(TerminalError::NoActiveProcess(self.id))?;
        process.bind_stream(stream, pid)
    }

    /// Route an externally observed end of execution to the running process.
    /// Returns false when nothing was running.
    pub fn shell_execution_complete(&self, exit: ExitDetails) -> bool {
        match self.active_process() {
            Some(process) => process.report_exit(exit),
            None => {
                debug!(
                    event = "termexec.terminal.exit_without_process",
                    terminal_id = self.id,
                );
                false
            }
        }
    }

    fn active_process(&self) -> Option<TerminalProcess> {
        self.lock()
            .current
            .as_ref()
            .filter(|h| h.is_active())
            .map(|h| h.process().clone())
    }

    /// All processes, oldest first, that still hold unretrieved output.
    pub fn get_processes_with_output(&self) -> Vec<TerminalProcess> {
        self.all_processes()
            .into_iter()
            .filter(TerminalProcess::has_unretrieved_output)
            .collect()
    }

    /// Take the unretrieved output of every process on this terminal, oldest
    /// first, then drop queued processes that have nothing left.
    pub fn get_unretrieved_output(&self) -> String {
        let output = self
            .all_processes()
            .iter()
            .map(TerminalProcess::get_unretrieved_output)
            .filter(|chunk| !chunk.is_empty())
            .collect::<Vec<_>>()
            .join("\n");
        self.clean_completed_process_queue();
        output
    }

    fn all_processes(&self) -> Vec<TerminalProcess> {
        let inner = self.lock();
        inner
            .completed
            .iter()
            .cloned()
            .chain(inner.current.as_ref().map(|h| h.process().clone()))
            .collect()
    }

    /// Drop completed processes whose output has been fully retrieved.
    pub fn clean_completed_process_queue(&self) {
        self.lock()
            .completed
            .retain(TerminalProcess::has_unretrieved_output);
    }

    pub fn get_last_command(&self) -> Option<String> {
        self.lock().last_command.clone()
    }

    /// The most recent process, running or not.
    pub fn current_process(&self) -> Option<ProcessHandle> {
        self.lock().current.clone()
    }

    pub fn completed_process_count(&self) -> usize {
        self.lock().completed.len()
    }

    /// A command was started and has not settled yet.
    pub fn is_busy(&self) -> bool {
        self.lock()
            .current
            .as_ref()
            .is_some_and(|h| !h.is_settled())
    }

    /// A command is still executing, settled or not.
    pub fn is_running(&self) -> bool {
        self.lock().current.as_ref().is_some_and(|h| h.is_active())
    }

    pub fn is_hot(&self) -> bool {
        self.lock().current.as_ref().is_some_and(|h| h.is_hot())
    }

    pub fn is_closed(&self) -> bool {
        self.backend.is_externally_closed()
    }

    /// Abort any running command and release the backend.
    pub fn close(&self) {
        if let Some(process) = self.active_process() {
            process.abort();
        }
        self.backend.close();
        info!(event = "termexec.terminal.closed", terminal_id = self.id);
    }

    pub fn id(&self) -> TerminalId {
        self.id
    }

    pub fn provider(&self) -> TerminalProvider {
        self.backend.provider()
    }

    pub fn cwd(&self) -> &Path {
        &self.cwd
    }

    pub fn task_id(&self) -> Option<String> {
        self.lock().task_id.clone()
    }

    pub fn set_task_id(&self, task_id: Option<String>) {
        self.lock().task_id = task_id;
    }

    pub fn last_active(&self) -> DateTime<Utc> {
        self.lock().last_active
    }
}

impl std::fmt::Debug for Terminal {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("Terminal")
            .field("id", &self.id)
            .field("provider", &self.backend.provider())
            .field("cwd", &self.cwd)
            .finish()
    }
}
