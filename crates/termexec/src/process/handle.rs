use std::future::IntoFuture;
use std::ops::Deref;

use futures::future::BoxFuture;
use tokio::sync::watch;

use termexec_protocol::ExitDetails;

use super::{Settlement, TerminalProcess};
use crate::errors::TerminalError;

/// How a command invocation settled.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ProcessOutcome {
    /// `None` when the caller released the process before it finished.
    pub exit: Option<ExitDetails>,
    /// Settled by `continue_in_background`; the command may still be running.
    pub continued: bool,
    pub aborted: bool,
}

impl ProcessOutcome {
    pub(crate) fn finished(exit: ExitDetails) -> Self {
        Self {
            exit: Some(exit),
            continued: false,
            aborted: false,
        }
    }

    pub(crate) fn continued() -> Self {
        Self {
            exit: None,
            continued: true,
            aborted: false,
        }
    }

    pub(crate) fn aborted(exit: ExitDetails) -> Self {
        Self {
            exit: Some(exit),
            continued: false,
            aborted: true,
        }
    }

    /// Ran to completion with exit code 0.
    pub fn is_success(&self) -> bool {
        !self.aborted && self.exit.as_ref().is_some_and(ExitDetails::is_success)
    }
}

/// A running command that is both the process (through `Deref`) and an
/// awaitable that settles exactly once.
///
/// Settles `Ok` when `continue` is emitted (normal completion, abort, or
/// `continue_in_background`) and `Err` when the command failed to start.
/// Awaiting again after settlement returns the same result immediately.
#[derive(Clone)]
pub struct ProcessHandle {
    process: TerminalProcess,
    settled: watch::Receiver<Option<Settlement>>,
}

impl ProcessHandle {
    pub(crate) fn new(process: TerminalProcess) -> Self {
        let settled = process.shared.settled.subscribe();
        Self { process, settled }
    }

    pub fn process(&self) -> &TerminalProcess {
        &self.process
    }

    /// Wait for the process to settle.
    pub async fn wait(&self) -> Result<ProcessOutcome, TerminalError> {
        let mut settled = self.settled.clone();
        if let Ok(value) = settled.wait_for(Option::is_some).await
            && let Some(result) = value.clone()
        {
            return result;
        }
        let current = settled.borrow().clone();
        current.unwrap_or(Err(TerminalError::DriverStopped))
    }

    /// The settlement, if it already happened.
    pub fn try_result(&self) -> Option<Result<ProcessOutcome, TerminalError>> {
        self.settled.borrow().clone()
    }
}

impl Deref for ProcessHandle {
    type Target = TerminalProcess;

    fn deref(&self) -> &TerminalProcess {
        &self.process
    }
}

impl std::fmt::Debug for ProcessHandle {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("ProcessHandle")
            .field("process", &self.process)
            .field("settled", &self.settled.borrow().is_some())
            .finish()
    }
}

impl IntoFuture for ProcessHandle {
    type Output = Result<ProcessOutcome, TerminalError>;
    type IntoFuture = BoxFuture<'static, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(async move { self.wait().await })
    }
}

impl<'a> IntoFuture for &'a ProcessHandle {
    type Output = Result<ProcessOutcome, TerminalError>;
    type IntoFuture = BoxFuture<'a, Self::Output>;

    fn into_future(self) -> Self::IntoFuture {
        Box::pin(self.wait())
    }
}
