//! Process backends.
//!
//! A backend starts a command and hands back whatever it can observe about
//! it: a line-capable output stream, an exit notification, a raw capture for
//! degraded mode, and a way to terminate it. The process driver treats every
//! backend the same way.

mod detached;
mod exit;
mod host;
mod integration;

use std::path::PathBuf;

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use termexec_protocol::{ExitDetails, TerminalProvider};

use crate::errors::TerminalError;

pub use detached::DetachedBackend;
pub use exit::exit_details_from_status;
pub use host::HostShellBackend;
pub use integration::{MarkerParser, wrap_command};

/// Chunks buffered between a backend reader and the process driver.
pub const OUTPUT_CHANNEL_CAPACITY: usize = 256;

/// What to run and where.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SpawnRequest {
    pub command: String,
    pub cwd: PathBuf,
    pub env: Vec<(String, String)>,
}

impl SpawnRequest {
    pub fn new(command: impl Into<String>, cwd: impl Into<PathBuf>) -> Self {
        Self {
            command: command.into(),
            cwd: cwd.into(),
            env: Vec::new(),
        }
    }
}

/// Ordered output chunks from a running command. `None` from
/// [`OutputStream::read_chunk`] means the stream is closed for good.
#[derive(Debug)]
pub struct OutputStream {
    rx: mpsc::Receiver<Bytes>,
}

impl OutputStream {
    pub fn new(rx: mpsc::Receiver<Bytes>) -> Self {
        Self { rx }
    }

    /// Create a connected sender/stream pair.
    pub fn channel() -> (mpsc::Sender<Bytes>, Self) {
        let (tx, rx) = mpsc::channel(OUTPUT_CHANNEL_CAPACITY);
        (tx, Self::new(rx))
    }

    pub async fn read_chunk(&mut self) -> Option<Bytes> {
        self.rx.recv().await
    }
}

/// Stops a running command. Called at most once per process.
pub trait Terminator: Send + Sync {
    fn terminate(&self) -> Result<(), TerminalError>;
}

/// Everything a backend exposes about a command it started.
pub struct SpawnedCommand {
    pub pid: Option<u32>,
    /// Line-capable output. `None` when the backend cannot frame this
    /// command's output; a stream may still be bound later.
    pub stream: Option<OutputStream>,
    /// Fires once with the exit. `None` when the exit is only learned by an
    /// external report.
    pub exit: Option<oneshot::Receiver<ExitDetails>>,
    /// Unframed terminal output, used when no stream ever arrives.
    pub raw_capture: Option<mpsc::UnboundedReceiver<Bytes>>,
    pub terminator: Box<dyn Terminator>,
}

impl std::fmt::Debug for SpawnedCommand {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("SpawnedCommand")
            .field("pid", &self.pid)
            .field("stream", &self.stream.is_some())
            .field("exit", &self.exit.is_some())
            .field("raw_capture", &self.raw_capture.is_some())
            .finish()
    }
}

/// Sleep until `deadline`, or forever when there is none.
pub async fn sleep_until_opt(deadline: Option<tokio::time::Instant>) {
    match deadline {
        Some(deadline) => tokio::time::sleep_until(deadline).await,
        None => std::future::pending().await,
    }
}

/// A way of starting commands for a terminal.
pub trait ProcessBackend: Send + Sync {
    fn provider(&self) -> TerminalProvider;

    /// Start `request`. Must not block on the command itself.
    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedCommand, TerminalError>;

    /// True once the user or the OS closed the underlying terminal.
    fn is_externally_closed(&self) -> bool;

    /// Release backend resources. Commands already running may be killed.
    fn close(&self) {}
}
