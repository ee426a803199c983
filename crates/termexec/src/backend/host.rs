use std::io::{Read, Write};
use std::path::{Path, PathBuf};
use std::sync::{Arc, Mutex, PoisonError};
use std::time::Duration;

use bytes::Bytes;
use portable_pty::{Child, CommandBuilder, MasterPty, PtySize, native_pty_system};
use tokio::sync::broadcast::error::RecvError;
use tokio::sync::{Notify, broadcast, mpsc, oneshot};
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;
use tracing::{debug, error, info, warn};

use termexec_protocol::{ExitDetails, TerminalProvider};

use super::integration::{MarkerParser, wrap_command};
use super::{
    OutputStream, ProcessBackend, SpawnRequest, SpawnedCommand, Terminator, sleep_until_opt,
};
use crate::config::TerminalConfig;
use crate::errors::TerminalError;

/// Chunks buffered per subscriber of the shell's output.
const SHELL_BROADCAST_CAPACITY: usize = 1024;

/// Shells known to understand the integration wrapper.
const POSIX_SHELLS: &[&str] = &["bash", "zsh", "sh", "dash", "ksh", "mksh", "ash"];

/// Types commands into a long-lived interactive shell running in a PTY.
///
/// The shell starts lazily on the first command, in that command's working
/// directory, and lives until [`ProcessBackend::close`] or until it exits on
/// its own (the user typed `exit`, the PTY went away).
pub struct HostShellBackend {
    configured_shell: Option<PathBuf>,
    shell_integration: bool,
    size: PtySize,
    terminate_grace: Duration,
    session: Mutex<Option<ShellSession>>,
    closed: CancellationToken,
}

struct ShellSession {
    // Kept open for the lifetime of the session; dropping it hangs up the shell.
    _master: Box<dyn MasterPty + Send>,
    child: Box<dyn Child + Send + Sync>,
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    output_tx: broadcast::Sender<Bytes>,
    pid: Option<u32>,
    integration: bool,
}

impl HostShellBackend {
    pub fn new(config: &TerminalConfig) -> Self {
        Self {
            configured_shell: config.host_shell.clone(),
            shell_integration: config.shell_integration,
            size: PtySize {
                rows: config.pty_rows,
                cols: config.pty_cols,
                pixel_width: 0,
                pixel_height: 0,
            },
            terminate_grace: config.terminate_grace(),
            session: Mutex::new(None),
            closed: CancellationToken::new(),
        }
    }

    /// PID of the interactive shell, once started.
    pub fn shell_pid(&self) -> Option<u32> {
        self.lock_session().as_ref().and_then(|s| s.pid)
    }

    fn lock_session(&self) -> std::sync::MutexGuard<'_, Option<ShellSession>> {
        self.session.lock().unwrap_or_else(PoisonError::into_inner)
    }

    fn open_session(&self, request: &SpawnRequest) -> Result<ShellSession, TerminalError> {
        if !request.cwd.is_dir() {
            return Err(TerminalError::Pty(format!(
                "working directory does not exist: {}",
                request.cwd.display()
            )));
        }
        let shell = resolve_shell(self.configured_shell.as_deref())?;
        let integration = self.shell_integration && supports_shell_integration(&shell);

        info!(
            event = "termexec.backend.host.shell_start_started",
            shell = %shell.display(),
            cwd = %request.cwd.display(),
            integration = integration,
        );

        let pair = native_pty_system()
            .openpty(self.size)
            .map_err(|e| TerminalError::Pty(format!("openpty: {}", e)))?;

        let mut cmd = CommandBuilder::new(&shell);
        cmd.cwd(&request.cwd);
        // Keep prompts and line editing free of colour and cursor tricks.
        cmd.env("TERM", "dumb");
        for (key, value) in &request.env {
            cmd.env(key, value);
        }

        let child = pair
            .slave
            .spawn_command(cmd)
            .map_err(|e| TerminalError::Pty(format!("spawn: {}", e)))?;
        let pid = child.process_id();

        let reader = pair
            .master
            .try_clone_reader()
            .map_err(|e| TerminalError::Pty(format!("clone reader: {}", e)))?;
        // portable-pty only allows one take_writer call.
        let writer = pair
            .master
            .take_writer()
            .map_err(|e| TerminalError::Pty(format!("take writer: {}", e)))?;

        let (output_tx, _) = broadcast::channel(SHELL_BROADCAST_CAPACITY);
        spawn_shell_reader(reader, output_tx.clone(), self.closed.clone(), pid);

        info!(
            event = "termexec.backend.host.shell_start_completed",
            pid = ?pid,
        );

        Ok(ShellSession {
            _master: pair.master,
            child,
            writer: Arc::new(Mutex::new(writer)),
            output_tx,
            pid,
            integration,
        })
    }
}

impl ProcessBackend for HostShellBackend {
    fn provider(&self) -> TerminalProvider {
        TerminalProvider::HostIntegrated
    }

    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedCommand, TerminalError> {
        if self.closed.is_cancelled() {
            return Err(TerminalError::spawn(
                &request.command,
                "host terminal is closed",
            ));
        }

        let mut guard = self.lock_session();
        if guard.is_none() {
            let session = self
                .open_session(request)
                .map_err(|e| TerminalError::spawn(&request.command, e.to_string()))?;
            *guard = Some(session);
        }
        let Some(session) = guard.as_ref() else {
            return Err(TerminalError::spawn(
                &request.command,
                "host shell session unavailable",
            ));
        };

        // Subscribe before typing so no output is missed.
        let rx = session.output_tx.subscribe();
        let text = if session.integration {
            wrap_command(&request.command)
        } else {
            format!("{}\n", request.command)
        };
        write_stdin(&session.writer, text.as_bytes())
            .map_err(|e| TerminalError::spawn(&request.command, e.to_string()))?;

        info!(
            event = "termexec.backend.host.command_sent",
            command = %request.command,
            pid = ?session.pid,
            integration = session.integration,
        );

        let interrupted = Arc::new(Notify::new());
        let terminator = Box::new(InterruptTerminator {
            writer: session.writer.clone(),
            interrupted: interrupted.clone(),
        });

        if session.integration {
            let (tx, stream) = OutputStream::channel();
            let (exit_tx, exit_rx) = oneshot::channel();
            tokio::spawn(forward_marked_output(
                rx,
                tx,
                exit_tx,
                interrupted,
                self.terminate_grace,
                self.closed.clone(),
            ));
            Ok(SpawnedCommand {
                pid: session.pid,
                stream: Some(stream),
                exit: Some(exit_rx),
                raw_capture: None,
                terminator,
            })
        } else {
            let (raw_tx, raw_rx) = mpsc::unbounded_channel();
            tokio::spawn(forward_raw_output(rx, raw_tx, self.closed.clone()));
            Ok(SpawnedCommand {
                pid: session.pid,
                stream: None,
                exit: None,
                raw_capture: Some(raw_rx),
                terminator,
            })
        }
    }

    fn is_externally_closed(&self) -> bool {
        self.closed.is_cancelled()
    }

    fn close(&self) {
        self.closed.cancel();
        if let Some(mut session) = self.lock_session().take() {
            if let Err(e) = session.child.kill() {
                debug!(
                    event = "termexec.backend.host.kill_failed",
                    pid = ?session.pid,
                    error = %e,
                );
            }
            info!(event = "termexec.backend.host.closed", pid = ?session.pid);
        }
    }
}

impl Drop for HostShellBackend {
    fn drop(&mut self) {
        self.close();
    }
}

/// Sends Ctrl-C to the shell's foreground job.
struct InterruptTerminator {
    writer: Arc<Mutex<Box<dyn Write + Send>>>,
    interrupted: Arc<Notify>,
}

impl Terminator for InterruptTerminator {
    fn terminate(&self) -> Result<(), TerminalError> {
        write_stdin(&self.writer, &[0x03])?;
        self.interrupted.notify_one();
        info!(event = "termexec.backend.host.interrupt_sent");
        Ok(())
    }
}

fn write_stdin(writer: &Mutex<Box<dyn Write + Send>>, data: &[u8]) -> Result<(), TerminalError> {
    let mut writer = writer.lock().unwrap_or_else(PoisonError::into_inner);
    writer
        .write_all(data)
        .map_err(|e| TerminalError::Pty(format!("write stdin: {}", e)))?;
    writer
        .flush()
        .map_err(|e| TerminalError::Pty(format!("flush stdin: {}", e)))?;
    Ok(())
}

/// Pick the interactive shell: configured, then `$SHELL`, then bash, then sh.
pub(crate) fn resolve_shell(configured: Option<&Path>) -> Result<PathBuf, TerminalError> {
    if let Some(shell) = configured {
        return Ok(shell.to_path_buf());
    }
    if let Ok(shell) = std::env::var("SHELL")
        && !shell.is_empty()
    {
        return Ok(PathBuf::from(shell));
    }
    which::which("bash")
        .or_else(|_| which::which("sh"))
        .map_err(|e| TerminalError::Pty(format!("no interactive shell found: {}", e)))
}

pub(crate) fn supports_shell_integration(shell: &Path) -> bool {
    shell
        .file_name()
        .and_then(|name| name.to_str())
        .is_some_and(|name| POSIX_SHELLS.contains(&name))
}

/// Exit reported when an interrupted command never printed its end marker.
fn interrupted_exit() -> ExitDetails {
    ExitDetails {
        exit_code: Some(130),
        signal: Some(2),
        signal_name: Some("SIGINT".to_string()),
        core_dump_possible: Some(false),
    }
}

fn spawn_shell_reader(
    mut reader: Box<dyn Read + Send>,
    output_tx: broadcast::Sender<Bytes>,
    closed: CancellationToken,
    pid: Option<u32>,
) -> tokio::task::JoinHandle<()> {
    tokio::task::spawn_blocking(move || {
        let mut buf = [0u8; 4096];
        loop {
            match reader.read(&mut buf) {
                Ok(0) => {
                    debug!(event = "termexec.backend.host.reader_eof", pid = ?pid);
                    break;
                }
                Ok(n) => {
                    // No subscribers between commands is fine.
                    let _ = output_tx.send(Bytes::copy_from_slice(&buf[..n]));
                }
                Err(e) => {
                    error!(
                        event = "termexec.backend.host.reader_error",
                        pid = ?pid,
                        error = %e,
                    );
                    break;
                }
            }
        }
        closed.cancel();
    })
}

async fn forward_marked_output(
    mut rx: broadcast::Receiver<Bytes>,
    tx: mpsc::Sender<Bytes>,
    exit_tx: oneshot::Sender<ExitDetails>,
    interrupted: Arc<Notify>,
    grace: Duration,
    closed: CancellationToken,
) {
    let mut parser = MarkerParser::new();
    let mut interrupt_deadline: Option<Instant> = None;
    loop {
        let received = tokio::select! {
            received = rx.recv() => received,
            _ = interrupted.notified(), if interrupt_deadline.is_none() => {
                interrupt_deadline = Some(Instant::now() + grace);
                continue;
            }
            _ = sleep_until_opt(interrupt_deadline) => {
                warn!(
                    event = "termexec.backend.host.end_marker_missing",
                    grace_ms = grace.as_millis() as u64,
                );
                let _ = exit_tx.send(interrupted_exit());
                return;
            }
            _ = closed.cancelled() => {
                debug!(event = "termexec.backend.host.shell_gone");
                let _ = exit_tx.send(ExitDetails::unknown());
                return;
            }
        };

        match received {
            Ok(data) => {
                let parsed = parser.feed(&data);
                if !parsed.output.is_empty() {
                    // Keep parsing for the exit marker even if nobody reads output.
                    let _ = tx.send(Bytes::from(parsed.output)).await;
                }
                if let Some(exit) = parsed.exit {
                    let _ = exit_tx.send(exit);
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(event = "termexec.backend.host.output_lagged", skipped = skipped);
            }
            Err(RecvError::Closed) => {
                let _ = exit_tx.send(ExitDetails::unknown());
                return;
            }
        }
    }
}

async fn forward_raw_output(
    mut rx: broadcast::Receiver<Bytes>,
    raw_tx: mpsc::UnboundedSender<Bytes>,
    closed: CancellationToken,
) {
    loop {
        let received = tokio::select! {
            received = rx.recv() => received,
            _ = closed.cancelled() => return,
        };
        match received {
            Ok(data) => {
                if raw_tx.send(data).is_err() {
                    return;
                }
            }
            Err(RecvError::Lagged(skipped)) => {
                warn!(event = "termexec.backend.host.output_lagged", skipped = skipped);
            }
            Err(RecvError::Closed) => return,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_supports_shell_integration() {
        assert!(supports_shell_integration(Path::new("/bin/bash")));
        assert!(supports_shell_integration(Path::new("/usr/bin/zsh")));
        assert!(supports_shell_integration(Path::new("sh")));
        assert!(!supports_shell_integration(Path::new("/usr/bin/fish")));
        assert!(!supports_shell_integration(Path::new("/usr/local/bin/nu")));
        assert!(!supports_shell_integration(Path::new("pwsh")));
    }

    #[test]
    fn test_resolve_shell_prefers_configured() {
        let shell = resolve_shell(Some(Path::new("/opt/bin/zsh"))).unwrap();
        assert_eq!(shell, PathBuf::from("/opt/bin/zsh"));
    }

    #[test]
    fn test_interrupted_exit_is_sigint() {
        let exit = interrupted_exit();
        assert_eq!(exit.exit_code, Some(130));
        assert_eq!(exit.signal, Some(2));
        assert_eq!(exit.to_string(), "killed by SIGINT");
    }

    #[tokio::test]
    async fn test_marked_output_forwarding() {
        let (shell_tx, rx) = broadcast::channel(16);
        let (tx, mut stream) = OutputStream::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let task = tokio::spawn(forward_marked_output(
            rx,
            tx,
            exit_tx,
            Arc::new(Notify::new()),
            Duration::from_secs(1),
            CancellationToken::new(),
        ));

        shell_tx
            .send(Bytes::from_static(b"$ cmd\r\n\x1b]633;C\x07hello\r\n"))
            .unwrap();
        shell_tx
            .send(Bytes::from_static(b"\x1b]633;D;3\x07$ "))
            .unwrap();

        assert_eq!(
            stream.read_chunk().await,
            Some(Bytes::from_static(b"hello\r\n"))
        );
        assert_eq!(exit_rx.await.unwrap(), ExitDetails::from_code(3));
        task.await.unwrap();
        assert_eq!(stream.read_chunk().await, None);
    }

    #[tokio::test(start_paused = true)]
    async fn test_interrupt_without_end_marker_synthesises_sigint() {
        let (_shell_tx, rx) = broadcast::channel::<Bytes>(16);
        let (tx, _stream) = OutputStream::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let interrupted = Arc::new(Notify::new());
        tokio::spawn(forward_marked_output(
            rx,
            tx,
            exit_tx,
            interrupted.clone(),
            Duration::from_secs(2),
            CancellationToken::new(),
        ));

        interrupted.notify_one();
        let exit = exit_rx.await.unwrap();
        assert_eq!(exit, interrupted_exit());
    }

    #[tokio::test]
    async fn test_shell_exit_reports_unknown() {
        let (_shell_tx, rx) = broadcast::channel::<Bytes>(16);
        let (tx, _stream) = OutputStream::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let closed = CancellationToken::new();
        tokio::spawn(forward_marked_output(
            rx,
            tx,
            exit_tx,
            Arc::new(Notify::new()),
            Duration::from_secs(2),
            closed.clone(),
        ));
        closed.cancel();
        assert_eq!(exit_rx.await.unwrap(), ExitDetails::unknown());
    }

    #[tokio::test]
    async fn test_raw_forwarding_stops_when_receiver_dropped() {
        let (shell_tx, rx) = broadcast::channel(16);
        let (raw_tx, mut raw_rx) = mpsc::unbounded_channel();
        let task = tokio::spawn(forward_raw_output(rx, raw_tx, CancellationToken::new()));

        shell_tx.send(Bytes::from_static(b"abc")).unwrap();
        assert_eq!(raw_rx.recv().await, Some(Bytes::from_static(b"abc")));
        drop(raw_rx);
        shell_tx.send(Bytes::from_static(b"def")).unwrap();
        task.await.unwrap();
    }
}
