use std::path::PathBuf;
use std::process::Stdio;
use std::time::Duration;

use bytes::{Bytes, BytesMut};
use nix::errno::Errno;
use nix::sys::signal::{self, Signal};
use nix::unistd::Pid;
use tokio::io::{AsyncRead, AsyncReadExt};
use tokio::process::Command;
use tokio::sync::{mpsc, oneshot};
use tracing::{debug, error, info, warn};

use termexec_protocol::{ExitDetails, TerminalProvider};

use super::{OutputStream, ProcessBackend, SpawnRequest, SpawnedCommand, Terminator};
use crate::backend::exit::exit_details_from_status;
use crate::config::TerminalConfig;
use crate::errors::TerminalError;

/// Runs each command as `<shell> -c <command>` in its own process group.
/// stdout and stderr are framed into lines separately, then merged into one
/// stream in arrival order.
#[derive(Debug, Clone)]
pub struct DetachedBackend {
    shell: PathBuf,
    terminate_grace: Duration,
}

impl DetachedBackend {
    pub fn new(config: &TerminalConfig) -> Self {
        Self {
            shell: config.detached_shell.clone(),
            terminate_grace: config.terminate_grace(),
        }
    }
}

impl ProcessBackend for DetachedBackend {
    fn provider(&self) -> TerminalProvider {
        TerminalProvider::DetachedSubprocess
    }

    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedCommand, TerminalError> {
        if !request.cwd.is_dir() {
            return Err(TerminalError::spawn(
                &request.command,
                format!("working directory does not exist: {}", request.cwd.display()),
            ));
        }

        let mut cmd = Command::new(&self.shell);
        cmd.arg("-c")
            .arg(&request.command)
            .current_dir(&request.cwd)
            .envs(request.env.iter().map(|(k, v)| (k.as_str(), v.as_str())))
            .stdin(Stdio::null())
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .process_group(0)
            .kill_on_drop(false);

        let mut child = cmd.spawn().map_err(|e| {
            let reason = if e.kind() == std::io::ErrorKind::NotFound {
                format!("shell not found: {}", self.shell.display())
            } else {
                e.to_string()
            };
            TerminalError::spawn(&request.command, reason)
        })?;

        let pid = child.id();
        info!(
            event = "termexec.backend.detached.spawn_completed",
            command = %request.command,
            pid = ?pid,
            cwd = %request.cwd.display(),
        );

        let (tx, stream) = OutputStream::channel();
        if let Some(stdout) = child.stdout.take() {
            tokio::spawn(forward_output(stdout, tx.clone(), "stdout"));
        }
        if let Some(stderr) = child.stderr.take() {
            tokio::spawn(forward_output(stderr, tx, "stderr"));
        }

        let (exit_tx, exit_rx) = oneshot::channel();
        tokio::spawn(async move {
            let details = match child.wait().await {
                Ok(status) => exit_details_from_status(status),
                Err(e) => {
                    error!(
                        event = "termexec.backend.detached.wait_failed",
                        pid = ?pid,
                        error = %e,
                    );
                    ExitDetails::unknown()
                }
            };
            debug!(
                event = "termexec.backend.detached.exited",
                pid = ?pid,
                exit = %details,
            );
            let _ = exit_tx.send(details);
        });

        Ok(SpawnedCommand {
            pid,
            stream: Some(stream),
            exit: Some(exit_rx),
            raw_capture: None,
            terminator: Box::new(ProcessGroupTerminator {
                pgid: pid,
                grace: self.terminate_grace,
            }),
        })
    }

    fn is_externally_closed(&self) -> bool {
        false
    }
}

/// Forward one pipe in whole lines, so output from the other pipe can never
/// land in the middle of a line. A trailing partial line is terminated and
/// flushed when the pipe closes.
async fn forward_output(
    mut reader: impl AsyncRead + Unpin,
    tx: mpsc::Sender<Bytes>,
    source: &'static str,
) {
    let mut buf = vec![0u8; 4096];
    let mut pending = BytesMut::new();
    loop {
        match reader.read(&mut buf).await {
            Ok(0) => break,
            Ok(n) => {
                pending.extend_from_slice(&buf[..n]);
                if let Some(lines) = take_complete_lines(&mut pending)
                    && tx.send(lines).await.is_err()
                {
                    debug!(event = "termexec.backend.detached.receiver_dropped", source = source);
                    return;
                }
            }
            Err(e) => {
                warn!(
                    event = "termexec.backend.detached.read_failed",
                    source = source,
                    error = %e,
                );
                break;
            }
        }
    }
    if !pending.is_empty() {
        pending.extend_from_slice(b"\n");
        let _ = tx.send(pending.freeze()).await;
    }
}

/// Split off everything up to and including the last newline.
fn take_complete_lines(pending: &mut BytesMut) -> Option<Bytes> {
    let end = pending.iter().rposition(|b| *b == b'\n')?;
    Some(pending.split_to(end + 1).freeze())
}

/// SIGTERM to the whole process group, then SIGKILL if it is still alive
/// after the grace period.
struct ProcessGroupTerminator {
    pgid: Option<u32>,
    grace: Duration,
}

impl Terminator for ProcessGroupTerminator {
    fn terminate(&self) -> Result<(), TerminalError> {
        let Some(pgid) = self.pgid else {
            return Ok(());
        };
        let group = Pid::from_raw(pgid as i32);

        match signal::killpg(group, Signal::SIGTERM) {
            Ok(()) => {}
            Err(Errno::ESRCH) => {
                debug!(event = "termexec.backend.detached.already_exited", pgid = pgid);
                return Ok(());
            }
            Err(e) => return Err(std::io::Error::from(e).into()),
        }
        info!(event = "termexec.backend.detached.sigterm_sent", pgid = pgid);

        let grace = self.grace;
        tokio::spawn(async move {
            tokio::time::sleep(grace).await;
            if signal::killpg(group, None).is_ok() {
                warn!(
                    event = "termexec.backend.detached.sigkill_escalated",
                    pgid = pgid,
                    grace_ms = grace.as_millis() as u64,
                );
                let _ = signal::killpg(group, Signal::SIGKILL);
            }
        });
        Ok(())
    }
}
