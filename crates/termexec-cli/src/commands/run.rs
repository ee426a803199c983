use std::path::PathBuf;
use std::pin::pin;
use std::time::Duration;

use clap::ArgMatches;
use tokio::sync::mpsc;
use tokio::time::Instant;
use tracing::{error, info, warn};

use termexec::backend::sleep_until_opt;
use termexec::{
    CancellationRegistry, CommandCallbacks, ProcessOutcome, StatusReporter, TerminalError,
    TerminalManager, load_config,
};
use termexec_protocol::{CommandStatus, TerminalProvider};

use crate::color;

/// Exit code when the command never started.
const EXIT_SPAWN_FAILED: i32 = 127;
/// Exit code for an aborted command (Ctrl-C or timeout).
const EXIT_ABORTED: i32 = 130;

pub(crate) fn handle_run_command(matches: &ArgMatches) -> Result<i32, Box<dyn std::error::Error>> {
    let command = matches
        .get_many::<String>("command")
        .ok_or("Command argument is required")?
        .map(String::as_str)
        .collect::<Vec<_>>()
        .join(" ");
    let cwd = match matches.get_one::<String>("cwd") {
        Some(dir) => PathBuf::from(dir),
        None => std::env::current_dir()?,
    };
    let provider = if matches.get_flag("host") {
        TerminalProvider::HostIntegrated
    } else {
        TerminalProvider::DetachedSubprocess
    };
    let json = matches.get_flag("json");
    let timeout = matches
        .get_one::<u64>("timeout-secs")
        .map(|secs| Duration::from_secs(*secs));

    let config = match load_config() {
        Ok(config) => config,
        Err(e) => {
            eprintln!("{}", color::error(&format!("Failed to load config: {}", e)));
            error!(event = "cli.run_config_failed", error = %e);
            return Err(e.into());
        }
    };

    info!(
        event = "cli.run_started",
        command = %command,
        provider = %provider,
        cwd = %cwd.display(),
    );

    let rt = tokio::runtime::Runtime::new()?;
    let code = rt.block_on(async move {
        let registry = CancellationRegistry::new();
        let mut manager = TerminalManager::new(config, registry.clone());
        let terminal = manager.get_or_create_terminal(&cwd, provider);

        let (status_tx, mut status_rx) = mpsc::unbounded_channel();
        let callbacks = if json {
            StatusReporter::new(status_tx).callbacks(&command)
        } else {
            drop(status_tx);
            print_callbacks()
        };

        let result = match manager.run_command(terminal.id(), &command, callbacks) {
            Ok(handle) => {
                let mut settled = pin!(handle.wait());
                let mut deadline = timeout.map(|t| Instant::now() + t);
                loop {
                    tokio::select! {
                        result = &mut settled => break result,
                        Some(status) = status_rx.recv() => print_status(&status),
                        _ = tokio::signal::ctrl_c() => {
                            warn!(event = "cli.run_interrupted");
                            registry.cancel_all();
                        }
                        _ = sleep_until_opt(deadline) => {
                            deadline = None;
                            warn!(event = "cli.run_timed_out", command = %command);
                            handle.abort();
                        }
                    }
                }
            }
            Err(e) => Err(e),
        };
        while let Ok(status) = status_rx.try_recv() {
            print_status(&status);
        }

        manager.dispose_all();
        report(&command, result)
    });

    info!(event = "cli.run_completed", exit_code = code);
    Ok(code)
}

fn print_callbacks() -> CommandCallbacks {
    CommandCallbacks::new(|line| println!("{}", line), |_| {}, |_| {}, |_| {})
        .with_no_shell_integration(|message| {
            eprintln!("{}", color::warning(&format!("warning: {}", message)));
        })
}

fn print_status(status: &CommandStatus) {
    match serde_json::to_string(status) {
        Ok(line) => println!("{}", line),
        Err(e) => error!(event = "cli.status_serialize_failed", error = %e),
    }
}

/// Print the outcome on stderr and map it to an exit code.
///
/// A command that failed to start is reported as such, never as an exit
/// status.
fn report(command: &str, result: Result<ProcessOutcome, TerminalError>) -> i32 {
    match result {
        Ok(outcome) if outcome.aborted => {
            eprintln!("{}", color::warning(&format!("`{}` aborted", command)));
            EXIT_ABORTED
        }
        Ok(outcome) => {
            let code = exit_code(&outcome);
            let message = match &outcome.exit {
                Some(exit) => format!("`{}` exited with {}", command, exit),
                None => format!("`{}` still running in the background", command),
            };
            if code == 0 {
                eprintln!("{}", color::muted(&message));
            } else {
                eprintln!("{}", color::error(&message));
            }
            code
        }
        Err(e) if e.is_spawn_failure() => {
            eprintln!("{}", color::error(&format!("failed to start: {}", e)));
            error!(event = "cli.run_spawn_failed", error = %e);
            EXIT_SPAWN_FAILED
        }
        Err(e) => {
            eprintln!("{}", color::error(&format!("error: {}", e)));
            error!(event = "cli.run_failed", error = %e, error_code = e.error_code());
            1
        }
    }
}

fn exit_code(outcome: &ProcessOutcome) -> i32 {
    match &outcome.exit {
        Some(exit) => match (exit.exit_code, exit.signal) {
            (Some(code), _) => code,
            (None, Some(signal)) => 128 + signal,
            (None, None) => 1,
        },
        None => 0,
    }
}
