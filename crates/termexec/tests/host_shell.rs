//! End-to-end tests against a real interactive shell in a PTY.

use std::time::Duration;

use termexec::{CommandCallbacks, Terminal, TerminalConfig, TerminalProvider};

fn config() -> TerminalConfig {
    TerminalConfig {
        host_shell: Some("/bin/sh".into()),
        terminate_grace_ms: 500,
        ..TerminalConfig::default()
    }
}

#[tokio::test]
async fn test_host_shell_runs_commands_in_sequence() {
    let dir = tempfile::tempdir().unwrap();
    let terminal = Terminal::new(1, TerminalProvider::HostIntegrated, dir.path(), config());

    let handle = terminal
        .run_command("echo hello", CommandCallbacks::noop())
        .unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(15), &handle)
        .await
        .expect("first command settles")
        .unwrap();
    assert_eq!(outcome.exit.and_then(|e| e.exit_code), Some(0));
    assert!(handle.get_unretrieved_output().lines().any(|l| l == "hello"));

    // Same shell, so the exit code of the second command comes from its marker.
    let handle = terminal
        .run_command("false", CommandCallbacks::noop())
        .unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(15), &handle)
        .await
        .expect("second command settles")
        .unwrap();
    assert_eq!(outcome.exit.and_then(|e| e.exit_code), Some(1));

    terminal.close();
    assert!(terminal.is_closed());
}

#[tokio::test]
async fn test_host_shell_without_integration_degrades() {
    let dir = tempfile::tempdir().unwrap();
    let config = TerminalConfig {
        shell_integration: false,
        shell_integration_timeout_ms: 200,
        hot_timeout_ms: 300,
        ..config()
    };
    let terminal = Terminal::new(1, TerminalProvider::HostIntegrated, dir.path(), config);
    let fallback = std::sync::Arc::new(std::sync::atomic::AtomicBool::new(false));
    let seen = fallback.clone();
    let callbacks = CommandCallbacks::noop().with_no_shell_integration(move |_| {
        seen.store(true, std::sync::atomic::Ordering::SeqCst);
    });

    let handle = terminal.run_command("echo degraded", callbacks).unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(15), &handle)
        .await
        .expect("degraded command settles")
        .unwrap();
    assert!(fallback.load(std::sync::atomic::Ordering::SeqCst));
    assert!(outcome.exit.is_some_and(|e| e.exit_code.is_none()));
    terminal.close();
}
