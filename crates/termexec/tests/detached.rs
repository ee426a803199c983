//! End-to-end tests against real child processes through the detached backend.

use std::path::Path;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use termexec::{
    CommandCallbacks, ProcessEvent, Terminal, TerminalConfig, TerminalError, TerminalProvider,
};

fn terminal(cwd: &Path) -> Terminal {
    let config = TerminalConfig {
        terminate_grace_ms: 500,
        ..TerminalConfig::default()
    };
    Terminal::new(1, TerminalProvider::DetachedSubprocess, cwd, config)
}

/// Callbacks recording every invocation as a readable string.
fn recording_callbacks() -> (CommandCallbacks, Arc<Mutex<Vec<String>>>) {
    let log = Arc::new(Mutex::new(Vec::new()));
    let (a, b, c, d) = (log.clone(), log.clone(), log.clone(), log.clone());
    let callbacks = CommandCallbacks::new(
        move |line| a.lock().unwrap().push(format!("line:{}", line)),
        move |output| b.lock().unwrap().push(format!("completed:{:?}", output)),
        move |pid| c.lock().unwrap().push(format!("started:{}", pid.is_some())),
        move |exit| d.lock().unwrap().push(format!("complete:{:?}", exit.exit_code)),
    );
    (callbacks, log)
}

#[tokio::test]
async fn test_echo_hello_event_order() {
    let dir = tempfile::tempdir().unwrap();
    let terminal = terminal(dir.path());
    let (callbacks, log) = recording_callbacks();

    let handle = terminal.run_command("echo hello", callbacks).unwrap();
    let mut events = handle.subscribe();

    let outcome = tokio::time::timeout(Duration::from_secs(10), &handle)
        .await
        .expect("command settles")
        .unwrap();
    assert!(outcome.is_success());
    assert_eq!(outcome.exit.unwrap().exit_code, Some(0));

    assert_eq!(
        *log.lock().unwrap(),
        vec![
            "started:true".to_string(),
            "line:hello".to_string(),
            "completed:Some(\"hello\\n\")".to_string(),
            "complete:Some(0)".to_string(),
        ]
    );

    // The subscription may have missed `shell_execution_started`, but what it
    // saw must end with the fixed tail.
    let mut kinds = Vec::new();
    while let Ok(event) = events.try_recv() {
        kinds.push(event.kind());
    }
    assert!(kinds.ends_with(&["completed", "shell_execution_complete", "continue"]));

    assert_eq!(handle.get_unretrieved_output(), "hello");
    assert_eq!(handle.get_unretrieved_output(), "");
    assert!(!terminal.is_busy());
    assert!(!terminal.is_closed());
}

#[tokio::test]
async fn test_stderr_and_exit_code() {
    let dir = tempfile::tempdir().unwrap();
    let terminal = terminal(dir.path());

    let handle = terminal
        .run_command("echo oops >&2; exit 3", CommandCallbacks::noop())
        .unwrap();
    let outcome = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .unwrap()
        .unwrap();
    assert_eq!(outcome.exit.as_ref().and_then(|e| e.exit_code), Some(3));
    assert!(!outcome.is_success());
    assert_eq!(terminal.get_unretrieved_output(), "oops");
}

#[tokio::test]
async fn test_missing_cwd_rejects_without_starting() {
    let dir = tempfile::tempdir().unwrap();
    let missing = dir.path().join("does-not-exist");
    let terminal = terminal(&missing);
    let (callbacks, log) = recording_callbacks();

    let handle = terminal.run_command("echo hello", callbacks).unwrap();
    let mut events = handle.subscribe();
    let err = tokio::time::timeout(Duration::from_secs(10), handle.wait())
        .await
        .unwrap()
        .unwrap_err();
    assert!(matches!(err, TerminalError::Spawn { .. }));
    assert!(err.to_string().contains("working directory does not exist"));

    assert!(log.lock().unwrap().is_empty());
    while let Ok(event) = events.try_recv() {
        assert!(matches!(event, ProcessEvent::Error(_)), "unexpected {:?}", event);
    }
    assert!(!terminal.is_busy());
}

#[tokio::test]
async fn test_abort_during_sleep() {
    let dir = tempfile::tempdir().unwrap();
    let terminal = terminal(dir.path());
    let exits = Arc::new(Mutex::new(Vec::new()));
    let sink = exits.clone();
    let callbacks = CommandCallbacks::new(
        |_| {},
        |_| {},
        |_| {},
        move |exit| sink.lock().unwrap().push(exit.clone()),
    );

    let handle = terminal.run_command("sleep 30", callbacks).unwrap();
    tokio::time::sleep(Duration::from_millis(10)).await;
    assert!(handle.abort());
    assert!(!handle.abort());

    let outcome = tokio::time::timeout(Duration::from_secs(10), &handle)
        .await
        .expect("abort settles")
        .unwrap();
    assert!(outcome.aborted);

    let exits = exits.lock().unwrap();
    assert_eq!(exits.len(), 1);
    assert!(exits[0].is_abnormal());
}

#[tokio::test]
async fn test_continue_in_background_keeps_running() {
    let dir = tempfile::tempdir().unwrap();
    let terminal = terminal(dir.path());

    let handle = terminal
        .run_command("sleep 0.3; echo late", CommandCallbacks::noop())
        .unwrap();
    tokio::time::sleep(Duration::from_millis(20)).await;
    assert!(handle.continue_in_background());

    let outcome = handle.wait().await.unwrap();
    assert!(outcome.continued);
    assert!(outcome.exit.is_none());
    assert!(terminal.is_running());

    for _ in 0..100 {
        if handle.is_finished() {
            break;
        }
        tokio::time::sleep(Duration::from_millis(50)).await;
    }
    assert!(handle.is_finished());
    assert_eq!(handle.exit_details().and_then(|e| e.exit_code), Some(0));
    assert_eq!(handle.get_unretrieved_output(), "late");
}

#[tokio::test]
async fn test_many_lines_reach_a_late_reader() {
    let dir = tempfile::tempdir().unwrap();
    let terminal = terminal(dir.path());

    let handle = terminal
        .run_command("seq 1 3000", CommandCallbacks::noop())
        .unwrap();
    let mut events = handle.subscribe();
    tokio::time::timeout(Duration::from_secs(10), &handle)
        .await
        .expect("command settles")
        .unwrap();

    let mut lines = 0;
    while let Some(event) = events.recv().await {
        if matches!(event, ProcessEvent::Line(_)) {
            lines += 1;
        }
    }
    assert_eq!(lines, 3000);
}

#[tokio::test]
async fn test_trailing_symbols_survive_retrieval() {
    let dir = tempfile::tempdir().unwrap();
    let terminal = terminal(dir.path());

    let handle = terminal
        .run_command("echo 'progress 50%'; echo 'cost: 5$'", CommandCallbacks::noop())
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), &handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(handle.get_unretrieved_output(), "progress 50%\ncost: 5$");
}

#[tokio::test]
async fn test_stdout_and_stderr_are_framed_separately() {
    let dir = tempfile::tempdir().unwrap();
    let terminal = terminal(dir.path());
    let lines = Arc::new(Mutex::new(Vec::new()));
    let sink = lines.clone();
    let callbacks = CommandCallbacks::new(
        move |line| sink.lock().unwrap().push(line.to_string()),
        |_| {},
        |_| {},
        |_| {},
    );

    let handle = terminal
        .run_command(
            "printf part; sleep 0.2; echo err >&2; sleep 0.2; echo ial",
            callbacks,
        )
        .unwrap();
    tokio::time::timeout(Duration::from_secs(10), &handle)
        .await
        .unwrap()
        .unwrap();
    assert_eq!(*lines.lock().unwrap(), vec!["err", "partial"]);
}
