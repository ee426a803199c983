//! Scripted backend for driving processes deterministically in tests.

use std::collections::VecDeque;
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

use bytes::Bytes;
use tokio::sync::{mpsc, oneshot};

use termexec_protocol::{ExitDetails, TerminalProvider};

use crate::backend::{OutputStream, ProcessBackend, SpawnRequest, SpawnedCommand, Terminator};
use crate::errors::TerminalError;
use crate::process::ProcessEvent;

type Shared<T> = Arc<Mutex<Option<T>>>;

enum Script {
    Command(MockWiring),
    Fail(String),
}

struct MockWiring {
    stream: Option<OutputStream>,
    exit: Option<oneshot::Receiver<ExitDetails>>,
    raw: Option<mpsc::UnboundedReceiver<Bytes>>,
    output_tx: Shared<mpsc::Sender<Bytes>>,
    exit_tx: Shared<oneshot::Sender<ExitDetails>>,
    terminations: Arc<AtomicUsize>,
    exit_on_terminate: Option<ExitDetails>,
}

/// Test-side controls for one scripted command.
pub(crate) struct MockCommand {
    output_tx: Shared<mpsc::Sender<Bytes>>,
    exit_tx: Shared<oneshot::Sender<ExitDetails>>,
    raw_tx: Option<mpsc::UnboundedSender<Bytes>>,
    terminations: Arc<AtomicUsize>,
}

impl MockCommand {
    pub(crate) async fn send(&self, text: &str) {
        let tx = self.output_tx.lock().unwrap().clone();
        if let Some(tx) = tx {
            tx.send(Bytes::copy_from_slice(text.as_bytes())).await.unwrap();
        }
    }

    pub(crate) fn send_raw(&self, text: &str) {
        if let Some(tx) = &self.raw_tx {
            tx.send(Bytes::copy_from_slice(text.as_bytes())).unwrap();
        }
    }

    pub(crate) fn exit(&self, details: ExitDetails) {
        if let Some(tx) = self.exit_tx.lock().unwrap().take() {
            let _ = tx.send(details);
        }
    }

    /// Close the output stream.
    pub(crate) fn close(&self) {
        self.output_tx.lock().unwrap().take();
    }

    pub(crate) fn finish(&self, code: i32) {
        self.exit(ExitDetails::from_code(code));
        self.close();
    }

    pub(crate) fn terminations(&self) -> usize {
        self.terminations.load(Ordering::SeqCst)
    }
}

struct MockTerminator {
    terminations: Arc<AtomicUsize>,
    exit_tx: Shared<oneshot::Sender<ExitDetails>>,
    output_tx: Shared<mpsc::Sender<Bytes>>,
    exit_on_terminate: Option<ExitDetails>,
}

impl Terminator for MockTerminator {
    fn terminate(&self) -> Result<(), TerminalError> {
        self.terminations.fetch_add(1, Ordering::SeqCst);
        if let Some(details) = &self.exit_on_terminate {
            if let Some(tx) = self.exit_tx.lock().unwrap().take() {
                let _ = tx.send(details.clone());
            }
            self.output_tx.lock().unwrap().take();
        }
        Ok(())
    }
}

/// Backend whose commands are scripted ahead of time. Each `spawn` consumes
/// the next script; with none queued, spawn fails.
pub(crate) struct MockBackend {
    provider: TerminalProvider,
    scripts: Mutex<VecDeque<Script>>,
    requests: Mutex<Vec<SpawnRequest>>,
    closed: AtomicBool,
}

impl MockBackend {
    pub(crate) fn new() -> Arc<Self> {
        Self::with_provider(TerminalProvider::DetachedSubprocess)
    }

    pub(crate) fn with_provider(provider: TerminalProvider) -> Arc<Self> {
        Arc::new(Self {
            provider,
            scripts: Mutex::new(VecDeque::new()),
            requests: Mutex::new(Vec::new()),
            closed: AtomicBool::new(false),
        })
    }

    /// Next command gets a line stream and an exit channel.
    pub(crate) fn expect_command(&self) -> MockCommand {
        self.script(true, None)
    }

    /// Like `expect_command`, but terminating it exits with `details` and
    /// closes the stream.
    pub(crate) fn expect_command_exiting_on_terminate(&self, details: ExitDetails) -> MockCommand {
        self.script(true, Some(details))
    }

    /// Next command has no stream and no exit channel, only a raw capture.
    pub(crate) fn expect_unframed_command(&self) -> MockCommand {
        self.script(false, None)
    }

    pub(crate) fn fail_next(&self, reason: &str) {
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::Fail(reason.to_string()));
    }

    pub(crate) fn requests(&self) -> Vec<SpawnRequest> {
        self.requests.lock().unwrap().clone()
    }

    pub(crate) fn set_closed(&self) {
        self.closed.store(true, Ordering::SeqCst);
    }

    fn script(&self, framed: bool, exit_on_terminate: Option<ExitDetails>) -> MockCommand {
        let (output_tx, stream) = OutputStream::channel();
        let (exit_tx, exit_rx) = oneshot::channel();
        let (raw_tx, raw_rx) = mpsc::unbounded_channel();
        let output_tx = Arc::new(Mutex::new(Some(output_tx)));
        let exit_tx = Arc::new(Mutex::new(Some(exit_tx)));
        let terminations = Arc::new(AtomicUsize::new(0));

        let wiring = MockWiring {
            stream: framed.then_some(stream),
            exit: framed.then_some(exit_rx),
            raw: (!framed).then_some(raw_rx),
            output_tx: output_tx.clone(),
            exit_tx: exit_tx.clone(),
            terminations: terminations.clone(),
            exit_on_terminate,
        };
        self.scripts
            .lock()
            .unwrap()
            .push_back(Script::Command(wiring));

        MockCommand {
            output_tx,
            exit_tx,
            raw_tx: (!framed).then_some(raw_tx),
            terminations,
        }
    }
}

impl ProcessBackend for MockBackend {
    fn provider(&self) -> TerminalProvider {
        self.provider
    }

    fn spawn(&self, request: &SpawnRequest) -> Result<SpawnedCommand, TerminalError> {
        self.requests.lock().unwrap().push(request.clone());
        let script = self.scripts.lock().unwrap().pop_front();
        let wiring = match script {
            Some(Script::Command(wiring)) => wiring,
            Some(Script::Fail(reason)) => {
                return Err(TerminalError::spawn(&request.command, reason));
            }
            None => return Err(TerminalError::spawn(&request.command, "no scripted command")),
        };
        Ok(SpawnedCommand {
            pid: Some(4242),
            stream: wiring.stream,
            exit: wiring.exit,
            raw_capture: wiring.raw,
            terminator: Box::new(MockTerminator {
                terminations: wiring.terminations,
                exit_tx: wiring.exit_tx,
                output_tx: wiring.output_tx,
                exit_on_terminate: wiring.exit_on_terminate,
            }),
        })
    }

    fn is_externally_closed(&self) -> bool {
        self.closed.load(Ordering::SeqCst)
    }

    fn close(&self) {
        self.set_closed();
    }
}

/// Everything currently buffered on an event subscription.
pub(crate) fn drain_events(rx: &mut mpsc::UnboundedReceiver<ProcessEvent>) -> Vec<ProcessEvent> {
    let mut events = Vec::new();
    while let Ok(event) = rx.try_recv() {
        events.push(event);
    }
    events
}

pub(crate) fn kinds(events: &[ProcessEvent]) -> Vec<&'static str> {
    events.iter().map(ProcessEvent::kind).collect()
}
