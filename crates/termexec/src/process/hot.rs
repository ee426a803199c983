use std::time::Duration;

use tokio::time::Instant;

use crate::config::TerminalConfig;

/// Output that suggests a long quiet stretch is coming (a compiler or bundler
/// thinking) rather than the command being done.
const COMPILING_MARKERS: &[&str] = &[
    "compiling",
    "building",
    "bundling",
    "transpiling",
    "generating",
    "starting",
];

/// Words that cancel a compiling marker in the same chunk.
const MARKER_NULLIFIERS: &[&str] = &[
    "compiled",
    "success",
    "finish",
    "complete",
    "succeed",
    "done",
    "end",
    "stop",
    "exit",
    "terminate",
    "error",
    "fail",
];

pub(crate) fn looks_like_compiling(chunk: &str) -> bool {
    let lower = chunk.to_lowercase();
    COMPILING_MARKERS.iter().any(|m| lower.contains(m))
        && !MARKER_NULLIFIERS.iter().any(|n| lower.contains(n))
}

/// Tracks when a running process stops being "hot".
///
/// Every output chunk re-arms the deadline. The interval is the normal hot
/// timeout, or the longer compiling timeout when the chunk looks like build
/// progress.
#[derive(Debug)]
pub(crate) struct HotTracker {
    normal: Duration,
    compiling: Duration,
    deadline: Option<Instant>,
}

impl HotTracker {
    pub(crate) fn new(config: &TerminalConfig) -> Self {
        Self {
            normal: config.hot_timeout(),
            compiling: config.hot_compiling_timeout(),
            deadline: None,
        }
    }

    /// Record output and return the new deadline.
    pub(crate) fn on_output(&mut self, chunk: &str) -> Instant {
        let interval = if looks_like_compiling(chunk) {
            self.compiling
        } else {
            self.normal
        };
        let deadline = Instant::now() + interval;
        self.deadline = Some(deadline);
        deadline
    }

    /// Arm the timer without output, as happens right after start.
    pub(crate) fn arm(&mut self) -> Instant {
        let deadline = Instant::now() + self.normal;
        self.deadline = Some(deadline);
        deadline
    }

    pub(crate) fn deadline(&self) -> Option<Instant> {
        self.deadline
    }

    pub(crate) fn clear(&mut self) {
        self.deadline = None;
    }
}
