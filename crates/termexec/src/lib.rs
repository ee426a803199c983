pub mod backend;
pub mod cancellation;
pub mod config;
pub mod errors;
pub mod logging;
pub mod paths;
pub mod process;
pub mod terminal;

#[cfg(test)]
mod test_support;

// Primary re-exports
pub use cancellation::{CancelReport, CancellableTask, CancellationRegistry, TokenTask};
pub use config::{TerminalConfig, load_config};
pub use errors::{CancelError, TerminalError};
pub use process::{
    CommandCallbacks, ProcessEvent, ProcessHandle, ProcessOutcome, ProcessState, TerminalProcess,
};
pub use terminal::{StatusReporter, Terminal, TerminalId, TerminalManager};
pub use termexec_protocol::{CommandStatus, ExitDetails, ProcessStatus, TerminalProvider};
