mod exit;
mod status;
mod types;

pub use exit::ExitDetails;
pub use status::CommandStatus;
pub use types::{ProcessStatus, TerminalProvider};
