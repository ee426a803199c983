use std::os::unix::process::ExitStatusExt;
use std::process::ExitStatus;

use nix::sys::signal::Signal;

use termexec_protocol::ExitDetails;

/// Convert an OS exit status into [`ExitDetails`].
///
/// Signal exits carry the signal number, its `SIG*` name when known, and
/// whether a core dump was written.
pub fn exit_details_from_status(status: ExitStatus) -> ExitDetails {
    if let Some(code) = status.code() {
        return ExitDetails::from_code(code);
    }
    match status.signal() {
        Some(signal) => ExitDetails::from_signal(
            signal,
            signal_name(signal),
            status.core_dumped(),
        ),
        None => ExitDetails::unknown(),
    }
}

pub(crate) fn signal_name(signal: i32) -> Option<String> {
    Signal::try_from(signal).ok().map(|s| s.as_str().to_string())
}
