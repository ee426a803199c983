//! Shell-integration markers for commands typed into an interactive shell.
//!
//! Commands are wrapped so the shell prints an OSC 633 `C` sequence right
//! before the command output and an OSC 633 `D;<status>` sequence right after.
//! [`MarkerParser`] recovers the command's own output and exit code from the
//! surrounding prompt noise.

use termexec_protocol::ExitDetails;

const START_MARKER: &[u8] = b"\x1b]633;C\x07";
const END_PREFIX: &[u8] = b"\x1b]633;D";
const BEL: u8 = 0x07;

/// Wrap `command` so its output is bracketed by integration markers.
///
/// The command runs through `eval` so comments, trailing `&` and multi-line
/// input cannot swallow the end marker. The leading space keeps the wrapper
/// out of shell history where `HISTCONTROL=ignorespace` is set.
pub fn wrap_command(command: &str) -> String {
    format!(
        " printf '\\033]633;C\\007'; eval {}; printf '\\033]633;D;%s\\007' \"$?\"\n",
        shell_quote(command)
    )
}

fn shell_quote(s: &str) -> String {
    format!("'{}'", s.replace('\'', r"'\''"))
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Phase {
    AwaitingStart,
    Streaming,
    Done,
}

/// Result of feeding one chunk to the parser.
#[derive(Debug, Default, PartialEq, Eq)]
pub struct ParsedChunk {
    /// Command output contained in this chunk.
    pub output: Vec<u8>,
    /// Set when the chunk contained the end marker.
    pub exit: Option<ExitDetails>,
}

/// Incremental parser for marker-delimited command output.
///
/// Markers may be split across chunk boundaries; the parser holds back just
/// enough bytes to recognise them.
#[derive(Debug)]
pub struct MarkerParser {
    phase: Phase,
    pending: Vec<u8>,
}

impl Default for MarkerParser {
    fn default() -> Self {
        Self::new()
    }
}

impl MarkerParser {
    pub fn new() -> Self {
        Self {
            phase: Phase::AwaitingStart,
            pending: Vec::new(),
        }
    }

    pub fn is_started(&self) -> bool {
        self.phase != Phase::AwaitingStart
    }

    pub fn is_done(&self) -> bool {
        self.phase == Phase::Done
    }

    pub fn feed(&mut self, chunk: &[u8]) -> ParsedChunk {
        let mut parsed = ParsedChunk::default();
        if self.phase == Phase::Done {
            return parsed;
        }
        self.pending.extend_from_slice(chunk);

        if self.phase == Phase::AwaitingStart {
            match find(&self.pending, START_MARKER) {
                Some(pos) => {
                    self.pending.drain(..pos + START_MARKER.len());
                    self.phase = Phase::Streaming;
                }
                None => {
                    // Prompt noise before the command; keep only a possible marker prefix.
                    let keep = partial_suffix_len(&self.pending, START_MARKER);
                    let cut = self.pending.len() - keep;
                    self.pending.drain(..cut);
                    return parsed;
                }
            }
        }

        match find(&self.pending, END_PREFIX) {
            Some(pos) => {
                let after = pos + END_PREFIX.len();
                let Some(bel) = self.pending[after..].iter().position(|b| *b == BEL) else {
                    // End marker seen but its status has not fully arrived.
                    parsed.output = self.pending.drain(..pos).collect();
                    return parsed;
                };
                parsed.output = self.pending[..pos].to_vec();
                let params = &self.pending[after..after + bel];
                parsed.exit = Some(parse_exit(params));
                self.pending.clear();
                self.phase = Phase::Done;
            }
            None => {
                let keep = partial_suffix_len(&self.pending, END_PREFIX);
                let cut = self.pending.len() - keep;
                parsed.output = self.pending.drain(..cut).collect();
            }
        }
        parsed
    }
}

fn parse_exit(params: &[u8]) -> ExitDetails {
    let params = String::from_utf8_lossy(params);
    params
        .strip_prefix(';')
        .and_then(|code| code.trim().parse::<i32>().ok())
        .map(ExitDetails::from_code)
        .unwrap_or_else(ExitDetails::unknown)
}

fn find(haystack: &[u8], needle: &[u8]) -> Option<usize> {
    haystack.windows(needle.len()).position(|w| w == needle)
}

/// Length of the longest suffix of `haystack` that is a proper prefix of `needle`.
fn partial_suffix_len(haystack: &[u8], needle: &[u8]) -> usize {
    let max = needle.len().saturating_sub(1).min(haystack.len());
    (1..=max)
        .rev()
        .find(|&n| haystack[haystack.len() - n..] == needle[..n])
        .unwrap_or(0)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn feed_all(parser: &mut MarkerParser, chunks: &[&[u8]]) -> (Vec<u8>, Option<ExitDetails>) {
        let mut output = Vec::new();
        let mut exit = None;
        for chunk in chunks {
            let parsed = parser.feed(chunk);
            output.extend(parsed.output);
            if parsed.exit.is_some() {
                exit = parsed.exit;
            }
        }
        (output, exit)
    }

    #[test]
    fn test_wrap_command_quotes() {
        let wrapped = wrap_command("echo 'hi' # note");
        assert!(wrapped.starts_with(" printf '\\033]633;C\\007'; eval "));
        assert!(wrapped.contains(r"'echo '\''hi'\'' # note'"));
        assert!(wrapped.ends_with("\"$?\"\n"));
    }

    #[test]
    fn test_extracts_output_between_markers() {
        let mut parser = MarkerParser::new();
        let (output, exit) = feed_all(
            &mut parser,
            &[b"user$ echo hi\r\n\x1b]633;C\x07hi\r\n\x1b]633;D;0\x07user$ "],
        );
        assert_eq!(output, b"hi\r\n");
        assert_eq!(exit, Some(ExitDetails::from_code(0)));
        assert!(parser.is_done());
    }

    #[test]
    fn test_markers_split_across_chunks() {
        let mut parser = MarkerParser::new();
        let (output, exit) = feed_all(
            &mut parser,
            &[
                b"prompt \x1b]63",
                b"3;C\x07first\nsec",
                b"ond\n\x1b]633",
                b";D;",
                b"42\x07trailing prompt",
            ],
        );
        assert_eq!(output, b"first\nsecond\n");
        assert_eq!(exit, Some(ExitDetails::from_code(42)));
    }

    #[test]
    fn test_no_output_before_start_marker() {
        let mut parser = MarkerParser::new();
        let parsed = parser.feed(b"just a prompt $ ");
        assert!(parsed.output.is_empty());
        assert!(parsed.exit.is_none());
        assert!(!parser.is_started());
    }

    #[test]
    fn test_end_marker_without_status_is_unknown() {
        let mut parser = MarkerParser::new();
        let (_, exit) = feed_all(&mut parser, &[b"\x1b]633;C\x07x\n\x1b]633;D\x07"]);
        assert_eq!(exit, Some(ExitDetails::unknown()));
    }

    #[test]
    fn test_feed_after_done_is_ignored() {
        let mut parser = MarkerParser::new();
        feed_all(&mut parser, &[b"\x1b]633;C\x07\x1b]633;D;1\x07"]);
        assert_eq!(parser.feed(b"more output"), ParsedChunk::default());
    }

    #[test]
    fn test_partial_suffix_len() {
        assert_eq!(partial_suffix_len(b"abc\x1b]6", START_MARKER), 3);
        assert_eq!(partial_suffix_len(b"abc", START_MARKER), 0);
        assert_eq!(partial_suffix_len(b"", START_MARKER), 0);
    }
}
