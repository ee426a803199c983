use std::sync::LazyLock;

use regex::Regex;

const TRUNCATION_MARKER: &str = "... (output truncated) ...";

// CSI sequences, OSC sequences (BEL or ST terminated), then lone ESC-Fe.
static ANSI: LazyLock<Regex> = LazyLock::new(|| {
    Regex::new(r"\x1b\[[0-?]*[ -/]*[@-~]|\x1b\][^\x07\x1b]*(?:\x07|\x1b\\)|\x1b[@-Z\\-_]")
        .expect("ANSI escape regex is valid")
});

/// Remove terminal escape sequences from `text`.
pub fn strip_ansi(text: &str) -> String {
    ANSI.replace_all(text, "").into_owned()
}

/// Splits a byte stream into lines.
///
/// Bytes after the last `\n` stay buffered until the next newline or
/// [`LineBuffer::finish`]. Splitting happens on raw bytes so multi-byte
/// characters that straddle chunk boundaries survive.
#[derive(Debug, Default)]
pub struct LineBuffer {
    partial: Vec<u8>,
}

impl LineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    /// Append a chunk and return every line it completes.
    pub fn push(&mut self, chunk: &[u8]) -> Vec<String> {
        self.partial.extend_from_slice(chunk);
        let mut lines = Vec::new();
        while let Some(pos) = self.partial.iter().position(|b| *b == b'\n') {
            let rest = self.partial.split_off(pos + 1);
            let mut line = std::mem::replace(&mut self.partial, rest);
            line.pop();
            lines.push(clean_line(&line));
        }
        lines
    }

    /// Flush the trailing partial line, if any.
    pub fn finish(&mut self) -> Option<String> {
        if self.partial.is_empty() {
            return None;
        }
        let line = std::mem::take(&mut self.partial);
        Some(clean_line(&line))
    }

    pub fn has_partial(&self) -> bool {
        !self.partial.is_empty()
    }
}

fn clean_line(raw: &[u8]) -> String {
    let raw = raw.strip_suffix(b"\r").unwrap_or(raw);
    strip_ansi(&String::from_utf8_lossy(raw))
}

/// Drop trailing whitespace and a trailing prompt character (`%`, `$`, `#`,
/// `>`) from the last line.
///
/// Shells print their prompt right after a command's output; without this the
/// prompt leaks into captured output.
pub fn trim_prompt_artifacts(output: &str) -> String {
    let trimmed = output.trim_end();
    let (head, last) = match trimmed.rfind('\n') {
        Some(idx) => (&trimmed[..=idx], &trimmed[idx + 1..]),
        None => ("", trimmed),
    };
    let last = last
        .strip_suffix(['%', '$', '#', '>'])
        .unwrap_or(last);
    format!("{}{}", head, last).trim_end().to_string()
}

/// Keep the first and last `limit / 2` lines of `output` when it has more
/// than `limit` lines, joined by a truncation marker line.
pub fn truncate_lines(output: &str, limit: usize) -> String {
    let lines: Vec<&str> = output.lines().collect();
    if lines.len() <= limit {
        return output.to_string();
    }
    let half = limit / 2;
    let mut kept: Vec<&str> = Vec::with_capacity(half * 2 + 1);
    kept.extend_from_slice(&lines[..half]);
    kept.push(TRUNCATION_MARKER);
    kept.extend_from_slice(&lines[lines.len() - half..]);
    kept.join("\n")
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_push_splits_complete_lines() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"hello\nworld\n"), vec!["hello", "world"]);
        assert!(!buf.has_partial());
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_partial_line_is_held_until_newline() {
        let mut buf = LineBuffer::new();
        assert!(buf.push(b"hel").is_empty());
        assert!(buf.has_partial());
        assert_eq!(buf.push(b"lo\nwor"), vec!["hello"]);
        assert_eq!(buf.finish(), Some("wor".to_string()));
        assert_eq!(buf.finish(), None);
    }

    #[test]
    fn test_crlf_and_ansi_stripped() {
        let mut buf = LineBuffer::new();
        let lines = buf.push(b"\x1b[32mok\x1b[0m\r\n\x1b]633;A\x07prompt\n");
        assert_eq!(lines, vec!["ok", "prompt"]);
    }

    #[test]
    fn test_multibyte_split_across_chunks() {
        let mut buf = LineBuffer::new();
        let text = "caf\u{e9}\n".as_bytes();
        assert!(buf.push(&text[..4]).is_empty());
        assert_eq!(buf.push(&text[4..]), vec!["caf\u{e9}"]);
    }

    #[test]
    fn test_empty_lines_preserved() {
        let mut buf = LineBuffer::new();
        assert_eq!(buf.push(b"a\n\nb\n"), vec!["a", "", "b"]);
    }

    #[test]
    fn test_strip_ansi_leaves_plain_text() {
        assert_eq!(strip_ansi("plain text"), "plain text");
        assert_eq!(strip_ansi("\x1b[1;31merror\x1b[0m: boom"), "error: boom");
        assert_eq!(strip_ansi("\x1b]0;title\x1b\\after"), "after");
    }

    #[test]
    fn test_trim_prompt_artifacts() {
        assert_eq!(trim_prompt_artifacts("output\nuser@host:~$ "), "output\nuser@host:~");
        assert_eq!(trim_prompt_artifacts("done\n% "), "done");
        assert_eq!(trim_prompt_artifacts("line one\nline two"), "line one\nline two");
        assert_eq!(trim_prompt_artifacts(">"), "");
        assert_eq!(trim_prompt_artifacts(""), "");
    }

    #[test]
    fn test_trim_prompt_only_touches_last_line() {
        assert_eq!(trim_prompt_artifacts("a$\nb"), "a$\nb");
    }

    #[test]
    fn test_truncate_under_limit_unchanged() {
        assert_eq!(truncate_lines("a\nb\nc", 3), "a\nb\nc");
    }

    #[test]
    fn test_truncate_keeps_head_and_tail() {
        let output: Vec<String> = (1..=10).map(|i| format!("line {}", i)).collect();
        let truncated = truncate_lines(&output.join("\n"), 4);
        assert_eq!(
            truncated,
            "line 1\nline 2\n... (output truncated) ...\nline 9\nline 10"
        );
    }
}
