use serde::{Deserialize, Serialize};

/// How a command invocation terminated.
///
/// Produced exactly once per invocation by whichever backend observed the
/// termination. Every field is optional because some backends (a host shell
/// without integration, a process killed before it reported anything) only
/// know part of the story.
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct ExitDetails {
    #[serde(skip_serializing_if = "Option::is_none")]
    pub exit_code: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal: Option<i32>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub signal_name: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub core_dump_possible: Option<bool>,
}

impl ExitDetails {
    /// A normal exit with the given status code.
    pub fn from_code(code: i32) -> Self {
        Self {
            exit_code: Some(code),
            ..Self::default()
        }
    }

    /// Termination by signal.
    pub fn from_signal(signal: i32, signal_name: Option<String>, core_dump: bool) -> Self {
        Self {
            exit_code: None,
            signal: Some(signal),
            signal_name,
            core_dump_possible: Some(core_dump),
        }
    }

    /// Nothing is known about how the command ended.
    pub fn unknown() -> Self {
        Self::default()
    }

    /// Exit code 0 and no signal.
    pub fn is_success(&self) -> bool {
        self.exit_code == Some(0) && self.signal.is_none()
    }

    /// Signalled, or exited without a zero status.
    pub fn is_abnormal(&self) -> bool {
        !self.is_success()
    }
}

impl std::fmt::Display for ExitDetails {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match (self.exit_code, self.signal, self.signal_name.as_deref()) {
            (_, Some(_), Some(name)) => write!(f, "killed by {}", name),
            (_, Some(sig), None) => write!(f, "killed by signal {}", sig),
            (Some(code), None, _) => write!(f, "exit code {}", code),
            (None, None, _) => write!(f, "unknown exit status"),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_success_classification() {
        assert!(ExitDetails::from_code(0).is_success());
        assert!(ExitDetails::from_code(1).is_abnormal());
        assert!(ExitDetails::unknown().is_abnormal());
        assert!(ExitDetails::from_signal(15, Some("SIGTERM".to_string()), false).is_abnormal());
    }

    #[test]
    fn test_optional_fields_omitted() {
        let json = serde_json::to_string(&ExitDetails::from_code(0)).unwrap();
        assert_eq!(json, r#"{"exit_code":0}"#);

        let json = serde_json::to_string(&ExitDetails::unknown()).unwrap();
        assert_eq!(json, "{}");
    }

    #[test]
    fn test_signal_wire_format() {
        let details = ExitDetails::from_signal(9, Some("SIGKILL".to_string()), false);
        let json = serde_json::to_string(&details).unwrap();
        assert!(json.contains(r#""signal":9"#));
        assert!(json.contains(r#""signal_name":"SIGKILL""#));
        assert!(json.contains(r#""core_dump_possible":false"#));
        assert!(!json.contains("exit_code"));

        let parsed: ExitDetails = serde_json::from_str(&json).unwrap();
        assert_eq!(parsed, details);
    }

    #[test]
    fn test_display() {
        assert_eq!(ExitDetails::from_code(2).to_string(), "exit code 2");
        assert_eq!(
            ExitDetails::from_signal(15, Some("SIGTERM".to_string()), false).to_string(),
            "killed by SIGTERM"
        );
        assert_eq!(
            ExitDetails::from_signal(15, None, false).to_string(),
            "killed by signal 15"
        );
        assert_eq!(ExitDetails::unknown().to_string(), "unknown exit status");
    }
}
