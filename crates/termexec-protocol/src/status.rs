use serde::{Deserialize, Serialize};

/// Progress report for one command execution, sent across a reporting
/// boundary (UI channel, JSONL on stdout).
///
/// Each variant maps to a JSON object with `"type"` as the tag field. The
/// `execution_id` is generated by the caller so a receiver can demultiplex
/// several concurrent executions.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum CommandStatus {
    #[serde(rename = "started")]
    Started {
        execution_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        pid: Option<u32>,
        command: String,
    },

    #[serde(rename = "output")]
    Output {
        execution_id: String,
        output: String,
    },

    #[serde(rename = "exited")]
    Exited {
        execution_id: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        exit_code: Option<i32>,
    },

    /// The host terminal had no shell integration; output fidelity is degraded.
    #[serde(rename = "fallback")]
    Fallback { execution_id: String },
}

impl CommandStatus {
    pub fn execution_id(&self) -> &str {
        match self {
            CommandStatus::Started { execution_id, .. }
            | CommandStatus::Output { execution_id, .. }
            | CommandStatus::Exited { execution_id, .. }
            | CommandStatus::Fallback { execution_id } => execution_id,
        }
    }
}
