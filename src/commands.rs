//! Command protocol spoken by front-ends.
//!
//! Requests and responses are JSON objects tagged by `type`:
//!
//! ```json
//! {"type": "start_deletion", "target_ids": ["123", "456"]}
//! {"type": "ack"}
//! {"type": "error", "message": "No scan results. Run a scan first."}
//! ```

use serde::{Deserialize, Serialize};

use crate::events::StateUpdate;

#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Command {
    /// Hand over the credential used for remote calls.
    CaptureCredential { credential: String },
    GetState,
    StartScan,
    /// Delete in the given targets, or the previous selection when empty.
    StartDeletion {
        #[serde(default)]
        target_ids: Vec<String>,
    },
    Pause,
    Resume,
    Cancel,
    /// Resume an interrupted run, repeat the last selection, or rescan.
    Retry,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum Response {
    State(StateUpdate),
    Ack,
    Error { message: String },
}

impl Response {
    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn is_ok(&self) -> bool {
        !matches!(self, Self::Error { .. })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::job::JobProgress;

    #[test]
    fn test_parse_commands() {
        let command: Command =
            serde_json::from_str(r#"{"type":"start_deletion","target_ids":["a","b"]}"#).unwrap();
        assert_eq!(
            command,
            Command::StartDeletion {
                target_ids: vec!["a".into(), "b".into()]
            }
        );

        let command: Command = serde_json::from_str(r#"{"type":"start_deletion"}"#).unwrap();
        assert_eq!(command, Command::StartDeletion { target_ids: vec![] });

        let command: Command =
            serde_json::from_str(r#"{"type":"capture_credential","credential":"abc"}"#).unwrap();
        assert_eq!(
            command,
            Command::CaptureCredential {
                credential: "abc".into()
            }
        );

        assert!(serde_json::from_str::<Command>(r#"{"type":"explode"}"#).is_err());
    }

    #[test]
    fn test_response_shapes() {
        assert_eq!(
            serde_json::to_value(Response::Ack).unwrap(),
            serde_json::json!({"type": "ack"})
        );
        assert_eq!(
            serde_json::to_value(Response::error("nope")).unwrap(),
            serde_json::json!({"type": "error", "message": "nope"})
        );

        let state = Response::State(StateUpdate {
            state: JobProgress::default(),
            logs: vec![],
        });
        let json = serde_json::to_value(&state).unwrap();
        assert_eq!(json["type"], "state");
        assert_eq!(json["state"]["phase"], "idle");
        assert!(state.is_ok());
        assert!(!Response::error("x").is_ok());
    }
}
