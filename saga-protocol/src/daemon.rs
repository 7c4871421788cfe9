//! Daemon socket protocol.
//!
//! Every exchange is single-shot: the client connects, writes one JSON
//! request, half-closes, and reads the reply until EOF. There is no framing
//! beyond the connection itself.

use serde::{Deserialize, Serialize};

/// A request accepted by the bard daemon.
///
/// `create_game`, `player_action` and `reset_conversation` are served by the
/// game role; `validate` by the jury role; `ping` by both.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum DaemonRequest {
    Ping,
    CreateGame {
        prompt: String,
        #[serde(default)]
        user_id: String,
    },
    PlayerAction {
        game_id: String,
        action: String,
        #[serde(default)]
        game_state: String,
        #[serde(default)]
        game_world: String,
        #[serde(default)]
        continue_conversation: bool,
    },
    ResetConversation,
    Validate {
        statement: String,
    },
}

/// Model lifecycle phase reported by `ping`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum ModelPhase {
    Loading,
    Ready,
    Error,
}

/// Reply to `ping`. Always answered, even while the model is loading.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DaemonStatus {
    pub status: ModelPhase,
    pub model_loaded: bool,
    pub model_loading: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
}

impl DaemonStatus {
    pub fn loading() -> Self {
        Self {
            status: ModelPhase::Loading,
            model_loaded: false,
            model_loading: true,
            error: None,
        }
    }

    pub fn ready() -> Self {
        Self {
            status: ModelPhase::Ready,
            model_loaded: true,
            model_loading: false,
            error: None,
        }
    }

    pub fn failed(message: impl Into<String>) -> Self {
        Self {
            status: ModelPhase::Error,
            model_loaded: false,
            model_loading: false,
            error: Some(message.into()),
        }
    }

    pub fn is_ready(&self) -> bool {
        self.status == ModelPhase::Ready && self.model_loaded
    }
}

/// Reply to `validate` from the jury daemon.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Verdict {
    pub valid: bool,
    pub confidence: f64,
    pub raw_response: String,
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn request_round_trips_with_type_tag() {
        let req = DaemonRequest::Validate {
            statement: "the player can move north".to_string(),
        };
        let json = serde_json::to_string(&req).unwrap();
        assert!(json.contains("\"type\":\"validate\""));

        let back: DaemonRequest = serde_json::from_str(&json).unwrap();
        match back {
            DaemonRequest::Validate { statement } => {
                assert_eq!(statement, "the player can move north");
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn player_action_defaults_optional_fields() {
        let json = r#"{"type":"player_action","game_id":"game_1_42","action":"look"}"#;
        let req: DaemonRequest = serde_json::from_str(json).unwrap();
        match req {
            DaemonRequest::PlayerAction {
                game_id,
                action,
                game_state,
                game_world,
                continue_conversation,
            } => {
                assert_eq!(game_id, "game_1_42");
                assert_eq!(action, "look");
                assert!(game_state.is_empty());
                assert!(game_world.is_empty());
                assert!(!continue_conversation);
            }
            other => panic!("unexpected request: {:?}", other),
        }
    }

    #[test]
    fn status_serializes_lowercase_phase() {
        let json = serde_json::to_string(&DaemonStatus::loading()).unwrap();
        assert!(json.contains("\"status\":\"loading\""));
        assert!(!json.contains("error"));

        let failed = serde_json::to_string(&DaemonStatus::failed("no model file")).unwrap();
        assert!(failed.contains("\"status\":\"error\""));
        assert!(failed.contains("no model file"));
    }

    #[test]
    fn ready_status_is_ready() {
        assert!(DaemonStatus::ready().is_ready());
        assert!(!DaemonStatus::loading().is_ready());
        assert!(!DaemonStatus::failed("x").is_ready());
    }
}
