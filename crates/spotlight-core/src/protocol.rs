//! Wire format for the animation socket.
//!
//! Every message in either direction is a JSON object with a `type` field.
//! Mode-specific effect events are not listed here; effects emit them as raw
//! JSON objects through the same channel.

use serde::{Deserialize, Serialize};

use crate::errors::SessionError;
use crate::face::FaceBox;

/// Messages a client may send.
#[derive(Clone, Debug, PartialEq, Deserialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum InboundMessage {
    CheckAvailability {
        mode: String,
    },
    StartAnimation {
        #[serde(default)]
        frame: Option<String>,
        #[serde(default, rename = "startAnimation")]
        start_animation: bool,
        #[serde(default)]
        mode: Option<String>,
    },
    AnimationCompleteClient {
        mode: String,
        /// Advisory only; the server does not verify it.
        #[serde(default, rename = "winnerIndex")]
        winner_index: Option<i64>,
    },
    LeaveMode,
}

impl InboundMessage {
    pub fn parse(raw: &str) -> Result<Self, SessionError> {
        serde_json::from_str(raw).map_err(|e| SessionError::Protocol(e.to_string()))
    }

    pub fn message_type(&self) -> &'static str {
        match self {
            Self::CheckAvailability { .. } => "check_availability",
            Self::StartAnimation { .. } => "start_animation",
            Self::AnimationCompleteClient { .. } => "animation_complete_client",
            Self::LeaveMode => "leave_mode",
        }
    }
}

/// Why an availability check was refused.
#[derive(Clone, Copy, Debug, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DenyReason {
    LimitReached,
    InvalidMode,
    StoreUnavailable,
}

/// Events the core itself sends to a client.
#[derive(Clone, Debug, PartialEq, Serialize)]
#[serde(tag = "type", rename_all = "snake_case")]
pub enum ServerEvent {
    AvailabilityResponse {
        allowed: bool,
        mode: String,
        #[serde(skip_serializing_if = "Option::is_none")]
        reason: Option<DenyReason>,
    },
    Error {
        message: String,
    },
    Faces {
        faces: Vec<FaceBox>,
    },
    AnimationStart {
        mode: String,
    },
    AnimationComplete {
        mode: String,
    },
    SelectionComplete {
        mode: String,
    },
    ModeLeft {
        mode: Option<String>,
    },
}

impl ServerEvent {
    pub fn allowed(mode: &str) -> Self {
        Self::AvailabilityResponse {
            allowed: true,
            mode: mode.to_string(),
            reason: None,
        }
    }

    pub fn denied(mode: &str, reason: DenyReason) -> Self {
        Self::AvailabilityResponse {
            allowed: false,
            mode: mode.to_string(),
            reason: Some(reason),
        }
    }

    pub fn error(message: impl Into<String>) -> Self {
        Self::Error {
            message: message.into(),
        }
    }

    pub fn event_type(&self) -> &'static str {
        match self {
            Self::AvailabilityResponse { .. } => "availability_response",
            Self::Error { .. } => "error",
            Self::Faces { .. } => "faces",
            Self::AnimationStart { .. } => "animation_start",
            Self::AnimationComplete { .. } => "animation_complete",
            Self::SelectionComplete { .. } => "selection_complete",
            Self::ModeLeft { .. } => "mode_left",
        }
    }

    pub fn to_json(&self) -> String {
        // Every variant is plain data; serialization cannot fail.
        serde_json::to_string(self).unwrap_or_else(|_| String::from("{}"))
    }
}

impl From<&SessionError> for ServerEvent {
    fn from(err: &SessionError) -> Self {
        Self::error(err.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    #[test]
    fn parses_check_availability() {
        let msg = InboundMessage::parse(r#"{"type":"check_availability","mode":"handpick"}"#).unwrap();
        assert_eq!(
            msg,
            InboundMessage::CheckAvailability {
                mode: "handpick".into()
            }
        );
    }

    #[test]
    fn parses_start_animation_with_camel_case_flag() {
        let msg = InboundMessage::parse(
            r#"{"type":"start_animation","frame":"abc","startAnimation":true,"mode":"slot"}"#,
        )
        .unwrap();
        assert_eq!(
            msg,
            InboundMessage::StartAnimation {
                frame: Some("abc".into()),
                start_animation: true,
                mode: Some("slot".into()),
            }
        );
    }

    #[test]
    fn preview_frame_defaults() {
        let msg = InboundMessage::parse(r#"{"type":"start_animation","frame":"abc"}"#).unwrap();
        let InboundMessage::StartAnimation {
            start_animation,
            mode,
            ..
        } = msg
        else {
            panic!("wrong variant");
        };
        assert!(!start_animation);
        assert!(mode.is_none());
    }

    #[test]
    fn parses_client_completion() {
        let msg = InboundMessage::parse(
            r#"{"type":"animation_complete_client","mode":"roulette","winnerIndex":2}"#,
        )
        .unwrap();
        assert_eq!(msg.message_type(), "animation_complete_client");
    }

    #[test]
    fn parses_leave_mode() {
        let msg = InboundMessage::parse(r#"{"type":"leave_mode"}"#).unwrap();
        assert_eq!(msg, InboundMessage::LeaveMode);
    }

    #[test]
    fn unknown_type_is_protocol_error() {
        let err = InboundMessage::parse(r#"{"type":"dance"}"#).unwrap_err();
        assert_eq!(err.error_kind(), "protocol_error");
        assert!(InboundMessage::parse("not json").is_err());
    }

    #[test]
    fn availability_response_omits_reason_when_allowed() {
        let value: serde_json::Value = serde_json::from_str(&ServerEvent::allowed("slot").to_json()).unwrap();
        assert_eq!(value, json!({"type": "availability_response", "allowed": true, "mode": "slot"}));
    }

    #[test]
    fn availability_response_carries_reason() {
        let value: serde_json::Value =
            serde_json::from_str(&ServerEvent::denied("handpick", DenyReason::LimitReached).to_json()).unwrap();
        assert_eq!(value["allowed"], false);
        assert_eq!(value["reason"], "limit_reached");
    }

    #[test]
    fn faces_serialize_as_arrays() {
        let event = ServerEvent::Faces {
            faces: vec![FaceBox::new(1, 2, 3, 4)],
        };
        let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
        assert_eq!(value, json!({"type": "faces", "faces": [[1, 2, 3, 4]]}));
    }

    #[test]
    fn event_type_matches_tag() {
        let events = [
            ServerEvent::error("x"),
            ServerEvent::AnimationStart { mode: "slot".into() },
            ServerEvent::AnimationComplete { mode: "slot".into() },
            ServerEvent::SelectionComplete { mode: "slot".into() },
            ServerEvent::ModeLeft { mode: None },
        ];
        for event in events {
            let value: serde_json::Value = serde_json::from_str(&event.to_json()).unwrap();
            assert_eq!(value["type"], event.event_type());
        }
    }
}
