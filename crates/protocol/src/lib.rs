//! Client protocol: the typed envelopes exchanged over the
//! `/v1/chat/stream` WebSocket, plus strict decoding.
//!
//! Both directions carry JSON objects tagged on `type`. The variant sets
//! are closed: unknown types and missing required fields are rejected at
//! decode time and reported back as an `error{code: 400}` event without
//! dropping the connection.

use serde::{Deserialize, Serialize};

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Inbound (client → gateway)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Messages a client may send on the stream channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ClientMessage {
    /// First message after connect; carries the pre-shared token.
    #[serde(rename = "authorize")]
    Authorize { token: String },

    /// Heartbeat response. No acknowledgement is sent back.
    #[serde(rename = "pong")]
    Pong {},

    /// A user chat message starting a new response turn.
    #[serde(rename = "chat_message")]
    ChatMessage {
        content: String,
        user_id: String,
        agent_id: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        session_id: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        persona: Option<String>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        images: Option<Vec<String>>,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        metadata: Option<serde_json::Value>,
    },

    /// Stop a running turn (or all running turns when `turn_id` is absent).
    #[serde(rename = "interrupt_stream")]
    InterruptStream {
        #[serde(default, skip_serializing_if = "Option::is_none")]
        turn_id: Option<String>,
    },

    /// List available background images.
    #[serde(rename = "fetch_backgrounds")]
    FetchBackgrounds {},

    /// List available avatar configuration files.
    #[serde(rename = "fetch_avatar_configs")]
    FetchAvatarConfigs {},

    /// Select a different avatar configuration.
    #[serde(rename = "switch_avatar_config")]
    SwitchAvatarConfig { file: String },
}

impl ClientMessage {
    /// Field-level validation beyond what serde enforces.
    pub fn validate(&self) -> Result<(), CodecError> {
        if let ClientMessage::ChatMessage {
            content,
            user_id,
            agent_id,
            ..
        } = self
        {
            for (field, value) in [
                ("content", content),
                ("user_id", user_id),
                ("agent_id", agent_id),
            ] {
                if value.trim().is_empty() {
                    return Err(CodecError::bad_request(format!(
                        "chat_message.{field} must not be empty"
                    )));
                }
            }
        }
        Ok(())
    }
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Outbound (gateway → client)
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// Events the gateway sends to a client.
///
/// `tool_call` / `tool_result` are part of the wire schema for
/// completeness; the gateway logs tool activity server-side and never
/// forwards these two variants.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum ServerEvent {
    // ── Lifecycle ───────────────────────────────────────────────────
    #[serde(rename = "authorize_success")]
    AuthorizeSuccess { connection_id: String },

    #[serde(rename = "authorize_error")]
    AuthorizeError { error: String },

    #[serde(rename = "ping")]
    Ping {},

    #[serde(rename = "error")]
    Error { code: u16, error: String },

    // ── Turn ────────────────────────────────────────────────────────
    #[serde(rename = "stream_start")]
    StreamStart { turn_id: String, session_id: String },

    /// Raw token mirror for typing-effect UIs (opt-in; the normalized
    /// sentence stream below is the contractual text).
    #[serde(rename = "stream_token")]
    StreamToken {
        chunk: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<String>,
    },

    /// A normalized, sentence-sized chunk ready for speech synthesis.
    #[serde(rename = "tts_ready_chunk")]
    TtsReadyChunk {
        chunk: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        emotion: Option<String>,
    },

    #[serde(rename = "tool_call")]
    ToolCall {
        tool_name: String,
        args: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<String>,
    },

    #[serde(rename = "tool_result")]
    ToolResult {
        result: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<String>,
    },

    #[serde(rename = "stream_end")]
    StreamEnd {
        turn_id: String,
        session_id: String,
        content: String,
    },

    #[serde(rename = "interrupted")]
    Interrupted { turn_id: String, reason: String },

    // ── Config / assets ─────────────────────────────────────────────
    #[serde(rename = "background_files")]
    BackgroundFiles { files: Vec<String> },

    #[serde(rename = "avatar_config_files")]
    AvatarConfigFiles { configs: Vec<AvatarConfigInfo> },

    #[serde(rename = "avatar_config_switched")]
    AvatarConfigSwitched { file: String },

    #[serde(rename = "set_model_and_conf")]
    SetModelAndConf {
        conf_name: String,
        conf_uid: String,
        model: serde_json::Value,
    },
}

/// Summary of one avatar configuration file.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct AvatarConfigInfo {
    pub file: String,
    pub name: String,
}

// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━
// Codec
// ━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━━

/// A decode/validation failure, carried back to the client as an
/// `error{code, error}` event.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CodecError {
    pub code: u16,
    pub message: String,
}

impl CodecError {
    pub fn bad_request(message: impl Into<String>) -> Self {
        Self {
            code: 400,
            message: message.into(),
        }
    }

    /// The outbound event reporting this failure.
    pub fn to_event(&self) -> ServerEvent {
        ServerEvent::Error {
            code: self.code,
            error: self.message.clone(),
        }
    }
}

impl std::fmt::Display for CodecError {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{} ({})", self.message, self.code)
    }
}

impl std::error::Error for CodecError {}

/// Decode and validate one inbound frame.
pub fn decode(text: &str) -> Result<ClientMessage, CodecError> {
    let msg: ClientMessage = serde_json::from_str(text)
        .map_err(|e| CodecError::bad_request(format!("invalid message: {e}")))?;
    msg.validate()?;
    Ok(msg)
}

/// Serialize one outbound event. Serialization of the closed enum cannot
/// fail in practice; a failure is reported as a plain error string so the
/// caller can log it.
pub fn encode(event: &ServerEvent) -> Result<String, String> {
    serde_json::to_string(event).map_err(|e| e.to_string())
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn decode_authorize() {
        let msg = decode(r#"{"type":"authorize","token":"secret"}"#).unwrap();
        assert!(matches!(msg, ClientMessage::Authorize { token } if token == "secret"));
    }

    #[test]
    fn decode_chat_message_with_optionals_absent() {
        let msg = decode(
            r#"{"type":"chat_message","content":"Hi","user_id":"u1","agent_id":"a1"}"#,
        )
        .unwrap();
        match msg {
            ClientMessage::ChatMessage {
                content,
                session_id,
                images,
                ..
            } => {
                assert_eq!(content, "Hi");
                assert!(session_id.is_none());
                assert!(images.is_none());
            }
            other => panic!("unexpected: {other:?}"),
        }
    }

    #[test]
    fn unknown_type_is_a_400() {
        let err = decode(r#"{"type":"self_destruct"}"#).unwrap_err();
        assert_eq!(err.code, 400);
    }

    #[test]
    fn missing_required_field_is_a_400() {
        let err = decode(r#"{"type":"chat_message","content":"Hi"}"#).unwrap_err();
        assert_eq!(err.code, 400);
        assert!(err.message.contains("invalid message"));
    }

    #[test]
    fn non_json_is_a_400() {
        assert_eq!(decode("not json at all").unwrap_err().code, 400);
    }

    #[test]
    fn empty_chat_fields_fail_validation() {
        let err = decode(
            r#"{"type":"chat_message","content":"  ","user_id":"u1","agent_id":"a1"}"#,
        )
        .unwrap_err();
        assert!(err.message.contains("content"));
    }

    #[test]
    fn interrupt_without_turn_id_decodes() {
        let msg = decode(r#"{"type":"interrupt_stream"}"#).unwrap();
        assert!(matches!(
            msg,
            ClientMessage::InterruptStream { turn_id: None }
        ));
    }

    #[test]
    fn codec_error_maps_to_error_event() {
        let ev = CodecError::bad_request("nope").to_event();
        let json = encode(&ev).unwrap();
        assert!(json.contains("\"type\":\"error\""));
        assert!(json.contains("\"code\":400"));
    }

    #[test]
    fn server_events_serialize_tagged() {
        let ev = ServerEvent::TtsReadyChunk {
            chunk: "Hello there.".into(),
            emotion: Some("happy".into()),
        };
        let json = encode(&ev).unwrap();
        assert!(json.contains("\"type\":\"tts_ready_chunk\""));
        assert!(json.contains("\"emotion\":\"happy\""));

        let ev = ServerEvent::Interrupted {
            turn_id: "t1".into(),
            reason: "superseded".into(),
        };
        assert!(encode(&ev).unwrap().contains("\"reason\":\"superseded\""));
    }

    #[test]
    fn optional_emotion_is_omitted() {
        let ev = ServerEvent::TtsReadyChunk {
            chunk: "Hi there.".into(),
            emotion: None,
        };
        assert!(!encode(&ev).unwrap().contains("emotion"));
    }
}
