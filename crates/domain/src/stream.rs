use serde::{Deserialize, Serialize};
use std::pin::Pin;

/// A boxed async stream, used for agent engine event streams.
pub type BoxStream<'a, T> = Pin<Box<dyn futures_core::Stream<Item = T> + Send + 'a>>;

/// Events yielded by the agent engine for one response turn.
///
/// The sequence is finite, lazy, non-restartable and cancellable: dropping
/// the stream stops further upstream work. Exactly one `stream_start` and at
/// most one `stream_end` appear per sequence; transport failures surface as
/// `Err` items from the iterator.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(tag = "type")]
pub enum AgentEvent {
    /// The agent has accepted the turn and begun producing output.
    #[serde(rename = "stream_start")]
    StreamStart { turn_id: String, session_id: String },

    /// An incremental text fragment.
    #[serde(rename = "stream_token")]
    StreamToken {
        chunk: String,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<String>,
    },

    /// The agent is invoking a tool. Server-side bookkeeping only.
    #[serde(rename = "tool_call")]
    ToolCall {
        tool_name: String,
        args: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<String>,
    },

    /// A tool finished. Server-side bookkeeping only.
    #[serde(rename = "tool_result")]
    ToolResult {
        result: serde_json::Value,
        #[serde(default, skip_serializing_if = "Option::is_none")]
        node: Option<String>,
    },

    /// Terminal event carrying the full response text.
    #[serde(rename = "stream_end")]
    StreamEnd {
        turn_id: String,
        session_id: String,
        content: String,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn agent_event_round_trips_tagged() {
        let ev = AgentEvent::StreamToken {
            chunk: "Hello".into(),
            node: None,
        };
        let json = serde_json::to_string(&ev).unwrap();
        assert!(json.contains("\"type\":\"stream_token\""));
        assert!(!json.contains("node"));

        let back: AgentEvent = serde_json::from_str(&json).unwrap();
        match back {
            AgentEvent::StreamToken { chunk, node } => {
                assert_eq!(chunk, "Hello");
                assert!(node.is_none());
            }
            other => panic!("unexpected variant: {other:?}"),
        }
    }

    #[test]
    fn unknown_event_type_is_rejected() {
        let err = serde_json::from_str::<AgentEvent>("{\"type\":\"bogus\"}");
        assert!(err.is_err());
    }
}
