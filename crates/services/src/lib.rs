//! Narrow client adapters for the external services the gateway consumes:
//! the streaming agent engine, TTS, vision, and the short/long-term memory
//! stores. All REST adapters share the retry/backoff engine in [`http`].

pub mod agent;
pub mod health;
pub mod ltm;
pub mod stm;
pub mod tts;
pub mod vlm;

pub(crate) mod http;

pub use agent::{AgentProvider, AgentStreamRequest, HttpAgentClient};
pub use health::ServiceHealth;
pub use ltm::LtmClient;
pub use stm::StmClient;
pub use tts::TtsClient;
pub use vlm::VlmClient;
