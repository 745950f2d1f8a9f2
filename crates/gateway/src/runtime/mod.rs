//! The per-connection streaming runtime: turn state, task supervision,
//! the producer/consumer event pipeline, and the message processor that
//! orchestrates them.

pub mod pipeline;
pub mod processor;
pub mod supervisor;
pub mod turn;

pub use processor::{MessageProcessor, StartTurnRequest};
pub use supervisor::TaskSupervisor;
pub use turn::{TokenItem, TurnShared, TurnState, TurnStatus};
