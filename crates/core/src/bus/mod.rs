//! # Message Bus
//!
//! Asynchronous mailbox broker: worker registration, per-recipient FIFO
//! routing, broadcast, and liveness tracking.

pub mod broker;
pub mod message;

pub use broker::{MessageBus, WorkerInfo, WorkerStatus};
pub use message::{fresh_id, Message, MessageKind};
