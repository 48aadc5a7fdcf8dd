//! Wire messages exchanged over the task queue.
//!
//! Every payload popped from the message key is decoded exactly once, at the
//! edge of the worker loop, into [`Message`]: either the stop sentinel or a
//! task envelope. Business logic never sees raw bytes and never compares
//! strings to decide whether something is a stop signal.

use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Reserved payload signaling "terminate one worker".
///
/// Task payloads are JSON documents, which can never equal this bare
/// literal, so the sentinel cannot collide with a legitimate task encoding.
pub const STOP_SENTINEL: &[u8] = b"STOP";

/// Envelope for a single unit of work.
///
/// The core treats `kind` and `payload` as opaque; they are handed to the
/// [`TaskProcessor`](crate::processor::TaskProcessor) untouched.
#[derive(Debug, Clone, Serialize, Deserialize, PartialEq, Eq)]
pub struct TaskSpec {
    /// Unique task identifier
    pub id: Uuid,

    /// Processor-defined task type
    pub kind: String,

    /// Processor-defined parameters
    #[serde(default)]
    pub payload: serde_json::Value,
}

impl TaskSpec {
    /// Create a task envelope with a fresh id.
    pub fn new(kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            id: Uuid::new_v4(),
            kind: kind.into(),
            payload,
        }
    }
}

/// A decoded queue payload.
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Message {
    /// Stop sentinel; the receiving worker terminates
    Stop,
    /// A real task
    Task(TaskSpec),
}

impl Message {
    /// Decode a raw payload popped from the queue.
    pub fn decode(raw: &[u8]) -> Result<Self, serde_json::Error> {
        if raw == STOP_SENTINEL {
            return Ok(Message::Stop);
        }
        serde_json::from_slice(raw).map(Message::Task)
    }

    /// Encode for pushing onto the queue.
    pub fn encode(&self) -> Result<Vec<u8>, serde_json::Error> {
        match self {
            Message::Stop => Ok(STOP_SENTINEL.to_vec()),
            Message::Task(task) => serde_json::to_vec(task),
        }
    }
}
