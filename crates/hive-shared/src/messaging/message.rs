//! Bus envelopes and bus-level report types.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};

/// Highest priority value a message may carry. 0 = normal lane,
/// anything above rides the priority lane.
pub const MAX_MESSAGE_PRIORITY: u8 = 2;

/// Inter-worker message envelope. Immutable once sent; the recipient owns
/// the message after a successful `receive`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Message {
    pub sender: String,
    pub recipient: String,
    /// Message kind tag, interpreted by the recipient.
    pub kind: String,
    pub payload: serde_json::Value,
    /// 0 = normal, 1 = high, 2 = critical.
    pub priority: u8,
    pub created_at: DateTime<Utc>,
}

impl Message {
    pub fn new(
        sender: impl Into<String>,
        recipient: impl Into<String>,
        kind: impl Into<String>,
        payload: serde_json::Value,
        priority: u8,
    ) -> Self {
        Self {
            sender: sender.into(),
            recipient: recipient.into(),
            kind: kind.into(),
            payload,
            priority: priority.min(MAX_MESSAGE_PRIORITY),
            created_at: Utc::now(),
        }
    }

    /// Whether this message rides the priority lane.
    pub fn is_priority(&self) -> bool {
        self.priority > 0
    }
}

/// Fan-out broadcast envelope. Not queued; lost for disconnected
/// subscribers.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Broadcast {
    pub sender: String,
    pub kind: String,
    pub payload: serde_json::Value,
    pub created_at: DateTime<Utc>,
}

impl Broadcast {
    pub fn new(sender: impl Into<String>, kind: impl Into<String>, payload: serde_json::Value) -> Self {
        Self {
            sender: sender.into(),
            kind: kind.into(),
            payload,
            created_at: Utc::now(),
        }
    }
}

/// Lane depths for one recipient.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct QueueSize {
    pub normal: usize,
    pub priority: usize,
    pub total: usize,
}

impl QueueSize {
    pub fn new(normal: usize, priority: usize) -> Self {
        Self {
            normal,
            priority,
            total: normal + priority,
        }
    }
}

/// Bus health report. Extra backend fields are best-effort and default to
/// zero on the in-memory provider.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct BusHealth {
    pub healthy: bool,
    /// Which provider is actually serving traffic.
    pub backend: String,
    /// True when the durable backend was requested but the in-memory
    /// fallback is serving instead.
    pub degraded: bool,
    pub connected_clients: u64,
    pub used_memory: String,
    pub uptime_seconds: u64,
}
