//! # Durable Bus
//!
//! Priority message queues per worker, fan-out pub/sub, and a bounded
//! audit history. Delivery is at-least-once with visible consumption: a
//! message returned by `receive` is gone from the queue, and redelivery on
//! crash is the caller's concern.
//!
//! Two providers with identical semantics: a redis-compatible durable
//! backend and a process-local fallback. Fallback engagement is a health
//! degradation, not an error.

pub mod client;
pub mod message;
pub mod provider;
pub mod providers {
    pub mod memory;
    pub mod redis;
}

pub use client::{BusClient, BROADCAST_CHANNEL};
pub use message::{Broadcast, BusHealth, Message, QueueSize, MAX_MESSAGE_PRIORITY};
pub use provider::MessagingProvider;
