//! # Push Channel
//!
//! Real-time fan-out to admin clients over WebSockets. Each topic holds a
//! bounded connection set; per-topic server loops poll a snapshot source
//! and push only when the snapshot actually changed. Every client is
//! pinged on a fixed cadence, and the 101st connection on a topic is
//! closed with code 1008.

pub mod connections;
pub mod server;
pub mod topics;

pub use connections::{ConnectionManager, RealtimeStats};
pub use server::{realtime_router, RealtimeState, SnapshotSource};
pub use topics::Topic;
