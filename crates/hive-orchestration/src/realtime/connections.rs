//! Connection bookkeeping per topic.
//!
//! Each topic owns a capped set of client senders behind its own lock, so
//! fan-out on one topic never contends with another. Broadcast iterates
//! under a read lock and collects dead clients for removal afterwards.

use std::collections::HashMap;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tokio::sync::mpsc;
use tracing::{debug, info, warn};

use super::topics::Topic;

/// Outbound frame buffer per client. A client that cannot drain this many
/// frames is considered dead.
const CLIENT_BUFFER: usize = 32;

/// Close code sent when a topic is at capacity.
pub const CLOSE_CHANNEL_FULL: u16 = 1008;

/// A connected client's sender plus identity.
#[derive(Debug)]
struct ClientSlot {
    tx: mpsc::Sender<String>,
}

#[derive(Debug, Default)]
struct TopicConnections {
    clients: HashMap<u64, ClientSlot>,
}

/// Per-topic connection registry with a hard cap.
#[derive(Debug)]
pub struct ConnectionManager {
    topics: HashMap<Topic, RwLock<TopicConnections>>,
    max_per_topic: usize,
    next_id: std::sync::atomic::AtomicU64,
}

/// Stats snapshot for the admin endpoint.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RealtimeStats {
    pub connections_per_topic: HashMap<String, usize>,
    pub total_connections: usize,
    pub max_per_topic: usize,
}

impl ConnectionManager {
    pub fn new(max_per_topic: usize) -> Self {
        let mut topics = HashMap::new();
        for topic in Topic::ALL {
            topics.insert(topic, RwLock::new(TopicConnections::default()));
        }
        Self {
            topics,
            max_per_topic,
            next_id: std::sync::atomic::AtomicU64::new(1),
        }
    }

    fn topic(&self, topic: Topic) -> &RwLock<TopicConnections> {
        // Every topic is inserted in `new`; the map never changes after.
        self.topics.get(&topic).expect("topic registered at startup")
    }

    /// Register a client. `None` means the topic is full and the caller
    /// must close the socket with [`CLOSE_CHANNEL_FULL`].
    pub fn connect(&self, topic: Topic) -> Option<(u64, mpsc::Receiver<String>)> {
        let mut connections = self.topic(topic).write();
        if connections.clients.len() >= self.max_per_topic {
            warn!(topic = topic.as_str(), cap = self.max_per_topic, "topic full, rejecting client");
            return None;
        }

        let id = self
            .next_id
            .fetch_add(1, std::sync::atomic::Ordering::Relaxed);
        let (tx, rx) = mpsc::channel(CLIENT_BUFFER);
        connections.clients.insert(id, ClientSlot { tx });

        info!(
            topic = topic.as_str(),
            client = id,
            connected = connections.clients.len(),
            "client connected"
        );
        Some((id, rx))
    }

    /// Send a frame to one client. Returns false when the client is gone
    /// or cannot keep up, which callers treat as a disconnect.
    pub fn send_to(&self, topic: Topic, client_id: u64, frame: &str) -> bool {
        let connections = self.topic(topic).read();
        match connections.clients.get(&client_id) {
            Some(slot) => slot.tx.try_send(frame.to_string()).is_ok(),
            None => false,
        }
    }

    pub fn disconnect(&self, topic: Topic, client_id: u64) {
        let mut connections = self.topic(topic).write();
        if connections.clients.remove(&client_id).is_some() {
            info!(
                topic = topic.as_str(),
                client = client_id,
                remaining = connections.clients.len(),
                "client disconnected"
            );
        }
    }

    /// Fan a frame out to every client of a topic. Dead clients are
    /// collected under the read lock and removed afterwards. Returns how
    /// many clients received the frame.
    pub fn broadcast(&self, topic: Topic, frame: &str) -> usize {
        let mut dead = Vec::new();
        let mut reached = 0;

        {
            let connections = self.topic(topic).read();
            for (id, slot) in &connections.clients {
                match slot.tx.try_send(frame.to_string()) {
                    Ok(()) => reached += 1,
                    Err(mpsc::error::TrySendError::Full(_)) => {
                        debug!(topic = topic.as_str(), client = id, "client buffer full, dropping frame");
                    }
                    Err(mpsc::error::TrySendError::Closed(_)) => dead.push(*id),
                }
            }
        }

        if !dead.is_empty() {
            let mut connections = self.topic(topic).write();
            for id in dead {
                connections.clients.remove(&id);
            }
        }

        reached
    }

    pub fn connection_count(&self, topic: Topic) -> usize {
        self.topic(topic).read().clients.len()
    }

    pub fn stats(&self) -> RealtimeStats {
        let mut per_topic = HashMap::new();
        let mut total = 0;
        for topic in Topic::ALL {
            let count = self.connection_count(topic);
            per_topic.insert(topic.as_str().to_string(), count);
            total += count;
        }
        RealtimeStats {
            connections_per_topic: per_topic,
            total_connections: total,
            max_per_topic: self.max_per_topic,
        }
    }
}
