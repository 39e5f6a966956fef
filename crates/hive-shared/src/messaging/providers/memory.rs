//! In-process messaging provider.
//!
//! Identical semantics to the durable provider: two lanes per recipient
//! with FIFO order inside each lane, priority drained first, bounded audit
//! history, and fire-and-forget pub/sub. Used directly when configured, and
//! as the degraded fallback when the durable backend is unreachable.

use std::collections::{HashMap, VecDeque};
use std::time::{Duration, Instant};

use parking_lot::Mutex;
use tokio::sync::mpsc;
use tracing::debug;

use crate::error::{HiveError, HiveResult};
use crate::messaging::message::{Broadcast, Message, QueueSize};

/// Buffer size for per-subscriber broadcast channels. A slow subscriber
/// loses messages rather than stalling the bus.
const SUBSCRIBER_BUFFER: usize = 64;

#[derive(Debug, Default)]
struct Lanes {
    priority: VecDeque<Message>,
    normal: VecDeque<Message>,
}

impl Lanes {
    fn depth(&self) -> usize {
        self.priority.len() + self.normal.len()
    }
}

#[derive(Debug)]
struct KvEntry {
    value: String,
    expires_at: Option<Instant>,
}

impl KvEntry {
    fn is_expired(&self) -> bool {
        self.expires_at.is_some_and(|t| t <= Instant::now())
    }
}

#[derive(Debug, Default)]
struct State {
    queues: HashMap<String, Lanes>,
    history: VecDeque<Message>,
    subscribers: HashMap<String, Vec<mpsc::Sender<Broadcast>>>,
    kv: HashMap<String, KvEntry>,
}

/// Process-local provider. All operations are synchronous under one lock;
/// every critical section is a handful of queue operations.
#[derive(Debug)]
pub struct MemoryProvider {
    state: Mutex<State>,
    high_water_mark: usize,
    history_limit: usize,
}

impl MemoryProvider {
    pub fn new(high_water_mark: usize, history_limit: usize) -> Self {
        Self {
            state: Mutex::new(State::default()),
            high_water_mark,
            history_limit,
        }
    }

    pub fn register_worker(&self, name: &str) {
        let mut state = self.state.lock();
        state.queues.entry(name.to_string()).or_default();
        debug!(worker = name, "registered worker queue");
    }

    pub fn send(&self, message: Message) -> HiveResult<()> {
        let mut state = self.state.lock();

        let depth = state
            .queues
            .get(&message.recipient)
            .map(Lanes::depth)
            .unwrap_or(0);
        if depth >= self.high_water_mark {
            return Err(HiveError::QueueFull {
                recipient: message.recipient.clone(),
                depth,
            });
        }

        let history_entry = message.clone();
        let lanes = state.queues.entry(message.recipient.clone()).or_default();
        if message.is_priority() {
            lanes.priority.push_back(message);
        } else {
            lanes.normal.push_back(message);
        }

        state.history.push_back(history_entry);
        let overflow = state.history.len().saturating_sub(self.history_limit);
        for _ in 0..overflow {
            state.history.pop_front();
        }

        Ok(())
    }

    /// Drain up to `max` messages: the priority lane empties before the
    /// normal lane is touched. Returned messages are removed from the
    /// queue; redelivery is the caller's concern.
    pub fn receive(&self, recipient: &str, max: usize) -> Vec<Message> {
        let mut state = self.state.lock();
        let Some(lanes) = state.queues.get_mut(recipient) else {
            return Vec::new();
        };

        let mut drained = Vec::with_capacity(max.min(lanes.depth()));
        while drained.len() < max {
            if let Some(msg) = lanes.priority.pop_front() {
                drained.push(msg);
            } else {
                break;
            }
        }
        while drained.len() < max {
            if let Some(msg) = lanes.normal.pop_front() {
                drained.push(msg);
            } else {
                break;
            }
        }
        drained
    }

    /// Fan out to every live subscriber of `channel`. Returns how many
    /// subscribers the message reached; closed or full receivers are
    /// dropped from the list.
    pub fn broadcast(&self, channel: &str, broadcast: Broadcast) -> usize {
        let mut state = self.state.lock();
        let Some(senders) = state.subscribers.get_mut(channel) else {
            return 0;
        };

        let mut reached = 0;
        senders.retain(|tx| match tx.try_send(broadcast.clone()) {
            Ok(()) => {
                reached += 1;
                true
            }
            Err(mpsc::error::TrySendError::Full(_)) => true,
            Err(mpsc::error::TrySendError::Closed(_)) => false,
        });
        reached
    }

    pub fn subscribe(&self, channel: &str) -> mpsc::Receiver<Broadcast> {
        let (tx, rx) = mpsc::channel(SUBSCRIBER_BUFFER);
        self.state
            .lock()
            .subscribers
            .entry(channel.to_string())
            .or_default()
            .push(tx);
        rx
    }

    pub fn subscriber_count(&self, channel: &str) -> usize {
        self.state
            .lock()
            .subscribers
            .get(channel)
            .map(Vec::len)
            .unwrap_or(0)
    }

    pub fn queue_size(&self, recipient: &str) -> QueueSize {
        let state = self.state.lock();
        state
            .queues
            .get(recipient)
            .map(|lanes| QueueSize::new(lanes.normal.len(), lanes.priority.len()))
            .unwrap_or_default()
    }

    /// Most recent messages, newest first.
    pub fn history(&self, limit: usize) -> Vec<Message> {
        let state = self.state.lock();
        state.history.iter().rev().take(limit).cloned().collect()
    }

    pub fn clear_queue(&self, recipient: &str) {
        let mut state = self.state.lock();
        if let Some(lanes) = state.queues.get_mut(recipient) {
            lanes.priority.clear();
            lanes.normal.clear();
        }
    }

    // =========================================================================
    // TTL-bounded values (instance lifecycle + session persistence)
    // =========================================================================

    pub fn put_with_ttl(&self, key: &str, value: &str, ttl_s: u64) {
        self.state.lock().kv.insert(
            key.to_string(),
            KvEntry {
                value: value.to_string(),
                expires_at: Some(Instant::now() + Duration::from_secs(ttl_s)),
            },
        );
    }

    pub fn get_value(&self, key: &str) -> Option<String> {
        let mut state = self.state.lock();
        match state.kv.get(key) {
            Some(entry) if entry.is_expired() => {
                state.kv.remove(key);
                None
            }
            Some(entry) => Some(entry.value.clone()),
            None => None,
        }
    }

    pub fn refresh_ttl(&self, key: &str, ttl_s: u64) -> bool {
        let mut state = self.state.lock();
        match state.kv.get_mut(key) {
            Some(entry) if !entry.is_expired() => {
                entry.expires_at = Some(Instant::now() + Duration::from_secs(ttl_s));
                true
            }
            _ => false,
        }
    }

    pub fn delete_key(&self, key: &str) {
        self.state.lock().kv.remove(key);
    }

    /// Glob-lite scan: only the trailing-`*` prefix form the lifecycle uses.
    pub fn scan_prefix(&self, pattern: &str) -> Vec<String> {
        let prefix = pattern.strip_suffix('*').unwrap_or(pattern);
        let state = self.state.lock();
        state
            .kv
            .iter()
            .filter(|(k, entry)| k.starts_with(prefix) && !entry.is_expired())
            .map(|(k, _)| k.clone())
            .collect()
    }
}
