//! # Bus Client
//!
//! Domain facade over the messaging provider. Send, receive, and broadcast
//! are protected by an optional circuit breaker; admin and observability
//! operations (queue sizes, history, health, clear) bypass it so the system
//! stays inspectable while the backend is misbehaving.

use std::sync::Arc;
use std::time::Instant;

use tokio::sync::mpsc;

use crate::error::{HiveError, HiveResult};
use crate::messaging::message::{Broadcast, BusHealth, Message, QueueSize};
use crate::messaging::provider::MessagingProvider;
use crate::resilience::CircuitBreaker;

/// Channel every system-wide broadcast rides on.
pub const BROADCAST_CHANNEL: &str = "broadcast:all";

/// Shared handle to the bus. Cheap to clone.
#[derive(Debug, Clone)]
pub struct BusClient {
    provider: Arc<MessagingProvider>,
    circuit_breaker: Option<Arc<CircuitBreaker>>,
    /// True when the durable backend was requested but the in-memory
    /// fallback is serving.
    degraded: bool,
}

impl BusClient {
    pub fn new(provider: Arc<MessagingProvider>, degraded: bool) -> Self {
        Self {
            provider,
            circuit_breaker: None,
            degraded,
        }
    }

    pub fn with_circuit_breaker(
        provider: Arc<MessagingProvider>,
        degraded: bool,
        circuit_breaker: Arc<CircuitBreaker>,
    ) -> Self {
        Self {
            provider,
            circuit_breaker: Some(circuit_breaker),
            degraded,
        }
    }

    pub fn provider(&self) -> &Arc<MessagingProvider> {
        &self.provider
    }

    pub fn provider_name(&self) -> &'static str {
        self.provider.provider_name()
    }

    pub fn is_degraded(&self) -> bool {
        self.degraded
    }

    async fn with_breaker<F, T, Fut>(&self, op: F) -> HiveResult<T>
    where
        F: FnOnce() -> Fut,
        Fut: std::future::Future<Output = HiveResult<T>>,
    {
        if let Some(cb) = &self.circuit_breaker {
            if !cb.should_allow() {
                return Err(HiveError::CircuitOpen(cb.name().to_string()));
            }
            let start = Instant::now();
            let result = op().await;
            match &result {
                Ok(_) => cb.record_success(start.elapsed()),
                // Queue-full is backpressure, not backend failure; it must
                // not trip the breaker.
                Err(HiveError::QueueFull { .. }) => cb.record_success(start.elapsed()),
                Err(_) => cb.record_failure(start.elapsed()),
            }
            result
        } else {
            op().await
        }
    }

    // =========================================================================
    // Protected operations
    // =========================================================================

    /// Enqueue a message onto the recipient's queue. Failure means the
    /// message was not accepted; retrying is the caller's call.
    pub async fn send(
        &self,
        sender: &str,
        recipient: &str,
        kind: &str,
        payload: serde_json::Value,
        priority: u8,
    ) -> HiveResult<()> {
        let message = Message::new(sender, recipient, kind, payload, priority);
        let provider = self.provider.clone();
        self.with_breaker(|| async move { provider.send(message).await })
            .await
    }

    /// Drain up to `max` messages for a recipient, priority lane first.
    /// Returned messages are consumed; they will not be redelivered.
    pub async fn receive(&self, recipient: &str, max: usize) -> HiveResult<Vec<Message>> {
        let provider = self.provider.clone();
        let recipient = recipient.to_string();
        self.with_breaker(|| async move { provider.receive(&recipient, max).await })
            .await
    }

    /// Fan out to every subscriber of the system-wide broadcast channel.
    /// Returns the number of subscribers reached.
    pub async fn broadcast(
        &self,
        sender: &str,
        kind: &str,
        payload: serde_json::Value,
    ) -> HiveResult<usize> {
        let broadcast = Broadcast::new(sender, kind, payload);
        let provider = self.provider.clone();
        self.with_breaker(|| async move { provider.broadcast(BROADCAST_CHANNEL, broadcast).await })
            .await
    }

    /// Publish to a named pub/sub channel (push-channel topics and the like).
    pub async fn publish(
        &self,
        channel: &str,
        sender: &str,
        kind: &str,
        payload: serde_json::Value,
    ) -> HiveResult<usize> {
        let broadcast = Broadcast::new(sender, kind, payload);
        let provider = self.provider.clone();
        let channel = channel.to_string();
        self.with_breaker(|| async move { provider.broadcast(&channel, broadcast).await })
            .await
    }

    // =========================================================================
    // Unprotected operations
    // =========================================================================

    pub fn register_worker(&self, name: &str) {
        self.provider.register_worker(name);
    }

    pub fn subscribe(&self, channel: &str) -> HiveResult<mpsc::Receiver<Broadcast>> {
        self.provider.subscribe(channel)
    }

    pub async fn queue_size(&self, recipient: &str) -> HiveResult<QueueSize> {
        self.provider.queue_size(recipient).await
    }

    pub async fn history(&self, limit: usize) -> HiveResult<Vec<Message>> {
        self.provider.history(limit).await
    }

    pub async fn clear_queue(&self, recipient: &str) -> HiveResult<()> {
        self.provider.clear_queue(recipient).await
    }

    pub async fn health(&self) -> BusHealth {
        let mut health = self.provider.health().await;
        health.degraded = self.degraded;
        health
    }

    // TTL-bounded values used by the instance lifecycle. Unprotected: a
    // failed heartbeat must not poison the breaker for task traffic.

    pub async fn put_with_ttl(&self, key: &str, value: &str, ttl_s: u64) -> HiveResult<()> {
        self.provider.put_with_ttl(key, value, ttl_s).await
    }

    pub async fn get_value(&self, key: &str) -> HiveResult<Option<String>> {
        self.provider.get_value(key).await
    }

    pub async fn refresh_ttl(&self, key: &str, ttl_s: u64) -> HiveResult<bool> {
        self.provider.refresh_ttl(key, ttl_s).await
    }

    pub async fn delete_key(&self, key: &str) -> HiveResult<()> {
        self.provider.delete_key(key).await
    }

    pub async fn scan_prefix(&self, pattern: &str) -> HiveResult<Vec<String>> {
        self.provider.scan_prefix(pattern).await
    }
}
