//! Messaging provider selection.
//!
//! Enum dispatch over the durable and in-memory providers; no trait
//! objects. The constructor encodes the fallback policy: when the durable
//! backend cannot be reached after the configured attempts, the in-memory
//! provider serves with identical semantics and the bus reports itself
//! degraded.

use std::time::Duration;

use tokio::sync::mpsc;
use tracing::{error, warn};

use crate::config::{BusBackend, BusConfig};
use crate::error::HiveResult;
use crate::messaging::message::{Broadcast, BusHealth, Message, QueueSize};
use crate::messaging::providers::memory::MemoryProvider;
use crate::messaging::providers::redis::RedisProvider;

/// The messaging backend actually serving traffic.
#[derive(Debug)]
pub enum MessagingProvider {
    Durable(RedisProvider),
    Memory(MemoryProvider),
}

impl MessagingProvider {
    /// Build the provider described by `config`. Returns the provider plus
    /// a degraded flag: true when durable was requested but the fallback is
    /// serving.
    pub async fn from_config(config: &BusConfig) -> (Self, bool) {
        match config.backend {
            BusBackend::Memory => (Self::new_in_memory(config), false),
            BusBackend::Durable => {
                for attempt in 1..=config.connect_attempts {
                    match RedisProvider::connect(
                        &config.url,
                        config.high_water_mark,
                        config.history_limit,
                    )
                    .await
                    {
                        Ok(provider) => return (Self::Durable(provider), false),
                        Err(e) => {
                            warn!(
                                attempt,
                                max_attempts = config.connect_attempts,
                                error = %e,
                                "durable bus connection failed"
                            );
                            if attempt < config.connect_attempts {
                                tokio::time::sleep(Duration::from_secs(1 << (attempt - 1))).await;
                            }
                        }
                    }
                }
                error!("durable bus unreachable, falling back to in-memory provider");
                (Self::new_in_memory(config), true)
            }
        }
    }

    pub fn new_in_memory(config: &BusConfig) -> Self {
        Self::Memory(MemoryProvider::new(
            config.high_water_mark,
            config.history_limit,
        ))
    }

    pub fn provider_name(&self) -> &'static str {
        match self {
            Self::Durable(_) => "durable",
            Self::Memory(_) => "memory",
        }
    }

    pub fn register_worker(&self, name: &str) {
        match self {
            // Queues are created implicitly on first LPUSH; registration is
            // a log-only event on the durable backend.
            Self::Durable(_) => tracing::debug!(worker = name, "registered worker"),
            Self::Memory(p) => p.register_worker(name),
        }
    }

    pub async fn send(&self, message: Message) -> HiveResult<()> {
        match self {
            Self::Durable(p) => p.send(&message).await,
            Self::Memory(p) => p.send(message),
        }
    }

    pub async fn receive(&self, recipient: &str, max: usize) -> HiveResult<Vec<Message>> {
        match self {
            Self::Durable(p) => p.receive(recipient, max).await,
            Self::Memory(p) => Ok(p.receive(recipient, max)),
        }
    }

    pub async fn broadcast(&self, channel: &str, broadcast: Broadcast) -> HiveResult<usize> {
        match self {
            Self::Durable(p) => p.broadcast(channel, &broadcast).await,
            Self::Memory(p) => Ok(p.broadcast(channel, broadcast)),
        }
    }

    pub fn subscribe(&self, channel: &str) -> HiveResult<mpsc::Receiver<Broadcast>> {
        match self {
            Self::Durable(p) => p.subscribe(channel),
            Self::Memory(p) => Ok(p.subscribe(channel)),
        }
    }

    pub async fn queue_size(&self, recipient: &str) -> HiveResult<QueueSize> {
        match self {
            Self::Durable(p) => p.queue_size(recipient).await,
            Self::Memory(p) => Ok(p.queue_size(recipient)),
        }
    }

    pub async fn history(&self, limit: usize) -> HiveResult<Vec<Message>> {
        match self {
            Self::Durable(p) => p.history(limit).await,
            Self::Memory(p) => Ok(p.history(limit)),
        }
    }

    pub async fn clear_queue(&self, recipient: &str) -> HiveResult<()> {
        match self {
            Self::Durable(p) => p.clear_queue(recipient).await,
            Self::Memory(p) => {
                p.clear_queue(recipient);
                Ok(())
            }
        }
    }

    pub async fn health(&self) -> BusHealth {
        match self {
            Self::Durable(p) => p.health().await,
            Self::Memory(_) => BusHealth {
                healthy: true,
                backend: "memory".to_string(),
                degraded: false,
                connected_clients: 0,
                used_memory: "in-process".to_string(),
                uptime_seconds: 0,
            },
        }
    }

    pub async fn put_with_ttl(&self, key: &str, value: &str, ttl_s: u64) -> HiveResult<()> {
        match self {
            Self::Durable(p) => p.put_with_ttl(key, value, ttl_s).await,
            Self::Memory(p) => {
                p.put_with_ttl(key, value, ttl_s);
                Ok(())
            }
        }
    }

    pub async fn get_value(&self, key: &str) -> HiveResult<Option<String>> {
        match self {
            Self::Durable(p) => p.get_value(key).await,
            Self::Memory(p) => Ok(p.get_value(key)),
        }
    }

    pub async fn refresh_ttl(&self, key: &str, ttl_s: u64) -> HiveResult<bool> {
        match self {
            Self::Durable(p) => p.refresh_ttl(key, ttl_s).await,
            Self::Memory(p) => Ok(p.refresh_ttl(key, ttl_s)),
        }
    }

    pub async fn delete_key(&self, key: &str) -> HiveResult<()> {
        match self {
            Self::Durable(p) => p.delete_key(key).await,
            Self::Memory(p) => {
                p.delete_key(key);
                Ok(())
            }
        }
    }

    pub async fn scan_prefix(&self, pattern: &str) -> HiveResult<Vec<String>> {
        match self {
            Self::Durable(p) => p.scan_prefix(pattern).await,
            Self::Memory(p) => Ok(p.scan_prefix(pattern)),
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::BusConfig;
    use serde_json::json;

    fn memory_config() -> BusConfig {
        BusConfig {
            backend: BusBackend::Memory,
            ..BusConfig::default()
        }
    }

    #[tokio::test]
    async fn test_memory_backend_not_degraded() {
        let (provider, degraded) = MessagingProvider::from_config(&memory_config()).await;
        assert!(!degraded);
        assert_eq!(provider.provider_name(), "memory");
    }

    #[tokio::test]
    async fn test_send_receive_identity_through_enum() {
        let (provider, _) = MessagingProvider::from_config(&memory_config()).await;
        let payload = json!({"pool": "omk/eth", "ratio": 1.15});
        provider
            .send(Message::new("queen", "maths", "analyze", payload.clone(), 1))
            .await
            .unwrap();

        let got = provider.receive("maths", 10).await.unwrap();
        assert_eq!(got.len(), 1);
        assert_eq!(got[0].payload, payload);
        assert_eq!(got[0].priority, 1);
    }

    #[tokio::test]
    async fn test_memory_health_shape() {
        let (provider, _) = MessagingProvider::from_config(&memory_config()).await;
        let health = provider.health().await;
        assert!(health.healthy);
        assert_eq!(health.backend, "memory");
    }
}
