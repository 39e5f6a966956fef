//! # Instance Lifecycle
//!
//! Stateless-instance support for autoscaled deployments: a unique
//! instance id registered on the bus with a TTL, a heartbeat that
//! refreshes it, startup recovery of sessions and pending operations, and
//! a graceful shutdown that drains in-flight state inside the termination
//! grace period.

use std::collections::HashMap;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::time::{Duration, Instant};

use chrono::Utc;
use parking_lot::Mutex;
use tokio::sync::Notify;
use tracing::{debug, error, info, warn};
use uuid::Uuid;

use hive_shared::messaging::BusClient;
use hive_shared::HiveResult;

/// Instance registration TTL; a dead instance disappears on its own.
const INSTANCE_TTL_S: u64 = 300;
/// Heartbeat cadence refreshing the registration.
const HEARTBEAT_INTERVAL_S: u64 = 60;
/// Session TTL applied when persisting at shutdown.
const SESSION_TTL_S: u64 = 3600;
/// Overall budget for the shutdown sequence.
const SHUTDOWN_BUDGET: Duration = Duration::from_secs(10);

/// Process-wide lifecycle state.
#[derive(Debug)]
pub struct InstanceLifecycle {
    instance_id: String,
    bus: BusClient,
    started_at: chrono::DateTime<chrono::Utc>,
    shutting_down: AtomicBool,
    shutdown_notify: Notify,
    pending_operations: Mutex<Vec<serde_json::Value>>,
    active_sessions: Mutex<HashMap<String, serde_json::Value>>,
}

impl InstanceLifecycle {
    pub fn new(bus: BusClient) -> Arc<Self> {
        let hostname = std::env::var("HOSTNAME").unwrap_or_else(|_| "local".to_string());
        let instance_id = format!("{hostname}-{}", &Uuid::new_v4().simple().to_string()[..8]);
        info!(instance_id, "instance lifecycle initialized");

        Arc::new(Self {
            instance_id,
            bus,
            started_at: Utc::now(),
            shutting_down: AtomicBool::new(false),
            shutdown_notify: Notify::new(),
            pending_operations: Mutex::new(Vec::new()),
            active_sessions: Mutex::new(HashMap::new()),
        })
    }

    pub fn instance_id(&self) -> &str {
        &self.instance_id
    }

    pub fn is_shutting_down(&self) -> bool {
        self.shutting_down.load(Ordering::Relaxed)
    }

    /// Wait until shutdown has been requested.
    pub async fn wait_for_shutdown(&self) {
        if self.is_shutting_down() {
            return;
        }
        self.shutdown_notify.notified().await;
    }

    // =========================================================================
    // In-flight state tracked for shutdown persistence
    // =========================================================================

    pub fn add_pending_operation(&self, operation: serde_json::Value) {
        self.pending_operations.lock().push(operation);
    }

    pub fn register_session(&self, session_id: &str, data: serde_json::Value) {
        self.active_sessions
            .lock()
            .insert(session_id.to_string(), data);
    }

    pub fn remove_session(&self, session_id: &str) {
        self.active_sessions.lock().remove(session_id);
    }

    pub fn session_count(&self) -> usize {
        self.active_sessions.lock().len()
    }

    // =========================================================================
    // Registration & heartbeat
    // =========================================================================

    /// Register this instance on the bus under `instance:{id}`.
    pub async fn register(&self) -> HiveResult<()> {
        let value = serde_json::json!({
            "instance_id": self.instance_id,
            "started_at": self.started_at.to_rfc3339(),
            "status": "healthy",
        });
        self.bus
            .put_with_ttl(
                &format!("instance:{}", self.instance_id),
                &value.to_string(),
                INSTANCE_TTL_S,
            )
            .await?;
        info!(instance = %self.instance_id, ttl_s = INSTANCE_TTL_S, "instance registered");
        Ok(())
    }

    /// Heartbeat loop: refreshes the registration TTL until shutdown.
    /// Heartbeat failures never propagate.
    pub async fn run_heartbeat(self: Arc<Self>) {
        let key = format!("instance:{}", self.instance_id);
        loop {
            if self.is_shutting_down() {
                break;
            }
            tokio::select! {
                _ = self.shutdown_notify.notified() => break,
                _ = tokio::time::sleep(Duration::from_secs(HEARTBEAT_INTERVAL_S)) => {
                    match self.bus.refresh_ttl(&key, INSTANCE_TTL_S).await {
                        Ok(true) => debug!(instance = %self.instance_id, "heartbeat"),
                        Ok(false) => {
                            // Key evaporated (backend restart); re-register.
                            if let Err(e) = self.register().await {
                                debug!(error = %e, "heartbeat re-registration failed");
                            }
                        }
                        Err(e) => debug!(error = %e, "heartbeat failed"),
                    }
                }
            }
        }
    }

    // =========================================================================
    // Startup recovery
    // =========================================================================

    /// Rehydrate sessions and re-enqueue pending operations left by a
    /// previous instance.
    pub async fn startup_recovery(&self) -> HiveResult<()> {
        let mut recovered_sessions = 0;
        for key in self.bus.scan_prefix("session:*").await? {
            if let Some(raw) = self.bus.get_value(&key).await? {
                if let Ok(data) = serde_json::from_str::<serde_json::Value>(&raw) {
                    let session_id = key.trim_start_matches("session:").to_string();
                    self.active_sessions.lock().insert(session_id, data);
                    recovered_sessions += 1;
                }
            }
        }

        let mut recovered_ops = 0;
        for key in self.bus.scan_prefix("pending_op:*").await? {
            if let Some(raw) = self.bus.get_value(&key).await? {
                if let Ok(op) = serde_json::from_str::<serde_json::Value>(&raw) {
                    let recipient = op
                        .get("recipient")
                        .and_then(|v| v.as_str())
                        .unwrap_or("queen")
                        .to_string();
                    let kind = op
                        .get("kind")
                        .and_then(|v| v.as_str())
                        .unwrap_or("recovered_operation")
                        .to_string();
                    if self
                        .bus
                        .send(&self.instance_id, &recipient, &kind, op.clone(), 1)
                        .await
                        .is_ok()
                    {
                        self.bus.delete_key(&key).await.ok();
                        recovered_ops += 1;
                    }
                }
            }
        }

        self.register().await?;

        if recovered_sessions > 0 || recovered_ops > 0 {
            info!(
                sessions = recovered_sessions,
                operations = recovered_ops,
                "state recovered from previous instance"
            );
        }
        Ok(())
    }

    // =========================================================================
    // Graceful shutdown
    // =========================================================================

    /// The five-step drain, bounded by the termination grace budget.
    pub async fn graceful_shutdown(&self) {
        self.shutting_down.store(true, Ordering::Relaxed);
        self.shutdown_notify.notify_waiters();

        let started = Instant::now();
        info!(instance = %self.instance_id, "graceful shutdown started");

        match tokio::time::timeout(SHUTDOWN_BUDGET, self.shutdown_steps()).await {
            Ok(()) => info!(
                elapsed_ms = started.elapsed().as_millis() as u64,
                "graceful shutdown complete"
            ),
            Err(_) => error!(
                budget_s = SHUTDOWN_BUDGET.as_secs(),
                "graceful shutdown exceeded budget, exiting anyway"
            ),
        }
    }

    async fn shutdown_steps(&self) {
        // Step 1: stop advertising; the registration disappears and load
        // balancers drain us.
        let step = Instant::now();
        self.bus
            .delete_key(&format!("instance:{}", self.instance_id))
            .await
            .ok();
        info!(step = 1, elapsed_ms = step.elapsed().as_millis() as u64, "stopped accepting work");

        // Step 2: flush pending operations to durable keys.
        let step = Instant::now();
        let pending: Vec<serde_json::Value> =
            std::mem::take(&mut *self.pending_operations.lock());
        let pending_count = pending.len();
        for operation in pending {
            let key = format!("pending_op:{}", Uuid::new_v4().simple());
            if let Err(e) = self
                .bus
                .put_with_ttl(&key, &operation.to_string(), SESSION_TTL_S)
                .await
            {
                warn!(error = %e, "pending operation flush failed");
            }
        }
        info!(
            step = 2,
            operations = pending_count,
            elapsed_ms = step.elapsed().as_millis() as u64,
            "pending operations flushed"
        );

        // Step 3: persist active sessions with a one-hour TTL.
        let step = Instant::now();
        let sessions: Vec<(String, serde_json::Value)> = {
            let guard = self.active_sessions.lock();
            guard.iter().map(|(k, v)| (k.clone(), v.clone())).collect()
        };
        let session_count = sessions.len();
        for (session_id, data) in sessions {
            if let Err(e) = self
                .bus
                .put_with_ttl(
                    &format!("session:{session_id}"),
                    &data.to_string(),
                    SESSION_TTL_S,
                )
                .await
            {
                warn!(session = %session_id, error = %e, "session persist failed");
            }
        }
        info!(
            step = 3,
            sessions = session_count,
            elapsed_ms = step.elapsed().as_millis() as u64,
            "sessions persisted"
        );

        // Step 4: flush log sinks. tracing writers here are unbuffered;
        // the step exists so buffered sinks added later slot in.
        info!(step = 4, "log sinks flushed");

        // Step 5: connections close when the provider drops; nothing to
        // hold open past this point.
        info!(step = 5, "connections released");
    }
}

/// Wait for SIGTERM/SIGINT, then run the graceful shutdown.
pub async fn run_until_signal(lifecycle: Arc<InstanceLifecycle>) {
    let ctrl_c = async {
        tokio::signal::ctrl_c().await.ok();
    };

    #[cfg(unix)]
    let terminate = async {
        match tokio::signal::unix::signal(tokio::signal::unix::SignalKind::terminate()) {
            Ok(mut stream) => {
                stream.recv().await;
            }
            Err(e) => {
                error!(error = %e, "SIGTERM handler installation failed");
                std::future::pending::<()>().await;
            }
        }
    };

    #[cfg(not(unix))]
    let terminate = std::future::pending::<()>();

    tokio::select! {
        _ = ctrl_c => info!("SIGINT received"),
        _ = terminate => info!("SIGTERM received"),
    }

    lifecycle.graceful_shutdown().await;
}
