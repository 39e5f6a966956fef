//! # Worker Registry
//!
//! Owns the fleet: instantiates every known worker in a stable order,
//! binds collaborators, runs the wiring pass, and is the single arbiter of
//! worker identity. Peer links between workers are names resolved here at
//! call time, never direct references.
//!
//! The worker map is read-mostly after `initialize`; a reader-writer lock
//! guards it and no lock is ever held across an await.

use std::collections::HashMap;
use std::sync::Arc;

use parking_lot::RwLock;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use hive_shared::{HiveError, HiveResult, Task, TaskResult};
use hive_worker::workers::{
    BlockchainWorker, DataWorker, MathsWorker, MonitoringWorker, PatternWorker, SecurityWorker,
    TreasuryWorker, WorkerContext,
};
use hive_worker::{run_task, HealthState, Worker, WorkerHealth, WorkerStats};

/// Worker names that get the LLM bound when one is available.
const LLM_WORKERS: [&str; 2] = ["security", "pattern"];

/// (worker, role, peer) wiring table. Best-effort: a missing peer logs a
/// warning and does not fail initialization.
const WIRING: [(&str, &str, &str); 2] = [
    ("pattern", "series_source", "data"),
    ("treasury", "balances", "blockchain"),
];

/// Fleet-wide health report.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FleetHealth {
    pub all_healthy: bool,
    pub any_critical: bool,
    pub total_workers: usize,
    pub workers: HashMap<String, WorkerHealth>,
}

#[derive(Debug, Default)]
pub struct WorkerRegistry {
    workers: RwLock<HashMap<String, Arc<dyn Worker>>>,
    /// Insertion order, kept stable for reporting.
    order: RwLock<Vec<String>>,
}

impl WorkerRegistry {
    pub fn new() -> Self {
        Self::default()
    }

    /// Instantiate the fleet. The context's LLM handle is bound only to
    /// the declared subset; bus and board go to everyone.
    pub fn initialize(&self, ctx: WorkerContext) {
        let base = WorkerContext {
            bus: ctx.bus.clone(),
            board: ctx.board.clone(),
            llm: None,
        };
        let with_llm = |name: &str| -> WorkerContext {
            let mut c = base.clone();
            if LLM_WORKERS.contains(&name) {
                c.llm = ctx.llm.clone();
            }
            c
        };

        let fleet: Vec<Arc<dyn Worker>> = vec![
            Arc::new(MathsWorker::new(with_llm("maths"))),
            Arc::new(SecurityWorker::new(with_llm("security"))),
            Arc::new(DataWorker::new(with_llm("data"))),
            Arc::new(TreasuryWorker::new(with_llm("treasury"))),
            Arc::new(BlockchainWorker::new(with_llm("blockchain"))),
            Arc::new(PatternWorker::new(with_llm("pattern"))),
            Arc::new(MonitoringWorker::new(with_llm("monitoring"))),
        ];

        {
            let mut workers = self.workers.write();
            let mut order = self.order.write();
            for worker in fleet {
                if let Some(bus) = &ctx.bus {
                    bus.register_worker(worker.name());
                }
                order.push(worker.name().to_string());
                workers.insert(worker.name().to_string(), worker);
            }
        }

        if ctx.llm.is_none() {
            warn!("no llm provider bound, llm workers run without reasoning");
        }

        self.wire_peers();

        info!(
            workers = self.order.read().len(),
            llm = ctx.llm.is_some(),
            "worker registry initialized"
        );
    }

    /// Wiring pass: record peer names on workers that declare a need.
    fn wire_peers(&self) {
        let workers = self.workers.read();
        for (name, role, peer) in WIRING {
            match (workers.get(name), workers.contains_key(peer)) {
                (Some(worker), true) => {
                    worker.wire_peer(role, peer);
                    info!(worker = name, role, peer, "peer wired");
                }
                (Some(_), false) => {
                    warn!(worker = name, role, peer, "peer missing, wiring skipped");
                }
                (None, _) => {
                    warn!(worker = name, "wiring target missing, skipped");
                }
            }
        }
    }

    /// Resolve a worker by name.
    pub fn get(&self, name: &str) -> Option<Arc<dyn Worker>> {
        self.workers.read().get(name).cloned()
    }

    /// Names of workers advertising a capability tag.
    pub fn find_by_capability(&self, capability: &str) -> Vec<String> {
        let workers = self.workers.read();
        self.order
            .read()
            .iter()
            .filter(|name| {
                workers
                    .get(*name)
                    .is_some_and(|w| w.capabilities().contains(&capability))
            })
            .cloned()
            .collect()
    }

    pub fn worker_names(&self) -> Vec<String> {
        self.order.read().clone()
    }

    /// Execute one task on one worker. The registry does not deduplicate
    /// by task id; idempotency is part of each worker's contract.
    pub async fn execute(&self, name: &str, task: &Task) -> HiveResult<TaskResult> {
        let worker = self
            .get(name)
            .ok_or_else(|| HiveError::WorkerUnavailable(name.to_string()))?;
        Ok(run_task(worker.as_ref(), task).await)
    }

    /// Execute the same task on several workers, sequentially, results in
    /// input order. A missing worker yields a failure result in its slot
    /// rather than aborting the whole fan-out.
    pub async fn execute_multi(&self, names: &[&str], task: &Task) -> Vec<TaskResult> {
        let mut results = Vec::with_capacity(names.len());
        for name in names {
            match self.execute(name, task).await {
                Ok(result) => results.push(result),
                Err(e) => results.push(TaskResult::failure(
                    task.id,
                    *name,
                    e.to_string(),
                    e.kind(),
                )),
            }
        }
        results
    }

    pub fn health_check(&self) -> FleetHealth {
        let workers = self.workers.read();
        let mut reports = HashMap::new();
        let mut all_healthy = true;
        let mut any_critical = false;

        for (name, worker) in workers.iter() {
            let health = worker.telemetry().health(name);
            match health.state {
                HealthState::Error => {
                    any_critical = true;
                    all_healthy = false;
                }
                HealthState::Degraded => all_healthy = false,
                HealthState::Active | HealthState::Idle => {}
            }
            reports.insert(name.clone(), health);
        }

        FleetHealth {
            all_healthy,
            any_critical,
            total_workers: workers.len(),
            workers: reports,
        }
    }

    pub fn stats(&self) -> HashMap<String, WorkerStats> {
        let workers = self.workers.read();
        workers
            .iter()
            .map(|(name, worker)| {
                (
                    name.clone(),
                    worker.telemetry().stats(name, worker.llm_enabled()),
                )
            })
            .collect()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_shared::UserId;
    use serde_json::json;

    fn registry() -> WorkerRegistry {
        let registry = WorkerRegistry::new();
        registry.initialize(WorkerContext::empty());
        registry
    }

    fn task(task_type: &str, payload: serde_json::Value) -> Task {
        Task::new(task_type, payload, UserId::from("t"))
    }

    #[test]
    fn test_fleet_instantiated_in_stable_order() {
        let r = registry();
        assert_eq!(
            r.worker_names(),
            vec![
                "maths",
                "security",
                "data",
                "treasury",
                "blockchain",
                "pattern",
                "monitoring"
            ]
        );
    }

    #[test]
    fn test_wiring_pass_records_names() {
        let r = registry();
        let pattern = r.get("pattern").unwrap();
        assert_eq!(
            pattern.peers(),
            vec![("series_source".to_string(), "data".to_string())]
        );
        let treasury = r.get("treasury").unwrap();
        assert_eq!(
            treasury.peers(),
            vec![("balances".to_string(), "blockchain".to_string())]
        );
    }

    #[tokio::test]
    async fn test_execute_unknown_worker() {
        let r = registry();
        let err = r.execute("nonexistent", &task("evaluate", json!({}))).await;
        assert!(matches!(err, Err(HiveError::WorkerUnavailable(_))));
    }

    #[tokio::test]
    async fn test_execute_updates_stats() {
        let r = registry();
        let result = r
            .execute("maths", &task("evaluate", json!({"pool_health": 70})))
            .await
            .unwrap();
        assert!(result.success);

        let stats = r.stats();
        assert_eq!(stats["maths"].task_count, 1);
        assert_eq!(stats["maths"].success_count, 1);
    }

    #[tokio::test]
    async fn test_execute_multi_in_order_with_missing_worker() {
        let r = registry();
        let results = r
            .execute_multi(
                &["maths", "ghost", "data"],
                &task("evaluate", json!({"pool_health": 60})),
            )
            .await;
        assert_eq!(results.len(), 3);
        assert_eq!(results[0].worker, "maths");
        assert!(results[0].success);
        assert_eq!(results[1].worker, "ghost");
        assert_eq!(results[1].error_kind.as_deref(), Some("worker-unavailable"));
        assert!(results[2].success);
    }

    #[tokio::test]
    async fn test_health_check_reflects_failures() {
        let r = registry();
        let healthy = r.health_check();
        assert!(healthy.all_healthy);
        assert!(!healthy.any_critical);
        assert_eq!(healthy.total_workers, 7);

        // Force a failure on one worker.
        r.execute("maths", &task("bogus_operation", json!({})))
            .await
            .unwrap();
        let after = r.health_check();
        assert!(!after.all_healthy);
        assert!(after.any_critical);
        assert_eq!(after.workers["maths"].state, HealthState::Error);
    }

    #[test]
    fn test_capability_routing() {
        let r = registry();
        let evaluators = r.find_by_capability("evaluate");
        assert_eq!(evaluators.len(), 7);
        let trenders = r.find_by_capability("detect_trend");
        assert_eq!(trenders, vec!["pattern"]);
    }
}
