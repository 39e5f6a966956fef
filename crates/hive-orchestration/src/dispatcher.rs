//! # Dispatcher
//!
//! Thin routing layer over the registry: resolves a routing hint to worker
//! names, bounds every call with a deadline, and fans out to multiple
//! workers sequentially or, when the task asks for it, in parallel with
//! results restored to submission order.

use std::sync::Arc;
use std::time::Duration;

use futures::future::join_all;
use tracing::{debug, warn};

use hive_shared::config::DispatcherConfig;
use hive_shared::{HiveError, HiveResult, Task, TaskResult};

use crate::registry::WorkerRegistry;

/// Where a task should go.
#[derive(Debug, Clone)]
pub enum RouteHint {
    /// A single named worker.
    Worker(String),
    /// An explicit worker list, in result order.
    Workers { names: Vec<String>, parallel: bool },
    /// Every worker advertising a capability tag.
    Capability(String),
}

#[derive(Debug, Clone)]
pub struct Dispatcher {
    registry: Arc<WorkerRegistry>,
    default_timeout: Duration,
}

impl Dispatcher {
    pub fn new(registry: Arc<WorkerRegistry>, config: &DispatcherConfig) -> Self {
        Self {
            registry,
            default_timeout: Duration::from_secs(config.default_timeout_s),
        }
    }

    /// Per-call budget: the task deadline when present, the configured
    /// default otherwise.
    fn budget(&self, task: &Task) -> Duration {
        task.remaining_budget().unwrap_or(self.default_timeout)
    }

    /// Execute a task on one worker under a deadline. Deadline expiry
    /// cancels the call and synthesizes a typed timeout result.
    pub async fn dispatch_one(&self, name: &str, task: &Task) -> HiveResult<TaskResult> {
        let budget = self.budget(task);
        if budget.is_zero() {
            // Deadline already passed before the call started.
            return Ok(TaskResult::timeout(task.id, name, budget));
        }
        match tokio::time::timeout(budget, self.registry.execute(name, task)).await {
            Ok(result) => result,
            Err(_) => {
                warn!(worker = name, task = %task.id, ?budget, "worker call timed out");
                Ok(TaskResult::timeout(task.id, name, budget))
            }
        }
    }

    /// Route a task. Multi-worker results always come back in submission
    /// order, whatever the completion order was.
    pub async fn dispatch(&self, hint: RouteHint, task: &Task) -> HiveResult<Vec<TaskResult>> {
        let (names, parallel) = match hint {
            RouteHint::Worker(name) => (vec![name], false),
            RouteHint::Workers { names, parallel } => (names, parallel),
            RouteHint::Capability(tag) => {
                let names = self.registry.find_by_capability(&tag);
                if names.is_empty() {
                    return Err(HiveError::WorkerUnavailable(format!(
                        "no worker advertises capability '{tag}'"
                    )));
                }
                (names, false)
            }
        };

        debug!(workers = ?names, parallel, task = %task.id, "dispatching");

        if parallel {
            let calls = names.iter().map(|name| {
                let name = name.clone();
                async move {
                    match self.dispatch_one(&name, task).await {
                        Ok(result) => result,
                        Err(e) => TaskResult::failure(task.id, name, e.to_string(), e.kind()),
                    }
                }
            });
            // join_all preserves input order regardless of completion
            // order.
            Ok(join_all(calls).await)
        } else {
            let mut results = Vec::with_capacity(names.len());
            for name in &names {
                match self.dispatch_one(name, task).await {
                    Ok(result) => results.push(result),
                    Err(e) => {
                        results.push(TaskResult::failure(task.id, name, e.to_string(), e.kind()))
                    }
                }
            }
            Ok(results)
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::Utc;
    use hive_shared::{TaskPriority, UserId};
    use hive_worker::workers::WorkerContext;
    use serde_json::json;

    fn dispatcher() -> Dispatcher {
        let registry = Arc::new(WorkerRegistry::new());
        registry.initialize(WorkerContext::empty());
        Dispatcher::new(registry, &DispatcherConfig::default())
    }

    fn task(task_type: &str, payload: serde_json::Value) -> Task {
        Task::new(task_type, payload, UserId::from("t"))
    }

    #[tokio::test]
    async fn test_single_worker_route() {
        let d = dispatcher();
        let results = d
            .dispatch(
                RouteHint::Worker("maths".to_string()),
                &task("evaluate", json!({"pool_health": 75})),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert!(results[0].success);
    }

    #[tokio::test]
    async fn test_multi_worker_sequential_order() {
        let d = dispatcher();
        let results = d
            .dispatch(
                RouteHint::Workers {
                    names: vec!["treasury".into(), "maths".into(), "data".into()],
                    parallel: false,
                },
                &task("evaluate", json!({"pool_health": 75})),
            )
            .await
            .unwrap();
        let workers: Vec<_> = results.iter().map(|r| r.worker.as_str()).collect();
        assert_eq!(workers, vec!["treasury", "maths", "data"]);
    }

    #[tokio::test]
    async fn test_parallel_preserves_submission_order() {
        let d = dispatcher();
        let results = d
            .dispatch(
                RouteHint::Workers {
                    names: vec![
                        "pattern".into(),
                        "security".into(),
                        "maths".into(),
                        "monitoring".into(),
                    ],
                    parallel: true,
                },
                &task("evaluate", json!({"pool_health": 60})),
            )
            .await
            .unwrap();
        let workers: Vec<_> = results.iter().map(|r| r.worker.as_str()).collect();
        assert_eq!(workers, vec!["pattern", "security", "maths", "monitoring"]);
        assert!(results.iter().all(|r| r.success));
    }

    #[tokio::test]
    async fn test_capability_route() {
        let d = dispatcher();
        let results = d
            .dispatch(
                RouteHint::Capability("detect_trend".to_string()),
                &task("detect_trend", json!({"series": [1.0, 2.0, 3.0]})),
            )
            .await
            .unwrap();
        assert_eq!(results.len(), 1);
        assert_eq!(results[0].worker, "pattern");
    }

    #[tokio::test]
    async fn test_unknown_capability() {
        let d = dispatcher();
        let err = d
            .dispatch(
                RouteHint::Capability("telepathy".to_string()),
                &task("evaluate", json!({})),
            )
            .await;
        assert!(matches!(err, Err(HiveError::WorkerUnavailable(_))));
    }

    #[tokio::test]
    async fn test_expired_deadline_times_out() {
        let d = dispatcher();
        let expired = task("evaluate", json!({"pool_health": 50}))
            .with_deadline(Utc::now() - chrono::Duration::seconds(1))
            .with_priority(TaskPriority::High);
        let results = d
            .dispatch(RouteHint::Worker("maths".to_string()), &expired)
            .await
            .unwrap();
        assert!(!results[0].success);
        assert_eq!(results[0].error_kind.as_deref(), Some("timeout"));
    }

    #[tokio::test]
    async fn test_missing_worker_in_list_fails_slot_only() {
        let d = dispatcher();
        let results = d
            .dispatch(
                RouteHint::Workers {
                    names: vec!["maths".into(), "ghost".into()],
                    parallel: true,
                },
                &task("evaluate", json!({"pool_health": 50})),
            )
            .await
            .unwrap();
        assert!(results[0].success);
        assert_eq!(results[1].error_kind.as_deref(), Some("worker-unavailable"));
    }
}
