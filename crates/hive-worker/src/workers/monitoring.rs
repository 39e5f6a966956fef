//! Monitoring worker: aggregates component health reports into a single
//! verdict and posts status changes to the board.

use async_trait::async_trait;
use serde_json::json;

use hive_shared::board::{Category, PostTtl};
use hive_shared::{HiveError, HiveResult, Task};

use crate::worker::{Worker, WorkerTelemetry};
use crate::workers::WorkerContext;

#[derive(Debug)]
enum MonitoringOperation {
    /// Uptime-based score for consensus rounds.
    Evaluate { uptime_pct: f64 },
    /// Aggregate a map of component -> healthy flags.
    SystemHealth { components: serde_json::Map<String, serde_json::Value> },
}

impl MonitoringOperation {
    fn parse(task: &Task) -> HiveResult<Self> {
        match task.task_type.as_str() {
            "evaluate" => {
                let uptime_pct = task
                    .payload
                    .get("uptime_pct")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(100.0);
                Ok(Self::Evaluate { uptime_pct })
            }
            "system_health" => {
                let components = task
                    .payload
                    .get("components")
                    .and_then(|v| v.as_object())
                    .cloned()
                    .ok_or_else(|| {
                        HiveError::InvalidInput(
                            "system_health requires a 'components' object".to_string(),
                        )
                    })?;
                Ok(Self::SystemHealth { components })
            }
            other => Err(HiveError::InvalidInput(format!(
                "monitoring worker has no operation '{other}' (evaluate, system_health)"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct MonitoringWorker {
    telemetry: WorkerTelemetry,
    ctx: WorkerContext,
}

impl MonitoringWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            telemetry: WorkerTelemetry::new(),
            ctx,
        }
    }
}

#[async_trait]
impl Worker for MonitoringWorker {
    fn name(&self) -> &'static str {
        "monitoring"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["evaluate", "system_health"]
    }

    fn telemetry(&self) -> &WorkerTelemetry {
        &self.telemetry
    }

    async fn process(&self, task: &Task) -> HiveResult<serde_json::Value> {
        match MonitoringOperation::parse(task)? {
            MonitoringOperation::Evaluate { uptime_pct } => Ok(json!({
                "score": uptime_pct.clamp(0.0, 100.0),
            })),
            MonitoringOperation::SystemHealth { components } => {
                let total = components.len();
                let unhealthy: Vec<&String> = components
                    .iter()
                    .filter(|(_, v)| !v.as_bool().unwrap_or(false))
                    .map(|(k, _)| k)
                    .collect();

                let all_healthy = unhealthy.is_empty();
                if !all_healthy {
                    if let Some(board) = &self.ctx.board {
                        board.post(
                            "monitoring",
                            Category::WorkerStatus,
                            "components unhealthy",
                            json!({"unhealthy": unhealthy}),
                            vec!["health".to_string()],
                            2,
                            PostTtl::Hours(1),
                        );
                    }
                }

                Ok(json!({
                    "all_healthy": all_healthy,
                    "total_components": total,
                    "unhealthy": unhealthy,
                }))
            }
        }
    }
}
