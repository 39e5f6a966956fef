//! Treasury worker: budget enforcement and treasury health scoring.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;
use tracing::warn;

use hive_shared::board::{Category, PostTtl};
use hive_shared::{HiveError, HiveResult, Task};

use crate::worker::{Worker, WorkerTelemetry};
use crate::workers::WorkerContext;

/// Budget ceilings per campaign type.
fn campaign_budget(campaign_type: &str) -> f64 {
    match campaign_type {
        "new_user_welcome" => 5_000_000.0,
        "trading_competition" => 8_000_000.0,
        "referral_program" => 5_000_000.0,
        "social_engagement" => 4_000_000.0,
        "special_events" => 3_000_000.0,
        _ => 1_000_000.0,
    }
}

#[derive(Debug, Deserialize)]
struct BudgetInput {
    campaign_type: String,
    total_cost: f64,
}

#[derive(Debug, Deserialize)]
struct HealthInput {
    balance: f64,
    monthly_burn: f64,
}

#[derive(Debug)]
enum TreasuryOperation {
    /// Score the payload's declared `treasury.health_score` for consensus.
    Evaluate { health_score: f64 },
    CheckBudget(BudgetInput),
    HealthReport(HealthInput),
}

impl TreasuryOperation {
    fn parse(task: &Task) -> HiveResult<Self> {
        match task.task_type.as_str() {
            "evaluate" => {
                let health_score = task
                    .payload
                    .pointer("/treasury/health_score")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(50.0);
                Ok(Self::Evaluate { health_score })
            }
            "check_budget" => Ok(Self::CheckBudget(
                serde_json::from_value(task.payload.clone())
                    .map_err(|e| HiveError::InvalidInput(format!("check_budget payload: {e}")))?,
            )),
            "health_report" => Ok(Self::HealthReport(
                serde_json::from_value(task.payload.clone())
                    .map_err(|e| HiveError::InvalidInput(format!("health_report payload: {e}")))?,
            )),
            other => Err(HiveError::InvalidInput(format!(
                "treasury worker has no operation '{other}' (evaluate, check_budget, health_report)"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct TreasuryWorker {
    telemetry: WorkerTelemetry,
    ctx: WorkerContext,
    peer_names: parking_lot::Mutex<Vec<(String, String)>>,
}

impl TreasuryWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            telemetry: WorkerTelemetry::new(),
            ctx,
            peer_names: parking_lot::Mutex::new(Vec::new()),
        }
    }

    fn health_report(&self, input: &HealthInput) -> serde_json::Value {
        let runway_months = if input.monthly_burn > 0.0 {
            input.balance / input.monthly_burn
        } else {
            f64::INFINITY
        };

        let health_score: f64 = match runway_months {
            r if r >= 18.0 => 90.0,
            r if r >= 12.0 => 75.0,
            r if r >= 6.0 => 55.0,
            r if r >= 3.0 => 35.0,
            _ => 15.0,
        };

        let mut recommendations = Vec::new();
        if runway_months < 6.0 {
            recommendations.push("reduce discretionary spend");
            recommendations.push("pause non-essential campaigns");
        }
        if runway_months < 3.0 {
            recommendations.push("freeze all outbound allocations");
        }

        if health_score < 40.0 {
            warn!(runway_months, "treasury health degraded");
            if let Some(board) = &self.ctx.board {
                board.post(
                    "treasury",
                    Category::TreasuryStatus,
                    "treasury runway below threshold",
                    json!({"runway_months": runway_months, "health_score": health_score}),
                    vec!["runway".to_string()],
                    2,
                    PostTtl::Hours(12),
                );
            }
        }

        json!({
            "health_score": health_score,
            "runway_months": if runway_months.is_finite() { runway_months } else { -1.0 },
            "recommendations": recommendations,
        })
    }
}

#[async_trait]
impl Worker for TreasuryWorker {
    fn name(&self) -> &'static str {
        "treasury"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["evaluate", "check_budget", "health_report"]
    }

    fn telemetry(&self) -> &WorkerTelemetry {
        &self.telemetry
    }

    fn wire_peer(&self, role: &str, peer: &str) {
        // The blockchain peer supplies on-chain balances when wired; only
        // the name is stored, resolution happens through the registry.
        self.peer_names
            .lock()
            .push((role.to_string(), peer.to_string()));
    }

    fn peers(&self) -> Vec<(String, String)> {
        self.peer_names.lock().clone()
    }

    async fn process(&self, task: &Task) -> HiveResult<serde_json::Value> {
        match TreasuryOperation::parse(task)? {
            TreasuryOperation::Evaluate { health_score } => Ok(json!({
                "score": health_score.clamp(0.0, 100.0),
                "basis": "treasury_health",
            })),
            TreasuryOperation::CheckBudget(input) => {
                let limit = campaign_budget(&input.campaign_type);
                let within_budget = input.total_cost <= limit;
                Ok(json!({
                    "within_budget": within_budget,
                    "limit": limit,
                    "total_cost": input.total_cost,
                    "remaining": (limit - input.total_cost).max(0.0),
                }))
            }
            TreasuryOperation::HealthReport(input) => Ok(self.health_report(&input)),
        }
    }
}
