//! Blockchain worker: gas estimation and balance reads behind stubbed
//! adapters. Real RPC clients plug in behind the same operations; nothing
//! here talks to a chain.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use hive_shared::{HiveError, HiveResult, Task};

use crate::worker::{Worker, WorkerTelemetry};
use crate::workers::WorkerContext;

/// Gas units per operation kind.
fn gas_units(operation: &str) -> Option<u64> {
    match operation {
        "transfer" => Some(21_000),
        "swap" => Some(150_000),
        "add_liquidity" => Some(200_000),
        "remove_liquidity" => Some(180_000),
        "stake" => Some(120_000),
        "bridge_lock" => Some(250_000),
        _ => None,
    }
}

#[derive(Debug, Deserialize)]
struct GasInput {
    operation: String,
    #[serde(default = "default_gwei")]
    gas_price_gwei: f64,
}

fn default_gwei() -> f64 {
    25.0
}

#[derive(Debug, Deserialize)]
struct BalanceInput {
    address: String,
}

#[derive(Debug)]
enum BlockchainOperation {
    /// Gas-cost health for consensus: cheap gas scores high.
    Evaluate { gas_price_gwei: f64 },
    EstimateGas(GasInput),
    Balance(BalanceInput),
}

impl BlockchainOperation {
    fn parse(task: &Task) -> HiveResult<Self> {
        match task.task_type.as_str() {
            "evaluate" => {
                let gas_price_gwei = task
                    .payload
                    .get("gas_price_gwei")
                    .and_then(|v| v.as_f64())
                    .unwrap_or(default_gwei());
                Ok(Self::Evaluate { gas_price_gwei })
            }
            "estimate_gas" => Ok(Self::EstimateGas(
                serde_json::from_value(task.payload.clone())
                    .map_err(|e| HiveError::InvalidInput(format!("estimate_gas payload: {e}")))?,
            )),
            "balance" => Ok(Self::Balance(
                serde_json::from_value(task.payload.clone())
                    .map_err(|e| HiveError::InvalidInput(format!("balance payload: {e}")))?,
            )),
            other => Err(HiveError::InvalidInput(format!(
                "blockchain worker has no operation '{other}' (evaluate, estimate_gas, balance)"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct BlockchainWorker {
    telemetry: WorkerTelemetry,
    #[allow(dead_code)]
    ctx: WorkerContext,
}

impl BlockchainWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            telemetry: WorkerTelemetry::new(),
            ctx,
        }
    }
}

#[async_trait]
impl Worker for BlockchainWorker {
    fn name(&self) -> &'static str {
        "blockchain"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["evaluate", "estimate_gas", "balance"]
    }

    fn telemetry(&self) -> &WorkerTelemetry {
        &self.telemetry
    }

    async fn process(&self, task: &Task) -> HiveResult<serde_json::Value> {
        match BlockchainOperation::parse(task)? {
            BlockchainOperation::Evaluate { gas_price_gwei } => {
                // 10 gwei or less is ideal; 200+ is unusable.
                let score = (100.0 - (gas_price_gwei - 10.0).max(0.0) / 1.9).clamp(0.0, 100.0);
                Ok(json!({"score": score, "gas_price_gwei": gas_price_gwei}))
            }
            BlockchainOperation::EstimateGas(input) => {
                let units = gas_units(&input.operation).ok_or_else(|| {
                    HiveError::InvalidInput(format!(
                        "no gas profile for operation '{}'",
                        input.operation
                    ))
                })?;
                let cost_gwei = units as f64 * input.gas_price_gwei;
                Ok(json!({
                    "operation": input.operation,
                    "gas_units": units,
                    "gas_price_gwei": input.gas_price_gwei,
                    "cost_eth": cost_gwei * 1e-9,
                }))
            }
            BlockchainOperation::Balance(input) => {
                if !input.address.starts_with("0x") || input.address.len() != 42 {
                    return Err(HiveError::InvalidInput(
                        "address must be 0x-prefixed and 42 characters".to_string(),
                    ));
                }
                // Deterministic stub: derived from the address bytes so
                // repeated reads agree.
                let seed: u64 = input
                    .address
                    .bytes()
                    .fold(0u64, |acc, b| acc.wrapping_mul(31).wrapping_add(u64::from(b)));
                let balance = (seed % 10_000_000) as f64 / 100.0;
                Ok(json!({
                    "address": input.address,
                    "balance": balance,
                    "source": "stub",
                }))
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::worker::run_task;
    use hive_shared::UserId;

    fn task(task_type: &str, payload: serde_json::Value) -> Task {
        Task::new(task_type, payload, UserId::from("t"))
    }

    #[tokio::test]
    async fn test_gas_estimate() {
        let w = BlockchainWorker::new(WorkerContext::empty());
        let result = run_task(
            &w,
            &task("estimate_gas", json!({"operation": "swap", "gas_price_gwei": 40.0})),
        )
        .await;
        let data = result.data.unwrap();
        assert_eq!(data["gas_units"], 150_000);
        assert!((data["cost_eth"].as_f64().unwrap() - 0.006).abs() < 1e-9);
    }

    #[tokio::test]
    async fn test_unknown_gas_operation_rejected() {
        let w = BlockchainWorker::new(WorkerContext::empty());
        let result = run_task(&w, &task("estimate_gas", json!({"operation": "teleport"}))).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_balance_deterministic() {
        let w = BlockchainWorker::new(WorkerContext::empty());
        let addr = "0x00000000000000000000000000000000000000ab";
        let a = run_task(&w, &task("balance", json!({"address": addr}))).await;
        let b = run_task(&w, &task("balance", json!({"address": addr}))).await;
        assert_eq!(
            a.data.unwrap()["balance"].as_f64(),
            b.data.unwrap()["balance"].as_f64()
        );
    }

    #[tokio::test]
    async fn test_malformed_address_rejected() {
        let w = BlockchainWorker::new(WorkerContext::empty());
        let result = run_task(&w, &task("balance", json!({"address": "not-an-address"}))).await;
        assert!(!result.success);
    }

    #[tokio::test]
    async fn test_evaluate_cheap_gas_scores_high() {
        let w = BlockchainWorker::new(WorkerContext::empty());
        let result = run_task(&w, &task("evaluate", json!({"gas_price_gwei": 10.0}))).await;
        assert_eq!(result.numeric_field("score"), Some(100.0));

        let result = run_task(&w, &task("evaluate", json!({"gas_price_gwei": 200.0}))).await;
        assert!(result.numeric_field("score").unwrap() < 1.0);
    }
}
