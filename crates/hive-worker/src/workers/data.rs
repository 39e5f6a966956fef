//! Data worker: aggregation and windowed statistics over numeric series,
//! plus payload scoring for consensus rounds.

use async_trait::async_trait;
use serde::Deserialize;
use serde_json::json;

use hive_shared::{HiveError, HiveResult, Task};

use crate::worker::{Worker, WorkerTelemetry};
use crate::workers::WorkerContext;

/// Payload keys treated as score-bearing during evaluation.
const SCORE_KEYS: [&str; 4] = ["score", "health_score", "pool_health", "confidence_score"];

#[derive(Debug, Deserialize)]
struct AggregateInput {
    values: Vec<f64>,
}

#[derive(Debug, Deserialize)]
struct WindowInput {
    series: Vec<f64>,
    #[serde(default = "default_window")]
    window: usize,
}

fn default_window() -> usize {
    5
}

#[derive(Debug)]
enum DataOperation {
    /// Mean of every score-bearing field found in the payload.
    Evaluate,
    Aggregate(AggregateInput),
    WindowStats(WindowInput),
}

impl DataOperation {
    fn parse(task: &Task) -> HiveResult<Self> {
        match task.task_type.as_str() {
            "evaluate" => Ok(Self::Evaluate),
            "aggregate" => Ok(Self::Aggregate(
                serde_json::from_value(task.payload.clone())
                    .map_err(|e| HiveError::InvalidInput(format!("aggregate payload: {e}")))?,
            )),
            "window_stats" => Ok(Self::WindowStats(
                serde_json::from_value(task.payload.clone())
                    .map_err(|e| HiveError::InvalidInput(format!("window_stats payload: {e}")))?,
            )),
            other => Err(HiveError::InvalidInput(format!(
                "data worker has no operation '{other}' (evaluate, aggregate, window_stats)"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct DataWorker {
    telemetry: WorkerTelemetry,
    #[allow(dead_code)]
    ctx: WorkerContext,
}

impl DataWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            telemetry: WorkerTelemetry::new(),
            ctx,
        }
    }
}

/// Recursively collect values under score-bearing keys.
fn collect_scores(value: &serde_json::Value, found: &mut Vec<f64>) {
    match value {
        serde_json::Value::Object(map) => {
            for (key, v) in map {
                if SCORE_KEYS.contains(&key.as_str()) {
                    if let Some(n) = v.as_f64() {
                        found.push(n);
                        continue;
                    }
                }
                collect_scores(v, found);
            }
        }
        serde_json::Value::Array(items) => {
            for item in items {
                collect_scores(item, found);
            }
        }
        _ => {}
    }
}

fn mean(values: &[f64]) -> f64 {
    values.iter().sum::<f64>() / values.len() as f64
}

#[async_trait]
impl Worker for DataWorker {
    fn name(&self) -> &'static str {
        "data"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["evaluate", "aggregate", "window_stats"]
    }

    fn telemetry(&self) -> &WorkerTelemetry {
        &self.telemetry
    }

    async fn process(&self, task: &Task) -> HiveResult<serde_json::Value> {
        match DataOperation::parse(task)? {
            DataOperation::Evaluate => {
                let mut scores = Vec::new();
                collect_scores(&task.payload, &mut scores);
                let score = if scores.is_empty() { 50.0 } else { mean(&scores) };
                Ok(json!({
                    "score": score.clamp(0.0, 100.0),
                    "fields_found": scores.len(),
                }))
            }
            DataOperation::Aggregate(input) => {
                if input.values.is_empty() {
                    return Err(HiveError::InvalidInput(
                        "aggregate requires at least one value".to_string(),
                    ));
                }
                let m = mean(&input.values);
                let variance = input
                    .values
                    .iter()
                    .map(|v| (v - m).powi(2))
                    .sum::<f64>()
                    / input.values.len() as f64;
                Ok(json!({
                    "count": input.values.len(),
                    "mean": m,
                    "min": input.values.iter().cloned().fold(f64::INFINITY, f64::min),
                    "max": input.values.iter().cloned().fold(f64::NEG_INFINITY, f64::max),
                    "std_dev": variance.sqrt(),
                }))
            }
            DataOperation::WindowStats(input) => {
                if input.series.is_empty() || input.window == 0 {
                    return Err(HiveError::InvalidInput(
                        "window_stats requires a non-empty series and window > 0".to_string(),
                    ));
                }
                let window = input.window.min(input.series.len());
                let tail = &input.series[input.series.len() - window..];
                let moving_average = mean(tail);
                let overall = mean(&input.series);
                let direction = if moving_average > overall * 1.02 {
                    "up"
                } else if moving_average < overall * 0.98 {
                    "down"
                } else {
                    "flat"
                };
                Ok(json!({
                    "moving_average": moving_average,
                    "overall_mean": overall,
                    "window": window,
                    "direction": direction,
                }))
            }
        }
    }
}
