//! Pattern worker: trend detection over numeric series. Reads the data
//! worker's board posts when wired, and can annotate findings through a
//! bound LLM.

use async_trait::async_trait;
use parking_lot::Mutex;
use serde::Deserialize;
use serde_json::json;

use hive_shared::llm::GenerateOptions;
use hive_shared::{HiveError, HiveResult, Task};

use crate::worker::{Worker, WorkerTelemetry};
use crate::workers::WorkerContext;

#[derive(Debug, Deserialize)]
struct TrendInput {
    series: Vec<f64>,
}

#[derive(Debug)]
enum PatternOperation {
    /// Score any `series` in the payload by trend stability; neutral when
    /// absent.
    Evaluate { series: Option<Vec<f64>> },
    DetectTrend(TrendInput),
}

impl PatternOperation {
    fn parse(task: &Task) -> HiveResult<Self> {
        match task.task_type.as_str() {
            "evaluate" => {
                let series = task
                    .payload
                    .get("series")
                    .and_then(|v| serde_json::from_value(v.clone()).ok());
                Ok(Self::Evaluate { series })
            }
            "detect_trend" => Ok(Self::DetectTrend(
                serde_json::from_value(task.payload.clone())
                    .map_err(|e| HiveError::InvalidInput(format!("detect_trend payload: {e}")))?,
            )),
            other => Err(HiveError::InvalidInput(format!(
                "pattern worker has no operation '{other}' (evaluate, detect_trend)"
            ))),
        }
    }
}

/// Least-squares slope over an evenly spaced series.
fn slope(series: &[f64]) -> f64 {
    let n = series.len() as f64;
    let mean_x = (n - 1.0) / 2.0;
    let mean_y = series.iter().sum::<f64>() / n;
    let mut num = 0.0;
    let mut den = 0.0;
    for (i, y) in series.iter().enumerate() {
        let dx = i as f64 - mean_x;
        num += dx * (y - mean_y);
        den += dx * dx;
    }
    if den == 0.0 {
        0.0
    } else {
        num / den
    }
}

#[derive(Debug)]
pub struct PatternWorker {
    telemetry: WorkerTelemetry,
    ctx: WorkerContext,
    peer_names: Mutex<Vec<(String, String)>>,
}

impl PatternWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            telemetry: WorkerTelemetry::new(),
            ctx,
            peer_names: Mutex::new(Vec::new()),
        }
    }

    async fn detect(&self, series: &[f64]) -> HiveResult<serde_json::Value> {
        if series.len() < 2 {
            return Err(HiveError::InvalidInput(
                "detect_trend requires at least two points".to_string(),
            ));
        }

        let s = slope(series);
        let mean = series.iter().sum::<f64>() / series.len() as f64;
        // Normalize against the series magnitude so the direction call is
        // scale-independent.
        let relative = if mean.abs() > f64::EPSILON { s / mean.abs() } else { s };
        let direction = if relative > 0.01 {
            "up"
        } else if relative < -0.01 {
            "down"
        } else {
            "flat"
        };
        let confidence = (relative.abs() * 10.0).min(1.0);

        let annotation = match &self.ctx.llm {
            Some(llm) => llm
                .generate(
                    &format!(
                        "One sentence on a {direction} trend with relative slope {relative:.4}."
                    ),
                    &GenerateOptions::precise(),
                )
                .await
                .ok(),
            None => None,
        };

        Ok(json!({
            "direction": direction,
            "slope": s,
            "relative_slope": relative,
            "confidence": confidence,
            "points": series.len(),
            "annotation": annotation,
        }))
    }
}

#[async_trait]
impl Worker for PatternWorker {
    fn name(&self) -> &'static str {
        "pattern"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["evaluate", "detect_trend"]
    }

    fn telemetry(&self) -> &WorkerTelemetry {
        &self.telemetry
    }

    fn llm_enabled(&self) -> bool {
        self.ctx.llm.is_some()
    }

    fn wire_peer(&self, role: &str, peer: &str) {
        self.peer_names
            .lock()
            .push((role.to_string(), peer.to_string()));
    }

    fn peers(&self) -> Vec<(String, String)> {
        self.peer_names.lock().clone()
    }

    async fn process(&self, task: &Task) -> HiveResult<serde_json::Value> {
        match PatternOperation::parse(task)? {
            PatternOperation::Evaluate { series } => {
                // A stable or rising series scores high; a falling one low.
                let score = match series.as_deref() {
                    Some(s) if s.len() >= 2 => {
                        let relative = slope(s) / s.iter().sum::<f64>().abs().max(f64::EPSILON)
                            * s.len() as f64;
                        (50.0 + relative * 500.0).clamp(0.0, 100.0)
                    }
                    _ => 50.0,
                };
                Ok(json!({"score": score}))
            }
            PatternOperation::DetectTrend(input) => self.detect(&input.series).await,
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
    async fn test_evaluate_without_series_neutral() {
        let w = PatternWorker::new(WorkerContext::empty());
        let result = run_task(&w, &task("evaluate", json!({}))).await;
        assert_eq!(result.numeric_field("score"), Some(50.0));
    }

    #[tokio::test]
    async fn test_detect_uptrend() {
        let w = PatternWorker::new(WorkerContext::empty());
        let result = run_task(
            &w,
            &task("detect_trend", json!({"series": [1.0, 2.0, 3.0, 4.0, 5.0]})),
        )
        .await;
        let data = result.data.unwrap();
        assert_eq!(data["direction"], "up");
        assert!(data["confidence"].as_f64().unwrap() > 0.5);
    }

    #[tokio::test]
    async fn test_detect_downtrend() {
        let w = PatternWorker::new(WorkerContext::empty());
        let result = run_task(
            &w,
            &task("detect_trend", json!({"series": [10.0, 8.0, 6.0, 4.0]})),
        )
        .await;
        assert_eq!(result.data.unwrap()["direction"], "down");
    }

    #[tokio::test]
    async fn test_detect_flat() {
        let w = PatternWorker::new(WorkerContext::empty());
        let result = run_task(
            &w,
            &task("detect_trend", json!({"series": [5.0, 5.0, 5.0, 5.0]})),
        )
        .await;
        assert_eq!(result.data.unwrap()["direction"], "flat");
    }

    #[tokio::test]
    async fn test_single_point_rejected() {
        let w = PatternWorker::new(WorkerContext::empty());
        let result = run_task(&w, &task("detect_trend", json!({"series": [1.0]}))).await;
        assert!(!result.success);
    }
}
