//! Security worker: risk assessment over task payloads and free text.
//!
//! Distinct from the security *pipeline*: the pipeline guards the process
//! boundary, this worker contributes a security opinion to consensus
//! rounds and audits arbitrary text on request.

use async_trait::async_trait;
use serde_json::json;
use tracing::warn;

use hive_shared::board::{Category, PostTtl};
use hive_shared::llm::GenerateOptions;
use hive_shared::security::detector;
use hive_shared::{HiveError, HiveResult, Task};

use crate::worker::{Worker, WorkerTelemetry};
use crate::workers::WorkerContext;

/// Risk level carried in evaluation payloads, mapped onto a sub-score.
fn risk_level_score(level: &str) -> Option<f64> {
    match level {
        "low" => Some(95.0),
        "medium" => Some(60.0),
        "high" => Some(30.0),
        "critical" => Some(5.0),
        _ => None,
    }
}

#[derive(Debug)]
enum SecurityOperation {
    /// Score the payload's declared `security.risk_level` for consensus.
    Evaluate { risk_level: String },
    /// Scan arbitrary text for injection patterns.
    AssessRisk { subject: String },
}

impl SecurityOperation {
    fn parse(task: &Task) -> HiveResult<Self> {
        match task.task_type.as_str() {
            "evaluate" => {
                let risk_level = task
                    .payload
                    .pointer("/security/risk_level")
                    .and_then(|v| v.as_str())
                    .unwrap_or("medium")
                    .to_string();
                Ok(Self::Evaluate { risk_level })
            }
            "assess_risk" => {
                let subject = task
                    .payload
                    .get("subject")
                    .and_then(|v| v.as_str())
                    .ok_or_else(|| {
                        HiveError::InvalidInput("assess_risk requires a 'subject' string".into())
                    })?
                    .to_string();
                Ok(Self::AssessRisk { subject })
            }
            other => Err(HiveError::InvalidInput(format!(
                "security worker has no operation '{other}' (evaluate, assess_risk)"
            ))),
        }
    }
}

#[derive(Debug)]
pub struct SecurityWorker {
    telemetry: WorkerTelemetry,
    ctx: WorkerContext,
}

impl SecurityWorker {
    pub fn new(ctx: WorkerContext) -> Self {
        Self {
            telemetry: WorkerTelemetry::new(),
            ctx,
        }
    }

    async fn assess(&self, subject: &str) -> serde_json::Value {
        let detection = detector::detect(subject);

        let recommendation = if detection.risk_score >= 70 {
            "reject"
        } else if detection.risk_score >= 30 {
            "review"
        } else {
            "proceed"
        };

        if detection.risk_score >= 50 {
            warn!(risk = detection.risk_score, "security worker flagged input");
            if let Some(board) = &self.ctx.board {
                board.post(
                    "security",
                    Category::SecurityAlerts,
                    "high-risk input detected",
                    json!({
                        "risk_score": detection.risk_score,
                        "patterns": detection.matched_patterns,
                    }),
                    vec!["injection".to_string()],
                    2,
                    PostTtl::Hours(12),
                );
            }
        }

        // The LLM adds a narrative when bound; its absence or failure
        // never changes the numeric verdict.
        let narrative = match &self.ctx.llm {
            Some(llm) => llm
                .generate(
                    &format!(
                        "Summarize in one sentence why text matching these patterns is risky: {}",
                        detection.matched_patterns.join("; ")
                    ),
                    &GenerateOptions::precise(),
                )
                .await
                .ok(),
            None => None,
        };

        json!({
            "risk_score": detection.risk_score,
            "matched_patterns": detection.matched_patterns,
            "recommendation": recommendation,
            "reasoning": detection.reasoning,
            "narrative": narrative,
        })
    }
}

#[async_trait]
impl Worker for SecurityWorker {
    fn name(&self) -> &'static str {
        "security"
    }

    fn capabilities(&self) -> &'static [&'static str] {
        &["evaluate", "assess_risk"]
    }

    fn telemetry(&self) -> &WorkerTelemetry {
        &self.telemetry
    }

    fn llm_enabled(&self) -> bool {
        self.ctx.llm.is_some()
    }

    async fn process(&self, task: &Task) -> HiveResult<serde_json::Value> {
        match SecurityOperation::parse(task)? {
            SecurityOperation::Evaluate { risk_level } => {
                let score = risk_level_score(&risk_level).ok_or_else(|| {
                    HiveError::InvalidInput(format!("unknown risk level '{risk_level}'"))
                })?;
                Ok(json!({
                    "score": score,
                    "risk_level": risk_level,
                }))
            }
            SecurityOperation::AssessRisk { subject } => Ok(self.assess(&subject).await),
        }
    }
}
