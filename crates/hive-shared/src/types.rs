//! # Core Envelopes
//!
//! The schema-checked types that cross component boundaries: tasks handed to
//! workers, results handed back, and the decisions the consensus engine
//! emits. Free-form maps live only *inside* worker payloads; everything at a
//! boundary is typed here.

use std::collections::BTreeMap;
use std::time::Duration;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

/// Opaque origin of a request: a hash of whatever identity the outer layer
/// authenticated. Never a domain user id.
#[derive(Debug, Clone, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(transparent)]
pub struct UserId(pub String);

impl UserId {
    pub fn as_str(&self) -> &str {
        &self.0
    }
}

impl std::fmt::Display for UserId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(&self.0)
    }
}

impl From<&str> for UserId {
    fn from(s: &str) -> Self {
        Self(s.to_string())
    }
}

/// Task priority. `Critical` is expected to be rare; the bus relies on that
/// to get away without a starvation guard.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize, Default)]
#[serde(rename_all = "snake_case")]
pub enum TaskPriority {
    #[default]
    Normal,
    High,
    Critical,
}

impl TaskPriority {
    /// Queue lane mapping: anything above normal rides the priority lane.
    pub fn lane(&self) -> u8 {
        match self {
            Self::Normal => 0,
            Self::High => 1,
            Self::Critical => 2,
        }
    }
}

/// A unit of work routed to one or more workers. Immutable once enqueued.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Task {
    pub id: Uuid,
    /// String tag consumed by each worker's typed operation parser.
    pub task_type: String,
    /// Worker-internal payload. Gated at entry to every public operation.
    pub payload: serde_json::Value,
    #[serde(default)]
    pub priority: TaskPriority,
    /// Absolute deadline; `None` means the dispatcher default applies.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub deadline: Option<DateTime<Utc>>,
    /// Opaque origin hash.
    pub origin: UserId,
    pub created_at: DateTime<Utc>,
}

impl Task {
    pub fn new(task_type: impl Into<String>, payload: serde_json::Value, origin: UserId) -> Self {
        Self {
            id: Uuid::new_v4(),
            task_type: task_type.into(),
            payload,
            priority: TaskPriority::Normal,
            deadline: None,
            origin,
            created_at: Utc::now(),
        }
    }

    pub fn with_priority(mut self, priority: TaskPriority) -> Self {
        self.priority = priority;
        self
    }

    pub fn with_deadline(mut self, deadline: DateTime<Utc>) -> Self {
        self.deadline = Some(deadline);
        self
    }

    /// Remaining budget until the deadline, if one is set. Already-expired
    /// deadlines clamp to zero so callers produce an immediate timeout
    /// instead of a negative duration panic.
    pub fn remaining_budget(&self) -> Option<Duration> {
        self.deadline.map(|d| {
            (d - Utc::now())
                .to_std()
                .unwrap_or(Duration::ZERO)
        })
    }
}

/// Outcome of a single worker invocation. Produced exactly once per call.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct TaskResult {
    pub task_id: Uuid,
    pub worker: String,
    pub success: bool,
    /// Result payload on success.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub data: Option<serde_json::Value>,
    /// Error description on failure.
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    /// Stable error kind tag (matches `HiveError::kind`).
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub error_kind: Option<String>,
    pub duration_ms: u64,
    #[serde(default)]
    pub llm_used: bool,
    /// Self-reported confidence in [0, 1].
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub confidence: Option<f64>,
}

impl TaskResult {
    pub fn success(task_id: Uuid, worker: impl Into<String>, data: serde_json::Value) -> Self {
        Self {
            task_id,
            worker: worker.into(),
            success: true,
            data: Some(data),
            error: None,
            error_kind: None,
            duration_ms: 0,
            llm_used: false,
            confidence: None,
        }
    }

    pub fn failure(
        task_id: Uuid,
        worker: impl Into<String>,
        error: impl Into<String>,
        error_kind: &'static str,
    ) -> Self {
        Self {
            task_id,
            worker: worker.into(),
            success: false,
            data: None,
            error: Some(error.into()),
            error_kind: Some(error_kind.to_string()),
            duration_ms: 0,
            llm_used: false,
            confidence: None,
        }
    }

    /// Synthetic result the dispatcher emits when a worker call exceeds its
    /// deadline. Consensus treats it like any other failure.
    pub fn timeout(task_id: Uuid, worker: impl Into<String>, elapsed: Duration) -> Self {
        let mut result = Self::failure(
            task_id,
            worker,
            format!("deadline exceeded after {elapsed:?}"),
            "timeout",
        );
        result.duration_ms = elapsed.as_millis() as u64;
        result
    }

    pub fn with_duration(mut self, elapsed: Duration) -> Self {
        self.duration_ms = elapsed.as_millis() as u64;
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = Some(confidence.clamp(0.0, 1.0));
        self
    }

    /// Fetch a numeric field out of the result payload, tolerating both
    /// integer and float encodings.
    pub fn numeric_field(&self, key: &str) -> Option<f64> {
        self.data.as_ref()?.get(key)?.as_f64()
    }
}

/// Verdict kinds emitted by the consensus engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionAction {
    Approve,
    Review,
    Reject,
}

/// Confidence bucket on a decision.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DecisionConfidence {
    High,
    Medium,
    Low,
}

/// One contributing factor inside a decision: which source said what, and
/// how much it moved the final score.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DecisionFactor {
    pub source: String,
    pub sub_score: f64,
    pub weight: f64,
    pub weighted: f64,
}

/// Consensus engine output. Append-only in the decision log.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Decision {
    pub decision_type: String,
    pub action: DecisionAction,
    pub reasoning: String,
    pub confidence: DecisionConfidence,
    pub factors: Vec<DecisionFactor>,
    /// Aggregate score in [0, 100].
    pub score: f64,
    pub timestamp: DateTime<Utc>,
    pub requires_human_approval: bool,
}

/// Stable ordering for per-source conflict resolution: lower rank wins.
/// Security always outranks advisory sources.
pub fn source_priority(source: &str) -> u8 {
    match source {
        "security" => 0,
        "monitoring" => 1,
        "treasury" => 2,
        "maths" => 3,
        "blockchain" => 4,
        "pattern" => 5,
        "data" => 6,
        _ => 7,
    }
}

/// Free-form string map used for metadata on proposals and board posts.
pub type Metadata = BTreeMap<String, String>;
