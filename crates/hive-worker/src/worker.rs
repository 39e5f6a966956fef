//! # Worker Trait & Telemetry
//!
//! A worker is a named unit implementing one operation: `process(task) ->
//! result`. Each worker parses the task into its own closed operation enum
//! and dispatches with a total match; an unknown task type is an
//! `InvalidInput` error at the parse boundary, never a silent fallthrough.
//!
//! Statistics are monotonic atomic counters owned by the worker. `status`
//! and health are derived from them, never stored.

use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::time::Instant;

use async_trait::async_trait;
use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use hive_shared::{HiveResult, Task, TaskResult};

/// Window of recent outcomes used for the degraded classification.
const OUTCOME_WINDOW: usize = 100;

/// Error rate over the window above which a worker counts as degraded.
const DEGRADED_ERROR_RATE: f64 = 0.20;

/// Seconds of recency that count as "active" for health reporting.
const ACTIVE_WINDOW_S: i64 = 10;

/// Derived worker status.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum WorkerStatus {
    Idle,
    Busy,
    Degraded,
    Error,
}

/// Health classification for the registry's fleet report.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum HealthState {
    /// Processed a task within the last ten seconds and the last
    /// operation succeeded.
    Active,
    Idle,
    /// Last operation failed.
    Error,
    /// Error rate above 20% over the recent window.
    Degraded,
}

/// Counter snapshot for one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerStats {
    pub name: String,
    pub task_count: u64,
    pub success_count: u64,
    pub error_count: u64,
    pub last_task_at: Option<DateTime<Utc>>,
    pub success_rate: f64,
    pub status: WorkerStatus,
    pub llm_enabled: bool,
}

/// Health report for one worker.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WorkerHealth {
    pub name: String,
    pub state: HealthState,
    pub error_rate: f64,
    pub last_task_at: Option<DateTime<Utc>>,
}

/// Owned by each worker; the registry reads it, the run wrapper writes it.
#[derive(Debug, Default)]
pub struct WorkerTelemetry {
    task_count: AtomicU64,
    success_count: AtomicU64,
    error_count: AtomicU64,
    busy: AtomicBool,
    last_success: AtomicBool,
    last_task_at: Mutex<Option<DateTime<Utc>>>,
    recent_outcomes: Mutex<Vec<bool>>,
}

impl WorkerTelemetry {
    pub fn new() -> Self {
        Self {
            last_success: AtomicBool::new(true),
            ..Self::default()
        }
    }

    fn begin(&self) {
        self.busy.store(true, Ordering::Relaxed);
    }

    fn finish(&self, success: bool) {
        self.task_count.fetch_add(1, Ordering::Relaxed);
        if success {
            self.success_count.fetch_add(1, Ordering::Relaxed);
        } else {
            self.error_count.fetch_add(1, Ordering::Relaxed);
        }
        self.last_success.store(success, Ordering::Relaxed);
        self.busy.store(false, Ordering::Relaxed);
        *self.last_task_at.lock() = Some(Utc::now());

        let mut outcomes = self.recent_outcomes.lock();
        if outcomes.len() == OUTCOME_WINDOW {
            outcomes.remove(0);
        }
        outcomes.push(success);
    }

    /// Error rate over the recent window.
    pub fn error_rate(&self) -> f64 {
        let outcomes = self.recent_outcomes.lock();
        if outcomes.is_empty() {
            return 0.0;
        }
        let errors = outcomes.iter().filter(|ok| !**ok).count();
        errors as f64 / outcomes.len() as f64
    }

    /// Derived status: busy while a task is in flight, error after a
    /// failure, degraded on a high windowed error rate, idle otherwise.
    pub fn status(&self) -> WorkerStatus {
        if self.busy.load(Ordering::Relaxed) {
            WorkerStatus::Busy
        } else if !self.last_success.load(Ordering::Relaxed) {
            WorkerStatus::Error
        } else if self.error_rate() > DEGRADED_ERROR_RATE {
            WorkerStatus::Degraded
        } else {
            WorkerStatus::Idle
        }
    }

    pub fn health(&self, name: &str) -> WorkerHealth {
        let last_task_at = *self.last_task_at.lock();
        let error_rate = self.error_rate();
        let last_success = self.last_success.load(Ordering::Relaxed);

        let state = if !last_success {
            HealthState::Error
        } else if error_rate > DEGRADED_ERROR_RATE {
            HealthState::Degraded
        } else if last_task_at
            .is_some_and(|t| (Utc::now() - t).num_seconds() < ACTIVE_WINDOW_S)
        {
            HealthState::Active
        } else {
            HealthState::Idle
        };

        WorkerHealth {
            name: name.to_string(),
            state,
            error_rate,
            last_task_at,
        }
    }

    pub fn stats(&self, name: &str, llm_enabled: bool) -> WorkerStats {
        let task_count = self.task_count.load(Ordering::Relaxed);
        let success_count = self.success_count.load(Ordering::Relaxed);
        WorkerStats {
            name: name.to_string(),
            task_count,
            success_count,
            error_count: self.error_count.load(Ordering::Relaxed),
            last_task_at: *self.last_task_at.lock(),
            success_rate: if task_count > 0 {
                success_count as f64 / task_count as f64 * 100.0
            } else {
                0.0
            },
            status: self.status(),
            llm_enabled,
        }
    }
}

/// A specialist worker. One `process` operation over a closed set of task
/// types; everything else is plumbing the registry provides.
#[async_trait]
pub trait Worker: Send + Sync + std::fmt::Debug {
    fn name(&self) -> &'static str;

    /// Capability tags used for capability-based routing.
    fn capabilities(&self) -> &'static [&'static str];

    fn telemetry(&self) -> &WorkerTelemetry;

    /// Whether this worker has an LLM bound.
    fn llm_enabled(&self) -> bool {
        false
    }

    /// Record a peer reference by name. Peers are resolved through the
    /// registry at call time; this only stores the name. Best-effort: a
    /// worker that takes no peers ignores the call.
    fn wire_peer(&self, _role: &str, _peer: &str) {}

    /// Names of wired peers as (role, name) pairs.
    fn peers(&self) -> Vec<(String, String)> {
        Vec::new()
    }

    /// Execute one task. Implementations parse `task.task_type` +
    /// `task.payload` into their operation enum and match exhaustively.
    async fn process(&self, task: &Task) -> HiveResult<serde_json::Value>;
}

/// Run a task on a worker, maintaining telemetry and producing the
/// `TaskResult` envelope. This is the only path the registry uses.
pub async fn run_task(worker: &dyn Worker, task: &Task) -> TaskResult {
    let telemetry = worker.telemetry();
    telemetry.begin();
    let started = Instant::now();

    debug!(worker = worker.name(), task = %task.id, task_type = %task.task_type, "task started");

    let result = match worker.process(task).await {
        Ok(data) => {
            telemetry.finish(true);
            TaskResult::success(task.id, worker.name(), data)
        }
        Err(e) => {
            telemetry.finish(false);
            warn!(worker = worker.name(), task = %task.id, error = %e, "task failed");
            TaskResult::failure(task.id, worker.name(), e.to_string(), e.kind())
        }
    };

    let mut result = result.with_duration(started.elapsed());
    result.llm_used = worker.llm_enabled();
    result
}
