//! # hive-worker
//!
//! The worker seam and the built-in specialist fleet. A worker implements
//! one operation, `process(task) -> result`, over a closed set of task
//! types; statistics are atomic counters it owns, and status is always
//! derived. The registry in the orchestration crate is the only caller.

pub mod worker;
pub mod workers;

pub use worker::{
    run_task, HealthState, Worker, WorkerHealth, WorkerStats, WorkerStatus, WorkerTelemetry,
};
pub use workers::{
    BlockchainWorker, DataWorker, MathsWorker, MonitoringWorker, PatternWorker, SecurityWorker,
    TreasuryWorker, WorkerContext,
};
