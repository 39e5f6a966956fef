//! # hive-shared
//!
//! Shared foundation for the hive orchestration system: the error
//! taxonomy, configuration, core envelopes, the durable bus, the knowledge
//! board, the security pipeline, the LLM seam, and the resilience layer.
//!
//! Ownership flows downward from the supervisor: it owns the bus, board,
//! and security pipeline built from this crate and passes handles to the
//! registry and workers as explicit collaborators.

pub mod board;
pub mod config;
pub mod error;
pub mod llm;
pub mod messaging;
pub mod resilience;
pub mod security;
pub mod types;

pub use config::HiveConfig;
pub use error::{HiveError, HiveResult};
pub use types::{
    Decision, DecisionAction, DecisionConfidence, DecisionFactor, Task, TaskPriority, TaskResult,
    UserId,
};
