//! # Proposal Engine
//!
//! Validate -> auto-fix loop -> sandboxed test -> approval. Proposals
//! never touch production paths; every one gets a content-addressed
//! workspace under the sandbox root, and the fix loop is bounded by the
//! configured attempt budget.

pub mod engine;
pub mod fixer;
pub mod sandbox;
pub mod types;
pub mod validator;

pub use engine::{AcceptingRunner, ProposalEngine, TestReport, TestRunner};
pub use fixer::{Fixer, FixOutcome, LlmFixer};
pub use sandbox::Sandbox;
pub use types::{
    ErrorCategory, FailureAnalysis, FileAction, FileChange, FixAttempt, Proposal, ProposalStatus,
    RejectionReason,
};
pub use validator::{ProposalValidator, ValidationReport};
