//! Proposal envelopes and the status machine's vocabulary.

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use uuid::Uuid;

use hive_shared::types::Metadata;

/// What a file change does.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum FileAction {
    Create,
    Modify,
    Delete,
}

/// One file change inside a proposal.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FileChange {
    /// Project-relative path.
    pub path: String,
    pub action: FileAction,
    pub code: String,
}

/// Proposal lifecycle states.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ProposalStatus {
    Draft,
    Validating,
    Testing,
    Fixing,
    Ready,
    Approved,
    Rejected,
    Deployed,
}

/// Why a proposal ended up rejected.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum RejectionReason {
    AttemptsExhausted,
    Unfixable(String),
    AdminRejected,
}

/// One recorded fix attempt.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FixAttempt {
    pub attempt: u32,
    pub analysis: FailureAnalysis,
    /// Paths the fix touched.
    pub changed_paths: Vec<String>,
    pub explanation: String,
    pub timestamp: DateTime<Utc>,
}

/// Error taxonomy for test and validation failures.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ErrorCategory {
    Import,
    Syntax,
    Indentation,
    Undefined,
    Type,
    Attribute,
    FileNotFound,
    Unknown,
}

impl ErrorCategory {
    /// Substring taxonomy over a failure message.
    pub fn categorize(message: &str) -> Self {
        let lower = message.to_lowercase();
        if lower.contains("unresolved import")
            || lower.contains("import")
            || lower.contains("module")
            || lower.contains("crate")
        {
            Self::Import
        } else if lower.contains("syntax") || lower.contains("expected") {
            Self::Syntax
        } else if lower.contains("indent") {
            Self::Indentation
        } else if lower.contains("not defined")
            || lower.contains("cannot find value")
            || lower.contains("cannot find function")
        {
            Self::Undefined
        } else if lower.contains("mismatched types") || lower.contains("type") {
            Self::Type
        } else if lower.contains("attribute") || lower.contains("no method") {
            Self::Attribute
        } else if lower.contains("no such file") || lower.contains("not found") {
            Self::FileNotFound
        } else {
            Self::Unknown
        }
    }

    pub fn root_cause(&self) -> &'static str {
        match self {
            Self::Import => "missing or incorrect imports",
            Self::Syntax | Self::Indentation => "code syntax issues",
            Self::FileNotFound => "file path or structure issues",
            Self::Undefined => "symbol not defined",
            Self::Type | Self::Attribute => "type mismatch or incorrect usage",
            Self::Unknown => "unknown issue, needs manual investigation",
        }
    }
}

/// What went wrong in a validation or test round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FailureAnalysis {
    pub failed_checks: Vec<String>,
    pub categories: Vec<ErrorCategory>,
    pub messages: Vec<String>,
    pub root_cause: String,
}

impl FailureAnalysis {
    pub fn from_messages(failed_checks: Vec<String>, messages: Vec<String>) -> Self {
        let mut categories = Vec::new();
        for message in &messages {
            let category = ErrorCategory::categorize(message);
            if !categories.contains(&category) {
                categories.push(category);
            }
        }
        let root_cause = categories
            .first()
            .map(|c| c.root_cause().to_string())
            .unwrap_or_else(|| "no failures recorded".to_string());
        Self {
            failed_checks,
            categories,
            messages,
            root_cause,
        }
    }
}

/// A set of file changes progressing through the lifecycle.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Proposal {
    pub id: Uuid,
    pub title: String,
    pub description: String,
    pub files: Vec<FileChange>,
    pub priority: u8,
    pub risk_level: String,
    pub status: ProposalStatus,
    pub attempt_count: u32,
    pub fix_history: Vec<FixAttempt>,
    pub rejection: Option<RejectionReason>,
    pub created_by: String,
    pub created_at: DateTime<Utc>,
    pub metadata: Metadata,
}

impl Proposal {
    pub fn new(
        title: impl Into<String>,
        description: impl Into<String>,
        files: Vec<FileChange>,
        created_by: impl Into<String>,
    ) -> Self {
        Self {
            id: Uuid::new_v4(),
            title: title.into(),
            description: description.into(),
            files,
            priority: 0,
            risk_level: "medium".to_string(),
            status: ProposalStatus::Draft,
            attempt_count: 0,
            fix_history: Vec::new(),
            rejection: None,
            created_by: created_by.into(),
            created_at: Utc::now(),
            metadata: Metadata::new(),
        }
    }
}
