//! Sandbox workspaces.
//!
//! Every proposal deploys into `{root}/{proposal-id}/{project path}`.
//! Writes outside that root are refused before they happen; production
//! paths are never touched. Promotion out of a sandbox is an explicit
//! admin action that lives elsewhere.

use std::path::{Component, Path, PathBuf};

use tokio::fs;
use tracing::{debug, info};

use hive_shared::{HiveError, HiveResult};

use super::types::{FileAction, Proposal};

#[derive(Debug, Clone)]
pub struct Sandbox {
    root: PathBuf,
}

impl Sandbox {
    pub fn new(root: impl Into<PathBuf>) -> Self {
        Self { root: root.into() }
    }

    /// Workspace directory for one proposal.
    pub fn workspace(&self, proposal: &Proposal) -> PathBuf {
        self.root.join(proposal.id.to_string())
    }

    /// Resolve a project-relative path inside a proposal's workspace,
    /// refusing anything that would escape it.
    fn resolve(&self, proposal: &Proposal, relative: &str) -> HiveResult<PathBuf> {
        let candidate = Path::new(relative);
        if candidate.is_absolute() {
            return Err(HiveError::ProposalInvalid(format!(
                "absolute path '{relative}' not allowed in sandbox"
            )));
        }
        for component in candidate.components() {
            if matches!(component, Component::ParentDir) {
                return Err(HiveError::ProposalInvalid(format!(
                    "path '{relative}' escapes the sandbox"
                )));
            }
        }
        Ok(self.workspace(proposal).join(candidate))
    }

    /// Materialize the proposal's file changes in its workspace.
    pub async fn deploy(&self, proposal: &Proposal) -> HiveResult<PathBuf> {
        let workspace = self.workspace(proposal);
        fs::create_dir_all(&workspace)
            .await
            .map_err(|e| HiveError::Internal(format!("sandbox create failed: {e}")))?;

        for file in &proposal.files {
            let target = self.resolve(proposal, &file.path)?;
            match file.action {
                FileAction::Create | FileAction::Modify => {
                    if let Some(parent) = target.parent() {
                        fs::create_dir_all(parent).await.map_err(|e| {
                            HiveError::Internal(format!("sandbox mkdir failed: {e}"))
                        })?;
                    }
                    fs::write(&target, &file.code).await.map_err(|e| {
                        HiveError::Internal(format!("sandbox write failed: {e}"))
                    })?;
                    debug!(path = %target.display(), "sandbox file written");
                }
                FileAction::Delete => {
                    if fs::try_exists(&target).await.unwrap_or(false) {
                        fs::remove_file(&target).await.map_err(|e| {
                            HiveError::Internal(format!("sandbox delete failed: {e}"))
                        })?;
                    }
                }
            }
        }

        info!(proposal = %proposal.id, files = proposal.files.len(), "proposal deployed to sandbox");
        Ok(workspace)
    }

    /// Remove a proposal's workspace.
    pub async fn cleanup(&self, proposal: &Proposal) -> HiveResult<()> {
        let workspace = self.workspace(proposal);
        if fs::try_exists(&workspace).await.unwrap_or(false) {
            fs::remove_dir_all(&workspace)
                .await
                .map_err(|e| HiveError::Internal(format!("sandbox cleanup failed: {e}")))?;
        }
        Ok(())
    }
}
