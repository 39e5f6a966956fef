//! Proposal lifecycle engine.
//!
//! Drives one proposal through validate -> test -> fix cycles until it is
//! ready, the fixer declares it unfixable, or the attempt budget runs out.
//! Each cycle counts against `attempt_count`; a fix is generated after
//! every failing cycle, including the last, so the history always shows
//! what was tried.

use std::sync::Arc;

use async_trait::async_trait;
use chrono::Utc;
use tracing::{info, warn};

use hive_shared::HiveResult;

use super::fixer::Fixer;
use super::sandbox::Sandbox;
use super::types::{
    FailureAnalysis, FixAttempt, Proposal, ProposalStatus, RejectionReason,
};
use super::validator::ProposalValidator;

/// Outcome of a sandbox test run.
#[derive(Debug, Clone)]
pub struct TestReport {
    pub passed: bool,
    /// (check name, failure message) pairs.
    pub failures: Vec<(String, String)>,
}

impl TestReport {
    pub fn pass() -> Self {
        Self {
            passed: true,
            failures: Vec::new(),
        }
    }

    pub fn fail(failures: Vec<(String, String)>) -> Self {
        Self {
            passed: false,
            failures,
        }
    }
}

/// Seam for the sandbox test runner.
#[async_trait]
pub trait TestRunner: Send + Sync + std::fmt::Debug {
    async fn run(&self, proposal: &Proposal, workspace: &std::path::Path)
        -> HiveResult<TestReport>;
}

/// Runner that accepts any proposal that made it through validation.
/// Stands in where no toolchain-backed runner is wired.
#[derive(Debug, Default)]
pub struct AcceptingRunner;

#[async_trait]
impl TestRunner for AcceptingRunner {
    async fn run(
        &self,
        _proposal: &Proposal,
        _workspace: &std::path::Path,
    ) -> HiveResult<TestReport> {
        Ok(TestReport::pass())
    }
}

#[derive(Debug)]
pub struct ProposalEngine {
    validator: ProposalValidator,
    sandbox: Sandbox,
    runner: Arc<dyn TestRunner>,
    fixer: Arc<dyn Fixer>,
    max_attempts: u32,
}

impl ProposalEngine {
    pub fn new(
        validator: ProposalValidator,
        sandbox: Sandbox,
        runner: Arc<dyn TestRunner>,
        fixer: Arc<dyn Fixer>,
        max_attempts: u32,
    ) -> Self {
        Self {
            validator,
            sandbox,
            runner,
            fixer,
            max_attempts,
        }
    }

    /// Run the full lifecycle on a proposal. Terminal status is `Ready`
    /// (awaiting approval) or `Rejected`.
    pub async fn process(&self, proposal: &mut Proposal) -> HiveResult<()> {
        info!(proposal = %proposal.id, title = %proposal.title, "proposal processing started");

        for attempt in 1..=self.max_attempts {
            proposal.attempt_count = attempt;

            proposal.status = ProposalStatus::Validating;
            let validation = self.validator.validate_and_fix(proposal);

            let analysis = if !validation.is_valid {
                FailureAnalysis::from_messages(
                    vec!["validation".to_string()],
                    validation.errors.clone(),
                )
            } else {
                proposal.status = ProposalStatus::Testing;
                let workspace = self.sandbox.deploy(proposal).await?;
                let report = self.runner.run(proposal, &workspace).await?;

                if report.passed {
                    proposal.status = ProposalStatus::Ready;
                    info!(
                        proposal = %proposal.id,
                        attempts = attempt,
                        "proposal ready for approval"
                    );
                    return Ok(());
                }

                let (checks, messages): (Vec<String>, Vec<String>) =
                    report.failures.into_iter().unzip();
                FailureAnalysis::from_messages(checks, messages)
            };

            warn!(
                proposal = %proposal.id,
                attempt,
                root_cause = %analysis.root_cause,
                "proposal cycle failed"
            );

            proposal.status = ProposalStatus::Fixing;
            let fix = self
                .fixer
                .generate_fix(proposal, &analysis, &proposal.fix_history)
                .await?;

            proposal.fix_history.push(FixAttempt {
                attempt,
                analysis,
                changed_paths: fix.changes.iter().map(|c| c.path.clone()).collect(),
                explanation: fix.explanation.clone(),
                timestamp: Utc::now(),
            });

            if fix.unfixable {
                proposal.status = ProposalStatus::Rejected;
                proposal.rejection = Some(RejectionReason::Unfixable(
                    fix.reason
                        .unwrap_or_else(|| "fixer declared the failure unfixable".to_string()),
                ));
                warn!(proposal = %proposal.id, "proposal unfixable, rejected");
                return Ok(());
            }

            // Apply the fix: replace matching files, append new ones.
            for change in fix.changes {
                match proposal.files.iter_mut().find(|f| f.path == change.path) {
                    Some(existing) => {
                        existing.code = change.code;
                        existing.action = change.action;
                    }
                    None => proposal.files.push(change),
                }
            }
        }

        proposal.status = ProposalStatus::Rejected;
        proposal.rejection = Some(RejectionReason::AttemptsExhausted);
        warn!(
            proposal = %proposal.id,
            attempts = proposal.attempt_count,
            "fix budget exhausted, proposal rejected"
        );
        Ok(())
    }

    /// Admin approval of a `Ready` proposal.
    pub fn approve(&self, proposal: &mut Proposal) -> HiveResult<()> {
        match proposal.status {
            ProposalStatus::Ready => {
                proposal.status = ProposalStatus::Approved;
                Ok(())
            }
            other => Err(hive_shared::HiveError::InvalidInput(format!(
                "cannot approve a proposal in state {other:?}"
            ))),
        }
    }

    /// Admin rejection, allowed from any non-terminal state.
    pub fn reject(&self, proposal: &mut Proposal) -> HiveResult<()> {
        match proposal.status {
            ProposalStatus::Deployed | ProposalStatus::Rejected => {
                Err(hive_shared::HiveError::InvalidInput(format!(
                    "cannot reject a proposal in state {:?}",
                    proposal.status
                )))
            }
            _ => {
                proposal.status = ProposalStatus::Rejected;
                proposal.rejection = Some(RejectionReason::AdminRejected);
                Ok(())
            }
        }
    }

    /// Mark an approved proposal deployed. Actual promotion to production
    /// paths is an external admin action.
    pub fn mark_deployed(&self, proposal: &mut Proposal) -> HiveResult<()> {
        match proposal.status {
            ProposalStatus::Approved => {
                proposal.status = ProposalStatus::Deployed;
                Ok(())
            }
            other => Err(hive_shared::HiveError::InvalidInput(format!(
                "cannot deploy a proposal in state {other:?}"
            ))),
        }
    }

    pub fn max_attempts(&self) -> u32 {
        self.max_attempts
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::proposals::fixer::FixOutcome;
    use crate::proposals::types::{FileAction, FileChange};
    use hive_shared::HiveResult;
    use parking_lot::Mutex;

    /// Fixer that replays scripted outcomes.
    #[derive(Debug)]
    struct ScriptedFixer {
        outcomes: Mutex<Vec<FixOutcome>>,
    }

    impl ScriptedFixer {
        fn new(mut outcomes: Vec<FixOutcome>) -> Self {
            outcomes.reverse();
            Self {
                outcomes: Mutex::new(outcomes),
            }
        }

        fn no_op() -> FixOutcome {
            FixOutcome {
                unfixable: false,
                reason: None,
                explanation: "retry".to_string(),
                changes: Vec::new(),
            }
        }
    }

    #[async_trait]
    impl Fixer for ScriptedFixer {
        async fn generate_fix(
            &self,
            _proposal: &Proposal,
            _analysis: &FailureAnalysis,
            _history: &[FixAttempt],
        ) -> HiveResult<FixOutcome> {
            Ok(self.outcomes.lock().pop().unwrap_or_else(Self::no_op))
        }
    }

    /// Runner that fails a scripted number of times, then passes.
    #[derive(Debug)]
    struct FlakyRunner {
        failures_left: Mutex<u32>,
        message: String,
    }

    #[async_trait]
    impl TestRunner for FlakyRunner {
        async fn run(
            &self,
            _proposal: &Proposal,
            _workspace: &std::path::Path,
        ) -> HiveResult<TestReport> {
            let mut left = self.failures_left.lock();
            if *left > 0 {
                *left -= 1;
                Ok(TestReport::fail(vec![(
                    "sandbox_tests".to_string(),
                    self.message.clone(),
                )]))
            } else {
                Ok(TestReport::pass())
            }
        }
    }

    fn engine_with(
        runner: Arc<dyn TestRunner>,
        fixer: Arc<dyn Fixer>,
        sandbox_root: &std::path::Path,
        max_attempts: u32,
    ) -> ProposalEngine {
        ProposalEngine::new(
            ProposalValidator::with_default_manifest(),
            Sandbox::new(sandbox_root),
            runner,
            fixer,
            max_attempts,
        )
    }

    fn valid_proposal() -> Proposal {
        Proposal::new(
            "cache fix",
            "swap blocking client",
            vec![FileChange {
                path: "svc/cache.rs".to_string(),
                action: FileAction::Modify,
                code: "pub fn get() -> u64 { 42 }".to_string(),
            }],
            "queen",
        )
    }

    #[tokio::test]
    async fn test_clean_proposal_ready_first_attempt() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            Arc::new(AcceptingRunner),
            Arc::new(ScriptedFixer::new(vec![])),
            dir.path(),
            5,
        );
        let mut p = valid_proposal();
        engine.process(&mut p).await.unwrap();

        assert_eq!(p.status, ProposalStatus::Ready);
        assert_eq!(p.attempt_count, 1);
        assert!(p.fix_history.is_empty());
    }

    #[tokio::test]
    async fn test_autofix_converges_in_two_attempts() {
        // First cycle: validation fails on a blocking client import. The
        // fixer swaps the import and the call; second cycle passes,
        // approval and deployment follow.
        let dir = tempfile::tempdir().unwrap();
        let fix = FixOutcome {
            unfixable: false,
            reason: None,
            explanation: "use the async client".to_string(),
            changes: vec![FileChange {
                path: "svc/cache.rs".to_string(),
                action: FileAction::Modify,
                code: "use reqwest::Client;\n\nasync fn warm(c: &Client) -> bool {\n    c.get(\"http://cache\").send().await.is_ok()\n}\n"
                    .to_string(),
            }],
        };
        let engine = engine_with(
            Arc::new(AcceptingRunner),
            Arc::new(ScriptedFixer::new(vec![fix])),
            dir.path(),
            5,
        );

        let mut p = Proposal::new(
            "cache fix",
            "async cache refresh",
            vec![FileChange {
                path: "svc/cache.rs".to_string(),
                action: FileAction::Modify,
                code: "use leftpad::pad;\n\nasync fn warm() { pad(); }\n".to_string(),
            }],
            "queen",
        );
        engine.process(&mut p).await.unwrap();

        assert_eq!(p.status, ProposalStatus::Ready);
        assert_eq!(p.attempt_count, 2);
        assert_eq!(p.fix_history.len(), 1);

        engine.approve(&mut p).unwrap();
        engine.mark_deployed(&mut p).unwrap();
        assert_eq!(p.status, ProposalStatus::Deployed);
    }

    #[tokio::test]
    async fn test_exhausts_budget_after_five_attempts() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FlakyRunner {
            failures_left: Mutex::new(99),
            message: "something inexplicable happened".to_string(),
        });
        let engine = engine_with(runner, Arc::new(ScriptedFixer::new(vec![])), dir.path(), 5);

        let mut p = valid_proposal();
        engine.process(&mut p).await.unwrap();

        assert_eq!(p.status, ProposalStatus::Rejected);
        assert_eq!(p.rejection, Some(RejectionReason::AttemptsExhausted));
        assert_eq!(p.attempt_count, 5);
        assert_eq!(p.fix_history.len(), 5);
        assert!(p
            .fix_history
            .iter()
            .all(|f| f.analysis.root_cause.contains("unknown issue")));
    }

    #[tokio::test]
    async fn test_unfixable_terminates_early() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FlakyRunner {
            failures_left: Mutex::new(99),
            message: "unresolved import `vanished`".to_string(),
        });
        let unfixable = FixOutcome {
            unfixable: true,
            reason: Some("dependency does not exist".to_string()),
            explanation: "nothing to change".to_string(),
            changes: Vec::new(),
        };
        let engine = engine_with(
            runner,
            Arc::new(ScriptedFixer::new(vec![unfixable])),
            dir.path(),
            5,
        );

        let mut p = valid_proposal();
        engine.process(&mut p).await.unwrap();

        assert_eq!(p.status, ProposalStatus::Rejected);
        assert_eq!(p.attempt_count, 1);
        assert_eq!(p.fix_history.len(), 1);
        assert!(matches!(
            p.rejection,
            Some(RejectionReason::Unfixable(ref r)) if r.contains("dependency")
        ));
    }

    #[tokio::test]
    async fn test_flaky_tests_recover_mid_budget() {
        let dir = tempfile::tempdir().unwrap();
        let runner = Arc::new(FlakyRunner {
            failures_left: Mutex::new(2),
            message: "mismatched types in cache".to_string(),
        });
        let engine = engine_with(runner, Arc::new(ScriptedFixer::new(vec![])), dir.path(), 5);

        let mut p = valid_proposal();
        engine.process(&mut p).await.unwrap();

        assert_eq!(p.status, ProposalStatus::Ready);
        assert_eq!(p.attempt_count, 3);
        assert_eq!(p.fix_history.len(), 2);
    }

    #[tokio::test]
    async fn test_approve_requires_ready() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            Arc::new(AcceptingRunner),
            Arc::new(ScriptedFixer::new(vec![])),
            dir.path(),
            5,
        );
        let mut p = valid_proposal();
        assert!(engine.approve(&mut p).is_err());
    }

    #[tokio::test]
    async fn test_admin_reject_from_ready() {
        let dir = tempfile::tempdir().unwrap();
        let engine = engine_with(
            Arc::new(AcceptingRunner),
            Arc::new(ScriptedFixer::new(vec![])),
            dir.path(),
            5,
        );
        let mut p = valid_proposal();
        engine.process(&mut p).await.unwrap();
        engine.reject(&mut p).unwrap();
        assert_eq!(p.status, ProposalStatus::Rejected);
        assert_eq!(p.rejection, Some(RejectionReason::AdminRejected));
    }
}
