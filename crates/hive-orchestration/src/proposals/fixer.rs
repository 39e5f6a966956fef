//! Fix generation.
//!
//! The contract: given the proposal, the failure analysis, and every prior
//! attempt, produce a new set of file changes or declare the failure
//! unfixable. The LLM-backed fixer builds a compact structured prompt and
//! expects a JSON answer; anything that will not parse degrades safely.

use async_trait::async_trait;
use serde::Deserialize;
use tracing::{info, warn};

use hive_shared::llm::{GenerateOptions, LlmClient};
use hive_shared::{HiveError, HiveResult};

use super::types::{FailureAnalysis, FileAction, FileChange, FixAttempt, Proposal};

/// What a fixer produced for one attempt.
#[derive(Debug, Clone)]
pub struct FixOutcome {
    pub unfixable: bool,
    pub reason: Option<String>,
    pub explanation: String,
    pub changes: Vec<FileChange>,
}

/// Seam for fix generation, so the engine is testable without a provider.
#[async_trait]
pub trait Fixer: Send + Sync + std::fmt::Debug {
    async fn generate_fix(
        &self,
        proposal: &Proposal,
        analysis: &FailureAnalysis,
        history: &[FixAttempt],
    ) -> HiveResult<FixOutcome>;
}

/// Shape the LLM is asked to answer with.
#[derive(Debug, Deserialize)]
struct FixResponse {
    #[serde(default)]
    unfixable: bool,
    #[serde(default)]
    reason: Option<String>,
    #[serde(default)]
    explanation: String,
    #[serde(default)]
    changes: Vec<FixResponseChange>,
}

#[derive(Debug, Deserialize)]
struct FixResponseChange {
    file: String,
    #[serde(default)]
    action: Option<String>,
    code: String,
}

/// LLM-backed fixer.
#[derive(Debug)]
pub struct LlmFixer {
    llm: LlmClient,
}

impl LlmFixer {
    pub fn new(llm: LlmClient) -> Self {
        Self { llm }
    }

    fn build_prompt(
        proposal: &Proposal,
        analysis: &FailureAnalysis,
        history: &[FixAttempt],
    ) -> String {
        let mut prompt = format!(
            "A code proposal failed its checks.\n\n\
             Title: {}\nDescription: {}\n\n\
             Failed checks: {}\nError categories: {:?}\nRoot cause: {}\n\nMessages:\n",
            proposal.title,
            proposal.description,
            analysis.failed_checks.join(", "),
            analysis.categories,
            analysis.root_cause,
        );
        for message in &analysis.messages {
            prompt.push_str("- ");
            prompt.push_str(message);
            prompt.push('\n');
        }

        prompt.push_str("\nFiles in the proposal:\n");
        for file in &proposal.files {
            prompt.push_str(&format!("--- {} ---\n{}\n", file.path, file.code));
        }

        if !history.is_empty() {
            prompt.push_str(&format!(
                "\nPrevious attempts ({}) that did NOT work, do not repeat them:\n",
                history.len()
            ));
            for attempt in history {
                prompt.push_str(&format!(
                    "- attempt {}: {} (root cause then: {})\n",
                    attempt.attempt, attempt.explanation, attempt.analysis.root_cause
                ));
            }
        }

        prompt.push_str(
            "\nAnswer with JSON only:\n\
             {\"unfixable\": false, \"reason\": null, \"explanation\": \"...\", \
             \"changes\": [{\"file\": \"path\", \"action\": \"modify\", \"code\": \"full file contents\"}]}\n\
             Set unfixable=true only when the failure needs something outside the proposal.\n",
        );
        prompt
    }

    fn parse_action(tag: Option<&str>) -> FileAction {
        match tag {
            Some("create") => FileAction::Create,
            Some("delete") => FileAction::Delete,
            _ => FileAction::Modify,
        }
    }
}

#[async_trait]
impl Fixer for LlmFixer {
    async fn generate_fix(
        &self,
        proposal: &Proposal,
        analysis: &FailureAnalysis,
        history: &[FixAttempt],
    ) -> HiveResult<FixOutcome> {
        let prompt = Self::build_prompt(proposal, analysis, history);
        let response = self
            .llm
            .generate(&prompt, &GenerateOptions::precise())
            .await
            .map_err(|e| HiveError::Llm(format!("fix generation failed: {e}")))?;

        match serde_json::from_str::<FixResponse>(extract_json(&response)) {
            Ok(parsed) => {
                info!(
                    proposal = %proposal.id,
                    unfixable = parsed.unfixable,
                    changes = parsed.changes.len(),
                    "fix generated"
                );
                Ok(FixOutcome {
                    unfixable: parsed.unfixable,
                    reason: parsed.reason,
                    explanation: parsed.explanation,
                    changes: parsed
                        .changes
                        .into_iter()
                        .map(|c| FileChange {
                            path: c.file,
                            action: Self::parse_action(c.action.as_deref()),
                            code: c.code,
                        })
                        .collect(),
                })
            }
            Err(e) => {
                // A free-text answer that concedes defeat still counts as
                // an unfixable verdict.
                warn!(proposal = %proposal.id, error = %e, "fixer response was not JSON");
                let lower = response.to_lowercase();
                let conceded =
                    lower.contains("unfixable") || lower.contains("cannot be fixed");
                Ok(FixOutcome {
                    unfixable: conceded,
                    reason: conceded.then(|| "fixer declared the failure unfixable".to_string()),
                    explanation: response,
                    changes: Vec::new(),
                })
            }
        }
    }
}

/// Trim any prose around the first JSON object in a response.
fn extract_json(text: &str) -> &str {
    match (text.find('{'), text.rfind('}')) {
        (Some(start), Some(end)) if end > start => &text[start..=end],
        _ => text,
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use hive_shared::config::LlmConfig;
    use hive_shared::llm::ScriptedBackend;
    use std::sync::Arc;

    fn analysis() -> FailureAnalysis {
        FailureAnalysis::from_messages(
            vec!["build".into()],
            vec!["unresolved import `reqwest::blocking`".into()],
        )
    }

    fn fixer_with(responses: Vec<&str>) -> LlmFixer {
        let backend = Arc::new(ScriptedBackend::new(
            responses.into_iter().map(String::from).collect(),
            "{}",
        ));
        LlmFixer::new(LlmClient::new(backend, &LlmConfig::default()))
    }

    #[tokio::test]
    async fn test_json_fix_parsed() {
        let fixer = fixer_with(vec![
            r#"{"unfixable": false, "explanation": "swap to async client", "changes": [{"file": "svc/cache.rs", "action": "modify", "code": "use reqwest::Client;"}]}"#,
        ]);
        let p = Proposal::new("t", "d", vec![], "queen");
        let outcome = fixer.generate_fix(&p, &analysis(), &[]).await.unwrap();
        assert!(!outcome.unfixable);
        assert_eq!(outcome.changes.len(), 1);
        assert_eq!(outcome.changes[0].path, "svc/cache.rs");
        assert_eq!(outcome.changes[0].action, FileAction::Modify);
    }

    #[tokio::test]
    async fn test_json_with_prose_wrapper() {
        let fixer = fixer_with(vec![
            "Here is the fix:\n{\"unfixable\": false, \"explanation\": \"x\", \"changes\": []}\nGood luck!",
        ]);
        let p = Proposal::new("t", "d", vec![], "queen");
        let outcome = fixer.generate_fix(&p, &analysis(), &[]).await.unwrap();
        assert!(!outcome.unfixable);
        assert_eq!(outcome.explanation, "x");
    }

    #[tokio::test]
    async fn test_unfixable_verdict() {
        let fixer =
            fixer_with(vec![r#"{"unfixable": true, "reason": "needs a new dependency"}"#]);
        let p = Proposal::new("t", "d", vec![], "queen");
        let outcome = fixer.generate_fix(&p, &analysis(), &[]).await.unwrap();
        assert!(outcome.unfixable);
        assert_eq!(outcome.reason.as_deref(), Some("needs a new dependency"));
    }

    #[tokio::test]
    async fn test_freetext_concession_is_unfixable() {
        let fixer = fixer_with(vec!["This cannot be fixed without a new external service."]);
        let p = Proposal::new("t", "d", vec![], "queen");
        let outcome = fixer.generate_fix(&p, &analysis(), &[]).await.unwrap();
        assert!(outcome.unfixable);
    }

    #[tokio::test]
    async fn test_prompt_carries_history() {
        let p = Proposal::new("t", "d", vec![], "queen");
        let history = vec![FixAttempt {
            attempt: 1,
            analysis: analysis(),
            changed_paths: vec!["a.rs".into()],
            explanation: "tried swapping imports".into(),
            timestamp: chrono::Utc::now(),
        }];
        let prompt = LlmFixer::build_prompt(&p, &analysis(), &history);
        assert!(prompt.contains("do not repeat"));
        assert!(prompt.contains("tried swapping imports"));
    }
}
