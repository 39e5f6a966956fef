//! # Consensus Engine
//!
//! Aggregates weighted worker outputs into a single decision, counts
//! weighted votes, and resolves head-on conflicts by source priority.
//! Scoring is pure CPU work; nothing here suspends.

use serde::{Deserialize, Serialize};
use tracing::debug;

use hive_shared::types::source_priority;
use hive_shared::{Decision, DecisionAction, DecisionConfidence, DecisionFactor, TaskResult};

/// Score at or above which a decision is an approval.
pub const APPROVE_THRESHOLD: f64 = 70.0;
/// Score below which a decision is a rejection.
pub const REJECT_THRESHOLD: f64 = 50.0;
/// Distance from the governing threshold that upgrades confidence.
const CONFIDENCE_MARGIN: f64 = 15.0;

/// Fixed per-source weights. Unknown sources carry a token weight so they
/// influence without dominating.
fn source_weight(source: &str) -> f64 {
    match source {
        "security" => 0.30,
        "maths" => 0.25,
        "treasury" => 0.20,
        "data" => 0.15,
        "pattern" => 0.10,
        _ => 0.05,
    }
}

/// A vote in an explicit consensus round.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Vote {
    pub source: String,
    pub vote: VoteChoice,
    pub weight: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum VoteChoice {
    Approve,
    Reject,
    Abstain,
}

/// Outcome of a vote count.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct VoteOutcome {
    pub consensus: String,
    /// Winning side's share of the non-abstain weight, in [0, 1].
    pub strength: f64,
    pub approve_pct: f64,
    pub reject_pct: f64,
    pub abstain_pct: f64,
}

#[derive(Debug, Clone, Default)]
pub struct ConsensusEngine;

impl ConsensusEngine {
    pub fn new() -> Self {
        Self
    }

    /// Derive the bounded sub-score a result contributes. Failed results
    /// contribute zero; opaque successes sit at the neutral midpoint.
    fn sub_score(result: &TaskResult) -> f64 {
        if !result.success {
            return 0.0;
        }
        for key in ["score", "health_score", "pool_health"] {
            if let Some(value) = result.numeric_field(key) {
                return value.clamp(0.0, 100.0);
            }
        }
        if let Some(level) = result
            .data
            .as_ref()
            .and_then(|d| d.get("risk_level"))
            .and_then(|v| v.as_str())
        {
            return match level {
                "low" => 95.0,
                "medium" => 60.0,
                "high" => 30.0,
                "critical" => 5.0,
                _ => 50.0,
            };
        }
        if let Some(confidence) = result.confidence {
            return confidence * 100.0;
        }
        50.0
    }

    /// Weighted aggregation of worker outputs into a decision.
    pub fn decide(&self, decision_type: &str, results: &[TaskResult]) -> Decision {
        let mut factors = Vec::with_capacity(results.len());
        let mut weighted_sum = 0.0;
        let mut weight_total = 0.0;

        for result in results {
            let weight = source_weight(&result.worker);
            let sub = Self::sub_score(result);
            weighted_sum += sub * weight;
            weight_total += weight;
            factors.push(DecisionFactor {
                source: result.worker.clone(),
                sub_score: sub,
                weight,
                weighted: sub * weight,
            });
        }

        let score = if weight_total > 0.0 {
            weighted_sum / weight_total
        } else {
            0.0
        };

        let action = if score >= APPROVE_THRESHOLD {
            DecisionAction::Approve
        } else if score >= REJECT_THRESHOLD {
            DecisionAction::Review
        } else {
            DecisionAction::Reject
        };

        // Confidence is distance from the threshold that governs the
        // action taken.
        let governing = match action {
            DecisionAction::Approve => APPROVE_THRESHOLD,
            DecisionAction::Reject | DecisionAction::Review => REJECT_THRESHOLD,
        };
        let margin = (score - governing).abs();
        let confidence = if margin > CONFIDENCE_MARGIN {
            DecisionConfidence::High
        } else if margin > CONFIDENCE_MARGIN / 3.0 {
            DecisionConfidence::Medium
        } else {
            DecisionConfidence::Low
        };

        let failed: Vec<&str> = results
            .iter()
            .filter(|r| !r.success)
            .map(|r| r.worker.as_str())
            .collect();
        let reasoning = if failed.is_empty() {
            format!(
                "{} sources aggregated to {:.1}",
                results.len(),
                score
            )
        } else {
            format!(
                "{} sources aggregated to {:.1} ({} failed: {})",
                results.len(),
                score,
                failed.len(),
                failed.join(", ")
            )
        };

        debug!(decision_type, score, ?action, "decision computed");

        Decision {
            decision_type: decision_type.to_string(),
            action,
            reasoning,
            confidence,
            factors,
            score,
            timestamp: chrono::Utc::now(),
            requires_human_approval: action == DecisionAction::Review,
        }
    }

    /// Weighted majority over explicit votes. 70% of the non-abstain
    /// weight makes a side "strong"; otherwise the larger side wins weak.
    pub fn build_consensus(&self, votes: &[Vote]) -> VoteOutcome {
        let total: f64 = votes.iter().map(|v| v.weight.max(0.0)).sum();
        if total <= 0.0 {
            return VoteOutcome {
                consensus: "no_votes".to_string(),
                strength: 0.0,
                approve_pct: 0.0,
                reject_pct: 0.0,
                abstain_pct: 0.0,
            };
        }

        let sum_for = |choice: VoteChoice| -> f64 {
            votes
                .iter()
                .filter(|v| v.vote == choice)
                .map(|v| v.weight.max(0.0))
                .sum()
        };
        let approve = sum_for(VoteChoice::Approve);
        let reject = sum_for(VoteChoice::Reject);
        let abstain = sum_for(VoteChoice::Abstain);

        let counted = approve + reject;
        let (consensus, strength) = if counted <= 0.0 {
            ("abstained".to_string(), 0.0)
        } else {
            let approve_share = approve / counted;
            let reject_share = reject / counted;
            if approve_share >= 0.70 {
                ("strong_approve".to_string(), approve_share)
            } else if reject_share >= 0.70 {
                ("strong_reject".to_string(), reject_share)
            } else if approve >= reject {
                ("weak_approve".to_string(), approve_share)
            } else {
                ("weak_reject".to_string(), reject_share)
            }
        };

        VoteOutcome {
            consensus,
            strength,
            approve_pct: approve / total * 100.0,
            reject_pct: reject / total * 100.0,
            abstain_pct: abstain / total * 100.0,
        }
    }

    /// When two sources contradict, the one with the higher declared
    /// priority wins.
    pub fn resolve_conflict<'a>(&self, a: &'a str, b: &'a str) -> &'a str {
        if source_priority(a) <= source_priority(b) {
            a
        } else {
            b
        }
    }
}
