//! Per-user security state.
//!
//! One `SecurityContext` per opaque origin hash, striped across a
//! concurrent map so gate 3 never serializes unrelated users. Contexts are
//! process-scoped; cross-instance sharing is an explicit operator opt-in
//! handled above this layer.

use chrono::{DateTime, Duration, Utc};
use dashmap::DashMap;
use serde::{Deserialize, Serialize};
use tracing::{error, info, warn};

use crate::types::UserId;

/// EMA weights: 0.7 past, 0.3 new score.
const EMA_PAST_WEIGHT: f64 = 0.7;
const EMA_NEW_WEIGHT: f64 = 0.3;

/// Bounded event log per context.
const MAX_EVENTS: usize = 50;

/// Recent-score window used for escalation detection.
const MAX_RECENT_SCORES: usize = 10;

#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ThreatLevel {
    Safe,
    Low,
    Medium,
    High,
    Critical,
}

/// One security event in a user's history.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityEvent {
    pub timestamp: DateTime<Utc>,
    pub event_type: String,
    pub risk_score: u32,
    pub details: String,
    pub blocked: bool,
}

/// Security state for a single origin.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SecurityContext {
    pub user_id: UserId,
    pub created_at: DateTime<Utc>,
    pub last_activity: DateTime<Utc>,

    pub threat_level: ThreatLevel,
    /// Exponential moving average of risk scores.
    pub cumulative_risk: f64,
    pub warnings_count: u32,
    pub blocks_count: u32,

    pub events: Vec<SecurityEvent>,
    pub message_count: u64,
    pub recent_scores: Vec<u32>,

    pub escalation_detected: bool,
    pub escalation_reason: Option<String>,

    pub is_blocked: bool,
    pub blocked_at: Option<DateTime<Utc>>,
    pub blocked_reason: Option<String>,
}

impl SecurityContext {
    fn new(user_id: UserId) -> Self {
        let now = Utc::now();
        Self {
            user_id,
            created_at: now,
            last_activity: now,
            threat_level: ThreatLevel::Safe,
            cumulative_risk: 0.0,
            warnings_count: 0,
            blocks_count: 0,
            events: Vec::new(),
            message_count: 0,
            recent_scores: Vec::new(),
            escalation_detected: false,
            escalation_reason: None,
            is_blocked: false,
            blocked_at: None,
            blocked_reason: None,
        }
    }
}

/// Global counters across all contexts.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct SecurityGlobalStats {
    pub total_users: u64,
    pub blocked_users: u64,
    pub total_threats: u64,
    pub escalations_detected: u64,
    pub active_contexts: usize,
}

/// Owns every `SecurityContext` in the process.
#[derive(Debug, Default)]
pub struct SecurityContextManager {
    contexts: DashMap<UserId, SecurityContext>,
    stats: parking_lot::Mutex<SecurityGlobalStats>,
}

impl SecurityContextManager {
    pub fn new() -> Self {
        Self::default()
    }

    /// Apply a new risk observation to the user's context and return a
    /// snapshot of the updated state.
    pub fn record_event(
        &self,
        user_id: &UserId,
        risk_score: u32,
        event_type: &str,
        details: &str,
        blocked: bool,
    ) -> SecurityContext {
        let mut entry = self
            .contexts
            .entry(user_id.clone())
            .or_insert_with(|| {
                self.stats.lock().total_users += 1;
                info!(user = %user_id, "created security context");
                SecurityContext::new(user_id.clone())
            });
        let context = entry.value_mut();

        context.last_activity = Utc::now();
        context.message_count += 1;

        context.events.push(SecurityEvent {
            timestamp: Utc::now(),
            event_type: event_type.to_string(),
            risk_score,
            details: details.to_string(),
            blocked,
        });
        if context.events.len() > MAX_EVENTS {
            let excess = context.events.len() - MAX_EVENTS;
            context.events.drain(..excess);
        }

        context.recent_scores.push(risk_score);
        if context.recent_scores.len() > MAX_RECENT_SCORES {
            let excess = context.recent_scores.len() - MAX_RECENT_SCORES;
            context.recent_scores.drain(..excess);
        }

        context.cumulative_risk =
            context.cumulative_risk * EMA_PAST_WEIGHT + f64::from(risk_score) * EMA_NEW_WEIGHT;

        if risk_score > 50 {
            context.warnings_count += 1;
            self.stats.lock().total_threats += 1;
        }
        if blocked {
            context.blocks_count += 1;
        }

        let old_level = context.threat_level;
        context.threat_level = threat_level(context);
        if context.threat_level != old_level {
            warn!(
                user = %context.user_id,
                old = ?old_level,
                new = ?context.threat_level,
                ema = format!("{:.2}", context.cumulative_risk),
                "threat level changed"
            );
        }

        if !context.escalation_detected && detect_escalation(context) {
            context.escalation_detected = true;
            context.escalation_reason = Some("multi-turn attack pattern detected".to_string());
            self.stats.lock().escalations_detected += 1;
            error!(user = %context.user_id, warnings = context.warnings_count, "escalation pattern detected");
        }

        context.clone()
    }

    /// Decide whether the user should be persistently blocked, returning
    /// the reason. Does not apply the block.
    pub fn should_block(&self, context: &SecurityContext) -> Option<String> {
        if context.is_blocked {
            return context.blocked_reason.clone();
        }
        if context.threat_level == ThreatLevel::Critical {
            return Some("critical threat level reached".to_string());
        }
        if context.blocks_count > 5 {
            return Some(format!(
                "exceeded block limit ({} attempts)",
                context.blocks_count
            ));
        }
        if context.escalation_detected {
            return Some("escalating attack pattern detected".to_string());
        }
        if context.cumulative_risk > 85.0 {
            return Some(format!(
                "cumulative risk score too high ({:.1})",
                context.cumulative_risk
            ));
        }
        None
    }

    /// Persistently block a user.
    pub fn block(&self, user_id: &UserId, reason: &str) {
        let mut entry = self
            .contexts
            .entry(user_id.clone())
            .or_insert_with(|| SecurityContext::new(user_id.clone()));
        let context = entry.value_mut();
        if !context.is_blocked {
            self.stats.lock().blocked_users += 1;
        }
        context.is_blocked = true;
        context.blocked_at = Some(Utc::now());
        context.blocked_reason = Some(reason.to_string());
        error!(user = %user_id, reason, threat = ?context.threat_level, "user blocked");
    }

    /// Admin unblock.
    pub fn unblock(&self, user_id: &UserId) -> bool {
        match self.contexts.get_mut(user_id) {
            Some(mut entry) => {
                let context = entry.value_mut();
                let was_blocked = context.is_blocked;
                context.is_blocked = false;
                context.blocked_at = None;
                context.blocked_reason = None;
                context.escalation_detected = false;
                context.escalation_reason = None;
                if was_blocked {
                    let mut stats = self.stats.lock();
                    stats.blocked_users = stats.blocked_users.saturating_sub(1);
                    info!(user = %user_id, "user unblocked");
                }
                was_blocked
            }
            None => false,
        }
    }

    pub fn get(&self, user_id: &UserId) -> Option<SecurityContext> {
        self.contexts.get(user_id).map(|e| e.value().clone())
    }

    pub fn is_blocked(&self, user_id: &UserId) -> bool {
        self.contexts
            .get(user_id)
            .map(|e| e.value().is_blocked)
            .unwrap_or(false)
    }

    /// Drop contexts idle longer than `idle_hours`, keeping blocked users.
    pub fn cleanup_idle(&self, idle_hours: i64) -> usize {
        let cutoff = Utc::now() - Duration::hours(idle_hours);
        let before = self.contexts.len();
        self.contexts
            .retain(|_, c| c.is_blocked || c.last_activity >= cutoff);
        let removed = before - self.contexts.len();
        if removed > 0 {
            info!(removed, "cleaned up idle security contexts");
        }
        removed
    }

    pub fn global_stats(&self) -> SecurityGlobalStats {
        // Shard locks before the stats lock, matching every other path.
        let active_contexts = self.contexts.len();
        let mut stats = self.stats.lock().clone();
        stats.active_contexts = active_contexts;
        stats
    }
}

/// Threat ladder over the EMA, with a block-count override.
fn threat_level(context: &SecurityContext) -> ThreatLevel {
    if context.blocks_count > 3 {
        return ThreatLevel::Critical;
    }
    match context.cumulative_risk {
        s if s >= 80.0 => ThreatLevel::Critical,
        s if s >= 60.0 => ThreatLevel::High,
        s if s >= 40.0 => ThreatLevel::Medium,
        s if s >= 20.0 => ThreatLevel::Low,
        _ => ThreatLevel::Safe,
    }
}

/// Escalation heuristics over the recent window:
/// a genuinely rising run of the last five scores, three high-risk scores
/// in the last five, or three >50 events inside five minutes.
fn detect_escalation(context: &SecurityContext) -> bool {
    if context.recent_scores.len() < 5 {
        return false;
    }
    let recent = &context.recent_scores[context.recent_scores.len() - 5..];

    // Non-decreasing run only counts when it actually rises above zero;
    // five quiet messages are not an attack.
    let non_decreasing = recent.windows(2).all(|w| w[0] <= w[1]);
    let rising = non_decreasing && recent[4] > recent[0] && recent[4] > 0;
    if rising {
        return true;
    }

    if recent.iter().filter(|&&s| s > 60).count() >= 3 {
        return true;
    }

    let five_min_ago = Utc::now() - Duration::minutes(5);
    let rapid_high_risk = context
        .events
        .iter()
        .filter(|e| e.timestamp > five_min_ago && e.risk_score > 50)
        .count();
    rapid_high_risk >= 3
}
