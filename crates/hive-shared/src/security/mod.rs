//! # Security Pipeline
//!
//! Four ordered gates in front of every LLM-facing operation:
//!
//! 1. **Sanitize**: strip invisible Unicode, NFC-normalize, collapse
//!    whitespace.
//! 2. **Detect**: regex scan against six categorized pattern families.
//! 3. **Decide**: per-user threat context, EMA risk, endpoint-class
//!    thresholds, escalation detection, persistent blocks.
//! 4. **Filter output**: credential redaction, PII masking, and a
//!    malicious-code scan on anything leaving the process.
//!
//! The pipeline is fail-closed: a request it cannot evaluate is blocked.

pub mod context;
pub mod detector;
pub mod image;
pub mod output_filter;
pub mod quarantine;
pub mod sanitizer;

use std::sync::atomic::{AtomicU64, Ordering};

use chrono::Utc;
use serde::{Deserialize, Serialize};
use tracing::{info, warn};

use crate::config::SecurityConfig;
use crate::types::UserId;

pub use context::{SecurityContext, SecurityContextManager, SecurityEvent, ThreatLevel};
pub use detector::{DetectionResult, PatternFamily};
pub use image::{ImageScanReport, ALLOWED_FORMATS};
pub use output_filter::{FilterReport, FilterStats, OutputFilter};
pub use quarantine::{QuarantineBuffer, QuarantineEntry, QUARANTINE_CAPACITY};
pub use sanitizer::{sanitize, INVISIBLE_CHARS};

/// Detector-flagged inputs (score at or above this) never pass silently,
/// whatever the endpoint-class thresholds say.
const MALICIOUS_FLOOR: u32 = 30;

/// Endpoint classes with different gate-3 thresholds.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum EndpointClass {
    /// Admin or money-moving surface.
    Critical,
    /// Produces code that may later execute.
    GeneratesCode,
    Standard,
}

impl EndpointClass {
    fn thresholds(&self, config: &SecurityConfig) -> (u32, u32) {
        match self {
            Self::Critical | Self::GeneratesCode => (
                config.critical_block_threshold,
                config.critical_quarantine_threshold,
            ),
            Self::Standard => (
                config.standard_block_threshold,
                config.standard_quarantine_threshold,
            ),
        }
    }

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Critical => "critical",
            Self::GeneratesCode => "generates_code",
            Self::Standard => "standard",
        }
    }
}

/// Gate-3 verdict.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum GateDecision {
    Allow,
    Quarantine,
    Block,
}

/// Full report from gates 1-3.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GateReport {
    pub decision: GateDecision,
    pub risk_score: u32,
    pub sanitized_text: String,
    pub matched_patterns: Vec<String>,
    pub reasoning: String,
}

/// Gate-1/2 statistics.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct PipelineStats {
    pub total_checks: u64,
    pub threats_detected: u64,
    pub invisible_chars_removed: u64,
}

/// The pipeline. Owned by the supervisor; other components hold it only
/// for the duration of a single operation.
#[derive(Debug)]
pub struct SecurityPipeline {
    config: SecurityConfig,
    contexts: SecurityContextManager,
    output_filter: OutputFilter,
    quarantine: QuarantineBuffer,
    total_checks: AtomicU64,
    threats_detected: AtomicU64,
    invisible_chars_removed: AtomicU64,
}

impl SecurityPipeline {
    pub fn new(config: SecurityConfig) -> Self {
        info!(
            critical_block = config.critical_block_threshold,
            standard_block = config.standard_block_threshold,
            "security pipeline initialized"
        );
        Self {
            config,
            contexts: SecurityContextManager::new(),
            output_filter: OutputFilter::new(),
            quarantine: QuarantineBuffer::new(),
            total_checks: AtomicU64::new(0),
            threats_detected: AtomicU64::new(0),
            invisible_chars_removed: AtomicU64::new(0),
        }
    }

    /// Gates 1-3 over a natural-language input.
    pub fn check_input(&self, user: &UserId, text: &str, endpoint: EndpointClass) -> GateReport {
        self.total_checks.fetch_add(1, Ordering::Relaxed);

        let detection = detector::detect(text);
        self.invisible_chars_removed
            .fetch_add(detection.invisible_count as u64, Ordering::Relaxed);
        if detection.risk_score >= MALICIOUS_FLOOR {
            self.threats_detected.fetch_add(1, Ordering::Relaxed);
        }

        // A standing block wins before thresholds are even consulted. The
        // attempt still lands in the context so the record stays complete.
        if self.contexts.is_blocked(user) {
            self.contexts.record_event(
                user,
                detection.risk_score,
                "blocked_request",
                &detection.reasoning,
                true,
            );
            return GateReport {
                decision: GateDecision::Block,
                risk_score: detection.risk_score,
                sanitized_text: detection.sanitized_text,
                matched_patterns: detection.matched_patterns,
                reasoning: "origin is blocked".to_string(),
            };
        }

        let (block_at, quarantine_at) = endpoint.thresholds(&self.config);
        let mut decision = if detection.risk_score >= block_at {
            GateDecision::Block
        } else if detection.risk_score >= quarantine_at.min(MALICIOUS_FLOOR) {
            // Union of the class threshold and the malicious floor: a
            // detector-flagged input is at minimum quarantined.
            GateDecision::Quarantine
        } else {
            GateDecision::Allow
        };

        let context = self.contexts.record_event(
            user,
            detection.risk_score,
            endpoint.as_str(),
            &detection.reasoning,
            decision == GateDecision::Block,
        );

        // Context overrides escalate, never soften.
        if context.threat_level == ThreatLevel::Critical {
            decision = GateDecision::Block;
        } else if context.threat_level == ThreatLevel::High
            && detection.risk_score > 30
            && decision == GateDecision::Allow
        {
            decision = GateDecision::Quarantine;
        }

        if let Some(reason) = self.contexts.should_block(&context) {
            self.contexts.block(user, &reason);
        }

        if decision == GateDecision::Quarantine {
            self.quarantine.push(QuarantineEntry {
                user_id: user.clone(),
                endpoint: endpoint.as_str().to_string(),
                original_text: text.to_string(),
                sanitized_text: detection.sanitized_text.clone(),
                risk_score: detection.risk_score,
                matched_patterns: detection.matched_patterns.clone(),
                timestamp: Utc::now(),
            });
            warn!(user = %user, risk = detection.risk_score, "input quarantined");
        }

        GateReport {
            decision,
            risk_score: detection.risk_score,
            sanitized_text: detection.sanitized_text,
            matched_patterns: detection.matched_patterns,
            reasoning: detection.reasoning,
        }
    }

    /// Gate 4 over an outbound response.
    pub fn filter_output(&self, text: &str, mask_pii: bool) -> FilterReport {
        self.output_filter.filter_response(text, mask_pii)
    }

    /// Image sub-gate with the configured size ceiling.
    pub fn scan_image(&self, data: &[u8], extracted_text: Option<&str>) -> ImageScanReport {
        image::scan_image(data, self.config.image_max_bytes, extracted_text)
    }

    pub fn output_filter(&self) -> &OutputFilter {
        &self.output_filter
    }

    // =========================================================================
    // Admin surface
    // =========================================================================

    pub fn quarantine_entries(&self, limit: usize) -> Vec<QuarantineEntry> {
        self.quarantine.list(limit)
    }

    pub fn unblock(&self, user: &UserId) -> bool {
        self.contexts.unblock(user)
    }

    pub fn is_blocked(&self, user: &UserId) -> bool {
        self.contexts.is_blocked(user)
    }

    pub fn security_summary(&self, user: &UserId) -> Option<SecurityContext> {
        self.contexts.get(user)
    }

    pub fn cleanup_idle_contexts(&self) -> usize {
        self.contexts
            .cleanup_idle(self.config.context_idle_purge_hours)
    }

    pub fn stats(&self) -> PipelineStats {
        PipelineStats {
            total_checks: self.total_checks.load(Ordering::Relaxed),
            threats_detected: self.threats_detected.load(Ordering::Relaxed),
            invisible_chars_removed: self.invisible_chars_removed.load(Ordering::Relaxed),
        }
    }

    pub fn global_context_stats(&self) -> context::SecurityGlobalStats {
        self.contexts.global_stats()
    }
}
