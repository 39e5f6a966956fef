//! Quarantine ring buffer.
//!
//! Suspicious-but-not-certain inputs wait here for human review. Nothing is
//! admitted automatically; review and release are admin actions outside
//! this module.

use std::collections::VecDeque;

use chrono::{DateTime, Utc};
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::types::UserId;

/// Capacity of the review buffer. Oldest entries fall off first.
pub const QUARANTINE_CAPACITY: usize = 100;

/// A quarantined input with full decision context.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct QuarantineEntry {
    pub user_id: UserId,
    pub endpoint: String,
    pub original_text: String,
    pub sanitized_text: String,
    pub risk_score: u32,
    pub matched_patterns: Vec<String>,
    pub timestamp: DateTime<Utc>,
}

#[derive(Debug, Default)]
pub struct QuarantineBuffer {
    entries: Mutex<VecDeque<QuarantineEntry>>,
}

impl QuarantineBuffer {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn push(&self, entry: QuarantineEntry) {
        let mut entries = self.entries.lock();
        if entries.len() == QUARANTINE_CAPACITY {
            entries.pop_front();
        }
        entries.push_back(entry);
    }

    /// Newest first.
    pub fn list(&self, limit: usize) -> Vec<QuarantineEntry> {
        let entries = self.entries.lock();
        entries.iter().rev().take(limit).cloned().collect()
    }

    pub fn len(&self) -> usize {
        self.entries.lock().len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.lock().is_empty()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn entry(user: &str, risk: u32) -> QuarantineEntry {
        QuarantineEntry {
            user_id: UserId::from(user),
            endpoint: "chat".to_string(),
            original_text: "suspicious".to_string(),
            sanitized_text: "suspicious".to_string(),
            risk_score: risk,
            matched_patterns: vec!["instruction_override: x".to_string()],
            timestamp: Utc::now(),
        }
    }

    #[test]
    fn test_push_and_list_newest_first() {
        let buffer = QuarantineBuffer::new();
        buffer.push(entry("u1", 40));
        buffer.push(entry("u2", 60));

        let listed = buffer.list(10);
        assert_eq!(listed.len(), 2);
        assert_eq!(listed[0].user_id.as_str(), "u2");
    }

    #[test]
    fn test_ring_capacity() {
        let buffer = QuarantineBuffer::new();
        for i in 0..150 {
            buffer.push(entry(&format!("u{i}"), 30));
        }
        assert_eq!(buffer.len(), QUARANTINE_CAPACITY);
        // Oldest 50 were evicted.
        let listed = buffer.list(QUARANTINE_CAPACITY);
        assert_eq!(listed.last().unwrap().user_id.as_str(), "u50");
    }
}
