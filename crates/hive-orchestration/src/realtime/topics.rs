//! Push-channel topics and their cadences.

use serde::{Deserialize, Serialize};

/// The admin topics.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Topic {
    /// Registry + bus + board overview.
    Hive,
    /// Usage and decision analytics.
    Analytics,
    /// Per-worker monitoring.
    Bees,
}

impl Topic {
    pub const ALL: [Topic; 3] = [Topic::Hive, Topic::Analytics, Topic::Bees];

    pub fn as_str(&self) -> &'static str {
        match self {
            Self::Hive => "hive",
            Self::Analytics => "analytics",
            Self::Bees => "bees",
        }
    }

    /// Polling cadence in seconds, floored by configuration.
    pub fn poll_interval_s(&self) -> u64 {
        match self {
            Self::Hive => 5,
            Self::Analytics => 30,
            Self::Bees => 10,
        }
    }

    /// Frame type tag clients switch on.
    pub fn frame_type(&self) -> &'static str {
        match self {
            Self::Hive => "hive_update",
            Self::Analytics => "analytics_update",
            Self::Bees => "bee_update",
        }
    }
}
