//! Network segments and their scheduling state

use chrono::{DateTime, Duration, Utc};
use serde::{Deserialize, Serialize};

use crate::cidr::Cidr;

/// Device login used for auto-registration
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Credentials {
    pub username: String,
    pub password: String,
}

/// A configured range plus the policy for scanning it
#[derive(Debug, Clone, Serialize)]
pub struct NetworkSegment {
    /// Unique within the configuration
    pub name: String,
    pub cidr: Cidr,
    pub description: Option<String>,
    pub auto_discovery_enabled: bool,
    pub interval_minutes: u32,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub community_override: Option<String>,
    #[serde(skip)]
    pub credential_override: Option<Credentials>,
}

impl NetworkSegment {
    pub fn new(name: impl Into<String>, cidr: Cidr) -> Self {
        Self {
            name: name.into(),
            cidr,
            description: None,
            auto_discovery_enabled: true,
            interval_minutes: 60,
            community_override: None,
            credential_override: None,
        }
    }

    pub fn interval(&self) -> Duration {
        Duration::minutes(i64::from(self.interval_minutes))
    }

    /// Whether the segment should be scanned at `now` given when it last ran
    pub fn is_due(&self, last_discovery_at: Option<DateTime<Utc>>, now: DateTime<Utc>) -> bool {
        if !self.auto_discovery_enabled {
            return false;
        }
        match last_discovery_at {
            None => true,
            Some(last) => now >= last + self.interval(),
        }
    }
}

/// Where a segment is in its scheduling cycle
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "lowercase")]
pub enum SegmentPhase {
    #[default]
    Idle,
    Due,
    Running,
}

/// Runtime bookkeeping for one segment, owned by the scheduler
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct SegmentState {
    pub phase: SegmentPhase,
    pub last_discovery_at: Option<DateTime<Utc>>,
    pub last_device_count: Option<usize>,
}
