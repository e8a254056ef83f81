//! Alert priority scale.
//!
//! Priorities form a total order `Low < Normal < High < Critical < Emergency`.
//! Rule thresholds and escalation eligibility both compare by ordinal index.

use serde::{Deserialize, Serialize};

/// Alert priority levels, ordered from least to most severe.
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertPriority {
    /// Informational
    Low = 0,
    /// Normal operating notice
    #[default]
    Normal = 1,
    /// Needs attention soon
    High = 2,
    /// Action required now
    Critical = 3,
    /// Immediate action required
    Emergency = 4,
}

impl AlertPriority {
    pub const ALL: [AlertPriority; 5] = [
        Self::Low,
        Self::Normal,
        Self::High,
        Self::Critical,
        Self::Emergency,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Low => "LOW",
            Self::Normal => "NORMAL",
            Self::High => "HIGH",
            Self::Critical => "CRITICAL",
            Self::Emergency => "EMERGENCY",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "LOW" => Some(Self::Low),
            "NORMAL" => Some(Self::Normal),
            "HIGH" => Some(Self::High),
            "CRITICAL" | "CRIT" => Some(Self::Critical),
            "EMERGENCY" | "EMERG" => Some(Self::Emergency),
            _ => None,
        }
    }

    /// Ordinal index in the priority scale.
    pub fn index(&self) -> u8 {
        *self as u8
    }

    /// Whether this priority meets or exceeds `floor`.
    pub fn meets(&self, floor: AlertPriority) -> bool {
        self.index() >= floor.index()
    }

    /// Escalation applies only to `Critical` and above.
    pub fn is_escalation_eligible(&self) -> bool {
        self.meets(Self::Critical)
    }
}

impl std::fmt::Display for AlertPriority {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
