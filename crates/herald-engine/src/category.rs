//! Alert category.

use serde::{Deserialize, Serialize};

/// Category of the subsystem that raised an alert. Rules match on it exactly.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
#[serde(rename_all = "SCREAMING_SNAKE_CASE")]
pub enum AlertCategory {
    /// Trading events (orders, fills, positions)
    Trading,
    /// Security incidents
    Security,
    /// Host and process health
    #[default]
    System,
    /// Latency and throughput
    Performance,
    /// Connectivity
    Network,
    /// Planned maintenance notices
    Maintenance,
}

impl AlertCategory {
    pub const ALL: [AlertCategory; 6] = [
        Self::Trading,
        Self::Security,
        Self::System,
        Self::Performance,
        Self::Network,
        Self::Maintenance,
    ];

    pub fn as_str(&self) -> &str {
        match self {
            Self::Trading => "TRADING",
            Self::Security => "SECURITY",
            Self::System => "SYSTEM",
            Self::Performance => "PERFORMANCE",
            Self::Network => "NETWORK",
            Self::Maintenance => "MAINTENANCE",
        }
    }

    pub fn from_string(s: &str) -> Option<Self> {
        match s.to_uppercase().as_str() {
            "TRADING" => Some(Self::Trading),
            "SECURITY" => Some(Self::Security),
            "SYSTEM" => Some(Self::System),
            "PERFORMANCE" => Some(Self::Performance),
            "NETWORK" => Some(Self::Network),
            "MAINTENANCE" => Some(Self::Maintenance),
            _ => None,
        }
    }
}

impl std::fmt::Display for AlertCategory {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "{}", self.as_str())
    }
}
