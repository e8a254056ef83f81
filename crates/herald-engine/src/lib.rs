//! Alert routing engine for Herald.
//!
//! Alerts raised by trading, security, system, performance and network
//! components are deduplicated, matched against routing rules, rate limited
//! per rule and delivered to named channels. Critical alerts can be escalated
//! to additional channels until resolved.
//!
//! ## Pipeline
//!
//! - **Deduplication**: content hash over category, title, source and payload
//! - **Routing**: category, priority floor and field conditions per rule
//! - **Rate limiting**: per `(rule, category)` rolling window
//! - **Delivery**: concurrent fan-out, each channel attempted once
//! - **Escalation**: timed re-delivery for `CRITICAL` and `EMERGENCY` alerts
//!
//! ## Example
//!
//! ```rust,no_run
//! use std::sync::Arc;
//! use herald_engine::{default_rules, Alert, AlertEngine, AlertPriority, ChannelRegistry, ConsoleChannel, EngineConfig};
//!
//! #[tokio::main]
//! async fn main() -> Result<(), Box<dyn std::error::Error>> {
//!     let channels = Arc::new(ChannelRegistry::new());
//!     channels.register(Arc::new(ConsoleChannel::new("telegram".to_string()))).await;
//!
//!     let engine = AlertEngine::new(EngineConfig::default(), channels);
//!     engine.load_rules(default_rules()).await?;
//!
//!     let alert = Alert::security(AlertPriority::Critical, "Intrusion", "Port scan from 10.0.0.7");
//!     for delivery in engine.submit(alert).await? {
//!         println!("{}: {}", delivery.channel, delivery.success);
//!     }
//!
//!     Ok(())
//! }
//! ```

pub mod alert;
pub mod category;
pub mod channels;
pub mod clock;
pub mod config;
pub mod dedup;
pub mod dispatcher;
pub mod engine;
pub mod error;
pub mod escalation;
pub mod matcher;
pub mod priority;
pub mod rate_limit;
pub mod rule;

pub use alert::Alert;
pub use category::AlertCategory;
pub use priority::AlertPriority;
pub use error::{Error, Result};

pub use channels::{AlertChannel, ChannelFactory, ChannelInfo, ChannelRegistry, ChannelStats};
pub use channels::{ConsoleChannel, ConsoleChannelFactory, MemoryChannel, MemoryChannelFactory};
pub use channels::{builtin_factories, create_channel};

pub use clock::{Clock, ManualClock, SystemClock};
pub use config::{EngineConfig, HeraldConfig};
pub use dedup::{fingerprint, DeduplicationCache, DeduplicationRecord};
pub use dispatcher::{collect_channels, DeliveryResult, Dispatcher};
pub use engine::{AlertEngine, CleanupReport, EngineStats, ProcessOutcome};
pub use escalation::{DueEscalation, EscalationEntry, EscalationScheduler};
pub use matcher::{match_rules, rule_matches};
pub use rate_limit::{rate_limit_key, RateLimitEntry, RateLimiter};
pub use rule::{default_rules, ConditionOperator, EscalationPolicy, RateLimitPolicy, RoutingRule, RuleCondition};

/// Version information
pub const VERSION: &str = env!("CARGO_PKG_VERSION");

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_version() {
        assert!(!VERSION.is_empty());
    }
}
