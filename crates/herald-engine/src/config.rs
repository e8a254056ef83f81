//! Engine configuration.
//!
//! A configuration document has three parts: `[engine]` timing settings,
//! `[[channels]]` declarations built through channel factories and
//! `[[rules]]` routing rules. TOML and JSON files are both accepted.

use std::path::Path;
use std::sync::Arc;

use chrono::Duration;
use serde::{Deserialize, Serialize};

use super::channels::{create_channel, ChannelRegistry};
use super::error::{Error, Result};
use super::rule::{default_rules, RoutingRule};

/// Default values.
pub mod defaults {
    /// Duplicate suppression window
    pub const DEDUP_WINDOW_SECS: u64 = 300;
    /// Idle time after which dedup and rate-limit entries are evicted
    pub const RETENTION_HOURS: u64 = 24;
    pub const CLEANUP_INTERVAL_SECS: u64 = 3600;
    pub const ESCALATION_SCAN_INTERVAL_SECS: u64 = 60;
    pub const MAX_DELIVERY_HISTORY: usize = 1000;
    /// Upper bound for the background task periods (one year)
    pub const MAX_INTERVAL_SECS: u64 = 365 * 24 * 3600;
}

/// Environment variable names.
pub mod env_vars {
    pub const DEDUP_WINDOW_SECS: &str = "HERALD_DEDUP_WINDOW_SECS";
    pub const RETENTION_HOURS: &str = "HERALD_RETENTION_HOURS";
}

fn default_dedup_window_secs() -> u64 {
    defaults::DEDUP_WINDOW_SECS
}

fn default_retention_hours() -> u64 {
    defaults::RETENTION_HOURS
}

fn default_cleanup_interval_secs() -> u64 {
    defaults::CLEANUP_INTERVAL_SECS
}

fn default_escalation_scan_interval_secs() -> u64 {
    defaults::ESCALATION_SCAN_INTERVAL_SECS
}

fn default_max_delivery_history() -> usize {
    defaults::MAX_DELIVERY_HISTORY
}

/// Timing and capacity settings for the engine.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EngineConfig {
    #[serde(default = "default_dedup_window_secs")]
    pub dedup_window_secs: u64,
    #[serde(default = "default_retention_hours")]
    pub retention_hours: u64,
    #[serde(default = "default_cleanup_interval_secs")]
    pub cleanup_interval_secs: u64,
    #[serde(default = "default_escalation_scan_interval_secs")]
    pub escalation_scan_interval_secs: u64,
    #[serde(default = "default_max_delivery_history")]
    pub max_delivery_history: usize,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            dedup_window_secs: defaults::DEDUP_WINDOW_SECS,
            retention_hours: defaults::RETENTION_HOURS,
            cleanup_interval_secs: defaults::CLEANUP_INTERVAL_SECS,
            escalation_scan_interval_secs: defaults::ESCALATION_SCAN_INTERVAL_SECS,
            max_delivery_history: defaults::MAX_DELIVERY_HISTORY,
        }
    }
}

impl EngineConfig {
    /// Suppression window. Out-of-range values saturate; `validate` rejects them.
    pub fn dedup_window(&self) -> Duration {
        i64::try_from(self.dedup_window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .unwrap_or(Duration::MAX)
    }

    /// Retention for idle entries. Out-of-range values saturate; `validate` rejects them.
    pub fn retention(&self) -> Duration {
        i64::try_from(self.retention_hours)
            .ok()
            .and_then(Duration::try_hours)
            .unwrap_or(Duration::MAX)
    }

    pub fn cleanup_interval(&self) -> std::time::Duration {
        interval_from_secs(self.cleanup_interval_secs)
    }

    pub fn escalation_scan_interval(&self) -> std::time::Duration {
        interval_from_secs(self.escalation_scan_interval_secs)
    }

    /// Apply `HERALD_*` environment overrides; unparsable values are ignored.
    pub fn apply_env_overrides(&mut self) {
        if let Some(secs) = env_u64(env_vars::DEDUP_WINDOW_SECS) {
            self.dedup_window_secs = secs;
        }
        if let Some(hours) = env_u64(env_vars::RETENTION_HOURS) {
            self.retention_hours = hours;
        }
    }

    /// Reject values the engine cannot represent as durations.
    pub fn validate(&self) -> Result<()> {
        let dedup_ok = i64::try_from(self.dedup_window_secs)
            .ok()
            .and_then(Duration::try_seconds)
            .is_some();
        if !dedup_ok {
            return Err(Error::InvalidConfiguration(format!(
                "dedup_window_secs out of range: {}",
                self.dedup_window_secs
            )));
        }

        let retention_ok = i64::try_from(self.retention_hours)
            .ok()
            .and_then(Duration::try_hours)
            .is_some();
        if !retention_ok {
            return Err(Error::InvalidConfiguration(format!(
                "retention_hours out of range: {}",
                self.retention_hours
            )));
        }

        for (name, secs) in [
            ("cleanup_interval_secs", self.cleanup_interval_secs),
            ("escalation_scan_interval_secs", self.escalation_scan_interval_secs),
        ] {
            if secs > defaults::MAX_INTERVAL_SECS {
                return Err(Error::InvalidConfiguration(format!(
                    "{} must be at most {}: {}",
                    name,
                    defaults::MAX_INTERVAL_SECS,
                    secs
                )));
            }
        }
        Ok(())
    }
}

fn interval_from_secs(secs: u64) -> std::time::Duration {
    std::time::Duration::from_secs(secs.clamp(1, defaults::MAX_INTERVAL_SECS))
}

fn env_u64(name: &str) -> Option<u64> {
    std::env::var(name).ok().and_then(|s| s.trim().parse().ok())
}

fn parse_toml(content: &str) -> Result<HeraldConfig> {
    toml::from_str(content).map_err(|e| Error::Config(format!("Invalid TOML config: {}", e)))
}

fn parse_json(content: &str) -> Result<HeraldConfig> {
    serde_json::from_str(content).map_err(|e| Error::Config(format!("Invalid JSON config: {}", e)))
}

/// Full configuration document.
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct HeraldConfig {
    #[serde(default)]
    pub engine: EngineConfig,
    /// Channel declarations: `{ type, name, enabled, ... }`
    #[serde(default)]
    pub channels: Vec<serde_json::Value>,
    #[serde(default)]
    pub rules: Vec<RoutingRule>,
}

impl HeraldConfig {
    /// Load a configuration file. `.json` files are parsed as JSON, anything else as TOML.
    pub fn from_file<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let content = std::fs::read_to_string(path)
            .map_err(|e| Error::Config(format!("Failed to read {}: {}", path.display(), e)))?;

        let is_json = path
            .extension()
            .and_then(|ext| ext.to_str())
            .map(|ext| ext.eq_ignore_ascii_case("json"))
            .unwrap_or(false);

        let mut config: Self = if is_json {
            parse_json(&content)?
        } else {
            parse_toml(&content)?
        };
        config.engine.apply_env_overrides();
        config.engine.validate()?;
        Ok(config)
    }

    pub fn from_toml_str(content: &str) -> Result<Self> {
        let config: Self = parse_toml(content)?;
        config.engine.validate()?;
        Ok(config)
    }

    pub fn from_json_str(content: &str) -> Result<Self> {
        let config: Self = parse_json(content)?;
        config.engine.validate()?;
        Ok(config)
    }

    /// Configured rules, or the built-in set when none are configured.
    pub fn effective_rules(&self) -> Vec<RoutingRule> {
        if self.rules.is_empty() {
            default_rules()
        } else {
            self.rules.clone()
        }
    }

    /// Build a channel registry from the channel declarations.
    pub async fn build_channels(&self) -> Result<Arc<ChannelRegistry>> {
        let registry = Arc::new(ChannelRegistry::new());
        for declaration in &self.channels {
            let channel = create_channel(declaration)?;
            if registry.get(channel.name()).await.is_some() {
                return Err(Error::InvalidConfiguration(format!(
                    "Duplicate channel name: {}",
                    channel.name()
                )));
            }
            registry.register_with_config(channel, declaration.clone()).await;
        }
        Ok(registry)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{AlertCategory, AlertPriority};
    use std::io::Write;

    const SAMPLE: &str = r#"
[engine]
dedup_window_secs = 120

[[channels]]
type = "memory"
name = "telegram"

[[channels]]
type = "console"
name = "email"
include_details = false

[[rules]]
id = "sec"
name = "Security"
category = "SECURITY"
priority = "HIGH"
channels = ["telegram", "email"]

[[rules.conditions]]
field = "data.threatLevel"
operator = "equals"
value = "CRITICAL"

[rules.rate_limit]
max_per_minute = 3

[rules.escalation]
delay_minutes = 5
max_escalations = 2
escalation_channels = ["telegram"]
"#;

    #[test]
    fn test_engine_config_defaults() {
        let config = EngineConfig::default();
        assert_eq!(config.dedup_window(), Duration::minutes(5));
        assert_eq!(config.retention(), Duration::hours(24));
        assert_eq!(config.cleanup_interval(), std::time::Duration::from_secs(3600));
        assert_eq!(config.escalation_scan_interval(), std::time::Duration::from_secs(60));
        assert_eq!(config.max_delivery_history, 1000);
    }

    #[test]
    fn test_parse_toml() {
        let config = HeraldConfig::from_toml_str(SAMPLE).unwrap();
        assert_eq!(config.engine.dedup_window_secs, 120);
        assert_eq!(config.engine.retention_hours, 24);
        assert_eq!(config.channels.len(), 2);

        let rule = &config.rules[0];
        assert_eq!(rule.category, AlertCategory::Security);
        assert_eq!(rule.priority, AlertPriority::High);
        assert_eq!(rule.conditions.len(), 1);
        assert_eq!(rule.rate_limit.as_ref().unwrap().max_per_minute, Some(3));
        assert_eq!(rule.escalation.as_ref().unwrap().max_escalations, 2);
    }

    #[test]
    fn test_parse_json_and_defaults() {
        let config = HeraldConfig::from_json_str(r#"{"channels": [{"type": "memory", "name": "sms"}]}"#).unwrap();
        assert_eq!(config.engine, EngineConfig::default());
        assert!(config.rules.is_empty());
        assert!(!config.effective_rules().is_empty());
    }

    #[test]
    fn test_invalid_config() {
        assert!(matches!(HeraldConfig::from_toml_str("engine = 5"), Err(Error::Config(_))));
        assert!(matches!(HeraldConfig::from_json_str("{"), Err(Error::Config(_))));
    }

    #[test]
    fn test_out_of_range_durations_are_rejected() {
        let result = HeraldConfig::from_toml_str("[engine]\ndedup_window_secs = 10000000000000000");
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

        let result = HeraldConfig::from_json_str(r#"{"engine": {"retention_hours": 3000000000000000}}"#);
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));

        let result = HeraldConfig::from_toml_str("[engine]\ncleanup_interval_secs = 9999999999");
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
    }

    #[test]
    fn test_out_of_range_durations_saturate() {
        let config = EngineConfig {
            dedup_window_secs: u64::MAX,
            retention_hours: 3_000_000_000_000_000,
            cleanup_interval_secs: u64::MAX,
            escalation_scan_interval_secs: 0,
            ..EngineConfig::default()
        };
        assert!(config.validate().is_err());
        assert_eq!(config.dedup_window(), Duration::MAX);
        assert_eq!(config.retention(), Duration::MAX);
        assert_eq!(config.cleanup_interval().as_secs(), defaults::MAX_INTERVAL_SECS);
        assert_eq!(config.escalation_scan_interval().as_secs(), 1);
    }

    #[test]
    fn test_from_file() {
        let mut file = tempfile::Builder::new().suffix(".toml").tempfile().unwrap();
        file.write_all(SAMPLE.as_bytes()).unwrap();

        let config = HeraldConfig::from_file(file.path()).unwrap();
        assert_eq!(config.rules.len(), 1);

        assert!(HeraldConfig::from_file("/nonexistent/herald.toml").is_err());
    }

    #[tokio::test]
    async fn test_build_channels() {
        let config = HeraldConfig::from_toml_str(SAMPLE).unwrap();
        let registry = config.build_channels().await.unwrap();
        assert_eq!(registry.list_names().await, vec!["email".to_string(), "telegram".to_string()]);
        assert_eq!(registry.get_info("email").await.unwrap().channel_type, "console");

        let duplicated = HeraldConfig::from_json_str(
            r#"{"channels": [{"type": "memory", "name": "sms"}, {"type": "console", "name": "sms"}]}"#,
        )
        .unwrap();
        assert!(duplicated.build_channels().await.is_err());
    }
}
