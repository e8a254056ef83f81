//! Routing rules.
//!
//! A rule maps alerts of one category, at or above a priority floor and
//! satisfying every condition, to a set of delivery channels. Rules may carry
//! a rate limit and an escalation policy.

use std::sync::OnceLock;

use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::Value;

use super::alert::{value_to_text, Alert};
use super::error::{Error, Result};
use super::{AlertCategory, AlertPriority};

fn default_true() -> bool {
    true
}

fn default_window_minutes() -> u32 {
    1
}

fn default_delay_minutes() -> u32 {
    5
}

fn default_max_escalations() -> u32 {
    3
}

/// Comparison operators for rule conditions.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ConditionOperator {
    Equals,
    Contains,
    GreaterThan,
    LessThan,
    Regex,
}

impl ConditionOperator {
    pub fn as_str(&self) -> &str {
        match self {
            Self::Equals => "equals",
            Self::Contains => "contains",
            Self::GreaterThan => "greater_than",
            Self::LessThan => "less_than",
            Self::Regex => "regex",
        }
    }

    /// Parse from string.
    pub fn from_string(s: &str) -> Option<Self> {
        match s {
            "equals" | "eq" | "==" => Some(Self::Equals),
            "contains" => Some(Self::Contains),
            "greater_than" | "gt" | ">" => Some(Self::GreaterThan),
            "less_than" | "lt" | "<" => Some(Self::LessThan),
            "regex" | "matches" => Some(Self::Regex),
            _ => None,
        }
    }
}

/// A field predicate: `field` is a dot path resolved against the alert.
///
/// A `regex` pattern is compiled on first use and cached with the condition.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RuleCondition {
    pub field: String,
    pub operator: ConditionOperator,
    pub value: Value,
    #[serde(skip)]
    compiled: OnceLock<std::result::Result<Regex, regex::Error>>,
}

impl PartialEq for RuleCondition {
    fn eq(&self, other: &Self) -> bool {
        self.field == other.field && self.operator == other.operator && self.value == other.value
    }
}

impl RuleCondition {
    pub fn new(field: impl Into<String>, operator: ConditionOperator, value: impl Into<Value>) -> Self {
        Self {
            field: field.into(),
            operator,
            value: value.into(),
            compiled: OnceLock::new(),
        }
    }

    /// The condition value compiled as a pattern.
    fn pattern(&self) -> std::result::Result<&Regex, &regex::Error> {
        self.compiled
            .get_or_init(|| Regex::new(&value_to_text(&self.value)))
            .as_ref()
    }

    /// Evaluate the condition. A field that does not resolve never matches.
    pub fn evaluate(&self, alert: &Alert) -> bool {
        let actual = match alert.field_value(&self.field) {
            Some(v) => v,
            None => return false,
        };

        match self.operator {
            ConditionOperator::Equals => values_equal(&actual, &self.value),
            ConditionOperator::Contains => match &actual {
                Value::Array(items) => items.iter().any(|item| values_equal(item, &self.value)),
                other => value_to_text(other).contains(&value_to_text(&self.value)),
            },
            ConditionOperator::GreaterThan => match (as_number(&actual), as_number(&self.value)) {
                (Some(a), Some(b)) => a > b,
                _ => false,
            },
            ConditionOperator::LessThan => match (as_number(&actual), as_number(&self.value)) {
                (Some(a), Some(b)) => a < b,
                _ => false,
            },
            ConditionOperator::Regex => match self.pattern() {
                Ok(re) => re.is_match(&value_to_text(&actual)),
                Err(e) => {
                    tracing::warn!(field = %self.field, "Invalid regex in rule condition: {}", e);
                    false
                }
            },
        }
    }
}

fn as_number(value: &Value) -> Option<f64> {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse::<f64>().ok(),
        _ => None,
    }
}

fn values_equal(actual: &Value, expected: &Value) -> bool {
    if actual == expected {
        return true;
    }
    if actual.is_number() || expected.is_number() {
        if let (Some(a), Some(b)) = (as_number(actual), as_number(expected)) {
            return (a - b).abs() < f64::EPSILON;
        }
    }
    value_to_text(actual) == value_to_text(expected)
}

/// Rate limit policy attached to a rule.
///
/// The tightest configured cap applies within a single rolling window of
/// `window_minutes`.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct RateLimitPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_minute: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_hour: Option<u32>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub max_per_day: Option<u32>,
    #[serde(default = "default_window_minutes")]
    pub window_minutes: u32,
}

impl RateLimitPolicy {
    /// Policy capped at `max` alerts per minute.
    pub fn per_minute(max: u32) -> Self {
        Self {
            enabled: true,
            max_per_minute: Some(max),
            max_per_hour: None,
            max_per_day: None,
            window_minutes: 1,
        }
    }

    pub fn with_max_per_hour(mut self, max: u32) -> Self {
        self.max_per_hour = Some(max);
        self
    }

    pub fn with_max_per_day(mut self, max: u32) -> Self {
        self.max_per_day = Some(max);
        self
    }

    pub fn with_window_minutes(mut self, minutes: u32) -> Self {
        self.window_minutes = minutes;
        self
    }

    /// Smallest configured cap, if any.
    pub fn effective_cap(&self) -> Option<u32> {
        [self.max_per_minute, self.max_per_hour, self.max_per_day]
            .into_iter()
            .flatten()
            .min()
    }
}

/// Escalation policy attached to a rule.
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct EscalationPolicy {
    #[serde(default = "default_true")]
    pub enabled: bool,
    #[serde(default = "default_delay_minutes")]
    pub delay_minutes: u32,
    #[serde(default = "default_max_escalations")]
    pub max_escalations: u32,
    #[serde(default)]
    pub escalation_channels: Vec<String>,
}

impl EscalationPolicy {
    pub fn new(delay_minutes: u32, max_escalations: u32, escalation_channels: Vec<String>) -> Self {
        Self {
            enabled: true,
            delay_minutes,
            max_escalations,
            escalation_channels,
        }
    }
}

/// Routing policy record.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoutingRule {
    pub id: String,
    #[serde(default)]
    pub name: String,
    /// Must equal the alert category to match
    pub category: AlertCategory,
    /// Minimum alert priority
    pub priority: AlertPriority,
    /// Delivery channels, in order
    pub channels: Vec<String>,
    /// All conditions must hold
    #[serde(default)]
    pub conditions: Vec<RuleCondition>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub rate_limit: Option<RateLimitPolicy>,
    #[serde(default, skip_serializing_if = "Option::is_none")]
    pub escalation: Option<EscalationPolicy>,
    #[serde(default = "default_true")]
    pub enabled: bool,
}

impl RoutingRule {
    pub fn new(
        id: impl Into<String>,
        category: AlertCategory,
        priority: AlertPriority,
        channels: Vec<String>,
    ) -> Self {
        let id = id.into();
        Self {
            name: id.clone(),
            id,
            category,
            priority,
            channels,
            conditions: Vec::new(),
            rate_limit: None,
            escalation: None,
            enabled: true,
        }
    }

    pub fn with_name(mut self, name: impl Into<String>) -> Self {
        self.name = name.into();
        self
    }

    pub fn with_condition(mut self, condition: RuleCondition) -> Self {
        self.conditions.push(condition);
        self
    }

    pub fn with_rate_limit(mut self, policy: RateLimitPolicy) -> Self {
        self.rate_limit = Some(policy);
        self
    }

    pub fn with_escalation(mut self, policy: EscalationPolicy) -> Self {
        self.escalation = Some(policy);
        self
    }

    pub fn disabled(mut self) -> Self {
        self.enabled = false;
        self
    }

    /// Escalation policy, if present and enabled.
    pub fn active_escalation(&self) -> Option<&EscalationPolicy> {
        self.escalation.as_ref().filter(|p| p.enabled)
    }

    /// Rate limit policy, if present and enabled.
    pub fn active_rate_limit(&self) -> Option<&RateLimitPolicy> {
        self.rate_limit.as_ref().filter(|p| p.enabled)
    }

    /// Check that the rule can be routed.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::InvalidConfiguration("Rule id must not be empty".to_string()));
        }
        if self.channels.is_empty() {
            return Err(Error::InvalidConfiguration(format!(
                "Rule '{}' has no channels",
                self.id
            )));
        }
        for condition in &self.conditions {
            if condition.field.trim().is_empty() {
                return Err(Error::InvalidConfiguration(format!(
                    "Rule '{}' has a condition without a field",
                    self.id
                )));
            }
            if condition.operator == ConditionOperator::Regex {
                condition.pattern().map_err(|e| {
                    Error::InvalidConfiguration(format!(
                        "Rule '{}' has an invalid regex for '{}': {}",
                        self.id, condition.field, e
                    ))
                })?;
            }
        }
        if let Some(policy) = self.active_rate_limit() {
            if policy.window_minutes == 0 {
                return Err(Error::InvalidConfiguration(format!(
                    "Rule '{}' rate limit window must be at least one minute",
                    self.id
                )));
            }
        }
        if let Some(policy) = self.active_escalation() {
            if policy.max_escalations == 0 {
                return Err(Error::InvalidConfiguration(format!(
                    "Rule '{}' escalation needs max_escalations >= 1",
                    self.id
                )));
            }
            if policy.escalation_channels.is_empty() {
                return Err(Error::InvalidConfiguration(format!(
                    "Rule '{}' escalation has no channels",
                    self.id
                )));
            }
        }
        Ok(())
    }
}

fn channels(names: &[&str]) -> Vec<String> {
    names.iter().map(|s| s.to_string()).collect()
}

/// Built-in rule set used when no rules are configured.
pub fn default_rules() -> Vec<RoutingRule> {
    vec![
        RoutingRule::new(
            "security_critical",
            AlertCategory::Security,
            AlertPriority::Critical,
            channels(&["telegram", "email", "sms"]),
        )
        .with_name("Critical security incidents")
        .with_escalation(EscalationPolicy::new(5, 3, channels(&["sms", "telegram"]))),
        RoutingRule::new(
            "security_high",
            AlertCategory::Security,
            AlertPriority::High,
            channels(&["telegram"]),
        )
        .with_name("Security warnings")
        .with_rate_limit(RateLimitPolicy::per_minute(10).with_max_per_hour(60)),
        RoutingRule::new(
            "trading_high",
            AlertCategory::Trading,
            AlertPriority::High,
            channels(&["telegram"]),
        )
        .with_name("Trading events")
        .with_rate_limit(RateLimitPolicy::per_minute(5).with_max_per_hour(100)),
        RoutingRule::new(
            "trading_emergency",
            AlertCategory::Trading,
            AlertPriority::Emergency,
            channels(&["telegram", "email", "sms"]),
        )
        .with_name("Trading emergencies")
        .with_escalation(EscalationPolicy::new(10, 2, channels(&["sms"]))),
        RoutingRule::new(
            "system_critical",
            AlertCategory::System,
            AlertPriority::Critical,
            channels(&["telegram", "email"]),
        )
        .with_name("System failures")
        .with_rate_limit(RateLimitPolicy::per_minute(3).with_max_per_hour(20)),
        RoutingRule::new(
            "performance_high",
            AlertCategory::Performance,
            AlertPriority::High,
            channels(&["telegram"]),
        )
        .with_name("Performance degradation")
        .with_rate_limit(RateLimitPolicy::per_minute(2).with_window_minutes(5)),
        RoutingRule::new(
            "network_critical",
            AlertCategory::Network,
            AlertPriority::Critical,
            channels(&["telegram", "email"]),
        )
        .with_name("Network outages"),
        RoutingRule::new(
            "maintenance_notice",
            AlertCategory::Maintenance,
            AlertPriority::Low,
            channels(&["email"]),
        )
        .with_name("Maintenance notices")
        .with_rate_limit(RateLimitPolicy::per_minute(1).with_max_per_day(20).with_window_minutes(60)),
    ]
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn alert() -> Alert {
        Alert::security(AlertPriority::Critical, "Intrusion", "Brute force on ssh")
            .with_field("threatLevel", "CRITICAL")
            .with_field("attempts", 42)
            .with_field("score", "7.5")
            .with_tag("ssh")
    }

    #[test]
    fn test_equals_condition() {
        let cond = RuleCondition::new("data.threatLevel", ConditionOperator::Equals, "CRITICAL");
        assert!(cond.evaluate(&alert()));

        let cond = RuleCondition::new("data.threatLevel", ConditionOperator::Equals, "LOW");
        assert!(!cond.evaluate(&alert()));

        let cond = RuleCondition::new("data.attempts", ConditionOperator::Equals, "42");
        assert!(cond.evaluate(&alert()));
    }

    #[test]
    fn test_contains_condition() {
        let cond = RuleCondition::new("message", ConditionOperator::Contains, "ssh");
        assert!(cond.evaluate(&alert()));

        let cond = RuleCondition::new("tags", ConditionOperator::Contains, "ssh");
        assert!(cond.evaluate(&alert()));

        let cond = RuleCondition::new("tags", ConditionOperator::Contains, "rdp");
        assert!(!cond.evaluate(&alert()));
    }

    #[test]
    fn test_numeric_conditions_coerce() {
        assert!(RuleCondition::new("data.attempts", ConditionOperator::GreaterThan, 10).evaluate(&alert()));
        assert!(!RuleCondition::new("data.attempts", ConditionOperator::LessThan, 10).evaluate(&alert()));
        assert!(RuleCondition::new("data.score", ConditionOperator::GreaterThan, "7").evaluate(&alert()));
        assert!(!RuleCondition::new("title", ConditionOperator::GreaterThan, 1).evaluate(&alert()));
    }

    #[test]
    fn test_regex_condition() {
        assert!(RuleCondition::new("title", ConditionOperator::Regex, "^Intru").evaluate(&alert()));
        assert!(!RuleCondition::new("title", ConditionOperator::Regex, "^Outage").evaluate(&alert()));
        assert!(!RuleCondition::new("title", ConditionOperator::Regex, "(").evaluate(&alert()));
    }

    #[test]
    fn test_regex_compiled_once_and_kept_on_clone() {
        let condition = RuleCondition::new("title", ConditionOperator::Regex, "^Intru");
        assert!(condition.compiled.get().is_none());

        assert!(condition.evaluate(&alert()));
        assert!(condition.evaluate(&alert()));
        assert!(matches!(condition.compiled.get(), Some(Ok(_))));

        let copy = condition.clone();
        assert!(copy.compiled.get().is_some());
        assert_eq!(copy, condition);

        let parsed: RuleCondition = serde_json::from_value(serde_json::to_value(&condition).unwrap()).unwrap();
        assert!(parsed.compiled.get().is_none());
        assert_eq!(parsed, condition);
    }

    #[test]
    fn test_validate_primes_regex_cache() {
        let rule = RoutingRule::new("r", AlertCategory::Security, AlertPriority::Low, vec!["sms".to_string()])
            .with_condition(RuleCondition::new("title", ConditionOperator::Regex, "^Intru"));
        rule.validate().unwrap();
        assert!(matches!(rule.conditions[0].compiled.get(), Some(Ok(_))));
    }

    #[test]
    fn test_missing_field_fails() {
        let cond = RuleCondition::new("data.nope", ConditionOperator::Equals, json!(null));
        assert!(!cond.evaluate(&alert()));
    }

    #[test]
    fn test_effective_cap() {
        let policy = RateLimitPolicy::per_minute(10).with_max_per_hour(4).with_max_per_day(100);
        assert_eq!(policy.effective_cap(), Some(4));

        let uncapped = RateLimitPolicy {
            enabled: true,
            max_per_minute: None,
            max_per_hour: None,
            max_per_day: None,
            window_minutes: 1,
        };
        assert_eq!(uncapped.effective_cap(), None);
    }

    #[test]
    fn test_rule_validation() {
        let rule = RoutingRule::new("r1", AlertCategory::System, AlertPriority::High, vec![]);
        assert!(rule.validate().is_err());

        let rule = RoutingRule::new("r1", AlertCategory::System, AlertPriority::High, channels(&["email"]))
            .with_condition(RuleCondition::new("title", ConditionOperator::Regex, "(unclosed"));
        assert!(matches!(rule.validate(), Err(Error::InvalidConfiguration(_))));

        let rule = RoutingRule::new("r1", AlertCategory::System, AlertPriority::High, channels(&["email"]))
            .with_escalation(EscalationPolicy::new(5, 0, channels(&["sms"])));
        assert!(rule.validate().is_err());

        let rule = RoutingRule::new("r1", AlertCategory::System, AlertPriority::High, channels(&["email"]))
            .with_rate_limit(RateLimitPolicy::per_minute(3).with_window_minutes(0));
        assert!(rule.validate().is_err());
    }

    #[test]
    fn test_default_rules_are_valid() {
        let rules = default_rules();
        assert!(!rules.is_empty());
        for rule in &rules {
            rule.validate().unwrap();
        }
    }

    #[test]
    fn test_rule_deserialize_defaults() {
        let rule: RoutingRule = serde_json::from_value(json!({
            "id": "sec",
            "category": "SECURITY",
            "priority": "HIGH",
            "channels": ["telegram"],
            "conditions": [
                {"field": "data.threatLevel", "operator": "equals", "value": "CRITICAL"}
            ],
            "rate_limit": {"max_per_minute": 3},
            "escalation": {"delay_minutes": 5, "max_escalations": 2, "escalation_channels": ["sms"]}
        }))
        .unwrap();

        assert!(rule.enabled);
        assert_eq!(rule.conditions[0].operator, ConditionOperator::Equals);
        assert_eq!(rule.active_rate_limit().unwrap().window_minutes, 1);
        assert!(rule.active_escalation().unwrap().enabled);
    }
}
