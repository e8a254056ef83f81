//! Per-rule rate limiting.
//!
//! Entries are keyed by `"{rule_id}_{category}"`. Each entry counts alerts in
//! one rolling window of the rule's `window_minutes`; the tightest configured
//! cap is the limit for that window.

use std::collections::hash_map::Entry;
use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use super::alert::Alert;
use super::rule::RoutingRule;

/// Counter state for one `(rule, category)` pair.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct RateLimitEntry {
    pub count: u32,
    pub window_start: DateTime<Utc>,
    pub blocked: bool,
}

/// Cache key for a rule/alert pair.
pub fn rate_limit_key(rule: &RoutingRule, alert: &Alert) -> String {
    format!("{}_{}", rule.id, alert.category.as_str())
}

/// Sliding-window limiter shared by all rules.
pub struct RateLimiter {
    entries: RwLock<HashMap<String, RateLimitEntry>>,
}

impl RateLimiter {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Decide whether `rule` may deliver `alert` at `now`, counting it if so.
    pub async fn allow(&self, alert: &Alert, rule: &RoutingRule, now: DateTime<Utc>) -> bool {
        let policy = match rule.active_rate_limit() {
            Some(policy) => policy,
            None => return true,
        };
        let key = rate_limit_key(rule, alert);
        let window = Duration::minutes(i64::from(policy.window_minutes));

        let mut entries = self.entries.write().await;
        let entry = match entries.entry(key) {
            Entry::Occupied(occupied) => occupied.into_mut(),
            Entry::Vacant(vacant) => {
                vacant.insert(RateLimitEntry {
                    count: 1,
                    window_start: now,
                    blocked: false,
                });
                return true;
            }
        };

        if now - entry.window_start > window {
            entry.count = 0;
            entry.window_start = now;
            entry.blocked = false;
        }

        match policy.effective_cap() {
            Some(cap) if entry.count >= cap => {
                entry.blocked = true;
                false
            }
            _ => {
                entry.count += 1;
                true
            }
        }
    }

    /// Current entry for a rule/alert pair.
    pub async fn get(&self, rule: &RoutingRule, alert: &Alert) -> Option<RateLimitEntry> {
        self.entries.read().await.get(&rate_limit_key(rule, alert)).cloned()
    }

    /// Drop entries whose window started more than `retention` ago. Returns the number removed.
    pub async fn cleanup(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| now - entry.window_start <= retention);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for RateLimiter {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::rule::RateLimitPolicy;
    use crate::{AlertCategory, AlertPriority};

    fn limited_rule(max_per_minute: u32) -> RoutingRule {
        RoutingRule::new(
            "trading_high",
            AlertCategory::Trading,
            AlertPriority::High,
            vec!["telegram".to_string()],
        )
        .with_rate_limit(RateLimitPolicy::per_minute(max_per_minute))
    }

    fn alert() -> Alert {
        Alert::trading(AlertPriority::High, "Fill", "Order filled")
    }

    #[test]
    fn test_key_format() {
        assert_eq!(rate_limit_key(&limited_rule(1), &alert()), "trading_high_TRADING");
    }

    #[tokio::test]
    async fn test_blocks_after_cap() {
        let limiter = RateLimiter::new();
        let rule = limited_rule(3);
        let now = Utc::now();

        assert!(limiter.allow(&alert(), &rule, now).await);
        assert!(limiter.allow(&alert(), &rule, now).await);
        assert!(limiter.allow(&alert(), &rule, now).await);
        assert!(!limiter.allow(&alert(), &rule, now).await);

        let entry = limiter.get(&rule, &alert()).await.unwrap();
        assert_eq!(entry.count, 3);
        assert!(entry.blocked);
    }

    #[tokio::test]
    async fn test_window_reset() {
        let limiter = RateLimiter::new();
        let rule = limited_rule(1);
        let now = Utc::now();

        assert!(limiter.allow(&alert(), &rule, now).await);
        assert!(!limiter.allow(&alert(), &rule, now + Duration::seconds(30)).await);
        assert!(limiter.allow(&alert(), &rule, now + Duration::seconds(61)).await);

        let entry = limiter.get(&rule, &alert()).await.unwrap();
        assert!(!entry.blocked);
        assert_eq!(entry.count, 1);
    }

    #[tokio::test]
    async fn test_tightest_cap_wins() {
        let limiter = RateLimiter::new();
        let rule = RoutingRule::new("r", AlertCategory::Trading, AlertPriority::Low, vec!["x".to_string()])
            .with_rate_limit(RateLimitPolicy::per_minute(10).with_max_per_hour(2).with_window_minutes(60));
        let now = Utc::now();

        assert!(limiter.allow(&alert(), &rule, now).await);
        assert!(limiter.allow(&alert(), &rule, now).await);
        assert!(!limiter.allow(&alert(), &rule, now + Duration::minutes(30)).await);
    }

    #[tokio::test]
    async fn test_unlimited_rule_always_allows() {
        let limiter = RateLimiter::new();
        let rule = RoutingRule::new("r", AlertCategory::Trading, AlertPriority::Low, vec!["x".to_string()]);
        let now = Utc::now();
        for _ in 0..50 {
            assert!(limiter.allow(&alert(), &rule, now).await);
        }
        assert!(limiter.is_empty().await);

        let mut disabled = RateLimitPolicy::per_minute(1);
        disabled.enabled = false;
        let rule = rule.with_rate_limit(disabled);
        assert!(limiter.allow(&alert(), &rule, now).await);
        assert!(limiter.allow(&alert(), &rule, now).await);
    }

    #[tokio::test]
    async fn test_cleanup() {
        let limiter = RateLimiter::new();
        let rule = limited_rule(5);
        let now = Utc::now();
        limiter.allow(&alert(), &rule, now).await;

        assert_eq!(limiter.cleanup(now + Duration::hours(24), Duration::hours(24)).await, 0);
        assert_eq!(limiter.cleanup(now + Duration::hours(25), Duration::hours(24)).await, 1);
        assert!(limiter.get(&rule, &alert()).await.is_none());
    }
}
