//! Escalation scheduling.
//!
//! An entry is created for a `Critical`-or-above alert whose matched rule
//! carries an enabled escalation policy. Each periodic scan re-delivers due
//! entries to the policy's escalation channels and either reschedules them or,
//! once `max_escalations` deliveries have happened, marks them completed.
//! Completed entries are purged by cleanup.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use tokio::sync::RwLock;

use super::alert::Alert;
use super::rule::{EscalationPolicy, RoutingRule};

/// Escalation state for one alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct EscalationEntry {
    pub alert: Alert,
    /// Rule whose policy drives this entry
    pub rule_id: String,
    pub policy: EscalationPolicy,
    /// Starts at 1; incremented on every escalation delivery
    pub escalation_level: u32,
    pub next_escalation_time: DateTime<Utc>,
    pub completed: bool,
    pub created_at: DateTime<Utc>,
}

impl EscalationEntry {
    fn delay(&self) -> Duration {
        Duration::minutes(i64::from(self.policy.delay_minutes))
    }

    pub fn is_due(&self, now: DateTime<Utc>) -> bool {
        !self.completed && self.next_escalation_time <= now
    }
}

/// An escalation delivery the caller must perform.
#[derive(Debug, Clone)]
pub struct DueEscalation {
    pub alert: Alert,
    pub rule_id: String,
    pub channels: Vec<String>,
    /// Level reached by this delivery
    pub level: u32,
    /// Whether this was the final escalation for the alert
    pub completed: bool,
}

/// Pending escalations keyed by alert id.
pub struct EscalationScheduler {
    entries: RwLock<HashMap<String, EscalationEntry>>,
}

impl EscalationScheduler {
    pub fn new() -> Self {
        Self {
            entries: RwLock::new(HashMap::new()),
        }
    }

    /// Schedule escalation for `alert` under `rule`.
    ///
    /// Returns `false` when the alert is not eligible, the rule has no active
    /// policy, or the alert is already tracked.
    pub async fn schedule(&self, alert: &Alert, rule: &RoutingRule, now: DateTime<Utc>) -> bool {
        let policy = match rule.active_escalation() {
            Some(policy) if alert.priority.is_escalation_eligible() => policy.clone(),
            _ => return false,
        };

        let mut entries = self.entries.write().await;
        if entries.contains_key(&alert.id) {
            return false;
        }

        let next = now + Duration::minutes(i64::from(policy.delay_minutes));
        tracing::debug!(
            alert_id = %alert.id,
            rule_id = %rule.id,
            next_escalation = %next,
            "Escalation scheduled"
        );
        entries.insert(
            alert.id.clone(),
            EscalationEntry {
                alert: alert.clone(),
                rule_id: rule.id.clone(),
                policy,
                escalation_level: 1,
                next_escalation_time: next,
                completed: false,
                created_at: now,
            },
        );
        true
    }

    /// Advance every due entry and return the deliveries to perform.
    pub async fn take_due(&self, now: DateTime<Utc>) -> Vec<DueEscalation> {
        let mut entries = self.entries.write().await;
        let mut due = Vec::new();

        for entry in entries.values_mut().filter(|e| e.is_due(now)) {
            entry.escalation_level += 1;
            if entry.escalation_level <= entry.policy.max_escalations {
                entry.next_escalation_time = now + entry.delay();
            } else {
                entry.completed = true;
            }

            due.push(DueEscalation {
                alert: entry.alert.clone(),
                rule_id: entry.rule_id.clone(),
                channels: entry.policy.escalation_channels.clone(),
                level: entry.escalation_level,
                completed: entry.completed,
            });
        }

        due
    }

    /// Mark an alert's escalation as resolved. Returns `false` if it is not tracked.
    pub async fn resolve(&self, alert_id: &str) -> bool {
        match self.entries.write().await.get_mut(alert_id) {
            Some(entry) => {
                entry.completed = true;
                true
            }
            None => false,
        }
    }

    pub async fn get(&self, alert_id: &str) -> Option<EscalationEntry> {
        self.entries.read().await.get(alert_id).cloned()
    }

    /// Number of entries that are not yet completed.
    pub async fn pending_count(&self) -> usize {
        self.entries.read().await.values().filter(|e| !e.completed).count()
    }

    /// Remove completed entries. Returns the number removed.
    pub async fn purge_completed(&self) -> usize {
        let mut entries = self.entries.write().await;
        let before = entries.len();
        entries.retain(|_, entry| !entry.completed);
        before - entries.len()
    }

    pub async fn len(&self) -> usize {
        self.entries.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.entries.read().await.is_empty()
    }
}

impl Default for EscalationScheduler {
    fn default() -> Self {
        Self::new()
    }
}
