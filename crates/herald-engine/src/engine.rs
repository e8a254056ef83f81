//! Alert engine.
//!
//! Pipeline per alert: validation, duplicate check, rule matching, per-rule
//! rate limiting, fan-out delivery and, for critical alerts, escalation
//! scheduling. Cleanup and the escalation scan run on their own timers.

use std::collections::HashSet;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Weak};

use serde::Serialize;
use tokio::sync::{watch, Mutex, RwLock};
use tokio::task::JoinHandle;

use super::channels::ChannelRegistry;
use super::clock::{Clock, SystemClock};
use super::config::EngineConfig;
use super::dedup::{DeduplicationCache, DeduplicationRecord};
use super::dispatcher::{collect_channels, DeliveryResult, Dispatcher};
use super::error::{Error, Result};
use super::escalation::{EscalationEntry, EscalationScheduler};
use super::matcher::match_rules;
use super::rate_limit::{RateLimitEntry, RateLimiter};
use super::rule::RoutingRule;
use super::Alert;

/// What happened to a submitted alert.
#[derive(Debug, Clone, PartialEq, Serialize)]
#[serde(tag = "status", rename_all = "snake_case")]
pub enum ProcessOutcome {
    /// Same content seen inside the suppression window
    Suppressed { count: u32 },
    /// No enabled rule matched
    Unrouted,
    /// Every matched rule was over its rate limit
    RateLimited { rule_ids: Vec<String> },
    /// Delivery was attempted on at least one channel
    Dispatched {
        deliveries: Vec<DeliveryResult>,
        /// Matched rules skipped by their rate limit
        rate_limited: Vec<String>,
        escalation_scheduled: bool,
    },
}

impl ProcessOutcome {
    /// Delivery results, empty unless the alert was dispatched.
    pub fn into_deliveries(self) -> Vec<DeliveryResult> {
        match self {
            Self::Dispatched { deliveries, .. } => deliveries,
            _ => Vec::new(),
        }
    }
}

/// Entries removed by one cleanup pass.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Serialize)]
pub struct CleanupReport {
    pub dedup_removed: usize,
    pub rate_limit_removed: usize,
    pub escalations_removed: usize,
}

/// Engine statistics.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct EngineStats {
    pub total_alerts_processed: u64,
    pub duplicates_suppressed: u64,
    pub rate_limited: u64,
    pub unrouted: u64,
    /// Counted over the retained delivery history
    pub successful_deliveries: usize,
    pub failed_deliveries: usize,
    pub active_rules: usize,
    pub pending_escalations: usize,
    pub dedup_cache_size: usize,
    pub rate_limit_cache_size: usize,
}

#[derive(Default)]
struct Counters {
    processed: AtomicU64,
    suppressed: AtomicU64,
    rate_limited: AtomicU64,
    unrouted: AtomicU64,
}

/// Deduplicating, rate-limiting, routing and escalating alert engine.
///
/// All state is in memory and owned by the instance.
pub struct AlertEngine {
    config: EngineConfig,
    clock: Arc<dyn Clock>,
    rules: RwLock<Vec<RoutingRule>>,
    dedup: DeduplicationCache,
    rate_limiter: RateLimiter,
    dispatcher: Dispatcher,
    escalations: EscalationScheduler,
    counters: Counters,
    running: AtomicBool,
    shutdown_tx: watch::Sender<bool>,
    tasks: Mutex<Vec<JoinHandle<()>>>,
}

impl AlertEngine {
    /// Create an engine on the wall clock.
    pub fn new(config: EngineConfig, channels: Arc<ChannelRegistry>) -> Self {
        Self::with_clock(config, channels, Arc::new(SystemClock))
    }

    /// Create an engine with an injected clock.
    pub fn with_clock(config: EngineConfig, channels: Arc<ChannelRegistry>, clock: Arc<dyn Clock>) -> Self {
        let (shutdown_tx, _) = watch::channel(false);
        Self {
            dedup: DeduplicationCache::new(config.dedup_window()),
            dispatcher: Dispatcher::new(channels, config.max_delivery_history),
            rate_limiter: RateLimiter::new(),
            escalations: EscalationScheduler::new(),
            rules: RwLock::new(Vec::new()),
            counters: Counters::default(),
            running: AtomicBool::new(false),
            shutdown_tx,
            tasks: Mutex::new(Vec::new()),
            config,
            clock,
        }
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    /// The channel registry alerts are delivered through.
    pub fn channels(&self) -> Arc<ChannelRegistry> {
        self.dispatcher.channels()
    }

    /// Replace the whole rule set. Nothing changes if any rule is invalid.
    pub async fn load_rules(&self, rules: Vec<RoutingRule>) -> Result<()> {
        let mut ids = HashSet::new();
        for rule in &rules {
            rule.validate()?;
            if !ids.insert(rule.id.as_str()) {
                return Err(Error::InvalidConfiguration(format!("Duplicate rule id: {}", rule.id)));
            }
        }

        let count = rules.len();
        *self.rules.write().await = rules;
        tracing::info!(rules = count, "Routing rules loaded");
        Ok(())
    }

    /// Insert a rule, replacing any rule with the same id.
    pub async fn set_rule(&self, rule: RoutingRule) -> Result<()> {
        rule.validate()?;
        let mut rules = self.rules.write().await;
        match rules.iter_mut().find(|r| r.id == rule.id) {
            Some(existing) => {
                tracing::debug!(rule_id = %rule.id, "Routing rule replaced");
                *existing = rule;
            }
            None => {
                tracing::debug!(rule_id = %rule.id, "Routing rule added");
                rules.push(rule);
            }
        }
        Ok(())
    }

    /// Remove a rule by id.
    pub async fn remove_rule(&self, rule_id: &str) -> Result<RoutingRule> {
        let mut rules = self.rules.write().await;
        let index = rules
            .iter()
            .position(|r| r.id == rule_id)
            .ok_or_else(|| Error::NotFound(format!("Rule not found: {}", rule_id)))?;
        Ok(rules.remove(index))
    }

    /// Current rule set.
    pub async fn rules(&self) -> Vec<RoutingRule> {
        self.rules.read().await.clone()
    }

    /// Submit an alert and return the delivery results.
    ///
    /// Suppressed, unrouted and fully rate-limited alerts yield an empty list.
    /// Channel failures appear in the results, never as an error.
    pub async fn submit(&self, alert: Alert) -> Result<Vec<DeliveryResult>> {
        self.process(alert).await.map(ProcessOutcome::into_deliveries)
    }

    /// Submit an alert and report what happened to it.
    pub async fn process(&self, alert: Alert) -> Result<ProcessOutcome> {
        alert.validate()?;
        let now = self.clock.now();
        self.counters.processed.fetch_add(1, Ordering::Relaxed);

        if let Some(count) = self.dedup.check(&alert, now).await {
            self.counters.suppressed.fetch_add(1, Ordering::Relaxed);
            tracing::info!(
                alert_id = %alert.id,
                title = %alert.title,
                count,
                "Duplicate alert suppressed"
            );
            return Ok(ProcessOutcome::Suppressed { count });
        }

        let matched: Vec<RoutingRule> = {
            let rules = self.rules.read().await;
            match_rules(&alert, &rules).into_iter().cloned().collect()
        };

        if matched.is_empty() {
            self.counters.unrouted.fetch_add(1, Ordering::Relaxed);
            tracing::warn!(
                alert_id = %alert.id,
                category = %alert.category,
                priority = %alert.priority,
                "No routing rule matched alert"
            );
            return Ok(ProcessOutcome::Unrouted);
        }

        let mut allowed = Vec::new();
        let mut rate_limited = Vec::new();
        for rule in &matched {
            if self.rate_limiter.allow(&alert, rule, now).await {
                allowed.push(rule);
            } else {
                tracing::warn!(alert_id = %alert.id, rule_id = %rule.id, "Rule rate limited, skipping");
                rate_limited.push(rule.id.clone());
            }
        }

        if allowed.is_empty() {
            self.counters.rate_limited.fetch_add(1, Ordering::Relaxed);
            return Ok(ProcessOutcome::RateLimited { rule_ids: rate_limited });
        }

        let channels = collect_channels(&allowed);
        let deliveries = self.dispatcher.deliver(&alert, &channels, now).await;

        // First escalation-enabled rule wins; policies are not merged.
        let escalation_scheduled = match allowed.iter().find(|r| r.active_escalation().is_some()) {
            Some(rule) => self.escalations.schedule(&alert, rule, now).await,
            None => false,
        };

        let delivered = deliveries.iter().filter(|d| d.success).count();
        tracing::info!(
            alert_id = %alert.id,
            rules = allowed.len(),
            channels = deliveries.len(),
            delivered,
            escalation_scheduled,
            "Alert processed"
        );

        Ok(ProcessOutcome::Dispatched {
            deliveries,
            rate_limited,
            escalation_scheduled,
        })
    }

    /// Deliver every due escalation and advance its state.
    pub async fn run_escalation_scan(&self) -> Vec<DeliveryResult> {
        let now = self.clock.now();
        let due = self.escalations.take_due(now).await;
        let mut results = Vec::new();

        for escalation in due {
            tracing::warn!(
                alert_id = %escalation.alert.id,
                rule_id = %escalation.rule_id,
                level = escalation.level,
                final_level = escalation.completed,
                "Escalating alert"
            );
            let deliveries = self.dispatcher.deliver(&escalation.alert, &escalation.channels, now).await;
            results.extend(deliveries);
        }

        results
    }

    /// Stop escalating an alert. The entry is purged on the next cleanup.
    pub async fn resolve_escalation(&self, alert_id: &str) -> Result<()> {
        if self.escalations.resolve(alert_id).await {
            tracing::info!(alert_id = %alert_id, "Escalation resolved");
            Ok(())
        } else {
            Err(Error::NotFound(format!("No escalation for alert: {}", alert_id)))
        }
    }

    /// Evict expired dedup and rate-limit entries and completed escalations.
    pub async fn cleanup(&self) -> CleanupReport {
        let now = self.clock.now();
        let retention = self.config.retention();
        let report = CleanupReport {
            dedup_removed: self.dedup.cleanup(now, retention).await,
            rate_limit_removed: self.rate_limiter.cleanup(now, retention).await,
            escalations_removed: self.escalations.purge_completed().await,
        };
        tracing::debug!(
            dedup = report.dedup_removed,
            rate_limit = report.rate_limit_removed,
            escalations = report.escalations_removed,
            "Cleanup finished"
        );
        report
    }

    /// Get engine statistics.
    pub async fn get_stats(&self) -> EngineStats {
        let (successful_deliveries, failed_deliveries) = self.dispatcher.outcome_counts().await;
        let active_rules = self.rules.read().await.iter().filter(|r| r.enabled).count();

        EngineStats {
            total_alerts_processed: self.counters.processed.load(Ordering::Relaxed),
            duplicates_suppressed: self.counters.suppressed.load(Ordering::Relaxed),
            rate_limited: self.counters.rate_limited.load(Ordering::Relaxed),
            unrouted: self.counters.unrouted.load(Ordering::Relaxed),
            successful_deliveries,
            failed_deliveries,
            active_rules,
            pending_escalations: self.escalations.pending_count().await,
            dedup_cache_size: self.dedup.len().await,
            rate_limit_cache_size: self.rate_limiter.len().await,
        }
    }

    pub async fn dedup_record(&self, alert: &Alert) -> Option<DeduplicationRecord> {
        self.dedup.get(alert).await
    }

    pub async fn rate_limit_entry(&self, rule: &RoutingRule, alert: &Alert) -> Option<RateLimitEntry> {
        self.rate_limiter.get(rule, alert).await
    }

    pub async fn escalation(&self, alert_id: &str) -> Option<EscalationEntry> {
        self.escalations.get(alert_id).await
    }

    /// Most recent delivery results, newest last.
    pub async fn recent_deliveries(&self, limit: usize) -> Vec<DeliveryResult> {
        self.dispatcher.recent(limit).await
    }

    pub fn is_running(&self) -> bool {
        self.running.load(Ordering::SeqCst)
    }

    /// Spawn the cleanup and escalation-scan tasks. No-op if already running.
    pub async fn start(self: &Arc<Self>) {
        if self.running.swap(true, Ordering::SeqCst) {
            return;
        }
        self.shutdown_tx.send_replace(false);

        let cleanup = self.spawn_periodic("cleanup", self.config.cleanup_interval(), |engine| async move {
            engine.cleanup().await;
        });
        let scan = self.spawn_periodic(
            "escalation_scan",
            self.config.escalation_scan_interval(),
            |engine| async move {
                engine.run_escalation_scan().await;
            },
        );

        self.tasks.lock().await.extend([cleanup, scan]);
        tracing::info!(
            cleanup_interval_secs = self.config.cleanup_interval().as_secs(),
            escalation_scan_interval_secs = self.config.escalation_scan_interval().as_secs(),
            "Alert engine background tasks started"
        );
    }

    fn spawn_periodic<F, Fut>(self: &Arc<Self>, name: &'static str, period: std::time::Duration, job: F) -> JoinHandle<()>
    where
        F: Fn(Arc<AlertEngine>) -> Fut + Send + 'static,
        Fut: std::future::Future<Output = ()> + Send + 'static,
    {
        let engine: Weak<AlertEngine> = Arc::downgrade(self);
        let mut shutdown_rx = self.shutdown_tx.subscribe();

        tokio::spawn(async move {
            let mut ticker = tokio::time::interval(period);
            ticker.tick().await; // First tick completes immediately

            loop {
                tokio::select! {
                    _ = ticker.tick() => {
                        match engine.upgrade() {
                            Some(engine) => job(engine).await,
                            None => break,
                        }
                    }
                    changed = shutdown_rx.changed() => {
                        if changed.is_err() || *shutdown_rx.borrow() {
                            break;
                        }
                    }
                }
            }
            tracing::debug!(task = name, "Background task stopped");
        })
    }

    /// Stop the background tasks and wait for them to finish.
    pub async fn shutdown(&self) {
        if !self.running.swap(false, Ordering::SeqCst) {
            return;
        }
        self.shutdown_tx.send_replace(true);

        let handles: Vec<JoinHandle<()>> = self.tasks.lock().await.drain(..).collect();
        for handle in handles {
            if let Err(e) = handle.await {
                tracing::warn!("Background task ended abnormally: {}", e);
            }
        }
        tracing::info!("Alert engine stopped");
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::channels::MemoryChannel;
    use crate::clock::ManualClock;
    use crate::rule::{EscalationPolicy, RateLimitPolicy};
    use crate::{AlertCategory, AlertPriority};

    async fn engine() -> (AlertEngine, ManualClock) {
        let registry = Arc::new(ChannelRegistry::new());
        registry.register(Arc::new(MemoryChannel::new("telegram".to_string()))).await;
        registry.register(Arc::new(MemoryChannel::new("sms".to_string()))).await;
        let clock = ManualClock::default();
        let engine = AlertEngine::with_clock(EngineConfig::default(), registry, Arc::new(clock.clone()));
        (engine, clock)
    }

    fn rule(id: &str) -> RoutingRule {
        RoutingRule::new(id, AlertCategory::Security, AlertPriority::High, vec!["telegram".to_string()])
    }

    #[tokio::test]
    async fn test_validation_rejects_before_state_changes() {
        let (engine, _) = engine().await;
        engine.load_rules(vec![rule("sec")]).await.unwrap();

        let result = engine
            .submit(Alert::security(AlertPriority::High, "Scan", "x").with_id(""))
            .await;
        assert!(matches!(result, Err(Error::Validation(_))));

        let stats = engine.get_stats().await;
        assert_eq!(stats.total_alerts_processed, 0);
        assert_eq!(stats.dedup_cache_size, 0);
    }

    #[tokio::test]
    async fn test_load_rules_rejects_duplicates_atomically() {
        let (engine, _) = engine().await;
        engine.load_rules(vec![rule("a")]).await.unwrap();

        let result = engine.load_rules(vec![rule("b"), rule("b")]).await;
        assert!(matches!(result, Err(Error::InvalidConfiguration(_))));
        assert_eq!(engine.rules().await[0].id, "a");
    }

    #[tokio::test]
    async fn test_set_and_remove_rule() {
        let (engine, _) = engine().await;
        engine.set_rule(rule("a")).await.unwrap();
        engine.set_rule(rule("a").with_name("renamed")).await.unwrap();
        engine.set_rule(rule("b")).await.unwrap();

        let rules = engine.rules().await;
        assert_eq!(rules.len(), 2);
        assert_eq!(rules[0].name, "renamed");

        assert_eq!(engine.remove_rule("a").await.unwrap().id, "a");
        assert!(matches!(engine.remove_rule("a").await, Err(Error::NotFound(_))));
        assert_eq!(engine.get_stats().await.active_rules, 1);
    }

    #[tokio::test]
    async fn test_unrouted_alert() {
        let (engine, _) = engine().await;
        engine.load_rules(vec![rule("sec")]).await.unwrap();

        let outcome = engine
            .process(Alert::trading(AlertPriority::Emergency, "Halt", "Exchange halted"))
            .await
            .unwrap();
        assert_eq!(outcome, ProcessOutcome::Unrouted);
        assert_eq!(engine.get_stats().await.unrouted, 1);
    }

    #[tokio::test]
    async fn test_rate_limited_rule_is_skipped_but_others_deliver() {
        let (engine, _) = engine().await;
        engine
            .load_rules(vec![
                rule("limited").with_rate_limit(RateLimitPolicy::per_minute(1)),
                RoutingRule::new("open", AlertCategory::Security, AlertPriority::Low, vec!["sms".to_string()]),
            ])
            .await
            .unwrap();

        engine
            .submit(Alert::security(AlertPriority::High, "Scan", "first").with_field("n", 1))
            .await
            .unwrap();
        let outcome = engine
            .process(Alert::security(AlertPriority::High, "Scan", "second").with_field("n", 2))
            .await
            .unwrap();

        match outcome {
            ProcessOutcome::Dispatched { deliveries, rate_limited, .. } => {
                assert_eq!(rate_limited, vec!["limited".to_string()]);
                assert_eq!(deliveries.len(), 1);
                assert_eq!(deliveries[0].channel, "sms");
            }
            other => panic!("unexpected outcome: {:?}", other),
        }
    }

    #[tokio::test]
    async fn test_first_escalation_rule_wins() {
        let (engine, _) = engine().await;
        engine
            .load_rules(vec![
                rule("first").with_escalation(EscalationPolicy::new(5, 1, vec!["sms".to_string()])),
                rule("second").with_escalation(EscalationPolicy::new(1, 9, vec!["telegram".to_string()])),
            ])
            .await
            .unwrap();

        let alert = Alert::security(AlertPriority::Critical, "Breach", "Root login");
        let id = alert.id.clone();
        engine.submit(alert).await.unwrap();

        let entry = engine.escalation(&id).await.unwrap();
        assert_eq!(entry.rule_id, "first");
        assert_eq!(entry.policy.delay_minutes, 5);
    }

    #[tokio::test]
    async fn test_resolve_escalation() {
        let (engine, _) = engine().await;
        engine
            .load_rules(vec![rule("sec").with_escalation(EscalationPolicy::new(5, 2, vec!["sms".to_string()]))])
            .await
            .unwrap();

        let alert = Alert::security(AlertPriority::Emergency, "Breach", "Root login");
        let id = alert.id.clone();
        engine.submit(alert).await.unwrap();

        engine.resolve_escalation(&id).await.unwrap();
        assert_eq!(engine.get_stats().await.pending_escalations, 0);
        assert!(engine.resolve_escalation("unknown").await.is_err());
        assert_eq!(engine.cleanup().await.escalations_removed, 1);
    }

    #[tokio::test]
    async fn test_start_and_shutdown() {
        let (engine, _) = engine().await;
        let engine = Arc::new(engine);

        engine.start().await;
        engine.start().await;
        assert!(engine.is_running());
        assert_eq!(engine.tasks.lock().await.len(), 2);

        engine.shutdown().await;
        assert!(!engine.is_running());
        assert!(engine.tasks.lock().await.is_empty());
    }
}
