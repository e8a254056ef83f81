//! Fan-out delivery to channels.
//!
//! Each channel is attempted once per alert, concurrently, and every outcome
//! is collected. A failing channel never prevents its siblings from running.

use std::collections::{HashSet, VecDeque};
use std::sync::Arc;

use chrono::{DateTime, Utc};
use futures::future::join_all;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::channels::ChannelRegistry;
use super::error::Error;
use super::rule::RoutingRule;
use super::Alert;

/// Outcome of one (alert, channel) delivery attempt.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DeliveryResult {
    pub alert_id: String,
    pub channel: String,
    pub success: bool,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub message_id: Option<String>,
    #[serde(skip_serializing_if = "Option::is_none")]
    pub error: Option<String>,
    pub timestamp: DateTime<Utc>,
    pub retry_count: u32,
}

/// Distinct channels named by `rules`, in first-seen order.
pub fn collect_channels(rules: &[&RoutingRule]) -> Vec<String> {
    let mut seen = HashSet::new();
    rules
        .iter()
        .flat_map(|rule| rule.channels.iter())
        .filter(|name| seen.insert(name.as_str()))
        .cloned()
        .collect()
}

/// Sends alerts to channels and keeps a bounded outcome history.
pub struct Dispatcher {
    channels: Arc<ChannelRegistry>,
    history: RwLock<VecDeque<DeliveryResult>>,
    max_history: usize,
}

impl Dispatcher {
    pub fn new(channels: Arc<ChannelRegistry>, max_history: usize) -> Self {
        Self {
            channels,
            history: RwLock::new(VecDeque::with_capacity(max_history.min(1024))),
            max_history,
        }
    }

    /// The channel registry used for delivery.
    pub fn channels(&self) -> Arc<ChannelRegistry> {
        self.channels.clone()
    }

    /// Deliver `alert` to each named channel, once per distinct name.
    pub async fn deliver(&self, alert: &Alert, channel_names: &[String], now: DateTime<Utc>) -> Vec<DeliveryResult> {
        let mut seen = HashSet::new();
        let targets: Vec<&String> = channel_names.iter().filter(|n| seen.insert(n.as_str())).collect();

        let attempts = targets.into_iter().map(|name| self.deliver_one(alert, name, now));
        let results = join_all(attempts).await;

        self.record(&results).await;
        results
    }

    async fn deliver_one(&self, alert: &Alert, name: &str, now: DateTime<Utc>) -> DeliveryResult {
        let outcome = match self.channels.get(name).await {
            None => Err(Error::NotFound(format!("Channel not registered: {}", name))),
            Some(channel) if !channel.is_enabled() => Err(Error::ChannelDisabled(name.to_string())),
            Some(channel) => channel.send(alert).await,
        };

        match outcome {
            Ok(message_id) => {
                tracing::debug!(alert_id = %alert.id, channel = %name, "Alert delivered");
                DeliveryResult {
                    alert_id: alert.id.clone(),
                    channel: name.to_string(),
                    success: true,
                    message_id,
                    error: None,
                    timestamp: now,
                    retry_count: 0,
                }
            }
            Err(e) => {
                tracing::warn!(alert_id = %alert.id, channel = %name, "Failed to deliver alert: {}", e);
                DeliveryResult {
                    alert_id: alert.id.clone(),
                    channel: name.to_string(),
                    success: false,
                    message_id: None,
                    error: Some(e.to_string()),
                    timestamp: now,
                    retry_count: 0,
                }
            }
        }
    }

    async fn record(&self, results: &[DeliveryResult]) {
        if self.max_history == 0 {
            return;
        }
        let mut history = self.history.write().await;
        for result in results {
            if history.len() == self.max_history {
                history.pop_front();
            }
            history.push_back(result.clone());
        }
    }

    /// Most recent `limit` results, newest last.
    pub async fn recent(&self, limit: usize) -> Vec<DeliveryResult> {
        let history = self.history.read().await;
        let skip = history.len().saturating_sub(limit);
        history.iter().skip(skip).cloned().collect()
    }

    /// `(successful, failed)` counts over the retained history.
    pub async fn outcome_counts(&self) -> (usize, usize) {
        let history = self.history.read().await;
        let ok = history.iter().filter(|r| r.success).count();
        (ok, history.len() - ok)
    }

    pub async fn history_len(&self) -> usize {
        self.history.read().await.len()
    }
}
