//! In-memory channel for tests and dry runs.

use async_trait::async_trait;
use std::sync::Arc;
use tokio::sync::Mutex;

use super::AlertChannel;
use super::super::{Alert, Error, Result};

/// Channel that records every delivered alert.
#[derive(Debug, Clone)]
pub struct MemoryChannel {
    name: String,
    enabled: bool,
    alerts: Arc<Mutex<Vec<Alert>>>,
}

impl MemoryChannel {
    pub fn new(name: String) -> Self {
        Self {
            name,
            enabled: true,
            alerts: Arc::new(Mutex::new(Vec::new())),
        }
    }

    pub fn disabled(name: String) -> Self {
        Self {
            enabled: false,
            ..Self::new(name)
        }
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    pub async fn get_alerts(&self) -> Vec<Alert> {
        self.alerts.lock().await.clone()
    }

    pub async fn clear(&self) {
        self.alerts.lock().await.clear();
    }

    pub async fn count(&self) -> usize {
        self.alerts.lock().await.len()
    }
}

#[async_trait]
impl AlertChannel for MemoryChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &str {
        "memory"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, alert: &Alert) -> Result<Option<String>> {
        if !self.enabled {
            return Err(Error::ChannelDisabled(self.name.clone()));
        }
        let mut alerts = self.alerts.lock().await;
        alerts.push(alert.clone());
        Ok(Some(format!("{}-{}", self.name, alerts.len())))
    }

    fn get_config(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "storage": "memory",
        }))
    }
}

/// Factory for creating memory channels.
pub struct MemoryChannelFactory;

impl super::ChannelFactory for MemoryChannelFactory {
    fn channel_type(&self) -> &str {
        "memory"
    }

    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn AlertChannel>> {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("memory")
            .to_string();

        let enabled = config
            .get("enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let channel = if enabled {
            MemoryChannel::new(name)
        } else {
            MemoryChannel::disabled(name)
        };

        Ok(Arc::new(channel))
    }
}
