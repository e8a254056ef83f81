//! Delivery channels.
//!
//! The engine never renders or transports content itself; each channel
//! receives the alert and owns rendering, transport and any retry policy.

pub mod console;
pub mod memory;

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use serde::{Deserialize, Serialize};
use tokio::sync::RwLock;

use super::{Alert, Error, Result};

pub use console::{ConsoleChannel, ConsoleChannelFactory};
pub use memory::{MemoryChannel, MemoryChannelFactory};

/// Trait for delivery channels.
#[async_trait]
pub trait AlertChannel: Send + Sync {
    /// Get the channel name (the identifier rules refer to).
    fn name(&self) -> &str;

    /// Get the channel type.
    fn channel_type(&self) -> &str;

    /// Check if the channel is enabled.
    fn is_enabled(&self) -> bool;

    /// Deliver an alert. Returns the transport's message id when it has one.
    async fn send(&self, alert: &Alert) -> Result<Option<String>>;

    /// Get the channel configuration as JSON.
    fn get_config(&self) -> Option<serde_json::Value> {
        None
    }
}

/// Factory trait for creating channels from configuration.
pub trait ChannelFactory: Send + Sync {
    /// Get the channel type this factory creates.
    fn channel_type(&self) -> &str;

    /// Create a channel from configuration.
    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn AlertChannel>>;
}

/// Built-in factories, keyed by channel type.
pub fn builtin_factories() -> Vec<Box<dyn ChannelFactory>> {
    vec![Box::new(ConsoleChannelFactory), Box::new(MemoryChannelFactory)]
}

/// Create a channel from a `{ "type": ..., "name": ..., ... }` declaration.
pub fn create_channel(config: &serde_json::Value) -> Result<Arc<dyn AlertChannel>> {
    let channel_type = config
        .get("type")
        .and_then(|v| v.as_str())
        .ok_or_else(|| Error::InvalidConfiguration("Channel declaration is missing 'type'".to_string()))?;

    builtin_factories()
        .into_iter()
        .find(|f| f.channel_type() == channel_type)
        .ok_or_else(|| Error::InvalidConfiguration(format!("Unknown channel type: {}", channel_type)))?
        .create(config)
}

/// Channel registry keyed by channel name.
pub struct ChannelRegistry {
    channels: RwLock<HashMap<String, Arc<dyn AlertChannel>>>,
    configs: RwLock<HashMap<String, serde_json::Value>>,
}

impl ChannelRegistry {
    pub fn new() -> Self {
        Self {
            channels: RwLock::new(HashMap::new()),
            configs: RwLock::new(HashMap::new()),
        }
    }

    /// Register a channel instance under its own name.
    pub async fn register(&self, channel: Arc<dyn AlertChannel>) {
        let name = channel.name().to_string();
        self.channels.write().await.insert(name, channel);
    }

    /// Register a channel with the configuration it was built from.
    pub async fn register_with_config(&self, channel: Arc<dyn AlertChannel>, config: serde_json::Value) {
        let name = channel.name().to_string();
        let mut channels = self.channels.write().await;
        let mut configs = self.configs.write().await;
        channels.insert(name.clone(), channel);
        configs.insert(name, config);
    }

    /// Unregister a channel by name.
    pub async fn unregister(&self, name: &str) -> bool {
        let mut channels = self.channels.write().await;
        let mut configs = self.configs.write().await;
        configs.remove(name);
        channels.remove(name).is_some()
    }

    /// Get a channel by name.
    pub async fn get(&self, name: &str) -> Option<Arc<dyn AlertChannel>> {
        self.channels.read().await.get(name).cloned()
    }

    /// List all channel names.
    pub async fn list_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.channels.read().await.keys().cloned().collect();
        names.sort();
        names
    }

    /// Get the number of channels.
    pub async fn len(&self) -> usize {
        self.channels.read().await.len()
    }

    /// Check if empty.
    pub async fn is_empty(&self) -> bool {
        self.channels.read().await.is_empty()
    }

    /// Get detailed information about a channel.
    pub async fn get_info(&self, name: &str) -> Option<ChannelInfo> {
        let channels = self.channels.read().await;
        let configs = self.configs.read().await;
        channels.get(name).map(|channel| ChannelInfo {
            name: name.to_string(),
            channel_type: channel.channel_type().to_string(),
            enabled: channel.is_enabled(),
            config: configs.get(name).cloned().or_else(|| channel.get_config()),
        })
    }

    /// List all channels with info.
    pub async fn list_info(&self) -> Vec<ChannelInfo> {
        let mut infos = Vec::new();
        for name in self.list_names().await {
            if let Some(info) = self.get_info(&name).await {
                infos.push(info);
            }
        }
        infos
    }

    /// Get channel statistics.
    pub async fn get_stats(&self) -> ChannelStats {
        let channels = self.channels.read().await;
        let mut by_type = HashMap::new();
        let mut enabled = 0;

        for channel in channels.values() {
            *by_type.entry(channel.channel_type().to_string()).or_insert(0) += 1;
            if channel.is_enabled() {
                enabled += 1;
            }
        }

        ChannelStats {
            total: channels.len(),
            enabled,
            disabled: channels.len() - enabled,
            by_type,
        }
    }
}

impl Default for ChannelRegistry {
    fn default() -> Self {
        Self::new()
    }
}

/// Information about a registered channel.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelInfo {
    /// Channel name (unique identifier)
    pub name: String,
    /// Channel type (console, memory, ...)
    pub channel_type: String,
    /// Whether the channel is enabled
    pub enabled: bool,
    /// Channel configuration (optional)
    #[serde(skip_serializing_if = "Option::is_none")]
    pub config: Option<serde_json::Value>,
}

/// Channel statistics.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ChannelStats {
    pub total: usize,
    pub enabled: usize,
    pub disabled: usize,
    /// Channels grouped by type
    pub by_type: HashMap<String, usize>,
}
