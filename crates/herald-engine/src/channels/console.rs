//! Console channel.

use async_trait::async_trait;
use std::sync::Arc;

use super::AlertChannel;
use super::super::{Alert, Error, Result};

/// Console channel for printing alerts to stdout.
#[derive(Debug, Clone)]
pub struct ConsoleChannel {
    name: String,
    enabled: bool,
    include_details: bool,
}

impl ConsoleChannel {
    pub fn new(name: String) -> Self {
        Self {
            name,
            enabled: true,
            include_details: true,
        }
    }

    pub fn with_details(mut self, include: bool) -> Self {
        self.include_details = include;
        self
    }

    pub fn enable(&mut self) {
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    fn render(&self, alert: &Alert) -> String {
        let mut lines = vec![
            format!("=== {} / {} ===", alert.priority, alert.category),
            format!("time:    {}", alert.timestamp.format("%Y-%m-%d %H:%M:%S")),
            format!("title:   {}", alert.title),
            format!("message: {}", alert.message),
            format!("source:  {}", alert.source),
        ];
        if self.include_details {
            if !alert.tags.is_empty() {
                let tags: Vec<&str> = alert.tags.iter().map(String::as_str).collect();
                lines.push(format!("tags:    {}", tags.join(", ")));
            }
            if !alert.data.is_empty() {
                lines.push(format!("data:    {}", serde_json::Value::Object(alert.data.clone())));
            }
        }
        lines.push("================".to_string());
        lines.join("\n")
    }
}

#[async_trait]
impl AlertChannel for ConsoleChannel {
    fn name(&self) -> &str {
        &self.name
    }

    fn channel_type(&self) -> &str {
        "console"
    }

    fn is_enabled(&self) -> bool {
        self.enabled
    }

    async fn send(&self, alert: &Alert) -> Result<Option<String>> {
        if !self.enabled {
            return Err(Error::ChannelDisabled(self.name.clone()));
        }
        println!("{}", self.render(alert));
        Ok(None)
    }

    fn get_config(&self) -> Option<serde_json::Value> {
        Some(serde_json::json!({
            "include_details": self.include_details,
        }))
    }
}

/// Factory for creating console channels.
pub struct ConsoleChannelFactory;

impl super::ChannelFactory for ConsoleChannelFactory {
    fn channel_type(&self) -> &str {
        "console"
    }

    fn create(&self, config: &serde_json::Value) -> Result<Arc<dyn AlertChannel>> {
        let name = config
            .get("name")
            .and_then(|v| v.as_str())
            .unwrap_or("console")
            .to_string();

        let include_details = config
            .get("include_details")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let enabled = config
            .get("enabled")
            .and_then(|v| v.as_bool())
            .unwrap_or(true);

        let mut channel = ConsoleChannel::new(name).with_details(include_details);
        if !enabled {
            channel.disable();
        }

        Ok(Arc::new(channel))
    }
}
