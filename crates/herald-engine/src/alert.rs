//! Alert types.

use std::collections::BTreeSet;

use chrono::{DateTime, Utc};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use super::error::{Error, Result};
use super::{AlertCategory, AlertPriority};

fn generate_id() -> String {
    Uuid::new_v4().to_string()
}

/// One unit of notifiable information submitted to the engine.
///
/// `category` and `priority` are fixed at construction; `data` is shared
/// read-only with channel renderers once submitted.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Alert {
    /// Unique alert identifier, generated when not supplied
    #[serde(default = "generate_id")]
    pub id: String,
    /// Alert category
    pub category: AlertCategory,
    /// Alert priority
    pub priority: AlertPriority,
    /// Alert title
    pub title: String,
    /// Alert body
    #[serde(default)]
    pub message: String,
    /// Structured payload used by rule conditions and renderers
    #[serde(default)]
    pub data: Map<String, Value>,
    /// When the alert was raised
    #[serde(default = "Utc::now")]
    pub timestamp: DateTime<Utc>,
    /// Originating component
    #[serde(default)]
    pub source: String,
    /// Free-form labels
    #[serde(default)]
    pub tags: BTreeSet<String>,
}

impl Alert {
    /// Create a new alert with a generated id.
    pub fn new(
        category: AlertCategory,
        priority: AlertPriority,
        title: impl Into<String>,
        message: impl Into<String>,
        source: impl Into<String>,
    ) -> Self {
        Self {
            id: generate_id(),
            category,
            priority,
            title: title.into(),
            message: message.into(),
            data: Map::new(),
            timestamp: Utc::now(),
            source: source.into(),
            tags: BTreeSet::new(),
        }
    }

    /// Create a trading alert.
    pub fn trading(priority: AlertPriority, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AlertCategory::Trading, priority, title, message, "trading")
    }

    /// Create a security alert.
    pub fn security(priority: AlertPriority, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AlertCategory::Security, priority, title, message, "security")
    }

    /// Create a system alert.
    pub fn system(priority: AlertPriority, title: impl Into<String>, message: impl Into<String>) -> Self {
        Self::new(AlertCategory::System, priority, title, message, "system")
    }

    /// Parse an alert from a JSON document.
    ///
    /// Missing or unknown `category`/`priority` values are validation errors.
    pub fn from_value(value: Value) -> Result<Self> {
        let alert: Alert = serde_json::from_value(value)
            .map_err(|e| Error::Validation(format!("Malformed alert: {}", e)))?;
        alert.validate()?;
        Ok(alert)
    }

    /// Set the alert id.
    pub fn with_id(mut self, id: impl Into<String>) -> Self {
        self.id = id.into();
        self
    }

    /// Set the data payload.
    pub fn with_data(mut self, data: Map<String, Value>) -> Self {
        self.data = data;
        self
    }

    /// Insert a single data field.
    pub fn with_field(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.data.insert(key.into(), value.into());
        self
    }

    /// Set the timestamp.
    pub fn with_timestamp(mut self, timestamp: DateTime<Utc>) -> Self {
        self.timestamp = timestamp;
        self
    }

    /// Set the source.
    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    /// Add a tag.
    pub fn with_tag(mut self, tag: impl Into<String>) -> Self {
        self.tags.insert(tag.into());
        self
    }

    /// Reject alerts that cannot be routed.
    pub fn validate(&self) -> Result<()> {
        if self.id.trim().is_empty() {
            return Err(Error::Validation("Alert id must not be empty".to_string()));
        }
        Ok(())
    }

    /// Resolve a dot-separated field path against the alert.
    ///
    /// Top-level names address alert fields (`title`, `priority`, ...);
    /// `data.a.b` walks into the payload. Unknown roots fall back to a
    /// lookup in `data`, so `threatLevel` and `data.threatLevel` agree.
    pub fn field_value(&self, path: &str) -> Option<Value> {
        let mut segments = path.split('.');
        let root = segments.next()?;
        let rest: Vec<&str> = segments.collect();

        let base = match root {
            "id" => Value::String(self.id.clone()),
            "category" => Value::String(self.category.as_str().to_string()),
            "priority" => Value::String(self.priority.as_str().to_string()),
            "title" => Value::String(self.title.clone()),
            "message" => Value::String(self.message.clone()),
            "source" => Value::String(self.source.clone()),
            "timestamp" => Value::String(self.timestamp.to_rfc3339()),
            "tags" => Value::Array(self.tags.iter().cloned().map(Value::String).collect()),
            "data" => return walk(&self.data, &rest),
            _ => {
                let mut full = Vec::with_capacity(rest.len() + 1);
                full.push(root);
                full.extend(rest);
                return walk(&self.data, &full);
            }
        };

        if rest.is_empty() {
            Some(base)
        } else {
            None
        }
    }

    /// Get a summary of the alert.
    pub fn summary(&self) -> String {
        format!(
            "[{}/{}] {} - {} (source: {})",
            self.category, self.priority, self.title, self.message, self.source
        )
    }
}

fn walk(data: &Map<String, Value>, path: &[&str]) -> Option<Value> {
    let (first, rest) = match path.split_first() {
        Some(split) => split,
        None => return Some(Value::Object(data.clone())),
    };
    let mut current = data.get(*first)?;
    for segment in rest {
        current = match current {
            Value::Object(map) => map.get(*segment)?,
            Value::Array(items) => items.get(segment.parse::<usize>().ok()?)?,
            _ => return None,
        };
    }
    Some(current.clone())
}

/// Render a JSON value as plain text: strings unquoted, everything else as JSON.
pub fn value_to_text(value: &Value) -> String {
    match value {
        Value::String(s) => s.clone(),
        other => other.to_string(),
    }
}
