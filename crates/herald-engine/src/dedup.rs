//! Content-hash deduplication.
//!
//! Alerts are fingerprinted over `(category, title, source, data)` with any
//! `timestamp` key removed from `data`; `id` and the alert timestamp never
//! take part. Repeats inside the suppression window are dropped; the first
//! sighting after the window re-arms a fresh window.

use std::collections::HashMap;

use chrono::{DateTime, Duration, Utc};
use serde::Serialize;
use sha2::{Digest, Sha256};
use tokio::sync::RwLock;

use super::alert::Alert;

/// Suppression state for one fingerprint.
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct DeduplicationRecord {
    pub hash: String,
    pub first_seen: DateTime<Utc>,
    pub last_seen: DateTime<Utc>,
    /// Occurrences seen in the current window
    pub count: u32,
    /// Whether the most recent occurrence was dropped
    pub suppressed: bool,
}

/// Stable content fingerprint of an alert.
pub fn fingerprint(alert: &Alert) -> String {
    let mut data = alert.data.clone();
    data.remove("timestamp");

    let mut hasher = Sha256::new();
    hasher.update(alert.category.as_str().as_bytes());
    hasher.update([0u8]);
    hasher.update(alert.title.as_bytes());
    hasher.update([0u8]);
    hasher.update(alert.source.as_bytes());
    hasher.update([0u8]);
    // serde_json::Map is key-ordered, so serialization is stable
    hasher.update(serde_json::Value::Object(data).to_string().as_bytes());
    hex::encode(hasher.finalize())
}

/// Deduplication cache keyed by fingerprint.
pub struct DeduplicationCache {
    records: RwLock<HashMap<String, DeduplicationRecord>>,
    window: Duration,
}

impl DeduplicationCache {
    pub fn new(window: Duration) -> Self {
        Self {
            records: RwLock::new(HashMap::new()),
            window,
        }
    }

    /// Suppression window length.
    pub fn window(&self) -> Duration {
        self.window
    }

    /// Record a sighting of `alert` at `now` and report whether it is a duplicate.
    pub async fn is_duplicate(&self, alert: &Alert, now: DateTime<Utc>) -> bool {
        self.check(alert, now).await.is_some()
    }

    /// Record a sighting of `alert` at `now`.
    ///
    /// Returns the record count as of this sighting when it is suppressed,
    /// `None` when the alert should be processed.
    pub async fn check(&self, alert: &Alert, now: DateTime<Utc>) -> Option<u32> {
        let hash = fingerprint(alert);
        let mut records = self.records.write().await;

        match records.get_mut(&hash) {
            None => {
                records.insert(
                    hash.clone(),
                    DeduplicationRecord {
                        hash,
                        first_seen: now,
                        last_seen: now,
                        count: 1,
                        suppressed: false,
                    },
                );
                None
            }
            Some(record) if now - record.first_seen < self.window => {
                record.count += 1;
                record.suppressed = true;
                record.last_seen = now;
                Some(record.count)
            }
            Some(record) => {
                record.first_seen = now;
                record.last_seen = now;
                record.count = 1;
                record.suppressed = false;
                None
            }
        }
    }

    /// Current record for the alert's fingerprint.
    pub async fn get(&self, alert: &Alert) -> Option<DeduplicationRecord> {
        self.records.read().await.get(&fingerprint(alert)).cloned()
    }

    /// Drop records not seen for longer than `retention`. Returns the number removed.
    pub async fn cleanup(&self, now: DateTime<Utc>, retention: Duration) -> usize {
        let mut records = self.records.write().await;
        let before = records.len();
        records.retain(|_, record| now - record.last_seen <= retention);
        before - records.len()
    }

    pub async fn len(&self) -> usize {
        self.records.read().await.len()
    }

    pub async fn is_empty(&self) -> bool {
        self.records.read().await.is_empty()
    }
}

impl Default for DeduplicationCache {
    fn default() -> Self {
        Self::new(Duration::minutes(5))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::AlertPriority;

    fn alert() -> Alert {
        Alert::system(AlertPriority::High, "CPU high", "CPU at 97%")
            .with_source("metrics")
            .with_field("host", "node-1")
    }

    #[test]
    fn test_fingerprint_ignores_id_and_timestamps() {
        let a = alert().with_field("timestamp", "2024-01-01T00:00:00Z");
        let b = alert()
            .with_id("other")
            .with_timestamp(Utc::now() - Duration::hours(3))
            .with_field("timestamp", "2024-06-01T00:00:00Z");
        assert_eq!(fingerprint(&a), fingerprint(&b));
    }

    #[test]
    fn test_fingerprint_sees_content() {
        let a = alert();
        let b = alert().with_field("host", "node-2");
        let c = alert().with_source("agent");
        assert_ne!(fingerprint(&a), fingerprint(&b));
        assert_ne!(fingerprint(&a), fingerprint(&c));
    }

    #[tokio::test]
    async fn test_duplicate_within_window() {
        let cache = DeduplicationCache::default();
        let now = Utc::now();

        assert!(!cache.is_duplicate(&alert(), now).await);
        assert!(cache.is_duplicate(&alert(), now + Duration::minutes(2)).await);

        let record = cache.get(&alert()).await.unwrap();
        assert_eq!(record.count, 2);
        assert!(record.suppressed);
        assert_eq!(record.last_seen, now + Duration::minutes(2));
    }

    #[tokio::test]
    async fn test_check_reports_count_of_each_sighting() {
        let cache = DeduplicationCache::default();
        let now = Utc::now();

        assert_eq!(cache.check(&alert(), now).await, None);
        assert_eq!(cache.check(&alert(), now + Duration::seconds(10)).await, Some(2));
        assert_eq!(cache.check(&alert(), now + Duration::seconds(20)).await, Some(3));
        assert_eq!(cache.check(&alert(), now + Duration::minutes(5)).await, None);
    }

    #[tokio::test]
    async fn test_window_rearms() {
        let cache = DeduplicationCache::default();
        let now = Utc::now();

        assert!(!cache.is_duplicate(&alert(), now).await);
        let later = now + Duration::minutes(6);
        assert!(!cache.is_duplicate(&alert(), later).await);

        let record = cache.get(&alert()).await.unwrap();
        assert_eq!(record.count, 1);
        assert_eq!(record.first_seen, later);
        assert!(!record.suppressed);

        assert!(cache.is_duplicate(&alert(), later + Duration::minutes(1)).await);
    }

    #[tokio::test]
    async fn test_cleanup_evicts_inactive() {
        let cache = DeduplicationCache::default();
        let now = Utc::now();
        cache.is_duplicate(&alert(), now).await;
        cache.is_duplicate(&alert().with_field("host", "node-9"), now + Duration::hours(20)).await;

        assert_eq!(cache.cleanup(now + Duration::hours(23), Duration::hours(24)).await, 0);
        assert_eq!(cache.len().await, 2);

        assert_eq!(cache.cleanup(now + Duration::hours(25), Duration::hours(24)).await, 1);
        assert_eq!(cache.len().await, 1);
        assert!(cache.get(&alert()).await.is_none());
    }
}
