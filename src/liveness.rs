/// Per-host liveness tracking with exponential back-off
///
/// A failing host gets an `offline:<host>` entry whose data is the number
/// of consecutive failures; the host stays off-limits until
/// `500ms × 1.5^min(failCount, 15)` has elapsed, after which the next
/// request probes it again. A separate `online:<host>` key with a short
/// freshness window serves the explicit domain-status query only and never
/// gates ordinary requests.
use crate::store::KvStore;
use chrono::Duration;
use serde_json::json;
use std::sync::Arc;
use tracing::warn;

const BACKOFF_BASE_MS: f64 = 500.0;
const BACKOFF_FACTOR: f64 = 1.5;
const BACKOFF_MAX_EXPONENT: u32 = 15;

/// Freshness window for the positive-probe key
const PROBE_TTL_SECS: i64 = 5;

/// Back-off window for a host that has failed `fail_count` times in a row
pub fn backoff_threshold(fail_count: u32) -> Duration {
    let exponent = fail_count.min(BACKOFF_MAX_EXPONENT);
    let millis = BACKOFF_BASE_MS * BACKOFF_FACTOR.powi(exponent as i32);
    Duration::milliseconds(millis as i64)
}

/// Tracks which hosts are currently worth talking to
#[derive(Clone)]
pub struct LivenessTracker {
    store: Arc<dyn KvStore>,
}

impl LivenessTracker {
    pub fn new(store: Arc<dyn KvStore>) -> Self {
        Self { store }
    }

    fn offline_key(host: &str) -> String {
        format!("offline:{}", host)
    }

    fn online_key(host: &str) -> String {
        format!("online:{}", host)
    }

    /// Whether requests to `host` should be attempted right now
    ///
    /// A host is online unless a back-off entry exists whose window has not
    /// yet elapsed. Store failures never take a host offline.
    pub async fn is_online(&self, host: &str) -> bool {
        let entry = match self.store.get(&Self::offline_key(host)).await {
            Ok(entry) => entry,
            Err(e) => {
                warn!("liveness lookup for {} failed: {}", host, e);
                return true;
            }
        };

        let Some(entry) = entry else {
            return true;
        };
        let fail_count = entry
            .data
            .as_ref()
            .and_then(|v| v.as_u64())
            .unwrap_or(0) as u32;

        entry.age() >= backoff_threshold(fail_count)
    }

    /// Clear the back-off state after a successful request
    pub async fn mark_online(&self, host: &str) {
        if let Err(e) = self.store.invalidate(&Self::offline_key(host)).await {
            warn!("failed to clear offline state for {}: {}", host, e);
        }
    }

    /// Record a failed request, extending the back-off window
    pub async fn mark_offline(&self, host: &str) {
        let key = Self::offline_key(host);
        let previous = match self.store.get(&key).await {
            Ok(Some(entry)) => entry.data.as_ref().and_then(|v| v.as_u64()).unwrap_or(0),
            Ok(None) => 0,
            Err(e) => {
                warn!("liveness lookup for {} failed: {}", host, e);
                0
            }
        };

        if let Err(e) = self.store.set(&key, Some(json!(previous + 1))).await {
            warn!("failed to record offline state for {}: {}", host, e);
        }
    }

    /// Result of a recent explicit status probe, if still fresh
    pub async fn fresh_probe(&self, host: &str) -> Option<bool> {
        let entry = self.store.get(&Self::online_key(host)).await.ok()??;
        if entry.age() < Duration::seconds(PROBE_TTL_SECS) {
            entry.data.as_ref().and_then(|v| v.as_bool())
        } else {
            None
        }
    }

    /// Record the outcome of an explicit status probe
    ///
    /// Independent of the back-off key: a good probe does not reset the
    /// failure count.
    pub async fn record_probe(&self, host: &str, online: bool) {
        if let Err(e) = self.store.set(&Self::online_key(host), Some(json!(online))).await {
            warn!("failed to record probe for {}: {}", host, e);
        }
    }
}
