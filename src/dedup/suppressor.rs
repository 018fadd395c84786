//! Time-windowed duplicate suppression keyed by request fingerprint.

use std::fmt::Debug;
use std::sync::Arc;
use std::time::Duration;

use arc_swap::ArcSwap;
use dashmap::mapref::entry::Entry;
use dashmap::DashMap;
use serde::Serialize;
use serde_json::{Map, Value};
use tokio::time::Instant;

use crate::dedup::normalize::Normalizer;
use crate::observability::metrics;

/// Concurrent fingerprint table with a fixed cooldown window.
///
/// The table is sharded (`DashMap`), so unrelated fingerprints never contend
/// on a single lock. The check-and-upsert for one fingerprint happens under
/// that fingerprint's shard lock.
#[derive(Debug)]
pub struct DuplicateSuppressor {
    entries: DashMap<String, Instant>,
    normalizer: ArcSwap<Normalizer>,
    cooldown: Duration,
}

impl DuplicateSuppressor {
    pub fn new(cooldown: Duration, normalizer: Normalizer) -> Self {
        Self {
            entries: DashMap::new(),
            normalizer: ArcSwap::from_pointee(normalizer),
            cooldown,
        }
    }

    /// Decide whether `payload` sent to `target` repeats a recent request.
    ///
    /// Returns `false` (proceed) and records the acceptance when the
    /// fingerprint is unknown or its window has expired. Returns `true`
    /// (suppress) without touching the table otherwise.
    pub fn should_suppress<P>(&self, target: &str, payload: &P) -> bool
    where
        P: Serialize + Debug + ?Sized,
    {
        let key = self.fingerprint(target, payload);
        let now = Instant::now();

        let suppressed = match self.entries.entry(key.clone()) {
            Entry::Occupied(mut entry) => {
                let age = now.saturating_duration_since(*entry.get());
                if age < self.cooldown {
                    tracing::info!(
                        fingerprint = %key,
                        age_ms = age.as_millis() as u64,
                        cooldown_ms = self.cooldown.as_millis() as u64,
                        "Duplicate request within cooldown, suppressing"
                    );
                    true
                } else {
                    entry.insert(now);
                    false
                }
            }
            Entry::Vacant(entry) => {
                entry.insert(now);
                false
            }
        };

        if suppressed {
            metrics::record_suppressed();
        } else {
            tracing::debug!(fingerprint = %key, entries = self.entries.len(), "Request accepted");
            self.sweep();
        }
        suppressed
    }

    /// Compute the dedup key for a request.
    ///
    /// Normally the lowercase hex md5 of `target:normalized_payload`. If the
    /// payload cannot be serialized, a raw `target:{payload:?}` key is used.
    pub fn fingerprint<P>(&self, target: &str, payload: &P) -> String
    where
        P: Serialize + Debug + ?Sized,
    {
        match canonical_json(payload) {
            Ok(canonical) => {
                let normalized = self.normalizer.load().normalize(&canonical);
                let combined = format!("{target}:{normalized}");
                format!("{:x}", md5::compute(combined.as_bytes()))
            }
            Err(e) => {
                let fallback = format!("{target}:{payload:?}");
                tracing::warn!(error = %e, key = %fallback, "Fingerprinting failed, using raw key");
                fallback
            }
        }
    }

    /// Drop entries older than the cooldown window.
    pub fn sweep(&self) {
        let now = Instant::now();
        let before = self.entries.len();
        self.entries
            .retain(|_, accepted| now.saturating_duration_since(*accepted) < self.cooldown);
        let after = self.entries.len();
        if before != after {
            tracing::debug!(before, after, "Swept expired dedup entries");
        }
        metrics::record_dedup_entries(after);
    }

    /// Replace the normalization rules (hot reload).
    pub fn set_normalizer(&self, normalizer: Normalizer) {
        tracing::info!(rules = normalizer.len(), "Dedup normalization rules updated");
        self.normalizer.store(Arc::new(normalizer));
    }

    pub fn cooldown(&self) -> Duration {
        self.cooldown
    }

    /// Number of live fingerprints.
    pub fn len(&self) -> usize {
        self.entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.entries.is_empty()
    }
}

/// Serialize with object keys sorted at every depth.
fn canonical_json<P: Serialize + ?Sized>(payload: &P) -> Result<String, serde_json::Error> {
    let value = serde_json::to_value(payload)?;
    serde_json::to_string(&sort_keys(value))
}

fn sort_keys(value: Value) -> Value {
    match value {
        Value::Object(map) => {
            let mut entries: Vec<(String, Value)> = map.into_iter().collect();
            entries.sort_by(|a, b| a.0.cmp(&b.0));
            let sorted: Map<String, Value> = entries
                .into_iter()
                .map(|(k, v)| (k, sort_keys(v)))
                .collect();
            Value::Object(sorted)
        }
        Value::Array(items) => Value::Array(items.into_iter().map(sort_keys).collect()),
        other => other,
    }
}
