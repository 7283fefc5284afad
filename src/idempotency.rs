use chrono::{DateTime, Duration, Utc};
use hourglass_rs::SafeTimeProvider;
use serde::de::DeserializeOwned;
use serde::{Deserialize, Serialize};
use sha2::{Digest, Sha256};
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use crate::errors::Result;
use crate::store::IdempotencyStore;

/// completed-operation record; replays return the stored result verbatim
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct IdempotencyRecord {
    pub key: String,
    /// JSON-serialized result of the first completed run
    pub result: String,
    pub first_completed_at: DateTime<Utc>,
}

/// stable digest of resource ids plus an action name
pub fn idempotency_key(parts: &[&str]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(parts.join(":").as_bytes());
    hex_digest(hasher)
}

/// hex SHA-256 of raw bytes, used for return-file identity
pub fn sha256_hex(bytes: &[u8]) -> String {
    let mut hasher = Sha256::new();
    hasher.update(bytes);
    hex_digest(hasher)
}

fn hex_digest(hasher: Sha256) -> String {
    hasher
        .finalize()
        .iter()
        .map(|b| format!("{b:02x}"))
        .collect()
}

/// run `operation` at most once per key
///
/// A completed record short-circuits the call and returns the stored result;
/// otherwise the operation runs and its result is persisted together with
/// the completion instant. The record is written only on success, so a
/// crashed attempt is retried by the next caller.
pub fn run_idempotent<T, F>(
    store: &dyn IdempotencyStore,
    time_provider: &SafeTimeProvider,
    key: &str,
    operation: F,
) -> Result<T>
where
    T: Serialize + DeserializeOwned,
    F: FnOnce() -> Result<T>,
{
    if let Some(record) = store.get(key)? {
        tracing::info!(key, "replayed idempotent operation, returning stored result");
        return Ok(serde_json::from_str(&record.result)?);
    }

    let result = operation()?;
    store.put(IdempotencyRecord {
        key: key.to_string(),
        result: serde_json::to_string(&result)?,
        first_completed_at: time_provider.now(),
    })?;
    Ok(result)
}

#[derive(Debug, Clone)]
struct LockEntry {
    acquired_at: DateTime<Utc>,
}

/// advisory, process-local, TTL-bounded named locks
///
/// Locks serve throughput and clear error messages; hard correctness comes
/// from the payment store's uniqueness constraint.
#[derive(Debug)]
pub struct LockService {
    ttl: Duration,
    locks: Mutex<HashMap<(String, String), LockEntry>>,
}

impl LockService {
    pub fn new(ttl_secs: i64) -> Self {
        Self {
            ttl: Duration::seconds(ttl_secs),
            locks: Mutex::new(HashMap::new()),
        }
    }

    fn guard(&self) -> MutexGuard<'_, HashMap<(String, String), LockEntry>> {
        self.locks
            .lock()
            .unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    /// try to take the lock; an expired holder is displaced
    pub fn acquire(
        &self,
        resource_kind: &str,
        resource_id: &str,
        time_provider: &SafeTimeProvider,
    ) -> bool {
        let now = time_provider.now();
        let mut locks = self.guard();
        let key = (resource_kind.to_string(), resource_id.to_string());

        if let Some(entry) = locks.get(&key) {
            if now - entry.acquired_at < self.ttl {
                return false;
            }
        }
        locks.insert(key, LockEntry { acquired_at: now });
        true
    }

    /// release regardless of caller identity within the process
    pub fn release(&self, resource_kind: &str, resource_id: &str) {
        self.guard()
            .remove(&(resource_kind.to_string(), resource_id.to_string()));
    }
}
