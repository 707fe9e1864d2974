//src/store.rs

use std::thread;
use std::time::Duration;

use ahash::AHashMap;
use parking_lot::Mutex;
use serde::{Deserialize, Serialize};

use crate::error::Result;
use crate::types::VariantCall;

/// The record that typed variant calls of one (sample, analysis) hang off.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CallSet {
    pub id: u64,
    /// `<sample>_<analysis>`
    pub name: String,
    pub sample_id: String,
}

/// Record store for typed calls.
///
/// `replace_variant_calls` deletes every call of the call set before inserting,
/// so repeating a write gives the same state.
pub trait CallSetRepository: Send + Sync {
    fn get_or_create_call_set(&self, sample: &str, analysis: &str) -> Result<CallSet>;

    fn replace_variant_calls(&self, call_set: &CallSet, calls: &[VariantCall]) -> Result<()>;
}

/// Bounded exponential backoff for transient store failures.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct RetryPolicy {
    pub max_attempts: u32,
    pub initial_backoff_ms: u64,
    pub multiplier: f64,
}

impl Default for RetryPolicy {
    fn default() -> Self {
        Self {
            max_attempts: 3,
            initial_backoff_ms: 50,
            multiplier: 2.0,
        }
    }
}

impl RetryPolicy {
    fn backoff(&self, attempt: u32) -> Duration {
        let factor = self.multiplier.max(1.0).powi(attempt.saturating_sub(1) as i32);
        Duration::from_millis((self.initial_backoff_ms as f64 * factor) as u64)
    }
}

/// Runs `op` until it succeeds, fails with a non-retryable error, or the attempts run out.
pub fn with_retry<T, F>(policy: &RetryPolicy, what: &str, mut op: F) -> Result<T>
where
    F: FnMut() -> Result<T>,
{
    let mut attempt = 1;
    loop {
        match op() {
            Ok(value) => return Ok(value),
            Err(err) if err.is_retryable() && attempt < policy.max_attempts => {
                let wait = policy.backoff(attempt);
                log::warn!(
                    "{what} failed (attempt {attempt}/{}): {err}; retrying in {wait:?}",
                    policy.max_attempts
                );
                thread::sleep(wait);
                attempt += 1;
            }
            Err(err) => return Err(err),
        }
    }
}

#[derive(Default)]
struct StoreInner {
    next_id: u64,
    call_sets: AHashMap<String, CallSet>,
    variant_calls: AHashMap<u64, Vec<VariantCall>>,
}

/// Process-local repository, shared by every worker of a batch.
#[derive(Default)]
pub struct InMemoryStore {
    inner: Mutex<StoreInner>,
}

impl InMemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn variant_calls(&self, call_set: &CallSet) -> Vec<VariantCall> {
        self.inner
            .lock()
            .variant_calls
            .get(&call_set.id)
            .cloned()
            .unwrap_or_default()
    }

    pub fn call_set_count(&self) -> usize {
        self.inner.lock().call_sets.len()
    }
}

impl CallSetRepository for InMemoryStore {
    fn get_or_create_call_set(&self, sample: &str, analysis: &str) -> Result<CallSet> {
        let name = format!("{sample}_{analysis}");
        let mut inner = self.inner.lock();
        if let Some(existing) = inner.call_sets.get(&name) {
            return Ok(existing.clone());
        }
        inner.next_id += 1;
        let call_set = CallSet {
            id: inner.next_id,
            name: name.clone(),
            sample_id: sample.to_string(),
        };
        log::debug!("created call set {name} (id {})", call_set.id);
        inner.call_sets.insert(name, call_set.clone());
        Ok(call_set)
    }

    fn replace_variant_calls(&self, call_set: &CallSet, calls: &[VariantCall]) -> Result<()> {
        let mut inner = self.inner.lock();
        inner.variant_calls.remove(&call_set.id);
        inner.variant_calls.insert(call_set.id, calls.to_vec());
        Ok(())
    }
}
