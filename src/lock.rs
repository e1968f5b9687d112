//! Scoped write locks keyed by storage path
//!
//! A lock is exclusive across threads and re-entrant for the thread that
//! holds it. Acquisition waits a bounded time and then fails with
//! `LockTimeout`; the guard releases on drop, so every exit path unlocks.

use std::collections::HashMap;
use std::sync::{Arc, Condvar, Mutex, MutexGuard, PoisonError};
use std::thread::{self, ThreadId};
use std::time::{Duration, Instant};

use crate::error::{RegistryError, Result};

#[derive(Debug)]
struct Holder {
    owner: ThreadId,
    depth: usize,
}

#[derive(Debug, Default)]
struct LockTable {
    held: Mutex<HashMap<String, Holder>>,
    released: Condvar,
}

impl LockTable {
    fn held(&self) -> MutexGuard<'_, HashMap<String, Holder>> {
        self.held.lock().unwrap_or_else(PoisonError::into_inner)
    }
}

/// Hands out [`LockGuard`]s for storage keys
#[derive(Debug, Clone)]
pub struct LockManager {
    table: Arc<LockTable>,
    timeout: Duration,
    retries: u32,
}

impl Default for LockManager {
    fn default() -> Self {
        Self::new(Duration::from_millis(5000), 3)
    }
}

impl LockManager {
    /// `timeout` is the total wait, split evenly over `retries + 1` attempts
    pub fn new(timeout: Duration, retries: u32) -> Self {
        Self {
            table: Arc::new(LockTable::default()),
            timeout,
            retries,
        }
    }

    pub fn timeout(&self) -> Duration {
        self.timeout
    }

    /// Acquire the lock for `key`, waiting at most the configured timeout
    pub fn acquire(&self, key: &str) -> Result<LockGuard> {
        let me = thread::current().id();
        let attempts = self.retries + 1;
        let per_attempt = self.timeout / attempts;
        let started = Instant::now();

        let mut held = self.table.held();
        for attempt in 1..=attempts {
            let deadline = Instant::now() + per_attempt;
            loop {
                match held.get_mut(key) {
                    None => {
                        held.insert(key.to_string(), Holder { owner: me, depth: 1 });
                        return Ok(self.guard(key));
                    }
                    Some(holder) if holder.owner == me => {
                        holder.depth += 1;
                        return Ok(self.guard(key));
                    }
                    Some(_) => {}
                }

                let now = Instant::now();
                if now >= deadline {
                    break;
                }
                held = self
                    .table
                    .released
                    .wait_timeout(held, deadline - now)
                    .unwrap_or_else(PoisonError::into_inner)
                    .0;
            }
            tracing::debug!(key, attempt, attempts, "Lock busy, retrying");
        }

        let waited_ms = started.elapsed().as_millis() as u64;
        tracing::warn!(key, waited_ms, "Gave up waiting for lock");
        Err(RegistryError::LockTimeout {
            path: key.to_string(),
            waited_ms,
        })
    }

    /// Whether any thread currently holds `key`
    pub fn is_locked(&self, key: &str) -> bool {
        self.table.held().contains_key(key)
    }

    fn guard(&self, key: &str) -> LockGuard {
        LockGuard {
            table: Arc::clone(&self.table),
            key: key.to_string(),
        }
    }
}

/// Releases its lock when dropped
#[derive(Debug)]
#[must_use = "the lock is released as soon as the guard is dropped"]
pub struct LockGuard {
    table: Arc<LockTable>,
    key: String,
}

impl LockGuard {
    pub fn key(&self) -> &str {
        &self.key
    }
}

impl Drop for LockGuard {
    fn drop(&mut self) {
        let mut held = self.table.held();
        if let Some(holder) = held.get_mut(&self.key) {
            holder.depth -= 1;
            if holder.depth == 0 {
                held.remove(&self.key);
                self.table.released.notify_all();
            }
        }
    }
}
