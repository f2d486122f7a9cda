//! Instance pool: fingerprint → pooled instance.
//!
//! All map operations are O(1) under a short synchronous mutex that is never
//! held across an await. The expensive creation path is serialized per
//! fingerprint through [`InstancePool::creation_lock`].

use std::collections::HashMap;
use std::sync::{Arc, Mutex, MutexGuard};
use std::time::Duration;

use lambda_core::Fingerprint;
use lambda_runtime::ServiceAddress;
use tokio::time::Instant;

/// Lifecycle of a pooled instance, as inferred by the dispatcher.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum InstanceState {
    /// Being created, readied, and loaded.
    Creating,
    /// Loaded and idle.
    Ready,
    /// At least one invocation in flight.
    Running,
    /// Found unusable; about to be discarded.
    Failed,
}

/// One pooled instance and the bookkeeping the dispatcher keeps for it.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct InstanceEntry {
    /// Digest of the source loaded into the instance.
    pub fingerprint: Fingerprint,
    /// Runtime name, derived from the fingerprint.
    pub instance_name: String,
    /// Distinguishes successive instances created for the same fingerprint.
    pub generation: u64,
    /// `None` while `Creating`.
    pub address: Option<ServiceAddress>,
    /// Last successful creation, reuse, or invocation. Never moves backwards
    /// while the entry is alive.
    pub last_used: Instant,
    pub state: InstanceState,
    /// In-flight invocations.
    pub leases: usize,
}

impl InstanceEntry {
    fn touch(&mut self, now: Instant) {
        if now > self.last_used {
            self.last_used = now;
        }
    }

    fn is_idle_beyond(&self, now: Instant, ttl: Duration) -> bool {
        self.leases == 0
            && matches!(self.state, InstanceState::Ready | InstanceState::Failed)
            && now.saturating_duration_since(self.last_used) > ttl
    }
}

#[derive(Default)]
struct PoolInner {
    entries: HashMap<Fingerprint, InstanceEntry>,
    creation_locks: HashMap<Fingerprint, Arc<tokio::sync::Mutex<()>>>,
    next_generation: u64,
}

/// Shared handle to the pool. Clones refer to the same map.
#[derive(Clone, Default)]
pub struct InstancePool {
    inner: Arc<Mutex<PoolInner>>,
}

impl InstancePool {
    pub fn new() -> Self {
        Self::default()
    }

    fn lock(&self) -> MutexGuard<'_, PoolInner> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// The lock serializing creation and eviction for `fingerprint`.
    pub fn creation_lock(&self, fingerprint: &Fingerprint) -> Arc<tokio::sync::Mutex<()>> {
        self.lock()
            .creation_locks
            .entry(fingerprint.clone())
            .or_default()
            .clone()
    }

    /// Drop the lock slot once nobody holds a clone and no entry needs it.
    pub fn prune_lock(&self, fingerprint: &Fingerprint) {
        let mut inner = self.lock();
        if inner.entries.contains_key(fingerprint) {
            return;
        }
        if inner
            .creation_locks
            .get(fingerprint)
            .is_some_and(|lock| Arc::strong_count(lock) == 1)
        {
            inner.creation_locks.remove(fingerprint);
        }
    }

    pub fn get(&self, fingerprint: &Fingerprint) -> Option<InstanceEntry> {
        self.lock().entries.get(fingerprint).cloned()
    }

    /// Record a creation in progress, replacing any previous entry. Returns
    /// the new entry's generation.
    pub fn insert_creating(&self, fingerprint: Fingerprint, instance_name: String) -> u64 {
        let mut inner = self.lock();
        inner.next_generation += 1;
        let generation = inner.next_generation;
        let entry = InstanceEntry {
            fingerprint: fingerprint.clone(),
            instance_name,
            generation,
            address: None,
            last_used: Instant::now(),
            state: InstanceState::Creating,
            leases: 0,
        };
        inner.entries.insert(fingerprint, entry);
        generation
    }

    /// Creation finished: publish the address and make the entry leasable.
    pub fn mark_ready(&self, fingerprint: &Fingerprint, address: ServiceAddress) {
        let now = Instant::now();
        if let Some(entry) = self.lock().entries.get_mut(fingerprint) {
            entry.address = Some(address);
            entry.state = InstanceState::Ready;
            entry.touch(now);
        }
    }

    /// Keep the entry from being leased again. Running invocations finish.
    pub fn mark_failed(&self, fingerprint: &Fingerprint) {
        if let Some(entry) = self.lock().entries.get_mut(fingerprint) {
            entry.state = InstanceState::Failed;
        }
    }

    /// Refresh `last_used` to now.
    pub fn touch(&self, fingerprint: &Fingerprint) {
        let now = Instant::now();
        if let Some(entry) = self.lock().entries.get_mut(fingerprint) {
            entry.touch(now);
        }
    }

    /// Register an in-flight invocation. `None` if there is no ready entry.
    pub fn lease(&self, fingerprint: &Fingerprint) -> Option<Lease> {
        let now = Instant::now();
        let mut inner = self.lock();
        let entry = inner.entries.get_mut(fingerprint)?;
        if !matches!(entry.state, InstanceState::Ready | InstanceState::Running) {
            return None;
        }
        entry.leases += 1;
        entry.state = InstanceState::Running;
        entry.touch(now);
        Some(Lease {
            pool: self.clone(),
            fingerprint: fingerprint.clone(),
            generation: entry.generation,
        })
    }

    /// Leases outliving their entry (discarded, then recreated) are ignored.
    fn release(&self, fingerprint: &Fingerprint, generation: u64) {
        let mut inner = self.lock();
        let Some(entry) = inner.entries.get_mut(fingerprint) else {
            return;
        };
        if entry.generation != generation {
            return;
        }
        entry.leases = entry.leases.saturating_sub(1);
        if entry.leases == 0 && entry.state == InstanceState::Running {
            entry.state = InstanceState::Ready;
        }
    }

    pub fn remove(&self, fingerprint: &Fingerprint) -> Option<InstanceEntry> {
        self.lock().entries.remove(fingerprint)
    }

    /// Fingerprints whose entries look evictable at `now`.
    pub fn expired(&self, now: Instant, ttl: Duration) -> Vec<Fingerprint> {
        self.lock()
            .entries
            .values()
            .filter(|entry| entry.is_idle_beyond(now, ttl))
            .map(|entry| entry.fingerprint.clone())
            .collect()
    }

    /// Remove the entry only if it is still evictable.
    pub fn remove_if_expired(
        &self,
        fingerprint: &Fingerprint,
        now: Instant,
        ttl: Duration,
    ) -> Option<InstanceEntry> {
        let mut inner = self.lock();
        if inner
            .entries
            .get(fingerprint)
            .is_some_and(|entry| entry.is_idle_beyond(now, ttl))
        {
            inner.entries.remove(fingerprint)
        } else {
            None
        }
    }

    /// Every fingerprint with an entry, in no particular order.
    pub fn fingerprints(&self) -> Vec<Fingerprint> {
        self.lock().entries.keys().cloned().collect()
    }

    /// Remove and return every entry, keeping only lock slots still in use.
    pub fn drain(&self) -> Vec<InstanceEntry> {
        let mut inner = self.lock();
        inner.creation_locks.retain(|_, lock| Arc::strong_count(lock) > 1);
        inner.entries.drain().map(|(_, entry)| entry).collect()
    }

    /// Copy of every entry, sorted by fingerprint.
    pub fn snapshot(&self) -> Vec<InstanceEntry> {
        let mut entries: Vec<_> = self.lock().entries.values().cloned().collect();
        entries.sort_by(|a, b| a.fingerprint.cmp(&b.fingerprint));
        entries
    }

    pub fn len(&self) -> usize {
        self.lock().entries.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// Number of creation-lock slots currently allocated.
    pub fn lock_slots(&self) -> usize {
        self.lock().creation_locks.len()
    }
}

/// Keeps an entry out of the reaper's reach while an invocation runs.
#[must_use]
pub struct Lease {
    pool: InstancePool,
    fingerprint: Fingerprint,
    generation: u64,
}

impl Lease {
    /// Generation of the entry this lease was taken on.
    pub fn generation(&self) -> u64 {
        self.generation
    }
}

impl Drop for Lease {
    fn drop(&mut self) {
        self.pool.release(&self.fingerprint, self.generation);
    }
}
