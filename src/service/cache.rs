//! Result cache keyed by image fingerprint
//!
//! Each content digest owns a slot holding a `OnceCell`. The first caller for a
//! digest runs the computation inside the cell; concurrent callers for the same
//! digest await the same cell, so the computation runs at most once. Completed
//! slots are evicted least-recently-used once the capacity is exceeded; slots
//! that are still computing are never evicted.

use std::collections::HashMap;
use std::future::Future;
use std::sync::atomic::{AtomicBool, AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};

use serde::Serialize;
use tokio::sync::OnceCell;
use utoipa::ToSchema;

use crate::model::{CacheOutcome, ContentDigest, Fingerprint, VerificationRecord};
use crate::service::store::RecordStore;

pub const DEFAULT_NEAR_DUPLICATE_THRESHOLD: u32 = 10;
pub const DEFAULT_CAPACITY: usize = 1024;

struct Slot {
    cell: Arc<OnceCell<Arc<VerificationRecord>>>,
    fingerprint: Fingerprint,
    last_used: u64,
}

/// How a cache request was answered
#[derive(Debug, Clone)]
pub enum CacheLookup {
    /// A record for this exact digest already existed
    Hit(Arc<VerificationRecord>),
    /// A visually equivalent image was verified before
    NearDuplicate {
        record: Arc<VerificationRecord>,
        distance: u32,
    },
    /// The record was computed by this call
    Computed(Arc<VerificationRecord>),
}

impl CacheLookup {
    pub fn outcome(&self) -> CacheOutcome {
        match self {
            CacheLookup::Hit(_) => CacheOutcome::Hit,
            CacheLookup::NearDuplicate { .. } => CacheOutcome::NearDuplicate,
            CacheLookup::Computed(_) => CacheOutcome::Miss,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, ToSchema)]
pub struct CacheStats {
    pub entries: usize,
    pub hits: u64,
    pub near_hits: u64,
    pub misses: u64,
    pub computations: u64,
}

enum Claim {
    Ready(CacheLookup),
    Pending(Arc<OnceCell<Arc<VerificationRecord>>>),
}

pub struct ResultCache {
    slots: Mutex<HashMap<ContentDigest, Slot>>,
    clock: AtomicU64,
    store: Option<Arc<dyn RecordStore>>,
    threshold: u32,
    capacity: usize,
    hits: AtomicU64,
    near_hits: AtomicU64,
    misses: AtomicU64,
    computations: AtomicU64,
}

impl ResultCache {
    pub fn new(threshold: u32, capacity: usize) -> Self {
        Self {
            slots: Mutex::new(HashMap::new()),
            clock: AtomicU64::new(0),
            store: None,
            threshold,
            capacity: capacity.max(1),
            hits: AtomicU64::new(0),
            near_hits: AtomicU64::new(0),
            misses: AtomicU64::new(0),
            computations: AtomicU64::new(0),
        }
    }

    /// Back the cache with a durable store, read before computing and written after
    pub fn with_store(mut self, store: Arc<dyn RecordStore>) -> Self {
        self.store = Some(store);
        self
    }

    /// Name of the backing, for health reporting
    pub fn backend(&self) -> String {
        match &self.store {
            Some(store) => format!("memory+{}", store.backend()),
            None => "memory".to_string(),
        }
    }

    fn lock(&self) -> MutexGuard<'_, HashMap<ContentDigest, Slot>> {
        self.slots.lock().unwrap_or_else(|e| e.into_inner())
    }

    fn tick(&self) -> u64 {
        self.clock.fetch_add(1, Ordering::Relaxed) + 1
    }

    /// Completed record for this exact digest, if cached in memory
    pub fn lookup(&self, digest: &ContentDigest) -> Option<Arc<VerificationRecord>> {
        let now = self.tick();
        let mut slots = self.lock();
        let slot = slots.get_mut(digest)?;
        let record = slot.cell.get().cloned()?;
        slot.last_used = now;
        Some(record)
    }

    /// Return the cached record for `fingerprint`, or run `compute` to produce it
    ///
    /// `compute` runs at most once per digest across concurrent callers. A failed
    /// computation is not cached and its error is returned to the caller that ran it.
    pub async fn get_or_compute<F, Fut, E>(
        &self,
        fingerprint: &Fingerprint,
        compute: F,
    ) -> Result<CacheLookup, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<VerificationRecord, E>>,
    {
        let cell = match self.claim(fingerprint) {
            Claim::Ready(lookup) => return Ok(lookup),
            Claim::Pending(cell) => cell,
        };

        let computed = AtomicBool::new(false);
        let result = cell
            .get_or_try_init(|| self.load_or_compute(fingerprint, compute, &computed))
            .await
            .cloned();

        // Counted here so a record loaded from the store is a hit and nothing else
        let computed = computed.load(Ordering::Relaxed);
        if computed {
            self.misses.fetch_add(1, Ordering::Relaxed);
        }

        match result {
            Ok(record) if computed => Ok(CacheLookup::Computed(record)),
            Ok(record) => {
                self.hits.fetch_add(1, Ordering::Relaxed);
                Ok(CacheLookup::Hit(record))
            }
            Err(e) => {
                self.release_failed(&fingerprint.digest, &cell);
                Err(e)
            }
        }
    }

    /// Resolve the request against existing slots, or register a new one
    fn claim(&self, fingerprint: &Fingerprint) -> Claim {
        let now = self.tick();
        let mut slots = self.lock();

        if let Some(slot) = slots.get_mut(&fingerprint.digest) {
            slot.last_used = now;
            if let Some(record) = slot.cell.get() {
                self.hits.fetch_add(1, Ordering::Relaxed);
                return Claim::Ready(CacheLookup::Hit(record.clone()));
            }
            return Claim::Pending(slot.cell.clone());
        }

        if let Some((digest, distance)) = self.nearest(&slots, fingerprint)
            && let Some(slot) = slots.get_mut(&digest)
            && let Some(record) = slot.cell.get().cloned()
        {
            slot.last_used = now;
            self.near_hits.fetch_add(1, Ordering::Relaxed);
            tracing::debug!(
                digest = %fingerprint.digest.short(),
                near = %digest.short(),
                distance = distance,
                "Near-duplicate cache hit"
            );
            return Claim::Ready(CacheLookup::NearDuplicate { record, distance });
        }

        let cell = Arc::new(OnceCell::new());
        slots.insert(
            fingerprint.digest,
            Slot {
                cell: cell.clone(),
                fingerprint: fingerprint.clone(),
                last_used: now,
            },
        );
        self.evict(&mut slots);

        Claim::Pending(cell)
    }

    /// Closest completed slot within the threshold; ties go to the smaller digest
    fn nearest(
        &self,
        slots: &HashMap<ContentDigest, Slot>,
        fingerprint: &Fingerprint,
    ) -> Option<(ContentDigest, u32)> {
        slots
            .iter()
            .filter(|(_, slot)| slot.cell.initialized())
            .filter(|(_, slot)| slot.fingerprint.is_near_duplicate(fingerprint, self.threshold))
            .map(|(digest, slot)| (*digest, slot.fingerprint.phash.distance(&fingerprint.phash)))
            .min_by(|a, b| a.1.cmp(&b.1).then(a.0.cmp(&b.0)))
    }

    fn evict(&self, slots: &mut HashMap<ContentDigest, Slot>) {
        while slots.len() > self.capacity {
            let victim = slots
                .iter()
                .filter(|(_, slot)| slot.cell.initialized())
                .min_by_key(|(_, slot)| slot.last_used)
                .map(|(digest, _)| *digest);

            match victim {
                Some(digest) => {
                    slots.remove(&digest);
                    tracing::debug!(digest = %digest.short(), "Evicted cache entry");
                }
                // Everything left is still computing
                None => break,
            }
        }
    }

    async fn load_or_compute<F, Fut, E>(
        &self,
        fingerprint: &Fingerprint,
        compute: F,
        computed: &AtomicBool,
    ) -> Result<Arc<VerificationRecord>, E>
    where
        F: FnOnce() -> Fut,
        Fut: Future<Output = Result<VerificationRecord, E>>,
    {
        if let Some(store) = &self.store {
            match store.load(&fingerprint.digest).await {
                Ok(Some(record)) => {
                    tracing::debug!(digest = %fingerprint.digest.short(), "Loaded record from store");
                    return Ok(Arc::new(record));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(digest = %fingerprint.digest.short(), error = %e, "Record store read failed");
                }
            }
        }

        computed.store(true, Ordering::Relaxed);
        self.computations.fetch_add(1, Ordering::Relaxed);
        let record = compute().await?;

        if let Some(store) = &self.store {
            match store.insert_if_absent(&record).await {
                Ok(Some(existing)) => {
                    tracing::debug!(digest = %fingerprint.digest.short(), "Record store already held a record");
                    return Ok(Arc::new(existing));
                }
                Ok(None) => {}
                Err(e) => {
                    tracing::warn!(digest = %fingerprint.digest.short(), error = %e, "Record store write failed");
                }
            }
        }

        Ok(Arc::new(record))
    }

    /// Drop a slot whose computation failed, unless other callers still wait on it
    fn release_failed(&self, digest: &ContentDigest, cell: &Arc<OnceCell<Arc<VerificationRecord>>>) {
        let mut slots = self.lock();
        let orphaned = slots.get(digest).is_some_and(|slot| {
            Arc::ptr_eq(&slot.cell, cell)
                && !slot.cell.initialized()
                && Arc::strong_count(&slot.cell) <= 2
        });
        if orphaned {
            slots.remove(digest);
        }
    }

    /// Remove a completed entry from memory and from the durable store
    ///
    /// Returns whether an in-memory entry was removed. Entries still computing are kept.
    pub async fn invalidate(&self, digest: &ContentDigest) -> bool {
        let removed = {
            let mut slots = self.lock();
            let completed = slots.get(digest).is_some_and(|slot| slot.cell.initialized());
            if completed {
                slots.remove(digest);
            }
            completed
        };

        if let Some(store) = &self.store
            && let Err(e) = store.remove(digest).await
        {
            tracing::warn!(digest = %digest.short(), error = %e, "Record store delete failed");
        }

        tracing::info!(digest = %digest.short(), removed = removed, "Invalidated cache entry");
        removed
    }

    /// Number of slots, including computations in flight
    pub fn len(&self) -> usize {
        self.lock().len()
    }

    pub fn stats(&self) -> CacheStats {
        CacheStats {
            entries: self.len(),
            hits: self.hits.load(Ordering::Relaxed),
            near_hits: self.near_hits.load(Ordering::Relaxed),
            misses: self.misses.load(Ordering::Relaxed),
            computations: self.computations.load(Ordering::Relaxed),
        }
    }
}

impl Default for ResultCache {
    fn default() -> Self {
        Self::new(DEFAULT_NEAR_DUPLICATE_THRESHOLD, DEFAULT_CAPACITY)
    }
}
