//! The shared, read-mostly signing key cache

use std::{
    sync::{
        atomic::{AtomicU64, Ordering},
        Arc,
    },
    time::Duration,
};

use arc_swap::ArcSwap;
use tokio::{sync::Mutex, task::JoinHandle};

use crate::{
    error::KeySourceError,
    jwk::SigningKeySet,
    source::KeySource,
};

/// The shortest period accepted by [`KeyCache::spawn_refresh`]
pub const MIN_REFRESH_INTERVAL: Duration = Duration::from_secs(1);

/// An immutable view of the cached keys
///
/// Snapshots are replaced wholesale on refresh, never modified in place.
#[derive(Debug)]
pub struct Snapshot {
    generation: u64,
    keys: SigningKeySet,
}

impl Snapshot {
    /// Incremented each time a refresh stores a new key set
    #[must_use]
    pub fn generation(&self) -> u64 {
        self.generation
    }

    /// The keys
    pub fn keys(&self) -> &SigningKeySet {
        &self.keys
    }
}

/// Caches the key set served by a [`KeySource`]
///
/// Readers take the current [`Snapshot`] without locking. Refreshes are
/// serialized so that many requests missing the same key trigger one
/// fetch between them, whether that fetch succeeds or fails.
#[derive(Debug)]
pub struct KeyCache {
    source: Arc<dyn KeySource>,
    current: ArcSwap<Snapshot>,
    attempts: AtomicU64,
    last_attempt: Mutex<LastAttempt>,
}

/// The outcome of the most recent completed fetch
#[derive(Debug, Default)]
struct LastAttempt {
    number: u64,
    failure: Option<KeySourceError>,
}

impl KeyCache {
    /// Constructs an empty cache; the first lookup will fetch
    pub fn new(source: Arc<dyn KeySource>) -> Self {
        Self::with_keys(source, SigningKeySet::empty())
    }

    /// Constructs a cache seeded with `keys`
    pub fn with_keys(source: Arc<dyn KeySource>, keys: SigningKeySet) -> Self {
        Self {
            source,
            current: ArcSwap::from_pointee(Snapshot {
                generation: 0,
                keys,
            }),
            attempts: AtomicU64::new(0),
            last_attempt: Mutex::new(LastAttempt::default()),
        }
    }

    /// The current snapshot
    #[must_use]
    pub fn snapshot(&self) -> Arc<Snapshot> {
        self.current.load_full()
    }

    /// Fetches from the source and replaces the snapshot
    ///
    /// # Errors
    ///
    /// Returns the source's error; the previous snapshot is kept.
    pub async fn refresh(&self) -> Result<Arc<Snapshot>, KeySourceError> {
        let mut last = self.last_attempt.lock().await;
        self.fetch_and_store(&mut last).await
    }

    /// Refreshes after a lookup in the snapshot of `seen_generation` missed
    ///
    /// If another caller completed a fetch while this one waited, its
    /// outcome is shared: a newer snapshot is returned, or its failure is
    /// reported, without fetching again.
    ///
    /// # Errors
    ///
    /// Returns the source's error; the previous snapshot is kept.
    pub async fn refresh_after_miss(
        &self,
        seen_generation: u64,
    ) -> Result<Arc<Snapshot>, KeySourceError> {
        let attempts_before = self.attempts.load(Ordering::Acquire);
        let mut last = self.last_attempt.lock().await;

        let current = self.snapshot();
        if current.generation != seen_generation {
            tracing::trace!(
                generation = current.generation,
                "key set already refreshed by another request"
            );
            return Ok(current);
        }

        if last.number != attempts_before {
            if let Some(failure) = &last.failure {
                tracing::trace!(
                    attempt = last.number,
                    "key set refresh failed while waiting; sharing its failure"
                );
                return Err(failure.clone());
            }
        }

        self.fetch_and_store(&mut last).await
    }

    async fn fetch_and_store(
        &self,
        last: &mut LastAttempt,
    ) -> Result<Arc<Snapshot>, KeySourceError> {
        let fetched = self.source.fetch_keys().await;

        last.number = last.number.wrapping_add(1);
        last.failure = fetched.as_ref().err().cloned();
        self.attempts.store(last.number, Ordering::Release);

        let keys = fetched.map_err(|err| {
            let error: &dyn std::error::Error = &err;
            tracing::warn!(error, "key set refresh failed; keeping previous keys");
            err
        })?;

        let generation = self.current.load().generation.wrapping_add(1);
        let snapshot = Arc::new(Snapshot { generation, keys });
        self.current.store(Arc::clone(&snapshot));

        tracing::info!(generation, keys = snapshot.keys.len(), "key set refreshed");
        Ok(snapshot)
    }

    /// Refreshes the cache every `interval` on a background task
    ///
    /// The first refresh happens one `interval` from now. Intervals shorter
    /// than [`MIN_REFRESH_INTERVAL`] are raised to it. Failures are logged
    /// and retried at the next tick. Requires a Tokio runtime.
    pub fn spawn_refresh(self: &Arc<Self>, interval: Duration) -> JoinHandle<()> {
        let this = Arc::clone(self);
        if interval < MIN_REFRESH_INTERVAL {
            tracing::warn!(
                requested = ?interval,
                minimum = ?MIN_REFRESH_INTERVAL,
                "key set refresh interval too short; using minimum"
            );
        }
        let interval = interval.max(MIN_REFRESH_INTERVAL);

        tokio::spawn(async move {
            let mut timer = tokio::time::interval(interval);
            timer.tick().await;

            loop {
                timer.tick().await;
                // Failures are already logged; the next tick tries again
                let _ = this.refresh().await;
            }
        })
    }
}
