//! The TTL-bearing registry variant and its background sweeper.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};
use std::time::Duration;

use lunet_engine::Program;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tokio::time::Instant;
use tokio_util::sync::CancellationToken;

use crate::caching::sorted_tags;
use crate::error::RegistryError;
use crate::{ProgramRegistry, VersionTag};

/// A registry whose compiled programs are evicted after a period of
/// inactivity.
///
/// Every cache hit extends the entry's expiration to `now + ttl` (sliding
/// expiration), so frequently used programs stay compiled while abandoned
/// ones age out. Only compiled programs are evicted; registered source text
/// is kept for the life of the registry, and an evicted program is simply
/// recompiled on its next access.
pub struct ExpiringRegistry {
    inner: Mutex<Inner>,
    ttl: Duration,
    /// Sweep-cycle counter, bumped after every cycle that evicted at least
    /// one entry. `watch` never blocks the sender, so sweeping is unaffected
    /// by whether anyone subscribes.
    sweeps: watch::Sender<u64>,
}

#[derive(Default)]
struct Inner {
    sources: HashMap<VersionTag, String>,
    compiled: HashMap<VersionTag, CacheEntry>,
}

struct CacheEntry {
    program: Arc<Program>,
    expires_at: Instant,
}

impl ExpiringRegistry {
    /// Create a registry whose cache entries expire `ttl` after their last
    /// access.
    ///
    /// # Panics
    ///
    /// Panics if `ttl` is zero.
    pub fn new(ttl: Duration) -> Arc<Self> {
        assert!(!ttl.is_zero(), "cache TTL must be non-zero");
        let (sweeps, _) = watch::channel(0);
        Arc::new(Self {
            inner: Mutex::new(Inner::default()),
            ttl,
            sweeps,
        })
    }

    /// The configured time-to-live window.
    pub fn ttl(&self) -> Duration {
        self.ttl
    }

    /// Spawn the background sweep task.
    ///
    /// The sweeper runs one cycle per `ttl` (no finer), so an entry can
    /// survive up to just under two TTL windows after its last access before
    /// it is physically removed; `get` already treats any entry past its
    /// expiration as absent, so the coarse cycle is purely a memory-reclaim
    /// granularity. The task runs until `cancel` is triggered.
    ///
    /// Must be called from within a tokio runtime.
    pub fn spawn_sweeper(self: &Arc<Self>, cancel: CancellationToken) -> JoinHandle<()> {
        let registry = Arc::clone(self);
        tokio::spawn(async move {
            tracing::debug!(ttl_ms = registry.ttl.as_millis() as u64, "Cache sweeper started");
            let mut interval = tokio::time::interval(registry.ttl);
            loop {
                tokio::select! {
                    _ = cancel.cancelled() => {
                        tracing::debug!("Cache sweeper stopping");
                        break;
                    }
                    _ = interval.tick() => {
                        registry.sweep_now();
                    }
                }
            }
        })
    }

    /// Remove every cache entry whose expiration has passed, returning how
    /// many were evicted.
    ///
    /// Subscribers (see [`ExpiringRegistry::subscribe_sweeps`]) are notified
    /// after any call that evicted at least one entry.
    pub fn sweep_now(&self) -> usize {
        let now = Instant::now();
        let evicted = {
            let mut inner = self.inner.lock().expect("registry lock poisoned");
            let before = inner.compiled.len();
            inner.compiled.retain(|_, entry| entry.expires_at > now);
            before - inner.compiled.len()
        };

        if evicted > 0 {
            tracing::debug!(evicted, "Evicted expired compiled programs");
            self.sweeps.send_modify(|cycles| *cycles += 1);
        }
        evicted
    }

    /// Observe sweep activity (e.g. in tests): the received value is a
    /// counter of sweep cycles that evicted something.
    pub fn subscribe_sweeps(&self) -> watch::Receiver<u64> {
        self.sweeps.subscribe()
    }
}

impl ProgramRegistry for ExpiringRegistry {
    fn register(&self, tag: &str, source: &str) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.sources.insert(tag.to_string(), source.to_string());
        inner.compiled.remove(tag);
        tracing::debug!(tag, "Registered program source");
    }

    fn get(&self, tag: &str) -> Result<Arc<Program>, RegistryError> {
        let now = Instant::now();
        let mut inner = self.inner.lock().expect("registry lock poisoned");

        if let Some(entry) = inner.compiled.get_mut(tag) {
            if entry.expires_at > now {
                entry.expires_at = now + self.ttl;
                return Ok(Arc::clone(&entry.program));
            }
            // Expired but not yet swept: treat as a miss.
            inner.compiled.remove(tag);
        }

        let source = match inner.sources.get(tag) {
            Some(source) => source,
            None => {
                return Err(RegistryError::UnknownVersion {
                    tag: tag.to_string(),
                    known: sorted_tags(&inner.sources),
                })
            }
        };

        let program = Program::compile(tag, source).map_err(|source| RegistryError::Compile {
            tag: tag.to_string(),
            source,
        })?;
        tracing::debug!(tag, "Compiled program source");

        let program = Arc::new(program);
        inner.compiled.insert(
            tag.to_string(),
            CacheEntry {
                program: Arc::clone(&program),
                expires_at: now + self.ttl,
            },
        );
        Ok(program)
    }

    fn registered_versions(&self) -> Vec<VersionTag> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        sorted_tags(&inner.sources)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use tokio::time::advance;

    use super::*;

    const TTL: Duration = Duration::from_secs(60);

    #[tokio::test(start_paused = true)]
    async fn entry_expires_after_ttl_without_sweeper() {
        let registry = ExpiringRegistry::new(TTL);
        registry.register("v1", "return 1");

        let first = registry.get("v1").expect("get");
        advance(TTL + Duration::from_secs(1)).await;

        // Lazy expiry: the stale entry is treated as a miss and recompiled.
        let second = registry.get("v1").expect("get");
        assert!(!Arc::ptr_eq(&first, &second));
    }

    #[tokio::test(start_paused = true)]
    async fn access_within_ttl_slides_expiration() {
        let registry = ExpiringRegistry::new(TTL);
        registry.register("v1", "return 1");

        let first = registry.get("v1").expect("get");
        // Each access lands inside the window but the total elapsed time
        // exceeds one TTL; the entry must survive because every hit renews
        // its expiration.
        for _ in 0..3 {
            advance(TTL * 2 / 3).await;
            let again = registry.get("v1").expect("get");
            assert!(Arc::ptr_eq(&first, &again));
        }
    }

    #[tokio::test(start_paused = true)]
    async fn reregister_invalidates_cached_program() {
        let registry = ExpiringRegistry::new(TTL);
        registry.register("v1", "return 1");
        let old = registry.get("v1").expect("get");

        registry.register("v1", "return 2");
        let new = registry.get("v1").expect("get");
        assert!(!Arc::ptr_eq(&old, &new));
    }

    #[tokio::test(start_paused = true)]
    async fn unknown_tag_lists_registered_tags() {
        let registry = ExpiringRegistry::new(TTL);
        registry.register("v1", "return 1");

        let err = registry.get("v9").unwrap_err();
        assert!(matches!(err, RegistryError::UnknownVersion { .. }));
        assert!(err.to_string().contains("v1"));
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_evicts_and_notifies() {
        let registry = ExpiringRegistry::new(TTL);
        let cancel = CancellationToken::new();
        let sweeper = registry.spawn_sweeper(cancel.clone());
        let mut sweeps = registry.subscribe_sweeps();

        registry.register("v1", "return 1");
        registry.get("v1").expect("get");

        // The paused clock fast-forwards through sweep cycles until the
        // entry ages out and the sweeper publishes an eviction.
        sweeps.changed().await.expect("sweeper dropped channel");
        assert_eq!(*sweeps.borrow(), 1);

        // Source text survives eviction; only the compiled program is gone.
        assert_eq!(registry.registered_versions(), vec!["v1"]);
        assert!(registry.get("v1").is_ok());

        cancel.cancel();
        sweeper.await.expect("sweeper task");
    }

    #[tokio::test(start_paused = true)]
    async fn sweeper_stops_on_cancellation() {
        let registry = ExpiringRegistry::new(TTL);
        let cancel = CancellationToken::new();
        let sweeper = registry.spawn_sweeper(cancel.clone());

        cancel.cancel();
        sweeper.await.expect("sweeper task");
    }

    #[tokio::test(start_paused = true)]
    async fn sweep_now_reports_eviction_count() {
        let registry = ExpiringRegistry::new(TTL);
        registry.register("v1", "return 1");
        registry.register("v2", "return 2");
        registry.get("v1").expect("get");
        registry.get("v2").expect("get");

        assert_eq!(registry.sweep_now(), 0, "fresh entries must survive");
        advance(TTL * 2).await;
        assert_eq!(registry.sweep_now(), 2);
    }
}
