//! The always-caching registry variant.

use std::collections::HashMap;
use std::sync::{Arc, Mutex};

use lunet_engine::Program;

use crate::error::RegistryError;
use crate::{ProgramRegistry, VersionTag};

/// A thread-safe registry that compiles registered sources on first access
/// and caches the compiled program for the life of the registry.
///
/// Compilation happens while holding the registry lock: concurrent misses
/// serialize, which keeps the implementation simple and makes the
/// compiled-at-most-once-per-version guarantee trivial. Cache hits only
/// clone an `Arc`, so the lock is never held for long on the hot path.
#[derive(Default)]
pub struct CachingRegistry {
    inner: Mutex<Inner>,
}

#[derive(Default)]
struct Inner {
    sources: HashMap<VersionTag, String>,
    compiled: HashMap<VersionTag, Arc<Program>>,
}

impl CachingRegistry {
    pub fn new() -> Self {
        Self::default()
    }
}

impl ProgramRegistry for CachingRegistry {
    fn register(&self, tag: &str, source: &str) {
        let mut inner = self.inner.lock().expect("registry lock poisoned");
        inner.sources.insert(tag.to_string(), source.to_string());
        // The cached program (if any) was compiled from the old source.
        inner.compiled.remove(tag);
        tracing::debug!(tag, "Registered program source");
    }

    fn get(&self, tag: &str) -> Result<Arc<Program>, RegistryError> {
        let mut inner = self.inner.lock().expect("registry lock poisoned");

        if let Some(program) = inner.compiled.get(tag) {
            return Ok(Arc::clone(program));
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
        inner.compiled.insert(tag.to_string(), Arc::clone(&program));
        Ok(program)
    }

    fn registered_versions(&self) -> Vec<VersionTag> {
        let inner = self.inner.lock().expect("registry lock poisoned");
        sorted_tags(&inner.sources)
    }
}

/// Sorted tag snapshot, shared by both registry variants for stable error
/// messages and listings.
pub(crate) fn sorted_tags<V>(sources: &HashMap<VersionTag, V>) -> Vec<VersionTag> {
    let mut tags: Vec<_> = sources.keys().cloned().collect();
    tags.sort();
    tags
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------

#[cfg(test)]
mod tests {
    use lunet_engine::Engine;
    use serde_json::json;

    use super::*;

    #[test]
    fn get_compiles_and_caches() {
        let registry = CachingRegistry::new();
        registry.register("v1", "return 1");

        let first = registry.get("v1").expect("get");
        let second = registry.get("v1").expect("get");
        assert!(
            Arc::ptr_eq(&first, &second),
            "second access should hit the cache"
        );
    }

    #[test]
    fn reregister_invalidates_cached_program() {
        let registry = CachingRegistry::new();
        let engine = Engine::new();

        registry.register("v1", "return 1");
        let old = registry.get("v1").expect("get");
        assert_eq!(engine.run_program_json(&old).expect("run"), json!(1));

        registry.register("v1", "return 2");
        let new = registry.get("v1").expect("get");
        assert!(!Arc::ptr_eq(&old, &new), "cache entry should be replaced");
        assert_eq!(engine.run_program_json(&new).expect("run"), json!(2));
    }

    #[test]
    fn unknown_tag_lists_registered_tags() {
        let registry = CachingRegistry::new();
        registry.register("v1", "return 1");
        registry.register("v2", "return 2");

        let err = registry.get("v9").unwrap_err();
        let msg = err.to_string();
        assert!(msg.contains("'v9'"));
        assert!(msg.contains("v1") && msg.contains("v2"));
    }

    #[test]
    fn compile_failure_is_not_cached() {
        let registry = CachingRegistry::new();
        registry.register("v1", "return ][");

        assert!(matches!(
            registry.get("v1").unwrap_err(),
            RegistryError::Compile { .. }
        ));

        // Fixing the source makes the same tag usable again.
        registry.register("v1", "return 1");
        assert!(registry.get("v1").is_ok());
    }

    #[test]
    fn registered_versions_is_sorted_snapshot() {
        let registry = CachingRegistry::new();
        registry.register("v2", "return 2");
        registry.register("v1", "return 1");

        assert_eq!(registry.registered_versions(), vec!["v1", "v2"]);
    }

    #[test]
    fn concurrent_gets_share_one_compiled_program() {
        let registry = CachingRegistry::new();
        registry.register("v1", "return 1");

        // All threads race the cold cache; every winner and loser must end
        // up holding the same cached program.
        let programs = std::thread::scope(|scope| {
            let handles: Vec<_> = (0..8)
                .map(|_| scope.spawn(|| registry.get("v1").expect("get")))
                .collect();
            handles
                .into_iter()
                .map(|handle| handle.join().expect("thread"))
                .collect::<Vec<_>>()
        });

        for program in &programs[1..] {
            assert!(Arc::ptr_eq(&programs[0], program));
        }
    }
}
