//! Versioned program registries.
//!
//! A registry maps an opaque version tag to a script source and lazily
//! compiles sources into cached [`Program`] artifacts. Two variants exist:
//!
//! - [`CachingRegistry`] caches compiled programs forever.
//! - [`ExpiringRegistry`] gives every cache entry a sliding time-to-live and
//!   offers a background sweeper that evicts stale entries.
//!
//! Registries are safe to share across any number of threads; all state
//! sits behind one mutex. There is no process-wide default registry;
//! callers construct one and pass it where it is needed.

use std::sync::Arc;

use lunet_engine::Program;

pub mod caching;
pub mod error;
pub mod expiring;

pub use caching::CachingRegistry;
pub use error::RegistryError;
pub use expiring::ExpiringRegistry;

/// An opaque identifier selecting a registered program version.
pub type VersionTag = String;

/// The shared contract of both registry variants.
pub trait ProgramRegistry: Send + Sync {
    /// Store (or overwrite) the source for `tag`.
    ///
    /// Overwriting invalidates any program previously compiled for the tag,
    /// so the next [`ProgramRegistry::get`] reflects the new source.
    fn register(&self, tag: &str, source: &str);

    /// Return the compiled program for `tag`, compiling and caching it on
    /// first access.
    fn get(&self, tag: &str) -> Result<Arc<Program>, RegistryError>;

    /// Snapshot of the currently registered tags, sorted for stable output.
    fn registered_versions(&self) -> Vec<VersionTag>;
}
