//! Registry error taxonomy.

use lunet_engine::EngineError;

/// Errors produced by registry lookups.
#[derive(Debug, thiserror::Error)]
pub enum RegistryError {
    /// No source was ever registered for the requested tag.
    ///
    /// The message enumerates the tags that *are* registered so a caller
    /// can diagnose a typo or a missing registration without further
    /// queries.
    #[error("Unknown version tag '{tag}', must be one of {known:?}")]
    UnknownVersion {
        /// The tag that was requested.
        tag: String,
        /// Currently registered tags, sorted.
        known: Vec<String>,
    },

    /// The registered source for the tag failed to compile.
    ///
    /// Failed compiles are never cached; the next access retries.
    #[error("Compiling registered source for tag '{tag}'")]
    Compile {
        /// The tag whose source failed.
        tag: String,
        #[source]
        source: EngineError,
    },
}
