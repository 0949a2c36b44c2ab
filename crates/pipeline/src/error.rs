//! Pipeline error taxonomy.
//!
//! Every invocation ends in at most one terminal error, tagged with enough
//! context (stage kind, position, tag) to diagnose without inspecting
//! pipeline internals. Cancellation is its own variant and always takes
//! precedence in reporting over any concurrent failure.

use lunet_engine::EngineError;
use lunet_registry::RegistryError;

use crate::hook::StageKind;
use crate::translate::TranslateError;

/// Boxed cause for before-script and hook failures.
pub type BoxedStageError = Box<dyn std::error::Error + Send + Sync + 'static>;

/// Errors produced by a pipeline invocation.
#[derive(Debug, thiserror::Error)]
pub enum PipelineError {
    /// The invocation was aborted by its cancellation token.
    ///
    /// This is the single normalized cancellation outcome for the whole
    /// pipeline, regardless of which stage the token interrupted.
    #[error("Evaluation cancelled")]
    Cancelled,

    /// A script source could not be fully read before reaching the engine.
    #[error("Reading {what}")]
    Read {
        /// Which input failed (e.g. `script`, `before-script 1`).
        what: String,
        #[source]
        source: std::io::Error,
    },

    /// A before-script or hook failed; records the stage and its position
    /// in the order the stages were supplied.
    #[error("{stage} {index} failed")]
    Stage {
        stage: StageKind,
        index: usize,
        #[source]
        source: BoxedStageError,
    },

    /// A registry lookup failed (unknown tag or failed compile).
    #[error(transparent)]
    Registry(#[from] RegistryError),

    /// The final evaluation (or a direct engine call) failed.
    #[error(transparent)]
    Engine(#[from] EngineError),

    /// The translate stage failed.
    #[error("Translate stage failed")]
    Translate(#[from] TranslateError),
}

impl PipelineError {
    /// Whether this error carries a typed engine interrupt anywhere in its
    /// cause chain. Used by the supervisor to normalize interrupts into
    /// [`PipelineError::Cancelled`].
    pub(crate) fn is_interrupted(&self) -> bool {
        match self {
            Self::Engine(err) => err.is_interrupted(),
            Self::Translate(TranslateError::Engine(err)) => err.is_interrupted(),
            Self::Stage { source, .. } => source
                .downcast_ref::<EngineError>()
                .is_some_and(EngineError::is_interrupted),
            _ => false,
        }
    }
}
