//! Ordered, pure text-transform hooks.
//!
//! A hook takes the current script text and returns replacement text or an
//! error. Hooks are composed by sequential reduction in exactly the order
//! they were registered; there is no shared mutable state between them, and
//! a failing hook aborts the pipeline with its stage and position recorded.

use crate::error::{BoxedStageError, PipelineError};

/// A single text-transform stage.
pub type HookFn = Box<dyn Fn(&str) -> Result<String, BoxedStageError> + Send + Sync>;

// ---------------------------------------------------------------------------
// StageKind
// ---------------------------------------------------------------------------

/// Which pipeline stage a failure is attributed to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StageKind {
    /// A script executed before the main script.
    BeforeScript,
    /// A text hook applied before the translate stage.
    PreTranslate,
    /// A text hook applied after translation (or to the original text when
    /// no translator is configured).
    PostProcess,
}

impl StageKind {
    pub fn as_str(&self) -> &'static str {
        match self {
            Self::BeforeScript => "before-script",
            Self::PreTranslate => "pre-translate hook",
            Self::PostProcess => "post-process hook",
        }
    }
}

impl std::fmt::Display for StageKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.write_str(self.as_str())
    }
}

// ---------------------------------------------------------------------------
// Composition
// ---------------------------------------------------------------------------

/// Run `text` through every hook in order, attributing a failure to the
/// stage and the failing hook's position.
pub(crate) fn apply_hooks(
    stage: StageKind,
    hooks: &[HookFn],
    mut text: String,
) -> Result<String, PipelineError> {
    for (index, hook) in hooks.iter().enumerate() {
        text = hook(&text).map_err(|source| PipelineError::Stage {
            stage,
            index,
            source,
        })?;
    }
    Ok(text)
}
