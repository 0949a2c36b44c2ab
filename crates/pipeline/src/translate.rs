//! The translate stage: a registry-stored compiler program.
//!
//! A translator is an ordinary Lua program whose execution installs a global
//! entry-point function (`translate` by default) taking `(text, options)`
//! and returning replacement text. Versioned translator sources live in a
//! [`ProgramRegistry`] exactly like any other program, so callers pick a
//! translator version by tag.

use std::sync::Arc;

use lunet_engine::{Engine, EngineError};
use lunet_registry::{ProgramRegistry, RegistryError};
use tokio_util::sync::CancellationToken;

use crate::error::PipelineError;
use crate::supervisor::supervised;

/// Entry-point global a translator program is expected to define.
pub const DEFAULT_ENTRY_POINT: &str = "translate";

/// Registry tag of the bundled typed-script translator.
pub const TYPED_SCRIPT_TAG: &str = "typed-script/0.1";

/// Source of the bundled typed-script translator.
///
/// The dialect it accepts is plain Lua plus `: type` annotations on locals,
/// parameters and return positions, and `import X from "mod"` lines that are
/// rewritten to `require` assignments when the `module` option asks for it.
pub const TYPED_SCRIPT_TRANSLATOR: &str = include_str!("../assets/typed_script.lua");

/// Before-script that installs the `define(name, factory)` module helper.
pub const MODULE_LOADER: &str = include_str!("../assets/module_loader.lua");

/// Register the bundled typed-script translator under its well-known tag.
pub fn register_bundled_translator(registry: &dyn ProgramRegistry) {
    registry.register(TYPED_SCRIPT_TAG, TYPED_SCRIPT_TRANSLATOR);
}

/// Errors from the translate stage.
#[derive(Debug, thiserror::Error)]
pub enum TranslateError {
    /// The translator program could not be fetched or compiled.
    #[error("Loading translator program")]
    Registry(#[from] RegistryError),

    /// Installing or invoking the translator failed. Translator-specific
    /// failures are carried through uninterpreted.
    #[error("Running translator")]
    Engine(#[from] EngineError),
}

/// Source-to-source translation backed by a registry-stored program.
///
/// The options bag is a JSON value handed to the translator verbatim; the
/// host never interprets it (the bundled translator understands
/// `{"module": "none" | "preload"}`, but that is a contract between the
/// caller and the translator version it selected).
pub struct Translator {
    registry: Arc<dyn ProgramRegistry>,
    tag: String,
    options: serde_json::Value,
    entry_point: String,
}

impl Translator {
    pub fn new(registry: Arc<dyn ProgramRegistry>, tag: impl Into<String>) -> Self {
        Self {
            registry,
            tag: tag.into(),
            options: serde_json::Value::Object(serde_json::Map::new()),
            entry_point: DEFAULT_ENTRY_POINT.to_string(),
        }
    }

    /// Replace the pass-through options bag.
    pub fn with_options(mut self, options: serde_json::Value) -> Self {
        self.options = options;
        self
    }

    /// Use a different entry-point global than [`DEFAULT_ENTRY_POINT`].
    pub fn with_entry_point(mut self, entry_point: impl Into<String>) -> Self {
        self.entry_point = entry_point.into();
        self
    }

    /// The registry tag this translator resolves.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// Translate `text` on `engine`, with no cancellation wiring of its own.
    ///
    /// This is the path a pipeline embeds under its outer supervisor: the
    /// engine already has exactly one cancellation authority, and adding a
    /// second here would let two supervisors race to interrupt the same
    /// runtime.
    pub(crate) fn translate(&self, engine: &Engine, text: &str) -> Result<String, TranslateError> {
        let program = self.registry.get(&self.tag)?;
        engine.install_program(&program)?;
        tracing::debug!(tag = %self.tag, "Translating script");
        Ok(engine.call_text_transform(&self.entry_point, text, &self.options)?)
    }

    /// Translate `text` as a standalone operation under its own supervisor.
    ///
    /// For callers using the translator outside a pipeline. Do not call this
    /// on an engine that is already running under another supervisor.
    pub async fn translate_standalone(
        &self,
        engine: &Engine,
        text: &str,
        cancel: &CancellationToken,
    ) -> Result<String, PipelineError> {
        supervised(engine, cancel, || {
            self.translate(engine, text).map_err(PipelineError::from)
        })
        .await
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
