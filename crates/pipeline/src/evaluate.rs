//! The staged pipeline runner.

use std::io::{Cursor, Read};

use lunet_engine::Engine;
use serde_json::Value;
use tokio_util::sync::CancellationToken;

use crate::error::{BoxedStageError, PipelineError};
use crate::hook::{apply_hooks, HookFn, StageKind};
use crate::supervisor::supervised;
use crate::translate::{Translator, MODULE_LOADER};

/// A boxed script input.
type ScriptSource = Box<dyn Read + Send>;

/// One staged evaluation over one engine.
///
/// Stages run strictly in order (before-scripts, pre-translate hooks, the
/// optional translate stage, post-process hooks, final evaluation) under a
/// single cancellation supervisor; the first failure aborts the rest. A
/// pipeline is built per invocation and consumed by running it, so state is
/// never shared across invocations. The engine is borrowed for the duration
/// of the run and must not be driven by anything else meanwhile.
pub struct Pipeline<'e> {
    engine: &'e Engine,
    before_scripts: Vec<ScriptSource>,
    pre_translate_hooks: Vec<HookFn>,
    post_process_hooks: Vec<HookFn>,
    translator: Option<Translator>,
}

impl<'e> Pipeline<'e> {
    pub fn builder() -> PipelineBuilder {
        PipelineBuilder::default()
    }

    /// Run the pipeline to completion with no external cancellation.
    pub async fn run(self, script: impl Read + Send) -> Result<Value, PipelineError> {
        self.run_with_cancellation(script, &CancellationToken::new())
            .await
    }

    /// Run the pipeline under `cancel`.
    ///
    /// A cancellation observed at any stage yields the single normalized
    /// [`PipelineError::Cancelled`] result for the whole invocation.
    /// Requires a multi-thread tokio runtime (see
    /// [`crate::supervisor::supervised`]).
    pub async fn run_with_cancellation(
        self,
        script: impl Read + Send,
        cancel: &CancellationToken,
    ) -> Result<Value, PipelineError> {
        let engine = self.engine;
        let mut script = script;
        supervised(engine, cancel, move || self.execute(&mut script)).await
    }

    /// The synchronous stage sequence, run under the supervisor.
    fn execute(self, script: &mut dyn Read) -> Result<Value, PipelineError> {
        let Pipeline {
            engine,
            before_scripts,
            pre_translate_hooks,
            post_process_hooks,
            translator,
        } = self;

        for (index, mut source) in before_scripts.into_iter().enumerate() {
            let name = format!("before-script {index}");
            let text = read_source(&mut *source, &name)?;
            tracing::debug!(index, "Running before-script");
            engine
                .exec(&name, &text)
                .map_err(|err| PipelineError::Stage {
                    stage: StageKind::BeforeScript,
                    index,
                    source: BoxedStageError::from(err),
                })?;
        }

        let mut text = read_source(script, "script")?;

        if let Some(translator) = &translator {
            text = apply_hooks(StageKind::PreTranslate, &pre_translate_hooks, text)?;
            text = translator.translate(engine, &text)?;
        }

        text = apply_hooks(StageKind::PostProcess, &post_process_hooks, text)?;

        tracing::debug!("Evaluating script");
        engine.eval_json("script", &text).map_err(PipelineError::from)
    }
}

fn read_source(source: &mut dyn Read, what: &str) -> Result<String, PipelineError> {
    let mut text = String::new();
    source
        .read_to_string(&mut text)
        .map_err(|source| PipelineError::Read {
            what: what.to_string(),
            source,
        })?;
    Ok(text)
}

// ---------------------------------------------------------------------------
// PipelineBuilder
// ---------------------------------------------------------------------------

/// Assembles a [`Pipeline`] invocation.
///
/// Before-scripts and hooks run in the order the builder calls were made.
#[derive(Default)]
pub struct PipelineBuilder {
    before_scripts: Vec<ScriptSource>,
    pre_translate_hooks: Vec<HookFn>,
    post_process_hooks: Vec<HookFn>,
    translator: Option<Translator>,
}

impl PipelineBuilder {
    /// Append a script to run before the main script.
    pub fn before_script(mut self, source: impl Read + Send + 'static) -> Self {
        self.before_scripts.push(Box::new(source));
        self
    }

    /// Append the bundled module-loader before-script (the `define`
    /// helper), so before-scripts can register modules for translated
    /// `import` lines to resolve.
    pub fn module_loader(self) -> Self {
        self.before_script(Cursor::new(MODULE_LOADER))
    }

    /// Append a hook applied to the script text before translation.
    ///
    /// Pre-translate hooks only run when a translator is configured.
    pub fn pre_translate_hook(
        mut self,
        hook: impl Fn(&str) -> Result<String, BoxedStageError> + Send + Sync + 'static,
    ) -> Self {
        self.pre_translate_hooks.push(Box::new(hook));
        self
    }

    /// Append a hook applied to the translated text (or to the original
    /// text when no translator is configured).
    pub fn post_process_hook(
        mut self,
        hook: impl Fn(&str) -> Result<String, BoxedStageError> + Send + Sync + 'static,
    ) -> Self {
        self.post_process_hooks.push(Box::new(hook));
        self
    }

    /// Enable the translate stage.
    pub fn translator(mut self, translator: Translator) -> Self {
        self.translator = Some(translator);
        self
    }

    /// Bind the pipeline to the engine it will run on.
    pub fn build(self, engine: &Engine) -> Pipeline<'_> {
        Pipeline {
            engine,
            before_scripts: self.before_scripts,
            pre_translate_hooks: self.pre_translate_hooks,
            post_process_hooks: self.post_process_hooks,
            translator: self.translator,
        }
    }
}
