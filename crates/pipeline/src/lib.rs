//! Staged script evaluation under a single cancellation authority.
//!
//! A [`Pipeline`] runs ordered before-scripts, pre-translate text hooks, an
//! optional translate stage (a registry-stored compiler program), ordered
//! post-process hooks, and a final evaluation, all against one shared
//! [`lunet_engine::Engine`] and all under one cancellation supervisor, so
//! exactly one party may ever interrupt the runtime.
//!
//! Cancellation is caller-driven: derive a
//! [`tokio_util::sync::CancellationToken`] from whatever deadline or signal
//! applies and pass it to [`Pipeline::run_with_cancellation`]. There are no
//! internal timers and no internal retries; the first failure in any stage
//! is the terminal result of the invocation.

pub mod error;
pub mod evaluate;
pub mod hook;
pub mod supervisor;
pub mod translate;

pub use error::{BoxedStageError, PipelineError};
pub use evaluate::{Pipeline, PipelineBuilder};
pub use hook::StageKind;
pub use supervisor::supervised;
pub use translate::{
    register_bundled_translator, TranslateError, Translator, DEFAULT_ENTRY_POINT, MODULE_LOADER,
    TYPED_SCRIPT_TAG, TYPED_SCRIPT_TRANSLATOR,
};
