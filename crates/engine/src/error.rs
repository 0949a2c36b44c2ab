//! Engine error taxonomy.

/// Errors produced by the scripting runtime boundary.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Source text failed to parse or compile.
    #[error("Compile error: {message}")]
    Compile {
        /// Parser/compiler diagnostic, including the chunk name.
        message: String,
    },

    /// Execution was aborted because an interrupt was requested.
    ///
    /// This is a distinct variant (rather than a message pattern inside
    /// [`EngineError::Execution`]) so that supervisors can map it to a
    /// cancellation outcome without inspecting error text.
    #[error("Execution interrupted: {reason}")]
    Interrupted {
        /// The reason passed to [`crate::InterruptHandle::interrupt`].
        reason: String,
    },

    /// Script execution failed for a reason other than an interrupt.
    #[error("Execution failed: {0}")]
    Execution(String),

    /// A value could not be converted between host and script form.
    #[error("Value conversion failed: {0}")]
    Conversion(String),
}

impl EngineError {
    /// True if this error is the typed interrupt outcome.
    pub fn is_interrupted(&self) -> bool {
        matches!(self, Self::Interrupted { .. })
    }
}

/// Classify a raw `mlua` error into the engine taxonomy.
///
/// Interrupt detection does not happen here; the engine consults its
/// interrupt flag first and only falls back to classification when no
/// interrupt was pending.
pub(crate) fn classify(err: mlua::Error) -> EngineError {
    match err {
        mlua::Error::SyntaxError { message, .. } => EngineError::Compile { message },
        mlua::Error::FromLuaConversionError { .. }
        | mlua::Error::ToLuaConversionError { .. }
        | mlua::Error::SerializeError(_)
        | mlua::Error::DeserializeError(_) => EngineError::Conversion(err.to_string()),
        other => EngineError::Execution(other.to_string()),
    }
}
