//! Compiled program artifacts.

use mlua::Lua;

use crate::error::{classify, EngineError};

/// A compiled, runtime-ready form of a script source.
///
/// Produced once by [`Program::compile`] and immutable afterwards. The
/// bytecode is not tied to any particular [`crate::Engine`] instance, so a
/// registry can cache one `Program` and hand it to any number of runtimes
/// over its lifetime.
#[derive(Debug, Clone)]
pub struct Program {
    name: String,
    bytecode: Vec<u8>,
}

impl Program {
    /// Compile `source` into bytecode on a private, throwaway VM.
    ///
    /// The source is only parsed, never executed. Returns
    /// [`EngineError::Compile`] on a syntax error; failed compiles produce
    /// no artifact.
    pub fn compile(name: &str, source: &str) -> Result<Self, EngineError> {
        let lua = Lua::new();
        let chunk = lua.load(source).set_name(name);
        let function = chunk.into_function().map_err(classify)?;
        Ok(Self {
            name: name.to_string(),
            bytecode: function.dump(false),
        })
    }

    /// The chunk name the program was compiled under (used in diagnostics).
    pub fn name(&self) -> &str {
        &self.name
    }

    /// The raw bytecode. Only the engine loads this back into a VM.
    pub fn bytecode(&self) -> &[u8] {
        &self.bytecode
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn compile_produces_bytecode() {
        let program = Program::compile("answer", "return 42").expect("valid source");
        assert_eq!(program.name(), "answer");
        assert!(!program.bytecode().is_empty());
    }

    #[test]
    fn compile_rejects_invalid_source() {
        let err = Program::compile("broken", "local a: number = 10").unwrap_err();
        assert!(matches!(err, EngineError::Compile { .. }));
    }

    #[test]
    fn compile_does_not_execute() {
        // The chunk would set a global if it ran; compiling must not.
        let program = Program::compile("effect", "side_effect = true").expect("valid source");
        assert!(!program.bytecode().is_empty());
    }
}
