//! The Lua VM wrapper and its cross-thread interrupt handle.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Mutex};

use mlua::{ChunkMode, Function, HookTriggers, Lua, LuaOptions, LuaSerdeExt, StdLib, Value};

use crate::error::{classify, EngineError};
use crate::program::Program;

/// How many VM instructions run between interrupt-flag checks.
///
/// Small enough that a cancellation lands within microseconds on a spinning
/// script, large enough that the hook is invisible in profiles.
const INTERRUPT_CHECK_INSTRUCTIONS: u32 = 1000;

/// Reason reported when an interrupt fires without an explicit reason.
const DEFAULT_INTERRUPT_REASON: &str = "interrupt requested";

// ---------------------------------------------------------------------------
// InterruptHandle
// ---------------------------------------------------------------------------

/// Requests that the engine abort its current (or next) execution.
///
/// Cloneable and safe to use from any thread; the handle shares state with
/// the VM's instruction hook but never touches the VM itself. A request
/// stays pending until an execution observes it or
/// [`Engine::clear_interrupt`] is called.
#[derive(Clone, Default)]
pub struct InterruptHandle {
    state: Arc<InterruptState>,
}

#[derive(Default)]
struct InterruptState {
    requested: AtomicBool,
    reason: Mutex<Option<String>>,
}

impl InterruptHandle {
    /// Request an interrupt with a diagnostic reason.
    ///
    /// The reason is stored before the flag is raised so a racing execution
    /// never observes the flag without a reason.
    pub fn interrupt(&self, reason: impl Into<String>) {
        let reason = reason.into();
        tracing::debug!(reason = %reason, "Interrupt requested");
        *self
            .state
            .reason
            .lock()
            .expect("interrupt reason lock poisoned") = Some(reason);
        self.state.requested.store(true, Ordering::SeqCst);
    }

    /// Whether an interrupt request is currently pending.
    pub fn is_requested(&self) -> bool {
        self.state.requested.load(Ordering::SeqCst)
    }

    /// Peek at the pending reason without consuming the request.
    fn pending_reason(&self) -> Option<String> {
        if !self.is_requested() {
            return None;
        }
        self.state
            .reason
            .lock()
            .expect("interrupt reason lock poisoned")
            .clone()
    }

    /// Consume a pending request, returning its reason.
    fn take_reason(&self) -> Option<String> {
        if !self.state.requested.swap(false, Ordering::SeqCst) {
            return None;
        }
        let reason = self
            .state
            .reason
            .lock()
            .expect("interrupt reason lock poisoned")
            .take();
        Some(reason.unwrap_or_else(|| DEFAULT_INTERRUPT_REASON.to_string()))
    }

    /// Drop any pending request.
    fn clear(&self) {
        self.state.requested.store(false, Ordering::SeqCst);
        self.state
            .reason
            .lock()
            .expect("interrupt reason lock poisoned")
            .take();
    }
}

// ---------------------------------------------------------------------------
// Engine
// ---------------------------------------------------------------------------

/// One embedded Lua runtime.
///
/// An engine is cheap to create and is intended to back exactly one pipeline
/// invocation (or one sequence of single-threaded calls); it must never be
/// driven by two invocations concurrently, because an interrupt targets the
/// whole VM rather than a specific call.
pub struct Engine {
    lua: Lua,
    interrupt: InterruptHandle,
}

impl Engine {
    /// Create a runtime with the safe standard libraries loaded.
    ///
    /// The VM is built through the unsafe constructor for one reason only:
    /// it must accept the binary chunks produced by [`Program::compile`].
    /// No bytecode from any other origin is ever loaded.
    pub fn new() -> Self {
        let lua = unsafe { Lua::unsafe_new_with(StdLib::ALL_SAFE, LuaOptions::default()) };
        let interrupt = InterruptHandle::default();

        let hook_handle = interrupt.clone();
        lua.set_hook(
            HookTriggers {
                every_nth_instruction: Some(INTERRUPT_CHECK_INSTRUCTIONS),
                ..Default::default()
            },
            move |_lua, _debug| match hook_handle.pending_reason() {
                Some(reason) => Err(mlua::Error::RuntimeError(format!(
                    "interrupted: {reason}"
                ))),
                None => Ok(()),
            },
        );

        Self { lua, interrupt }
    }

    /// A handle that can abort this engine's executions from any thread.
    pub fn interrupt_handle(&self) -> InterruptHandle {
        self.interrupt.clone()
    }

    /// Drop a pending interrupt request so it cannot abort the next run.
    pub fn clear_interrupt(&self) {
        self.interrupt.clear();
    }

    /// Evaluate source text and convert the result to a host JSON value.
    ///
    /// A chunk that returns nothing yields `Value::Null`.
    pub fn eval_json(&self, name: &str, source: &str) -> Result<serde_json::Value, EngineError> {
        let result = (|| {
            let value = self.lua.load(source).set_name(name).eval::<Value>()?;
            self.lua.from_value(value)
        })();
        self.normalize(result)
    }

    /// Execute source text, discarding any result.
    pub fn exec(&self, name: &str, source: &str) -> Result<(), EngineError> {
        let result = self.lua.load(source).set_name(name).exec();
        self.normalize(result)
    }

    /// Execute a compiled program and convert its result to JSON.
    pub fn run_program_json(&self, program: &Program) -> Result<serde_json::Value, EngineError> {
        let result = (|| {
            let value = self
                .lua
                .load(program.bytecode())
                .set_name(program.name())
                .set_mode(ChunkMode::Binary)
                .eval::<Value>()?;
            self.lua.from_value(value)
        })();
        self.normalize(result)
    }

    /// Execute a compiled program for its side effects (e.g. a program that
    /// installs globals), discarding any result.
    pub fn install_program(&self, program: &Program) -> Result<(), EngineError> {
        let result = self
            .lua
            .load(program.bytecode())
            .set_name(program.name())
            .set_mode(ChunkMode::Binary)
            .exec();
        self.normalize(result)
    }

    /// Call the global function `entry` with `(text, options)` and return
    /// its string result.
    ///
    /// `options` is an uninterpreted pass-through bag; it is converted to a
    /// Lua table by value (`null` becomes `nil`), never spliced into source
    /// text.
    pub fn call_text_transform(
        &self,
        entry: &str,
        text: &str,
        options: &serde_json::Value,
    ) -> Result<String, EngineError> {
        let result = (|| {
            let function = self.lua.globals().get::<_, Function>(entry)?;
            let options = if options.is_null() {
                Value::Nil
            } else {
                self.lua.to_value(options)?
            };
            function.call::<_, String>((text, options))
        })();
        self.normalize(result)
    }

    /// Set a global variable in the runtime from a host JSON value.
    pub fn set_global_json(
        &self,
        name: &str,
        value: &serde_json::Value,
    ) -> Result<(), EngineError> {
        let result = (|| {
            let value = if value.is_null() {
                Value::Nil
            } else {
                self.lua.to_value(value)?
            };
            self.lua.globals().set(name, value)
        })();
        self.normalize(result)
    }

    /// Map a raw VM outcome into the engine taxonomy.
    ///
    /// A failure with a pending interrupt request is always reported as
    /// [`EngineError::Interrupted`], regardless of the error the VM
    /// surfaced; the request is consumed in the process. A success leaves
    /// any pending request in place so it still aborts the next execution.
    fn normalize<T>(&self, result: mlua::Result<T>) -> Result<T, EngineError> {
        match result {
            Ok(value) => Ok(value),
            Err(err) => match self.interrupt.take_reason() {
                Some(reason) => Err(EngineError::Interrupted { reason }),
                None => Err(classify(err)),
            },
        }
    }
}

impl Default for Engine {
    fn default() -> Self {
        Self::new()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
