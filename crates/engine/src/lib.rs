//! Embedded Lua runtime wrapper.
//!
//! Provides [`Engine`], a thin host boundary around one `mlua` VM. Scripts
//! go in as text or as precompiled [`Program`] bytecode; results come back
//! as `serde_json::Value` so no `mlua` type ever crosses a crate boundary.
//!
//! Executions can be aborted from another thread via [`InterruptHandle`].
//! An aborted run is reported as the typed [`EngineError::Interrupted`]
//! variant, so callers never have to match on error message text to tell a
//! cancellation apart from an ordinary script failure.

pub mod engine;
pub mod error;
pub mod program;

pub use engine::{Engine, InterruptHandle};
pub use error::EngineError;
pub use program::Program;
