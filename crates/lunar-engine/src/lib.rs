//! Lunar Engine
//!
//! Embeds a Lua-family VM behind the [`lunar_abi::LuaApi`] primitive
//! interface and bridges its values and call semantics to native Rust:
//! - **Value bridge**: tagged VM stack values ⇄ [`LuaValue`] host values,
//!   converted through a priority-ordered chain of [`TypeExtension`]
//!   handlers (`extensions` module)
//! - **References**: persistent registry anchors with RAII release
//!   (`refs` module)
//! - **Contexts**: the main execution context and coroutine-like children
//!   (`thread`, `global` modules)
//! - **Async calls**: coroutine yields surfaced as a [`PendingCall`]
//!   future settled by [`Deferred`] values (`bridge`, `deferred` modules)
//! - **Façade**: [`LuaEngine`] construction and the four script entry
//!   points (`engine` module)
//!
//! # Example
//!
//! ```rust,ignore
//! use lunar_engine::{EngineOptions, LuaEngine, LuaValue};
//!
//! let engine = LuaEngine::new(api, EngineOptions::default())?;
//! engine.global().set("greeting", &LuaValue::String("hello".into()))?;
//! let n = engine.do_string_sync("return 1 + 1")?;
//! assert_eq!(n, LuaValue::Number(2.0));
//! ```

#![warn(rust_2018_idioms)]
#![allow(clippy::arc_with_non_send_sync)]

// ============================================================================
// Modules
// ============================================================================

/// Async call bridge: the [`PendingCall`] future.
pub mod bridge;

/// Host-side settlement primitive for awaited values.
pub mod deferred;

/// Engine façade and construction options.
pub mod engine;

/// Error taxonomy.
pub mod error;

/// Type-extension registry and the per-shape handlers.
pub mod extensions;

/// Global environment handle.
pub mod global;

/// Host-side proxies for VM functions and tables.
pub mod proxies;

/// Persistent reference registry.
pub mod refs;

/// Execution contexts and the stack-level value bridge.
pub mod thread;

/// The host value model.
pub mod value;

// ============================================================================
// Re-exports
// ============================================================================

pub use bridge::PendingCall;
pub use deferred::Deferred;
pub use engine::{EngineOptions, LuaEngine};
pub use error::EngineError;
pub use extensions::TypeExtension;
pub use global::Global;
pub use proxies::{LuaFunction, LuaTableProxy};
pub use refs::LuaRef;
pub use thread::{ResumeOutcome, Thread};
pub use value::{HostCallback, LuaError, LuaUserdata, LuaValue};
