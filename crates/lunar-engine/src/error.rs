//! Engine error types.

use crate::value::LuaValue;

/// Errors raised by the bridge.
///
/// VM-side failures carry the error *value*, materialized through the type
/// extension registry exactly like successful results. A script that throws
/// a table fails with that table, not with its string rendering.
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// The VM could not allocate a state.
    #[error("Lua state could not be created (probably due to lack of memory)")]
    Construction,

    /// Syntax or compile failure detected at load time. Nothing executed.
    #[error("load error: {value}")]
    Load {
        /// The error value left by the loader.
        value: LuaValue,
    },

    /// Error raised during execution.
    #[error("runtime error: {value}")]
    Runtime {
        /// The materialized error value (any value shape, not just strings).
        value: LuaValue,
    },

    /// Programming error in reference handling: double release, or use of a
    /// reference after its engine is gone.
    #[error("reference lifecycle error: {0}")]
    ReferenceLifecycle(String),

    /// A value could not cross the bridge in the requested direction.
    #[error("type error: {0}")]
    Type(String),

    /// File I/O error from a file entry point.
    #[error("{0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// The materialized VM error value, when this error carries one.
    pub fn value(&self) -> Option<&LuaValue> {
        match self {
            Self::Load { value } | Self::Runtime { value } => Some(value),
            _ => None,
        }
    }
}
