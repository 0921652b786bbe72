//! Primitive call interface to an embedded Lua-family VM.
//!
//! This crate is the narrow waist between the bridge and whatever VM build
//! actually executes scripts. It knows nothing about host value conversion,
//! references, or async calls — it is pure mechanism: push and pop tagged
//! values on a state's stack, call, resume, reference.
//!
//! The operations live on the [`LuaApi`] capability trait. One `LuaApi`
//! instance corresponds to one loaded VM module; it is constructed once and
//! handed by `Arc<dyn LuaApi>` to every component that needs it. Operation
//! names follow the VM's own C-level naming convention and are the wire
//! contract: `lua_*` for direct transcriptions of the core API, `luaL_*`
//! for auxiliary-library entries, and `clua_*` for glue helpers. The state
//! handle is always the first parameter.
//!
//! The layer itself never raises. Load and call failures surface as a
//! [`LuaReturn`] status code with the error value left on the stack, which
//! is the VM's own error protocol.

#![warn(missing_docs)]
#![warn(rust_2018_idioms)]

use std::sync::Arc;

// ============================================================================
// Handles and constants
// ============================================================================

/// Opaque handle to one VM execution context (a `lua_State*`).
///
/// The main state is produced by [`LuaApi::luaL_newstate`]; child states by
/// [`LuaApi::lua_newthread`]. A handle is only valid for the `LuaApi`
/// instance that produced it.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
#[repr(transparent)]
pub struct LuaState(u64);

impl LuaState {
    /// Wrap a raw state address. Only `LuaApi` implementations call this.
    #[inline]
    pub const fn from_raw(raw: u64) -> Self {
        Self(raw)
    }

    /// The raw state address.
    #[inline]
    pub const fn raw(self) -> u64 {
        self.0
    }
}

/// Pseudo-index addressing the VM registry table.
pub const LUA_REGISTRYINDEX: i32 = -1_001_000;

/// `nresults` sentinel: keep every result the call produces.
pub const LUA_MULTRET: i32 = -1;

/// Reference id returned when `luaL_ref` is asked to reference nothing.
pub const LUA_NOREF: i32 = -2;

/// Reference id returned when the referenced value is nil.
pub const LUA_REFNIL: i32 = -1;

// ============================================================================
// Tags and status codes
// ============================================================================

/// Type tag of a stack value, as reported by `lua_type`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaType {
    /// Index does not address a stack value.
    None,
    /// nil
    Nil,
    /// true / false
    Boolean,
    /// Double-precision number.
    Number,
    /// Immutable string.
    String,
    /// Table.
    Table,
    /// Callable value (script function, host function, builtin).
    Function,
    /// Opaque data block carrying a host id and tag.
    Userdata,
    /// Coroutine-like child execution context.
    Thread,
}

impl LuaType {
    /// Decode the C-level tag code. Unknown codes map to `None`.
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Nil,
            1 => Self::Boolean,
            3 => Self::Number,
            4 => Self::String,
            5 => Self::Table,
            6 => Self::Function,
            7 => Self::Userdata,
            8 => Self::Thread,
            _ => Self::None,
        }
    }

    /// The C-level tag code.
    pub const fn code(self) -> i32 {
        match self {
            Self::None => -1,
            Self::Nil => 0,
            Self::Boolean => 1,
            Self::Number => 3,
            Self::String => 4,
            Self::Table => 5,
            Self::Function => 6,
            Self::Userdata => 7,
            Self::Thread => 8,
        }
    }

    /// Human-readable tag name, matching `lua_typename`.
    pub const fn name(self) -> &'static str {
        match self {
            Self::None => "no value",
            Self::Nil => "nil",
            Self::Boolean => "boolean",
            Self::Number => "number",
            Self::String => "string",
            Self::Table => "table",
            Self::Function => "function",
            Self::Userdata => "userdata",
            Self::Thread => "thread",
        }
    }
}

/// Status code of a load, call, or resume.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum LuaReturn {
    /// Completed normally.
    Ok,
    /// Coroutine suspended; yielded values are on its stack.
    Yield,
    /// Runtime error; the error value is on the stack.
    ErrRun,
    /// Syntax error during load; the error value is on the stack.
    ErrSyntax,
    /// Allocation failure.
    ErrMem,
    /// Error while handling an error.
    ErrErr,
}

impl LuaReturn {
    /// Decode the C-level status code. Unknown codes map to `ErrErr`.
    pub const fn from_code(code: i32) -> Self {
        match code {
            0 => Self::Ok,
            1 => Self::Yield,
            2 => Self::ErrRun,
            3 => Self::ErrSyntax,
            4 => Self::ErrMem,
            _ => Self::ErrErr,
        }
    }

    /// The C-level status code.
    pub const fn code(self) -> i32 {
        match self {
            Self::Ok => 0,
            Self::Yield => 1,
            Self::ErrRun => 2,
            Self::ErrSyntax => 3,
            Self::ErrMem => 4,
            Self::ErrErr => 5,
        }
    }

    /// Whether this status reports successful completion.
    #[inline]
    pub const fn is_ok(self) -> bool {
        matches!(self, Self::Ok)
    }
}

// ============================================================================
// Host callbacks
// ============================================================================

/// A host function callable from the VM.
///
/// The callback receives the calling frame's state handle with its arguments
/// at stack indices `1..=lua_gettop(L)`. It pushes its results and returns
/// the result count. `Err(message)` raises a VM error in the caller.
///
/// Callbacks are registered with [`LuaApi::clua_addfunction`] and pushed by
/// index with [`LuaApi::clua_pushcfunction`]; no host object crosses the
/// primitive boundary directly.
pub type HostFunction = Arc<dyn Fn(&dyn LuaApi, LuaState) -> Result<i32, String>>;

// ============================================================================
// The primitive operation catalogue
// ============================================================================

/// The fixed catalogue of primitive operations on an embedded VM.
///
/// Each operation is a thin, panic-free transcription of the VM's native
/// call, taking and returning only scalars and opaque handles. Stack
/// indices are 1-based from the bottom or negative from the top; index 0 is
/// never valid.
///
/// One engine drives one `LuaApi` state at a time; implementations are not
/// required to tolerate parallel access to a single state.
///
/// # Await glue
///
/// When a coroutine suspends through the VM's await glue it yields exactly
/// one value. The driver resumes it with two values `(ok: boolean, v)`:
/// the glue returns `v` to the script when `ok` is true and raises `v`
/// otherwise.
#[allow(non_snake_case)]
pub trait LuaApi {
    // ------------------------------------------------------------------
    // State lifecycle
    // ------------------------------------------------------------------

    /// Open a fresh main state. `None` means the VM could not allocate one.
    fn luaL_newstate(&self) -> Option<LuaState>;

    /// Destroy a main state and everything it owns. Must be called exactly
    /// once per `luaL_newstate`; any handle into the state is dead after.
    fn lua_close(&self, l: LuaState);

    /// Load the VM's built-in standard libraries into the state's globals.
    fn luaL_openlibs(&self, l: LuaState);

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Compile `source` and push the resulting chunk as a function. On
    /// `ErrSyntax` the error value is pushed instead.
    fn luaL_loadstring(&self, l: LuaState, source: &str) -> LuaReturn;

    /// Like `luaL_loadstring` for an in-memory buffer, with an explicit
    /// chunk name for error messages.
    fn luaL_loadbufferx(&self, l: LuaState, bytes: &[u8], chunk_name: &str) -> LuaReturn;

    // ------------------------------------------------------------------
    // Calls and coroutines
    // ------------------------------------------------------------------

    /// Protected call of the function at `top - nargs` with the `nargs`
    /// values above it. On `Ok`, function and arguments are replaced by
    /// `nresults` results (`LUA_MULTRET` keeps them all). On error the
    /// error value is left on the stack.
    fn lua_pcall(&self, l: LuaState, nargs: i32, nresults: i32, msgh: i32) -> LuaReturn;

    /// Create a child execution context, pushing its thread object onto
    /// `l`'s stack and returning its handle.
    fn lua_newthread(&self, l: LuaState) -> LuaState;

    /// Start or continue the coroutine `l`. Consumes the top `nargs` values
    /// as (re)entry arguments. `Yield` leaves the yielded values on the
    /// stack; `Ok` leaves the final results; errors leave the error value.
    fn lua_resume(&self, l: LuaState, nargs: i32) -> LuaReturn;

    /// Move the top `n` values from `from` to `to`, preserving order.
    fn lua_xmove(&self, from: LuaState, to: LuaState, n: i32);

    // ------------------------------------------------------------------
    // Stack inspection and manipulation
    // ------------------------------------------------------------------

    /// Index of the topmost value (== number of stack values).
    fn lua_gettop(&self, l: LuaState) -> i32;

    /// Truncate or nil-extend the stack to height `idx`.
    fn lua_settop(&self, l: LuaState, idx: i32);

    /// Remove the value at `idx`, shifting values above it down.
    fn lua_remove(&self, l: LuaState, idx: i32);

    /// Push a copy of the value at `idx`.
    fn lua_pushvalue(&self, l: LuaState, idx: i32);

    /// Type tag of the value at `idx` (`None` if the index is empty).
    fn lua_type(&self, l: LuaState, idx: i32) -> LuaType;

    /// Stable address identifying the value at `idx`, or 0 for value kinds
    /// without identity. Only meaningful for equality comparison.
    fn lua_topointer(&self, l: LuaState, idx: i32) -> usize;

    // ------------------------------------------------------------------
    // Scalars
    // ------------------------------------------------------------------

    /// Push nil.
    fn lua_pushnil(&self, l: LuaState);
    /// Push a boolean.
    fn lua_pushboolean(&self, l: LuaState, b: bool);
    /// Push a number.
    fn lua_pushnumber(&self, l: LuaState, n: f64);
    /// Push a string.
    fn lua_pushstring(&self, l: LuaState, s: &str);

    /// Read the value at `idx` as a boolean (everything except nil and
    /// false is true).
    fn lua_toboolean(&self, l: LuaState, idx: i32) -> bool;

    /// Read the number at `idx`; 0.0 when the value is not a number.
    fn clua_tonumber(&self, l: LuaState, idx: i32) -> f64;

    /// Read the string at `idx`, converting numbers; `None` for other kinds.
    fn clua_tostring(&self, l: LuaState, idx: i32) -> Option<String>;

    // ------------------------------------------------------------------
    // Tables and globals
    // ------------------------------------------------------------------

    /// Push a fresh empty table.
    fn clua_newtable(&self, l: LuaState);

    /// Pop a key, push `t[key]` for the table at `idx`; returns the tag of
    /// the pushed value.
    fn lua_gettable(&self, l: LuaState, idx: i32) -> LuaType;

    /// Pop a value then a key, setting `t[key] = value` for the table at
    /// `idx`.
    fn lua_settable(&self, l: LuaState, idx: i32);

    /// Table traversal step: pop a key and push the next key/value pair of
    /// the table at `idx`. Returns false (pushing nothing) when traversal
    /// is complete. Start traversal by pushing nil.
    fn lua_next(&self, l: LuaState, idx: i32) -> bool;

    /// Push the global `name`; returns its tag.
    fn lua_getglobal(&self, l: LuaState, name: &str) -> LuaType;

    /// Pop a value and bind it to the global `name`.
    fn lua_setglobal(&self, l: LuaState, name: &str);

    // ------------------------------------------------------------------
    // Persistent references
    // ------------------------------------------------------------------

    /// Pop the top value and store it in the table at `t` (normally
    /// [`LUA_REGISTRYINDEX`]) under a fresh integer key, returning that
    /// key. Referencing nil yields [`LUA_REFNIL`].
    fn luaL_ref(&self, l: LuaState, t: i32) -> i32;

    /// Release the reference `ref_id` from the table at `t`. The id may be
    /// reused by a later `luaL_ref`.
    fn luaL_unref(&self, l: LuaState, t: i32, ref_id: i32);

    /// Push `t[ref_id]` for the table at `idx` without consuming anything;
    /// returns the tag of the pushed value.
    fn lua_rawgeti(&self, l: LuaState, idx: i32, ref_id: i32) -> LuaType;

    // ------------------------------------------------------------------
    // Host functions and userdata glue
    // ------------------------------------------------------------------

    /// Register a host callback with the VM module, returning its function
    /// index. Registration is for the lifetime of the module.
    fn clua_addfunction(&self, f: HostFunction) -> u32;

    /// Push the registered host function `fn_index` as a callable value.
    fn clua_pushcfunction(&self, l: LuaState, fn_index: u32);

    /// Push an opaque data block carrying a host object id and a type tag.
    fn clua_newuserdata(&self, l: LuaState, host_id: u32, tag: &str);

    /// Host object id of the userdata at `idx`, or `None` for other kinds.
    fn clua_userdata_id(&self, l: LuaState, idx: i32) -> Option<u32>;

    /// Type tag of the userdata at `idx`, or `None` for other kinds.
    fn clua_userdata_tag(&self, l: LuaState, idx: i32) -> Option<String>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn type_codes_roundtrip() {
        for ty in [
            LuaType::Nil,
            LuaType::Boolean,
            LuaType::Number,
            LuaType::String,
            LuaType::Table,
            LuaType::Function,
            LuaType::Userdata,
            LuaType::Thread,
        ] {
            assert_eq!(LuaType::from_code(ty.code()), ty);
        }
        assert_eq!(LuaType::from_code(-1), LuaType::None);
        assert_eq!(LuaType::from_code(99), LuaType::None);
    }

    #[test]
    fn return_codes_roundtrip() {
        for st in [
            LuaReturn::Ok,
            LuaReturn::Yield,
            LuaReturn::ErrRun,
            LuaReturn::ErrSyntax,
            LuaReturn::ErrMem,
            LuaReturn::ErrErr,
        ] {
            assert_eq!(LuaReturn::from_code(st.code()), st);
        }
        assert!(LuaReturn::Ok.is_ok());
        assert!(!LuaReturn::ErrRun.is_ok());
    }

    #[test]
    fn state_handle_is_transparent() {
        let l = LuaState::from_raw(7);
        assert_eq!(l.raw(), 7);
        assert_eq!(l, LuaState::from_raw(7));
        assert_ne!(l, LuaState::from_raw(8));
    }
}
