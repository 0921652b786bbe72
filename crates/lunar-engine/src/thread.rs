//! Execution contexts.
//!
//! A [`Thread`] is a cheap handle to one VM execution context: the main
//! context created with the engine, or a coroutine-like child created for
//! an async call. It owns no VM memory itself; everything lives behind the
//! engine's shared state.
//!
//! Stack discipline: every public operation leaves the stack height where
//! it found it, except for documented return values that the caller must
//! immediately consume or move.

use std::path::Path;
use std::sync::Arc;

use lunar_abi::{LuaReturn, LuaState, LuaType, LUA_MULTRET, LUA_REGISTRYINDEX};

use crate::engine::EngineShared;
use crate::error::EngineError;
use crate::value::LuaValue;

/// Result of driving a coroutine one step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ResumeOutcome {
    /// The context returned; its results are on its stack for the caller
    /// to consume or move.
    Completed {
        /// Number of result values left on the stack.
        nresults: i32,
    },
    /// The context suspended; its yielded values are on its stack.
    Yielded {
        /// Number of yielded values left on the stack.
        nvalues: i32,
    },
}

/// Handle to one VM execution context.
#[derive(Clone)]
pub struct Thread {
    pub(crate) shared: Arc<EngineShared>,
    address: LuaState,
}

impl Thread {
    pub(crate) fn new(shared: Arc<EngineShared>, address: LuaState) -> Self {
        Self { shared, address }
    }

    /// The underlying state handle.
    ///
    /// Using a context after its engine was closed is a programming error
    /// and fails fast.
    pub fn state(&self) -> LuaState {
        assert!(
            !self.shared.is_closed(),
            "Lua execution context used after its state was closed"
        );
        self.address
    }

    pub(crate) fn is_closed(&self) -> bool {
        self.shared.is_closed()
    }

    pub(crate) fn api(&self) -> &dyn lunar_abi::LuaApi {
        self.shared.api.as_ref()
    }

    // ------------------------------------------------------------------
    // Stack manipulation
    // ------------------------------------------------------------------

    /// Current stack height.
    pub fn top(&self) -> i32 {
        self.api().lua_gettop(self.state())
    }

    /// Truncate or nil-extend the stack to height `n`.
    pub fn set_top(&self, n: i32) {
        self.api().lua_settop(self.state(), n);
    }

    /// Pop `n` values.
    pub fn pop(&self, n: i32) {
        let top = self.top();
        self.set_top(top - n);
    }

    /// Remove the value at `index`, shifting the values above it down.
    pub fn remove(&self, index: i32) {
        self.api().lua_remove(self.state(), index);
    }

    /// Type tag of the value at `index`.
    pub fn type_at(&self, index: i32) -> LuaType {
        self.api().lua_type(self.state(), index)
    }

    /// Resolve a possibly-negative index to an absolute one. Pseudo-indices
    /// pass through.
    pub(crate) fn abs_index(&self, index: i32) -> i32 {
        if index > 0 || index <= LUA_REGISTRYINDEX {
            index
        } else {
            self.top() + index + 1
        }
    }

    /// Move the top `n` values of this context onto `to`, preserving order.
    pub fn move_values(&self, to: &Thread, n: i32) {
        self.api().lua_xmove(self.state(), to.state(), n);
    }

    // ------------------------------------------------------------------
    // Loading
    // ------------------------------------------------------------------

    /// Compile `source` and push the chunk as a function.
    pub fn load_string(&self, source: &str) -> Result<(), EngineError> {
        let status = self.api().luaL_loadstring(self.state(), source);
        self.check_load(status)
    }

    /// Load an in-memory buffer under an explicit chunk name.
    pub fn load_buffer(&self, bytes: &[u8], chunk_name: &str) -> Result<(), EngineError> {
        let status = self.api().luaL_loadbufferx(self.state(), bytes, chunk_name);
        self.check_load(status)
    }

    /// Read `path` host-side and load its contents.
    pub fn load_file(&self, path: &Path) -> Result<(), EngineError> {
        let bytes = std::fs::read(path)?;
        let chunk_name = format!("@{}", path.display());
        self.load_buffer(&bytes, &chunk_name)
    }

    fn check_load(&self, status: LuaReturn) -> Result<(), EngineError> {
        if status.is_ok() {
            Ok(())
        } else {
            Err(self.pop_error(status))
        }
    }

    // ------------------------------------------------------------------
    // Execution
    // ------------------------------------------------------------------

    /// Protected call of the function at the top of the stack with the
    /// `nargs` values pushed before it. Blocks until completion and
    /// returns the materialized results; the stack is restored to its
    /// pre-push height on success and failure alike.
    pub fn run_sync(&self, nargs: i32) -> Result<Vec<LuaValue>, EngineError> {
        let l = self.state();
        let base = self.top() - nargs - 1;
        let status = self.api().lua_pcall(l, nargs, LUA_MULTRET, 0);
        if !status.is_ok() {
            return Err(self.pop_error(status));
        }
        let nresults = self.top() - base;
        let result = self.collect_values(base, nresults);
        self.set_top(base);
        result
    }

    /// Start or continue this context as a coroutine, consuming the top
    /// `nargs` stack values as (re)entry arguments.
    pub fn resume(&self, nargs: i32) -> Result<ResumeOutcome, EngineError> {
        let status = self.api().lua_resume(self.state(), nargs);
        match status {
            LuaReturn::Ok => Ok(ResumeOutcome::Completed {
                nresults: self.top(),
            }),
            LuaReturn::Yield => Ok(ResumeOutcome::Yielded {
                nvalues: self.top(),
            }),
            other => Err(self.pop_error(other)),
        }
    }

    /// Allocate a child execution context. The child's thread object is
    /// left on this context's stack; its index is returned alongside so
    /// the caller can later remove it.
    pub fn new_thread(&self) -> (Thread, i32) {
        let child = self.api().lua_newthread(self.state());
        let index = self.top();
        (Thread::new(Arc::clone(&self.shared), child), index)
    }

    /// Materialize the error value on top of the stack, popping it.
    pub(crate) fn pop_error(&self, status: LuaReturn) -> EngineError {
        let value = match self.value_at(-1) {
            Ok(v) => v,
            Err(e) => return e,
        };
        self.pop(1);
        match status {
            LuaReturn::ErrSyntax => EngineError::Load { value },
            _ => EngineError::Runtime { value },
        }
    }

    /// Materialize `count` values sitting above `base` without popping them.
    pub(crate) fn collect_values(
        &self,
        base: i32,
        count: i32,
    ) -> Result<Vec<LuaValue>, EngineError> {
        let mut out = Vec::with_capacity(count.max(0) as usize);
        for i in 1..=count {
            out.push(self.value_at(base + i)?);
        }
        Ok(out)
    }

    // ------------------------------------------------------------------
    // Value bridge
    // ------------------------------------------------------------------

    /// Materialize the stack value at `index` as a host value.
    ///
    /// Extensions are consulted in ascending priority order; the first
    /// recognizer that claims the value converts it. Unclaimed values fall
    /// back to scalar conversion, or to an opaque anchored reference for
    /// kinds without a scalar rendering.
    pub fn value_at(&self, index: i32) -> Result<LuaValue, EngineError> {
        let index = self.abs_index(index);
        for slot in &self.shared.extensions {
            if slot.ext.matches(self, index) {
                return slot.ext.get_value(self, index);
            }
        }

        let l = self.state();
        match self.type_at(index) {
            LuaType::None | LuaType::Nil => Ok(LuaValue::Nil),
            LuaType::Boolean => Ok(LuaValue::Boolean(self.api().lua_toboolean(l, index))),
            LuaType::Number => Ok(LuaValue::Number(self.api().clua_tonumber(l, index))),
            LuaType::String => {
                let s = self.api().clua_tostring(l, index).ok_or_else(|| {
                    EngineError::Type("string value vanished during conversion".into())
                })?;
                Ok(LuaValue::String(s))
            }
            other => {
                // No scalar rendering: anchor the value and hand out an
                // opaque reference the userdata extension can push back.
                self.api().lua_pushvalue(l, index);
                let lref = self.shared.refs.create_ref(l)?;
                Ok(LuaValue::Userdata(crate::value::LuaUserdata::new(
                    other.name(),
                    Arc::new(lref),
                )))
            }
        }
    }

    /// Push a host value onto this context's stack.
    pub fn push(&self, value: &LuaValue) -> Result<(), EngineError> {
        let l = self.state();
        match value {
            LuaValue::Nil => {
                self.api().lua_pushnil(l);
                Ok(())
            }
            LuaValue::Boolean(b) => {
                self.api().lua_pushboolean(l, *b);
                Ok(())
            }
            LuaValue::Number(n) => {
                self.api().lua_pushnumber(l, *n);
                Ok(())
            }
            LuaValue::String(s) => {
                self.api().lua_pushstring(l, s);
                Ok(())
            }
            other => {
                // A compound push can fail mid-way (after clua_newtable and
                // some element pushes); roll the stack back so no error path
                // changes the observable height.
                let base = self.top();
                for slot in &self.shared.extensions {
                    match slot.ext.push_value(self, other) {
                        Ok(true) => return Ok(()),
                        Ok(false) => {}
                        Err(e) => {
                            self.set_top(base);
                            return Err(e);
                        }
                    }
                }
                Err(EngineError::Type(format!(
                    "no type extension accepts a {} value",
                    other.kind_name()
                )))
            }
        }
    }
}

impl std::fmt::Debug for Thread {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Thread({:#x})", self.address.raw())
    }
}
