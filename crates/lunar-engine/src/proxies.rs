//! Ref-backed host proxies.
//!
//! Proxies give VM values stable identity and lifetime on the host side.
//! Each one owns a [`LuaRef`] acquired at construction and holds only a
//! weak link to its engine: a proxy outliving its engine fails with
//! `ReferenceLifecycle` instead of keeping the VM state alive.

use std::sync::{Arc, Weak};

use crate::engine::EngineShared;
use crate::error::EngineError;
use crate::refs::LuaRef;
use crate::thread::Thread;
use crate::value::LuaValue;

fn upgrade(shared: &Weak<EngineShared>) -> Result<Arc<EngineShared>, EngineError> {
    shared.upgrade().ok_or_else(|| {
        EngineError::ReferenceLifecycle("proxy used after its engine was dropped".into())
    })
}

// ============================================================================
// Function proxy
// ============================================================================

/// A callable proxy of a VM function.
///
/// Calling re-enters the VM through the stored persistent reference, so the
/// proxy keeps working after the stack frame that produced it is gone.
#[derive(Clone)]
pub struct LuaFunction {
    shared: Weak<EngineShared>,
    lref: LuaRef,
}

impl LuaFunction {
    pub(crate) fn new(shared: Weak<EngineShared>, lref: LuaRef) -> Self {
        Self { shared, lref }
    }

    pub(crate) fn lref(&self) -> &LuaRef {
        &self.lref
    }

    /// Release the underlying persistent reference now. Releasing twice is
    /// a `ReferenceLifecycle` error.
    pub fn dispose(&self) -> Result<(), EngineError> {
        self.lref.dispose()
    }

    /// Call the function with `args`, blocking, returning all results.
    pub fn call(&self, args: &[LuaValue]) -> Result<Vec<LuaValue>, EngineError> {
        let shared = upgrade(&self.shared)?;
        let thread = Thread::new(Arc::clone(&shared), shared.main);
        let base = thread.top();

        let pushed = (|| {
            shared.refs.push_ref(thread.state(), &self.lref)?;
            for arg in args {
                thread.push(arg)?;
            }
            Ok(())
        })();
        if let Err(e) = pushed {
            thread.set_top(base);
            return Err(e);
        }

        thread.run_sync(args.len() as i32)
    }
}

impl PartialEq for LuaFunction {
    fn eq(&self, other: &Self) -> bool {
        self.lref == other.lref
    }
}

impl std::fmt::Debug for LuaFunction {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LuaFunction({:?})", self.lref)
    }
}

// ============================================================================
// Table proxy
// ============================================================================

/// A live view of a VM table.
///
/// Reads and writes go through the VM, so host-side mutations are visible
/// to scripts and vice versa. Two proxies of the same VM table share one
/// persistent reference and compare equal.
#[derive(Clone)]
pub struct LuaTableProxy {
    shared: Weak<EngineShared>,
    lref: LuaRef,
}

impl LuaTableProxy {
    pub(crate) fn new(shared: Weak<EngineShared>, lref: LuaRef) -> Self {
        Self { shared, lref }
    }

    pub(crate) fn lref(&self) -> &LuaRef {
        &self.lref
    }

    /// Release the underlying persistent reference now. Releasing twice is
    /// a `ReferenceLifecycle` error.
    pub fn dispose(&self) -> Result<(), EngineError> {
        self.lref.dispose()
    }

    /// Read `table[key]`.
    pub fn get(&self, key: &LuaValue) -> Result<LuaValue, EngineError> {
        self.with_table(|thread, table_idx| {
            thread.push(key)?;
            thread.api().lua_gettable(thread.state(), table_idx);
            thread.value_at(-1)
        })
    }

    /// Write `table[key] = value`.
    pub fn set(&self, key: &LuaValue, value: &LuaValue) -> Result<(), EngineError> {
        self.with_table(|thread, table_idx| {
            thread.push(key)?;
            thread.push(value)?;
            thread.api().lua_settable(thread.state(), table_idx);
            Ok(())
        })
    }

    /// Number of entries, counted by traversal.
    pub fn len(&self) -> Result<usize, EngineError> {
        self.with_table(|thread, table_idx| {
            let l = thread.state();
            let mut count = 0;
            thread.api().lua_pushnil(l);
            while thread.api().lua_next(l, table_idx) {
                count += 1;
                thread.pop(1); // drop the value, keep the key
            }
            Ok(count)
        })
    }

    /// Whether the table has no entries.
    pub fn is_empty(&self) -> Result<bool, EngineError> {
        Ok(self.len()? == 0)
    }

    fn with_table<T>(
        &self,
        body: impl FnOnce(&Thread, i32) -> Result<T, EngineError>,
    ) -> Result<T, EngineError> {
        let shared = upgrade(&self.shared)?;
        let thread = Thread::new(Arc::clone(&shared), shared.main);
        let base = thread.top();
        shared.refs.push_ref(thread.state(), &self.lref)?;
        let result = body(&thread, base + 1);
        thread.set_top(base);
        result
    }
}

impl PartialEq for LuaTableProxy {
    fn eq(&self, other: &Self) -> bool {
        self.lref == other.lref
    }
}

impl std::fmt::Debug for LuaTableProxy {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LuaTableProxy({:?})", self.lref)
    }
}
