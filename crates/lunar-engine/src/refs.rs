//! Persistent reference registry.
//!
//! A stack value has no identity beyond its position until anchored in the
//! VM registry table. [`LuaRef`] is the scoped-resource form of that
//! anchor: it acquires `luaL_ref` at construction and releases exactly once
//! when the last clone drops (or on explicit [`LuaRef::dispose`]).
//!
//! The registry also keeps a best-effort identity cache keyed by
//! `lua_topointer`, so materializing the same VM table twice hands out the
//! same underlying reference and the two host proxies compare equal.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{Arc, Weak};

use parking_lot::Mutex;
use rustc_hash::{FxHashMap, FxHashSet};

use lunar_abi::{LuaApi, LuaState, LUA_NOREF, LUA_REFNIL, LUA_REGISTRYINDEX};

use crate::error::EngineError;

pub(crate) struct RefRegistry {
    api: Arc<dyn LuaApi>,
    main: LuaState,
    /// Shared with the engine; once set, the state is gone and releases
    /// become bookkeeping-only.
    closed: Arc<AtomicBool>,
    live: Mutex<FxHashSet<i32>>,
    by_ptr: Mutex<FxHashMap<usize, Weak<RefInner>>>,
}

impl RefRegistry {
    pub(crate) fn new(api: Arc<dyn LuaApi>, main: LuaState, closed: Arc<AtomicBool>) -> Self {
        Self {
            api,
            main,
            closed,
            live: Mutex::new(FxHashSet::default()),
            by_ptr: Mutex::new(FxHashMap::default()),
        }
    }

    /// Anchor the value at the top of `l`'s stack, consuming it.
    ///
    /// If a live reference to the same VM value exists (by pointer
    /// identity), it is shared instead of creating a second registry slot.
    pub(crate) fn create_ref(self: &Arc<Self>, l: LuaState) -> Result<LuaRef, EngineError> {
        let ptr = self.api.lua_topointer(l, -1);
        if ptr != 0 {
            let existing = self.by_ptr.lock().get(&ptr).and_then(Weak::upgrade);
            if let Some(inner) = existing {
                // Reference contract: the stack value is consumed either way.
                let top = self.api.lua_gettop(l);
                self.api.lua_settop(l, top - 1);
                return Ok(LuaRef { inner });
            }
        }

        let id = self.api.luaL_ref(l, LUA_REGISTRYINDEX);
        if id == LUA_REFNIL || id == LUA_NOREF {
            return Err(EngineError::Type(
                "cannot create a persistent reference to nil".into(),
            ));
        }
        self.live.lock().insert(id);
        let inner = Arc::new(RefInner {
            id,
            ptr,
            released: AtomicBool::new(false),
            registry: Arc::clone(self),
        });
        if ptr != 0 {
            self.by_ptr.lock().insert(ptr, Arc::downgrade(&inner));
        }
        Ok(LuaRef { inner })
    }

    /// Push the referenced value onto `l`'s stack without consuming the
    /// reference.
    pub(crate) fn push_ref(&self, l: LuaState, r: &LuaRef) -> Result<(), EngineError> {
        if r.inner.released.load(Ordering::Acquire) {
            return Err(EngineError::ReferenceLifecycle(format!(
                "reference {} was already released",
                r.inner.id
            )));
        }
        if self.closed.load(Ordering::Acquire) {
            return Err(EngineError::ReferenceLifecycle(
                "reference used after its Lua state was closed".into(),
            ));
        }
        self.api.lua_rawgeti(l, LUA_REGISTRYINDEX, r.inner.id);
        Ok(())
    }

    /// Number of live persistent references, for leak accounting.
    pub(crate) fn live_count(&self) -> usize {
        self.live.lock().len()
    }

    fn release(&self, id: i32, ptr: usize) {
        if ptr != 0 {
            self.by_ptr.lock().remove(&ptr);
        }
        self.live.lock().remove(&id);
        if !self.closed.load(Ordering::Acquire) {
            self.api.luaL_unref(self.main, LUA_REGISTRYINDEX, id);
        }
    }
}

struct RefInner {
    id: i32,
    ptr: usize,
    released: AtomicBool,
    registry: Arc<RefRegistry>,
}

impl Drop for RefInner {
    fn drop(&mut self) {
        if !self.released.swap(true, Ordering::AcqRel) {
            self.registry.release(self.id, self.ptr);
        }
    }
}

/// A persistent reference to one VM value.
///
/// Clones share the same registry slot; the slot is released when the last
/// clone drops. Every ref-backed host proxy owns exactly one of these.
#[derive(Clone)]
pub struct LuaRef {
    inner: Arc<RefInner>,
}

impl LuaRef {
    /// The registry id backing this reference.
    pub fn id(&self) -> i32 {
        self.inner.id
    }

    /// Release the underlying registry slot now instead of at drop.
    ///
    /// Releasing twice — or releasing while other clones still expect the
    /// slot — is the programming error the single-release discipline
    /// exists to catch, and fails with `ReferenceLifecycle`.
    pub fn dispose(&self) -> Result<(), EngineError> {
        if self.inner.released.swap(true, Ordering::AcqRel) {
            return Err(EngineError::ReferenceLifecycle(format!(
                "reference {} released twice",
                self.inner.id
            )));
        }
        self.inner.registry.release(self.inner.id, self.inner.ptr);
        Ok(())
    }
}

impl PartialEq for LuaRef {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }
}

impl std::fmt::Debug for LuaRef {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "LuaRef({})", self.inner.id)
    }
}
