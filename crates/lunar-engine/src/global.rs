//! The main execution context.

use std::ops::Deref;
use std::sync::Arc;

use crate::engine::EngineShared;
use crate::error::EngineError;
use crate::thread::Thread;
use crate::value::LuaValue;

/// The main context created with the engine. Dereferences to [`Thread`]
/// and adds globals access and state lifecycle.
pub struct Global {
    thread: Thread,
}

impl Global {
    pub(crate) fn new(shared: Arc<EngineShared>) -> Self {
        let main = shared.main;
        Self {
            thread: Thread::new(shared, main),
        }
    }

    pub(crate) fn thread(&self) -> &Thread {
        &self.thread
    }

    /// Read the global `name` as a host value.
    pub fn get(&self, name: &str) -> Result<LuaValue, EngineError> {
        self.thread.api().lua_getglobal(self.thread.state(), name);
        let value = self.thread.value_at(-1);
        self.thread.pop(1);
        value
    }

    /// Bind the global `name` to a host value.
    pub fn set(&self, name: &str, value: &LuaValue) -> Result<(), EngineError> {
        self.thread.push(value)?;
        self.thread.api().lua_setglobal(self.thread.state(), name);
        Ok(())
    }

    /// Number of live persistent references held by host proxies.
    pub fn live_references(&self) -> usize {
        self.thread.shared.refs.live_count()
    }

    /// Close the underlying VM state now instead of at engine drop.
    ///
    /// Any context or proxy use after this fails fast; closing twice is a
    /// no-op.
    pub fn close(&self) {
        self.thread.shared.close_state();
    }
}

impl Deref for Global {
    type Target = Thread;

    fn deref(&self) -> &Thread {
        &self.thread
    }
}

impl std::fmt::Debug for Global {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "Global({:?})", self.thread)
    }
}
