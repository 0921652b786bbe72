//! Engine façade and shared state.

use std::any::Any;
use std::path::{Path, PathBuf};
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use parking_lot::Mutex;
use rustc_hash::FxHashMap;

use lunar_abi::{LuaApi, LuaState};

use crate::bridge::PendingCall;
use crate::deferred::Deferred;
use crate::error::EngineError;
use crate::extensions::{default_extensions, ExtensionSlot};
use crate::global::Global;
use crate::refs::RefRegistry;
use crate::value::{LuaError, LuaValue};

/// Construction options.
#[derive(Debug, Clone)]
pub struct EngineOptions {
    /// Load the VM's built-in library set at construction.
    pub open_standard_libs: bool,
    /// Expose host-native constructors (the `Promise` table) to scripts.
    pub inject_objects: bool,
    /// Materialize tables as live write-through proxies instead of one-shot
    /// copies. Mutually exclusive with the error-wrapping extension.
    pub enable_proxy: bool,
}

impl Default for EngineOptions {
    fn default() -> Self {
        Self {
            open_standard_libs: true,
            inject_objects: false,
            enable_proxy: true,
        }
    }
}

// ============================================================================
// Host object slab
// ============================================================================

/// Host objects referenced from VM userdata, keyed by the id written into
/// the userdata block. Entries are pinned for the engine's lifetime.
#[derive(Clone)]
pub(crate) enum HostObject {
    Deferred(Deferred),
    Error(LuaError),
    Opaque { data: Arc<dyn Any>, tag: String },
}

pub(crate) struct HostObjects {
    inner: Mutex<HostObjectsInner>,
}

struct HostObjectsInner {
    entries: FxHashMap<u32, HostObject>,
    next: u32,
}

impl HostObjects {
    fn new() -> Self {
        Self {
            inner: Mutex::new(HostObjectsInner {
                entries: FxHashMap::default(),
                next: 1,
            }),
        }
    }

    pub(crate) fn insert(&self, obj: HostObject) -> u32 {
        let mut inner = self.inner.lock();
        let id = inner.next;
        inner.next += 1;
        inner.entries.insert(id, obj);
        id
    }

    pub(crate) fn get(&self, id: u32) -> Option<HostObject> {
        self.inner.lock().entries.get(&id).cloned()
    }
}

// ============================================================================
// Shared engine state
// ============================================================================

/// State shared by every context, proxy, and extension of one engine.
///
/// Owned strongly by the engine (and by in-flight pending calls); host
/// proxies hold only weak links, so dropping the engine closes the VM
/// state even while proxies are still around — they fail with
/// `ReferenceLifecycle` afterwards instead of keeping the VM alive.
pub(crate) struct EngineShared {
    pub(crate) api: Arc<dyn LuaApi>,
    pub(crate) main: LuaState,
    pub(crate) extensions: Vec<ExtensionSlot>,
    pub(crate) refs: Arc<RefRegistry>,
    pub(crate) host_objects: HostObjects,
    pub(crate) options: EngineOptions,
    closed: Arc<AtomicBool>,
}

impl EngineShared {
    pub(crate) fn is_closed(&self) -> bool {
        self.closed.load(Ordering::Acquire)
    }

    pub(crate) fn close_state(&self) {
        if !self.closed.swap(true, Ordering::AcqRel) {
            self.api.lua_close(self.main);
        }
    }
}

impl Drop for EngineShared {
    fn drop(&mut self) {
        self.close_state();
    }
}

// ============================================================================
// Façade
// ============================================================================

/// The composition root: one embedded VM state plus the value bridge over
/// it.
///
/// One engine is one logical thread of VM execution. Async calls interleave
/// cooperatively at await points; for real parallelism, create another
/// engine over another state.
pub struct LuaEngine {
    global: Global,
}

impl LuaEngine {
    /// Construct the VM state, register the type extensions in priority
    /// order, and optionally open the standard libraries.
    ///
    /// Fails fast with [`EngineError::Construction`] when the primitive
    /// layer reports that no state could be allocated.
    pub fn new(api: Arc<dyn LuaApi>, options: EngineOptions) -> Result<Self, EngineError> {
        let main = api.luaL_newstate().ok_or(EngineError::Construction)?;
        let closed = Arc::new(AtomicBool::new(false));
        let refs = Arc::new(RefRegistry::new(Arc::clone(&api), main, Arc::clone(&closed)));

        let shared = Arc::new(EngineShared {
            api: Arc::clone(&api),
            main,
            extensions: default_extensions(&options),
            refs,
            host_objects: HostObjects::new(),
            options: options.clone(),
            closed,
        });

        if options.open_standard_libs {
            api.luaL_openlibs(main);
        }

        let global = Global::new(shared);
        for slot in &global.thread().shared.extensions {
            slot.ext.open(&global)?;
        }

        Ok(Self { global })
    }

    /// Construct with default options.
    pub fn with_defaults(api: Arc<dyn LuaApi>) -> Result<Self, EngineError> {
        Self::new(api, EngineOptions::default())
    }

    /// The main execution context and globals table.
    pub fn global(&self) -> &Global {
        &self.global
    }

    /// Run `script` to completion on the main context, blocking. Returns
    /// the first result value.
    pub fn do_string_sync(&self, script: &str) -> Result<LuaValue, EngineError> {
        self.global.load_string(script)?;
        let results = self.global.run_sync(0)?;
        Ok(results.into_iter().next().unwrap_or(LuaValue::Nil))
    }

    /// Run the file at `path` to completion on the main context, blocking.
    pub fn do_file_sync(&self, path: &Path) -> Result<LuaValue, EngineError> {
        self.global.load_file(path)?;
        let results = self.global.run_sync(0)?;
        Ok(results.into_iter().next().unwrap_or(LuaValue::Nil))
    }

    /// Run `script` in a dedicated child context, suspending at await
    /// points. Resolves to the chunk's result list; see
    /// [`PendingCall::first`] for the single-value case.
    pub fn do_string(&self, script: &str) -> PendingCall {
        PendingCall::from_text(self.global.thread().clone(), script.to_string())
    }

    /// Run the file at `path` in a dedicated child context, suspending at
    /// await points.
    pub fn do_file(&self, path: &Path) -> PendingCall {
        PendingCall::from_file(self.global.thread().clone(), PathBuf::from(path))
    }
}

impl std::fmt::Debug for LuaEngine {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("LuaEngine").finish_non_exhaustive()
    }
}
