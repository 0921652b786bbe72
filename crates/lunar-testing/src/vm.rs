//! An in-memory miniature VM implementing the full primitive catalogue.
//!
//! `MiniLua` keeps every root state's stacks, tables, globals, and
//! registry in plain Rust collections behind a `RefCell`, taking only
//! short borrows so host callbacks can re-enter the API mid-call. It is a
//! test double, not a real interpreter: scripts run through the
//! `eval` module's miniature language, and identity pointers are
//! synthesized from object ids.

use std::cell::{Cell, RefCell};
use std::rc::Rc;

use rustc_hash::FxHashMap;

use lunar_abi::{
    HostFunction, LuaApi, LuaReturn, LuaState, LuaType, LUA_REFNIL, LUA_REGISTRYINDEX,
};

use crate::eval::{self, type_name, Coroutine, Program, Run};

// ============================================================================
// Values and records
// ============================================================================

/// A VM-internal value. Compound kinds hold ids into the VM's object maps,
/// so equality is identity for them and structural for scalars.
#[derive(Debug, Clone, PartialEq)]
pub(crate) enum Value {
    Nil,
    Boolean(bool),
    Number(f64),
    Str(String),
    Table(u32),
    Function(u32),
    Userdata(u32),
    Thread(u64),
}

#[derive(Clone)]
pub(crate) enum FuncRec {
    Builtin(Builtin),
    Host(u32),
    Chunk {
        params: Vec<String>,
        body: Rc<Program>,
    },
}

#[derive(Debug, Clone, Copy)]
pub(crate) enum Builtin {
    Error,
    Type,
}

struct UserdataRec {
    host_id: u32,
    tag: String,
}

struct StateRec {
    root: u32,
    stack: Vec<Value>,
    exec: Option<Coroutine>,
}

impl StateRec {
    /// Resolve a stack index to a vector offset. Pseudo-indices and
    /// out-of-range indices resolve to `None`.
    fn offset(&self, idx: i32) -> Option<usize> {
        let len = self.stack.len() as i32;
        let abs = if idx > 0 {
            idx
        } else if idx <= LUA_REGISTRYINDEX {
            return None;
        } else {
            len + idx + 1
        };
        if abs >= 1 && abs <= len {
            Some((abs - 1) as usize)
        } else {
            None
        }
    }

    fn at(&self, idx: i32) -> Value {
        match self.offset(idx) {
            Some(o) => self.stack[o].clone(),
            None => Value::Nil,
        }
    }
}

struct RootRec {
    globals: FxHashMap<String, Value>,
    registry: FxHashMap<i32, Value>,
    free_refs: Vec<i32>,
    next_ref: i32,
}

#[derive(Default)]
struct VmInner {
    states: FxHashMap<u64, StateRec>,
    roots: FxHashMap<u32, RootRec>,
    tables: FxHashMap<u32, Vec<(Value, Value)>>,
    userdata: FxHashMap<u32, UserdataRec>,
    functions: FxHashMap<u32, FuncRec>,
    host_fns: FxHashMap<u32, HostFunction>,
    next_state: u64,
    next_root: u32,
    next_table: u32,
    next_userdata: u32,
    next_function: u32,
    next_host_fn: u32,
}

impl VmInner {
    fn state_mut(&mut self, l: LuaState) -> Option<&mut StateRec> {
        self.states.get_mut(&l.raw())
    }

    fn state(&self, l: LuaState) -> Option<&StateRec> {
        self.states.get(&l.raw())
    }
}

// ============================================================================
// The VM
// ============================================================================

/// The in-memory test VM.
pub struct MiniLua {
    inner: RefCell<VmInner>,
    fail_alloc: Cell<bool>,
}

impl Default for MiniLua {
    fn default() -> Self {
        Self::new()
    }
}

impl MiniLua {
    pub fn new() -> Self {
        Self {
            inner: RefCell::new(VmInner::default()),
            fail_alloc: Cell::new(false),
        }
    }

    /// Make the next `luaL_newstate` report allocation failure.
    pub fn fail_allocations(&self) {
        self.fail_alloc.set(true);
    }

    /// Total number of live registry anchors across every root state.
    pub fn registry_len(&self) -> usize {
        self.inner
            .borrow()
            .roots
            .values()
            .map(|r| r.registry.len())
            .sum()
    }

    /// Number of live root states.
    pub fn root_count(&self) -> usize {
        self.inner.borrow().roots.len()
    }

    // ------------------------------------------------------------------
    // Internals shared with the evaluator
    // ------------------------------------------------------------------

    fn alloc_state(&self, root: u32) -> u64 {
        let mut inner = self.inner.borrow_mut();
        inner.next_state += 1;
        let id = inner.next_state;
        inner.states.insert(
            id,
            StateRec {
                root,
                stack: Vec::new(),
                exec: None,
            },
        );
        id
    }

    pub(crate) fn alloc_table(&self, entries: Vec<(Value, Value)>) -> u32 {
        let mut inner = self.inner.borrow_mut();
        inner.next_table += 1;
        let id = inner.next_table;
        inner.tables.insert(id, entries);
        id
    }

    pub(crate) fn alloc_function(&self, rec: FuncRec) -> u32 {
        let mut inner = self.inner.borrow_mut();
        inner.next_function += 1;
        let id = inner.next_function;
        inner.functions.insert(id, rec);
        id
    }

    pub(crate) fn func_rec(&self, fid: u32) -> Option<FuncRec> {
        self.inner.borrow().functions.get(&fid).cloned()
    }

    pub(crate) fn table_get(&self, tid: u32, key: &Value) -> Value {
        self.inner
            .borrow()
            .tables
            .get(&tid)
            .and_then(|entries| {
                entries
                    .iter()
                    .find(|(k, _)| k == key)
                    .map(|(_, v)| v.clone())
            })
            .unwrap_or(Value::Nil)
    }

    pub(crate) fn table_set(&self, tid: u32, key: Value, value: Value) {
        let mut inner = self.inner.borrow_mut();
        let Some(entries) = inner.tables.get_mut(&tid) else {
            return;
        };
        if matches!(value, Value::Nil) {
            entries.retain(|(k, _)| *k != key);
            return;
        }
        if let Some(slot) = entries.iter_mut().find(|(k, _)| *k == key) {
            slot.1 = value;
        } else {
            entries.push((key, value));
        }
    }

    pub(crate) fn get_global_value(&self, root: u32, name: &str) -> Value {
        self.inner
            .borrow()
            .roots
            .get(&root)
            .and_then(|r| r.globals.get(name).cloned())
            .unwrap_or(Value::Nil)
    }

    pub(crate) fn set_global_value(&self, root: u32, name: &str, value: Value) {
        let mut inner = self.inner.borrow_mut();
        let Some(rec) = inner.roots.get_mut(&root) else {
            return;
        };
        if matches!(value, Value::Nil) {
            rec.globals.remove(name);
        } else {
            rec.globals.insert(name.to_string(), value);
        }
    }

    /// Run a host callback with a dedicated frame state whose stack holds
    /// exactly the call arguments. The callback's return count selects the
    /// topmost frame values as results.
    pub(crate) fn call_host(
        &self,
        root: u32,
        host_id: u32,
        args: Vec<Value>,
    ) -> Result<Vec<Value>, Value> {
        let f = self
            .inner
            .borrow()
            .host_fns
            .get(&host_id)
            .cloned()
            .ok_or_else(|| Value::Str("attempt to call an unregistered host function".into()))?;

        let frame = self.alloc_state(root);
        if let Some(st) = self.inner.borrow_mut().states.get_mut(&frame) {
            st.stack = args;
        }

        // Borrow released: the callback may re-enter any primitive.
        let outcome = f(self, LuaState::from_raw(frame));

        let frame_stack = self
            .inner
            .borrow_mut()
            .states
            .remove(&frame)
            .map(|s| s.stack)
            .unwrap_or_default();
        match outcome {
            Ok(n) => {
                let keep = (n.max(0) as usize).min(frame_stack.len());
                let skip = frame_stack.len() - keep;
                Ok(frame_stack.into_iter().skip(skip).collect())
            }
            Err(message) => Err(Value::Str(message)),
        }
    }
}

fn tag_of(v: &Value) -> LuaType {
    match v {
        Value::Nil => LuaType::Nil,
        Value::Boolean(_) => LuaType::Boolean,
        Value::Number(_) => LuaType::Number,
        Value::Str(_) => LuaType::String,
        Value::Table(_) => LuaType::Table,
        Value::Function(_) => LuaType::Function,
        Value::Userdata(_) => LuaType::Userdata,
        Value::Thread(_) => LuaType::Thread,
    }
}

/// Render a number the way the VM's tostring does: integral values print
/// without a fractional part.
pub(crate) fn fmt_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

// ============================================================================
// Primitive catalogue
// ============================================================================

impl LuaApi for MiniLua {
    fn luaL_newstate(&self) -> Option<LuaState> {
        if self.fail_alloc.get() {
            self.fail_alloc.set(false);
            return None;
        }
        let root = {
            let mut inner = self.inner.borrow_mut();
            inner.next_root += 1;
            let root = inner.next_root;
            inner.roots.insert(
                root,
                RootRec {
                    globals: FxHashMap::default(),
                    registry: FxHashMap::default(),
                    free_refs: Vec::new(),
                    next_ref: 1,
                },
            );
            root
        };
        Some(LuaState::from_raw(self.alloc_state(root)))
    }

    fn lua_close(&self, l: LuaState) {
        let mut inner = self.inner.borrow_mut();
        let Some(root) = inner.state(l).map(|s| s.root) else {
            return;
        };
        inner.states.retain(|_, s| s.root != root);
        inner.roots.remove(&root);
    }

    fn luaL_openlibs(&self, l: LuaState) {
        let root = match self.inner.borrow().state(l) {
            Some(s) => s.root,
            None => return,
        };
        let error_fn = self.alloc_function(FuncRec::Builtin(Builtin::Error));
        let type_fn = self.alloc_function(FuncRec::Builtin(Builtin::Type));
        self.set_global_value(root, "error", Value::Function(error_fn));
        self.set_global_value(root, "type", Value::Function(type_fn));
    }

    fn luaL_loadstring(&self, l: LuaState, source: &str) -> LuaReturn {
        self.luaL_loadbufferx(l, source.as_bytes(), "[string]")
    }

    fn luaL_loadbufferx(&self, l: LuaState, bytes: &[u8], chunk_name: &str) -> LuaReturn {
        let parsed = match std::str::from_utf8(bytes) {
            Ok(source) => eval::parse(source),
            Err(_) => Err("source is not valid UTF-8".into()),
        };
        match parsed {
            Ok(program) => {
                let fid = self.alloc_function(FuncRec::Chunk {
                    params: Vec::new(),
                    body: Rc::new(program),
                });
                if let Some(st) = self.inner.borrow_mut().state_mut(l) {
                    st.stack.push(Value::Function(fid));
                }
                LuaReturn::Ok
            }
            Err(message) => {
                if let Some(st) = self.inner.borrow_mut().state_mut(l) {
                    st.stack.push(Value::Str(format!("{chunk_name}: {message}")));
                }
                LuaReturn::ErrSyntax
            }
        }
    }

    fn lua_pcall(&self, l: LuaState, nargs: i32, _nresults: i32, _msgh: i32) -> LuaReturn {
        let (root, func, args) = {
            let mut inner = self.inner.borrow_mut();
            let Some(st) = inner.state_mut(l) else {
                return LuaReturn::ErrRun;
            };
            let n = (nargs.max(0) as usize).min(st.stack.len());
            let args = st.stack.split_off(st.stack.len() - n);
            let func = st.stack.pop().unwrap_or(Value::Nil);
            (st.root, func, args)
        };

        let outcome = match func {
            Value::Function(fid) => eval::call_function(self, root, fid, args),
            other => Err(Value::Str(format!(
                "attempt to call a {} value",
                type_name(&other)
            ))),
        };

        let mut inner = self.inner.borrow_mut();
        let Some(st) = inner.state_mut(l) else {
            return LuaReturn::ErrRun;
        };
        match outcome {
            Ok(results) => {
                st.stack.extend(results);
                LuaReturn::Ok
            }
            Err(v) => {
                st.stack.push(v);
                LuaReturn::ErrRun
            }
        }
    }

    fn lua_newthread(&self, l: LuaState) -> LuaState {
        let root = self
            .inner
            .borrow()
            .state(l)
            .map(|s| s.root)
            .unwrap_or_default();
        let child = self.alloc_state(root);
        if let Some(st) = self.inner.borrow_mut().state_mut(l) {
            st.stack.push(Value::Thread(child));
        }
        LuaState::from_raw(child)
    }

    fn lua_resume(&self, l: LuaState, nargs: i32) -> LuaReturn {
        enum Entry {
            Start(Coroutine),
            Continue(Coroutine, Vec<Value>),
            Broken(Value),
        }

        let (root, entry) = {
            let mut inner = self.inner.borrow_mut();
            let Some(st) = inner.state_mut(l) else {
                return LuaReturn::ErrRun;
            };
            let root = st.root;
            let n = (nargs.max(0) as usize).min(st.stack.len());
            let args = st.stack.split_off(st.stack.len() - n);
            let entry = if let Some(co) = st.exec.take() {
                st.stack.clear();
                Entry::Continue(co, args)
            } else {
                let func = st.stack.pop();
                st.stack.clear();
                let fid = match func {
                    Some(Value::Function(fid)) => Some(fid),
                    other => {
                        let kind = other.as_ref().map(type_name).unwrap_or("no");
                        st.stack
                            .push(Value::Str(format!("attempt to resume a {kind} value")));
                        None
                    }
                };
                match fid {
                    None => Entry::Broken(Value::Nil),
                    Some(fid) => match inner.functions.get(&fid).cloned() {
                        Some(FuncRec::Chunk { params, body }) => {
                            Entry::Start(Coroutine::new(body, &params, args))
                        }
                        _ => Entry::Broken(Value::Str(
                            "only chunk functions can run as coroutines".into(),
                        )),
                    },
                }
            };
            (root, entry)
        };

        let (mut co, args) = match entry {
            Entry::Start(co) => (co, Vec::new()),
            Entry::Continue(co, args) => (co, args),
            Entry::Broken(v) => {
                if !matches!(v, Value::Nil) {
                    if let Some(st) = self.inner.borrow_mut().state_mut(l) {
                        st.stack.push(v);
                    }
                }
                return LuaReturn::ErrRun;
            }
        };

        // Borrow released: statements may call back into the host.
        let run = co.resume(self, root, args);

        let mut inner = self.inner.borrow_mut();
        let Some(st) = inner.state_mut(l) else {
            return LuaReturn::ErrRun;
        };
        match run {
            Ok(Run::Yielded(v)) => {
                st.stack = vec![v];
                st.exec = Some(co);
                LuaReturn::Yield
            }
            Ok(Run::Done(vs)) => {
                st.stack = vs;
                LuaReturn::Ok
            }
            Err(v) => {
                st.stack = vec![v];
                LuaReturn::ErrRun
            }
        }
    }

    fn lua_xmove(&self, from: LuaState, to: LuaState, n: i32) {
        let mut inner = self.inner.borrow_mut();
        let moved = match inner.state_mut(from) {
            Some(st) => {
                let n = (n.max(0) as usize).min(st.stack.len());
                st.stack.split_off(st.stack.len() - n)
            }
            None => return,
        };
        if let Some(st) = inner.state_mut(to) {
            st.stack.extend(moved);
        }
    }

    fn lua_gettop(&self, l: LuaState) -> i32 {
        self.inner
            .borrow()
            .state(l)
            .map(|s| s.stack.len() as i32)
            .unwrap_or(0)
    }

    fn lua_settop(&self, l: LuaState, idx: i32) {
        let mut inner = self.inner.borrow_mut();
        let Some(st) = inner.state_mut(l) else {
            return;
        };
        let len = st.stack.len() as i32;
        let target = if idx >= 0 { idx } else { len + idx + 1 };
        let target = target.max(0) as usize;
        st.stack.resize(target, Value::Nil);
    }

    fn lua_remove(&self, l: LuaState, idx: i32) {
        let mut inner = self.inner.borrow_mut();
        let Some(st) = inner.state_mut(l) else {
            return;
        };
        if let Some(o) = st.offset(idx) {
            st.stack.remove(o);
        }
    }

    fn lua_pushvalue(&self, l: LuaState, idx: i32) {
        let mut inner = self.inner.borrow_mut();
        let Some(st) = inner.state_mut(l) else {
            return;
        };
        let v = st.at(idx);
        st.stack.push(v);
    }

    fn lua_type(&self, l: LuaState, idx: i32) -> LuaType {
        let inner = self.inner.borrow();
        match inner.state(l) {
            Some(st) => match st.offset(idx) {
                Some(o) => tag_of(&st.stack[o]),
                None => LuaType::None,
            },
            None => LuaType::None,
        }
    }

    fn lua_topointer(&self, l: LuaState, idx: i32) -> usize {
        let inner = self.inner.borrow();
        let Some(st) = inner.state(l) else {
            return 0;
        };
        match st.at(idx) {
            Value::Table(id) => ((id as usize) << 4) | 1,
            Value::Function(id) => ((id as usize) << 4) | 2,
            Value::Userdata(id) => ((id as usize) << 4) | 3,
            Value::Thread(id) => ((id as usize) << 4) | 4,
            _ => 0,
        }
    }

    fn lua_pushnil(&self, l: LuaState) {
        if let Some(st) = self.inner.borrow_mut().state_mut(l) {
            st.stack.push(Value::Nil);
        }
    }

    fn lua_pushboolean(&self, l: LuaState, b: bool) {
        if let Some(st) = self.inner.borrow_mut().state_mut(l) {
            st.stack.push(Value::Boolean(b));
        }
    }

    fn lua_pushnumber(&self, l: LuaState, n: f64) {
        if let Some(st) = self.inner.borrow_mut().state_mut(l) {
            st.stack.push(Value::Number(n));
        }
    }

    fn lua_pushstring(&self, l: LuaState, s: &str) {
        if let Some(st) = self.inner.borrow_mut().state_mut(l) {
            st.stack.push(Value::Str(s.to_string()));
        }
    }

    fn lua_toboolean(&self, l: LuaState, idx: i32) -> bool {
        let inner = self.inner.borrow();
        match inner.state(l) {
            Some(st) => !matches!(st.at(idx), Value::Nil | Value::Boolean(false)),
            None => false,
        }
    }

    fn clua_tonumber(&self, l: LuaState, idx: i32) -> f64 {
        let inner = self.inner.borrow();
        match inner.state(l).map(|st| st.at(idx)) {
            Some(Value::Number(n)) => n,
            _ => 0.0,
        }
    }

    fn clua_tostring(&self, l: LuaState, idx: i32) -> Option<String> {
        let inner = self.inner.borrow();
        match inner.state(l).map(|st| st.at(idx)) {
            Some(Value::Str(s)) => Some(s),
            Some(Value::Number(n)) => Some(fmt_number(n)),
            _ => None,
        }
    }

    fn clua_newtable(&self, l: LuaState) {
        let tid = self.alloc_table(Vec::new());
        if let Some(st) = self.inner.borrow_mut().state_mut(l) {
            st.stack.push(Value::Table(tid));
        }
    }

    fn lua_gettable(&self, l: LuaState, idx: i32) -> LuaType {
        let (tid, key) = {
            let mut inner = self.inner.borrow_mut();
            let Some(st) = inner.state_mut(l) else {
                return LuaType::None;
            };
            let table = st.at(idx);
            let key = st.stack.pop().unwrap_or(Value::Nil);
            match table {
                Value::Table(tid) => (tid, key),
                _ => {
                    st.stack.push(Value::Nil);
                    return LuaType::Nil;
                }
            }
        };
        let v = self.table_get(tid, &key);
        let tag = tag_of(&v);
        if let Some(st) = self.inner.borrow_mut().state_mut(l) {
            st.stack.push(v);
        }
        tag
    }

    fn lua_settable(&self, l: LuaState, idx: i32) {
        let (tid, key, value) = {
            let mut inner = self.inner.borrow_mut();
            let Some(st) = inner.state_mut(l) else {
                return;
            };
            let table = st.at(idx);
            let value = st.stack.pop().unwrap_or(Value::Nil);
            let key = st.stack.pop().unwrap_or(Value::Nil);
            match table {
                Value::Table(tid) => (tid, key, value),
                _ => return,
            }
        };
        self.table_set(tid, key, value);
    }

    fn lua_next(&self, l: LuaState, idx: i32) -> bool {
        let mut inner = self.inner.borrow_mut();
        let Some(st) = inner.state_mut(l) else {
            return false;
        };
        let table = st.at(idx);
        let key = st.stack.pop().unwrap_or(Value::Nil);
        let Value::Table(tid) = table else {
            return false;
        };
        let Some(entries) = inner.tables.get(&tid) else {
            return false;
        };
        let next = if matches!(key, Value::Nil) {
            entries.first().cloned()
        } else {
            entries
                .iter()
                .position(|(k, _)| *k == key)
                .and_then(|p| entries.get(p + 1).cloned())
        };
        match next {
            Some((k, v)) => {
                // reborrow: entries lookup released above
                if let Some(st) = inner.state_mut(l) {
                    st.stack.push(k);
                    st.stack.push(v);
                }
                true
            }
            None => false,
        }
    }

    fn lua_getglobal(&self, l: LuaState, name: &str) -> LuaType {
        let root = match self.inner.borrow().state(l) {
            Some(st) => st.root,
            None => return LuaType::None,
        };
        let v = self.get_global_value(root, name);
        let tag = tag_of(&v);
        if let Some(st) = self.inner.borrow_mut().state_mut(l) {
            st.stack.push(v);
        }
        tag
    }

    fn lua_setglobal(&self, l: LuaState, name: &str) {
        let mut inner = self.inner.borrow_mut();
        let Some(st) = inner.state_mut(l) else {
            return;
        };
        let root = st.root;
        let v = st.stack.pop().unwrap_or(Value::Nil);
        let Some(rec) = inner.roots.get_mut(&root) else {
            return;
        };
        if matches!(v, Value::Nil) {
            rec.globals.remove(name);
        } else {
            rec.globals.insert(name.to_string(), v);
        }
    }

    fn luaL_ref(&self, l: LuaState, _t: i32) -> i32 {
        let mut inner = self.inner.borrow_mut();
        let Some(st) = inner.state_mut(l) else {
            return LUA_REFNIL;
        };
        let root = st.root;
        let v = st.stack.pop().unwrap_or(Value::Nil);
        if matches!(v, Value::Nil) {
            return LUA_REFNIL;
        }
        let Some(rec) = inner.roots.get_mut(&root) else {
            return LUA_REFNIL;
        };
        let id = rec.free_refs.pop().unwrap_or_else(|| {
            let id = rec.next_ref;
            rec.next_ref += 1;
            id
        });
        rec.registry.insert(id, v);
        id
    }

    fn luaL_unref(&self, l: LuaState, _t: i32, ref_id: i32) {
        if ref_id <= 0 {
            return;
        }
        let mut inner = self.inner.borrow_mut();
        let Some(root) = inner.state(l).map(|s| s.root) else {
            return;
        };
        let Some(rec) = inner.roots.get_mut(&root) else {
            return;
        };
        if rec.registry.remove(&ref_id).is_some() {
            rec.free_refs.push(ref_id);
        }
    }

    fn lua_rawgeti(&self, l: LuaState, _idx: i32, ref_id: i32) -> LuaType {
        let mut inner = self.inner.borrow_mut();
        let Some(root) = inner.state(l).map(|s| s.root) else {
            return LuaType::None;
        };
        let v = inner
            .roots
            .get(&root)
            .and_then(|r| r.registry.get(&ref_id).cloned())
            .unwrap_or(Value::Nil);
        let tag = tag_of(&v);
        if let Some(st) = inner.state_mut(l) {
            st.stack.push(v);
        }
        tag
    }

    fn clua_addfunction(&self, f: HostFunction) -> u32 {
        let mut inner = self.inner.borrow_mut();
        inner.next_host_fn += 1;
        let id = inner.next_host_fn;
        inner.host_fns.insert(id, f);
        id
    }

    fn clua_pushcfunction(&self, l: LuaState, fn_index: u32) {
        let fid = self.alloc_function(FuncRec::Host(fn_index));
        if let Some(st) = self.inner.borrow_mut().state_mut(l) {
            st.stack.push(Value::Function(fid));
        }
    }

    fn clua_newuserdata(&self, l: LuaState, host_id: u32, tag: &str) {
        let uid = {
            let mut inner = self.inner.borrow_mut();
            inner.next_userdata += 1;
            let uid = inner.next_userdata;
            inner.userdata.insert(
                uid,
                UserdataRec {
                    host_id,
                    tag: tag.to_string(),
                },
            );
            uid
        };
        if let Some(st) = self.inner.borrow_mut().state_mut(l) {
            st.stack.push(Value::Userdata(uid));
        }
    }

    fn clua_userdata_id(&self, l: LuaState, idx: i32) -> Option<u32> {
        let inner = self.inner.borrow();
        match inner.state(l).map(|st| st.at(idx)) {
            Some(Value::Userdata(uid)) => inner.userdata.get(&uid).map(|u| u.host_id),
            _ => None,
        }
    }

    fn clua_userdata_tag(&self, l: LuaState, idx: i32) -> Option<String> {
        let inner = self.inner.borrow();
        match inner.state(l).map(|st| st.at(idx)) {
            Some(Value::Userdata(uid)) => inner.userdata.get(&uid).map(|u| u.tag.clone()),
            _ => None,
        }
    }
}

#[cfg(test)]
mod tests {
    use std::sync::Arc;

    use super::*;

    fn open() -> (MiniLua, LuaState) {
        let vm = MiniLua::new();
        let l = vm.luaL_newstate().unwrap();
        vm.luaL_openlibs(l);
        (vm, l)
    }

    fn run(vm: &MiniLua, l: LuaState, source: &str) -> LuaReturn {
        assert_eq!(vm.luaL_loadstring(l, source), LuaReturn::Ok);
        vm.lua_pcall(l, 0, -1, 0)
    }

    #[test]
    fn arithmetic_chunk() {
        let (vm, l) = open();
        assert_eq!(run(&vm, l, "return 1 + 2 * 3"), LuaReturn::Ok);
        assert_eq!(vm.clua_tonumber(l, -1), 7.0);
    }

    #[test]
    fn globals_and_locals() {
        let (vm, l) = open();
        assert_eq!(
            run(&vm, l, "local x = 10\ny = x + 4\nreturn y .. '!'"),
            LuaReturn::Ok
        );
        assert_eq!(vm.clua_tostring(l, -1).as_deref(), Some("14!"));
        vm.lua_settop(l, 0);
        assert_eq!(vm.lua_getglobal(l, "y"), LuaType::Number);
        assert_eq!(vm.clua_tonumber(l, -1), 14.0);
    }

    #[test]
    fn error_builtin_raises() {
        let (vm, l) = open();
        assert_eq!(run(&vm, l, "error('boom')"), LuaReturn::ErrRun);
        assert_eq!(vm.clua_tostring(l, -1).as_deref(), Some("boom"));
    }

    #[test]
    fn syntax_error_pushes_message() {
        let (vm, l) = open();
        assert_eq!(vm.luaL_loadstring(l, "return 1 +"), LuaReturn::ErrSyntax);
        assert!(vm.clua_tostring(l, -1).is_some());
    }

    #[test]
    fn function_declarations_are_callable() {
        let (vm, l) = open();
        assert_eq!(
            run(&vm, l, "function add(a, b) return a + b end\nreturn add(2, 3)"),
            LuaReturn::Ok
        );
        assert_eq!(vm.clua_tonumber(l, -1), 5.0);
    }

    #[test]
    fn tables_traverse_in_insertion_order() {
        let (vm, l) = open();
        assert_eq!(run(&vm, l, "return { a = 1, b = 2 }"), LuaReturn::Ok);
        let table_idx = vm.lua_gettop(l);
        vm.lua_pushnil(l);
        assert!(vm.lua_next(l, table_idx));
        assert_eq!(vm.clua_tostring(l, -2).as_deref(), Some("a"));
        assert_eq!(vm.clua_tonumber(l, -1), 1.0);
        vm.lua_settop(l, table_idx + 1);
        assert!(vm.lua_next(l, table_idx));
        assert_eq!(vm.clua_tostring(l, -2).as_deref(), Some("b"));
        vm.lua_settop(l, table_idx + 1);
        assert!(!vm.lua_next(l, table_idx));
    }

    #[test]
    fn registry_refs_recycle_ids() {
        let (vm, l) = open();
        vm.lua_pushnumber(l, 1.0);
        let a = vm.luaL_ref(l, LUA_REGISTRYINDEX);
        vm.lua_pushnumber(l, 2.0);
        let b = vm.luaL_ref(l, LUA_REGISTRYINDEX);
        assert_ne!(a, b);
        assert_eq!(vm.registry_len(), 2);
        vm.luaL_unref(l, LUA_REGISTRYINDEX, a);
        assert_eq!(vm.registry_len(), 1);
        vm.lua_pushnumber(l, 3.0);
        let c = vm.luaL_ref(l, LUA_REGISTRYINDEX);
        assert_eq!(c, a);
        assert_eq!(vm.lua_rawgeti(l, LUA_REGISTRYINDEX, c), LuaType::Number);
        assert_eq!(vm.clua_tonumber(l, -1), 3.0);
    }

    #[test]
    fn referencing_nil_reports_refnil() {
        let (vm, l) = open();
        vm.lua_pushnil(l);
        assert_eq!(vm.luaL_ref(l, LUA_REGISTRYINDEX), LUA_REFNIL);
        assert_eq!(vm.registry_len(), 0);
    }

    #[test]
    fn coroutine_awaits_and_resumes() {
        let (vm, l) = open();
        assert_eq!(
            vm.luaL_loadstring(l, "local x = await(7)\nreturn x + 1"),
            LuaReturn::Ok
        );
        let co = vm.lua_newthread(l);
        // copy the chunk onto the coroutine
        vm.lua_pushvalue(l, -2);
        vm.lua_xmove(l, co, 1);
        assert_eq!(vm.lua_resume(co, 0), LuaReturn::Yield);
        assert_eq!(vm.clua_tonumber(co, 1), 7.0);
        vm.lua_settop(co, 0);
        vm.lua_pushboolean(co, true);
        vm.lua_pushnumber(co, 41.0);
        assert_eq!(vm.lua_resume(co, 2), LuaReturn::Ok);
        assert_eq!(vm.clua_tonumber(co, 1), 42.0);
    }

    #[test]
    fn rejected_await_raises_into_the_coroutine() {
        let (vm, l) = open();
        assert_eq!(
            vm.luaL_loadstring(l, "local x = await(1)\nreturn x"),
            LuaReturn::Ok
        );
        let co = vm.lua_newthread(l);
        vm.lua_pushvalue(l, -2);
        vm.lua_xmove(l, co, 1);
        assert_eq!(vm.lua_resume(co, 0), LuaReturn::Yield);
        vm.lua_settop(co, 0);
        vm.lua_pushboolean(co, false);
        vm.lua_pushstring(co, "denied");
        assert_eq!(vm.lua_resume(co, 2), LuaReturn::ErrRun);
        assert_eq!(vm.clua_tostring(co, -1).as_deref(), Some("denied"));
    }

    #[test]
    fn await_outside_coroutine_is_an_error() {
        let (vm, l) = open();
        assert_eq!(run(&vm, l, "await(1)"), LuaReturn::ErrRun);
        let message = vm.clua_tostring(l, -1).unwrap_or_default();
        assert!(message.contains("outside a coroutine"));
    }

    #[test]
    fn host_functions_receive_frames_and_return_counts() {
        let (vm, l) = open();
        let f: HostFunction = Arc::new(|api, frame| {
            let nargs = api.lua_gettop(frame);
            let mut total = 0.0;
            for i in 1..=nargs {
                total += api.clua_tonumber(frame, i);
            }
            api.lua_pushnumber(frame, total);
            Ok(1)
        });
        let id = vm.clua_addfunction(f);
        vm.clua_pushcfunction(l, id);
        vm.lua_setglobal(l, "sum");
        assert_eq!(run(&vm, l, "return sum(1, 2, 3)"), LuaReturn::Ok);
        assert_eq!(vm.clua_tonumber(l, -1), 6.0);
    }

    #[test]
    fn host_function_errors_become_script_errors() {
        let (vm, l) = open();
        let f: HostFunction = Arc::new(|_, _| Err("refused".into()));
        let id = vm.clua_addfunction(f);
        vm.clua_pushcfunction(l, id);
        vm.lua_setglobal(l, "nope");
        assert_eq!(run(&vm, l, "return nope()"), LuaReturn::ErrRun);
        assert_eq!(vm.clua_tostring(l, -1).as_deref(), Some("refused"));
    }

    #[test]
    fn userdata_carries_id_and_tag() {
        let (vm, l) = open();
        vm.clua_newuserdata(l, 9, "widget");
        assert_eq!(vm.lua_type(l, -1), LuaType::Userdata);
        assert_eq!(vm.clua_userdata_id(l, -1), Some(9));
        assert_eq!(vm.clua_userdata_tag(l, -1).as_deref(), Some("widget"));
        assert_ne!(vm.lua_topointer(l, -1), 0);
    }

    #[test]
    fn close_tears_down_the_root() {
        let vm = MiniLua::new();
        let l = vm.luaL_newstate().unwrap();
        vm.lua_pushnumber(l, 1.0);
        vm.luaL_ref(l, LUA_REGISTRYINDEX);
        assert_eq!(vm.root_count(), 1);
        vm.lua_close(l);
        assert_eq!(vm.root_count(), 0);
        assert_eq!(vm.registry_len(), 0);
    }

    #[test]
    fn allocation_failure_is_reported() {
        let vm = MiniLua::new();
        vm.fail_allocations();
        assert!(vm.luaL_newstate().is_none());
        assert!(vm.luaL_newstate().is_some());
    }
}
