//! Host-side value model.
//!
//! A [`LuaValue`] is what crosses the bridge: scalars are copied, tables are
//! either copied eagerly or wrapped in a live proxy, and everything with
//! identity (functions, proxied tables, userdata) is backed by a persistent
//! reference so it stays valid after the stack frame that produced it is
//! gone.

use std::any::Any;
use std::fmt;
use std::sync::Arc;

use crate::deferred::Deferred;
use crate::proxies::{LuaFunction, LuaTableProxy};

/// A host callback pushable into the VM as a callable value.
///
/// Arguments arrive already materialized; returned values are pushed back.
/// `Err(message)` raises a VM error in the calling script.
pub type HostCallback = Arc<dyn Fn(&[LuaValue]) -> Result<Vec<LuaValue>, String>>;

/// A host-native rendering of one VM value.
#[derive(Clone)]
pub enum LuaValue {
    /// nil
    Nil,
    /// true / false
    Boolean(bool),
    /// Double-precision number.
    Number(f64),
    /// Owned string copy.
    String(String),
    /// Eager copy of a table whose keys were a contiguous 1-based integer
    /// run, in order.
    Array(Vec<LuaValue>),
    /// Eager copy of a table as an ordered key/value mapping.
    Table(Vec<(LuaValue, LuaValue)>),
    /// Callable proxy of a VM function, backed by a persistent reference.
    Function(LuaFunction),
    /// Host function to be exposed to scripts.
    HostFunction(HostCallback),
    /// Live proxy of a VM table; reads and writes go through the VM.
    Proxy(LuaTableProxy),
    /// Identity-preserving host object round-tripped through the VM.
    Userdata(LuaUserdata),
    /// Host deferred value bridging a VM-side await.
    Promise(Deferred),
    /// Wrapped VM error value.
    Error(LuaError),
}

impl LuaValue {
    /// Convenience constructor for [`LuaValue::HostFunction`].
    pub fn host_function<F>(f: F) -> Self
    where
        F: Fn(&[LuaValue]) -> Result<Vec<LuaValue>, String> + 'static,
    {
        Self::HostFunction(Arc::new(f))
    }

    /// Short name of this value's shape, for diagnostics.
    pub fn kind_name(&self) -> &'static str {
        match self {
            Self::Nil => "nil",
            Self::Boolean(_) => "boolean",
            Self::Number(_) => "number",
            Self::String(_) => "string",
            Self::Array(_) => "array",
            Self::Table(_) => "table",
            Self::Function(_) => "function",
            Self::HostFunction(_) => "host function",
            Self::Proxy(_) => "proxy",
            Self::Userdata(_) => "userdata",
            Self::Promise(_) => "promise",
            Self::Error(_) => "error",
        }
    }

    /// Extract a number.
    pub fn as_number(&self) -> Option<f64> {
        match self {
            Self::Number(n) => Some(*n),
            _ => None,
        }
    }

    /// Extract a string slice.
    pub fn as_str(&self) -> Option<&str> {
        match self {
            Self::String(s) => Some(s),
            _ => None,
        }
    }

    /// Extract a boolean.
    pub fn as_boolean(&self) -> Option<bool> {
        match self {
            Self::Boolean(b) => Some(*b),
            _ => None,
        }
    }

    /// Whether this value is nil.
    pub fn is_nil(&self) -> bool {
        matches!(self, Self::Nil)
    }
}

impl PartialEq for LuaValue {
    fn eq(&self, other: &Self) -> bool {
        match (self, other) {
            (Self::Nil, Self::Nil) => true,
            (Self::Boolean(a), Self::Boolean(b)) => a == b,
            (Self::Number(a), Self::Number(b)) => a == b,
            (Self::String(a), Self::String(b)) => a == b,
            (Self::Array(a), Self::Array(b)) => a == b,
            (Self::Table(a), Self::Table(b)) => a == b,
            // Identity semantics for everything reference-backed.
            (Self::Function(a), Self::Function(b)) => a == b,
            (Self::HostFunction(a), Self::HostFunction(b)) => Arc::ptr_eq(a, b),
            (Self::Proxy(a), Self::Proxy(b)) => a == b,
            (Self::Userdata(a), Self::Userdata(b)) => a == b,
            (Self::Promise(a), Self::Promise(b)) => a.ptr_eq(b),
            (Self::Error(a), Self::Error(b)) => a == b,
            _ => false,
        }
    }
}

impl fmt::Display for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Self::Nil => write!(f, "nil"),
            Self::Boolean(b) => write!(f, "{b}"),
            Self::Number(n) => write!(f, "{}", fmt_number(*n)),
            Self::String(s) => write!(f, "{s}"),
            Self::Array(items) => write!(f, "[array({})]", items.len()),
            Self::Table(pairs) => write!(f, "[table({})]", pairs.len()),
            Self::Function(_) => write!(f, "[function]"),
            Self::HostFunction(_) => write!(f, "[host function]"),
            Self::Proxy(_) => write!(f, "[table proxy]"),
            Self::Userdata(u) => write!(f, "[userdata: {}]", u.tag()),
            Self::Promise(_) => write!(f, "[promise]"),
            Self::Error(e) => write!(f, "{}", e.message),
        }
    }
}

// Debug mirrors Display with the shape name prefixed, which is what failed
// test assertions want to read.
impl fmt::Debug for LuaValue {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}<{}>", self.kind_name(), self)
    }
}

/// Render a number the way the VM's `tostring` does: integral values print
/// without a fractional part.
pub(crate) fn fmt_number(n: f64) -> String {
    if n.is_finite() && n.fract() == 0.0 && n.abs() < 1e15 {
        format!("{}", n as i64)
    } else {
        format!("{n}")
    }
}

/// A VM error value wrapped for the host (active when proxying is disabled).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LuaError {
    /// The error message or rendered error value.
    pub message: String,
}

impl LuaError {
    /// Wrap a message.
    pub fn new(message: impl Into<String>) -> Self {
        Self {
            message: message.into(),
        }
    }
}

/// An opaque host object round-tripped through the VM with its identity
/// preserved: materializing the userdata yields the exact `Arc` that was
/// pushed.
#[derive(Clone)]
pub struct LuaUserdata {
    tag: String,
    data: Arc<dyn Any>,
}

impl LuaUserdata {
    /// Wrap a host object under a type tag chosen by the host.
    pub fn new(tag: impl Into<String>, data: Arc<dyn Any>) -> Self {
        Self {
            tag: tag.into(),
            data,
        }
    }

    /// The host-registered type tag.
    pub fn tag(&self) -> &str {
        &self.tag
    }

    /// The wrapped object.
    pub fn data(&self) -> &Arc<dyn Any> {
        &self.data
    }

    /// Downcast the wrapped object.
    pub fn downcast_ref<T: 'static>(&self) -> Option<&T> {
        self.data.downcast_ref::<T>()
    }
}

impl PartialEq for LuaUserdata {
    fn eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.data, &other.data)
    }
}

impl fmt::Debug for LuaUserdata {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "LuaUserdata({})", self.tag)
    }
}
