//! Deferred/promise handler: bridges VM awaits to host deferred values.

use lunar_abi::LuaType;

use crate::deferred::Deferred;
use crate::engine::HostObject;
use crate::error::EngineError;
use crate::extensions::{TypeExtension, TAG_DEFERRED};
use crate::global::Global;
use crate::thread::Thread;
use crate::value::LuaValue;

/// Renders host [`Deferred`] values as tagged VM userdata and back.
///
/// The suspension half lives in the async call bridge: when a script
/// awaits, the yielded value is materialized through this handler and the
/// pending call parks on the resulting deferred.
pub struct PromiseTypeExtension {
    inject: bool,
}

impl PromiseTypeExtension {
    pub(crate) fn new(inject: bool) -> Self {
        Self { inject }
    }
}

impl TypeExtension for PromiseTypeExtension {
    fn name(&self) -> &'static str {
        "promise"
    }

    /// With `inject_objects`, exposes a `Promise` table with `create`,
    /// `resolve`, and `reject` constructors to scripts.
    fn open(&self, global: &Global) -> Result<(), EngineError> {
        if !self.inject {
            return Ok(());
        }

        let constructors = LuaValue::Table(vec![
            (
                LuaValue::String("create".into()),
                LuaValue::host_function(|_args| Ok(vec![LuaValue::Promise(Deferred::new())])),
            ),
            (
                LuaValue::String("resolve".into()),
                LuaValue::host_function(|args| {
                    let d = Deferred::new();
                    d.resolve(args.first().cloned().unwrap_or(LuaValue::Nil));
                    Ok(vec![LuaValue::Promise(d)])
                }),
            ),
            (
                LuaValue::String("reject".into()),
                LuaValue::host_function(|args| {
                    let d = Deferred::new();
                    d.reject(args.first().cloned().unwrap_or(LuaValue::Nil));
                    Ok(vec![LuaValue::Promise(d)])
                }),
            ),
        ]);
        global.set("Promise", &constructors)
    }

    fn matches(&self, thread: &Thread, index: i32) -> bool {
        thread.type_at(index) == LuaType::Userdata
            && thread
                .api()
                .clua_userdata_tag(thread.state(), index)
                .as_deref()
                == Some(TAG_DEFERRED)
    }

    fn get_value(&self, thread: &Thread, index: i32) -> Result<LuaValue, EngineError> {
        let id = thread
            .api()
            .clua_userdata_id(thread.state(), index)
            .ok_or_else(|| EngineError::Type("deferred userdata without a host id".into()))?;
        match thread.shared.host_objects.get(id) {
            Some(HostObject::Deferred(d)) => Ok(LuaValue::Promise(d)),
            _ => Err(EngineError::Type(format!(
                "deferred userdata {id} is not registered"
            ))),
        }
    }

    fn push_value(&self, thread: &Thread, value: &LuaValue) -> Result<bool, EngineError> {
        match value {
            LuaValue::Promise(d) => {
                let id = thread
                    .shared
                    .host_objects
                    .insert(HostObject::Deferred(d.clone()));
                thread
                    .api()
                    .clua_newuserdata(thread.state(), id, TAG_DEFERRED);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
