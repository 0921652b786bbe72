//! Opaque userdata handler: the lowest-priority catch-all for tagged
//! host objects and anchored VM values.

use std::sync::Arc;

use lunar_abi::LuaType;

use crate::engine::HostObject;
use crate::error::EngineError;
use crate::extensions::{TypeExtension, TAG_DEFERRED, TAG_ERROR};
use crate::refs::LuaRef;
use crate::thread::Thread;
use crate::value::{LuaUserdata, LuaValue};

pub struct UserdataTypeExtension;

impl TypeExtension for UserdataTypeExtension {
    fn name(&self) -> &'static str {
        "userdata"
    }

    /// Claims userdata carrying a host id whose tag is not reserved by a
    /// more specific handler.
    fn matches(&self, thread: &Thread, index: i32) -> bool {
        if thread.type_at(index) != LuaType::Userdata {
            return false;
        }
        if thread
            .api()
            .clua_userdata_id(thread.state(), index)
            .is_none()
        {
            return false;
        }
        match thread.api().clua_userdata_tag(thread.state(), index) {
            Some(tag) => tag != TAG_DEFERRED && tag != TAG_ERROR,
            None => true,
        }
    }

    fn get_value(&self, thread: &Thread, index: i32) -> Result<LuaValue, EngineError> {
        let l = thread.state();
        let id = thread
            .api()
            .clua_userdata_id(l, index)
            .ok_or_else(|| EngineError::Type("userdata without a host id".into()))?;
        match thread.shared.host_objects.get(id) {
            Some(HostObject::Opaque { data, tag }) => {
                Ok(LuaValue::Userdata(LuaUserdata::new(tag, data)))
            }
            _ => Err(EngineError::Type(format!(
                "userdata {id} is not registered as an opaque host object"
            ))),
        }
    }

    fn push_value(&self, thread: &Thread, value: &LuaValue) -> Result<bool, EngineError> {
        let u = match value {
            LuaValue::Userdata(u) => u,
            _ => return Ok(false),
        };
        // Anchored VM values round-trip through their persistent reference
        // instead of growing a second identity.
        if let Some(lref) = u.downcast_ref::<LuaRef>() {
            thread.shared.refs.push_ref(thread.state(), lref)?;
            return Ok(true);
        }
        let id = thread.shared.host_objects.insert(HostObject::Opaque {
            data: Arc::clone(u.data()),
            tag: u.tag().to_string(),
        });
        thread
            .api()
            .clua_newuserdata(thread.state(), id, u.tag());
        Ok(true)
    }
}
