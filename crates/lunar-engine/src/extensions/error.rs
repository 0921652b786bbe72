//! Error object handler, installed when proxying is disabled.

use lunar_abi::LuaType;

use crate::engine::HostObject;
use crate::error::EngineError;
use crate::extensions::{TypeExtension, TAG_ERROR};
use crate::thread::Thread;
use crate::value::LuaValue;

pub struct ErrorTypeExtension;

impl TypeExtension for ErrorTypeExtension {
    fn name(&self) -> &'static str {
        "error"
    }

    fn matches(&self, thread: &Thread, index: i32) -> bool {
        thread.type_at(index) == LuaType::Userdata
            && thread
                .api()
                .clua_userdata_tag(thread.state(), index)
                .as_deref()
                == Some(TAG_ERROR)
    }

    fn get_value(&self, thread: &Thread, index: i32) -> Result<LuaValue, EngineError> {
        let id = thread
            .api()
            .clua_userdata_id(thread.state(), index)
            .ok_or_else(|| EngineError::Type("error userdata without a host id".into()))?;
        match thread.shared.host_objects.get(id) {
            Some(HostObject::Error(e)) => Ok(LuaValue::Error(e)),
            _ => Err(EngineError::Type(format!(
                "error userdata {id} is not registered"
            ))),
        }
    }

    fn push_value(&self, thread: &Thread, value: &LuaValue) -> Result<bool, EngineError> {
        match value {
            LuaValue::Error(e) => {
                let id = thread
                    .shared
                    .host_objects
                    .insert(HostObject::Error(e.clone()));
                thread.api().clua_newuserdata(thread.state(), id, TAG_ERROR);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
