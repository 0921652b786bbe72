//! Function handler: callable proxies both ways.

use std::sync::Arc;

use lunar_abi::{HostFunction, LuaType};

use crate::error::EngineError;
use crate::extensions::TypeExtension;
use crate::proxies::LuaFunction;
use crate::thread::Thread;
use crate::value::LuaValue;

/// Materializes VM functions as [`LuaFunction`] proxies and pushes host
/// callables as VM functions.
pub struct FunctionTypeExtension;

impl TypeExtension for FunctionTypeExtension {
    fn name(&self) -> &'static str {
        "function"
    }

    fn matches(&self, thread: &Thread, index: i32) -> bool {
        thread.type_at(index) == LuaType::Function
    }

    fn get_value(&self, thread: &Thread, index: i32) -> Result<LuaValue, EngineError> {
        let l = thread.state();
        thread.api().lua_pushvalue(l, index);
        let lref = thread.shared.refs.create_ref(l)?;
        Ok(LuaValue::Function(LuaFunction::new(
            Arc::downgrade(&thread.shared),
            lref,
        )))
    }

    fn push_value(&self, thread: &Thread, value: &LuaValue) -> Result<bool, EngineError> {
        match value {
            LuaValue::Function(f) => {
                thread.shared.refs.push_ref(thread.state(), f.lref())?;
                Ok(true)
            }
            LuaValue::HostFunction(callback) => {
                let weak = Arc::downgrade(&thread.shared);
                let callback = callback.clone();
                let wrapper: HostFunction = Arc::new(move |api, frame_state| {
                    let shared = weak.upgrade().ok_or("host function outlived its engine")?;
                    let frame = Thread::new(shared, frame_state);

                    let nargs = api.lua_gettop(frame_state);
                    let mut args = Vec::with_capacity(nargs.max(0) as usize);
                    for i in 1..=nargs {
                        args.push(frame.value_at(i).map_err(|e| e.to_string())?);
                    }

                    let results = callback(&args)?;
                    for result in &results {
                        frame.push(result).map_err(|e| e.to_string())?;
                    }
                    Ok(results.len() as i32)
                });
                let fn_index = thread.api().clua_addfunction(wrapper);
                thread.api().clua_pushcfunction(thread.state(), fn_index);
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
