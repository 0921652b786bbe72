//! Live table proxy handler.

use lunar_abi::LuaType;

use crate::error::EngineError;
use crate::extensions::TypeExtension;
use crate::proxies::LuaTableProxy;
use crate::thread::Thread;
use crate::value::LuaValue;

/// Hands out [`LuaTableProxy`] handles instead of eagerly copying tables.
///
/// Installed only when proxying is enabled; it claims every table, so the
/// eager table handler never sees one.
pub struct ProxyTypeExtension;

impl TypeExtension for ProxyTypeExtension {
    fn name(&self) -> &'static str {
        "proxy"
    }

    fn matches(&self, thread: &Thread, index: i32) -> bool {
        thread.type_at(index) == LuaType::Table
    }

    fn get_value(&self, thread: &Thread, index: i32) -> Result<LuaValue, EngineError> {
        thread.api().lua_pushvalue(thread.state(), index);
        let lref = thread.shared.refs.create_ref(thread.state())?;
        Ok(LuaValue::Proxy(LuaTableProxy::new(
            std::sync::Arc::downgrade(&thread.shared),
            lref,
        )))
    }

    fn push_value(&self, thread: &Thread, value: &LuaValue) -> Result<bool, EngineError> {
        match value {
            LuaValue::Proxy(p) => {
                thread.shared.refs.push_ref(thread.state(), p.lref())?;
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}
