//! Generic table handler: one-shot eager materialization.

use std::cell::RefCell;

use lunar_abi::LuaType;

use crate::error::EngineError;
use crate::extensions::TypeExtension;
use crate::thread::Thread;
use crate::value::LuaValue;

/// Materializes tables as eager host copies and pushes host arrays and
/// mappings as fresh VM tables.
///
/// When live proxying is enabled, tables belong to the proxy extension and
/// this handler only serves the push direction.
pub struct TableTypeExtension {
    /// Pointers of tables currently being materialized, to refuse cycles
    /// instead of recursing forever.
    visiting: RefCell<Vec<usize>>,
}

impl TableTypeExtension {
    pub(crate) fn new() -> Self {
        Self {
            visiting: RefCell::new(Vec::new()),
        }
    }
}

impl TypeExtension for TableTypeExtension {
    fn name(&self) -> &'static str {
        "table"
    }

    fn matches(&self, thread: &Thread, index: i32) -> bool {
        !thread.shared.options.enable_proxy && thread.type_at(index) == LuaType::Table
    }

    fn get_value(&self, thread: &Thread, index: i32) -> Result<LuaValue, EngineError> {
        let l = thread.state();
        let ptr = thread.api().lua_topointer(l, index);
        if self.visiting.borrow().contains(&ptr) {
            return Err(EngineError::Type(
                "cannot eagerly materialize a cyclic table".into(),
            ));
        }
        self.visiting.borrow_mut().push(ptr);
        let result = self.read_pairs(thread, index);
        self.visiting.borrow_mut().pop();

        let pairs = result?;
        if let Some(items) = as_contiguous_array(&pairs) {
            Ok(LuaValue::Array(items))
        } else {
            Ok(LuaValue::Table(pairs))
        }
    }

    fn push_value(&self, thread: &Thread, value: &LuaValue) -> Result<bool, EngineError> {
        let l = thread.state();
        match value {
            LuaValue::Array(items) => {
                thread.api().clua_newtable(l);
                let table_idx = thread.top();
                for (i, item) in items.iter().enumerate() {
                    thread.api().lua_pushnumber(l, (i + 1) as f64);
                    thread.push(item)?;
                    thread.api().lua_settable(l, table_idx);
                }
                Ok(true)
            }
            LuaValue::Table(pairs) => {
                thread.api().clua_newtable(l);
                let table_idx = thread.top();
                for (key, val) in pairs {
                    thread.push(key)?;
                    thread.push(val)?;
                    thread.api().lua_settable(l, table_idx);
                }
                Ok(true)
            }
            _ => Ok(false),
        }
    }
}

impl TableTypeExtension {
    fn read_pairs(
        &self,
        thread: &Thread,
        index: i32,
    ) -> Result<Vec<(LuaValue, LuaValue)>, EngineError> {
        let l = thread.state();
        let mut pairs = Vec::new();
        thread.api().lua_pushnil(l);
        while thread.api().lua_next(l, index) {
            // Stack: key at -2, value at -1. Materialize the value first so
            // nested conversions do not disturb the key we keep for the
            // next traversal step.
            let value = thread.value_at(-1)?;
            let key = thread.value_at(-2)?;
            thread.pop(1);
            pairs.push((key, value));
        }
        Ok(pairs)
    }
}

/// Detect the VM's array idiom: the keys form exactly the set 1..=n.
///
/// Traversal order is not part of the VM contract, so detection goes by
/// key set, not by the position a key appeared at.
fn as_contiguous_array(pairs: &[(LuaValue, LuaValue)]) -> Option<Vec<LuaValue>> {
    if pairs.is_empty() {
        return None;
    }
    let mut items: Vec<Option<LuaValue>> = vec![None; pairs.len()];
    for (key, value) in pairs {
        let slot = match key {
            LuaValue::Number(n)
                if n.fract() == 0.0 && *n >= 1.0 && *n <= pairs.len() as f64 =>
            {
                *n as usize - 1
            }
            _ => return None,
        };
        if items[slot].is_some() {
            return None;
        }
        items[slot] = Some(value.clone());
    }
    items.into_iter().collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn contiguous_detection() {
        let pairs = vec![
            (LuaValue::Number(1.0), LuaValue::String("a".into())),
            (LuaValue::Number(2.0), LuaValue::String("b".into())),
        ];
        assert_eq!(
            as_contiguous_array(&pairs),
            Some(vec![
                LuaValue::String("a".into()),
                LuaValue::String("b".into())
            ])
        );

        // traversal order does not matter, only the key set
        let shuffled = vec![
            (LuaValue::Number(2.0), LuaValue::String("b".into())),
            (LuaValue::Number(1.0), LuaValue::String("a".into())),
        ];
        assert_eq!(
            as_contiguous_array(&shuffled),
            Some(vec![
                LuaValue::String("a".into()),
                LuaValue::String("b".into())
            ])
        );

        let sparse = vec![
            (LuaValue::Number(1.0), LuaValue::Boolean(true)),
            (LuaValue::Number(3.0), LuaValue::Boolean(false)),
        ];
        assert_eq!(as_contiguous_array(&sparse), None);

        let keyed = vec![(LuaValue::String("x".into()), LuaValue::Number(1.0))];
        assert_eq!(as_contiguous_array(&keyed), None);

        assert_eq!(as_contiguous_array(&[]), None);
    }
}
