//! Type extension registry.
//!
//! Each extension handles one value shape: it recognizes a stack value,
//! materializes it as a host value, and pushes host values of its shape.
//! Extensions are registered once at engine construction and consulted by
//! linear scan in ascending priority order; the first recognizer that
//! claims a value wins, and recognizers are kept disjoint so at most one
//! ever claims a given value.
//!
//! The scan stays linear (rather than keyed by type tag) because several
//! recognizers are content-based: promise, error, and userdata all
//! discriminate on the userdata tag, not the tag code alone.

mod error;
mod function;
mod promise;
mod proxy;
mod table;
mod userdata;

pub use self::error::ErrorTypeExtension;
pub use self::function::FunctionTypeExtension;
pub use self::promise::PromiseTypeExtension;
pub use self::proxy::ProxyTypeExtension;
pub use self::table::TableTypeExtension;
pub use self::userdata::UserdataTypeExtension;

use crate::engine::EngineOptions;
use crate::error::EngineError;
use crate::global::Global;
use crate::thread::Thread;
use crate::value::LuaValue;

/// One direction-agnostic value-shape handler.
pub trait TypeExtension {
    /// Handler name, for diagnostics.
    fn name(&self) -> &'static str;

    /// One-time setup after engine construction (e.g. injecting VM-visible
    /// constructors).
    fn open(&self, _global: &Global) -> Result<(), EngineError> {
        Ok(())
    }

    /// Whether this handler claims the stack value at `index`.
    fn matches(&self, thread: &Thread, index: i32) -> bool;

    /// Materialize the claimed stack value at `index` as a host value.
    fn get_value(&self, thread: &Thread, index: i32) -> Result<LuaValue, EngineError>;

    /// Push a host value of this shape; `Ok(false)` declines the value.
    fn push_value(&self, thread: &Thread, value: &LuaValue) -> Result<bool, EngineError>;
}

/// Registered extension with its dispatch priority (lower = tried first).
pub(crate) struct ExtensionSlot {
    pub(crate) priority: u8,
    pub(crate) ext: Box<dyn TypeExtension>,
}

pub(crate) const PRIORITY_TABLE: u8 = 0;
pub(crate) const PRIORITY_FUNCTION: u8 = 1;
pub(crate) const PRIORITY_PROMISE: u8 = 2;
pub(crate) const PRIORITY_ERROR: u8 = 3;
pub(crate) const PRIORITY_PROXY: u8 = 4;
pub(crate) const PRIORITY_USERDATA: u8 = 5;

/// Assemble the extension chain for the given options.
///
/// The error extension only exists when live proxying is off (the two are
/// one policy switch, not independently composable); everything else is
/// always present.
pub(crate) fn default_extensions(options: &EngineOptions) -> Vec<ExtensionSlot> {
    let mut slots = vec![
        ExtensionSlot {
            priority: PRIORITY_TABLE,
            ext: Box::new(TableTypeExtension::new()),
        },
        ExtensionSlot {
            priority: PRIORITY_FUNCTION,
            ext: Box::new(FunctionTypeExtension),
        },
        ExtensionSlot {
            priority: PRIORITY_PROMISE,
            ext: Box::new(PromiseTypeExtension::new(options.inject_objects)),
        },
        ExtensionSlot {
            priority: PRIORITY_USERDATA,
            ext: Box::new(UserdataTypeExtension),
        },
    ];
    if options.enable_proxy {
        slots.push(ExtensionSlot {
            priority: PRIORITY_PROXY,
            ext: Box::new(ProxyTypeExtension),
        });
    } else {
        slots.push(ExtensionSlot {
            priority: PRIORITY_ERROR,
            ext: Box::new(ErrorTypeExtension),
        });
    }
    slots.sort_by_key(|slot| slot.priority);
    slots
}

/// Reserved userdata tags claimed by built-in extensions.
pub(crate) const TAG_DEFERRED: &str = "deferred";
pub(crate) const TAG_ERROR: &str = "error";

#[cfg(test)]
mod tests {
    use super::*;

    fn names(options: &EngineOptions) -> Vec<&'static str> {
        default_extensions(options)
            .iter()
            .map(|s| s.ext.name())
            .collect()
    }

    #[test]
    fn proxy_chain_order() {
        let options = EngineOptions {
            enable_proxy: true,
            ..EngineOptions::default()
        };
        assert_eq!(
            names(&options),
            vec!["table", "function", "promise", "proxy", "userdata"]
        );
    }

    #[test]
    fn error_chain_order() {
        let options = EngineOptions {
            enable_proxy: false,
            ..EngineOptions::default()
        };
        assert_eq!(
            names(&options),
            vec!["table", "function", "promise", "error", "userdata"]
        );
    }

    #[test]
    fn priorities_are_distinct() {
        for proxy in [true, false] {
            let options = EngineOptions {
                enable_proxy: proxy,
                ..EngineOptions::default()
            };
            let slots = default_extensions(&options);
            let mut priorities: Vec<u8> = slots.iter().map(|s| s.priority).collect();
            priorities.dedup();
            assert_eq!(priorities.len(), slots.len());
        }
    }
}
