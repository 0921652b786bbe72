//! Façade-level tests: construction, the four entry points, globals, and
//! host callbacks.

use std::io::Write;
use std::path::Path;
use std::sync::Arc;

use lunar_engine::{EngineError, EngineOptions, LuaEngine, LuaValue};
use lunar_testing::MiniLua;

fn engine() -> LuaEngine {
    LuaEngine::with_defaults(Arc::new(MiniLua::new())).unwrap()
}

#[test]
fn construction_failure_is_reported() {
    let vm = Arc::new(MiniLua::new());
    vm.fail_allocations();
    match LuaEngine::with_defaults(vm) {
        Err(EngineError::Construction) => {}
        other => panic!("expected a construction error, got {other:?}"),
    }
}

#[test]
fn scalars_round_trip_through_globals() {
    let engine = engine();
    let global = engine.global();

    for value in [
        LuaValue::Nil,
        LuaValue::Boolean(true),
        LuaValue::Boolean(false),
        LuaValue::Number(3.5),
        LuaValue::String("hello".into()),
    ] {
        global.set("v", &value).unwrap();
        assert_eq!(global.get("v").unwrap(), value);
    }
    assert_eq!(global.top(), 0);
}

#[test]
fn do_string_sync_returns_the_first_value() {
    let engine = engine();
    assert_eq!(
        engine.do_string_sync("return 1 + 1").unwrap(),
        LuaValue::Number(2.0)
    );
    assert_eq!(
        engine.do_string_sync("return 'a' .. 'b'").unwrap(),
        LuaValue::String("ab".into())
    );
    // no results materialize as nil
    assert_eq!(engine.do_string_sync("x = 1").unwrap(), LuaValue::Nil);
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn runtime_errors_carry_the_raised_value() {
    let engine = engine();
    match engine.do_string_sync("error('boom')") {
        Err(EngineError::Runtime { value }) => {
            assert_eq!(value, LuaValue::String("boom".into()));
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn load_errors_are_distinguished_from_runtime_errors() {
    let engine = engine();
    match engine.do_string_sync("return 1 +") {
        Err(EngineError::Load { value }) => match value {
            LuaValue::String(message) => assert!(!message.is_empty()),
            other => panic!("expected a string error value, got {other:?}"),
        },
        other => panic!("expected a load error, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn do_file_sync_runs_a_script_file() {
    let engine = engine();
    let mut file = tempfile::NamedTempFile::new().unwrap();
    write!(file, "local a = 40\nreturn a + 2").unwrap();
    assert_eq!(
        engine.do_file_sync(file.path()).unwrap(),
        LuaValue::Number(42.0)
    );
}

#[test]
fn missing_files_surface_as_io_errors() {
    let engine = engine();
    match engine.do_file_sync(Path::new("/definitely/not/here.lua")) {
        Err(EngineError::Io(_)) => {}
        other => panic!("expected an io error, got {other:?}"),
    }
}

#[test]
fn host_functions_are_callable_from_scripts() {
    let engine = engine();
    engine
        .global()
        .set(
            "sum",
            &LuaValue::host_function(|args| {
                let total = args.iter().filter_map(LuaValue::as_number).sum();
                Ok(vec![LuaValue::Number(total)])
            }),
        )
        .unwrap();
    assert_eq!(
        engine.do_string_sync("return sum(1, 2, 3)").unwrap(),
        LuaValue::Number(6.0)
    );
}

#[test]
fn host_function_errors_become_runtime_errors() {
    let engine = engine();
    engine
        .global()
        .set("nope", &LuaValue::host_function(|_| Err("refused".into())))
        .unwrap();
    match engine.do_string_sync("return nope()") {
        Err(EngineError::Runtime { value }) => {
            assert_eq!(value, LuaValue::String("refused".into()));
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn vm_functions_are_callable_from_the_host() {
    let engine = engine();
    engine
        .do_string_sync("function double(x) return x * 2 end")
        .unwrap();
    let double = match engine.global().get("double").unwrap() {
        LuaValue::Function(f) => f,
        other => panic!("expected a function proxy, got {other:?}"),
    };
    assert_eq!(
        double.call(&[LuaValue::Number(21.0)]).unwrap(),
        vec![LuaValue::Number(42.0)]
    );
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn function_call_errors_propagate() {
    let engine = engine();
    engine
        .do_string_sync("function fail() error('from inside') end")
        .unwrap();
    let fail = match engine.global().get("fail").unwrap() {
        LuaValue::Function(f) => f,
        other => panic!("expected a function proxy, got {other:?}"),
    };
    match fail.call(&[]) {
        Err(EngineError::Runtime { value }) => {
            assert_eq!(value, LuaValue::String("from inside".into()));
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn standard_libs_can_be_skipped() {
    let vm = Arc::new(MiniLua::new());
    let engine = LuaEngine::new(
        vm,
        EngineOptions {
            open_standard_libs: false,
            ..EngineOptions::default()
        },
    )
    .unwrap();
    // `error` is part of the library set, so calling it is itself an error
    assert!(engine.do_string_sync("error('x')").is_err());
    assert_eq!(engine.global().get("error").unwrap(), LuaValue::Nil);
}
