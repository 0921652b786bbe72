//! Conversion-policy tests: proxy vs eager tables, userdata identity,
//! promise and error rendering.

use std::sync::Arc;

use lunar_engine::{
    EngineError, EngineOptions, LuaEngine, LuaError, LuaUserdata, LuaValue,
};
use lunar_testing::MiniLua;

fn proxied() -> LuaEngine {
    LuaEngine::with_defaults(Arc::new(MiniLua::new())).unwrap()
}

fn eager() -> LuaEngine {
    LuaEngine::new(
        Arc::new(MiniLua::new()),
        EngineOptions {
            enable_proxy: false,
            ..EngineOptions::default()
        },
    )
    .unwrap()
}

#[test]
fn proxied_tables_are_live_in_both_directions() {
    let engine = proxied();
    engine.do_string_sync("t = { n = 1 }").unwrap();
    let t = match engine.global().get("t").unwrap() {
        LuaValue::Proxy(p) => p,
        other => panic!("expected a table proxy, got {other:?}"),
    };
    assert_eq!(
        t.get(&LuaValue::String("n".into())).unwrap(),
        LuaValue::Number(1.0)
    );

    // host write, script read
    t.set(&LuaValue::String("n".into()), &LuaValue::Number(5.0))
        .unwrap();
    assert_eq!(
        engine.do_string_sync("return t.n").unwrap(),
        LuaValue::Number(5.0)
    );

    // script write, host read
    engine.do_string_sync("t.m = 'live'").unwrap();
    assert_eq!(
        t.get(&LuaValue::String("m".into())).unwrap(),
        LuaValue::String("live".into())
    );
    assert_eq!(t.len().unwrap(), 2);
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn eager_tables_are_one_shot_copies() {
    let engine = eager();
    let copied = engine.do_string_sync("t = { n = 1 }\nreturn t").unwrap();
    assert_eq!(
        copied,
        LuaValue::Table(vec![(
            LuaValue::String("n".into()),
            LuaValue::Number(1.0)
        )])
    );

    // the copy does not follow later script mutation
    engine.do_string_sync("t.n = 99").unwrap();
    assert_eq!(
        copied,
        LuaValue::Table(vec![(
            LuaValue::String("n".into()),
            LuaValue::Number(1.0)
        )])
    );
}

#[test]
fn contiguous_sequences_become_arrays() {
    let engine = eager();
    assert_eq!(
        engine.do_string_sync("return { 1, 2, 3 }").unwrap(),
        LuaValue::Array(vec![
            LuaValue::Number(1.0),
            LuaValue::Number(2.0),
            LuaValue::Number(3.0),
        ])
    );
    // a keyed entry demotes the table to an ordered mapping
    assert_eq!(
        engine.do_string_sync("return { 1, k = 2 }").unwrap(),
        LuaValue::Table(vec![
            (LuaValue::Number(1.0), LuaValue::Number(1.0)),
            (LuaValue::String("k".into()), LuaValue::Number(2.0)),
        ])
    );
}

#[test]
fn host_arrays_and_tables_push_as_vm_tables() {
    let engine = proxied();
    engine
        .global()
        .set(
            "a",
            &LuaValue::Array(vec![LuaValue::Number(10.0), LuaValue::Number(20.0)]),
        )
        .unwrap();
    assert_eq!(
        engine.do_string_sync("return a[1] + a[2]").unwrap(),
        LuaValue::Number(30.0)
    );

    engine
        .global()
        .set(
            "m",
            &LuaValue::Table(vec![(
                LuaValue::String("x".into()),
                LuaValue::Number(7.0),
            )]),
        )
        .unwrap();
    assert_eq!(
        engine.do_string_sync("return m.x").unwrap(),
        LuaValue::Number(7.0)
    );
}

#[test]
fn tagged_userdata_keeps_identity_through_the_vm() {
    let engine = proxied();
    let payload: Arc<dyn std::any::Any> = Arc::new(String::from("payload"));
    let u = LuaValue::Userdata(LuaUserdata::new("widget", Arc::clone(&payload)));
    engine.global().set("u", &u).unwrap();

    let back = engine.do_string_sync("return u").unwrap();
    assert_eq!(back, u);
    match back {
        LuaValue::Userdata(ud) => {
            assert_eq!(ud.tag(), "widget");
            assert_eq!(ud.downcast_ref::<String>().map(String::as_str), Some("payload"));
        }
        other => panic!("expected userdata, got {other:?}"),
    }
}

#[test]
fn nested_userdata_survives_eager_materialization() {
    let engine = eager();
    let u = LuaValue::Userdata(LuaUserdata::new("widget", Arc::new(42_i32)));
    engine.global().set("u", &u).unwrap();

    match engine.do_string_sync("return { inner = u }").unwrap() {
        LuaValue::Table(pairs) => {
            assert_eq!(pairs.len(), 1);
            assert_eq!(pairs[0].0, LuaValue::String("inner".into()));
            assert_eq!(pairs[0].1, u);
        }
        other => panic!("expected an eager table, got {other:?}"),
    }
}

#[test]
fn cyclic_tables_are_refused_eagerly() {
    let engine = eager();
    match engine.do_string_sync("t = {}\nt.me = t\nreturn t") {
        Err(EngineError::Type(message)) => assert!(message.contains("cyclic")),
        other => panic!("expected a type error, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn error_values_round_trip_when_proxying_is_disabled() {
    let engine = eager();
    let e = LuaValue::Error(LuaError::new("bad state"));
    engine.global().set("e", &e).unwrap();
    assert_eq!(engine.do_string_sync("return e").unwrap(), e);

    // raising the wrapped error carries it back out as the error value
    match engine.do_string_sync("error(e)") {
        Err(EngineError::Runtime { value }) => assert_eq!(value, e),
        other => panic!("expected a runtime error, got {other:?}"),
    }
}

#[test]
fn promises_round_trip_with_shared_settle_state() {
    let engine = proxied();
    let d = lunar_engine::Deferred::new();
    engine
        .global()
        .set("p", &LuaValue::Promise(d.clone()))
        .unwrap();
    let back = match engine.global().get("p").unwrap() {
        LuaValue::Promise(back) => back,
        other => panic!("expected a promise, got {other:?}"),
    };
    assert!(back.ptr_eq(&d));
    d.resolve(LuaValue::Number(1.0));
    assert!(back.is_settled());
}

#[test]
fn failed_compound_pushes_leave_the_stack_untouched() {
    // error values have no handler in proxying mode, so the array push
    // fails after the backing table is already on the stack
    let engine = proxied();
    let bad = LuaValue::Array(vec![LuaValue::Error(LuaError::new("nope"))]);
    match engine.global().set("bad", &bad) {
        Err(EngineError::Type(_)) => {}
        other => panic!("expected a type error, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);

    // same for a failing nested value inside a keyed table
    let nested = LuaValue::Table(vec![(
        LuaValue::String("inner".into()),
        LuaValue::Error(LuaError::new("nope")),
    )]);
    match engine.global().set("bad", &nested) {
        Err(EngineError::Type(_)) => {}
        other => panic!("expected a type error, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn unconvertible_host_values_are_type_errors() {
    let engine = eager();
    // proxies only exist in proxying mode, so pushing one here cannot work
    let proxied_engine = proxied();
    proxied_engine.do_string_sync("t = {}").unwrap();
    let t = proxied_engine.global().get("t").unwrap();
    match engine.global().set("t", &t) {
        Err(EngineError::Type(_)) => {}
        other => panic!("expected a type error, got {other:?}"),
    }
}
