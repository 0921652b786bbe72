//! Async call bridge tests: suspension on deferreds, the resume protocol,
//! and child-slot cleanup on every exit path.

use std::sync::Arc;
use std::task::Poll;

use lunar_engine::{Deferred, EngineError, EngineOptions, LuaEngine, LuaValue};
use lunar_testing::{block_on, poll_once, MiniLua};

fn engine() -> LuaEngine {
    LuaEngine::with_defaults(Arc::new(MiniLua::new())).unwrap()
}

#[test]
fn synchronous_scripts_complete_without_suspending() {
    let engine = engine();
    let results = block_on(engine.do_string("return 2 * 3")).unwrap();
    assert_eq!(results, vec![LuaValue::Number(6.0)]);
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn first_keeps_only_the_leading_result() {
    let engine = engine();
    assert_eq!(
        block_on(engine.do_string("return 7, 8").first()).unwrap(),
        LuaValue::Number(7.0)
    );
    assert_eq!(
        block_on(engine.do_string("x = 1").first()).unwrap(),
        LuaValue::Nil
    );
}

#[test]
fn a_resolved_deferred_completes_the_call() {
    let engine = engine();
    let d = Deferred::new();
    engine
        .global()
        .set("d", &LuaValue::Promise(d.clone()))
        .unwrap();

    let mut call = engine.do_string("local x = await(d)\nreturn x + 1");
    assert!(poll_once(&mut call).is_pending());
    // the child thread is anchored on the main stack while suspended
    assert_eq!(engine.global().top(), 1);

    d.resolve(LuaValue::Number(41.0));
    match poll_once(&mut call) {
        Poll::Ready(Ok(results)) => assert_eq!(results, vec![LuaValue::Number(42.0)]),
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn a_rejected_deferred_fails_the_call() {
    let engine = engine();
    let d = Deferred::new();
    engine
        .global()
        .set("d", &LuaValue::Promise(d.clone()))
        .unwrap();

    let mut call = engine.do_string("local x = await(d)\nreturn x");
    assert!(poll_once(&mut call).is_pending());

    d.reject(LuaValue::String("denied".into()));
    match poll_once(&mut call) {
        Poll::Ready(Err(EngineError::Runtime { value })) => {
            assert_eq!(value, LuaValue::String("denied".into()));
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn sequential_awaits_observe_settlements_in_order() {
    let engine = engine();
    let d1 = Deferred::new();
    let d2 = Deferred::new();
    engine
        .global()
        .set("d1", &LuaValue::Promise(d1.clone()))
        .unwrap();
    engine
        .global()
        .set("d2", &LuaValue::Promise(d2.clone()))
        .unwrap();

    let mut call =
        engine.do_string("local a = await(d1)\nlocal b = await(d2)\nreturn a .. b");
    assert!(poll_once(&mut call).is_pending());

    // settling the second deferred first makes no progress
    d2.resolve(LuaValue::String("b".into()));
    assert!(poll_once(&mut call).is_pending());

    d1.resolve(LuaValue::String("a".into()));
    match poll_once(&mut call) {
        Poll::Ready(Ok(results)) => assert_eq!(results, vec![LuaValue::String("ab".into())]),
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn yielding_a_non_deferred_fails_the_call() {
    let engine = engine();
    let mut call = engine.do_string("await(5)\nreturn 1");
    match poll_once(&mut call) {
        Poll::Ready(Err(EngineError::Type(message))) => {
            assert!(message.contains("deferred"));
        }
        other => panic!("expected a type error, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn load_errors_fail_the_call_before_it_runs() {
    let engine = engine();
    let mut call = engine.do_string("return 1 +");
    match poll_once(&mut call) {
        Poll::Ready(Err(EngineError::Load { .. })) => {}
        other => panic!("expected a load error, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn script_errors_fail_the_call() {
    let engine = engine();
    let mut call = engine.do_string("error('async boom')");
    match poll_once(&mut call) {
        Poll::Ready(Err(EngineError::Runtime { value })) => {
            assert_eq!(value, LuaValue::String("async boom".into()));
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn dropping_an_in_flight_call_removes_its_slot() {
    let engine = engine();
    let d = Deferred::new();
    engine
        .global()
        .set("d", &LuaValue::Promise(d))
        .unwrap();

    let mut call = engine.do_string("local x = await(d)\nreturn x");
    assert!(poll_once(&mut call).is_pending());
    assert_eq!(engine.global().top(), 1);

    drop(call);
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn unpolled_calls_never_touch_the_vm() {
    let engine = engine();
    let call = engine.do_string("error('never runs')");
    assert_eq!(engine.global().top(), 0);
    drop(call);
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn interleaved_calls_clean_up_shifted_slots() {
    let engine = engine();
    let d1 = Deferred::new();
    let d2 = Deferred::new();
    engine
        .global()
        .set("d1", &LuaValue::Promise(d1.clone()))
        .unwrap();
    engine
        .global()
        .set("d2", &LuaValue::Promise(d2.clone()))
        .unwrap();

    let mut c1 = engine.do_string("local a = await(d1)\nreturn a");
    let mut c2 = engine.do_string("local b = await(d2)\nreturn b");
    assert!(poll_once(&mut c1).is_pending());
    assert!(poll_once(&mut c2).is_pending());
    assert_eq!(engine.global().top(), 2);

    // completing the first call shifts the second call's anchor down
    d1.resolve(LuaValue::Number(1.0));
    assert!(matches!(poll_once(&mut c1), Poll::Ready(Ok(_))));
    assert_eq!(engine.global().top(), 1);

    d2.resolve(LuaValue::Number(2.0));
    match poll_once(&mut c2) {
        Poll::Ready(Ok(results)) => assert_eq!(results, vec![LuaValue::Number(2.0)]),
        other => panic!("expected completion, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn injected_promise_constructors_are_awaitable() {
    let engine = LuaEngine::new(
        Arc::new(MiniLua::new()),
        EngineOptions {
            inject_objects: true,
            ..EngineOptions::default()
        },
    )
    .unwrap();

    assert_eq!(
        block_on(engine.do_string("local p = Promise.resolve(9)\nreturn await(p)").first())
            .unwrap(),
        LuaValue::Number(9.0)
    );

    match block_on(engine.do_string("local p = Promise.reject('no')\nreturn await(p)")) {
        Err(EngineError::Runtime { value }) => {
            assert_eq!(value, LuaValue::String("no".into()));
        }
        other => panic!("expected a runtime error, got {other:?}"),
    }
    assert_eq!(engine.global().top(), 0);
}

#[test]
fn host_can_settle_a_promise_created_by_the_script() {
    let engine = LuaEngine::new(
        Arc::new(MiniLua::new()),
        EngineOptions {
            inject_objects: true,
            ..EngineOptions::default()
        },
    )
    .unwrap();

    engine
        .do_string_sync("p = Promise.create()")
        .unwrap();
    let d = match engine.global().get("p").unwrap() {
        LuaValue::Promise(d) => d,
        other => panic!("expected a promise, got {other:?}"),
    };

    let mut call = engine.do_string("local v = await(p)\nreturn v * 2");
    assert!(poll_once(&mut call).is_pending());
    d.resolve(LuaValue::Number(21.0));
    match poll_once(&mut call) {
        Poll::Ready(Ok(results)) => assert_eq!(results, vec![LuaValue::Number(42.0)]),
        other => panic!("expected completion, got {other:?}"),
    }
}
