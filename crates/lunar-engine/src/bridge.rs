//! Async call bridge.
//!
//! A [`PendingCall`] runs a chunk in a dedicated child execution context
//! and drives it as a coroutine. Each time the chunk suspends it must
//! yield a deferred; the call parks until the deferred settles, then
//! re-enters the chunk with the `(ok, v)` resume protocol: `ok` tells the
//! VM-side glue whether to return `v` from the await point or raise it.
//!
//! The future is lazy: nothing touches the VM until the first poll. Every
//! terminal path, including dropping an in-flight call, removes the child
//! thread's anchor slot from the main stack. Because unrelated calls may
//! remove slots below ours and shift indices, cleanup locates the slot by
//! the thread's VM identity pointer rather than trusting the recorded
//! index blindly.

use std::future::Future;
use std::mem;
use std::path::PathBuf;
use std::pin::Pin;
use std::task::{Context, Poll};

use lunar_abi::LuaType;

use crate::deferred::Deferred;
use crate::error::EngineError;
use crate::thread::{ResumeOutcome, Thread};
use crate::value::LuaValue;

enum Source {
    Text(String),
    File(PathBuf),
}

/// Child context plus the bookkeeping needed to unanchor it.
struct Child {
    thread: Thread,
    slot: i32,
    ptr: usize,
}

impl Child {
    /// Remove the thread object anchoring this child from the main stack.
    fn unanchor(&self, main: &Thread) {
        if main.is_closed() {
            return;
        }
        let l = main.state();
        let api = main.api();
        let top = api.lua_gettop(l);
        if self.slot >= 1
            && self.slot <= top
            && main.type_at(self.slot) == LuaType::Thread
            && api.lua_topointer(l, self.slot) == self.ptr
        {
            main.remove(self.slot);
            return;
        }
        // The recorded index was shifted by another call's cleanup; find
        // the thread by identity instead.
        for idx in 1..=top {
            if main.type_at(idx) == LuaType::Thread && api.lua_topointer(l, idx) == self.ptr {
                main.remove(idx);
                return;
            }
        }
    }
}

enum CallState {
    Created(Source),
    Running { child: Child, nargs: i32 },
    Suspended { child: Child, deferred: Deferred },
    Done,
}

/// A lazily-started, suspendable script call.
///
/// Resolves to the chunk's full result list. See [`PendingCall::first`]
/// for the common single-value case.
pub struct PendingCall {
    main: Thread,
    state: CallState,
}

impl PendingCall {
    pub(crate) fn from_text(main: Thread, script: String) -> Self {
        Self {
            main,
            state: CallState::Created(Source::Text(script)),
        }
    }

    pub(crate) fn from_file(main: Thread, path: PathBuf) -> Self {
        Self {
            main,
            state: CallState::Created(Source::File(path)),
        }
    }

    /// Await the call and keep only its first result, or `Nil` when the
    /// chunk returned nothing.
    pub async fn first(self) -> Result<LuaValue, EngineError> {
        let mut values = self.await?;
        if values.is_empty() {
            Ok(LuaValue::Nil)
        } else {
            Ok(values.remove(0))
        }
    }

    fn start(&self, source: &Source) -> Result<Child, EngineError> {
        let (thread, slot) = self.main.new_thread();
        let ptr = self.main.api().lua_topointer(self.main.state(), slot);
        let child = Child { thread, slot, ptr };
        let loaded = match source {
            Source::Text(script) => child.thread.load_string(script),
            Source::File(path) => child.thread.load_file(path),
        };
        if let Err(e) = loaded {
            child.unanchor(&self.main);
            return Err(e);
        }
        Ok(child)
    }

    fn fail(&self, child: Child, err: EngineError) -> Poll<Result<Vec<LuaValue>, EngineError>> {
        child.thread.set_top(0);
        child.unanchor(&self.main);
        Poll::Ready(Err(err))
    }

    /// Move the child's results onto the main stack, materialize them, and
    /// tear the child down.
    fn finish(
        &self,
        child: Child,
        nresults: i32,
    ) -> Poll<Result<Vec<LuaValue>, EngineError>> {
        let base = self.main.top();
        child.thread.move_values(&self.main, nresults);
        let values = self.main.collect_values(base, nresults);
        self.main.set_top(base);
        child.unanchor(&self.main);
        Poll::Ready(values)
    }
}

impl Future for PendingCall {
    type Output = Result<Vec<LuaValue>, EngineError>;

    fn poll(self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<Self::Output> {
        let this = self.get_mut();
        loop {
            match mem::replace(&mut this.state, CallState::Done) {
                CallState::Created(source) => match this.start(&source) {
                    Ok(child) => this.state = CallState::Running { child, nargs: 0 },
                    Err(e) => return Poll::Ready(Err(e)),
                },
                CallState::Running { child, nargs } => {
                    match child.thread.resume(nargs) {
                        Ok(ResumeOutcome::Completed { nresults }) => {
                            return this.finish(child, nresults);
                        }
                        Ok(ResumeOutcome::Yielded { nvalues }) => {
                            if nvalues < 1 {
                                return this.fail(
                                    child,
                                    EngineError::Type(
                                        "coroutine suspended without yielding a value".into(),
                                    ),
                                );
                            }
                            let yielded = match child.thread.value_at(1) {
                                Ok(v) => v,
                                Err(e) => return this.fail(child, e),
                            };
                            child.thread.set_top(0);
                            match yielded {
                                LuaValue::Promise(deferred) => {
                                    this.state = CallState::Suspended { child, deferred };
                                }
                                other => {
                                    return this.fail(
                                        child,
                                        EngineError::Type(format!(
                                            "await target must be a deferred, got {}",
                                            other.kind_name()
                                        )),
                                    );
                                }
                            }
                        }
                        Err(e) => return this.fail(child, e),
                    }
                }
                CallState::Suspended { child, deferred } => {
                    match deferred.poll_settled(cx) {
                        Poll::Pending => {
                            this.state = CallState::Suspended { child, deferred };
                            return Poll::Pending;
                        }
                        Poll::Ready(settled) => {
                            let (ok, value) = match settled {
                                Ok(v) => (true, v),
                                Err(v) => (false, v),
                            };
                            if let Err(e) = child
                                .thread
                                .push(&LuaValue::Boolean(ok))
                                .and_then(|_| child.thread.push(&value))
                            {
                                return this.fail(child, e);
                            }
                            this.state = CallState::Running { child, nargs: 2 };
                        }
                    }
                }
                CallState::Done => {
                    return Poll::Ready(Err(EngineError::Type(
                        "pending call polled after completion".into(),
                    )));
                }
            }
        }
    }
}

impl Drop for PendingCall {
    fn drop(&mut self) {
        let child = match mem::replace(&mut self.state, CallState::Done) {
            CallState::Running { child, .. } => child,
            CallState::Suspended { child, .. } => child,
            _ => return,
        };
        if !self.main.is_closed() {
            child.thread.set_top(0);
            child.unanchor(&self.main);
        }
    }
}

impl std::fmt::Debug for PendingCall {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.state {
            CallState::Created(_) => "created",
            CallState::Running { .. } => "running",
            CallState::Suspended { .. } => "suspended",
            CallState::Done => "done",
        };
        f.debug_struct("PendingCall").field("state", &state).finish()
    }
}
