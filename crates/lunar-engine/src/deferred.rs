//! Host deferred values.
//!
//! A [`Deferred`] is the host half of the await protocol: when a script
//! suspends on a deferred, the async call bridge parks the pending call on
//! it and resumes the script once it settles. It is deliberately
//! scheduler-agnostic: settlement wakes registered wakers, nothing more.

use std::sync::Arc;
use std::task::{Context, Poll, Waker};

use parking_lot::Mutex;

use crate::value::LuaValue;

enum Settle {
    Pending,
    Resolved(LuaValue),
    Rejected(LuaValue),
}

struct DeferredInner {
    state: Settle,
    wakers: Vec<Waker>,
}

/// A shared, clonable deferred result. The first `resolve` or `reject`
/// wins; later settlements are ignored.
#[derive(Clone)]
pub struct Deferred {
    inner: Arc<Mutex<DeferredInner>>,
}

impl Deferred {
    /// Create an unsettled deferred.
    pub fn new() -> Self {
        Self {
            inner: Arc::new(Mutex::new(DeferredInner {
                state: Settle::Pending,
                wakers: Vec::new(),
            })),
        }
    }

    /// Settle successfully with `value`, waking any parked calls.
    pub fn resolve(&self, value: LuaValue) {
        self.settle(Settle::Resolved(value));
    }

    /// Settle with a rejection, waking any parked calls. The rejection
    /// value is re-raised inside the suspended script.
    pub fn reject(&self, value: LuaValue) {
        self.settle(Settle::Rejected(value));
    }

    /// Whether this deferred has settled either way.
    pub fn is_settled(&self) -> bool {
        !matches!(self.inner.lock().state, Settle::Pending)
    }

    /// Identity comparison.
    pub fn ptr_eq(&self, other: &Self) -> bool {
        Arc::ptr_eq(&self.inner, &other.inner)
    }

    fn settle(&self, state: Settle) {
        let wakers = {
            let mut inner = self.inner.lock();
            if !matches!(inner.state, Settle::Pending) {
                return;
            }
            inner.state = state;
            std::mem::take(&mut inner.wakers)
        };
        for waker in wakers {
            waker.wake();
        }
    }

    /// Poll for settlement, registering the caller's waker while pending.
    pub(crate) fn poll_settled(&self, cx: &mut Context<'_>) -> Poll<Result<LuaValue, LuaValue>> {
        let mut inner = self.inner.lock();
        match &inner.state {
            Settle::Pending => {
                if !inner.wakers.iter().any(|w| w.will_wake(cx.waker())) {
                    inner.wakers.push(cx.waker().clone());
                }
                Poll::Pending
            }
            Settle::Resolved(v) => Poll::Ready(Ok(v.clone())),
            Settle::Rejected(v) => Poll::Ready(Err(v.clone())),
        }
    }
}

impl Default for Deferred {
    fn default() -> Self {
        Self::new()
    }
}

impl std::fmt::Debug for Deferred {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        let state = match self.inner.lock().state {
            Settle::Pending => "pending",
            Settle::Resolved(_) => "resolved",
            Settle::Rejected(_) => "rejected",
        };
        write!(f, "Deferred({state})")
    }
}
