//! Test support for the engine crates.
//!
//! Provides [`MiniLua`], an in-memory VM implementing the primitive call
//! catalogue over plain Rust collections, plus helpers for driving
//! futures by hand in tests.

#![warn(rust_2018_idioms)]

mod eval;
mod vm;

pub use vm::MiniLua;

use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll, Waker};

/// Poll `fut` once with a no-op waker.
pub fn poll_once<F: Future + Unpin>(fut: &mut F) -> Poll<F::Output> {
    let mut cx = Context::from_waker(Waker::noop());
    Pin::new(fut).poll(&mut cx)
}

/// Drive `fut` to completion by repeated polling.
///
/// Only suitable for futures that make progress on every poll; a future
/// waiting on an external event that never arrives will panic after a
/// bounded number of rounds rather than spin forever.
pub fn block_on<F: Future>(fut: F) -> F::Output {
    let mut fut = Box::pin(fut);
    let mut cx = Context::from_waker(Waker::noop());
    for _ in 0..10_000 {
        if let Poll::Ready(out) = fut.as_mut().poll(&mut cx) {
            return out;
        }
    }
    panic!("future did not complete; it is waiting on an external event");
}
