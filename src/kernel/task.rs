//! Task primitives for the executor.
//!
//! A task is one spawned future - in this simulator, almost always the CPU's
//! thread loop. Tasks are cooperative: they make progress only when polled
//! and must yield at their designated commit point.

use futures::future::LocalBoxFuture;
use std::future::Future;
use std::pin::Pin;
use std::task::{Context, Poll};

/// Unique identifier for a spawned task
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct TaskId(pub u64);

impl std::fmt::Display for TaskId {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "task:{}", self.0)
    }
}

/// A boxed future as stored by the executor. Everything is single-threaded,
/// so futures need not be Send.
pub type TaskFuture = LocalBoxFuture<'static, ()>;

/// Yield back to the executor once, staying ready for the next tick.
///
/// This is the single suspension point of a thread loop: one step, one
/// commit, one yield.
pub fn yield_now() -> YieldNow {
    YieldNow { yielded: false }
}

pub struct YieldNow {
    yielded: bool,
}

impl Future for YieldNow {
    type Output = ();

    fn poll(mut self: Pin<&mut Self>, cx: &mut Context<'_>) -> Poll<()> {
        if self.yielded {
            Poll::Ready(())
        } else {
            self.yielded = true;
            cx.waker().wake_by_ref();
            Poll::Pending
        }
    }
}
