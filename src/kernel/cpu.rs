//! The simulated CPU: the single execution unit.
//!
//! A real single core runs one thing at a time; here that is represented by
//! a mutual-exclusion flag plus an "at most one attached thread" slot. The
//! flag is acquired and released by the kernel's state transitions, not by
//! the CPU itself, so its scope is exactly the interval a process spends
//! Running.
//!
//! Cancellation is cooperative: `cancel` flips a token and detaches
//! immediately; the thread loop observes the token at its next iteration
//! and winds itself down.

use super::executor::Executor;
use super::ipc::{self, Receiver};
use super::process::{ProcessTable, Slot, Status};
use super::thread::{Thread, run_loop};
use std::cell::{Cell, RefCell};
use std::rc::Rc;

/// Cooperative cancellation handle, checked by the thread loop at its
/// single yield point. Cancelling twice is harmless.
#[derive(Clone, Default)]
pub struct CancelToken {
    flag: Rc<Cell<bool>>,
}

impl CancelToken {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn cancel(&self) {
        self.flag.set(true);
    }

    pub fn is_cancelled(&self) -> bool {
        self.flag.get()
    }
}

/// The single CPU of the simulated machine
pub struct Cpu {
    /// Currently attached thread, shared with the running task
    thread: Option<Rc<RefCell<Thread>>>,
    /// Arena slot of the process owning the attached thread
    slot: Option<Slot>,
    /// Completion signal of the current run
    done: Option<Receiver<Status>>,
    /// Cancellation handle of the current run
    cancel: Option<CancelToken>,

    /// Tick counter driving clock interrupts; reset at every dispatch
    pub clock: u64,

    locked: bool,

    executor: Rc<RefCell<Executor>>,
    table: Rc<RefCell<ProcessTable>>,
}

impl Cpu {
    pub fn new(table: Rc<RefCell<ProcessTable>>, executor: Rc<RefCell<Executor>>) -> Self {
        Self {
            thread: None,
            slot: None,
            done: None,
            cancel: None,
            clock: 0,
            locked: false,
            executor,
            table,
        }
    }

    /// Start the attached thread as a task. Publishes exactly one status on
    /// the completion channel, retrievable via [`Cpu::completion`].
    pub fn run(&mut self) {
        let (Some(thread), Some(slot)) = (self.thread.clone(), self.slot) else {
            log::warn!("[CPU] run: no thread attached");
            return;
        };

        let (done_tx, done_rx) = ipc::channel(1);
        let token = CancelToken::new();
        self.done = Some(done_rx);
        self.cancel = Some(token.clone());

        self.executor
            .borrow_mut()
            .spawn(run_loop(slot, thread, self.table.clone(), token, done_tx));
    }

    /// Cooperatively stop the current thread and detach. If the owning
    /// process is still Running, its status becomes `status_if_running`
    /// first; the task observes the token later and reports that status.
    pub fn cancel(&mut self, status_if_running: Status) {
        if let Some(token) = self.cancel.take() {
            if let Some(slot) = self.slot {
                let mut table = self.table.borrow_mut();
                if let Some(p) = table.get_mut(slot)
                    && p.status == Status::Running
                {
                    p.status = status_if_running;
                }
            }
            token.cancel();
        }
        self.thread = None;
        self.slot = None;
        self.done = None;
    }

    /// Cancel the current thread, attach a new one, and run it.
    pub fn switch(&mut self, slot: Slot, thread: Rc<RefCell<Thread>>) {
        self.cancel(Status::Ready);
        self.thread = Some(thread);
        self.slot = Some(slot);
        self.run();
    }

    /// Completion signal of the current run. The caller should capture this
    /// right after dispatch: a later cancel detaches the CPU's own copy,
    /// but the final status still arrives on the captured receiver.
    pub fn completion(&self) -> Option<Receiver<Status>> {
        self.done.clone()
    }

    /// Take the mutual-exclusion flag. Owned by the kernel's Ready→Running
    /// transition.
    pub fn acquire(&mut self) {
        if self.locked {
            log::warn!("[CPU] acquire: already locked");
        }
        self.locked = true;
    }

    /// Release the mutual-exclusion flag, done at every transition away
    /// from Running.
    pub fn release(&mut self) {
        if !self.locked {
            log::warn!("[CPU] release: not locked");
        }
        self.locked = false;
    }

    pub fn is_locked(&self) -> bool {
        self.locked
    }
}
