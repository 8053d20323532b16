//! Thread execution engine.
//!
//! A thread wraps a process's step function. One step is one logical
//! instruction of simulated execution: the engine never runs two steps
//! without passing a commit point, so the kernel always has a consistent
//! place to interleave clock ticks and cancellation.
//!
//! The engine itself is [`run_loop`], the future the CPU spawns: check the
//! cancel token, run one step, commit, publish or yield.

use super::cpu::CancelToken;
use super::device::Device;
use super::ipc::{Chan, Sender};
use super::mem::Value;
use super::process::{ProcessTable, Slot, Status};
use super::task::yield_now;
use super::{InterruptKind, Kernel};
use std::cell::RefCell;
use std::rc::{Rc, Weak};

/// A process's step function. Called once per scheduling commit; must stay
/// inside one logical instruction and then return.
///
/// Returning [`Status::Running`] means "call me again next step"; any other
/// status ends the dispatch and triggers the corresponding kernel
/// transition. State that must survive across steps lives in the closure's
/// captures (or in the var pool).
pub type StepFn = Box<dyn FnMut(&mut ExecutionContext) -> Status>;

/// The executable wrapper around a step function
pub struct Thread {
    step: StepFn,
    pub context: ExecutionContext,
    /// Declared time budget; tracked per commit, not consulted by the
    /// reference schedulers
    remaining_time: u64,
}

impl Thread {
    pub fn new(step: StepFn, context: ExecutionContext, remaining_time: u64) -> Self {
        Self {
            step,
            context,
            remaining_time,
        }
    }

    pub fn remaining_time(&self) -> u64 {
        self.remaining_time
    }

    /// Run one step and commit it.
    pub(crate) fn run_once(&mut self) -> Status {
        let status = (self.step)(&mut self.context);
        self.context.commit();
        self.remaining_time = self.remaining_time.saturating_sub(1);
        status
    }
}

/// Per-thread execution context: the process's arena slot, a capability
/// back into the kernel, and the program counter.
///
/// This is the surface a step function programs against - system calls,
/// device handles and the var pool all route through here.
pub struct ExecutionContext {
    slot: Slot,
    kernel: Weak<Kernel>,
    pc: u64,
}

impl ExecutionContext {
    pub fn new(slot: Slot, kernel: Weak<Kernel>) -> Self {
        Self {
            slot,
            kernel,
            pc: 0,
        }
    }

    pub fn slot(&self) -> Slot {
        self.slot
    }

    /// Program counter: number of committed steps.
    pub fn pc(&self) -> u64 {
        self.pc
    }

    /// This process's id, if the kernel is still around.
    pub fn pid(&self) -> Option<String> {
        let kernel = self.kernel.upgrade()?;
        kernel.process_id(self.slot)
    }

    /// Commit one step: advance the program counter and tick the kernel
    /// clock. The engine calls this after every step; a step body may also
    /// call it itself to account for extra simulated work.
    pub fn commit(&mut self) {
        self.pc += 1;
        match self.kernel.upgrade() {
            Some(kernel) => kernel.clock_tick(),
            None => log::warn!("[CTX] commit: no kernel, no clock to tick"),
        }
    }

    /// System call: create a new process at the tail of the ready queue.
    pub fn create_process(&self, id: &str, priority: u64, time_budget: u64, step: StepFn) {
        match self.kernel.upgrade() {
            Some(kernel) => {
                kernel.create_process(id, priority, time_budget, step);
            }
            None => log::warn!("[CTX] create_process: no kernel"),
        }
    }

    /// System call: request a kernel service that blocks this process until
    /// an interrupt handler services it.
    ///
    /// The channel carries the protocol payload for the given kind and must
    /// be buffered large enough for every value, or the request stalls
    /// forever. The step function must return [`Status::Running`] after
    /// calling this, so the engine observes the cancellation at its next
    /// loop iteration.
    pub fn interrupt_request(&self, kind: InterruptKind, chan: Chan<Value>) {
        match self.kernel.upgrade() {
            Some(kernel) => kernel.interrupt_request(self.slot, kind, chan),
            None => log::warn!("[CTX] interrupt_request: no kernel"),
        }
    }

    /// A device granted to this process (by name).
    pub fn device(&self, name: &str) -> Option<Rc<Device>> {
        let kernel = self.kernel.upgrade()?;
        kernel.process_device(self.slot, name)
    }

    // Var pool: a string-keyed mapping conventionally installed in the
    // process's first memory cell. All accessors fail soft, logging instead
    // of propagating.

    /// Install the var pool. No-op (false) if the cell is already occupied.
    pub fn init_var_pool(&self) -> bool {
        match self.kernel.upgrade() {
            Some(kernel) => kernel.init_var_pool(self.slot),
            None => {
                log::warn!("[CTX] init_var_pool: no kernel");
                false
            }
        }
    }

    /// Read a variable; Null on miss or when no pool is installed.
    pub fn get_var(&self, name: &str) -> Value {
        self.try_get_var(name).unwrap_or_default()
    }

    /// Read a variable, reporting presence.
    pub fn try_get_var(&self, name: &str) -> Option<Value> {
        let kernel = self.kernel.upgrade()?;
        kernel
            .with_var_pool(self.slot, |pool| pool.get(name).cloned())
            .flatten()
    }

    /// Write a variable, creating or overwriting it. False when no pool is
    /// installed.
    pub fn set_var(&self, name: &str, value: Value) -> bool {
        let Some(kernel) = self.kernel.upgrade() else {
            log::warn!("[CTX] set_var: no kernel");
            return false;
        };
        kernel
            .with_var_pool(self.slot, |pool| {
                pool.insert(name.to_string(), value);
            })
            .is_some()
    }
}

/// The thread loop the CPU spawns as a task.
///
/// On cancellation, the status the cancel stored on the process is
/// published as the completion status, and the process status is restored
/// to Running so the kernel's subsequent transition finds the state it
/// expects.
pub(crate) async fn run_loop(
    slot: Slot,
    thread: Rc<RefCell<Thread>>,
    table: Rc<RefCell<ProcessTable>>,
    token: CancelToken,
    done: Sender<Status>,
) {
    loop {
        if token.is_cancelled() {
            let status = {
                let mut table = table.borrow_mut();
                match table.get_mut(slot) {
                    Some(p) => {
                        let s = p.status;
                        p.status = Status::Running;
                        s
                    }
                    None => Status::Done,
                }
            };
            log::info!("[CPU] thread loop cancelled at {}, reporting {}", slot, status);
            let _ = done.send(status);
            return;
        }

        let status = thread.borrow_mut().run_once();
        if status != Status::Running {
            let _ = done.send(status);
            return;
        }
        yield_now().await;
    }
}
