//! The kernel of the simulated machine.
//!
//! One CPU, one clock, one interrupt queue. Processes are cooperative step
//! functions wrapped in threads; the kernel preempts them with a clock
//! interrupt every `clock_interval` committed steps and otherwise moves
//! them between the ready, running and blocked states on the scheduler's
//! behalf.
//!
//! [`Kernel`] is handed around as `Rc<Kernel>` with interior mutability per
//! subsystem. Methods take `&self` and scope their borrows tightly, so a
//! step function running inside the executor can call back into the kernel
//! (commit a step, raise an interrupt, touch its var pool) without
//! conflicting with the scheduler that drove it.

pub mod cpu;
pub mod device;
pub mod executor;
pub mod interrupt;
pub mod ipc;
pub mod mem;
pub mod process;
pub mod scheduler;
pub mod task;
pub mod thread;

#[cfg(test)]
mod scenarios;

pub use device::{Device, FlowControl, Pipe, PipeError, STDIN, STDOUT};
pub use interrupt::{Interrupt, InterruptKind};
pub use ipc::{Chan, Receiver, Sender};
pub use mem::{MemSlice, Memory, Object, Value};
pub use process::{Process, ProcessTable, Slot, Status};
pub use scheduler::{FcfsScheduler, NoopScheduler, Scheduler};
pub use thread::{ExecutionContext, StepFn, Thread};

use cpu::Cpu;
use executor::Executor;
use std::cell::{Cell, RefCell};
use std::collections::{BTreeMap, HashMap, VecDeque};
use std::rc::{Rc, Weak};
use std::time::Duration;

/// Committed steps an injected idle process runs before retiring
const IDLE_STEPS: u64 = 3;

/// Tunables of the simulated machine
#[derive(Debug, Clone)]
pub struct KernelConfig {
    /// Committed steps per time slice; a clock interrupt fires when the
    /// running process exhausts one
    pub clock_interval: u64,
    /// Real-time delay per clock tick, for watching a run unfold. Zero by
    /// default so tests run at full speed.
    pub tick_delay: Duration,
    /// Consecutive executor ticks with no task polled before a wait is
    /// declared stalled
    pub stall_ticks: u32,
}

impl Default for KernelConfig {
    fn default() -> Self {
        Self {
            clock_interval: 10,
            tick_delay: Duration::ZERO,
            stall_ticks: 4,
        }
    }
}

pub struct Kernel {
    this: Weak<Kernel>,
    config: KernelConfig,

    cpu: RefCell<Cpu>,
    memory: RefCell<Memory>,
    devices: RefCell<HashMap<String, Rc<Device>>>,
    table: Rc<RefCell<ProcessTable>>,
    interrupts: RefCell<VecDeque<Interrupt>>,
    executor: Rc<RefCell<Executor>>,
    scheduler: RefCell<Box<dyn Scheduler>>,

    idle_seq: Cell<u64>,
}

impl Kernel {
    pub fn new() -> Rc<Self> {
        Self::with_config(KernelConfig::default())
    }

    pub fn with_config(mut config: KernelConfig) -> Rc<Self> {
        config.clock_interval = config.clock_interval.max(1);
        config.stall_ticks = config.stall_ticks.max(1);

        let table = Rc::new(RefCell::new(ProcessTable::new()));
        let executor = Rc::new(RefCell::new(Executor::new()));
        let os = Rc::new_cyclic(|this| Self {
            this: this.clone(),
            config,
            cpu: RefCell::new(Cpu::new(table.clone(), executor.clone())),
            memory: RefCell::new(Memory::new()),
            devices: RefCell::new(HashMap::new()),
            table,
            interrupts: RefCell::new(VecDeque::new()),
            executor,
            scheduler: RefCell::new(Box::new(FcfsScheduler::new())),
            idle_seq: Cell::new(0),
        });
        os.register_device(Rc::new(Device::stdout()));
        os.register_device(Rc::new(Device::stdin()));
        os.spawn_idle();
        os
    }

    pub fn set_scheduler(&self, scheduler: Box<dyn Scheduler>) {
        *self.scheduler.borrow_mut() = scheduler;
    }

    /// Hand control to the scheduler until no runnable work is left.
    pub fn boot(&self) {
        log::info!("[OS] booting");
        self.scheduler.borrow().schedule(self);
        log::info!("[OS] halted");
    }

    // Process lifecycle

    /// Admit a new process at the tail of the ready queue. Its first memory
    /// cell is allocated here; the var pool convention puts the pool there
    /// once the process asks for one.
    pub fn create_process(&self, id: &str, priority: u64, time_budget: u64, step: StepFn) -> Slot {
        let base = {
            let mut memory = self.memory.borrow_mut();
            memory.push(Object::new(id));
            memory.len() - 1
        };
        let slot = {
            let mut table = self.table.borrow_mut();
            let slot = table.insert_with(|slot| {
                let context = ExecutionContext::new(slot, self.this.clone());
                Process::new(id, priority, Thread::new(step, context, time_budget), MemSlice::single(base))
            });
            table.ready.push_back(slot);
            slot
        };
        log::info!("[OS] created process {} at {}", id, slot);
        slot
    }

    /// Inject an idle process. Seeded once at construction and again by the
    /// scheduler when the machine stalls; each one burns a few clock ticks
    /// and retires.
    pub fn spawn_idle(&self) {
        let n = self.idle_seq.get();
        self.idle_seq.set(n + 1);
        let id = format!("idle-{n}");
        self.create_process(
            &id,
            0,
            IDLE_STEPS + 1,
            Box::new(|ctx| {
                if ctx.pc() < IDLE_STEPS {
                    Status::Running
                } else {
                    Status::Done
                }
            }),
        );
    }

    // Interrupts and the clock

    /// Queue an interrupt request on behalf of the process at `slot` and
    /// preempt it. The requester stays Blocked until the handler readies it.
    pub fn interrupt_request(&self, slot: Slot, kind: InterruptKind, chan: Chan<Value>) {
        let Some(pid) = self.process_id(slot) else {
            log::warn!("[OS] interrupt request from unknown {}", slot);
            return;
        };
        log::info!("[OS] {} requested {}", pid, kind);
        self.interrupts
            .borrow_mut()
            .push_back(Interrupt::new(&pid, kind, chan));
        self.cpu.borrow_mut().cancel(Status::Blocked);
    }

    /// Advance the software clock by one tick. Called once per committed
    /// step; when a full slice has elapsed under a Running process, a clock
    /// interrupt preempts it and the clock restarts.
    pub fn clock_tick(&self) {
        let fire = {
            let mut cpu = self.cpu.borrow_mut();
            cpu.clock += 1;
            cpu.clock % self.config.clock_interval == 0
        };
        if !self.config.tick_delay.is_zero() {
            std::thread::sleep(self.config.tick_delay);
        }
        if !fire {
            return;
        }
        let running = {
            let table = self.table.borrow();
            table
                .running
                .filter(|&slot| table.status(slot) == Some(Status::Running))
        };
        if let Some(slot) = running {
            self.interrupt_request(slot, InterruptKind::Clock, Chan::bounded(1));
            self.cpu.borrow_mut().clock = 0;
        }
    }

    /// Drain the interrupt queue in arrival order. Each handled interrupt
    /// costs one clock tick, like any other kernel work.
    pub fn handle_interrupts(&self) {
        loop {
            let Some(int) = self.interrupts.borrow_mut().pop_front() else {
                return;
            };
            log::info!("[INT] handling {} from {}", int.kind, int.data.pid);
            (int.handler)(self, &int.data);
            self.clock_tick();
        }
    }

    pub fn pending_interrupts(&self) -> Vec<InterruptKind> {
        self.interrupts.borrow().iter().map(|i| i.kind).collect()
    }

    // State transitions. These are the only places the ready / running /
    // blocked membership changes, and the only places the CPU lock moves.

    /// Dispatch the first ready process with the given id. Returns the
    /// completion receiver of the run; the caller must hold it across the
    /// wait, because a preemption detaches the CPU's own copy.
    pub fn ready_to_running(&self, pid: &str) -> Option<Receiver<Status>> {
        let (slot, thread) = {
            let mut table = self.table.borrow_mut();
            let Some((index, slot)) = table.find_ready(pid) else {
                log::warn!("[OS] ready_to_running: no ready process {}", pid);
                return None;
            };
            table.ready.remove(index);
            table.running = Some(slot);
            let p = table.get_mut(slot)?;
            p.status = Status::Running;
            (slot, p.thread.clone())
        };
        log::info!("[OS] dispatching {} at {}", pid, slot);
        let mut cpu = self.cpu.borrow_mut();
        cpu.acquire();
        cpu.clock = 0;
        cpu.switch(slot, thread);
        cpu.completion()
    }

    pub fn running_to_ready(&self) {
        self.finish_running(Status::Ready);
    }

    pub fn running_to_blocked(&self) {
        self.finish_running(Status::Blocked);
    }

    pub fn running_to_done(&self) {
        self.finish_running(Status::Done);
    }

    fn finish_running(&self, status: Status) {
        {
            let mut table = self.table.borrow_mut();
            let Some(slot) = table.running else {
                log::warn!("[OS] transition to {} with no running process", status);
                return;
            };
            let Some(p) = table.get_mut(slot) else {
                return;
            };
            p.status = status;
            log::info!("[OS] {} is now {}", p.id, status);
            match status {
                Status::Ready => table.ready.push_back(slot),
                Status::Blocked => table.blocked.push(slot),
                _ => {}
            }
        }
        self.cpu.borrow_mut().release();
    }

    /// Ready a blocked process by id. On an unknown or unblocked id this is
    /// a logged no-op, so handlers can ready their requester without
    /// checking whether it already moved on.
    pub fn blocked_to_ready(&self, pid: &str) {
        let mut table = self.table.borrow_mut();
        let Some((index, slot)) = table.find_blocked(pid) else {
            log::warn!("[OS] blocked_to_ready: no blocked process {}", pid);
            return;
        };
        table.blocked.remove(index);
        if let Some(p) = table.get_mut(slot) {
            p.status = Status::Ready;
        }
        table.ready.push_back(slot);
        log::info!("[OS] {} is ready again", pid);
    }

    /// Poll a completion receiver while driving the executor. `None` means
    /// the wait stalled: either no receiver was given, or `stall_ticks`
    /// executor ticks in a row polled nothing.
    pub fn wait_for_completion(&self, done: Option<&Receiver<Status>>) -> Option<Status> {
        let done = done?;
        let mut stalled = 0;
        loop {
            if let Ok(status) = done.try_recv() {
                return Some(status);
            }
            if self.executor.borrow_mut().tick() == 0 {
                stalled += 1;
                if stalled >= self.config.stall_ticks {
                    return None;
                }
            } else {
                stalled = 0;
            }
        }
    }

    // Introspection

    pub fn first_ready_id(&self) -> Option<String> {
        let table = self.table.borrow();
        let slot = *table.ready.front()?;
        Some(table.get(slot)?.id.clone())
    }

    pub fn running_id(&self) -> Option<String> {
        let table = self.table.borrow();
        Some(table.get(table.running?)?.id.clone())
    }

    pub fn running_pc(&self) -> Option<u64> {
        let table = self.table.borrow();
        let pc = table.get(table.running?)?.thread.borrow().context.pc();
        Some(pc)
    }

    /// Is the process the running pointer names actually Running? The
    /// pointer goes stale after a transition away from Running, which is
    /// exactly what this distinguishes.
    pub fn running_is_running(&self) -> bool {
        let table = self.table.borrow();
        table
            .running
            .is_some_and(|slot| table.status(slot) == Some(Status::Running))
    }

    /// Anything left to schedule or wait for?
    pub fn has_work(&self) -> bool {
        let table = self.table.borrow();
        !table.ready.is_empty()
            || !table.blocked.is_empty()
            || table
                .running
                .is_some_and(|slot| table.status(slot) != Some(Status::Done))
    }

    pub fn ready_ids(&self) -> Vec<String> {
        self.table.borrow().ready_ids()
    }

    pub fn blocked_ids(&self) -> Vec<String> {
        self.table.borrow().blocked_ids()
    }

    pub fn process_status(&self, pid: &str) -> Option<Status> {
        let table = self.table.borrow();
        let slot = table.find(pid)?;
        table.status(slot)
    }

    pub fn process_id(&self, slot: Slot) -> Option<String> {
        Some(self.table.borrow().get(slot)?.id.clone())
    }

    // Device registry

    pub fn device(&self, name: &str) -> Option<Rc<Device>> {
        self.devices.borrow().get(name).cloned()
    }

    pub fn register_device(&self, device: Rc<Device>) {
        self.devices
            .borrow_mut()
            .insert(device.id().to_string(), device);
    }

    /// Drop a device from the registry. Processes holding a reference keep
    /// it alive until they release theirs.
    pub fn remove_device(&self, name: &str) {
        self.devices.borrow_mut().remove(name);
    }

    /// Grant a registered device to the first process with the given id.
    pub fn attach_device(&self, pid: &str, device: Rc<Device>) -> bool {
        let mut table = self.table.borrow_mut();
        let Some(slot) = table.find(pid) else {
            return false;
        };
        let Some(p) = table.get_mut(slot) else {
            return false;
        };
        p.devices.insert(device.id().to_string(), device);
        true
    }

    pub(crate) fn process_device(&self, slot: Slot, name: &str) -> Option<Rc<Device>> {
        self.table.borrow().get(slot)?.devices.get(name).cloned()
    }

    // Var pool

    /// Install a var pool in the process's first memory cell. False if the
    /// cell is already occupied.
    pub(crate) fn init_var_pool(&self, slot: Slot) -> bool {
        let Some(base) = self.slice_base(slot) else {
            return false;
        };
        let mut memory = self.memory.borrow_mut();
        let Some(object) = memory.get_mut(base) else {
            return false;
        };
        if !object.content.is_null() {
            return false;
        }
        object.content = Value::Pool(BTreeMap::new());
        true
    }

    /// Run `f` against the process's var pool. None when the pool was never
    /// installed or the cell holds something else.
    pub(crate) fn with_var_pool<R>(
        &self,
        slot: Slot,
        f: impl FnOnce(&mut BTreeMap<String, Value>) -> R,
    ) -> Option<R> {
        let base = self.slice_base(slot)?;
        let mut memory = self.memory.borrow_mut();
        match memory.get_mut(base).map(|object| &mut object.content) {
            Some(Value::Pool(pool)) => Some(f(pool)),
            Some(Value::Null) | None => None,
            Some(other) => {
                log::error!("[OS] memory cell {} holds {} instead of a var pool", base, other);
                None
            }
        }
    }

    fn slice_base(&self, slot: Slot) -> Option<usize> {
        Some(self.table.borrow().get(slot)?.memory.base)
    }

    #[cfg(test)]
    pub(crate) fn clock(&self) -> u64 {
        self.cpu.borrow().clock
    }

    #[cfg(test)]
    pub(crate) fn cpu_locked(&self) -> bool {
        self.cpu.borrow().is_locked()
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_new_seeds_stdio_and_idle() {
        let os = Kernel::new();
        assert!(os.device(STDOUT).is_some());
        assert!(os.device(STDIN).is_some());
        assert_eq!(os.ready_ids(), vec!["idle-0".to_string()]);
    }

    #[test]
    fn test_create_process_joins_ready_queue() {
        let os = Kernel::new();
        os.create_process("a", 0, 5, Box::new(|_| Status::Done));
        os.create_process("b", 1, 5, Box::new(|_| Status::Done));
        assert_eq!(os.ready_ids(), vec!["idle-0", "a", "b"]);
        assert_eq!(os.process_status("a"), Some(Status::Ready));
    }

    #[test]
    fn test_ready_to_running_moves_state_and_locks_cpu() {
        let os = Kernel::new();
        os.create_process("a", 0, 5, Box::new(|_| Status::Done));
        let done = os.ready_to_running("a");
        assert!(done.is_some());
        assert_eq!(os.running_id().as_deref(), Some("a"));
        assert_eq!(os.process_status("a"), Some(Status::Running));
        assert!(!os.ready_ids().contains(&"a".to_string()));
        assert!(os.cpu_locked());
    }

    #[test]
    fn test_ready_to_running_unknown_id() {
        let os = Kernel::new();
        assert!(os.ready_to_running("ghost").is_none());
    }

    #[test]
    fn test_running_transitions() {
        let os = Kernel::new();
        os.create_process("a", 0, 5, Box::new(|_| Status::Running));
        let done = os.ready_to_running("a");
        // Spins until the clock preempts it
        assert_eq!(os.wait_for_completion(done.as_ref()), Some(Status::Blocked));

        os.running_to_blocked();
        assert_eq!(os.process_status("a"), Some(Status::Blocked));
        assert_eq!(os.blocked_ids(), vec!["a"]);

        os.blocked_to_ready("a");
        assert_eq!(os.process_status("a"), Some(Status::Ready));
        assert!(os.ready_ids().contains(&"a".to_string()));
    }

    #[test]
    fn test_transition_without_running_process_is_noop() {
        let os = Kernel::new();
        os.running_to_done();
        os.running_to_ready();
        assert!(os.has_work()); // the seeded idle process
    }

    #[test]
    fn test_blocked_to_ready_unknown_id_is_noop() {
        let os = Kernel::new();
        os.blocked_to_ready("ghost");
        assert!(os.blocked_ids().is_empty());
    }

    #[test]
    fn test_wait_for_completion_without_receiver() {
        let os = Kernel::new();
        assert_eq!(os.wait_for_completion(None), None);
    }

    #[test]
    fn test_var_pool_roundtrip() {
        let os = Kernel::new();
        let slot = os.create_process("a", 0, 5, Box::new(|_| Status::Done));
        assert!(os.init_var_pool(slot));
        assert!(!os.init_var_pool(slot)); // already installed
        os.with_var_pool(slot, |pool| {
            pool.insert("x".to_string(), Value::Int(7));
        });
        assert_eq!(
            os.with_var_pool(slot, |pool| pool.get("x").cloned()).flatten(),
            Some(Value::Int(7)),
        );
    }

    #[test]
    fn test_device_registry_and_attachment() {
        let os = Kernel::new();
        let slot = os.create_process("a", 0, 5, Box::new(|_| Status::Done));
        let pipe = Rc::new(Device::pipe("p0", 4));
        os.register_device(pipe.clone());
        assert!(os.attach_device("a", pipe));
        assert!(os.process_device(slot, "p0").is_some());

        os.remove_device("p0");
        assert!(os.device("p0").is_none());
        // The grant outlives the registry entry
        assert!(os.process_device(slot, "p0").is_some());
    }

    #[test]
    fn test_attach_device_unknown_process() {
        let os = Kernel::new();
        assert!(!os.attach_device("ghost", Rc::new(Device::pipe("p0", 1))));
    }

    #[test]
    fn test_clock_keeps_counting_when_nothing_is_running() {
        let os = Kernel::with_config(KernelConfig {
            clock_interval: 2,
            ..KernelConfig::default()
        });
        // Handler-driven ticks between dispatches cross interval boundaries
        // without firing, so the count is not reset.
        os.clock_tick();
        os.clock_tick();
        os.clock_tick();
        assert_eq!(os.clock(), 3);
        assert!(os.pending_interrupts().is_empty());
    }

    #[test]
    fn test_clock_interrupt_preempts_after_a_full_slice() {
        let os = Kernel::with_config(KernelConfig {
            clock_interval: 4,
            ..KernelConfig::default()
        });
        os.create_process("spin", 0, 100, Box::new(|_| Status::Running));
        let done = os.ready_to_running("spin");

        assert_eq!(os.wait_for_completion(done.as_ref()), Some(Status::Blocked));
        assert_eq!(os.running_pc(), Some(4));
        assert_eq!(os.pending_interrupts(), vec![InterruptKind::Clock]);
    }
}
