//! Process abstraction and the kernel's process tables.
//!
//! A process is the schedulable unit: identity, priority, one thread, a
//! slice of simulated memory, and handles to the devices it has been
//! granted. Processes live in a slab arena and are addressed by [`Slot`];
//! the user-facing string id is not required to be unique (callers that
//! care about uniqueness must avoid collisions themselves).

use super::device::Device;
use super::mem::MemSlice;
use super::thread::Thread;
use slab::Slab;
use std::cell::RefCell;
use std::collections::{HashMap, VecDeque};
use std::rc::Rc;

/// Arena index of a process. Unique for the process's lifetime, unlike its
/// string id.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct Slot(pub usize);

impl std::fmt::Display for Slot {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        write!(f, "slot:{}", self.0)
    }
}

/// Process lifecycle state. The numeric codes are part of the wire-level
/// surface and are fixed.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[repr(i8)]
pub enum Status {
    Blocked = -1,
    Ready = 0,
    Running = 1,
    Done = 2,
}

impl std::fmt::Display for Status {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Status::Blocked => write!(f, "blocked"),
            Status::Ready => write!(f, "ready"),
            Status::Running => write!(f, "running"),
            Status::Done => write!(f, "done"),
        }
    }
}

/// A process in the simulated system
pub struct Process {
    /// Caller-chosen identifier; duplicates are permitted
    pub id: String,

    /// Carried for priority-aware schedulers; the reference policies do not
    /// consult it
    pub priority: u64,

    /// The process's one thread, shared with the CPU task while running
    pub thread: Rc<RefCell<Thread>>,

    /// Owned slice of the kernel memory arena
    pub memory: MemSlice,

    /// Devices granted to this process; the registry owns their lifetime
    pub devices: HashMap<String, Rc<Device>>,

    pub status: Status,
}

impl Process {
    pub fn new(id: &str, priority: u64, thread: Thread, memory: MemSlice) -> Self {
        Self {
            id: id.to_string(),
            priority,
            thread: Rc::new(RefCell::new(thread)),
            memory,
            devices: HashMap::new(),
            status: Status::Ready,
        }
    }
}

/// The kernel's process tables: the arena plus the running / ready / blocked
/// membership. A live process is in exactly one of the three; Done processes
/// leave all queues. The running pointer is allowed to go stale after a
/// transition and is only ever interpreted together with the status.
pub struct ProcessTable {
    procs: Slab<Process>,
    pub running: Option<Slot>,
    pub ready: VecDeque<Slot>,
    pub blocked: Vec<Slot>,
}

impl ProcessTable {
    pub fn new() -> Self {
        Self {
            procs: Slab::new(),
            running: None,
            ready: VecDeque::new(),
            blocked: Vec::new(),
        }
    }

    /// Insert a process built by `make`, which receives the slot the process
    /// will occupy (threads need it for their context back-reference).
    pub fn insert_with<F>(&mut self, make: F) -> Slot
    where
        F: FnOnce(Slot) -> Process,
    {
        let entry = self.procs.vacant_entry();
        let slot = Slot(entry.key());
        entry.insert(make(slot));
        slot
    }

    pub fn get(&self, slot: Slot) -> Option<&Process> {
        self.procs.get(slot.0)
    }

    pub fn get_mut(&mut self, slot: Slot) -> Option<&mut Process> {
        self.procs.get_mut(slot.0)
    }

    /// First ready-queue entry with the given id.
    pub fn find_ready(&self, pid: &str) -> Option<(usize, Slot)> {
        self.ready
            .iter()
            .enumerate()
            .find(|(_, s)| self.get(**s).is_some_and(|p| p.id == pid))
            .map(|(i, s)| (i, *s))
    }

    /// First blocked-set entry with the given id.
    pub fn find_blocked(&self, pid: &str) -> Option<(usize, Slot)> {
        self.blocked
            .iter()
            .enumerate()
            .find(|(_, s)| self.get(**s).is_some_and(|p| p.id == pid))
            .map(|(i, s)| (i, *s))
    }

    /// First process anywhere in the arena with the given id.
    pub fn find(&self, pid: &str) -> Option<Slot> {
        self.procs
            .iter()
            .find(|(_, p)| p.id == pid)
            .map(|(k, _)| Slot(k))
    }

    pub fn status(&self, slot: Slot) -> Option<Status> {
        self.get(slot).map(|p| p.status)
    }

    pub fn ready_ids(&self) -> Vec<String> {
        self.ready
            .iter()
            .filter_map(|s| self.get(*s).map(|p| p.id.clone()))
            .collect()
    }

    pub fn blocked_ids(&self) -> Vec<String> {
        self.blocked
            .iter()
            .filter_map(|s| self.get(*s).map(|p| p.id.clone()))
            .collect()
    }
}

impl Default for ProcessTable {
    fn default() -> Self {
        Self::new()
    }
}
