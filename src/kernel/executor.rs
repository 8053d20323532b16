//! Single-threaded cooperative executor.
//!
//! The simulated CPU maps "run this thread as an independent task" onto a
//! future polled tick-by-tick. The scheduler drives ticks while it waits for
//! a completion signal, so the interleaving of kernel work and thread steps
//! is explicit and deterministic - no reliance on a host scheduler's
//! fairness.
//!
//! Wake semantics are real: a task that returns Pending without arranging a
//! wake is not re-polled. The thread loop always self-wakes at its yield
//! point, so a live CPU makes progress on every tick.

use super::task::{TaskFuture, TaskId};
use std::cell::RefCell;
use std::collections::{BTreeMap, HashSet, VecDeque};
use std::future::Future;
use std::rc::Rc;
use std::task::{Context, Poll, RawWaker, RawWakerVTable, Waker};

struct SpawnedTask {
    id: TaskId,
    future: TaskFuture,
}

/// Shared state a waker uses to mark its task runnable
struct WakeSlot {
    task_id: TaskId,
    ready_set: Rc<RefCell<HashSet<TaskId>>>,
}

/// The executor - polls spawned tasks one tick at a time
pub struct Executor {
    /// All live tasks, indexed by ID
    tasks: BTreeMap<TaskId, SpawnedTask>,

    /// Tasks ready to be polled (filled by wakers)
    ready: Rc<RefCell<HashSet<TaskId>>>,

    /// Tasks spawned while a tick was in flight
    pending_spawn: RefCell<VecDeque<SpawnedTask>>,

    next_id: u64,
}

impl Executor {
    pub fn new() -> Self {
        Self {
            tasks: BTreeMap::new(),
            ready: Rc::new(RefCell::new(HashSet::new())),
            pending_spawn: RefCell::new(VecDeque::new()),
            next_id: 0,
        }
    }

    /// Spawn a future, returning its task ID. The task is immediately ready.
    pub fn spawn<F>(&mut self, future: F) -> TaskId
    where
        F: Future<Output = ()> + 'static,
    {
        let id = TaskId(self.next_id);
        self.next_id += 1;

        self.pending_spawn.borrow_mut().push_back(SpawnedTask {
            id,
            future: Box::pin(future),
        });
        self.ready.borrow_mut().insert(id);
        id
    }

    fn integrate_pending(&mut self) {
        let mut pending = self.pending_spawn.borrow_mut();
        while let Some(task) = pending.pop_front() {
            self.tasks.insert(task.id, task);
        }
    }

    /// Poll every ready task once. Returns the number of tasks polled.
    pub fn tick(&mut self) -> usize {
        self.integrate_pending();

        let mut ready_ids: Vec<TaskId> = self.ready.borrow().iter().copied().collect();
        ready_ids.sort();

        let mut polled = 0;

        for task_id in ready_ids {
            self.ready.borrow_mut().remove(&task_id);

            let Some(mut task) = self.tasks.remove(&task_id) else {
                continue;
            };

            let waker = self.make_waker(task_id);
            let mut cx = Context::from_waker(&waker);

            match task.future.as_mut().poll(&mut cx) {
                Poll::Ready(()) => {
                    polled += 1;
                }
                Poll::Pending => {
                    // Re-inserted into the map but not the ready set; only
                    // its waker puts it back.
                    self.tasks.insert(task_id, task);
                    polled += 1;
                }
            }
        }

        self.integrate_pending();
        polled
    }

    /// Run until every task completes. Test convenience; the kernel's
    /// scheduler drives tick() itself.
    pub fn run(&mut self) {
        loop {
            self.integrate_pending();
            if self.tasks.is_empty() && self.pending_spawn.borrow().is_empty() {
                break;
            }
            if self.ready.borrow().is_empty() {
                // Nothing woke: nothing will ever run again
                break;
            }
            self.tick();
        }
    }

    pub fn has_tasks(&self) -> bool {
        !self.tasks.is_empty() || !self.pending_spawn.borrow().is_empty()
    }

    pub fn task_count(&self) -> usize {
        self.tasks.len() + self.pending_spawn.borrow().len()
    }

    /// Mark a task ready to be polled. Returns false for unknown tasks.
    pub fn wake_task(&self, task_id: TaskId) -> bool {
        let exists = self.tasks.contains_key(&task_id)
            || self.pending_spawn.borrow().iter().any(|t| t.id == task_id);

        if exists {
            self.ready.borrow_mut().insert(task_id);
        }
        exists
    }

    fn make_waker(&self, task_id: TaskId) -> Waker {
        let slot = Box::new(WakeSlot {
            task_id,
            ready_set: self.ready.clone(),
        });
        let ptr = Box::into_raw(slot) as *const ();
        unsafe { Waker::from_raw(RawWaker::new(ptr, &WAKER_VTABLE)) }
    }
}

impl Default for Executor {
    fn default() -> Self {
        Self::new()
    }
}

const WAKER_VTABLE: RawWakerVTable =
    RawWakerVTable::new(waker_clone, waker_wake, waker_wake_by_ref, waker_drop);

unsafe fn waker_clone(ptr: *const ()) -> RawWaker {
    unsafe {
        let slot = &*(ptr as *const WakeSlot);
        let cloned = Box::new(WakeSlot {
            task_id: slot.task_id,
            ready_set: slot.ready_set.clone(),
        });
        RawWaker::new(Box::into_raw(cloned) as *const (), &WAKER_VTABLE)
    }
}

unsafe fn waker_wake(ptr: *const ()) {
    unsafe {
        let slot = Box::from_raw(ptr as *mut WakeSlot);
        slot.ready_set.borrow_mut().insert(slot.task_id);
    }
}

unsafe fn waker_wake_by_ref(ptr: *const ()) {
    unsafe {
        let slot = &*(ptr as *const WakeSlot);
        slot.ready_set.borrow_mut().insert(slot.task_id);
    }
}

unsafe fn waker_drop(ptr: *const ()) {
    unsafe {
        drop(Box::from_raw(ptr as *mut WakeSlot));
    }
}
