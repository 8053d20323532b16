//! Scheduling policies.
//!
//! A scheduler owns the whole lifetime of the machine once `boot` hands it
//! control: it dispatches processes, waits for each run to end, applies the
//! state transition the published status asks for, and drains the interrupt
//! queue between dispatches. It returns only when no runnable work is left.

use super::Kernel;
use super::process::Status;

pub trait Scheduler {
    fn schedule(&self, os: &Kernel);
}

/// Runs the first ready process once and retires it, whatever it returns.
/// Useful for single-shot programs and as the smallest possible policy.
#[derive(Default)]
pub struct NoopScheduler;

impl NoopScheduler {
    pub fn new() -> Self {
        Self
    }
}

impl Scheduler for NoopScheduler {
    fn schedule(&self, os: &Kernel) {
        let Some(pid) = os.first_ready_id() else {
            log::warn!("[NOOP] nothing to run");
            return;
        };
        log::info!("[NOOP] dispatching {}", pid);
        let done = os.ready_to_running(&pid);
        let status = os.wait_for_completion(done.as_ref());
        log::info!("[NOOP] {} finished with {:?}", pid, status);
        os.running_to_done();
    }
}

/// First come, first served with preemptive time slicing.
///
/// Processes run in arrival order; the clock interrupt bounds each turn, so
/// a looping process cannot starve the queue. When every process is parked
/// waiting on something external, an idle process is injected to keep the
/// clock advancing.
#[derive(Default)]
pub struct FcfsScheduler;

impl FcfsScheduler {
    pub fn new() -> Self {
        Self
    }

    fn dispatch_next(&self, os: &Kernel) -> Option<super::ipc::Receiver<Status>> {
        let pid = os.first_ready_id()?;
        log::info!("[FCFS] dispatching {}", pid);
        os.ready_to_running(&pid)
    }
}

impl Scheduler for FcfsScheduler {
    fn schedule(&self, os: &Kernel) {
        let mut done = self.dispatch_next(os);
        loop {
            match os.wait_for_completion(done.as_ref()) {
                Some(status) => {
                    log::info!(
                        "[FCFS] {} yielded {} at pc {}",
                        os.running_id().unwrap_or_default(),
                        status,
                        os.running_pc().unwrap_or_default(),
                    );
                    match status {
                        Status::Done => os.running_to_done(),
                        Status::Blocked => os.running_to_blocked(),
                        _ => os.running_to_ready(),
                    }
                }
                None => {
                    // Nothing is making progress. If the machine stalled
                    // without a running process, seed an idle process so
                    // clock ticks keep flowing toward the blocked ones.
                    if !os.running_is_running() {
                        log::warn!("[FCFS] stalled, injecting idle");
                        os.spawn_idle();
                    }
                }
            }

            os.handle_interrupts();

            if !os.has_work() {
                break;
            }
            done = self.dispatch_next(os);
        }
        log::info!("[FCFS] queue drained");
    }
}
