//! Interrupt requests and their handlers.
//!
//! A process that needs a kernel service raises an interrupt request and
//! goes Blocked; the scheduler drains the queue between dispatches and the
//! matching handler runs with full kernel access. Each handler ends by
//! readying the requester, except where its input is unusable and there is
//! no channel left to report on.

use super::Kernel;
use super::device::{Device, STDIN, STDOUT};
use super::ipc::Chan;
use super::mem::Value;
use std::fmt;
use std::rc::Rc;

/// The fixed set of interrupt requests a process can raise
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum InterruptKind {
    /// Raised by the kernel itself when a time slice expires
    Clock,
    /// Write one value from the request channel to standard output
    StdOut,
    /// Read one value from standard input into the request channel
    StdIn,
    /// Create a pipe; the request channel carries its name and capacity
    NewPipe,
    /// Attach an existing pipe; the request channel carries its name
    GetPipe,
    /// Unregister a pipe; the request channel carries its name
    DestroyPipe,
}

impl InterruptKind {
    fn handler(self) -> InterruptHandler {
        match self {
            InterruptKind::Clock => handle_clock,
            InterruptKind::StdOut => handle_stdout,
            InterruptKind::StdIn => handle_stdin,
            InterruptKind::NewPipe => handle_new_pipe,
            InterruptKind::GetPipe => handle_get_pipe,
            InterruptKind::DestroyPipe => handle_destroy_pipe,
        }
    }
}

impl fmt::Display for InterruptKind {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let name = match self {
            InterruptKind::Clock => "clock",
            InterruptKind::StdOut => "stdout",
            InterruptKind::StdIn => "stdin",
            InterruptKind::NewPipe => "new-pipe",
            InterruptKind::GetPipe => "get-pipe",
            InterruptKind::DestroyPipe => "destroy-pipe",
        };
        f.write_str(name)
    }
}

pub type InterruptHandler = fn(&Kernel, &InterruptData);

/// Requester identity plus the channel the request travels on
pub struct InterruptData {
    pub pid: String,
    pub chan: Chan<Value>,
}

pub struct Interrupt {
    pub kind: InterruptKind,
    pub handler: InterruptHandler,
    pub data: InterruptData,
}

impl Interrupt {
    pub fn new(pid: &str, kind: InterruptKind, chan: Chan<Value>) -> Self {
        Self {
            kind,
            handler: kind.handler(),
            data: InterruptData {
                pid: pid.to_string(),
                chan,
            },
        }
    }
}

/// The slice expired; the process did nothing wrong. Just ready it again.
fn handle_clock(os: &Kernel, data: &InterruptData) {
    os.blocked_to_ready(&data.pid);
}

fn handle_stdout(os: &Kernel, data: &InterruptData) {
    let Ok(value) = data.chan.rx.try_recv() else {
        log::error!("[INT] stdout: {} sent nothing to print", data.pid);
        return;
    };
    match os.device(STDOUT).and_then(|d| d.output().cloned()) {
        Some(out) => {
            if out.tx.send(value).is_err() {
                log::error!("[INT] stdout: sink full, dropping a value from {}", data.pid);
            }
        }
        None => log::error!("[INT] stdout: no sink registered"),
    }
    os.blocked_to_ready(&data.pid);
}

fn handle_stdin(os: &Kernel, data: &InterruptData) {
    // An exhausted source pads with an empty string, like a closed stdin
    // reading as EOF.
    let value = os
        .device(STDIN)
        .and_then(|d| d.input().cloned())
        .and_then(|src| src.rx.try_recv().ok())
        .unwrap_or_else(|| Value::from(""));
    if data.chan.tx.send(value).is_err() {
        log::error!("[INT] stdin: {} is not receiving, staying blocked", data.pid);
        return;
    }
    os.blocked_to_ready(&data.pid);
}

fn handle_new_pipe(os: &Kernel, data: &InterruptData) {
    let id = match data.chan.rx.try_recv() {
        Ok(v) => match v.as_str() {
            Some(id) => id.to_string(),
            None => {
                log::error!("[INT] new-pipe: {} sent a non-string pipe id", data.pid);
                return;
            }
        },
        Err(_) => {
            log::error!("[INT] new-pipe: {} sent no pipe id", data.pid);
            return;
        }
    };
    let capacity = match data.chan.rx.try_recv().map(|v| v.as_size()) {
        Ok(Some(n)) => n,
        _ => {
            log::error!("[INT] new-pipe: {} sent no usable capacity for {}", data.pid, id);
            return;
        }
    };

    let pipe = Rc::new(Device::pipe(&id, capacity));
    os.register_device(pipe.clone());
    if !os.attach_device(&data.pid, pipe) {
        log::warn!("[INT] new-pipe: no process {} to attach {} to", data.pid, id);
    }
    log::info!("[INT] new-pipe: {} created {} (capacity {})", data.pid, id, capacity);
    os.blocked_to_ready(&data.pid);
}

fn handle_get_pipe(os: &Kernel, data: &InterruptData) {
    let id = match data.chan.rx.try_recv() {
        Ok(v) => match v.as_str() {
            Some(id) => id.to_string(),
            None => {
                log::error!("[INT] get-pipe: {} sent a non-string pipe id", data.pid);
                return;
            }
        },
        Err(_) => {
            log::error!("[INT] get-pipe: {} sent no pipe id", data.pid);
            return;
        }
    };
    let Some(pipe) = os.device(&id) else {
        log::error!("[INT] get-pipe: no pipe named {}", id);
        return;
    };
    if !os.attach_device(&data.pid, pipe) {
        log::warn!("[INT] get-pipe: no process {} to attach {} to", data.pid, id);
    }
    os.blocked_to_ready(&data.pid);
}

fn handle_destroy_pipe(os: &Kernel, data: &InterruptData) {
    let id = match data.chan.rx.try_recv() {
        Ok(v) => match v.as_str() {
            Some(id) => id.to_string(),
            None => {
                log::error!("[INT] destroy-pipe: {} sent a non-string pipe id", data.pid);
                return;
            }
        },
        Err(_) => {
            log::error!("[INT] destroy-pipe: {} sent no pipe id", data.pid);
            return;
        }
    };
    // Processes holding a reference keep using it; it just stops being
    // discoverable.
    os.remove_device(&id);
    log::info!("[INT] destroy-pipe: {} unregistered {}", data.pid, id);
    os.blocked_to_ready(&data.pid);
}
