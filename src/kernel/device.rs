//! Simulated I/O devices.
//!
//! Three kinds of device hang off the kernel registry:
//! - a sink (`stdout`): the kernel pushes values into its output channel and
//!   some external consumer renders them;
//! - a source (`stdin`): some external producer pushes values into its input
//!   channel and the kernel reads them, padding with empty values once the
//!   producer runs dry;
//! - a pipe: both ends backed by one shared bounded buffer, with explicit
//!   usage accounting for flow control.
//!
//! Devices are shared by reference (`Rc<Device>`): the kernel registry owns
//! the lifetime, processes only hold handles.

use super::ipc::Chan;
use super::mem::Value;
use std::cell::Cell;

/// Registry name of the default sink device
pub const STDOUT: &str = "stdout";
/// Registry name of the default source device
pub const STDIN: &str = "stdin";

/// Buffer capacity of the default stdio channels
pub const STDIO_CAPACITY: usize = 64;

/// Flow-control predicates a producer/consumer polls before touching the
/// pipe. Advisory: the buffer itself never blocks, it rejects.
pub trait FlowControl {
    /// Room for one more value?
    fn inputable(&self) -> bool;
    /// At least one value buffered?
    fn outputable(&self) -> bool;
}

/// Error raised when a pipe operation is rejected by flow control
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum PipeError {
    /// inUse would exceed capacity
    Full,
    /// Nothing buffered
    Empty,
}

/// Drains simulated output to an external consumer
pub struct Sink {
    pub id: String,
    output: Chan<Value>,
}

impl Sink {
    pub fn new(id: &str, capacity: usize) -> Self {
        Self {
            id: id.to_string(),
            output: Chan::bounded(capacity),
        }
    }
}

/// Feeds simulated input from an external producer
pub struct Source {
    pub id: String,
    input: Chan<Value>,
}

impl Source {
    pub fn new(id: &str, capacity: usize) -> Self {
        Self {
            id: id.to_string(),
            input: Chan::bounded(capacity),
        }
    }
}

/// Bounded shared buffer connecting two processes.
///
/// Input and output go through the same channel; `in_use` tracks how much
/// of the capacity is spoken for and is kept within `[0, capacity]` by
/// rejecting excess operations.
pub struct Pipe {
    pub id: String,
    pub capacity: usize,
    in_use: Cell<usize>,
    buffer: Chan<Value>,
}

impl Pipe {
    pub fn new(id: &str, capacity: usize) -> Self {
        Self {
            id: id.to_string(),
            capacity,
            in_use: Cell::new(0),
            buffer: Chan::bounded(capacity),
        }
    }

    pub fn in_use(&self) -> usize {
        self.in_use.get()
    }

    /// Put one value into the pipe. Rejected when the buffer is full.
    pub fn input(&self, value: Value) -> Result<(), PipeError> {
        if self.in_use.get() >= self.capacity {
            return Err(PipeError::Full);
        }
        match self.buffer.tx.send(value) {
            Ok(()) => {
                self.in_use.set(self.in_use.get() + 1);
                Ok(())
            }
            Err(_) => Err(PipeError::Full),
        }
    }

    /// Take one value out of the pipe. Rejected when nothing is buffered.
    pub fn output(&self) -> Result<Value, PipeError> {
        if self.in_use.get() == 0 {
            return Err(PipeError::Empty);
        }
        match self.buffer.rx.try_recv() {
            Ok(value) => {
                self.in_use.set(self.in_use.get() - 1);
                Ok(value)
            }
            Err(_) => Err(PipeError::Empty),
        }
    }
}

impl FlowControl for Pipe {
    fn inputable(&self) -> bool {
        self.in_use.get() < self.capacity
    }

    fn outputable(&self) -> bool {
        self.in_use.get() > 0
    }
}

/// A device in the kernel registry
pub enum Device {
    Sink(Sink),
    Source(Source),
    Pipe(Pipe),
}

impl Device {
    pub fn stdout() -> Self {
        Device::Sink(Sink::new(STDOUT, STDIO_CAPACITY))
    }

    pub fn stdin() -> Self {
        Device::Source(Source::new(STDIN, STDIO_CAPACITY))
    }

    pub fn pipe(id: &str, capacity: usize) -> Self {
        Device::Pipe(Pipe::new(id, capacity))
    }

    pub fn id(&self) -> &str {
        match self {
            Device::Sink(d) => &d.id,
            Device::Source(d) => &d.id,
            Device::Pipe(d) => &d.id,
        }
    }

    /// The channel values enter the device through. For a sink this is
    /// unused by the kernel itself; for a pipe it is the shared buffer.
    pub fn input(&self) -> Option<&Chan<Value>> {
        match self {
            Device::Sink(_) => None,
            Device::Source(d) => Some(&d.input),
            Device::Pipe(d) => Some(&d.buffer),
        }
    }

    /// The channel values leave the device through.
    pub fn output(&self) -> Option<&Chan<Value>> {
        match self {
            Device::Sink(d) => Some(&d.output),
            Device::Source(_) => None,
            Device::Pipe(d) => Some(&d.buffer),
        }
    }

    pub fn as_pipe(&self) -> Option<&Pipe> {
        match self {
            Device::Pipe(p) => Some(p),
            _ => None,
        }
    }
}
