//! unicore - a single-core multiprogramming kernel, simulated
//!
//! Design principles:
//! - One CPU, really: a mutex-style lock and a single attached thread,
//!   never two runnable things at once
//! - Preemption you can watch: a software clock ticks per committed step
//!   and slices are bounded by clock interrupts
//! - Cooperative under the hood: processes are step functions, the
//!   "hardware" is a single-threaded executor, cancellation is a token
//!   observed at the one yield point
//!
//! A program is a [`kernel::StepFn`] handed to [`kernel::Kernel::create_process`];
//! the scheduler takes it from there:
//!
//! ```
//! use unicore::kernel::{Kernel, Status};
//!
//! let os = Kernel::new();
//! os.create_process("hello", 0, 10, Box::new(|ctx| {
//!     log::info!("hello from pc {}", ctx.pc());
//!     Status::Done
//! }));
//! os.boot();
//! ```

pub mod kernel;

pub use kernel::{Kernel, KernelConfig, Status};
