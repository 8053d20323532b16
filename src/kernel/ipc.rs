//! Bounded channels - the simulated wire between processes and the kernel.
//!
//! Everything in the simulator runs on one host thread, so these are plain
//! RefCell-wrapped ring buffers, not lock-free queues. The important contract
//! is the bound: a send into a full channel is rejected, never blocked on,
//! which is how an undersized interrupt buffer stalls its requester instead
//! of hanging the host.

use std::cell::RefCell;
use std::collections::VecDeque;
use std::rc::Rc;

/// Create a bounded channel pair with the given capacity.
///
/// Capacity 0 is legal and means every send fails with [`SendError::Full`].
pub fn channel<T>(capacity: usize) -> (Sender<T>, Receiver<T>) {
    let inner = Rc::new(RefCell::new(ChannelInner {
        queue: VecDeque::new(),
        capacity,
        closed: false,
    }));

    (
        Sender {
            inner: inner.clone(),
        },
        Receiver { inner },
    )
}

/// Both ends of one channel, bundled. Interrupt protocols hand this around
/// whole: the requester keeps one clone, the handler gets the other.
pub struct Chan<T> {
    pub tx: Sender<T>,
    pub rx: Receiver<T>,
}

impl<T> Chan<T> {
    pub fn bounded(capacity: usize) -> Self {
        let (tx, rx) = channel(capacity);
        Self { tx, rx }
    }
}

impl<T> Clone for Chan<T> {
    fn clone(&self) -> Self {
        Self {
            tx: self.tx.clone(),
            rx: self.rx.clone(),
        }
    }
}

struct ChannelInner<T> {
    queue: VecDeque<T>,
    capacity: usize,
    closed: bool,
}

/// Sending half of a channel
pub struct Sender<T> {
    inner: Rc<RefCell<ChannelInner<T>>>,
}

impl<T> Sender<T> {
    /// Send a value. Rejects immediately when the buffer is at capacity.
    pub fn send(&self, value: T) -> Result<(), SendError<T>> {
        let mut inner = self.inner.borrow_mut();
        if inner.closed {
            return Err(SendError::Closed(value));
        }
        if inner.queue.len() >= inner.capacity {
            return Err(SendError::Full(value));
        }
        inner.queue.push_back(value);
        Ok(())
    }

    /// Close the channel. Queued values stay receivable.
    pub fn close(&self) {
        self.inner.borrow_mut().closed = true;
    }
}

impl<T> Clone for Sender<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Receiving half of a channel
pub struct Receiver<T> {
    inner: Rc<RefCell<ChannelInner<T>>>,
}

impl<T> Receiver<T> {
    /// Receive a value without blocking.
    pub fn try_recv(&self) -> Result<T, TryRecvError> {
        let mut inner = self.inner.borrow_mut();
        match inner.queue.pop_front() {
            Some(value) => Ok(value),
            None if inner.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    /// Number of values currently buffered.
    pub fn len(&self) -> usize {
        self.inner.borrow().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.inner.borrow().queue.is_empty()
    }
}

impl<T> Clone for Receiver<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

/// Error when sending fails
#[derive(Debug)]
pub enum SendError<T> {
    /// Buffer is at capacity
    Full(T),
    /// Channel was closed
    Closed(T),
}

/// Error when try_recv fails
#[derive(Debug, PartialEq, Eq)]
pub enum TryRecvError {
    Empty,
    Closed,
}
