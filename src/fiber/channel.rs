//! Fiber-to-fiber data transfer: bounded and unbounded channels.
//!
//! A channel never re-orders elements. Closing is terminal: receivers
//! drain what was already queued and then observe the closed status;
//! senders get their value back.
//!
//! The bounded [`Channel`] uses two watermarks. Senders block at the high
//! watermark `H`; once receivers drain the buffer down to the low
//! watermark `L`, blocked senders are woken: one of them when `L == H-1`
//! (only one slot opened up), all of them otherwise, because several
//! producers may proceed together.

use std::collections::VecDeque;
use std::fmt;
use std::result::Result as StdResult;
use std::sync::Arc;
use std::time::{Duration, Instant};

use crate::clock;
use crate::error::{Error, Result};
use crate::fiber::cond::Cond;
use crate::fiber::mutex::{Mutex, MutexGuard};

////////////////////////////////////////////////////////////////////////////////
// errors
////////////////////////////////////////////////////////////////////////////////

/// Unsuccessful outcomes of a (possibly timed) send. The value is handed
/// back so the caller has an option to reuse it.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum SendError<T> {
    /// The deadline expired with the buffer still full.
    Timeout(T),
    /// The channel was closed.
    Closed(T),
    /// The sending fiber was interrupted while blocked.
    Interrupted(T),
}

impl<T> SendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Timeout(v) | Self::Closed(v) | Self::Interrupted(v) => v,
        }
    }
}

/// Unsuccessful outcomes of a non-blocking send.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TrySendError<T> {
    /// The buffer is at the high watermark.
    Full(T),
    /// The channel was closed.
    Closed(T),
}

impl<T> TrySendError<T> {
    pub fn into_inner(self) -> T {
        match self {
            Self::Full(v) | Self::Closed(v) => v,
        }
    }
}

/// Unsuccessful outcomes of a (possibly timed) receive.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum RecvError {
    /// The deadline expired with the buffer still empty.
    Timeout,
    /// The channel is closed and fully drained.
    Closed,
    /// The receiving fiber was interrupted while blocked.
    Interrupted,
}

/// Unsuccessful outcomes of a non-blocking receive.
#[derive(Debug, PartialEq, Eq, Clone, Copy)]
pub enum TryRecvError {
    /// Nothing buffered right now.
    Empty,
    /// The channel is closed and fully drained.
    Closed,
}

fn send_lock_error<T>(e: Error, value: T) -> SendError<T> {
    match e {
        Error::Interrupted => SendError::Interrupted(value),
        e => unreachable!("channel lock cannot fail with {}", e),
    }
}

fn recv_lock_error(e: Error) -> RecvError {
    match e {
        Error::Interrupted => RecvError::Interrupted,
        e => unreachable!("channel lock cannot fail with {}", e),
    }
}

////////////////////////////////////////////////////////////////////////////////
// Channel
////////////////////////////////////////////////////////////////////////////////

struct Buffer<T> {
    queue: VecDeque<T>,
    closed: bool,
}

struct Inner<T> {
    buffer: Mutex<Buffer<T>>,
    not_empty: Cond,
    not_full: Cond,
    hwm: usize,
    lwm: usize,
}

/// A bounded multi-producer multi-consumer channel for fibers.
///
/// Clones share the same buffer. Senders suspend while the buffer holds
/// `capacity` elements, receivers suspend while it is empty; `try_*` and
/// `*_timeout` variants don't block (beyond the channel's short internal
/// lock).
///
/// # Examples
/// ```no_run
/// use strand::fiber::{self, Channel};
///
/// let ch = Channel::new(1);
/// let tx = ch.clone();
/// let worker = fiber::spawn(move || tx.recv().unwrap());
/// ch.send("hello").unwrap();
/// assert_eq!(worker.join().unwrap(), "hello");
/// ```
pub struct Channel<T> {
    inner: Arc<Inner<T>>,
}

impl<T> Clone for Channel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send> Channel<T> {
    /// Creates a channel buffering up to `capacity` elements, with the low
    /// watermark right below it (every freed slot wakes one sender).
    ///
    /// # Panics
    /// If `capacity` is zero; use [`with_watermarks`](Self::with_watermarks)
    /// for fallible construction.
    pub fn new(capacity: usize) -> Self {
        Self::with_watermarks(capacity, capacity.saturating_sub(1))
            .expect("channel capacity must not be zero")
    }

    /// Creates a channel with an explicit high/low watermark pair.
    ///
    /// Senders block at `hwm` buffered elements; blocked senders are woken
    /// once the buffer is drained to `lwm`. Fails with
    /// [`Error::InvalidArgument`] unless `lwm < hwm` and `hwm > 0`.
    pub fn with_watermarks(hwm: usize, lwm: usize) -> Result<Self> {
        if hwm == 0 {
            return Err(Error::InvalidArgument("channel high watermark must be nonzero"));
        }
        if lwm >= hwm {
            return Err(Error::InvalidArgument(
                "channel low watermark must be below the high watermark",
            ));
        }
        Ok(Self {
            inner: Arc::new(Inner {
                buffer: Mutex::new(Buffer {
                    queue: VecDeque::new(),
                    closed: false,
                }),
                not_empty: Cond::new(),
                not_full: Cond::new(),
                hwm,
                lwm,
            }),
        })
    }

    /// Sends a message over the channel, suspending while the buffer is
    /// full.
    pub fn send(&self, value: T) -> StdResult<(), SendError<T>> {
        self.send_impl(value, None)
    }

    /// As [`send`](Self::send), giving up after `timeout`.
    pub fn send_timeout(&self, value: T, timeout: Duration) -> StdResult<(), SendError<T>> {
        self.send_impl(value, Some(clock::deadline(timeout)))
    }

    /// As [`send`](Self::send), giving up at `deadline`.
    pub fn send_deadline(&self, value: T, deadline: Instant) -> StdResult<(), SendError<T>> {
        self.send_impl(value, Some(deadline))
    }

    /// Sends without suspending; fails if the buffer is at capacity.
    ///
    /// Not an interruption point.
    pub fn try_send(&self, value: T) -> StdResult<(), TrySendError<T>> {
        let mut buffer = self.inner.buffer.lock_noint();
        if buffer.closed {
            return Err(TrySendError::Closed(value));
        }
        if buffer.queue.len() >= self.inner.hwm {
            return Err(TrySendError::Full(value));
        }
        buffer.queue.push_back(value);
        drop(buffer);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    fn send_impl(&self, value: T, deadline: Option<Instant>) -> StdResult<(), SendError<T>> {
        let mut buffer = match self.inner.buffer.lock() {
            Ok(guard) => guard,
            Err(e) => return Err(send_lock_error(e, value)),
        };
        loop {
            if buffer.closed {
                return Err(SendError::Closed(value));
            }
            if buffer.queue.len() < self.inner.hwm {
                buffer.queue.push_back(value);
                drop(buffer);
                self.inner.not_empty.notify_one();
                return Ok(());
            }
            buffer = match self.full_wait(buffer, deadline) {
                Ok(guard) => guard,
                Err(timed_out) => {
                    return Err(match timed_out {
                        FullWaitError::Timeout => SendError::Timeout(value),
                        FullWaitError::Interrupted => SendError::Interrupted(value),
                    })
                }
            };
        }
    }

    /// One wait round on `not_full`. Separated out so `send_impl` can keep
    /// ownership of the value across the borrow dance.
    fn full_wait<'a>(
        &'a self,
        guard: MutexGuard<'a, Buffer<T>>,
        deadline: Option<Instant>,
    ) -> StdResult<MutexGuard<'a, Buffer<T>>, FullWaitError> {
        match deadline {
            Some(deadline) => match self.inner.not_full.wait_until(guard, deadline) {
                Ok((guard, status)) => {
                    if status.timed_out() && guard.queue.len() >= self.inner.hwm {
                        Err(FullWaitError::Timeout)
                    } else {
                        Ok(guard)
                    }
                }
                Err(_) => Err(FullWaitError::Interrupted),
            },
            None => match self.inner.not_full.wait(guard) {
                Ok(guard) => Ok(guard),
                Err(_) => Err(FullWaitError::Interrupted),
            },
        }
    }

    /// Receives a message, suspending while the buffer is empty.
    ///
    /// Once the channel is closed, buffered messages are still delivered;
    /// [`RecvError::Closed`] follows after the last one.
    pub fn recv(&self) -> StdResult<T, RecvError> {
        self.recv_impl(None)
    }

    /// As [`recv`](Self::recv), giving up after `timeout`.
    pub fn recv_timeout(&self, timeout: Duration) -> StdResult<T, RecvError> {
        self.recv_impl(Some(clock::deadline(timeout)))
    }

    /// As [`recv`](Self::recv), giving up at `deadline`.
    pub fn recv_deadline(&self, deadline: Instant) -> StdResult<T, RecvError> {
        self.recv_impl(Some(deadline))
    }

    /// Receives without suspending.
    ///
    /// Not an interruption point.
    pub fn try_recv(&self) -> StdResult<T, TryRecvError> {
        let mut buffer = self.inner.buffer.lock_noint();
        match buffer.queue.pop_front() {
            Some(value) => {
                let wake = self.drain_wakeup(&buffer);
                drop(buffer);
                self.apply_wakeup(wake);
                Ok(value)
            }
            None if buffer.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    fn recv_impl(&self, deadline: Option<Instant>) -> StdResult<T, RecvError> {
        let mut buffer = self.inner.buffer.lock().map_err(recv_lock_error)?;
        loop {
            if let Some(value) = buffer.queue.pop_front() {
                let wake = self.drain_wakeup(&buffer);
                drop(buffer);
                self.apply_wakeup(wake);
                return Ok(value);
            }
            if buffer.closed {
                return Err(RecvError::Closed);
            }
            buffer = match deadline {
                Some(deadline) => {
                    let (guard, status) = self
                        .inner
                        .not_empty
                        .wait_until(buffer, deadline)
                        .map_err(recv_lock_error)?;
                    if status.timed_out() && guard.queue.is_empty() && !guard.closed {
                        return Err(RecvError::Timeout);
                    }
                    guard
                }
                None => self.inner.not_empty.wait(buffer).map_err(recv_lock_error)?,
            };
        }
    }

    /// Which producers to wake after removing an element.
    fn drain_wakeup(&self, buffer: &Buffer<T>) -> ProducerWakeup {
        if buffer.queue.len() > self.inner.lwm {
            ProducerWakeup::None
        } else if self.inner.lwm + 1 == self.inner.hwm {
            // a single slot opened up
            ProducerWakeup::One
        } else {
            // drained to the low watermark: room for several producers
            ProducerWakeup::All
        }
    }

    fn apply_wakeup(&self, wake: ProducerWakeup) {
        match wake {
            ProducerWakeup::None => {}
            ProducerWakeup::One => self.inner.not_full.notify_one(),
            ProducerWakeup::All => self.inner.not_full.notify_all(),
        }
    }

    /// Closes the channel: subsequent sends fail, receivers drain the
    /// buffer and then observe [`RecvError::Closed`]. Idempotent.
    pub fn close(&self) {
        let mut buffer = self.inner.buffer.lock_noint();
        if buffer.closed {
            return;
        }
        buffer.closed = true;
        drop(buffer);
        self.inner.not_empty.notify_all();
        self.inner.not_full.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.buffer.lock_noint().closed
    }

    /// Number of buffered elements; never exceeds the high watermark.
    pub fn len(&self) -> usize {
        self.inner.buffer.lock_noint().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn is_full(&self) -> bool {
        self.len() >= self.inner.hwm
    }

    pub fn capacity(&self) -> usize {
        self.inner.hwm
    }

    /// A blocking iterator: yields messages until the channel is closed
    /// and drained.
    pub fn iter(&self) -> Iter<'_, T> {
        Iter { ch: self }
    }

    /// A non-blocking iterator: yields currently buffered messages.
    pub fn try_iter(&self) -> TryIter<'_, T> {
        TryIter { ch: self }
    }
}

enum FullWaitError {
    Timeout,
    Interrupted,
}

enum ProducerWakeup {
    None,
    One,
    All,
}

impl<T> fmt::Debug for Channel<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("Channel")
            .field("hwm", &self.inner.hwm)
            .field("lwm", &self.inner.lwm)
            .finish_non_exhaustive()
    }
}

pub struct Iter<'a, T> {
    ch: &'a Channel<T>,
}

impl<'a, T: Send> Iterator for Iter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.ch.recv().ok()
    }
}

pub struct TryIter<'a, T> {
    ch: &'a Channel<T>,
}

impl<'a, T: Send> Iterator for TryIter<'a, T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.ch.try_recv().ok()
    }
}

impl<'a, T: Send> IntoIterator for &'a Channel<T> {
    type Item = T;
    type IntoIter = Iter<'a, T>;

    fn into_iter(self) -> Iter<'a, T> {
        self.iter()
    }
}

pub struct IntoIter<T> {
    ch: Channel<T>,
}

impl<T: Send> Iterator for IntoIter<T> {
    type Item = T;

    fn next(&mut self) -> Option<T> {
        self.ch.recv().ok()
    }
}

impl<T: Send> IntoIterator for Channel<T> {
    type Item = T;
    type IntoIter = IntoIter<T>;

    fn into_iter(self) -> IntoIter<T> {
        IntoIter { ch: self }
    }
}

////////////////////////////////////////////////////////////////////////////////
// UnboundedChannel
////////////////////////////////////////////////////////////////////////////////

struct UnboundedInner<T> {
    buffer: Mutex<Buffer<T>>,
    not_empty: Cond,
}

/// An unbounded channel: sending never suspends.
pub struct UnboundedChannel<T> {
    inner: Arc<UnboundedInner<T>>,
}

impl<T> Clone for UnboundedChannel<T> {
    fn clone(&self) -> Self {
        Self {
            inner: self.inner.clone(),
        }
    }
}

impl<T: Send> UnboundedChannel<T> {
    #[allow(clippy::new_without_default)]
    pub fn new() -> Self {
        Self {
            inner: Arc::new(UnboundedInner {
                buffer: Mutex::new(Buffer {
                    queue: VecDeque::new(),
                    closed: false,
                }),
                not_empty: Cond::new(),
            }),
        }
    }

    /// Queues `value`; only fails on a closed channel.
    pub fn send(&self, value: T) -> StdResult<(), SendError<T>> {
        let mut buffer = match self.inner.buffer.lock() {
            Ok(guard) => guard,
            Err(e) => return Err(send_lock_error(e, value)),
        };
        if buffer.closed {
            return Err(SendError::Closed(value));
        }
        buffer.queue.push_back(value);
        drop(buffer);
        self.inner.not_empty.notify_one();
        Ok(())
    }

    /// Receives a message, suspending while the buffer is empty. Behaves
    /// like [`Channel::recv`] with respect to closing.
    pub fn recv(&self) -> StdResult<T, RecvError> {
        self.recv_impl(None)
    }

    pub fn recv_timeout(&self, timeout: Duration) -> StdResult<T, RecvError> {
        self.recv_impl(Some(clock::deadline(timeout)))
    }

    pub fn recv_deadline(&self, deadline: Instant) -> StdResult<T, RecvError> {
        self.recv_impl(Some(deadline))
    }

    pub fn try_recv(&self) -> StdResult<T, TryRecvError> {
        let mut buffer = self.inner.buffer.lock_noint();
        match buffer.queue.pop_front() {
            Some(value) => Ok(value),
            None if buffer.closed => Err(TryRecvError::Closed),
            None => Err(TryRecvError::Empty),
        }
    }

    fn recv_impl(&self, deadline: Option<Instant>) -> StdResult<T, RecvError> {
        let mut buffer = self.inner.buffer.lock().map_err(recv_lock_error)?;
        loop {
            if let Some(value) = buffer.queue.pop_front() {
                return Ok(value);
            }
            if buffer.closed {
                return Err(RecvError::Closed);
            }
            buffer = match deadline {
                Some(deadline) => {
                    let (guard, status) = self
                        .inner
                        .not_empty
                        .wait_until(buffer, deadline)
                        .map_err(recv_lock_error)?;
                    if status.timed_out() && guard.queue.is_empty() && !guard.closed {
                        return Err(RecvError::Timeout);
                    }
                    guard
                }
                None => self.inner.not_empty.wait(buffer).map_err(recv_lock_error)?,
            };
        }
    }

    /// Closes the channel; see [`Channel::close`].
    pub fn close(&self) {
        let mut buffer = self.inner.buffer.lock_noint();
        if buffer.closed {
            return;
        }
        buffer.closed = true;
        drop(buffer);
        self.inner.not_empty.notify_all();
    }

    pub fn is_closed(&self) -> bool {
        self.inner.buffer.lock_noint().closed
    }

    pub fn len(&self) -> usize {
        self.inner.buffer.lock_noint().queue.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }
}

impl<T> fmt::Debug for UnboundedChannel<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        f.debug_struct("UnboundedChannel").finish_non_exhaustive()
    }
}
