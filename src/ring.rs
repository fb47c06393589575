// SPDX-License-Identifier: Apache-2.0
// Copyright (c) 2025 Au-Zone Technologies. All Rights Reserved.

use clap::ValueEnum;
use std::{
    fmt,
    sync::{
        atomic::{AtomicU64, Ordering},
        Condvar, Mutex, MutexGuard, PoisonError,
    },
    time::{Duration, Instant},
};
use tracing::trace;

/// Transfer buffer error types.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// The requested capacity cannot hold any frame.
    InvalidCapacity(usize),
    /// The buffer was closed and holds no more frames.
    Closed,
}

impl std::error::Error for Error {}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            Error::InvalidCapacity(capacity) => write!(f, "invalid capacity: {}", capacity),
            Error::Closed => write!(f, "buffer closed"),
        }
    }
}

/// A rejected push.  The frame is handed back to the producer.
#[derive(PartialEq, Eq)]
pub enum PushError<T> {
    /// The buffer is full (only returned by [`TransferRingBuffer::try_push`]).
    Full(T),
    /// The buffer was closed.
    Closed(T),
}

impl<T> PushError<T> {
    /// Recover the rejected frame.
    pub fn into_inner(self) -> T {
        match self {
            PushError::Full(item) | PushError::Closed(item) => item,
        }
    }

    /// True when the push failed because the buffer was closed.
    pub fn is_closed(&self) -> bool {
        matches!(self, PushError::Closed(_))
    }
}

impl<T> fmt::Debug for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            PushError::Full(_) => write!(f, "Full(..)"),
            PushError::Closed(_) => write!(f, "Closed(..)"),
        }
    }
}

impl<T> fmt::Display for PushError<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        match self {
            PushError::Full(_) => write!(f, "buffer full"),
            PushError::Closed(_) => write!(f, "buffer closed"),
        }
    }
}

impl<T> std::error::Error for PushError<T> {}

/// What `push` does when every slot is occupied.
#[derive(Copy, Clone, Debug, Default, PartialEq, Eq, ValueEnum)]
pub enum OverflowPolicy {
    /// Wait until the consumer frees a slot or the buffer is closed.
    #[default]
    Block,
    /// Discard the oldest resident frame to make room for the new one.
    DropOldest,
}

impl fmt::Display for OverflowPolicy {
    fn fmt(&self, f: &mut fmt::Formatter) -> fmt::Result {
        match self {
            OverflowPolicy::Block => write!(f, "block"),
            OverflowPolicy::DropOldest => write!(f, "drop-oldest"),
        }
    }
}

struct State<T> {
    slots: Box<[Option<T>]>,
    read: usize,
    write: usize,
    count: usize,
    closed: bool,
}

impl<T> State<T> {
    fn put(&mut self, item: T) {
        let n = self.slots.len();
        debug_assert!(self.slots[self.write].is_none());
        self.slots[self.write] = Some(item);
        self.write = (self.write + 1) % n;
        self.count += 1;
    }

    fn take(&mut self) -> Option<T> {
        if self.count == 0 {
            return None;
        }
        let n = self.slots.len();
        let item = self.slots[self.read].take();
        self.read = (self.read + 1) % n;
        self.count -= 1;
        item
    }

    fn is_full(&self) -> bool {
        self.count == self.slots.len()
    }
}

/// Bounded single-producer/single-consumer buffer which moves ownership of
/// frames from the acquisition thread to the publishing thread.
///
/// Frames come out in the order they went in.  Closing the buffer wakes both
/// sides; the consumer still receives every resident frame before seeing
/// [`Error::Closed`].  Frames never popped are dropped with the buffer.
pub struct TransferRingBuffer<T> {
    state: Mutex<State<T>>,
    not_empty: Condvar,
    not_full: Condvar,
    capacity: usize,
    policy: OverflowPolicy,
    dropped: AtomicU64,
}

impl<T> TransferRingBuffer<T> {
    /// Creates a blocking buffer with `capacity` slots.
    pub fn new(capacity: usize) -> Result<Self, Error> {
        Self::with_policy(capacity, OverflowPolicy::Block)
    }

    /// Creates a buffer with `capacity` slots and an explicit overflow policy.
    pub fn with_policy(capacity: usize, policy: OverflowPolicy) -> Result<Self, Error> {
        if capacity == 0 {
            return Err(Error::InvalidCapacity(capacity));
        }

        let slots = (0..capacity).map(|_| None).collect::<Vec<_>>();

        Ok(TransferRingBuffer {
            state: Mutex::new(State {
                slots: slots.into_boxed_slice(),
                read: 0,
                write: 0,
                count: 0,
                closed: false,
            }),
            not_empty: Condvar::new(),
            not_full: Condvar::new(),
            capacity,
            policy,
            dropped: AtomicU64::new(0),
        })
    }

    // The state is consistent between statements, a panic elsewhere cannot
    // leave a slot half written.
    fn lock(&self) -> MutexGuard<'_, State<T>> {
        self.state.lock().unwrap_or_else(PoisonError::into_inner)
    }

    /// Moves `item` into the buffer.
    ///
    /// Under [`OverflowPolicy::Block`] this waits for a free slot.  Under
    /// [`OverflowPolicy::DropOldest`] the oldest resident frame is discarded
    /// instead.  Fails with [`PushError::Closed`] once the buffer is closed.
    pub fn push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();
        let mut evicted = None;

        match self.policy {
            OverflowPolicy::Block => {
                while state.is_full() && !state.closed {
                    state = self
                        .not_full
                        .wait(state)
                        .unwrap_or_else(PoisonError::into_inner);
                }
            }
            OverflowPolicy::DropOldest => {
                if state.is_full() && !state.closed {
                    evicted = state.take();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        if state.closed {
            return Err(PushError::Closed(item));
        }

        state.put(item);
        drop(state);
        self.not_empty.notify_one();

        if evicted.is_some() {
            trace!("buffer full, dropped oldest frame");
        }

        Ok(())
    }

    /// Moves `item` into the buffer without waiting.
    pub fn try_push(&self, item: T) -> Result<(), PushError<T>> {
        let mut state = self.lock();

        if state.closed {
            return Err(PushError::Closed(item));
        }

        let mut evicted = None;
        if state.is_full() {
            match self.policy {
                OverflowPolicy::Block => return Err(PushError::Full(item)),
                OverflowPolicy::DropOldest => {
                    evicted = state.take();
                    self.dropped.fetch_add(1, Ordering::Relaxed);
                }
            }
        }

        state.put(item);
        drop(state);
        self.not_empty.notify_one();
        drop(evicted);

        Ok(())
    }

    /// Takes the oldest frame, waiting until one is available.
    ///
    /// Returns [`Error::Closed`] once the buffer is closed and drained.
    pub fn pop(&self) -> Result<T, Error> {
        let mut state = self.lock();

        loop {
            if let Some(item) = state.take() {
                drop(state);
                self.not_full.notify_one();
                return Ok(item);
            }

            if state.closed {
                return Err(Error::Closed);
            }

            state = self
                .not_empty
                .wait(state)
                .unwrap_or_else(PoisonError::into_inner);
        }
    }

    /// Takes the oldest frame if one is resident.
    pub fn try_pop(&self) -> Result<Option<T>, Error> {
        let mut state = self.lock();

        match state.take() {
            Some(item) => {
                drop(state);
                self.not_full.notify_one();
                Ok(Some(item))
            }
            None if state.closed => Err(Error::Closed),
            None => Ok(None),
        }
    }

    /// Like [`pop`](Self::pop) but gives up after `timeout`, returning
    /// `Ok(None)`.  A timeout too large to be represented waits forever.
    pub fn pop_timeout(&self, timeout: Duration) -> Result<Option<T>, Error> {
        let deadline = match Instant::now().checked_add(timeout) {
            Some(deadline) => deadline,
            None => return self.pop().map(Some),
        };
        let mut state = self.lock();

        loop {
            if let Some(item) = state.take() {
                drop(state);
                self.not_full.notify_one();
                return Ok(Some(item));
            }

            if state.closed {
                return Err(Error::Closed);
            }

            let now = Instant::now();
            if now >= deadline {
                return Ok(None);
            }

            state = self
                .not_empty
                .wait_timeout(state, deadline - now)
                .unwrap_or_else(PoisonError::into_inner)
                .0;
        }
    }

    /// Closes the buffer and wakes every waiter.
    ///
    /// Returns `true` for the call which actually closed the buffer.
    pub fn close(&self) -> bool {
        let mut state = self.lock();
        let first = !state.closed;
        state.closed = true;
        drop(state);

        self.not_empty.notify_all();
        self.not_full.notify_all();

        first
    }

    /// Drops every resident frame and returns how many were dropped.
    pub fn clear(&self) -> usize {
        let mut state = self.lock();
        let mut cleared = Vec::with_capacity(state.count);
        while let Some(item) = state.take() {
            cleared.push(item);
        }
        drop(state);
        self.not_full.notify_all();

        cleared.len()
    }

    /// Number of resident frames.
    pub fn len(&self) -> usize {
        self.lock().count
    }

    /// True when no frame is resident.
    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// True when every slot is occupied.
    pub fn is_full(&self) -> bool {
        self.lock().is_full()
    }

    /// True once [`close`](Self::close) was called.
    pub fn is_closed(&self) -> bool {
        self.lock().closed
    }

    /// Number of slots.
    pub fn capacity(&self) -> usize {
        self.capacity
    }

    /// Policy applied when pushing into a full buffer.
    pub fn policy(&self) -> OverflowPolicy {
        self.policy
    }

    /// Number of frames discarded by [`OverflowPolicy::DropOldest`].
    pub fn dropped(&self) -> u64 {
        self.dropped.load(Ordering::Relaxed)
    }
}

impl<T> fmt::Debug for TransferRingBuffer<T> {
    fn fmt(&self, f: &mut fmt::Formatter) -> std::fmt::Result {
        let state = self.lock();
        f.debug_struct("TransferRingBuffer")
            .field("capacity", &self.capacity)
            .field("policy", &self.policy)
            .field("len", &state.count)
            .field("closed", &state.closed)
            .field("dropped", &self.dropped())
            .finish()
    }
}

impl<T> Drop for TransferRingBuffer<T> {
    fn drop(&mut self) {
        self.close();
    }
}
