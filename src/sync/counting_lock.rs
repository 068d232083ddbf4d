//! Counting Reader/Writer Lock
//!
//! Many concurrent readers or one exclusive writer, with an optional cap on
//! the number of simultaneous readers. Every release wakes all waiters, which
//! re-check their condition. Neither readers nor writers are prioritized, so
//! a steady stream of one side can starve the other.

use parking_lot::{Condvar, Mutex, RwLock, RwLockReadGuard, RwLockWriteGuard};
use std::fmt;
use std::ops::{Deref, DerefMut};

#[derive(Debug, Default)]
struct LockState {
    readers: usize,
    writer: bool,
}

/// Admission control: decides who may touch the data and counts holders.
#[derive(Debug)]
struct Gate {
    state: Mutex<LockState>,
    released: Condvar,
    max_readers: Option<usize>,
}

impl Gate {
    fn admit_reader(&self) -> ReadPermit<'_> {
        let mut state = self.state.lock();
        while state.writer || self.readers_full(&state) {
            self.released.wait(&mut state);
        }
        state.readers += 1;
        ReadPermit(self)
    }

    fn admit_writer(&self) -> WritePermit<'_> {
        let mut state = self.state.lock();
        while state.writer || state.readers > 0 {
            self.released.wait(&mut state);
        }
        state.writer = true;
        WritePermit(self)
    }

    fn readers_full(&self, state: &LockState) -> bool {
        self.max_readers
            .map(|max| state.readers >= max)
            .unwrap_or(false)
    }
}

struct ReadPermit<'a>(&'a Gate);

impl Drop for ReadPermit<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.readers -= 1;
        self.0.released.notify_all();
    }
}

struct WritePermit<'a>(&'a Gate);

impl Drop for WritePermit<'_> {
    fn drop(&mut self) {
        let mut state = self.0.state.lock();
        state.writer = false;
        self.0.released.notify_all();
    }
}

/// Reader/writer lock with an optional reader cap.
///
/// The gate admits holders; the inner `RwLock` is never contended because
/// the gate only lets compatible holders through.
pub struct CountingRwLock<T> {
    gate: Gate,
    data: RwLock<T>,
}

impl<T> CountingRwLock<T> {
    /// Create a lock with no reader cap.
    pub fn new(data: T) -> Self {
        Self {
            gate: Gate {
                state: Mutex::new(LockState::default()),
                released: Condvar::new(),
                max_readers: None,
            },
            data: RwLock::new(data),
        }
    }

    /// Create a lock admitting at most `max_readers` concurrent readers.
    /// A cap of zero is treated as one.
    pub fn with_max_readers(data: T, max_readers: usize) -> Self {
        let mut lock = Self::new(data);
        lock.gate.max_readers = Some(max_readers.max(1));
        lock
    }

    /// Configured reader cap, `None` when unbounded.
    pub fn max_readers(&self) -> Option<usize> {
        self.gate.max_readers
    }

    /// Acquire shared access, blocking while a writer holds the lock or the
    /// reader cap is reached.
    pub fn read(&self) -> ReadGuard<'_, T> {
        let permit = self.gate.admit_reader();
        ReadGuard {
            data: self.data.read(),
            _permit: permit,
        }
    }

    /// Acquire exclusive access, blocking while any reader or writer holds
    /// the lock.
    pub fn write(&self) -> WriteGuard<'_, T> {
        let permit = self.gate.admit_writer();
        WriteGuard {
            data: self.data.write(),
            _permit: permit,
        }
    }

    /// Number of readers currently holding the lock.
    pub fn readers(&self) -> usize {
        self.gate.state.lock().readers
    }

    /// Number of writers currently holding the lock (0 or 1).
    pub fn writers(&self) -> usize {
        usize::from(self.gate.state.lock().writer)
    }
}

impl<T: Default> Default for CountingRwLock<T> {
    fn default() -> Self {
        Self::new(T::default())
    }
}

impl<T> fmt::Debug for CountingRwLock<T> {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        let state = self.gate.state.lock();
        f.debug_struct("CountingRwLock")
            .field("readers", &state.readers)
            .field("writer", &state.writer)
            .field("max_readers", &self.gate.max_readers)
            .finish_non_exhaustive()
    }
}

/// Shared access; releases on drop.
// Field order matters: the data guard drops before the permit reopens the gate.
pub struct ReadGuard<'a, T> {
    data: RwLockReadGuard<'a, T>,
    _permit: ReadPermit<'a>,
}

impl<T> Deref for ReadGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

/// Exclusive access; releases on drop.
pub struct WriteGuard<'a, T> {
    data: RwLockWriteGuard<'a, T>,
    _permit: WritePermit<'a>,
}

impl<T> Deref for WriteGuard<'_, T> {
    type Target = T;

    fn deref(&self) -> &T {
        &self.data
    }
}

impl<T> DerefMut for WriteGuard<'_, T> {
    fn deref_mut(&mut self) -> &mut T {
        &mut self.data
    }
}
