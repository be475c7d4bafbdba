/*
 * This file is part of fscore.
 *
 * fscore is free software: you can redistribute it and/or modify it under the
 * terms of the GNU General Public License as published by the Free Software
 * Foundation, either version 3 of the License, or (at your option) any later
 * version.
 *
 * fscore is distributed in the hope that it will be useful, but WITHOUT ANY
 * WARRANTY; without even the implied warranty of MERCHANTABILITY or FITNESS FOR
 * A PARTICULAR PURPOSE. See the GNU General Public License for more details.
 *
 * You should have received a copy of the GNU General Public License along with
 * fscore. If not, see <https://www.gnu.org/licenses/>.
 */

//! A reader/writer lock parametric over an externally supplied interlock
//! mutex.
//!
//! [`crate::sync::rwlock`]-style locks (and the kernel's own
//! [`crate::sync`] equivalent) bundle their own interlock: the counters
//! that track readers and writers live behind a private spinlock internal
//! to the type. That is insufficient here. The cache needs to transition a
//! slot's `waiters` count and its lock state as a single atomic step, which
//! means the lock's own reader/writer counters must live in the *same*
//! guarded block as the rest of the slot's metadata, not behind a lock of
//! their own.
//!
//! [`SharedLock`] therefore holds no mutex at all. Its state is plain data,
//! meant to be embedded inside a struct that is itself behind a
//! [`crate::sync::Mutex`]; every method takes a `&mut` reference to that
//! state plus the already-held guard's [`crate::sync::WaitQueue`] companion
//! to park on. This mirrors how `std::sync::Condvar::wait` takes whichever
//! mutex guard produced it as its own interlock, rather than owning a
//! mutex itself.

use crate::sync::WaitQueue;
use std::sync::MutexGuard;

/// Which side of the lock a holder took.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum AccessMode {
    /// Any number of shared holders may coexist.
    Shared,
    /// At most one exclusive holder, and no concurrent shared holders.
    Exclusive,
}

/// Reader/writer state, embedded in the struct guarded by the interlock
/// mutex. Zero-sized in terms of synchronization machinery of its own.
#[derive(Debug, Default)]
pub struct SharedLock {
    readers: usize,
    writer: bool,
}

impl SharedLock {
    /// A freshly unlocked state.
    pub const fn new() -> Self {
        Self {
            readers: 0,
            writer: false,
        }
    }

    /// Non-blocking acquire. The caller must already hold the interlock
    /// (i.e. `self` must be reached through its guard).
    pub fn try_acquire(&mut self, mode: AccessMode) -> bool {
        match mode {
            AccessMode::Shared if !self.writer => {
                self.readers += 1;
                true
            }
            AccessMode::Exclusive if !self.writer && self.readers == 0 => {
                self.writer = true;
                true
            }
            _ => false,
        }
    }

    /// Releases a hold previously taken in `mode`.
    pub fn release(&mut self, mode: AccessMode) {
        match mode {
            AccessMode::Shared => {
                debug_assert!(self.readers > 0);
                self.readers -= 1;
            }
            AccessMode::Exclusive => {
                debug_assert!(self.writer);
                self.writer = false;
            }
        }
    }

    /// Blocking acquire: loops `try_acquire` against `queue`, re-locking
    /// `guard`'s mutex between attempts. `project` extracts `&mut Self` from
    /// the guarded value, since `Self` is normally a field of a larger
    /// struct rather than the guarded value itself.
    pub fn acquire<'a, T>(
        queue: &WaitQueue,
        mut guard: MutexGuard<'a, T>,
        mode: AccessMode,
        mut project: impl FnMut(&mut T) -> &mut Self,
    ) -> MutexGuard<'a, T> {
        loop {
            if project(&mut guard).try_acquire(mode) {
                return guard;
            }
            guard = queue.wait(guard);
        }
    }
}
