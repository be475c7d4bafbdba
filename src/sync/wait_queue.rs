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

//! A queue of threads blocked on some predicate over state guarded by a
//! caller-owned mutex.
//!
//! Unlike the kernel's `WaitQueue`, which parks threads on its own
//! scheduler run-queue, this one is a condition variable: the mutex that
//! guards the awaited state is supplied by the caller at every call, which
//! is exactly the "externally interlocked" shape the shared lock below
//! needs.

use std::sync::{Condvar, MutexGuard};

/// Wraps a [`Condvar`] with the naming the rest of this crate's
/// synchronization types use.
#[derive(Default)]
pub struct WaitQueue {
    cond: Condvar,
}

impl WaitQueue {
    /// Creates an empty wait queue.
    pub fn new() -> Self {
        Self {
            cond: Condvar::new(),
        }
    }

    /// Blocks the calling thread, releasing `guard`'s mutex for the
    /// duration, until woken by [`Self::wake_next`] or [`Self::wake_all`].
    pub fn wait<'a, T>(&self, guard: MutexGuard<'a, T>) -> MutexGuard<'a, T> {
        self.cond.wait(guard).unwrap_or_else(|e| e.into_inner())
    }

    /// Blocks until `predicate` holds, re-checking it after every wake-up
    /// (guards against spurious wake-ups and lost wake-ups alike).
    pub fn wait_until<'a, T>(
        &self,
        mut guard: MutexGuard<'a, T>,
        mut predicate: impl FnMut(&mut T) -> bool,
    ) -> MutexGuard<'a, T> {
        while !predicate(&mut guard) {
            guard = self.wait(guard);
        }
        guard
    }

    /// Wakes a single waiting thread, if any.
    pub fn wake_next(&self) {
        self.cond.notify_one();
    }

    /// Wakes every waiting thread.
    pub fn wake_all(&self) {
        self.cond.notify_all();
    }
}
