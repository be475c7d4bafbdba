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

//! Sleeping mutual exclusion primitive.
//!
//! A thin wrapper over [`std::sync::Mutex`] that never hands back a
//! `PoisonError`: a panic while holding the lock is a bug in this crate, not
//! a recoverable condition a caller should branch on, so poisoning is
//! unwrapped away at the call site instead of threaded through every lock
//! user.

use std::sync::{self, MutexGuard, TryLockError};

/// A mutex guarding `T`.
pub struct Mutex<T: ?Sized> {
    inner: sync::Mutex<T>,
}

impl<T> Mutex<T> {
    /// Creates a new mutex holding `value`.
    pub fn new(value: T) -> Self {
        Self {
            inner: sync::Mutex::new(value),
        }
    }
}

impl<T: ?Sized> Mutex<T> {
    /// Blocks until the lock is acquired.
    pub fn lock(&self) -> MutexGuard<'_, T> {
        self.inner.lock().unwrap_or_else(|e| e.into_inner())
    }

    /// Acquires the lock without blocking, returning `None` if it is
    /// currently held elsewhere.
    pub fn try_lock(&self) -> Option<MutexGuard<'_, T>> {
        match self.inner.try_lock() {
            Ok(guard) => Some(guard),
            Err(TryLockError::WouldBlock) => None,
            Err(TryLockError::Poisoned(e)) => Some(e.into_inner()),
        }
    }
}
