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

//! Tunable constants, injected rather than read from a process-wide global.
//!
//! Tests that want to exercise eviction cheaply construct a [`Params`] with a
//! small [`Params::cache_size`] instead of relying on the default 64 slots.

use std::time::Duration;

/// Size of a device sector and of a cached page, in bytes.
pub const SECTOR_SIZE: usize = 512;

/// Default number of slots in the buffer cache.
pub const DEFAULT_CACHE_SIZE: usize = 64;

/// Sleep interval when an `acquire` finds no slot to take after a full
/// eviction scan, and when `dealloc`/eviction lose a race and must retry.
const DEFAULT_ACQUIRE_BACKOFF: Duration = Duration::from_millis(100);

/// Default period between flush-daemon sweeps.
const DEFAULT_FLUSH_INTERVAL: Duration = Duration::from_secs(20);

/// Configuration for a [`crate::cache::BufferCache`].
#[derive(Debug, Clone)]
pub struct Params {
    /// Number of slots in the cache array.
    pub cache_size: usize,
    /// Backoff slept when a full eviction scan finds no victim before the
    /// acquire loop restarts from the lookup pass.
    pub acquire_backoff: Duration,
    /// Period on which the flush daemon calls `flush()`.
    pub flush_interval: Duration,
}

impl Default for Params {
    fn default() -> Self {
        Self {
            cache_size: DEFAULT_CACHE_SIZE,
            acquire_backoff: DEFAULT_ACQUIRE_BACKOFF,
            flush_interval: DEFAULT_FLUSH_INTERVAL,
        }
    }
}

impl Params {
    /// A cache small enough that a handful of `acquire` calls will trigger
    /// eviction, for tests of the clock algorithm.
    pub fn small(cache_size: usize) -> Self {
        Self {
            cache_size,
            ..Self::default()
        }
    }
}
