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

//! Synchronization primitives used by the cache, inode, and directory
//! layers.
//!
//! The platform is assumed to provide preemptive threads, a blocking mutex,
//! a condition variable, and a millisecond sleep (`std::thread::sleep`);
//! thread spawning and scheduling themselves are out of scope for this
//! crate, so these wrappers sit directly on `std::sync` rather than on a
//! scheduler, unlike the kernel's own `sync` module.

pub mod mutex;
pub mod shared_lock;
pub mod wait_queue;

pub use mutex::Mutex;
pub use shared_lock::SharedLock;
pub use wait_queue::WaitQueue;
