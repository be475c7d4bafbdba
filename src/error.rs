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

//! Error kinds returned by the cache, inode, and directory layers.
//!
//! The set is small and closed, so it is a hand-written enum rather than a
//! `thiserror`-derived one, in the same spirit as the kernel's own `Errno`.

use crate::SectorId;
use std::fmt;

/// An error produced by one of the three layers.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Error {
    /// A `BlockDevice::read`/`write` call failed. Fatal for the operation
    /// that triggered it; no cache state is left inconsistent.
    DeviceError,
    /// The free-map allocator had no sector left to hand out during block
    /// allocation. Any bytes already written before the short write are
    /// preserved.
    OutOfSpace,
    /// Allocation of an in-memory inode, or of a read-ahead request slot,
    /// failed.
    OutOfMemory,
    /// A directory `add` was given an empty name or one longer than
    /// `NAME_MAX`.
    InvalidName,
    /// A directory `add` target name is already taken, or a `remove`
    /// target is `.`/`..`, is open elsewhere, or is a non-empty directory.
    Busy,
    /// A directory `lookup`/`remove` target does not exist.
    NotFound,
    /// An on-disk header's `magic` field did not match `INODE_MAGIC`.
    ///
    /// Not part of the distilled Pintos behaviour (which never checks a
    /// magic number); see DESIGN.md.
    Corrupt {
        /// Sector holding the header that failed validation.
        sector: SectorId,
    },
}

impl fmt::Display for Error {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Error::DeviceError => write!(f, "block device I/O failed"),
            Error::OutOfSpace => write!(f, "free map exhausted"),
            Error::OutOfMemory => write!(f, "allocation failed"),
            Error::InvalidName => write!(f, "invalid directory entry name"),
            Error::Busy => write!(f, "resource busy"),
            Error::NotFound => write!(f, "not found"),
            Error::Corrupt { sector } => write!(f, "corrupt inode header at sector {sector}"),
        }
    }
}

impl std::error::Error for Error {}

/// Convenience alias used throughout the crate.
pub type Result<T> = std::result::Result<T, Error>;
