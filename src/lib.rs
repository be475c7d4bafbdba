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

//! Concurrent buffer cache, multi-level inode index, and packed directory
//! layer over a fixed-sector block device.
//!
//! This crate implements the hard concurrency and on-disk layout logic of a
//! Unix-like file system's storage core. It does not implement a block
//! device, a free-sector allocator, a syscall surface, or thread scheduling
//! — those are supplied by the embedder through the [`device::BlockDevice`]
//! and [`device::FreeMap`] traits and through `std::thread`.
//!
//! Three layers, bottom-up:
//! - [`cache`] — the write-back buffer cache ([`cache::BufferCache`]).
//! - [`inode`] — the multi-level block index ([`inode::Inode`],
//!   [`inode::Table`]).
//! - [`dir`] — packed directory entries over an inode ([`dir::Directory`]).

pub mod cache;
pub mod device;
pub mod dir;
pub mod error;
pub mod inode;
pub mod params;
pub mod sync;

pub use crate::sync::shared_lock::AccessMode;

/// A 32-bit device sector number. Inode number == the sector holding that
/// inode's on-disk header.
pub type SectorId = u32;

/// Sector `0` never holds a file: it is reserved so that a zero-valued
/// pointer inside an index block unambiguously means "not yet allocated".
pub const NO_SECTOR: SectorId = 0;

/// Size of a sector and of a cached page, in bytes.
pub const SECTOR_SIZE: usize = params::SECTOR_SIZE;

/// Entries per sector in an index block (`SECTOR_SIZE / size_of::<SectorId>()`).
pub const INDIRECT_PTRS_PER_SECTOR: usize = SECTOR_SIZE / std::mem::size_of::<SectorId>();

/// On-disk tag identifying a valid inode header.
pub const INODE_MAGIC: u32 = 0x494e_4f44;

/// Number of `SectorId` slots in an inode header besides `length`/`type`/`magic`.
pub const BLOCK_PTR_CNT: usize = 125;
/// Of `BLOCK_PTR_CNT`, how many are direct data-block pointers.
pub const DATA_BLOCK_CNT: usize = 123;
/// Of `BLOCK_PTR_CNT`, how many are single-indirect pointers.
pub const INDIRECT_BLOCK_CNT: usize = 1;
/// Of `BLOCK_PTR_CNT`, how many are double-indirect pointers.
pub const DOUBLE_INDIRECT_BLOCK_CNT: usize = 1;

/// Largest byte offset an inode can address.
pub const MAX_LENGTH: u64 = ((DATA_BLOCK_CNT
    + INDIRECT_PTRS_PER_SECTOR * INDIRECT_BLOCK_CNT
    + INDIRECT_PTRS_PER_SECTOR * INDIRECT_PTRS_PER_SECTOR * DOUBLE_INDIRECT_BLOCK_CNT)
    * SECTOR_SIZE) as u64;

/// Longest directory entry name, excluding the trailing NUL.
pub const NAME_MAX: usize = 63;
