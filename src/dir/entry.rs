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

//! The fixed-size, packed directory entry.
//!
//! Ext2's directory entries are variable-sized and scanned by `rec_len`
//! (`file/fs/ext2/directory_entry.rs`); this layer's entries are all the
//! same size, so entries are simply indexed by `ENTRY_SIZE`, but the
//! "free-or-matching slot" scan shape carries over from `add_dirent`.

use crate::{SectorId, NAME_MAX};

/// Bytes occupied by one entry: a sector pointer, an in-use flag, and a
/// NUL-padded name buffer.
pub const ENTRY_SIZE: usize = 4 + 1 + (NAME_MAX + 1);

/// A single directory entry.
#[derive(Debug, Clone)]
pub struct DirEntry {
    pub inode_sector: SectorId,
    pub in_use: bool,
    name_buf: [u8; NAME_MAX + 1],
}

impl DirEntry {
    /// Builds an in-use entry pointing at `inode_sector` named `name`.
    ///
    /// `name` must be non-empty and at most `NAME_MAX` bytes; callers
    /// validate this before constructing an entry (see `dir::add`).
    pub fn new(inode_sector: SectorId, name: &str) -> Self {
        debug_assert!(!name.is_empty() && name.len() <= NAME_MAX);
        let mut name_buf = [0u8; NAME_MAX + 1];
        name_buf[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            inode_sector,
            in_use: true,
            name_buf,
        }
    }

    /// Decodes a NUL-terminated name back into a `str`. Returns `None` if
    /// the stored bytes are not valid UTF-8 (never produced by `new`, but
    /// guards a corrupted device image).
    pub fn name(&self) -> Option<&str> {
        let len = self
            .name_buf
            .iter()
            .position(|&b| b == 0)
            .unwrap_or(self.name_buf.len());
        std::str::from_utf8(&self.name_buf[..len]).ok()
    }

    /// A cleared, unused entry slot.
    pub fn free() -> Self {
        Self {
            inode_sector: 0,
            in_use: false,
            name_buf: [0u8; NAME_MAX + 1],
        }
    }

    pub fn decode(bytes: &[u8; ENTRY_SIZE]) -> Self {
        let inode_sector = SectorId::from_le_bytes(bytes[0..4].try_into().unwrap());
        let in_use = bytes[4] != 0;
        let mut name_buf = [0u8; NAME_MAX + 1];
        name_buf.copy_from_slice(&bytes[5..5 + NAME_MAX + 1]);
        Self {
            inode_sector,
            in_use,
            name_buf,
        }
    }

    pub fn encode(&self) -> [u8; ENTRY_SIZE] {
        let mut out = [0u8; ENTRY_SIZE];
        out[0..4].copy_from_slice(&self.inode_sector.to_le_bytes());
        out[4] = self.in_use as u8;
        out[5..5 + NAME_MAX + 1].copy_from_slice(&self.name_buf);
        out
    }
}
