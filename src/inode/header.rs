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

//! On-disk layout of an inode header: exactly one sector, `BLOCK_PTR_CNT`
//! little-endian sector pointers followed by length, type, and magic.

use crate::{
    error::{Error, Result},
    SectorId, BLOCK_PTR_CNT, INODE_MAGIC, SECTOR_SIZE,
};

const LENGTH_OFFSET: usize = BLOCK_PTR_CNT * 4;
const TYPE_OFFSET: usize = LENGTH_OFFSET + 4;
const MAGIC_OFFSET: usize = TYPE_OFFSET + 4;

/// The decoded contents of an inode header sector.
pub struct InodeHeader {
    pub length: u64,
    pub is_dir: bool,
    pub pointers: [SectorId; BLOCK_PTR_CNT],
}

impl InodeHeader {
    /// Decodes a header from its sector, rejecting one whose magic number
    /// does not match.
    pub fn decode(page: &[u8; SECTOR_SIZE], sector: SectorId) -> Result<Self> {
        let magic = u32::from_le_bytes(page[MAGIC_OFFSET..MAGIC_OFFSET + 4].try_into().unwrap());
        if magic != INODE_MAGIC {
            return Err(Error::Corrupt { sector });
        }
        let mut pointers = [0 as SectorId; BLOCK_PTR_CNT];
        for (i, ptr) in pointers.iter_mut().enumerate() {
            let off = i * 4;
            *ptr = SectorId::from_le_bytes(page[off..off + 4].try_into().unwrap());
        }
        let length =
            u32::from_le_bytes(page[LENGTH_OFFSET..LENGTH_OFFSET + 4].try_into().unwrap()) as u64;
        let ty = i32::from_le_bytes(page[TYPE_OFFSET..TYPE_OFFSET + 4].try_into().unwrap());
        Ok(Self {
            length,
            is_dir: ty == 1,
            pointers,
        })
    }

    /// Encodes this header into its sector.
    pub fn encode(&self, page: &mut [u8; SECTOR_SIZE]) {
        for (i, ptr) in self.pointers.iter().enumerate() {
            let off = i * 4;
            page[off..off + 4].copy_from_slice(&ptr.to_le_bytes());
        }
        page[LENGTH_OFFSET..LENGTH_OFFSET + 4].copy_from_slice(&(self.length as u32).to_le_bytes());
        let ty: i32 = if self.is_dir { 1 } else { 0 };
        page[TYPE_OFFSET..TYPE_OFFSET + 4].copy_from_slice(&ty.to_le_bytes());
        page[MAGIC_OFFSET..MAGIC_OFFSET + 4].copy_from_slice(&INODE_MAGIC.to_le_bytes());
    }
}
