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

//! The directory layer: a directory is an inode holding a packed sequence
//! of fixed-size [`entry::DirEntry`] records, plus a read cursor for
//! [`Directory::readdir`].
//!
//! Entry mutations are serialized against lookups by the inode's own
//! `acquire_lock`/`release_lock`, matching `directory.c`'s
//! `inode_acquire_lock`/`inode_release_lock` pairing around every
//! `lookup`/`dir_add`/`dir_remove`/`dir_readdir` body.

mod entry;

pub use entry::DirEntry;

use crate::{
    error::{Error, Result},
    inode::{Inode, Table},
    sync::Mutex,
    SectorId, NAME_MAX,
};
use entry::ENTRY_SIZE;
use std::sync::Arc;

/// Conventional sector of the filesystem's root directory inode.
pub const ROOT_DIR_SECTOR: SectorId = 1;

/// An open directory: an inode plus a read cursor.
pub struct Directory {
    table: Arc<Table>,
    inode: Arc<Inode>,
    pos: Mutex<u64>,
}

impl Directory {
    /// Creates a directory inode at `sector` and populates it with `.` and
    /// `..` entries pointing at `sector` and `parent_sector` respectively.
    pub fn create(table: &Arc<Table>, sector: SectorId, parent_sector: SectorId) -> Result<()> {
        let inode = table.create(sector, true)?;
        let dot = DirEntry::new(sector, ".").encode();
        let dotdot = DirEntry::new(parent_sector, "..").encode();
        let wrote_dot = inode.write_at(&dot, 0)?;
        let wrote_dotdot = inode.write_at(&dotdot, ENTRY_SIZE as u64)?;
        let ok = wrote_dot == ENTRY_SIZE && wrote_dotdot == ENTRY_SIZE;
        if !ok {
            inode.remove();
        }
        table.close(inode)?;
        if !ok {
            return Err(Error::OutOfSpace);
        }
        Ok(())
    }

    /// Wraps an already-open inode as a directory. Fails if `inode` is not
    /// a directory (the inode is closed in that case).
    pub fn open(table: Arc<Table>, inode: Arc<Inode>) -> Result<Self> {
        if !inode.is_dir()? {
            table.close(inode)?;
            return Err(Error::NotFound);
        }
        Ok(Self {
            table,
            inode,
            pos: Mutex::new(0),
        })
    }

    /// Opens the root directory.
    pub fn open_root(table: Arc<Table>) -> Result<Self> {
        let inode = table.open(ROOT_DIR_SECTOR);
        Self::open(table, inode)
    }

    /// Opens a second, independent cursor onto the same directory inode.
    pub fn reopen(&self) -> Self {
        let inode = self.table.reopen(&self.inode);
        Self {
            table: Arc::clone(&self.table),
            inode,
            pos: Mutex::new(0),
        }
    }

    /// Closes the directory, releasing its inode handle.
    pub fn close(self) -> Result<()> {
        self.table.close(self.inode)
    }

    /// The backing inode.
    pub fn get_inode(&self) -> &Arc<Inode> {
        &self.inode
    }

    fn read_entry(&self, ofs: u64) -> Result<Option<DirEntry>> {
        let mut buf = [0u8; ENTRY_SIZE];
        let n = self.inode.read_at(&mut buf, ofs)?;
        if n != ENTRY_SIZE {
            return Ok(None);
        }
        Ok(Some(DirEntry::decode(&buf)))
    }

    /// Linear scan for `name`, returning the matching entry and its offset.
    fn scan(&self, name: &str) -> Result<Option<(DirEntry, u64)>> {
        let mut ofs = 0u64;
        while let Some(entry) = self.read_entry(ofs)? {
            if entry.in_use && entry.name() == Some(name) {
                return Ok(Some((entry, ofs)));
            }
            ofs += ENTRY_SIZE as u64;
        }
        Ok(None)
    }

    /// Looks up `name`, opening and returning its inode if found.
    pub fn lookup(&self, name: &str) -> Result<Option<Arc<Inode>>> {
        let lock = self.inode.acquire_lock();
        let found = self.scan(name)?;
        self.inode.release_lock(lock);
        Ok(found.map(|(entry, _)| self.table.open(entry.inode_sector)))
    }

    /// Adds `name` pointing at `inode_sector`. Fails with `InvalidName` if
    /// the name is empty or too long, `Busy` if the name is already taken.
    pub fn add(&self, name: &str, inode_sector: SectorId) -> Result<()> {
        if name.is_empty() || name.len() > NAME_MAX {
            return Err(Error::InvalidName);
        }
        let lock = self.inode.acquire_lock();
        let result = (|| -> Result<()> {
            if self.scan(name)?.is_some() {
                return Err(Error::Busy);
            }
            // Find the first free slot, or append at end-of-file.
            let mut ofs = 0u64;
            loop {
                match self.read_entry(ofs)? {
                    Some(entry) if !entry.in_use => break,
                    Some(_) => ofs += ENTRY_SIZE as u64,
                    None => break,
                }
            }
            let entry = DirEntry::new(inode_sector, name).encode();
            let written = self.inode.write_at(&entry, ofs)?;
            if written != ENTRY_SIZE {
                return Err(Error::OutOfSpace);
            }
            Ok(())
        })();
        self.inode.release_lock(lock);
        result
    }

    /// Removes `name`. Rejects `.`/`..`. If the target is a directory,
    /// requires it be open nowhere else and contain only `.`/`..`.
    pub fn remove(&self, name: &str) -> Result<()> {
        if name == "." || name == ".." {
            return Err(Error::Busy);
        }
        let lock = self.inode.acquire_lock();
        let result = (|| -> Result<()> {
            let Some((entry, ofs)) = self.scan(name)? else {
                return Err(Error::NotFound);
            };
            let target = self.table.open(entry.inode_sector);

            if target.is_dir()? {
                if target.open_count() > 1 {
                    self.table.close(target)?;
                    return Err(Error::Busy);
                }
                let target_dir = Directory {
                    table: Arc::clone(&self.table),
                    inode: Arc::clone(&target),
                    pos: Mutex::new(0),
                };
                let mut live = 0u32;
                let mut child_ofs = 0u64;
                while let Some(child) = target_dir.read_entry(child_ofs)? {
                    if child.in_use {
                        live += 1;
                        if live >= 3 {
                            self.table.close(target)?;
                            return Err(Error::Busy);
                        }
                    }
                    child_ofs += ENTRY_SIZE as u64;
                }
            }

            let cleared = DirEntry::free().encode();
            let written = self.inode.write_at(&cleared, ofs)?;
            if written != ENTRY_SIZE {
                self.table.close(target)?;
                return Err(Error::OutOfSpace);
            }
            target.remove();
            self.table.close(target)
        })();
        self.inode.release_lock(lock);
        result
    }

    /// Advances the cursor past deleted entries and `.`/`..`, returning the
    /// next live name, or `None` at end of directory.
    pub fn readdir(&self) -> Result<Option<String>> {
        let lock = self.inode.acquire_lock();
        let mut pos = self.pos.lock();
        let result = loop {
            let ofs = *pos;
            match self.read_entry(ofs)? {
                None => break None,
                Some(entry) => {
                    *pos = ofs + ENTRY_SIZE as u64;
                    if entry.in_use {
                        if let Some(name) = entry.name() {
                            if name != "." && name != ".." {
                                break Some(name.to_string());
                            }
                        }
                    }
                }
            }
        };
        drop(pos);
        self.inode.release_lock(lock);
        Ok(result)
    }
}
