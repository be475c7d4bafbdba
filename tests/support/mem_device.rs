//! An in-memory stand-in for a block device, for tests only.

use fscore::{device::BlockDevice, error::Result, SectorId, SECTOR_SIZE};
use std::sync::Mutex;

pub struct MemDevice {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl MemDevice {
    pub fn new(sector_count: usize) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; sector_count]),
        }
    }
}

impl BlockDevice for MemDevice {
    fn sector_count(&self) -> u64 {
        self.sectors.lock().unwrap().len() as u64
    }

    fn read(&self, sector: SectorId, buf: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        *buf = self.sectors.lock().unwrap()[sector as usize];
        Ok(())
    }

    fn write(&self, sector: SectorId, buf: &[u8; SECTOR_SIZE]) -> Result<()> {
        self.sectors.lock().unwrap()[sector as usize] = *buf;
        Ok(())
    }
}
