//! A linear-scan free-sector bitmap, for tests only.

use fscore::{device::FreeMap, SectorId};
use std::sync::Mutex;

pub struct BitmapFreeMap {
    used: Mutex<Vec<bool>>,
}

impl BitmapFreeMap {
    /// Builds a bitmap over `sector_count` sectors with `reserved` already
    /// marked taken (e.g. sectors spent on inode headers the test
    /// allocates by hand, outside the free map).
    pub fn new(sector_count: usize, reserved: &[SectorId]) -> Self {
        let mut used = vec![false; sector_count];
        for &sector in reserved {
            used[sector as usize] = true;
        }
        Self {
            used: Mutex::new(used),
        }
    }
}

impl FreeMap for BitmapFreeMap {
    fn allocate(&self, n: usize) -> Option<SectorId> {
        let mut used = self.used.lock().unwrap();
        let len = used.len();
        'search: for start in 0..len {
            if start + n > len {
                break;
            }
            for used_bit in &used[start..start + n] {
                if *used_bit {
                    continue 'search;
                }
            }
            for used_bit in &mut used[start..start + n] {
                *used_bit = true;
            }
            return Some(start as SectorId);
        }
        None
    }

    fn release(&self, sector: SectorId, n: usize) {
        let mut used = self.used.lock().unwrap();
        for used_bit in &mut used[sector as usize..sector as usize + n] {
            *used_bit = false;
        }
    }
}
