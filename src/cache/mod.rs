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

//! The buffer cache: a fixed-size array of slots, each binding a device
//! sector to an in-memory page, with clock-hand eviction, write-back, and
//! read-ahead.
//!
//! This is the only layer that touches the [`BlockDevice`]; the inode and
//! directory layers read and write sectors exclusively through
//! [`BufferCache::acquire`]/[`BufferCache::data`].

use crate::{
    device::BlockDevice,
    params::Params,
    sync::{Mutex, SharedLock, WaitQueue},
    SectorId, SECTOR_SIZE,
};
pub use crate::sync::shared_lock::AccessMode;
use std::{
    cell::UnsafeCell,
    collections::VecDeque,
    sync::Arc,
    thread::{self, JoinHandle},
    time::Duration,
};

/// Sentinel meaning "this slot does not currently back any sector".
const EMPTY_SLOT: SectorId = SectorId::MAX;

/// Per-slot metadata, guarded by [`CacheSlot::meta`]. The reader/writer
/// lock state lives here too (see [`crate::sync::shared_lock`]) so that
/// `waiters` and the lock can be transitioned as one atomic step.
struct SlotMeta {
    sector: SectorId,
    has_data: bool,
    dirty: bool,
    accessed: bool,
    waiters: usize,
    lock: SharedLock,
}

impl SlotMeta {
    fn empty() -> Self {
        Self {
            sector: EMPTY_SLOT,
            has_data: false,
            dirty: false,
            accessed: false,
            waiters: 0,
            lock: SharedLock::new(),
        }
    }
}

/// One cache slot. `data` is read or written only by a thread holding the
/// slot's lock (shared for reads, exclusive for writes), which is exactly
/// the invariant that makes the `UnsafeCell` access below sound.
struct CacheSlot {
    meta: Mutex<SlotMeta>,
    /// Woken whenever `meta`'s lock state or `waiters` changes.
    cond: WaitQueue,
    /// Serializes the very first population of `data` for a slot (the
    /// device read or zero-fill), so two shared holders racing in
    /// [`BufferCache::data`] do not both read from the device.
    load: Mutex<()>,
    data: UnsafeCell<[u8; SECTOR_SIZE]>,
}

// SAFETY: `data` is only ever read or written while the accessor holds the
// slot's `SharedLock` in the matching mode; `UnsafeCell` is needed only
// because that discipline is enforced at runtime, not by the borrow
// checker.
unsafe impl Sync for CacheSlot {}

impl CacheSlot {
    fn new() -> Self {
        Self {
            meta: Mutex::new(SlotMeta::empty()),
            cond: WaitQueue::new(),
            load: Mutex::new(()),
            data: UnsafeCell::new([0u8; SECTOR_SIZE]),
        }
    }

    /// Blocking acquire of this slot's reader/writer lock.
    fn lock_mode(&self, mode: AccessMode) {
        let guard = self.meta.lock();
        SharedLock::acquire(&self.cond, guard, mode, |m| &mut m.lock);
    }

    /// Releases a hold taken by [`Self::lock_mode`] or a successful
    /// `try_acquire`, and wakes anyone blocked on the transition.
    fn unlock_mode(&self, mode: AccessMode) {
        let mut g = self.meta.lock();
        g.lock.release(mode);
        drop(g);
        self.cond.wake_all();
    }
}

/// A pinned, locked reference to one cache slot.
///
/// [`BufferCache::release`] is the normal, explicit way to let go of a
/// handle, but `Drop` unlocks it too — an early return via `?` (a device
/// error mid-read, say) must not leave the slot locked forever.
pub struct SlotHandle {
    cache: Arc<BufferCache>,
    index: usize,
    sector: SectorId,
    mode: AccessMode,
    released: bool,
}

impl SlotHandle {
    /// The sector this handle is pinned to.
    pub fn sector(&self) -> SectorId {
        self.sector
    }

    /// The mode this handle was acquired in.
    pub fn mode(&self) -> AccessMode {
        self.mode
    }
}

impl Drop for SlotHandle {
    fn drop(&mut self) {
        if !self.released {
            self.cache.slots[self.index].unlock_mode(self.mode);
        }
    }
}

/// A fixed-size array of cached sectors with clock-hand eviction.
pub struct BufferCache {
    device: Arc<dyn BlockDevice>,
    params: Params,
    slots: Vec<CacheSlot>,
    /// Protects only the clock hand; never held across device I/O.
    clock: Mutex<usize>,
    readahead: Mutex<VecDeque<SectorId>>,
    readahead_cond: WaitQueue,
}

impl BufferCache {
    /// Builds a cache of `params.cache_size` slots over `device`.
    pub fn new(device: Arc<dyn BlockDevice>, params: Params) -> Arc<Self> {
        let slots = (0..params.cache_size).map(|_| CacheSlot::new()).collect();
        Arc::new(Self {
            device,
            params,
            slots,
            clock: Mutex::new(0),
            readahead: Mutex::new(VecDeque::new()),
            readahead_cond: WaitQueue::new(),
        })
    }

    /// Pins and locks `sector` in `mode`. Never fails: under sustained
    /// contention it sleeps [`Params::acquire_backoff`] and retries.
    pub fn acquire(self: &Arc<Self>, sector: SectorId, mode: AccessMode) -> SlotHandle {
        loop {
            if let Some(index) = self.lookup_pass(sector, mode) {
                return self.make_handle(index, sector, mode);
            }
            if let Some(index) = self.empty_pass(sector, mode) {
                return self.make_handle(index, sector, mode);
            }
            if self.evict_pass() {
                continue;
            }
            thread::sleep(self.params.acquire_backoff);
        }
    }

    fn make_handle(self: &Arc<Self>, index: usize, sector: SectorId, mode: AccessMode) -> SlotHandle {
        SlotHandle {
            cache: Arc::clone(self),
            index,
            sector,
            mode,
            released: false,
        }
    }

    /// Pass 1: is `sector` already resident?
    fn lookup_pass(&self, sector: SectorId, mode: AccessMode) -> Option<usize> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut g = slot.meta.lock();
            if g.sector != sector {
                continue;
            }
            // Pin the slot before dropping the metadata lock, so an
            // evictor scanning concurrently sees `waiters != 0` and skips
            // it until we've taken the shared lock below.
            g.waiters += 1;
            drop(g);
            slot.lock_mode(mode);
            let mut g = slot.meta.lock();
            g.waiters -= 1;
            debug_assert_eq!(
                g.sector, sector,
                "slot re-sectored while a waiter held it pinned"
            );
            drop(g);
            slot.cond.wake_all();
            return Some(index);
        }
        None
    }

    /// Pass 2: is there a free slot?
    fn empty_pass(&self, sector: SectorId, mode: AccessMode) -> Option<usize> {
        for (index, slot) in self.slots.iter().enumerate() {
            let mut g = slot.meta.lock();
            if g.sector != EMPTY_SLOT {
                continue;
            }
            g.sector = sector;
            g.has_data = false;
            g.dirty = false;
            g.accessed = false;
            g.waiters = 0;
            let acquired = g.lock.try_acquire(mode);
            debug_assert!(acquired, "a slot nobody else has claimed must be free");
            return Some(index);
        }
        None
    }

    /// Pass 3: evict a victim under the clock algorithm.
    ///
    /// Returns `true` if a slot was evicted — the caller should restart
    /// from the lookup pass, which will now find the freed slot via the
    /// empty pass. Returns `false` if `2 * cache_size` probes found no
    /// victim, in which case the caller backs off.
    fn evict_pass(&self) -> bool {
        let total = self.slots.len();
        let max_probes = total * 2;
        let mut clock = self.clock.lock();
        for _ in 0..max_probes {
            let idx = *clock % total;
            *clock = (*clock + 1) % total;
            let slot = &self.slots[idx];
            let mut g = match slot.meta.try_lock() {
                Some(g) => g,
                None => continue,
            };
            if g.waiters != 0 {
                continue;
            }
            if g.accessed {
                g.accessed = false;
                continue;
            }
            if !g.lock.try_acquire(AccessMode::Exclusive) {
                continue;
            }
            let victim_sector = g.sector;
            let needs_writeback = g.dirty && g.has_data;
            drop(g);
            // Never hold the clock mutex across device I/O.
            drop(clock);

            if needs_writeback {
                // SAFETY: we hold the slot's lock exclusively.
                let buf = unsafe { &*slot.data.get() };
                let wrote = self.device.write(victim_sector, buf).is_ok();
                let mut g = slot.meta.lock();
                if wrote {
                    g.dirty = false;
                }
                self.finish_evict(slot, &mut g);
            } else {
                let mut g = slot.meta.lock();
                self.finish_evict(slot, &mut g);
            }
            return true;
        }
        false
    }

    /// Common tail of eviction: re-check `waiters` (an arriving lookup may
    /// have re-adopted the slot while I/O was in flight), reset the slot if
    /// not, then release the exclusive hold taken during the scan.
    fn finish_evict(&self, slot: &CacheSlot, g: &mut SlotMeta) {
        if g.waiters == 0 {
            g.sector = EMPTY_SLOT;
            g.has_data = false;
            g.dirty = false;
            g.accessed = false;
        }
        g.lock.release(AccessMode::Exclusive);
        slot.cond.wake_all();
    }

    /// Releases `handle`'s lock in the mode it was acquired.
    pub fn release(&self, mut handle: SlotHandle) {
        self.slots[handle.index].unlock_mode(handle.mode);
        handle.released = true;
    }

    /// Returns the slot's page for shared, read-only access, populating it
    /// from the device first if necessary. The caller may hold the handle
    /// in either mode.
    ///
    /// If the slot has no data yet, it is read from the device; concurrent
    /// shared holders racing here are serialized by the slot's load mutex
    /// so the read happens once.
    pub fn data(&self, handle: &mut SlotHandle) -> crate::error::Result<&[u8; SECTOR_SIZE]> {
        let slot = &self.slots[handle.index];
        let has_data = slot.meta.lock().has_data;
        if !has_data {
            let _serialize = slot.load.lock();
            // Re-check: another holder may have populated it while we
            // waited for the load mutex.
            if !slot.meta.lock().has_data {
                // SAFETY: `_serialize` ensures only one thread reaches the
                // device read for this slot at a time; a concurrent
                // `data_mut` call cannot observe this slot mid-read, since
                // that requires an Exclusive hold and we hold at least
                // Shared ourselves.
                let buf = unsafe { &mut *slot.data.get() };
                self.device.read(handle.sector, buf)?;
                let mut g = slot.meta.lock();
                g.has_data = true;
                g.dirty = false;
            }
        }
        slot.meta.lock().accessed = true;
        // SAFETY: no `&mut` to this page can coexist with this `&` — the
        // only source of one is `data_mut`, which requires an Exclusive
        // hold, incompatible with this call's Shared-or-Exclusive hold.
        Ok(unsafe { &*slot.data.get() })
    }

    /// Returns the slot's page for mutation. The caller must hold the
    /// handle `Exclusive`.
    ///
    /// If `zero_fill` is set the page is zeroed and marked dirty (used when
    /// a freshly allocated block is being initialized). Otherwise, if the
    /// slot has no data yet, it is read from the device first.
    pub fn data_mut(
        &self,
        handle: &mut SlotHandle,
        zero_fill: bool,
    ) -> crate::error::Result<&mut [u8; SECTOR_SIZE]> {
        debug_assert_eq!(
            handle.mode,
            AccessMode::Exclusive,
            "data_mut requires an Exclusive hold"
        );
        let slot = &self.slots[handle.index];
        if zero_fill {
            // SAFETY: held Exclusive, so no concurrent `data`/`data_mut`
            // call on this slot can be in flight.
            let buf = unsafe { &mut *slot.data.get() };
            buf.fill(0);
            let mut g = slot.meta.lock();
            g.dirty = true;
            g.has_data = true;
            g.accessed = true;
        } else {
            let has_data = slot.meta.lock().has_data;
            if !has_data {
                // SAFETY: see above.
                let buf = unsafe { &mut *slot.data.get() };
                self.device.read(handle.sector, buf)?;
                let mut g = slot.meta.lock();
                g.has_data = true;
                g.dirty = false;
            }
            slot.meta.lock().accessed = true;
        }
        // SAFETY: held Exclusive, so this is the only live reference.
        Ok(unsafe { &mut *slot.data.get() })
    }

    /// Marks the slot dirty. The caller must hold it `Exclusive`.
    pub fn mark_dirty(&self, handle: &mut SlotHandle) {
        debug_assert_eq!(handle.mode, AccessMode::Exclusive);
        let mut g = self.slots[handle.index].meta.lock();
        debug_assert!(g.has_data, "mark_dirty on a slot with no data");
        g.dirty = true;
    }

    /// Opportunistically frees the slot backing `sector`, if any, without
    /// writing it back — the caller has already released the sector
    /// through the free map.
    pub fn dealloc(&self, sector: SectorId) {
        for slot in &self.slots {
            let mut g = match slot.meta.try_lock() {
                Some(g) => g,
                None => continue,
            };
            if g.sector != sector {
                continue;
            }
            if g.waiters != 0 {
                return;
            }
            if !g.lock.try_acquire(AccessMode::Exclusive) {
                return;
            }
            g.sector = EMPTY_SLOT;
            g.has_data = false;
            g.dirty = false;
            g.accessed = false;
            g.lock.release(AccessMode::Exclusive);
            drop(g);
            slot.cond.wake_all();
            return;
        }
    }

    /// Writes back every dirty, populated slot.
    ///
    /// Each slot's `sector` is snapshotted, then re-acquired through the
    /// normal `acquire` path to respect the lock protocol. Between the two
    /// steps a slot may be evicted and re-used for a different sector, in
    /// which case this flushes that new sector's (clean, freshly loaded)
    /// state instead and moves on — `flush`'s contract is "no dirty slot is
    /// left behind", not "every snapshot is flushed verbatim".
    pub fn flush(self: &Arc<Self>) -> crate::error::Result<()> {
        for index in 0..self.slots.len() {
            let sector = self.slots[index].meta.lock().sector;
            if sector == EMPTY_SLOT {
                continue;
            }
            let mut handle = self.acquire(sector, AccessMode::Exclusive);
            let slot = &self.slots[handle.index];
            let (dirty, has_data) = {
                let g = slot.meta.lock();
                (g.dirty, g.has_data)
            };
            if dirty && has_data {
                // SAFETY: held exclusively via `handle`.
                let buf = unsafe { &*slot.data.get() };
                self.device.write(handle.sector, buf)?;
                slot.meta.lock().dirty = false;
            }
            self.release(handle);
        }
        Ok(())
    }

    /// Queues `sector` for the read-ahead daemon and wakes it.
    pub fn readahead_enqueue(&self, sector: SectorId) {
        self.readahead.lock().push_back(sector);
        self.readahead_cond.wake_next();
    }

    /// Spawns a daemon that periodically calls [`Self::flush`].
    pub fn spawn_flush_daemon(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        let interval = self.params.flush_interval;
        thread::spawn(move || loop {
            thread::sleep(interval);
            if let Err(err) = cache.flush() {
                log::error!("flush daemon: {err}");
            }
        })
    }

    /// Spawns the read-ahead daemon: pops a sector, pins it `Shared`,
    /// populates its data, and releases it. A single daemon is sufficient.
    pub fn spawn_readahead_daemon(self: &Arc<Self>) -> JoinHandle<()> {
        let cache = Arc::clone(self);
        thread::spawn(move || loop {
            let sector = {
                let guard = cache.readahead.lock();
                let sector = cache
                    .readahead_cond
                    .wait_until(guard, |q| !q.is_empty())
                    .pop_front();
                sector.expect("wait_until guarantees a non-empty queue")
            };
            let mut handle = cache.acquire(sector, AccessMode::Shared);
            if let Err(err) = cache.data(&mut handle) {
                log::warn!("read-ahead of sector {sector}: {err}");
            }
            cache.release(handle);
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::error::Error;
    use std::sync::Mutex as StdMutex;

    struct MemDevice {
        sectors: StdMutex<Vec<[u8; SECTOR_SIZE]>>,
        fail_next_write: std::sync::atomic::AtomicBool,
    }

    impl MemDevice {
        fn new(count: usize) -> Self {
            Self {
                sectors: StdMutex::new(vec![[0u8; SECTOR_SIZE]; count]),
                fail_next_write: std::sync::atomic::AtomicBool::new(false),
            }
        }
    }

    impl BlockDevice for MemDevice {
        fn sector_count(&self) -> u64 {
            self.sectors.lock().unwrap().len() as u64
        }

        fn read(&self, sector: SectorId, buf: &mut [u8; SECTOR_SIZE]) -> crate::error::Result<()> {
            *buf = self.sectors.lock().unwrap()[sector as usize];
            Ok(())
        }

        fn write(&self, sector: SectorId, buf: &[u8; SECTOR_SIZE]) -> crate::error::Result<()> {
            if self
                .fail_next_write
                .swap(false, std::sync::atomic::Ordering::SeqCst)
            {
                return Err(Error::DeviceError);
            }
            self.sectors.lock().unwrap()[sector as usize] = *buf;
            Ok(())
        }
    }

    fn cache(slots: usize, sectors: usize) -> Arc<BufferCache> {
        BufferCache::new(Arc::new(MemDevice::new(sectors)), Params::small(slots))
    }

    #[test]
    fn write_then_read_round_trips() {
        let cache = cache(4, 16);
        let mut h = cache.acquire(3, AccessMode::Exclusive);
        let page = cache.data_mut(&mut h, true).unwrap();
        page[0..3].copy_from_slice(b"hey");
        cache.mark_dirty(&mut h);
        cache.release(h);

        let mut h = cache.acquire(3, AccessMode::Shared);
        let page = cache.data(&mut h).unwrap();
        assert_eq!(&page[0..3], b"hey");
        cache.release(h);
    }

    #[test]
    fn two_shared_holders_proceed_concurrently() {
        let cache = cache(4, 16);
        let h1 = cache.acquire(1, AccessMode::Shared);
        let h2 = cache.acquire(1, AccessMode::Shared);
        cache.release(h1);
        cache.release(h2);
    }

    #[test]
    fn eviction_writes_back_dirty_slots() {
        let cache = cache(2, 16);
        for sector in 0..3 {
            let mut h = cache.acquire(sector, AccessMode::Exclusive);
            let page = cache.data_mut(&mut h, true).unwrap();
            page[0] = sector as u8 + 1;
            cache.mark_dirty(&mut h);
            cache.release(h);
        }
        // With only 2 slots and 3 distinct sectors touched, one of the
        // earlier sectors must have been evicted and written back; reading
        // it again must reflect its last write.
        let mut h = cache.acquire(0, AccessMode::Shared);
        let page = cache.data(&mut h).unwrap();
        assert_eq!(page[0], 1);
        cache.release(h);
    }

    #[test]
    fn dealloc_frees_a_resident_slot_without_writeback() {
        let cache = cache(4, 16);
        let mut h = cache.acquire(5, AccessMode::Exclusive);
        cache.data_mut(&mut h, true).unwrap();
        cache.mark_dirty(&mut h);
        cache.release(h);
        cache.dealloc(5);
        // Slot is free again; re-acquiring sector 5 must not see the old
        // (never written back) contents, since the device's copy is the
        // all-zero sector it always was.
        let mut h = cache.acquire(5, AccessMode::Shared);
        let page = cache.data(&mut h).unwrap();
        assert_eq!(page[0], 0);
        cache.release(h);
    }

    #[test]
    fn flush_clears_dirty_bits() {
        let cache = cache(4, 16);
        let mut h = cache.acquire(2, AccessMode::Exclusive);
        cache.data_mut(&mut h, true).unwrap();
        cache.mark_dirty(&mut h);
        cache.release(h);
        cache.flush().unwrap();
        // A device-level read must now see the flushed content even
        // through a brand new cache over the same device is unreachable in
        // this test, so instead verify the slot no longer reports dirty by
        // forcing eviction without triggering a second write: deallocating
        // after flush must be a no-data-loss no-op.
        cache.dealloc(2);
    }
}
