//! End-to-end tests over the cache, inode, and directory layers together,
//! backed by the in-memory fakes under `support/`.

mod support;

use fscore::{
    cache::BufferCache,
    dir::{Directory, ROOT_DIR_SECTOR},
    error::Error,
    inode::Table,
    params::Params,
    AccessMode, DATA_BLOCK_CNT, INDIRECT_PTRS_PER_SECTOR, SECTOR_SIZE,
};
use std::{sync::Arc, time::Duration};
use support::{bitmap_free_map::BitmapFreeMap, mem_device::MemDevice};

const SECTOR_COUNT: usize = 8192;

fn new_fs(cache_size: usize) -> (Arc<BufferCache>, Arc<Table>) {
    let device = Arc::new(MemDevice::new(SECTOR_COUNT));
    let cache = BufferCache::new(device, Params::small(cache_size));
    let free_map = Arc::new(BitmapFreeMap::new(SECTOR_COUNT, &[0, ROOT_DIR_SECTOR]));
    let table = Table::new(Arc::clone(&cache), free_map);
    (cache, table)
}

#[test]
fn write_200_bytes_then_reopen_and_read() {
    let (_cache, table) = new_fs(16);
    let inode = table.create(10, false).unwrap();

    let data: Vec<u8> = (0..200u16).map(|b| b as u8).collect();
    let written = inode.write_at(&data, 0).unwrap();
    assert_eq!(written, data.len());
    assert_eq!(inode.length().unwrap(), data.len() as u64);
    table.close(inode).unwrap();

    let inode = table.open(10);
    let mut buf = [0u8; 200];
    let read = inode.read_at(&mut buf, 0).unwrap();
    assert_eq!(read, data.len());
    assert_eq!(&buf[..], &data[..]);
    table.close(inode).unwrap();
}

#[test]
fn write_across_direct_to_single_indirect_boundary() {
    let (_cache, table) = new_fs(32);
    let inode = table.create(20, false).unwrap();

    let boundary = (DATA_BLOCK_CNT * SECTOR_SIZE) as u64;
    let data = b"direct-tail|indirect-head";
    let offset = boundary - 10;
    assert!(
        (offset..offset + data.len() as u64).contains(&boundary),
        "test write must actually straddle the boundary"
    );

    let written = inode.write_at(data, offset).unwrap();
    assert_eq!(written, data.len());
    table.close(inode).unwrap();

    let inode = table.open(20);
    let mut buf = vec![0u8; data.len()];
    let read = inode.read_at(&mut buf, offset).unwrap();
    assert_eq!(read, data.len());
    assert_eq!(&buf[..], &data[..]);
    table.close(inode).unwrap();
}

#[test]
fn write_across_single_to_double_indirect_boundary() {
    let (_cache, table) = new_fs(32);
    let inode = table.create(30, false).unwrap();

    let boundary = ((DATA_BLOCK_CNT + INDIRECT_PTRS_PER_SECTOR) * SECTOR_SIZE) as u64;
    let data = b"single-tail|double-head";
    let offset = boundary - 8;
    assert!(
        (offset..offset + data.len() as u64).contains(&boundary),
        "test write must actually straddle the boundary"
    );

    let written = inode.write_at(data, offset).unwrap();
    assert_eq!(written, data.len());
    table.close(inode).unwrap();

    let inode = table.open(30);
    let mut buf = vec![0u8; data.len()];
    let read = inode.read_at(&mut buf, offset).unwrap();
    assert_eq!(read, data.len());
    assert_eq!(&buf[..], &data[..]);
    table.close(inode).unwrap();
}

#[test]
fn sparse_read_between_writes_reads_as_zero() {
    let (_cache, table) = new_fs(16);
    let inode = table.create(11, false).unwrap();

    inode.write_at(b"head", 0).unwrap();
    inode.write_at(b"tail", 10_000).unwrap();

    let mut hole = [0xffu8; 16];
    let read = inode.read_at(&mut hole, 4096).unwrap();
    assert_eq!(read, 16);
    assert_eq!(hole, [0u8; 16]);

    table.close(inode).unwrap();
}

#[test]
fn mkdir_rmdir_fails_while_open_then_succeeds() {
    let (_cache, table) = new_fs(32);
    Directory::create(&table, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR).unwrap();
    let root = Directory::open_root(Arc::clone(&table)).unwrap();

    Directory::create(&table, 50, ROOT_DIR_SECTOR).unwrap();
    root.add("sub", 50).unwrap();

    let looked_up = root.lookup("sub").unwrap().unwrap();
    assert_eq!(looked_up.sector(), 50);
    table.close(looked_up).unwrap();

    let sub_inode = table.open(50);
    let sub = Directory::open(Arc::clone(&table), sub_inode).unwrap();

    // A second independent handle on the same directory keeps it open even
    // after the first is closed below.
    let sub_again = sub.reopen();

    match root.remove("sub").unwrap_err() {
        Error::Busy => {}
        other => panic!("expected Busy, got {other:?}"),
    }

    sub.close().unwrap();
    match root.remove("sub").unwrap_err() {
        Error::Busy => {}
        other => panic!("expected Busy (still open via sub_again), got {other:?}"),
    }

    sub_again.close().unwrap();
    root.remove("sub").unwrap();
    assert!(root.lookup("sub").unwrap().is_none());

    root.close().unwrap();
}

#[test]
fn rmdir_rejects_dot_and_dot_dot_and_nonempty() {
    let (_cache, table) = new_fs(32);
    Directory::create(&table, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR).unwrap();
    let root = Directory::open_root(Arc::clone(&table)).unwrap();

    assert_eq!(root.remove(".").unwrap_err(), Error::Busy);
    assert_eq!(root.remove("..").unwrap_err(), Error::Busy);

    Directory::create(&table, 60, ROOT_DIR_SECTOR).unwrap();
    root.add("child", 60).unwrap();

    Directory::create(&table, 61, 60).unwrap();
    let child_inode = table.open(60);
    let child = Directory::open(Arc::clone(&table), child_inode).unwrap();
    child.add("grandchild", 61).unwrap();
    assert_eq!(root.remove("child").unwrap_err(), Error::Busy);
    child.close().unwrap();

    root.close().unwrap();
}

#[test]
fn readdir_lists_names_skipping_dot_entries() {
    let (_cache, table) = new_fs(32);
    Directory::create(&table, ROOT_DIR_SECTOR, ROOT_DIR_SECTOR).unwrap();
    let root = Directory::open_root(Arc::clone(&table)).unwrap();

    Directory::create(&table, 70, ROOT_DIR_SECTOR).unwrap();
    Directory::create(&table, 71, ROOT_DIR_SECTOR).unwrap();
    root.add("alpha", 70).unwrap();
    root.add("beta", 71).unwrap();

    let mut names = Vec::new();
    while let Some(name) = root.readdir().unwrap() {
        names.push(name);
    }
    names.sort();
    assert_eq!(names, vec!["alpha".to_string(), "beta".to_string()]);
    assert!(root.readdir().unwrap().is_none());

    root.close().unwrap();
}

#[test]
fn two_shared_holders_run_concurrently() {
    let (cache, _table) = new_fs(4);
    let barrier = Arc::new(std::sync::Barrier::new(2));

    // Populate the sector up front so both threads only ever need shared,
    // read-only access to it.
    let mut setup = cache.acquire(5, AccessMode::Exclusive);
    cache.data_mut(&mut setup, true).unwrap();
    cache.release(setup);

    let spawn_holder = || {
        let cache = Arc::clone(&cache);
        let barrier = Arc::clone(&barrier);
        std::thread::spawn(move || {
            let mut h = cache.acquire(5, AccessMode::Shared);
            cache.data(&mut h).unwrap();
            // Both threads must reach this barrier while still holding
            // their shared lock — if acquires serialized, the second
            // thread could never arrive while the first still holds its
            // lock, and the test would hang.
            barrier.wait();
            cache.release(h);
        })
    };

    let h1 = spawn_holder();
    let h2 = spawn_holder();
    h1.join().unwrap();
    h2.join().unwrap();
}

#[test]
fn exclusive_acquire_waits_for_shared_holders_to_release() {
    let (cache, _table) = new_fs(4);
    let events = Arc::new(std::sync::Mutex::new(Vec::<&'static str>::new()));

    let mut setup = cache.acquire(7, AccessMode::Exclusive);
    cache.data_mut(&mut setup, true).unwrap();
    cache.release(setup);

    let c1 = Arc::clone(&cache);
    let e1 = Arc::clone(&events);
    let shared = std::thread::spawn(move || {
        let mut h = c1.acquire(7, AccessMode::Shared);
        c1.data(&mut h).unwrap();
        std::thread::sleep(Duration::from_millis(60));
        e1.lock().unwrap().push("shared_released");
        c1.release(h);
    });

    std::thread::sleep(Duration::from_millis(15));

    let c2 = Arc::clone(&cache);
    let e2 = Arc::clone(&events);
    let exclusive = std::thread::spawn(move || {
        let h = c2.acquire(7, AccessMode::Exclusive);
        e2.lock().unwrap().push("exclusive_acquired");
        c2.release(h);
    });

    shared.join().unwrap();
    exclusive.join().unwrap();

    assert_eq!(
        events.lock().unwrap().as_slice(),
        ["shared_released", "exclusive_acquired"]
    );
}

#[test]
fn filling_cache_past_capacity_evicts_and_writes_back() {
    let (cache, _table) = new_fs(64);

    for sector in 0..64u32 {
        let mut h = cache.acquire(sector, AccessMode::Exclusive);
        let page = cache.data_mut(&mut h, true).unwrap();
        page[0] = (sector % 251) as u8 + 1;
        cache.mark_dirty(&mut h);
        cache.release(h);
    }

    // A 65th distinct sector cannot fit without evicting one of the 64
    // already resident; the clock hand must pick a victim and write it
    // back before handing this slot over.
    let mut h = cache.acquire(64, AccessMode::Exclusive);
    cache.data_mut(&mut h, true).unwrap();
    cache.mark_dirty(&mut h);
    cache.release(h);

    for sector in 0..64u32 {
        let mut h = cache.acquire(sector, AccessMode::Shared);
        let page = cache.data(&mut h).unwrap();
        assert_eq!(page[0], (sector % 251) as u8 + 1, "sector {sector} lost its write");
        cache.release(h);
    }
}

