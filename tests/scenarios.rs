//! End-to-end scenarios exercising the filesystem through its syscall
//! surface rather than any single layer in isolation.

use std::sync::Arc;

use tinyfs::block::{BlockDevice, MemBlockDevice};
use tinyfs::config::{Config, SECTOR_SIZE};
use tinyfs::filesystem::FileSystem;

fn new_fs(sectors: u32) -> FileSystem<MemBlockDevice> {
    let dev = Arc::new(MemBlockDevice::new(sectors));
    FileSystem::mkfs(dev, &Config::default())
}

#[test]
fn direct_indirect_double_indirect_boundary() {
    const NDIRECT: u64 = 10;
    const NINDIRECT: u64 = 128;
    let fs = new_fs(40_000);
    let mut p = fs.new_process().unwrap();

    assert!(fs.create(&p, "/big", 0));
    let fd = fs.open(&mut p, "/big").unwrap();

    let positions = [
        0u64,
        NDIRECT * SECTOR_SIZE as u64 - 1,
        NDIRECT * SECTOR_SIZE as u64,
        (NDIRECT + NINDIRECT) * SECTOR_SIZE as u64 - 1,
        (NDIRECT + NINDIRECT) * SECTOR_SIZE as u64,
        (NDIRECT + NINDIRECT + NINDIRECT) * SECTOR_SIZE as u64,
    ];
    for &pos in &positions {
        assert!(fs.seek(&mut p, fd, pos as u32));
        assert_eq!(fs.write(&mut p, fd, &[0xAAu8]), 1);
    }
    assert!(fs.close(&mut p, fd));

    let fd = fs.open(&mut p, "/big").unwrap();
    for &pos in &positions {
        assert!(fs.seek(&mut p, fd, pos as u32));
        let mut buf = [0u8; 1];
        assert_eq!(fs.read(&mut p, fd, &mut buf), 1);
        assert_eq!(buf[0], 0xAA, "position {pos} should read back 0xAA");
    }

    // A handful of untouched positions in between must still read as zero.
    for &pos in &[1u64, SECTOR_SIZE as u64, NDIRECT * SECTOR_SIZE as u64 + 1] {
        assert!(fs.seek(&mut p, fd, pos as u32));
        let mut buf = [0xFFu8; 1];
        assert_eq!(fs.read(&mut p, fd, &mut buf), 1);
        assert_eq!(buf[0], 0x00, "position {pos} should still be zero");
    }

    assert!(fs.close(&mut p, fd));
    fs.end_process(p).unwrap();
}

#[test]
fn sparse_growth_via_seek() {
    const ONE_MIB: u32 = 1 << 20;
    let fs = new_fs(6000);
    let mut p = fs.new_process().unwrap();

    assert!(fs.create(&p, "/s", 0));
    let fd = fs.open(&mut p, "/s").unwrap();
    assert!(fs.seek(&mut p, fd, ONE_MIB));
    assert_eq!(fs.write(&mut p, fd, b"X"), 1);
    assert!(fs.close(&mut p, fd));

    let fd = fs.open(&mut p, "/s").unwrap();
    assert_eq!(fs.filesize(&p, fd), (ONE_MIB + 1) as i32);

    assert!(fs.seek(&mut p, fd, 0));
    let mut buf = vec![0xFFu8; ONE_MIB as usize];
    assert_eq!(fs.read(&mut p, fd, &mut buf), ONE_MIB as i32);
    assert!(buf.iter().all(|&b| b == 0));

    assert!(fs.close(&mut p, fd));
    fs.end_process(p).unwrap();
}

#[test]
fn deferred_deletion_across_two_processes() {
    let fs = new_fs(2000);
    let mut a = fs.new_process().unwrap();
    let mut b = fs.new_process().unwrap();

    assert!(fs.create(&a, "/f", 0));
    let fd_a = fs.open(&mut a, "/f").unwrap();
    assert_eq!(fs.write(&mut a, fd_a, b"data"), 4);
    assert!(fs.seek(&mut a, fd_a, 0));

    assert!(fs.remove(&b, "/f"));

    let mut buf = [0u8; 4];
    assert_eq!(fs.read(&mut a, fd_a, &mut buf), 4);
    assert_eq!(&buf, b"data");

    assert!(fs.close(&mut a, fd_a));
    fs.end_process(a).unwrap();
    fs.end_process(b).unwrap();
}

#[test]
fn non_empty_directory_removal_is_rejected_until_emptied() {
    let fs = new_fs(2000);
    let p = fs.new_process().unwrap();

    assert!(fs.mkdir(&p, "/d"));
    assert!(fs.create(&p, "/d/x", 0));
    assert!(!fs.remove(&p, "/d"));
    assert!(fs.remove(&p, "/d/x"));
    assert!(fs.remove(&p, "/d"));

    fs.end_process(p).unwrap();
}

#[test]
fn redundant_separators_and_trailing_slash_resolve_chdir() {
    let fs = new_fs(2000);
    let mut p = fs.new_process().unwrap();

    assert!(fs.mkdir(&p, "/a"));
    assert!(fs.mkdir(&p, "/a//b/"));
    assert!(fs.chdir(&mut p, "//a///b/."));

    let fd = fs.open(&mut p, "/a/b").unwrap();
    assert_eq!(fs.inumber(&p, fd), p.cwd_sector() as i32);
    assert!(fs.close(&mut p, fd));

    fs.end_process(p).unwrap();
}

#[test]
fn cache_write_back_is_visible_to_device_only_after_flush() {
    let dev = Arc::new(MemBlockDevice::new(64));
    let fs = FileSystem::mkfs(dev.clone(), &Config::default());

    let p = fs.new_process().unwrap();
    assert!(fs.create(&p, "/x", 0));

    let mut before = [0u8; SECTOR_SIZE];
    dev.read_sector(1, &mut before).unwrap();

    fs.shutdown().unwrap();

    let mut after = [0u8; SECTOR_SIZE];
    dev.read_sector(1, &mut after).unwrap();
    assert_ne!(before, after, "root directory sector should differ once the new entry is flushed");

    fs.end_process(p).unwrap();
}
