//! The block device collaborator (spec.md §6: "Block device (consumed)").
//!
//! The reference kernel talks to a virtio queue through `hal().disk()`.
//! This crate talks to whatever implements [`BlockDevice`]: a disk-image
//! file for the CLI, or an in-memory buffer for every test. Sector size is
//! fixed at [`crate::config::SECTOR_SIZE`] bytes, matching the on-disk
//! inode and directory-entry layouts.

use std::fs::File;
use std::io::{self, Read, Seek, SeekFrom, Write};
use std::sync::Mutex;

use crate::config::SECTOR_SIZE;

pub trait BlockDevice: Send + Sync {
    fn read_sector(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> io::Result<()>;
    fn write_sector(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> io::Result<()>;
    /// Total number of addressable sectors on this device.
    fn sector_count(&self) -> u32;
}

/// A RAM-backed block device. The cache and inode/directory layers are
/// tested exclusively against this, the way the reference kernel's own
/// test runs used a QEMU-emulated disk rather than real hardware.
pub struct MemBlockDevice {
    sectors: Mutex<Vec<[u8; SECTOR_SIZE]>>,
}

impl MemBlockDevice {
    pub fn new(sector_count: u32) -> Self {
        Self {
            sectors: Mutex::new(vec![[0u8; SECTOR_SIZE]; sector_count as usize]),
        }
    }
}

impl BlockDevice for MemBlockDevice {
    fn read_sector(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> io::Result<()> {
        let sectors = self.sectors.lock().unwrap();
        let src = sectors.get(sector as usize).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "sector out of range")
        })?;
        buf.copy_from_slice(src);
        Ok(())
    }

    fn write_sector(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> io::Result<()> {
        let mut sectors = self.sectors.lock().unwrap();
        let dst = sectors.get_mut(sector as usize).ok_or_else(|| {
            io::Error::new(io::ErrorKind::UnexpectedEof, "sector out of range")
        })?;
        dst.copy_from_slice(buf);
        Ok(())
    }

    fn sector_count(&self) -> u32 {
        self.sectors.lock().unwrap().len() as u32
    }
}

/// A disk-image-file-backed block device, used by the CLI binary.
pub struct FileBlockDevice {
    file: Mutex<File>,
    sector_count: u32,
}

impl FileBlockDevice {
    pub fn open(file: File, sector_count: u32) -> Self {
        Self {
            file: Mutex::new(file),
            sector_count,
        }
    }
}

impl BlockDevice for FileBlockDevice {
    fn read_sector(&self, sector: u32, buf: &mut [u8; SECTOR_SIZE]) -> io::Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))?;
        file.read_exact(buf)
    }

    fn write_sector(&self, sector: u32, buf: &[u8; SECTOR_SIZE]) -> io::Result<()> {
        let mut file = self.file.lock().unwrap();
        file.seek(SeekFrom::Start(sector as u64 * SECTOR_SIZE as u64))?;
        file.write_all(buf)
    }

    fn sector_count(&self) -> u32 {
        self.sector_count
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mem_device_round_trips() {
        let dev = MemBlockDevice::new(4);
        let mut buf = [0xAAu8; SECTOR_SIZE];
        dev.write_sector(2, &buf).unwrap();
        buf = [0u8; SECTOR_SIZE];
        dev.read_sector(2, &mut buf).unwrap();
        assert!(buf.iter().all(|&b| b == 0xAA));
    }

    #[test]
    fn mem_device_rejects_out_of_range() {
        let dev = MemBlockDevice::new(1);
        let buf = [0u8; SECTOR_SIZE];
        assert!(dev.write_sector(5, &buf).is_err());
    }
}
