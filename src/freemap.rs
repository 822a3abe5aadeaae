//! The free-sector bitmap allocator (spec.md §6: "Free-sector bitmap
//! (consumed)"). Out of scope as a *policy* question, but the inode layer
//! needs a concrete instance to grow and free files against, so this is
//! the minimal one: one bit per sector, manipulated with the same manual
//! bit-shifting the reference kernel's own `balloc`/`bfree` use on a
//! byte-array bitmap, just factored out behind a named type instead of
//! being inlined into the filesystem layer.
//!
//! `free_map_allocate` only hands out sectors one at a time here (the
//! reference free-map API promises a contiguous run, but every caller in
//! this crate's inode layer allocates sectors one at a time anyway, since
//! growth always zeroes and links each new sector individually).

use std::sync::Mutex;

use crate::block::BlockDevice;
use crate::error::{FsError, Result};

/// Bits per bitmap byte.
const BPB: u32 = 8;

pub struct FreeMap {
    /// `bits[i]` is set iff sector `data_start + i` is in use.
    bits: Mutex<Vec<bool>>,
    data_start: u32,
}

impl FreeMap {
    /// Builds a fresh, all-free bitmap covering sectors
    /// `[data_start, data_start + usable_sectors)`.
    pub fn create(data_start: u32, usable_sectors: u32) -> Self {
        Self {
            bits: Mutex::new(vec![false; usable_sectors as usize]),
            data_start,
        }
    }

    /// Rebuilds the bitmap by scanning which sectors are marked in use in
    /// a previously-persisted image. Here "persisted" means a plain
    /// serialized bit vector; full on-disk compatibility with the
    /// reference bitmap sector layout is not attempted since the bitmap's
    /// own layout is explicitly out of scope (spec.md §1).
    pub fn open(data_start: u32, usable_sectors: u32, used: &[u32]) -> Self {
        let map = Self::create(data_start, usable_sectors);
        {
            let mut bits = map.bits.lock().unwrap();
            for &sector in used {
                if let Some(idx) = sector.checked_sub(data_start) {
                    if (idx as usize) < bits.len() {
                        bits[idx as usize] = true;
                    }
                }
            }
        }
        map
    }

    /// Allocates a single free sector, marking it in use. Returns the
    /// absolute sector index.
    pub fn allocate(&self) -> Result<u32> {
        let mut bits = self.bits.lock().unwrap();
        for (idx, used) in bits.iter_mut().enumerate() {
            if !*used {
                *used = true;
                return Ok(self.data_start + idx as u32);
            }
        }
        Err(FsError::NoSpace)
    }

    /// Releases a previously allocated sector back to the pool.
    pub fn release(&self, sector: u32) {
        let mut bits = self.bits.lock().unwrap();
        let idx = (sector - self.data_start) as usize;
        assert!(bits[idx], "freemap: releasing a free sector");
        bits[idx] = false;
    }

    /// Rebuilds the bitmap by reading it back from the sectors `flush`
    /// writes it to, the mount-time counterpart to `flush`.
    pub fn load(device: &dyn BlockDevice, data_start: u32, usable_sectors: u32) -> Result<Self> {
        let map = Self::create(data_start, usable_sectors);
        let sector_size = crate::config::SECTOR_SIZE;
        let bits_per_sector = sector_size as u32 * BPB;
        let header_sectors = (usable_sectors).div_ceil(bits_per_sector).max(1);
        let mut bits = map.bits.lock().unwrap();
        for header_idx in 0..header_sectors {
            let mut buf = [0u8; 512];
            device.read_sector(header_idx, &mut buf)?;
            let base = header_idx * bits_per_sector;
            for bit in 0..bits_per_sector {
                let global = base + bit;
                if global >= usable_sectors {
                    break;
                }
                let byte = (bit / BPB) as usize;
                let shift = bit % BPB;
                bits[global as usize] = buf[byte] & (1 << shift) != 0;
            }
        }
        drop(bits);
        Ok(map)
    }

    pub fn used_count(&self) -> usize {
        self.bits.lock().unwrap().iter().filter(|&&b| b).count()
    }

    /// Persists the bitmap to a reserved run of sectors starting at sector
    /// 0, one bit per sector, `BPB` bits per device sector.
    pub fn flush(&self, device: &dyn BlockDevice) -> Result<()> {
        let bits = self.bits.lock().unwrap();
        let sector_size = crate::config::SECTOR_SIZE;
        let bits_per_sector = sector_size as u32 * BPB;
        let header_sectors = (bits.len() as u32).div_ceil(bits_per_sector).max(1);
        for header_idx in 0..header_sectors {
            let mut buf = [0u8; 512];
            let base = header_idx * bits_per_sector;
            for bit in 0..bits_per_sector {
                let global = base + bit;
                if global as usize >= bits.len() {
                    break;
                }
                if bits[global as usize] {
                    let byte = (bit / BPB) as usize;
                    let shift = bit % BPB;
                    buf[byte] |= 1 << shift;
                }
            }
            device.write_sector(header_idx, &buf)?;
        }
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;

    #[test]
    fn allocate_then_release_is_reusable() {
        let map = FreeMap::create(10, 4);
        let a = map.allocate().unwrap();
        let b = map.allocate().unwrap();
        assert_ne!(a, b);
        assert_eq!(map.used_count(), 2);
        map.release(a);
        assert_eq!(map.used_count(), 1);
        let c = map.allocate().unwrap();
        assert_eq!(c, a);
    }

    #[test]
    fn exhaustion_returns_no_space() {
        let map = FreeMap::create(0, 1);
        map.allocate().unwrap();
        assert!(matches!(map.allocate(), Err(FsError::NoSpace)));
    }

    #[test]
    fn flush_persists_bits() {
        let dev = MemBlockDevice::new(8);
        let map = FreeMap::create(1, 16);
        let s = map.allocate().unwrap();
        map.flush(&dev).unwrap();
        let mut buf = [0u8; 512];
        dev.read_sector(0, &mut buf).unwrap();
        let idx = s - 1;
        let byte = (idx / 8) as usize;
        let shift = idx % 8;
        assert_ne!(buf[byte] & (1 << shift), 0);
    }
}
