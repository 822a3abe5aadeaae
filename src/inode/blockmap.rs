//! Byte-offset → sector mapping, and the growth/free algorithms that walk
//! the direct / single-indirect / double-indirect block tree (spec.md
//! §4.2 "Byte → sector mapping", "Growth algorithm", "Free algorithm").
//!
//! Grounded the same way the reference kernel's `itrunc`/block-mapping
//! code is: manual index arithmetic over fixed-size pointer arrays, with
//! indirect blocks read and written as whole sectors through the cache.
//! The double-indirect phase additionally re-derives the counter-update
//! rule spec.md §9 flags as unclear in the source: entering a *freshly
//! allocated* level-2 block always resets `double_l2_count` to zero before
//! filling it, regardless of what the counter held for the previous
//! level-2 block.

use scopeguard::ScopeGuard;

use crate::block::BlockDevice;
use crate::cache::SectorCache;
use crate::config::SECTOR_SIZE;
use crate::error::{FsError, Result};
use crate::freemap::FreeMap;

use super::disk::{DiskInode, IndirectBlock, DOUBLE_IDX, INDIRECT_IDX, NDIRECT, NINDIRECT};

fn ceil_div(a: u32, b: u32) -> u32 {
    (a + b - 1) / b
}

/// Maps a byte offset within a file's *current* extent to the sector that
/// holds it. Returns `FsError::NotFound` if the offset is past everything
/// the inode has allocated so far — callers must grow before writing past
/// the current extent.
pub fn offset_to_sector<B: BlockDevice + 'static>(
    inode: &DiskInode,
    cache: &SectorCache<B>,
    offset: u32,
) -> Result<u32> {
    let s = SECTOR_SIZE as u32;
    let direct_bytes = NDIRECT as u32 * s;
    let indirect_bytes = NINDIRECT as u32 * s;

    if offset < direct_bytes {
        let idx = (offset / s) as usize;
        if idx as u32 >= inode.direct_used {
            return Err(FsError::NotFound);
        }
        return Ok(inode.blocks[idx]);
    }

    let offset = offset - direct_bytes;
    if offset < indirect_bytes {
        let idx = (offset / s) as usize;
        if idx as u32 >= inode.indirect_block_count {
            return Err(FsError::NotFound);
        }
        let mut buf = [0u8; SECTOR_SIZE];
        cache.read(inode.blocks[INDIRECT_IDX], &mut buf)?;
        let block = IndirectBlock::from_sector(&buf);
        return Ok(block.entries[idx]);
    }

    let offset = offset - indirect_bytes;
    let l1_idx = (offset / (NINDIRECT as u32 * s)) as usize;
    let l2_idx = ((offset % (NINDIRECT as u32 * s)) / s) as usize;
    if (l1_idx as u32) > inode.double_l1_count
        || (l1_idx as u32 == inode.double_l1_count && l2_idx as u32 >= inode.double_l2_count)
    {
        return Err(FsError::NotFound);
    }
    let mut buf = [0u8; SECTOR_SIZE];
    cache.read(inode.blocks[DOUBLE_IDX], &mut buf)?;
    let l1 = IndirectBlock::from_sector(&buf);
    cache.read(l1.entries[l1_idx], &mut buf)?;
    let l2 = IndirectBlock::from_sector(&buf);
    Ok(l2.entries[l2_idx])
}

/// Grows `inode` so that it can hold `length` bytes, allocating and
/// zeroing sectors as needed. On success, `inode.length` is updated to
/// `length` and every new sector is zeroed and linked in. On failure, no
/// field of `inode` is mutated and every sector allocated during this
/// call has been released back to `freemap` (spec.md §9: growth rollback,
/// implemented).
pub fn grow<B: BlockDevice + 'static>(
    inode: &mut DiskInode,
    cache: &SectorCache<B>,
    freemap: &FreeMap,
    length: u32,
) -> Result<()> {
    let mut work = *inode;
    let target_sectors = ceil_div(length, SECTOR_SIZE as u32);
    let mut need = target_sectors.saturating_sub(work.total_sectors_used);

    if need == 0 {
        work.length = length;
        *inode = work;
        return Ok(());
    }

    let mut allocated = scopeguard::guard(Vec::<u32>::new(), |list| {
        for sector in list {
            freemap.release(sector);
        }
    });

    while work.direct_used < NDIRECT as u32 && need > 0 {
        let sector = freemap.allocate()?;
        allocated.push(sector);
        cache.write(sector, &[0u8; SECTOR_SIZE])?;
        work.blocks[work.direct_used as usize] = sector;
        work.direct_used += 1;
        work.total_sectors_used += 1;
        need -= 1;
    }

    if need > 0 && (work.indirect_block_count as usize) < NINDIRECT {
        let mut indirect = if work.indirect_used == 0 {
            let sector = freemap.allocate()?;
            allocated.push(sector);
            work.blocks[INDIRECT_IDX] = sector;
            work.indirect_used = 1;
            IndirectBlock::zeroed()
        } else {
            let mut buf = [0u8; SECTOR_SIZE];
            cache.read(work.blocks[INDIRECT_IDX], &mut buf)?;
            IndirectBlock::from_sector(&buf)
        };

        while (work.indirect_block_count as usize) < NINDIRECT && need > 0 {
            let sector = freemap.allocate()?;
            allocated.push(sector);
            cache.write(sector, &[0u8; SECTOR_SIZE])?;
            indirect.entries[work.indirect_block_count as usize] = sector;
            work.indirect_block_count += 1;
            work.total_sectors_used += 1;
            need -= 1;
        }
        cache.write(work.blocks[INDIRECT_IDX], &indirect.to_sector())?;
    }

    if need > 0 {
        let mut l1 = if work.double_used == 0 {
            let sector = freemap.allocate()?;
            allocated.push(sector);
            work.blocks[DOUBLE_IDX] = sector;
            work.double_used = 1;
            IndirectBlock::zeroed()
        } else {
            let mut buf = [0u8; SECTOR_SIZE];
            cache.read(work.blocks[DOUBLE_IDX], &mut buf)?;
            IndirectBlock::from_sector(&buf)
        };

        while need > 0 {
            let l1_idx = work.double_l1_count as usize;
            if l1_idx >= NINDIRECT {
                return Err(FsError::NoSpace);
            }

            let is_fresh_l2 = l1.entries[l1_idx] == 0;
            let mut l2 = if is_fresh_l2 {
                let sector = freemap.allocate()?;
                allocated.push(sector);
                l1.entries[l1_idx] = sector;
                // Re-derived rule (spec.md §9): a freshly allocated
                // level-2 block always starts empty, regardless of what
                // double_l2_count held for the previous level-2 block.
                work.double_l2_count = 0;
                IndirectBlock::zeroed()
            } else {
                let mut buf = [0u8; SECTOR_SIZE];
                cache.read(l1.entries[l1_idx], &mut buf)?;
                IndirectBlock::from_sector(&buf)
            };

            while (work.double_l2_count as usize) < NINDIRECT && need > 0 {
                let sector = freemap.allocate()?;
                allocated.push(sector);
                cache.write(sector, &[0u8; SECTOR_SIZE])?;
                l2.entries[work.double_l2_count as usize] = sector;
                work.double_l2_count += 1;
                work.total_sectors_used += 1;
                need -= 1;
            }
            cache.write(l1.entries[l1_idx], &l2.to_sector())?;

            if (work.double_l2_count as usize) == NINDIRECT {
                work.double_l2_count = 0;
                work.double_l1_count += 1;
            }
        }
        cache.write(work.blocks[DOUBLE_IDX], &l1.to_sector())?;
    }

    work.length = length;
    *inode = work;
    ScopeGuard::into_inner(allocated);
    Ok(())
}

/// Releases every data sector, indirect block, and double-indirect
/// structure an inode owns, mirroring `grow` in reverse. Called once, as
/// part of destroying an inode that was marked removed (spec.md §4.2
/// "Free algorithm"). Best-effort: a read failure midway through frees
/// whatever has already been identified and logs the rest as leaked
/// rather than aborting, since this runs during teardown with nothing
/// left to roll back to.
pub fn free_all<B: BlockDevice + 'static>(
    inode: &DiskInode,
    cache: &SectorCache<B>,
    freemap: &FreeMap,
) {
    for i in 0..inode.direct_used as usize {
        freemap.release(inode.blocks[i]);
    }

    if inode.indirect_used != 0 {
        let mut buf = [0u8; SECTOR_SIZE];
        if cache.read(inode.blocks[INDIRECT_IDX], &mut buf).is_ok() {
            let block = IndirectBlock::from_sector(&buf);
            for i in 0..inode.indirect_block_count as usize {
                freemap.release(block.entries[i]);
            }
        } else {
            log::error!(
                "free_all: could not read indirect block at sector {}, its data sectors leaked",
                inode.blocks[INDIRECT_IDX]
            );
        }
        freemap.release(inode.blocks[INDIRECT_IDX]);
    }

    if inode.double_used != 0 {
        let mut buf = [0u8; SECTOR_SIZE];
        if cache.read(inode.blocks[DOUBLE_IDX], &mut buf).is_ok() {
            let l1 = IndirectBlock::from_sector(&buf);
            let full_l1_blocks = inode.double_l1_count as usize;
            let trailing_entries = if inode.double_l2_count > 0 { 1 } else { 0 };
            for l1_idx in 0..full_l1_blocks + trailing_entries {
                let l2_sector = l1.entries[l1_idx];
                if l2_sector == 0 {
                    continue;
                }
                let mut l2buf = [0u8; SECTOR_SIZE];
                if cache.read(l2_sector, &mut l2buf).is_ok() {
                    let l2 = IndirectBlock::from_sector(&l2buf);
                    let used = if l1_idx == full_l1_blocks {
                        inode.double_l2_count as usize
                    } else {
                        NINDIRECT
                    };
                    for i in 0..used {
                        freemap.release(l2.entries[i]);
                    }
                } else {
                    log::error!(
                        "free_all: could not read level-2 block at sector {l2_sector}, its data sectors leaked"
                    );
                }
                freemap.release(l2_sector);
            }
        } else {
            log::error!(
                "free_all: could not read level-1 block at sector {}, the whole double-indirect tree leaked",
                inode.blocks[DOUBLE_IDX]
            );
        }
        freemap.release(inode.blocks[DOUBLE_IDX]);
    }
}
