//! On-disk inode layout (spec.md §3 "On-disk inode").
//!
//! One inode occupies exactly one sector. The reference kernel's own
//! `Dinode`/`Dirent` structs are read and written as raw sector bytes via
//! pointer casts (`&mut *(bp.data.as_mut_ptr() as *mut Dinode)`); this
//! crate does the equivalent conversion through `zerocopy`'s `AsBytes`/
//! `FromBytes`, which gets the same "this struct's bytes are a sector"
//! contract without the unsafe pointer cast.

use static_assertions::const_assert_eq;
use zerocopy::{AsBytes, FromBytes};

use crate::config::SECTOR_SIZE;

/// `b"INOD"` read as a little-endian u32.
pub const MAGIC: u32 = 0x494E_4F44;

/// Direct block pointers.
pub const NDIRECT: usize = 10;
/// Sector indices per indirect block (4-byte indices, 512-byte sectors).
pub const NINDIRECT: usize = SECTOR_SIZE / 4;
/// Maximum file size in sectors: direct + single-indirect + double-indirect.
pub const MAXFILE_SECTORS: usize = NDIRECT + NINDIRECT + NINDIRECT * NINDIRECT;

/// Index of the single-indirect block pointer within `blocks`.
pub const INDIRECT_IDX: usize = NDIRECT;
/// Index of the double-indirect block pointer within `blocks`.
pub const DOUBLE_IDX: usize = NDIRECT + 1;
/// Total block pointer slots in an inode.
pub const NBLOCKS: usize = NDIRECT + 2;

const HEADER_FIELDS: usize = 11;
const PADDING: usize =
    SECTOR_SIZE - HEADER_FIELDS * 4 - NBLOCKS * 4;

#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct DiskInode {
    pub magic: u32,
    pub is_dir: u32,
    pub parent: u32,
    pub length: u32,
    pub direct_used: u32,
    pub indirect_used: u32,
    pub indirect_block_count: u32,
    pub double_used: u32,
    pub double_l1_count: u32,
    pub double_l2_count: u32,
    pub total_sectors_used: u32,
    pub blocks: [u32; NBLOCKS],
    _padding: [u8; PADDING],
}

const_assert_eq!(std::mem::size_of::<DiskInode>(), SECTOR_SIZE);

impl DiskInode {
    pub fn zeroed(is_dir: bool, parent: u32, length: u32) -> Self {
        Self {
            magic: MAGIC,
            is_dir: is_dir as u32,
            parent,
            length,
            direct_used: 0,
            indirect_used: 0,
            indirect_block_count: 0,
            double_used: 0,
            double_l1_count: 0,
            double_l2_count: 0,
            total_sectors_used: 0,
            blocks: [0; NBLOCKS],
            _padding: [0; PADDING],
        }
    }

    pub fn is_dir(&self) -> bool {
        self.is_dir != 0
    }

    pub fn from_sector(data: &[u8; SECTOR_SIZE]) -> Self {
        DiskInode::read_from(&data[..]).expect("sector-sized buffer always parses")
    }

    pub fn to_sector(&self) -> [u8; SECTOR_SIZE] {
        let mut out = [0u8; SECTOR_SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}

/// A single indirect block: an array of `NINDIRECT` sector pointers,
/// occupying exactly one sector (spec.md §3: "An indirect block is a
/// sector of 128 sector indices").
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
pub struct IndirectBlock {
    pub entries: [u32; NINDIRECT],
}

const_assert_eq!(std::mem::size_of::<IndirectBlock>(), SECTOR_SIZE);

impl IndirectBlock {
    pub fn zeroed() -> Self {
        Self {
            entries: [0; NINDIRECT],
        }
    }

    pub fn from_sector(data: &[u8; SECTOR_SIZE]) -> Self {
        IndirectBlock::read_from(&data[..]).expect("sector-sized buffer always parses")
    }

    pub fn to_sector(&self) -> [u8; SECTOR_SIZE] {
        let mut out = [0u8; SECTOR_SIZE];
        out.copy_from_slice(self.as_bytes());
        out
    }
}
