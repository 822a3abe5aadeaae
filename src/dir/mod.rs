//! The directory layer (spec.md §4.3 "Directory layer").
//!
//! A directory is just a regular inode (`is_dir() == true`) whose bytes
//! are an array of fixed-size directory entries, exactly like the
//! reference kernel's `Dirent`/`dirlookup`/`dirlink`. Entries are found by
//! linear scan; a removed entry is marked unused in place rather than
//! compacting the array, and a fresh entry reuses the first unused slot
//! before the directory is grown.

use std::sync::Arc;

use zerocopy::{AsBytes, FromBytes};

use crate::block::BlockDevice;
use crate::config::NAME_MAX;
use crate::error::{FsError, Result};
use crate::inode::{Inode, InodeTable};

/// One directory entry: 4 + 15 + 1 = 20 bytes, already a multiple of 4 so
/// no explicit padding is needed to keep entries sector-aligned.
#[repr(C)]
#[derive(Clone, Copy, AsBytes, FromBytes)]
struct DirEntry {
    inode_sector: u32,
    name: [u8; NAME_MAX + 1],
    in_use: u8,
}

pub(crate) const ENTRY_SIZE: usize = std::mem::size_of::<DirEntry>();

impl DirEntry {
    fn empty() -> Self {
        Self {
            inode_sector: 0,
            name: [0; NAME_MAX + 1],
            in_use: 0,
        }
    }

    fn named(inode_sector: u32, name: &str) -> Self {
        let mut buf = [0u8; NAME_MAX + 1];
        buf[..name.len()].copy_from_slice(name.as_bytes());
        Self {
            inode_sector,
            name: buf,
            in_use: 1,
        }
    }

    fn name_str(&self) -> &str {
        let len = self.name.iter().position(|&b| b == 0).unwrap_or(self.name.len());
        std::str::from_utf8(&self.name[..len]).unwrap_or("")
    }
}

fn validate_name(name: &str) -> Result<()> {
    if name.is_empty() {
        return Err(FsError::EmptyPath);
    }
    if name.len() > NAME_MAX {
        return Err(FsError::NameTooLong);
    }
    Ok(())
}

/// A handle to a directory: an owned open inode plus a readdir cursor.
pub struct Directory<B: BlockDevice + 'static> {
    inode: Arc<Inode<B>>,
    pos: u32,
}

impl<B: BlockDevice + 'static> Directory<B> {
    /// Wraps an already-open directory inode. `pos` starts past the
    /// conventional `.`/`..` entries that occupy slots 0 and 1.
    pub fn new(inode: Arc<Inode<B>>) -> Result<Self> {
        if !inode.is_dir() {
            return Err(FsError::NotADirectory);
        }
        Ok(Self { inode, pos: 2 * ENTRY_SIZE as u32 })
    }

    pub fn inode(&self) -> &Arc<Inode<B>> {
        &self.inode
    }

    /// Creates a fresh directory inode under `parent` and seeds it with
    /// `.` and `..` entries.
    pub fn create(table: &InodeTable<B>, parent_sector: u32) -> Result<Arc<Inode<B>>> {
        let inode = table.create(parent_sector, true)?;
        let dot = DirEntry::named(inode.inumber(), ".");
        let dotdot = DirEntry::named(parent_sector, "..");
        inode.write_at(dot.as_bytes(), 0)?;
        inode.write_at(dotdot.as_bytes(), ENTRY_SIZE as u32)?;
        Ok(inode)
    }

    fn entry_count(&self) -> u32 {
        self.inode.length() / ENTRY_SIZE as u32
    }

    fn read_entry(&self, index: u32) -> Result<DirEntry> {
        let mut buf = [0u8; ENTRY_SIZE];
        self.inode.read_at(&mut buf, index * ENTRY_SIZE as u32)?;
        Ok(DirEntry::read_from(&buf[..]).expect("entry-sized buffer always parses"))
    }

    fn write_entry(&self, index: u32, entry: &DirEntry) -> Result<()> {
        self.inode.write_at(entry.as_bytes(), index * ENTRY_SIZE as u32)?;
        Ok(())
    }

    /// Looks up `name`, returning the sector of the inode it names.
    pub fn lookup(&self, name: &str) -> Result<u32> {
        validate_name(name)?;
        for i in 0..self.entry_count() {
            let entry = self.read_entry(i)?;
            if entry.in_use != 0 && entry.name_str() == name {
                return Ok(entry.inode_sector);
            }
        }
        Err(FsError::NotFound)
    }

    /// Adds `name -> inode_sector`, reusing the first unused slot if one
    /// exists, otherwise appending a new entry.
    pub fn add(&self, name: &str, inode_sector: u32) -> Result<()> {
        validate_name(name)?;
        if self.lookup(name).is_ok() {
            return Err(FsError::NameCollision);
        }

        let entry = DirEntry::named(inode_sector, name);
        for i in 0..self.entry_count() {
            let existing = self.read_entry(i)?;
            if existing.in_use == 0 {
                return self.write_entry(i, &entry);
            }
        }
        self.write_entry(self.entry_count(), &entry)
    }

    /// Marks the entry for `name` unused. Does not shrink the directory.
    pub fn remove(&self, name: &str) -> Result<u32> {
        validate_name(name)?;
        for i in 0..self.entry_count() {
            let mut entry = self.read_entry(i)?;
            if entry.in_use != 0 && entry.name_str() == name {
                let sector = entry.inode_sector;
                entry = DirEntry::empty();
                self.write_entry(i, &entry)?;
                return Ok(sector);
            }
        }
        Err(FsError::NotFound)
    }

    /// True if the directory holds nothing but `.` and `..`.
    pub fn is_empty(&self) -> Result<bool> {
        for i in 2..self.entry_count() {
            if self.read_entry(i)?.in_use != 0 {
                return Ok(false);
            }
        }
        Ok(true)
    }

    /// Returns the next in-use entry's name and inode sector, advancing
    /// the cursor. `.` and `..` are skipped: they are implementation
    /// bookkeeping, not user-visible directory content.
    pub fn readdir(&mut self) -> Result<Option<(String, u32)>> {
        next_entry(&self.inode, &mut self.pos)
    }
}

/// Scans forward from `*pos` for the next in-use entry, advancing `*pos`
/// past it. Factored out of [`Directory::readdir`] so a file descriptor's
/// own cursor (spec.md §9's `Dir(Inode, cursor)` variant) can drive the
/// same scan without owning a whole `Directory`.
pub(crate) fn next_entry<B: BlockDevice + 'static>(
    inode: &Arc<Inode<B>>,
    pos: &mut u32,
) -> Result<Option<(String, u32)>> {
    loop {
        if *pos + ENTRY_SIZE as u32 > inode.length() {
            return Ok(None);
        }
        let mut buf = [0u8; ENTRY_SIZE];
        inode.read_at(&mut buf, *pos)?;
        *pos += ENTRY_SIZE as u32;
        let entry = DirEntry::read_from(&buf[..]).expect("entry-sized buffer always parses");
        if entry.in_use != 0 {
            return Ok(Some((entry.name_str().to_string(), entry.inode_sector)));
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use crate::cache::SectorCache;
    use crate::config::Config;
    use crate::freemap::FreeMap;

    fn setup() -> (InodeTable<MemBlockDevice>, u32) {
        let dev = Arc::new(MemBlockDevice::new(512));
        let cache = Arc::new(SectorCache::new(dev, &Config::default()));
        let freemap = Arc::new(FreeMap::create(16, 400));
        let table = InodeTable::new(cache, freemap);
        let root = Directory::create(&table, 0).unwrap();
        let root_sector = root.inumber();
        table.close(&root).unwrap();
        (table, root_sector)
    }

    #[test]
    fn add_then_lookup_finds_the_entry() {
        let (table, root_sector) = setup();
        let root_inode = table.open(root_sector).unwrap();
        let dir = Directory::new(root_inode.clone()).unwrap();
        let file = table.create(root_sector, false).unwrap();
        dir.add("hello.txt", file.inumber()).unwrap();
        assert_eq!(dir.lookup("hello.txt").unwrap(), file.inumber());
        table.close(&file).unwrap();
        table.close(&root_inode).unwrap();
    }

    #[test]
    fn duplicate_name_is_rejected() {
        let (table, root_sector) = setup();
        let root_inode = table.open(root_sector).unwrap();
        let dir = Directory::new(root_inode.clone()).unwrap();
        let a = table.create(root_sector, false).unwrap();
        let b = table.create(root_sector, false).unwrap();
        dir.add("x", a.inumber()).unwrap();
        assert!(matches!(dir.add("x", b.inumber()), Err(FsError::NameCollision)));
        table.close(&a).unwrap();
        table.close(&b).unwrap();
        table.close(&root_inode).unwrap();
    }

    #[test]
    fn remove_then_readdir_skips_it_and_slot_is_reused() {
        let (table, root_sector) = setup();
        let root_inode = table.open(root_sector).unwrap();
        let dir = Directory::new(root_inode.clone()).unwrap();
        let a = table.create(root_sector, false).unwrap();
        dir.add("a", a.inumber()).unwrap();
        dir.remove("a").unwrap();
        assert!(matches!(dir.lookup("a"), Err(FsError::NotFound)));

        let b = table.create(root_sector, false).unwrap();
        dir.add("b", b.inumber()).unwrap();
        // `b` reused the slot vacated by `a` rather than growing the file.
        assert_eq!(dir.inode().length(), 3 * ENTRY_SIZE as u32);

        table.close(&a).unwrap();
        table.close(&b).unwrap();
        table.close(&root_inode).unwrap();
    }

    #[test]
    fn empty_directory_reports_empty() {
        let (table, root_sector) = setup();
        let root_inode = table.open(root_sector).unwrap();
        let dir = Directory::new(root_inode.clone()).unwrap();
        assert!(dir.is_empty().unwrap());
        let a = table.create(root_sector, false).unwrap();
        dir.add("a", a.inumber()).unwrap();
        assert!(!dir.is_empty().unwrap());
        table.close(&a).unwrap();
        table.close(&root_inode).unwrap();
    }

    #[test]
    fn readdir_yields_user_entries_without_dot_entries() {
        let (table, root_sector) = setup();
        let root_inode = table.open(root_sector).unwrap();
        let mut dir = Directory::new(root_inode.clone()).unwrap();
        let a = table.create(root_sector, false).unwrap();
        dir.add("only", a.inumber()).unwrap();
        let (name, sector) = dir.readdir().unwrap().unwrap();
        assert_eq!(name, "only");
        assert_eq!(sector, a.inumber());
        assert!(dir.readdir().unwrap().is_none());
        table.close(&a).unwrap();
        table.close(&root_inode).unwrap();
    }

    #[test]
    fn name_too_long_is_rejected() {
        let (table, root_sector) = setup();
        let root_inode = table.open(root_sector).unwrap();
        let dir = Directory::new(root_inode.clone()).unwrap();
        assert!(matches!(dir.add("a_name_with_more_than_14_chars", 5), Err(FsError::NameTooLong)));
        table.close(&root_inode).unwrap();
    }
}
