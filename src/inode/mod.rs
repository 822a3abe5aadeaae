//! The open-inode registry and in-memory inode handle (spec.md §4.2
//! "Inode layer").
//!
//! Grounded on the reference kernel's `Itable`/`InodeGuard` split in
//! `fs/ufs/mod.rs` and `fs/ufs/inode.rs`: a table keyed by sector number
//! enforces "at most one in-memory `Inode` per on-disk inode" so that two
//! callers editing the same file always see each other's writes, and an
//! open-count plus a removed flag implement deferred deletion — a removed
//! inode's sectors are only returned to the free map once its last open
//! handle closes.

mod blockmap;
mod disk;

pub use disk::{DiskInode, IndirectBlock, MAGIC, MAXFILE_SECTORS, NDIRECT, NINDIRECT};

use std::sync::{Arc, Mutex};

use crate::block::BlockDevice;
use crate::cache::SectorCache;
use crate::config::SECTOR_SIZE;
use crate::error::{FsError, Result};
use crate::freemap::FreeMap;

struct InodeState {
    disk: DiskInode,
    open_count: u32,
    removed: bool,
    deny_write_count: u32,
}

/// An in-memory handle to one on-disk inode. Every field access goes
/// through the lock: concurrent readers and writers on the same inode are
/// the common case, not an edge case.
pub struct Inode<B: BlockDevice + 'static> {
    sector: u32,
    cache: Arc<SectorCache<B>>,
    freemap: Arc<FreeMap>,
    state: Mutex<InodeState>,
}

impl<B: BlockDevice + 'static> Inode<B> {
    pub fn inumber(&self) -> u32 {
        self.sector
    }

    pub fn is_dir(&self) -> bool {
        self.state.lock().unwrap().disk.is_dir()
    }

    pub fn length(&self) -> u32 {
        self.state.lock().unwrap().disk.length
    }

    pub fn parent(&self) -> u32 {
        self.state.lock().unwrap().disk.parent
    }

    pub fn set_parent(&self, parent: u32) -> Result<()> {
        let mut state = self.state.lock().unwrap();
        state.disk.parent = parent;
        self.persist(&state.disk)
    }

    pub fn is_removed(&self) -> bool {
        self.state.lock().unwrap().removed
    }

    pub fn open_count(&self) -> u32 {
        self.state.lock().unwrap().open_count
    }

    pub fn deny_write(&self) {
        self.state.lock().unwrap().deny_write_count += 1;
    }

    pub fn allow_write(&self) {
        let mut state = self.state.lock().unwrap();
        assert!(state.deny_write_count > 0, "allow_write without deny_write");
        state.deny_write_count -= 1;
    }

    fn persist(&self, disk: &DiskInode) -> Result<()> {
        self.cache.write(self.sector, &disk.to_sector())
    }

    pub fn read_at(&self, buf: &mut [u8], offset: u32) -> Result<usize> {
        let state = self.state.lock().unwrap();
        let available = state.disk.length.saturating_sub(offset);
        let want = (buf.len() as u32).min(available) as usize;
        let mut done = 0usize;
        while done < want {
            let pos = offset as usize + done;
            let sector_off = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - sector_off).min(want - done);
            let sector = blockmap::offset_to_sector(&state.disk, &self.cache, pos as u32)?;
            let mut raw = [0u8; SECTOR_SIZE];
            self.cache.read(sector, &mut raw)?;
            buf[done..done + chunk].copy_from_slice(&raw[sector_off..sector_off + chunk]);
            done += chunk;
        }
        Ok(done)
    }

    pub fn write_at(&self, data: &[u8], offset: u32) -> Result<usize> {
        let mut state = self.state.lock().unwrap();
        if state.deny_write_count > 0 {
            return Err(FsError::WriteDenied);
        }
        let new_end = offset as usize + data.len();
        if new_end as u32 > state.disk.length {
            blockmap::grow(&mut state.disk, &self.cache, &self.freemap, new_end as u32)?;
        }

        let mut done = 0usize;
        while done < data.len() {
            let pos = offset as usize + done;
            let sector_off = pos % SECTOR_SIZE;
            let chunk = (SECTOR_SIZE - sector_off).min(data.len() - done);
            let sector = blockmap::offset_to_sector(&state.disk, &self.cache, pos as u32)?;

            let mut raw = [0u8; SECTOR_SIZE];
            if chunk != SECTOR_SIZE {
                self.cache.read(sector, &mut raw)?;
            }
            raw[sector_off..sector_off + chunk].copy_from_slice(&data[done..done + chunk]);
            self.cache.write(sector, &raw)?;
            done += chunk;
        }

        self.persist(&state.disk)?;
        Ok(done)
    }
}

/// The registry of open in-memory inodes, keyed by sector. Owns the
/// sector cache and free map handles every inode operation ultimately
/// needs.
pub struct InodeTable<B: BlockDevice + 'static> {
    cache: Arc<SectorCache<B>>,
    freemap: Arc<FreeMap>,
    open: Mutex<Vec<Arc<Inode<B>>>>,
}

impl<B: BlockDevice + 'static> InodeTable<B> {
    pub fn new(cache: Arc<SectorCache<B>>, freemap: Arc<FreeMap>) -> Self {
        Self {
            cache,
            freemap,
            open: Mutex::new(Vec::new()),
        }
    }

    fn find_open(&self, sector: u32) -> Option<Arc<Inode<B>>> {
        self.open
            .lock()
            .unwrap()
            .iter()
            .find(|i| i.sector == sector)
            .cloned()
    }

    /// Opens the inode at `sector`, returning the existing in-memory
    /// handle if one is already resident (spec.md's uniqueness invariant:
    /// never two `Inode`s for the same sector).
    pub fn open(&self, sector: u32) -> Result<Arc<Inode<B>>> {
        let mut open = self.open.lock().unwrap();
        if let Some(existing) = open.iter().find(|i| i.sector == sector) {
            existing.state.lock().unwrap().open_count += 1;
            return Ok(existing.clone());
        }
        let mut raw = [0u8; SECTOR_SIZE];
        self.cache.read(sector, &mut raw)?;
        let disk = DiskInode::from_sector(&raw);
        let inode = Arc::new(Inode {
            sector,
            cache: self.cache.clone(),
            freemap: self.freemap.clone(),
            state: Mutex::new(InodeState {
                disk,
                open_count: 1,
                removed: false,
                deny_write_count: 0,
            }),
        });
        open.push(inode.clone());
        Ok(inode)
    }

    /// Allocates a fresh inode sector, writes a zeroed inode of the given
    /// kind, and opens it with `open_count == 1`.
    pub fn create(&self, parent: u32, is_dir: bool) -> Result<Arc<Inode<B>>> {
        let sector = self.freemap.allocate()?;
        let disk = DiskInode::zeroed(is_dir, parent, 0);
        self.cache.write(sector, &disk.to_sector())?;
        self.open(sector)
    }

    /// Duplicates an already-open handle, incrementing its open count.
    pub fn reopen(&self, inode: &Arc<Inode<B>>) -> Arc<Inode<B>> {
        inode.state.lock().unwrap().open_count += 1;
        inode.clone()
    }

    /// Marks an inode for deletion. The inode's sectors and its own inode
    /// sector are released once the last open handle is closed.
    pub fn remove(&self, inode: &Arc<Inode<B>>) {
        inode.state.lock().unwrap().removed = true;
    }

    /// Drops one reference to `inode`. When the open count reaches zero
    /// and the inode was removed, its data sectors and its own sector are
    /// returned to the free map and it leaves the table.
    pub fn close(&self, inode: &Arc<Inode<B>>) -> Result<()> {
        let should_free = {
            let mut state = inode.state.lock().unwrap();
            assert!(state.open_count > 0, "close on an already-closed inode");
            state.open_count -= 1;
            state.open_count == 0 && state.removed
        };

        if should_free {
            let state = inode.state.lock().unwrap();
            blockmap::free_all(&state.disk, &self.cache, &self.freemap);
            self.freemap.release(inode.sector);
        }

        if inode.state.lock().unwrap().open_count == 0 {
            self.open.lock().unwrap().retain(|i| i.sector != inode.sector);
        }
        Ok(())
    }
}
