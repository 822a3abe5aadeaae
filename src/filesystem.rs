//! The top-level filesystem service (spec.md §5, §6, §7): ties the
//! sector cache, inode table, and free map together behind the
//! user-visible syscall surface, collapsing the internal `Result<_,
//! FsError>` plumbing into the boolean/`-1`/`Option` conventions a
//! syscall dispatcher expects.
//!
//! The coarse process-wide lock mirrors the reference kernel's single
//! filesystem mutex held across `create`/`remove`/`open`/`read`/`write`/
//! `mkdir`/`seek`/`tell`/`close`/`filesize` (spec.md §5): per-line cache
//! locking handles concurrent sector access, but whole-operation
//! atomicity (e.g. a lookup-then-add not racing another process's
//! lookup-then-add of the same name) needs one coarser lock. `chdir` is
//! deliberately excluded, since it only mutates per-process state.

use std::sync::{Arc, Mutex};

use scopeguard::ScopeGuard;

use crate::block::BlockDevice;
use crate::cache::SectorCache;
use crate::config::Config;
use crate::dir::Directory;
use crate::error::{FsError, Result};
use crate::freemap::FreeMap;
use crate::inode::InodeTable;
use crate::path::find_dir;
use crate::process::{OpenFile, Process};

/// Sector 0 holds the free-map header, sector 1 the root directory's
/// inode (spec.md §6 "On-disk layout").
const ROOT_SECTOR: u32 = 1;
const DATA_START: u32 = 2;

pub struct FileSystem<B: BlockDevice + 'static> {
    device: Arc<B>,
    cache: Arc<SectorCache<B>>,
    freemap: Arc<FreeMap>,
    table: Arc<InodeTable<B>>,
    lock: Mutex<()>,
}

impl<B: BlockDevice + 'static> FileSystem<B> {
    /// Formats a fresh device: builds an empty free map, writes a root
    /// directory inode directly into the reserved root sector, and seeds
    /// it with `.` and `..` both pointing at itself. Panics on root
    /// creation failure, matching the source's own mkfs-time panics
    /// (spec.md §7): an unformattable device is a configuration fault,
    /// not a recoverable runtime error.
    pub fn mkfs(device: Arc<B>, config: &Config) -> Self {
        let usable = device.sector_count().saturating_sub(DATA_START);
        let freemap = Arc::new(FreeMap::create(DATA_START, usable));
        let cache = Arc::new(SectorCache::new(device.clone(), config));
        let table = Arc::new(InodeTable::new(cache.clone(), freemap.clone()));

        let root_disk = crate::inode::DiskInode::zeroed(true, ROOT_SECTOR, 0);
        cache
            .write(ROOT_SECTOR, &root_disk.to_sector())
            .expect("mkfs: failed to write root inode sector");
        let root = table.open(ROOT_SECTOR).expect("mkfs: failed to open root inode");
        let root_dir = Directory::new(root.clone()).expect("mkfs: root is not a directory");
        root_dir.add(".", ROOT_SECTOR).expect("mkfs: failed to seed root '.'");
        root_dir.add("..", ROOT_SECTOR).expect("mkfs: failed to seed root '..'");
        table.close(&root).expect("mkfs: failed to close root inode");

        freemap.flush(device.as_ref()).expect("mkfs: failed to persist free map");
        cache.flush().expect("mkfs: failed to flush cache");

        Self { device, cache, freemap, table, lock: Mutex::new(()) }
    }

    /// Mounts a previously formatted device, reconstructing the free map
    /// from its persisted bitmap.
    pub fn mount(device: Arc<B>, config: &Config) -> Result<Self> {
        let usable = device.sector_count().saturating_sub(DATA_START);
        let freemap = Arc::new(FreeMap::load(device.as_ref(), DATA_START, usable)?);
        let cache = Arc::new(SectorCache::new(device.clone(), config));
        let table = Arc::new(InodeTable::new(cache.clone(), freemap.clone()));
        Ok(Self { device, cache, freemap, table, lock: Mutex::new(()) })
    }

    /// Spawns a process-like handle rooted at the filesystem's root
    /// directory.
    pub fn new_process(&self) -> Result<Process<B>> {
        let root = self.table.open(ROOT_SECTOR)?;
        Ok(Process::new(root))
    }

    /// Closes a process's cwd and every open file it still holds. Callers
    /// should call this once a process exits.
    pub fn end_process(&self, mut process: Process<B>) -> Result<()> {
        let open: Vec<_> = process.open_inodes().cloned().collect();
        for inode in open {
            self.table.close(&inode)?;
        }
        let cwd = process.replace_cwd(self.table.open(ROOT_SECTOR)?);
        self.table.close(&cwd)?;
        self.table.close(process.cwd())?;
        Ok(())
    }

    /// Flushes the free map and the cache. Intended for orderly shutdown
    /// (spec.md §4.1 "Shutdown": flush the free map, then the cache).
    pub fn shutdown(&self) -> Result<()> {
        self.freemap.flush(self.device.as_ref())?;
        self.cache.flush()
    }

    fn create_inner(&self, process: &Process<B>, path: &str, initial_size: u32) -> Result<()> {
        let (parent, name) = find_dir(path, &self.table, ROOT_SECTOR, process.cwd_sector())?;
        let parent = scopeguard::guard(parent, |p| {
            let _ = self.table.close(&p);
        });
        if name == "." {
            return Err(FsError::NameCollision);
        }
        let parent_dir = Directory::new((*parent).clone())?;
        if parent_dir.lookup(&name).is_ok() {
            return Err(FsError::NameCollision);
        }

        let file = self.table.create(parent.inumber(), false)?;
        let file = scopeguard::guard(file, |f| {
            self.table.remove(&f);
            let _ = self.table.close(&f);
        });
        if initial_size > 0 {
            file.write_at(&vec![0u8; initial_size as usize], 0)?;
        }
        parent_dir.add(&name, file.inumber())?;

        let file = ScopeGuard::into_inner(file);
        self.table.close(&file)
    }

    pub fn create(&self, process: &Process<B>, path: &str, initial_size: u32) -> bool {
        let _guard = self.lock.lock().unwrap();
        self.create_inner(process, path, initial_size).is_ok()
    }

    fn remove_inner(&self, process: &Process<B>, path: &str) -> Result<()> {
        let (parent, name) = find_dir(path, &self.table, ROOT_SECTOR, process.cwd_sector())?;
        let parent = scopeguard::guard(parent, |p| {
            let _ = self.table.close(&p);
        });
        if name == "." {
            return Err(FsError::NotFound);
        }
        let parent_dir = Directory::new((*parent).clone())?;
        let child_sector = parent_dir.lookup(&name)?;
        let child = self.table.open(child_sector)?;

        if child.is_dir() {
            let child_dir = Directory::new(child.clone())?;
            let empty = child_dir.is_empty()?;
            let in_use = child.open_count() > 1;
            if !empty {
                self.table.close(&child)?;
                return Err(FsError::DirectoryNotEmpty);
            }
            if in_use {
                self.table.close(&child)?;
                return Err(FsError::InUse);
            }
        }

        parent_dir.remove(&name)?;
        self.table.remove(&child);
        self.table.close(&child)
    }

    pub fn remove(&self, process: &Process<B>, path: &str) -> bool {
        let _guard = self.lock.lock().unwrap();
        self.remove_inner(process, path).is_ok()
    }

    fn open_target(&self, process: &Process<B>, path: &str) -> Result<Arc<crate::inode::Inode<B>>> {
        let (parent, name) = find_dir(path, &self.table, ROOT_SECTOR, process.cwd_sector())?;
        let parent = scopeguard::guard(parent, |p| {
            let _ = self.table.close(&p);
        });
        if name == "." {
            return Ok(self.table.reopen(&parent));
        }
        let parent_dir = Directory::new((*parent).clone())?;
        let sector = parent_dir.lookup(&name)?;
        self.table.open(sector)
    }

    fn open_inner(&self, process: &mut Process<B>, path: &str) -> Result<i32> {
        let inode = self.open_target(process, path)?;
        Ok(process.install(inode, crate::dir::ENTRY_SIZE))
    }

    pub fn open(&self, process: &mut Process<B>, path: &str) -> Option<i32> {
        let _guard = self.lock.lock().unwrap();
        self.open_inner(process, path).ok()
    }

    pub fn filesize(&self, process: &Process<B>, fd: i32) -> i32 {
        let _guard = self.lock.lock().unwrap();
        match process.get(fd) {
            Ok(f) => f.inode().length() as i32,
            Err(_) => -1,
        }
    }

    pub fn read(&self, process: &mut Process<B>, fd: i32, buf: &mut [u8]) -> i32 {
        let _guard = self.lock.lock().unwrap();
        let (inode, offset) = match process.get_mut(fd) {
            Ok(OpenFile::File { inode, offset }) => (inode, offset),
            _ => return -1,
        };
        match inode.read_at(buf, *offset) {
            Ok(n) => {
                *offset += n as u32;
                n as i32
            }
            Err(_) => -1,
        }
    }

    pub fn write(&self, process: &mut Process<B>, fd: i32, data: &[u8]) -> i32 {
        let _guard = self.lock.lock().unwrap();
        let (inode, offset) = match process.get_mut(fd) {
            Ok(OpenFile::File { inode, offset }) => (inode, offset),
            _ => return -1,
        };
        match inode.write_at(data, *offset) {
            Ok(n) => {
                *offset += n as u32;
                n as i32
            }
            Err(FsError::WriteDenied) => 0,
            Err(_) => -1,
        }
    }

    pub fn seek(&self, process: &mut Process<B>, fd: i32, pos: u32) -> bool {
        let _guard = self.lock.lock().unwrap();
        match process.get_mut(fd) {
            Ok(OpenFile::File { offset, .. }) => {
                *offset = pos;
                true
            }
            _ => false,
        }
    }

    pub fn tell(&self, process: &Process<B>, fd: i32) -> i32 {
        let _guard = self.lock.lock().unwrap();
        match process.get(fd) {
            Ok(OpenFile::File { offset, .. }) => *offset as i32,
            _ => -1,
        }
    }

    pub fn close(&self, process: &mut Process<B>, fd: i32) -> bool {
        let _guard = self.lock.lock().unwrap();
        match process.take(fd) {
            Some(f) => self.table.close(f.inode()).is_ok(),
            None => false,
        }
    }

    /// Not serialised by the coarse lock (spec.md §5): it mutates only
    /// this process's own state.
    pub fn chdir(&self, process: &mut Process<B>, path: &str) -> bool {
        match self.open_target(process, path) {
            Ok(inode) if inode.is_dir() => {
                let old = process.replace_cwd(inode);
                let _ = self.table.close(&old);
                true
            }
            Ok(inode) => {
                let _ = self.table.close(&inode);
                false
            }
            Err(_) => false,
        }
    }

    fn mkdir_inner(&self, process: &Process<B>, path: &str) -> Result<()> {
        let (parent, name) = find_dir(path, &self.table, ROOT_SECTOR, process.cwd_sector())?;
        let parent = scopeguard::guard(parent, |p| {
            let _ = self.table.close(&p);
        });
        if name == "." {
            return Err(FsError::NameCollision);
        }
        let parent_dir = Directory::new((*parent).clone())?;
        if parent_dir.lookup(&name).is_ok() {
            return Err(FsError::NameCollision);
        }

        let child = Directory::create(&self.table, parent.inumber())?;
        let child = scopeguard::guard(child, |c| {
            self.table.remove(&c);
            let _ = self.table.close(&c);
        });
        parent_dir.add(&name, child.inumber())?;

        let child = ScopeGuard::into_inner(child);
        self.table.close(&child)
    }

    pub fn mkdir(&self, process: &Process<B>, path: &str) -> bool {
        let _guard = self.lock.lock().unwrap();
        self.mkdir_inner(process, path).is_ok()
    }

    fn readdir_inner(&self, process: &mut Process<B>, fd: i32) -> Result<Option<String>> {
        match process.get_mut(fd)? {
            OpenFile::Dir { inode, pos } => {
                crate::dir::next_entry(inode, pos).map(|entry| entry.map(|(name, _)| name))
            }
            OpenFile::File { .. } => Err(FsError::NotADirectory),
        }
    }

    pub fn readdir(&self, process: &mut Process<B>, fd: i32) -> Option<String> {
        let _guard = self.lock.lock().unwrap();
        self.readdir_inner(process, fd).ok().flatten()
    }

    pub fn isdir(&self, process: &Process<B>, fd: i32) -> bool {
        let _guard = self.lock.lock().unwrap();
        process.get(fd).map(|f| f.inode().is_dir()).unwrap_or(false)
    }

    pub fn inumber(&self, process: &Process<B>, fd: i32) -> i32 {
        let _guard = self.lock.lock().unwrap();
        process.get(fd).map(|f| f.inode().inumber() as i32).unwrap_or(-1)
    }
}
