//! Per-process filesystem state (spec.md §6 "Per-process state").
//!
//! The reference kernel keeps this as fields on its own process control
//! block; here it's factored into a standalone [`Process`] so the
//! filesystem core can be exercised (and tested) without a real process
//! subsystem behind it. A `Process` owns its current working directory —
//! kept open for as long as the process exists, exactly like any other
//! open file handle — and its open file-descriptor table.
//!
//! Open descriptors are a tagged variant, `File` or `Dir`, rather than
//! one struct reinterpreted at the boundary (spec.md §9
//! "Directory-as-file polymorphism": the source's cast between the two is
//! unsafe, and is replaced here with an explicit discriminated union).

use std::collections::HashMap;
use std::sync::Arc;

use crate::block::BlockDevice;
use crate::error::{FsError, Result};
use crate::inode::Inode;

/// File descriptors 0 and 1 are reserved for the console and never
/// backed by an inode (spec.md §6).
const FIRST_FD: i32 = 2;

pub enum OpenFile<B: BlockDevice + 'static> {
    File { inode: Arc<Inode<B>>, offset: u32 },
    Dir { inode: Arc<Inode<B>>, pos: u32 },
}

impl<B: BlockDevice + 'static> OpenFile<B> {
    pub fn inode(&self) -> &Arc<Inode<B>> {
        match self {
            OpenFile::File { inode, .. } => inode,
            OpenFile::Dir { inode, .. } => inode,
        }
    }
}

pub struct Process<B: BlockDevice + 'static> {
    cwd: Arc<Inode<B>>,
    files: HashMap<i32, OpenFile<B>>,
    next_fd: i32,
}

impl<B: BlockDevice + 'static> Process<B> {
    pub fn new(cwd: Arc<Inode<B>>) -> Self {
        Self {
            cwd,
            files: HashMap::new(),
            next_fd: FIRST_FD,
        }
    }

    pub fn cwd_sector(&self) -> u32 {
        self.cwd.inumber()
    }

    pub fn cwd(&self) -> &Arc<Inode<B>> {
        &self.cwd
    }

    /// Swaps in a new current working directory, returning the old one so
    /// the caller (which owns the inode table) can close it.
    pub fn replace_cwd(&mut self, new_cwd: Arc<Inode<B>>) -> Arc<Inode<B>> {
        std::mem::replace(&mut self.cwd, new_cwd)
    }

    /// Installs a freshly opened inode as a new descriptor, as a
    /// directory cursor (starting past `.`/`..`) or a file offset
    /// depending on its kind.
    pub fn install(&mut self, inode: Arc<Inode<B>>, dir_entry_size: usize) -> i32 {
        let fd = self.next_fd;
        self.next_fd += 1;
        let entry = if inode.is_dir() {
            OpenFile::Dir { inode, pos: 2 * dir_entry_size as u32 }
        } else {
            OpenFile::File { inode, offset: 0 }
        };
        self.files.insert(fd, entry);
        fd
    }

    pub fn get(&self, fd: i32) -> Result<&OpenFile<B>> {
        self.files.get(&fd).ok_or(FsError::NotFound)
    }

    pub fn get_mut(&mut self, fd: i32) -> Result<&mut OpenFile<B>> {
        self.files.get_mut(&fd).ok_or(FsError::NotFound)
    }

    /// Removes and returns the open file for `fd`, if any. The caller is
    /// responsible for closing the underlying inode handle.
    pub fn take(&mut self, fd: i32) -> Option<OpenFile<B>> {
        self.files.remove(&fd)
    }

    /// Every open file's inode handle, for teardown (the cwd is not
    /// included; callers close it separately with `replace_cwd`).
    pub fn open_inodes(&self) -> impl Iterator<Item = &Arc<Inode<B>>> {
        self.files.values().map(|f| f.inode())
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use crate::cache::SectorCache;
    use crate::config::Config;
    use crate::freemap::FreeMap;
    use crate::inode::InodeTable;

    const ENTRY_SIZE: usize = 20;

    fn setup() -> (InodeTable<MemBlockDevice>, Arc<Inode<MemBlockDevice>>) {
        let dev = Arc::new(MemBlockDevice::new(64));
        let cache = Arc::new(SectorCache::new(dev, &Config::default()));
        let freemap = Arc::new(FreeMap::create(16, 40));
        let table = InodeTable::new(cache, freemap);
        let root = table.create(0, true).unwrap();
        (table, root)
    }

    #[test]
    fn descriptors_start_at_two_and_increase() {
        let (table, root) = setup();
        let file = table.create(root.inumber(), false).unwrap();

        let mut process = Process::new(table.reopen(&root));
        let fd_a = process.install(file.clone(), ENTRY_SIZE);
        let fd_b = process.install(file.clone(), ENTRY_SIZE);
        assert_eq!(fd_a, 2);
        assert_eq!(fd_b, 3);
        table.close(&file).unwrap();
        table.close(&file).unwrap();
        table.close(&root).unwrap();
        table.close(process.cwd()).unwrap();
    }

    #[test]
    fn directory_descriptors_start_past_dot_entries() {
        let (table, root) = setup();
        let sub = table.create(root.inumber(), true).unwrap();

        let mut process = Process::new(table.reopen(&root));
        let fd = process.install(sub.clone(), ENTRY_SIZE);
        match process.get(fd).unwrap() {
            OpenFile::Dir { pos, .. } => assert_eq!(*pos, 2 * ENTRY_SIZE as u32),
            OpenFile::File { .. } => panic!("expected a directory descriptor"),
        }
        table.close(&sub).unwrap();
        table.close(&root).unwrap();
        table.close(process.cwd()).unwrap();
    }

    #[test]
    fn take_removes_the_descriptor() {
        let (table, root) = setup();
        let file = table.create(root.inumber(), false).unwrap();

        let mut process = Process::new(table.reopen(&root));
        let fd = process.install(file.clone(), ENTRY_SIZE);
        assert!(process.take(fd).is_some());
        assert!(matches!(process.get(fd), Err(FsError::NotFound)));
        table.close(&file).unwrap();
        table.close(&root).unwrap();
        table.close(process.cwd()).unwrap();
    }

    #[test]
    fn replace_cwd_returns_the_previous_handle() {
        let (table, root) = setup();
        let sub = table.create(root.inumber(), true).unwrap();

        let mut process = Process::new(table.reopen(&root));
        let old = process.replace_cwd(table.reopen(&sub));
        assert_eq!(old.inumber(), root.inumber());
        assert_eq!(process.cwd_sector(), sub.inumber());
        table.close(&old).unwrap();
        table.close(process.cwd()).unwrap();
        table.close(&root).unwrap();
        table.close(&sub).unwrap();
    }
}
