//! The path resolver (spec.md §4.4).
//!
//! `find_dir` walks a path one component at a time, exactly as the
//! reference kernel's `namex`/`skipelem` do, but returns an explicit
//! `Result` instead of the source's `bool`/null-pointer conventions:
//! intermediate components that don't resolve are a hard failure, while a
//! missing trailing component is reported back to the caller (parent +
//! name) so create-style callers can act on it.

use std::sync::Arc;

use crate::block::BlockDevice;
use crate::config::{NAME_MAX, PATH_MAX};
use crate::dir::Directory;
use crate::error::{FsError, Result};
use crate::inode::{Inode, InodeTable};

fn normalize(path: &str) -> String {
    let mut out = String::with_capacity(path.len());
    let mut last_was_slash = false;
    for c in path.chars() {
        if c == '/' {
            if !last_was_slash {
                out.push('/');
            }
            last_was_slash = true;
        } else {
            out.push(c);
            last_was_slash = false;
        }
    }
    out
}

/// Resolves `path` to its parent directory and trailing component name.
/// `root_sector` and `cwd_sector` identify the filesystem root and the
/// calling process's current working directory; the returned inode is a
/// fresh handle the caller owns and must close.
pub fn find_dir<B: BlockDevice + 'static>(
    path: &str,
    table: &InodeTable<B>,
    root_sector: u32,
    cwd_sector: u32,
) -> Result<(Arc<Inode<B>>, String)> {
    if path.is_empty() {
        return Err(FsError::EmptyPath);
    }

    let normalized = normalize(path);
    if normalized.len() > PATH_MAX {
        return Err(FsError::PathTooLong);
    }

    let absolute = normalized.starts_with('/');
    let trailing_slash = normalized.ends_with('/');
    let tokens: Vec<&str> = normalized.split('/').filter(|s| !s.is_empty()).collect();

    let start_sector = if absolute { root_sector } else { cwd_sector };
    let mut cur_inode = table.open(start_sector)?;

    if tokens.is_empty() {
        // Path was just "/" (or, relatively, referred to the cwd itself).
        return Ok((cur_inode, ".".to_string()));
    }

    let last_idx = tokens.len() - 1;
    let mut last_name = String::new();

    for (i, token) in tokens.iter().enumerate() {
        if token.len() > NAME_MAX {
            table.close(&cur_inode)?;
            return Err(FsError::NameTooLong);
        }

        let is_intermediate = trailing_slash || i < last_idx;
        if !is_intermediate {
            last_name = token.to_string();
            break;
        }

        let cur_dir = Directory::new(cur_inode.clone())?;
        let child_sector = match cur_dir.lookup(token) {
            Ok(s) => s,
            Err(e) => {
                table.close(&cur_inode)?;
                return Err(e);
            }
        };
        let child = table.open(child_sector)?;
        if !child.is_dir() {
            table.close(&cur_inode)?;
            table.close(&child)?;
            return Err(FsError::NotADirectory);
        }
        table.close(&cur_inode)?;
        cur_inode = child;
    }

    if trailing_slash {
        last_name = ".".to_string();
    }

    Ok((cur_inode, last_name))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::block::MemBlockDevice;
    use crate::cache::SectorCache;
    use crate::config::Config;
    use crate::freemap::FreeMap;

    fn setup() -> (InodeTable<MemBlockDevice>, u32) {
        let dev = Arc::new(MemBlockDevice::new(1024));
        let cache = Arc::new(SectorCache::new(dev, &Config::default()));
        let freemap = Arc::new(FreeMap::create(16, 900));
        let table = InodeTable::new(cache, freemap);
        let root = table.create(0, true).unwrap();
        let root_sector = root.inumber();
        root.set_parent(root_sector).unwrap();
        let root_dir = Directory::new(root.clone()).unwrap();
        // Root's `.` and `..` both point to itself.
        root_dir.add(".", root_sector).ok();
        root_dir.add("..", root_sector).ok();
        table.close(&root).unwrap();
        (table, root_sector)
    }

    fn mkdir(
        table: &InodeTable<MemBlockDevice>,
        parent_dir: &Directory<MemBlockDevice>,
        parent_sector: u32,
        name: &str,
    ) -> u32 {
        let child = Directory::create(table, parent_sector).unwrap();
        let sector = child.inumber();
        parent_dir.add(name, sector).unwrap();
        table.close(&child).unwrap();
        sector
    }

    #[test]
    fn absolute_path_resolves_parent_and_leaf() {
        let (table, root_sector) = setup();
        let root = table.open(root_sector).unwrap();
        let root_dir = Directory::new(root.clone()).unwrap();
        let a_sector = mkdir(&table, &root_dir, root_sector, "a");
        table.close(&root).unwrap();

        let (parent, name) = find_dir("/a", &table, root_sector, root_sector).unwrap();
        assert_eq!(parent.inumber(), root_sector);
        assert_eq!(name, "a");
        table.close(&parent).unwrap();
        let _ = a_sector;
    }

    #[test]
    fn redundant_separators_and_trailing_slash_resolve_into_the_directory() {
        let (table, root_sector) = setup();
        let root = table.open(root_sector).unwrap();
        let root_dir = Directory::new(root.clone()).unwrap();
        let a_sector = mkdir(&table, &root_dir, root_sector, "a");
        let a_inode = table.open(a_sector).unwrap();
        let a_dir = Directory::new(a_inode.clone()).unwrap();
        let b_sector = mkdir(&table, &a_dir, a_sector, "b");
        table.close(&a_inode).unwrap();
        table.close(&root).unwrap();

        let (parent, name) = find_dir("//a///b/.", &table, root_sector, root_sector).unwrap();
        assert_eq!(name, ".");
        assert_eq!(parent.inumber(), b_sector);
        table.close(&parent).unwrap();
    }

    #[test]
    fn missing_intermediate_component_fails() {
        let (table, root_sector) = setup();
        let result = find_dir("/nope/leaf", &table, root_sector, root_sector);
        assert!(matches!(result, Err(FsError::NotFound)));
    }

    #[test]
    fn missing_trailing_component_succeeds_with_its_parent() {
        let (table, root_sector) = setup();
        let (parent, name) = find_dir("/does-not-exist", &table, root_sector, root_sector).unwrap();
        assert_eq!(parent.inumber(), root_sector);
        assert_eq!(name, "does-not-exist");
        table.close(&parent).unwrap();
    }

    #[test]
    fn path_too_long_is_rejected() {
        let (table, root_sector) = setup();
        let long = format!("/{}", "a".repeat(PATH_MAX));
        assert!(matches!(
            find_dir(&long, &table, root_sector, root_sector),
            Err(FsError::PathTooLong)
        ));
    }

    #[test]
    fn empty_path_is_rejected() {
        let (table, root_sector) = setup();
        assert!(matches!(
            find_dir("", &table, root_sector, root_sector),
            Err(FsError::EmptyPath)
        ));
    }
}
