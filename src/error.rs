//! Failure kinds for the filesystem core.
//!
//! Internal layers return `Result<T, FsError>`. The syscall-surface
//! operations in [`crate::filesystem`] collapse these into the
//! boolean/`-1`/`Option` conventions a teaching-OS syscall dispatcher
//! expects; nothing above that boundary ever sees this type.

use std::io;

pub type Result<T> = std::result::Result<T, FsError>;

#[derive(thiserror::Error, Debug)]
pub enum FsError {
    #[error("path component exceeds NAME_MAX")]
    NameTooLong,

    #[error("path exceeds PATH_MAX")]
    PathTooLong,

    #[error("path is empty")]
    EmptyPath,

    #[error("a name in the path was not found")]
    NotFound,

    #[error("name already exists in directory")]
    NameCollision,

    #[error("directory is not empty")]
    DirectoryNotEmpty,

    #[error("inode is in use")]
    InUse,

    #[error("expected a directory")]
    NotADirectory,

    #[error("expected a regular file")]
    IsADirectory,

    #[error("write denied on this inode")]
    WriteDenied,

    #[error("no free sectors available")]
    NoSpace,

    #[error("I/O error: {0}")]
    Io(#[from] io::Error),
}
