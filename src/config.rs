//! Tunable constants, with defaults matching the constants named by the
//! design (sector size, cache size, read-ahead ring size, name/path limits,
//! flush interval). Loadable from a TOML file the way a hosted service
//! loads its runtime configuration; `Config::default()` alone is enough to
//! run the whole crate.

use std::fs;
use std::path::Path;

use serde::{Deserialize, Serialize};

use crate::error::{FsError, Result};

pub const SECTOR_SIZE: usize = 512;
pub const NAME_MAX: usize = 14;
pub const PATH_MAX: usize = 256;

#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    /// Number of resident cache lines.
    pub cache_size: usize,
    /// Capacity of the read-ahead request ring.
    pub read_ahead_buffer_size: usize,
    /// Milliseconds between background flushes.
    pub flush_interval_ms: u64,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            cache_size: 64,
            read_ahead_buffer_size: 64,
            flush_interval_ms: 5_000,
        }
    }
}

impl Config {
    pub fn from_toml_file(path: impl AsRef<Path>) -> Result<Self> {
        let text = fs::read_to_string(path)?;
        toml::from_str(&text).map_err(|_| FsError::Io(std::io::Error::new(
            std::io::ErrorKind::InvalidData,
            "malformed configuration file",
        )))
    }
}
