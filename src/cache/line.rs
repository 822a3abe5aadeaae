//! A single cache line: identity, validity, dirtiness, and data, guarded
//! by its own mutual-exclusion primitive — the per-line `Mutex` plays the
//! role the reference kernel's per-`BufEntry` sleep lock plays, just
//! backed by `std::sync::Mutex` instead of a hand-rolled sleep lock keyed
//! on interrupt state, since this crate runs on real OS threads rather
//! than under a kernel scheduler.
//!
//! The cache is built for a single block device (spec.md §3: "a single
//! block device"), so a line's identity is just its sector index; there is
//! no separate device handle to track per line.

use crate::config::SECTOR_SIZE;

pub struct CacheLine {
    pub valid: bool,
    pub dirty: bool,
    pub sector: u32,
    pub last_used: u64,
    pub data: [u8; SECTOR_SIZE],
}

impl CacheLine {
    pub const fn empty() -> Self {
        Self {
            valid: false,
            dirty: false,
            sector: 0,
            last_used: 0,
            data: [0u8; SECTOR_SIZE],
        }
    }
}
