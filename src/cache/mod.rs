//! The sector cache (spec.md §4.1): the single point of contact with the
//! block device. Every inode or directory read/write goes through here.
//!
//! This plays the role the reference kernel's `bio`/`Bcache` module plays,
//! generalized from a fixed-size `MruArena` of `BufEntry`s keyed by
//! `(dev, blockno)` to a cache keyed by sector alone, since this crate's
//! cache serves exactly one block device. Per-line locking, LRU eviction
//! by a monotonic tick, write-back on eviction, and a background
//! read-ahead consumer are all carried over; only the lock type changes,
//! from the reference kernel's sleep lock (parked on a wait channel under
//! a spinlock) to `std::sync::Mutex` (parked by the OS scheduler), because
//! this crate runs on real threads instead of under a kernel scheduler.

mod flusher;
mod line;
mod readahead;

pub use line::CacheLine;

use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::{Arc, Mutex, MutexGuard};
use std::thread::JoinHandle;
use std::time::Duration;

use crate::block::BlockDevice;
use crate::config::{Config, SECTOR_SIZE};
use crate::error::Result;
use flusher::Flusher;
use readahead::ReadAheadRing;

struct Inner<B: BlockDevice + 'static> {
    device: Arc<B>,
    lines: Vec<Mutex<CacheLine>>,
    tick: AtomicU64,
    ring: ReadAheadRing,
}

impl<B: BlockDevice + 'static> Inner<B> {
    fn next_tick(&self) -> u64 {
        self.tick.fetch_add(1, Ordering::Relaxed)
    }

    /// spec.md §4.1 "Locating a sector": scan all lines, acquiring and
    /// releasing each as we go, until one matches.
    fn find_locked(&self, sector: u32) -> Option<MutexGuard<'_, CacheLine>> {
        for line in &self.lines {
            let guard = line.lock().unwrap();
            if guard.valid && guard.sector == sector {
                return Some(guard);
            }
        }
        None
    }

    /// spec.md §4.1 "Eviction": scan for an invalid line first; otherwise
    /// track the smallest `last_used`. Lines are always inspected in the
    /// same fixed index order across every caller, so at most two locks
    /// are ever held at once (the running best and the line being
    /// compared against it) and no lock-ordering cycle can form.
    fn choose_evict(&self) -> Result<MutexGuard<'_, CacheLine>> {
        let mut best: Option<MutexGuard<'_, CacheLine>> = None;
        for line in &self.lines {
            let guard = line.lock().unwrap();
            if !guard.valid {
                return Ok(guard);
            }
            match &best {
                None => best = Some(guard),
                Some(b) if guard.last_used < b.last_used => best = Some(guard),
                _ => {}
            }
        }
        let mut winner = best.expect("cache must have at least one line");
        if winner.dirty {
            self.device.write_sector(winner.sector, &winner.data)?;
            winner.dirty = false;
        }
        winner.valid = true;
        Ok(winner)
    }

    fn read(&self, sector: u32, out: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        if let Some(mut line) = self.find_locked(sector) {
            out.copy_from_slice(&line.data);
            line.last_used = self.next_tick();
        } else {
            let mut line = self.choose_evict()?;
            line.sector = sector;
            line.dirty = false;
            self.device.read_sector(sector, &mut line.data)?;
            line.last_used = self.next_tick();
            line.valid = true;
            out.copy_from_slice(&line.data);
        }
        self.ring.push(sector.wrapping_add(1));
        Ok(())
    }

    fn write(&self, sector: u32, data: &[u8; SECTOR_SIZE]) -> Result<()> {
        if let Some(mut line) = self.find_locked(sector) {
            line.data.copy_from_slice(data);
            line.dirty = true;
            line.last_used = self.next_tick();
        } else {
            let mut line = self.choose_evict()?;
            line.sector = sector;
            line.data.copy_from_slice(data);
            line.dirty = true;
            line.last_used = self.next_tick();
            line.valid = true;
        }
        Ok(())
    }

    fn flush(&self) -> Result<()> {
        for line in &self.lines {
            let mut guard = line.lock().unwrap();
            if guard.dirty {
                self.device.write_sector(guard.sector, &guard.data)?;
                guard.dirty = false;
            }
        }
        Ok(())
    }

    /// Best-effort read-ahead install: skip sectors past the end of the
    /// device, do nothing if the sector is already cached, and silently
    /// drop the request on I/O failure. Never hands data to a caller.
    fn install_readahead(&self, sector: u32) {
        if sector >= self.device.sector_count() {
            return;
        }
        if self.find_locked(sector).is_some() {
            return;
        }
        let mut line = match self.choose_evict() {
            Ok(line) => line,
            Err(e) => {
                log::debug!("read-ahead: eviction failed, dropping request: {e}");
                return;
            }
        };
        line.sector = sector;
        line.dirty = false;
        match self.device.read_sector(sector, &mut line.data) {
            Ok(()) => {
                line.last_used = self.next_tick();
                line.valid = true;
            }
            Err(e) => {
                log::debug!("read-ahead: read of sector {sector} failed, dropping: {e}");
                line.valid = false;
            }
        }
    }
}

/// The sector cache. Owns two background workers for its lifetime: a
/// read-ahead consumer and a periodic flusher, both stopped and joined on
/// drop.
pub struct SectorCache<B: BlockDevice + 'static> {
    inner: Arc<Inner<B>>,
    flusher: Flusher,
    readahead_handle: Option<JoinHandle<()>>,
}

impl<B: BlockDevice + 'static> SectorCache<B> {
    pub fn new(device: Arc<B>, config: &Config) -> Self {
        let inner = Arc::new(Inner {
            device,
            lines: (0..config.cache_size)
                .map(|_| Mutex::new(CacheLine::empty()))
                .collect(),
            tick: AtomicU64::new(0),
            ring: ReadAheadRing::new(config.read_ahead_buffer_size),
        });

        let ra_inner = inner.clone();
        let readahead_handle = std::thread::Builder::new()
            .name("tinyfs-readahead".into())
            .spawn(move || {
                while let Some(sector) = ra_inner.ring.pop() {
                    ra_inner.install_readahead(sector);
                }
            })
            .expect("failed to spawn read-ahead thread");

        let flush_inner = inner.clone();
        let flusher = Flusher::spawn(Duration::from_millis(config.flush_interval_ms), move || {
            if let Err(e) = flush_inner.flush() {
                log::warn!("periodic flush failed: {e}");
            }
        });

        Self {
            inner,
            flusher,
            readahead_handle: Some(readahead_handle),
        }
    }

    pub fn read(&self, sector: u32, out: &mut [u8; SECTOR_SIZE]) -> Result<()> {
        self.inner.read(sector, out)
    }

    pub fn write(&self, sector: u32, data: &[u8; SECTOR_SIZE]) -> Result<()> {
        self.inner.write(sector, data)
    }

    pub fn flush(&self) -> Result<()> {
        self.inner.flush()
    }
}

impl<B: BlockDevice + 'static> Drop for SectorCache<B> {
    fn drop(&mut self) {
        self.inner.ring.shutdown();
        if let Some(handle) = self.readahead_handle.take() {
            let _ = handle.join();
        }
        let _ = self.inner.flush();
        // `self.flusher` is dropped after this body runs, stopping and
        // joining the periodic-flush thread.
    }
}
