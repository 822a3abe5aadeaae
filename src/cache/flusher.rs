//! The periodic flush worker. Mirrors the reference kernel's own timer
//! driven flush loop, using a cooperative sleep-and-check instead of a
//! hardware timer interrupt, since this crate has a real OS thread to
//! block on instead of a kernel tick.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;
use std::thread::JoinHandle;
use std::time::Duration;

pub struct Flusher {
    stop: Arc<AtomicBool>,
    handle: Option<JoinHandle<()>>,
}

impl Flusher {
    pub fn spawn<F>(interval: Duration, mut flush: F) -> Self
    where
        F: FnMut() + Send + 'static,
    {
        let stop = Arc::new(AtomicBool::new(false));
        let stop_clone = stop.clone();
        let handle = std::thread::Builder::new()
            .name("tinyfs-flusher".into())
            .spawn(move || {
                while !stop_clone.load(Ordering::Acquire) {
                    // Sleep in short slices so shutdown is prompt rather
                    // than waiting out a full interval.
                    let slices = (interval.as_millis() / 50).max(1) as u32;
                    for _ in 0..slices {
                        if stop_clone.load(Ordering::Acquire) {
                            return;
                        }
                        std::thread::sleep(Duration::from_millis(
                            (interval.as_millis() / slices as u128) as u64,
                        ));
                    }
                    flush();
                    log::trace!("flusher: periodic flush complete");
                }
            })
            .expect("failed to spawn flusher thread");
        Self {
            stop,
            handle: Some(handle),
        }
    }
}

impl Drop for Flusher {
    fn drop(&mut self) {
        self.stop.store(true, Ordering::Release);
        if let Some(handle) = self.handle.take() {
            let _ = handle.join();
        }
    }
}
