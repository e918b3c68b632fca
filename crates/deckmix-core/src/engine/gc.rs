//! Deferred freeing of decoded tracks
//!
//! [`PcmBuffer`](crate::pcm::PcmBuffer) wraps its samples in a
//! `basedrop::Shared` built from [`gc_handle`]. Every source voice holds a
//! clone, so the renderer is usually the last owner when a deck stops,
//! seeks or loads another track. That last drop only queues the pointer;
//! the `deckmix-gc` thread frees the samples on its next sweep.

use basedrop::{Collector, Handle};
use std::sync::mpsc;
use std::sync::OnceLock;
use std::thread;
use std::time::Duration;

/// Global handle for creating `Shared<T>` allocations
static GC_HANDLE: OnceLock<Handle> = OnceLock::new();

/// How often the collector thread frees queued buffers
const COLLECT_INTERVAL: Duration = Duration::from_millis(100);

/// Initialize the global collector and return a handle
fn init_gc() -> Handle {
    let (tx, rx) = mpsc::channel();

    thread::Builder::new()
        .name("deckmix-gc".to_string())
        .spawn(move || {
            // Collector is !Sync, so it lives on this thread only
            let mut collector = Collector::new();
            tx.send(collector.handle()).expect("Failed to send GC handle");

            log::info!("Track buffer GC thread started");

            loop {
                collector.collect();
                thread::sleep(COLLECT_INTERVAL);
            }
        })
        .expect("Failed to spawn track buffer GC thread");

    rx.recv().expect("Failed to receive GC handle")
}

/// Handle used by `PcmBuffer` to allocate its samples
///
/// The collector thread is started on first use.
pub fn gc_handle() -> Handle {
    GC_HANDLE.get_or_init(init_gc).clone()
}

#[cfg(test)]
mod tests {
    use crate::pcm::PcmBuffer;
    use crate::types::StereoBuffer;

    #[test]
    fn test_track_outlives_dropped_clone() {
        let track = PcmBuffer::from_stereo(StereoBuffer::silence(1024), 48000).unwrap();
        let voice_copy = track.clone();
        drop(track);
        assert_eq!(voice_copy.frames(), 1024);
    }
}
