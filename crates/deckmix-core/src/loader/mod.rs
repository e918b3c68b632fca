//! Background track decoding
//!
//! Decoding a long WAV takes far longer than a UI frame, so it happens on a
//! dedicated thread. The flow for one load:
//!
//! 1. `engine.begin_load(deck)` invalidates the deck and returns a ticket
//! 2. `loader.load_bytes(ticket, bytes)` (or `load_file`) queues the decode
//! 3. the host polls `try_recv()` (or `apply_ready`) and hands each result to
//!    `engine.complete_load`
//!
//! Results from loads that were superseded in the meantime are discarded by
//! the engine, so the loader never needs to cancel anything.

use std::path::PathBuf;
use std::thread::{self, JoinHandle};

use crossbeam::channel::{self, Receiver, Sender, TryRecvError};

use crate::engine::{DeckEngine, LoadOutcome, LoadTicket};
use crate::error::{DecodeError, EngineResult};
use crate::pcm::{decode_audio, PcmBuffer};
use crate::types::DeckId;

/// Where the audio for a load comes from
#[derive(Debug)]
pub enum LoadSource {
    /// A complete WAV file already in memory
    Bytes(Vec<u8>),
    /// A WAV file on disk
    File(PathBuf),
}

struct LoadRequest {
    ticket: LoadTicket,
    source: LoadSource,
}

/// A finished decode, ready for [`DeckEngine::complete_load`]
pub struct LoadResult {
    pub ticket: LoadTicket,
    pub result: Result<PcmBuffer, DecodeError>,
}

/// Handle to the background decode thread
///
/// Dropping the handle closes the request channel and the thread exits after
/// its current decode.
pub struct TrackLoader {
    tx: Sender<LoadRequest>,
    rx: Receiver<LoadResult>,
    _handle: JoinHandle<()>,
}

impl TrackLoader {
    /// Spawn the loader thread
    pub fn spawn() -> std::io::Result<Self> {
        let (request_tx, request_rx) = channel::unbounded::<LoadRequest>();
        let (result_tx, result_rx) = channel::unbounded::<LoadResult>();

        let handle = thread::Builder::new()
            .name("deckmix-loader".to_string())
            .spawn(move || loader_thread(request_rx, result_tx))?;

        log::info!("TrackLoader spawned");
        Ok(Self {
            tx: request_tx,
            rx: result_rx,
            _handle: handle,
        })
    }

    /// Queue decoding of an in-memory WAV file (non-blocking)
    pub fn load_bytes(&self, ticket: LoadTicket, bytes: Vec<u8>) -> Result<(), String> {
        self.request(ticket, LoadSource::Bytes(bytes))
    }

    /// Queue reading and decoding a WAV file (non-blocking)
    pub fn load_file(&self, ticket: LoadTicket, path: PathBuf) -> Result<(), String> {
        self.request(ticket, LoadSource::File(path))
    }

    fn request(&self, ticket: LoadTicket, source: LoadSource) -> Result<(), String> {
        self.tx
            .send(LoadRequest { ticket, source })
            .map_err(|e| format!("Loader thread disconnected: {}", e))
    }

    /// Try to receive a finished decode (non-blocking)
    pub fn try_recv(&self) -> Option<LoadResult> {
        match self.rx.try_recv() {
            Ok(result) => Some(result),
            Err(TryRecvError::Empty) => None,
            Err(TryRecvError::Disconnected) => {
                log::error!("Loader thread disconnected unexpectedly");
                None
            }
        }
    }

    /// Receiver for hosts that want to block or `select!` on results
    pub fn results(&self) -> &Receiver<LoadResult> {
        &self.rx
    }

    /// Hand every finished decode to the engine
    ///
    /// Returns what happened to each one, in completion order.
    pub fn apply_ready(&self, engine: &DeckEngine) -> Vec<(DeckId, EngineResult<LoadOutcome>)> {
        let mut applied = Vec::new();
        while let Some(LoadResult { ticket, result }) = self.try_recv() {
            applied.push((ticket.deck(), engine.complete_load(ticket, result)));
        }
        applied
    }
}

fn loader_thread(rx: Receiver<LoadRequest>, tx: Sender<LoadResult>) {
    log::info!("Track loader thread started");

    while let Ok(LoadRequest { ticket, source }) = rx.recv() {
        let start = std::time::Instant::now();
        let result = match source {
            LoadSource::Bytes(bytes) => decode_audio(&bytes),
            LoadSource::File(path) => std::fs::read(&path)
                .map_err(|e| DecodeError::Io(format!("{:?}: {}", path, e)))
                .and_then(|bytes| decode_audio(&bytes)),
        };
        log::debug!(
            "Loader: {} load #{} decoded in {:?}",
            ticket.deck(),
            ticket.generation(),
            start.elapsed()
        );

        if tx.send(LoadResult { ticket, result }).is_err() {
            break;
        }
    }

    log::info!("Track loader thread shutting down");
}

#[cfg(test)]
mod tests {
    use std::io::Cursor;
    use std::sync::Arc;
    use std::time::Duration;

    use super::*;
    use crate::config::EngineConfig;
    use crate::engine::ManualClock;
    use crate::types::TransportState;

    fn wav(frames: usize) -> Vec<u8> {
        let spec = hound::WavSpec {
            channels: 2,
            sample_rate: 44100,
            bits_per_sample: 16,
            sample_format: hound::SampleFormat::Int,
        };
        let mut cursor = Cursor::new(Vec::new());
        {
            let mut writer = hound::WavWriter::new(&mut cursor, spec).unwrap();
            for _ in 0..frames * 2 {
                writer.write_sample(1000_i16).unwrap();
            }
            writer.finalize().unwrap();
        }
        cursor.into_inner()
    }

    fn engine() -> DeckEngine {
        DeckEngine::with_clock(EngineConfig::default(), Arc::new(ManualClock::default())).0
    }

    #[test]
    fn test_background_load_applies() {
        let engine = engine();
        let loader = TrackLoader::spawn().unwrap();

        let ticket = engine.begin_load(0).unwrap();
        loader.load_bytes(ticket, wav(44100)).unwrap();

        let LoadResult { ticket, result } =
            loader.results().recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(engine.complete_load(ticket, result), Ok(LoadOutcome::Applied));
        assert_eq!(engine.deck_state(0), Ok(TransportState::Ready));
        assert!((engine.snapshot()[0].duration_seconds - 1.0).abs() < 1e-9);
    }

    #[test]
    fn test_superseded_background_load() {
        let engine = engine();
        let loader = TrackLoader::spawn().unwrap();

        let stale = engine.begin_load(1).unwrap();
        loader.load_bytes(stale, wav(100)).unwrap();
        engine.load_track_bytes(1, &wav(441)).unwrap();

        let LoadResult { ticket, result } =
            loader.results().recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(engine.complete_load(ticket, result), Ok(LoadOutcome::Superseded));
        assert!((engine.snapshot()[1].duration_seconds - 0.01).abs() < 1e-9);
    }

    #[test]
    fn test_missing_file_reports_io_error() {
        let engine = engine();
        let loader = TrackLoader::spawn().unwrap();

        let ticket = engine.begin_load(0).unwrap();
        loader
            .load_file(ticket, PathBuf::from("/nonexistent/deckmix/track.wav"))
            .unwrap();

        let result = loader.results().recv_timeout(Duration::from_secs(5)).unwrap();
        assert!(matches!(result.result, Err(DecodeError::Io(_))));
    }
}
