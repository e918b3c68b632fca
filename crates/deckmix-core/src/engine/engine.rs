//! DeckEngine - entry point tying decks, crossfader and graph together
//!
//! Locking:
//! - each deck has its own mutex, so operations on one deck are totally
//!   ordered while different decks proceed independently
//! - the crossfader has its own mutex
//! - the graph mutex is always taken last and held only for the call
//!
//! `snapshot()` takes only deck locks and never touches the graph.

use std::sync::{Arc, Mutex, MutexGuard, PoisonError};

use serde::Serialize;

use super::clock::{EngineClock, FrameClock};
use super::command::NodeId;
use super::deck::{Deck, LoadOutcome, LoadTicket};
use super::graph::{AudioGraph, ContextState};
use super::mixer::{CrossfadeMixer, CrossfadeSide};
use super::render::GraphRenderer;
use crate::config::EngineConfig;
use crate::error::{DecodeError, EngineError, EngineResult};
use crate::pcm::{decode_audio, PcmBuffer};
use crate::types::{DeckId, TransportState};

/// Read-only view of one deck for UI polling
#[derive(Debug, Clone, Copy, PartialEq, Serialize)]
pub struct DeckSnapshot {
    pub deck_id: DeckId,
    pub state: TransportState,
    pub position_seconds: f64,
    pub duration_seconds: f64,
    pub is_playing: bool,
    pub volume: f32,
    pub speed: f64,
}

/// Multi-deck playback engine
///
/// Created together with its [`GraphRenderer`], which the host moves onto
/// the audio thread (or drives itself for offline rendering).
pub struct DeckEngine {
    config: EngineConfig,
    clock: Arc<dyn EngineClock>,
    decks: Vec<Mutex<Deck>>,
    crossfader: Mutex<CrossfadeMixer>,
    graph: Mutex<AudioGraph>,
}

fn lock<T>(mutex: &Mutex<T>) -> MutexGuard<'_, T> {
    // A panic while holding a deck lock can't leave the render side
    // inconsistent, so keep going with the inner state.
    mutex.lock().unwrap_or_else(PoisonError::into_inner)
}

impl DeckEngine {
    /// Create an engine clocked by the frames its renderer produces
    pub fn new(config: EngineConfig) -> (Self, GraphRenderer) {
        let config = config.validated();
        let clock = Arc::new(FrameClock::new(config.sample_rate));
        Self::with_clock(config, clock)
    }

    /// Create an engine driven by an external clock
    pub fn with_clock(config: EngineConfig, clock: Arc<dyn EngineClock>) -> (Self, GraphRenderer) {
        let config = config.validated();
        let (graph, renderer) = AudioGraph::new(&config, clock.clone());

        let decks = (0..config.deck_count)
            .map(|i| Mutex::new(Deck::new(DeckId::new(i), &config)))
            .collect();

        log::info!(
            "DeckEngine: {} decks at {}Hz, {}ms ramps",
            config.deck_count,
            config.sample_rate,
            config.gain_ramp_ms
        );

        let engine = Self {
            crossfader: Mutex::new(CrossfadeMixer::new(config.initial_crossfade)),
            config,
            clock,
            decks,
            graph: Mutex::new(graph),
        };
        (engine, renderer)
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn deck_count(&self) -> usize {
        self.decks.len()
    }

    /// Current engine time in seconds
    pub fn now(&self) -> f64 {
        self.clock.now()
    }

    // ─────────────────────────────────────────────────────────────────────
    // Deck operations
    // ─────────────────────────────────────────────────────────────────────

    /// Run `f` with the deck and graph locked (deck first)
    ///
    /// Pending graph events are collected first; only this deck's are
    /// consumed by whatever `f` does.
    fn with_deck<T>(
        &self,
        deck: usize,
        f: impl FnOnce(&mut Deck, &mut AudioGraph, f64) -> EngineResult<T>,
    ) -> EngineResult<T> {
        let slot = self.decks.get(deck).ok_or(EngineError::UnknownDeck(deck))?;
        let mut deck = lock(slot);
        let mut graph = lock(&self.graph);
        graph.collect_events();
        let now = self.clock.now();
        f(&mut deck, &mut graph, now)
    }

    /// Load a decoded buffer; the deck ends up `Ready` at 0.0
    pub fn load_track(&self, deck: usize, pcm: PcmBuffer) -> EngineResult<()> {
        self.with_deck(deck, |d, g, _| d.load(g, pcm))
    }

    /// Decode a WAV file and load it
    ///
    /// Decoding runs without holding any lock. If another load on the same
    /// deck starts meanwhile, this one returns `Superseded`.
    pub fn load_track_bytes(&self, deck: usize, bytes: &[u8]) -> EngineResult<LoadOutcome> {
        let ticket = self.begin_load(deck)?;
        let result = decode_audio(bytes);
        self.complete_load(ticket, result)
    }

    /// Start a load whose decode happens elsewhere (e.g. a [`TrackLoader`])
    ///
    /// [`TrackLoader`]: crate::loader::TrackLoader
    pub fn begin_load(&self, deck: usize) -> EngineResult<LoadTicket> {
        self.with_deck(deck, |d, g, _| d.begin_load(g))
    }

    /// Finish a load started with [`begin_load`](Self::begin_load)
    pub fn complete_load(
        &self,
        ticket: LoadTicket,
        result: Result<PcmBuffer, DecodeError>,
    ) -> EngineResult<LoadOutcome> {
        self.with_deck(ticket.deck().index(), |d, _, _| d.complete_load(ticket, result))
    }

    pub fn play(&self, deck: usize) -> EngineResult<()> {
        self.with_deck(deck, |d, g, now| d.play(g, now))
    }

    pub fn pause(&self, deck: usize) -> EngineResult<()> {
        self.with_deck(deck, |d, g, now| d.pause(g, now))
    }

    pub fn stop(&self, deck: usize) -> EngineResult<()> {
        self.with_deck(deck, |d, g, now| d.stop(g, now))
    }

    pub fn seek(&self, deck: usize, seconds: f64) -> EngineResult<()> {
        self.with_deck(deck, |d, g, now| d.seek(g, seconds, now))
    }

    /// Set a deck's volume (0..=1, clamped)
    pub fn set_volume(&self, deck: usize, volume: f32) {
        if let Err(e) = self.with_deck(deck, |d, g, _| d.set_volume(g, volume)) {
            log::warn!("set_volume({}, {}): {}", deck, volume, e);
        }
    }

    /// Set a deck's playback speed (clamped to the configured range)
    pub fn set_speed(&self, deck: usize, speed: f64) {
        if let Err(e) = self.with_deck(deck, |d, g, now| d.set_speed(g, speed, now)) {
            log::warn!("set_speed({}, {}): {}", deck, speed, e);
        }
    }

    // ─────────────────────────────────────────────────────────────────────
    // Crossfader
    // ─────────────────────────────────────────────────────────────────────

    /// Move the crossfader (0.0 = full A, 1.0 = full B, clamped)
    pub fn set_crossfade(&self, value: f32) {
        let mut crossfader = lock(&self.crossfader);
        let mut graph = lock(&self.graph);
        if let Err(e) = crossfader.set_crossfade(&mut graph, value) {
            log::warn!("set_crossfade({}): {}", value, e);
        }
    }

    pub fn crossfade(&self) -> f32 {
        lock(&self.crossfader).position()
    }

    /// Route a deck through side A, side B or past the crossfader
    pub fn set_crossfade_side(&self, deck: usize, side: CrossfadeSide) -> EngineResult<()> {
        if deck >= self.decks.len() {
            return Err(EngineError::UnknownDeck(deck));
        }
        let crossfader = lock(&self.crossfader);
        let mut graph = lock(&self.graph);
        graph.set_crossfade_side(deck, side, crossfader.gains())
    }

    pub fn crossfade_side(&self, deck: usize) -> EngineResult<CrossfadeSide> {
        lock(&self.graph)
            .crossfade_side(deck)
            .ok_or(EngineError::UnknownDeck(deck))
    }

    // ─────────────────────────────────────────────────────────────────────
    // State
    // ─────────────────────────────────────────────────────────────────────

    /// Snapshot every deck at the current engine time
    pub fn snapshot(&self) -> Vec<DeckSnapshot> {
        let mut out = Vec::with_capacity(self.decks.len());
        self.snapshot_into(&mut out);
        out
    }

    /// Like [`snapshot`](Self::snapshot), reusing `out`'s allocation
    pub fn snapshot_into(&self, out: &mut Vec<DeckSnapshot>) {
        out.clear();
        let now = self.clock.now();
        out.extend(self.decks.iter().map(|deck| lock(deck).snapshot(now)));
    }

    pub fn deck_state(&self, deck: usize) -> EngineResult<TransportState> {
        let slot = self.decks.get(deck).ok_or(EngineError::UnknownDeck(deck))?;
        Ok(lock(slot).state())
    }

    /// Node currently live on a deck
    pub fn live_source(&self, deck: usize) -> EngineResult<Option<NodeId>> {
        if deck >= self.decks.len() {
            return Err(EngineError::UnknownDeck(deck));
        }
        Ok(lock(&self.graph).live_source(deck))
    }

    /// Volume gain and crossfade gain last sent to a deck's chain
    pub fn channel_gains(&self, deck: usize) -> EngineResult<(f32, f32)> {
        let graph = lock(&self.graph);
        graph
            .gain(deck)
            .zip(graph.crossfade_gain(deck))
            .ok_or(EngineError::UnknownDeck(deck))
    }

    /// Apply natural ends of track reported since the last call
    ///
    /// Call this from the UI tick or a housekeeping timer. Returns the decks
    /// that moved to `Ended`.
    pub fn process_events(&self) -> Vec<DeckId> {
        let mut ended = Vec::new();
        for slot in &self.decks {
            let mut deck = lock(slot);
            let mut graph = lock(&self.graph);
            graph.collect_events();
            let now = self.clock.now();
            match deck.observe_end(&mut graph, now) {
                Ok(true) => ended.push(deck.id()),
                Ok(false) => {}
                Err(e) => log::warn!("process_events: {}: {}", deck.id(), e),
            }
        }
        ended
    }

    // ─────────────────────────────────────────────────────────────────────
    // Context lifecycle
    // ─────────────────────────────────────────────────────────────────────

    pub fn context_state(&self) -> ContextState {
        lock(&self.graph).state()
    }

    /// Halt rendering; decks keep their state
    pub fn suspend(&self) -> EngineResult<()> {
        lock(&self.graph).suspend()
    }

    pub fn resume(&self) -> EngineResult<()> {
        lock(&self.graph).resume()
    }

    /// Disconnect everything and close the graph for good
    ///
    /// Playing decks are frozen where they are and become `Paused`, even
    /// when the command queue is full.
    pub fn teardown(&self) {
        for slot in &self.decks {
            let mut deck = lock(slot);
            let mut graph = lock(&self.graph);
            let now = self.clock.now();
            deck.halt(&mut graph, now);
        }
        lock(&self.graph).teardown();
        log::info!("DeckEngine: torn down");
    }
}
