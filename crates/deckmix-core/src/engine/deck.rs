//! Deck - transport state machine for one track slot
//!
//! A deck owns its track buffer, its transport state and its timing anchors.
//! Everything that reaches the render path goes through the [`AudioGraph`]
//! passed into each operation; the deck itself never touches audio.
//!
//! ```text
//!            load            play              pause
//!   Empty ─────────► Loading ───► Ready ───────► Playing ◄──────► Paused
//!     ▲                 │           ▲              │  ▲ seek         │
//!     └── decode error ─┘           └──── stop ────┤  └── Seeking    │
//!                                                  ▼                 │
//!                                                Ended ◄─────────────┘
//! ```

use super::clock::DeckTiming;
use super::engine::DeckSnapshot;
use super::graph::AudioGraph;
use crate::config::EngineConfig;
use crate::error::{DecodeError, EngineError, EngineResult};
use crate::pcm::PcmBuffer;
use crate::types::{DeckId, TransportState};

/// Proof that a load was started, used to complete it
///
/// Each `begin_load` bumps the deck's load generation. Completing with a
/// ticket from an older generation does nothing, so when loads overlap the
/// last one requested always wins.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadTicket {
    deck: DeckId,
    generation: u64,
}

impl LoadTicket {
    pub fn deck(&self) -> DeckId {
        self.deck
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }
}

/// What happened to a completed load
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum LoadOutcome {
    /// The track is now on the deck
    Applied,
    /// A newer load started in the meantime; the result was discarded
    Superseded,
}

/// One deck
pub struct Deck {
    id: DeckId,
    track: Option<PcmBuffer>,
    state: TransportState,
    volume: f32,
    timing: DeckTiming,
    config: EngineConfig,
    load_generation: u64,
    /// A speed change the renderer hasn't received yet
    rate_pending: bool,
}

impl Deck {
    pub fn new(id: DeckId, config: &EngineConfig) -> Self {
        Self {
            id,
            track: None,
            state: TransportState::Empty,
            volume: 1.0,
            timing: DeckTiming::default(),
            config: config.clone(),
            load_generation: 0,
            rate_pending: false,
        }
    }

    pub fn id(&self) -> DeckId {
        self.id
    }

    pub fn state(&self) -> TransportState {
        self.state
    }

    pub fn volume(&self) -> f32 {
        self.volume
    }

    /// Target playback speed
    pub fn speed(&self) -> f64 {
        self.timing.speed
    }

    /// Track duration in seconds (0 when nothing is loaded)
    pub fn duration(&self) -> f64 {
        self.timing.duration
    }

    pub fn track(&self) -> Option<&PcmBuffer> {
        self.track.as_ref()
    }

    pub fn timing(&self) -> &DeckTiming {
        &self.timing
    }

    /// Playback position at engine time `now`
    pub fn position(&self, now: f64) -> f64 {
        self.timing.position(now)
    }

    /// Invalidate the current track and start a new load
    ///
    /// Stops any playback. From here until the load completes the deck is
    /// `Loading` and transport operations report `NoTrackLoaded`.
    pub fn begin_load(&mut self, graph: &mut AudioGraph) -> EngineResult<LoadTicket> {
        graph.release_playback_node(self.id.index())?;

        self.load_generation += 1;
        self.track = None;
        self.timing = DeckTiming {
            speed: self.timing.speed,
            ramp_from_speed: self.timing.speed,
            ..Default::default()
        };
        self.state = TransportState::Loading;

        log::debug!("{}: load #{} started", self.id, self.load_generation);
        Ok(LoadTicket {
            deck: self.id,
            generation: self.load_generation,
        })
    }

    /// Finish a load started with [`begin_load`](Self::begin_load)
    ///
    /// A superseded ticket is ignored whatever its result. Otherwise a decoded
    /// buffer leaves the deck `Ready` at 0.0, and a decode error leaves it
    /// `Empty` and is returned.
    pub fn complete_load(
        &mut self,
        ticket: LoadTicket,
        result: Result<PcmBuffer, DecodeError>,
    ) -> EngineResult<LoadOutcome> {
        if ticket.deck != self.id
            || ticket.generation != self.load_generation
            || self.state != TransportState::Loading
        {
            log::debug!(
                "{}: load #{} superseded by #{}",
                self.id,
                ticket.generation,
                self.load_generation
            );
            return Ok(LoadOutcome::Superseded);
        }

        match result {
            Ok(pcm) => {
                self.timing.duration = pcm.duration_seconds();
                self.timing.freeze_at(0.0);
                log::info!(
                    "{}: loaded {:.2}s at {}Hz",
                    self.id,
                    self.timing.duration,
                    pcm.sample_rate()
                );
                self.track = Some(pcm);
                self.state = TransportState::Ready;
                Ok(LoadOutcome::Applied)
            }
            Err(e) => {
                log::warn!("{}: load failed: {}", self.id, e);
                self.state = TransportState::Empty;
                Err(EngineError::Decode(e))
            }
        }
    }

    /// Load an already decoded buffer in one step
    pub fn load(&mut self, graph: &mut AudioGraph, pcm: PcmBuffer) -> EngineResult<()> {
        let ticket = self.begin_load(graph)?;
        self.complete_load(ticket, Ok(pcm)).map(|_| ())
    }

    /// Apply a natural end of track if one happened
    ///
    /// Ends are noticed either through the renderer's completion event or by
    /// the position model reaching the duration, whichever comes first.
    /// Returns true if the deck moved to `Ended`. A deck that keeps playing
    /// gets any volume or speed the renderer missed resent.
    pub fn observe_end(&mut self, graph: &mut AudioGraph, now: f64) -> EngineResult<bool> {
        if self.state != TransportState::Playing {
            return Ok(false);
        }
        let node_ended = graph.take_source_ended(self.id.index());
        if !node_ended && !self.timing.reached_end(now) {
            self.resync(graph);
            return Ok(false);
        }

        graph.release_playback_node(self.id.index())?;
        self.timing.freeze_at(self.timing.duration);
        self.state = TransportState::Ended;
        log::debug!("{}: reached end of track", self.id);
        Ok(true)
    }

    /// Start playback from the current position
    ///
    /// Already playing is a no-op. Playing from the end restarts at 0.0.
    pub fn play(&mut self, graph: &mut AudioGraph, now: f64) -> EngineResult<()> {
        self.observe_end(graph, now)?;

        match self.state {
            TransportState::Playing => Ok(()),
            TransportState::Empty | TransportState::Loading => Err(EngineError::NoTrackLoaded(self.id)),
            TransportState::Ended => {
                self.timing.freeze_at(0.0);
                self.start(graph, now)
            }
            TransportState::Ready | TransportState::Paused | TransportState::Seeking => {
                if self.timing.position_anchor >= self.timing.duration {
                    self.timing.freeze_at(0.0);
                }
                self.start(graph, now)
            }
        }
    }

    /// Pause at the current position (no-op unless playing)
    pub fn pause(&mut self, graph: &mut AudioGraph, now: f64) -> EngineResult<()> {
        self.observe_end(graph, now)?;
        if self.state != TransportState::Playing {
            return Ok(());
        }

        let position = self.timing.position(now);
        graph.release_playback_node(self.id.index())?;
        self.timing.freeze_at(position);
        self.state = TransportState::Paused;
        log::debug!("{}: paused at {:.3}s", self.id, position);
        Ok(())
    }

    /// Move the playhead to `target` seconds (clamped into the track)
    ///
    /// A playing deck keeps playing from the new position. A paused or ready
    /// deck just moves. An ended deck moves and becomes paused.
    pub fn seek(&mut self, graph: &mut AudioGraph, target: f64, now: f64) -> EngineResult<()> {
        self.observe_end(graph, now)?;

        match self.state {
            TransportState::Empty | TransportState::Loading => Err(EngineError::NoTrackLoaded(self.id)),
            TransportState::Playing => {
                graph.release_playback_node(self.id.index())?;
                self.state = TransportState::Seeking;
                self.timing.freeze_at(target);

                if let Err(e) = self.start(graph, now) {
                    self.state = TransportState::Paused;
                    return Err(e);
                }
                Ok(())
            }
            TransportState::Ended => {
                self.timing.freeze_at(target);
                self.state = TransportState::Paused;
                Ok(())
            }
            TransportState::Ready | TransportState::Paused | TransportState::Seeking => {
                self.timing.freeze_at(target);
                Ok(())
            }
        }
    }

    /// Stop playback and rewind to 0.0
    pub fn stop(&mut self, graph: &mut AudioGraph, now: f64) -> EngineResult<()> {
        self.observe_end(graph, now)?;
        if !self.state.has_track() {
            return Err(EngineError::NoTrackLoaded(self.id));
        }

        graph.release_playback_node(self.id.index())?;
        self.timing.freeze_at(0.0);
        self.state = TransportState::Ready;
        Ok(())
    }

    /// Freeze the deck for teardown
    ///
    /// A playing deck ends up `Paused` at its current position even if the
    /// graph can't take the stop command.
    pub fn halt(&mut self, graph: &mut AudioGraph, now: f64) {
        if let Err(e) = self.pause(graph, now) {
            log::warn!("{}: halting without stopping the node: {}", self.id, e);
        }
        if self.state == TransportState::Playing {
            let position = self.timing.position(now);
            self.timing.freeze_at(position);
            self.state = TransportState::Paused;
        }
        self.rate_pending = false;
    }

    /// Set the deck volume (clamped to 0..=1)
    ///
    /// Ramped in immediately while playing; otherwise applied on the next
    /// play. The value is kept even if the graph can't take it right now.
    pub fn set_volume(&mut self, graph: &mut AudioGraph, volume: f32) -> EngineResult<()> {
        if volume.is_nan() {
            return Ok(());
        }
        self.volume = volume.clamp(0.0, 1.0);
        if self.state == TransportState::Playing {
            if let Err(e) = graph.set_gain(self.id.index(), self.volume) {
                log::warn!("{}: volume {:.2} deferred: {}", self.id, self.volume, e);
            }
        }
        Ok(())
    }

    /// Set the playback speed (clamped to the configured range)
    ///
    /// While playing the change is ramped and position tracking follows the
    /// ramp. Otherwise it applies on the next play. The value is kept even if
    /// the graph can't take it right now.
    pub fn set_speed(&mut self, graph: &mut AudioGraph, speed: f64, now: f64) -> EngineResult<()> {
        let speed = self.config.clamp_speed(speed);
        if let Err(e) = self.observe_end(graph, now) {
            log::warn!("{}: end of track not applied: {}", self.id, e);
        }

        if self.state == TransportState::Playing {
            self.timing.rebase_speed(now, speed, graph.ramp_seconds());
            if let Err(e) = graph.set_playback_rate(self.id.index(), speed) {
                log::warn!("{}: speed {:.3} deferred: {}", self.id, speed, e);
                self.rate_pending = true;
            } else {
                self.rate_pending = false;
            }
        } else {
            self.timing.speed = speed;
            self.timing.ramp_from_speed = speed;
        }
        Ok(())
    }

    /// Read-only view at engine time `now`
    pub fn snapshot(&self, now: f64) -> DeckSnapshot {
        let position = self.timing.position(now);
        DeckSnapshot {
            deck_id: self.id,
            state: self.state,
            position_seconds: position,
            duration_seconds: self.timing.duration,
            is_playing: self.state == TransportState::Playing && position < self.timing.duration,
            volume: self.volume,
            speed: self.timing.speed,
        }
    }

    fn start(&mut self, graph: &mut AudioGraph, now: f64) -> EngineResult<()> {
        let track = self.track.as_ref().ok_or(EngineError::NoTrackLoaded(self.id))?;
        let deck = self.id.index();

        if graph.gain(deck) != Some(self.volume) {
            graph.set_gain(deck, self.volume)?;
        }
        graph.create_playback_node(deck, track, self.timing.position_anchor, self.timing.speed)?;

        self.timing.start(now);
        self.state = TransportState::Playing;
        self.rate_pending = false;
        log::debug!("{}: playing from {:.3}s", self.id, self.timing.position_anchor);
        Ok(())
    }

    /// Resend volume and speed the renderer missed while the queue was full
    fn resync(&mut self, graph: &mut AudioGraph) {
        let deck = self.id.index();
        if graph.gain(deck) != Some(self.volume) && graph.set_gain(deck, self.volume).is_err() {
            return;
        }
        if self.rate_pending && graph.set_playback_rate(deck, self.timing.speed).is_ok() {
            self.rate_pending = false;
        }
    }
}
