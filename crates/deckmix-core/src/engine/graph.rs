//! Control-side audio graph
//!
//! [`AudioGraph`] is the half of the graph the control plane talks to. It
//! mirrors what the renderer is doing (which node is live on each deck, the
//! last gain sent) and turns every change into a [`GraphCommand`]. The
//! mirror is updated only after a command was accepted by the queue, so it
//! never claims something the renderer won't do.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use rtrb::PushError;

use super::clock::EngineClock;
use super::command::{command_channel, event_channel, GraphCommand, GraphEvent, NodeId};
use super::mixer::{equal_power_gains, CrossfadeSide};
use super::render::{GraphRenderer, SourceVoice};
use crate::config::EngineConfig;
use crate::error::{EngineError, EngineResult, Unavailable};
use crate::pcm::PcmBuffer;

/// Lifecycle of the audio context
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum ContextState {
    Running,
    /// Rendering halted; playback can't start until resumed
    Suspended,
    /// Torn down for good
    Closed,
}

/// Control-side view of one deck's chain
#[derive(Debug)]
struct ChannelNodes {
    live_source: Option<NodeId>,
    /// Set when the renderer reported the live node ran off the end
    ended: Option<NodeId>,
    gain: f32,
    crossfade_gain: f32,
    side: CrossfadeSide,
}

/// Control-side half of the audio graph
pub struct AudioGraph {
    commands: rtrb::Producer<GraphCommand>,
    events: rtrb::Consumer<GraphEvent>,
    channels: Vec<ChannelNodes>,
    next_node: u64,
    sample_rate: u32,
    ramp_frames: u32,
    state: ContextState,
    shutdown: Arc<AtomicBool>,
}

impl AudioGraph {
    /// Build both halves of the graph
    ///
    /// Crossfade gains start at the configured crossfader position without a
    /// ramp; volume gains start at 1.0.
    pub fn new(config: &EngineConfig, clock: Arc<dyn EngineClock>) -> (Self, GraphRenderer) {
        let (command_tx, command_rx) = command_channel(config.command_queue_capacity);
        let (event_tx, event_rx) = event_channel();

        let gains = equal_power_gains(config.initial_crossfade);
        let channels: Vec<ChannelNodes> = (0..config.deck_count)
            .map(|deck| {
                let side = config.crossfade_side(deck);
                ChannelNodes {
                    live_source: None,
                    ended: None,
                    gain: 1.0,
                    crossfade_gain: side.gain(gains),
                    side,
                }
            })
            .collect();

        let crossfade_gains: Vec<f32> = channels.iter().map(|c| c.crossfade_gain).collect();
        let shutdown = Arc::new(AtomicBool::new(false));
        let renderer = GraphRenderer::new(
            command_rx,
            event_tx,
            &crossfade_gains,
            clock,
            config.sample_rate,
            shutdown.clone(),
        );

        let graph = Self {
            commands: command_tx,
            events: event_rx,
            channels,
            next_node: 1,
            sample_rate: config.sample_rate,
            ramp_frames: config.gain_ramp_frames(),
            state: ContextState::Running,
            shutdown,
        };
        (graph, renderer)
    }

    pub fn state(&self) -> ContextState {
        self.state
    }

    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Length of parameter ramps in seconds
    pub fn ramp_seconds(&self) -> f64 {
        self.ramp_frames as f64 / self.sample_rate as f64
    }

    /// Node currently playing on a deck, if any
    pub fn live_source(&self, deck: usize) -> Option<NodeId> {
        self.channels.get(deck).and_then(|c| c.live_source)
    }

    /// Last volume gain sent for a deck
    pub fn gain(&self, deck: usize) -> Option<f32> {
        self.channels.get(deck).map(|c| c.gain)
    }

    /// Last crossfade gain sent for a deck
    pub fn crossfade_gain(&self, deck: usize) -> Option<f32> {
        self.channels.get(deck).map(|c| c.crossfade_gain)
    }

    pub fn crossfade_side(&self, deck: usize) -> Option<CrossfadeSide> {
        self.channels.get(deck).map(|c| c.side)
    }

    /// Create and start a new single-use playback node on `deck`
    ///
    /// Any node still live on the deck is released first, so a deck never
    /// has two sources.
    pub fn create_playback_node(
        &mut self,
        deck: usize,
        pcm: &PcmBuffer,
        offset_seconds: f64,
        speed: f64,
    ) -> EngineResult<NodeId> {
        match self.state {
            ContextState::Running => {}
            ContextState::Suspended => return Err(Unavailable::Suspended.into()),
            ContextState::Closed => return Err(Unavailable::Closed.into()),
        }
        if deck >= self.channels.len() {
            return Err(EngineError::UnknownDeck(deck));
        }
        if self.channels[deck].live_source.is_some() {
            log::warn!("create_playback_node: deck {} still had a live node, releasing it", deck);
            self.release_playback_node(deck)?;
        }

        let node = NodeId(self.next_node);
        let voice = SourceVoice::new(node, pcm.clone(), offset_seconds, speed, self.sample_rate);
        self.push(GraphCommand::StartSource {
            deck,
            voice: Box::new(voice),
        })?;

        self.next_node += 1;
        let channel = &mut self.channels[deck];
        channel.live_source = Some(node);
        channel.ended = None;
        log::debug!(
            "create_playback_node: deck {} node {} at {:.3}s, speed {:.3}",
            deck,
            node.0,
            offset_seconds,
            speed
        );
        Ok(node)
    }

    /// Stop and forget the deck's live node, if any
    ///
    /// Safe to call repeatedly. If the command can't be queued the handle is
    /// kept, so the call can be retried.
    pub fn release_playback_node(&mut self, deck: usize) -> EngineResult<()> {
        let Some(node) = self.live_source(deck) else {
            return Ok(());
        };
        if self.state != ContextState::Closed {
            self.push(GraphCommand::StopSource { deck, node })?;
        }
        let channel = &mut self.channels[deck];
        channel.live_source = None;
        channel.ended = None;
        Ok(())
    }

    /// Ramp a deck's volume gain
    pub fn set_gain(&mut self, deck: usize, gain: f32) -> EngineResult<()> {
        self.ensure_open()?;
        if deck >= self.channels.len() {
            return Err(EngineError::UnknownDeck(deck));
        }
        self.push(GraphCommand::SetGain {
            deck,
            target: gain,
            ramp_frames: self.ramp_frames,
        })?;
        self.channels[deck].gain = gain;
        Ok(())
    }

    /// Ramp every deck's crossfade gain to match `(A, B)` gains
    ///
    /// All or nothing: if the queue can't take a command for every deck that
    /// changes, none is sent.
    pub fn set_crossfade_gains(&mut self, gains: (f32, f32)) -> EngineResult<()> {
        self.ensure_open()?;
        let changed = self
            .channels
            .iter()
            .filter(|c| c.side.gain(gains) != c.crossfade_gain)
            .count();
        if self.commands.slots() < changed {
            log::warn!(
                "AudioGraph: {} crossfade gains don't fit in {} free slots",
                changed,
                self.commands.slots()
            );
            return Err(Unavailable::QueueFull.into());
        }

        for deck in 0..self.channels.len() {
            let target = self.channels[deck].side.gain(gains);
            if target == self.channels[deck].crossfade_gain {
                continue;
            }
            self.push(GraphCommand::SetCrossfadeGain {
                deck,
                target,
                ramp_frames: self.ramp_frames,
            })?;
            self.channels[deck].crossfade_gain = target;
        }
        Ok(())
    }

    /// Move a deck to another crossfader side
    pub fn set_crossfade_side(
        &mut self,
        deck: usize,
        side: CrossfadeSide,
        gains: (f32, f32),
    ) -> EngineResult<()> {
        self.ensure_open()?;
        if deck >= self.channels.len() {
            return Err(EngineError::UnknownDeck(deck));
        }
        let target = side.gain(gains);
        self.push(GraphCommand::SetCrossfadeGain {
            deck,
            target,
            ramp_frames: self.ramp_frames,
        })?;
        let channel = &mut self.channels[deck];
        channel.side = side;
        channel.crossfade_gain = target;
        Ok(())
    }

    /// Ramp the speed of the deck's live node (no-op without one)
    pub fn set_playback_rate(&mut self, deck: usize, speed: f64) -> EngineResult<()> {
        self.ensure_open()?;
        let Some(node) = self.live_source(deck) else {
            return Ok(());
        };
        self.push(GraphCommand::SetPlaybackRate {
            deck,
            node,
            speed,
            ramp_frames: self.ramp_frames,
        })
    }

    /// Drain completion events from the renderer
    ///
    /// Only records them; each deck consumes its own with
    /// [`take_source_ended`](Self::take_source_ended). Events for nodes that
    /// were already released are dropped.
    pub fn collect_events(&mut self) {
        while let Ok(event) = self.events.pop() {
            match event {
                GraphEvent::SourceEnded { deck, node } => {
                    if let Some(channel) = self.channels.get_mut(deck) {
                        if channel.live_source == Some(node) {
                            channel.ended = Some(node);
                        }
                    }
                }
            }
        }
    }

    /// Whether the deck's live node has ended; clears the handle if so
    pub fn take_source_ended(&mut self, deck: usize) -> bool {
        let Some(channel) = self.channels.get_mut(deck) else {
            return false;
        };
        match channel.ended.take() {
            Some(node) if channel.live_source == Some(node) => {
                channel.live_source = None;
                true
            }
            _ => false,
        }
    }

    /// Halt rendering and the engine clock
    pub fn suspend(&mut self) -> EngineResult<()> {
        match self.state {
            ContextState::Running => {
                self.push(GraphCommand::SetSuspended(true))?;
                self.state = ContextState::Suspended;
                log::info!("AudioGraph: suspended");
                Ok(())
            }
            ContextState::Suspended => Ok(()),
            ContextState::Closed => Err(Unavailable::Closed.into()),
        }
    }

    pub fn resume(&mut self) -> EngineResult<()> {
        match self.state {
            ContextState::Suspended => {
                self.push(GraphCommand::SetSuspended(false))?;
                self.state = ContextState::Running;
                log::info!("AudioGraph: resumed");
                Ok(())
            }
            ContextState::Running => Ok(()),
            ContextState::Closed => Err(Unavailable::Closed.into()),
        }
    }

    /// Disconnect everything and close the context
    ///
    /// Sources go first, then gains, then crossfade gains. Idempotent. The
    /// renderer also watches a shutdown flag, so it goes silent on its next
    /// block even when the queue is full.
    pub fn teardown(&mut self) {
        if self.state == ContextState::Closed {
            return;
        }
        self.shutdown.store(true, Ordering::Release);
        if let Err(e) = self.push(GraphCommand::DisconnectAll) {
            log::warn!("AudioGraph: DisconnectAll not queued, relying on shutdown flag: {}", e);
        }
        for channel in &mut self.channels {
            channel.live_source = None;
            channel.ended = None;
        }
        for channel in &mut self.channels {
            channel.gain = 0.0;
        }
        for channel in &mut self.channels {
            channel.crossfade_gain = 0.0;
        }
        self.state = ContextState::Closed;
        log::info!("AudioGraph: closed");
    }

    fn ensure_open(&self) -> EngineResult<()> {
        if self.state == ContextState::Closed {
            return Err(Unavailable::Closed.into());
        }
        Ok(())
    }

    fn push(&mut self, command: GraphCommand) -> EngineResult<()> {
        match self.commands.push(command) {
            Ok(()) => Ok(()),
            Err(PushError::Full(_)) => {
                log::warn!("AudioGraph: command queue full, render thread not draining");
                Err(Unavailable::QueueFull.into())
            }
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::ManualClock;
    use crate::types::{StereoBuffer, StereoSample};

    fn graph(config: EngineConfig) -> (AudioGraph, GraphRenderer) {
        AudioGraph::new(&config, Arc::new(ManualClock::default()))
    }

    fn pcm() -> PcmBuffer {
        PcmBuffer::from_stereo(StereoBuffer::from_vec(vec![StereoSample::mono(0.5); 4800]), 48000)
            .unwrap()
    }

    #[test]
    fn test_node_ids_are_never_reused() {
        let (mut graph, _renderer) = graph(EngineConfig::default());
        let pcm = pcm();

        let first = graph.create_playback_node(0, &pcm, 0.0, 1.0).unwrap();
        graph.release_playback_node(0).unwrap();
        let second = graph.create_playback_node(0, &pcm, 0.0, 1.0).unwrap();

        assert_ne!(first, second);
        assert_eq!(graph.live_source(0), Some(second));
    }

    #[test]
    fn test_release_is_idempotent() {
        let (mut graph, _renderer) = graph(EngineConfig::default());
        graph.create_playback_node(1, &pcm(), 0.0, 1.0).unwrap();

        graph.release_playback_node(1).unwrap();
        graph.release_playback_node(1).unwrap();
        assert_eq!(graph.live_source(1), None);
    }

    #[test]
    fn test_full_queue_keeps_handle() {
        let config = EngineConfig {
            command_queue_capacity: 1,
            ..Default::default()
        };
        let (mut graph, _renderer) = graph(config);
        let node = graph.create_playback_node(0, &pcm(), 0.0, 1.0).unwrap();

        assert_eq!(
            graph.release_playback_node(0),
            Err(EngineError::EngineUnavailable(Unavailable::QueueFull))
        );
        assert_eq!(graph.live_source(0), Some(node));
    }

    #[test]
    fn test_suspended_refuses_new_nodes() {
        let (mut graph, _renderer) = graph(EngineConfig::default());
        graph.suspend().unwrap();

        assert_eq!(
            graph.create_playback_node(0, &pcm(), 0.0, 1.0),
            Err(EngineError::EngineUnavailable(Unavailable::Suspended))
        );
        graph.resume().unwrap();
        assert!(graph.create_playback_node(0, &pcm(), 0.0, 1.0).is_ok());
    }

    #[test]
    fn test_ended_event_only_marks_its_deck() {
        let (mut graph, mut renderer) = graph(EngineConfig::default());
        let short = PcmBuffer::from_stereo(StereoBuffer::silence(16), 48000).unwrap();
        graph.create_playback_node(0, &short, 0.0, 1.0).unwrap();
        graph.create_playback_node(1, &pcm(), 0.0, 1.0).unwrap();

        let mut out = StereoBuffer::silence(64);
        renderer.process(&mut out);
        graph.collect_events();

        assert!(graph.take_source_ended(0));
        assert!(!graph.take_source_ended(0));
        assert!(!graph.take_source_ended(1));
        assert_eq!(graph.live_source(0), None);
        assert!(graph.live_source(1).is_some());
    }

    #[test]
    fn test_stale_end_event_is_ignored() {
        let (mut graph, mut renderer) = graph(EngineConfig::default());
        let short = PcmBuffer::from_stereo(StereoBuffer::silence(16), 48000).unwrap();
        graph.create_playback_node(0, &short, 0.0, 1.0).unwrap();

        let mut out = StereoBuffer::silence(64);
        renderer.process(&mut out);

        // Replaced before the event was collected
        graph.release_playback_node(0).unwrap();
        let fresh = graph.create_playback_node(0, &pcm(), 0.0, 1.0).unwrap();
        graph.collect_events();

        assert!(!graph.take_source_ended(0));
        assert_eq!(graph.live_source(0), Some(fresh));
    }

    #[test]
    fn test_crossfade_sides() {
        let config = EngineConfig {
            deck_count: 3,
            ..Default::default()
        };
        let (mut graph, _renderer) = graph(config);

        graph.set_crossfade_gains(equal_power_gains(0.0)).unwrap();
        assert!((graph.crossfade_gain(0).unwrap() - 1.0).abs() < 1e-6);
        assert!(graph.crossfade_gain(1).unwrap() < 1e-6);
        assert_eq!(graph.crossfade_gain(2), Some(1.0));

        graph
            .set_crossfade_side(1, CrossfadeSide::Thru, equal_power_gains(0.0))
            .unwrap();
        assert_eq!(graph.crossfade_gain(1), Some(1.0));
        assert_eq!(graph.crossfade_side(1), Some(CrossfadeSide::Thru));
    }

    #[test]
    fn test_teardown_closes_everything() {
        let (mut graph, _renderer) = graph(EngineConfig::default());
        graph.create_playback_node(0, &pcm(), 0.0, 1.0).unwrap();

        graph.teardown();
        graph.teardown();

        assert_eq!(graph.state(), ContextState::Closed);
        assert_eq!(graph.live_source(0), None);
        assert_eq!(graph.gain(0), Some(0.0));
        assert_eq!(
            graph.set_gain(0, 1.0),
            Err(EngineError::EngineUnavailable(Unavailable::Closed))
        );
        assert_eq!(
            graph.resume(),
            Err(EngineError::EngineUnavailable(Unavailable::Closed))
        );
    }

    #[test]
    fn test_crossfade_gains_all_or_nothing() {
        let config = EngineConfig {
            command_queue_capacity: 2,
            ..Default::default()
        };
        let (mut graph, mut renderer) = graph(config);
        let before = (graph.crossfade_gain(0), graph.crossfade_gain(1));
        graph.set_gain(0, 0.5).unwrap();

        // Both decks change but only one slot is free
        assert_eq!(
            graph.set_crossfade_gains(equal_power_gains(0.0)),
            Err(EngineError::EngineUnavailable(Unavailable::QueueFull))
        );
        assert_eq!((graph.crossfade_gain(0), graph.crossfade_gain(1)), before);

        let mut out = StereoBuffer::silence(8);
        renderer.process(&mut out);
        let (_, b) = renderer.channel_gains(1).unwrap();
        assert!((b - before.1.unwrap()).abs() < 1e-6);

        graph.set_crossfade_gains(equal_power_gains(0.0)).unwrap();
        assert!((graph.crossfade_gain(0).unwrap() - 1.0).abs() < 1e-6);
        assert!(graph.crossfade_gain(1).unwrap() < 1e-6);
    }

    #[test]
    fn test_teardown_with_full_queue_still_silences() {
        let config = EngineConfig {
            command_queue_capacity: 1,
            ..Default::default()
        };
        let (mut graph, mut renderer) = graph(config);
        graph.create_playback_node(0, &pcm(), 0.0, 1.0).unwrap();

        graph.teardown();
        assert_eq!(graph.state(), ContextState::Closed);

        let mut out = StereoBuffer::silence(64);
        renderer.process(&mut out);
        assert_eq!(renderer.active_sources(), 0);
        assert_eq!(out.peak(), 0.0);
    }
}
