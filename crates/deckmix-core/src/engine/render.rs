//! Render path - produces master output on the audio thread
//!
//! Each deck has a persistent chain `source → gain → crossfade gain` summed
//! into the master bus. Only the source is replaced over time: a
//! [`SourceVoice`] starts once, plays forward, and is discarded when stopped
//! or when it runs off the end of its buffer.
//!
//! The renderer owns all of this state exclusively. It learns about changes
//! only through the command queue, and reports node completion through the
//! event queue. It never locks, logs or allocates while rendering.

use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::Arc;

use super::clock::EngineClock;
use super::command::{GraphCommand, GraphEvent, NodeId};
use crate::pcm::PcmBuffer;
use crate::types::{Sample, StereoBuffer, StereoSample};

/// Largest block rendered in one pass; bigger host buffers are split
pub const MAX_BUFFER_SIZE: usize = 8192;

/// A parameter that moves linearly towards its target, one frame at a time
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct LinearRamp {
    current: f64,
    target: f64,
    step: f64,
    remaining: u32,
}

impl LinearRamp {
    pub fn new(value: f64) -> Self {
        Self {
            current: value,
            target: value,
            step: 0.0,
            remaining: 0,
        }
    }

    /// Ramp to `target` over `frames` frames (0 = jump)
    pub fn set_target(&mut self, target: f64, frames: u32) {
        self.target = target;
        if frames == 0 {
            self.current = target;
            self.step = 0.0;
            self.remaining = 0;
        } else {
            self.step = (target - self.current) / frames as f64;
            self.remaining = frames;
        }
    }

    /// Advance one frame and return the value for that frame
    #[inline]
    pub fn next_value(&mut self) -> f64 {
        if self.remaining > 0 {
            self.remaining -= 1;
            self.current = if self.remaining == 0 {
                self.target
            } else {
                self.current + self.step
            };
        }
        self.current
    }

    #[inline]
    pub fn value(&self) -> f64 {
        self.current
    }

    #[inline]
    pub fn target(&self) -> f64 {
        self.target
    }

    #[inline]
    pub fn is_ramping(&self) -> bool {
        self.remaining > 0
    }
}

/// Lifecycle of a playback node; only ever moves forward
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum VoiceState {
    Scheduled,
    Playing,
    Finished,
}

/// Single-use playback node
///
/// Bound to one buffer and one start offset at creation. It is started the
/// first time it renders and can never be restarted or rewound; replaying
/// or repositioning always means creating a new voice.
pub struct SourceVoice {
    node: NodeId,
    pcm: PcmBuffer,
    /// Read position in source frames
    position: f64,
    /// Source frames per output frame at speed 1.0
    rate_scale: f64,
    speed: LinearRamp,
    state: VoiceState,
}

impl SourceVoice {
    pub(crate) fn new(
        node: NodeId,
        pcm: PcmBuffer,
        start_seconds: f64,
        speed: f64,
        engine_sample_rate: u32,
    ) -> Self {
        let position = (start_seconds.max(0.0) * pcm.sample_rate() as f64).min(pcm.frames() as f64);
        let rate_scale = pcm.sample_rate() as f64 / engine_sample_rate.max(1) as f64;
        Self {
            node,
            pcm,
            position,
            rate_scale,
            speed: LinearRamp::new(speed),
            state: VoiceState::Scheduled,
        }
    }

    pub fn node(&self) -> NodeId {
        self.node
    }

    pub fn is_finished(&self) -> bool {
        self.state == VoiceState::Finished
    }

    /// Current read position in seconds
    pub fn position_seconds(&self) -> f64 {
        self.position / self.pcm.sample_rate() as f64
    }

    fn set_speed(&mut self, speed: f64, ramp_frames: u32) {
        self.speed.set_target(speed, ramp_frames);
    }

    fn stop(&mut self) {
        self.state = VoiceState::Finished;
    }

    /// Render into `out` (overwriting it)
    ///
    /// Returns true if the voice ran off the end of its buffer during this
    /// block. The remainder of the block is silence.
    fn render(&mut self, out: &mut [StereoSample]) -> bool {
        match self.state {
            VoiceState::Finished => {
                out.fill(StereoSample::silence());
                return false;
            }
            VoiceState::Scheduled => self.state = VoiceState::Playing,
            VoiceState::Playing => {}
        }

        let frames = self.pcm.frames() as f64;
        for i in 0..out.len() {
            if self.position >= frames {
                self.state = VoiceState::Finished;
                out[i..].fill(StereoSample::silence());
                return true;
            }

            let index = self.position as usize;
            let frac = (self.position - index as f64) as Sample;
            let a = self.pcm.frame(index);
            out[i] = if frac > 0.0 {
                a.lerp(&self.pcm.frame(index + 1), frac)
            } else {
                a
            };

            self.position += self.speed.next_value() * self.rate_scale;
        }

        if self.position >= frames {
            self.state = VoiceState::Finished;
            return true;
        }
        false
    }
}

/// Persistent per-deck chain: source slot, volume gain, crossfade gain
struct ChannelChain {
    source: Option<Box<SourceVoice>>,
    gain: LinearRamp,
    crossfade: LinearRamp,
    scratch: StereoBuffer,
}

impl ChannelChain {
    fn new(crossfade_gain: f32) -> Self {
        let mut scratch = StereoBuffer::silence(MAX_BUFFER_SIZE);
        scratch.set_len_from_capacity(0);
        Self {
            source: None,
            gain: LinearRamp::new(1.0),
            crossfade: LinearRamp::new(crossfade_gain as f64),
            scratch,
        }
    }
}

/// Render-side half of the audio graph
///
/// Owned by the audio callback (or an offline render loop). Call
/// [`process`](Self::process) once per block.
pub struct GraphRenderer {
    commands: rtrb::Consumer<GraphCommand>,
    events: rtrb::Producer<GraphEvent>,
    channels: Vec<ChannelChain>,
    clock: Arc<dyn EngineClock>,
    sample_rate: u32,
    suspended: bool,
    closed: bool,
    /// Raised by the control side on teardown, even if `DisconnectAll`
    /// couldn't be queued
    shutdown: Arc<AtomicBool>,
    /// Pre-allocated block for interleaved rendering
    block: StereoBuffer,
}

impl GraphRenderer {
    pub(crate) fn new(
        commands: rtrb::Consumer<GraphCommand>,
        events: rtrb::Producer<GraphEvent>,
        crossfade_gains: &[f32],
        clock: Arc<dyn EngineClock>,
        sample_rate: u32,
        shutdown: Arc<AtomicBool>,
    ) -> Self {
        let mut block = StereoBuffer::silence(MAX_BUFFER_SIZE);
        block.set_len_from_capacity(0);
        Self {
            commands,
            events,
            channels: crossfade_gains.iter().map(|&g| ChannelChain::new(g)).collect(),
            clock,
            sample_rate,
            suspended: false,
            closed: false,
            shutdown,
            block,
        }
    }

    /// Engine sample rate the renderer was built for
    pub fn sample_rate(&self) -> u32 {
        self.sample_rate
    }

    /// Whether a deck currently has a playing source node
    pub fn has_active_source(&self, deck: usize) -> bool {
        self.channels
            .get(deck)
            .and_then(|c| c.source.as_ref())
            .is_some_and(|v| !v.is_finished())
    }

    /// Number of decks with a playing source node
    pub fn active_sources(&self) -> usize {
        (0..self.channels.len())
            .filter(|&deck| self.has_active_source(deck))
            .count()
    }

    /// Current (ramped) volume gain and crossfade gain of a deck
    pub fn channel_gains(&self, deck: usize) -> Option<(f32, f32)> {
        self.channels
            .get(deck)
            .map(|c| (c.gain.value() as f32, c.crossfade.value() as f32))
    }

    /// Render one buffer of master output
    ///
    /// Pending commands are applied first. While suspended or after teardown
    /// the output is silence and the engine clock doesn't move.
    pub fn process(&mut self, master_out: &mut StereoBuffer) {
        for chunk in master_out.as_mut_slice().chunks_mut(MAX_BUFFER_SIZE) {
            self.render_block(chunk);
        }
    }

    /// Render into an interleaved device buffer with `channels` channels
    ///
    /// Left/right go to the first two channels; extra channels get silence,
    /// as does a trailing partial frame.
    pub fn render_interleaved(&mut self, data: &mut [f32], channels: usize) {
        let channels = channels.max(1);
        let whole = data.len() - data.len() % channels;
        let (data, partial) = data.split_at_mut(whole);
        let mut block = std::mem::take(&mut self.block);

        for frames in data.chunks_mut(MAX_BUFFER_SIZE * channels) {
            let n_frames = frames.len() / channels;
            block.set_len_from_capacity(n_frames);
            self.render_block(block.as_mut_slice());

            if channels == 2 {
                frames.copy_from_slice(block.as_interleaved());
                continue;
            }
            for (frame, sample) in frames.chunks_mut(channels).zip(block.iter()) {
                frame[0] = sample.left;
                if channels > 1 {
                    frame[1] = sample.right;
                }
                for ch in frame.iter_mut().skip(2) {
                    *ch = 0.0;
                }
            }
        }

        partial.fill(0.0);
        self.block = block;
    }

    fn render_block(&mut self, out: &mut [StereoSample]) {
        self.apply_commands();
        if !self.closed && self.shutdown.load(Ordering::Acquire) {
            self.disconnect_all();
        }
        out.fill(StereoSample::silence());

        if self.suspended || self.closed {
            return;
        }

        let n_frames = out.len();
        for (deck, channel) in self.channels.iter_mut().enumerate() {
            channel.scratch.set_len_from_capacity(n_frames);
            let scratch = channel.scratch.as_mut_slice();

            let ended = match channel.source.as_mut() {
                Some(voice) => voice.render(scratch).then(|| voice.node()),
                None => {
                    scratch.fill(StereoSample::silence());
                    None
                }
            };

            if let Some(node) = ended {
                // Dropping the voice defers freeing its buffer to the GC thread
                channel.source = None;
                // A full queue only loses the notification; the control plane
                // also detects the end from the clock.
                let _ = self.events.push(GraphEvent::SourceEnded { deck, node });
            }

            // Params keep ramping even while the deck is silent
            for (dst, src) in out.iter_mut().zip(scratch.iter()) {
                let gain = channel.gain.next_value() * channel.crossfade.next_value();
                *dst += *src * gain as Sample;
            }
        }

        self.clock.advance(n_frames as u64);
    }

    fn apply_commands(&mut self) {
        while let Ok(command) = self.commands.pop() {
            match command {
                GraphCommand::StartSource { deck, voice } => {
                    if self.closed {
                        continue;
                    }
                    if let Some(channel) = self.channels.get_mut(deck) {
                        debug_assert!(
                            channel.source.as_ref().map_or(true, |v| v.is_finished()),
                            "StartSource while another node is live on deck {}",
                            deck
                        );
                        channel.source = Some(voice);
                    }
                }
                GraphCommand::StopSource { deck, node } => {
                    if let Some(channel) = self.channels.get_mut(deck) {
                        if channel.source.as_ref().is_some_and(|v| v.node() == node) {
                            if let Some(mut voice) = channel.source.take() {
                                voice.stop();
                            }
                        }
                    }
                }
                GraphCommand::SetGain { deck, target, ramp_frames } => {
                    if let Some(channel) = self.channels.get_mut(deck) {
                        channel.gain.set_target(target as f64, ramp_frames);
                    }
                }
                GraphCommand::SetCrossfadeGain { deck, target, ramp_frames } => {
                    if let Some(channel) = self.channels.get_mut(deck) {
                        channel.crossfade.set_target(target as f64, ramp_frames);
                    }
                }
                GraphCommand::SetPlaybackRate { deck, node, speed, ramp_frames } => {
                    if let Some(voice) = self
                        .channels
                        .get_mut(deck)
                        .and_then(|c| c.source.as_mut())
                        .filter(|v| v.node() == node)
                    {
                        voice.set_speed(speed, ramp_frames);
                    }
                }
                GraphCommand::SetSuspended(suspended) => {
                    self.suspended = suspended;
                }
                GraphCommand::DisconnectAll => self.disconnect_all(),
            }
        }
    }

    /// Sources first, then gains, then crossfade gains
    fn disconnect_all(&mut self) {
        for channel in &mut self.channels {
            channel.source = None;
        }
        for channel in &mut self.channels {
            channel.gain.set_target(0.0, 0);
        }
        for channel in &mut self.channels {
            channel.crossfade.set_target(0.0, 0);
        }
        self.closed = true;
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::engine::clock::FrameClock;
    use crate::engine::command::{command_channel, event_channel};

    struct Harness {
        tx: rtrb::Producer<GraphCommand>,
        events: rtrb::Consumer<GraphEvent>,
        clock: Arc<FrameClock>,
        shutdown: Arc<AtomicBool>,
        renderer: GraphRenderer,
    }

    fn harness(decks: usize) -> Harness {
        let (tx, rx) = command_channel(64);
        let (event_tx, events) = event_channel();
        let clock = Arc::new(FrameClock::new(1000));
        let shutdown = Arc::new(AtomicBool::new(false));
        let renderer = GraphRenderer::new(
            rx,
            event_tx,
            &vec![1.0; decks],
            clock.clone(),
            1000,
            shutdown.clone(),
        );
        Harness { tx, events, clock, shutdown, renderer }
    }

    /// Ramp 0..n-1 scaled to 0.0..1.0 at 1kHz
    fn ramp_pcm(frames: usize) -> PcmBuffer {
        let samples = (0..frames)
            .map(|i| StereoSample::mono(i as f32 / frames as f32))
            .collect();
        PcmBuffer::from_stereo(StereoBuffer::from_vec(samples), 1000).unwrap()
    }

    fn voice(node: u64, pcm: &PcmBuffer, start: f64, speed: f64) -> Box<SourceVoice> {
        Box::new(SourceVoice::new(NodeId(node), pcm.clone(), start, speed, 1000))
    }

    #[test]
    fn test_linear_ramp() {
        let mut ramp = LinearRamp::new(0.0);
        ramp.set_target(1.0, 4);
        assert!(ramp.is_ramping());
        let values: Vec<f64> = (0..5).map(|_| ramp.next_value()).collect();
        assert!((values[0] - 0.25).abs() < 1e-12);
        assert!((values[1] - 0.5).abs() < 1e-12);
        assert_eq!(values[3], 1.0);
        assert_eq!(values[4], 1.0);
        assert!(!ramp.is_ramping());

        ramp.set_target(0.2, 0);
        assert_eq!(ramp.value(), 0.2);
    }

    #[test]
    fn test_voice_plays_from_offset() {
        let mut h = harness(1);
        let pcm = ramp_pcm(100);
        h.tx.push(GraphCommand::StartSource { deck: 0, voice: voice(1, &pcm, 0.05, 1.0) }).ok();

        let mut out = StereoBuffer::silence(4);
        h.renderer.process(&mut out);

        assert!((out[0].left - 0.05).abs() < 1e-6);
        assert!((out[3].left - 0.08).abs() < 1e-6);
        assert!(h.renderer.has_active_source(0));
        assert!((h.clock.now() - 0.004).abs() < 1e-12);
    }

    #[test]
    fn test_voice_speed_and_interpolation() {
        let mut h = harness(1);
        let pcm = ramp_pcm(100);
        h.tx.push(GraphCommand::StartSource { deck: 0, voice: voice(1, &pcm, 0.0, 0.5) }).ok();

        let mut out = StereoBuffer::silence(3);
        h.renderer.process(&mut out);

        assert!((out[0].left - 0.0).abs() < 1e-6);
        assert!((out[1].left - 0.005).abs() < 1e-6);
        assert!((out[2].left - 0.01).abs() < 1e-6);
    }

    #[test]
    fn test_voice_end_emits_event_once() {
        let mut h = harness(1);
        let pcm = ramp_pcm(10);
        h.tx.push(GraphCommand::StartSource { deck: 0, voice: voice(7, &pcm, 0.0, 1.0) }).ok();

        let mut out = StereoBuffer::silence(16);
        h.renderer.process(&mut out);

        assert_eq!(out[12], StereoSample::silence());
        assert_eq!(h.events.pop(), Ok(GraphEvent::SourceEnded { deck: 0, node: NodeId(7) }));
        assert!(!h.renderer.has_active_source(0));

        h.renderer.process(&mut out);
        assert!(h.events.pop().is_err());
    }

    #[test]
    fn test_stop_ignores_stale_node() {
        let mut h = harness(1);
        let pcm = ramp_pcm(1000);
        h.tx.push(GraphCommand::StartSource { deck: 0, voice: voice(2, &pcm, 0.0, 1.0) }).ok();
        h.tx.push(GraphCommand::StopSource { deck: 0, node: NodeId(1) }).ok();

        let mut out = StereoBuffer::silence(8);
        h.renderer.process(&mut out);
        assert!(h.renderer.has_active_source(0));

        h.tx.push(GraphCommand::StopSource { deck: 0, node: NodeId(2) }).ok();
        h.renderer.process(&mut out);
        assert!(!h.renderer.has_active_source(0));
        assert_eq!(out.peak(), 0.0);
        // Stopped nodes never report completion
        assert!(h.events.pop().is_err());
    }

    #[test]
    fn test_gain_is_ramped() {
        let mut h = harness(1);
        let pcm = PcmBuffer::from_stereo(StereoBuffer::from_vec(vec![StereoSample::mono(1.0); 1000]), 1000)
            .unwrap();
        h.tx.push(GraphCommand::StartSource { deck: 0, voice: voice(1, &pcm, 0.0, 1.0) }).ok();
        h.tx.push(GraphCommand::SetGain { deck: 0, target: 0.0, ramp_frames: 10 }).ok();

        let mut out = StereoBuffer::silence(12);
        h.renderer.process(&mut out);

        assert!((out[0].left - 0.9).abs() < 1e-6);
        assert!((out[4].left - 0.5).abs() < 1e-6);
        assert_eq!(out[9].left, 0.0);
        assert_eq!(out[11].left, 0.0);
    }

    #[test]
    fn test_crossfade_gain_applies() {
        let mut h = harness(2);
        let pcm = PcmBuffer::from_stereo(StereoBuffer::from_vec(vec![StereoSample::mono(1.0); 100]), 1000)
            .unwrap();
        h.tx.push(GraphCommand::StartSource { deck: 1, voice: voice(1, &pcm, 0.0, 1.0) }).ok();
        h.tx.push(GraphCommand::SetCrossfadeGain { deck: 1, target: 0.25, ramp_frames: 0 }).ok();

        let mut out = StereoBuffer::silence(4);
        h.renderer.process(&mut out);
        assert!((out[3].left - 0.25).abs() < 1e-6);
        assert_eq!(h.renderer.channel_gains(1), Some((1.0, 0.25)));
    }

    #[test]
    fn test_suspended_renders_silence_and_holds_clock() {
        let mut h = harness(1);
        let pcm = ramp_pcm(100);
        h.tx.push(GraphCommand::StartSource { deck: 0, voice: voice(1, &pcm, 0.5, 1.0) }).ok();
        h.tx.push(GraphCommand::SetSuspended(true)).ok();

        let mut out = StereoBuffer::silence(8);
        h.renderer.process(&mut out);
        assert_eq!(out.peak(), 0.0);
        assert_eq!(h.clock.frames(), 0);

        h.tx.push(GraphCommand::SetSuspended(false)).ok();
        h.renderer.process(&mut out);
        assert!(out.peak() > 0.0);
        assert_eq!(h.clock.frames(), 8);
    }

    #[test]
    fn test_disconnect_all() {
        let mut h = harness(2);
        let pcm = ramp_pcm(100);
        h.tx.push(GraphCommand::StartSource { deck: 0, voice: voice(1, &pcm, 0.5, 1.0) }).ok();
        h.tx.push(GraphCommand::StartSource { deck: 1, voice: voice(2, &pcm, 0.5, 1.0) }).ok();
        h.tx.push(GraphCommand::DisconnectAll).ok();
        h.tx.push(GraphCommand::StartSource { deck: 0, voice: voice(3, &pcm, 0.0, 1.0) }).ok();

        let mut out = StereoBuffer::silence(8);
        h.renderer.process(&mut out);
        assert_eq!(h.renderer.active_sources(), 0);
        assert_eq!(out.peak(), 0.0);
        assert_eq!(h.renderer.channel_gains(0), Some((0.0, 0.0)));
    }

    #[test]
    fn test_render_interleaved_splits_channels() {
        let mut h = harness(1);
        let pcm = PcmBuffer::from_interleaved(&[0.5, -0.5, 0.5, -0.5], 2, 1000).unwrap();
        h.tx.push(GraphCommand::StartSource { deck: 0, voice: voice(1, &pcm, 0.0, 1.0) }).ok();

        let mut data = [1.0_f32; 12];
        h.renderer.render_interleaved(&mut data, 3);

        assert_eq!(&data[0..3], &[0.5, -0.5, 0.0]);
        assert_eq!(&data[3..6], &[0.5, -0.5, 0.0]);
        assert_eq!(&data[6..9], &[0.0, 0.0, 0.0]);
        assert_eq!(h.clock.frames(), 4);
    }

    #[test]
    fn test_shutdown_flag_silences_without_command() {
        let mut h = harness(1);
        let pcm = ramp_pcm(100);
        h.tx.push(GraphCommand::StartSource { deck: 0, voice: voice(1, &pcm, 0.0, 1.0) }).ok();
        let mut out = StereoBuffer::silence(4);
        h.renderer.process(&mut out);
        assert_eq!(h.renderer.active_sources(), 1);

        h.shutdown.store(true, Ordering::Release);
        h.renderer.process(&mut out);
        assert_eq!(h.renderer.active_sources(), 0);
        assert_eq!(out.peak(), 0.0);
        assert_eq!(h.renderer.channel_gains(0), Some((0.0, 0.0)));
    }

    #[test]
    fn test_render_interleaved_stereo_and_partial_frame() {
        let mut h = harness(1);
        let pcm = PcmBuffer::from_interleaved(&[0.5, -0.5, 0.25, -0.25], 2, 1000).unwrap();
        h.tx.push(GraphCommand::StartSource { deck: 0, voice: voice(1, &pcm, 0.0, 1.0) }).ok();

        let mut data = [1.0_f32; 5];
        h.renderer.render_interleaved(&mut data, 2);

        assert_eq!(&data[0..4], &[0.5, -0.5, 0.25, -0.25]);
        assert_eq!(data[4], 0.0);
        assert_eq!(h.clock.frames(), 2);
    }
}
