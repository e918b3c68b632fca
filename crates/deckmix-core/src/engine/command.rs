//! Lock-free messaging between the control plane and the render path
//!
//! The control plane never touches render state. It pushes [`GraphCommand`]s
//! into a wait-free SPSC ring (`rtrb`), and the renderer drains them at the
//! start of every block. Node completion travels back the other way as
//! [`GraphEvent`]s on a second ring.
//!
//! ```text
//! ┌──────────────────┐   GraphCommand    ┌─────────────────────┐
//! │  AudioGraph      │──────push()──────►│   GraphRenderer     │
//! │  (control plane) │                   │   (audio callback)  │
//! │                  │◄─────push()───────│                     │
//! └──────────────────┘    GraphEvent     └─────────────────────┘
//! ```

use super::render::SourceVoice;

/// Identifier of a single-use playback node
///
/// Ids are never reused within one graph, so a stale stop or completion
/// notification can't be mistaken for the current node.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct NodeId(pub u64);

/// Commands sent from the control plane to the renderer
///
/// Applied in order at block boundaries, so a `StopSource` queued before a
/// `StartSource` always takes effect first.
pub enum GraphCommand {
    /// Start a freshly created playback node on a deck
    ///
    /// The voice is boxed so the enum stays small for the ring buffer.
    StartSource { deck: usize, voice: Box<SourceVoice> },
    /// Stop and disconnect a deck's playback node (no-op if it already ended)
    StopSource { deck: usize, node: NodeId },
    /// Ramp a deck's volume gain
    SetGain { deck: usize, target: f32, ramp_frames: u32 },
    /// Ramp a deck's crossfade gain
    SetCrossfadeGain { deck: usize, target: f32, ramp_frames: u32 },
    /// Ramp the playback speed of a deck's live node
    SetPlaybackRate {
        deck: usize,
        node: NodeId,
        speed: f64,
        ramp_frames: u32,
    },
    /// Halt (true) or resume (false) rendering and the engine clock
    SetSuspended(bool),
    /// Disconnect everything: sources, then gains, then crossfade gains
    DisconnectAll,
}

/// Notifications sent from the renderer back to the control plane
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum GraphEvent {
    /// A playback node ran off the end of its buffer
    SourceEnded { deck: usize, node: NodeId },
}

/// Capacity of the event queue
///
/// At most one completion per node, and nodes are only created by control
/// operations, so this only overflows if events are never collected.
pub const EVENT_QUEUE_CAPACITY: usize = 256;

/// Create a command channel with the given capacity
pub fn command_channel(
    capacity: usize,
) -> (rtrb::Producer<GraphCommand>, rtrb::Consumer<GraphCommand>) {
    rtrb::RingBuffer::new(capacity.max(1))
}

/// Create the renderer → control event channel
pub fn event_channel() -> (rtrb::Producer<GraphEvent>, rtrb::Consumer<GraphEvent>) {
    rtrb::RingBuffer::new(EVENT_QUEUE_CAPACITY)
}
