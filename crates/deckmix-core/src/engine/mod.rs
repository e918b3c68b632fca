//! Deck engine - transport, crossfader and render graph
//!
//! - [`DeckEngine`]: deck-indexed control operations and UI snapshots
//! - [`Deck`]: per-deck transport state machine and position anchors
//! - [`CrossfadeMixer`]: equal-power A/B crossfader
//! - [`AudioGraph`] / [`GraphRenderer`]: the two halves of the render graph,
//!   connected by lock-free command and event queues
//! - [`EngineClock`]: the render path's clock

mod clock;
mod command;
mod deck;
mod engine;
mod gc;
mod graph;
mod mixer;
mod render;

pub use clock::{DeckTiming, EngineClock, FrameClock, ManualClock};
pub use command::{command_channel, event_channel, GraphCommand, GraphEvent, NodeId};
pub use deck::{Deck, LoadOutcome, LoadTicket};
pub use engine::{DeckEngine, DeckSnapshot};
pub use gc::gc_handle;
pub use graph::{AudioGraph, ContextState};
pub use mixer::{equal_power_gains, CrossfadeMixer, CrossfadeSide};
pub use render::{GraphRenderer, LinearRamp, SourceVoice, MAX_BUFFER_SIZE};
