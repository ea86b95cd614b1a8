//! Branching interactive-fiction engine core.
//!
//! This crate couples chat-model calls to a persistent, branching game
//! state:
//!
//! - a [`delta`] engine expressing every mutation as an
//!   inverse-computable JSON-pointer patch pair
//! - a [`world`] document (state tree + plots) whose mutators emit
//!   those pairs
//! - a branching [`tree`] of story nodes, each carrying the delta
//!   bundle that reaches it from its parent
//! - a [`memory`] bank and plot-[`cards`] index layered on the vector
//!   store, blending keyword triggers, recency, and semantic similarity
//! - the [`engine`] coordinator driving the director → writer →
//!   post-writer pipeline, undo/redo, and time-travel navigation
//!
//! Providers are capability traits from `weft-provider`; the engine
//! never names a concrete vendor.

pub mod cards;
pub mod delta;
pub mod engine;
pub mod error;
pub mod memory;
pub mod session;
pub mod tree;
pub mod world;

pub use cards::{NewPlotCard, PlotCard, PlotCardIndex, PlotCardUpdate, ScoredCard};
pub use delta::{apply_patch, apply_to, capture, capture_unit, diff, DeltaError, DeltaPair, PatchOp};
pub use engine::{
    ActionDeltas, ActionKind, EngineAction, EngineConfig, SiblingDirection, StoryEngine,
    TurnOutput,
};
pub use error::EngineError;
pub use memory::{Memory, MemoryBank, SummarizeOptions};
pub use session::{SavedSession, SessionError, SessionPeek};
pub use tree::{Actor, NodeId, StoryNode, StoryTree, TreeError, Turn};
pub use world::{NewPlot, Plot, PlotId, PlotUpdate, WorldState};
