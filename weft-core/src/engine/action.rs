//! Engine actions: the undo/redo currency.

use crate::delta::DeltaPair;
use crate::tree::NodeId;
use serde::{Deserialize, Serialize};

/// What kind of user-visible operation produced an action.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum ActionKind {
    Init,
    Act,
    Continue,
    Erase,
    Retry,
    Edit,
    Select,
}

/// The deltas an action committed, split by document.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct ActionDeltas {
    /// Structural change to the story tree.
    pub tree: Option<DeltaPair>,
    /// Change to the game document (world state + memory set).
    pub game: Option<DeltaPair>,
}

/// One undoable engine operation.
///
/// Undo reverts `game` then `tree` and moves the selection to
/// `from_node_id`; redo applies `tree` then `game` and moves it to
/// `to_node_id`.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineAction {
    pub kind: ActionKind,
    pub from_node_id: Option<NodeId>,
    pub to_node_id: Option<NodeId>,
    pub deltas: ActionDeltas,
}
