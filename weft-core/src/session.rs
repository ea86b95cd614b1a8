//! Session persistence: one JSON file holding the config, the selected
//! node, the story tree, world state, and both vector-store dumps.

use crate::cards::PlotCardIndex;
use crate::engine::{EngineConfig, StoryEngine, MEMORY_STORE, PLOT_CARD_STORE};
use crate::error::EngineError;
use crate::memory::MemoryBank;
use crate::tree::{NodeId, StoryTree};
use crate::world::WorldState;
use serde::{Deserialize, Serialize};
use std::path::Path;
use std::sync::Arc;
use thiserror::Error;
use tokio::fs;
use weft_provider::{ChatProvider, EmbeddingProvider};
use weft_store::{MigrationRegistry, StoreConfig, StoreDb, StoreDump, VectorStore};

/// Current save file version.
const SAVE_VERSION: u32 = 1;

/// Errors from session persistence.
#[derive(Debug, Error)]
pub enum SessionError {
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("version mismatch: expected {expected}, found {found}")]
    VersionMismatch { expected: u32, found: u32 },

    #[error(transparent)]
    Engine(#[from] EngineError),
}

/// A saved session with everything needed to resume play.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct SavedSession {
    /// Save format version for compatibility checking.
    pub version: u32,
    pub config: EngineConfig,
    pub selected_node_id: Option<NodeId>,
    pub story_tree: StoryTree,
    pub world_state: WorldState,
    /// Full export of the memory embeddings store.
    pub memory_bank: StoreDump,
    /// Full export of the plot-card embeddings store.
    pub plot_cards: StoreDump,
}

/// Lightweight metadata read without loading the full session.
#[derive(Debug, Clone, Deserialize)]
pub struct SessionPeek {
    pub version: u32,
    pub selected_node_id: Option<NodeId>,
}

impl SavedSession {
    /// Save to a pretty-printed JSON file.
    pub async fn save(&self, path: impl AsRef<Path>) -> Result<(), SessionError> {
        let content = serde_json::to_string_pretty(self)?;
        fs::write(path, content).await?;
        Ok(())
    }

    /// Load from a JSON file, rejecting unknown save versions.
    pub async fn load(path: impl AsRef<Path>) -> Result<Self, SessionError> {
        let content = fs::read_to_string(path).await?;
        let saved: Self = serde_json::from_str(&content)?;
        if saved.version != SAVE_VERSION {
            return Err(SessionError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }
        Ok(saved)
    }

    /// Read just enough of a save file to describe it.
    pub async fn peek(path: impl AsRef<Path>) -> Result<SessionPeek, SessionError> {
        let content = fs::read_to_string(path).await?;
        let peek: SessionPeek = serde_json::from_str(&content)?;
        if peek.version != SAVE_VERSION {
            return Err(SessionError::VersionMismatch {
                expected: SAVE_VERSION,
                found: peek.version,
            });
        }
        Ok(peek)
    }
}

impl StoryEngine {
    /// Capture the full session state for persistence.
    pub fn snapshot(&self) -> Result<SavedSession, EngineError> {
        Ok(SavedSession {
            version: SAVE_VERSION,
            config: self.config().clone(),
            selected_node_id: self.selected_id(),
            story_tree: self.tree().clone(),
            world_state: self.world().clone(),
            memory_bank: self.memory_bank().store().export()?,
            plot_cards: self.card_index().store().export()?,
        })
    }

    /// Rebuild an engine from a saved session over a fresh database.
    ///
    /// Both stores are imported with `clear_before`, then the banks
    /// hydrate from them, so the store/mirror invariant holds from the
    /// first query.
    pub fn restore(
        saved: SavedSession,
        chat: Arc<dyn ChatProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        db: Arc<StoreDb>,
    ) -> Result<StoryEngine, SessionError> {
        if saved.version != SAVE_VERSION {
            return Err(SessionError::VersionMismatch {
                expected: SAVE_VERSION,
                found: saved.version,
            });
        }

        let dimension = embedder.dimension();
        let registry = MigrationRegistry::new();

        let memory_store = VectorStore::open(
            db.clone(),
            StoreConfig::new(MEMORY_STORE, dimension).with_cache(true),
            &registry,
        )
        .map_err(EngineError::from)?;
        memory_store
            .import(&saved.memory_bank, true)
            .map_err(EngineError::from)?;

        let card_store = VectorStore::open(
            db,
            StoreConfig::new(PLOT_CARD_STORE, dimension).with_cache(true),
            &registry,
        )
        .map_err(EngineError::from)?;
        card_store
            .import(&saved.plot_cards, true)
            .map_err(EngineError::from)?;

        let memory = MemoryBank::open(memory_store, embedder.clone())?;
        let cards = PlotCardIndex::open(card_store, embedder)?;

        let mut engine = StoryEngine::with_components(saved.config, chat, memory, cards);
        engine.set_restored_state(saved.world_state, saved.story_tree, saved.selected_node_id);
        Ok(engine)
    }
}
