//! The engine coordinator.
//!
//! Sequences the per-turn pipeline (director → writer → post-writer
//! director → memory generation), folds director tool calls into
//! world-state and memory deltas, appends story-tree nodes carrying the
//! bundles, and drives undo/redo and branch navigation over them.
//!
//! Provider calls all happen against staged copies; the live documents
//! commit synchronously after the last await of a pipeline, so a failed
//! or cancelled turn leaves no node, no delta, and no memory mutation.

pub mod action;
pub mod context;
pub mod tools;

pub use action::{ActionDeltas, ActionKind, EngineAction};
pub use tools::{director_tools, translate_tool_call, Translated};

use crate::cards::PlotCardIndex;
use crate::delta::{apply_to, partition_by_root, DeltaPair, PatchOp};
use crate::error::EngineError;
use crate::memory::{MemoryBank, SummarizeOptions};
use crate::tree::{Actor, NodeId, StoryNode, StoryTree, Turn};
use crate::world::WorldState;
use serde::{Deserialize, Serialize};
use std::sync::Arc;
use std::time::Duration;
use weft_provider::{
    collect_stream, retry_with_backoff, with_deadline, ChatMessage, ChatProvider, ChatRequest,
    ChatResponse, EmbeddingProvider, RetryPolicy,
};
use weft_store::{MigrationRegistry, StoreConfig, StoreDb, VectorStore};

/// Store name for memory embeddings.
pub const MEMORY_STORE: &str = "memories";
/// Store name for plot-card embeddings.
pub const PLOT_CARD_STORE: &str = "plot_cards";

/// Engine tuning knobs. Durations travel as milliseconds so the config
/// serializes into session files unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct EngineConfig {
    /// Generate a memory every N turns (0 disables generation).
    pub memory_generation_interval: u64,
    /// Memories retrieved per turn.
    pub retrieval_limit: usize,
    /// Plot cards retrieved per turn.
    pub card_limit: usize,
    /// Turns of path history offered to the providers.
    pub recent_turn_window: usize,
    pub max_tokens: usize,
    pub temperature: Option<f32>,
    pub retry_max_attempts: u32,
    pub retry_base_delay_ms: u64,
    pub provider_deadline_ms: Option<u64>,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            memory_generation_interval: 5,
            retrieval_limit: 5,
            card_limit: 3,
            recent_turn_window: 12,
            max_tokens: 4096,
            temperature: Some(0.8),
            retry_max_attempts: 3,
            retry_base_delay_ms: 250,
            provider_deadline_ms: None,
        }
    }
}

impl EngineConfig {
    pub fn with_memory_generation_interval(mut self, interval: u64) -> Self {
        self.memory_generation_interval = interval;
        self
    }

    pub fn with_retrieval_limit(mut self, limit: usize) -> Self {
        self.retrieval_limit = limit;
        self
    }

    pub fn with_card_limit(mut self, limit: usize) -> Self {
        self.card_limit = limit;
        self
    }

    pub fn with_max_tokens(mut self, max_tokens: usize) -> Self {
        self.max_tokens = max_tokens;
        self
    }

    pub fn with_temperature(mut self, temperature: f32) -> Self {
        self.temperature = Some(temperature);
        self
    }

    pub fn with_provider_deadline(mut self, deadline: Duration) -> Self {
        self.provider_deadline_ms = Some(deadline.as_millis() as u64);
        self
    }

    pub fn with_retry(mut self, max_attempts: u32, base_delay: Duration) -> Self {
        self.retry_max_attempts = max_attempts;
        self.retry_base_delay_ms = base_delay.as_millis() as u64;
        self
    }

    pub(crate) fn retry_policy(&self) -> RetryPolicy {
        RetryPolicy {
            max_attempts: self.retry_max_attempts,
            base_delay: Duration::from_millis(self.retry_base_delay_ms),
        }
    }

    pub(crate) fn deadline(&self) -> Option<Duration> {
        self.provider_deadline_ms.map(Duration::from_millis)
    }

    fn summarize_options(&self) -> SummarizeOptions {
        SummarizeOptions {
            max_tokens: 512,
            temperature: self.temperature,
            deadline: self.deadline(),
            retry: self.retry_policy(),
        }
    }
}

/// The result of a completed `act` or `continue` turn.
#[derive(Debug, Clone)]
pub struct TurnOutput {
    pub narrative: String,
    pub player_node_id: Option<NodeId>,
    pub writer_node_id: NodeId,
}

/// Which sibling to switch to.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SiblingDirection {
    Next,
    Prev,
}

/// The coordinator owning world state, story tree, memory bank, and
/// plot-card index.
pub struct StoryEngine {
    config: EngineConfig,
    chat: Arc<dyn ChatProvider>,
    world: WorldState,
    tree: StoryTree,
    memory: MemoryBank,
    cards: PlotCardIndex,
    selected: Option<NodeId>,
    undo_stack: Vec<EngineAction>,
    redo_stack: Vec<EngineAction>,
    turn_counter: u64,
    poisoned: Option<String>,
}

impl StoryEngine {
    /// Open a fresh engine over the given database, creating the
    /// `memories` and `plot_cards` stores with the embedder's dimension.
    pub fn new(
        config: EngineConfig,
        chat: Arc<dyn ChatProvider>,
        embedder: Arc<dyn EmbeddingProvider>,
        db: Arc<StoreDb>,
    ) -> Result<Self, EngineError> {
        let dimension = embedder.dimension();
        let registry = MigrationRegistry::new();
        let memory_store = VectorStore::open(
            db.clone(),
            StoreConfig::new(MEMORY_STORE, dimension).with_cache(true),
            &registry,
        )?;
        let card_store = VectorStore::open(
            db,
            StoreConfig::new(PLOT_CARD_STORE, dimension).with_cache(true),
            &registry,
        )?;
        let memory = MemoryBank::open(memory_store, embedder.clone())?;
        let cards = PlotCardIndex::open(card_store, embedder)?;
        Ok(Self::with_components(config, chat, memory, cards))
    }

    /// Assemble an engine from already-opened retrieval services.
    pub fn with_components(
        config: EngineConfig,
        chat: Arc<dyn ChatProvider>,
        memory: MemoryBank,
        cards: PlotCardIndex,
    ) -> Self {
        Self {
            config,
            chat,
            world: WorldState::new(),
            tree: StoryTree::new(),
            memory,
            cards,
            selected: None,
            undo_stack: Vec::new(),
            redo_stack: Vec::new(),
            turn_counter: 0,
            poisoned: None,
        }
    }

    // ========================================================================
    // Accessors
    // ========================================================================

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn world(&self) -> &WorldState {
        &self.world
    }

    pub fn tree(&self) -> &StoryTree {
        &self.tree
    }

    pub fn memory_bank(&self) -> &MemoryBank {
        &self.memory
    }

    pub fn memory_bank_mut(&mut self) -> &mut MemoryBank {
        &mut self.memory
    }

    pub fn card_index(&self) -> &PlotCardIndex {
        &self.cards
    }

    pub fn card_index_mut(&mut self) -> &mut PlotCardIndex {
        &mut self.cards
    }

    pub fn selected_id(&self) -> Option<NodeId> {
        self.selected
    }

    pub fn turn_counter(&self) -> u64 {
        self.turn_counter
    }

    pub fn can_undo(&self) -> bool {
        !self.undo_stack.is_empty()
    }

    pub fn can_redo(&self) -> bool {
        !self.redo_stack.is_empty()
    }

    /// Why the engine is unusable, if a delta failure poisoned it.
    pub fn poison_reason(&self) -> Option<&str> {
        self.poisoned.as_deref()
    }

    // ========================================================================
    // Lifecycle
    // ========================================================================

    /// Create the root node with the opening scene.
    pub fn init(&mut self, opening: &str) -> Result<NodeId, EngineError> {
        self.ensure_usable()?;
        let root = StoryNode::new(None, Turn::writer(opening), Vec::new());
        let root_id = root.id;
        let tree_pair = self.tree.add_node(root)?;
        self.selected = Some(root_id);
        self.push_action(EngineAction {
            kind: ActionKind::Init,
            from_node_id: None,
            to_node_id: Some(root_id),
            deltas: ActionDeltas {
                tree: Some(tree_pair),
                game: None,
            },
        });
        Ok(root_id)
    }

    /// Run one full player turn.
    pub async fn act(&mut self, player_input: &str) -> Result<TurnOutput, EngineError> {
        self.ensure_usable()?;
        let selected = self.selected.ok_or(EngineError::NotInitialized)?;
        let turn = self.turn_counter + 1;

        // Retrieval context. The memory search touches recency in the
        // mirror only; nothing here joins the turn's delta bundle.
        let context_block = self.build_retrieval(player_input, turn).await?;

        // Director: tool calls become staged world deltas.
        let mut staged_world = self.world.clone();
        let recent = self.recent_turns(selected);
        let mut director_messages = context::turns_as_messages(&recent.iter().collect::<Vec<_>>());
        director_messages.push(ChatMessage::user(player_input));
        let director_request = self
            .base_request(
                context::with_context(context::DIRECTOR_SYSTEM_PROMPT, &context_block),
                director_messages,
            )
            .with_tools(director_tools());
        let director = self.call_chat(director_request).await?;

        let mut player_pairs: Vec<DeltaPair> = Vec::new();
        let mut outcomes: Vec<String> = Vec::new();
        for call in &director.tool_calls {
            match translate_tool_call(call, &mut staged_world, turn)? {
                Translated::Delta(pair) => player_pairs.push(pair),
                Translated::Outcome(outcome) => outcomes.push(outcome),
                Translated::Ignored => {}
            }
        }

        // Writer prose + post-writer director assessment.
        let (narrative, post_thinking, mut writer_pairs) = self
            .writer_half(
                selected,
                Some(context::writer_prompt(player_input, &outcomes)),
                &context_block,
                turn,
                &mut staged_world,
            )
            .await?;

        // Interval-gated memory generation. Provider work happens above
        // the commit point; the bank itself mutates synchronously after
        // its last await.
        if self.config.memory_generation_interval > 0
            && turn % self.config.memory_generation_interval == 0
        {
            let window = (self.config.memory_generation_interval as usize) * 2;
            let mut turns = recent.clone();
            turns.push(Turn::player(player_input));
            turns.push(Turn::writer(narrative.clone()));
            let start = turns.len().saturating_sub(window);
            let opts = self.config.summarize_options();
            let chat = Arc::clone(&self.chat);
            if let Some((_, pair)) = self
                .memory
                .generate_and_add_memory(&turns[start..], turn, chat.as_ref(), &opts)
                .await?
            {
                writer_pairs.push(pair);
            }
        }

        // Commit: no awaits past this point.
        self.world = staged_world;

        let mut player_turn = Turn::player(player_input);
        if let Some(thinking) = &director.thinking {
            player_turn = player_turn.with_thinking(thinking.clone());
        }
        let player_node = StoryNode::new(Some(selected), player_turn, player_pairs.clone());
        let player_id = player_node.id;
        let tree_a = self.tree.add_node(player_node)?;

        let mut writer_turn = Turn::writer(narrative.clone());
        if let Some(thinking) = post_thinking {
            writer_turn = writer_turn.with_thinking(thinking);
        }
        let writer_node = StoryNode::new(Some(player_id), writer_turn, writer_pairs.clone());
        let writer_id = writer_node.id;
        let tree_b = self.tree.add_node(writer_node)?;

        self.selected = Some(writer_id);
        self.turn_counter = turn;

        let game = compose_pairs(player_pairs.into_iter().chain(writer_pairs));
        self.push_action(EngineAction {
            kind: ActionKind::Act,
            from_node_id: Some(selected),
            to_node_id: Some(writer_id),
            deltas: ActionDeltas {
                tree: Some(tree_a.compose(tree_b)),
                game,
            },
        });

        tracing::info!(turn, node = %writer_id, "committed player turn");
        Ok(TurnOutput {
            narrative,
            player_node_id: Some(player_id),
            writer_node_id: writer_id,
        })
    }

    /// Run the writer half only, appending a writer node under the
    /// current selection without a player action.
    pub async fn continue_story(&mut self) -> Result<TurnOutput, EngineError> {
        self.ensure_usable()?;
        let selected = self.selected.ok_or(EngineError::NotInitialized)?;
        let turn = self.turn_counter + 1;

        let query = self
            .tree
            .get_node(selected)
            .map(|n| n.turn.text.clone())
            .unwrap_or_default();
        let context_block = self.build_retrieval(&query, turn).await?;

        let mut staged_world = self.world.clone();
        let (narrative, post_thinking, mut writer_pairs) = self
            .writer_half(
                selected,
                Some("Continue the story.".to_string()),
                &context_block,
                turn,
                &mut staged_world,
            )
            .await?;

        if self.config.memory_generation_interval > 0
            && turn % self.config.memory_generation_interval == 0
        {
            let window = (self.config.memory_generation_interval as usize) * 2;
            let mut turns = self.recent_turns(selected);
            turns.push(Turn::writer(narrative.clone()));
            let start = turns.len().saturating_sub(window);
            let opts = self.config.summarize_options();
            let chat = Arc::clone(&self.chat);
            if let Some((_, pair)) = self
                .memory
                .generate_and_add_memory(&turns[start..], turn, chat.as_ref(), &opts)
                .await?
            {
                writer_pairs.push(pair);
            }
        }

        self.world = staged_world;

        let mut writer_turn = Turn::writer(narrative.clone());
        if let Some(thinking) = post_thinking {
            writer_turn = writer_turn.with_thinking(thinking);
        }
        let writer_node = StoryNode::new(Some(selected), writer_turn, writer_pairs.clone());
        let writer_id = writer_node.id;
        let tree_pair = self.tree.add_node(writer_node)?;

        self.selected = Some(writer_id);
        self.turn_counter = turn;

        self.push_action(EngineAction {
            kind: ActionKind::Continue,
            from_node_id: Some(selected),
            to_node_id: Some(writer_id),
            deltas: ActionDeltas {
                tree: Some(tree_pair),
                game: compose_pairs(writer_pairs),
            },
        });

        Ok(TurnOutput {
            narrative,
            player_node_id: None,
            writer_node_id: writer_id,
        })
    }

    // ========================================================================
    // Navigation
    // ========================================================================

    /// Move the selection to any node, replaying deltas across the
    /// lowest common ancestor. The cumulative effect is itself undoable.
    pub async fn select(&mut self, target: NodeId) -> Result<(), EngineError> {
        self.ensure_usable()?;
        let current = self.selected.ok_or(EngineError::NotInitialized)?;
        if current == target {
            return Ok(());
        }
        if !self.tree.contains(target) {
            return Err(EngineError::NodeNotFound(target));
        }

        let game = self.travel(current, target).await?;
        self.selected = Some(target);
        self.push_action(EngineAction {
            kind: ActionKind::Select,
            from_node_id: Some(current),
            to_node_id: Some(target),
            deltas: ActionDeltas { tree: None, game },
        });
        Ok(())
    }

    /// Cycle through the current node's siblings in parent order,
    /// wrapping around. Returns the new selection, or `None` when the
    /// node has no siblings to switch to.
    pub async fn switch_sibling(
        &mut self,
        direction: SiblingDirection,
    ) -> Result<Option<NodeId>, EngineError> {
        self.ensure_usable()?;
        let current = self.selected.ok_or(EngineError::NotInitialized)?;
        let node = self
            .tree
            .get_node(current)
            .ok_or(EngineError::NodeNotFound(current))?;
        let Some(parent_id) = node.parent_id else {
            return Ok(None);
        };
        let siblings = self
            .tree
            .get_node(parent_id)
            .map(|p| p.children_ids.clone())
            .unwrap_or_default();
        if siblings.len() < 2 {
            return Ok(None);
        }
        let Some(index) = siblings.iter().position(|id| *id == current) else {
            return Err(EngineError::NodeNotFound(current));
        };
        let target = match direction {
            SiblingDirection::Next => siblings[(index + 1) % siblings.len()],
            SiblingDirection::Prev => siblings[(index + siblings.len() - 1) % siblings.len()],
        };
        self.select(target).await?;
        Ok(Some(target))
    }

    /// Erase the selected node and its subtree: time-travel to the
    /// parent, delete the branch, and push one combined action.
    pub async fn erase(&mut self) -> Result<NodeId, EngineError> {
        self.ensure_usable()?;
        let current = self.selected.ok_or(EngineError::NotInitialized)?;
        let node = self
            .tree
            .get_node(current)
            .ok_or(EngineError::NodeNotFound(current))?;
        let Some(parent_id) = node.parent_id else {
            return Err(crate::tree::TreeError::RootForbidden.into());
        };

        let game = self.travel(current, parent_id).await?;
        let (_, tree_pair) = self
            .tree
            .delete_branch(current)?
            .ok_or(EngineError::NodeNotFound(current))?;

        self.selected = Some(parent_id);
        self.push_action(EngineAction {
            kind: ActionKind::Erase,
            from_node_id: Some(current),
            to_node_id: Some(parent_id),
            deltas: ActionDeltas {
                tree: Some(tree_pair),
                game,
            },
        });
        Ok(parent_id)
    }

    /// Re-run the writer half for the selected writer node, producing a
    /// new sibling. The old node and its subtree stay in the tree.
    pub async fn retry(&mut self) -> Result<TurnOutput, EngineError> {
        self.ensure_usable()?;
        let current = self.selected.ok_or(EngineError::NotInitialized)?;
        let node = self
            .tree
            .get_node(current)
            .ok_or(EngineError::NodeNotFound(current))?;
        if node.turn.actor != Actor::Writer {
            return Err(EngineError::NotAWriterNode);
        }
        let Some(parent_id) = node.parent_id else {
            return Err(crate::tree::TreeError::RootForbidden.into());
        };
        let player_input = self
            .tree
            .get_node(parent_id)
            .map(|n| n.turn.text.clone())
            .unwrap_or_default();
        let turn = self.turn_counter;

        // Time-travel to the parent, then regenerate. A provider failure
        // travels back so the cancelled turn commits nothing.
        let travel_pair = self.travel(current, parent_id).await?;

        let context_block = match self.build_retrieval(&player_input, turn).await {
            Ok(block) => block,
            Err(e) => return Err(self.unwind_travel(travel_pair, e).await),
        };
        let mut staged_world = self.world.clone();
        let half = self
            .writer_half(parent_id, None, &context_block, turn, &mut staged_world)
            .await;
        let (narrative, post_thinking, writer_pairs) = match half {
            Ok(parts) => parts,
            Err(e) => return Err(self.unwind_travel(travel_pair, e).await),
        };

        self.world = staged_world;

        let mut writer_turn = Turn::writer(narrative.clone());
        if let Some(thinking) = post_thinking {
            writer_turn = writer_turn.with_thinking(thinking);
        }
        let writer_node = StoryNode::new(Some(parent_id), writer_turn, writer_pairs.clone());
        let writer_id = writer_node.id;
        let tree_pair = self.tree.add_node(writer_node)?;

        self.selected = Some(writer_id);

        let game = match (travel_pair, compose_pairs(writer_pairs)) {
            (Some(travel), Some(new)) => Some(travel.compose(new)),
            (Some(travel), None) => Some(travel),
            (None, new) => new,
        };
        self.push_action(EngineAction {
            kind: ActionKind::Retry,
            from_node_id: Some(current),
            to_node_id: Some(writer_id),
            deltas: ActionDeltas {
                tree: Some(tree_pair),
                game,
            },
        });

        Ok(TurnOutput {
            narrative,
            player_node_id: Some(parent_id),
            writer_node_id: writer_id,
        })
    }

    /// Edit the selected node's text in place.
    ///
    /// Player nodes update text only. Writer nodes revert their old
    /// delta bundle, re-run the post-writer director over the new text,
    /// and swap `(turn, deltas)` together via `update_node`.
    pub async fn edit(&mut self, new_text: &str) -> Result<(), EngineError> {
        self.ensure_usable()?;
        let current = self.selected.ok_or(EngineError::NotInitialized)?;
        let node = self
            .tree
            .get_node(current)
            .cloned()
            .ok_or(EngineError::NodeNotFound(current))?;

        if node.turn.actor == Actor::Player {
            let mut edited = Turn::player(new_text);
            edited.director_thinking = node.turn.director_thinking.clone();
            let tree_pair = self
                .tree
                .edit_node(current, edited)?
                .ok_or(EngineError::NodeNotFound(current))?;
            self.push_action(EngineAction {
                kind: ActionKind::Edit,
                from_node_id: Some(current),
                to_node_id: Some(current),
                deltas: ActionDeltas {
                    tree: Some(tree_pair),
                    game: None,
                },
            });
            return Ok(());
        }

        // Writer node: revert the old bundle first.
        let mut applied_ops: Vec<PatchOp> = Vec::new();
        let mut revert_ops: Vec<PatchOp> = Vec::new();
        for pair in node.deltas.iter().rev() {
            self.apply_game_ops(&pair.revert).await?;
            applied_ops.extend(pair.revert.clone());
            revert_ops.splice(0..0, pair.apply.iter().cloned());
        }
        let unwind = DeltaPair {
            apply: applied_ops.clone(),
            revert: revert_ops.clone(),
        };

        let context_node = node.parent_id.unwrap_or(current);
        let turn = self.turn_counter;
        let context_block = match self.build_retrieval(new_text, turn).await {
            Ok(block) => block,
            Err(e) => return Err(self.unwind_travel(Some(unwind), e).await),
        };
        let mut staged_world = self.world.clone();
        let assessed = self
            .post_writer_deltas(context_node, new_text, &context_block, turn, &mut staged_world)
            .await;
        let (new_pairs, post_thinking) = match assessed {
            Ok(parts) => parts,
            Err(e) => return Err(self.unwind_travel(Some(unwind), e).await),
        };

        self.world = staged_world;

        for pair in &new_pairs {
            applied_ops.extend(pair.apply.clone());
            revert_ops.splice(0..0, pair.revert.iter().cloned());
        }

        let mut writer_turn = Turn::writer(new_text);
        if let Some(thinking) = post_thinking {
            writer_turn = writer_turn.with_thinking(thinking);
        }
        let tree_pair = self
            .tree
            .update_node(current, writer_turn, new_pairs)?
            .ok_or(EngineError::NodeNotFound(current))?;

        let game = if applied_ops.is_empty() && revert_ops.is_empty() {
            None
        } else {
            Some(DeltaPair {
                apply: applied_ops,
                revert: revert_ops,
            })
        };
        self.push_action(EngineAction {
            kind: ActionKind::Edit,
            from_node_id: Some(current),
            to_node_id: Some(current),
            deltas: ActionDeltas {
                tree: Some(tree_pair),
                game,
            },
        });
        Ok(())
    }

    // ========================================================================
    // Undo / redo
    // ========================================================================

    /// Undo the most recent action. Returns `false` on an empty stack.
    pub async fn undo(&mut self) -> Result<bool, EngineError> {
        self.ensure_usable()?;
        let Some(action) = self.undo_stack.pop() else {
            return Ok(false);
        };
        if let Some(game) = &action.deltas.game {
            self.apply_game_ops(&game.revert).await?;
        }
        if let Some(tree_pair) = &action.deltas.tree {
            let reverted = apply_to(&self.tree, &tree_pair.revert);
            self.tree = self.checked(reverted)?;
        }
        self.selected = action.from_node_id;
        self.redo_stack.push(action);
        Ok(true)
    }

    /// Redo the most recently undone action. Returns `false` on an
    /// empty stack.
    pub async fn redo(&mut self) -> Result<bool, EngineError> {
        self.ensure_usable()?;
        let Some(action) = self.redo_stack.pop() else {
            return Ok(false);
        };
        if let Some(tree_pair) = &action.deltas.tree {
            let applied = apply_to(&self.tree, &tree_pair.apply);
            self.tree = self.checked(applied)?;
        }
        if let Some(game) = &action.deltas.game {
            self.apply_game_ops(&game.apply).await?;
        }
        self.selected = action.to_node_id;
        self.undo_stack.push(action);
        Ok(true)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    /// Install state from a saved session. The turn counter is derived
    /// from the selected path: one turn per non-root writer node.
    pub(crate) fn set_restored_state(
        &mut self,
        world: WorldState,
        tree: StoryTree,
        selected: Option<NodeId>,
    ) {
        self.turn_counter = selected
            .and_then(|id| tree.get_path_to_node(id))
            .map(|path| {
                path.iter()
                    .filter(|id| {
                        tree.get_node(**id)
                            .is_some_and(|n| n.turn.actor == Actor::Writer && n.parent_id.is_some())
                    })
                    .count() as u64
            })
            .unwrap_or(0);
        self.world = world;
        self.tree = tree;
        self.selected = selected;
        self.undo_stack.clear();
        self.redo_stack.clear();
    }

    fn ensure_usable(&self) -> Result<(), EngineError> {
        match &self.poisoned {
            Some(reason) => Err(EngineError::Poisoned(reason.clone())),
            None => Ok(()),
        }
    }

    /// Push a new action; anything that is not undo/redo clears the
    /// redo stack.
    fn push_action(&mut self, action: EngineAction) {
        self.undo_stack.push(action);
        self.redo_stack.clear();
    }

    fn checked<T>(&mut self, result: Result<T, crate::delta::DeltaError>) -> Result<T, EngineError> {
        match result {
            Ok(value) => Ok(value),
            Err(e) => {
                let reason = e.to_string();
                tracing::error!(error = %reason, "delta apply failed; engine is now unusable");
                self.poisoned = Some(reason.clone());
                Err(EngineError::DeltaApplyFailed(reason))
            }
        }
    }

    fn recent_turns(&self, node: NodeId) -> Vec<Turn> {
        self.tree
            .get_recent_turns(node, self.config.recent_turn_window)
            .into_iter()
            .cloned()
            .collect()
    }

    async fn build_retrieval(&mut self, query: &str, turn: u64) -> Result<String, EngineError> {
        let memories = self
            .memory
            .search(query, turn, self.config.retrieval_limit)
            .await?;
        let cards = self.cards.search(query, self.config.card_limit).await?;
        Ok(context::build_context_block(&self.world, &memories, &cards))
    }

    fn base_request(&self, system: String, messages: Vec<ChatMessage>) -> ChatRequest {
        let mut request = ChatRequest::new(messages)
            .with_system(system)
            .with_max_tokens(self.config.max_tokens);
        if let Some(temperature) = self.config.temperature {
            request = request.with_temperature(temperature);
        }
        if let Some(deadline) = self.config.deadline() {
            request = request.with_deadline(deadline);
        }
        request
    }

    /// Stream a chat call and fold it, under the configured deadline and
    /// retry policy.
    async fn call_chat(&self, request: ChatRequest) -> Result<ChatResponse, EngineError> {
        let retry = self.config.retry_policy();
        let deadline = self.config.deadline();
        let chat = Arc::clone(&self.chat);
        let response = retry_with_backoff(retry, || {
            let chat = Arc::clone(&chat);
            let request = request.clone();
            with_deadline(deadline, async move {
                let stream = chat.chat_stream(request).await?;
                collect_stream(stream).await
            })
        })
        .await?;
        Ok(response)
    }

    /// Writer prose followed by the post-writer director assessment.
    async fn writer_half(
        &mut self,
        context_node: NodeId,
        extra_user: Option<String>,
        context_block: &str,
        turn: u64,
        staged_world: &mut WorldState,
    ) -> Result<(String, Option<String>, Vec<DeltaPair>), EngineError> {
        let recent = self.recent_turns(context_node);
        let mut messages = context::turns_as_messages(&recent.iter().collect::<Vec<_>>());
        if let Some(user) = extra_user {
            messages.push(ChatMessage::user(user));
        }
        let writer_request = self.base_request(
            context::with_context(context::WRITER_SYSTEM_PROMPT, context_block),
            messages,
        );
        let writer = self.call_chat(writer_request).await?;
        let narrative = writer.text;

        let (pairs, thinking) = self
            .post_writer_deltas(context_node, &narrative, context_block, turn, staged_world)
            .await?;
        Ok((narrative, thinking, pairs))
    }

    /// The post-writer director pass: fold what the prose established
    /// into staged world deltas.
    async fn post_writer_deltas(
        &mut self,
        context_node: NodeId,
        narrative: &str,
        context_block: &str,
        turn: u64,
        staged_world: &mut WorldState,
    ) -> Result<(Vec<DeltaPair>, Option<String>), EngineError> {
        let recent = self.recent_turns(context_node);
        let mut messages = context::turns_as_messages(&recent.iter().collect::<Vec<_>>());
        messages.push(ChatMessage::assistant(narrative));
        messages.push(ChatMessage::user(
            "Record the world changes the passage above established.",
        ));
        let request = self
            .base_request(
                context::with_context(context::POST_WRITER_SYSTEM_PROMPT, context_block),
                messages,
            )
            .with_tools(director_tools());
        let response = self.call_chat(request).await?;

        let mut pairs = Vec::new();
        for call in &response.tool_calls {
            match translate_tool_call(call, staged_world, turn)? {
                Translated::Delta(pair) => pairs.push(pair),
                Translated::Outcome(_) | Translated::Ignored => {}
            }
        }
        Ok((pairs, response.thinking))
    }

    /// Replay node delta bundles across the LCA of `from` and `to`.
    /// Returns the combined game pair describing the traversal.
    async fn travel(
        &mut self,
        from: NodeId,
        to: NodeId,
    ) -> Result<Option<DeltaPair>, EngineError> {
        let path_from = self
            .tree
            .get_path_to_node(from)
            .ok_or(EngineError::NodeNotFound(from))?;
        let path_to = self
            .tree
            .get_path_to_node(to)
            .ok_or(EngineError::NodeNotFound(to))?;
        let lca = path_from
            .iter()
            .zip(&path_to)
            .take_while(|(a, b)| a == b)
            .count();

        let mut apply_ops: Vec<PatchOp> = Vec::new();
        let mut revert_ops: Vec<PatchOp> = Vec::new();

        // Down: current → LCA, reverting each node's bundle in reverse.
        for node_id in path_from[lca..].iter().rev() {
            let pairs = self
                .tree
                .get_node(*node_id)
                .map(|n| n.deltas.clone())
                .unwrap_or_default();
            for pair in pairs.iter().rev() {
                self.apply_game_ops(&pair.revert).await?;
                apply_ops.extend(pair.revert.iter().cloned());
                revert_ops.splice(0..0, pair.apply.iter().cloned());
            }
        }
        // Up: LCA → target, applying forward.
        for node_id in &path_to[lca..] {
            let pairs = self
                .tree
                .get_node(*node_id)
                .map(|n| n.deltas.clone())
                .unwrap_or_default();
            for pair in &pairs {
                self.apply_game_ops(&pair.apply).await?;
                apply_ops.extend(pair.apply.iter().cloned());
                revert_ops.splice(0..0, pair.revert.iter().cloned());
            }
        }

        if apply_ops.is_empty() && revert_ops.is_empty() {
            Ok(None)
        } else {
            Ok(Some(DeltaPair {
                apply: apply_ops,
                revert: revert_ops,
            }))
        }
    }

    /// Apply game-document ops to the live world and memory bank,
    /// poisoning the engine when they fail to land.
    async fn apply_game_ops(&mut self, ops: &[PatchOp]) -> Result<(), EngineError> {
        if ops.is_empty() {
            return Ok(());
        }
        let (memory_ops, world_ops) = partition_by_root(ops, "memories");

        if !world_ops.is_empty() {
            let applied = apply_to(&self.world, &world_ops);
            self.world = self.checked(applied)?;
        }
        if !memory_ops.is_empty() {
            if let Err(e) = self.memory.apply_delta(&memory_ops).await {
                let reason = e.to_string();
                tracing::error!(error = %reason, "memory delta failed; engine is now unusable");
                self.poisoned = Some(reason.clone());
                return Err(EngineError::DeltaApplyFailed(reason));
            }
        }
        Ok(())
    }

    /// Best-effort rollback of an already-applied travel pair after a
    /// provider failure; hands the original error back to surface.
    async fn unwind_travel(
        &mut self,
        travel_pair: Option<DeltaPair>,
        original: EngineError,
    ) -> EngineError {
        if let Some(pair) = travel_pair {
            if let Err(unwind_err) = self.apply_game_ops(&pair.revert).await {
                tracing::error!(error = %unwind_err, "failed to unwind after provider failure");
            }
        }
        original
    }
}

/// Fold pairs into one, dropping empties.
fn compose_pairs<I: IntoIterator<Item = DeltaPair>>(pairs: I) -> Option<DeltaPair> {
    let mut iter = pairs.into_iter().filter(|p| !p.is_empty());
    let first = iter.next()?;
    Some(iter.fold(first, DeltaPair::compose))
}
