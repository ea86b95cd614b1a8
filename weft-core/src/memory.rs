//! The memory bank: short textual summaries with embeddings, retrieved
//! by blending semantic similarity with recency.
//!
//! The in-memory `{memories}` document mirrors the vector store; the
//! store is the source of truth and hydration re-reads it on open.
//! `last_accessed_at_turn` is deliberately updated in the mirror only,
//! so search stays read-only at the KV layer.

use crate::delta::{apply_to, capture_unit, DeltaPair, PatchOp};
use crate::error::EngineError;
use crate::tree::Turn;
use once_cell::sync::Lazy;
use regex::Regex;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashSet;
use std::sync::Arc;
use std::time::Duration;
use weft_provider::{
    retry_with_backoff, with_deadline, ChatMessage, ChatProvider, ChatRequest, EmbeddingProvider,
    RetryPolicy,
};
use weft_store::{Query, VectorInput, VectorStore};

/// How many recently-accessed memories are blended into search results
/// beyond the semantic hits.
const RECENCY_PICKS: usize = 5;

static THINK_SPANS: Lazy<Regex> =
    Lazy::new(|| Regex::new(r"(?is)<think>.*?</think>").expect("valid think-span pattern"));

/// One remembered summary.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Memory {
    pub id: u64,
    pub text: String,
    pub created_at_turn: u64,
    pub last_accessed_at_turn: u64,
}

/// The mirror document the delta engine patches.
#[derive(Debug, Clone, Default, PartialEq, Serialize, Deserialize)]
pub struct MemoryDoc {
    pub memories: Vec<Memory>,
}

/// Options for chat-generated memories.
#[derive(Debug, Clone)]
pub struct SummarizeOptions {
    pub max_tokens: usize,
    pub temperature: Option<f32>,
    pub deadline: Option<Duration>,
    pub retry: RetryPolicy,
}

impl Default for SummarizeOptions {
    fn default() -> Self {
        Self {
            max_tokens: 512,
            temperature: None,
            deadline: None,
            retry: RetryPolicy::default(),
        }
    }
}

const SUMMARY_SYSTEM_PROMPT: &str = "Summarize the following story excerpt into one or two \
sentences that capture the facts worth remembering: named characters, places, \
acquired items, promises, and consequences. Reply with the summary only.";

/// Retrieval set of memories over a dense vector store.
pub struct MemoryBank {
    store: VectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
    doc: MemoryDoc,
}

impl MemoryBank {
    /// Hydrate the mirror from the store.
    pub fn open(
        store: VectorStore,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, EngineError> {
        let mut doc = MemoryDoc::default();
        for record in store.scan()? {
            doc.memories.push(memory_from_meta(record.id, &record.meta));
        }
        tracing::debug!(memories = doc.memories.len(), "hydrated memory bank");
        Ok(Self {
            store,
            embedder,
            doc,
        })
    }

    pub fn memories(&self) -> &[Memory] {
        &self.doc.memories
    }

    pub fn get(&self, id: u64) -> Option<&Memory> {
        self.doc.memories.iter().find(|m| m.id == id)
    }

    pub fn len(&self) -> usize {
        self.doc.memories.len()
    }

    pub fn is_empty(&self) -> bool {
        self.doc.memories.is_empty()
    }

    /// The backing store (exports, tests).
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Embed and store a memory, returning its id and the mirror delta.
    pub async fn add_memory(
        &mut self,
        text: &str,
        current_turn: u64,
    ) -> Result<(u64, DeltaPair), EngineError> {
        let vector = self.embedder.embed(text).await?;
        let id = self.store.upsert(
            None,
            VectorInput::Dense(vector),
            memory_meta(text, current_turn, current_turn),
        )?;

        let pair = capture_unit(&mut self.doc, |doc| {
            doc.memories.push(Memory {
                id,
                text: text.to_string(),
                created_at_turn: current_turn,
                last_accessed_at_turn: current_turn,
            });
        })?;
        Ok((id, pair))
    }

    /// Delete a memory. The store delete runs first; an absent record
    /// yields `None` and the mirror stays untouched.
    pub fn remove_memory(&mut self, id: u64) -> Result<Option<DeltaPair>, EngineError> {
        if !self.store.delete(id)? {
            return Ok(None);
        }
        let pair = capture_unit(&mut self.doc, |doc| {
            doc.memories.retain(|m| m.id != id);
        })?;
        Ok(Some(pair))
    }

    /// Summarize a run of turns with the chat provider and store the
    /// result as a new memory. `<think>…</think>` spans are stripped
    /// from the reply before storage; an empty summary adds nothing.
    pub async fn generate_and_add_memory(
        &mut self,
        turns: &[Turn],
        current_turn: u64,
        chat: &dyn ChatProvider,
        opts: &SummarizeOptions,
    ) -> Result<Option<(u64, DeltaPair)>, EngineError> {
        if turns.is_empty() {
            return Ok(None);
        }

        let transcript = turns
            .iter()
            .map(|turn| format!("{}: {}", turn.actor, turn.text))
            .collect::<Vec<_>>()
            .join("\n");

        let mut request = ChatRequest::new(vec![ChatMessage::user(transcript)])
            .with_system(SUMMARY_SYSTEM_PROMPT)
            .with_max_tokens(opts.max_tokens);
        if let Some(temperature) = opts.temperature {
            request = request.with_temperature(temperature);
        }

        let response = retry_with_backoff(opts.retry, || {
            with_deadline(opts.deadline, chat.chat(request.clone()))
        })
        .await?;

        let summary = strip_think_spans(&response.text);
        let summary = summary.trim();
        if summary.is_empty() {
            tracing::debug!("summarizer returned nothing memorable; skipping");
            return Ok(None);
        }

        let (id, pair) = self.add_memory(summary, current_turn).await?;
        Ok(Some((id, pair)))
    }

    /// Retrieve up to `limit` memories for a query.
    ///
    /// Fetches `2 * limit` cosine neighbors, marks every hit as accessed
    /// this turn (mirror only), blends in up to five recency picks not
    /// already in the hit set, and returns the union ordered by
    /// last-access descending.
    pub async fn search(
        &mut self,
        query: &str,
        current_turn: u64,
        limit: usize,
    ) -> Result<Vec<Memory>, EngineError> {
        if limit == 0 || self.doc.memories.is_empty() {
            return Ok(Vec::new());
        }

        let vector = self.embedder.embed(query).await?;
        let hits = self.store.query(Query::dense(vector, 2 * limit))?;
        let hit_ids: HashSet<u64> = hits.iter().map(|h| h.id).collect();

        for memory in &mut self.doc.memories {
            if hit_ids.contains(&memory.id) {
                memory.last_accessed_at_turn = current_turn;
            }
        }

        let mut recency: Vec<&Memory> = self
            .doc
            .memories
            .iter()
            .filter(|m| !hit_ids.contains(&m.id))
            .collect();
        recency.sort_by(|a, b| {
            b.last_accessed_at_turn
                .cmp(&a.last_accessed_at_turn)
                .then(b.id.cmp(&a.id))
        });

        let mut result: Vec<Memory> = self
            .doc
            .memories
            .iter()
            .filter(|m| hit_ids.contains(&m.id))
            .cloned()
            .collect();
        result.extend(recency.into_iter().take(RECENCY_PICKS).cloned());
        result.sort_by(|a, b| {
            b.last_accessed_at_turn
                .cmp(&a.last_accessed_at_turn)
                .then(b.id.cmp(&a.id))
        });
        result.truncate(limit);
        Ok(result)
    }

    /// Reconcile the bank to the state an op sequence describes.
    ///
    /// The target mirror is computed by patching a copy; the difference
    /// against the current mirror (by id) becomes a work plan of store
    /// adds and removes. Added records whose vectors the store no longer
    /// has (always the case for re-adds during an undo of a removal)
    /// are re-embedded from their text.
    pub async fn apply_delta(&mut self, ops: &[PatchOp]) -> Result<(), EngineError> {
        let target: MemoryDoc = apply_to(&self.doc, ops)?;

        let current_ids: HashSet<u64> = self.doc.memories.iter().map(|m| m.id).collect();
        let target_ids: HashSet<u64> = target.memories.iter().map(|m| m.id).collect();

        for memory in &target.memories {
            if current_ids.contains(&memory.id) {
                continue;
            }
            if !self.store.contains(memory.id)? {
                let vector = self.embedder.embed(&memory.text).await?;
                self.store.upsert(
                    Some(memory.id),
                    VectorInput::Dense(vector),
                    memory_meta(&memory.text, memory.created_at_turn, memory.last_accessed_at_turn),
                )?;
            }
        }
        for memory in &self.doc.memories {
            if !target_ids.contains(&memory.id) {
                self.store.delete(memory.id)?;
            }
        }

        self.doc = target;
        Ok(())
    }

    /// Wipe the store and the mirror.
    pub fn clear(&mut self) -> Result<(), EngineError> {
        self.store.clear()?;
        self.doc.memories.clear();
        Ok(())
    }
}

/// Strip `<think>…</think>` spans, case-insensitively, across lines.
pub fn strip_think_spans(text: &str) -> String {
    THINK_SPANS.replace_all(text, "").into_owned()
}

fn memory_meta(text: &str, created_at_turn: u64, last_accessed_at_turn: u64) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("text".into(), json!(text));
    meta.insert("created_at_turn".into(), json!(created_at_turn));
    meta.insert("last_accessed_at_turn".into(), json!(last_accessed_at_turn));
    meta
}

fn memory_from_meta(id: u64, meta: &Map<String, Value>) -> Memory {
    Memory {
        id,
        text: meta
            .get("text")
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string(),
        created_at_turn: meta
            .get("created_at_turn")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
        last_accessed_at_turn: meta
            .get("last_accessed_at_turn")
            .and_then(|v| v.as_u64())
            .unwrap_or(0),
    }
}
