//! Named, keyword-triggerable lore cards with embeddings.
//!
//! Search merges two signals: a case-insensitive trigger-keyword
//! substring match and cosine similarity over the card content. A
//! triggered card gets the sentinel score 2.0, strictly greater than
//! any cosine score on unit vectors, so triggered cards always outrank
//! semantic hits. That ordering is a behavioral guarantee, not an
//! accident.

use crate::error::EngineError;
use serde::{Deserialize, Serialize};
use serde_json::{json, Map, Value};
use std::collections::HashMap;
use std::sync::Arc;
use weft_provider::EmbeddingProvider;
use weft_store::{Query, StoreError, VectorData, VectorInput, VectorStore};

/// Score assigned to keyword-triggered cards. Cosine similarity of unit
/// vectors is at most 1.0, so this always wins the merge.
const TRIGGER_SCORE: f32 = 2.0;

/// One lore card.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlotCard {
    pub id: u64,
    pub category: String,
    pub name: String,
    pub content: String,
    pub trigger_keyword: String,
}

/// Fields for creating a card.
#[derive(Debug, Clone)]
pub struct NewPlotCard {
    pub category: String,
    pub name: String,
    pub content: String,
    pub trigger_keyword: String,
}

/// Partial update to a card; absent fields are left alone.
#[derive(Debug, Clone, Default)]
pub struct PlotCardUpdate {
    pub category: Option<String>,
    pub name: Option<String>,
    pub content: Option<String>,
    pub trigger_keyword: Option<String>,
}

/// A card with its search score.
#[derive(Debug, Clone)]
pub struct ScoredCard {
    pub card: PlotCard,
    pub score: f32,
    /// Whether the trigger keyword forced this card into the results.
    pub triggered: bool,
}

/// The plot-card retrieval index.
pub struct PlotCardIndex {
    store: VectorStore,
    embedder: Arc<dyn EmbeddingProvider>,
    cards: Vec<PlotCard>,
}

impl PlotCardIndex {
    /// Hydrate the mirror from the store.
    pub fn open(
        store: VectorStore,
        embedder: Arc<dyn EmbeddingProvider>,
    ) -> Result<Self, EngineError> {
        let mut cards = Vec::new();
        for record in store.scan()? {
            cards.push(card_from_meta(record.id, &record.meta));
        }
        tracing::debug!(cards = cards.len(), "hydrated plot-card index");
        Ok(Self {
            store,
            embedder,
            cards,
        })
    }

    pub fn get_all_plot_cards(&self) -> &[PlotCard] {
        &self.cards
    }

    pub fn get(&self, id: u64) -> Option<&PlotCard> {
        self.cards.iter().find(|c| c.id == id)
    }

    pub fn len(&self) -> usize {
        self.cards.len()
    }

    pub fn is_empty(&self) -> bool {
        self.cards.is_empty()
    }

    /// The backing store (exports, tests).
    pub fn store(&self) -> &VectorStore {
        &self.store
    }

    /// Embed the card content and store vector + meta.
    pub async fn add_plot_card(&mut self, new: NewPlotCard) -> Result<u64, EngineError> {
        let vector = self.embedder.embed(&new.content).await?;
        let id = self.store.upsert(
            None,
            VectorInput::Dense(vector),
            card_meta(&new.category, &new.name, &new.content, &new.trigger_keyword),
        )?;
        self.cards.push(PlotCard {
            id,
            category: new.category,
            name: new.name,
            content: new.content,
            trigger_keyword: new.trigger_keyword,
        });
        Ok(id)
    }

    /// Update a card. The content is re-embedded only when it changed;
    /// otherwise the stored vector is reused via point-get. Unknown ids
    /// return `Ok(None)`.
    pub async fn edit_plot_card(
        &mut self,
        id: u64,
        update: PlotCardUpdate,
    ) -> Result<Option<()>, EngineError> {
        let Some(position) = self.cards.iter().position(|c| c.id == id) else {
            return Ok(None);
        };

        let mut card = self.cards[position].clone();
        let content_changed = update
            .content
            .as_ref()
            .is_some_and(|content| content != &card.content);

        if let Some(category) = update.category {
            card.category = category;
        }
        if let Some(name) = update.name {
            card.name = name;
        }
        if let Some(content) = update.content {
            card.content = content;
        }
        if let Some(trigger) = update.trigger_keyword {
            card.trigger_keyword = trigger;
        }

        let vector = if content_changed {
            self.embedder.embed(&card.content).await?
        } else {
            let record = self
                .store
                .get(id)?
                .ok_or(StoreError::NotFound(id))?;
            match record.vector {
                VectorData::Dense(values) => values,
                VectorData::Binary(_) => {
                    return Err(StoreError::FormatMismatch(format!(
                        "plot card {id} has a binary vector"
                    ))
                    .into())
                }
            }
        };

        self.store.upsert(
            Some(id),
            VectorInput::Dense(vector),
            card_meta(&card.category, &card.name, &card.content, &card.trigger_keyword),
        )?;
        self.cards[position] = card;
        Ok(Some(()))
    }

    /// Delete a card. Absent ids return `Ok(false)`.
    pub fn remove_plot_card(&mut self, id: u64) -> Result<bool, EngineError> {
        if !self.store.delete(id)? {
            return Ok(false);
        }
        self.cards.retain(|c| c.id != id);
        Ok(true)
    }

    /// Wipe the store and the mirror.
    pub fn clear(&mut self) -> Result<(), EngineError> {
        self.store.clear()?;
        self.cards.clear();
        Ok(())
    }

    /// Rank cards for a query: keyword triggers first, cosine hits after.
    pub async fn search(&self, query: &str, limit: usize) -> Result<Vec<ScoredCard>, EngineError> {
        if limit == 0 || self.cards.is_empty() {
            return Ok(Vec::new());
        }

        let query_lower = query.to_lowercase();
        let mut scores: HashMap<u64, (f32, bool)> = HashMap::new();

        for card in &self.cards {
            if card.trigger_keyword.is_empty() {
                continue;
            }
            if query_lower.contains(&card.trigger_keyword.to_lowercase()) {
                scores.insert(card.id, (TRIGGER_SCORE, true));
            }
        }
        let triggered = scores.len();

        let vector = self.embedder.embed(query).await?;
        let hits = self.store.query(Query::dense(vector, limit + triggered))?;
        for hit in hits {
            // The sentinel wins over the semantic score.
            scores.entry(hit.id).or_insert((hit.score, false));
        }

        let mut ranked: Vec<ScoredCard> = scores
            .into_iter()
            .filter_map(|(id, (score, triggered))| {
                self.get(id).map(|card| ScoredCard {
                    card: card.clone(),
                    score,
                    triggered,
                })
            })
            .collect();
        ranked.sort_by(|a, b| {
            b.score
                .total_cmp(&a.score)
                .then(a.card.id.cmp(&b.card.id))
        });
        ranked.truncate(limit);
        Ok(ranked)
    }
}

fn card_meta(category: &str, name: &str, content: &str, trigger: &str) -> Map<String, Value> {
    let mut meta = Map::new();
    meta.insert("category".into(), json!(category));
    meta.insert("name".into(), json!(name));
    meta.insert("content".into(), json!(content));
    meta.insert("trigger_keyword".into(), json!(trigger));
    meta
}

fn card_from_meta(id: u64, meta: &Map<String, Value>) -> PlotCard {
    let field = |key: &str| {
        meta.get(key)
            .and_then(|v| v.as_str())
            .unwrap_or_default()
            .to_string()
    };
    PlotCard {
        id,
        category: field("category"),
        name: field("name"),
        content: field("content"),
        trigger_keyword: field("trigger_keyword"),
    }
}
