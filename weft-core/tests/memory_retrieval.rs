//! Memory bank: recency-aware search, delta-driven reconciliation, and
//! chat-generated memories.

use std::sync::Arc;
use weft_core::memory::{MemoryBank, SummarizeOptions};
use weft_core::tree::Turn;
use weft_core::Memory;
use weft_provider::{ChatResponse, EmbeddingProvider, MockChat, MockEmbedder};
use weft_store::{MigrationRegistry, StoreConfig, StoreDb, VectorStore};

fn bank() -> (MemoryBank, Arc<MockEmbedder>) {
    let embedder = Arc::new(MockEmbedder::new(32));
    let db = StoreDb::in_memory().unwrap();
    let store = VectorStore::open(
        db,
        StoreConfig::new("memories", embedder.dimension()).with_cache(true),
        &MigrationRegistry::new(),
    )
    .unwrap();
    let bank = MemoryBank::open(store, embedder.clone()).unwrap();
    (bank, embedder)
}

#[tokio::test]
async fn add_and_search_updates_last_accessed_on_hits() {
    let (mut bank, _) = bank();

    bank.add_memory("The innkeeper is named Bram", 1).await.unwrap();
    bank.add_memory("The cellar hides a trapdoor", 1).await.unwrap();
    bank.add_memory("A storm closed the mountain pass", 1)
        .await
        .unwrap();

    let results = bank.search("who is the innkeeper", 3, 3).await.unwrap();
    assert!(!results.is_empty());

    // Every memory in the semantic hit set has been touched this turn.
    // With three records and k = 2 * limit, all three are hits.
    for memory in bank.memories() {
        assert_eq!(
            memory.last_accessed_at_turn, 3,
            "memory {} was not touched",
            memory.id
        );
    }
}

#[tokio::test]
async fn search_blends_recency_picks_and_orders_by_last_access() {
    let (mut bank, _) = bank();

    for i in 0..8 {
        bank.add_memory(&format!("fact number {i} about the village"), 1)
            .await
            .unwrap();
    }
    // Touch two memories at a later turn by searching for them.
    bank.search("fact number 3", 2, 5).await.unwrap();

    let results = bank.search("fact number", 9, 4).await.unwrap();
    assert_eq!(results.len(), 4);
    for pair in results.windows(2) {
        assert!(pair[0].last_accessed_at_turn >= pair[1].last_accessed_at_turn);
    }
}

#[tokio::test]
async fn remove_memory_deletes_store_first_and_stays_consistent() {
    let (mut bank, _) = bank();
    let (id, _) = bank.add_memory("a disposable fact", 1).await.unwrap();

    let pair = bank.remove_memory(id).unwrap();
    assert!(pair.is_some());
    assert!(bank.get(id).is_none());
    assert!(!bank.store().contains(id).unwrap());

    // Removing an absent id is a no-op `None`, and the mirror still
    // matches the store.
    assert!(bank.remove_memory(id).unwrap().is_none());
    assert_eq!(bank.len() as u64, bank.store().count().unwrap());
}

#[tokio::test]
async fn undo_of_removal_re_embeds_through_apply_delta() {
    let (mut bank, embedder) = bank();
    let (id, _) = bank.add_memory("the king owes a debt", 1).await.unwrap();

    let removal = bank.remove_memory(id).unwrap().unwrap();
    assert!(!bank.store().contains(id).unwrap());
    let embeds_before = embedder.embed_count();

    // Undo the removal: the vector is gone from the store, so the bank
    // must re-embed the text.
    bank.apply_delta(&removal.revert).await.unwrap();

    assert!(bank.get(id).is_some());
    assert!(bank.store().contains(id).unwrap());
    assert_eq!(embedder.embed_count(), embeds_before + 1);
    assert_eq!(bank.len() as u64, bank.store().count().unwrap());

    // Redo the removal through the same delta.
    bank.apply_delta(&removal.apply).await.unwrap();
    assert!(bank.get(id).is_none());
    assert!(!bank.store().contains(id).unwrap());
}

#[tokio::test]
async fn generated_memories_strip_think_spans() {
    let (mut bank, _) = bank();
    let chat = MockChat::scripted(vec![ChatResponse::text(
        "<think>\nthe summary should mention the ferryman\n</think>The ferryman accepts only silver coins.",
    )]);

    let turns = vec![
        Turn::player("Pay the ferryman with copper"),
        Turn::writer("He shakes his head and points at a sign: silver only."),
    ];
    let added = bank
        .generate_and_add_memory(&turns, 4, &chat, &SummarizeOptions::default())
        .await
        .unwrap();

    let (id, _) = added.expect("summary should be stored");
    let memory: &Memory = bank.get(id).unwrap();
    assert_eq!(memory.text, "The ferryman accepts only silver coins.");
    assert_eq!(memory.created_at_turn, 4);

    // The transcript handed to the summarizer is actor-prefixed lines.
    let request = &chat.requests()[0];
    let transcript = &request.messages[0].content;
    assert!(transcript.contains("player: Pay the ferryman"));
    assert!(transcript.contains("writer: He shakes his head"));
}

#[tokio::test]
async fn empty_summary_adds_nothing() {
    let (mut bank, _) = bank();
    let chat = MockChat::scripted(vec![ChatResponse::text("<think>nothing worth keeping</think>  ")]);

    let added = bank
        .generate_and_add_memory(
            &[Turn::player("wait")],
            2,
            &chat,
            &SummarizeOptions::default(),
        )
        .await
        .unwrap();

    assert!(added.is_none());
    assert!(bank.is_empty());
}

#[tokio::test]
async fn hydration_restores_the_mirror_from_the_store() {
    let embedder = Arc::new(MockEmbedder::new(32));
    let db = StoreDb::in_memory().unwrap();
    let store = VectorStore::open(
        db.clone(),
        StoreConfig::new("memories", embedder.dimension()).with_cache(true),
        &MigrationRegistry::new(),
    )
    .unwrap();
    let mut bank = MemoryBank::open(store, embedder.clone()).unwrap();
    bank.add_memory("persistent fact", 2).await.unwrap();
    drop(bank);

    let store = VectorStore::open(
        db,
        StoreConfig::new("memories", embedder.dimension()).with_cache(true),
        &MigrationRegistry::new(),
    )
    .unwrap();
    let rehydrated = MemoryBank::open(store, embedder).unwrap();
    assert_eq!(rehydrated.len(), 1);
    assert_eq!(rehydrated.memories()[0].text, "persistent fact");
    assert_eq!(rehydrated.memories()[0].created_at_turn, 2);
}
