//! Plot-card index: trigger-keyword forcing, sentinel ranking, and
//! edit-time re-embedding.

use std::sync::Arc;
use weft_core::cards::{NewPlotCard, PlotCardIndex, PlotCardUpdate};
use weft_provider::{EmbeddingProvider, MockEmbedder};
use weft_store::{MigrationRegistry, StoreConfig, StoreDb, VectorStore};

fn index() -> (PlotCardIndex, Arc<MockEmbedder>) {
    let embedder = Arc::new(MockEmbedder::new(48));
    let db = StoreDb::in_memory().unwrap();
    let store = VectorStore::open(
        db,
        StoreConfig::new("plot_cards", embedder.dimension()).with_cache(true),
        &MigrationRegistry::new(),
    )
    .unwrap();
    let index = PlotCardIndex::open(store, embedder.clone()).unwrap();
    (index, embedder)
}

fn card(category: &str, name: &str, content: &str, trigger: &str) -> NewPlotCard {
    NewPlotCard {
        category: category.to_string(),
        name: name.to_string(),
        content: content.to_string(),
        trigger_keyword: trigger.to_string(),
    }
}

async fn seed_middle_earth(index: &mut PlotCardIndex) -> (u64, u64, u64) {
    let gandalf = index
        .add_plot_card(card(
            "Character",
            "Gandalf",
            "An old wise wizard who guides travelers through dark places.",
            "Gandalf",
        ))
        .await
        .unwrap();
    let rivendell = index
        .add_plot_card(card(
            "Location",
            "Rivendell",
            "An ancient Elven sanctuary hidden in a valley.",
            "Rivendell",
        ))
        .await
        .unwrap();
    let ring = index
        .add_plot_card(card(
            "Item",
            "The One Ring",
            "A powerful artifact that corrupts its bearer.",
            "Ring",
        ))
        .await
        .unwrap();
    (gandalf, rivendell, ring)
}

#[tokio::test]
async fn triggered_card_outranks_semantic_hits() {
    let (mut index, _) = index();
    let (_, _, ring) = seed_middle_earth(&mut index).await;

    let results = index
        .search("Where is the powerful Ring kept?", 3)
        .await
        .unwrap();

    assert_eq!(results.len(), 3);
    assert_eq!(results[0].card.id, ring, "trigger keyword must win");
    assert!(results[0].triggered);
    assert_eq!(results[0].score, 2.0);

    // The others follow in cosine order: scores descending, below the
    // sentinel.
    assert!(results[1].score < 2.0);
    assert!(results[1].score >= results[2].score);
    assert!(!results[1].triggered && !results[2].triggered);
}

#[tokio::test]
async fn trigger_matching_is_case_insensitive_substring() {
    let (mut index, _) = index();
    let (gandalf, _, _) = seed_middle_earth(&mut index).await;

    let results = index.search("did GANDALF leave a note?", 3).await.unwrap();
    assert_eq!(results[0].card.id, gandalf);
    assert!(results[0].triggered);
}

#[tokio::test]
async fn multiple_triggers_all_force_their_cards_in() {
    let (mut index, _) = index();
    let (gandalf, rivendell, _) = seed_middle_earth(&mut index).await;

    let results = index
        .search("ask Gandalf about the road to Rivendell", 2)
        .await
        .unwrap();

    let ids: Vec<u64> = results.iter().map(|r| r.card.id).collect();
    assert!(ids.contains(&gandalf));
    assert!(ids.contains(&rivendell));
    assert!(results.iter().all(|r| r.triggered));
}

#[tokio::test]
async fn edit_re_embeds_only_when_content_changes() {
    let (mut index, embedder) = index();
    let (gandalf, _, _) = seed_middle_earth(&mut index).await;
    let embeds_after_seed = embedder.embed_count();

    // Renaming does not re-embed; the stored vector is reused.
    index
        .edit_plot_card(
            gandalf,
            PlotCardUpdate {
                name: Some("Mithrandir".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(embedder.embed_count(), embeds_after_seed);
    assert_eq!(index.get(gandalf).unwrap().name, "Mithrandir");

    // Changing content re-embeds.
    index
        .edit_plot_card(
            gandalf,
            PlotCardUpdate {
                content: Some("A grey pilgrim bearing one of the three Elven rings.".to_string()),
                ..Default::default()
            },
        )
        .await
        .unwrap()
        .unwrap();
    assert_eq!(embedder.embed_count(), embeds_after_seed + 1);
}

#[tokio::test]
async fn remove_and_clear_keep_store_and_mirror_aligned() {
    let (mut index, _) = index();
    let (gandalf, ..) = seed_middle_earth(&mut index).await;

    assert!(index.remove_plot_card(gandalf).unwrap());
    assert!(!index.remove_plot_card(gandalf).unwrap());
    assert_eq!(index.len() as u64, index.store().count().unwrap());

    index.clear().unwrap();
    assert!(index.is_empty());
    assert_eq!(index.store().count().unwrap(), 0);
}

#[tokio::test]
async fn limit_bounds_results_even_with_many_triggers() {
    let (mut index, _) = index();
    seed_middle_earth(&mut index).await;

    let results = index
        .search("Gandalf took the Ring to Rivendell", 1)
        .await
        .unwrap();
    assert_eq!(results.len(), 1);
    assert!(results[0].triggered);
}
