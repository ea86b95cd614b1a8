//! Open/upgrade protocol: the migrations log, index creation inside the
//! upgrade transaction, rollback on failure, and version guards.

use serde_json::{json, Map, Value};
use weft_store::{
    MigrationRegistry, StoreConfig, StoreDb, StoreError, VectorInput, VectorStore,
};

fn meta(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

#[test]
fn fresh_store_runs_every_hop_and_logs_them() {
    let mut registry = MigrationRegistry::new();
    registry.register(1, |ctx| ctx.add_index("category"));
    registry.register(2, |_ctx| Ok(()));

    let db = StoreDb::in_memory().unwrap();
    let config = StoreConfig::new("cards", 4).with_schema_version(3);
    let store = VectorStore::open(db, config, &registry).unwrap();

    let schema = store.schema();
    assert_eq!(schema.version, 3);
    assert_eq!(store.applied_migrations(), vec![(1, 2), (2, 3)]);
    assert!(schema.indexes.contains(&"category".to_string()));

    // The migrated index is usable.
    store
        .upsert(
            None,
            VectorInput::Dense(vec![1.0, 0.0, 0.0, 0.0]),
            meta(json!({"category": "character"})),
        )
        .unwrap();
    let ids = store.find_by_index("category", &json!("character")).unwrap();
    assert_eq!(ids.len(), 1);
}

#[test]
fn upgrade_backfills_index_over_existing_records() {
    let db = StoreDb::in_memory().unwrap();

    // Seed at version 1 with categorized records.
    {
        let store = VectorStore::open(
            db.clone(),
            StoreConfig::new("cards", 2),
            &MigrationRegistry::new(),
        )
        .unwrap();
        store
            .upsert(
                Some(1),
                VectorInput::Dense(vec![1.0, 0.0]),
                meta(json!({"category": "item"})),
            )
            .unwrap();
        store
            .upsert(
                Some(2),
                VectorInput::Dense(vec![0.0, 1.0]),
                meta(json!({"category": "location"})),
            )
            .unwrap();
    }

    // Reopen at version 2; the hop creates and backfills the index.
    let mut registry = MigrationRegistry::new();
    registry.register(1, |ctx| ctx.add_index("category"));
    let store = VectorStore::open(
        db,
        StoreConfig::new("cards", 2).with_schema_version(2),
        &registry,
    )
    .unwrap();

    assert_eq!(store.applied_migrations(), vec![(1, 2)]);
    assert_eq!(
        store.find_by_index("category", &json!("item")).unwrap(),
        vec![1]
    );
}

#[test]
fn transform_meta_rewrites_records_and_keeps_indexes_current() {
    let db = StoreDb::in_memory().unwrap();

    {
        let store = VectorStore::open(
            db.clone(),
            StoreConfig::new("cards", 2).with_meta_index("category"),
            &MigrationRegistry::new(),
        )
        .unwrap();
        store
            .upsert(
                Some(1),
                VectorInput::Dense(vec![1.0, 0.0]),
                meta(json!({"category": "npc"})),
            )
            .unwrap();
        store
            .upsert(
                Some(2),
                VectorInput::Dense(vec![0.0, 1.0]),
                meta(json!({"category": "npc"})),
            )
            .unwrap();
    }

    // The hop renames a category value across every record.
    let mut registry = MigrationRegistry::new();
    registry.register(1, |ctx| {
        let rewritten = ctx.transform_meta(|_, meta| {
            if meta.get("category") == Some(&json!("npc")) {
                meta.insert("category".into(), json!("character"));
                return true;
            }
            false
        })?;
        assert_eq!(rewritten, 2);
        Ok(())
    });

    let store = VectorStore::open(
        db,
        StoreConfig::new("cards", 2)
            .with_meta_index("category")
            .with_schema_version(2),
        &registry,
    )
    .unwrap();

    assert!(store.find_by_index("category", &json!("npc")).unwrap().is_empty());
    assert_eq!(
        store.find_by_index("category", &json!("character")).unwrap(),
        vec![1, 2]
    );
    assert_eq!(
        store.get(1).unwrap().unwrap().meta["category"],
        json!("character")
    );
}

#[test]
fn missing_hop_is_skipped_but_version_still_advances() {
    let mut registry = MigrationRegistry::new();
    // Only 2 -> 3 is registered; 1 -> 2 is missing.
    registry.register(2, |_ctx| Ok(()));

    let db = StoreDb::in_memory().unwrap();
    let store = VectorStore::open(
        db,
        StoreConfig::new("cards", 2).with_schema_version(3),
        &registry,
    )
    .unwrap();

    assert_eq!(store.schema().version, 3);
    assert_eq!(store.applied_migrations(), vec![(2, 3)]);
}

#[test]
fn failed_hop_rolls_back_and_leaves_prior_schema() {
    let db = StoreDb::in_memory().unwrap();

    // Establish version 1.
    {
        let store = VectorStore::open(
            db.clone(),
            StoreConfig::new("cards", 2),
            &MigrationRegistry::new(),
        )
        .unwrap();
        store
            .upsert(Some(1), VectorInput::Dense(vec![1.0, 0.0]), Map::new())
            .unwrap();
    }

    let mut registry = MigrationRegistry::new();
    registry.register(1, |ctx| {
        ctx.add_index("category")?;
        Err(StoreError::Backend("deliberate failure".into()))
    });

    let result = VectorStore::open(
        db.clone(),
        StoreConfig::new("cards", 2).with_schema_version(2),
        &registry,
    );
    assert!(matches!(
        result,
        Err(StoreError::MigrationFailed { from: 1, to: 2, .. })
    ));

    // Reopening at the old version sees the untouched schema.
    let store = VectorStore::open(
        db,
        StoreConfig::new("cards", 2),
        &MigrationRegistry::new(),
    )
    .unwrap();
    assert_eq!(store.schema().version, 1);
    assert!(store.schema().indexes.is_empty());
    assert!(store.applied_migrations().is_empty());
    assert_eq!(store.count().unwrap(), 1);
}

#[test]
fn schema_newer_than_code_is_rejected() {
    let mut registry = MigrationRegistry::new();
    registry.register(1, |_ctx| Ok(()));
    registry.register(2, |_ctx| Ok(()));

    let db = StoreDb::in_memory().unwrap();
    VectorStore::open(
        db.clone(),
        StoreConfig::new("cards", 2).with_schema_version(3),
        &registry,
    )
    .unwrap();

    let result = VectorStore::open(
        db,
        StoreConfig::new("cards", 2).with_schema_version(2),
        &registry,
    );
    assert!(matches!(
        result,
        Err(StoreError::SchemaNewerThanCode {
            declared: 2,
            persisted: 3
        })
    ));
}

#[test]
fn reopen_at_same_version_refreshes_updated_at() {
    let db = StoreDb::in_memory().unwrap();
    let first = VectorStore::open(
        db.clone(),
        StoreConfig::new("cards", 2),
        &MigrationRegistry::new(),
    )
    .unwrap();
    let created = first.schema().created_at_ms;
    drop(first);

    std::thread::sleep(std::time::Duration::from_millis(5));

    let second = VectorStore::open(
        db,
        StoreConfig::new("cards", 2),
        &MigrationRegistry::new(),
    )
    .unwrap();
    let schema = second.schema();
    assert_eq!(schema.created_at_ms, created);
    assert!(schema.updated_at_ms >= created);
}
