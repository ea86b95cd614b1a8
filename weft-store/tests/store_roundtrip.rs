//! Store CRUD, normalization, id assignment, and export/import round
//! trips.

use serde_json::{json, Map, Value};
use weft_store::{
    MigrationRegistry, Query, StoreConfig, StoreDb, VectorData, VectorInput, VectorStore,
};

fn meta(value: Value) -> Map<String, Value> {
    value.as_object().cloned().unwrap_or_default()
}

fn open_dense(db: &std::sync::Arc<weft_store::StoreDb>, name: &str, dim: usize) -> VectorStore {
    VectorStore::open(
        db.clone(),
        StoreConfig::new(name, dim),
        &MigrationRegistry::new(),
    )
    .unwrap()
}

#[test]
fn auto_assigned_ids_are_sequential_and_written_back() {
    let db = StoreDb::in_memory().unwrap();
    let store = open_dense(&db, "mem", 3);

    let a = store
        .upsert(None, VectorInput::Dense(vec![1.0, 0.0, 0.0]), Map::new())
        .unwrap();
    let b = store
        .upsert(None, VectorInput::Dense(vec![0.0, 1.0, 0.0]), Map::new())
        .unwrap();

    assert_eq!(b, a + 1);
    let record = store.get(a).unwrap().unwrap();
    assert_eq!(record.meta["id"], json!(a));
}

#[test]
fn explicit_ids_upsert_and_preserve_created_at() {
    let db = StoreDb::in_memory().unwrap();
    let store = open_dense(&db, "mem", 2);

    store
        .upsert(
            Some(7),
            VectorInput::Dense(vec![1.0, 0.0]),
            meta(json!({"tag": "old"})),
        )
        .unwrap();
    let before = store.get(7).unwrap().unwrap();

    store
        .upsert(
            Some(7),
            VectorInput::Dense(vec![0.0, 1.0]),
            meta(json!({"tag": "new"})),
        )
        .unwrap();
    let after = store.get(7).unwrap().unwrap();

    assert_eq!(store.count().unwrap(), 1);
    assert_eq!(after.created_at_ms, before.created_at_ms);
    assert_eq!(after.meta["tag"], "new");

    // The counter stays ahead of explicit ids.
    let next = store
        .upsert(None, VectorInput::Dense(vec![0.5, 0.5]), Map::new())
        .unwrap();
    assert!(next > 7);
}

#[test]
fn dense_vectors_are_normalized_on_insert() {
    let db = StoreDb::in_memory().unwrap();
    let store = open_dense(&db, "mem", 3);

    store
        .upsert(Some(1), VectorInput::Dense(vec![3.0, 4.0, 0.0]), Map::new())
        .unwrap();
    // The zero vector passes through unchanged.
    store
        .upsert(Some(2), VectorInput::Dense(vec![0.0, 0.0, 0.0]), Map::new())
        .unwrap();

    for record in store.scan().unwrap() {
        let VectorData::Dense(v) = &record.vector else {
            panic!("expected dense record");
        };
        let norm: f32 = v.iter().map(|x| x * x).sum::<f32>().sqrt();
        assert!(
            norm == 0.0 || (norm - 1.0).abs() < 1e-6,
            "record {} has norm {norm}",
            record.id
        );
    }
}

#[test]
fn dimension_mismatch_fails_without_state_change() {
    let db = StoreDb::in_memory().unwrap();
    let store = open_dense(&db, "mem", 3);

    let result = store.upsert(None, VectorInput::Dense(vec![1.0, 0.0]), Map::new());
    assert!(matches!(
        result,
        Err(weft_store::StoreError::DimensionMismatch {
            expected: 3,
            got: 2
        })
    ));
    assert_eq!(store.count().unwrap(), 0);
}

#[test]
fn delete_and_clear() {
    let db = StoreDb::in_memory().unwrap();
    let store = open_dense(&db, "mem", 2);

    store
        .upsert(Some(1), VectorInput::Dense(vec![1.0, 0.0]), Map::new())
        .unwrap();
    store
        .upsert(Some(2), VectorInput::Dense(vec![0.0, 1.0]), Map::new())
        .unwrap();

    assert!(store.delete(1).unwrap());
    assert!(!store.delete(1).unwrap(), "second delete reports absent");
    assert_eq!(store.count().unwrap(), 1);
    assert!(store.get(1).unwrap().is_none());

    store.clear().unwrap();
    assert_eq!(store.count().unwrap(), 0);
    // Schema survives a clear.
    assert_eq!(store.schema().dimension, 2);
}

#[test]
fn secondary_index_tracks_upserts_and_deletes() {
    let db = StoreDb::in_memory().unwrap();
    let config = StoreConfig::new("cards", 2).with_meta_index("category");
    let store = VectorStore::open(db, config, &MigrationRegistry::new()).unwrap();

    store
        .upsert(
            Some(1),
            VectorInput::Dense(vec![1.0, 0.0]),
            meta(json!({"category": "character"})),
        )
        .unwrap();
    store
        .upsert(
            Some(2),
            VectorInput::Dense(vec![0.0, 1.0]),
            meta(json!({"category": "character"})),
        )
        .unwrap();
    store
        .upsert(
            Some(3),
            VectorInput::Dense(vec![0.5, 0.5]),
            meta(json!({"category": "location"})),
        )
        .unwrap();

    assert_eq!(
        store.find_by_index("category", &json!("character")).unwrap(),
        vec![1, 2]
    );

    // Re-categorize and delete; the index follows.
    store
        .upsert(
            Some(2),
            VectorInput::Dense(vec![0.0, 1.0]),
            meta(json!({"category": "location"})),
        )
        .unwrap();
    store.delete(1).unwrap();

    assert!(store
        .find_by_index("category", &json!("character"))
        .unwrap()
        .is_empty());
    assert_eq!(
        store.find_by_index("category", &json!("location")).unwrap(),
        vec![2, 3]
    );
}

#[test]
fn export_import_round_trips_records() {
    let db = StoreDb::in_memory().unwrap();
    let store = open_dense(&db, "mem", 3);

    store
        .upsert(
            Some(1),
            VectorInput::Dense(vec![1.0, 2.0, 2.0]),
            meta(json!({"text": "first"})),
        )
        .unwrap();
    store
        .upsert(
            Some(5),
            VectorInput::Dense(vec![0.0, 1.0, 0.0]),
            meta(json!({"text": "second"})),
        )
        .unwrap();

    let dump = store.export().unwrap();
    assert_eq!(dump.vectors.len(), 2);

    let db2 = StoreDb::in_memory().unwrap();
    let restored = open_dense(&db2, "mem", 3);
    restored.import(&dump, false).unwrap();

    assert_eq!(restored.count().unwrap(), 2);
    let original = store.get(1).unwrap().unwrap();
    let copy = restored.get(1).unwrap().unwrap();
    assert_eq!(copy.vector, original.vector);
    assert_eq!(copy.meta, original.meta);
    assert_eq!(copy.created_at_ms, original.created_at_ms);

    // Fresh inserts on the restored store do not collide with imported
    // ids.
    let next = restored
        .upsert(None, VectorInput::Dense(vec![1.0, 0.0, 0.0]), Map::new())
        .unwrap();
    assert!(next > 5);
}

#[test]
fn import_rejects_wrong_dimension() {
    let db = StoreDb::in_memory().unwrap();
    let store = open_dense(&db, "mem", 3);
    store
        .upsert(Some(1), VectorInput::Dense(vec![1.0, 0.0, 0.0]), Map::new())
        .unwrap();
    let dump = store.export().unwrap();

    let db2 = StoreDb::in_memory().unwrap();
    let narrow = open_dense(&db2, "mem", 2);
    assert!(matches!(
        narrow.import(&dump, false),
        Err(weft_store::StoreError::DimensionMismatch { .. })
    ));
    assert_eq!(narrow.count().unwrap(), 0);
}

#[test]
fn import_with_clear_replaces_contents() {
    let db = StoreDb::in_memory().unwrap();
    let store = open_dense(&db, "mem", 2);
    store
        .upsert(Some(1), VectorInput::Dense(vec![1.0, 0.0]), Map::new())
        .unwrap();
    let dump = store.export().unwrap();

    let db2 = StoreDb::in_memory().unwrap();
    let target = open_dense(&db2, "mem", 2);
    target
        .upsert(Some(99), VectorInput::Dense(vec![0.0, 1.0]), Map::new())
        .unwrap();

    target.import(&dump, true).unwrap();
    assert_eq!(target.count().unwrap(), 1);
    assert!(target.get(99).unwrap().is_none());
    assert!(target.get(1).unwrap().is_some());
}

#[test]
fn persists_across_reopen_on_disk() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("store.redb");

    {
        let db = StoreDb::open(&path).unwrap();
        let store = open_dense(&db, "mem", 2);
        store
            .upsert(
                Some(1),
                VectorInput::Dense(vec![1.0, 0.0]),
                meta(json!({"text": "hello"})),
            )
            .unwrap();
    }

    let db = StoreDb::open(&path).unwrap();
    let store = open_dense(&db, "mem", 2);
    let record = store.get(1).unwrap().unwrap();
    assert_eq!(record.meta["text"], "hello");

    let hits = store.query(Query::dense(vec![1.0, 0.0], 1)).unwrap();
    assert_eq!(hits[0].id, 1);
}
