//! The vector store proper: open/upgrade protocol, record CRUD, top-K
//! queries, cache mirror, accel hook, export/import.

use crate::accel::{AccelState, PopcountModule};
use crate::binary::{hamming_fallback, pack_bits, BitSource};
use crate::cache::{CachedRecord, Mirror};
use crate::config::{Distance, SchemaFormat, SchemaMeta, StoreConfig, VectorFormat};
use crate::db::StoreDb;
use crate::error::StoreError;
use crate::migrate::{MigrationCtx, MigrationRegistry};
use crate::query::{dot, neg_euclidean, MetaPredicate, Query, SearchHit, TopK};
use crate::record::{floats_from_le, floats_to_le, l2_norm, StoredRow, VectorInput, VectorRecord};
use crate::tables::{index_key, index_table, TableNames, MIGRATIONS_KEY, NEXT_ID_KEY, SCHEMA_KEY};
use redb::{ReadTransaction, ReadableMultimapTable, ReadableTable, ReadableTableMetadata};
use serde::{Deserialize, Serialize};
use serde_json::{Map, Value};
use std::sync::{Arc, Mutex, RwLock};

/// A persistent, named store of vector records.
///
/// All writes through one handle are serialized in submission order;
/// queries observe every write that succeeded before they were issued.
pub struct VectorStore {
    db: Arc<StoreDb>,
    config: StoreConfig,
    tables: TableNames,
    schema: RwLock<SchemaMeta>,
    applied: Vec<(u32, u32)>,
    mirror: RwLock<Option<Mirror>>,
    accel: Mutex<AccelState>,
}

impl VectorStore {
    /// Open (or create) the named store, running any pending migrations.
    ///
    /// The whole upgrade (every registered hop from the persisted
    /// version up to the declared one, plus the meta-record updates)
    /// executes in one write transaction. A hop failure rolls everything
    /// back and surfaces as [`StoreError::MigrationFailed`]; a missing
    /// hop is logged and skipped, but the final persisted version is the
    /// declared one either way.
    pub fn open(
        db: Arc<StoreDb>,
        config: StoreConfig,
        registry: &MigrationRegistry,
    ) -> Result<Self, StoreError> {
        let mut config = config;
        config.schema_version = config.schema_version.max(1);
        if config.format == VectorFormat::Binary {
            config.normalize = false;
        }
        if config.dimension == 0 {
            return Err(StoreError::Backend("store dimension must be > 0".into()));
        }

        let tables = TableNames::new(&config.name);
        let now = now_ms();

        let txn = db.begin_write()?;

        let existing: Option<SchemaMeta> = {
            let meta = txn.open_table(tables.meta())?;
            let result = match meta.get(SCHEMA_KEY)? {
                Some(guard) => Some(serde_json::from_slice(guard.value())?),
                None => None,
            };
            result
        };
        let mut log: Vec<(u32, u32)> = {
            let meta = txn.open_table(tables.meta())?;
            let result = match meta.get(MIGRATIONS_KEY)? {
                Some(guard) => serde_json::from_slice(guard.value())?,
                None => Vec::new(),
            };
            result
        };

        let mut schema = match existing {
            Some(schema) => {
                if schema.dimension != config.dimension {
                    return Err(StoreError::DimensionMismatch {
                        expected: schema.dimension,
                        got: config.dimension,
                    });
                }
                schema
            }
            None => SchemaMeta {
                version: 1,
                dimension: config.dimension,
                format: config.format.into(),
                normalize: config.normalize,
                indexes: Vec::new(),
                created_at_ms: now,
                updated_at_ms: now,
            },
        };

        if schema.version > config.schema_version {
            return Err(StoreError::SchemaNewerThanCode {
                declared: config.schema_version,
                persisted: schema.version,
            });
        }

        // The records table must exist before any hop backfills an index.
        txn.open_table(tables.records())?;

        if schema.version < config.schema_version {
            for from in schema.version..config.schema_version {
                let to = from + 1;
                match registry.get(from) {
                    Some(hop) => {
                        let mut ctx = MigrationCtx {
                            txn: &txn,
                            tables: &tables,
                            schema: &mut schema,
                        };
                        hop(&mut ctx).map_err(|e| StoreError::MigrationFailed {
                            from,
                            to,
                            cause: e.to_string(),
                        })?;
                        log.push((from, to));
                        tracing::info!(store = %config.name, from, to, "applied migration");
                    }
                    None => {
                        tracing::warn!(
                            store = %config.name,
                            from,
                            to,
                            "no migration registered for hop; skipping"
                        );
                    }
                }
            }
            schema.version = config.schema_version;
        }

        // Indexes configured but not yet live are created and backfilled.
        let missing: Vec<String> = config
            .meta_indexes
            .iter()
            .filter(|field| !schema.indexes.contains(*field))
            .cloned()
            .collect();
        if !missing.is_empty() {
            let mut ctx = MigrationCtx {
                txn: &txn,
                tables: &tables,
                schema: &mut schema,
            };
            for field in &missing {
                ctx.add_index(field)?;
            }
        }

        // Every live index table must exist even when empty.
        for field in &schema.indexes {
            let name = tables.index_name(field);
            txn.open_multimap_table(index_table(&name))?;
        }

        schema.normalize = config.normalize;
        schema.updated_at_ms = now;

        {
            let mut meta = txn.open_table(tables.meta())?;
            let schema_bytes = serde_json::to_vec(&schema)?;
            meta.insert(SCHEMA_KEY, schema_bytes.as_slice())?;
            let log_bytes = serde_json::to_vec(&log)?;
            meta.insert(MIGRATIONS_KEY, log_bytes.as_slice())?;
            let has_counter = meta.get(NEXT_ID_KEY)?.is_some();
            if !has_counter {
                meta.insert(NEXT_ID_KEY, 1u64.to_le_bytes().as_slice())?;
            }
        }
        txn.commit()?;

        let store = Self {
            db,
            config,
            tables,
            schema: RwLock::new(schema),
            applied: log,
            mirror: RwLock::new(None),
            accel: Mutex::new(AccelState::Disabled),
        };
        if store.config.cache {
            store.enable_cache()?;
        }
        Ok(store)
    }

    /// The store name.
    pub fn name(&self) -> &str {
        &self.config.name
    }

    /// The configuration this store was opened with.
    pub fn store_config(&self) -> &StoreConfig {
        &self.config
    }

    /// The current schema row.
    pub fn schema(&self) -> SchemaMeta {
        self.schema.read().unwrap().clone()
    }

    /// The persisted migrations log: every `(from, to)` hop ever applied.
    pub fn applied_migrations(&self) -> Vec<(u32, u32)> {
        self.applied.clone()
    }

    // ========================================================================
    // CRUD
    // ========================================================================

    /// Insert or update a record.
    ///
    /// The id is resolved in order: the explicit argument, then the
    /// configured id field of `meta`, then the store's counter. The
    /// resolved id is written back into `meta` and returned.
    pub fn upsert(
        &self,
        id: Option<u64>,
        vector: VectorInput,
        mut meta: Map<String, Value>,
    ) -> Result<u64, StoreError> {
        let (format, bytes) = self.encode_vector(&vector)?;
        let now = now_ms();

        let txn = self.db.begin_write()?;

        let resolved = id.or_else(|| meta.get(&self.config.id_field).and_then(|v| v.as_u64()));
        let id = {
            let mut meta_table = txn.open_table(self.tables.meta())?;
            let next = read_counter(&meta_table)?;
            match resolved {
                Some(id) => {
                    if id >= next {
                        meta_table.insert(NEXT_ID_KEY, (id + 1).to_le_bytes().as_slice())?;
                    }
                    id
                }
                None => {
                    meta_table.insert(NEXT_ID_KEY, (next + 1).to_le_bytes().as_slice())?;
                    next
                }
            }
        };

        if !self.config.id_field.is_empty() {
            meta.insert(self.config.id_field.clone(), Value::from(id));
        }

        let (created_at, old_meta) = {
            let records = txn.open_table(self.tables.records())?;
            let result = match records.get(id)? {
                Some(guard) => {
                    let row = StoredRow::decode(guard.value())?;
                    (row.created_at_ms, Some(row.meta_map()?))
                }
                None => (now, None),
            };
            result
        };

        let row = StoredRow {
            format,
            vector: bytes.clone(),
            meta: serde_json::to_string(&meta)?,
            created_at_ms: created_at,
            updated_at_ms: now,
        };
        {
            let mut records = txn.open_table(self.tables.records())?;
            let encoded = row.encode()?;
            records.insert(id, encoded.as_slice())?;
        }

        self.maintain_indexes(&txn, id, old_meta.as_ref(), Some(&meta))?;
        self.note_record_format(&txn, format, now)?;
        txn.commit()?;

        if let Some(mirror) = self.mirror.write().unwrap().as_mut() {
            mirror.insert(
                id,
                CachedRecord {
                    format,
                    vector: bytes,
                    meta,
                },
            );
        }
        if self.config.verbose {
            tracing::debug!(store = %self.config.name, id, %format, "upserted record");
        }
        Ok(id)
    }

    /// Point-get a record by id. Absent ids return `None`.
    pub fn get(&self, id: u64) -> Result<Option<VectorRecord>, StoreError> {
        let txn = self.db.begin_read()?;
        let records = self.open_records(&txn)?;
        match records.get(id)? {
            Some(guard) => Ok(Some(StoredRow::decode(guard.value())?.into_record(id)?)),
            None => Ok(None),
        }
    }

    /// Whether a record exists.
    pub fn contains(&self, id: u64) -> Result<bool, StoreError> {
        if let Some(mirror) = self.mirror.read().unwrap().as_ref() {
            return Ok(mirror.records.contains_key(&id));
        }
        let txn = self.db.begin_read()?;
        let records = self.open_records(&txn)?;
        Ok(records.get(id)?.is_some())
    }

    /// Delete a record. Absent ids return `Ok(false)`.
    pub fn delete(&self, id: u64) -> Result<bool, StoreError> {
        let txn = self.db.begin_write()?;
        let old_meta = {
            let mut records = txn.open_table(self.tables.records())?;
            let result = match records.remove(id)? {
                Some(guard) => {
                    let row = StoredRow::decode(guard.value())?;
                    Some(row.meta_map()?)
                }
                None => None,
            };
            result
        };
        let Some(old_meta) = old_meta else {
            return Ok(false);
        };

        self.maintain_indexes(&txn, id, Some(&old_meta), None)?;
        txn.commit()?;

        if let Some(mirror) = self.mirror.write().unwrap().as_mut() {
            mirror.remove(id);
        }
        if self.config.verbose {
            tracing::debug!(store = %self.config.name, id, "deleted record");
        }
        Ok(true)
    }

    /// Number of records.
    pub fn count(&self) -> Result<u64, StoreError> {
        if let Some(mirror) = self.mirror.read().unwrap().as_ref() {
            return Ok(mirror.len() as u64);
        }
        let txn = self.db.begin_read()?;
        let records = self.open_records(&txn)?;
        Ok(records.len()?)
    }

    /// Every record, in id order.
    pub fn scan(&self) -> Result<Vec<VectorRecord>, StoreError> {
        let txn = self.db.begin_read()?;
        let records = self.open_records(&txn)?;
        let mut out = Vec::new();
        for entry in records.iter()? {
            let (key, value) = entry?;
            out.push(StoredRow::decode(value.value())?.into_record(key.value())?);
        }
        Ok(out)
    }

    /// Remove every record and index entry. The schema row (and the id
    /// counter) survive.
    pub fn clear(&self) -> Result<(), StoreError> {
        let txn = self.db.begin_write()?;
        let ids: Vec<u64> = {
            let records = txn.open_table(self.tables.records())?;
            let mut ids = Vec::new();
            for entry in records.iter()? {
                ids.push(entry?.0.value());
            }
            ids
        };
        {
            let mut records = txn.open_table(self.tables.records())?;
            for id in ids {
                records.remove(id)?;
            }
        }
        let indexes = self.schema.read().unwrap().indexes.clone();
        for field in &indexes {
            let name = self.tables.index_name(field);
            txn.delete_multimap_table(index_table(&name))?;
            txn.open_multimap_table(index_table(&name))?;
        }
        txn.commit()?;

        if let Some(mirror) = self.mirror.write().unwrap().as_mut() {
            mirror.clear();
        }
        Ok(())
    }

    /// Ids indexed under `value` in the secondary index over `field`.
    pub fn find_by_index(&self, field: &str, value: &Value) -> Result<Vec<u64>, StoreError> {
        let indexed = self.schema.read().unwrap().indexes.iter().any(|f| f == field);
        if !indexed {
            return Err(StoreError::Backend(format!(
                "no index on meta field '{field}'"
            )));
        }
        let txn = self.db.begin_read()?;
        let name = self.tables.index_name(field);
        let index = txn.open_multimap_table(index_table(&name))?;
        let mut ids = Vec::new();
        for guard in index.get(index_key(value).as_str())? {
            ids.push(guard?.value());
        }
        ids.sort_unstable();
        Ok(ids)
    }

    // ========================================================================
    // Queries
    // ========================================================================

    /// Top-K nearest neighbors. Results are sorted best-score-first and
    /// contain at most `k` distinct ids.
    pub fn query(&self, query: Query) -> Result<Vec<SearchHit>, StoreError> {
        let Query {
            vector,
            k,
            metric,
            predicate,
            max_candidates,
        } = query;
        match vector {
            VectorInput::Dense(q) => self.query_dense(q, k, metric, predicate, max_candidates),
            VectorInput::Binary(bits) => {
                self.query_binary(bits, k, metric, predicate, max_candidates)
            }
        }
    }

    fn query_dense(
        &self,
        mut q: Vec<f32>,
        k: usize,
        metric: Distance,
        predicate: Option<MetaPredicate>,
        max_candidates: Option<usize>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if metric == Distance::Hamming {
            return Err(StoreError::FormatMismatch(
                "hamming metric requires a binary query".into(),
            ));
        }
        if q.len() != self.config.dimension {
            return Err(StoreError::DimensionMismatch {
                expected: self.config.dimension,
                got: q.len(),
            });
        }
        if self.config.normalize && metric == Distance::Cosine {
            let norm = l2_norm(&q);
            if norm > 0.0 {
                for x in &mut q {
                    *x /= norm;
                }
            }
        }

        let mut topk = TopK::new(k);
        self.for_each_candidate(max_candidates, |id, format, bytes, meta| {
            if let Some(accept) = &predicate {
                if !accept(meta) {
                    return Ok(());
                }
            }
            if format != VectorFormat::Dense {
                return Ok(());
            }
            let v = floats_from_le(bytes)?;
            let score = match metric {
                Distance::Cosine => dot(&q, &v),
                Distance::Euclidean => neg_euclidean(&q, &v),
                Distance::Hamming => unreachable!("rejected above"),
            };
            topk.offer(id, score, None, meta);
            Ok(())
        })?;
        Ok(topk.into_hits())
    }

    fn query_binary(
        &self,
        bits: BitSource,
        k: usize,
        metric: Distance,
        predicate: Option<MetaPredicate>,
        max_candidates: Option<usize>,
    ) -> Result<Vec<SearchHit>, StoreError> {
        if metric != Distance::Hamming {
            return Err(StoreError::FormatMismatch(
                "binary queries rank by hamming distance".into(),
            ));
        }
        // Pack the query once; every candidate reuses it.
        let q = pack_bits(&bits, self.config.dimension)?;

        let mut topk = TopK::new(k);
        let mut accel = self.accel.lock().unwrap();
        self.for_each_candidate(max_candidates, |id, format, bytes, meta| {
            if let Some(accept) = &predicate {
                if !accept(meta) {
                    return Ok(());
                }
            }
            if format != VectorFormat::Binary {
                return Ok(());
            }
            let distance = accel
                .hamming(&q, bytes)
                .unwrap_or_else(|| hamming_fallback(&q, bytes));
            topk.offer(id, -(distance as f32), Some(distance), meta);
            Ok(())
        })?;
        Ok(topk.into_hits())
    }

    /// Visit candidates in id order: the mirror when enabled, otherwise
    /// a store cursor.
    fn for_each_candidate<F>(
        &self,
        max_candidates: Option<usize>,
        mut visit: F,
    ) -> Result<(), StoreError>
    where
        F: FnMut(u64, VectorFormat, &[u8], &Map<String, Value>) -> Result<(), StoreError>,
    {
        let limit = max_candidates.unwrap_or(usize::MAX);

        let mirror_guard = self.mirror.read().unwrap();
        if let Some(mirror) = mirror_guard.as_ref() {
            for (id, record) in mirror.records.iter().take(limit) {
                visit(*id, record.format, &record.vector, &record.meta)?;
            }
            return Ok(());
        }
        drop(mirror_guard);

        let txn = self.db.begin_read()?;
        let records = self.open_records(&txn)?;
        let mut examined = 0usize;
        for entry in records.iter()? {
            if examined >= limit {
                break;
            }
            examined += 1;
            let (key, value) = entry?;
            let row = StoredRow::decode(value.value())?;
            let meta = row.meta_map()?;
            visit(key.value(), row.format, &row.vector, &meta)?;
        }
        Ok(())
    }

    // ========================================================================
    // Cache & accel
    // ========================================================================

    /// Hydrate the in-memory mirror with one pass over every record.
    pub fn enable_cache(&self) -> Result<(), StoreError> {
        let mut mirror = Mirror::default();
        let txn = self.db.begin_read()?;
        let records = self.open_records(&txn)?;
        for entry in records.iter()? {
            let (key, value) = entry?;
            let row = StoredRow::decode(value.value())?;
            let meta = row.meta_map()?;
            mirror.insert(
                key.value(),
                CachedRecord {
                    format: row.format,
                    vector: row.vector,
                    meta,
                },
            );
        }
        tracing::debug!(store = %self.config.name, records = mirror.len(), "hydrated cache mirror");
        *self.mirror.write().unwrap() = Some(mirror);
        Ok(())
    }

    /// Drop the mirror; queries go back to store cursors.
    pub fn disable_cache(&self) {
        *self.mirror.write().unwrap() = None;
    }

    pub fn cache_enabled(&self) -> bool {
        self.mirror.read().unwrap().is_some()
    }

    /// Supply an accelerated popcount module.
    ///
    /// If none of the accepted exports resolve, a warning is logged and
    /// the table fallback is used for the rest of the session; this call
    /// itself never fails.
    pub fn enable_accel(&self, module: Box<dyn PopcountModule>) {
        *self.accel.lock().unwrap() = AccelState::resolve(module);
    }

    /// Drop any loaded accel module.
    pub fn disable_accel(&self) {
        *self.accel.lock().unwrap() = AccelState::Disabled;
    }

    /// Whether the accelerated path is live.
    pub fn accel_active(&self) -> bool {
        matches!(*self.accel.lock().unwrap(), AccelState::Ready { .. })
    }

    // ========================================================================
    // Export / import
    // ========================================================================

    /// Export the schema and every record.
    pub fn export(&self) -> Result<StoreDump, StoreError> {
        let mut vectors = Vec::new();
        for record in self.scan()? {
            let vector = match record.vector {
                crate::record::VectorData::Dense(values) => DumpVector::Dense(values),
                crate::record::VectorData::Binary(bytes) => DumpVector::Binary(bytes),
            };
            vectors.push(DumpRecord {
                id: record.id,
                format: record.format,
                vector,
                meta: record.meta,
                created_at_ms: record.created_at_ms,
                updated_at_ms: record.updated_at_ms,
            });
        }
        Ok(StoreDump {
            schema: self.schema(),
            vectors,
        })
    }

    /// Import a dump, optionally clearing first. Records keep their
    /// original ids, formats, and timestamps; vectors are stored as
    /// exported (no re-normalization). Schema compatibility is the
    /// caller's responsibility; a dimension mismatch fails the whole
    /// import before anything is written.
    pub fn import(&self, dump: &StoreDump, clear_before: bool) -> Result<u64, StoreError> {
        for record in &dump.vectors {
            match (&record.vector, record.format) {
                (DumpVector::Dense(values), VectorFormat::Dense) => {
                    if values.len() != self.config.dimension {
                        return Err(StoreError::DimensionMismatch {
                            expected: self.config.dimension,
                            got: values.len(),
                        });
                    }
                }
                (DumpVector::Binary(bytes), VectorFormat::Binary) => {
                    if bytes.len() * 8 < self.config.dimension {
                        return Err(StoreError::DimensionMismatch {
                            expected: self.config.dimension,
                            got: bytes.len() * 8,
                        });
                    }
                }
                _ => {
                    return Err(StoreError::FormatMismatch(format!(
                        "record {} declares {} but carries the other payload",
                        record.id, record.format
                    )))
                }
            }
        }

        if clear_before {
            self.clear()?;
        }

        let txn = self.db.begin_write()?;
        let mut max_id = 0u64;
        let mut mirror_updates: Vec<(u64, CachedRecord)> = Vec::new();
        for record in &dump.vectors {
            max_id = max_id.max(record.id);
            let bytes = match &record.vector {
                DumpVector::Dense(values) => floats_to_le(values),
                DumpVector::Binary(packed) => packed.clone(),
            };
            let old_meta = {
                let records = txn.open_table(self.tables.records())?;
                let result = match records.get(record.id)? {
                    Some(guard) => Some(StoredRow::decode(guard.value())?.meta_map()?),
                    None => None,
                };
                result
            };
            let row = StoredRow {
                format: record.format,
                vector: bytes.clone(),
                meta: serde_json::to_string(&record.meta)?,
                created_at_ms: record.created_at_ms,
                updated_at_ms: record.updated_at_ms,
            };
            {
                let mut records = txn.open_table(self.tables.records())?;
                let encoded = row.encode()?;
                records.insert(record.id, encoded.as_slice())?;
            }
            self.maintain_indexes(&txn, record.id, old_meta.as_ref(), Some(&record.meta))?;
            self.note_record_format(&txn, record.format, now_ms())?;

            mirror_updates.push((
                record.id,
                CachedRecord {
                    format: record.format,
                    vector: bytes,
                    meta: record.meta.clone(),
                },
            ));
        }
        {
            let mut meta_table = txn.open_table(self.tables.meta())?;
            let next = read_counter(&meta_table)?;
            if max_id >= next {
                meta_table.insert(NEXT_ID_KEY, (max_id + 1).to_le_bytes().as_slice())?;
            }
        }
        txn.commit()?;

        if let Some(mirror) = self.mirror.write().unwrap().as_mut() {
            for (id, cached) in mirror_updates {
                mirror.insert(id, cached);
            }
        }
        Ok(dump.vectors.len() as u64)
    }

    // ========================================================================
    // Internals
    // ========================================================================

    fn encode_vector(&self, input: &VectorInput) -> Result<(VectorFormat, Vec<u8>), StoreError> {
        match input {
            VectorInput::Dense(values) => {
                if values.len() != self.config.dimension {
                    return Err(StoreError::DimensionMismatch {
                        expected: self.config.dimension,
                        got: values.len(),
                    });
                }
                let mut v = values.clone();
                if self.config.normalize {
                    let norm = l2_norm(&v);
                    // The zero vector passes through unchanged.
                    if norm > 0.0 {
                        for x in &mut v {
                            *x /= norm;
                        }
                    }
                }
                Ok((VectorFormat::Dense, floats_to_le(&v)))
            }
            VectorInput::Binary(bits) => Ok((
                VectorFormat::Binary,
                pack_bits(bits, self.config.dimension)?,
            )),
        }
    }

    fn open_records<'t>(
        &self,
        txn: &'t ReadTransaction,
    ) -> Result<redb::ReadOnlyTable<u64, &'static [u8]>, StoreError> {
        match txn.open_table(self.tables.records()) {
            Ok(table) => Ok(table),
            Err(redb::TableError::TableDoesNotExist(_)) => {
                Err(StoreError::NotInitialized(self.config.name.clone()))
            }
            Err(e) => Err(e.into()),
        }
    }

    fn maintain_indexes(
        &self,
        txn: &redb::WriteTransaction,
        id: u64,
        old_meta: Option<&Map<String, Value>>,
        new_meta: Option<&Map<String, Value>>,
    ) -> Result<(), StoreError> {
        let indexes = self.schema.read().unwrap().indexes.clone();
        for field in &indexes {
            let old_value = old_meta.and_then(|m| m.get(field));
            let new_value = new_meta.and_then(|m| m.get(field));
            if old_value == new_value {
                continue;
            }
            let name = self.tables.index_name(field);
            let mut index = txn.open_multimap_table(index_table(&name))?;
            if let Some(v) = old_value {
                index.remove(index_key(v).as_str(), id)?;
            }
            if let Some(v) = new_value {
                index.insert(index_key(v).as_str(), id)?;
            }
        }
        Ok(())
    }

    /// Record that a vector of `format` now lives in the store; flips the
    /// schema format to `Mixed` when both kinds are present.
    fn note_record_format(
        &self,
        txn: &redb::WriteTransaction,
        format: VectorFormat,
        now: i64,
    ) -> Result<(), StoreError> {
        let mut schema = self.schema.write().unwrap();
        if schema.format == SchemaFormat::Mixed || schema.format == SchemaFormat::from(format) {
            return Ok(());
        }
        schema.format = SchemaFormat::Mixed;
        schema.updated_at_ms = now;
        let mut meta = txn.open_table(self.tables.meta())?;
        let bytes = serde_json::to_vec(&*schema)?;
        meta.insert(SCHEMA_KEY, bytes.as_slice())?;
        Ok(())
    }
}

/// A portable dump of one store.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct StoreDump {
    pub schema: SchemaMeta,
    pub vectors: Vec<DumpRecord>,
}

/// One exported record.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DumpRecord {
    pub id: u64,
    pub format: VectorFormat,
    pub vector: DumpVector,
    pub meta: Map<String, Value>,
    pub created_at_ms: i64,
    pub updated_at_ms: i64,
}

/// Exported vector payload: floats for dense, packed bytes for binary.
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DumpVector {
    Dense(Vec<f32>),
    Binary(Vec<u8>),
}

fn now_ms() -> i64 {
    chrono::Utc::now().timestamp_millis()
}

fn read_counter(
    meta: &redb::Table<'_, &'static str, &'static [u8]>,
) -> Result<u64, StoreError> {
    match meta.get(NEXT_ID_KEY)? {
        Some(guard) => {
            let bytes: [u8; 8] = guard
                .value()
                .try_into()
                .map_err(|_| StoreError::Backend("corrupt id counter".into()))?;
            Ok(u64::from_le_bytes(bytes))
        }
        None => Ok(1),
    }
}
