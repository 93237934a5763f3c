//! # redb-backed Document Store
//!
//! A disk-backed [`InstanceStore`] using the redb embedded database.
//!
//! Every call runs in its own transaction, which gives the engine the
//! per-document atomicity it relies on:
//! - ACID transactions
//! - Crash safety (copy-on-write B-trees)
//! - MVCC (concurrent readers, single writer)
//!
//! Documents are keyed by `(collection, id)` so one collection is a
//! contiguous key range; values are postcard-encoded [`Document`]s.

use crate::filter::Filter;
use crate::store::{
    Collection, FindResult, InstanceStore, Page, apply_patch, explicit_id, paginate,
};
use crate::types::{CmdbError, Document, InstId, Value};
use redb::{Database, ReadableDatabase, ReadableTable, TableDefinition};
use std::path::Path;

/// Table for documents: (collection, id) -> postcard bytes
const DOCUMENTS: TableDefinition<(&str, i64), &[u8]> = TableDefinition::new("documents");

/// Table for id sequences: collection -> last assigned id
const SEQUENCES: TableDefinition<&str, i64> = TableDefinition::new("sequences");

/// A disk-backed document store using redb.
pub struct RedbStore {
    db: Database,
}

impl std::fmt::Debug for RedbStore {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("RedbStore").finish_non_exhaustive()
    }
}

/// Collect `(id, document)` pairs of one collection matching `filter`.
fn scan<T>(table: &T, name: &str, filter: &Filter) -> Result<Vec<(i64, Document)>, CmdbError>
where
    T: ReadableTable<(&'static str, i64), &'static [u8]>,
{
    let mut rows = Vec::new();
    for entry in table
        .range((name, i64::MIN)..=(name, i64::MAX))
        .map_err(|e| CmdbError::Store(e.to_string()))?
    {
        let (key, value) = entry.map_err(|e| CmdbError::Store(e.to_string()))?;
        let (_, id) = key.value();
        let doc: Document = postcard::from_bytes(value.value())
            .map_err(|e| CmdbError::Serialization(e.to_string()))?;
        if filter.matches(&doc) {
            rows.push((id, doc));
        }
    }
    Ok(rows)
}

impl RedbStore {
    /// Open or create a store at the given path.
    pub fn open(path: impl AsRef<Path>) -> Result<Self, CmdbError> {
        let db = Database::create(path.as_ref()).map_err(|e| CmdbError::Store(e.to_string()))?;

        // Initialize tables if they don't exist
        {
            let write_txn = db
                .begin_write()
                .map_err(|e| CmdbError::Store(e.to_string()))?;
            let _ = write_txn
                .open_table(DOCUMENTS)
                .map_err(|e| CmdbError::Store(e.to_string()))?;
            let _ = write_txn
                .open_table(SEQUENCES)
                .map_err(|e| CmdbError::Store(e.to_string()))?;
            write_txn
                .commit()
                .map_err(|e| CmdbError::Store(e.to_string()))?;
        }

        Ok(Self { db })
    }

    /// Compact the database file.
    pub fn compact(&mut self) -> Result<(), CmdbError> {
        self.db
            .compact()
            .map_err(|e| CmdbError::Store(e.to_string()))?;
        Ok(())
    }

    fn read_rows(
        &self,
        collection: &Collection,
        filter: &Filter,
    ) -> Result<Vec<(i64, Document)>, CmdbError> {
        let read_txn = self
            .db
            .begin_read()
            .map_err(|e| CmdbError::Store(e.to_string()))?;
        let table = read_txn
            .open_table(DOCUMENTS)
            .map_err(|e| CmdbError::Store(e.to_string()))?;
        scan(&table, collection.name(), filter)
    }
}

// =============================================================================
// INSTANCESTORE TRAIT IMPLEMENTATION
// =============================================================================

impl InstanceStore for RedbStore {
    fn find(
        &self,
        collection: &Collection,
        filter: &Filter,
        page: &Page,
    ) -> Result<FindResult, CmdbError> {
        let rows = self
            .read_rows(collection, filter)?
            .into_iter()
            .map(|(_, doc)| doc)
            .collect();
        Ok(paginate(rows, page))
    }

    fn count(&self, collection: &Collection, filter: &Filter) -> Result<u64, CmdbError> {
        Ok(self.read_rows(collection, filter)?.len() as u64)
    }

    fn create(&mut self, collection: &Collection, mut doc: Document) -> Result<InstId, CmdbError> {
        let name = collection.name();
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CmdbError::Store(e.to_string()))?;
        let id = {
            let mut docs = write_txn
                .open_table(DOCUMENTS)
                .map_err(|e| CmdbError::Store(e.to_string()))?;
            let mut sequences = write_txn
                .open_table(SEQUENCES)
                .map_err(|e| CmdbError::Store(e.to_string()))?;

            let last = sequences
                .get(name)
                .map_err(|e| CmdbError::Store(e.to_string()))?
                .map(|v| v.value())
                .unwrap_or(0);

            let id = match explicit_id(&doc, collection.id_field()) {
                Some(id) => {
                    let taken = docs
                        .get((name, id))
                        .map_err(|e| CmdbError::Store(e.to_string()))?
                        .is_some();
                    if taken {
                        return Err(CmdbError::DuplicateItem(format!(
                            "{}={}",
                            collection.id_field(),
                            id
                        )));
                    }
                    id
                }
                None => last.saturating_add(1),
            };

            doc.insert(collection.id_field().to_string(), Value::Int(id));
            let bytes = postcard::to_allocvec(&doc)
                .map_err(|e| CmdbError::Serialization(e.to_string()))?;
            docs.insert((name, id), bytes.as_slice())
                .map_err(|e| CmdbError::Store(e.to_string()))?;
            sequences
                .insert(name, last.max(id))
                .map_err(|e| CmdbError::Store(e.to_string()))?;
            id
        };
        write_txn
            .commit()
            .map_err(|e| CmdbError::Store(e.to_string()))?;
        Ok(InstId(id))
    }

    fn update(
        &mut self,
        collection: &Collection,
        filter: &Filter,
        patch: &Document,
    ) -> Result<u64, CmdbError> {
        let name = collection.name();
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CmdbError::Store(e.to_string()))?;
        let touched = {
            let mut docs = write_txn
                .open_table(DOCUMENTS)
                .map_err(|e| CmdbError::Store(e.to_string()))?;
            let rows = scan(&docs, name, filter)?;
            for (id, mut doc) in rows.iter().cloned() {
                apply_patch(&mut doc, patch, collection.id_field());
                let bytes = postcard::to_allocvec(&doc)
                    .map_err(|e| CmdbError::Serialization(e.to_string()))?;
                docs.insert((name, id), bytes.as_slice())
                    .map_err(|e| CmdbError::Store(e.to_string()))?;
            }
            rows.len() as u64
        };
        write_txn
            .commit()
            .map_err(|e| CmdbError::Store(e.to_string()))?;
        Ok(touched)
    }

    fn delete(&mut self, collection: &Collection, filter: &Filter) -> Result<u64, CmdbError> {
        let name = collection.name();
        let write_txn = self
            .db
            .begin_write()
            .map_err(|e| CmdbError::Store(e.to_string()))?;
        let removed = {
            let mut docs = write_txn
                .open_table(DOCUMENTS)
                .map_err(|e| CmdbError::Store(e.to_string()))?;
            let rows = scan(&docs, name, filter)?;
            for (id, _) in &rows {
                docs.remove((name, *id))
                    .map_err(|e| CmdbError::Store(e.to_string()))?;
            }
            rows.len() as u64
        };
        write_txn
            .commit()
            .map_err(|e| CmdbError::Store(e.to_string()))?;
        Ok(removed)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::{DocumentExt, document};
    use tempfile::tempdir;

    fn modules() -> Collection {
        Collection::fixed("module", "bk_module_id")
    }

    #[test]
    fn basic_operations() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("cmdb.redb")).expect("open db");

        let a = store
            .create(&modules(), document([("bk_parent_id", 1)]))
            .expect("create");
        let b = store
            .create(&modules(), document([("bk_parent_id", 2)]))
            .expect("create");
        assert_ne!(a, b);
        assert_eq!(store.count(&modules(), &Filter::All).expect("count"), 2);

        let touched = store
            .update(
                &modules(),
                &Filter::eq("bk_parent_id", 2),
                &document([("bk_parent_id", 1)]),
            )
            .expect("update");
        assert_eq!(touched, 1);
        assert_eq!(
            store
                .count(&modules(), &Filter::eq("bk_parent_id", 1))
                .expect("count"),
            2
        );

        let removed = store.delete(&modules(), &Filter::All).expect("delete");
        assert_eq!(removed, 2);
    }

    #[test]
    fn collections_do_not_bleed() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("cmdb.redb")).expect("open db");
        let sets = Collection::fixed("set", "bk_set_id");

        store.create(&sets, Document::new()).expect("create");
        store.create(&modules(), Document::new()).expect("create");
        store.create(&modules(), Document::new()).expect("create");

        assert_eq!(store.count(&sets, &Filter::All).expect("count"), 1);
        assert_eq!(store.count(&modules(), &Filter::All).expect("count"), 2);
    }

    #[test]
    fn recovery_persistence_after_reopen() {
        let temp = tempdir().expect("temp dir");
        let path = temp.path().join("cmdb.redb");

        {
            let mut store = RedbStore::open(&path).expect("open db");
            store
                .create(&modules(), document([("bk_module_name", "idle")]))
                .expect("create");
        }

        {
            let mut store = RedbStore::open(&path).expect("reopen db");
            let rows = store.find_all(&modules(), &Filter::All).expect("find");
            assert_eq!(rows.len(), 1);
            assert_eq!(rows[0].text("bk_module_name"), Some("idle"));

            // Sequence survives the reopen.
            let next = store.create(&modules(), Document::new()).expect("create");
            assert_eq!(next, InstId(2));
        }
    }

    #[test]
    fn duplicate_explicit_id_rejected() {
        let temp = tempdir().expect("temp dir");
        let mut store = RedbStore::open(temp.path().join("cmdb.redb")).expect("open db");
        store
            .create(&modules(), document([("bk_module_id", 5)]))
            .expect("create");
        let err = store.create(&modules(), document([("bk_module_id", 5)]));
        assert!(matches!(err, Err(CmdbError::DuplicateItem(_))));
    }
}
