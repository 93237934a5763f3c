//! # In-Memory Store
//!
//! BTreeMap-backed [`InstanceStore`]. Documents iterate in id order, which
//! keeps every read deterministic. Used by tests and dry runs.

use crate::filter::Filter;
use crate::store::{
    Collection, FindResult, InstanceStore, Page, apply_patch, explicit_id, paginate,
};
use crate::types::{CmdbError, Document, InstId, Value};
use std::collections::BTreeMap;

/// A volatile document store.
#[derive(Debug, Clone, Default)]
pub struct MemoryStore {
    tables: BTreeMap<String, BTreeMap<i64, Document>>,
    sequences: BTreeMap<String, i64>,
}

impl MemoryStore {
    #[must_use]
    pub fn new() -> Self {
        Self::default()
    }

    /// Number of documents held in a collection.
    #[must_use]
    pub fn len(&self, collection: &Collection) -> usize {
        self.tables.get(collection.name()).map_or(0, BTreeMap::len)
    }

    /// Whether no collection holds any document.
    #[must_use]
    pub fn is_empty(&self) -> bool {
        self.tables.values().all(BTreeMap::is_empty)
    }

    fn matching_ids(&self, collection: &Collection, filter: &Filter) -> Vec<i64> {
        self.tables
            .get(collection.name())
            .map(|table| {
                table
                    .iter()
                    .filter(|(_, doc)| filter.matches(doc))
                    .map(|(id, _)| *id)
                    .collect()
            })
            .unwrap_or_default()
    }
}

impl InstanceStore for MemoryStore {
    fn find(
        &self,
        collection: &Collection,
        filter: &Filter,
        page: &Page,
    ) -> Result<FindResult, CmdbError> {
        let rows = self
            .tables
            .get(collection.name())
            .map(|table| {
                table
                    .values()
                    .filter(|doc| filter.matches(doc))
                    .cloned()
                    .collect()
            })
            .unwrap_or_default();
        Ok(paginate(rows, page))
    }

    fn count(&self, collection: &Collection, filter: &Filter) -> Result<u64, CmdbError> {
        Ok(self.matching_ids(collection, filter).len() as u64)
    }

    fn create(&mut self, collection: &Collection, mut doc: Document) -> Result<InstId, CmdbError> {
        let table = self.tables.entry(collection.name().to_string()).or_default();
        let sequence = self
            .sequences
            .entry(collection.name().to_string())
            .or_insert(0);

        let id = match explicit_id(&doc, collection.id_field()) {
            Some(id) if table.contains_key(&id) => {
                return Err(CmdbError::DuplicateItem(format!(
                    "{}={}",
                    collection.id_field(),
                    id
                )));
            }
            Some(id) => id,
            None => sequence.saturating_add(1),
        };
        *sequence = (*sequence).max(id);

        doc.insert(collection.id_field().to_string(), Value::Int(id));
        table.insert(id, doc);
        Ok(InstId(id))
    }

    fn update(
        &mut self,
        collection: &Collection,
        filter: &Filter,
        patch: &Document,
    ) -> Result<u64, CmdbError> {
        let Some(table) = self.tables.get_mut(collection.name()) else {
            return Ok(0);
        };
        let mut touched = 0_u64;
        for doc in table.values_mut().filter(|doc| filter.matches(doc)) {
            apply_patch(doc, patch, collection.id_field());
            touched = touched.saturating_add(1);
        }
        Ok(touched)
    }

    fn delete(&mut self, collection: &Collection, filter: &Filter) -> Result<u64, CmdbError> {
        let ids = self.matching_ids(collection, filter);
        if let Some(table) = self.tables.get_mut(collection.name()) {
            for id in &ids {
                table.remove(id);
            }
        }
        Ok(ids.len() as u64)
    }
}
