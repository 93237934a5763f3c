//! # Storage Backends
//!
//! Implementations of [`InstanceStore`]:
//! - `MemoryStore`: BTreeMap tables, volatile
//! - `RedbStore`: redb embedded database, ACID per call
//!
//! [`StorageBackend`] picks one of them at runtime.

mod memory;
mod redb_store;

pub use memory::MemoryStore;
pub use redb_store::RedbStore;

use crate::filter::Filter;
use crate::store::{Collection, FindResult, InstanceStore, Page};
use crate::types::{CmdbError, Document, InstId};
use std::path::Path;

/// Store selected at runtime.
#[derive(Debug)]
pub enum StorageBackend {
    /// In-memory tables (fast, volatile).
    InMemory(MemoryStore),
    /// Disk-backed tables using redb (ACID, persistent).
    Persistent(RedbStore),
}

impl Default for StorageBackend {
    fn default() -> Self {
        Self::InMemory(MemoryStore::new())
    }
}

impl StorageBackend {
    /// Open or create a redb database at the given path.
    pub fn redb(path: impl AsRef<Path>) -> Result<Self, CmdbError> {
        Ok(Self::Persistent(RedbStore::open(path)?))
    }

    #[must_use]
    pub fn is_persistent(&self) -> bool {
        matches!(self, Self::Persistent(_))
    }
}

impl InstanceStore for StorageBackend {
    fn find(
        &self,
        collection: &Collection,
        filter: &Filter,
        page: &Page,
    ) -> Result<FindResult, CmdbError> {
        match self {
            Self::InMemory(store) => store.find(collection, filter, page),
            Self::Persistent(store) => store.find(collection, filter, page),
        }
    }

    fn count(&self, collection: &Collection, filter: &Filter) -> Result<u64, CmdbError> {
        match self {
            Self::InMemory(store) => store.count(collection, filter),
            Self::Persistent(store) => store.count(collection, filter),
        }
    }

    fn create(&mut self, collection: &Collection, doc: Document) -> Result<InstId, CmdbError> {
        match self {
            Self::InMemory(store) => store.create(collection, doc),
            Self::Persistent(store) => store.create(collection, doc),
        }
    }

    fn update(
        &mut self,
        collection: &Collection,
        filter: &Filter,
        patch: &Document,
    ) -> Result<u64, CmdbError> {
        match self {
            Self::InMemory(store) => store.update(collection, filter, patch),
            Self::Persistent(store) => store.update(collection, filter, patch),
        }
    }

    fn delete(&mut self, collection: &Collection, filter: &Filter) -> Result<u64, CmdbError> {
        match self {
            Self::InMemory(store) => store.delete(collection, filter),
            Self::Persistent(store) => store.delete(collection, filter),
        }
    }
}
