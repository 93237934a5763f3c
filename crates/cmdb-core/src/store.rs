//! # Instance Store Interface
//!
//! The engine reads and writes every document through [`InstanceStore`].
//! Collections are addressed by name and carry the name of their numeric
//! id field; conditions are [`Filter`] trees.
//!
//! Two implementations ship with the crate:
//! - [`MemoryStore`](crate::storage::MemoryStore): BTreeMap-backed, volatile
//! - [`RedbStore`](crate::storage::RedbStore): disk-backed ACID storage
//!
//! Instance lookups go through [`InstanceSource`], which resolves an object
//! id to the collection and id field its instances live under.

use crate::filter::Filter;
use crate::primitives::{
    BIZ, FIELD_BIZ_ID, FIELD_BIZ_NAME, FIELD_HOST_ID, FIELD_HOST_NAME, FIELD_ID, FIELD_INST_ID,
    FIELD_INST_NAME, FIELD_MODULE_ID, FIELD_MODULE_NAME, FIELD_OBJ_ID, FIELD_PROCESS_ID,
    FIELD_PROCESS_NAME, FIELD_SET_ID, FIELD_SET_NAME, HOST, MODULE, PROCESS, SET,
};
use crate::types::{CmdbError, Document, InstId, Value};
use std::borrow::Cow;
use std::collections::BTreeSet;

/// Shared collection of custom-object instances, scoped by `bk_obj_id`.
pub const TABLE_OBJECT_BASE: &str = "cc_ObjectBase";

// =============================================================================
// COLLECTION / PAGE / RESULTS
// =============================================================================

/// A named collection and the field holding each document's numeric id.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub struct Collection {
    name: Cow<'static, str>,
    id_field: Cow<'static, str>,
}

impl Collection {
    #[must_use]
    pub const fn fixed(name: &'static str, id_field: &'static str) -> Self {
        Self {
            name: Cow::Borrowed(name),
            id_field: Cow::Borrowed(id_field),
        }
    }

    /// A registry or relation table keyed by `id`.
    #[must_use]
    pub const fn table(name: &'static str) -> Self {
        Self::fixed(name, FIELD_ID)
    }

    #[must_use]
    pub fn name(&self) -> &str {
        &self.name
    }

    #[must_use]
    pub fn id_field(&self) -> &str {
        &self.id_field
    }
}

/// Pagination and ordering of a `find`.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct Page {
    pub start: usize,
    pub limit: Option<usize>,
    /// Sort field, ascending. Documents are otherwise in id order.
    pub sort: Option<String>,
}

impl Page {
    /// Every matching row.
    #[must_use]
    pub fn all() -> Self {
        Self::default()
    }

    #[must_use]
    pub fn window(start: usize, limit: usize) -> Self {
        Self {
            start,
            limit: Some(limit),
            sort: None,
        }
    }

    #[must_use]
    pub fn sorted_by(mut self, field: &str) -> Self {
        self.sort = Some(field.to_string());
        self
    }
}

/// Rows of one page plus the total number of matches.
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct FindResult {
    pub count: u64,
    pub rows: Vec<Document>,
}

/// Per-item outcome of [`InstanceStore::create_many`].
#[derive(Debug, Clone, PartialEq, Eq, Default)]
pub struct CreateManyResult {
    /// `(input index, assigned id)`.
    pub created: Vec<(usize, InstId)>,
    /// Input indexes whose explicit id already existed.
    pub repeated: Vec<usize>,
    /// Input indexes that failed for another reason.
    pub exceptions: Vec<(usize, String)>,
}

// =============================================================================
// INSTANCE STORE TRAIT
// =============================================================================

/// Document store consumed by the engine.
///
/// Every call is a synchronous round trip. Implementations guarantee
/// per-call atomicity only.
pub trait InstanceStore {
    fn find(
        &self,
        collection: &Collection,
        filter: &Filter,
        page: &Page,
    ) -> Result<FindResult, CmdbError>;

    fn count(&self, collection: &Collection, filter: &Filter) -> Result<u64, CmdbError>;

    /// Insert one document. A missing or zero id field is assigned from the
    /// collection's sequence; an explicit id that exists is `DuplicateItem`.
    fn create(&mut self, collection: &Collection, doc: Document) -> Result<InstId, CmdbError>;

    /// Merge `patch` into every matching document. The id field is never
    /// overwritten. Returns the number of documents touched.
    fn update(
        &mut self,
        collection: &Collection,
        filter: &Filter,
        patch: &Document,
    ) -> Result<u64, CmdbError>;

    /// Remove every matching document, returning how many went away.
    fn delete(&mut self, collection: &Collection, filter: &Filter) -> Result<u64, CmdbError>;

    /// Insert several documents, reporting each item's fate.
    fn create_many(
        &mut self,
        collection: &Collection,
        docs: Vec<Document>,
    ) -> Result<CreateManyResult, CmdbError> {
        let mut result = CreateManyResult::default();
        for (index, doc) in docs.into_iter().enumerate() {
            match self.create(collection, doc) {
                Ok(id) => result.created.push((index, id)),
                Err(CmdbError::DuplicateItem(_)) => result.repeated.push(index),
                Err(e @ CmdbError::Store(_)) => return Err(e),
                Err(e) => result.exceptions.push((index, e.to_string())),
            }
        }
        Ok(result)
    }

    /// Sorted distinct values of `field` over the matching documents.
    fn distinct_field(
        &self,
        collection: &Collection,
        field: &str,
        filter: &Filter,
    ) -> Result<Vec<Value>, CmdbError> {
        let rows = self.find(collection, filter, &Page::all())?.rows;
        let values: BTreeSet<Value> = rows
            .into_iter()
            .filter_map(|mut doc| doc.remove(field))
            .filter(|v| !v.is_null())
            .collect();
        Ok(values.into_iter().collect())
    }

    /// Every matching document.
    fn find_all(&self, collection: &Collection, filter: &Filter) -> Result<Vec<Document>, CmdbError> {
        Ok(self.find(collection, filter, &Page::all())?.rows)
    }

    fn find_one(
        &self,
        collection: &Collection,
        filter: &Filter,
    ) -> Result<Option<Document>, CmdbError> {
        Ok(self
            .find(collection, filter, &Page::window(0, 1))?
            .rows
            .into_iter()
            .next())
    }

    /// Distinct integer ids stored in `field`.
    fn distinct_ids(
        &self,
        collection: &Collection,
        field: &str,
        filter: &Filter,
    ) -> Result<Vec<InstId>, CmdbError> {
        Ok(self
            .distinct_field(collection, field, filter)?
            .into_iter()
            .filter_map(|v| v.as_i64())
            .map(InstId)
            .collect())
    }
}

// =============================================================================
// SHARED HELPERS FOR IMPLEMENTATIONS
// =============================================================================

/// Apply ordering and the page window to already-filtered rows.
#[must_use]
pub fn paginate(mut rows: Vec<Document>, page: &Page) -> FindResult {
    if let Some(field) = &page.sort {
        rows.sort_by(|a, b| a.get(field).cmp(&b.get(field)));
    }
    let count = rows.len() as u64;
    let rows = rows
        .into_iter()
        .skip(page.start)
        .take(page.limit.unwrap_or(usize::MAX))
        .collect();
    FindResult { count, rows }
}

/// Merge `patch` into `doc`, leaving `id_field` untouched.
pub fn apply_patch(doc: &mut Document, patch: &Document, id_field: &str) {
    for (field, value) in patch {
        if field != id_field {
            doc.insert(field.clone(), value.clone());
        }
    }
}

/// Explicit id carried by a document about to be created, if any.
#[must_use]
pub fn explicit_id(doc: &Document, id_field: &str) -> Option<i64> {
    doc.get(id_field)
        .and_then(Value::as_i64)
        .filter(|id| *id > 0)
}

// =============================================================================
// INSTANCE SOURCE
// =============================================================================

/// Where the instances of an object live.
///
/// Hosts have a dedicated collection and are never scoped by object id;
/// built-in objects have their own collections; custom objects share
/// [`TABLE_OBJECT_BASE`] and are scoped by `bk_obj_id`.
#[derive(Debug, Clone, PartialEq, Eq, PartialOrd, Ord, Hash)]
pub enum InstanceSource {
    Host,
    Generic(String),
}

impl InstanceSource {
    /// Resolve an object id.
    #[must_use]
    pub fn of(obj_id: &str) -> Self {
        if obj_id == HOST {
            InstanceSource::Host
        } else {
            InstanceSource::Generic(obj_id.to_string())
        }
    }

    #[must_use]
    pub fn obj_id(&self) -> &str {
        match self {
            InstanceSource::Host => HOST,
            InstanceSource::Generic(obj_id) => obj_id,
        }
    }

    /// Whether instances share the custom-object collection.
    #[must_use]
    pub fn is_custom(&self) -> bool {
        match self {
            InstanceSource::Host => false,
            InstanceSource::Generic(obj_id) => {
                !matches!(obj_id.as_str(), BIZ | SET | MODULE | PROCESS)
            }
        }
    }

    #[must_use]
    pub fn collection(&self) -> Collection {
        match self {
            InstanceSource::Host => Collection::fixed(HOST, FIELD_HOST_ID),
            InstanceSource::Generic(obj_id) => match obj_id.as_str() {
                BIZ => Collection::fixed(BIZ, FIELD_BIZ_ID),
                SET => Collection::fixed(SET, FIELD_SET_ID),
                MODULE => Collection::fixed(MODULE, FIELD_MODULE_ID),
                PROCESS => Collection::fixed(PROCESS, FIELD_PROCESS_ID),
                _ => Collection::fixed(TABLE_OBJECT_BASE, FIELD_INST_ID),
            },
        }
    }

    #[must_use]
    pub fn id_field(&self) -> &'static str {
        match self {
            InstanceSource::Host => FIELD_HOST_ID,
            InstanceSource::Generic(obj_id) => match obj_id.as_str() {
                BIZ => FIELD_BIZ_ID,
                SET => FIELD_SET_ID,
                MODULE => FIELD_MODULE_ID,
                PROCESS => FIELD_PROCESS_ID,
                _ => FIELD_INST_ID,
            },
        }
    }

    #[must_use]
    pub fn name_field(&self) -> &'static str {
        match self {
            InstanceSource::Host => FIELD_HOST_NAME,
            InstanceSource::Generic(obj_id) => match obj_id.as_str() {
                BIZ => FIELD_BIZ_NAME,
                SET => FIELD_SET_NAME,
                MODULE => FIELD_MODULE_NAME,
                PROCESS => FIELD_PROCESS_NAME,
                _ => FIELD_INST_NAME,
            },
        }
    }

    /// Restrict `filter` to this source's instances.
    #[must_use]
    pub fn scope(&self, filter: Filter) -> Filter {
        if self.is_custom() {
            Filter::eq(FIELD_OBJ_ID, self.obj_id()).and(filter)
        } else {
            filter
        }
    }

    /// Filter selecting the given instance ids.
    #[must_use]
    pub fn ids_filter(&self, ids: &[InstId]) -> Filter {
        Filter::is_in(self.id_field(), ids.iter().copied())
    }

    pub fn find<S: InstanceStore + ?Sized>(
        &self,
        store: &S,
        filter: &Filter,
        page: &Page,
    ) -> Result<FindResult, CmdbError> {
        store.find(&self.collection(), &self.scope(filter.clone()), page)
    }

    pub fn find_all<S: InstanceStore + ?Sized>(
        &self,
        store: &S,
        filter: &Filter,
    ) -> Result<Vec<Document>, CmdbError> {
        Ok(self.find(store, filter, &Page::all())?.rows)
    }

    pub fn count<S: InstanceStore + ?Sized>(
        &self,
        store: &S,
        filter: &Filter,
    ) -> Result<u64, CmdbError> {
        store.count(&self.collection(), &self.scope(filter.clone()))
    }

    /// Ids of the matching instances.
    pub fn ids<S: InstanceStore + ?Sized>(
        &self,
        store: &S,
        filter: &Filter,
    ) -> Result<Vec<InstId>, CmdbError> {
        store.distinct_ids(&self.collection(), self.id_field(), &self.scope(filter.clone()))
    }

    /// Create one instance, stamping `bk_obj_id` on custom objects.
    pub fn create<S: InstanceStore + ?Sized>(
        &self,
        store: &mut S,
        mut doc: Document,
    ) -> Result<InstId, CmdbError> {
        if self.is_custom() {
            doc.insert(FIELD_OBJ_ID.to_string(), self.obj_id().into());
        }
        store.create(&self.collection(), doc)
    }

    pub fn update<S: InstanceStore + ?Sized>(
        &self,
        store: &mut S,
        filter: &Filter,
        patch: &Document,
    ) -> Result<u64, CmdbError> {
        store.update(&self.collection(), &self.scope(filter.clone()), patch)
    }

    pub fn delete<S: InstanceStore + ?Sized>(
        &self,
        store: &mut S,
        filter: &Filter,
    ) -> Result<u64, CmdbError> {
        store.delete(&self.collection(), &self.scope(filter.clone()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::types::document;

    #[test]
    fn sources_resolve_collections() {
        assert_eq!(InstanceSource::of("host"), InstanceSource::Host);
        assert_eq!(InstanceSource::of("set").id_field(), FIELD_SET_ID);
        assert_eq!(
            InstanceSource::of("region").collection().name(),
            TABLE_OBJECT_BASE
        );
        assert!(InstanceSource::of("region").is_custom());
        assert!(!InstanceSource::of("biz").is_custom());
        assert!(!InstanceSource::Host.is_custom());
    }

    #[test]
    fn custom_scope_adds_object_condition() {
        let source = InstanceSource::of("region");
        let scoped = source.scope(Filter::eq("bk_parent_id", 1));
        let doc = document([
            ("bk_obj_id", Value::from("region")),
            ("bk_parent_id", Value::from(1)),
        ]);
        let other = document([
            ("bk_obj_id", Value::from("zone")),
            ("bk_parent_id", Value::from(1)),
        ]);
        assert!(scoped.matches(&doc));
        assert!(!scoped.matches(&other));
    }

    #[test]
    fn paginate_counts_before_window() {
        let rows: Vec<Document> = (1..=5)
            .map(|i| document([("id", Value::from(i)), ("rank", Value::from(10 - i))]))
            .collect();
        let page = paginate(rows, &Page::window(1, 2).sorted_by("rank"));
        assert_eq!(page.count, 5);
        assert_eq!(page.rows.len(), 2);
        assert_eq!(page.rows[0].get("rank"), Some(&Value::from(6)));
    }
}
