//! Document store abstraction for Gridstore
//!
//! Buckets only talk to collections through the traits defined here, so any
//! backend that can insert, delete, find with sort/skip/limit and create
//! indexes can host a bucket. Two backends ship with the crate:
//! - `memory_store`: in-process collections, used for tests and scratch buckets
//! - `sqlite_store`: persistent collections in a single SQLite file

pub mod memory_store;
pub mod sqlite_store;

pub use memory_store::MemoryStore;
pub use sqlite_store::SqliteStore;

use crate::document::{Document, Value, compare_values};
use crate::error::Result;
use async_trait::async_trait;
use std::cmp::Ordering;
use std::collections::VecDeque;
use std::sync::Arc;

#[derive(Debug, Clone, Copy, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub enum SortOrder {
    Ascending,
    Descending,
}

/// Conjunction of field equality predicates. An empty filter matches every
/// document.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct Filter {
    clauses: Vec<(String, Value)>,
}

impl Filter {
    pub fn all() -> Self {
        Self::default()
    }

    pub fn eq(field: impl Into<String>, value: impl Into<Value>) -> Self {
        Self::all().and_eq(field, value)
    }

    pub fn and_eq(mut self, field: impl Into<String>, value: impl Into<Value>) -> Self {
        self.clauses.push((field.into(), value.into()));
        self
    }

    pub fn clauses(&self) -> &[(String, Value)] {
        &self.clauses
    }

    pub fn is_empty(&self) -> bool {
        self.clauses.is_empty()
    }

    pub fn matches(&self, doc: &Document) -> bool {
        self.clauses.iter().all(|(field, expected)| {
            doc.get(field)
                .map(|actual| actual.matches(expected))
                .unwrap_or(false)
        })
    }
}

#[derive(Debug, Clone, Default, PartialEq)]
pub struct FindOptions {
    pub sort: Vec<(String, SortOrder)>,
    pub skip: u64,
    pub limit: Option<u64>,
}

impl FindOptions {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn sort(mut self, field: impl Into<String>, order: SortOrder) -> Self {
        self.sort.push((field.into(), order));
        self
    }

    pub fn skip(mut self, skip: u64) -> Self {
        self.skip = skip;
        self
    }

    pub fn limit(mut self, limit: u64) -> Self {
        self.limit = Some(limit);
        self
    }
}

#[derive(Debug, Clone, PartialEq, Eq, serde::Serialize, serde::Deserialize)]
pub struct IndexModel {
    pub name: String,
    pub keys: Vec<(String, SortOrder)>,
    pub unique: bool,
    pub background: bool,
}

impl IndexModel {
    pub fn new(name: impl Into<String>, keys: Vec<(&str, SortOrder)>) -> Self {
        Self {
            name: name.into(),
            keys: keys
                .into_iter()
                .map(|(field, order)| (field.to_string(), order))
                .collect(),
            unique: false,
            background: false,
        }
    }

    pub fn unique(mut self, unique: bool) -> Self {
        self.unique = unique;
        self
    }

    pub fn background(mut self, background: bool) -> Self {
        self.background = background;
        self
    }

    /// Key tuple of `doc` for this index; missing fields become `Null`.
    pub fn key_of(&self, doc: &Document) -> Vec<Value> {
        self.keys
            .iter()
            .map(|(field, _)| doc.get(field).cloned().unwrap_or(Value::Null))
            .collect()
    }
}

/// Forward-only, finite sequence of documents produced by a find.
#[async_trait]
pub trait DocumentCursor: Send {
    async fn next(&mut self) -> Result<Option<Document>>;
}

#[async_trait]
pub trait Collection: Send + Sync {
    fn name(&self) -> &str;

    /// Insert a document, assigning an `_id` when absent. Returns the `_id`.
    async fn insert_one(&self, doc: Document) -> Result<Value>;

    /// Delete every document matching `filter`, returning the count removed.
    async fn delete_many(&self, filter: Filter) -> Result<u64>;

    async fn find(&self, filter: Filter, options: FindOptions) -> Result<Box<dyn DocumentCursor>>;

    async fn create_index(&self, index: IndexModel) -> Result<()>;

    /// Delete the whole collection including its indexes.
    async fn drop_collection(&self) -> Result<()>;
}

pub trait DocumentStore: Send + Sync {
    fn collection(&self, name: &str) -> Arc<dyn Collection>;
}

/// Cursor over an already materialized result set.
pub struct VecCursor {
    docs: VecDeque<Document>,
}

impl VecCursor {
    pub fn new(docs: Vec<Document>) -> Self {
        Self { docs: docs.into() }
    }
}

#[async_trait]
impl DocumentCursor for VecCursor {
    async fn next(&mut self) -> Result<Option<Document>> {
        Ok(self.docs.pop_front())
    }
}

/// Apply filter, sort, skip and limit to a collection snapshot.
pub(crate) fn evaluate_find(
    docs: impl IntoIterator<Item = Document>,
    filter: &Filter,
    options: &FindOptions,
) -> Vec<Document> {
    let mut matched: Vec<Document> = docs.into_iter().filter(|doc| filter.matches(doc)).collect();

    if !options.sort.is_empty() {
        matched.sort_by(|a, b| {
            for (field, order) in &options.sort {
                let ord = compare_values(a.get(field), b.get(field));
                let ord = match order {
                    SortOrder::Ascending => ord,
                    SortOrder::Descending => ord.reverse(),
                };
                if ord != Ordering::Equal {
                    return ord;
                }
            }
            Ordering::Equal
        });
    }

    let skip = usize::try_from(options.skip).unwrap_or(usize::MAX);
    let limit = options
        .limit
        .map(|limit| usize::try_from(limit).unwrap_or(usize::MAX))
        .unwrap_or(usize::MAX);

    matched.into_iter().skip(skip).take(limit).collect()
}

/// Returns a description of the first unique index `doc` would violate.
pub(crate) fn unique_violation<'a>(
    indexes: &[IndexModel],
    existing: impl Iterator<Item = &'a Document> + Clone,
    doc: &Document,
) -> Option<String> {
    for index in indexes.iter().filter(|index| index.unique) {
        let key = index.key_of(doc);
        let clash = existing.clone().any(|other| {
            index
                .key_of(other)
                .iter()
                .zip(key.iter())
                .all(|(a, b)| a.matches(b))
        });
        if clash {
            return Some(format!("index {} key {:?}", index.name, key));
        }
    }
    None
}

/// Register `index` in `indexes`, rejecting a same-named index over other keys.
pub(crate) fn register_index(indexes: &mut Vec<IndexModel>, index: IndexModel) -> Result<()> {
    if let Some(existing) = indexes.iter().find(|existing| existing.name == index.name) {
        if existing.keys != index.keys || existing.unique != index.unique {
            return Err(crate::GridError::IndexConflict(format!(
                "index {} already exists with different options",
                index.name
            )));
        }
        return Ok(());
    }
    indexes.push(index);
    Ok(())
}
