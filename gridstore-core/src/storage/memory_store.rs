use super::{
    Collection, DocumentCursor, DocumentStore, Filter, FindOptions, IndexModel, VecCursor,
    evaluate_find, register_index, unique_violation,
};
use crate::document::{Document, ObjectId, Value};
use crate::error::{GridError, Result};
use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::Arc;
use tokio::sync::RwLock;

#[derive(Default)]
struct CollectionState {
    docs: Vec<Document>,
    indexes: Vec<IndexModel>,
}

type Collections = Arc<RwLock<HashMap<String, CollectionState>>>;

/// In-process document store. Clones share the same collections.
#[derive(Clone, Default)]
pub struct MemoryStore {
    collections: Collections,
}

impl MemoryStore {
    pub fn new() -> Self {
        Self::default()
    }

    /// Names of collections that currently hold documents or indexes.
    pub async fn collection_names(&self) -> Vec<String> {
        let mut names: Vec<String> = self.collections.read().await.keys().cloned().collect();
        names.sort();
        names
    }
}

impl DocumentStore for MemoryStore {
    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(MemoryCollection {
            name: name.to_string(),
            collections: self.collections.clone(),
        })
    }
}

pub struct MemoryCollection {
    name: String,
    collections: Collections,
}

#[async_trait]
impl Collection for MemoryCollection {
    fn name(&self) -> &str {
        &self.name
    }

    async fn insert_one(&self, mut doc: Document) -> Result<Value> {
        let id = match doc.get("_id") {
            Some(id) => id.clone(),
            None => {
                let id = Value::ObjectId(ObjectId::new());
                doc.insert("_id", id.clone());
                id
            }
        };

        let mut collections = self.collections.write().await;
        let state = collections.entry(self.name.clone()).or_default();

        if state
            .docs
            .iter()
            .any(|existing| existing.get("_id").is_some_and(|other| other.matches(&id)))
        {
            return Err(GridError::DuplicateKey(format!(
                "{}: _id {:?}",
                self.name, id
            )));
        }
        if let Some(violation) = unique_violation(&state.indexes, state.docs.iter(), &doc) {
            return Err(GridError::DuplicateKey(format!("{}: {}", self.name, violation)));
        }

        state.docs.push(doc);
        Ok(id)
    }

    async fn delete_many(&self, filter: Filter) -> Result<u64> {
        let mut collections = self.collections.write().await;
        let Some(state) = collections.get_mut(&self.name) else {
            return Ok(0);
        };

        let before = state.docs.len();
        state.docs.retain(|doc| !filter.matches(doc));
        Ok((before - state.docs.len()) as u64)
    }

    async fn find(&self, filter: Filter, options: FindOptions) -> Result<Box<dyn DocumentCursor>> {
        let collections = self.collections.read().await;
        let docs = match collections.get(&self.name) {
            Some(state) => evaluate_find(state.docs.iter().cloned(), &filter, &options),
            None => Vec::new(),
        };
        Ok(Box::new(VecCursor::new(docs)))
    }

    async fn create_index(&self, index: IndexModel) -> Result<()> {
        let mut collections = self.collections.write().await;
        let state = collections.entry(self.name.clone()).or_default();

        if index.unique {
            let mut seen: Vec<&Document> = Vec::with_capacity(state.docs.len());
            for doc in &state.docs {
                if let Some(violation) =
                    unique_violation(std::slice::from_ref(&index), seen.iter().copied(), doc)
                {
                    return Err(GridError::DuplicateKey(format!(
                        "{}: cannot build {}",
                        self.name, violation
                    )));
                }
                seen.push(doc);
            }
        }

        register_index(&mut state.indexes, index)
    }

    async fn drop_collection(&self) -> Result<()> {
        self.collections.write().await.remove(&self.name);
        Ok(())
    }
}
