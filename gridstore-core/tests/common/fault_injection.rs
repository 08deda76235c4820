use async_trait::async_trait;
use gridstore_core::{
    Collection, Document, DocumentCursor, DocumentStore, Filter, FindOptions, GridError,
    IndexModel, MemoryStore, Result, Value,
};
use std::sync::atomic::{AtomicBool, AtomicUsize, Ordering};
use std::sync::{Arc, Mutex};

/// Fault plan shared by every collection handed out by a [`FaultyStore`].
#[derive(Default)]
pub struct FaultPlan {
    /// Fail the insert into `target` after this many successful inserts.
    pub fail_insert_after: Option<usize>,
    pub target: String,
    pub fail_deletes: AtomicBool,
    /// Reject `create_index` on the collection with this name.
    pub fail_create_index: Option<String>,
    inserts: AtomicUsize,
    indexes: Mutex<Vec<(String, IndexModel)>>,
}

impl FaultPlan {
    pub fn fail_nth_insert(target: &str, successful: usize) -> Self {
        Self {
            fail_insert_after: Some(successful),
            target: target.to_string(),
            ..Self::default()
        }
    }

    pub fn fail_index_on(target: &str) -> Self {
        Self {
            fail_create_index: Some(target.to_string()),
            ..Self::default()
        }
    }

    pub fn inserts(&self) -> usize {
        self.inserts.load(Ordering::SeqCst)
    }

    /// Every index model passed to `create_index`, with its collection name.
    pub fn created_indexes(&self) -> Vec<(String, IndexModel)> {
        self.indexes.lock().unwrap().clone()
    }
}

/// Memory store wrapper that injects store errors according to a [`FaultPlan`].
pub struct FaultyStore {
    inner: MemoryStore,
    plan: Arc<FaultPlan>,
}

impl FaultyStore {
    pub fn new(inner: MemoryStore, plan: FaultPlan) -> Self {
        Self {
            inner,
            plan: Arc::new(plan),
        }
    }

    pub fn plan(&self) -> &FaultPlan {
        &self.plan
    }
}

impl DocumentStore for FaultyStore {
    fn collection(&self, name: &str) -> Arc<dyn Collection> {
        Arc::new(FaultyCollection {
            inner: self.inner.collection(name),
            plan: self.plan.clone(),
        })
    }
}

struct FaultyCollection {
    inner: Arc<dyn Collection>,
    plan: Arc<FaultPlan>,
}

#[async_trait]
impl Collection for FaultyCollection {
    fn name(&self) -> &str {
        self.inner.name()
    }

    async fn insert_one(&self, doc: Document) -> Result<Value> {
        if self.inner.name() == self.plan.target {
            let seen = self.plan.inserts.fetch_add(1, Ordering::SeqCst);
            if self.plan.fail_insert_after == Some(seen) {
                return Err(GridError::Store(format!("injected insert failure #{}", seen)));
            }
        }
        self.inner.insert_one(doc).await
    }

    async fn delete_many(&self, filter: Filter) -> Result<u64> {
        if self.plan.fail_deletes.load(Ordering::SeqCst) {
            return Err(GridError::Store("injected delete failure".to_string()));
        }
        self.inner.delete_many(filter).await
    }

    async fn find(&self, filter: Filter, options: FindOptions) -> Result<Box<dyn DocumentCursor>> {
        self.inner.find(filter, options).await
    }

    async fn create_index(&self, index: IndexModel) -> Result<()> {
        let name = self.inner.name().to_string();
        self.plan
            .indexes
            .lock()
            .unwrap()
            .push((name.clone(), index.clone()));
        if self.plan.fail_create_index.as_deref() == Some(name.as_str()) {
            return Err(GridError::Store(format!("injected index failure on {}", name)));
        }
        self.inner.create_index(index).await
    }

    async fn drop_collection(&self) -> Result<()> {
        self.inner.drop_collection().await
    }
}
