#![allow(dead_code)]

pub mod fault_injection;

use gridstore_core::{Collection, Document, DocumentStore, Filter, FindOptions};

pub fn payload(len: usize) -> Vec<u8> {
    (0..len).map(|i| (i * 31 % 251) as u8).collect()
}

pub async fn collect_docs(collection: &dyn Collection, filter: Filter) -> Vec<Document> {
    let mut cursor = collection.find(filter, FindOptions::new()).await.unwrap();
    let mut docs = Vec::new();
    while let Some(doc) = cursor.next().await.unwrap() {
        docs.push(doc);
    }
    docs
}

pub async fn count_docs(store: &dyn DocumentStore, collection: &str) -> usize {
    collect_docs(store.collection(collection).as_ref(), Filter::all())
        .await
        .len()
}
