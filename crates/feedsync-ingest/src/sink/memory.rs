//! In-process document store
//!
//! Behaves like a collection in a document database: documents are kept in
//! insertion order, and the unique key on `id` only exists once
//! [`DocumentStore::ensure_unique_key`] has run. Used for dry runs and tests.

use async_trait::async_trait;
use std::collections::HashMap;
use std::sync::{Mutex, MutexGuard};

use super::{DocumentStore, GroupOutcome, UpsertFailure};
use crate::error::{IngestError, Result};
use crate::schema::CanonicalRecord;

#[derive(Debug, Default)]
struct Collection {
    documents: Vec<CanonicalRecord>,
    /// Position of the document holding each `id`
    by_id: HashMap<String, usize>,
    unique_key: bool,
}

impl Collection {
    fn push(&mut self, document: CanonicalRecord) {
        if let Some(id) = document.id.clone() {
            self.by_id.entry(id).or_insert(self.documents.len());
        }
        self.documents.push(document);
    }

    fn has_duplicate_ids(&self) -> bool {
        let keyed = self.documents.iter().filter(|d| d.id.is_some()).count();
        keyed != self.by_id.len()
    }
}

/// Document store held in memory behind a mutex
#[derive(Debug)]
pub struct MemoryDocumentStore {
    collection: String,
    max_document_bytes: Option<usize>,
    inner: Mutex<Collection>,
}

impl MemoryDocumentStore {
    pub fn new(collection: impl Into<String>) -> Self {
        Self {
            collection: collection.into(),
            max_document_bytes: None,
            inner: Mutex::new(Collection::default()),
        }
    }

    /// Reject documents whose JSON encoding exceeds `limit` bytes
    pub fn with_max_document_bytes(mut self, limit: usize) -> Self {
        self.max_document_bytes = Some(limit);
        self
    }

    fn lock(&self) -> MutexGuard<'_, Collection> {
        // A poisoned lock only means another caller panicked mid-write; the
        // collection itself is still structurally valid
        self.inner.lock().unwrap_or_else(|poisoned| poisoned.into_inner())
    }

    pub fn len(&self) -> usize {
        self.lock().documents.len()
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    pub fn has_unique_key(&self) -> bool {
        self.lock().unique_key
    }

    /// Document currently stored under `id`
    pub fn get(&self, id: &str) -> Option<CanonicalRecord> {
        let collection = self.lock();
        collection
            .by_id
            .get(id)
            .map(|&index| collection.documents[index].clone())
    }

    /// All documents in insertion order
    pub fn documents(&self) -> Vec<CanonicalRecord> {
        self.lock().documents.clone()
    }

    fn check_size(&self, document: &CanonicalRecord) -> Result<Option<String>> {
        let Some(limit) = self.max_document_bytes else {
            return Ok(None);
        };

        let size = serde_json::to_vec(document)?.len();
        Ok((size > limit).then(|| format!("document is {} bytes, limit is {}", size, limit)))
    }
}

#[async_trait]
impl DocumentStore for MemoryDocumentStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn ensure_unique_key(&self) -> Result<()> {
        let mut collection = self.lock();
        if collection.unique_key {
            return Ok(());
        }

        if collection.has_duplicate_ids() {
            return Err(IngestError::ConstraintSetup {
                collection: self.collection.clone(),
                source: "collection already holds documents with duplicate ids".into(),
            });
        }

        collection.unique_key = true;
        Ok(())
    }

    async fn upsert_group(&self, group: &[CanonicalRecord]) -> Result<GroupOutcome> {
        let mut outcome = GroupOutcome::default();

        for document in group {
            let Some(id) = document.id.clone() else {
                outcome.failures.push(UpsertFailure {
                    key: None,
                    reason: "record has no id".to_string(),
                });
                continue;
            };

            if let Some(reason) = self.check_size(document)? {
                outcome.failures.push(UpsertFailure {
                    key: Some(id),
                    reason,
                });
                continue;
            }

            let mut collection = self.lock();
            match collection.by_id.get(&id).copied() {
                Some(index) => {
                    collection.documents[index] = document.clone();
                    outcome.replaced += 1;
                },
                None => {
                    collection.push(document.clone());
                    outcome.inserted += 1;
                },
            }
        }

        Ok(outcome)
    }

    async fn insert(&self, document: &CanonicalRecord) -> Result<()> {
        let mut collection = self.lock();

        if let Some(id) = document.id.as_deref() {
            if collection.unique_key && collection.by_id.contains_key(id) {
                return Err(IngestError::DuplicateKey {
                    collection: self.collection.clone(),
                    key: id.to_string(),
                });
            }
        }

        collection.push(document.clone());
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::CanonicalField;

    fn product(id: &str) -> CanonicalRecord {
        let mut record = CanonicalRecord::default();
        record.set(CanonicalField::Id, id);
        record
    }

    #[tokio::test]
    async fn test_insert_allows_duplicates_until_unique_key_exists() {
        let store = MemoryDocumentStore::new("parsed");
        store.insert(&product("1")).await.unwrap();
        store.insert(&product("1")).await.unwrap();
        assert_eq!(store.len(), 2);

        let err = store.ensure_unique_key().await.unwrap_err();
        assert!(matches!(
            err,
            IngestError::ConstraintSetup { ref collection, .. } if collection == "parsed"
        ));
        assert!(!store.has_unique_key());
    }

    #[tokio::test]
    async fn test_ensure_unique_key_is_idempotent() {
        let store = MemoryDocumentStore::new("parsed");
        store.ensure_unique_key().await.unwrap();
        store.ensure_unique_key().await.unwrap();
        assert!(store.has_unique_key());
    }

    #[tokio::test]
    async fn test_oversized_documents_are_rejected_individually() {
        let store = MemoryDocumentStore::new("parsed").with_max_document_bytes(40);

        let mut large = product("big");
        large.set(CanonicalField::Description, "x".repeat(100));

        let outcome = store
            .upsert_group(&[product("1"), large, product("2")])
            .await
            .unwrap();

        assert_eq!(outcome.inserted, 2);
        assert_eq!(outcome.failures.len(), 1);
        assert_eq!(outcome.failures[0].key.as_deref(), Some("big"));
        assert!(store.get("big").is_none());
    }
}
