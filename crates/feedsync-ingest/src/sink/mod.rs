//! Batched idempotent upsert of canonical records
//!
//! [`BulkUpsertSink`] drives a [`DocumentStore`] backend:
//!
//! 1. Construction ensures the unique key on `id` exists (idempotent)
//! 2. [`BulkUpsertSink::store`] drains a record sequence into upsert groups of
//!    `batch_size` operations, each replacing the whole document stored under
//!    the record's `id` or inserting it when absent
//! 3. Per-document rejections are collected into an [`UpsertReport`] instead
//!    of aborting sibling operations
//!
//! Re-running `store` with the same input leaves the store unchanged, so
//! callers may safely resubmit after a partial failure.

pub mod memory;
pub mod postgres;

use async_trait::async_trait;
use serde::Serialize;
use std::collections::HashMap;
use std::time::Instant;
use tracing::{debug, info, instrument, warn};

use crate::error::{IngestError, Result};
use crate::schema::CanonicalRecord;

pub use memory::MemoryDocumentStore;
pub use postgres::PgDocumentStore;

/// Default number of upserts submitted per group
pub const DEFAULT_BATCH_SIZE: usize = 1000;

/// Largest accepted group; a Postgres statement carries at most 65535 bind
/// parameters and each document takes one
pub const MAX_BATCH_SIZE: usize = u16::MAX as usize;

/// One document the store refused
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct UpsertFailure {
    /// Upsert key, `None` when the record had no `id`
    pub key: Option<String>,
    pub reason: String,
}

/// Outcome of one upsert group as reported by a backend
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct GroupOutcome {
    pub inserted: usize,
    pub replaced: usize,
    pub failures: Vec<UpsertFailure>,
}

/// Aggregate result of a [`BulkUpsertSink::store`] call
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct UpsertReport {
    /// Records pulled from the input sequence
    pub submitted: usize,
    /// Documents created
    pub inserted: usize,
    /// Existing documents replaced
    pub replaced: usize,
    /// Records superseded by a later record with the same `id` in the same group
    pub collapsed: usize,
    pub failures: Vec<UpsertFailure>,
}

impl UpsertReport {
    pub fn succeeded(&self) -> usize {
        self.inserted + self.replaced + self.collapsed
    }

    pub fn failed(&self) -> usize {
        self.failures.len()
    }

    /// Keys of rejected documents; records without `id` are not listed
    pub fn failed_keys(&self) -> impl Iterator<Item = &str> {
        self.failures.iter().filter_map(|f| f.key.as_deref())
    }

    /// True when every submitted record was applied
    pub fn is_complete(&self) -> bool {
        self.failures.is_empty()
    }

    fn absorb(&mut self, outcome: GroupOutcome) {
        self.inserted += outcome.inserted;
        self.replaced += outcome.replaced;
        self.failures.extend(outcome.failures);
    }
}

/// Storage backend able to hold canonical records as keyed documents
#[async_trait]
pub trait DocumentStore: Send + Sync {
    /// Name of the collection documents are written to
    fn collection(&self) -> &str;

    /// Create the unique constraint on `id` if it does not exist yet
    ///
    /// Must be safe to call concurrently from several processes.
    async fn ensure_unique_key(&self) -> Result<()>;

    /// Apply one group of upserts, replacing whole documents by `id`
    ///
    /// Every document in `group` has an `id` and ids are distinct. A rejected
    /// document is reported in the outcome and does not stop the rest of the
    /// group; only failures that make the store unusable are returned as errors.
    async fn upsert_group(&self, group: &[CanonicalRecord]) -> Result<GroupOutcome>;

    /// Plain insert that bypasses upsert semantics
    ///
    /// Fails with [`IngestError::DuplicateKey`] when the unique key is in place
    /// and a document with the same `id` exists.
    async fn insert(&self, document: &CanonicalRecord) -> Result<()>;
}

pub(crate) fn check_batch_size(batch_size: usize) -> Result<()> {
    if batch_size == 0 || batch_size > MAX_BATCH_SIZE {
        return Err(IngestError::InvalidConfig(format!(
            "batch size must be between 1 and {}, got {}",
            MAX_BATCH_SIZE, batch_size
        )));
    }
    Ok(())
}

/// Pending upsert group with in-group `id` deduplication
struct PendingGroup {
    documents: Vec<CanonicalRecord>,
    positions: HashMap<String, usize>,
    collapsed: usize,
}

impl PendingGroup {
    fn with_capacity(capacity: usize) -> Self {
        Self {
            documents: Vec::with_capacity(capacity),
            positions: HashMap::with_capacity(capacity),
            collapsed: 0,
        }
    }

    fn push(&mut self, key: String, record: CanonicalRecord) {
        match self.positions.get(&key) {
            // Last occurrence wins, keeping the position of the first
            Some(&index) => {
                self.documents[index] = record;
                self.collapsed += 1;
            },
            None => {
                self.positions.insert(key, self.documents.len());
                self.documents.push(record);
            },
        }
    }

    fn len(&self) -> usize {
        self.documents.len()
    }

    fn is_empty(&self) -> bool {
        self.documents.is_empty()
    }

    fn clear(&mut self) {
        self.documents.clear();
        self.positions.clear();
        self.collapsed = 0;
    }
}

/// Drains canonical records into a [`DocumentStore`] as unordered upsert groups
///
/// Lifecycle: [`BulkUpsertSink::connect`] ensures the unique key, after which
/// `store` may be called any number of times.
pub struct BulkUpsertSink<S> {
    store: S,
    batch_size: usize,
}

impl<S: DocumentStore> BulkUpsertSink<S> {
    /// Wrap `store`, ensuring its unique key on `id`
    ///
    /// Fails if the constraint cannot be created; the sink is never handed out
    /// in a state where upserts could create duplicates.
    pub async fn connect(store: S, batch_size: usize) -> Result<Self> {
        check_batch_size(batch_size)?;

        store.ensure_unique_key().await?;
        info!(collection = store.collection(), batch_size, "Upsert sink ready");

        Ok(Self { store, batch_size })
    }

    pub fn store_handle(&self) -> &S {
        &self.store
    }

    pub fn batch_size(&self) -> usize {
        self.batch_size
    }

    /// Upsert every record of `records`, returning per-key accounting
    ///
    /// A parse error in the input stops the drain and is returned; groups
    /// committed before it stay applied, which is harmless because resubmitting
    /// the same input converges to the same state.
    #[instrument(skip_all, fields(collection = self.store.collection(), batch_size = self.batch_size))]
    pub async fn store<I>(&self, records: I) -> Result<UpsertReport>
    where
        I: IntoIterator<Item = Result<CanonicalRecord>>,
    {
        let started = Instant::now();
        let mut report = UpsertReport::default();
        let mut group = PendingGroup::with_capacity(self.batch_size);

        for record in records {
            let record = match record {
                Ok(record) => record,
                Err(e) => {
                    warn!(
                        error = %e,
                        submitted = report.submitted,
                        inserted = report.inserted,
                        replaced = report.replaced,
                        "Input failed; stopping before the remaining records"
                    );
                    return Err(e);
                },
            };
            report.submitted += 1;

            let Some(key) = record.id.clone() else {
                report.failures.push(UpsertFailure {
                    key: None,
                    reason: "record has no id".to_string(),
                });
                continue;
            };

            group.push(key, record);
            if group.len() >= self.batch_size {
                self.flush(&mut group, &mut report).await?;
            }
        }

        if !group.is_empty() {
            self.flush(&mut group, &mut report).await?;
        }

        let elapsed_ms = started.elapsed().as_millis() as u64;
        if report.is_complete() {
            info!(
                submitted = report.submitted,
                inserted = report.inserted,
                replaced = report.replaced,
                collapsed = report.collapsed,
                elapsed_ms,
                "Stored feed"
            );
        } else {
            warn!(
                submitted = report.submitted,
                inserted = report.inserted,
                replaced = report.replaced,
                failed = report.failed(),
                elapsed_ms,
                "Stored feed with rejected documents"
            );
        }

        Ok(report)
    }

    async fn flush(&self, group: &mut PendingGroup, report: &mut UpsertReport) -> Result<()> {
        let outcome = self.store.upsert_group(&group.documents).await?;
        debug!(
            documents = group.len(),
            inserted = outcome.inserted,
            replaced = outcome.replaced,
            failed = outcome.failures.len(),
            "Upsert group applied"
        );

        report.collapsed += group.collapsed;
        report.absorb(outcome);
        group.clear();
        Ok(())
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::CanonicalField;
    use std::path::PathBuf;

    fn product(id: &str, title: &str) -> CanonicalRecord {
        let mut record = CanonicalRecord::default();
        record.set(CanonicalField::Id, id);
        record.set(CanonicalField::Title, title);
        record
    }

    #[tokio::test]
    async fn test_zero_batch_size_is_rejected() {
        let result = BulkUpsertSink::connect(MemoryDocumentStore::new("parsed"), 0).await;
        assert!(matches!(result, Err(IngestError::InvalidConfig(_))));
    }

    #[tokio::test]
    async fn test_batch_size_is_capped_at_statement_parameter_limit() {
        let result =
            BulkUpsertSink::connect(MemoryDocumentStore::new("parsed"), MAX_BATCH_SIZE + 1).await;
        assert!(matches!(result, Err(IngestError::InvalidConfig(_))));

        let sink = BulkUpsertSink::connect(MemoryDocumentStore::new("parsed"), MAX_BATCH_SIZE)
            .await
            .unwrap();
        assert_eq!(sink.batch_size(), 65535);
    }

    #[tokio::test]
    async fn test_store_counts_inserts_and_replacements() {
        let sink = BulkUpsertSink::connect(MemoryDocumentStore::new("parsed"), 2)
            .await
            .unwrap();

        let first = sink
            .store(vec![Ok(product("1", "a")), Ok(product("2", "b"))])
            .await
            .unwrap();
        assert_eq!((first.inserted, first.replaced), (2, 0));

        let second = sink
            .store(vec![Ok(product("2", "b2")), Ok(product("3", "c"))])
            .await
            .unwrap();
        assert_eq!((second.inserted, second.replaced), (1, 1));
        assert_eq!(sink.store_handle().len(), 3);
        assert_eq!(sink.store_handle().get("2").unwrap().title.as_deref(), Some("b2"));
    }

    #[tokio::test]
    async fn test_duplicate_ids_in_one_group_collapse_to_last() {
        let sink = BulkUpsertSink::connect(MemoryDocumentStore::new("parsed"), 10)
            .await
            .unwrap();

        let report = sink
            .store(vec![
                Ok(product("1", "first")),
                Ok(product("2", "other")),
                Ok(product("1", "last")),
            ])
            .await
            .unwrap();

        assert_eq!(report.submitted, 3);
        assert_eq!(report.inserted, 2);
        assert_eq!(report.collapsed, 1);
        assert_eq!(report.succeeded(), 3);
        assert_eq!(sink.store_handle().get("1").unwrap().title.as_deref(), Some("last"));
    }

    #[tokio::test]
    async fn test_records_without_id_are_reported() {
        let sink = BulkUpsertSink::connect(MemoryDocumentStore::new("parsed"), 10)
            .await
            .unwrap();

        let mut anonymous = CanonicalRecord::default();
        anonymous.set(CanonicalField::Title, "no key");

        let report = sink
            .store(vec![Ok(anonymous), Ok(product("1", "a"))])
            .await
            .unwrap();

        assert_eq!(report.inserted, 1);
        assert_eq!(report.failed(), 1);
        assert_eq!(report.failures[0].key, None);
        assert_eq!(report.failed_keys().count(), 0);
        assert!(!report.is_complete());
    }

    #[tokio::test]
    async fn test_input_error_stops_the_drain() {
        let sink = BulkUpsertSink::connect(MemoryDocumentStore::new("parsed"), 1)
            .await
            .unwrap();

        let result = sink
            .store(vec![
                Ok(product("1", "a")),
                Err(IngestError::TruncatedXml {
                    path: PathBuf::from("feed.xml"),
                    open_elements: 2,
                }),
                Ok(product("2", "b")),
            ])
            .await;

        assert!(matches!(result, Err(IngestError::TruncatedXml { .. })));
        assert!(sink.store_handle().get("1").is_some());
        assert!(sink.store_handle().get("2").is_none());
    }

    #[test]
    fn test_report_failed_keys() {
        let report = UpsertReport {
            submitted: 3,
            inserted: 1,
            failures: vec![
                UpsertFailure {
                    key: Some("7".to_string()),
                    reason: "too large".to_string(),
                },
                UpsertFailure {
                    key: None,
                    reason: "record has no id".to_string(),
                },
            ],
            ..Default::default()
        };

        assert_eq!(report.failed_keys().collect::<Vec<_>>(), vec!["7"]);
        assert_eq!(report.failed(), 2);
        assert_eq!(report.succeeded(), 1);
    }
}
