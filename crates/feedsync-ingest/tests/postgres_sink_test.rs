//! Upsert semantics against a real PostgreSQL server
//!
//! Each test starts its own container; run with `cargo test -- --ignored`.

use anyhow::{Context, Result};
use feedsync_ingest::pipeline::Pipeline;
use feedsync_ingest::{
    BulkUpsertSink, CanonicalField, CanonicalRecord, DocumentStore, IngestError, PgDocumentStore,
};
use sqlx::postgres::PgPoolOptions;
use sqlx::PgPool;
use std::path::PathBuf;
use std::time::Duration;
use testcontainers::core::IntoContainerPort;
use testcontainers::runners::AsyncRunner;
use testcontainers::{ContainerAsync, ImageExt};
use testcontainers_modules::postgres::Postgres;

struct TestPostgres {
    _container: ContainerAsync<Postgres>,
    pool: PgPool,
}

impl TestPostgres {
    async fn start() -> Result<Self> {
        let container = Postgres::default()
            .with_tag("16-alpine")
            .start()
            .await
            .context("Failed to start PostgreSQL container")?;

        let host = container.get_host().await.context("Failed to get container host")?;
        let port = container
            .get_host_port_ipv4(5432.tcp())
            .await
            .context("Failed to get container port")?;

        let pool = PgPoolOptions::new()
            .max_connections(5)
            .acquire_timeout(Duration::from_secs(30))
            .connect(&format!("postgresql://postgres:postgres@{}:{}/postgres", host, port))
            .await
            .context("Failed to connect to PostgreSQL")?;

        Ok(Self {
            _container: container,
            pool,
        })
    }

    fn store(&self, collection: &str) -> PgDocumentStore {
        PgDocumentStore::from_pool(self.pool.clone(), collection).unwrap()
    }

    async fn documents(&self, collection: &str) -> Vec<serde_json::Value> {
        sqlx::query_scalar(&format!(
            "SELECT document FROM {} ORDER BY document->>'id'",
            collection
        ))
        .fetch_all(&self.pool)
        .await
        .unwrap()
    }
}

fn fixture(name: &str) -> PathBuf {
    PathBuf::from(env!("CARGO_MANIFEST_DIR"))
        .join("tests")
        .join("fixtures")
        .join(name)
}

fn product(id: &str, title: &str) -> CanonicalRecord {
    let mut record = CanonicalRecord::default();
    record.set(CanonicalField::Id, id);
    record.set(CanonicalField::Title, title);
    record
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_storing_the_same_feed_twice_is_idempotent() {
    let pg = TestPostgres::start().await.unwrap();
    let sink = BulkUpsertSink::connect(pg.store("parsed"), 2).await.unwrap();
    let pipeline = Pipeline::new("xml").unwrap();

    let first = sink.store(pipeline.parse(fixture("products.xml")).unwrap()).await.unwrap();
    let after_first = pg.documents("parsed").await;

    let second = sink.store(pipeline.parse(fixture("products.xml")).unwrap()).await.unwrap();
    let after_second = pg.documents("parsed").await;

    assert_eq!((first.inserted, first.replaced), (3, 0));
    assert_eq!((second.inserted, second.replaced), (0, 3));
    assert_eq!(after_first, after_second);
    assert_eq!(after_second[0], serde_json::json!({ "id": "42", "title": "Book" }));
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_unique_key_rejects_plain_duplicate_insert() {
    let pg = TestPostgres::start().await.unwrap();
    let sink = BulkUpsertSink::connect(pg.store("parsed"), 10).await.unwrap();

    sink.store_handle().insert(&product("9", "first")).await.unwrap();
    let err = sink
        .store_handle()
        .insert(&product("9", "second"))
        .await
        .unwrap_err();

    assert!(matches!(err, IngestError::DuplicateKey { ref key, .. } if key == "9"));
    assert_eq!(pg.documents("parsed").await.len(), 1);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_concurrent_sinks_share_one_constraint() {
    let pg = TestPostgres::start().await.unwrap();

    let (a, b) = tokio::join!(
        BulkUpsertSink::connect(pg.store("products"), 10),
        BulkUpsertSink::connect(pg.store("products"), 10),
    );
    let (a, b) = (a.unwrap(), b.unwrap());

    a.store(vec![Ok(product("1", "from a"))]).await.unwrap();
    let report = b.store(vec![Ok(product("1", "from b"))]).await.unwrap();

    assert_eq!(report.replaced, 1);
    assert_eq!(
        pg.documents("products").await,
        vec![serde_json::json!({ "id": "1", "title": "from b" })]
    );
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_rejected_document_does_not_block_group() {
    let pg = TestPostgres::start().await.unwrap();
    let sink = BulkUpsertSink::connect(pg.store("parsed"), 10).await.unwrap();

    // JSONB cannot hold NUL characters
    let report = sink
        .store(vec![
            Ok(product("1", "ok")),
            Ok(product("2", "bad\u{0}title")),
            Ok(product("3", "ok")),
        ])
        .await
        .unwrap();

    assert_eq!(report.inserted, 2);
    assert_eq!(report.failed_keys().collect::<Vec<_>>(), vec!["2"]);
    assert_eq!(pg.documents("parsed").await.len(), 2);
}

#[tokio::test]
#[ignore = "requires Docker"]
async fn test_same_id_twice_in_one_group_keeps_last() {
    let pg = TestPostgres::start().await.unwrap();
    let sink = BulkUpsertSink::connect(pg.store("parsed"), 10).await.unwrap();

    let report = sink
        .store(vec![
            Ok(product("1", "first")),
            Ok(product("2", "other")),
            Ok(product("1", "last")),
        ])
        .await
        .unwrap();

    assert!(report.is_complete());
    assert_eq!(report.inserted, 2);
    assert_eq!(report.collapsed, 1);
    assert_eq!(
        pg.documents("parsed").await,
        vec![
            serde_json::json!({ "id": "1", "title": "last" }),
            serde_json::json!({ "id": "2", "title": "other" }),
        ]
    );
}
