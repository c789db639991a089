//! PostgreSQL document store
//!
//! Each collection is a table of JSONB documents:
//!
//! ```sql
//! CREATE TABLE parsed (
//!     seq        BIGSERIAL PRIMARY KEY,
//!     document   JSONB NOT NULL,
//!     updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
//! );
//! CREATE UNIQUE INDEX parsed_id_key ON parsed ((document->>'id'));
//! ```
//!
//! Upserts target the expression index, so a document is replaced wholesale
//! whenever another one with the same `id` arrives.

use async_trait::async_trait;
use sqlx::postgres::{PgPool, PgPoolOptions, Postgres};
use sqlx::types::Json;
use sqlx::{QueryBuilder, Row};
use std::time::Duration;
use tracing::{debug, info, warn};

use super::{DocumentStore, GroupOutcome, UpsertFailure};
use crate::config::{validate_collection_name, DatabaseConfig};
use crate::error::{IngestError, Result};
use crate::schema::CanonicalRecord;

/// Document store backed by a PostgreSQL table
#[derive(Debug, Clone)]
pub struct PgDocumentStore {
    pool: PgPool,
    collection: String,
}

impl PgDocumentStore {
    /// Open a connection pool and bind it to `collection`
    pub async fn connect(config: &DatabaseConfig, collection: &str) -> Result<Self> {
        validate_collection_name(collection)?;

        let pool = PgPoolOptions::new()
            .max_connections(config.max_connections)
            .acquire_timeout(Duration::from_secs(config.connect_timeout_secs))
            .connect(&config.url)
            .await?;

        info!(collection, max_connections = config.max_connections, "Connected to document store");
        Self::from_pool(pool, collection)
    }

    /// Bind an existing pool to `collection`
    pub fn from_pool(pool: PgPool, collection: &str) -> Result<Self> {
        validate_collection_name(collection)?;
        Ok(Self {
            pool,
            collection: collection.to_string(),
        })
    }

    pub fn pool(&self) -> &PgPool {
        &self.pool
    }

    fn index_name(&self) -> String {
        format!("{}_id_key", self.collection)
    }

    fn upsert_query<'a>(&self, documents: &'a [CanonicalRecord]) -> QueryBuilder<'a, Postgres> {
        let mut query_builder: QueryBuilder<'a, Postgres> =
            QueryBuilder::new(format!("INSERT INTO {} (document) ", self.collection));

        query_builder.push_values(documents, |mut b, document| {
            b.push_bind(Json(document));
        });

        query_builder.push(
            r#"
            ON CONFLICT ((document->>'id')) DO UPDATE
            SET document = EXCLUDED.document, updated_at = NOW()
            RETURNING (xmax = 0) AS inserted
            "#,
        );

        query_builder
    }

    async fn apply(&self, documents: &[CanonicalRecord]) -> std::result::Result<GroupOutcome, sqlx::Error> {
        let rows = self.upsert_query(documents).build().fetch_all(&self.pool).await?;

        let mut outcome = GroupOutcome::default();
        for row in rows {
            if row.try_get::<bool, _>("inserted")? {
                outcome.inserted += 1;
            } else {
                outcome.replaced += 1;
            }
        }

        Ok(outcome)
    }

    /// Replay a rejected group one document at a time so siblings still apply
    async fn apply_individually(&self, group: &[CanonicalRecord]) -> Result<GroupOutcome> {
        let mut outcome = GroupOutcome::default();

        for document in group {
            match self.apply(std::slice::from_ref(document)).await {
                Ok(single) => {
                    outcome.inserted += single.inserted;
                    outcome.replaced += single.replaced;
                },
                Err(sqlx::Error::Database(db_err)) => {
                    debug!(key = ?document.id, error = %db_err, "Document rejected");
                    outcome.failures.push(UpsertFailure {
                        key: document.id.clone(),
                        reason: db_err.message().to_string(),
                    });
                },
                Err(e) => return Err(e.into()),
            }
        }

        Ok(outcome)
    }
}

#[async_trait]
impl DocumentStore for PgDocumentStore {
    fn collection(&self) -> &str {
        &self.collection
    }

    async fn ensure_unique_key(&self) -> Result<()> {
        let setup_error = |source: sqlx::Error| IngestError::ConstraintSetup {
            collection: self.collection.clone(),
            source: source.into(),
        };

        let mut tx = self.pool.begin().await.map_err(setup_error)?;

        // Serialize concurrent setup of the same collection
        sqlx::query("SELECT pg_advisory_xact_lock(hashtext($1))")
            .bind(&self.collection)
            .execute(&mut *tx)
            .await
            .map_err(setup_error)?;

        sqlx::query(&format!(
            r#"
            CREATE TABLE IF NOT EXISTS {} (
                seq BIGSERIAL PRIMARY KEY,
                document JSONB NOT NULL,
                updated_at TIMESTAMPTZ NOT NULL DEFAULT NOW()
            )
            "#,
            self.collection
        ))
        .execute(&mut *tx)
        .await
        .map_err(setup_error)?;

        let index_name = self.index_name();
        let exists: bool = sqlx::query_scalar(
            r#"
            SELECT EXISTS (
                SELECT 1 FROM pg_indexes
                WHERE schemaname = current_schema() AND tablename = $1 AND indexname = $2
            )
            "#,
        )
        .bind(&self.collection)
        .bind(&index_name)
        .fetch_one(&mut *tx)
        .await
        .map_err(setup_error)?;

        if !exists {
            sqlx::query(&format!(
                "CREATE UNIQUE INDEX {} ON {} ((document->>'id'))",
                index_name, self.collection
            ))
            .execute(&mut *tx)
            .await
            .map_err(setup_error)?;
            info!(collection = %self.collection, index = %index_name, "Created unique key");
        }

        tx.commit().await.map_err(setup_error)?;
        Ok(())
    }

    async fn upsert_group(&self, group: &[CanonicalRecord]) -> Result<GroupOutcome> {
        if group.is_empty() {
            return Ok(GroupOutcome::default());
        }

        match self.apply(group).await {
            Ok(outcome) => Ok(outcome),
            Err(sqlx::Error::Database(db_err)) => {
                warn!(
                    collection = %self.collection,
                    documents = group.len(),
                    error = %db_err,
                    "Upsert group rejected, retrying documents individually"
                );
                self.apply_individually(group).await
            },
            Err(e) => Err(e.into()),
        }
    }

    async fn insert(&self, document: &CanonicalRecord) -> Result<()> {
        let result = sqlx::query(&format!(
            "INSERT INTO {} (document) VALUES ($1)",
            self.collection
        ))
        .bind(Json(document))
        .execute(&self.pool)
        .await;

        match result {
            Ok(_) => Ok(()),
            Err(sqlx::Error::Database(db_err)) if db_err.is_unique_violation() => {
                Err(IngestError::DuplicateKey {
                    collection: self.collection.clone(),
                    key: document.id.clone().unwrap_or_default(),
                })
            },
            Err(e) => Err(e.into()),
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used, clippy::expect_used)]
mod tests {
    use super::*;
    use crate::schema::CanonicalField;
    use sqlx::Execute;

    fn lazy_store(collection: &str) -> Result<PgDocumentStore> {
        let pool = PgPoolOptions::new().connect_lazy("postgresql://localhost/feedsync")?;
        PgDocumentStore::from_pool(pool, collection)
    }

    #[tokio::test]
    async fn test_rejects_unsafe_collection_names() {
        assert!(lazy_store("parsed").is_ok());
        assert!(matches!(
            lazy_store("parsed; DROP TABLE x"),
            Err(IngestError::InvalidConfig(_))
        ));
        assert!(lazy_store("Parsed").is_err());
    }

    #[tokio::test]
    async fn test_upsert_statement_targets_id_expression_index() {
        let store = lazy_store("products").unwrap();

        let mut document = CanonicalRecord::default();
        document.set(CanonicalField::Id, "1");
        let documents = vec![document.clone(), document];

        let mut query = store.upsert_query(&documents);
        let sql = query.build().sql().to_string();

        assert!(sql.starts_with("INSERT INTO products (document) VALUES ($1), ($2)"));
        assert!(sql.contains("ON CONFLICT ((document->>'id')) DO UPDATE"));
        assert!(sql.contains("RETURNING (xmax = 0) AS inserted"));
        assert_eq!(store.index_name(), "products_id_key");
    }
}
