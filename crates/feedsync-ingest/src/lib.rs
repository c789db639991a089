//! Product feed ingestion
//!
//! Streams product feeds in several on-disk formats, normalizes every record
//! to one canonical schema and upserts the result into a document store keyed
//! by `id`.
//!
//! ```no_run
//! use feedsync_ingest::{BulkUpsertSink, MemoryDocumentStore, Pipeline};
//!
//! # async fn run() -> feedsync_ingest::Result<()> {
//! let pipeline = Pipeline::new("csv")?;
//! let sink = BulkUpsertSink::connect(MemoryDocumentStore::new("parsed"), 1000).await?;
//! let report = sink.store(pipeline.parse("feeds/products.txt")?).await?;
//! println!("{} inserted, {} replaced", report.inserted, report.replaced);
//! # Ok(())
//! # }
//! ```

#![deny(clippy::unwrap_used, clippy::expect_used)]

pub mod config;
pub mod error;
pub mod mapper;
pub mod parser;
pub mod pipeline;
pub mod schema;
pub mod sink;

pub use config::{DatabaseConfig, IngestConfig};
pub use error::{IngestError, Result};
pub use mapper::SchemaMapper;
pub use parser::{FormatParser, ParserOptions};
pub use pipeline::Pipeline;
pub use schema::{CanonicalField, CanonicalRecord, RawRecord};
pub use sink::{
    BulkUpsertSink, DocumentStore, MemoryDocumentStore, PgDocumentStore, UpsertFailure,
    UpsertReport,
};
