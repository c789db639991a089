//! Format registry and parse pipeline facade
//!
//! A [`Pipeline`] is built from a format tag. The tag is resolved against a
//! static registry before any file is touched; each entry pairs a parser with
//! the field table for its format. Supporting a new format means adding one
//! [`FormatEntry`] to [`REGISTRY`].
//!
//! # Example
//!
//! ```no_run
//! use feedsync_ingest::pipeline::Pipeline;
//!
//! let pipeline = Pipeline::new("xml")?;
//! for record in pipeline.parse("feeds/products.xml")? {
//!     let record = record?;
//!     println!("{:?}", record.id());
//! }
//! # Ok::<(), feedsync_ingest::IngestError>(())
//! ```

use std::fmt;
use std::path::Path;
use tracing::{info, instrument};

use crate::error::{IngestError, Result};
use crate::mapper::{Coerced, SchemaMapper};
use crate::parser::{DelimitedParser, FormatParser, ParserOptions, RawRecords, XmlParser};
use crate::schema::{FormatMapping, DELIMITED_MAPPING, XML_MAPPING};

pub const CSV: &str = "csv";
pub const XML: &str = "xml";

/// Lazy sequence of canonical records produced by [`Pipeline::parse`]
pub type CanonicalRecords = Coerced<RawRecords>;

/// One registered feed format
pub struct FormatEntry {
    pub tag: &'static str,
    pub mapping: &'static FormatMapping,
    build_parser: fn(ParserOptions) -> Box<dyn FormatParser>,
}

impl fmt::Debug for FormatEntry {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("FormatEntry").field("tag", &self.tag).finish()
    }
}

fn delimited_parser(options: ParserOptions) -> Box<dyn FormatParser> {
    Box::new(DelimitedParser::new(options))
}

fn xml_parser(options: ParserOptions) -> Box<dyn FormatParser> {
    Box::new(XmlParser::new(options))
}

/// Every supported format, looked up by tag
pub static REGISTRY: &[FormatEntry] = &[
    FormatEntry {
        tag: CSV,
        mapping: &DELIMITED_MAPPING,
        build_parser: delimited_parser,
    },
    FormatEntry {
        tag: XML,
        mapping: &XML_MAPPING,
        build_parser: xml_parser,
    },
];

/// Resolve a format tag
pub fn lookup(tag: &str) -> Result<&'static FormatEntry> {
    REGISTRY
        .iter()
        .find(|entry| entry.tag == tag)
        .ok_or_else(|| IngestError::UnknownFormat(tag.to_string()))
}

/// Registered format tags in registry order
pub fn registered_formats() -> impl Iterator<Item = &'static str> {
    REGISTRY.iter().map(|entry| entry.tag)
}

/// Parser and schema mapper for one format, exposed as a single lazy sequence
pub struct Pipeline {
    entry: &'static FormatEntry,
    parser: Box<dyn FormatParser>,
    mapper: SchemaMapper,
}

impl fmt::Debug for Pipeline {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.debug_struct("Pipeline")
            .field("format", &self.entry.tag)
            .finish()
    }
}

impl Pipeline {
    /// Build the pipeline for `tag`, failing with [`IngestError::UnknownFormat`]
    /// if no format is registered under it
    pub fn new(tag: &str) -> Result<Self> {
        Self::with_options(tag, ParserOptions::default())
    }

    pub fn with_options(tag: &str, options: ParserOptions) -> Result<Self> {
        let entry = lookup(tag)?;

        Ok(Self {
            entry,
            parser: (entry.build_parser)(options),
            mapper: SchemaMapper::new(entry.mapping),
        })
    }

    pub fn format(&self) -> &'static str {
        self.entry.tag
    }

    pub fn mapping(&self) -> &'static FormatMapping {
        self.entry.mapping
    }

    /// Canonical records of the feed at `path`, in source order
    #[instrument(skip_all, fields(format = self.entry.tag, path = %path.as_ref().display()))]
    pub fn parse(&self, path: impl AsRef<Path>) -> Result<CanonicalRecords> {
        let raw = self.parser.parse(path.as_ref())?;
        info!("Streaming feed");
        Ok(self.mapper.coerce(raw))
    }
}
