//! Streaming feed parsers
//!
//! Each parser turns a feed file into a lazy sequence of [`RawRecord`]s. The
//! file is opened eagerly so a missing path fails at the call site, but rows
//! and elements are only decoded as the caller pulls them.

pub mod delimited;
pub mod xml;

use flate2::read::MultiGzDecoder;
use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use crate::error::{IngestError, Result};
use crate::schema::RawRecord;

pub use delimited::DelimitedParser;
pub use xml::XmlParser;

/// Default read buffer for feed files (64 KiB)
pub const DEFAULT_READ_BUFFER_BYTES: usize = 64 * 1024;

/// Lazy sequence of raw records produced by a [`FormatParser`]
pub type RawRecords = Box<dyn Iterator<Item = Result<RawRecord>> + Send>;

/// Tuning knobs shared by all parsers
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ParserOptions {
    /// Size of the chunk read from disk at a time
    pub read_buffer_bytes: usize,
}

impl Default for ParserOptions {
    fn default() -> Self {
        Self {
            read_buffer_bytes: DEFAULT_READ_BUFFER_BYTES,
        }
    }
}

/// Format-specific streaming decoder
///
/// Implement this trait to teach the pipeline a new feed format, then register
/// it together with its field table in [`crate::pipeline`].
pub trait FormatParser: Send + Sync {
    /// Open `path` and return its records in file order
    fn parse(&self, path: &Path) -> Result<RawRecords>;
}

/// Open a feed file for buffered reading, decompressing `.gz` files on the fly
pub fn open_feed(path: &Path, options: &ParserOptions) -> Result<Box<dyn BufRead + Send>> {
    let file = File::open(path).map_err(|e| IngestError::io(path, e))?;
    let capacity = options.read_buffer_bytes.max(1);

    let is_gzip = path
        .extension()
        .is_some_and(|ext| ext.eq_ignore_ascii_case("gz"));

    if is_gzip {
        let decoder = MultiGzDecoder::new(BufReader::with_capacity(capacity, file));
        Ok(Box::new(BufReader::with_capacity(capacity, decoder)))
    } else {
        Ok(Box::new(BufReader::with_capacity(capacity, file)))
    }
}
