//! Pipe-delimited feed parser
//!
//! Format: headerless rows of `|`-separated cells in the fixed order of
//! [`DELIMITED_COLUMNS`]. Short rows are padded, so every record carries all
//! columns; cells that are missing or hold a missing-value marker become `""`.
//!
//! Example row:
//! `123|Widget|SKU1|Tools|Hand Tools|https://...|...|9.99|12.99|...`

use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::{debug, trace};

use super::{open_feed, FormatParser, ParserOptions, RawRecords};
use crate::error::{IngestError, Result};
use crate::schema::{RawRecord, DELIMITED_COLUMNS, DELIMITER, MISSING_CELL_MARKERS};

/// Parser for pipe-delimited product feeds
#[derive(Debug, Clone, Default)]
pub struct DelimitedParser {
    options: ParserOptions,
}

impl DelimitedParser {
    pub fn new(options: ParserOptions) -> Self {
        Self { options }
    }

    /// Open `path` and return the concrete record iterator
    pub fn records(&self, path: &Path) -> Result<DelimitedRecords<Box<dyn BufRead + Send>>> {
        let input = open_feed(path, &self.options)?;
        debug!(path = %path.display(), "Opened delimited feed");
        Ok(DelimitedRecords::new(input, path, &self.options))
    }
}

impl FormatParser for DelimitedParser {
    fn parse(&self, path: &Path) -> Result<RawRecords> {
        Ok(Box::new(self.records(path)?))
    }
}

/// Lazy iterator over the rows of one delimited feed
pub struct DelimitedRecords<R> {
    rows: csv::StringRecordsIntoIter<R>,
    path: PathBuf,
    row_number: u64,
}

impl<R: BufRead> DelimitedRecords<R> {
    pub fn new(input: R, path: &Path, options: &ParserOptions) -> Self {
        let reader = csv::ReaderBuilder::new()
            .delimiter(DELIMITER)
            .has_headers(false)
            .flexible(true)
            .buffer_capacity(options.read_buffer_bytes.max(1))
            .from_reader(input);

        Self {
            rows: reader.into_records(),
            path: path.to_path_buf(),
            row_number: 0,
        }
    }

    fn to_raw(&self, row: &csv::StringRecord) -> RawRecord {
        if row.len() > DELIMITED_COLUMNS.len() {
            trace!(
                row = self.row_number,
                extra = row.len() - DELIMITED_COLUMNS.len(),
                "Ignoring cells beyond the column schema"
            );
        }

        DELIMITED_COLUMNS
            .iter()
            .enumerate()
            .map(|(index, column)| {
                let cell = row.get(index).unwrap_or_default();
                let value = if is_missing(cell) { "" } else { cell };
                (column.to_string(), value.to_string())
            })
            .collect()
    }
}

fn is_missing(cell: &str) -> bool {
    MISSING_CELL_MARKERS.contains(&cell)
}

impl<R: BufRead> Iterator for DelimitedRecords<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        // Empty lines never reach here; the csv reader skips them
        let row = match self.rows.next()? {
            Ok(row) => row,
            Err(source) => {
                return Some(Err(IngestError::Delimited {
                    path: self.path.clone(),
                    source,
                }))
            },
        };

        self.row_number += 1;
        Some(Ok(self.to_raw(&row)))
    }
}
