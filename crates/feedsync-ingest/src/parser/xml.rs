//! Streaming XML feed parser
//!
//! The feed is a sequence of record elements (`<item_basic_data>`) whose
//! immediate children are flat tag/text pairs:
//!
//! ```xml
//! <items>
//!   <item_basic_data>
//!     <item_unique_id>42</item_unique_id>
//!     <item_title>Book</item_title>
//!   </item_basic_data>
//! </items>
//! ```
//!
//! The document is read event by event and never materialized as a tree. Only
//! the record currently being assembled is held in memory; it is handed to the
//! caller when its closing tag is seen, and the event buffer is cleared after
//! every event, so peak memory depends on the largest single record rather
//! than on the number of records in the file.

use quick_xml::events::{BytesStart, Event};
use quick_xml::Reader;
use std::io::BufRead;
use std::path::{Path, PathBuf};
use tracing::debug;

use super::{open_feed, FormatParser, ParserOptions, RawRecords};
use crate::error::{IngestError, Result};
use crate::schema::{RawRecord, XML_RECORD_TAG};

/// Parser for XML product feeds
#[derive(Debug, Clone)]
pub struct XmlParser {
    options: ParserOptions,
    record_tag: String,
}

impl Default for XmlParser {
    fn default() -> Self {
        Self::new(ParserOptions::default())
    }
}

impl XmlParser {
    pub fn new(options: ParserOptions) -> Self {
        Self {
            options,
            record_tag: XML_RECORD_TAG.to_string(),
        }
    }

    /// Use a different record element name
    pub fn with_record_tag(mut self, tag: impl Into<String>) -> Self {
        self.record_tag = tag.into();
        self
    }

    /// Open `path` and return the concrete record iterator
    pub fn records(&self, path: &Path) -> Result<XmlRecords<Box<dyn BufRead + Send>>> {
        let input = open_feed(path, &self.options)?;
        debug!(path = %path.display(), record_tag = %self.record_tag, "Opened XML feed");
        Ok(XmlRecords::new(input, path, &self.record_tag))
    }
}

impl FormatParser for XmlParser {
    fn parse(&self, path: &Path) -> Result<RawRecords> {
        Ok(Box::new(self.records(path)?))
    }
}

/// Child element of the open record, collecting its leading text
struct OpenChild {
    tag: String,
    depth: usize,
    text: Option<String>,
    /// Text after the first grandchild is not part of the child's value
    closed_text: bool,
}

/// Lazy iterator over the record elements of one XML feed
pub struct XmlRecords<R> {
    reader: Reader<R>,
    buf: Vec<u8>,
    path: PathBuf,
    record_tag: Vec<u8>,
    depth: usize,
    /// Depth of the record element being assembled, if one is open
    record_depth: Option<usize>,
    record: RawRecord,
    child: Option<OpenChild>,
    done: bool,
}

impl<R: BufRead> XmlRecords<R> {
    pub fn new(input: R, path: &Path, record_tag: &str) -> Self {
        Self {
            reader: Reader::from_reader(input),
            buf: Vec::new(),
            path: path.to_path_buf(),
            record_tag: record_tag.as_bytes().to_vec(),
            depth: 0,
            record_depth: None,
            record: RawRecord::new(),
            child: None,
            done: false,
        }
    }

    /// Bytes currently reserved for decoding events
    ///
    /// Bounded by the largest single event, independent of how many records
    /// have been read.
    pub fn buffered_bytes(&self) -> usize {
        self.buf.capacity()
    }

    /// Raw fields held for the record under construction
    pub fn pending_fields(&self) -> usize {
        self.record.len()
    }

    fn xml_error(&self, source: quick_xml::Error) -> IngestError {
        IngestError::Xml {
            path: self.path.clone(),
            position: self.reader.buffer_position() as u64,
            source,
        }
    }

    fn tag_name(&self, start: &BytesStart<'_>) -> std::result::Result<String, quick_xml::Error> {
        let name = start.name();
        let decoded = self
            .reader
            .decoder()
            .decode(name.as_ref())
            .map_err(quick_xml::Error::from)?;
        Ok(decoded.into_owned())
    }

    fn is_record_tag(&self, name: &[u8]) -> bool {
        name == self.record_tag.as_slice()
    }

    /// Depth at which immediate children of the open record live
    fn child_depth(&self) -> Option<usize> {
        self.record_depth.map(|depth| depth + 1)
    }

    fn on_start(&mut self, start: &BytesStart<'_>) -> std::result::Result<(), quick_xml::Error> {
        self.depth += 1;

        match self.record_depth {
            None if self.is_record_tag(start.name().as_ref()) => {
                self.record_depth = Some(self.depth);
            },
            Some(_) if Some(self.depth) == self.child_depth() => {
                self.child = Some(OpenChild {
                    tag: self.tag_name(start)?,
                    depth: self.depth,
                    text: None,
                    closed_text: false,
                });
            },
            Some(_) => {
                // Grandchildren are not interpreted
                if let Some(child) = self.child.as_mut() {
                    child.closed_text = true;
                }
            },
            None => {},
        }

        Ok(())
    }

    fn on_text(&mut self, text: &str) {
        if let Some(child) = self.child.as_mut() {
            if !child.closed_text && self.depth == child.depth {
                child.text.get_or_insert_with(String::new).push_str(text);
            }
        }
    }

    /// Comments and processing instructions end a child's value like a grandchild does
    fn on_node(&mut self) {
        if let Some(child) = self.child.as_mut() {
            if self.depth == child.depth {
                child.closed_text = true;
            }
        }
    }

    /// Returns the finished record when the record element closes
    fn on_end(&mut self) -> Option<RawRecord> {
        let closing_depth = self.depth;
        self.depth = self.depth.saturating_sub(1);

        if self.child.as_ref().is_some_and(|c| c.depth == closing_depth) {
            if let Some(child) = self.child.take() {
                match child.text {
                    Some(text) => {
                        self.record.insert(child.tag, text);
                    },
                    // An element without text is absent, even if an earlier
                    // sibling with the same tag had a value
                    None => {
                        self.record.remove(&child.tag);
                    },
                }
            }
            return None;
        }

        if self.record_depth == Some(closing_depth) {
            self.record_depth = None;
            return Some(std::mem::take(&mut self.record));
        }

        None
    }

    fn on_empty(
        &mut self,
        start: &BytesStart<'_>,
    ) -> std::result::Result<Option<RawRecord>, quick_xml::Error> {
        // `<tag/>` opens and closes in one event
        self.on_start(start)?;
        Ok(self.on_end())
    }
}

/// Owned summary of one reader event, detached from the event buffer
enum Step {
    Start(BytesStart<'static>),
    Empty(BytesStart<'static>),
    End,
    Text(String),
    /// Comment or processing instruction
    Node,
    Eof,
    Skip,
}

impl<R: BufRead> XmlRecords<R> {
    fn read_step(&mut self) -> std::result::Result<Step, quick_xml::Error> {
        self.buf.clear();

        let step = match self.reader.read_event_into(&mut self.buf)? {
            Event::Start(start) => Step::Start(start.into_owned()),
            Event::Empty(start) => Step::Empty(start.into_owned()),
            Event::End(_) => Step::End,
            Event::Text(text) => Step::Text(text.unescape()?.into_owned()),
            Event::CData(data) => Step::Text(
                data.decode()
                    .map_err(quick_xml::Error::from)?
                    .into_owned(),
            ),
            Event::Comment(_) | Event::PI(_) => Step::Node,
            Event::Eof => Step::Eof,
            _ => Step::Skip,
        };

        Ok(step)
    }

    fn advance(&mut self) -> std::result::Result<Option<RawRecord>, quick_xml::Error> {
        loop {
            match self.read_step()? {
                Step::Start(start) => self.on_start(&start)?,
                Step::Empty(start) => {
                    if let Some(record) = self.on_empty(&start)? {
                        return Ok(Some(record));
                    }
                },
                Step::End => {
                    if let Some(record) = self.on_end() {
                        return Ok(Some(record));
                    }
                },
                Step::Text(text) => self.on_text(&text),
                Step::Node => self.on_node(),
                Step::Eof => return Ok(None),
                Step::Skip => {},
            }
        }
    }
}

impl<R: BufRead> Iterator for XmlRecords<R> {
    type Item = Result<RawRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        if self.done {
            return None;
        }

        match self.advance() {
            Ok(Some(record)) => Some(Ok(record)),
            Ok(None) => {
                self.done = true;
                (self.depth > 0).then(|| {
                    Err(IngestError::TruncatedXml {
                        path: self.path.clone(),
                        open_elements: self.depth,
                    })
                })
            },
            Err(e) => {
                self.done = true;
                Some(Err(self.xml_error(e)))
            },
        }
    }
}
