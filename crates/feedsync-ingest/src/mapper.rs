//! Raw record to canonical schema translation

use crate::error::Result;
use crate::schema::{CanonicalRecord, FormatMapping, RawRecord};

/// Stateless translator from one format's raw records to [`CanonicalRecord`]s
///
/// A canonical field is populated only when the mapping names a native field
/// for it and the raw record holds a non-empty value under that name. Values
/// are copied verbatim.
#[derive(Debug, Clone, Copy)]
pub struct SchemaMapper {
    mapping: &'static FormatMapping,
}

impl SchemaMapper {
    pub fn new(mapping: &'static FormatMapping) -> Self {
        Self { mapping }
    }

    pub fn mapping(&self) -> &'static FormatMapping {
        self.mapping
    }

    pub fn coerce_record(&self, raw: &RawRecord) -> CanonicalRecord {
        let mut record = CanonicalRecord::default();

        for (field, native) in self.mapping.entries() {
            let Some(native) = native else { continue };

            match raw.get(native) {
                Some(value) if !value.is_empty() => record.set(field, value.as_str()),
                _ => {},
            }
        }

        record
    }

    /// Translate a lazy raw sequence one record at a time, preserving order
    pub fn coerce<I>(&self, raw: I) -> Coerced<I>
    where
        I: Iterator<Item = Result<RawRecord>>,
    {
        Coerced {
            mapper: *self,
            inner: raw,
        }
    }
}

/// Iterator returned by [`SchemaMapper::coerce`]
pub struct Coerced<I> {
    mapper: SchemaMapper,
    inner: I,
}

impl<I> Iterator for Coerced<I>
where
    I: Iterator<Item = Result<RawRecord>>,
{
    type Item = Result<CanonicalRecord>;

    fn next(&mut self) -> Option<Self::Item> {
        self.inner
            .next()
            .map(|raw| raw.map(|raw| self.mapper.coerce_record(&raw)))
    }

    fn size_hint(&self) -> (usize, Option<usize>) {
        self.inner.size_hint()
    }
}
