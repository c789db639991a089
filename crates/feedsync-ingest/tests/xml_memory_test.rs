//! Memory ceiling for streaming large XML feeds

use feedsync_ingest::parser::XmlParser;
use std::io::{BufWriter, Write};

const RECORDS: usize = 50_000;

/// Event buffer may never grow past this, regardless of file size
const BUFFER_CEILING: usize = 4 * 1024;

fn write_feed(path: &std::path::Path, records: usize) {
    let mut out = BufWriter::new(std::fs::File::create(path).unwrap());
    writeln!(out, r#"<?xml version="1.0" encoding="UTF-8"?>"#).unwrap();
    writeln!(out, "<items>").unwrap();
    for i in 0..records {
        writeln!(
            out,
            "<item_basic_data><item_unique_id>{i}</item_unique_id>\
             <item_title>Product number {i}</item_title>\
             <book_size_description>{}</book_size_description>\
             <item_price>{i}.99</item_price></item_basic_data>",
            "A reasonably long description. ".repeat(8)
        )
        .unwrap();
    }
    writeln!(out, "</items>").unwrap();
    out.flush().unwrap();
}

#[test]
fn test_parser_memory_does_not_grow_with_record_count() {
    let dir = tempfile::tempdir().unwrap();
    let path = dir.path().join("large.xml");
    write_feed(&path, RECORDS);
    assert!(std::fs::metadata(&path).unwrap().len() > 10 * 1024 * 1024);

    let mut records = XmlParser::default().records(&path).unwrap();
    let mut count = 0;
    let mut peak_buffer = 0;

    while let Some(record) = records.next() {
        let record = record.unwrap();
        assert_eq!(record.get("item_unique_id"), Some(&count.to_string()));

        // The finished record has been handed over; nothing is retained
        assert_eq!(records.pending_fields(), 0);
        peak_buffer = peak_buffer.max(records.buffered_bytes());
        count += 1;
    }

    assert_eq!(count, RECORDS);
    assert!(
        peak_buffer <= BUFFER_CEILING,
        "event buffer grew to {} bytes",
        peak_buffer
    );
}
