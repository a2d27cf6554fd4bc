//! Chunked NDJSON to CSV conversion.

use std::io::{BufRead, Write};

use serde_json::Value as JsonValue;
use tracing::debug;

use crate::engine::Converter;
use crate::error::{TransformError, TransformErrorKind};

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct StreamOptions {
    /// Records converted per chunk.
    pub batch_size: usize,
    pub include_header: bool,
}

impl Default for StreamOptions {
    fn default() -> Self {
        Self {
            batch_size: 10_000,
            include_header: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct StreamSummary {
    pub records: usize,
    pub rows: usize,
    pub chunks: usize,
}

/// Reads one JSON record per non-blank line and appends converted rows to
/// `writer` as CSV, one chunk of `batch_size` records at a time. The header
/// is written once, with the first chunk.
pub fn stream_ndjson_to_csv<R, W>(
    converter: &Converter,
    reader: R,
    writer: W,
    options: StreamOptions,
) -> Result<StreamSummary, TransformError>
where
    R: BufRead,
    W: Write,
{
    let batch_size = options.batch_size.max(1);
    let mut csv = csv::Writer::from_writer(writer);
    let mut summary = StreamSummary::default();
    let mut chunk: Vec<JsonValue> = Vec::with_capacity(batch_size.min(1024));

    let mut flush = |chunk: &mut Vec<JsonValue>, summary: &mut StreamSummary| {
        let conversion = converter.convert_batch(chunk.iter())?;
        let header = options.include_header && summary.chunks == 0;
        conversion.table.write_csv_records(&mut csv, header)?;
        summary.records += chunk.len();
        summary.rows += conversion.table.len();
        summary.chunks += 1;
        debug!(
            chunk = summary.chunks,
            records = chunk.len(),
            rows = conversion.table.len(),
            "chunk written"
        );
        chunk.clear();
        Ok::<(), TransformError>(())
    };

    for (idx, line) in reader.lines().enumerate() {
        let line = line?;
        let line = line.trim();
        if line.is_empty() {
            continue;
        }
        let record: JsonValue = serde_json::from_str(line).map_err(|err| {
            TransformError::new(
                TransformErrorKind::InvalidInput,
                format!("line {}: {}", idx + 1, err),
            )
        })?;
        chunk.push(record);
        if chunk.len() >= batch_size {
            flush(&mut chunk, &mut summary)?;
        }
    }
    if !chunk.is_empty() {
        flush(&mut chunk, &mut summary)?;
    }

    csv.flush()?;
    Ok(summary)
}

#[cfg(test)]
mod tests {
    use super::*;
    use serde_json::json;

    fn converter() -> Converter {
        Converter::new(
            serde_json::from_value(json!({
                "columns": {"id": {"path": "id"}, "sku": {"rel_path": "sku"}},
                "explode": {"path": "items"}
            }))
            .unwrap(),
        )
        .unwrap()
    }

    #[test]
    fn writes_header_once_across_chunks() {
        let input = "{\"id\":1,\"items\":[{\"sku\":\"a\"},{\"sku\":\"b\"}]}\n\n  \n{\"id\":2}\n{\"id\":3,\"items\":[{\"sku\":\"c\"}]}\n";
        let mut out = Vec::new();
        let summary = stream_ndjson_to_csv(
            &converter(),
            input.as_bytes(),
            &mut out,
            StreamOptions {
                batch_size: 2,
                include_header: true,
            },
        )
        .unwrap();
        assert_eq!(
            summary,
            StreamSummary {
                records: 3,
                rows: 4,
                chunks: 2
            }
        );
        assert_eq!(
            String::from_utf8(out).unwrap(),
            "id,sku\n1,a\n1,b\n2,\n3,c\n"
        );
    }

    #[test]
    fn header_can_be_disabled() {
        let mut out = Vec::new();
        stream_ndjson_to_csv(
            &converter(),
            "{\"id\":9}\n".as_bytes(),
            &mut out,
            StreamOptions {
                include_header: false,
                ..StreamOptions::default()
            },
        )
        .unwrap();
        assert_eq!(String::from_utf8(out).unwrap(), "9,\n");
    }

    #[test]
    fn bad_line_names_its_number() {
        let mut out = Vec::new();
        let err = stream_ndjson_to_csv(
            &converter(),
            "{\"id\":1}\n\n{oops\n".as_bytes(),
            &mut out,
            StreamOptions::default(),
        )
        .unwrap_err();
        assert_eq!(err.kind, TransformErrorKind::InvalidInput);
        assert!(err.message.starts_with("line 3:"), "{}", err.message);
    }

    #[test]
    fn empty_input_writes_nothing() {
        let mut out = Vec::new();
        let summary =
            stream_ndjson_to_csv(&converter(), "\n\n".as_bytes(), &mut out, StreamOptions::default())
                .unwrap();
        assert_eq!(summary, StreamSummary::default());
        assert!(out.is_empty());
    }
}
