//! Format backends sharing one column schema

use std::io::Write;
use std::sync::{Arc, LazyLock};

use arrow_array::{ArrayRef, BooleanArray, RecordBatch, StringArray, UInt32Array, UInt64Array};
use arrow_schema::{DataType, Field, Schema, SchemaRef};
use parquet::arrow::ArrowWriter;

use crate::config::ExportFormat;
use crate::error::ExportError;
use crate::types::DatasetRow;

static SCHEMA: LazyLock<SchemaRef> = LazyLock::new(|| {
    Arc::new(Schema::new(vec![
        Field::new("target_id", DataType::Utf8, false),
        Field::new("sequence_index", DataType::UInt64, false),
        Field::new("url", DataType::Utf8, false),
        Field::new("title", DataType::Utf8, true),
        Field::new("publication_date", DataType::Utf8, true),
        Field::new("publication_date_raw", DataType::Utf8, true),
        Field::new("source", DataType::Utf8, true),
        Field::new("author", DataType::Utf8, true),
        Field::new("section", DataType::Utf8, true),
        Field::new("word_count", DataType::UInt32, true),
        Field::new("language", DataType::Utf8, true),
        Field::new("description", DataType::Utf8, true),
        Field::new("doc_header", DataType::Utf8, true),
        Field::new("external_url", DataType::Utf8, true),
        Field::new("source_code", DataType::Utf8, true),
        Field::new("certificate_id", DataType::Utf8, true),
        Field::new("source_type", DataType::Utf8, true),
        Field::new("related_terms", DataType::Utf8, true),
        Field::new("body_text", DataType::Utf8, false),
        Field::new("text_characters", DataType::UInt64, false),
        Field::new("extraction_method", DataType::Utf8, false),
        Field::new("complete", DataType::Boolean, false),
        Field::new("byte_size", DataType::UInt64, false),
        Field::new("fetched_at", DataType::Utf8, false),
    ]))
});

/// Column schema of every export format, in [`DatasetRow`] field order
pub fn schema() -> SchemaRef {
    Arc::clone(&SCHEMA)
}

/// Serialize `rows` into `out` in the given format
pub(crate) fn encode<W: Write + Send>(
    format: ExportFormat,
    rows: &[DatasetRow],
    out: W,
) -> Result<(), ExportError> {
    match format {
        ExportFormat::Parquet => encode_parquet(rows, out),
        ExportFormat::Csv => encode_csv(rows, out),
        ExportFormat::Jsonl => encode_jsonl(rows, out),
    }
}

fn encode_error(format: ExportFormat, err: impl std::fmt::Display) -> ExportError {
    ExportError::Encode {
        format: format.extension(),
        reason: err.to_string(),
    }
}

fn encode_parquet<W: Write + Send>(rows: &[DatasetRow], out: W) -> Result<(), ExportError> {
    let batch = record_batch(rows).map_err(|e| encode_error(ExportFormat::Parquet, e))?;

    let mut writer = ArrowWriter::try_new(out, batch.schema(), None)
        .map_err(|e| encode_error(ExportFormat::Parquet, e))?;
    writer
        .write(&batch)
        .map_err(|e| encode_error(ExportFormat::Parquet, e))?;
    writer
        .close()
        .map_err(|e| encode_error(ExportFormat::Parquet, e))?;
    Ok(())
}

/// Columnar view of the rows
pub(crate) fn record_batch(rows: &[DatasetRow]) -> Result<RecordBatch, arrow_schema::ArrowError> {
    fn strings<'a>(rows: &'a [DatasetRow], f: impl Fn(&'a DatasetRow) -> &'a str) -> ArrayRef {
        Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<_>>()))
    }
    fn optional<'a>(
        rows: &'a [DatasetRow],
        f: impl Fn(&'a DatasetRow) -> Option<&'a str>,
    ) -> ArrayRef {
        Arc::new(StringArray::from(rows.iter().map(f).collect::<Vec<_>>()))
    }

    let columns: Vec<ArrayRef> = vec![
        strings(rows, |r| r.target_id.as_str()),
        Arc::new(UInt64Array::from(
            rows.iter().map(|r| r.sequence_index).collect::<Vec<_>>(),
        )),
        strings(rows, |r| r.url.as_str()),
        optional(rows, |r| r.title.as_deref()),
        optional(rows, |r| r.publication_date.as_deref()),
        optional(rows, |r| r.publication_date_raw.as_deref()),
        optional(rows, |r| r.source.as_deref()),
        optional(rows, |r| r.author.as_deref()),
        optional(rows, |r| r.section.as_deref()),
        Arc::new(UInt32Array::from(
            rows.iter().map(|r| r.word_count).collect::<Vec<_>>(),
        )),
        optional(rows, |r| r.language.as_deref()),
        optional(rows, |r| r.description.as_deref()),
        optional(rows, |r| r.doc_header.as_deref()),
        optional(rows, |r| r.external_url.as_deref()),
        optional(rows, |r| r.source_code.as_deref()),
        optional(rows, |r| r.certificate_id.as_deref()),
        optional(rows, |r| r.source_type.as_deref()),
        optional(rows, |r| r.related_terms.as_deref()),
        strings(rows, |r| r.body_text.as_str()),
        Arc::new(UInt64Array::from(
            rows.iter().map(|r| r.text_characters).collect::<Vec<_>>(),
        )),
        strings(rows, |r| r.extraction_method.as_str()),
        Arc::new(BooleanArray::from(
            rows.iter().map(|r| r.complete).collect::<Vec<_>>(),
        )),
        Arc::new(UInt64Array::from(
            rows.iter().map(|r| r.byte_size).collect::<Vec<_>>(),
        )),
        strings(rows, |r| r.fetched_at.as_str()),
    ];

    RecordBatch::try_new(schema(), columns)
}

fn encode_csv<W: Write>(rows: &[DatasetRow], out: W) -> Result<(), ExportError> {
    let mut writer = csv::Writer::from_writer(out);
    for row in rows {
        writer
            .serialize(row)
            .map_err(|e| encode_error(ExportFormat::Csv, e))?;
    }
    writer
        .flush()
        .map_err(|e| encode_error(ExportFormat::Csv, e))?;
    Ok(())
}

fn encode_jsonl<W: Write>(rows: &[DatasetRow], mut out: W) -> Result<(), ExportError> {
    for row in rows {
        serde_json::to_writer(&mut out, row).map_err(|e| encode_error(ExportFormat::Jsonl, e))?;
        out.write_all(b"\n")
            .map_err(|e| encode_error(ExportFormat::Jsonl, e))?;
    }
    out.flush()
        .map_err(|e| encode_error(ExportFormat::Jsonl, e))?;
    Ok(())
}
