//! Extract job (spec §4.J): pages each configured index over a fixed
//! time window, converts hits to canonical extract rows, and writes
//! them as Parquet row groups to a local path or `gs://` destination.
//! The cursor per index only advances once a full window's rows have
//! been written, so a crash mid-window simply re-extracts it next run.

use std::sync::Arc;

use object_store::{gcp::GoogleCloudStorageBuilder, path::Path as ObjectPath, ObjectStore};
use parquet::data_type::ByteArray;
use parquet::file::properties::WriterProperties;
use parquet::file::writer::SerializedFileWriter;
use parquet::schema::parser::parse_message_type;
use serde_json::{json, Value};

use crate::config::ExtractConfig;
use crate::cursor::CursorStore;
use crate::error::{IngestError, IngestResult};
use crate::indexer::IndexerClient;
use crate::model::alias;

const SCHEMA: &str = "
message extract_row {
    REQUIRED BYTE_ARRAY es_id (UTF8);
    REQUIRED BYTE_ARRAY document_json (UTF8);
}
";

fn sort_keys_for(index: &str) -> Value {
    if index == alias::HASHTAGS {
        json!([{ "hour": "asc" }])
    } else {
        json!([{ "created_at": "asc" }, { "indexed_at": "asc" }])
    }
}

fn open_sink(destination: &str) -> IngestResult<Arc<dyn ObjectStore>> {
    if let Some(rest) = destination.strip_prefix("gs://") {
        let bucket = rest.split('/').next().unwrap_or_default();
        let gcs = GoogleCloudStorageBuilder::new()
            .with_bucket_name(bucket)
            .build()
            .map_err(|e| IngestError::ObjectStore(e.to_string()))?;
        Ok(Arc::new(gcs))
    } else {
        let local = object_store::local::LocalFileSystem::new_with_prefix(destination)
            .map_err(|e| IngestError::ObjectStore(e.to_string()))?;
        Ok(Arc::new(local))
    }
}

pub struct ExtractJob {
    indexer: Arc<IndexerClient>,
    sink: Arc<dyn ObjectStore>,
    config: ExtractConfig,
}

#[derive(Debug, Default, Clone)]
pub struct ExtractReport {
    pub index: String,
    pub rows_written: usize,
    pub artifacts_written: usize,
}

impl ExtractJob {
    pub fn new(indexer: Arc<IndexerClient>, config: ExtractConfig) -> IngestResult<Self> {
        let sink = open_sink(&config.destination)?;
        Ok(Self { indexer, sink, config })
    }

    pub async fn run_window(
        &self,
        index: &str,
        cursor: &CursorStore,
        window_minutes: i64,
    ) -> IngestResult<ExtractReport> {
        let window_start = cursor.load().await?.map(|c| c.last_time_us).unwrap_or(0);
        let window_end = window_start + window_minutes * 60 * 1_000_000;

        let sort = sort_keys_for(index);
        let date_field = if index == alias::HASHTAGS { "hour" } else { "created_at" };
        let base_query = json!({
            "range": {
                date_field: {
                    "gte": micros_to_rfc3339(window_start),
                    "lt": micros_to_rfc3339(window_end),
                }
            }
        });

        let mut search_after: Option<Value> = None;
        let mut rows: Vec<(String, Value)> = Vec::new();
        let mut artifacts_written = 0usize;
        let mut rows_written = 0usize;

        loop {
            let page = self
                .indexer
                .search(index, base_query.clone(), self.config.fetch_size, Some(sort.clone()), search_after.clone())
                .await?;
            if page.hits.is_empty() {
                break;
            }
            for hit in &page.hits {
                rows.push((hit.id.clone(), hit.source.clone()));
                search_after = hit.sort.clone();
            }
            if rows.len() >= self.config.max_records {
                let written = self.write_artifact(index, &rows, artifacts_written).await?;
                rows_written += written;
                artifacts_written += 1;
                rows.clear();
            }
        }

        if !rows.is_empty() {
            let written = self.write_artifact(index, &rows, artifacts_written).await?;
            rows_written += written;
            artifacts_written += 1;
        }

        cursor.update(window_end).await?;
        Ok(ExtractReport { index: index.to_string(), rows_written, artifacts_written })
    }

    async fn write_artifact(
        &self,
        index: &str,
        rows: &[(String, Value)],
        artifact_seq: usize,
    ) -> IngestResult<usize> {
        let schema = Arc::new(
            parse_message_type(SCHEMA)
                .map_err(|e| IngestError::Decode(format!("invalid parquet schema: {e}")))?,
        );
        let props = Arc::new(WriterProperties::builder().build());
        let mut buffer: Vec<u8> = Vec::new();

        {
            let mut writer = SerializedFileWriter::new(&mut buffer, schema, props)
                .map_err(|e| IngestError::Decode(format!("failed to open parquet writer: {e}")))?;
            let mut row_group = writer
                .next_row_group()
                .map_err(|e| IngestError::Decode(format!("failed to open row group: {e}")))?;

            write_byte_array_column(&mut row_group, rows.iter().map(|(id, _)| id.as_str()))?;
            write_byte_array_column(
                &mut row_group,
                rows.iter().map(|(_, doc)| doc).map(|doc| doc.to_string()).collect::<Vec<_>>().iter().map(|s| s.as_str()),
            )?;

            row_group
                .close()
                .map_err(|e| IngestError::Decode(format!("failed to close row group: {e}")))?;
            writer
                .close()
                .map_err(|e| IngestError::Decode(format!("failed to finalize parquet file: {e}")))?;
        }

        let object_path = ObjectPath::from(format!("{index}/{index}_{artifact_seq:05}.parquet"));
        self.sink
            .put(&object_path, bytes::Bytes::from(buffer).into())
            .await
            .map_err(|e| IngestError::ObjectStore(e.to_string()))?;

        Ok(rows.len())
    }
}

fn write_byte_array_column<'a>(
    row_group: &mut parquet::file::writer::SerializedRowGroupWriter<'_, Vec<u8>>,
    values: impl Iterator<Item = &'a str>,
) -> IngestResult<()> {
    let mut column = row_group
        .next_column()
        .map_err(|e| IngestError::Decode(format!("failed to open column: {e}")))?
        .ok_or_else(|| IngestError::Decode("no more columns in schema".to_string()))?;

    if let parquet::column::writer::ColumnWriter::ByteArrayColumnWriter(ref mut typed) = column.untyped() {
        let data: Vec<ByteArray> = values.map(|v| ByteArray::from(v.as_bytes().to_vec())).collect();
        typed
            .write_batch(&data, None, None)
            .map_err(|e| IngestError::Decode(format!("failed to write column batch: {e}")))?;
    }

    column
        .close()
        .map_err(|e| IngestError::Decode(format!("failed to close column: {e}")))?;
    Ok(())
}

fn micros_to_rfc3339(micros: i64) -> String {
    chrono::DateTime::from_timestamp_micros(micros)
        .unwrap_or_default()
        .format("%Y-%m-%dT%H:%M:%SZ")
        .to_string()
}
