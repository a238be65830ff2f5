//! Data loading subcommands: semantic index upload and locations import.
//!
//! Both read JSON-lines exports. Bad lines are logged and skipped so one
//! broken record never aborts a whole load.

use std::fs::File;
use std::io::{BufRead, BufReader};
use std::path::Path;

use apteka_core::error::AptekaError;
use apteka_core::types::Coordinates;
use apteka_storage::NewLocation;
use apteka_vector::{IndexDocument, SemanticIndex};
use serde::Deserialize;
use serde_json::{Map, Value};
use tracing::{info, warn};
use uuid::Uuid;

/// Documents per index upload request.
pub const INDEX_BATCH_SIZE: usize = 100;

#[derive(Debug, Deserialize)]
struct Record {
    #[serde(default)]
    text: String,
    #[serde(default)]
    metadata: Map<String, Value>,
}

/// Outcome of reading one export file.
#[derive(Debug)]
pub struct Loaded<T> {
    pub items: Vec<T>,
    pub skipped: usize,
}

fn read_records<R, T, F>(reader: R, mut convert: F) -> Result<Loaded<T>, AptekaError>
where
    R: BufRead,
    F: FnMut(Record) -> Option<T>,
{
    let mut items = Vec::new();
    let mut skipped = 0;

    for (i, line) in reader.lines().enumerate() {
        let line = line?;
        let line_no = i + 1;
        if line.trim().is_empty() {
            continue;
        }

        let record: Record = match serde_json::from_str(&line) {
            Ok(r) => r,
            Err(e) => {
                warn!(line = line_no, error = %e, "Skipping malformed record");
                skipped += 1;
                continue;
            }
        };
        if record.text.trim().is_empty() {
            warn!(line = line_no, "Skipping record with empty text");
            skipped += 1;
            continue;
        }

        match convert(record) {
            Some(item) => items.push(item),
            None => {
                warn!(line = line_no, "Skipping record without usable fields");
                skipped += 1;
            }
        }
    }

    Ok(Loaded { items, skipped })
}

fn open(path: &Path) -> Result<BufReader<File>, AptekaError> {
    File::open(path).map(BufReader::new).map_err(|e| {
        AptekaError::Config(format!("Cannot open {}: {}", path.display(), e))
    })
}

// =============================================================================
// Semantic index
// =============================================================================

/// Metadata as strings; nulls become empty.
fn flatten_metadata(raw: Map<String, Value>) -> std::collections::HashMap<String, String> {
    raw.into_iter()
        .map(|(k, v)| {
            let s = match v {
                Value::Null => String::new(),
                Value::String(s) => s,
                other => other.to_string(),
            };
            (k, s)
        })
        .collect()
}

pub fn read_index_documents<R: BufRead>(reader: R) -> Result<Loaded<IndexDocument>, AptekaError> {
    read_records(reader, |record| {
        Some(IndexDocument {
            id: Uuid::new_v4().to_string(),
            document: record.text,
            metadata: flatten_metadata(record.metadata),
        })
    })
}

/// Upload in batches of `batch_size`. Returns the number of documents sent.
pub async fn upload_documents(
    index: &dyn SemanticIndex,
    documents: Vec<IndexDocument>,
    batch_size: usize,
) -> Result<usize, AptekaError> {
    let total = documents.len();
    let mut sent = 0;
    for batch in documents.chunks(batch_size.max(1)) {
        index.add(batch.to_vec()).await?;
        sent += batch.len();
        info!(sent, total, "Uploaded batch");
    }
    Ok(sent)
}

/// Read `path` and upload it to `index`.
pub async fn ingest_file(index: &dyn SemanticIndex, path: &Path) -> Result<(usize, usize), AptekaError> {
    let loaded = read_index_documents(open(path)?)?;
    let skipped = loaded.skipped;
    let sent = upload_documents(index, loaded.items, INDEX_BATCH_SIZE).await?;
    Ok((sent, skipped))
}

// =============================================================================
// Locations
// =============================================================================

fn coordinate(metadata: &Map<String, Value>, key: &str) -> Option<f64> {
    match metadata.get(key)? {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
}

pub fn read_locations<R: BufRead>(reader: R) -> Result<Loaded<NewLocation>, AptekaError> {
    read_records(reader, |record| {
        let lat = coordinate(&record.metadata, "latitude")?;
        let lon = coordinate(&record.metadata, "longitude")?;
        let coordinates = Coordinates::new(lat, lon).ok()?;
        Some(NewLocation {
            text: record.text,
            coordinates,
        })
    })
}

pub fn read_locations_file(path: &Path) -> Result<Loaded<NewLocation>, AptekaError> {
    read_locations(open(path)?)
}
