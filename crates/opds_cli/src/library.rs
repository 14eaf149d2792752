//! Metadata source backed by a `calibredb list --for-machine` export.
//!
//! The export is a JSON array with one object per book. Custom columns
//! appear as `*label` keys (`*#label` is accepted too).

use std::collections::{BTreeMap, BTreeSet};
use std::path::{Path, PathBuf};

use opds_catalog::MemoryLibrary;
use opds_common::{Book, CustomColumnType, Tag};
use serde::Deserialize;
use serde_json::Value;

/// Calibre joins multiple authors with this separator.
const AUTHOR_SEPARATOR: &str = " & ";

#[derive(Debug, Deserialize)]
#[serde(untagged)]
enum Authors {
    Joined(String),
    List(Vec<String>),
}

impl Default for Authors {
    fn default() -> Self {
        Authors::List(Vec::new())
    }
}

impl Authors {
    fn into_names(self) -> Vec<String> {
        let names = match self {
            Authors::Joined(s) => s.split(AUTHOR_SEPARATOR).map(str::to_string).collect(),
            Authors::List(list) => list,
        };
        names
            .into_iter()
            .map(|n| n.trim().to_string())
            .filter(|n| !n.is_empty())
            .collect()
    }
}

#[derive(Debug, Deserialize)]
struct CalibreRecord {
    id: u64,
    #[serde(default)]
    title: String,
    #[serde(default)]
    authors: Authors,
    #[serde(default)]
    tags: Vec<String>,
    #[serde(default)]
    series: Option<String>,
    #[serde(default)]
    series_index: Option<f64>,
    #[serde(default)]
    rating: Option<f64>,
    #[serde(default)]
    timestamp: Option<String>,
    #[serde(default)]
    cover: Option<PathBuf>,
    #[serde(default)]
    formats: Vec<PathBuf>,
    #[serde(flatten)]
    extra: BTreeMap<String, Value>,
}

fn column_label(key: &str) -> Option<&str> {
    let label = key.strip_prefix('*')?;
    let label = label.strip_prefix('#').unwrap_or(label);
    (!label.is_empty()).then_some(label)
}

fn datatype_of(value: &Value) -> &'static str {
    match value {
        Value::Bool(_) => "bool",
        Value::Number(n) if n.is_i64() || n.is_u64() => "int",
        Value::Number(_) => "float",
        Value::Array(_) => "text-multiple",
        _ => "text",
    }
}

fn render_value(value: &Value) -> Option<String> {
    match value {
        Value::Null => None,
        Value::String(s) if s.is_empty() => None,
        Value::String(s) => Some(s.clone()),
        Value::Array(items) => {
            let parts: Vec<String> = items.iter().filter_map(render_value).collect();
            (!parts.is_empty()).then(|| parts.join(", "))
        }
        other => Some(other.to_string()),
    }
}

/// Parses an export into an in-memory library.
///
/// Tag ids are assigned in name order. Custom column types are inferred
/// from the first non-null value of each `*label` key; when no book has any
/// such key the library reports no custom columns at all.
pub fn parse_library(json: &str) -> Result<MemoryLibrary, serde_json::Error> {
    let records: Vec<CalibreRecord> = serde_json::from_str(json)?;

    let tag_names: BTreeSet<&str> = records
        .iter()
        .flat_map(|r| r.tags.iter().map(String::as_str))
        .collect();
    let tag_ids: BTreeMap<String, u64> = tag_names
        .into_iter()
        .enumerate()
        .map(|(i, name)| (name.to_string(), i as u64 + 1))
        .collect();

    let mut columns: BTreeMap<String, CustomColumnType> = BTreeMap::new();
    let mut saw_columns = false;
    let mut books = Vec::with_capacity(records.len());

    for record in records {
        let mut custom = Vec::new();
        for (key, value) in &record.extra {
            let Some(label) = column_label(key) else {
                continue;
            };
            saw_columns = true;
            if !value.is_null() {
                columns
                    .entry(label.to_string())
                    .or_insert_with(|| CustomColumnType {
                        label: label.to_string(),
                        name: label.to_string(),
                        datatype: datatype_of(value).to_string(),
                    });
            }
            if let Some(rendered) = render_value(value) {
                custom.push((label.to_string(), rendered));
            }
        }

        let tags = record
            .tags
            .iter()
            .filter_map(|name| tag_ids.get(name).map(|id| Tag::new(*id, name.clone())))
            .collect();

        books.push(Book {
            id: record.id,
            title: record.title,
            authors: record.authors.into_names(),
            tags,
            series: record.series.filter(|s| !s.is_empty()),
            series_index: record.series_index,
            rating: record
                .rating
                .filter(|r| *r > 0.0)
                .map(|r| r.round().clamp(0.0, 10.0) as u8),
            timestamp: record.timestamp,
            cover: record.cover,
            formats: record.formats,
            custom,
        });
    }

    let custom_columns = saw_columns.then(|| columns.into_values().collect());
    let tags = tag_ids
        .into_iter()
        .map(|(name, id)| Tag::new(id, name))
        .collect();
    Ok(MemoryLibrary {
        books,
        tags,
        custom_columns,
    })
}

/// Reads and parses an export file.
pub fn load_library(path: &Path) -> Result<MemoryLibrary, Box<dyn std::error::Error>> {
    let json = std::fs::read_to_string(path)
        .map_err(|e| format!("cannot read metadata export {}: {e}", path.display()))?;
    let library = parse_library(&json)
        .map_err(|e| format!("invalid metadata export {}: {e}", path.display()))?;
    tracing::info!(
        path = %path.display(),
        books = library.books.len(),
        tags = library.tags.len(),
        "library loaded"
    );
    Ok(library)
}
