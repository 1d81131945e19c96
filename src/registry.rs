//! Metadata registry: the declarative list of documents to index.
//!
//! The registry is a JSON array of objects:
//!
//! ```json
//! [
//!   {
//!     "id": "kuhl1997",
//!     "title": "Cross-language analysis of phonetic units in language addressed to infants",
//!     "source_kind": "local_file",
//!     "source_location": "pdfs/kuhl1997.pdf",
//!     "tags": ["ids", "phonetics"],
//!     "authors": ["Kuhl, P. K.", "Andruski, J. E."],
//!     "year": 1997,
//!     "venue": "Science",
//!     "doi": "10.1126/science.277.5326.684"
//!   }
//! ]
//! ```
//!
//! Entries are returned in declaration order. Relative `local_file`
//! locations are resolved against the registry file's directory.

use std::collections::HashMap;
use std::path::Path;

use papertrail_core::models::{RegistryEntry, SourceKind};
use serde_json::{Map, Value};

use crate::error::RegistryError;

/// Read and validate the registry at `path`.
pub fn load_registry(path: &Path) -> Result<Vec<RegistryEntry>, RegistryError> {
    let content = std::fs::read_to_string(path).map_err(|source| RegistryError::Io {
        path: path.to_path_buf(),
        source,
    })?;
    let base_dir = path.parent().unwrap_or_else(|| Path::new("."));
    parse_registry(&content, base_dir)
}

/// Parse registry JSON, resolving relative file locations against `base_dir`.
pub fn parse_registry(json: &str, base_dir: &Path) -> Result<Vec<RegistryEntry>, RegistryError> {
    let value: Value =
        serde_json::from_str(json).map_err(|e| RegistryError::Parse(e.to_string()))?;
    let items = match value {
        Value::Array(items) => items,
        other => {
            return Err(RegistryError::Parse(format!(
                "expected a JSON array of entries, found {}",
                json_kind(&other)
            )))
        }
    };

    let mut seen: HashMap<String, usize> = HashMap::new();
    let mut entries = Vec::with_capacity(items.len());

    for (index, item) in items.iter().enumerate() {
        let obj = item.as_object().ok_or_else(|| RegistryError::InvalidField {
            index,
            field: "entry",
            reason: format!("expected an object, found {}", json_kind(item)),
        })?;

        let entry = parse_entry(index, obj, base_dir)?;
        if let Some(first) = seen.insert(entry.id.clone(), index) {
            return Err(RegistryError::DuplicateId {
                id: entry.id,
                first,
                second: index,
            });
        }
        entries.push(entry);
    }

    Ok(entries)
}

fn parse_entry(
    index: usize,
    obj: &Map<String, Value>,
    base_dir: &Path,
) -> Result<RegistryEntry, RegistryError> {
    let id = required_str(index, obj, "id")?;
    let title = required_str(index, obj, "title")?;
    let kind = required_str(index, obj, "source_kind")?;
    let location = required_str(index, obj, "source_location")?;

    let source_kind = match kind.as_str() {
        "local_file" => SourceKind::LocalFile,
        "url" => SourceKind::Url,
        other => {
            return Err(RegistryError::InvalidField {
                index,
                field: "source_kind",
                reason: format!("'{}' is not one of local_file, url", other),
            })
        }
    };

    let source_location = match source_kind {
        SourceKind::LocalFile => {
            let p = Path::new(&location);
            if p.is_absolute() {
                location
            } else {
                base_dir.join(p).to_string_lossy().into_owned()
            }
        }
        SourceKind::Url => {
            let url = reqwest::Url::parse(&location).map_err(|e| RegistryError::InvalidField {
                index,
                field: "source_location",
                reason: e.to_string(),
            })?;
            if url.scheme() != "http" && url.scheme() != "https" {
                return Err(RegistryError::InvalidField {
                    index,
                    field: "source_location",
                    reason: format!("unsupported URL scheme '{}'", url.scheme()),
                });
            }
            location
        }
    };

    Ok(RegistryEntry {
        id,
        title,
        source_kind,
        source_location,
        tags: string_list(index, obj, "tags")?,
        authors: string_list(index, obj, "authors")?,
        year: optional_year(index, obj)?,
        venue: optional_str(index, obj, "venue")?,
        doi: optional_str(index, obj, "doi")?,
    })
}

fn required_str(
    index: usize,
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<String, RegistryError> {
    match obj.get(field) {
        None | Some(Value::Null) => Err(RegistryError::MissingField { index, field }),
        Some(Value::String(s)) if s.trim().is_empty() => {
            Err(RegistryError::MissingField { index, field })
        }
        Some(Value::String(s)) => Ok(s.trim().to_string()),
        Some(other) => Err(RegistryError::InvalidField {
            index,
            field,
            reason: format!("expected a string, found {}", json_kind(other)),
        }),
    }
}

fn optional_str(
    index: usize,
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<Option<String>, RegistryError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(None),
        Some(Value::String(s)) if s.trim().is_empty() => Ok(None),
        Some(Value::String(s)) => Ok(Some(s.trim().to_string())),
        Some(other) => Err(RegistryError::InvalidField {
            index,
            field,
            reason: format!("expected a string, found {}", json_kind(other)),
        }),
    }
}

fn string_list(
    index: usize,
    obj: &Map<String, Value>,
    field: &'static str,
) -> Result<Vec<String>, RegistryError> {
    match obj.get(field) {
        None | Some(Value::Null) => Ok(Vec::new()),
        Some(Value::Array(items)) => items
            .iter()
            .map(|v| match v {
                Value::String(s) => Ok(s.clone()),
                other => Err(RegistryError::InvalidField {
                    index,
                    field,
                    reason: format!("expected strings, found {}", json_kind(other)),
                }),
            })
            .collect(),
        Some(other) => Err(RegistryError::InvalidField {
            index,
            field,
            reason: format!("expected an array, found {}", json_kind(other)),
        }),
    }
}

fn optional_year(index: usize, obj: &Map<String, Value>) -> Result<Option<i32>, RegistryError> {
    match obj.get("year") {
        None | Some(Value::Null) => Ok(None),
        Some(Value::Number(n)) => n
            .as_i64()
            .and_then(|y| i32::try_from(y).ok())
            .map(Some)
            .ok_or_else(|| RegistryError::InvalidField {
                index,
                field: "year",
                reason: format!("{} is not a valid year", n),
            }),
        Some(other) => Err(RegistryError::InvalidField {
            index,
            field: "year",
            reason: format!("expected an integer, found {}", json_kind(other)),
        }),
    }
}

fn json_kind(v: &Value) -> &'static str {
    match v {
        Value::Null => "null",
        Value::Bool(_) => "a boolean",
        Value::Number(_) => "a number",
        Value::String(_) => "a string",
        Value::Array(_) => "an array",
        Value::Object(_) => "an object",
    }
}
