//! Record validation, normalization, and layer log loading
//!
//! Validation never panics and never returns an [`Error`](crate::Error) for
//! bad content; it produces a [`SchemaWarning`]. Writers turn the warning into
//! a rejected append, readers log it and skip the line.

use std::fmt;
use std::fs::File;
use std::io::{BufRead, BufReader, ErrorKind};
use std::path::{Path, PathBuf};

use serde::Serialize;
use serde_json::{json, Map, Value};

use crate::error::Result;
use crate::layer::Layer;
use crate::record::{MemoryRecord, DEFAULT_CONFIDENCE, DEFAULT_SOURCE};

/// Fields every record must carry with a non-empty value
pub const REQUIRED_FIELDS: [&str; 6] = [
    "id",
    "created_at",
    "scope",
    "entry_type",
    "content",
    "project_id",
];

/// Why a record was rejected
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize)]
#[serde(rename_all = "snake_case")]
pub enum WarningCode {
    InvalidJson,
    InvalidRecordType,
    MissingRequiredFields,
    InvalidScope,
    InvalidAgentScope,
}

impl WarningCode {
    pub fn as_str(&self) -> &'static str {
        match self {
            WarningCode::InvalidJson => "invalid_json",
            WarningCode::InvalidRecordType => "invalid_record_type",
            WarningCode::MissingRequiredFields => "missing_required_fields",
            WarningCode::InvalidScope => "invalid_scope",
            WarningCode::InvalidAgentScope => "invalid_agent_scope",
        }
    }
}

impl fmt::Display for WarningCode {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

/// Structured description of a rejected record
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SchemaWarning {
    pub code: WarningCode,
    pub message: String,
    pub path: PathBuf,
    /// 1-based line in the layer log, 0 for records that were never persisted
    pub line: usize,
    /// Code-specific context, e.g. `missing_fields`
    #[serde(flatten)]
    pub details: Map<String, Value>,
}

impl SchemaWarning {
    pub(crate) fn new(code: WarningCode, message: impl Into<String>, path: &Path, line: usize) -> Self {
        Self {
            code,
            message: message.into(),
            path: path.to_path_buf(),
            line,
            details: Map::new(),
        }
    }

    pub(crate) fn detail(mut self, key: &str, value: Value) -> Self {
        self.details.insert(key.to_string(), value);
        self
    }

    /// Names reported by a `missing_required_fields` warning
    pub fn missing_fields(&self) -> Vec<&str> {
        self.details
            .get("missing_fields")
            .and_then(Value::as_array)
            .map(|fields| fields.iter().filter_map(Value::as_str).collect())
            .unwrap_or_default()
    }
}

impl fmt::Display for SchemaWarning {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "{} ({}:{}): {}",
            self.code,
            self.path.display(),
            self.line,
            self.message
        )
    }
}

/// Check a candidate record and fill in defaulted optional fields.
///
/// `line` and `path` only feed the warning; nothing is read from disk.
/// Normalizing an already normalized record returns it unchanged.
pub fn validate_record(
    record: &Value,
    line: usize,
    path: &Path,
) -> std::result::Result<MemoryRecord, SchemaWarning> {
    check_record(record, line, path).map(|(scope, fields)| MemoryRecord::from_fields(scope, fields))
}

/// The checked record object with defaults filled in, as it is persisted.
pub fn normalize_record(
    record: &Value,
    line: usize,
    path: &Path,
) -> std::result::Result<Map<String, Value>, SchemaWarning> {
    check_record(record, line, path).map(|(_, fields)| fields)
}

/// Rejects only non-objects, missing required fields, unknown scopes and
/// agent-scoped records without an owner. Other field values pass untouched.
pub(crate) fn check_record(
    record: &Value,
    line: usize,
    path: &Path,
) -> std::result::Result<(Layer, Map<String, Value>), SchemaWarning> {
    let Some(object) = record.as_object() else {
        return Err(SchemaWarning::new(
            WarningCode::InvalidRecordType,
            "Memory record must be a JSON object.",
            path,
            line,
        )
        .detail("actual_type", json!(json_type_name(record))));
    };

    let missing: Vec<&str> = REQUIRED_FIELDS
        .iter()
        .copied()
        .filter(|field| object.get(*field).map_or(true, is_blank))
        .collect();
    if !missing.is_empty() {
        return Err(SchemaWarning::new(
            WarningCode::MissingRequiredFields,
            "Record missing required fields.",
            path,
            line,
        )
        .detail("missing_fields", json!(missing)));
    }

    let scope_value = &object["scope"];
    let Some(scope) = scope_value.as_str().and_then(|s| s.parse::<Layer>().ok()) else {
        let allowed: Vec<&str> = Layer::ALL.iter().map(Layer::as_str).collect();
        return Err(SchemaWarning::new(
            WarningCode::InvalidScope,
            "Record scope is not supported.",
            path,
            line,
        )
        .detail("scope", scope_value.clone())
        .detail("allowed_scopes", json!(allowed)));
    };

    if scope.is_agent_scoped() && object.get("agent_id").map_or(true, is_blank) {
        return Err(SchemaWarning::new(
            WarningCode::InvalidAgentScope,
            "Agent scope records require agent_id.",
            path,
            line,
        )
        .detail("scope", json!(scope)));
    }

    let mut normalized = object.clone();
    if normalized.get("tags").map_or(true, Value::is_null) {
        normalized.insert("tags".to_string(), json!([]));
    }
    if normalized.get("confidence").map_or(true, Value::is_null) {
        normalized.insert("confidence".to_string(), json!(DEFAULT_CONFIDENCE));
    }
    if normalized.get("source").map_or(true, is_blank) {
        normalized.insert("source".to_string(), json!(DEFAULT_SOURCE));
    }
    normalized.entry("expires_at").or_insert(Value::Null);

    Ok((scope, normalized))
}

/// Valid records and warnings from one layer log, in file order
#[derive(Debug, Default)]
pub struct LayerLoad {
    pub records: Vec<MemoryRecord>,
    pub warnings: Vec<SchemaWarning>,
}

/// Load a JSONL layer log.
///
/// A missing file is an empty layer. Lines that are not JSON or fail
/// validation become warnings; only I/O failures are errors.
pub fn load_jsonl_records(path: &Path) -> Result<LayerLoad> {
    let file = match File::open(path) {
        Ok(file) => file,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(LayerLoad::default()),
        Err(e) => return Err(e.into()),
    };

    let mut load = LayerLoad::default();
    for (index, raw) in BufReader::new(file).split(b'\n').enumerate() {
        let raw = raw?;
        let line_number = index + 1;

        let parsed = std::str::from_utf8(&raw)
            .map_err(|e| e.to_string())
            .and_then(|text| {
                let text = text.trim();
                if text.is_empty() {
                    Ok(None)
                } else {
                    serde_json::from_str::<Value>(text)
                        .map(Some)
                        .map_err(|e| e.to_string())
                }
            });

        let value = match parsed {
            Ok(Some(value)) => value,
            Ok(None) => continue,
            Err(error) => {
                load.warnings.push(
                    SchemaWarning::new(
                        WarningCode::InvalidJson,
                        "Could not decode JSON line.",
                        path,
                        line_number,
                    )
                    .detail("error", json!(error)),
                );
                continue;
            }
        };

        match validate_record(&value, line_number, path) {
            Ok(record) => load.records.push(record),
            Err(warning) => load.warnings.push(warning),
        }
    }

    Ok(load)
}

/// Mirrors truthiness of a JSON value: null, false, 0, "" and empty
/// containers count as absent.
fn is_blank(value: &Value) -> bool {
    match value {
        Value::Null => true,
        Value::Bool(b) => !b,
        Value::Number(n) => n.as_f64() == Some(0.0),
        Value::String(s) => s.is_empty(),
        Value::Array(a) => a.is_empty(),
        Value::Object(o) => o.is_empty(),
    }
}

fn json_type_name(value: &Value) -> &'static str {
    match value {
        Value::Null => "null",
        Value::Bool(_) => "bool",
        Value::Number(_) => "number",
        Value::String(_) => "string",
        Value::Array(_) => "array",
        Value::Object(_) => "object",
    }
}
