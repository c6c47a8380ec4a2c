//! Memory records as persisted in layer logs

use std::ops::Deref;
use std::path::PathBuf;

use chrono::{SecondsFormat, Utc};
use serde::{Deserialize, Deserializer, Serialize};
use serde_json::{Map, Value};
use uuid::Uuid;

use crate::layer::Layer;

/// Confidence assigned to records that do not carry one
pub const DEFAULT_CONFIDENCE: f64 = 0.7;

/// Source assigned to records that do not carry one
pub const DEFAULT_SOURCE: &str = "unknown";

/// A single memory record.
///
/// This is the typed view of a stored line. Only the presence of the required
/// fields is checked, so values of other JSON types are read leniently: scalars
/// become their text form, a numeric string is accepted as `confidence`.
/// Anything else a caller attaches is kept in [`MemoryRecord::extra`] and
/// written back out unchanged.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MemoryRecord {
    /// Caller-assigned id. Unique within a layer; repeated ids are newer versions.
    #[serde(deserialize_with = "de_text")]
    pub id: String,

    /// Creation timestamp (RFC 3339)
    #[serde(deserialize_with = "de_text")]
    pub created_at: String,

    /// Layer this record belongs to. Stamped by the store on append.
    pub scope: Layer,

    /// Free-form category (fact, note, preference, ...)
    #[serde(deserialize_with = "de_text")]
    pub entry_type: String,

    /// Text body
    #[serde(deserialize_with = "de_text")]
    pub content: String,

    #[serde(deserialize_with = "de_text")]
    pub project_id: String,

    #[serde(default, deserialize_with = "de_tags")]
    pub tags: Vec<String>,

    #[serde(default = "default_confidence", deserialize_with = "de_confidence")]
    pub confidence: f64,

    #[serde(default = "default_source", deserialize_with = "de_text")]
    pub source: String,

    #[serde(default, deserialize_with = "de_optional_text")]
    pub expires_at: Option<String>,

    /// Owning agent. Required for agent-scoped layers.
    #[serde(
        default,
        deserialize_with = "de_optional_text",
        skip_serializing_if = "Option::is_none"
    )]
    pub agent_id: Option<String>,

    /// Extension fields
    #[serde(flatten)]
    pub extra: Map<String, Value>,
}

fn default_confidence() -> f64 {
    DEFAULT_CONFIDENCE
}

fn default_source() -> String {
    DEFAULT_SOURCE.to_string()
}

/// Text form of a JSON value: strings as-is, anything else as compact JSON.
fn text_of(value: Value) -> String {
    match value {
        Value::String(s) => s,
        other => other.to_string(),
    }
}

fn optional_text_of(value: Value) -> Option<String> {
    match value {
        Value::Null => None,
        other => Some(text_of(other)),
    }
}

fn tags_of(value: Value) -> Vec<String> {
    match value {
        Value::Null => Vec::new(),
        Value::Array(items) => items.into_iter().map(text_of).collect(),
        other => vec![text_of(other)],
    }
}

fn confidence_of(value: &Value) -> f64 {
    match value {
        Value::Number(n) => n.as_f64(),
        Value::String(s) => s.trim().parse().ok(),
        _ => None,
    }
    .unwrap_or(DEFAULT_CONFIDENCE)
}

fn de_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<String, D::Error> {
    Value::deserialize(deserializer).map(text_of)
}

fn de_optional_text<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Option<String>, D::Error> {
    Value::deserialize(deserializer).map(optional_text_of)
}

fn de_tags<'de, D: Deserializer<'de>>(deserializer: D) -> Result<Vec<String>, D::Error> {
    Value::deserialize(deserializer).map(tags_of)
}

fn de_confidence<'de, D: Deserializer<'de>>(deserializer: D) -> Result<f64, D::Error> {
    Value::deserialize(deserializer).map(|value| confidence_of(&value))
}

impl MemoryRecord {
    /// Build the typed view of an already validated record object.
    ///
    /// Never fails: missing optional fields take their defaults and values of
    /// unexpected types are read leniently.
    pub(crate) fn from_fields(scope: Layer, mut fields: Map<String, Value>) -> Self {
        let mut take = |key: &str| fields.remove(key).unwrap_or(Value::Null);

        let id = text_of(take("id"));
        let created_at = text_of(take("created_at"));
        let entry_type = text_of(take("entry_type"));
        let content = text_of(take("content"));
        let project_id = text_of(take("project_id"));
        let tags = tags_of(take("tags"));
        let confidence = match take("confidence") {
            Value::Null => DEFAULT_CONFIDENCE,
            value => confidence_of(&value),
        };
        let source = match take("source") {
            Value::Null => default_source(),
            value => text_of(value),
        };
        let expires_at = optional_text_of(take("expires_at"));
        let agent_id = optional_text_of(take("agent_id"));
        fields.remove("scope");

        Self {
            id,
            created_at,
            scope,
            entry_type,
            content,
            project_id,
            tags,
            confidence,
            source,
            expires_at,
            agent_id,
            extra: fields,
        }
    }

    /// Create a record stamped with the current time.
    ///
    /// `scope` starts as `project_agent` and is overwritten by the store with
    /// the layer the record is appended to.
    pub fn new(
        id: impl Into<String>,
        entry_type: impl Into<String>,
        content: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self {
            id: id.into(),
            created_at: Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true),
            scope: Layer::ProjectAgent,
            entry_type: entry_type.into(),
            content: content.into(),
            project_id: project_id.into(),
            tags: Vec::new(),
            confidence: DEFAULT_CONFIDENCE,
            source: DEFAULT_SOURCE.to_string(),
            expires_at: None,
            agent_id: None,
            extra: Map::new(),
        }
    }

    /// Create a record with a fresh random id
    pub fn generate(
        entry_type: impl Into<String>,
        content: impl Into<String>,
        project_id: impl Into<String>,
    ) -> Self {
        Self::new(Uuid::new_v4().to_string(), entry_type, content, project_id)
    }

    pub fn with_scope(mut self, scope: Layer) -> Self {
        self.scope = scope;
        self
    }

    pub fn with_created_at(mut self, created_at: impl Into<String>) -> Self {
        self.created_at = created_at.into();
        self
    }

    pub fn with_tags<S: Into<String>>(mut self, tags: impl IntoIterator<Item = S>) -> Self {
        self.tags = tags.into_iter().map(Into::into).collect();
        self
    }

    pub fn with_confidence(mut self, confidence: f64) -> Self {
        self.confidence = confidence;
        self
    }

    pub fn with_source(mut self, source: impl Into<String>) -> Self {
        self.source = source.into();
        self
    }

    pub fn with_expires_at(mut self, expires_at: impl Into<String>) -> Self {
        self.expires_at = Some(expires_at.into());
        self
    }

    pub fn with_agent_id(mut self, agent_id: impl Into<String>) -> Self {
        self.agent_id = Some(agent_id.into());
        self
    }

    /// Attach an extension field
    pub fn with_extra(mut self, key: impl Into<String>, value: impl Into<Value>) -> Self {
        self.extra.insert(key.into(), value.into());
        self
    }
}

/// A record returned by a read, annotated with where it came from.
///
/// Serializes as the stored object plus `source_layer` and `source_path`.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct SourcedRecord {
    #[serde(flatten)]
    pub record: MemoryRecord,

    pub source_layer: Layer,

    pub source_path: PathBuf,
}

impl Deref for SourcedRecord {
    type Target = MemoryRecord;

    fn deref(&self) -> &Self::Target {
        &self.record
    }
}
