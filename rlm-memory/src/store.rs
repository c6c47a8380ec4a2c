//! The layered memory store
//!
//! Writes go through policy checks, redaction and validation, then are
//! appended as one JSON line under the layer lock and synced to disk before
//! the lock is released. Reads walk the retrieval plan and never take a lock:
//! appends are line-atomic, so a reader sees at worst a slightly stale prefix.

use std::fs::{self, OpenOptions};
use std::io::Write;
use std::path::Path;
use std::time::Duration;

use serde::Serialize;
use serde_json::{json, Map, Value};
use tracing::{debug, info, warn};

use crate::error::{Error, Result};
use crate::layer::{resolve_layer_paths, validate_agent_id, Layer, LayerPaths};
use crate::lock::{LayerLock, DEFAULT_LOCK_POLL, DEFAULT_LOCK_TIMEOUT};
use crate::policy::MemoryPolicy;
use crate::record::{MemoryRecord, SourcedRecord};
use crate::retrieval::build_retrieval_plan;
use crate::safety::{authorize_write, Redactor};
use crate::schema::{check_record, load_jsonl_records, SchemaWarning, WarningCode};

/// Lock tuning for a store
#[derive(Debug, Clone, Copy)]
pub struct StoreOptions {
    /// Give up on a busy layer after this long
    pub lock_timeout: Duration,

    /// Sleep between lock attempts
    pub lock_poll: Duration,
}

impl Default for StoreOptions {
    fn default() -> Self {
        Self {
            lock_timeout: DEFAULT_LOCK_TIMEOUT,
            lock_poll: DEFAULT_LOCK_POLL,
        }
    }
}

/// Records visible to a store, plus every line that had to be skipped
#[derive(Debug, Default, Serialize)]
pub struct ReadOutcome {
    pub records: Vec<SourcedRecord>,
    pub warnings: Vec<SchemaWarning>,
}

/// Append-only memory store for one agent
pub struct MemoryStore {
    policy: MemoryPolicy,
    agent_id: String,
    paths: LayerPaths,
    redactor: Redactor,
    options: StoreOptions,
}

impl MemoryStore {
    /// Create a store with default lock options
    pub fn new(policy: MemoryPolicy, agent_id: impl Into<String>) -> Result<Self> {
        Self::with_options(policy, agent_id, StoreOptions::default())
    }

    /// Create a store. All layer paths are resolved here, once.
    pub fn with_options(
        policy: MemoryPolicy,
        agent_id: impl Into<String>,
        options: StoreOptions,
    ) -> Result<Self> {
        let agent_id = agent_id.into();
        validate_agent_id(&agent_id)?;
        let paths = resolve_layer_paths(&policy, &agent_id)?;
        let redactor = Redactor::new(policy.redaction_rules.as_slice())?;

        debug!(agent_id = %agent_id, "Opened layered memory store");

        Ok(Self {
            policy,
            agent_id,
            paths,
            redactor,
            options,
        })
    }

    pub fn policy(&self) -> &MemoryPolicy {
        &self.policy
    }

    pub fn agent_id(&self) -> &str {
        &self.agent_id
    }

    /// Log file backing `layer`
    pub fn layer_path(&self, layer: Layer) -> &Path {
        self.paths.get(layer)
    }

    /// Append `record` to the layer named `layer`.
    ///
    /// Fails with [`Error::UnknownLayer`] for names outside the four layers.
    pub fn append_to(&self, layer: &str, record: Value) -> Result<String> {
        self.append(layer.parse()?, record)
    }

    /// Append a typed record to `layer`
    pub fn append_record(&self, layer: Layer, record: &MemoryRecord) -> Result<String> {
        self.append(layer, serde_json::to_value(record)?)
    }

    /// Append `record` to `layer` and return its id.
    ///
    /// Either the whole line is durably written or nothing changes.
    pub fn append(&self, layer: Layer, record: Value) -> Result<String> {
        let (record, fields) = self.prepare_record(layer, record)?;
        let target = self.paths.get(layer);

        let mut line = serde_json::to_string(&fields)?;
        line.push('\n');

        if let Some(parent) = target.parent() {
            fs::create_dir_all(parent)?;
        }

        {
            let _lock =
                LayerLock::acquire(target, self.options.lock_timeout, self.options.lock_poll)?;
            let mut file = OpenOptions::new().create(true).append(true).open(target)?;
            file.write_all(line.as_bytes())?;
            file.flush()?;
            file.sync_all()?;
        }

        info!(
            layer = %layer,
            id = %record.id,
            agent_id = %self.agent_id,
            "Appended memory record"
        );

        Ok(record.id)
    }

    /// Policy checks, scope stamping, redaction and validation for a write.
    ///
    /// Returns the typed view and the normalized object that is persisted.
    fn prepare_record(
        &self,
        layer: Layer,
        mut record: Value,
    ) -> Result<(MemoryRecord, Map<String, Value>)> {
        if !self.policy.is_writable(layer) {
            return Err(Error::LayerNotWritable(layer));
        }
        // Re-checked on every write; a policy built by hand skips validate().
        if !authorize_write(layer, &self.policy) {
            return Err(Error::PermissionDenied(layer));
        }

        if let Some(object) = record.as_object_mut() {
            object.insert("scope".to_string(), json!(layer));

            if layer.is_agent_scoped() && object.get("agent_id").map_or(true, Value::is_null) {
                object.insert("agent_id".to_string(), json!(self.agent_id));
            }

            if layer.is_shared() {
                if let Some(Value::String(content)) = object.get_mut("content") {
                    *content = self.redactor.redact(content);
                }
                if let Some(Value::Array(tags)) = object.get_mut("tags") {
                    for tag in tags.iter_mut() {
                        if let Value::String(text) = tag {
                            *text = self.redactor.redact(text);
                        }
                    }
                }
            }
        }

        let target = self.paths.get(layer);
        let (scope, fields) = check_record(&record, 0, target).map_err(Error::validation)?;

        let owner = fields.get("agent_id");
        if layer.is_agent_scoped() && owner.and_then(Value::as_str) != Some(self.agent_id.as_str()) {
            return Err(Error::validation(
                SchemaWarning::new(
                    WarningCode::InvalidAgentScope,
                    "Agent scope records must belong to the writing agent.",
                    target,
                    0,
                )
                .detail("agent_id", owner.cloned().unwrap_or(Value::Null))
                .detail("expected_agent_id", json!(self.agent_id)),
            ));
        }

        Ok((MemoryRecord::from_fields(scope, fields.clone()), fields))
    }

    /// Every visible record in precedence order.
    ///
    /// Skipped lines are logged; use [`MemoryStore::read_all_with_warnings`]
    /// to inspect them.
    pub fn read_all(&self) -> Result<Vec<SourcedRecord>> {
        Ok(self.read_all_with_warnings()?.records)
    }

    /// Every visible record in precedence order, plus skipped-line warnings.
    ///
    /// Layers are ordered by `read_layers`; within a layer the most recently
    /// appended record comes first.
    pub fn read_all_with_warnings(&self) -> Result<ReadOutcome> {
        let mut outcome = ReadOutcome::default();
        if !self.policy.enabled {
            return Ok(outcome);
        }

        for entry in build_retrieval_plan(&self.policy, &self.agent_id)? {
            let load = load_jsonl_records(&entry.path)?;
            debug!(
                layer = %entry.layer,
                records = load.records.len(),
                warnings = load.warnings.len(),
                "Loaded memory layer"
            );

            for warning in &load.warnings {
                warn!(layer = %entry.layer, "Skipping memory record: {}", warning);
            }

            outcome
                .records
                .extend(load.records.into_iter().rev().map(|record| SourcedRecord {
                    record,
                    source_layer: entry.layer,
                    source_path: entry.path.clone(),
                }));
            outcome.warnings.extend(load.warnings);
        }

        Ok(outcome)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn policy(dir: &TempDir) -> MemoryPolicy {
        MemoryPolicy::builder()
            .project_root(dir.path().join("project"))
            .user_root(dir.path().join("home"))
            .write_layers([Layer::ProjectAgent, Layer::ProjectGlobal])
            .build()
            .unwrap()
    }

    fn record(id: &str, content: &str) -> Value {
        json!({
            "id": id,
            "created_at": "2026-02-11T00:00:00Z",
            "entry_type": "fact",
            "content": content,
            "project_id": "rlm-mem",
        })
    }

    fn lines(path: &Path) -> Vec<Value> {
        fs::read_to_string(path)
            .unwrap()
            .lines()
            .map(|line| serde_json::from_str(line).unwrap())
            .collect()
    }

    #[test]
    fn append_stamps_scope_and_agent() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(policy(&dir), "agent-1").unwrap();

        let id = store.append(Layer::ProjectAgent, record("m-1", "hello")).unwrap();
        assert_eq!(id, "m-1");

        let stored = lines(store.layer_path(Layer::ProjectAgent));
        assert_eq!(stored.len(), 1);
        assert_eq!(stored[0]["scope"], "project_agent");
        assert_eq!(stored[0]["agent_id"], "agent-1");
        assert_eq!(stored[0]["confidence"], 0.7);
        assert_eq!(stored[0]["expires_at"], Value::Null);
    }

    #[test]
    fn caller_scope_is_overwritten() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(policy(&dir), "agent-1").unwrap();
        let mut value = record("m-1", "hello");
        value["scope"] = json!("user_global");

        store.append(Layer::ProjectGlobal, value).unwrap();
        let stored = lines(store.layer_path(Layer::ProjectGlobal));
        assert_eq!(stored[0]["scope"], "project_global");
        assert!(stored[0].get("agent_id").is_none());
    }

    #[test]
    fn unknown_layer_name_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(policy(&dir), "agent-1").unwrap();
        let err = store.append_to("team_global", record("m-1", "x")).unwrap_err();
        assert!(matches!(err, Error::UnknownLayer(_)));
    }

    #[test]
    fn layer_outside_write_layers_is_rejected() {
        let dir = TempDir::new().unwrap();
        let policy = MemoryPolicy::builder()
            .project_root(dir.path().join("project"))
            .user_root(dir.path().join("home"))
            .build()
            .unwrap();
        let store = MemoryStore::new(policy, "agent-1").unwrap();

        let err = store.append(Layer::ProjectGlobal, record("m-1", "x")).unwrap_err();
        assert!(matches!(err, Error::LayerNotWritable(Layer::ProjectGlobal)));
        assert!(!store.layer_path(Layer::ProjectGlobal).exists());
    }

    #[test]
    fn user_layers_are_blocked_without_opt_in() {
        let dir = TempDir::new().unwrap();
        // Struct update skips validate(), as a long-lived caller might.
        let policy = MemoryPolicy {
            write_layers: vec![Layer::UserGlobal, Layer::UserAgent],
            ..policy(&dir)
        };
        let store = MemoryStore::new(policy, "agent-1").unwrap();

        for layer in [Layer::UserGlobal, Layer::UserAgent] {
            let err = store.append(layer, record("m-1", "x")).unwrap_err();
            assert!(matches!(err, Error::PermissionDenied(l) if l == layer));
            assert!(!store.layer_path(layer).exists());
        }
    }

    #[test]
    fn user_global_accepts_writes_with_opt_in() {
        let dir = TempDir::new().unwrap();
        let policy = MemoryPolicy::builder()
            .project_root(dir.path().join("project"))
            .user_root(dir.path().join("home"))
            .write_layers([Layer::UserGlobal])
            .allow_user_global_write(true)
            .build()
            .unwrap();
        let store = MemoryStore::new(policy, "agent-1").unwrap();

        store.append(Layer::UserGlobal, record("m-1", "shared")).unwrap();
        assert!(dir
            .path()
            .join("home/.agents/memory/global/memory.jsonl")
            .exists());
    }

    #[test]
    fn invalid_record_is_rejected_without_touching_disk() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(policy(&dir), "agent-1").unwrap();

        let err = store
            .append(Layer::ProjectGlobal, json!({ "id": "m-1", "content": "x" }))
            .unwrap_err();
        match err {
            Error::Validation(warning) => {
                assert_eq!(warning.code, WarningCode::MissingRequiredFields);
                assert_eq!(
                    warning.missing_fields(),
                    vec!["created_at", "entry_type", "project_id"]
                );
            }
            other => panic!("unexpected error: {other}"),
        }
        assert!(!store.layer_path(Layer::ProjectGlobal).exists());

        let err = store.append(Layer::ProjectGlobal, json!("just text")).unwrap_err();
        assert!(matches!(err, Error::Validation(w) if w.code == WarningCode::InvalidRecordType));
    }

    #[test]
    fn foreign_agent_id_is_rejected() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(policy(&dir), "agent-1").unwrap();
        let mut value = record("m-1", "x");
        value["agent_id"] = json!("agent-2");

        let err = store.append(Layer::ProjectAgent, value).unwrap_err();
        assert!(matches!(err, Error::Validation(w) if w.code == WarningCode::InvalidAgentScope));
    }

    #[test]
    fn shared_layers_are_redacted_private_layers_are_not() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(policy(&dir), "agent-1").unwrap();
        let mut value = record("m-1", "deploy with token abc123");
        value["tags"] = json!(["token:xyz", 7]);

        store.append(Layer::ProjectGlobal, value.clone()).unwrap();
        store.append(Layer::ProjectAgent, value).unwrap();

        let global = lines(store.layer_path(Layer::ProjectGlobal));
        assert_eq!(global[0]["content"], "deploy with token [REDACTED]");
        assert_eq!(global[0]["tags"], json!(["token:[REDACTED]", 7]));

        let private = lines(store.layer_path(Layer::ProjectAgent));
        assert_eq!(private[0]["content"], "deploy with token abc123");
        assert_eq!(private[0]["tags"], json!(["token:xyz", 7]));
    }

    #[test]
    fn read_returns_newest_first_within_a_layer() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(policy(&dir), "agent-1").unwrap();
        for i in 1..=3 {
            store
                .append(Layer::ProjectAgent, record(&format!("m-{i}"), "x"))
                .unwrap();
        }

        let ids: Vec<String> = store.read_all().unwrap().into_iter().map(|r| r.record.id).collect();
        assert_eq!(ids, vec!["m-3", "m-2", "m-1"]);
    }

    #[test]
    fn read_attributes_source_layer_and_path() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(policy(&dir), "agent-1").unwrap();
        store.append(Layer::ProjectGlobal, record("g-1", "x")).unwrap();

        let records = store.read_all().unwrap();
        assert_eq!(records.len(), 1);
        assert_eq!(records[0].source_layer, Layer::ProjectGlobal);
        assert_eq!(records[0].source_path, store.layer_path(Layer::ProjectGlobal));
    }

    #[test]
    fn empty_store_reads_nothing() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(policy(&dir), "agent-1").unwrap();
        let outcome = store.read_all_with_warnings().unwrap();
        assert!(outcome.records.is_empty());
        assert!(outcome.warnings.is_empty());
    }

    #[test]
    fn disabled_policy_neither_reads_nor_writes() {
        let dir = TempDir::new().unwrap();
        let enabled = MemoryStore::new(policy(&dir), "agent-1").unwrap();
        enabled.append(Layer::ProjectAgent, record("m-1", "x")).unwrap();

        let disabled = MemoryStore::new(
            MemoryPolicy {
                enabled: false,
                ..policy(&dir)
            },
            "agent-1",
        )
        .unwrap();
        assert!(disabled.read_all().unwrap().is_empty());
        assert!(matches!(
            disabled.append(Layer::ProjectAgent, record("m-2", "x")),
            Err(Error::LayerNotWritable(_))
        ));
    }

    #[test]
    fn lock_timeout_surfaces_and_leaves_file_untouched() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::with_options(
            policy(&dir),
            "agent-1",
            StoreOptions {
                lock_timeout: Duration::from_millis(30),
                lock_poll: Duration::from_millis(5),
            },
        )
        .unwrap();
        let target = store.layer_path(Layer::ProjectGlobal).to_path_buf();
        fs::create_dir_all(target.parent().unwrap()).unwrap();
        let _held = LayerLock::acquire(&target, DEFAULT_LOCK_TIMEOUT, DEFAULT_LOCK_POLL).unwrap();

        let err = store.append(Layer::ProjectGlobal, record("m-1", "x")).unwrap_err();
        assert!(matches!(err, Error::LockTimeout { .. }));
        assert!(!target.exists());
    }

    #[test]
    fn typed_records_can_be_appended() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(policy(&dir), "agent-1").unwrap();
        let record = MemoryRecord::new("m-1", "preference", "prefers tabs", "rlm-mem")
            .with_tags(["style"])
            .with_extra("conversation_id", "conv-1");

        store.append_record(Layer::ProjectAgent, &record).unwrap();
        let read = store.read_all().unwrap();
        assert_eq!(read[0].agent_id.as_deref(), Some("agent-1"));
        assert_eq!(read[0].tags, vec!["style"]);
        assert_eq!(read[0].extra["conversation_id"], "conv-1");
    }

    #[test]
    fn empty_agent_id_is_rejected_at_construction() {
        let dir = TempDir::new().unwrap();
        assert!(matches!(
            MemoryStore::new(policy(&dir), ""),
            Err(Error::Config(_))
        ));
    }

    #[test]
    fn loosely_typed_fields_are_written_as_given() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(policy(&dir), "agent-1").unwrap();

        for (key, loose) in [
            ("id", json!(42)),
            ("tags", json!(["a", 1])),
            ("confidence", json!("0.9")),
            ("expires_at", json!(1735689600)),
        ] {
            let mut value = record("loose", "x");
            value[key] = loose.clone();
            store.append(Layer::ProjectAgent, value).unwrap();

            let stored = lines(store.layer_path(Layer::ProjectAgent));
            assert_eq!(stored.last().unwrap()[key], loose);
        }

        let outcome = store.read_all_with_warnings().unwrap();
        assert!(outcome.warnings.is_empty(), "{:?}", outcome.warnings);
        assert_eq!(outcome.records.len(), 4);
        assert_eq!(outcome.records[0].expires_at.as_deref(), Some("1735689600"));
        assert_eq!(outcome.records[1].confidence, 0.9);
        assert_eq!(outcome.records[2].tags, vec!["a", "1"]);
        assert_eq!(outcome.records[3].id, "42");
    }

    #[test]
    fn numeric_id_is_returned_as_text() {
        let dir = TempDir::new().unwrap();
        let store = MemoryStore::new(policy(&dir), "agent-1").unwrap();
        let mut value = record("ignored", "x");
        value["id"] = json!(42);
        assert_eq!(store.append(Layer::ProjectGlobal, value).unwrap(), "42");
    }

    #[test]
    fn unlisted_user_global_is_not_writable_under_defaults() {
        let dir = TempDir::new().unwrap();
        let policy = MemoryPolicy::builder()
            .project_root(dir.path().join("project"))
            .user_root(dir.path().join("home"))
            .build()
            .unwrap();
        let store = MemoryStore::new(policy, "agent-1").unwrap();

        let err = store.append(Layer::UserGlobal, record("m-1", "x")).unwrap_err();
        assert!(matches!(err, Error::LayerNotWritable(Layer::UserGlobal)));
        assert!(!store.layer_path(Layer::UserGlobal).exists());
    }
}
