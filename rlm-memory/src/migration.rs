//! Import of legacy per-file memory chunks into a layer
//!
//! Legacy chunks are standalone `chunk-*.json` files (usually grouped in
//! month directories) shaped like
//! `{ "id", "content", "type", "tags", "metadata": { "created_at", ... } }`.
//! Each becomes one appended record. Ids already present in the store or the
//! destination layer are skipped, so re-running a migration is harmless.

use std::collections::HashSet;
use std::fs;
use std::path::{Path, PathBuf};

use chrono::{SecondsFormat, Utc};
use serde_json::{json, Value};
use tracing::{info, warn};

use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::schema::load_jsonl_records;
use crate::store::MemoryStore;

/// How a migration runs
#[derive(Debug, Clone)]
pub struct MigrationOptions {
    /// Count what would be migrated without writing
    pub dry_run: bool,

    /// Copy the destination layer file aside before writing
    pub backup: bool,

    /// `project_id` stamped on every migrated record
    pub project_id: String,
}

impl MigrationOptions {
    pub fn new(project_id: impl Into<String>) -> Self {
        Self {
            dry_run: false,
            backup: false,
            project_id: project_id.into(),
        }
    }

    pub fn dry_run(mut self, dry_run: bool) -> Self {
        self.dry_run = dry_run;
        self
    }

    pub fn backup(mut self, backup: bool) -> Self {
        self.backup = backup;
        self
    }
}

/// Outcome of a migration run
#[derive(Debug, Clone, Default, PartialEq, Eq)]
pub struct MigrationReport {
    /// Records appended (or that would be, on a dry run)
    pub migrated: usize,
    /// Chunks whose id already existed
    pub skipped: usize,
    /// Chunks that could not be read, mapped or appended
    pub failed: usize,
    /// Backup written before the run, if any
    pub backup_path: Option<PathBuf>,
}

/// Migrate every `chunk-*.json` under `src_dir` into `layer` of `store`.
pub fn migrate_legacy_chunks(
    store: &MemoryStore,
    src_dir: &Path,
    layer: Layer,
    options: &MigrationOptions,
) -> Result<MigrationReport> {
    if !src_dir.is_dir() {
        return Err(Error::config(format!(
            "source directory {} does not exist",
            src_dir.display()
        )));
    }

    let mut report = MigrationReport::default();
    let destination = store.layer_path(layer);

    if options.backup && !options.dry_run && destination.exists() {
        let stamp = Utc::now().format("%Y%m%d%H%M%S");
        let mut name = destination.as_os_str().to_os_string();
        name.push(format!(".{stamp}.bak"));
        let backup_path = PathBuf::from(name);
        fs::copy(destination, &backup_path)?;
        info!(backup = %backup_path.display(), "Backed up destination layer");
        report.backup_path = Some(backup_path);
    }

    let mut existing: HashSet<String> = store
        .read_all()?
        .into_iter()
        .map(|record| record.record.id)
        .collect();
    existing.extend(
        load_jsonl_records(destination)?
            .records
            .into_iter()
            .map(|record| record.id),
    );

    let mut files = Vec::new();
    collect_chunk_files(src_dir, &mut files)?;
    files.sort();
    info!(
        count = files.len(),
        existing = existing.len(),
        dry_run = options.dry_run,
        "Migrating legacy chunks"
    );

    for file in files {
        let record = match read_chunk(&file, &options.project_id) {
            Ok(record) => record,
            Err(e) => {
                warn!(file = %file.display(), error = %e, "Failed to read legacy chunk");
                report.failed += 1;
                continue;
            }
        };

        let id = record["id"].as_str().unwrap_or_default().to_string();
        if existing.contains(&id) {
            report.skipped += 1;
            continue;
        }

        if !options.dry_run {
            if let Err(e) = store.append(layer, record) {
                warn!(file = %file.display(), error = %e, "Failed to migrate legacy chunk");
                report.failed += 1;
                continue;
            }
        }

        existing.insert(id);
        report.migrated += 1;
    }

    info!(
        migrated = report.migrated,
        skipped = report.skipped,
        failed = report.failed,
        "Migration complete"
    );
    Ok(report)
}

fn collect_chunk_files(dir: &Path, out: &mut Vec<PathBuf>) -> Result<()> {
    for entry in fs::read_dir(dir)? {
        let entry = entry?;
        let path = entry.path();
        if entry.file_type()?.is_dir() {
            collect_chunk_files(&path, out)?;
        } else if is_chunk_file(&path) {
            out.push(path);
        }
    }
    Ok(())
}

fn is_chunk_file(path: &Path) -> bool {
    path.file_name()
        .and_then(|name| name.to_str())
        .map(|name| name.starts_with("chunk-") && name.ends_with(".json"))
        .unwrap_or(false)
}

/// Map one legacy chunk file to a record
fn read_chunk(path: &Path, project_id: &str) -> Result<Value> {
    let data: Value = serde_json::from_str(&fs::read_to_string(path)?)?;
    let metadata = data.get("metadata").cloned().unwrap_or_else(|| json!({}));

    let id = data
        .get("id")
        .and_then(Value::as_str)
        .filter(|id| !id.is_empty())
        .ok_or_else(|| Error::config(format!("{} has no id", path.display())))?;
    let created_at = metadata
        .get("created_at")
        .and_then(Value::as_str)
        .map(str::to_string)
        .unwrap_or_else(|| Utc::now().to_rfc3339_opts(SecondsFormat::Secs, true));

    Ok(json!({
        "id": id,
        "created_at": created_at,
        "entry_type": data.get("type").and_then(Value::as_str).unwrap_or("note"),
        "content": data.get("content").cloned().unwrap_or(Value::Null),
        "project_id": project_id,
        "tags": data.get("tags").cloned().unwrap_or_else(|| json!([])),
        "metadata": {
            "migrated_from": path.display().to_string(),
            "original_metadata": metadata,
        },
    }))
}
