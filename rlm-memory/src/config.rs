//! Loading a [`MemoryPolicy`] from `.agents/memory/config.yaml`
//!
//! ```yaml
//! enabled: true
//! read_layers:
//!   - project_agent
//!   - project_global
//! write_layers:
//!   - project_agent
//! allow_user_global_write: false
//! retention_days: 90
//! redaction_rules:
//!   - api_key
//! ```
//!
//! Every key is optional. A missing or blank file yields the default policy.

use std::fs;
use std::io::ErrorKind;
use std::path::{Path, PathBuf};

use serde::Deserialize;
use tracing::debug;

use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::policy::MemoryPolicy;

/// Config file location relative to the project root
pub fn default_config_path(project_root: &Path) -> PathBuf {
    project_root.join(".agents").join("memory").join("config.yaml")
}

#[derive(Debug, Default, Deserialize)]
struct RawConfig {
    enabled: Option<bool>,
    read_layers: Option<Vec<String>>,
    write_layers: Option<Vec<String>>,
    allow_user_global_write: Option<bool>,
    retention_days: Option<i64>,
    redaction_rules: Option<Vec<String>>,
}

/// Load and validate the policy for `project_root`.
///
/// `config_path` defaults to [`default_config_path`].
pub fn load_policy(project_root: &Path, config_path: Option<&Path>) -> Result<MemoryPolicy> {
    let project_root = fs::canonicalize(project_root).map_err(|e| {
        Error::config(format!(
            "project root {} is not accessible: {}",
            project_root.display(),
            e
        ))
    })?;
    let config_path = config_path
        .map(Path::to_path_buf)
        .unwrap_or_else(|| default_config_path(&project_root));

    let raw = read_raw_config(&config_path)?;
    let mut policy = MemoryPolicy::for_project(project_root);

    if let Some(enabled) = raw.enabled {
        policy.enabled = enabled;
    }
    if let Some(allow) = raw.allow_user_global_write {
        policy.allow_user_global_write = allow;
    }
    if let Some(days) = raw.retention_days {
        policy.retention_days = u32::try_from(days)
            .ok()
            .filter(|days| *days > 0)
            .ok_or_else(|| Error::config("retention_days must be a positive integer"))?;
    }
    if let Some(layers) = raw.read_layers {
        policy.read_layers = parse_layers("read_layers", &layers)?;
    }
    if let Some(layers) = raw.write_layers {
        policy.write_layers = parse_layers("write_layers", &layers)?;
    }
    if let Some(rules) = raw.redaction_rules {
        policy.redaction_rules = rules;
    }

    policy.validate()?;
    debug!(config = %config_path.display(), "Loaded memory policy");
    Ok(policy)
}

fn read_raw_config(path: &Path) -> Result<RawConfig> {
    let text = match fs::read_to_string(path) {
        Ok(text) => text,
        Err(e) if e.kind() == ErrorKind::NotFound => return Ok(RawConfig::default()),
        Err(e) => return Err(e.into()),
    };
    if text.trim().is_empty() {
        return Ok(RawConfig::default());
    }

    let raw: Option<RawConfig> = serde_yaml::from_str(&text)
        .map_err(|e| Error::config(format!("{}: {}", path.display(), e)))?;
    Ok(raw.unwrap_or_default())
}

fn parse_layers(key: &str, names: &[String]) -> Result<Vec<Layer>> {
    if names.is_empty() {
        return Err(Error::config(format!("{} must not be empty", key)));
    }

    let unknown: Vec<&str> = names
        .iter()
        .map(String::as_str)
        .filter(|name| name.parse::<Layer>().is_err())
        .collect();
    if !unknown.is_empty() {
        return Err(Error::config(format!(
            "{} contains unknown layers: {}",
            key,
            unknown.join(", ")
        )));
    }

    names.iter().map(|name| name.parse()).collect()
}
