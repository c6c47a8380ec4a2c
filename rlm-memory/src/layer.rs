//! Memory layers and their on-disk locations
//!
//! There are exactly four layers. `project_*` layers live under
//! `<project>/.agents/memory`, `user_*` layers under `<home>/.agents/memory`.
//! Agent-scoped layers are namespaced by agent identity:
//!
//! ```text
//! <root>/agents/<agent_id>/memory.jsonl   project_agent / user_agent
//! <root>/global/memory.jsonl              project_global / user_global
//! ```

use std::fmt;
use std::path::{Path, PathBuf};
use std::str::FromStr;

use serde::{Deserialize, Serialize};

use crate::error::{Error, Result};
use crate::policy::MemoryPolicy;

/// File name of every layer log
pub const MEMORY_FILE_NAME: &str = "memory.jsonl";

/// A storage scope
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, PartialOrd, Ord, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Layer {
    /// Private to one agent within one project
    ProjectAgent,

    /// Shared by all agents within one project
    ProjectGlobal,

    /// Private to one agent across every project of the user
    UserAgent,

    /// Shared by all agents across every project of the user
    UserGlobal,
}

impl Layer {
    pub const ALL: [Layer; 4] = [
        Layer::ProjectAgent,
        Layer::ProjectGlobal,
        Layer::UserAgent,
        Layer::UserGlobal,
    ];

    pub fn as_str(&self) -> &'static str {
        match self {
            Layer::ProjectAgent => "project_agent",
            Layer::ProjectGlobal => "project_global",
            Layer::UserAgent => "user_agent",
            Layer::UserGlobal => "user_global",
        }
    }

    /// Whether records in this layer belong to a single agent
    pub fn is_agent_scoped(&self) -> bool {
        matches!(self, Layer::ProjectAgent | Layer::UserAgent)
    }

    /// Whether this layer lives under the user's home directory
    pub fn is_user_scoped(&self) -> bool {
        matches!(self, Layer::UserAgent | Layer::UserGlobal)
    }

    /// Whether records written here become visible to other agents.
    /// Writes to these layers are redacted.
    pub fn is_shared(&self) -> bool {
        !self.is_agent_scoped()
    }
}

impl fmt::Display for Layer {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.as_str())
    }
}

impl FromStr for Layer {
    type Err = Error;

    fn from_str(s: &str) -> Result<Self> {
        Layer::ALL
            .into_iter()
            .find(|layer| layer.as_str() == s)
            .ok_or_else(|| Error::unknown_layer(s))
    }
}

/// Resolved log file for every layer of one agent
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct LayerPaths {
    project_agent: PathBuf,
    project_global: PathBuf,
    user_agent: PathBuf,
    user_global: PathBuf,
}

impl LayerPaths {
    pub fn get(&self, layer: Layer) -> &Path {
        match layer {
            Layer::ProjectAgent => &self.project_agent,
            Layer::ProjectGlobal => &self.project_global,
            Layer::UserAgent => &self.user_agent,
            Layer::UserGlobal => &self.user_global,
        }
    }

    pub fn iter(&self) -> impl Iterator<Item = (Layer, &Path)> {
        Layer::ALL.into_iter().map(move |layer| (layer, self.get(layer)))
    }
}

/// Map every layer to its log file for `agent_id`.
///
/// Pure: no directories are created and nothing is read.
pub fn resolve_layer_paths(policy: &MemoryPolicy, agent_id: &str) -> Result<LayerPaths> {
    validate_agent_id(agent_id)?;

    let project_root = policy
        .project_memory_root()
        .ok_or_else(|| Error::config("policy.project_root is required for layer resolution"))?;
    let user_root = policy.user_memory_root()?;

    Ok(LayerPaths {
        project_agent: agent_dir(&project_root, agent_id).join(MEMORY_FILE_NAME),
        project_global: project_root.join("global").join(MEMORY_FILE_NAME),
        user_agent: agent_dir(&user_root, agent_id).join(MEMORY_FILE_NAME),
        user_global: user_root.join("global").join(MEMORY_FILE_NAME),
    })
}

fn agent_dir(root: &Path, agent_id: &str) -> PathBuf {
    root.join("agents").join(agent_id)
}

/// Agent ids become directory names, so they must be a single path segment.
pub(crate) fn validate_agent_id(agent_id: &str) -> Result<()> {
    if agent_id.is_empty() {
        return Err(Error::config("agent_id is required"));
    }
    if agent_id == "." || agent_id == ".." || agent_id.contains(['/', '\\']) {
        return Err(Error::config(format!(
            "agent_id '{}' must be a single path segment",
            agent_id
        )));
    }
    Ok(())
}
