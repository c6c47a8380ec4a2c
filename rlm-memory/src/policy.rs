//! Memory policy: which layers are read and written, and how
//!
//! A policy is built once per session and never changes afterwards. Use
//! [`MemoryPolicy::builder`] or [`crate::config::load_policy`]; both validate
//! eagerly so a misconfigured policy fails before any store exists.

use std::path::PathBuf;

use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::safety::DEFAULT_REDACTION_RULES;

/// Default retention period in days
pub const DEFAULT_RETENTION_DAYS: u32 = 90;

/// Configuration for the layered memory store
#[derive(Debug, Clone, PartialEq)]
pub struct MemoryPolicy {
    /// Master switch. A disabled policy reads nothing and writes nothing.
    pub enabled: bool,

    /// Layers consulted on read, highest precedence first
    pub read_layers: Vec<Layer>,

    /// Layers that accept appends
    pub write_layers: Vec<Layer>,

    /// Opt-in for writes to `user_agent` / `user_global`
    pub allow_user_global_write: bool,

    /// Retention period in days (always positive)
    pub retention_days: u32,

    /// Case-insensitive keywords whose values are redacted in shared layers
    pub redaction_rules: Vec<String>,

    /// Project the `project_*` layers belong to
    pub project_root: Option<PathBuf>,

    /// Overrides the home directory for `user_*` layers
    pub user_root: Option<PathBuf>,
}

impl Default for MemoryPolicy {
    fn default() -> Self {
        Self {
            enabled: true,
            read_layers: vec![Layer::ProjectAgent, Layer::ProjectGlobal],
            write_layers: vec![Layer::ProjectAgent],
            allow_user_global_write: false,
            retention_days: DEFAULT_RETENTION_DAYS,
            redaction_rules: DEFAULT_REDACTION_RULES.iter().map(|r| r.to_string()).collect(),
            project_root: None,
            user_root: None,
        }
    }
}

impl MemoryPolicy {
    /// Default policy rooted at a project directory
    pub fn for_project(project_root: impl Into<PathBuf>) -> Self {
        Self {
            project_root: Some(project_root.into()),
            ..Default::default()
        }
    }

    pub fn builder() -> PolicyBuilder {
        PolicyBuilder::default()
    }

    /// Use `user_root` instead of the home directory for `user_*` layers
    pub fn with_user_root(mut self, user_root: impl Into<PathBuf>) -> Self {
        self.user_root = Some(user_root.into());
        self
    }

    /// `<project_root>/.agents/memory`
    pub fn project_memory_root(&self) -> Option<PathBuf> {
        self.project_root
            .as_ref()
            .map(|root| root.join(".agents").join("memory"))
    }

    /// `<home>/.agents/memory`
    pub fn user_memory_root(&self) -> Result<PathBuf> {
        let home = match &self.user_root {
            Some(root) => root.clone(),
            None => dirs::home_dir()
                .ok_or_else(|| Error::config("could not determine the home directory"))?,
        };
        Ok(home.join(".agents").join("memory"))
    }

    pub fn is_writable(&self, layer: Layer) -> bool {
        self.enabled && self.write_layers.contains(&layer)
    }

    /// Check every invariant a policy must hold.
    pub fn validate(&self) -> Result<()> {
        if self.retention_days == 0 {
            return Err(Error::config("retention_days must be a positive integer"));
        }
        if self.read_layers.is_empty() {
            return Err(Error::config("read_layers must not be empty"));
        }
        if self.write_layers.is_empty() {
            return Err(Error::config("write_layers must not be empty"));
        }
        if !self.allow_user_global_write {
            let illegal: Vec<&str> = self
                .write_layers
                .iter()
                .filter(|layer| layer.is_user_scoped())
                .map(Layer::as_str)
                .collect();
            if !illegal.is_empty() {
                return Err(Error::config(format!(
                    "unsafe write configuration: {} require allow_user_global_write=true",
                    illegal.join(", ")
                )));
            }
        }
        Ok(())
    }
}

/// Builder for [`MemoryPolicy`]
#[derive(Debug, Default)]
pub struct PolicyBuilder {
    policy: MemoryPolicy,
}

impl PolicyBuilder {
    pub fn enabled(mut self, enabled: bool) -> Self {
        self.policy.enabled = enabled;
        self
    }

    pub fn read_layers(mut self, layers: impl IntoIterator<Item = Layer>) -> Self {
        self.policy.read_layers = layers.into_iter().collect();
        self
    }

    pub fn write_layers(mut self, layers: impl IntoIterator<Item = Layer>) -> Self {
        self.policy.write_layers = layers.into_iter().collect();
        self
    }

    pub fn allow_user_global_write(mut self, allow: bool) -> Self {
        self.policy.allow_user_global_write = allow;
        self
    }

    pub fn retention_days(mut self, days: u32) -> Self {
        self.policy.retention_days = days;
        self
    }

    pub fn redaction_rules<S: Into<String>>(mut self, rules: impl IntoIterator<Item = S>) -> Self {
        self.policy.redaction_rules = rules.into_iter().map(Into::into).collect();
        self
    }

    pub fn project_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.policy.project_root = Some(root.into());
        self
    }

    pub fn user_root(mut self, root: impl Into<PathBuf>) -> Self {
        self.policy.user_root = Some(root.into());
        self
    }

    pub fn build(self) -> Result<MemoryPolicy> {
        self.policy.validate()?;
        Ok(self.policy)
    }
}
