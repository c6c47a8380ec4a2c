//! Write-time safety: layer authorization and redaction
//!
//! Records that cross the single-agent boundary (`project_global`,
//! `user_global`) have keyword/value secrets scrubbed before they hit disk.
//! A rule `api_key` turns `api_key: sk-123`, `API_KEY=sk-123` and
//! `api_key sk-123` into `api_key: [REDACTED]` and so on. The value is the run
//! of characters up to the next whitespace, comma or semicolon.

use regex::Regex;

use crate::error::{Error, Result};
use crate::layer::Layer;
use crate::policy::MemoryPolicy;

/// Rules applied when a policy supplies none
pub const DEFAULT_REDACTION_RULES: [&str; 5] =
    ["api_key", "token", "password", "secret", "private_key"];

/// Replacement for every redacted value
pub const REDACTION_MARKER: &str = "[REDACTED]";

const VALUE_PATTERN: &str = r"([^\s,;]+)";

/// Whether `policy` permits writing to `layer` at all.
///
/// User-scoped layers need the explicit opt-in regardless of `write_layers`.
pub fn authorize_write(layer: Layer, policy: &MemoryPolicy) -> bool {
    !(layer.is_user_scoped() && !policy.allow_user_global_write)
}

/// Records are only visible inside the project that wrote them.
pub fn is_record_visible_to_project(record_project_id: &str, active_project_id: &str) -> bool {
    record_project_id == active_project_id
}

/// Compiled redaction rules
#[derive(Debug, Clone)]
pub struct Redactor {
    patterns: Vec<Regex>,
}

impl Redactor {
    /// Compile `rules`. An empty rule list means [`DEFAULT_REDACTION_RULES`],
    /// never "redact nothing".
    pub fn new<S: AsRef<str>>(rules: &[S]) -> Result<Self> {
        let rules: Vec<&str> = if rules.is_empty() {
            DEFAULT_REDACTION_RULES.to_vec()
        } else {
            rules.iter().map(|rule| rule.as_ref()).collect()
        };

        let mut patterns = Vec::with_capacity(rules.len() * 2);
        for rule in rules {
            let escaped = regex::escape(rule);
            // Separator form first, then bare whitespace.
            for prefix in [format!(r"({escaped}\s*[:=]\s*)"), format!(r"({escaped}\s+)")] {
                let pattern = Regex::new(&format!("(?i){prefix}{VALUE_PATTERN}")).map_err(|e| {
                    Error::config(format!("invalid redaction rule '{}': {}", rule, e))
                })?;
                patterns.push(pattern);
            }
        }

        Ok(Self { patterns })
    }

    pub fn redact(&self, text: &str) -> String {
        let replacement = format!("${{1}}{REDACTION_MARKER}");
        self.patterns
            .iter()
            .fold(text.to_string(), |acc, pattern| {
                pattern.replace_all(&acc, replacement.as_str()).into_owned()
            })
    }
}

impl Default for Redactor {
    fn default() -> Self {
        let empty: [&str; 0] = [];
        // Escaped keywords always compile.
        Self::new(&empty).unwrap_or(Self { patterns: Vec::new() })
    }
}

/// Redact `text` with `rules` (or the defaults when `rules` is empty)
pub fn redact<S: AsRef<str>>(text: &str, rules: &[S]) -> Result<String> {
    Ok(Redactor::new(rules)?.redact(text))
}
