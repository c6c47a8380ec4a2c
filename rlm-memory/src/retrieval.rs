//! Retrieval planning and precedence lookups
//!
//! The plan is the ordered list of layers a read walks. Its order is the
//! precedence contract: records from earlier layers out-rank later ones, and
//! within a layer newer records come first. "Current value of id X" is
//! therefore the first record with that id.

use std::collections::HashSet;
use std::path::PathBuf;

use serde::Serialize;

use crate::error::Result;
use crate::layer::{resolve_layer_paths, Layer};
use crate::policy::MemoryPolicy;
use crate::record::SourcedRecord;

/// One layer to read, in precedence order
#[derive(Debug, Clone, PartialEq, Eq, Serialize)]
pub struct PlanEntry {
    pub layer: Layer,
    pub path: PathBuf,
}

/// Build the read plan for `agent_id` from `policy.read_layers`.
pub fn build_retrieval_plan(policy: &MemoryPolicy, agent_id: &str) -> Result<Vec<PlanEntry>> {
    let paths = resolve_layer_paths(policy, agent_id)?;
    Ok(policy
        .read_layers
        .iter()
        .map(|&layer| PlanEntry {
            layer,
            path: paths.get(layer).to_path_buf(),
        })
        .collect())
}

/// The winning version of `id`
pub fn current<'a>(records: &'a [SourcedRecord], id: &str) -> Option<&'a SourcedRecord> {
    records.iter().find(|record| record.id == id)
}

/// Every version of `id`, winner first
pub fn history<'a>(records: &'a [SourcedRecord], id: &str) -> Vec<&'a SourcedRecord> {
    records.iter().filter(|record| record.id == id).collect()
}

/// The winning version of every id, in precedence order
pub fn latest_per_id(records: &[SourcedRecord]) -> Vec<&SourcedRecord> {
    let mut seen = HashSet::new();
    records
        .iter()
        .filter(|sourced| seen.insert(sourced.record.id.as_str()))
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::record::MemoryRecord;

    fn sourced(id: &str, content: &str, layer: Layer) -> SourcedRecord {
        SourcedRecord {
            record: MemoryRecord::new(id, "fact", content, "rlm-mem").with_scope(layer),
            source_layer: layer,
            source_path: PathBuf::from(format!("/{}/memory.jsonl", layer)),
        }
    }

    #[test]
    fn plan_follows_read_layer_order() {
        let policy = MemoryPolicy::builder()
            .project_root("/work/app")
            .user_root("/home/me")
            .read_layers([Layer::UserGlobal, Layer::ProjectGlobal, Layer::ProjectAgent])
            .build()
            .unwrap();

        let plan = build_retrieval_plan(&policy, "agent-1").unwrap();
        let layers: Vec<Layer> = plan.iter().map(|entry| entry.layer).collect();
        assert_eq!(
            layers,
            vec![Layer::UserGlobal, Layer::ProjectGlobal, Layer::ProjectAgent]
        );
        assert_eq!(
            plan[0].path,
            PathBuf::from("/home/me/.agents/memory/global/memory.jsonl")
        );
        assert_eq!(
            plan[2].path,
            PathBuf::from("/work/app/.agents/memory/agents/agent-1/memory.jsonl")
        );
    }

    #[test]
    fn default_plan_reads_agent_layer_first() {
        let policy = MemoryPolicy::for_project("/work/app").with_user_root("/home/me");
        let plan = build_retrieval_plan(&policy, "agent-1").unwrap();
        assert_eq!(plan.len(), 2);
        assert_eq!(plan[0].layer, Layer::ProjectAgent);
        assert_eq!(plan[1].layer, Layer::ProjectGlobal);
    }

    #[test]
    fn plan_requires_an_agent() {
        let policy = MemoryPolicy::for_project("/work/app").with_user_root("/home/me");
        assert!(build_retrieval_plan(&policy, "").is_err());
    }

    #[test]
    fn current_is_first_match() {
        let records = vec![
            sourced("a", "agent view", Layer::ProjectAgent),
            sourced("b", "only global", Layer::ProjectGlobal),
            sourced("a", "global view", Layer::ProjectGlobal),
        ];

        assert_eq!(current(&records, "a").unwrap().content, "agent view");
        assert_eq!(current(&records, "b").unwrap().content, "only global");
        assert!(current(&records, "missing").is_none());
    }

    #[test]
    fn history_keeps_every_version_in_order() {
        let records = vec![
            sourced("a", "v3", Layer::ProjectAgent),
            sourced("a", "v2", Layer::ProjectAgent),
            sourced("b", "x", Layer::ProjectAgent),
            sourced("a", "v1", Layer::ProjectGlobal),
        ];
        let contents: Vec<&str> = history(&records, "a")
            .iter()
            .map(|record| record.content.as_str())
            .collect();
        assert_eq!(contents, vec!["v3", "v2", "v1"]);
    }

    #[test]
    fn latest_per_id_deduplicates() {
        let records = vec![
            sourced("a", "new", Layer::ProjectAgent),
            sourced("b", "only", Layer::ProjectAgent),
            sourced("a", "old", Layer::ProjectGlobal),
        ];
        let latest: Vec<(&str, &str)> = latest_per_id(&records)
            .iter()
            .map(|record| (record.id.as_str(), record.content.as_str()))
            .collect();
        assert_eq!(latest, vec![("a", "new"), ("b", "only")]);
    }
}
