//! # RLM Memory
//!
//! A durable, access-controlled memory store for AI agents.
//!
//! ## Architecture
//!
//! Records live in four append-only JSONL logs ("layers"):
//! - **project_agent** - private to one agent in one project
//! - **project_global** - shared by every agent in the project
//! - **user_agent** - private to one agent across the user's projects
//! - **user_global** - shared by every agent across the user's projects
//!
//! A [`MemoryPolicy`] decides which layers are read (and in which precedence
//! order) and which may be written. Writes to shared layers are redacted, and
//! every append is serialized per layer by a sentinel-file lock so that many
//! threads and processes can write to the same log safely.
//!
//! Records are never updated in place. A newer version of a record is a new
//! line with the same `id`; reads return the newest version first.
//!
//! ## Usage
//!
//! ```rust,no_run
//! use rlm_memory::{Layer, MemoryPolicy, MemoryRecord, MemoryStore};
//!
//! # fn main() -> rlm_memory::Result<()> {
//! let policy = MemoryPolicy::builder()
//!     .project_root(".")
//!     .write_layers([Layer::ProjectAgent, Layer::ProjectGlobal])
//!     .build()?;
//! let store = MemoryStore::new(policy, "planner")?;
//!
//! let record = MemoryRecord::generate("fact", "CI runs on every push", "my-project");
//! let id = store.append_record(Layer::ProjectGlobal, &record)?;
//!
//! let records = store.read_all()?;
//! let current = rlm_memory::retrieval::current(&records, &id);
//! # Ok(())
//! # }
//! ```

pub mod config;
pub mod error;
pub mod layer;
pub mod lock;
pub mod migration;
pub mod policy;
pub mod record;
pub mod retrieval;
pub mod safety;
pub mod schema;
pub mod store;

pub use config::load_policy;
pub use error::{Error, Result};
pub use layer::{resolve_layer_paths, Layer, LayerPaths};
pub use policy::{MemoryPolicy, PolicyBuilder};
pub use record::{MemoryRecord, SourcedRecord};
pub use retrieval::{build_retrieval_plan, PlanEntry};
pub use schema::{normalize_record, validate_record, SchemaWarning, WarningCode};
pub use store::{MemoryStore, ReadOutcome, StoreOptions};
