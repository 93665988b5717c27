mod agent;
mod document;
mod project;
mod task;
mod tool;
mod version;

pub use agent::*;
pub use document::*;
pub use project::*;
pub use task::*;
pub use tool::*;
pub use version::*;

use thiserror::Error;
use uuid::Uuid;

pub type ProjectId = Uuid;
pub type DocumentId = Uuid;
pub type SectionId = Uuid;
pub type ImageId = Uuid;
pub type DiagramId = Uuid;
pub type TaskId = Uuid;
pub type VersionId = Uuid;

/// Rejected state-machine transition. Statuses are typed variants, so every
/// move between them goes through a method that can return this.
#[derive(Debug, Clone, PartialEq, Eq, Error)]
pub enum TransitionError {
    #[error("invalid {entity} transition: {from} -> {to}")]
    Invalid {
        entity: &'static str,
        from: &'static str,
        to: &'static str,
    },
    #[error("retry budget exhausted after {max_retries} attempts")]
    RetriesExhausted { max_retries: u32 },
}
