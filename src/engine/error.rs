use thiserror::Error;

use crate::availability::ResourceId;
use crate::model::{Ms, TimeSlot};

/// Hard failures. Refused transitions and lost version races are plain
/// `false` results, never errors.
#[derive(Debug, Error)]
pub enum EngineError {
    #[error("segment {segment} of resource {resource_id} is already declared")]
    DuplicateSegment {
        resource_id: ResourceId,
        segment: TimeSlot,
    },

    #[error("invalid segment unit: {0}")]
    InvalidSegment(String),

    #[error("invalid time slot: from {from} is after to {to}")]
    InvalidSlot { from: Ms, to: Ms },

    #[error("a group may only hold segments of one resource, found {0} and {1}")]
    MixedGroup(ResourceId, ResourceId),

    #[error("journal error: {0}")]
    Journal(String),

    #[error("configuration error: {0}")]
    Config(String),
}

impl From<std::io::Error> for EngineError {
    fn from(e: std::io::Error) -> Self {
        EngineError::Journal(e.to_string())
    }
}
