//! Registry errors. Storage failures carry the underlying redb or serde
//! message as text so callers need not depend on either crate.

use thiserror::Error;

use crate::types::{RequestId, ResourceKind};

pub type StateResult<T> = Result<T, StateError>;

#[derive(Debug, Error)]
pub enum StateError {
    #[error("failed to open registry: {0}")]
    Open(String),

    #[error("registry transaction failed: {0}")]
    Transaction(String),

    #[error("registry table unavailable: {0}")]
    Table(String),

    #[error("registry read failed: {0}")]
    Read(String),

    #[error("registry write failed: {0}")]
    Write(String),

    #[error("failed to encode record: {0}")]
    Serialize(String),

    #[error("failed to decode record: {0}")]
    Deserialize(String),

    /// The request to be assigned has no record.
    #[error("no {kind} record with id {id}")]
    NotFound { kind: ResourceKind, id: RequestId },
}
