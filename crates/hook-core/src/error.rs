use hook_types::{EntityType, RecordId};
use thiserror::Error;

/// Errors raised by the bus, the entity registry and the record stores.
#[derive(Error, Debug)]
pub enum CoreError {
    #[error("Entity type not registered: {0}")]
    UnknownEntity(EntityType),

    #[error("Record not found: {entity} #{id}")]
    RecordNotFound { entity: EntityType, id: RecordId },

    #[error("Record of {actual} handed to the {expected} store")]
    EntityMismatch {
        expected: EntityType,
        actual: EntityType,
    },

    #[error("Lock poisoned: {0}")]
    Poisoned(String),

    #[error("Serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

/// Result 类型别名
pub type Result<T> = std::result::Result<T, CoreError>;

impl<T> From<std::sync::PoisonError<T>> for CoreError {
    fn from(err: std::sync::PoisonError<T>) -> Self {
        CoreError::Poisoned(err.to_string())
    }
}
