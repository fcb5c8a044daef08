use thiserror::Error;

pub type EngineResult<T> = Result<T, EngineError>;

#[derive(Debug, Error)]
pub enum EngineError {
    #[error("cannot transition {entity} from '{current}'; allowed next statuses: [{}]", allowed.join(", "))]
    InvalidTransition {
        entity: &'static str,
        current: String,
        allowed: Vec<&'static str>,
    },

    #[error("{0}")]
    Duplicate(String),

    #[error("{entity} not found")]
    NotFound { entity: &'static str },

    #[error("{0}")]
    Forbidden(String),

    #[error("{0}")]
    Validation(String),

    #[error("notification delivery failed: {0}")]
    Delivery(#[source] anyhow::Error),

    #[error("database error: {0}")]
    Database(#[from] diesel::result::Error),

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),
}

impl EngineError {
    pub fn invalid_transition(
        entity: &'static str,
        current: &str,
        allowed: Vec<&'static str>,
    ) -> Self {
        Self::InvalidTransition {
            entity,
            current: current.to_string(),
            allowed,
        }
    }

    /// Benign in sweep contexts, a conflict in interactive ones; the caller
    /// decides which by matching on the variant.
    pub fn is_duplicate(&self) -> bool {
        matches!(self, Self::Duplicate(_))
    }
}

pub fn is_unique_violation(err: &diesel::result::Error) -> bool {
    matches!(
        err,
        diesel::result::Error::DatabaseError(
            diesel::result::DatabaseErrorKind::UniqueViolation,
            _,
        )
    )
}
