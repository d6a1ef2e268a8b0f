use chrono::{DateTime, Utc};
use thiserror::Error;

/// Error taxonomy shared by the resolver, aggregator, evaluator and report
/// generator.
///
/// Store implementations return `anyhow::Result`; a `CoreError` raised inside
/// a store travels through `anyhow` and is recovered by the `From` impl below,
/// so callers can still match on the typed variant.
#[derive(Debug, Error)]
pub enum CoreError {
    #[error("invalid range: end {end} must be after start {start}")]
    InvalidRange {
        start: DateTime<Utc>,
        end: DateTime<Utc>,
    },

    #[error("unsupported granularity: {0}")]
    UnsupportedGranularity(String),

    #[error("validation error: {0}")]
    Validation(String),

    #[error("{entity} not found: {id}")]
    NotFound { entity: &'static str, id: String },

    #[error("invalid report config: {0}")]
    InvalidReportConfig(String),

    #[error("unknown field: {0}")]
    UnknownField(String),

    #[error("formula syntax error: {0}")]
    FormulaSyntax(String),

    #[error("concurrent update of report {report_id}")]
    ConcurrencyConflict { report_id: String },

    #[error("serialization error: {0}")]
    Serialization(#[from] serde_json::Error),

    #[error("storage error: {0}")]
    Storage(anyhow::Error),
}

impl CoreError {
    pub fn not_found(entity: &'static str, id: impl Into<String>) -> Self {
        Self::NotFound {
            entity,
            id: id.into(),
        }
    }

    /// Malformed input rejected before any write.
    pub fn is_validation(&self) -> bool {
        matches!(
            self,
            Self::InvalidRange { .. } | Self::UnsupportedGranularity(_) | Self::Validation(_)
        )
    }
}

impl From<anyhow::Error> for CoreError {
    fn from(err: anyhow::Error) -> Self {
        match err.downcast::<CoreError>() {
            Ok(core) => core,
            Err(other) => CoreError::Storage(other),
        }
    }
}

pub type CoreResult<T> = std::result::Result<T, CoreError>;
