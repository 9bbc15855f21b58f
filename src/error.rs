// ⚠️ Typed errors for client-facing surfaces
//
// The ingest pipeline and importer propagate `anyhow::Error` with context.
// Query and config errors are typed so callers can tell client-input
// mistakes apart from storage failures.

use thiserror::Error;

/// Rejected drill-down request. Nothing in storage is touched when one of
/// the client-input variants is returned.
#[derive(Debug, Error)]
pub enum QueryError {
    #[error("at least one fiscal year is required")]
    MissingYears,

    #[error("unsupported group: {0}")]
    UnsupportedGroup(String),

    #[error("unknown dimension: {0}")]
    UnknownDimension(String),

    #[error("{dimension} id {id} does not exist")]
    InvalidId { dimension: &'static str, id: i64 },

    #[error("invalid {field}: {value}")]
    InvalidParameter { field: String, value: String },

    #[error("category level must be between 1 and {max}, got {level}")]
    InvalidCategoryLevel { level: i64, max: usize },

    #[error("storage error: {0}")]
    Storage(#[from] rusqlite::Error),
}

impl QueryError {
    /// True when the caller sent a bad request (as opposed to a storage failure).
    pub fn is_client_error(&self) -> bool {
        !matches!(self, QueryError::Storage(_))
    }
}

#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("config parse error: {0}")]
    Parse(#[from] toml::de::Error),

    #[error("config validation error: {0}")]
    Validation(String),

    #[error("rename table cycle at '{0}'")]
    RenameCycle(String),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}
