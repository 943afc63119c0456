//! Custom error types for sensorhub

use thiserror::Error;

/// Main error type for sensorhub operations
#[derive(Error, Debug)]
pub enum Error {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Database error: {0}")]
    Database(#[from] sqlx::Error),

    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML parse error: {0}")]
    TomlParse(#[from] toml::de::Error),

    #[error("TOML serialize error: {0}")]
    TomlSerialize(#[from] toml::ser::Error),

    #[error("Template not found: {0}")]
    TemplateNotFound(String),

    #[error("Invalid template: {0}")]
    TemplateInvalid(String),

    #[error("Table '{table}' not found in store for template '{template}'")]
    TableNotFound { template: String, table: String },

    #[error("Storage unavailable: {0}")]
    StorageUnavailable(String),

    #[error("Insert into '{table}' failed: {reason}")]
    InsertFailed { table: String, reason: String },

    #[error("Schema conflict on table '{table}': {reason}")]
    SchemaConflict { table: String, reason: String },

    #[error("Unsupported storage driver: {0}")]
    UnsupportedDriver(String),

    #[error("Not initialized: run 'sensorhub init' first")]
    NotInitialized,

    #[error("Already initialized at {0}")]
    AlreadyInitialized(String),

    #[error("{0}")]
    Other(String),
}

impl Error {
    /// Errors the read side reports as "not found" rather than as a failure
    pub fn is_not_found(&self) -> bool {
        matches!(
            self,
            Error::TemplateNotFound(_) | Error::TableNotFound { .. }
        )
    }
}

/// Result type alias for sensorhub
pub type Result<T> = std::result::Result<T, Error>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_not_found_classification() {
        assert!(Error::TemplateNotFound("weather".to_string()).is_not_found());
        assert!(Error::TableNotFound {
            template: "weather".to_string(),
            table: "outdoor".to_string(),
        }
        .is_not_found());
        assert!(!Error::StorageUnavailable("disk gone".to_string()).is_not_found());
    }
}
