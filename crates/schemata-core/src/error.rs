use thiserror::Error;

/// Top-level error type for configuration and catalog handling.
///
/// The action engine defines its own `ActionError`; this type covers the
/// parts of the system that run before any action is invoked (loading
/// configuration files and action definitions).
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum SchemataError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Catalog error: {0}")]
    Catalog(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for SchemataError {
    fn from(err: toml::de::Error) -> Self {
        SchemataError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for SchemataError {
    fn from(err: toml::ser::Error) -> Self {
        SchemataError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for SchemataError {
    fn from(err: serde_json::Error) -> Self {
        SchemataError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for configuration and catalog operations.
pub type Result<T> = std::result::Result<T, SchemataError>;
