use thiserror::Error;

#[derive(Error, Debug)]
pub enum GridStatsError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Backend error: {0}")]
    Backend(String),

    #[error("Data anomaly: {0}")]
    DataAnomaly(String),

    #[error("Schema conflict for property '{name}': probed {probed}, computed {computed}")]
    SchemaConflict {
        name: String,
        probed: String,
        computed: String,
    },

    #[error(transparent)]
    Anyhow(#[from] anyhow::Error),
}

impl GridStatsError {
    /// Wrap a backend/driver error. Used at the store boundary so the
    /// core crates never depend on the database driver directly.
    pub fn backend(err: impl std::fmt::Display) -> Self {
        GridStatsError::Backend(err.to_string())
    }
}

pub type Result<T> = std::result::Result<T, GridStatsError>;
