use std::path::PathBuf;

use thiserror::Error;

use crate::source::SourceError;

/// Error types for the kmeans-server library
#[derive(Error, Debug)]
pub enum KMeansError {
    /// The table source could not be reached or rejected the credentials
    #[error("Database connection failed: {0}")]
    Connection(#[source] SourceError),

    /// A query against the table source failed (unknown table, bad column, ...)
    #[error("{0}")]
    Source(#[from] SourceError),

    /// The table yielded zero distinct rows
    #[error("Table {0} is empty")]
    EmptySet(String),

    /// An aggregate query (min/max) returned no row
    #[error("No value found for the column {0}")]
    NoValue(String),

    /// The number of clusters is outside `1..=rows`
    #[error("Invalid k value: {k} (the table has {rows} distinct rows)")]
    OutOfRange { k: usize, rows: usize },

    /// Fewer value-distinct rows than requested centroids
    #[error(
        "Insufficient data: {k} centroids requested but only {distinct} distinct rows available"
    )]
    InsufficientDistinctRows { k: usize, distinct: usize },

    /// No clustering has been computed or loaded yet
    #[error("No cluster set has been computed yet")]
    NotFitted,

    /// The persisted model does not exist
    #[error("Model file not found: {}", path.display())]
    ModelNotFound { path: PathBuf },

    /// The persisted model could not be decoded
    #[error("Invalid model file {}: {reason}", path.display())]
    ModelFormat { path: PathBuf, reason: String },

    /// The persisted model does not fit the dataset it is loaded against
    #[error("Model does not match the table: {0}")]
    ModelMismatch(String),

    /// A client request is malformed or arrives in the wrong state
    #[error("Invalid request: {0}")]
    InvalidRequest(String),

    /// The clustering configuration is invalid
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),

    /// The server configuration could not be read
    #[error("Configuration error: {0}")]
    Config(String),

    #[error(transparent)]
    Io(#[from] std::io::Error),
}

impl From<config::ConfigError> for KMeansError {
    fn from(err: config::ConfigError) -> Self {
        KMeansError::Config(err.to_string())
    }
}

/// Result alias used throughout the crate
pub type Result<T> = std::result::Result<T, KMeansError>;
