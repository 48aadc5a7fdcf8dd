//! Error types for qmill operations.

use thiserror::Error;

/// Result type used throughout qmill.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for qmill operations.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration is missing, unreadable, or invalid
    #[error("configuration error: {message}")]
    Config {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Configuration file could not be parsed
    #[error("invalid configuration file: {0}")]
    Yaml(#[from] serde_yaml::Error),

    /// Queue backend error with context
    #[error("queue error: {message}")]
    Queue {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// Redis command or connection error
    #[error("redis error: {0}")]
    Redis(#[from] redis::RedisError),

    /// Database pool or query error
    #[error("database error: {0}")]
    Database(#[from] sqlx::Error),

    /// Message payload could not be decoded
    #[error("message decode error: {0}")]
    Decode(#[from] serde_json::Error),

    /// I/O failure outside configuration loading
    #[error("i/o error: {0}")]
    Io(#[from] std::io::Error),

    /// Task processing failed
    #[error("task processing failed: {message}")]
    Processing {
        /// Error message
        message: String,
        /// Optional underlying error
        #[source]
        source: Option<Box<dyn std::error::Error + Send + Sync>>,
    },

    /// The worker pool is already running
    #[error("worker pool is already running")]
    AlreadyRunning,

    /// The worker pool is not running
    #[error("worker pool is not running")]
    NotRunning,

    /// More workers requested than the connection pool can serve
    #[error("requested {requested} workers but the connection pool holds at most {max}")]
    TooManyWorkers {
        /// Number of workers requested
        requested: usize,
        /// Connection pool capacity
        max: usize,
    },
}

impl Error {
    /// Create a configuration error.
    pub fn config(message: impl Into<String>) -> Self {
        Self::Config {
            message: message.into(),
            source: None,
        }
    }

    /// Create a configuration error with an underlying cause.
    pub fn config_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Config {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a queue error with an underlying cause.
    pub fn queue<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Queue {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }

    /// Create a task processing error.
    pub fn processing(message: impl Into<String>) -> Self {
        Self::Processing {
            message: message.into(),
            source: None,
        }
    }

    /// Create a task processing error with an underlying cause.
    pub fn processing_with<E>(message: impl Into<String>, source: E) -> Self
    where
        E: std::error::Error + Send + Sync + 'static,
    {
        Self::Processing {
            message: message.into(),
            source: Some(Box::new(source)),
        }
    }
}
