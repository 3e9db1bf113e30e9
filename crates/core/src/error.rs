//! Error types for the tick simulator.

use thiserror::Error;

/// Result type alias using our Error type.
pub type Result<T> = std::result::Result<T, Error>;

/// Main error type for the tick simulator.
#[derive(Error, Debug)]
pub enum Error {
    /// Configuration error.
    #[error("Configuration error: {0}")]
    Config(String),

    /// Data error (invalid or missing data).
    #[error("Data error: {0}")]
    Data(String),

    /// Offset code that is neither open nor close.
    #[error("Invalid offset: {0}")]
    InvalidOffset(String),

    /// Direction code that is neither long nor short.
    #[error("Invalid direction: {0}")]
    InvalidDirection(String),

    /// Unknown execution flag.
    #[error("Invalid order flag: {0}")]
    InvalidFlag(String),

    /// I/O error.
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// CSV error.
    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    /// JSON serialization/deserialization error.
    #[error("JSON error: {0}")]
    Json(#[from] serde_json::Error),
}

impl Error {
    /// Create a configuration error.
    pub fn config(msg: impl Into<String>) -> Self {
        Error::Config(msg.into())
    }

    /// Create a data error.
    pub fn data(msg: impl Into<String>) -> Self {
        Error::Data(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = Error::config("missing initial_capital");
        assert_eq!(err.to_string(), "Configuration error: missing initial_capital");

        let err = Error::data("SHFE.rb2305: multiplier must be positive");
        assert_eq!(err.to_string(), "Data error: SHFE.rb2305: multiplier must be positive");
    }

    #[test]
    fn test_io_conversion() {
        let io = std::io::Error::new(std::io::ErrorKind::NotFound, "gone");
        let err: Error = io.into();
        assert!(matches!(err, Error::Io(_)));
    }
}
