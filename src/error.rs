use thiserror::Error;

#[derive(Error, Debug)]
pub enum QolError {
    #[error("HTTP client error: {0}")]
    Http(#[from] reqwest::Error),

    #[error("JSON deserialization failed: {0}")]
    Json(#[from] serde_json::Error),

    #[error("TOML deserialization failed: {0}")]
    Toml(#[from] toml::de::Error),

    #[error("CSV error: {0}")]
    Csv(#[from] csv::Error),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Missing required field: {0}")]
    MissingField(String),

    /// A required source failed at the network level or reported failure.
    #[error("Source '{origin}' unavailable: {message}")]
    SourceUnavailable { origin: String, message: String },

    /// An optional source file is absent; callers downgrade instead of aborting.
    #[error("Optional source not found at {path}")]
    MissingOptionalSource { path: String },

    #[error("Cannot normalize '{metric}' over {population}: standard deviation is zero")]
    DegenerateNormalization { metric: String, population: String },

    #[error("Unknown state identifier: {0}")]
    UnknownState(String),

    /// (state, year) must be unique within every input table
    #[error("Duplicate key {key} in {table}")]
    DuplicateKey { table: String, key: String },

    #[error("Insufficient data: {0}")]
    InsufficientData(String),

    #[error("Model error: {0}")]
    Model(String),
}

impl QolError {
    pub fn source_unavailable(origin: &str, message: impl Into<String>) -> Self {
        QolError::SourceUnavailable {
            origin: origin.to_string(),
            message: message.into(),
        }
    }
}

pub type Result<T> = std::result::Result<T, QolError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = QolError::source_unavailable("bls_cpi", "status 503");
        assert_eq!(err.to_string(), "Source 'bls_cpi' unavailable: status 503");

        let err = QolError::DegenerateNormalization {
            metric: "real_income".to_string(),
            population: "year 2024".to_string(),
        };
        assert!(err.to_string().contains("standard deviation is zero"));
    }

    #[test]
    fn test_error_is_send_sync() {
        fn assert_send<T: Send>() {}
        fn assert_sync<T: Sync>() {}
        assert_send::<QolError>();
        assert_sync::<QolError>();
    }
}
