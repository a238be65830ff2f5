use thiserror::Error;

/// Top-level error type for the apteka workspace.
///
/// Subsystem crates define their own error types and implement
/// `From<AptekaError>` so that the `?` operator works across crate boundaries.
#[derive(Debug, Error)]
#[non_exhaustive]
pub enum AptekaError {
    #[error("Configuration error: {0}")]
    Config(String),

    #[error("Storage error: {0}")]
    Storage(String),

    #[error("Index error: {0}")]
    Index(String),

    #[error("Embedding error: {0}")]
    Embedding(String),

    #[error("Invalid input: {0}")]
    InvalidInput(String),

    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    #[error("Serialization error: {0}")]
    Serialization(String),
}

impl From<toml::de::Error> for AptekaError {
    fn from(err: toml::de::Error) -> Self {
        AptekaError::Config(err.to_string())
    }
}

impl From<toml::ser::Error> for AptekaError {
    fn from(err: toml::ser::Error) -> Self {
        AptekaError::Config(err.to_string())
    }
}

impl From<serde_json::Error> for AptekaError {
    fn from(err: serde_json::Error) -> Self {
        AptekaError::Serialization(err.to_string())
    }
}

/// A specialized `Result` type for apteka operations.
pub type Result<T> = std::result::Result<T, AptekaError>;

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display_all_variants() {
        let cases: Vec<(AptekaError, &str)> = vec![
            (
                AptekaError::Config("bad key".to_string()),
                "Configuration error: bad key",
            ),
            (
                AptekaError::Storage("disk full".to_string()),
                "Storage error: disk full",
            ),
            (
                AptekaError::Index("collection missing".to_string()),
                "Index error: collection missing",
            ),
            (
                AptekaError::Embedding("quota".to_string()),
                "Embedding error: quota",
            ),
            (
                AptekaError::InvalidInput("latitude".to_string()),
                "Invalid input: latitude",
            ),
            (
                AptekaError::Serialization("invalid json".to_string()),
                "Serialization error: invalid json",
            ),
        ];

        for (error, expected) in cases {
            assert_eq!(error.to_string(), expected);
        }
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let err: AptekaError = io_err.into();
        assert!(matches!(err, AptekaError::Io(_)));
        assert!(err.to_string().starts_with("I/O error:"));
    }

    #[test]
    fn test_error_from_toml_de() {
        let err: std::result::Result<toml::Value, _> = toml::from_str("invalid = [[[");
        let apteka_err: AptekaError = err.unwrap_err().into();
        assert!(matches!(apteka_err, AptekaError::Config(_)));
    }

    #[test]
    fn test_error_from_serde_json() {
        let err: std::result::Result<serde_json::Value, _> = serde_json::from_str("{ nope }");
        let apteka_err: AptekaError = err.unwrap_err().into();
        assert!(matches!(apteka_err, AptekaError::Serialization(_)));
    }

    #[test]
    fn test_result_type_with_question_mark() {
        fn inner() -> Result<String> {
            let io_result: std::result::Result<i32, std::io::Error> = Ok(42);
            let value = io_result?;
            Ok(value.to_string())
        }

        assert_eq!(inner().unwrap(), "42");
    }
}
