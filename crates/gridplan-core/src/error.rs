//! Error types for case construction and configuration
//!
//! [`CaseError`] covers everything that can go wrong before model assembly
//! starts: reading configuration files, parsing TOML, and validating the
//! in-memory case handed over by the case loader. Assembly and solve errors
//! live in `gridplan-algo`, which wraps this type.
//!
//! # Example
//!
//! ```ignore
//! use gridplan_core::{CaseError, CaseResult};
//!
//! fn prepare(path: &str) -> CaseResult<()> {
//!     let config = load_config(path)?;
//!     config.model.validate()?;
//!     Ok(())
//! }
//! ```

use thiserror::Error;

/// Error type for configuration loading and case validation.
#[derive(Error, Debug)]
pub enum CaseError {
    /// I/O errors (reading configuration files)
    #[error("I/O error: {0}")]
    Io(#[from] std::io::Error),

    /// TOML parsing/deserialization errors
    #[error("Parse error: {0}")]
    Parse(String),

    /// Data validation errors (time domain, topology, settings)
    #[error("Validation error: {0}")]
    Validation(String),
}

/// Convenience type alias for Results using CaseError.
pub type CaseResult<T> = Result<T, CaseError>;

impl From<toml::de::Error> for CaseError {
    fn from(err: toml::de::Error) -> Self {
        CaseError::Parse(err.to_string())
    }
}

impl CaseError {
    pub(crate) fn validation(msg: impl Into<String>) -> Self {
        CaseError::Validation(msg.into())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = CaseError::Validation("empty time domain".into());
        assert!(err.to_string().contains("Validation error"));
        assert!(err.to_string().contains("empty time domain"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let case_err: CaseError = io_err.into();
        assert!(matches!(case_err, CaseError::Io(_)));
    }

    #[test]
    fn test_toml_error_conversion() {
        let parse_err = toml::from_str::<toml::Value>("not = [valid").unwrap_err();
        let case_err: CaseError = parse_err.into();
        assert!(matches!(case_err, CaseError::Parse(_)));
    }
}
