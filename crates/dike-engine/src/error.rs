//! Error types for the Dike engine.

use std::path::PathBuf;

use thiserror::Error;

/// Result type alias for engine operations.
pub type Result<T> = std::result::Result<T, EngineError>;

/// Errors that can occur while loading documents or running a query.
#[derive(Error, Debug)]
pub enum EngineError {
    /// Failed to read a module, data, or input file.
    #[error("Failed to read {path}: {source}")]
    FileReadError {
        /// Path to the file.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },

    /// Surface syntax failed to lex or group.
    #[error("Parse error in {source_name} at {location}: {message}")]
    ParseError {
        /// Name of the source being parsed.
        source_name: String,
        /// Location description of the error.
        location: String,
        /// Error message.
        message: String,
    },

    /// A JSON document failed to parse.
    #[error("Invalid JSON in {source_name}: {source}")]
    JsonError {
        /// Name of the source being parsed.
        source_name: String,
        /// Underlying JSON error.
        #[source]
        source: serde_json::Error,
    },

    /// A pass produced a tree that violates its well-formedness schema, or
    /// left embedded error nodes behind.
    #[error("Failed at pass {pass}:\n{details}")]
    PassError {
        /// Name of the failing pass.
        pass: String,
        /// Violation and error-node details.
        details: String,
    },

    /// The input document was set twice.
    #[error("Input already set")]
    InputAlreadySet,

    /// Failure writing a debug dump.
    #[error("Failed to write debug output to {path}: {source}")]
    DebugWriteError {
        /// Path being written.
        path: PathBuf,
        /// Underlying I/O error.
        #[source]
        source: std::io::Error,
    },
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_parse_error_display() {
        let err = EngineError::ParseError {
            source_name: "policy.rego".to_string(),
            location: "policy.rego:3:1".to_string(),
            message: "unexpected token".to_string(),
        };
        assert_eq!(
            err.to_string(),
            "Parse error in policy.rego at policy.rego:3:1: unexpected token"
        );
    }

    #[test]
    fn test_input_already_set_display() {
        assert_eq!(EngineError::InputAlreadySet.to_string(), "Input already set");
    }

    #[test]
    fn test_pass_error_display() {
        let err = EngineError::PassError {
            pass: "symbols".to_string(),
            details: "Module: expected Var".to_string(),
        };
        assert!(err.to_string().contains("Failed at pass symbols"));
    }
}
