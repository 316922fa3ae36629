//! Error types for lnfuse
//!
//! A missed pattern is never an error; these variants cover the cases that
//! abort a pass invocation.

use thiserror::Error;

/// Main error type for ONNX transformation operations
#[derive(Error, Debug)]
pub enum TransformError {
    /// A pass hit an unrecoverable condition at a specific node
    #[error("{pass} failed at node '{node}': {reason}")]
    PassFailed {
        /// Pass name
        pass: &'static str,
        /// Node being processed
        node: String,
        /// What went wrong
        reason: String,
    },

    /// Invalid model
    #[error("Invalid model: {0}")]
    InvalidModel(String),

    /// Missing required field
    #[error("Missing required field: {0}")]
    MissingField(String),

    /// IO error
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Protobuf decode error
    #[error("Protobuf decode error: {0}")]
    ProtoDecode(#[from] prost::DecodeError),

    /// Protobuf encode error
    #[error("Protobuf encode error: {0}")]
    ProtoEncode(#[from] prost::EncodeError),

    /// Graph bookkeeping is inconsistent
    #[error("Internal error: {0}")]
    Internal(String),
}

impl TransformError {
    /// Wrap an error with the pass and node it occurred at
    ///
    /// Errors that already carry a location are returned unchanged so a
    /// failure deep inside a nested graph keeps its original attribution.
    pub fn at_node(self, pass: &'static str, node: &str) -> Self {
        match self {
            err @ TransformError::PassFailed { .. } => err,
            other => TransformError::PassFailed {
                pass,
                node: node.to_string(),
                reason: other.to_string(),
            },
        }
    }
}

/// Result type alias for ONNX operations
pub type OnnxResult<T> = Result<T, TransformError>;
