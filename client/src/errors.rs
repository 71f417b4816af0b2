use thiserror::Error;

use crate::transport::TransportError;

/// Errors that can occur in the client.
#[derive(Error, Debug)]
pub enum ClientError {
    /// IO error occurred (chunk files, manifests, weights)
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Serialization/deserialization error
    #[error("Serialization error: {0}")]
    Serialization(String),

    /// Configuration error (invalid config, missing fields, etc.)
    #[error("Configuration error: {0}")]
    Config(String),

    /// Float weights file could not be read or written
    #[error("Weights error: {0}")]
    Weights(String),

    /// Quantization width other than 8, 16 or 32
    #[error("Unsupported bit width: {0} (expected 8, 16 or 32)")]
    UnsupportedBitWidth(u32),

    /// Non-positive maximum chunk size
    #[error("Invalid chunk size: {0} (must be positive)")]
    InvalidChunkSize(i64),

    /// Tensor name not part of the architecture schema
    #[error("Unknown tensor: {0}")]
    UnknownTensor(String),

    /// Tensor present in the schema but with the wrong shape or missing
    #[error("Schema violation for tensor {tensor}: {reason}")]
    SchemaViolation { tensor: String, reason: String },

    /// Registry manifest is internally inconsistent
    #[error("Registry invariant violated: {0}")]
    RegistryInvariant(String),

    /// On-ledger registry disagrees with the manifest
    #[error("Registry mismatch for {registry}: {reason}")]
    RegistryMismatch { registry: String, reason: String },

    /// Registry record could not be created on the ledger
    #[error("Failed to publish registry for {model_id}: {source}")]
    Publish {
        model_id: String,
        #[source]
        source: TransportError,
    },

    /// Signer is not the authority of the target registry or chat
    #[error("Invalid authority: {account} is owned by {expected}, signer is {found}")]
    AuthorityMismatch {
        account: String,
        expected: String,
        found: String,
    },

    /// Strict load found absent chunks
    #[error("Incomplete model: missing chunks {missing:?}")]
    IncompleteModel { missing: Vec<u32> },

    /// Reconstructed tensor does not match its declared shape
    #[error("Shape mismatch for tensor {tensor}: expected {expected} elements, found {found}")]
    ShapeMismatch {
        tensor: String,
        expected: usize,
        found: usize,
    },

    /// Chat input exceeds the on-ledger history capacity
    #[error("Input too long: {len} bytes exceeds capacity of {capacity}")]
    InputTooLong { len: usize, capacity: usize },

    /// Inference could not run (missing weights, bad dimensions)
    #[error("Inference error: {0}")]
    Inference(String),

    /// Ledger-side failure outside a chunk transfer
    #[error("Ledger error: {0}")]
    Ledger(#[from] ledger::LedgerError),
}

/// Result type alias for client operations.
pub type Result<T> = std::result::Result<T, ClientError>;

impl From<toml::ser::Error> for ClientError {
    fn from(e: toml::ser::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for ClientError {
    fn from(e: toml::de::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

impl From<serde_json::Error> for ClientError {
    fn from(e: serde_json::Error) -> Self {
        ClientError::Serialization(e.to_string())
    }
}

impl From<safetensors::SafeTensorError> for ClientError {
    fn from(e: safetensors::SafeTensorError) -> Self {
        ClientError::Weights(e.to_string())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_error_display() {
        let err = ClientError::UnsupportedBitWidth(4);
        assert_eq!(
            err.to_string(),
            "Unsupported bit width: 4 (expected 8, 16 or 32)"
        );
    }

    #[test]
    fn test_fatal_errors_name_the_entity() {
        let err = ClientError::ShapeMismatch {
            tensor: "layer_0.attention.weight".into(),
            expected: 8192,
            found: 8000,
        };
        assert!(err.to_string().contains("layer_0.attention.weight"));

        let err = ClientError::IncompleteModel { missing: vec![3, 7] };
        assert!(err.to_string().contains("[3, 7]"));
    }

    #[test]
    fn test_io_error_conversion() {
        let io_err = std::io::Error::new(std::io::ErrorKind::NotFound, "file not found");
        let client_err: ClientError = io_err.into();
        assert!(client_err.to_string().contains("IO error"));
    }

    #[test]
    fn test_result_type_alias() {
        fn returns_result() -> Result<i32> {
            Ok(42)
        }

        assert_eq!(returns_result().unwrap(), 42);
    }
}
