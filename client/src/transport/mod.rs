//! Chunk transport
//!
//! The uploader and loader only talk to storage through [`ChunkTransport`].
//! Implementations:
//!
//! | Transport            | put                          | get                      |
//! |----------------------|------------------------------|--------------------------|
//! | [`LedgerTransport`]  | signed `UploadChunk`         | decode chunk record      |
//! | [`DirectoryTransport`] | write `chunk_{i}.bin`      | read `chunk_{i}.bin`     |
//! | [`DryRunTransport`]  | derive address, store nothing | always absent           |

pub mod directory;
pub mod dry_run;
pub mod ledger;

use async_trait::async_trait;
use thiserror::Error;

use ::ledger::{Address, ChunkType, Hyperparams, LedgerError};

pub use self::ledger::LedgerTransport;
pub use directory::DirectoryTransport;
pub use dry_run::DryRunTransport;

/// Identifies one chunk of one registry
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub struct ChunkKey {
    pub registry: Address,
    pub index: u32,
}

impl ChunkKey {
    pub fn new(registry: Address, index: u32) -> Self {
        Self { registry, index }
    }
}

/// Transfer failures
#[derive(Error, Debug)]
pub enum TransportError {
    /// Signer does not own the target registry; never retried
    #[error("Invalid authority: {account} is owned by {expected}, signer is {found}")]
    AuthorityMismatch {
        account: Address,
        expected: Address,
        found: Address,
    },

    /// Transport has no signing identity but the operation needs one
    #[error("Transport has no signer")]
    NoSigner,

    /// Storage refused the write
    #[error("Rejected: {0}")]
    Rejected(String),

    /// Underlying ledger error
    #[error("Ledger error: {0}")]
    Ledger(LedgerError),

    /// IO error in a file-backed transport
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),
}

impl TransportError {
    /// Failures that will not go away on retry
    pub fn is_permanent(&self) -> bool {
        match self {
            TransportError::AuthorityMismatch { .. } | TransportError::NoSigner => true,
            TransportError::Ledger(e) => matches!(
                e,
                LedgerError::RecordTooLarge { .. }
                    | LedgerError::ChunkTypeConflict { .. }
                    | LedgerError::AlreadyInitialized(_)
                    | LedgerError::InvalidSignature(_)
                    | LedgerError::AccountNotFound(_)
            ),
            TransportError::Rejected(_) | TransportError::Io(_) => false,
        }
    }
}

impl From<LedgerError> for TransportError {
    fn from(e: LedgerError) -> Self {
        match e {
            LedgerError::AuthorityMismatch {
                account,
                expected,
                found,
            } => TransportError::AuthorityMismatch {
                account,
                expected,
                found,
            },
            other => TransportError::Ledger(other),
        }
    }
}

/// Storage for registries and chunks
#[async_trait]
pub trait ChunkTransport: Send + Sync {
    /// Create the registry record for `model_id`, or confirm it exists with
    /// the same hyperparameters. Returns its address.
    async fn create_registry(
        &self,
        model_id: &str,
        hyperparams: &Hyperparams,
    ) -> Result<Address, TransportError>;

    /// Store a chunk. Idempotent for a given key.
    async fn put(
        &self,
        key: &ChunkKey,
        chunk_type: ChunkType,
        bytes: &[u8],
    ) -> Result<Address, TransportError>;

    /// Fetch a chunk's bytes; `None` when absent. Returned bytes may carry
    /// trailing padding beyond the size recorded in the manifest.
    async fn get(&self, key: &ChunkKey) -> Result<Option<Vec<u8>>, TransportError>;

    /// Identity writes are signed with, if any
    fn authority(&self) -> Option<Address>;
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_authority_error_is_lifted() {
        let err: TransportError = LedgerError::AuthorityMismatch {
            account: Address::ZERO,
            expected: Address::from_bytes([1; 32]),
            found: Address::from_bytes([2; 32]),
        }
        .into();
        assert!(matches!(err, TransportError::AuthorityMismatch { .. }));
        assert!(err.is_permanent());
    }

    #[test]
    fn test_transient_errors() {
        assert!(!TransportError::Rejected("busy".into()).is_permanent());
        let io = std::io::Error::new(std::io::ErrorKind::TimedOut, "slow");
        assert!(!TransportError::from(io).is_permanent());
        assert!(TransportError::from(LedgerError::RecordTooLarge {
            address: Address::ZERO,
            size: 2,
            limit: 1
        })
        .is_permanent());
    }
}
