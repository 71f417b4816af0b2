use thiserror::Error;

use crate::address::Address;

/// Errors raised by the ledger program and its record codecs.
#[derive(Error, Debug)]
pub enum LedgerError {
    /// No record is stored at the address
    #[error("Account not found: {0}")]
    AccountNotFound(Address),

    /// Signer is not the authority recorded on the target account
    #[error("Invalid authority: account {account} is owned by {expected}, signed by {found}")]
    AuthorityMismatch {
        account: Address,
        expected: Address,
        found: Address,
    },

    /// Transaction signature does not verify against the claimed signer
    #[error("Invalid signature from {0}")]
    InvalidSignature(Address),

    /// Chat input exceeds the history capacity
    #[error("Input too long: {len} bytes exceeds capacity of {capacity}")]
    InputTooLong { len: usize, capacity: usize },

    /// Encoded record would exceed the per-record size ceiling
    #[error("Record for {address} is {size} bytes, limit is {limit}")]
    RecordTooLarge {
        address: Address,
        size: usize,
        limit: usize,
    },

    /// A chunk index was re-uploaded with a different chunk type
    #[error("Chunk {index} already stored as {existing:?}, refusing {requested:?}")]
    ChunkTypeConflict {
        index: u32,
        existing: crate::layout::ChunkType,
        requested: crate::layout::ChunkType,
    },

    /// A registry already exists at the address with different hyperparameters
    #[error("Registry {0} already initialized with different hyperparameters")]
    AlreadyInitialized(Address),

    /// Stored or supplied bytes do not decode as the expected record
    #[error("Invalid record: {0}")]
    InvalidRecord(String),

    /// Ledger directory belongs to a different program
    #[error("Program mismatch: ledger hosts {expected}, caller asked for {found}")]
    ProgramMismatch { expected: Address, found: Address },

    /// IO error on a persisted ledger directory
    #[error("IO error: {0}")]
    Io(#[from] std::io::Error),

    /// Lock poisoned or other internal failure
    #[error("Internal error: {0}")]
    Internal(String),

    /// Ledger metadata could not be (de)serialized
    #[error("Serialization error: {0}")]
    Serialization(String),
}

pub type Result<T> = std::result::Result<T, LedgerError>;

impl From<toml::ser::Error> for LedgerError {
    fn from(e: toml::ser::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}

impl From<toml::de::Error> for LedgerError {
    fn from(e: toml::de::Error) -> Self {
        LedgerError::Serialization(e.to_string())
    }
}
