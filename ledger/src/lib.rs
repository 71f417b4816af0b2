//! Size-constrained account ledger
//!
//! Accounts are addressed by 32-byte keys and hold opaque byte records with a
//! per-record size ceiling. The program understands three record kinds: a
//! model registry, weight chunks owned by a registry, and per-user chat
//! state. Writes happen only through ed25519-signed [`Transaction`]s.

pub mod address;
pub mod errors;
pub mod instruction;
pub mod layout;
pub mod program;

pub use address::Address;
pub use errors::{LedgerError, Result};
pub use instruction::{Instruction, Transaction};
pub use layout::{ChatRecord, ChunkRecord, ChunkType, Hyperparams, RegistryRecord};
pub use program::{Ledger, LedgerConfig, DEFAULT_MAX_RECORD_SIZE};
