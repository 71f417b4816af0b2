//! Client for models stored on a size-constrained ledger
//!
//! Turns float weights into quantized chunks small enough for ledger
//! records, publishes them under a signed registry, reconstructs them again
//! (tolerating missing chunks when asked to) and runs autoregressive
//! generation and ledger-backed chat over the result.

pub mod chat;
pub mod config;
pub mod errors;
pub mod identity;
pub mod inference;
pub mod loader;
pub mod model;
pub mod observability;
pub mod transport;
pub mod upload;
pub mod util;

pub use chat::{ChatReply, ChatSession};
pub use config::ClientConfig;
pub use errors::{ClientError, Result};
pub use identity::Identity;
pub use inference::{GenerationConfig, GenerationResult, InferenceEngine, StopReason};
pub use loader::{load_model, verify_registry, LoadPolicy, LoadReport, LoadedModel};
pub use model::registry::ModelRegistry;
pub use model::{prepare, read_chunks, PreparedModel};
pub use observability::{init_production_logging, init_simple_logging};
pub use transport::{ChunkKey, ChunkTransport, DirectoryTransport, DryRunTransport, LedgerTransport, TransportError};
pub use upload::{UploadOptions, UploadReport, Uploader};
pub use util::format_bytes;
