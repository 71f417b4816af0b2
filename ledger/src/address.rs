use serde::{Deserialize, Deserializer, Serialize, Serializer};
use sha2::{Digest, Sha256};
use std::fmt;
use std::str::FromStr;

use crate::errors::{LedgerError, Result};

const REGISTRY_SEED: &[u8] = b"sea-registry-v1";
const CHUNK_SEED: &[u8] = b"sea-chunk-v1";
const CHAT_SEED: &[u8] = b"sea-chat-v1";

/// 32-byte ledger key. Used both for account addresses and for signer
/// identities (an ed25519 verifying key is stored as its raw bytes).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Hash, PartialOrd, Ord)]
pub struct Address([u8; 32]);

impl Address {
    pub const ZERO: Address = Address([0; 32]);

    /// Create from raw bytes
    pub fn from_bytes(bytes: [u8; 32]) -> Self {
        Address(bytes)
    }

    /// Get raw bytes
    pub fn as_bytes(&self) -> &[u8; 32] {
        &self.0
    }

    /// Convert to hex string
    pub fn to_hex(&self) -> String {
        hex::encode(self.0)
    }

    /// Parse from hex string
    pub fn from_hex(s: &str) -> Result<Self> {
        let bytes = hex::decode(s)
            .map_err(|e| LedgerError::InvalidRecord(format!("Invalid address hex: {}", e)))?;
        let array: [u8; 32] = bytes.as_slice().try_into().map_err(|_| {
            LedgerError::InvalidRecord(format!(
                "Invalid address length: expected 32 bytes, got {}",
                bytes.len()
            ))
        })?;
        Ok(Address(array))
    }

    /// Address of the registry record for `model_id`, owned by `authority`.
    pub fn registry(program_id: &Address, authority: &Address, model_id: &str) -> Self {
        Self::derive(&[
            REGISTRY_SEED,
            program_id.as_bytes(),
            authority.as_bytes(),
            model_id.as_bytes(),
        ])
    }

    /// Address of chunk `index` under `registry`. Depends only on
    /// `(registry, index)` so re-uploads land on the same record.
    pub fn chunk(program_id: &Address, registry: &Address, index: u32) -> Self {
        Self::derive(&[
            CHUNK_SEED,
            program_id.as_bytes(),
            registry.as_bytes(),
            &index.to_le_bytes(),
        ])
    }

    /// Address of the chat state of `user` against `model`.
    pub fn chat(program_id: &Address, model: &Address, user: &Address) -> Self {
        Self::derive(&[
            CHAT_SEED,
            program_id.as_bytes(),
            model.as_bytes(),
            user.as_bytes(),
        ])
    }

    fn derive(parts: &[&[u8]]) -> Self {
        let mut hasher = Sha256::new();
        for part in parts {
            // Length-prefix so adjacent variable-length seeds cannot collide
            hasher.update((part.len() as u32).to_le_bytes());
            hasher.update(part);
        }
        Address(hasher.finalize().into())
    }
}

impl From<[u8; 32]> for Address {
    fn from(bytes: [u8; 32]) -> Self {
        Address(bytes)
    }
}

impl From<&ed25519_dalek::VerifyingKey> for Address {
    fn from(key: &ed25519_dalek::VerifyingKey) -> Self {
        Address(key.to_bytes())
    }
}

impl FromStr for Address {
    type Err = LedgerError;

    fn from_str(s: &str) -> Result<Self> {
        Address::from_hex(s)
    }
}

impl fmt::Display for Address {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{}", &self.to_hex()[..16])
    }
}

// Hex strings in manifests and config files
impl Serialize for Address {
    fn serialize<S: Serializer>(&self, serializer: S) -> std::result::Result<S::Ok, S::Error> {
        serializer.serialize_str(&self.to_hex())
    }
}

impl<'de> Deserialize<'de> for Address {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> std::result::Result<Self, D::Error> {
        let s = String::deserialize(deserializer)?;
        Address::from_hex(&s).map_err(serde::de::Error::custom)
    }
}
