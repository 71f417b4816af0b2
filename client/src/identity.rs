//! Signing identity
//!
//! An identity is an ed25519 keypair stored as TOML with the secret key in
//! multibase Base58BTC. Its public key doubles as the ledger address used as
//! registry and chat authority.

use ed25519_dalek::{SigningKey, VerifyingKey};
use ledger::Address;
use serde::{Deserialize, Serialize};
use std::path::{Path, PathBuf};

use crate::config::sea_home;
use crate::errors::{ClientError, Result};

/// Serde for [`SigningKey`] as a multibase Base58BTC string ('z' prefix).
pub mod keypair_serde {
    use super::*;
    use serde::{de, Deserialize, Deserializer, Serializer};

    pub fn serialize<S>(key: &SigningKey, serializer: S) -> std::result::Result<S::Ok, S::Error>
    where
        S: Serializer,
    {
        let encoded = multibase::encode(multibase::Base::Base58Btc, key.to_bytes());
        serializer.serialize_str(&encoded)
    }

    pub fn deserialize<'de, D>(deserializer: D) -> std::result::Result<SigningKey, D::Error>
    where
        D: Deserializer<'de>,
    {
        let string = String::deserialize(deserializer)?;
        let (_, decoded) = multibase::decode(&string).map_err(de::Error::custom)?;

        let key_bytes: [u8; 32] = decoded
            .as_slice()
            .try_into()
            .map_err(|_| de::Error::custom("Invalid key length (expected 32 bytes)"))?;

        Ok(SigningKey::from_bytes(&key_bytes))
    }
}

/// Generate a new Ed25519 signing keypair from the OS RNG.
pub fn generate_keypair() -> SigningKey {
    let mut rng = rand::rngs::OsRng;
    let mut secret_bytes = [0u8; 32];
    rand::RngCore::fill_bytes(&mut rng, &mut secret_bytes);
    SigningKey::from_bytes(&secret_bytes)
}

/// Named signing identity
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Identity {
    pub name: String,
    #[serde(with = "keypair_serde")]
    pub keypair: SigningKey,
}

impl Identity {
    pub fn generate(name: impl Into<String>) -> Self {
        Self {
            name: name.into(),
            keypair: generate_keypair(),
        }
    }

    /// `~/.sea/identity.toml`
    pub fn default_path() -> Result<PathBuf> {
        Ok(sea_home()?.join("identity.toml"))
    }

    pub fn public_key(&self) -> VerifyingKey {
        self.keypair.verifying_key()
    }

    /// Ledger address of this identity
    pub fn address(&self) -> Address {
        Address::from(&self.public_key())
    }

    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            tracing::error!(path = %path.display(), error = %e, "Failed to read identity file");
            e
        })?;
        let identity: Identity = toml::from_str(&content)?;
        tracing::debug!(name = %identity.name, address = %identity.address(), "Loaded identity");
        Ok(identity)
    }

    /// Write the identity, refusing to replace an existing file
    pub fn save(&self, path: &Path) -> Result<()> {
        if path.exists() {
            return Err(ClientError::Config(format!(
                "Identity file {} already exists",
                path.display()
            )));
        }
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let temp_path = path.with_extension("toml.tmp");
        std::fs::write(&temp_path, toml::to_string_pretty(self)?)?;
        std::fs::rename(&temp_path, path)?;

        tracing::info!(
            path = %path.display(),
            name = %self.name,
            address = %self.address(),
            "Saved identity"
        );
        Ok(())
    }
}
