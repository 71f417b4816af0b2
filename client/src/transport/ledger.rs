use async_trait::async_trait;
use ed25519_dalek::SigningKey;
use std::sync::Arc;
use tracing::debug;

use ::ledger::{
    Address, ChunkType, Hyperparams, Instruction, Ledger, RegistryRecord, Transaction,
};

use super::{ChunkKey, ChunkTransport, TransportError};

/// Transport backed by a [`Ledger`]. Reads need no identity; writes are
/// signed with the configured key.
pub struct LedgerTransport {
    ledger: Arc<Ledger>,
    signer: Option<SigningKey>,
}

impl LedgerTransport {
    /// Read-only transport
    pub fn reader(ledger: Arc<Ledger>) -> Self {
        Self { ledger, signer: None }
    }

    /// Transport that signs writes with `signer`
    pub fn new(ledger: Arc<Ledger>, signer: SigningKey) -> Self {
        Self {
            ledger,
            signer: Some(signer),
        }
    }

    pub fn ledger(&self) -> &Arc<Ledger> {
        &self.ledger
    }

    /// Decoded registry record at `address`, if present
    pub fn registry_record(&self, address: &Address) -> Result<Option<RegistryRecord>, TransportError> {
        self.ledger
            .get_account(address)?
            .map(|bytes| RegistryRecord::decode(&bytes))
            .transpose()
            .map_err(TransportError::from)
    }

    fn submit(&self, instruction: Instruction) -> Result<Address, TransportError> {
        let signer = self.signer.as_ref().ok_or(TransportError::NoSigner)?;
        let tx = Transaction::sign(&self.ledger.program_id(), instruction, signer);
        Ok(self.ledger.process(&tx)?)
    }
}

#[async_trait]
impl ChunkTransport for LedgerTransport {
    async fn create_registry(
        &self,
        model_id: &str,
        hyperparams: &Hyperparams,
    ) -> Result<Address, TransportError> {
        self.submit(Instruction::InitializeModel {
            model_id: model_id.to_string(),
            hyperparams: *hyperparams,
        })
    }

    async fn put(
        &self,
        key: &ChunkKey,
        chunk_type: ChunkType,
        bytes: &[u8],
    ) -> Result<Address, TransportError> {
        self.submit(Instruction::UploadChunk {
            registry: key.registry,
            chunk_index: key.index,
            chunk_type,
            data: bytes.to_vec(),
        })
    }

    async fn get(&self, key: &ChunkKey) -> Result<Option<Vec<u8>>, TransportError> {
        let Some(record) = self.ledger.chunk(&key.registry, key.index)? else {
            return Ok(None);
        };

        if record.registry != key.registry || record.chunk_index != key.index {
            return Err(TransportError::Rejected(format!(
                "record at chunk {} belongs to {} index {}",
                key.index, record.registry, record.chunk_index
            )));
        }

        debug!(
            registry = %key.registry,
            index = key.index,
            words = record.words.len(),
            "Fetched chunk record"
        );
        Ok(Some(record.data()))
    }

    fn authority(&self) -> Option<Address> {
        self.signer
            .as_ref()
            .map(|key| Address::from(&key.verifying_key()))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use ::ledger::LedgerConfig;
    use rand::rngs::OsRng;

    fn hyperparams() -> Hyperparams {
        Hyperparams {
            vocab_size: 16,
            embedding_dim: 4,
            hidden_dim: 8,
            context_length: 8,
            layer_count: 1,
        }
    }

    fn ledger() -> Arc<Ledger> {
        Arc::new(Ledger::in_memory(LedgerConfig::new(Address::from_bytes([1; 32]))))
    }

    #[tokio::test]
    async fn test_put_and_get() {
        let transport = LedgerTransport::new(ledger(), SigningKey::generate(&mut OsRng));
        let registry = transport.create_registry("tiny", &hyperparams()).await.unwrap();

        let key = ChunkKey::new(registry, 0);
        let address = transport.put(&key, ChunkType::Embedding, b"abcde").await.unwrap();
        assert_eq!(address, Address::chunk(&transport.ledger().program_id(), &registry, 0));

        let bytes = transport.get(&key).await.unwrap().unwrap();
        assert_eq!(bytes, b"abcde\0\0\0");
        assert!(transport.get(&ChunkKey::new(registry, 1)).await.unwrap().is_none());

        let record = transport.registry_record(&registry).unwrap().unwrap();
        assert_eq!(record.chunk_count, 1);
    }

    #[tokio::test]
    async fn test_reader_cannot_write() {
        let transport = LedgerTransport::reader(ledger());
        assert!(transport.authority().is_none());
        assert!(matches!(
            transport.create_registry("tiny", &hyperparams()).await,
            Err(TransportError::NoSigner)
        ));
    }

    #[tokio::test]
    async fn test_foreign_signer_rejected() {
        let shared = ledger();
        let owner = LedgerTransport::new(shared.clone(), SigningKey::generate(&mut OsRng));
        let intruder = LedgerTransport::new(shared, SigningKey::generate(&mut OsRng));

        let registry = owner.create_registry("tiny", &hyperparams()).await.unwrap();
        let err = intruder
            .put(&ChunkKey::new(registry, 0), ChunkType::Embedding, b"x")
            .await
            .unwrap_err();
        assert!(matches!(err, TransportError::AuthorityMismatch { .. }));
    }
}
