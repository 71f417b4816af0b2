use async_trait::async_trait;
use std::sync::atomic::{AtomicUsize, Ordering};
use tracing::info;

use ::ledger::{Address, ChunkType, Hyperparams};

use super::{ChunkKey, ChunkTransport, TransportError};

/// Reports the addresses an upload would produce without writing anything.
pub struct DryRunTransport {
    program_id: Address,
    authority: Address,
    bytes_planned: AtomicUsize,
}

impl DryRunTransport {
    pub fn new(program_id: Address, authority: Address) -> Self {
        Self {
            program_id,
            authority,
            bytes_planned: AtomicUsize::new(0),
        }
    }

    /// Total payload bytes passed to `put` so far
    pub fn bytes_planned(&self) -> usize {
        self.bytes_planned.load(Ordering::Relaxed)
    }
}

#[async_trait]
impl ChunkTransport for DryRunTransport {
    async fn create_registry(
        &self,
        model_id: &str,
        hyperparams: &Hyperparams,
    ) -> Result<Address, TransportError> {
        let address = Address::registry(&self.program_id, &self.authority, model_id);
        info!(
            registry = %address,
            model_id = %model_id,
            layers = hyperparams.layer_count,
            "[dry run] would initialize registry"
        );
        Ok(address)
    }

    async fn put(
        &self,
        key: &ChunkKey,
        chunk_type: ChunkType,
        bytes: &[u8],
    ) -> Result<Address, TransportError> {
        let address = Address::chunk(&self.program_id, &key.registry, key.index);
        self.bytes_planned.fetch_add(bytes.len(), Ordering::Relaxed);
        info!(
            index = key.index,
            chunk_type = ?chunk_type,
            size = bytes.len(),
            address = %address,
            "[dry run] would upload chunk"
        );
        Ok(address)
    }

    async fn get(&self, _key: &ChunkKey) -> Result<Option<Vec<u8>>, TransportError> {
        Ok(None)
    }

    fn authority(&self) -> Option<Address> {
        Some(self.authority)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[tokio::test]
    async fn test_addresses_match_ledger_derivation() {
        let program = Address::from_bytes([1; 32]);
        let authority = Address::from_bytes([2; 32]);
        let transport = DryRunTransport::new(program, authority);
        let hp = Hyperparams {
            vocab_size: 16,
            embedding_dim: 4,
            hidden_dim: 8,
            context_length: 8,
            layer_count: 1,
        };

        let registry = transport.create_registry("tiny", &hp).await.unwrap();
        assert_eq!(registry, Address::registry(&program, &authority, "tiny"));

        let key = ChunkKey::new(registry, 3);
        let address = transport.put(&key, ChunkType::Output, &[0; 10]).await.unwrap();
        assert_eq!(address, Address::chunk(&program, &registry, 3));
        assert_eq!(transport.bytes_planned(), 10);
        assert!(transport.get(&key).await.unwrap().is_none());
    }
}
