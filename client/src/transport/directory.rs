use async_trait::async_trait;
use std::path::{Path, PathBuf};

use ::ledger::{Address, ChunkType, Hyperparams};

use super::{ChunkKey, ChunkTransport, TransportError};
use crate::model::registry::chunk_file_name;

/// Chunks as `chunk_{i}.bin` files in one model directory. The registry part
/// of a key is ignored: a directory holds exactly one model.
pub struct DirectoryTransport {
    dir: PathBuf,
}

impl DirectoryTransport {
    pub fn new(dir: impl AsRef<Path>) -> Self {
        Self {
            dir: dir.as_ref().to_path_buf(),
        }
    }

    fn chunk_path(&self, index: u32) -> PathBuf {
        self.dir.join(chunk_file_name(index))
    }
}

#[async_trait]
impl ChunkTransport for DirectoryTransport {
    async fn create_registry(
        &self,
        model_id: &str,
        _hyperparams: &Hyperparams,
    ) -> Result<Address, TransportError> {
        tokio::fs::create_dir_all(&self.dir).await?;
        Ok(Address::registry(&Address::ZERO, &Address::ZERO, model_id))
    }

    async fn put(
        &self,
        key: &ChunkKey,
        _chunk_type: ChunkType,
        bytes: &[u8],
    ) -> Result<Address, TransportError> {
        tokio::fs::write(self.chunk_path(key.index), bytes).await?;
        Ok(Address::chunk(&Address::ZERO, &key.registry, key.index))
    }

    async fn get(&self, key: &ChunkKey) -> Result<Option<Vec<u8>>, TransportError> {
        match tokio::fs::read(self.chunk_path(key.index)).await {
            Ok(bytes) => Ok(Some(bytes)),
            Err(e) if e.kind() == std::io::ErrorKind::NotFound => Ok(None),
            Err(e) => Err(e.into()),
        }
    }

    fn authority(&self) -> Option<Address> {
        None
    }
}
