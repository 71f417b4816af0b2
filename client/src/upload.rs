//! Chunk upload orchestration
//!
//! Chunks go out one at a time in ascending index order with a pacing delay
//! between them. Each chunk is retried with exponential backoff; a chunk
//! that still fails is recorded in the report and the batch continues.
//! Authority failures abort the whole batch, since every further chunk would
//! be rejected the same way.

use ledger::Address;
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::time::Duration;
use tokio::time::sleep;
use tracing::{debug, error, info, warn};

use crate::errors::{ClientError, Result};
use crate::model::blob::Chunk;
use crate::model::registry::ModelRegistry;
use crate::transport::{ChunkKey, ChunkTransport, TransportError};

/// Upload pacing and retry policy
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct UploadOptions {
    /// Delay between consecutive chunk uploads
    pub pacing: Duration,
    /// Attempts per chunk, including the first
    pub max_retries: u32,
    /// Backoff before the second attempt; doubles each retry
    pub retry_backoff: Duration,
    /// Skip chunks the manifest already records an address for
    pub resume: bool,
}

impl Default for UploadOptions {
    fn default() -> Self {
        Self {
            pacing: Duration::from_millis(500),
            max_retries: 3,
            retry_backoff: Duration::from_millis(500),
            resume: false,
        }
    }
}

/// Outcome of one upload batch
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize, Deserialize)]
pub struct UploadReport {
    pub registry: Option<Address>,
    pub succeeded: BTreeMap<u32, Address>,
    pub skipped: Vec<u32>,
    pub failed: BTreeMap<u32, String>,
}

impl UploadReport {
    pub fn is_complete(&self) -> bool {
        self.failed.is_empty()
    }
}

pub struct Uploader<'a, T: ChunkTransport + ?Sized> {
    transport: &'a T,
    options: UploadOptions,
}

impl<'a, T: ChunkTransport + ?Sized> Uploader<'a, T> {
    pub fn new(transport: &'a T, options: UploadOptions) -> Self {
        Self { transport, options }
    }

    /// Publish the registry and every chunk, recording addresses into
    /// `registry` as they succeed.
    pub async fn upload(&self, registry: &mut ModelRegistry, chunks: &[Chunk]) -> Result<UploadReport> {
        registry.validate()?;
        check_chunks(registry, chunks)?;

        let registry_address = self
            .transport
            .create_registry(&registry.model_id, &registry.hyperparams())
            .await
            .map_err(|e| self.fatal(&registry.model_id, e))?;

        if registry.registry_address.is_some_and(|a| a != registry_address) {
            warn!(
                previous = ?registry.registry_address,
                current = %registry_address,
                "Registry address changed, discarding recorded chunk addresses"
            );
            registry.clear_addresses();
        }
        registry.registry_address = Some(registry_address);
        registry.authority = self.transport.authority();

        info!(
            model_id = %registry.model_id,
            registry = %registry_address,
            chunks = chunks.len(),
            "Uploading chunks"
        );

        let mut report = UploadReport {
            registry: Some(registry_address),
            ..Default::default()
        };
        let mut ordered: Vec<&Chunk> = chunks.iter().collect();
        ordered.sort_by_key(|c| c.index);

        let mut first = true;
        for chunk in ordered {
            let entry = &registry.chunks[&chunk.index];
            if self.options.resume && entry.address.is_some() {
                debug!(index = chunk.index, "Chunk already uploaded, skipping");
                report.skipped.push(chunk.index);
                continue;
            }
            if !first && !self.options.pacing.is_zero() {
                sleep(self.options.pacing).await;
            }
            first = false;

            let key = ChunkKey::new(registry_address, chunk.index);
            match self.put_with_retry(&key, entry.chunk_type, &chunk.data).await {
                Ok(address) => {
                    registry.record_address(chunk.index, address)?;
                    report.succeeded.insert(chunk.index, address);
                }
                Err(TransportError::AuthorityMismatch {
                    account,
                    expected,
                    found,
                }) => {
                    error!(index = chunk.index, signer = %found, "Signer does not own the registry, aborting");
                    return Err(ClientError::AuthorityMismatch {
                        account: account.to_hex(),
                        expected: expected.to_hex(),
                        found: found.to_hex(),
                    });
                }
                Err(e) => {
                    error!(index = chunk.index, error = %e, "Chunk upload failed");
                    report.failed.insert(chunk.index, e.to_string());
                }
            }
        }

        info!(
            registry = %registry_address,
            succeeded = report.succeeded.len(),
            skipped = report.skipped.len(),
            failed = report.failed.len(),
            "Upload finished"
        );
        Ok(report)
    }

    /// Put one chunk, retrying transient failures with exponential backoff.
    async fn put_with_retry(
        &self,
        key: &ChunkKey,
        chunk_type: ledger::ChunkType,
        data: &[u8],
    ) -> std::result::Result<Address, TransportError> {
        let attempts = self.options.max_retries.max(1);
        let mut attempt = 1;
        loop {
            debug!(index = key.index, attempt = attempt, size = data.len(), "Uploading chunk");

            match self.transport.put(key, chunk_type, data).await {
                Ok(address) => {
                    debug!(index = key.index, address = %address, "Chunk uploaded");
                    return Ok(address);
                }
                Err(e) if e.is_permanent() || attempt >= attempts => return Err(e),
                Err(e) => {
                    let backoff = backoff_delay(self.options.retry_backoff, attempt);
                    warn!(
                        index = key.index,
                        attempt = attempt,
                        error = %e,
                        backoff_ms = backoff.as_millis(),
                        "Chunk upload failed, retrying"
                    );
                    sleep(backoff).await;
                    attempt += 1;
                }
            }
        }
    }

    fn fatal(&self, model_id: &str, e: TransportError) -> ClientError {
        match e {
            TransportError::AuthorityMismatch {
                account,
                expected,
                found,
            } => ClientError::AuthorityMismatch {
                account: account.to_hex(),
                expected: expected.to_hex(),
                found: found.to_hex(),
            },
            other => {
                error!(model_id = %model_id, error = %other, "Failed to publish registry");
                ClientError::Publish {
                    model_id: model_id.to_string(),
                    source: other,
                }
            }
        }
    }
}

fn check_chunks(registry: &ModelRegistry, chunks: &[Chunk]) -> Result<()> {
    if chunks.len() != registry.chunks.len() {
        return Err(ClientError::RegistryInvariant(format!(
            "{} chunks supplied for a manifest of {}",
            chunks.len(),
            registry.chunks.len()
        )));
    }
    for chunk in chunks {
        match registry.chunks.get(&chunk.index) {
            Some(entry) if entry.size == chunk.data.len() && entry.start == chunk.start => {}
            _ => {
                return Err(ClientError::RegistryInvariant(format!(
                    "chunk {} does not match the manifest",
                    chunk.index
                )))
            }
        }
    }
    Ok(())
}

/// Delay before retrying after the given failed attempt, doubling each time
fn backoff_delay(base: Duration, attempt: u32) -> Duration {
    base.saturating_mul(2_u32.saturating_pow(attempt.saturating_sub(1)))
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::{prepare, weights::random_model, PreparedModel};
    use crate::transport::LedgerTransport;
    use async_trait::async_trait;
    use ed25519_dalek::SigningKey;
    use ledger::{ChunkType, Hyperparams, Ledger, LedgerConfig};
    use rand::rngs::OsRng;
    use std::sync::{Arc, Mutex};

    fn hyperparams() -> Hyperparams {
        Hyperparams {
            vocab_size: 16,
            embedding_dim: 4,
            hidden_dim: 8,
            context_length: 8,
            layer_count: 1,
        }
    }

    fn prepared() -> PreparedModel {
        let tensors = random_model(&hyperparams(), 5).unwrap();
        prepare("tiny", &tensors, hyperparams(), 8, 32).unwrap()
    }

    fn fast() -> UploadOptions {
        UploadOptions {
            pacing: Duration::ZERO,
            max_retries: 3,
            retry_backoff: Duration::from_millis(1),
            resume: false,
        }
    }

    /// Fails the first `failures[index]` puts of each chunk
    struct FlakyTransport {
        failures: Mutex<BTreeMap<u32, u32>>,
        puts: Mutex<Vec<u32>>,
    }

    #[async_trait]
    impl ChunkTransport for FlakyTransport {
        async fn create_registry(
            &self,
            model_id: &str,
            _hyperparams: &Hyperparams,
        ) -> std::result::Result<Address, TransportError> {
            Ok(Address::registry(&Address::ZERO, &Address::ZERO, model_id))
        }

        async fn put(
            &self,
            key: &ChunkKey,
            _chunk_type: ChunkType,
            _bytes: &[u8],
        ) -> std::result::Result<Address, TransportError> {
            self.puts.lock().unwrap().push(key.index);
            let mut failures = self.failures.lock().unwrap();
            if let Some(left) = failures.get_mut(&key.index) {
                if *left > 0 {
                    *left -= 1;
                    return Err(TransportError::Rejected("rate limited".into()));
                }
            }
            Ok(Address::chunk(&Address::ZERO, &key.registry, key.index))
        }

        async fn get(&self, _key: &ChunkKey) -> std::result::Result<Option<Vec<u8>>, TransportError> {
            Ok(None)
        }

        fn authority(&self) -> Option<Address> {
            None
        }
    }

    #[test]
    fn test_backoff_delay_saturates() {
        let base = Duration::from_millis(500);
        assert_eq!(backoff_delay(base, 1), base);
        assert_eq!(backoff_delay(base, 3), Duration::from_millis(2000));
        // 2^39 overflows u32; the delay clamps instead of panicking
        assert_eq!(backoff_delay(base, 40), base.saturating_mul(u32::MAX));
        assert_eq!(backoff_delay(Duration::MAX, 5), Duration::MAX);
    }

    #[tokio::test]
    async fn test_upload_to_ledger() {
        let ledger = Arc::new(Ledger::in_memory(LedgerConfig::new(Address::from_bytes([1; 32]))));
        let key = SigningKey::generate(&mut OsRng);
        let transport = LedgerTransport::new(ledger.clone(), key.clone());
        let mut model = prepared();

        let report = Uploader::new(&transport, fast())
            .upload(&mut model.registry, &model.chunks)
            .await
            .unwrap();

        assert!(report.is_complete());
        assert_eq!(report.succeeded.len(), model.chunks.len());
        assert!(!model.registry.is_address_pending());
        assert_eq!(model.registry.authority, Some(Address::from(&key.verifying_key())));

        let registry = model.registry.registry_address.unwrap();
        assert_eq!(
            ledger.registry(&registry).unwrap().chunk_count as usize,
            model.chunks.len()
        );
    }

    #[tokio::test]
    async fn test_retries_then_reports_failures() {
        let mut model = prepared();
        let transport = FlakyTransport {
            // chunk 1 recovers on the third attempt, chunk 2 never does
            failures: Mutex::new(BTreeMap::from([(1, 2), (2, 10)])),
            puts: Mutex::new(Vec::new()),
        };

        let report = Uploader::new(&transport, fast())
            .upload(&mut model.registry, &model.chunks)
            .await
            .unwrap();

        assert!(!report.is_complete());
        assert!(report.succeeded.contains_key(&1));
        assert_eq!(report.failed.keys().copied().collect::<Vec<_>>(), vec![2]);
        assert_eq!(model.registry.pending_chunks(), vec![2]);

        // ascending order, 3 attempts for each flaky chunk
        assert_eq!(*transport.puts.lock().unwrap(), vec![0, 1, 1, 1, 2, 2, 2, 3, 4, 5]);
    }

    #[tokio::test]
    async fn test_resume_skips_recorded_chunks() {
        let mut model = prepared();
        let transport = FlakyTransport {
            failures: Mutex::new(BTreeMap::from([(2, 10)])),
            puts: Mutex::new(Vec::new()),
        };
        let first = Uploader::new(&transport, fast())
            .upload(&mut model.registry, &model.chunks)
            .await
            .unwrap();
        assert_eq!(first.failed.len(), 1);

        transport.failures.lock().unwrap().clear();
        transport.puts.lock().unwrap().clear();
        let options = UploadOptions { resume: true, ..fast() };
        let second = Uploader::new(&transport, options)
            .upload(&mut model.registry, &model.chunks)
            .await
            .unwrap();

        assert!(second.is_complete());
        assert_eq!(*transport.puts.lock().unwrap(), vec![2]);
        assert_eq!(second.skipped, vec![0, 1, 3, 4, 5]);
        assert!(!model.registry.is_address_pending());
    }

    #[tokio::test]
    async fn test_authority_mismatch_aborts() {
        let ledger = Arc::new(Ledger::in_memory(LedgerConfig::new(Address::from_bytes([1; 32]))));
        let owner = LedgerTransport::new(ledger.clone(), SigningKey::generate(&mut OsRng));
        let mut model = prepared();
        Uploader::new(&owner, fast())
            .upload(&mut model.registry, &model.chunks)
            .await
            .unwrap();

        // A second identity resolves to its own registry, so point it at the owner's
        struct Hijack(LedgerTransport, Address);
        #[async_trait]
        impl ChunkTransport for Hijack {
            async fn create_registry(
                &self,
                _model_id: &str,
                _hyperparams: &Hyperparams,
            ) -> std::result::Result<Address, TransportError> {
                Ok(self.1)
            }
            async fn put(
                &self,
                key: &ChunkKey,
                chunk_type: ChunkType,
                bytes: &[u8],
            ) -> std::result::Result<Address, TransportError> {
                self.0.put(key, chunk_type, bytes).await
            }
            async fn get(&self, key: &ChunkKey) -> std::result::Result<Option<Vec<u8>>, TransportError> {
                self.0.get(key).await
            }
            fn authority(&self) -> Option<Address> {
                self.0.authority()
            }
        }

        let target = model.registry.registry_address.unwrap();
        let before = ledger.chunk(&target, 0).unwrap();
        let intruder = Hijack(
            LedgerTransport::new(ledger.clone(), SigningKey::generate(&mut OsRng)),
            target,
        );
        let err = Uploader::new(&intruder, fast())
            .upload(&mut model.registry, &model.chunks)
            .await
            .unwrap_err();

        assert!(matches!(err, ClientError::AuthorityMismatch { .. }));
        assert_eq!(ledger.chunk(&target, 0).unwrap(), before);
    }

    #[tokio::test]
    async fn test_rejects_chunks_not_matching_manifest() {
        let mut model = prepared();
        let transport = FlakyTransport {
            failures: Mutex::new(BTreeMap::new()),
            puts: Mutex::new(Vec::new()),
        };
        let mut chunks = model.chunks.clone();
        chunks[0].data.pop();

        let err = Uploader::new(&transport, fast())
            .upload(&mut model.registry, &chunks)
            .await
            .unwrap_err();
        assert!(matches!(err, ClientError::RegistryInvariant(_)));
        assert!(transport.puts.lock().unwrap().is_empty());
    }
}
