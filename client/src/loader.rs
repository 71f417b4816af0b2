//! Model reconstruction
//!
//! Fetches every chunk listed in a registry manifest, reassembles the blob,
//! and dequantizes each tensor back to float32. Chunks are fetched
//! concurrently (bounded) and the assembly step waits for all of them.
//!
//! Strict loading fails on any absent chunk. Non-strict loading zero-fills
//! the gaps and reports which chunks and tensors were affected.

use futures::stream::{self, StreamExt};
use ledger::{Hyperparams, RegistryRecord};
use serde::Serialize;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, error, info, warn};

use crate::errors::{ClientError, Result};
use crate::model::quantize::dequantize_bytes;
use crate::model::registry::ModelRegistry;
use crate::model::weights::FloatTensor;
use crate::transport::{ChunkKey, ChunkTransport};

/// How to treat absent chunks
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct LoadPolicy {
    /// Fail with `IncompleteModel` if any chunk is absent
    pub strict: bool,
    /// Upper bound on in-flight fetches
    pub max_concurrent_fetches: usize,
}

impl Default for LoadPolicy {
    fn default() -> Self {
        Self {
            strict: true,
            max_concurrent_fetches: 8,
        }
    }
}

/// What a load actually found
#[derive(Debug, Clone, Default, PartialEq, Eq, Serialize)]
pub struct LoadReport {
    pub fetched_chunks: usize,
    pub missing_chunks: Vec<u32>,
    /// Tensors that overlap a missing chunk, in blob order
    pub affected_tensors: Vec<String>,
}

impl LoadReport {
    pub fn is_complete(&self) -> bool {
        self.missing_chunks.is_empty()
    }
}

/// Dequantized model
#[derive(Debug, Clone)]
pub struct LoadedModel {
    pub model_id: String,
    pub hyperparams: Hyperparams,
    pub tensors: BTreeMap<String, FloatTensor>,
    pub report: LoadReport,
}

/// Fetch, reassemble and dequantize the model described by `registry`.
pub async fn load_model<T: ChunkTransport + ?Sized>(
    registry: &ModelRegistry,
    transport: &T,
    policy: &LoadPolicy,
) -> Result<LoadedModel> {
    registry.validate()?;
    let width = registry.bit_width()?;
    let registry_key = registry.registry_address.unwrap_or_default();
    let start = Instant::now();

    info!(
        model_id = %registry.model_id,
        chunks = registry.chunk_count,
        total_bytes = registry.total_size,
        strict = policy.strict,
        "Loading model"
    );

    let fetches: Vec<_> = stream::iter(registry.chunks.iter().map(move |(&index, entry)| {
        let key = ChunkKey::new(registry_key, index);
        async move { (index, entry, transport.get(&key).await) }
    }))
    .buffer_unordered(policy.max_concurrent_fetches.max(1))
    .collect()
    .await;

    let mut blob = vec![0u8; registry.total_size];
    let mut report = LoadReport::default();
    for (index, entry, result) in fetches {
        match result {
            Ok(Some(bytes)) if bytes.len() >= entry.size => {
                blob[entry.start..entry.end].copy_from_slice(&bytes[..entry.size]);
                report.fetched_chunks += 1;
            }
            Ok(Some(bytes)) => {
                warn!(index = index, expected = entry.size, found = bytes.len(), "Chunk is truncated");
                report.missing_chunks.push(index);
            }
            Ok(None) => {
                warn!(index = index, "Chunk is absent");
                report.missing_chunks.push(index);
            }
            Err(e) => {
                warn!(index = index, error = %e, "Chunk fetch failed");
                report.missing_chunks.push(index);
            }
        }
    }
    report.missing_chunks.sort_unstable();

    if !report.missing_chunks.is_empty() {
        let mut affected = Vec::new();
        for index in &report.missing_chunks {
            let entry = &registry.chunks[index];
            for name in registry.tensors_in_range(entry.start, entry.end) {
                if !affected.contains(&name) {
                    affected.push(name);
                }
            }
        }
        report.affected_tensors = affected;

        if policy.strict {
            error!(
                model_id = %registry.model_id,
                missing = ?report.missing_chunks,
                "Model is incomplete"
            );
            return Err(ClientError::IncompleteModel {
                missing: report.missing_chunks,
            });
        }
        warn!(
            missing = ?report.missing_chunks,
            affected_tensors = ?report.affected_tensors,
            "Loading partial model, absent chunks are zero-filled"
        );
    }

    let mut tensors = BTreeMap::new();
    for (name, info) in &registry.weights_info {
        let bytes = &blob[info.offset..info.end()];
        let expected = info.element_count();
        let found = bytes.len() / width.element_size();
        if found != expected || bytes.len() % width.element_size() != 0 {
            return Err(ClientError::ShapeMismatch {
                tensor: name.clone(),
                expected,
                found,
            });
        }

        let scale = registry.scales.get(name).copied().ok_or_else(|| {
            ClientError::RegistryInvariant(format!("tensor {} has no scale", name))
        })?;
        let data = dequantize_bytes(bytes, width, scale);
        debug!(tensor = %name, elements = data.len(), scale = scale, "Dequantized tensor");
        tensors.insert(name.clone(), FloatTensor::new(name.clone(), info.shape.clone(), data)?);
    }

    info!(
        model_id = %registry.model_id,
        tensors = tensors.len(),
        fetched = report.fetched_chunks,
        missing = report.missing_chunks.len(),
        elapsed_ms = start.elapsed().as_millis() as u64,
        "Model loaded"
    );

    Ok(LoadedModel {
        model_id: registry.model_id.clone(),
        hyperparams: registry.hyperparams(),
        tensors,
        report,
    })
}

/// Check a manifest against the registry record published on the ledger.
/// Hyperparameters must match. A record that accounts for fewer chunks than
/// the manifest lists is an error under a strict policy and a warning
/// otherwise, since the load will zero-fill the missing tail.
pub fn verify_registry(
    registry: &ModelRegistry,
    record: &RegistryRecord,
    policy: &LoadPolicy,
) -> Result<()> {
    let address = registry
        .registry_address
        .map(|a| a.to_hex())
        .unwrap_or_else(|| registry.model_id.clone());

    if record.hyperparams != registry.hyperparams() {
        return Err(ClientError::RegistryMismatch {
            registry: address,
            reason: format!(
                "ledger hyperparameters {:?} differ from manifest {:?}",
                record.hyperparams,
                registry.hyperparams()
            ),
        });
    }
    if record.chunk_count < registry.chunk_count {
        if policy.strict {
            return Err(ClientError::RegistryMismatch {
                registry: address,
                reason: format!(
                    "ledger holds {} chunks, manifest lists {}",
                    record.chunk_count, registry.chunk_count
                ),
            });
        }
        warn!(
            registry = %address,
            on_ledger = record.chunk_count,
            manifest = registry.chunk_count,
            "Registry is missing trailing chunks"
        );
    }
    Ok(())
}
