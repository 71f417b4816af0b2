//! Model preparation: float weights → quantized tensors → packed blob →
//! chunks + registry manifest.

pub mod blob;
pub mod quantize;
pub mod registry;
pub mod schema;
pub mod weights;

use ledger::Hyperparams;
use std::path::Path;
use tracing::info;

use crate::errors::{ClientError, Result};
use blob::{pack, split, Chunk};
use quantize::{quantize, QuantizedTensor};
use registry::{ModelRegistry, MANIFEST_FILE};
use weights::FloatTensor;

/// A quantized model ready to be written or uploaded
#[derive(Debug, Clone)]
pub struct PreparedModel {
    pub registry: ModelRegistry,
    pub chunks: Vec<Chunk>,
}

/// Quantize, pack and split `tensors` into a manifest and its chunks.
pub fn prepare(
    model_id: &str,
    tensors: &[FloatTensor],
    hyperparams: Hyperparams,
    bits: u32,
    max_chunk_size: i64,
) -> Result<PreparedModel> {
    let quantized = tensors
        .iter()
        .map(|t| quantize(t, bits))
        .collect::<Result<Vec<QuantizedTensor>>>()?;

    let blob = pack(&quantized);
    let chunks = split(&blob.bytes, max_chunk_size)?;
    let registry = ModelRegistry::build(model_id, hyperparams, &quantized, &blob, &chunks)?;

    info!(
        model_id = %model_id,
        tensors = quantized.len(),
        bits = bits,
        total_bytes = blob.len(),
        chunks = chunks.len(),
        "Prepared model"
    );

    Ok(PreparedModel { registry, chunks })
}

impl PreparedModel {
    /// Write chunk files and `model_registry.json` into `dir`
    pub fn write_to(&self, dir: &Path) -> Result<()> {
        std::fs::create_dir_all(dir)?;
        for chunk in &self.chunks {
            let entry = &self.registry.chunks[&chunk.index];
            std::fs::write(dir.join(&entry.path), &chunk.data)?;
        }
        self.registry.save(&dir.join(MANIFEST_FILE))
    }
}

/// Read every chunk file listed in `registry` from `dir`.
pub fn read_chunks(dir: &Path, registry: &ModelRegistry) -> Result<Vec<Chunk>> {
    registry
        .chunks
        .iter()
        .map(|(index, entry)| {
            let data = std::fs::read(dir.join(&entry.path))?;
            if data.len() != entry.size {
                return Err(ClientError::RegistryInvariant(format!(
                    "chunk file {} is {} bytes, manifest says {}",
                    entry.path,
                    data.len(),
                    entry.size
                )));
            }
            Ok(Chunk {
                index: *index,
                start: entry.start,
                end: entry.end,
                data,
            })
        })
        .collect()
}
