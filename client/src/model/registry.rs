//! Model registry manifest
//!
//! The manifest is the authoritative description of a quantized model:
//! hyperparameters, per-tensor layout and scale, and the chunk table. It is
//! written as `model_registry.json` next to the chunk files, and after upload
//! as `model_registry_uploaded.json` with every chunk's ledger address.

use ledger::{Address, ChunkType, Hyperparams};
use serde::{Deserialize, Serialize};
use std::collections::BTreeMap;
use std::path::Path;
use tracing::{error, info};

use crate::errors::{ClientError, Result};
use crate::model::blob::{Chunk, PackedBlob, TensorSpan};
use crate::model::quantize::{BitWidth, QuantizedTensor};
use crate::model::schema::{ArchitectureSchema, SCHEMA_VERSION};

pub const MANIFEST_FILE: &str = "model_registry.json";
pub const UPLOADED_MANIFEST_FILE: &str = "model_registry_uploaded.json";

/// File name of chunk `index` inside a model directory
pub fn chunk_file_name(index: u32) -> String {
    format!("chunk_{}.bin", index)
}

/// Hyperparameters plus the quantization width
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct ModelConfig {
    #[serde(flatten)]
    pub hyperparams: Hyperparams,
    pub bits: u32,
}

/// Layout of one tensor inside the blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct WeightInfo {
    pub shape: Vec<usize>,
    /// Stored integer dtype ("int8", "int16", "int32")
    pub dtype: String,
    pub size_bytes: usize,
    /// Byte offset inside the blob
    pub offset: usize,
    /// Dtype of the float source
    pub original_dtype: String,
}

impl WeightInfo {
    pub fn element_count(&self) -> usize {
        self.shape.iter().product()
    }

    pub fn end(&self) -> usize {
        self.offset + self.size_bytes
    }
}

/// One chunk of the blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct ChunkEntry {
    /// Chunk file name relative to the model directory
    pub path: String,
    /// Ledger address, once uploaded
    pub address: Option<Address>,
    pub size: usize,
    pub start: usize,
    pub end: usize,
    pub chunk_type: ChunkType,
}

/// The manifest
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct ModelRegistry {
    pub schema_version: u32,
    pub model_id: String,
    pub config: ModelConfig,
    pub weights_info: BTreeMap<String, WeightInfo>,
    pub scales: BTreeMap<String, f64>,
    pub chunks: BTreeMap<u32, ChunkEntry>,
    pub chunk_count: u32,
    pub total_size: usize,
    /// On-ledger registry record, once published
    #[serde(default)]
    pub registry_address: Option<Address>,
    /// Identity that published the registry
    #[serde(default)]
    pub authority: Option<Address>,
}

impl ModelRegistry {
    /// Build a manifest from quantized tensors, their packed blob and its
    /// chunks. Fails if a tensor is outside the schema or any layout
    /// invariant does not hold.
    pub fn build(
        model_id: &str,
        hyperparams: Hyperparams,
        tensors: &[QuantizedTensor],
        blob: &PackedBlob,
        chunks: &[Chunk],
    ) -> Result<Self> {
        let schema = ArchitectureSchema::new(hyperparams);
        schema.validate_set(tensors.iter().map(|t| (t.name.as_str(), t.shape.as_slice())))?;

        let width = tensors
            .first()
            .map(|t| t.width)
            .ok_or_else(|| ClientError::RegistryInvariant("model has no tensors".into()))?;

        let mut weights_info = BTreeMap::new();
        let mut scales = BTreeMap::new();
        for tensor in tensors {
            if tensor.width != width {
                return Err(ClientError::RegistryInvariant(format!(
                    "tensor {} is {}, model is {}",
                    tensor.name,
                    tensor.width.dtype(),
                    width.dtype()
                )));
            }
            let span = blob
                .spans
                .iter()
                .find(|s| s.name == tensor.name)
                .ok_or_else(|| {
                    ClientError::RegistryInvariant(format!("tensor {} missing from blob", tensor.name))
                })?;
            weights_info.insert(
                tensor.name.clone(),
                WeightInfo {
                    shape: tensor.shape.clone(),
                    dtype: width.dtype().to_string(),
                    size_bytes: tensor.size_bytes(),
                    offset: span.start,
                    original_dtype: "float32".to_string(),
                },
            );
            scales.insert(tensor.name.clone(), tensor.scale);
        }

        let mut entries = BTreeMap::new();
        for chunk in chunks {
            let owner = blob.span_at(chunk.start).ok_or_else(|| {
                ClientError::RegistryInvariant(format!(
                    "chunk {} starts at {} outside every tensor",
                    chunk.index, chunk.start
                ))
            })?;
            entries.insert(
                chunk.index,
                ChunkEntry {
                    path: chunk_file_name(chunk.index),
                    address: None,
                    size: chunk.size(),
                    start: chunk.start,
                    end: chunk.end,
                    chunk_type: schema.role_of(&owner.name)?.chunk_type(),
                },
            );
        }

        let registry = Self {
            schema_version: SCHEMA_VERSION,
            model_id: model_id.to_string(),
            config: ModelConfig {
                hyperparams,
                bits: width.bits(),
            },
            weights_info,
            scales,
            chunk_count: entries.len() as u32,
            chunks: entries,
            total_size: blob.len(),
            registry_address: None,
            authority: None,
        };
        registry.validate()?;
        Ok(registry)
    }

    /// Check every layout invariant of the manifest
    pub fn validate(&self) -> Result<()> {
        if self.schema_version != SCHEMA_VERSION {
            return Err(ClientError::RegistryInvariant(format!(
                "schema version {} is not supported (expected {})",
                self.schema_version, SCHEMA_VERSION
            )));
        }
        let width = self.bit_width()?;
        let schema = ArchitectureSchema::new(self.config.hyperparams);
        schema.validate_set(
            self.weights_info
                .iter()
                .map(|(name, info)| (name.as_str(), info.shape.as_slice())),
        )?;

        // Tensors tile the blob in name order
        let mut cursor = 0;
        for (name, info) in &self.weights_info {
            if info.dtype != width.dtype() {
                return Err(ClientError::RegistryInvariant(format!(
                    "tensor {} has dtype {}, model is {}",
                    name,
                    info.dtype,
                    width.dtype()
                )));
            }
            if info.offset != cursor {
                return Err(ClientError::RegistryInvariant(format!(
                    "tensor {} at offset {}, expected {}",
                    name, info.offset, cursor
                )));
            }
            if !self.scales.get(name).is_some_and(|s| s.is_finite() && *s > 0.0) {
                return Err(ClientError::RegistryInvariant(format!(
                    "tensor {} has no valid scale",
                    name
                )));
            }
            cursor = info.end();
        }
        if cursor != self.total_size {
            return Err(ClientError::RegistryInvariant(format!(
                "tensor sizes sum to {}, blob is {} bytes",
                cursor, self.total_size
            )));
        }

        // Chunks partition the blob
        if self.chunk_count as usize != self.chunks.len() {
            return Err(ClientError::RegistryInvariant(format!(
                "chunk_count {} but {} chunk entries",
                self.chunk_count,
                self.chunks.len()
            )));
        }
        let mut cursor = 0;
        for (expected_index, (index, entry)) in self.chunks.iter().enumerate() {
            if *index as usize != expected_index {
                return Err(ClientError::RegistryInvariant(format!(
                    "chunk indices are not dense: found {} at position {}",
                    index, expected_index
                )));
            }
            if entry.start != cursor || entry.end < entry.start || entry.size != entry.end - entry.start {
                return Err(ClientError::RegistryInvariant(format!(
                    "chunk {} covers [{}, {}) with size {}, expected to start at {}",
                    index, entry.start, entry.end, entry.size, cursor
                )));
            }
            cursor = entry.end;
        }
        if cursor != self.total_size {
            return Err(ClientError::RegistryInvariant(format!(
                "chunk sizes sum to {}, blob is {} bytes",
                cursor, self.total_size
            )));
        }

        Ok(())
    }

    pub fn hyperparams(&self) -> Hyperparams {
        self.config.hyperparams
    }

    pub fn bit_width(&self) -> Result<BitWidth> {
        BitWidth::from_bits(self.config.bits)
    }

    /// True while any chunk lacks a ledger address
    pub fn is_address_pending(&self) -> bool {
        self.chunks.values().any(|c| c.address.is_none())
    }

    pub fn pending_chunks(&self) -> Vec<u32> {
        self.chunks
            .iter()
            .filter(|(_, c)| c.address.is_none())
            .map(|(i, _)| *i)
            .collect()
    }

    pub fn record_address(&mut self, index: u32, address: Address) -> Result<()> {
        let entry = self.chunks.get_mut(&index).ok_or_else(|| {
            ClientError::RegistryInvariant(format!("no chunk with index {}", index))
        })?;
        entry.address = Some(address);
        Ok(())
    }

    /// Forget every chunk address, e.g. after publishing under a new registry
    pub fn clear_addresses(&mut self) {
        for entry in self.chunks.values_mut() {
            entry.address = None;
        }
    }

    /// Tensors in blob order with their byte spans
    pub fn tensor_spans(&self) -> Vec<TensorSpan> {
        let mut spans: Vec<TensorSpan> = self
            .weights_info
            .iter()
            .map(|(name, info)| TensorSpan {
                name: name.clone(),
                start: info.offset,
                end: info.end(),
            })
            .collect();
        spans.sort_by_key(|s| s.start);
        spans
    }

    /// Tensors overlapping `[start, end)`
    pub fn tensors_in_range(&self, start: usize, end: usize) -> Vec<String> {
        self.tensor_spans()
            .into_iter()
            .filter(|s| s.overlaps(start, end))
            .map(|s| s.name)
            .collect()
    }

    /// Save as pretty JSON
    pub fn save(&self, path: &Path) -> Result<()> {
        let json = serde_json::to_string_pretty(self)?;
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, json).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to write registry manifest");
            e
        })?;

        info!(
            path = %path.display(),
            model_id = %self.model_id,
            chunks = self.chunk_count,
            "Saved registry manifest"
        );
        Ok(())
    }

    /// Load and validate a manifest
    pub fn load(path: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(path).map_err(|e| {
            error!(path = %path.display(), error = %e, "Failed to read registry manifest");
            e
        })?;
        let registry: ModelRegistry = serde_json::from_str(&content)?;
        registry.validate()?;
        Ok(registry)
    }

    /// Load from a model directory, preferring the uploaded manifest
    pub fn load_dir(dir: &Path) -> Result<Self> {
        let uploaded = dir.join(UPLOADED_MANIFEST_FILE);
        if uploaded.exists() {
            Self::load(&uploaded)
        } else {
            Self::load(&dir.join(MANIFEST_FILE))
        }
    }
}
