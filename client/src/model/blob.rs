//! Blob packing and chunk splitting
//!
//! Quantized tensors are concatenated in name order into one binary blob.
//! The blob is then cut into contiguous chunks that each fit under the
//! ledger's record ceiling:
//!
//! ```text
//! num_chunks = ceil(total / max_chunk_size)
//! chunk_size = min(ceil(total / num_chunks), max_chunk_size)
//! chunk i    = [i * chunk_size, min((i + 1) * chunk_size, total))
//! ```

use serde::{Deserialize, Serialize};

use crate::errors::{ClientError, Result};
use crate::model::quantize::QuantizedTensor;

/// Default chunk payload ceiling in bytes
pub const DEFAULT_MAX_CHUNK_SIZE: usize = 256 * 512;

/// Byte range of one tensor inside the blob
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct TensorSpan {
    pub name: String,
    pub start: usize,
    pub end: usize,
}

impl TensorSpan {
    pub fn size(&self) -> usize {
        self.end - self.start
    }

    pub fn overlaps(&self, start: usize, end: usize) -> bool {
        self.start < end && start < self.end
    }
}

/// Concatenated tensor bytes plus where each tensor sits
#[derive(Debug, Clone, PartialEq)]
pub struct PackedBlob {
    pub bytes: Vec<u8>,
    pub spans: Vec<TensorSpan>,
}

impl PackedBlob {
    pub fn len(&self) -> usize {
        self.bytes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.bytes.is_empty()
    }

    /// Tensor owning byte `offset`
    pub fn span_at(&self, offset: usize) -> Option<&TensorSpan> {
        self.spans.iter().find(|s| s.start <= offset && offset < s.end)
    }
}

/// One contiguous piece of the blob
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Chunk {
    pub index: u32,
    pub start: usize,
    pub end: usize,
    pub data: Vec<u8>,
}

impl Chunk {
    pub fn size(&self) -> usize {
        self.end - self.start
    }
}

/// Concatenate tensors in name order.
pub fn pack(tensors: &[QuantizedTensor]) -> PackedBlob {
    let mut ordered: Vec<&QuantizedTensor> = tensors.iter().collect();
    ordered.sort_by(|a, b| a.name.cmp(&b.name));

    let total = ordered.iter().map(|t| t.size_bytes()).sum();
    let mut bytes = Vec::with_capacity(total);
    let mut spans = Vec::with_capacity(ordered.len());

    for tensor in ordered {
        let start = bytes.len();
        bytes.extend_from_slice(&tensor.bytes);
        spans.push(TensorSpan {
            name: tensor.name.clone(),
            start,
            end: bytes.len(),
        });
    }

    PackedBlob { bytes, spans }
}

/// Chunk boundaries for a blob of `total` bytes. An empty blob has no chunks.
pub fn plan_chunks(total: usize, max_chunk_size: i64) -> Result<Vec<(usize, usize)>> {
    if max_chunk_size <= 0 {
        return Err(ClientError::InvalidChunkSize(max_chunk_size));
    }
    if total == 0 {
        return Ok(Vec::new());
    }

    let max = max_chunk_size as usize;
    let num_chunks = total.div_ceil(max);
    let chunk_size = total.div_ceil(num_chunks).min(max);

    Ok((0..num_chunks)
        .map(|i| (i * chunk_size, ((i + 1) * chunk_size).min(total)))
        .collect())
}

pub fn split(blob: &[u8], max_chunk_size: i64) -> Result<Vec<Chunk>> {
    Ok(plan_chunks(blob.len(), max_chunk_size)?
        .into_iter()
        .enumerate()
        .map(|(index, (start, end))| Chunk {
            index: index as u32,
            start,
            end,
            data: blob[start..end].to_vec(),
        })
        .collect())
}
