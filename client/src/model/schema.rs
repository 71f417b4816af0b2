//! Architecture schema: the fixed set of tensor names and shapes a model of a
//! given topology may contain.
//!
//! Version 1 layout for hyperparameters `(V, E, H, C, L)`:
//!
//! | tensor                        | shape    | chunk type |
//! |-------------------------------|----------|------------|
//! | `token_embedding.weight`      | `[V, E]` | embedding  |
//! | `layer_{i}.attention.weight`  | `[E, H]` | attention  |
//! | `layer_{i}.ffn.weight`        | `[H, E]` | ffn        |
//! | `output.weight`               | `[E, V]` | output     |

use ledger::{ChunkType, Hyperparams};

use crate::errors::{ClientError, Result};
use crate::model::weights::FloatTensor;

pub const SCHEMA_VERSION: u32 = 1;

pub const EMBEDDING_TENSOR: &str = "token_embedding.weight";
pub const OUTPUT_TENSOR: &str = "output.weight";

/// What a tensor is, parsed from its name
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum TensorRole {
    Embedding,
    Attention(usize),
    Ffn(usize),
    Output,
}

impl TensorRole {
    pub fn parse(name: &str) -> Option<Self> {
        match name {
            EMBEDDING_TENSOR => return Some(TensorRole::Embedding),
            OUTPUT_TENSOR => return Some(TensorRole::Output),
            _ => {}
        }

        let rest = name.strip_prefix("layer_")?;
        let (index, kind) = rest.split_once('.')?;
        // Reject "layer_01" and friends so every role has exactly one name
        if index.is_empty() || (index.len() > 1 && index.starts_with('0')) {
            return None;
        }
        let index: usize = index.parse().ok()?;
        match kind {
            "attention.weight" => Some(TensorRole::Attention(index)),
            "ffn.weight" => Some(TensorRole::Ffn(index)),
            _ => None,
        }
    }

    pub fn name(&self) -> String {
        match self {
            TensorRole::Embedding => EMBEDDING_TENSOR.to_string(),
            TensorRole::Attention(i) => format!("layer_{}.attention.weight", i),
            TensorRole::Ffn(i) => format!("layer_{}.ffn.weight", i),
            TensorRole::Output => OUTPUT_TENSOR.to_string(),
        }
    }

    pub fn chunk_type(&self) -> ChunkType {
        match self {
            TensorRole::Embedding => ChunkType::Embedding,
            TensorRole::Attention(_) => ChunkType::Attention,
            TensorRole::Ffn(_) => ChunkType::Ffn,
            TensorRole::Output => ChunkType::Output,
        }
    }
}

/// Schema bound to one topology
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ArchitectureSchema {
    hyperparams: Hyperparams,
}

impl ArchitectureSchema {
    pub fn new(hyperparams: Hyperparams) -> Self {
        Self { hyperparams }
    }

    pub fn hyperparams(&self) -> &Hyperparams {
        &self.hyperparams
    }

    pub fn expected_shape(&self, role: TensorRole) -> [usize; 2] {
        let v = self.hyperparams.vocab_size as usize;
        let e = self.hyperparams.embedding_dim as usize;
        let h = self.hyperparams.hidden_dim as usize;
        match role {
            TensorRole::Embedding => [v, e],
            TensorRole::Attention(_) => [e, h],
            TensorRole::Ffn(_) => [h, e],
            TensorRole::Output => [e, v],
        }
    }

    pub fn expected_shape_of(&self, name: &str) -> Result<[usize; 2]> {
        Ok(self.expected_shape(self.role_of(name)?))
    }

    /// Resolve a tensor name to its role, rejecting names outside the schema
    pub fn role_of(&self, name: &str) -> Result<TensorRole> {
        let role = TensorRole::parse(name).ok_or_else(|| ClientError::UnknownTensor(name.to_string()))?;
        match role {
            TensorRole::Attention(i) | TensorRole::Ffn(i)
                if i >= self.hyperparams.layer_count as usize =>
            {
                Err(ClientError::UnknownTensor(name.to_string()))
            }
            _ => Ok(role),
        }
    }

    /// Full tensor set for the topology, in name order
    pub fn tensor_names(&self) -> Vec<String> {
        let mut names = vec![EMBEDDING_TENSOR.to_string(), OUTPUT_TENSOR.to_string()];
        for i in 0..self.hyperparams.layer_count as usize {
            names.push(TensorRole::Attention(i).name());
            names.push(TensorRole::Ffn(i).name());
        }
        names.sort();
        names
    }

    /// Check one tensor's name and shape
    pub fn validate_tensor(&self, name: &str, shape: &[usize]) -> Result<TensorRole> {
        let role = self.role_of(name)?;
        let expected = self.expected_shape(role);
        if shape != expected {
            return Err(ClientError::SchemaViolation {
                tensor: name.to_string(),
                reason: format!("shape {:?}, expected {:?}", shape, expected),
            });
        }
        Ok(role)
    }

    /// Check a whole tensor set. Embedding and output are required; layers
    /// must form a prefix `0..n` with both tensors present. Returns `n`.
    pub fn validate_set<'a>(&self, tensors: impl IntoIterator<Item = (&'a str, &'a [usize])>) -> Result<usize> {
        let mut has_embedding = false;
        let mut has_output = false;
        let layer_count = self.hyperparams.layer_count as usize;
        let mut attention = vec![false; layer_count];
        let mut ffn = vec![false; layer_count];

        for (name, shape) in tensors {
            match self.validate_tensor(name, shape)? {
                TensorRole::Embedding => has_embedding = true,
                TensorRole::Output => has_output = true,
                TensorRole::Attention(i) => attention[i] = true,
                TensorRole::Ffn(i) => ffn[i] = true,
            }
        }

        for (present, name) in [(has_embedding, EMBEDDING_TENSOR), (has_output, OUTPUT_TENSOR)] {
            if !present {
                return Err(ClientError::SchemaViolation {
                    tensor: name.to_string(),
                    reason: "required tensor is missing".to_string(),
                });
            }
        }

        let present = (0..layer_count).take_while(|&i| attention[i] && ffn[i]).count();
        for i in present..layer_count {
            if attention[i] || ffn[i] {
                let name = if attention[i] {
                    TensorRole::Attention(i).name()
                } else {
                    TensorRole::Ffn(i).name()
                };
                return Err(ClientError::SchemaViolation {
                    tensor: name,
                    reason: format!("layers must be a contiguous prefix, only 0..{} are complete", present),
                });
            }
        }

        Ok(present)
    }
}

/// Derive hyperparameters from tensor shapes. `context_length` is not
/// recoverable from weights and must be supplied.
pub fn infer_hyperparams(tensors: &[FloatTensor], context_length: u32) -> Result<Hyperparams> {
    let find = |name: &str| tensors.iter().find(|t| t.name == name);
    let two_dims = |t: &FloatTensor| -> Result<(u32, u32)> {
        match t.shape.as_slice() {
            [rows, cols] => Ok((*rows as u32, *cols as u32)),
            other => Err(ClientError::SchemaViolation {
                tensor: t.name.clone(),
                reason: format!("expected a 2-D tensor, got shape {:?}", other),
            }),
        }
    };

    let embedding = find(EMBEDDING_TENSOR).ok_or_else(|| ClientError::SchemaViolation {
        tensor: EMBEDDING_TENSOR.to_string(),
        reason: "required tensor is missing".to_string(),
    })?;
    let (vocab_size, embedding_dim) = two_dims(embedding)?;

    let mut layer_count = 0u32;
    let mut hidden_dim = None;
    while let (Some(attention), Some(_)) = (
        find(&TensorRole::Attention(layer_count as usize).name()),
        find(&TensorRole::Ffn(layer_count as usize).name()),
    ) {
        hidden_dim.get_or_insert(two_dims(attention)?.1);
        layer_count += 1;
    }

    Ok(Hyperparams {
        vocab_size,
        embedding_dim,
        // A layerless model has no hidden width; keep it equal to the embedding
        hidden_dim: hidden_dim.unwrap_or(embedding_dim),
        context_length,
        layer_count,
    })
}
