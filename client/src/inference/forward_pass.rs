//! Reference forward pass
//!
//! ```text
//! tokens [T]
//!    │  embedding lookup            token_embedding.weight [V, E]
//!    ▼
//! x [T, E]
//!    │  for each available layer:
//!    │    attn = tanh(x · A)        layer_i.attention.weight [E, H]
//!    │    x    = tanh(attn · F)     layer_i.ffn.weight [H, E]
//!    ▼
//! x_last [1, E]
//!    │  output projection           output.weight [E, V]
//!    ▼
//! logits [V]
//! ```
//!
//! A layer is available when both of its tensors are present. Only the leading
//! run of available layers up to `layer_count` is used, so a model published
//! with fewer layers than declared still runs.

use ledger::Hyperparams;
use std::collections::BTreeMap;
use std::time::Instant;
use tracing::{debug, warn};

use crate::errors::{ClientError, Result};
use crate::loader::LoadedModel;
use crate::model::schema::{TensorRole, EMBEDDING_TENSOR, OUTPUT_TENSOR};
use crate::model::weights::FloatTensor;

use super::tensor_ops::{embed_tokens, matmul, tanh, Tensor1D, Tensor2D};

/// Weights for one block
#[derive(Debug, Clone)]
pub struct LayerWeights {
    pub layer_idx: usize,
    /// [embedding_dim, hidden_dim]
    pub attention: Tensor2D,
    /// [hidden_dim, embedding_dim]
    pub ffn: Tensor2D,
}

impl LayerWeights {
    pub fn memory_usage(&self) -> usize {
        (self.attention.len() + self.ffn.len()) * 4
    }
}

/// Float weights in the shape the forward pass consumes
#[derive(Debug, Clone)]
pub struct ModelWeights {
    pub model_id: String,
    pub hyperparams: Hyperparams,
    /// [vocab_size, embedding_dim]
    pub embedding: Tensor2D,
    pub layers: Vec<LayerWeights>,
    /// [embedding_dim, vocab_size]
    pub output: Tensor2D,
}

fn require<'a>(tensors: &'a BTreeMap<String, FloatTensor>, name: &str) -> Result<&'a FloatTensor> {
    tensors
        .get(name)
        .ok_or_else(|| ClientError::Inference(format!("Required tensor {} is missing", name)))
}

fn check_dims(name: &str, tensor: &Tensor2D, rows: usize, cols: usize) -> Result<()> {
    if tensor.rows != rows || tensor.cols != cols {
        return Err(ClientError::Inference(format!(
            "Tensor {} is {}x{}, expected {}x{}",
            name, tensor.rows, tensor.cols, rows, cols
        )));
    }
    Ok(())
}

impl ModelWeights {
    pub fn from_loaded(model: &LoadedModel) -> Result<Self> {
        Self::from_tensors(&model.model_id, model.hyperparams, &model.tensors)
    }

    pub fn from_tensors(
        model_id: &str,
        hyperparams: Hyperparams,
        tensors: &BTreeMap<String, FloatTensor>,
    ) -> Result<Self> {
        let vocab = hyperparams.vocab_size as usize;
        let embed = hyperparams.embedding_dim as usize;
        let hidden = hyperparams.hidden_dim as usize;

        let embedding = Tensor2D::from_float(require(tensors, EMBEDDING_TENSOR)?)?;
        check_dims(EMBEDDING_TENSOR, &embedding, vocab, embed)?;
        let output = Tensor2D::from_float(require(tensors, OUTPUT_TENSOR)?)?;
        check_dims(OUTPUT_TENSOR, &output, embed, vocab)?;

        let mut layers = Vec::new();
        for layer_idx in 0..hyperparams.layer_count as usize {
            let attention_name = TensorRole::Attention(layer_idx).name();
            let ffn_name = TensorRole::Ffn(layer_idx).name();
            let (Some(attention), Some(ffn)) = (tensors.get(&attention_name), tensors.get(&ffn_name))
            else {
                break;
            };

            let attention = Tensor2D::from_float(attention)?;
            check_dims(&attention_name, &attention, embed, hidden)?;
            let ffn = Tensor2D::from_float(ffn)?;
            check_dims(&ffn_name, &ffn, hidden, embed)?;
            layers.push(LayerWeights {
                layer_idx,
                attention,
                ffn,
            });
        }

        if layers.len() < hyperparams.layer_count as usize {
            warn!(
                model_id = %model_id,
                declared = hyperparams.layer_count,
                available = layers.len(),
                "Running with fewer layers than declared"
            );
        }

        Ok(Self {
            model_id: model_id.to_string(),
            hyperparams,
            embedding,
            layers,
            output,
        })
    }

    pub fn available_layers(&self) -> usize {
        self.layers.len()
    }

    /// Total f32 bytes held
    pub fn memory_usage(&self) -> usize {
        let layer_mem: usize = self.layers.iter().map(|l| l.memory_usage()).sum();
        layer_mem + (self.embedding.len() + self.output.len()) * 4
    }
}

/// Single-process forward pass
pub struct LocalForwardPass {
    pub weights: ModelWeights,
}

impl LocalForwardPass {
    pub fn new(weights: ModelWeights) -> Self {
        Self { weights }
    }

    /// Hidden states [T, E] after every available block
    pub fn hidden_states(&self, tokens: &[u32]) -> Result<Tensor2D> {
        if tokens.is_empty() {
            return Err(ClientError::Inference("Cannot run forward pass on an empty context".to_string()));
        }

        let mut hidden = embed_tokens(&self.weights.embedding, tokens)?;
        for layer in &self.weights.layers {
            let attn = tanh(&matmul(&hidden, &layer.attention)?);
            hidden = tanh(&matmul(&attn, &layer.ffn)?);
        }
        Ok(hidden)
    }

    /// Logits [V] for the position after the last token
    pub fn forward(&self, tokens: &[u32]) -> Result<Tensor1D> {
        let start = Instant::now();
        let hidden = self.hidden_states(tokens)?;
        let logits = matmul(&hidden.last_row()?, &self.weights.output)?;

        debug!(
            tokens = tokens.len(),
            layers = self.weights.layers.len(),
            elapsed_us = start.elapsed().as_micros() as u64,
            "Forward pass complete"
        );
        Ok(Tensor1D::new(logits.data))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::model::weights::random_model;

    fn hyperparams() -> Hyperparams {
        Hyperparams {
            vocab_size: 32,
            embedding_dim: 8,
            hidden_dim: 16,
            context_length: 8,
            layer_count: 2,
        }
    }

    fn tensors(hp: &Hyperparams) -> BTreeMap<String, FloatTensor> {
        random_model(hp, 5)
            .unwrap()
            .into_iter()
            .map(|t| (t.name.clone(), t))
            .collect()
    }

    #[test]
    fn test_weights_from_tensors() {
        let hp = hyperparams();
        let weights = ModelWeights::from_tensors("tiny", hp, &tensors(&hp)).unwrap();
        assert_eq!(weights.available_layers(), 2);
        // (32*8 + 2*(8*16 + 16*8) + 8*32) * 4
        assert_eq!(weights.memory_usage(), (256 + 512 + 256) * 4);
    }

    #[test]
    fn test_missing_layer_truncates_stack() {
        let hp = hyperparams();
        let mut map = tensors(&hp);
        map.remove("layer_1.ffn.weight");
        let weights = ModelWeights::from_tensors("tiny", hp, &map).unwrap();
        assert_eq!(weights.available_layers(), 1);

        map.remove("layer_0.attention.weight");
        let weights = ModelWeights::from_tensors("tiny", hp, &map).unwrap();
        // layer_1.attention alone does not make layer 1 available
        assert_eq!(weights.available_layers(), 0);
    }

    #[test]
    fn test_missing_embedding_is_an_error() {
        let hp = hyperparams();
        let mut map = tensors(&hp);
        map.remove(EMBEDDING_TENSOR);
        let err = ModelWeights::from_tensors("tiny", hp, &map).unwrap_err();
        assert!(err.to_string().contains(EMBEDDING_TENSOR));
    }

    #[test]
    fn test_forward_produces_vocab_logits() {
        let hp = hyperparams();
        let forward = LocalForwardPass::new(ModelWeights::from_tensors("tiny", hp, &tensors(&hp)).unwrap());

        let hidden = forward.hidden_states(&[1, 2, 3]).unwrap();
        assert_eq!((hidden.rows, hidden.cols), (3, 8));
        assert!(hidden.data.iter().all(|v| (-1.0..=1.0).contains(v)));

        let logits = forward.forward(&[1, 2, 3]).unwrap();
        assert_eq!(logits.len(), 32);
        assert!(forward.forward(&[]).is_err());
        assert!(forward.forward(&[32]).is_err());
    }

    #[test]
    fn test_logits_depend_only_on_rows_up_to_last() {
        let hp = hyperparams();
        let forward = LocalForwardPass::new(ModelWeights::from_tensors("tiny", hp, &tensors(&hp)).unwrap());
        // Blocks are position-wise, so the last token alone decides the logits
        assert_eq!(forward.forward(&[4, 9]).unwrap(), forward.forward(&[9]).unwrap());
    }
}
