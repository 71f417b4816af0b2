//! Float weights on disk (safetensors) and the reference initializer

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use safetensors::tensor::TensorView;
use safetensors::{Dtype, SafeTensors};
use std::path::Path;
use tracing::info;

use crate::errors::{ClientError, Result};
use crate::model::schema::ArchitectureSchema;
use ledger::Hyperparams;

/// Named float32 tensor, row-major
#[derive(Debug, Clone, PartialEq)]
pub struct FloatTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub data: Vec<f32>,
}

impl FloatTensor {
    pub fn new(name: impl Into<String>, shape: Vec<usize>, data: Vec<f32>) -> Result<Self> {
        let name = name.into();
        let expected: usize = shape.iter().product();
        if expected != data.len() {
            return Err(ClientError::ShapeMismatch {
                tensor: name,
                expected,
                found: data.len(),
            });
        }
        Ok(Self { name, shape, data })
    }

    pub fn element_count(&self) -> usize {
        self.data.len()
    }
}

/// Read every tensor of a safetensors file as float32.
pub fn load_safetensors(path: &Path) -> Result<Vec<FloatTensor>> {
    let bytes = std::fs::read(path)?;
    let file = SafeTensors::deserialize(&bytes)?;

    let mut tensors = Vec::new();
    for (name, view) in file.tensors() {
        if view.dtype() != Dtype::F32 {
            return Err(ClientError::Weights(format!(
                "Tensor {} has dtype {:?}, only F32 is supported",
                name,
                view.dtype()
            )));
        }
        let data: Vec<f32> = view
            .data()
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        tensors.push(FloatTensor::new(name, view.shape().to_vec(), data)?);
    }
    tensors.sort_by(|a, b| a.name.cmp(&b.name));

    info!(path = %path.display(), tensors = tensors.len(), "Loaded float weights");
    Ok(tensors)
}

/// Write tensors to a safetensors file as float32.
pub fn save_safetensors(path: &Path, tensors: &[FloatTensor]) -> Result<()> {
    let buffers: Vec<(String, Vec<usize>, Vec<u8>)> = tensors
        .iter()
        .map(|t| {
            (
                t.name.clone(),
                t.shape.clone(),
                t.data.iter().flat_map(|f| f.to_le_bytes()).collect(),
            )
        })
        .collect();

    let mut views = Vec::with_capacity(buffers.len());
    for (name, shape, data) in &buffers {
        views.push((name.clone(), TensorView::new(Dtype::F32, shape.clone(), data)?));
    }

    let bytes = safetensors::tensor::serialize(views, &None)?;
    if let Some(parent) = path.parent() {
        std::fs::create_dir_all(parent)?;
    }
    std::fs::write(path, bytes)?;

    info!(path = %path.display(), tensors = tensors.len(), "Saved float weights");
    Ok(())
}

/// Randomly initialized model for `hyperparams`, deterministic in `seed`.
///
/// Values are uniform in `±1/sqrt(fan_in)`, which keeps tanh activations out
/// of saturation for small models.
pub fn random_model(hyperparams: &Hyperparams, seed: u64) -> Result<Vec<FloatTensor>> {
    let schema = ArchitectureSchema::new(*hyperparams);
    let mut rng = StdRng::seed_from_u64(seed);

    schema
        .tensor_names()
        .into_iter()
        .map(|name| {
            let shape = schema.expected_shape_of(&name)?;
            let limit = 1.0 / (shape[0] as f32).sqrt();
            let data = (0..shape[0] * shape[1])
                .map(|_| rng.gen_range(-limit..=limit))
                .collect();
            FloatTensor::new(name, shape.to_vec(), data)
        })
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;
    use tempfile::TempDir;

    fn hyperparams() -> Hyperparams {
        Hyperparams {
            vocab_size: 16,
            embedding_dim: 4,
            hidden_dim: 8,
            context_length: 8,
            layer_count: 2,
        }
    }

    #[test]
    fn test_float_tensor_shape_check() {
        assert!(FloatTensor::new("t", vec![2, 3], vec![0.0; 6]).is_ok());
        let err = FloatTensor::new("t", vec![2, 3], vec![0.0; 5]).unwrap_err();
        assert!(matches!(err, ClientError::ShapeMismatch { expected: 6, found: 5, .. }));
    }

    #[test]
    fn test_random_model_matches_schema() {
        let tensors = random_model(&hyperparams(), 7).unwrap();
        let names: Vec<&str> = tensors.iter().map(|t| t.name.as_str()).collect();
        assert_eq!(
            names,
            vec![
                "layer_0.attention.weight",
                "layer_0.ffn.weight",
                "layer_1.attention.weight",
                "layer_1.ffn.weight",
                "output.weight",
                "token_embedding.weight",
            ]
        );
        assert_eq!(tensors[0].shape, vec![4, 8]);
        assert_eq!(tensors[1].shape, vec![8, 4]);
        assert_eq!(tensors[4].shape, vec![4, 16]);
        assert_eq!(tensors[5].shape, vec![16, 4]);
    }

    #[test]
    fn test_random_model_is_deterministic() {
        let a = random_model(&hyperparams(), 7).unwrap();
        let b = random_model(&hyperparams(), 7).unwrap();
        let c = random_model(&hyperparams(), 8).unwrap();
        assert_eq!(a, b);
        assert_ne!(a, c);
    }

    #[test]
    fn test_safetensors_roundtrip() {
        let temp_dir = TempDir::new().unwrap();
        let path = temp_dir.path().join("model.safetensors");
        let tensors = random_model(&hyperparams(), 1).unwrap();

        save_safetensors(&path, &tensors).unwrap();
        let loaded = load_safetensors(&path).unwrap();
        assert_eq!(loaded, tensors);
    }
}
