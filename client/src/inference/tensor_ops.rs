//! Tensor operations for the reference forward pass
//!
//! Row-major f32 matrices and vectors with the handful of operations the
//! block needs: matmul, tanh, softmax, embedding lookup and argmax.

use crate::errors::{ClientError, Result};
use crate::model::weights::FloatTensor;

/// 2D tensor
///
/// Shape convention: [sequence_length, features]
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor2D {
    /// Row-major data storage
    pub data: Vec<f32>,
    pub rows: usize,
    pub cols: usize,
}

impl Tensor2D {
    pub fn new(data: Vec<f32>, rows: usize, cols: usize) -> Result<Self> {
        if data.len() != rows * cols {
            return Err(ClientError::Inference(format!(
                "Data length {} doesn't match shape {}x{}={}",
                data.len(),
                rows,
                cols,
                rows * cols
            )));
        }
        Ok(Self { data, rows, cols })
    }

    pub fn zeros(rows: usize, cols: usize) -> Self {
        Self {
            data: vec![0.0; rows * cols],
            rows,
            cols,
        }
    }

    /// View a rank-2 float tensor as a matrix
    pub fn from_float(tensor: &FloatTensor) -> Result<Self> {
        match tensor.shape.as_slice() {
            [rows, cols] => Self::new(tensor.data.clone(), *rows, *cols),
            shape => Err(ClientError::Inference(format!(
                "Tensor {} has shape {:?}, expected 2 dimensions",
                tensor.name, shape
            ))),
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> f32 {
        self.data[row * self.cols + col]
    }

    pub fn row(&self, row: usize) -> &[f32] {
        let start = row * self.cols;
        &self.data[start..start + self.cols]
    }

    /// Last row as a 1×cols matrix
    pub fn last_row(&self) -> Result<Tensor2D> {
        if self.rows == 0 {
            return Err(ClientError::Inference("Tensor has no rows".to_string()));
        }
        Tensor2D::new(self.row(self.rows - 1).to_vec(), 1, self.cols)
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

/// 1D tensor (vector)
#[derive(Debug, Clone, PartialEq)]
pub struct Tensor1D {
    pub data: Vec<f32>,
}

impl Tensor1D {
    pub fn new(data: Vec<f32>) -> Self {
        Self { data }
    }

    pub fn len(&self) -> usize {
        self.data.len()
    }

    pub fn is_empty(&self) -> bool {
        self.data.is_empty()
    }
}

// ============== Matrix Operations ==============

/// Matrix multiplication: A[m, k] @ B[k, n] -> C[m, n]
pub fn matmul(a: &Tensor2D, b: &Tensor2D) -> Result<Tensor2D> {
    if a.cols != b.rows {
        return Err(ClientError::Inference(format!(
            "Matmul shape mismatch: {}x{} @ {}x{}",
            a.rows, a.cols, b.rows, b.cols
        )));
    }

    let m = a.rows;
    let k = a.cols;
    let n = b.cols;

    let mut result = vec![0.0; m * n];

    // i-p-j order keeps the inner loop on contiguous rows of B
    for i in 0..m {
        for p in 0..k {
            let a_ip = a.data[i * k + p];
            for j in 0..n {
                result[i * n + j] += a_ip * b.data[p * n + j];
            }
        }
    }

    Ok(Tensor2D {
        data: result,
        rows: m,
        cols: n,
    })
}

// ============== Activation Functions ==============

/// Element-wise hyperbolic tangent
pub fn tanh(tensor: &Tensor2D) -> Tensor2D {
    Tensor2D {
        data: tensor.data.iter().map(|x| x.tanh()).collect(),
        rows: tensor.rows,
        cols: tensor.cols,
    }
}

// ============== Softmax ==============

/// Softmax for a single row of logits. Entries at -inf get probability 0.
pub fn softmax_1d(tensor: &Tensor1D) -> Tensor1D {
    let max_val = tensor.data.iter().cloned().fold(f32::NEG_INFINITY, f32::max);
    if !max_val.is_finite() {
        return Tensor1D::new(vec![0.0; tensor.len()]);
    }
    let exp: Vec<f32> = tensor.data.iter().map(|x| (x - max_val).exp()).collect();
    let sum: f32 = exp.iter().sum();

    Tensor1D {
        data: exp.iter().map(|x| x / sum).collect(),
    }
}

/// Index of the largest value; ties go to the lowest index
pub fn argmax(tensor: &Tensor1D) -> u32 {
    let mut max_idx = 0;
    let mut max_val = f32::NEG_INFINITY;

    for (i, &val) in tensor.data.iter().enumerate() {
        if val > max_val {
            max_val = val;
            max_idx = i;
        }
    }

    max_idx as u32
}

// ============== Embedding Operations ==============

/// Look up rows of `embedding_table` [vocab_size, embedding_dim] for `tokens`
pub fn embed_tokens(embedding_table: &Tensor2D, tokens: &[u32]) -> Result<Tensor2D> {
    let dim = embedding_table.cols;
    let mut data = Vec::with_capacity(tokens.len() * dim);

    for &token in tokens {
        let token_idx = token as usize;
        if token_idx >= embedding_table.rows {
            return Err(ClientError::Inference(format!(
                "Token {} out of vocabulary bounds {}",
                token, embedding_table.rows
            )));
        }
        data.extend_from_slice(embedding_table.row(token_idx));
    }

    Ok(Tensor2D {
        data,
        rows: tokens.len(),
        cols: dim,
    })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_tensor2d_creation() {
        let t = Tensor2D::new(vec![1.0, 2.0, 3.0, 4.0], 2, 2).unwrap();
        assert_eq!(t.get(0, 0), 1.0);
        assert_eq!(t.get(1, 1), 4.0);
        assert!(Tensor2D::new(vec![1.0; 3], 2, 2).is_err());
    }

    #[test]
    fn test_matmul() {
        // [2,3] @ [3,2] = [2,2]
        let a = Tensor2D::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 2, 3).unwrap();
        let b = Tensor2D::new(vec![1.0, 2.0, 3.0, 4.0, 5.0, 6.0], 3, 2).unwrap();
        let c = matmul(&a, &b).unwrap();

        assert_eq!((c.rows, c.cols), (2, 2));
        // [1,2,3] @ [1,3,5; 2,4,6] = [22, 28]
        assert_eq!(c.get(0, 0), 22.0);
        assert_eq!(c.get(0, 1), 28.0);
        assert!(matmul(&b, &b).is_err());
    }

    #[test]
    fn test_tanh_bounds() {
        let t = Tensor2D::new(vec![-100.0, 0.0, 0.5, 100.0], 1, 4).unwrap();
        let result = tanh(&t);
        assert_eq!(result.get(0, 1), 0.0);
        assert!(result.data.iter().all(|v| (-1.0..=1.0).contains(v)));
    }

    #[test]
    fn test_softmax_masks_negative_infinity() {
        let t = Tensor1D::new(vec![1.0, f32::NEG_INFINITY, 2.0]);
        let probs = softmax_1d(&t);
        assert_eq!(probs.data[1], 0.0);
        assert!((probs.data.iter().sum::<f32>() - 1.0).abs() < 1e-6);
        assert!(probs.data[2] > probs.data[0]);
    }

    #[test]
    fn test_argmax_prefers_lowest_index() {
        assert_eq!(argmax(&Tensor1D::new(vec![1.0, 5.0, 2.0, 5.0])), 1);
    }

    #[test]
    fn test_embed_tokens() {
        // 4 tokens x 3 dim embedding
        let embedding = Tensor2D::new(
            vec![0.1, 0.2, 0.3, 0.4, 0.5, 0.6, 0.7, 0.8, 0.9, 1.0, 1.1, 1.2],
            4,
            3,
        )
        .unwrap();

        let result = embed_tokens(&embedding, &[0, 2, 1]).unwrap();
        assert_eq!((result.rows, result.cols), (3, 3));
        assert_eq!(result.get(0, 0), 0.1);
        assert_eq!(result.get(1, 0), 0.7);
        assert_eq!(result.get(2, 0), 0.4);
        assert!(embed_tokens(&embedding, &[4]).is_err());
    }
}
