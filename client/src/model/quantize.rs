//! Symmetric max-abs quantization
//!
//! For bit width `b` the scale is `(2^(b-1) - 1) / max|t|` (1.0 for an all-zero
//! tensor). Elements are mapped with `round(x * scale)`, rounding half to
//! even, computed in f64 and clamped to the signed range of `b` bits.
//! Dequantization is `q / scale`, so the reconstruction error of every
//! element is at most `1 / (2 * scale)`.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::errors::{ClientError, Result};
use crate::model::weights::FloatTensor;

/// Supported integer widths
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum BitWidth {
    Int8,
    Int16,
    Int32,
}

impl BitWidth {
    pub fn from_bits(bits: u32) -> Result<Self> {
        match bits {
            8 => Ok(BitWidth::Int8),
            16 => Ok(BitWidth::Int16),
            32 => Ok(BitWidth::Int32),
            other => Err(ClientError::UnsupportedBitWidth(other)),
        }
    }

    pub fn from_dtype(dtype: &str) -> Result<Self> {
        match dtype {
            "int8" => Ok(BitWidth::Int8),
            "int16" => Ok(BitWidth::Int16),
            "int32" => Ok(BitWidth::Int32),
            other => Err(ClientError::Serialization(format!("Unknown dtype tag: {}", other))),
        }
    }

    pub fn bits(self) -> u32 {
        match self {
            BitWidth::Int8 => 8,
            BitWidth::Int16 => 16,
            BitWidth::Int32 => 32,
        }
    }

    pub fn dtype(self) -> &'static str {
        match self {
            BitWidth::Int8 => "int8",
            BitWidth::Int16 => "int16",
            BitWidth::Int32 => "int32",
        }
    }

    /// Bytes per serialized element
    pub fn element_size(self) -> usize {
        self.bits() as usize / 8
    }

    /// Largest representable level, `2^(b-1) - 1`
    pub fn max_level(self) -> i64 {
        (1i64 << (self.bits() - 1)) - 1
    }

    pub fn min_level(self) -> i64 {
        -(1i64 << (self.bits() - 1))
    }

    fn write(self, out: &mut Vec<u8>, q: i64) {
        match self {
            BitWidth::Int8 => out.extend_from_slice(&(q as i8).to_le_bytes()),
            BitWidth::Int16 => out.extend_from_slice(&(q as i16).to_le_bytes()),
            BitWidth::Int32 => out.extend_from_slice(&(q as i32).to_le_bytes()),
        }
    }

    fn read(self, bytes: &[u8]) -> i64 {
        match self {
            BitWidth::Int8 => bytes[0] as i8 as i64,
            BitWidth::Int16 => i16::from_le_bytes([bytes[0], bytes[1]]) as i64,
            BitWidth::Int32 => i32::from_le_bytes([bytes[0], bytes[1], bytes[2], bytes[3]]) as i64,
        }
    }
}

/// Quantized tensor with its serialized little-endian integer bytes
#[derive(Debug, Clone, PartialEq)]
pub struct QuantizedTensor {
    pub name: String,
    pub shape: Vec<usize>,
    pub width: BitWidth,
    pub scale: f64,
    pub bytes: Vec<u8>,
}

impl QuantizedTensor {
    pub fn element_count(&self) -> usize {
        self.bytes.len() / self.width.element_size()
    }

    pub fn size_bytes(&self) -> usize {
        self.bytes.len()
    }

    /// Integer levels, decoded from the byte form
    pub fn levels(&self) -> Vec<i64> {
        self.bytes
            .chunks_exact(self.width.element_size())
            .map(|b| self.width.read(b))
            .collect()
    }

    pub fn dequantize(&self) -> Vec<f32> {
        dequantize_bytes(&self.bytes, self.width, self.scale)
    }
}

/// Scale for a tensor: `max_level / max|x|`, or 1.0 when every element is zero.
pub fn compute_scale(data: &[f32], width: BitWidth) -> f64 {
    let max_abs = data.iter().fold(0.0f64, |m, x| m.max((*x as f64).abs()));
    if max_abs == 0.0 {
        1.0
    } else {
        width.max_level() as f64 / max_abs
    }
}

pub fn quantize(tensor: &FloatTensor, bits: u32) -> Result<QuantizedTensor> {
    let width = BitWidth::from_bits(bits)?;
    if let Some(bad) = tensor.data.iter().find(|x| !x.is_finite()) {
        return Err(ClientError::Weights(format!(
            "Tensor {} contains non-finite value {}",
            tensor.name, bad
        )));
    }

    let scale = compute_scale(&tensor.data, width);
    let (lo, hi) = (width.min_level() as f64, width.max_level() as f64);

    let mut bytes = Vec::with_capacity(tensor.data.len() * width.element_size());
    for x in &tensor.data {
        let q = (*x as f64 * scale).round_ties_even().clamp(lo, hi) as i64;
        width.write(&mut bytes, q);
    }

    debug!(
        tensor = %tensor.name,
        dtype = width.dtype(),
        scale = scale,
        elements = tensor.data.len(),
        "Quantized tensor"
    );

    Ok(QuantizedTensor {
        name: tensor.name.clone(),
        shape: tensor.shape.clone(),
        width,
        scale,
        bytes,
    })
}

/// Decode little-endian integers and divide by `scale`. Trailing bytes that
/// do not form a whole element are ignored.
pub fn dequantize_bytes(bytes: &[u8], width: BitWidth, scale: f64) -> Vec<f32> {
    bytes
        .chunks_exact(width.element_size())
        .map(|b| (width.read(b) as f64 / scale) as f32)
        .collect()
}

#[cfg(test)]
mod tests {
    use super::*;

    fn tensor(data: Vec<f32>) -> FloatTensor {
        let n = data.len();
        FloatTensor::new("t", vec![n], data).unwrap()
    }

    #[test]
    fn test_bit_width_validation() {
        assert_eq!(BitWidth::from_bits(8).unwrap(), BitWidth::Int8);
        assert_eq!(BitWidth::from_bits(16).unwrap().dtype(), "int16");
        assert_eq!(BitWidth::from_bits(32).unwrap().element_size(), 4);
        assert!(matches!(
            BitWidth::from_bits(4),
            Err(ClientError::UnsupportedBitWidth(4))
        ));
        assert!(quantize(&tensor(vec![1.0]), 12).is_err());
    }

    #[test]
    fn test_levels_and_ranges() {
        assert_eq!(BitWidth::Int8.max_level(), 127);
        assert_eq!(BitWidth::Int8.min_level(), -128);
        assert_eq!(BitWidth::Int16.max_level(), 32767);
        assert_eq!(BitWidth::Int32.max_level(), 2147483647);
    }

    #[test]
    fn test_max_abs_maps_to_max_level() {
        let q = quantize(&tensor(vec![-2.0, 0.5, 1.0]), 8).unwrap();
        assert_eq!(q.scale, 63.5);
        assert_eq!(q.levels(), vec![-127, 32, 64]);
        assert_eq!(q.size_bytes(), 3);
    }

    #[test]
    fn test_all_zero_tensor() {
        let q = quantize(&tensor(vec![0.0; 5]), 16).unwrap();
        assert_eq!(q.scale, 1.0);
        assert_eq!(q.levels(), vec![0; 5]);
        assert_eq!(q.dequantize(), vec![0.0; 5]);
    }

    #[test]
    fn test_round_half_to_even() {
        // scale = 127 / 127 = 1, so x*scale lands exactly on .5 boundaries
        let q = quantize(&tensor(vec![127.0, 0.5, 1.5, 2.5, -0.5]), 8).unwrap();
        assert_eq!(q.levels(), vec![127, 0, 2, 2, 0]);
    }

    #[test]
    fn test_reconstruction_error_bound() {
        let data: Vec<f32> = (0..1000).map(|i| ((i as f32) * 0.37).sin() * 3.1).collect();
        for bits in [8, 16, 32] {
            let q = quantize(&tensor(data.clone()), bits).unwrap();
            let restored = q.dequantize();
            let bound = 1.0 / (2.0 * q.scale);
            for (x, y) in data.iter().zip(&restored) {
                let err = (*x as f64 - *y as f64).abs();
                // f32 output adds at most one ulp of the value
                assert!(
                    err <= bound + (*x as f64).abs() * f32::EPSILON as f64 + 1e-12,
                    "bits={} x={} y={} err={} bound={}",
                    bits,
                    x,
                    y,
                    err,
                    bound
                );
            }
        }
    }

    #[test]
    fn test_little_endian_layout() {
        let q = quantize(&tensor(vec![1.0, -1.0]), 16).unwrap();
        assert_eq!(q.bytes, vec![0xff, 0x7f, 0x01, 0x80]);
    }

    #[test]
    fn test_rejects_non_finite() {
        assert!(quantize(&tensor(vec![1.0, f32::NAN]), 8).is_err());
        assert!(quantize(&tensor(vec![f32::INFINITY]), 8).is_err());
    }

    #[test]
    fn test_dequantize_ignores_partial_element() {
        let values = dequantize_bytes(&[2, 0, 4], BitWidth::Int16, 2.0);
        assert_eq!(values, vec![1.0]);
    }
}
