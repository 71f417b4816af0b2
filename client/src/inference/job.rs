//! Generation request and result types

use serde::{Deserialize, Serialize};
use std::time::Duration;
use uuid::Uuid;

use super::sampler::SamplingParams;
use crate::errors::{ClientError, Result};

/// Token id that ends generation
pub const END_TOKEN: u32 = 0;

/// Configuration for text generation
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct GenerationConfig {
    /// Maximum number of tokens to generate
    pub max_tokens: u32,

    /// Temperature for sampling (0.0 = arg-max)
    pub temperature: f32,

    /// Keep only the k most likely tokens (0 = disabled)
    pub top_k: usize,

    /// Top-p (nucleus) sampling threshold (1.0 = disabled)
    pub top_p: f32,

    /// Always pick the most likely token, ignoring the sampling parameters
    pub greedy: bool,

    /// Sampler seed
    pub seed: u64,
}

impl Default for GenerationConfig {
    fn default() -> Self {
        Self {
            max_tokens: 100,
            temperature: 0.8,
            top_k: 40,
            top_p: 0.9,
            greedy: false,
            seed: 0,
        }
    }
}

impl GenerationConfig {
    /// Reject sampling settings the sampler cannot honor
    pub fn validate(&self) -> Result<()> {
        if !(self.temperature.is_finite() && self.temperature >= 0.0) {
            return Err(ClientError::Config(
                "generation.temperature must be a non-negative number".into(),
            ));
        }
        if !(self.top_p > 0.0 && self.top_p <= 1.0) {
            return Err(ClientError::Config("generation.top_p must be in (0, 1]".into()));
        }
        Ok(())
    }

    pub fn sampling_params(&self) -> SamplingParams {
        SamplingParams {
            temperature: if self.greedy { 0.0 } else { self.temperature },
            top_k: self.top_k,
            top_p: self.top_p,
        }
    }
}

/// Why generation stopped
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum StopReason {
    /// The end token was produced
    EndToken,
    /// `max_tokens` steps were taken
    MaxTokens,
}

/// Result of one generation request
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GenerationResult {
    pub request_id: Uuid,

    /// Prompt followed by the decoded completion
    pub text: String,

    /// Decoded completion only
    pub completion: String,

    pub prompt_tokens: Vec<u32>,

    /// Generated tokens, excluding the end token
    pub tokens: Vec<u32>,

    pub stop_reason: StopReason,

    pub elapsed: Duration,

    pub tokens_per_second: Option<f32>,
}

impl GenerationResult {
    pub fn completion_tokens(&self) -> u32 {
        self.tokens.len() as u32
    }
}

/// Tokens per second, if any time elapsed
pub(crate) fn throughput(tokens: usize, elapsed: Duration) -> Option<f32> {
    let secs = elapsed.as_secs_f32();
    if secs > 0.0 {
        Some(tokens as f32 / secs)
    } else {
        None
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn test_generation_config_default() {
        let config = GenerationConfig::default();
        assert_eq!(config.max_tokens, 100);
        assert_eq!(config.top_k, 40);
        assert!(!config.greedy);
    }

    #[test]
    fn test_greedy_overrides_temperature() {
        let config = GenerationConfig {
            greedy: true,
            temperature: 1.5,
            ..Default::default()
        };
        assert_eq!(config.sampling_params().temperature, 0.0);
    }

    #[test]
    fn test_validate_rejects_bad_overrides() {
        assert!(GenerationConfig::default().validate().is_ok());

        let nan_temperature = GenerationConfig {
            temperature: f32::NAN,
            ..Default::default()
        };
        assert!(matches!(nan_temperature.validate(), Err(ClientError::Config(_))));

        let wide_top_p = GenerationConfig {
            top_p: 1.5,
            ..Default::default()
        };
        assert!(wide_top_p.validate().is_err());

        // Greedy does not excuse an invalid temperature
        let greedy = GenerationConfig {
            greedy: true,
            temperature: -0.5,
            ..Default::default()
        };
        assert!(greedy.validate().is_err());
    }

    #[test]
    fn test_partial_config_from_toml() {
        let config: GenerationConfig = toml::from_str("max_tokens = 10\ngreedy = true").unwrap();
        assert_eq!(config.max_tokens, 10);
        assert!(config.greedy);
        assert_eq!(config.top_p, 0.9);
    }

    #[test]
    fn test_throughput() {
        assert_eq!(throughput(10, Duration::ZERO), None);
        assert_eq!(throughput(10, Duration::from_secs(2)), Some(5.0));
    }
}
