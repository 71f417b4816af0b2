//! Autoregressive decode loop
//!
//! A [`DecodeSession`] advances one token per [`DecodeSession::step`], so a
//! caller can abandon generation between any two steps. Each step feeds only
//! the last `context_length` tokens of the running sequence to the forward
//! pass; older tokens stay in the output.

use std::time::Instant;
use tracing::{debug, info};
use uuid::Uuid;

use crate::errors::{ClientError, Result};
use crate::loader::LoadedModel;

use super::forward_pass::{LocalForwardPass, ModelWeights};
use super::job::{throughput, GenerationConfig, GenerationResult, StopReason, END_TOKEN};
use super::sampler::Sampler;
use super::tokenizer::ByteTokenizer;

/// Where a session is in its lifecycle
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum DecodePhase {
    /// Created, no step taken
    Idle,
    /// At least one token emitted, more may follow
    Emitting,
    Finished(StopReason),
}

/// Holds reconstructed weights and runs generation requests against them
pub struct InferenceEngine {
    forward: LocalForwardPass,
    tokenizer: ByteTokenizer,
    context_length: usize,
}

impl InferenceEngine {
    pub fn new(weights: ModelWeights) -> Self {
        let tokenizer = ByteTokenizer::new(weights.hyperparams.vocab_size);
        let context_length = (weights.hyperparams.context_length as usize).max(1);
        Self {
            forward: LocalForwardPass::new(weights),
            tokenizer,
            context_length,
        }
    }

    pub fn from_loaded(model: &LoadedModel) -> Result<Self> {
        Ok(Self::new(ModelWeights::from_loaded(model)?))
    }

    pub fn tokenizer(&self) -> &ByteTokenizer {
        &self.tokenizer
    }

    pub fn weights(&self) -> &ModelWeights {
        &self.forward.weights
    }

    pub fn context_length(&self) -> usize {
        self.context_length
    }

    /// Start a step-wise generation from already tokenized input
    pub fn session(&self, prompt_tokens: Vec<u32>, config: &GenerationConfig) -> Result<DecodeSession<'_>> {
        if prompt_tokens.is_empty() {
            return Err(ClientError::Inference("Prompt is empty".to_string()));
        }
        Ok(DecodeSession {
            engine: self,
            request_id: Uuid::new_v4(),
            prompt_len: prompt_tokens.len(),
            sequence: prompt_tokens,
            sampler: Sampler::new(config.sampling_params(), config.seed),
            max_tokens: config.max_tokens as usize,
            phase: DecodePhase::Idle,
            started: Instant::now(),
        })
    }

    /// Generate a completion for `prompt`. The result text is the prompt
    /// followed by the decoded completion.
    pub fn generate(&self, prompt: &str, config: &GenerationConfig) -> Result<GenerationResult> {
        let mut session = self.session(self.tokenizer.encode(prompt), config)?;
        while session.step()?.is_some() {}

        let mut result = session.finish();
        result.text = format!("{}{}", prompt, result.completion);
        Ok(result)
    }
}

/// One in-flight generation request
pub struct DecodeSession<'a> {
    engine: &'a InferenceEngine,
    request_id: Uuid,
    sequence: Vec<u32>,
    prompt_len: usize,
    sampler: Sampler,
    max_tokens: usize,
    phase: DecodePhase,
    started: Instant,
}

impl<'a> DecodeSession<'a> {
    pub fn phase(&self) -> DecodePhase {
        self.phase
    }

    pub fn request_id(&self) -> Uuid {
        self.request_id
    }

    /// Tokens the next step will see
    pub fn context(&self) -> &[u32] {
        let start = self.sequence.len().saturating_sub(self.engine.context_length);
        &self.sequence[start..]
    }

    pub fn generated(&self) -> &[u32] {
        &self.sequence[self.prompt_len..]
    }

    /// Run one decode step. Returns the emitted token, or `None` once the
    /// session has finished.
    pub fn step(&mut self) -> Result<Option<u32>> {
        if let DecodePhase::Finished(_) = self.phase {
            return Ok(None);
        }
        if self.generated().len() >= self.max_tokens {
            self.phase = DecodePhase::Finished(StopReason::MaxTokens);
            return Ok(None);
        }

        let logits = self.engine.forward.forward(self.context())?;
        let token = self.sampler.sample(&logits);
        if token == END_TOKEN {
            debug!(request_id = %self.request_id, step = self.generated().len(), "End token produced");
            self.phase = DecodePhase::Finished(StopReason::EndToken);
            return Ok(None);
        }

        self.sequence.push(token);
        self.phase = if self.generated().len() >= self.max_tokens {
            DecodePhase::Finished(StopReason::MaxTokens)
        } else {
            DecodePhase::Emitting
        };
        Ok(Some(token))
    }

    /// Close the session and collect its result
    pub fn finish(self) -> GenerationResult {
        let elapsed = self.started.elapsed();
        let tokens = self.generated().to_vec();
        let completion = self.engine.tokenizer.decode(&tokens);
        let stop_reason = match self.phase {
            DecodePhase::Finished(reason) => reason,
            _ => StopReason::MaxTokens,
        };

        info!(
            request_id = %self.request_id,
            prompt_tokens = self.prompt_len,
            completion_tokens = tokens.len(),
            stop_reason = ?stop_reason,
            elapsed_ms = elapsed.as_millis() as u64,
            "Generation finished"
        );

        GenerationResult {
            request_id: self.request_id,
            text: self.engine.tokenizer.decode(&self.sequence),
            completion,
            prompt_tokens: self.sequence[..self.prompt_len].to_vec(),
            tokens_per_second: throughput(tokens.len(), elapsed),
            tokens,
            stop_reason,
            elapsed,
        }
    }
}
