//! Inference over reconstructed weights
//!
//! ## Key Components
//!
//! - [`InferenceEngine`]: holds the weights and runs generation requests
//! - [`DecodeSession`]: step-wise decode loop for one request
//! - [`Sampler`]: temperature / top-k / top-p sampling
//! - [`tensor_ops`]: matmul, activations, softmax, embedding lookup
//! - [`forward_pass`]: embedding → blocks → output projection

pub mod engine;
pub mod forward_pass;
pub mod job;
pub mod sampler;
pub mod tensor_ops;
pub mod tokenizer;

pub use engine::{DecodePhase, DecodeSession, InferenceEngine};
pub use forward_pass::{LayerWeights, LocalForwardPass, ModelWeights};
pub use job::{GenerationConfig, GenerationResult, StopReason, END_TOKEN};
pub use sampler::{Sampler, SamplingParams};
pub use tensor_ops::{Tensor1D, Tensor2D};
pub use tokenizer::ByteTokenizer;
