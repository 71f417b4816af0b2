use ed25519_dalek::{Signature, Signer, SigningKey, Verifier, VerifyingKey};

use crate::address::Address;
use crate::errors::{LedgerError, Result};
use crate::layout::{ChunkType, Hyperparams};

const PAYLOAD_DOMAIN: &[u8] = b"sea-ledger-tx-v1";

/// Operations the ledger program accepts
#[derive(Debug, Clone, PartialEq, Eq)]
pub enum Instruction {
    /// Create the registry for `model_id` owned by the signer, chunk_count 0
    InitializeModel {
        model_id: String,
        hyperparams: Hyperparams,
    },
    /// Store one chunk under a registry; signer must be its authority
    UploadChunk {
        registry: Address,
        chunk_index: u32,
        chunk_type: ChunkType,
        data: Vec<u8>,
    },
    /// Create the signer's chat state for a model
    InitializeChat { model: Address },
    /// Append bytes to the signer's chat history
    AppendChat { chat: Address, input: Vec<u8> },
}

impl Instruction {
    fn tag(&self) -> u8 {
        match self {
            Instruction::InitializeModel { .. } => 0,
            Instruction::UploadChunk { .. } => 1,
            Instruction::InitializeChat { .. } => 2,
            Instruction::AppendChat { .. } => 3,
        }
    }

    pub fn name(&self) -> &'static str {
        match self {
            Instruction::InitializeModel { .. } => "initialize_model",
            Instruction::UploadChunk { .. } => "upload_chunk",
            Instruction::InitializeChat { .. } => "initialize_chat",
            Instruction::AppendChat { .. } => "append_chat",
        }
    }

    /// Canonical bytes covered by the transaction signature.
    ///
    /// Format: domain || program_id || signer || tag || fields, with
    /// variable-length fields prefixed by their u32 length.
    pub fn signing_payload(&self, program_id: &Address, signer: &Address) -> Vec<u8> {
        let mut payload = Vec::with_capacity(128);
        payload.extend_from_slice(PAYLOAD_DOMAIN);
        payload.extend_from_slice(program_id.as_bytes());
        payload.extend_from_slice(signer.as_bytes());
        payload.push(self.tag());

        match self {
            Instruction::InitializeModel {
                model_id,
                hyperparams,
            } => {
                put_bytes(&mut payload, model_id.as_bytes());
                for value in [
                    hyperparams.vocab_size,
                    hyperparams.embedding_dim,
                    hyperparams.hidden_dim,
                    hyperparams.context_length,
                    hyperparams.layer_count,
                ] {
                    payload.extend_from_slice(&value.to_le_bytes());
                }
            }
            Instruction::UploadChunk {
                registry,
                chunk_index,
                chunk_type,
                data,
            } => {
                payload.extend_from_slice(registry.as_bytes());
                payload.extend_from_slice(&chunk_index.to_le_bytes());
                payload.push(chunk_type.as_u8());
                put_bytes(&mut payload, data);
            }
            Instruction::InitializeChat { model } => {
                payload.extend_from_slice(model.as_bytes());
            }
            Instruction::AppendChat { chat, input } => {
                payload.extend_from_slice(chat.as_bytes());
                put_bytes(&mut payload, input);
            }
        }

        payload
    }
}

fn put_bytes(payload: &mut Vec<u8>, bytes: &[u8]) {
    payload.extend_from_slice(&(bytes.len() as u32).to_le_bytes());
    payload.extend_from_slice(bytes);
}

/// A signed instruction
#[derive(Debug, Clone)]
pub struct Transaction {
    pub signer: Address,
    pub instruction: Instruction,
    pub signature: [u8; 64],
}

impl Transaction {
    /// Sign `instruction` for `program_id` with the signer's key
    pub fn sign(program_id: &Address, instruction: Instruction, key: &SigningKey) -> Self {
        let signer = Address::from(&key.verifying_key());
        let payload = instruction.signing_payload(program_id, &signer);
        let signature = key.sign(&payload);

        Self {
            signer,
            instruction,
            signature: signature.to_bytes(),
        }
    }

    /// Check the signature against the signer's verifying key
    pub fn verify(&self, program_id: &Address) -> Result<()> {
        let verifying_key = VerifyingKey::from_bytes(self.signer.as_bytes())
            .map_err(|_| LedgerError::InvalidSignature(self.signer))?;
        let signature = Signature::from_bytes(&self.signature);
        let payload = self.instruction.signing_payload(program_id, &self.signer);

        verifying_key
            .verify(&payload, &signature)
            .map_err(|_| LedgerError::InvalidSignature(self.signer))
    }
}
