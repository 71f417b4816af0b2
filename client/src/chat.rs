//! Chat over a ledger-backed history
//!
//! Each user has one chat record per model holding the last `capacity` bytes
//! of the conversation. A turn appends the user's message, feeds the whole
//! history to the model as left-context, and appends the reply.
//!
//! History bytes are token ids truncated to their low byte, so for
//! vocabularies above 256 the history is an approximation of the tokens.

use ed25519_dalek::SigningKey;
use ledger::{Address, Instruction, Ledger, LedgerError, Transaction};
use std::sync::Arc;
use tracing::{debug, info};

use crate::errors::{ClientError, Result};
use crate::inference::{GenerationConfig, GenerationResult, InferenceEngine};

/// Outcome of one chat turn
#[derive(Debug, Clone)]
pub struct ChatReply {
    pub reply: String,
    pub result: GenerationResult,
    /// History length after the reply was appended
    pub history_len: usize,
}

/// A user's conversation with one published model
pub struct ChatSession<'e> {
    ledger: Arc<Ledger>,
    signer: SigningKey,
    engine: &'e InferenceEngine,
    chat: Address,
    config: GenerationConfig,
}

impl<'e> ChatSession<'e> {
    /// Create (or reopen) the signer's chat state for `model`
    pub fn open(
        ledger: Arc<Ledger>,
        signer: SigningKey,
        engine: &'e InferenceEngine,
        model: Address,
        config: GenerationConfig,
    ) -> Result<Self> {
        let tx = Transaction::sign(&ledger.program_id(), Instruction::InitializeChat { model }, &signer);
        let chat = submit(&ledger, &tx)?;
        info!(chat = %chat, model = %model, "Chat opened");

        Ok(Self {
            ledger,
            signer,
            engine,
            chat,
            config,
        })
    }

    pub fn address(&self) -> Address {
        self.chat
    }

    pub fn history(&self) -> Result<Vec<u8>> {
        Ok(self.ledger.chat(&self.chat)?.history)
    }

    pub fn capacity(&self) -> Result<usize> {
        Ok(self.ledger.chat(&self.chat)?.capacity as usize)
    }

    /// Run one turn. A message longer than the history capacity is rejected
    /// before anything is written.
    pub fn send(&mut self, message: &str) -> Result<ChatReply> {
        let input = message.as_bytes();
        let capacity = self.capacity()?;
        if input.len() > capacity {
            return Err(ClientError::InputTooLong {
                len: input.len(),
                capacity,
            });
        }
        if input.is_empty() {
            return Err(ClientError::Inference("Message is empty".to_string()));
        }

        self.append(input.to_vec())?;

        let vocab = self.engine.tokenizer().vocab_size();
        let context: Vec<u32> = self.history()?.iter().map(|&b| b as u32 % vocab).collect();
        debug!(chat = %self.chat, context = context.len(), "Generating reply");

        let mut session = self.engine.session(context, &self.config)?;
        while session.step()?.is_some() {}
        let result = session.finish();

        let reply_bytes: Vec<u8> = result.tokens.iter().map(|&t| (t & 0xff) as u8).collect();
        for piece in reply_bytes.chunks(capacity) {
            self.append(piece.to_vec())?;
        }

        let history_len = self.history()?.len();
        info!(
            chat = %self.chat,
            message_bytes = input.len(),
            reply_tokens = result.tokens.len(),
            history_len = history_len,
            "Chat turn complete"
        );

        Ok(ChatReply {
            reply: result.completion.clone(),
            result,
            history_len,
        })
    }

    fn append(&self, input: Vec<u8>) -> Result<Address> {
        let tx = Transaction::sign(
            &self.ledger.program_id(),
            Instruction::AppendChat {
                chat: self.chat,
                input,
            },
            &self.signer,
        );
        submit(&self.ledger, &tx)
    }
}

fn submit(ledger: &Ledger, tx: &Transaction) -> Result<Address> {
    ledger.process(tx).map_err(|e| match e {
        LedgerError::AuthorityMismatch {
            account,
            expected,
            found,
        } => ClientError::AuthorityMismatch {
            account: account.to_hex(),
            expected: expected.to_hex(),
            found: found.to_hex(),
        },
        LedgerError::InputTooLong { len, capacity } => ClientError::InputTooLong { len, capacity },
        other => ClientError::Ledger(other),
    })
}
