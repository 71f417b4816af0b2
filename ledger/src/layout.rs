//! Binary record layouts
//!
//! Every record stored on the ledger starts with an 8-byte discriminator and
//! the 32-byte authority. All integers are little-endian. Field offsets are
//! named constants and their contiguity is checked at compile time, so a
//! layout change that leaves a gap or an overlap fails to build.
//!
//! ```text
//! Registry  [0:8] disc  [8:40] authority  [40:44] chunk_count
//!           [44:48] vocab_size  [48:52] embedding_dim  [52:56] hidden_dim
//!           [56:60] context_length  [60:64] layer_count
//!
//! Chunk     [0:8] disc  [8:40] authority  [40:72] registry
//!           [72:76] chunk_index  [76] chunk_type  [77:80] reserved (zero)
//!           [80:..] data as little-endian u32 words
//!
//! Chat      [0:8] disc  [8:40] authority  [40:72] model
//!           [72:76] history_len  [76:80] capacity  [80:80+capacity] history
//! ```

use serde::{Deserialize, Serialize};
use std::ops::Range;

use crate::address::Address;
use crate::errors::{LedgerError, Result};

/// Byte range of one field inside a record
#[derive(Debug, Clone, Copy)]
pub struct Field {
    pub offset: usize,
    pub len: usize,
}

impl Field {
    pub const fn new(offset: usize, len: usize) -> Self {
        Self { offset, len }
    }

    pub const fn end(&self) -> usize {
        self.offset + self.len
    }

    pub const fn range(&self) -> Range<usize> {
        self.offset..self.end()
    }
}

pub const DISCRIMINATOR: Field = Field::new(0, 8);
pub const AUTHORITY: Field = Field::new(8, 32);

pub const REGISTRY_DISCRIMINATOR: [u8; 8] = *b"SEA_REG\x01";
pub const CHUNK_DISCRIMINATOR: [u8; 8] = *b"SEA_CHK\x01";
pub const CHAT_DISCRIMINATOR: [u8; 8] = *b"SEA_CHT\x01";

/// Registry record fields
pub mod registry {
    use super::Field;

    pub const CHUNK_COUNT: Field = Field::new(40, 4);
    pub const VOCAB_SIZE: Field = Field::new(44, 4);
    pub const EMBEDDING_DIM: Field = Field::new(48, 4);
    pub const HIDDEN_DIM: Field = Field::new(52, 4);
    pub const CONTEXT_LENGTH: Field = Field::new(56, 4);
    pub const LAYER_COUNT: Field = Field::new(60, 4);
    pub const LEN: usize = 64;
}

/// Chunk record fields
pub mod chunk {
    use super::Field;

    pub const REGISTRY: Field = Field::new(40, 32);
    pub const CHUNK_INDEX: Field = Field::new(72, 4);
    pub const CHUNK_TYPE: Field = Field::new(76, 1);
    pub const RESERVED: Field = Field::new(77, 3);
    pub const HEADER_LEN: usize = 80;
    pub const WORD: usize = 4;
}

/// Chat record fields
pub mod chat {
    use super::Field;

    pub const MODEL: Field = Field::new(40, 32);
    pub const HISTORY_LEN: Field = Field::new(72, 4);
    pub const CAPACITY: Field = Field::new(76, 4);
    pub const HEADER_LEN: usize = 80;
    pub const DEFAULT_CAPACITY: usize = 128;
}

const _: () = {
    assert!(DISCRIMINATOR.end() == AUTHORITY.offset);

    assert!(AUTHORITY.end() == registry::CHUNK_COUNT.offset);
    assert!(registry::CHUNK_COUNT.end() == registry::VOCAB_SIZE.offset);
    assert!(registry::VOCAB_SIZE.end() == registry::EMBEDDING_DIM.offset);
    assert!(registry::EMBEDDING_DIM.end() == registry::HIDDEN_DIM.offset);
    assert!(registry::HIDDEN_DIM.end() == registry::CONTEXT_LENGTH.offset);
    assert!(registry::CONTEXT_LENGTH.end() == registry::LAYER_COUNT.offset);
    assert!(registry::LAYER_COUNT.end() == registry::LEN);

    assert!(AUTHORITY.end() == chunk::REGISTRY.offset);
    assert!(chunk::REGISTRY.end() == chunk::CHUNK_INDEX.offset);
    assert!(chunk::CHUNK_INDEX.end() == chunk::CHUNK_TYPE.offset);
    assert!(chunk::CHUNK_TYPE.end() == chunk::RESERVED.offset);
    assert!(chunk::RESERVED.end() == chunk::HEADER_LEN);
    assert!(chunk::HEADER_LEN % chunk::WORD == 0);

    assert!(AUTHORITY.end() == chat::MODEL.offset);
    assert!(chat::MODEL.end() == chat::HISTORY_LEN.offset);
    assert!(chat::HISTORY_LEN.end() == chat::CAPACITY.offset);
    assert!(chat::CAPACITY.end() == chat::HEADER_LEN);
};

/// Model topology stored in a registry record
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct Hyperparams {
    pub vocab_size: u32,
    pub embedding_dim: u32,
    pub hidden_dim: u32,
    pub context_length: u32,
    pub layer_count: u32,
}

/// Category of the tensor that owns a chunk's first byte
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
#[repr(u8)]
pub enum ChunkType {
    Embedding = 0,
    Attention = 1,
    Ffn = 2,
    Output = 3,
}

impl ChunkType {
    pub fn as_u8(self) -> u8 {
        self as u8
    }
}

impl TryFrom<u8> for ChunkType {
    type Error = LedgerError;

    fn try_from(value: u8) -> Result<Self> {
        match value {
            0 => Ok(ChunkType::Embedding),
            1 => Ok(ChunkType::Attention),
            2 => Ok(ChunkType::Ffn),
            3 => Ok(ChunkType::Output),
            other => Err(LedgerError::InvalidRecord(format!(
                "Unknown chunk type {}",
                other
            ))),
        }
    }
}

/// On-ledger model registry
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegistryRecord {
    pub authority: Address,
    pub chunk_count: u32,
    pub hyperparams: Hyperparams,
}

impl RegistryRecord {
    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; registry::LEN];
        buf[DISCRIMINATOR.range()].copy_from_slice(&REGISTRY_DISCRIMINATOR);
        buf[AUTHORITY.range()].copy_from_slice(self.authority.as_bytes());
        write_u32(&mut buf, registry::CHUNK_COUNT, self.chunk_count);
        write_u32(&mut buf, registry::VOCAB_SIZE, self.hyperparams.vocab_size);
        write_u32(&mut buf, registry::EMBEDDING_DIM, self.hyperparams.embedding_dim);
        write_u32(&mut buf, registry::HIDDEN_DIM, self.hyperparams.hidden_dim);
        write_u32(&mut buf, registry::CONTEXT_LENGTH, self.hyperparams.context_length);
        write_u32(&mut buf, registry::LAYER_COUNT, self.hyperparams.layer_count);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_header(buf, registry::LEN, &REGISTRY_DISCRIMINATOR, "registry")?;
        Ok(Self {
            authority: read_address(buf, AUTHORITY),
            chunk_count: read_u32(buf, registry::CHUNK_COUNT),
            hyperparams: Hyperparams {
                vocab_size: read_u32(buf, registry::VOCAB_SIZE),
                embedding_dim: read_u32(buf, registry::EMBEDDING_DIM),
                hidden_dim: read_u32(buf, registry::HIDDEN_DIM),
                context_length: read_u32(buf, registry::CONTEXT_LENGTH),
                layer_count: read_u32(buf, registry::LAYER_COUNT),
            },
        })
    }
}

/// On-ledger weight chunk
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChunkRecord {
    pub authority: Address,
    pub registry: Address,
    pub chunk_index: u32,
    pub chunk_type: ChunkType,
    /// Payload as little-endian words; the last word is zero-padded
    pub words: Vec<u32>,
}

impl ChunkRecord {
    /// Pack raw chunk bytes into words, zero-padding the tail.
    pub fn pack_words(data: &[u8]) -> Vec<u32> {
        data.chunks(chunk::WORD)
            .map(|word| {
                let mut bytes = [0u8; 4];
                bytes[..word.len()].copy_from_slice(word);
                u32::from_le_bytes(bytes)
            })
            .collect()
    }

    /// Payload bytes, including any zero padding.
    pub fn data(&self) -> Vec<u8> {
        self.words.iter().flat_map(|w| w.to_le_bytes()).collect()
    }

    /// Size of the encoded record for a payload of `data_len` bytes
    pub fn encoded_len(data_len: usize) -> usize {
        chunk::HEADER_LEN + data_len.div_ceil(chunk::WORD) * chunk::WORD
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; chunk::HEADER_LEN];
        buf[DISCRIMINATOR.range()].copy_from_slice(&CHUNK_DISCRIMINATOR);
        buf[AUTHORITY.range()].copy_from_slice(self.authority.as_bytes());
        buf[chunk::REGISTRY.range()].copy_from_slice(self.registry.as_bytes());
        write_u32(&mut buf, chunk::CHUNK_INDEX, self.chunk_index);
        buf[chunk::CHUNK_TYPE.offset] = self.chunk_type.as_u8();
        buf.reserve(self.words.len() * chunk::WORD);
        for word in &self.words {
            buf.extend_from_slice(&word.to_le_bytes());
        }
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_header(buf, chunk::HEADER_LEN, &CHUNK_DISCRIMINATOR, "chunk")?;
        let payload = &buf[chunk::HEADER_LEN..];
        if payload.len() % chunk::WORD != 0 {
            return Err(LedgerError::InvalidRecord(format!(
                "Chunk payload of {} bytes is not word aligned",
                payload.len()
            )));
        }
        if buf[chunk::RESERVED.range()].iter().any(|b| *b != 0) {
            return Err(LedgerError::InvalidRecord(
                "Chunk reserved bytes must be zero".to_string(),
            ));
        }

        let words = payload
            .chunks_exact(chunk::WORD)
            .map(|w| u32::from_le_bytes([w[0], w[1], w[2], w[3]]))
            .collect();

        Ok(Self {
            authority: read_address(buf, AUTHORITY),
            registry: read_address(buf, chunk::REGISTRY),
            chunk_index: read_u32(buf, chunk::CHUNK_INDEX),
            chunk_type: ChunkType::try_from(buf[chunk::CHUNK_TYPE.offset])?,
            words,
        })
    }
}

/// On-ledger chat state: a bounded byte history, oldest first
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct ChatRecord {
    pub authority: Address,
    pub model: Address,
    pub capacity: u32,
    pub history: Vec<u8>,
}

impl ChatRecord {
    pub fn new(authority: Address, model: Address, capacity: u32) -> Self {
        Self {
            authority,
            model,
            capacity,
            history: Vec::with_capacity(capacity as usize),
        }
    }

    /// Append `input`, dropping the oldest bytes once capacity is reached.
    pub fn append(&mut self, input: &[u8]) -> Result<()> {
        let capacity = self.capacity as usize;
        if input.len() > capacity {
            return Err(LedgerError::InputTooLong {
                len: input.len(),
                capacity,
            });
        }
        let overflow = (self.history.len() + input.len()).saturating_sub(capacity);
        self.history = self.history.split_off(overflow);
        self.history.extend_from_slice(input);
        Ok(())
    }

    pub fn encoded_len(&self) -> usize {
        chat::HEADER_LEN + self.capacity as usize
    }

    pub fn encode(&self) -> Vec<u8> {
        let mut buf = vec![0u8; self.encoded_len()];
        buf[DISCRIMINATOR.range()].copy_from_slice(&CHAT_DISCRIMINATOR);
        buf[AUTHORITY.range()].copy_from_slice(self.authority.as_bytes());
        buf[chat::MODEL.range()].copy_from_slice(self.model.as_bytes());
        write_u32(&mut buf, chat::HISTORY_LEN, self.history.len() as u32);
        write_u32(&mut buf, chat::CAPACITY, self.capacity);
        buf[chat::HEADER_LEN..chat::HEADER_LEN + self.history.len()]
            .copy_from_slice(&self.history);
        buf
    }

    pub fn decode(buf: &[u8]) -> Result<Self> {
        check_header(buf, chat::HEADER_LEN, &CHAT_DISCRIMINATOR, "chat")?;
        let capacity = read_u32(buf, chat::CAPACITY);
        let history_len = read_u32(buf, chat::HISTORY_LEN) as usize;
        if history_len > capacity as usize
            || buf.len() < chat::HEADER_LEN + capacity as usize
        {
            return Err(LedgerError::InvalidRecord(format!(
                "Chat history {} exceeds capacity {} or record length {}",
                history_len,
                capacity,
                buf.len()
            )));
        }
        Ok(Self {
            authority: read_address(buf, AUTHORITY),
            model: read_address(buf, chat::MODEL),
            capacity,
            history: buf[chat::HEADER_LEN..chat::HEADER_LEN + history_len].to_vec(),
        })
    }
}

fn check_header(buf: &[u8], min_len: usize, disc: &[u8; 8], kind: &str) -> Result<()> {
    if buf.len() < min_len {
        return Err(LedgerError::InvalidRecord(format!(
            "{} record too short: {} bytes, need {}",
            kind,
            buf.len(),
            min_len
        )));
    }
    if &buf[DISCRIMINATOR.range()] != disc {
        return Err(LedgerError::InvalidRecord(format!(
            "Not a {} record (discriminator mismatch)",
            kind
        )));
    }
    Ok(())
}

fn write_u32(buf: &mut [u8], field: Field, value: u32) {
    buf[field.range()].copy_from_slice(&value.to_le_bytes());
}

fn read_u32(buf: &[u8], field: Field) -> u32 {
    let mut bytes = [0u8; 4];
    bytes.copy_from_slice(&buf[field.range()]);
    u32::from_le_bytes(bytes)
}

fn read_address(buf: &[u8], field: Field) -> Address {
    let mut bytes = [0u8; 32];
    bytes.copy_from_slice(&buf[field.range()]);
    Address::from_bytes(bytes)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn hyperparams() -> Hyperparams {
        Hyperparams {
            vocab_size: 256,
            embedding_dim: 64,
            hidden_dim: 128,
            context_length: 64,
            layer_count: 2,
        }
    }

    #[test]
    fn test_registry_field_offsets() {
        let record = RegistryRecord {
            authority: Address::from_bytes([0xaa; 32]),
            chunk_count: 7,
            hyperparams: hyperparams(),
        };
        let buf = record.encode();

        assert_eq!(buf.len(), 64);
        assert_eq!(&buf[0..8], b"SEA_REG\x01");
        assert_eq!(&buf[8..40], &[0xaa; 32]);
        assert_eq!(&buf[40..44], &7u32.to_le_bytes());
        assert_eq!(&buf[44..48], &256u32.to_le_bytes());
        assert_eq!(&buf[48..52], &64u32.to_le_bytes());
        assert_eq!(&buf[52..56], &128u32.to_le_bytes());
        assert_eq!(&buf[56..60], &64u32.to_le_bytes());
        assert_eq!(&buf[60..64], &2u32.to_le_bytes());

        assert_eq!(RegistryRecord::decode(&buf).unwrap(), record);
    }

    #[test]
    fn test_chunk_field_offsets_and_padding() {
        let record = ChunkRecord {
            authority: Address::from_bytes([1; 32]),
            registry: Address::from_bytes([2; 32]),
            chunk_index: 3,
            chunk_type: ChunkType::Ffn,
            words: ChunkRecord::pack_words(&[1, 2, 3, 4, 5]),
        };
        let buf = record.encode();

        assert_eq!(buf.len(), ChunkRecord::encoded_len(5));
        assert_eq!(buf.len(), 88);
        assert_eq!(&buf[40..72], &[2; 32]);
        assert_eq!(&buf[72..76], &3u32.to_le_bytes());
        assert_eq!(buf[76], 2);
        assert_eq!(&buf[77..80], &[0, 0, 0]);
        assert_eq!(&buf[80..88], &[1, 2, 3, 4, 5, 0, 0, 0]);

        let decoded = ChunkRecord::decode(&buf).unwrap();
        assert_eq!(decoded, record);
        assert_eq!(&decoded.data()[..5], &[1, 2, 3, 4, 5]);
    }

    #[test]
    fn test_chunk_decode_rejects_unaligned_payload() {
        let record = ChunkRecord {
            authority: Address::ZERO,
            registry: Address::ZERO,
            chunk_index: 0,
            chunk_type: ChunkType::Embedding,
            words: vec![1],
        };
        let mut buf = record.encode();
        buf.push(9);
        assert!(ChunkRecord::decode(&buf).is_err());
    }

    #[test]
    fn test_chunk_decode_rejects_unknown_type() {
        let record = ChunkRecord {
            authority: Address::ZERO,
            registry: Address::ZERO,
            chunk_index: 0,
            chunk_type: ChunkType::Output,
            words: vec![],
        };
        let mut buf = record.encode();
        buf[chunk::CHUNK_TYPE.offset] = 9;
        assert!(ChunkRecord::decode(&buf).is_err());
    }

    #[test]
    fn test_decode_rejects_wrong_discriminator() {
        let registry = RegistryRecord {
            authority: Address::ZERO,
            chunk_count: 0,
            hyperparams: hyperparams(),
        }
        .encode();
        assert!(ChunkRecord::decode(&registry).is_err());
        assert!(RegistryRecord::decode(&registry[..40]).is_err());
    }

    #[test]
    fn test_chat_append_rolls_history() {
        let mut chat = ChatRecord::new(Address::ZERO, Address::ZERO, 8);
        chat.append(b"hello").unwrap();
        chat.append(b"world").unwrap();
        assert_eq!(chat.history, b"lloworld");

        let err = chat.append(&[0u8; 9]).unwrap_err();
        assert!(matches!(err, LedgerError::InputTooLong { len: 9, capacity: 8 }));
        assert_eq!(chat.history, b"lloworld");
    }

    #[test]
    fn test_chat_encoding() {
        let mut chat = ChatRecord::new(
            Address::from_bytes([4; 32]),
            Address::from_bytes([5; 32]),
            chat::DEFAULT_CAPACITY as u32,
        );
        chat.append(b"Hi").unwrap();
        let buf = chat.encode();

        assert_eq!(buf.len(), 80 + 128);
        assert_eq!(&buf[72..76], &2u32.to_le_bytes());
        assert_eq!(&buf[76..80], &128u32.to_le_bytes());
        assert_eq!(&buf[80..82], b"Hi");
        assert_eq!(ChatRecord::decode(&buf).unwrap(), chat);
    }

    #[test]
    fn test_chunk_type_codes() {
        assert_eq!(ChunkType::Embedding.as_u8(), 0);
        assert_eq!(ChunkType::Attention.as_u8(), 1);
        assert_eq!(ChunkType::Ffn.as_u8(), 2);
        assert_eq!(ChunkType::Output.as_u8(), 3);
        assert_eq!(ChunkType::try_from(1).unwrap(), ChunkType::Attention);
    }
}
