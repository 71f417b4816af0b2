//! The ledger program: a key→bytes account store that only changes through
//! signed instructions.
//!
//! Every instruction is validated completely (signature, authority, sizes)
//! before any record is written, so a rejected transaction leaves the store
//! untouched. A ledger opened from a directory persists each account as its
//! own file and rewrites it atomically on change.

use serde::{Deserialize, Serialize};
use std::collections::HashMap;
use std::path::{Path, PathBuf};
use std::sync::RwLock;
use tracing::{debug, error, info, warn};

use crate::address::Address;
use crate::errors::{LedgerError, Result};
use crate::instruction::{Instruction, Transaction};
use crate::layout::{chat, ChatRecord, ChunkRecord, ChunkType, Hyperparams, RegistryRecord};

/// Default per-record size ceiling (10 MiB)
pub const DEFAULT_MAX_RECORD_SIZE: usize = 10 * 1024 * 1024;

const CONFIG_FILE: &str = "ledger.toml";
const ACCOUNTS_DIR: &str = "accounts";
const ACCOUNT_EXT: &str = "acct";

/// Ledger parameters, persisted as `ledger.toml`
#[derive(Debug, Clone, PartialEq, Eq, Serialize, Deserialize)]
pub struct LedgerConfig {
    /// Program identity mixed into every derived address
    pub program_id: Address,
    /// Largest encoded record accepted, in bytes
    pub max_record_size: usize,
}

impl LedgerConfig {
    pub fn new(program_id: Address) -> Self {
        Self {
            program_id,
            max_record_size: DEFAULT_MAX_RECORD_SIZE,
        }
    }

    pub fn with_max_record_size(mut self, max_record_size: usize) -> Self {
        self.max_record_size = max_record_size;
        self
    }
}

/// Account store plus instruction processor
pub struct Ledger {
    config: LedgerConfig,
    accounts: RwLock<HashMap<Address, Vec<u8>>>,
    storage_dir: Option<PathBuf>,
}

impl Ledger {
    /// Create a ledger that lives only in memory
    pub fn in_memory(config: LedgerConfig) -> Self {
        Self {
            config,
            accounts: RwLock::new(HashMap::new()),
            storage_dir: None,
        }
    }

    /// Create a new persisted ledger in `dir`
    pub fn create(dir: &Path, config: LedgerConfig) -> Result<Self> {
        std::fs::create_dir_all(dir.join(ACCOUNTS_DIR))?;
        let toml_string = toml::to_string_pretty(&config)?;
        write_atomic(&dir.join(CONFIG_FILE), toml_string.as_bytes())?;

        info!(
            dir = %dir.display(),
            program_id = %config.program_id,
            max_record_size = config.max_record_size,
            "Created ledger"
        );

        Ok(Self {
            config,
            accounts: RwLock::new(HashMap::new()),
            storage_dir: Some(dir.to_path_buf()),
        })
    }

    /// Open an existing persisted ledger
    pub fn open(dir: &Path) -> Result<Self> {
        let content = std::fs::read_to_string(dir.join(CONFIG_FILE))?;
        let config: LedgerConfig = toml::from_str(&content)?;

        let mut accounts = HashMap::new();
        let accounts_dir = dir.join(ACCOUNTS_DIR);
        if accounts_dir.exists() {
            for entry in std::fs::read_dir(&accounts_dir)? {
                let path = entry?.path();
                if path.extension().and_then(|e| e.to_str()) != Some(ACCOUNT_EXT) {
                    continue;
                }
                let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
                    continue;
                };
                match Address::from_hex(stem) {
                    Ok(address) => {
                        accounts.insert(address, std::fs::read(&path)?);
                    }
                    Err(e) => {
                        warn!(path = %path.display(), error = %e, "Skipping unrecognized account file");
                    }
                }
            }
        }

        info!(
            dir = %dir.display(),
            program_id = %config.program_id,
            accounts = accounts.len(),
            "Opened ledger"
        );

        Ok(Self {
            config,
            accounts: RwLock::new(accounts),
            storage_dir: Some(dir.to_path_buf()),
        })
    }

    /// Whether `dir` holds a persisted ledger
    pub fn exists(dir: &Path) -> bool {
        dir.join(CONFIG_FILE).exists()
    }

    /// Open `dir` if it holds a ledger, otherwise create one with `config`
    pub fn open_or_create(dir: &Path, config: LedgerConfig) -> Result<Self> {
        if Self::exists(dir) {
            let ledger = Self::open(dir)?;
            if ledger.program_id() != config.program_id {
                return Err(LedgerError::ProgramMismatch {
                    expected: ledger.program_id(),
                    found: config.program_id,
                });
            }
            Ok(ledger)
        } else {
            Self::create(dir, config)
        }
    }

    pub fn program_id(&self) -> Address {
        self.config.program_id
    }

    pub fn max_record_size(&self) -> usize {
        self.config.max_record_size
    }

    /// Raw bytes stored at `address`
    pub fn get_account(&self, address: &Address) -> Result<Option<Vec<u8>>> {
        let accounts = self.read_accounts()?;
        Ok(accounts.get(address).cloned())
    }

    /// Number of stored accounts
    pub fn account_count(&self) -> Result<usize> {
        Ok(self.read_accounts()?.len())
    }

    pub fn registry(&self, address: &Address) -> Result<RegistryRecord> {
        let bytes = self
            .get_account(address)?
            .ok_or(LedgerError::AccountNotFound(*address))?;
        RegistryRecord::decode(&bytes)
    }

    /// Chunk `index` of `registry`, if uploaded
    pub fn chunk(&self, registry: &Address, index: u32) -> Result<Option<ChunkRecord>> {
        let address = Address::chunk(&self.config.program_id, registry, index);
        self.get_account(&address)?
            .map(|bytes| ChunkRecord::decode(&bytes))
            .transpose()
    }

    pub fn chat(&self, address: &Address) -> Result<ChatRecord> {
        let bytes = self
            .get_account(address)?
            .ok_or(LedgerError::AccountNotFound(*address))?;
        ChatRecord::decode(&bytes)
    }

    /// Verify and apply a transaction. Returns the address of the account
    /// the instruction created or updated.
    pub fn process(&self, tx: &Transaction) -> Result<Address> {
        tx.verify(&self.config.program_id)?;

        let mut accounts = self
            .accounts
            .write()
            .map_err(|_| LedgerError::Internal("Failed to acquire accounts write lock".into()))?;

        let writes = match &tx.instruction {
            Instruction::InitializeModel {
                model_id,
                hyperparams,
            } => self.initialize_model(&accounts, &tx.signer, model_id, hyperparams)?,
            Instruction::UploadChunk {
                registry,
                chunk_index,
                chunk_type,
                data,
            } => self.upload_chunk(&accounts, &tx.signer, registry, *chunk_index, *chunk_type, data)?,
            Instruction::InitializeChat { model } => {
                self.initialize_chat(&accounts, &tx.signer, model)?
            }
            Instruction::AppendChat { chat, input } => {
                self.append_chat(&accounts, &tx.signer, chat, input)?
            }
        };

        let target = writes.target;
        for (address, bytes) in &writes.records {
            if bytes.len() > self.config.max_record_size {
                return Err(LedgerError::RecordTooLarge {
                    address: *address,
                    size: bytes.len(),
                    limit: self.config.max_record_size,
                });
            }
        }
        let mut persisted: Vec<&Address> = Vec::new();
        for (address, bytes) in &writes.records {
            if let Err(e) = self.persist(address, bytes) {
                error!(account = %address, error = %e, "Failed to persist account, rolling back");
                for done in persisted {
                    self.restore(done, accounts.get(done).map(Vec::as_slice));
                }
                return Err(e);
            }
            persisted.push(address);
        }
        for (address, bytes) in writes.records {
            accounts.insert(address, bytes);
        }

        debug!(
            instruction = tx.instruction.name(),
            signer = %tx.signer,
            account = %target,
            "Processed transaction"
        );

        Ok(target)
    }

    fn initialize_model(
        &self,
        accounts: &HashMap<Address, Vec<u8>>,
        signer: &Address,
        model_id: &str,
        hyperparams: &Hyperparams,
    ) -> Result<Writes> {
        if hyperparams.vocab_size == 0 || hyperparams.embedding_dim == 0 || hyperparams.hidden_dim == 0 {
            return Err(LedgerError::InvalidRecord(format!(
                "Model {} has a zero dimension: {:?}",
                model_id, hyperparams
            )));
        }

        let address = Address::registry(&self.config.program_id, signer, model_id);
        if let Some(existing) = accounts.get(&address) {
            let existing = RegistryRecord::decode(existing)?;
            if existing.hyperparams != *hyperparams {
                return Err(LedgerError::AlreadyInitialized(address));
            }
            debug!(registry = %address, model_id = %model_id, "Registry already initialized");
            return Ok(Writes::none(address));
        }

        let record = RegistryRecord {
            authority: *signer,
            chunk_count: 0,
            hyperparams: *hyperparams,
        };

        info!(
            registry = %address,
            authority = %signer,
            model_id = %model_id,
            "Initialized model registry"
        );

        Ok(Writes::one(address, record.encode()))
    }

    fn upload_chunk(
        &self,
        accounts: &HashMap<Address, Vec<u8>>,
        signer: &Address,
        registry_address: &Address,
        chunk_index: u32,
        chunk_type: ChunkType,
        data: &[u8],
    ) -> Result<Writes> {
        let mut registry = accounts
            .get(registry_address)
            .ok_or(LedgerError::AccountNotFound(*registry_address))
            .and_then(|bytes| RegistryRecord::decode(bytes))?;

        if registry.authority != *signer {
            return Err(LedgerError::AuthorityMismatch {
                account: *registry_address,
                expected: registry.authority,
                found: *signer,
            });
        }

        let chunk_address = Address::chunk(&self.config.program_id, registry_address, chunk_index);
        if let Some(existing) = accounts.get(&chunk_address) {
            let existing = ChunkRecord::decode(existing)?;
            if existing.chunk_type != chunk_type {
                return Err(LedgerError::ChunkTypeConflict {
                    index: chunk_index,
                    existing: existing.chunk_type,
                    requested: chunk_type,
                });
            }
        }

        let record = ChunkRecord {
            authority: *signer,
            registry: *registry_address,
            chunk_index,
            chunk_type,
            words: ChunkRecord::pack_words(data),
        };

        let next_count = chunk_index.checked_add(1).ok_or_else(|| {
            LedgerError::InvalidRecord(format!("Chunk index {} out of range", chunk_index))
        })?;
        registry.chunk_count = registry.chunk_count.max(next_count);

        debug!(
            registry = %registry_address,
            chunk_index = chunk_index,
            chunk_type = ?chunk_type,
            size = data.len(),
            chunk_count = registry.chunk_count,
            "Stored chunk"
        );

        Ok(Writes {
            target: chunk_address,
            records: vec![
                (chunk_address, record.encode()),
                (*registry_address, registry.encode()),
            ],
        })
    }

    fn initialize_chat(
        &self,
        accounts: &HashMap<Address, Vec<u8>>,
        signer: &Address,
        model: &Address,
    ) -> Result<Writes> {
        if !accounts.contains_key(model) {
            return Err(LedgerError::AccountNotFound(*model));
        }

        let address = Address::chat(&self.config.program_id, model, signer);
        if accounts.contains_key(&address) {
            return Ok(Writes::none(address));
        }

        let record = ChatRecord::new(*signer, *model, chat::DEFAULT_CAPACITY as u32);
        info!(chat = %address, model = %model, user = %signer, "Initialized chat");
        Ok(Writes::one(address, record.encode()))
    }

    fn append_chat(
        &self,
        accounts: &HashMap<Address, Vec<u8>>,
        signer: &Address,
        chat_address: &Address,
        input: &[u8],
    ) -> Result<Writes> {
        let mut record = accounts
            .get(chat_address)
            .ok_or(LedgerError::AccountNotFound(*chat_address))
            .and_then(|bytes| ChatRecord::decode(bytes))?;

        if record.authority != *signer {
            return Err(LedgerError::AuthorityMismatch {
                account: *chat_address,
                expected: record.authority,
                found: *signer,
            });
        }

        record.append(input)?;
        Ok(Writes::one(*chat_address, record.encode()))
    }

    fn read_accounts(
        &self,
    ) -> Result<std::sync::RwLockReadGuard<'_, HashMap<Address, Vec<u8>>>> {
        self.accounts
            .read()
            .map_err(|_| LedgerError::Internal("Failed to acquire accounts read lock".into()))
    }

    fn persist(&self, address: &Address, bytes: &[u8]) -> Result<()> {
        let Some(dir) = &self.storage_dir else {
            return Ok(());
        };
        let path = dir
            .join(ACCOUNTS_DIR)
            .join(format!("{}.{}", address.to_hex(), ACCOUNT_EXT));
        write_atomic(&path, bytes)
    }

    /// Put an account file back to `previous`, or remove it if the account
    /// did not exist before.
    fn restore(&self, address: &Address, previous: Option<&[u8]>) {
        let Some(dir) = &self.storage_dir else {
            return;
        };
        let result = match previous {
            Some(bytes) => self.persist(address, bytes),
            None => {
                let path = dir
                    .join(ACCOUNTS_DIR)
                    .join(format!("{}.{}", address.to_hex(), ACCOUNT_EXT));
                std::fs::remove_file(path).map_err(LedgerError::from)
            }
        };
        if let Err(e) = result {
            error!(account = %address, error = %e, "Failed to restore account file");
        }
    }
}

/// Records an instruction wants written, validated before any is applied
struct Writes {
    target: Address,
    records: Vec<(Address, Vec<u8>)>,
}

impl Writes {
    fn none(target: Address) -> Self {
        Self {
            target,
            records: Vec::new(),
        }
    }

    fn one(target: Address, bytes: Vec<u8>) -> Self {
        Self {
            target,
            records: vec![(target, bytes)],
        }
    }
}

fn write_atomic(path: &Path, bytes: &[u8]) -> Result<()> {
    let temp_path = path.with_extension("tmp");
    std::fs::write(&temp_path, bytes)?;
    std::fs::rename(&temp_path, path)?;
    Ok(())
}
