//! Sea client - Command Line Interface
//!
//! Quantizes small language models into ledger-sized chunks, publishes them
//! under a signed registry, and runs inference and chat against the
//! reconstructed weights.
//!
//! ## Commands
//!
//! ### Identity
//! - `keygen` - Create a signing identity
//!
//! ### Model Preparation
//! - `init-weights` - Write a randomly initialized model as safetensors
//! - `quantize` - Quantize a safetensors model into chunk files + manifest
//!
//! ### Ledger
//! - `upload` - Publish a quantized model (or dry-run the addresses)
//! - `inspect` - Show a registry record and its chunks
//!
//! ### Inference
//! - `inference` - Reconstruct a model and generate text
//! - `chat` - Converse with a published model, history kept on the ledger

use anyhow::{bail, Context, Result};
use clap::{Parser, Subcommand};
use client::model::registry::UPLOADED_MANIFEST_FILE;
use client::model::schema::infer_hyperparams;
use client::model::weights::{load_safetensors, random_model, save_safetensors};
use client::util::{format_rate, printable};
use client::{
    format_bytes, init_production_logging, init_simple_logging, load_model, prepare, read_chunks,
    verify_registry, ChatSession, ChunkTransport, ClientConfig, DirectoryTransport,
    DryRunTransport, GenerationConfig, Identity, InferenceEngine, LedgerTransport, LoadPolicy,
    LoadedModel, ModelRegistry, Uploader,
};
use ledger::{Address, Hyperparams, Ledger, LedgerConfig};
use std::io::{BufRead, Write};
use std::path::{Path, PathBuf};
use std::sync::Arc;
use std::time::Duration;
use tracing::{info, warn};

/// Sea - models on a size-constrained ledger
#[derive(Parser, Debug)]
#[command(name = "sea")]
#[command(about = "Quantize, publish and run small language models stored on a ledger", long_about = None)]
#[command(version)]
struct Cli {
    /// Config file (defaults to ~/.sea/config.toml)
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    /// Log level (trace, debug, info, warn, error); overrides the config file
    #[arg(long, global = true)]
    log_level: Option<String>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Create a signing identity
    Keygen {
        /// Identity name
        #[arg(short, long, default_value = "default")]
        name: String,

        /// Output file (defaults to ~/.sea/identity.toml)
        #[arg(short, long)]
        out: Option<PathBuf>,
    },

    /// Write a randomly initialized model as safetensors
    InitWeights {
        #[arg(long, default_value = "256")]
        vocab_size: u32,

        #[arg(long, default_value = "64")]
        embedding_dim: u32,

        #[arg(long, default_value = "128")]
        hidden_dim: u32,

        #[arg(long, default_value = "64")]
        context_length: u32,

        #[arg(long, default_value = "2")]
        layers: u32,

        #[arg(long, default_value = "0")]
        seed: u64,

        /// Output safetensors file
        #[arg(short, long)]
        out: PathBuf,
    },

    /// Quantize a safetensors model into chunk files and a manifest
    Quantize {
        /// Float32 safetensors weights
        #[arg(short, long)]
        weights: PathBuf,

        /// Quantization width (8, 16 or 32)
        #[arg(short, long)]
        bits: Option<u32>,

        /// Largest chunk in bytes
        #[arg(long)]
        max_chunk_size: Option<i64>,

        /// Context window; not recoverable from the weights
        #[arg(long, default_value = "64")]
        context_length: u32,

        /// Model id (defaults to the weights file stem)
        #[arg(long)]
        model_id: Option<String>,

        /// Output directory for chunk files and model_registry.json
        #[arg(short, long)]
        out_dir: PathBuf,
    },

    /// Publish a quantized model to the ledger
    Upload {
        /// Directory written by `quantize`
        #[arg(short, long)]
        model_dir: PathBuf,

        /// Derive and print addresses without writing anything
        #[arg(long)]
        dry_run: bool,

        /// Skip chunks the manifest already records an address for
        #[arg(long)]
        resume: bool,

        /// Ledger directory (defaults to the config file's ledger.dir)
        #[arg(long)]
        ledger_dir: Option<PathBuf>,

        /// Program id (hex); required when creating a new ledger for a dry run
        #[arg(long)]
        program_id: Option<String>,

        /// Identity file (defaults to ~/.sea/identity.toml)
        #[arg(short, long)]
        keypair: Option<PathBuf>,
    },

    /// Reconstruct a model and generate text
    Inference {
        /// Model directory holding the manifest (and chunk files when no ledger is used)
        #[arg(short, long)]
        model_dir: PathBuf,

        /// Read chunks from this ledger instead of local chunk files
        #[arg(long)]
        ledger_dir: Option<PathBuf>,

        /// Zero-fill missing chunks instead of failing
        #[arg(long)]
        non_strict: bool,

        #[arg(short, long)]
        prompt: String,

        #[arg(long)]
        max_tokens: Option<u32>,

        #[arg(long)]
        temperature: Option<f32>,

        #[arg(long)]
        top_k: Option<usize>,

        #[arg(long)]
        top_p: Option<f32>,

        /// Always pick the most likely token
        #[arg(long)]
        greedy: bool,

        #[arg(long)]
        seed: Option<u64>,
    },

    /// Converse with a published model; history is kept on the ledger
    Chat {
        /// Model directory holding the uploaded manifest
        #[arg(short, long)]
        model_dir: PathBuf,

        #[arg(long)]
        ledger_dir: Option<PathBuf>,

        /// Identity file (defaults to ~/.sea/identity.toml)
        #[arg(short, long)]
        keypair: Option<PathBuf>,

        #[arg(long)]
        max_tokens: Option<u32>,

        #[arg(long)]
        greedy: bool,
    },

    /// Show a registry record and its chunks
    Inspect {
        #[arg(long)]
        ledger_dir: Option<PathBuf>,

        /// Registry address (hex)
        #[arg(short, long)]
        registry: String,
    },
}

#[tokio::main]
async fn main() -> Result<()> {
    let cli = Cli::parse();

    let config_path = match &cli.config {
        Some(path) => path.clone(),
        None => ClientConfig::default_path()?,
    };
    let config = ClientConfig::load_or_default(&config_path)
        .with_context(|| format!("Failed to load config from {}", config_path.display()))?;
    init_logging(&config, cli.log_level.as_deref())?;

    match cli.command {
        Commands::Keygen { name, out } => cmd_keygen(name, out),
        Commands::InitWeights {
            vocab_size,
            embedding_dim,
            hidden_dim,
            context_length,
            layers,
            seed,
            out,
        } => {
            let hyperparams = Hyperparams {
                vocab_size,
                embedding_dim,
                hidden_dim,
                context_length,
                layer_count: layers,
            };
            cmd_init_weights(hyperparams, seed, &out)
        }
        Commands::Quantize {
            weights,
            bits,
            max_chunk_size,
            context_length,
            model_id,
            out_dir,
        } => cmd_quantize(
            &config,
            &weights,
            bits,
            max_chunk_size,
            context_length,
            model_id,
            &out_dir,
        ),
        Commands::Upload {
            model_dir,
            dry_run,
            resume,
            ledger_dir,
            program_id,
            keypair,
        } => {
            cmd_upload(
                &config,
                &model_dir,
                dry_run,
                resume,
                ledger_dir,
                program_id,
                keypair,
            )
            .await
        }
        Commands::Inference {
            model_dir,
            ledger_dir,
            non_strict,
            prompt,
            max_tokens,
            temperature,
            top_k,
            top_p,
            greedy,
            seed,
        } => {
            let mut generation = config.generation.clone();
            if let Some(max_tokens) = max_tokens {
                generation.max_tokens = max_tokens;
            }
            if let Some(temperature) = temperature {
                generation.temperature = temperature;
            }
            if let Some(top_k) = top_k {
                generation.top_k = top_k;
            }
            if let Some(top_p) = top_p {
                generation.top_p = top_p;
            }
            if let Some(seed) = seed {
                generation.seed = seed;
            }
            generation.greedy |= greedy;
            generation.validate()?;
            cmd_inference(&config, &model_dir, ledger_dir, non_strict, &prompt, &generation).await
        }
        Commands::Chat {
            model_dir,
            ledger_dir,
            keypair,
            max_tokens,
            greedy,
        } => {
            let mut generation = config.generation.clone();
            if let Some(max_tokens) = max_tokens {
                generation.max_tokens = max_tokens;
            }
            generation.greedy |= greedy;
            generation.validate()?;
            cmd_chat(&config, &model_dir, ledger_dir, keypair, generation).await
        }
        Commands::Inspect {
            ledger_dir,
            registry,
        } => cmd_inspect(&config, ledger_dir, &registry),
    }
}

fn init_logging(config: &ClientConfig, level_override: Option<&str>) -> Result<()> {
    let level = level_override.unwrap_or(&config.logging.level);
    if config.logging.log_to_file {
        init_production_logging(level, Some(config.log_dir()?))
    } else {
        init_simple_logging(level)
    }
}

fn cmd_keygen(name: String, out: Option<PathBuf>) -> Result<()> {
    let path = match out {
        Some(path) => path,
        None => Identity::default_path()?,
    };

    println!("🔑 Generating identity '{}'...", name);
    let identity = Identity::generate(name);
    identity
        .save(&path)
        .with_context(|| format!("Failed to save identity to {}", path.display()))?;

    println!("   Address: {}", identity.address());
    println!("\n✓ Identity saved to: {}", path.display());
    Ok(())
}

fn cmd_init_weights(hyperparams: Hyperparams, seed: u64, out: &Path) -> Result<()> {
    println!("🎲 Initializing random weights...");
    println!("   Vocab: {}", hyperparams.vocab_size);
    println!("   Embedding dim: {}", hyperparams.embedding_dim);
    println!("   Hidden dim: {}", hyperparams.hidden_dim);
    println!("   Layers: {}", hyperparams.layer_count);
    println!("   Seed: {}", seed);

    let tensors = random_model(&hyperparams, seed)?;
    save_safetensors(out, &tensors)
        .with_context(|| format!("Failed to write weights to {}", out.display()))?;

    println!("\n✓ Weights saved to: {}", out.display());
    Ok(())
}

fn cmd_quantize(
    config: &ClientConfig,
    weights: &Path,
    bits: Option<u32>,
    max_chunk_size: Option<i64>,
    context_length: u32,
    model_id: Option<String>,
    out_dir: &Path,
) -> Result<()> {
    let bits = bits.unwrap_or(config.quantize.bits);
    let max_chunk_size = max_chunk_size.unwrap_or(config.quantize.max_chunk_size);
    let model_id = match model_id {
        Some(id) => id,
        None => weights
            .file_stem()
            .and_then(|s| s.to_str())
            .context("Cannot derive a model id from the weights path; pass --model-id")?
            .to_string(),
    };

    println!("📦 Quantizing {}...", weights.display());
    let tensors = load_safetensors(weights)
        .with_context(|| format!("Failed to read weights from {}", weights.display()))?;
    let hyperparams = infer_hyperparams(&tensors, context_length)?;
    println!("   Model id: {}", model_id);
    println!("   Tensors: {}", tensors.len());
    println!("   Topology: {:?}", hyperparams);

    let prepared = prepare(&model_id, &tensors, hyperparams, bits, max_chunk_size)?;
    prepared.write_to(out_dir)?;

    println!("\n✓ Wrote {} chunks to {}", prepared.chunks.len(), out_dir.display());
    println!("   Bits: {}", bits);
    println!(
        "   Total size: {}",
        format_bytes(prepared.registry.total_size as u64)
    );
    println!("\nNext steps:");
    println!("  sea upload --model-dir {} --dry-run", out_dir.display());
    Ok(())
}

async fn cmd_upload(
    config: &ClientConfig,
    model_dir: &Path,
    dry_run: bool,
    resume: bool,
    ledger_dir: Option<PathBuf>,
    program_id: Option<String>,
    keypair: Option<PathBuf>,
) -> Result<()> {
    let mut registry = ModelRegistry::load_dir(model_dir)
        .with_context(|| format!("Failed to load manifest from {}", model_dir.display()))?;
    let chunks = read_chunks(model_dir, &registry)?;
    let identity = load_identity(keypair)?;
    let program_id = program_id
        .map(|s| Address::from_hex(&s))
        .transpose()
        .context("Invalid program id")?;

    let mut options = config.upload_options();
    options.resume = resume;
    if dry_run {
        options.pacing = Duration::ZERO;
    }

    println!("🚀 Uploading model '{}'", registry.model_id);
    println!("   Chunks: {}", chunks.len());
    println!("   Size: {}", format_bytes(registry.total_size as u64));
    println!("   Authority: {}", identity.address());

    let report = if dry_run {
        let program_id = match program_id {
            Some(id) => id,
            None => open_existing_ledger(config, ledger_dir)
                .context("Pass --program-id to dry-run without a ledger")?
                .program_id(),
        };
        println!("   Mode: dry run (program {})", program_id);
        let transport = DryRunTransport::new(program_id, identity.address());
        let report = Uploader::new(&transport, options)
            .upload(&mut registry, &chunks)
            .await?;
        println!("   Would write {}", format_bytes(transport.bytes_planned() as u64));
        report
    } else {
        let ledger = Arc::new(open_ledger(config, ledger_dir, program_id)?);
        println!("   Program: {}", ledger.program_id());
        let transport = LedgerTransport::new(ledger, identity.keypair.clone());
        Uploader::new(&transport, options)
            .upload(&mut registry, &chunks)
            .await?
    };

    for (index, address) in &report.succeeded {
        println!("   chunk_{} → {}", index, address);
    }
    for (index, reason) in &report.failed {
        eprintln!("   ✗ chunk_{}: {}", index, reason);
    }

    if dry_run {
        println!("\n✓ Dry run complete, nothing written");
        return Ok(());
    }

    let manifest_path = model_dir.join(UPLOADED_MANIFEST_FILE);
    registry.save(&manifest_path)?;
    if let Some(address) = registry.registry_address {
        println!("\n   Registry: {}", address);
    }
    println!("   Manifest: {}", manifest_path.display());

    if !report.is_complete() {
        bail!(
            "{} of {} chunks failed; re-run with --resume to retry them",
            report.failed.len(),
            chunks.len()
        );
    }
    println!("\n✅ Upload complete");
    Ok(())
}

async fn cmd_inference(
    config: &ClientConfig,
    model_dir: &Path,
    ledger_dir: Option<PathBuf>,
    non_strict: bool,
    prompt: &str,
    generation: &GenerationConfig,
) -> Result<()> {
    let registry = ModelRegistry::load_dir(model_dir)
        .with_context(|| format!("Failed to load manifest from {}", model_dir.display()))?;

    let loaded = match ledger_dir {
        Some(dir) => {
            let ledger = Arc::new(open_existing_ledger(config, Some(dir))?);
            load_from_ledger(config, &registry, ledger, non_strict).await?
        }
        None => {
            let transport = DirectoryTransport::new(model_dir);
            load(&registry, &transport, &load_policy(config, non_strict)).await?
        }
    };

    let engine = InferenceEngine::from_loaded(&loaded)?;
    println!("🤖 Model '{}' loaded", loaded.model_id);
    println!(
        "   Layers: {}/{}",
        engine.weights().available_layers(),
        loaded.hyperparams.layer_count
    );
    println!("   Memory: {}", format_bytes(engine.weights().memory_usage() as u64));

    let result = engine.generate(prompt, generation)?;
    println!("\n{}\n", result.text);
    println!(
        "   {} tokens in {:.2}s ({}, stop: {:?})",
        result.completion_tokens(),
        result.elapsed.as_secs_f64(),
        format_rate(result.tokens_per_second),
        result.stop_reason
    );
    Ok(())
}

async fn cmd_chat(
    config: &ClientConfig,
    model_dir: &Path,
    ledger_dir: Option<PathBuf>,
    keypair: Option<PathBuf>,
    generation: GenerationConfig,
) -> Result<()> {
    let registry = ModelRegistry::load_dir(model_dir)
        .with_context(|| format!("Failed to load manifest from {}", model_dir.display()))?;
    let model = registry
        .registry_address
        .context("Manifest has no registry address. Run 'sea upload' first.")?;
    let identity = load_identity(keypair)?;

    let ledger = Arc::new(open_existing_ledger(config, ledger_dir)?);
    let loaded = load_from_ledger(config, &registry, ledger.clone(), false).await?;
    let engine = InferenceEngine::from_loaded(&loaded)?;

    let mut chat = ChatSession::open(ledger, identity.keypair.clone(), &engine, model, generation)?;
    println!("💬 Chatting with '{}' as {}", registry.model_id, identity.name);
    println!("   Chat account: {}", chat.address());
    println!("   History: {}", printable(&chat.history()?));
    println!("   Type /quit to exit\n");

    let stdin = std::io::stdin();
    loop {
        print!("> ");
        std::io::stdout().flush()?;

        let mut line = String::new();
        if stdin.lock().read_line(&mut line)? == 0 {
            break;
        }
        let message = line.trim_end_matches(['\r', '\n']);
        if message == "/quit" {
            break;
        }
        if message.is_empty() {
            continue;
        }

        match chat.send(message) {
            Ok(reply) => {
                println!("{}", printable(reply.reply.as_bytes()));
                println!("   ({} tokens, history {} bytes)", reply.result.completion_tokens(), reply.history_len);
            }
            Err(e) => eprintln!("✗ {}", e),
        }
    }
    Ok(())
}

fn cmd_inspect(config: &ClientConfig, ledger_dir: Option<PathBuf>, registry: &str) -> Result<()> {
    let registry = Address::from_hex(registry).context("Invalid registry address")?;
    let ledger = open_existing_ledger(config, ledger_dir)?;
    let record = ledger
        .registry(&registry)
        .with_context(|| format!("No registry at {}", registry))?;

    println!("📋 Registry {}", registry);
    println!("   Program: {}", ledger.program_id());
    println!("   Authority: {}", record.authority);
    println!("   Chunk count: {}", record.chunk_count);
    println!("   Vocab: {}", record.hyperparams.vocab_size);
    println!("   Embedding dim: {}", record.hyperparams.embedding_dim);
    println!("   Hidden dim: {}", record.hyperparams.hidden_dim);
    println!("   Context length: {}", record.hyperparams.context_length);
    println!("   Layers: {}", record.hyperparams.layer_count);

    println!("\n   Chunks:");
    for index in 0..record.chunk_count {
        match ledger.chunk(&registry, index)? {
            Some(chunk) => println!(
                "   [{}] {:?} {}",
                index,
                chunk.chunk_type,
                format_bytes((chunk.words.len() * 4) as u64)
            ),
            None => println!("   [{}] (not uploaded)", index),
        }
    }
    Ok(())
}

fn load_identity(path: Option<PathBuf>) -> Result<Identity> {
    let path = match path {
        Some(path) => path,
        None => Identity::default_path()?,
    };
    Identity::load(&path).with_context(|| {
        format!(
            "Failed to load identity from {}. Run 'sea keygen' first.",
            path.display()
        )
    })
}

/// Open the ledger at `dir` (or the configured one). A missing ledger is
/// created, under `program_id` if given, else under a fresh random id.
fn open_ledger(config: &ClientConfig, dir: Option<PathBuf>, program_id: Option<Address>) -> Result<Ledger> {
    let dir = resolve_ledger_dir(config, dir)?;

    if Ledger::exists(&dir) && program_id.is_none() {
        return Ledger::open(&dir).with_context(|| format!("Failed to open ledger at {}", dir.display()));
    }

    let program_id = program_id.unwrap_or_else(|| {
        let id = Address::from(&client::identity::generate_keypair().verifying_key());
        warn!(dir = %dir.display(), program_id = %id, "No ledger found, creating one");
        id
    });
    let ledger_config = LedgerConfig::new(program_id).with_max_record_size(config.ledger.max_record_size);
    Ledger::open_or_create(&dir, ledger_config)
        .with_context(|| format!("Failed to open ledger at {}", dir.display()))
}

fn open_existing_ledger(config: &ClientConfig, dir: Option<PathBuf>) -> Result<Ledger> {
    let dir = resolve_ledger_dir(config, dir)?;
    if !Ledger::exists(&dir) {
        bail!("No ledger at {}", dir.display());
    }
    Ledger::open(&dir).with_context(|| format!("Failed to open ledger at {}", dir.display()))
}

fn resolve_ledger_dir(config: &ClientConfig, dir: Option<PathBuf>) -> Result<PathBuf> {
    match dir {
        Some(dir) => Ok(dir),
        None => Ok(config.ledger_dir()?),
    }
}

async fn load_from_ledger(
    config: &ClientConfig,
    registry: &ModelRegistry,
    ledger: Arc<Ledger>,
    non_strict: bool,
) -> Result<LoadedModel> {
    let address = registry
        .registry_address
        .context("Manifest has no registry address. Run 'sea upload' first.")?;
    let transport = LedgerTransport::reader(ledger);
    let policy = load_policy(config, non_strict);

    let record = transport
        .registry_record(&address)?
        .with_context(|| format!("Registry {} not found on the ledger", address))?;
    verify_registry(registry, &record, &policy)?;
    info!(registry = %address, chunk_count = record.chunk_count, "Registry verified");

    load(registry, &transport, &policy).await
}

fn load_policy(config: &ClientConfig, non_strict: bool) -> LoadPolicy {
    let mut policy = config.load_policy();
    policy.strict &= !non_strict;
    policy
}

async fn load<T: ChunkTransport + ?Sized>(
    registry: &ModelRegistry,
    transport: &T,
    policy: &LoadPolicy,
) -> Result<LoadedModel> {
    let loaded = load_model(registry, transport, policy).await?;
    if !loaded.report.is_complete() {
        println!(
            "⚠️  Missing chunks {:?}; zero-filled tensors: {}",
            loaded.report.missing_chunks,
            loaded.report.affected_tensors.join(", ")
        );
    }
    Ok(loaded)
}
