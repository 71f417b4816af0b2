//! End-to-end: random weights → quantize → publish → reconstruct → generate

use client::model::weights::random_model;
use client::transport::ChunkKey;
use client::{
    load_model, prepare, verify_registry, ChunkTransport, ClientError, GenerationConfig,
    InferenceEngine, LedgerTransport, LoadPolicy, PreparedModel, TransportError, UploadOptions,
    Uploader,
};
use client::identity::generate_keypair;
use ed25519_dalek::SigningKey;
use ledger::{Address, Hyperparams, Ledger, LedgerConfig};
use std::sync::Arc;
use std::time::Duration;
use tempfile::TempDir;

fn hyperparams() -> Hyperparams {
    Hyperparams {
        vocab_size: 256,
        embedding_dim: 64,
        hidden_dim: 128,
        context_length: 64,
        layer_count: 2,
    }
}

fn options() -> UploadOptions {
    UploadOptions {
        pacing: Duration::ZERO,
        max_retries: 2,
        retry_backoff: Duration::from_millis(1),
        resume: false,
    }
}

fn prepared() -> PreparedModel {
    let tensors = random_model(&hyperparams(), 7).expect("Failed to build weights");
    // 65536 bytes at int8 → 7 chunks
    prepare("sea-tiny", &tensors, hyperparams(), 8, 10_000).expect("Failed to prepare model")
}

fn in_memory_ledger() -> Arc<Ledger> {
    Arc::new(Ledger::in_memory(LedgerConfig::new(Address::from_bytes([42; 32]))))
}

async fn publish(ledger: Arc<Ledger>, owner: &SigningKey, model: &mut PreparedModel) {
    let transport = LedgerTransport::new(ledger, owner.clone());
    let report = Uploader::new(&transport, options())
        .upload(&mut model.registry, &model.chunks)
        .await
        .expect("Upload failed");
    assert!(report.is_complete());
    assert_eq!(report.succeeded.len(), model.chunks.len());
}

#[tokio::test]
async fn test_publish_load_and_generate() {
    let ledger = in_memory_ledger();
    let owner = generate_keypair();
    let mut model = prepared();
    assert_eq!(model.chunks.len(), 7);
    publish(ledger.clone(), &owner, &mut model).await;

    let reader = LedgerTransport::reader(ledger.clone());
    let registry_address = model.registry.registry_address.expect("registry address recorded");
    let record = reader
        .registry_record(&registry_address)
        .unwrap()
        .expect("registry on ledger");
    assert_eq!(record.chunk_count, 7);
    verify_registry(&model.registry, &record, &LoadPolicy::default()).unwrap();

    let loaded = load_model(&model.registry, &reader, &LoadPolicy::default())
        .await
        .expect("Strict load failed");
    assert!(loaded.report.is_complete());
    assert_eq!(loaded.tensors.len(), 6);

    let engine = InferenceEngine::from_loaded(&loaded).unwrap();
    assert_eq!(engine.weights().available_layers(), 2);

    let config = GenerationConfig {
        max_tokens: 10,
        seed: 3,
        ..Default::default()
    };
    let result = engine.generate("Hello", &config).unwrap();
    assert!(result.text.starts_with("Hello"));
    let chars = result.text.chars().count();
    assert!((5..=15).contains(&chars), "unexpected length {}", chars);
}

#[tokio::test]
async fn test_published_model_survives_reopen() {
    let temp_dir = TempDir::new().expect("Failed to create temp dir");
    let owner = generate_keypair();
    let mut model = prepared();

    {
        let ledger = Arc::new(
            Ledger::create(temp_dir.path(), LedgerConfig::new(Address::from_bytes([5; 32])))
                .expect("Failed to create ledger"),
        );
        publish(ledger, &owner, &mut model).await;
    }

    let ledger = Arc::new(Ledger::open(temp_dir.path()).expect("Failed to reopen ledger"));
    let reader = LedgerTransport::reader(ledger);
    let loaded = load_model(&model.registry, &reader, &LoadPolicy::default())
        .await
        .expect("Load after reopen failed");
    assert!(loaded.report.is_complete());
}

#[tokio::test]
async fn test_missing_chunk_strict_and_lenient() {
    let ledger = in_memory_ledger();
    let owner = generate_keypair();
    let mut model = prepared();

    let transport = LedgerTransport::new(ledger.clone(), owner);
    let registry = transport
        .create_registry("sea-tiny", &hyperparams())
        .await
        .unwrap();
    model.registry.registry_address = Some(registry);
    for chunk in model.chunks.iter().filter(|c| c.index != 1) {
        let chunk_type = model.registry.chunks[&chunk.index].chunk_type;
        transport
            .put(&ChunkKey::new(registry, chunk.index), chunk_type, &chunk.data)
            .await
            .unwrap();
    }

    let reader = LedgerTransport::reader(ledger);
    let err = load_model(&model.registry, &reader, &LoadPolicy::default())
        .await
        .unwrap_err();
    assert!(matches!(err, ClientError::IncompleteModel { ref missing } if missing == &vec![1]));

    let lenient = LoadPolicy {
        strict: false,
        ..Default::default()
    };
    let loaded = load_model(&model.registry, &reader, &lenient).await.unwrap();
    assert_eq!(loaded.report.missing_chunks, vec![1]);
    assert!(!loaded.report.affected_tensors.is_empty());

    // Partial weights still run
    let engine = InferenceEngine::from_loaded(&loaded).unwrap();
    let config = GenerationConfig {
        max_tokens: 4,
        greedy: true,
        ..Default::default()
    };
    assert!(engine.generate("Hi", &config).unwrap().text.starts_with("Hi"));
}

#[tokio::test]
async fn test_missing_last_chunk_verifies_only_when_lenient() {
    let ledger = in_memory_ledger();
    let owner = generate_keypair();
    let mut model = prepared();
    let last = model.registry.chunk_count - 1;

    let transport = LedgerTransport::new(ledger.clone(), owner);
    let registry = transport
        .create_registry("sea-tiny", &hyperparams())
        .await
        .unwrap();
    model.registry.registry_address = Some(registry);
    for chunk in model.chunks.iter().filter(|c| c.index != last) {
        let chunk_type = model.registry.chunks[&chunk.index].chunk_type;
        transport
            .put(&ChunkKey::new(registry, chunk.index), chunk_type, &chunk.data)
            .await
            .unwrap();
    }

    let reader = LedgerTransport::reader(ledger);
    let record = reader.registry_record(&registry).unwrap().expect("registry on ledger");
    assert_eq!(record.chunk_count, last);

    let strict = LoadPolicy::default();
    assert!(matches!(
        verify_registry(&model.registry, &record, &strict),
        Err(ClientError::RegistryMismatch { .. })
    ));

    let lenient = LoadPolicy {
        strict: false,
        ..Default::default()
    };
    verify_registry(&model.registry, &record, &lenient).unwrap();
    let loaded = load_model(&model.registry, &reader, &lenient).await.unwrap();
    assert_eq!(loaded.report.missing_chunks, vec![last]);
    assert!(InferenceEngine::from_loaded(&loaded).is_ok());
}

#[tokio::test]
async fn test_top_k_one_matches_greedy() {
    let ledger = in_memory_ledger();
    let owner = generate_keypair();
    let mut model = prepared();
    publish(ledger.clone(), &owner, &mut model).await;

    let reader = LedgerTransport::reader(ledger);
    let loaded = load_model(&model.registry, &reader, &LoadPolicy::default())
        .await
        .unwrap();
    let engine = InferenceEngine::from_loaded(&loaded).unwrap();

    let greedy = GenerationConfig {
        max_tokens: 8,
        greedy: true,
        ..Default::default()
    };
    let top_one = GenerationConfig {
        max_tokens: 8,
        temperature: 5.0,
        top_k: 1,
        top_p: 1.0,
        seed: 99,
        ..Default::default()
    };
    let a = engine.generate("abc", &greedy).unwrap();
    let b = engine.generate("abc", &top_one).unwrap();
    assert_eq!(a.tokens, b.tokens);
}

#[tokio::test]
async fn test_foreign_signer_cannot_overwrite_chunks() {
    let ledger = in_memory_ledger();
    let owner = generate_keypair();
    let mut model = prepared();
    publish(ledger.clone(), &owner, &mut model).await;
    let registry = model.registry.registry_address.unwrap();

    let before = ledger.chunk(&registry, 0).unwrap().unwrap();

    let intruder = LedgerTransport::new(ledger.clone(), generate_keypair());
    let err = intruder
        .put(&ChunkKey::new(registry, 0), before.chunk_type, &[0xAA; 64])
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::AuthorityMismatch { .. }));

    let err = intruder
        .put(&ChunkKey::new(registry, 7), before.chunk_type, &[0xAA; 64])
        .await
        .unwrap_err();
    assert!(matches!(err, TransportError::AuthorityMismatch { .. }));

    assert_eq!(ledger.chunk(&registry, 0).unwrap().unwrap(), before);
    assert!(ledger.chunk(&registry, 7).unwrap().is_none());
    assert_eq!(ledger.registry(&registry).unwrap().chunk_count, 7);
}
