use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use jfe_codec::{Aes256GcmKey, StaticKeyProvider, AES_256_GCM_RANDOMIZED};
use jfe_io::{
    decrypt_stream, encrypt_stream, BufferPool, CompressionAlgorithm, CompressionOptions,
    DecryptStrategy, EncryptionOptions, JsonProcessor, OperationContext, StreamConfig,
};
use serde_json::json;
use std::io::Cursor;

fn generate_document(items: usize) -> Vec<u8> {
    let users = ["alice", "bob", "carol", "dave", "eve"];
    let orders: Vec<_> = (0..items)
        .map(|i| {
            json!({
                "id": i,
                "user": users[i % users.len()],
                "amount": (i as f64) * 1.5,
                "note": format!("Order note {}", i % 100),
            })
        })
        .collect();

    serde_json::to_vec(&json!({
        "id": "bench",
        "customer": "Jane Doe",
        "ssn": "123-45-6789",
        "balance": 1024.5,
        "active": true,
        "orders": orders,
        "notes": "lorem ipsum dolor sit amet ".repeat(items / 10 + 1),
    }))
    .unwrap()
}

fn provider() -> StaticKeyProvider {
    StaticKeyProvider::with_key("bench", Aes256GcmKey::new([7u8; 32]))
}

fn options(compression: CompressionAlgorithm) -> EncryptionOptions {
    EncryptionOptions {
        paths_to_encrypt: ["/customer", "/ssn", "/balance", "/active", "/orders", "/notes"]
            .iter()
            .map(|p| p.to_string())
            .collect(),
        compression: CompressionOptions {
            algorithm: compression,
            level: if compression == CompressionAlgorithm::Zstd { 3 } else { 4 },
            min_compressed_length: 128,
        },
        ..EncryptionOptions::new("bench", AES_256_GCM_RANDOMIZED)
    }
}

fn bench_encrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("encrypt");
    let provider = provider();
    let pool = BufferPool::default();
    let ctx = OperationContext::new(&pool);
    let config = StreamConfig::default();

    for items in [100, 10_000] {
        let document = generate_document(items);
        group.throughput(Throughput::Bytes(document.len() as u64));

        for (name, compression, processor) in [
            ("stream", CompressionAlgorithm::None, JsonProcessor::Stream),
            ("stream_brotli", CompressionAlgorithm::Brotli, JsonProcessor::Stream),
            ("stream_zstd", CompressionAlgorithm::Zstd, JsonProcessor::Stream),
            ("tree", CompressionAlgorithm::None, JsonProcessor::Tree),
        ] {
            let options = EncryptionOptions {
                processor,
                ..options(compression)
            };
            group.bench_with_input(BenchmarkId::new(name, items), &document, |b, doc| {
                b.iter(|| {
                    let summary = encrypt_stream(
                        &mut doc.as_slice(),
                        Vec::with_capacity(doc.len() * 2),
                        &provider,
                        &options,
                        &config,
                        &ctx,
                    )
                    .unwrap();
                    black_box(summary.output)
                })
            });
        }
    }

    group.finish();
}

fn bench_decrypt(c: &mut Criterion) {
    let mut group = c.benchmark_group("decrypt");
    let provider = provider();
    let pool = BufferPool::default();
    let ctx = OperationContext::new(&pool);
    let config = StreamConfig::default();

    for items in [100, 10_000] {
        let document = generate_document(items);
        let encrypted = encrypt_stream(
            &mut document.as_slice(),
            Vec::new(),
            &provider,
            &options(CompressionAlgorithm::None),
            &config,
            &ctx,
        )
        .unwrap();
        let properties = encrypted.properties.clone();
        group.throughput(Throughput::Bytes(encrypted.output.len() as u64));

        for (name, strategy) in [
            ("prescan", DecryptStrategy::Prescan),
            ("single_pass", DecryptStrategy::SinglePass(properties.clone())),
            ("tree", DecryptStrategy::Tree),
        ] {
            group.bench_with_input(
                BenchmarkId::new(name, items),
                &encrypted.output,
                |b, doc| {
                    b.iter(|| {
                        let summary = decrypt_stream(
                            &mut Cursor::new(doc.as_slice()),
                            Vec::with_capacity(doc.len()),
                            &provider,
                            &strategy,
                            &config,
                            &ctx,
                        )
                        .unwrap();
                        black_box(summary.output)
                    })
                },
            );
        }
    }

    group.finish();
}

criterion_group!(benches, bench_encrypt, bench_decrypt);
criterion_main!(benches);
