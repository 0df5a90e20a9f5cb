use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use hyperstream_core::compression::{compress_decode, compress_encode};
use hyperstream_core::key::TopicKey;
use hyperstream_core::{aead, compression};

fn aead_roundtrip_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let key = TopicKey::generate().derive();
    let payload = vec![0xABu8; 4 * 1024 * 1024];

    let mut group = c.benchmark_group("aead_roundtrip");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("encode_4mib", |b| {
        b.to_async(&rt).iter(|| async {
            let mut out = Vec::new();
            aead::aead_encode(&key, black_box(payload.as_slice()), &mut out)
                .await
                .unwrap();
            black_box(out);
        });
    });
    group.finish();
}

fn compression_benchmark(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let payload = b"hyperstream payload filler text ".repeat(64 * 1024);

    let mut group = c.benchmark_group("compression");
    group.throughput(Throughput::Bytes(payload.len() as u64));
    group.bench_function("zstd_level3_encode", |b| {
        b.to_async(&rt).iter(|| async {
            let mut out = Vec::new();
            compress_encode(true, black_box(payload.as_slice()), &mut out)
                .await
                .unwrap();
            black_box(out);
        });
    });
    group.bench_function("zstd_level3_roundtrip", |b| {
        b.to_async(&rt).iter(|| async {
            let mut compressed = Vec::new();
            compress_encode(true, payload.as_slice(), &mut compressed)
                .await
                .unwrap();
            let mut decoded = Vec::new();
            compress_decode(compressed.as_slice(), &mut decoded).await.unwrap();
            black_box(decoded);
        });
    });
    group.finish();
}

fn should_compress_benchmark(c: &mut Criterion) {
    c.bench_function("should_compress_decision", |b| {
        b.iter(|| compression::should_compress(black_box(std::path::Path::new("archive.tar.gz"))));
    });
}

criterion_group!(benches, aead_roundtrip_benchmark, compression_benchmark, should_compress_benchmark);
criterion_main!(benches);
