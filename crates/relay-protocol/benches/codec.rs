//! Codec benchmarks for relay-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use relay_protocol::{codec, Frame};
use serde_json::json;

fn sample_frame() -> Frame {
    Frame::send_message(
        "6571f1c2a7",
        json!({
            "id": "6571f1c2a8",
            "chatId": "6571f1c2a9",
            "text": "x".repeat(64),
            "createdAt": "2024-01-01T00:00:00Z",
        }),
    )
}

fn bench_encode(c: &mut Criterion) {
    let frame = sample_frame();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("binary", |b| b.iter(|| codec::encode(black_box(&frame))));
    group.bench_function("text", |b| b.iter(|| codec::encode_text(black_box(&frame))));
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frame = sample_frame();
    let binary = codec::encode(&frame).unwrap();
    let text = codec::encode_text(&frame).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("binary", |b| b.iter(|| codec::decode(black_box(&binary))));
    group.bench_function("text", |b| b.iter(|| codec::decode_text(black_box(&text))));
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
