//! Codec benchmarks for tether-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use serde_json::json;
use tether_protocol::{codec, Encoding, Frame};

fn sample_frame() -> Frame {
    Frame::push(
        "1",
        "42",
        "room:lobby",
        "new_msg",
        json!({"body": "x".repeat(64), "user": "alice"}),
    )
}

fn bench_encode(c: &mut Criterion) {
    let frame = sample_frame();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("json", |b| {
        b.iter(|| codec::encode(black_box(&frame), Encoding::Json))
    });
    group.bench_function("msgpack", |b| {
        b.iter(|| codec::encode(black_box(&frame), Encoding::Msgpack))
    });
    group.finish();
}

fn bench_decode(c: &mut Criterion) {
    let frame = sample_frame();
    let text = codec::encode(&frame, Encoding::Json).unwrap();
    let binary = codec::encode(&frame, Encoding::Msgpack).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(text.len() as u64));
    group.bench_function("json", |b| b.iter(|| codec::decode(black_box(&text))));
    group.throughput(Throughput::Bytes(binary.len() as u64));
    group.bench_function("msgpack", |b| b.iter(|| codec::decode(black_box(&binary))));
    group.finish();
}

criterion_group!(benches, bench_encode, bench_decode);
criterion_main!(benches);
