//! Codec benchmarks for chorus-protocol.

use criterion::{black_box, criterion_group, criterion_main, Criterion, Throughput};
use chorus_protocol::{codec, ClientEnvelope, ServerEnvelope, UserId, WireFormat};

fn sample_message() -> ServerEnvelope {
    ServerEnvelope::new_message(
        "alice-bob".parse().unwrap(),
        UserId::new("alice").unwrap(),
        "x".repeat(64),
        1_700_000_000_000,
    )
}

fn bench_encode_small(c: &mut Criterion) {
    let envelope = sample_message();

    let mut group = c.benchmark_group("encode");
    group.throughput(Throughput::Elements(1));
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::encode_server(black_box(&envelope), WireFormat::Json))
    });
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::encode_server(black_box(&envelope), WireFormat::MessagePack))
    });
    group.finish();
}

fn bench_decode_small(c: &mut Criterion) {
    let envelope = ClientEnvelope::chat("alice-bob".parse().unwrap(), "x".repeat(64));
    let json = codec::encode_client(&envelope, WireFormat::Json).unwrap();
    let msgpack = codec::encode_client(&envelope, WireFormat::MessagePack).unwrap();

    let mut group = c.benchmark_group("decode");
    group.throughput(Throughput::Bytes(json.len() as u64));
    group.bench_function("json_64B", |b| {
        b.iter(|| codec::decode_client(black_box(&json), WireFormat::Json, 64 * 1024))
    });
    group.throughput(Throughput::Bytes(msgpack.len() as u64));
    group.bench_function("msgpack_64B", |b| {
        b.iter(|| codec::decode_client(black_box(&msgpack), WireFormat::MessagePack, 64 * 1024))
    });
    group.finish();
}

fn bench_unknown_envelope(c: &mut Criterion) {
    let data = br#"{"type":"read_receipt","payload":{"messageId":9,"roomId":"alice-bob"}}"#;

    c.bench_function("decode_unknown", |b| {
        b.iter(|| codec::decode_client(black_box(data), WireFormat::Json, 64 * 1024))
    });
}

criterion_group!(
    benches,
    bench_encode_small,
    bench_decode_small,
    bench_unknown_envelope
);
criterion_main!(benches);
