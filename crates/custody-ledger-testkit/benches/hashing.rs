//! Canonical encoding and hashing throughput.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};

use custody_ledger::check_chain;
use custody_ledger::core::{canonical_content_bytes, Event, GENESIS_HASH};
use custody_ledger_testkit::vectors::all_vectors;

fn bench_canonical(c: &mut Criterion) {
    let mut group = c.benchmark_group("canonical");
    for vector in all_vectors() {
        let bytes = canonical_content_bytes(&vector.content);
        group.throughput(Throughput::Bytes(bytes.len() as u64));
        group.bench_with_input(
            BenchmarkId::new("encode", vector.name),
            &vector.content,
            |b, content| b.iter(|| canonical_content_bytes(black_box(content))),
        );
        group.bench_with_input(
            BenchmarkId::new("data_hash", vector.name),
            &vector.content,
            |b, content| b.iter(|| black_box(content).data_hash()),
        );
    }
    group.finish();
}

fn bench_verify(c: &mut Criterion) {
    let template = all_vectors()
        .into_iter()
        .nth(1)
        .map(|v| v.content)
        .unwrap();

    let mut group = c.benchmark_group("verify_chain");
    for len in [10usize, 100, 1_000] {
        let mut events = Vec::with_capacity(len);
        let mut previous = GENESIS_HASH;
        for i in 0..len {
            let mut content = template.clone();
            content.id = custody_ledger::core::EventId::from_u128(i as u128);
            let event = Event::link(content, previous, i as u64 + 1);
            previous = *event.data_hash();
            events.push(event);
        }
        let shipment = template.shipment_id.clone();
        let at = template.timestamp;

        group.throughput(Throughput::Elements(len as u64));
        group.bench_with_input(BenchmarkId::from_parameter(len), &events, |b, events| {
            b.iter(|| check_chain(&shipment, black_box(events), at))
        });
    }
    group.finish();
}

criterion_group!(benches, bench_canonical, bench_verify);
criterion_main!(benches);
