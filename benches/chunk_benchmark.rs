//! Chunked upload benchmarks

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use dropstream::transport::memory::MemoryTransport;
use dropstream::transport::CommitInfo;
use dropstream::upload::{BoundedReader, SessionDriver};
use tokio::io::{AsyncReadExt, AsyncWriteExt};

const PAYLOAD: u64 = 16 * 1024 * 1024;

fn benchmark_bounded_reader(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("bounded_reader");
    group.throughput(Throughput::Bytes(PAYLOAD));

    for chunk in [64 * 1024u64, 1024 * 1024, 4 * 1024 * 1024] {
        group.bench_with_input(BenchmarkId::from_parameter(chunk), &chunk, |b, &chunk| {
            b.to_async(&rt).iter(|| async move {
                let mut source = tokio::io::repeat(1).take(PAYLOAD);
                let mut sink = tokio::io::sink();
                let mut reader = BoundedReader::new(&mut source, chunk);
                let mut total = 0;
                loop {
                    total += tokio::io::copy(&mut reader, &mut sink).await.unwrap();
                    if reader.source_exhausted() {
                        break;
                    }
                    reader.reset(chunk);
                }
                sink.flush().await.unwrap();
                black_box(total)
            });
        });
    }

    group.finish();
}

fn benchmark_session_driver(c: &mut Criterion) {
    let rt = tokio::runtime::Runtime::new().unwrap();
    let mut group = c.benchmark_group("session_driver");
    group.throughput(Throughput::Bytes(PAYLOAD));

    for known_size in [false, true] {
        let name = if known_size { "known_size" } else { "unknown_size" };
        group.bench_function(name, |b| {
            b.to_async(&rt).iter(|| async move {
                let transport = MemoryTransport::new().discard_content();
                let total = known_size.then_some(PAYLOAD);
                let mut source = tokio::io::repeat(1).take(PAYLOAD);
                let mut driver = SessionDriver::new(&transport, 1024 * 1024, total);
                let summary = driver
                    .run(&mut source, &CommitInfo::new("/bench.bin"))
                    .await
                    .unwrap();
                black_box(summary.bytes_uploaded)
            });
        });
    }

    group.finish();
}

criterion_group!(benches, benchmark_bounded_reader, benchmark_session_driver);
criterion_main!(benches);
