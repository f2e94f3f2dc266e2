//! Batch Engine Benchmarks
//!
//! Serialization and parse throughput of batch payloads.
//!
//! Run with: cargo bench --bench batch_benchmarks

use criterion::{BenchmarkId, Criterion, Throughput, criterion_group, criterion_main};
use odata::{
    BatchConfig, BatchDispatcher, BatchItem, BatchRequestParser, BatchRequestSerializer,
    BatchResponseParser, Boundary, Bytes, Changeset, ResponseItem, SubRequest,
};
use odata_core::test_util::EchoHandler;
use std::hint::black_box;
use std::io::Cursor;

fn items(count: usize, body_size: usize) -> Vec<BatchItem> {
    let body = Bytes::from(vec![b'x'; body_size]);
    (0..count)
        .map(|i| {
            if i % 4 == 3 {
                Changeset::new()
                    .add(SubRequest::post("Products").body(body.clone()))
                    .add(SubRequest::patch(format!("Products({i})")).body(body.clone()))
                    .into()
            } else {
                BatchItem::Retrieve(SubRequest::get(format!("Products({i})")))
            }
        })
        .collect()
}

fn request_body(items: &[BatchItem], config: &BatchConfig) -> (String, Vec<u8>) {
    let mut serializer =
        BatchRequestSerializer::with_boundary(Boundary::parse("batch_bench").unwrap(), config)
            .unwrap();
    let mut out = Vec::new();
    serializer.serialize(items, &mut out).unwrap();
    (serializer.content_type(), out)
}

// ============================================================================
// Serialization
// ============================================================================

fn bench_serialize(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_serialize");
    let config = BatchConfig::default();

    for &(count, body_size) in &[(10, 64), (100, 64), (100, 16 * 1024)] {
        let items = items(count, body_size);
        let (_, wire) = request_body(&items, &config);
        group.throughput(Throughput::Bytes(wire.len() as u64));

        group.bench_with_input(
            BenchmarkId::new("frames", format!("{count}x{body_size}")),
            &items,
            |b, items| {
                b.iter(|| {
                    let mut serializer = BatchRequestSerializer::new(&config).unwrap();
                    let mut frames = 0;
                    for item in items {
                        frames += serializer.encode_item(black_box(item)).unwrap().len();
                    }
                    serializer.finish().unwrap();
                    black_box(frames)
                })
            },
        );

        group.bench_with_input(
            BenchmarkId::new("to_vec", format!("{count}x{body_size}")),
            &items,
            |b, items| {
                b.iter(|| {
                    let mut serializer = BatchRequestSerializer::new(&config).unwrap();
                    let mut out = Vec::with_capacity(wire.len());
                    serializer.serialize(black_box(items), &mut out).unwrap();
                    black_box(out.len())
                })
            },
        );
    }

    group.finish();
}

// ============================================================================
// Parsing
// ============================================================================

fn bench_parse_request(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_parse_request");
    let config = BatchConfig::default();

    for &(count, body_size) in &[(10, 64), (100, 64), (100, 16 * 1024)] {
        let (_, wire) = request_body(&items(count, body_size), &config);
        let wire = Bytes::from(wire);
        group.throughput(Throughput::Bytes(wire.len() as u64));

        group.bench_function(format!("{count}x{body_size}"), |b| {
            b.iter(|| {
                let parser = BatchRequestParser::new(
                    Cursor::new(black_box(wire.clone())),
                    Boundary::parse("batch_bench").unwrap(),
                    &config,
                )
                .unwrap();
                black_box(parser.map(|item| item.unwrap()).count())
            })
        });
    }

    group.finish();
}

fn bench_parse_response(c: &mut Criterion) {
    let mut group = c.benchmark_group("batch_parse_response");
    let config = BatchConfig::default();

    for &(count, body_size) in &[(10, 64), (100, 64), (100, 16 * 1024)] {
        let (content_type, wire) = request_body(&items(count, body_size), &config);
        let mut handler = EchoHandler::new();
        let response = BatchDispatcher::new(config.clone())
            .atomic_changesets(false)
            .respond(Cursor::new(wire), &content_type, &mut handler)
            .unwrap();
        group.throughput(Throughput::Bytes(response.body.len() as u64));

        group.bench_function(format!("{count}x{body_size}"), |b| {
            b.iter(|| {
                let parser = BatchResponseParser::from_content_type(
                    Cursor::new(black_box(response.body.clone())),
                    &response.content_type,
                    &config,
                )
                .unwrap();
                let mut members = 0;
                for item in parser {
                    match item.unwrap() {
                        ResponseItem::Changeset(mut changeset) => {
                            members += changeset.by_ref().count();
                            changeset.close();
                        }
                        _ => members += 1,
                    }
                }
                black_box(members)
            })
        });
    }

    group.finish();
}

criterion_group!(
    batch_benches,
    bench_serialize,
    bench_parse_request,
    bench_parse_response,
);

criterion_main!(batch_benches);
