use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use regidx::{Cache, IndexDefinition, Key, Operator, Query, RegionConfig, Value};

fn row(i: i64) -> Value {
    Value::object([
        ("ID", Value::Integer(i)),
        ("status", Value::text(if i % 2 == 0 { "active" } else { "inactive" })),
        ("score", Value::Float((i % 1000) as f64 / 10.0)),
    ])
}

fn bench_put_with_indexes(c: &mut Criterion) {
    let mut group = c.benchmark_group("put");
    for indexes in [0usize, 1, 3] {
        group.bench_with_input(BenchmarkId::from_parameter(indexes), &indexes, |b, &indexes| {
            let cache = Cache::new();
            let region = cache.create_region("/bench_put", RegionConfig::partition(31)).unwrap();
            let defs = [
                IndexDefinition::range("id", "ID", "/bench_put"),
                IndexDefinition::hash("status", "status", "/bench_put"),
                IndexDefinition::range("score", "score", "/bench_put"),
            ];
            for def in defs.into_iter().take(indexes) {
                region.create_index(def).unwrap();
            }
            let mut i = 0i64;
            b.iter(|| {
                region.put(Key::Int(i % 10_000), row(i)).unwrap();
                i += 1;
            });
        });
    }
    group.finish();
}

fn bench_lookup(c: &mut Criterion) {
    let cache = Cache::new();
    let region = cache.create_region("/bench_lookup", RegionConfig::replicate()).unwrap();
    for i in 0..10_000 {
        region.put(Key::Int(i), row(i)).unwrap();
    }
    let range = region
        .create_index(IndexDefinition::range("score", "score", "/bench_lookup"))
        .unwrap();
    let hash = region
        .create_index(IndexDefinition::hash("id", "ID", "/bench_lookup"))
        .unwrap();

    c.bench_function("range_lookup_gt", |b| {
        b.iter(|| range.lookup(Operator::GreaterThan, Some(&Key::float(black_box(95.0)))).unwrap())
    });
    c.bench_function("hash_lookup_eq", |b| {
        b.iter(|| hash.lookup(Operator::Equal, Some(&Key::Int(black_box(4242)))).unwrap())
    });

    let qs = cache.query_service();
    let query = Query::parse("SELECT * FROM /bench_lookup WHERE score > 95.0").unwrap();
    c.bench_function("query_indexed", |b| b.iter(|| qs.execute(black_box(&query)).unwrap()));
}

fn bench_create_index(c: &mut Criterion) {
    let cache = Cache::new();
    let region = cache.create_region("/bench_create", RegionConfig::replicate()).unwrap();
    for i in 0..10_000 {
        region.put(Key::Int(i), row(i)).unwrap();
    }
    c.bench_function("create_range_index_10k", |b| {
        b.iter(|| {
            region
                .create_index(IndexDefinition::range("tmp", "score", "/bench_create"))
                .unwrap();
            region.indexes().remove_index("tmp").unwrap();
        })
    });
}

criterion_group!(benches, bench_put_with_indexes, bench_lookup, bench_create_index);
criterion_main!(benches);
