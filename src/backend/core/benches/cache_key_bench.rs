//! Benchmarks for query signatures, key derivation and the in-memory store.
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use aegis_core::cache::{Cache, CacheKey, KeyPrefix, ListQuery, ListScope, SortOrder, TenantId};
use aegis_core::cache::signature::sha256_hex;

fn sample_query(filters: usize) -> ListQuery {
    let mut query = ListQuery::new().page(3).page_size(50).sort("updated_at").order(SortOrder::Asc);
    for i in 0..filters { query = query.filter(format!("field{}", i), [format!("v{}", i), format!("w{}", i)]); }
    query
}

fn bench_signature(c: &mut Criterion) {
    let mut group = c.benchmark_group("query_signature");
    for filters in [0usize, 4, 16] {
        let query = sample_query(filters);
        group.bench_with_input(BenchmarkId::new("signature", filters), &query, |b, q| { b.iter(|| black_box(q.signature())); });
        let sig = query.signature();
        group.bench_with_input(BenchmarkId::new("digest", filters), &sig, |b, s| { b.iter(|| black_box(s.digest())); });
    }
    let pairs = [("page", "2"), ("pageSize", "25"), ("status", "open"), ("status", "pending"), ("owner", "u1")];
    group.bench_function("from_pairs", |b| { b.iter(|| black_box(ListQuery::from_pairs(pairs).ok())); });
    group.finish();
}

fn bench_hashing(c: &mut Criterion) {
    let mut group = c.benchmark_group("sha256_hex");
    for size in [64usize, 1024, 16 * 1024] {
        let data = vec![b'x'; size];
        group.throughput(Throughput::Bytes(size as u64));
        group.bench_with_input(BenchmarkId::from_parameter(size), &data, |b, d| { b.iter(|| black_box(sha256_hex(d))); });
    }
    group.finish();
}

fn bench_key_derivation(c: &mut Criterion) {
    let mut group = c.benchmark_group("key_derivation");
    let tenant = TenantId::new("tenant-123").unwrap();
    let sig = sample_query(4).signature();
    group.bench_function("list", |b| { b.iter(|| black_box(CacheKey::list(&tenant, ListScope::Active, &sig))); });
    group.bench_function("list_by_user", |b| { b.iter(|| black_box(CacheKey::list_by_user(&tenant, "user-1", &sig))); });
    group.bench_function("case_header", |b| { b.iter(|| black_box(CacheKey::case_header(&tenant, "9f1c2d3e-0000-4000-8000-000000000001"))); });
    group.bench_function("evidence_list", |b| { b.iter(|| black_box(CacheKey::evidence_list(&tenant, "case-1", &sig))); });
    group.bench_function("dashboard_totals", |b| { b.iter(|| black_box(CacheKey::dashboard_totals(&tenant, "user-1", &sig))); });
    group.bench_function("tenant_prefixes", |b| { b.iter(|| black_box(KeyPrefix::tenant_lists(&tenant))); });
    group.finish();
}

fn bench_inmemory_roundtrip(c: &mut Criterion) {
    let mut group = c.benchmark_group("inmemory_get_or_load");
    let rt = tokio::runtime::Runtime::new().unwrap();
    let tenant = TenantId::new("tenant-123").unwrap();
    for cap in [1_000u64, 10_000] {
        group.bench_with_input(BenchmarkId::from_parameter(cap), &cap, |b, &capacity| {
            let cache = Cache::in_memory(capacity);
            let key = CacheKey::case_header(&tenant, "case-1");
            b.iter(|| { rt.block_on(async { black_box(cache.get_or_load(&key, || async { Ok::<_, aegis_core::AegisError>(vec![1u32, 2, 3]) }).await.unwrap()); }); });
        });
    }
    group.finish();
}

criterion_group!(benches, bench_signature, bench_hashing, bench_key_derivation, bench_inmemory_roundtrip);
criterion_main!(benches);
