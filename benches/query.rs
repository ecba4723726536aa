use criterion::{black_box, criterion_group, criterion_main, Criterion};
use pinauth::query::{extract_parameter, query_pairs};

const REDIRECT: &str = "https://localhost/cb?state=9f86d081884c7d659a2feaa0c55ad015&code=a1b2c3d4e5f6a7b8c9d0&scope=read_public%2Cwrite_public";

fn bench_extract(c: &mut Criterion) {
    c.bench_function("extract_parameter/code", |b| {
        b.iter(|| extract_parameter(black_box(REDIRECT), black_box("code")))
    });

    c.bench_function("extract_parameter/missing", |b| {
        b.iter(|| extract_parameter(black_box(REDIRECT), black_box("error")))
    });

    c.bench_function("query_pairs", |b| b.iter(|| query_pairs(black_box(REDIRECT))));
}

criterion_group!(benches, bench_extract);
criterion_main!(benches);
