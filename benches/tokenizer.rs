//! Tokenizer throughput over generated inputs.
//!
//! Run with: cargo bench --bench tokenizer

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use csvx::tokenizer::{tokenize_str, TokenizerConfig};

fn plain_input(rows: usize) -> String {
    let mut s = String::with_capacity(rows * 32);
    for i in 0..rows {
        s.push_str(&format!("{i},station-{},{}.5,ok\n", i % 17, i % 40));
    }
    s
}

fn quoted_input(rows: usize) -> String {
    let mut s = String::with_capacity(rows * 48);
    for i in 0..rows {
        s.push_str(&format!("{i},\"name, \"\"quoted\"\" {i}\",\"multi\nline\"\n"));
    }
    s
}

fn bench_tokenizer(c: &mut Criterion) {
    let mut group = c.benchmark_group("tokenizer");

    for rows in [1_000, 10_000] {
        for (label, input, config) in [
            ("plain", plain_input(rows), TokenizerConfig::default()),
            ("quoted", quoted_input(rows), TokenizerConfig::default()),
            ("whitespace", plain_input(rows).replace(',', "   "), TokenizerConfig::whitespace()),
        ] {
            group.throughput(Throughput::Bytes(input.len() as u64));
            group.bench_with_input(BenchmarkId::new(label, rows), &input, |b, input| {
                b.iter(|| {
                    let records = tokenize_str(black_box(input), &config).unwrap();
                    black_box(records.len())
                });
            });
        }
    }

    group.finish();
}

criterion_group!(benches, bench_tokenizer);
criterion_main!(benches);
