//! End-to-end matching: sections recognised by identity rows plus long repeating data rows.
//!
//! Run with: cargo bench --bench matching

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion, Throughput};
use csvx::matching::{validate_str, ErrorPolicy};
use csvx::schema::loader::load_schema_from_str;

const SCHEMA: &str = r#"{
    "tables": {
        "station": { "rows": {
            "0": { "@isIdentityRow": true, "cols": ["Station", { "@name": "station" }] }
        } },
        "data": { "rows": {
            "0": { "@isIdentityRow": true, "cols": ["Date", "Value"] },
            "1": { "@repeat": true, "cols": [
                { "@datatype": "date", "@name": "date" },
                { "@datatype": "decimal", "@id": "obs:${station/station}/${date}", "ex:value": "${.}" }
            ] }
        } }
    }
}"#;

fn input(sections: usize, rows_per_section: usize) -> String {
    let mut s = String::new();
    for sec in 0..sections {
        s.push_str(&format!("Station,S{sec:03}\nDate,Value\n"));
        for r in 0..rows_per_section {
            s.push_str(&format!("2024-{:02}-{:02},{}.25\n", r % 12 + 1, r % 28 + 1, r));
        }
    }
    s
}

fn bench_matching(c: &mut Criterion) {
    let schema = load_schema_from_str(SCHEMA).unwrap();
    let mut group = c.benchmark_group("matching");

    for (sections, rows) in [(1, 5_000), (50, 100)] {
        let text = input(sections, rows);
        group.throughput(Throughput::Elements((sections * rows) as u64));
        group.bench_with_input(
            BenchmarkId::new("sections", format!("{sections}x{rows}")),
            &text,
            |b, text| {
                b.iter(|| {
                    let report = validate_str(&schema, black_box(text), ErrorPolicy::CollectAll).unwrap();
                    black_box(report.dataset.cell_count())
                });
            },
        );
    }

    group.finish();
}

criterion_group!(benches, bench_matching);
criterion_main!(benches);
