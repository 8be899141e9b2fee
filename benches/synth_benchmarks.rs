//! Benchmarks for the survey structure → pivot query path.
//!
//! Run with: `cargo bench`

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use survey_pivot::config::SchemaNames;
use survey_pivot::survey::{synthesize, StructureRow, StructureSnapshot};

/// Every survey sees every question; roughly a third are members.
fn wide_snapshot(surveys: i64, questions: i64) -> StructureSnapshot {
    let rows = (1..=surveys).flat_map(|s| {
        (1..=questions).map(move |q| StructureRow::new(s, q, (s + q) % 3 == 0))
    });
    StructureSnapshot::from_rows(rows).unwrap()
}

fn bench_synthesis(c: &mut Criterion) {
    let mut group = c.benchmark_group("synthesize");
    let names = SchemaNames::default();

    let cases = [("small", 4, 20), ("medium", 20, 100), ("wide", 50, 400)];

    for (name, surveys, questions) in cases {
        let snapshot = wide_snapshot(surveys, questions);
        group.bench_with_input(BenchmarkId::new("pivot", name), &snapshot, |b, snapshot| {
            b.iter(|| synthesize(black_box(snapshot), &names));
        });
    }

    group.finish();
}

fn bench_change_detection(c: &mut Criterion) {
    let mut group = c.benchmark_group("change_detection");

    let current = wide_snapshot(50, 400);
    let same = wide_snapshot(50, 400);
    let mut rows: Vec<StructureRow> = current.rows().collect();
    if let Some(last) = rows.last_mut() {
        last.in_survey = !last.in_survey;
    }
    let changed = StructureSnapshot::from_rows(rows).unwrap();

    group.bench_function("equal", |b| b.iter(|| black_box(&current) == black_box(&same)));
    group.bench_function("last_row_flipped", |b| {
        b.iter(|| black_box(&current) == black_box(&changed))
    });

    group.finish();
}

criterion_group!(benches, bench_synthesis, bench_change_detection);
criterion_main!(benches);
