//! Benchmarks for the matching engine.

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};
use invoiceflow::matching::{evaluate, AmountDegradation, MatchConfig, MatchLine, MatchSubject};

fn subject(lines: usize, total: f64, short_every: usize) -> MatchSubject {
    let lines = (0..lines)
        .map(|i| {
            let qty = if short_every > 0 && i % short_every == 0 { 7.0 } else { 10.0 };
            MatchLine::new(qty, 25.0)
        })
        .collect();
    MatchSubject::new(total, lines)
}

fn matching_benchmark(c: &mut Criterion) {
    let config = MatchConfig::default();
    let reference = subject(2, 15_000.0, 0);

    c.bench_function("evaluate_exact_match", |b| {
        let invoice = subject(2, 15_000.0, 0);
        b.iter(|| evaluate(black_box(&invoice), Some(black_box(&reference)), &config));
    });

    c.bench_function("evaluate_missing_reference", |b| {
        let invoice = subject(2, 15_000.0, 0);
        b.iter(|| evaluate(black_box(&invoice), None, &config));
    });

    let mut group = c.benchmark_group("evaluate_lines");
    for lines in [10, 100, 1_000] {
        let invoice = subject(lines, 13_500.0, 3);
        let reference = subject(lines, 15_000.0, 0);
        group.bench_with_input(BenchmarkId::from_parameter(lines), &lines, |b, _| {
            b.iter(|| evaluate(black_box(&invoice), Some(black_box(&reference)), &config));
        });
    }
    group.finish();

    let step = MatchConfig::default().with_degradation(AmountDegradation::Step);
    c.bench_function("evaluate_step_degradation", |b| {
        let invoice = subject(2, 13_500.0, 2);
        b.iter(|| evaluate(black_box(&invoice), Some(black_box(&reference)), &step));
    });
}

criterion_group!(benches, matching_benchmark);
criterion_main!(benches);
