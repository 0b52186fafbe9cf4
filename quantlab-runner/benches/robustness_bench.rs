//! Criterion benchmarks for the Stage B robustness hot paths.
//!
//! Run with: `cargo bench -p quantlab-runner`
//!
//! Benchmarks:
//! 1. CPCV-light path enumeration (grows as 2^k in the fold count)
//! 2. Bootstrap PSR at increasing resample counts
//! 3. Full engine + gates over the whole catalogue

use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use quantlab_core::candidates::CATALOGUE;
use quantlab_core::domain::{FoldMetric, FoldMetricTable, RunId};
use quantlab_runner::aggregate::aggregate_candidates;
use quantlab_runner::config::RobustnessConfig;
use quantlab_runner::robustness::{cpcv_light, psr_bootstrap_proxy};
use quantlab_runner::{GateContext, GateEvaluator, GateThresholds, RobustnessEngine};

fn sharpes(k: usize) -> Vec<f64> {
    (0..k).map(|i| ((i as f64) * 0.7).sin() * 0.4 + 0.05).collect()
}

fn table(folds: usize) -> FoldMetricTable {
    let mut rows = Vec::new();
    for f in 0..folds {
        for (ci, c) in CATALOGUE.iter().enumerate() {
            let x = (f * 31 + ci * 7) as f64;
            rows.push(FoldMetric {
                fold_id: format!("fold_{}", f + 1),
                candidate_id: c.id.to_string(),
                family: c.family,
                rows: 4_000,
                ic_5d: (x * 0.13).sin() * 0.04,
                oos_sharpe_proxy: (x * 0.29).cos() * 0.3,
                top_minus_bottom_5d: (x * 0.05).sin() * 0.01,
                turnover_proxy: 0.5 + (x * 0.17).sin().abs(),
                maxdd_proxy_pct: 5.0 + (x * 0.11).cos().abs() * 10.0,
            });
        }
    }
    FoldMetricTable::from_rows(rows)
}

fn bench_cpcv(c: &mut Criterion) {
    let mut group = c.benchmark_group("cpcv_light");
    for k in [3usize, 6, 10, 14] {
        let values = sharpes(k);
        group.bench_with_input(BenchmarkId::from_parameter(k), &k, |b, _| {
            b.iter(|| cpcv_light(black_box(&values), 1))
        });
    }
    group.finish();
}

fn bench_bootstrap(c: &mut Criterion) {
    let mut group = c.benchmark_group("psr_bootstrap");
    let values = sharpes(6);
    let run = RunId::new("stageb_bench");
    for resamples in [64usize, 512, 4_096] {
        group.bench_with_input(BenchmarkId::from_parameter(resamples), &resamples, |b, &n| {
            b.iter(|| psr_bootstrap_proxy(black_box(&values), n, &run, "tsmom_20"))
        });
    }
    group.finish();
}

fn bench_stage_b_catalogue(c: &mut Criterion) {
    let t = table(6);
    let thresholds = GateThresholds::default();
    let engine = RobustnessEngine::new(&RobustnessConfig::default(), thresholds.stress_limits());
    let gates = GateEvaluator::new(thresholds, GateContext::new(true, true, 3, 6));
    let aggregates = aggregate_candidates(&t, &CATALOGUE);
    let run = RunId::new("stageb_bench");

    c.bench_function("stage_b_catalogue_6_folds", |b| {
        b.iter(|| {
            aggregates
                .iter()
                .map(|a| {
                    let r = engine.evaluate(&run, &a.candidate_id, black_box(&t), aggregates.len());
                    gates.evaluate(a, &r).pass
                })
                .filter(|p| *p)
                .count()
        })
    });
}

criterion_group!(benches, bench_cpcv, bench_bootstrap, bench_stage_b_catalogue);
criterion_main!(benches);
