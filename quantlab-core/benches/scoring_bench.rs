//! Criterion benchmarks for QuantLab core hot paths.
//!
//! Benchmarks:
//! 1. Fold normalization (fit on train rows, transform test rows)
//! 2. Candidate scoring (full catalogue on one fold)
//! 3. Spearman IC on a large cross-section

use chrono::NaiveDate;
use criterion::{black_box, criterion_group, criterion_main, BenchmarkId, Criterion};

use quantlab_core::candidates::CATALOGUE;
use quantlab_core::domain::AsOfPanelRow;
use quantlab_core::normalize::FeatureNormalizer;
use quantlab_core::scoring::{spearman_ic, CandidateScorer};

// ── Helpers ──────────────────────────────────────────────────────────

fn make_rows(n: usize) -> Vec<AsOfPanelRow> {
    let date = NaiveDate::from_ymd_opt(2024, 1, 2).unwrap();
    (0..n)
        .map(|i| {
            let x = i as f64;
            let mut r = AsOfPanelRow::empty(format!("A{i}"), "stock", date);
            r.ret_20d = Some((x * 0.37).sin() * 0.1);
            r.ret_5d = Some((x * 0.11).cos() * 0.05);
            r.rsi_14 = Some(50.0 + (x * 0.07).sin() * 20.0);
            r.macd_hist = Some((x * 0.013).sin());
            r.atr_pct_14 = Some(0.02 + (x * 0.03).cos().abs() * 0.01);
            r.ewma_vol_20 = Some(0.2 + (x * 0.05).sin().abs() * 0.1);
            r.boll_z_20 = Some((x * 0.21).sin() * 2.0);
            r.adv20_dollar = Some(1e6 + x * 1e3);
            r.close_raw = Some(100.0 + (x * 0.1).sin());
            r.sma_200 = Some(100.0);
            r.fwd_ret_5d = Some((x * 0.17).sin() * 0.02);
            r
        })
        .collect()
}

// ── Benchmarks ───────────────────────────────────────────────────────

fn bench_normalize(c: &mut Criterion) {
    let mut group = c.benchmark_group("normalize");
    for n in [1_000usize, 10_000] {
        let train = make_rows(n * 4);
        let test = make_rows(n);
        group.bench_with_input(BenchmarkId::from_parameter(n), &n, |b, _| {
            b.iter(|| {
                let stats = FeatureNormalizer::fit(black_box(&train));
                FeatureNormalizer::transform(&stats, black_box(&test))
            })
        });
    }
    group.finish();
}

fn bench_score_catalogue(c: &mut Criterion) {
    let train = make_rows(20_000);
    let test = make_rows(5_000);
    let stats = FeatureNormalizer::fit(&train);
    let normalized = FeatureNormalizer::transform(&stats, &test);
    c.bench_function("score_catalogue_5k_rows", |b| {
        b.iter(|| CandidateScorer.score_all("fold_1", &CATALOGUE, black_box(&normalized)))
    });
}

fn bench_spearman(c: &mut Criterion) {
    let scores: Vec<f64> = (0..10_000).map(|i| ((i as f64) * 0.31).sin()).collect();
    let targets: Vec<f64> = (0..10_000).map(|i| ((i as f64) * 0.29).cos()).collect();
    c.bench_function("spearman_ic_10k", |b| {
        b.iter(|| spearman_ic(black_box(&scores), black_box(&targets)))
    });
}

criterion_group!(benches, bench_normalize, bench_score_catalogue, bench_spearman);
criterion_main!(benches);
