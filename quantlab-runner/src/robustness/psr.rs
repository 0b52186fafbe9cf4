//! Probabilistic and deflated Sharpe proxies over fold-level Sharpe proxies.
//!
//! These are named approximations: the inputs are per-fold decile-spread
//! Sharpe proxies, not return series, so the classical PSR/DSR corrections
//! for skew and kurtosis do not apply.

use rand::Rng;

use quantlab_core::domain::RunId;
use quantlab_core::rng::rng_for;
use quantlab_core::stats;

/// Floor applied to both the variance and the standard error.
const EPS: f64 = 1e-12;

/// Purpose tag of the bootstrap draw key.
pub const PSR_BOOT_PURPOSE: &str = "psr_boot";

// ─── Normal CDF ──────────────────────────────────────────────────────

/// Complementary error function.
///
/// Chebyshev-fitted rational approximation (Numerical Recipes `erfcc`),
/// fractional error below 1.2e-7 everywhere.
fn erfc(x: f64) -> f64 {
    let z = x.abs();
    let t = 1.0 / (1.0 + 0.5 * z);
    let poly = -z * z - 1.265_512_23
        + t * (1.000_023_68
            + t * (0.374_091_96
                + t * (0.096_784_18
                    + t * (-0.186_288_06
                        + t * (0.278_868_07
                            + t * (-1.135_203_98
                                + t * (1.488_515_87 + t * (-0.822_152_23 + t * 0.170_872_77))))))));
    let ans = t * poly.exp();
    if x >= 0.0 {
        ans
    } else {
        2.0 - ans
    }
}

/// Error function.
pub fn erf(x: f64) -> f64 {
    1.0 - erfc(x)
}

/// Standard normal CDF via `erf`, clamped to [0, 1].
pub fn norm_cdf(x: f64) -> f64 {
    stats::clamp01(0.5 * (1.0 + erf(x / std::f64::consts::SQRT_2)))
}

// ─── PSR / DSR ───────────────────────────────────────────────────────

/// Analytic PSR proxy: `Φ(mean / se)` with `se = sd / √k`.
///
/// Empty input gives 0; a single value gives 1 when positive, else 0.
pub fn psr_proxy(sharpes: &[f64]) -> f64 {
    match sharpes {
        [] => 0.0,
        [only] => single(*only),
        _ => {
            let k = sharpes.len() as f64;
            let mean = stats::mean(sharpes);
            let var = stats::variance(sharpes).unwrap_or(0.0);
            let sd = var.max(EPS).sqrt();
            let se = sd / k.sqrt();
            norm_cdf(mean / se.max(EPS))
        }
    }
}

/// Bootstrap PSR proxy: the share of `max(32, resamples)` with-replacement
/// resample means that are strictly positive.
///
/// The draw is seeded from `"{run_id}:{candidate_id}:psr_boot"`, so the
/// result is reproducible for identical inputs.
pub fn psr_bootstrap_proxy(sharpes: &[f64], resamples: usize, run_id: &RunId, candidate_id: &str) -> f64 {
    let n = sharpes.len();
    match sharpes {
        [] => return 0.0,
        [only] => return single(*only),
        _ => {}
    }
    let rounds = resamples.max(32);
    let mut rng = rng_for(run_id, candidate_id, PSR_BOOT_PURPOSE);
    let mut positive = 0usize;
    for _ in 0..rounds {
        let sum: f64 = (0..n).map(|_| sharpes[rng.gen_range(0..n)]).sum();
        if sum / n as f64 > 0.0 {
            positive += 1;
        }
    }
    positive as f64 / rounds as f64
}

/// Multiple-testing penalty for `candidate_count` candidates:
/// `min(0.30, 0.05 * log2(max(count, baseline)))` with `baseline =
/// max(2, count)`, and 0 for a single candidate.
pub fn dsr_penalty(candidate_count: usize) -> f64 {
    let count = candidate_count.max(1);
    if count <= 1 {
        return 0.0;
    }
    let baseline = count.max(2);
    (0.05 * (count.max(baseline) as f64).log2()).min(0.30)
}

/// Deflated PSR proxy: `clamp(psr - penalty, 0, 1)`. Never above `psr`.
pub fn dsr_proxy(psr: f64, candidate_count: usize) -> f64 {
    stats::clamp01(psr - dsr_penalty(candidate_count))
}

fn single(v: f64) -> f64 {
    if v > 0.0 {
        1.0
    } else {
        0.0
    }
}
