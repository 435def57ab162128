//! Poisson log-likelihood scoring and the few special functions it needs.

use std::f64::consts::PI;

use crate::error::{EvalError, Result};

const LOG_SQRT_2PI: f64 = 0.918_938_533_204_672_8;
const LANCZOS_G: f64 = 7.0;
#[allow(clippy::excessive_precision)]
const LANCZOS_COEFFS: [f64; 9] = [
    0.999_999_999_999_809_93,
    676.520_368_121_885_1,
    -1_259.139_216_722_402_8,
    771.323_428_777_653_1,
    -176.615_029_162_140_59,
    12.507_343_278_686_905,
    -0.138_571_095_265_720_12,
    9.984_369_578_019_571_6e-6,
    1.505_632_735_149_311_6e-7,
];

/// ln Γ(z) by the Lanczos approximation (g = 7, n = 9), with reflection below 0.5.
pub fn ln_gamma(z: f64) -> f64 {
    if z.is_nan() || z == f64::NEG_INFINITY {
        return f64::NAN;
    }
    if z == f64::INFINITY {
        return f64::INFINITY;
    }
    if z <= 0.0 && z == z.round() {
        return f64::NAN;
    }
    if z < 0.5 {
        return PI.ln() - (PI * z).sin().abs().ln() - ln_gamma(1.0 - z);
    }
    let z = z - 1.0;
    let mut x = LANCZOS_COEFFS[0];
    for (i, coeff) in LANCZOS_COEFFS.iter().enumerate().skip(1) {
        x += coeff / (z + i as f64);
    }
    let t = z + LANCZOS_G + 0.5;
    LOG_SQRT_2PI + (z + 0.5) * t.ln() - t + x.ln()
}

/// ln n!, exact for small n.
fn ln_factorial(n: u64) -> f64 {
    if n <= 1 { 0.0 } else { ln_gamma(n as f64 + 1.0) }
}

/// Poisson log-probability of `observed` events for expectation `rate`.
///
/// `score(0, r)` is exactly `-r`. A zero rate with observed events has no
/// finite log-probability and yields NaN, which `nan_sum` later excludes.
pub fn score(observed: u64, rate: f64) -> Result<f64> {
    if rate < 0.0 || rate.is_nan() {
        return Err(EvalError::NegativeRate(rate));
    }
    if observed == 0 {
        return Ok(-rate);
    }
    if rate == 0.0 {
        return Ok(f64::NAN);
    }
    Ok(-rate + observed as f64 * rate.ln() - ln_factorial(observed))
}

/// Sum of per-bin scores, NaN bins excluded.
pub fn score_vector(observed: &[u64], rates: &[f64]) -> Result<f64> {
    if observed.len() != rates.len() {
        return Err(EvalError::ShapeMismatch(format!(
            "{} observed counts for {} rates",
            observed.len(),
            rates.len()
        )));
    }
    let scores = observed
        .iter()
        .zip(rates)
        .map(|(&n, &r)| score(n, r))
        .collect::<Result<Vec<f64>>>()?;
    Ok(nan_sum(&scores))
}

/// Sum ignoring NaN entries; an all-NaN or empty slice sums to 0.
pub fn nan_sum(values: &[f64]) -> f64 {
    values.iter().filter(|v| !v.is_nan()).sum()
}

fn ln_pmf(k: u64, rate: f64) -> f64 {
    -rate + k as f64 * rate.ln() - ln_factorial(k)
}

/// P(X ≤ x) for X ~ Poisson(rate). `x` is floored; negative `x` gives 0.
pub fn poisson_cdf(x: f64, rate: f64) -> f64 {
    if rate < 0.0 || rate.is_nan() || x.is_nan() {
        return f64::NAN;
    }
    if x < 0.0 {
        return 0.0;
    }
    if rate == 0.0 {
        return 1.0;
    }
    let k_max = x.floor() as u64;
    let mut cdf = 0.0;
    if rate < 700.0 {
        let mut p = (-rate).exp();
        for k in 0..=k_max {
            cdf += p;
            p *= rate / (k + 1) as f64;
        }
    } else {
        for k in 0..=k_max {
            cdf += ln_pmf(k, rate).exp();
        }
    }
    cdf.min(1.0)
}

/// Smallest k with `poisson_cdf(k, rate) >= u`.
pub fn poisson_ppf(u: f64, rate: f64) -> u64 {
    if rate <= 0.0 || u <= 0.0 {
        return 0;
    }
    // Far tail: the cdf stops moving in f64 long before this.
    let ceiling = (rate + 40.0 * rate.sqrt() + 100.0) as u64;
    let mut cdf = 0.0;
    for k in 0..=ceiling {
        cdf += ln_pmf(k, rate).exp();
        if cdf >= u {
            return k;
        }
    }
    ceiling
}
