use serde::{Deserialize, Serialize};

/// Distribution of one Monte-Carlo vector.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DistStats {
    pub n: usize,
    pub min: f64,
    /// Lower end of the central 95% range.
    pub p2_5: f64,
    pub p50: f64,
    pub p97_5: f64,
    pub max: f64,
    pub mean: f64,
    pub std_dev: f64,
}

fn sorted_finite(values: &[f64]) -> Vec<f64> {
    let mut v: Vec<f64> = values.iter().copied().filter(|x| x.is_finite()).collect();
    v.sort_by(|a, b| a.total_cmp(b));
    v
}

/// Linear interpolation between closest ranks, on sorted non-empty input.
fn quantile(sorted: &[f64], q: f64) -> f64 {
    let rank = q * (sorted.len() - 1) as f64;
    let below = rank.floor() as usize;
    let above = rank.ceil() as usize;
    let weight = rank - below as f64;
    sorted[below] + (sorted[above] - sorted[below]) * weight
}

/// Percentiles, mean and sample standard deviation over the finite entries.
/// `None` when nothing finite remains.
pub fn dist_stats(values: &[f64]) -> Option<DistStats> {
    let v = sorted_finite(values);
    if v.is_empty() {
        return None;
    }
    let n = v.len();
    let mean = v.iter().sum::<f64>() / n as f64;
    let squares: f64 = v.iter().map(|x| (x - mean) * (x - mean)).sum();
    let std_dev = if n < 2 { 0.0 } else { (squares / (n - 1) as f64).sqrt() };
    Some(DistStats {
        n,
        min: v[0],
        p2_5: quantile(&v, 0.025),
        p50: quantile(&v, 0.5),
        p97_5: quantile(&v, 0.975),
        max: v[n - 1],
        mean,
        std_dev,
    })
}

/// Central range holding `level` of the simulated values, e.g. 0.95.
pub fn confidence_range(values: &[f64], level: f64) -> Option<(f64, f64)> {
    let v = sorted_finite(values);
    if v.is_empty() {
        return None;
    }
    let tail = (1.0 - level.clamp(0.0, 1.0)) / 2.0;
    Some((quantile(&v, tail), quantile(&v, 1.0 - tail)))
}
