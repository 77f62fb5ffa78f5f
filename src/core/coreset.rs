//! core/coreset.rs — importance-sampling subsample that bounds the mixture
//! fit size without erasing rare sub-populations. Points far from the seed
//! centers, and points in small clusters, get proportionally more weight
//! than redundant mass near big cluster cores.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};

/// Seed centers for the distortion estimate.
pub const CORESET_SEEDS: usize = 3;

/// Failure probability of the seeding trials; trial count = ceil(log2(1/δ)).
pub const CORESET_DELTA: f64 = 0.01;

/// Subsample `feats` down to exactly `target` unique indices, drawn without
/// replacement from the importance distribution. No-op (identity index set)
/// when the candidate count is already at or below `target`.
pub fn subsample(feats: &[Vec<f32>], target: usize, rng: &mut StdRng) -> Vec<usize> {
    let n = feats.len();
    if n <= target {
        return (0..n).collect();
    }

    let trials = (1.0 / CORESET_DELTA).log2().ceil() as usize;
    let centers = seed_centers(feats, CORESET_SEEDS, trials, rng);
    let k = centers.len();

    // Nearest-seed assignment and squared distortion per point.
    let mut label = vec![0usize; n];
    let mut dist2 = vec![0.0f64; n];
    for (i, row) in feats.iter().enumerate() {
        let (best, d2) = nearest_center(row, &centers);
        label[i] = best;
        dist2[i] = d2;
    }

    let total: f64 = dist2.iter().sum();
    let mut per_seed = vec![0.0f64; k];
    let mut count = vec![0usize; k];
    for i in 0..n {
        per_seed[label[i]] += dist2[i];
        count[label[i]] += 1;
    }

    // w(x) = a*d(x)^2 + 2*(a*D_cluster/n_cluster + D_total/n_cluster),
    // a = 16*(log2 K + 2).
    let a = 16.0 * ((k as f64).log2() + 2.0);
    let weights: Vec<f64> = (0..n)
        .map(|i| {
            let nc = count[label[i]].max(1) as f64;
            a * dist2[i] + 2.0 * (a * per_seed[label[i]] / nc + total / nc)
        })
        .collect();

    let sum: f64 = weights.iter().sum();
    if !(sum > 0.0) || !sum.is_finite() {
        // All points coincide; any subset is as good as any other.
        return uniform_subsample(n, target, rng);
    }

    match rand::seq::index::sample_weighted(rng, n, |i| weights[i], target) {
        Ok(picked) => picked.into_vec(),
        Err(_) => uniform_subsample(n, target, rng),
    }
}

fn uniform_subsample(n: usize, target: usize, rng: &mut StdRng) -> Vec<usize> {
    rand::seq::index::sample(rng, n, target).into_vec()
}

pub(crate) fn nearest_center(row: &[f32], centers: &[Vec<f32>]) -> (usize, f64) {
    let mut best = 0usize;
    let mut best_d2 = f64::INFINITY;
    for (c, center) in centers.iter().enumerate() {
        let d2: f64 = row
            .iter()
            .zip(center.iter())
            .map(|(&a, &b)| ((a - b) as f64).powi(2))
            .sum();
        if d2 < best_d2 {
            best_d2 = d2;
            best = c;
        }
    }
    (best, best_d2)
}

/// Repeated furthest-point-biased seeding; the trial with the lowest total
/// squared distortion wins. Also used to initialize the mixture solver.
pub(crate) fn seed_centers(feats: &[Vec<f32>], k: usize, trials: usize, rng: &mut StdRng) -> Vec<Vec<f32>> {
    let n = feats.len();
    let k = k.min(n);
    let mut best_centers: Vec<Vec<f32>> = Vec::new();
    let mut best_distortion = f64::INFINITY;

    for _ in 0..trials.max(1) {
        let mut centers: Vec<Vec<f32>> = vec![feats[rng.random_range(0..n)].clone()];

        for _ in 1..k {
            // Squared distance to the current nearest center biases the draw
            // toward uncovered regions.
            let d2: Vec<f64> = feats
                .iter()
                .map(|row| nearest_center(row, &centers).1)
                .collect();
            let total: f64 = d2.iter().sum();
            let next = if total > 0.0 {
                weighted_pick(&d2, total, rng)
            } else {
                rng.random_range(0..n)
            };
            centers.push(feats[next].clone());
        }

        let distortion: f64 = feats
            .iter()
            .map(|row| nearest_center(row, &centers).1)
            .sum();
        if distortion < best_distortion {
            best_distortion = distortion;
            best_centers = centers;
        }
    }

    best_centers
}

fn weighted_pick(weights: &[f64], total: f64, rng: &mut StdRng) -> usize {
    let mut u = rng.random_range(0.0..total);
    for (i, &w) in weights.iter().enumerate() {
        if u < w {
            return i;
        }
        u -= w;
    }
    weights.len() - 1
}

/// Seeded RNG helper for callers that key runs off (seed, channel).
pub fn channel_rng(seed: u64, channel: usize) -> StdRng {
    StdRng::seed_from_u64(seed ^ (channel as u64).wrapping_mul(0x9E37_79B9_7F4A_7C15))
}
