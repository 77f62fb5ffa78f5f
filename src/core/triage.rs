//! core/triage.rs — provisional rejection of isolated points before the
//! mixture fit. Dropped points stay candidates: the recovery step re-extends
//! assignments over the full set and may reclaim them.

/// Fraction of points treated as far outliers.
pub const TRIAGE_FRACTION: f32 = 0.01;

/// Neighbors summed into the isolation score.
pub const TRIAGE_NEIGHBORS: usize = 5;

/// Indices of points whose 5-nearest-neighbor distance sum sits at or below
/// the 99th percentile. Only applied when the candidate set exceeds
/// 1/TRIAGE_FRACTION points; smaller sets pass through untouched.
pub fn knn_triage(feats: &[Vec<f32>]) -> Vec<usize> {
    let n = feats.len();
    if (n as f32) <= 1.0 / TRIAGE_FRACTION {
        return (0..n).collect();
    }

    let scores = isolation_scores(feats);
    let threshold = percentile(&scores, 100.0 * (1.0 - TRIAGE_FRACTION));

    (0..n).filter(|&i| scores[i] <= threshold).collect()
}

/// Sum of distances to the k nearest neighbors, brute force. Candidate sets
/// here are bounded by the per-fit cap, so the quadratic scan is acceptable.
fn isolation_scores(feats: &[Vec<f32>]) -> Vec<f32> {
    let n = feats.len();
    let k = TRIAGE_NEIGHBORS.min(n.saturating_sub(1));
    let mut scores = vec![0.0f32; n];
    let mut nearest = vec![f32::INFINITY; k];

    for i in 0..n {
        for d in nearest.iter_mut() {
            *d = f32::INFINITY;
        }
        for j in 0..n {
            if i == j {
                continue;
            }
            let d2: f32 = feats[i]
                .iter()
                .zip(feats[j].iter())
                .map(|(&a, &b)| (a - b) * (a - b))
                .sum();
            // Keep the k smallest squared distances; the largest kept value
            // is always at the end.
            if d2 < nearest[k - 1] {
                nearest[k - 1] = d2;
                let mut m = k - 1;
                while m > 0 && nearest[m] < nearest[m - 1] {
                    nearest.swap(m, m - 1);
                    m -= 1;
                }
            }
        }
        scores[i] = nearest.iter().map(|d2| d2.sqrt()).sum();
    }
    scores
}

/// Linear-interpolated percentile, `p` in [0, 100].
fn percentile(values: &[f32], p: f32) -> f32 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let rank = (p / 100.0) * (sorted.len() - 1) as f32;
    let lo = rank.floor() as usize;
    let hi = rank.ceil() as usize;
    if lo == hi {
        sorted[lo]
    } else {
        let frac = rank - lo as f32;
        sorted[lo] * (1.0 - frac) + sorted[hi] * frac
    }
}
