//! sort/recover.rs — bring the full branch population back under the
//! capped-subset fit before any partition decision is made.

use crate::core::mixture::{MixtureFit, MixtureSolver};

/// 99% chi-square quantiles for 1..=5 degrees of freedom; the feature rank
/// never exceeds five.
const CHI2_QUANTILE_99: [f32; 5] = [6.634897, 9.210340, 11.344867, 13.276704, 15.086272];

/// Responsibility entries below this are zeroed before renormalization.
pub const RESPONSIBILITY_FLOOR: f32 = 0.001;

/// Extend the fit's responsibilities to every point in `feats`, keep the
/// points within the 99% mahalanobis gate of at least one component, zero
/// out trace responsibilities and renormalize. Returns the recovered point
/// indices (into `feats`) and a fit whose rows describe exactly those
/// points.
pub fn recover_spikes(
    solver: &dyn MixtureSolver,
    fit: &MixtureFit,
    feats: &[Vec<f32>],
) -> (Vec<usize>, MixtureFit) {
    let gate = chi2_gate(fit.dim);
    let rhat = solver.extend(fit, feats);
    let maha = fit.mahalanobis(feats);

    let mut kept = Vec::new();
    let mut kept_rhat = Vec::new();
    for (i, (row, dists)) in rhat.iter().zip(maha.iter()).enumerate() {
        if !dists.iter().any(|&d| d <= gate) {
            continue;
        }
        let mut row = row.clone();
        for v in row.iter_mut() {
            if *v < RESPONSIBILITY_FLOOR {
                *v = 0.0;
            }
        }
        let sum: f32 = row.iter().sum();
        if sum <= 0.0 {
            continue;
        }
        for v in row.iter_mut() {
            *v /= sum;
        }
        kept.push(i);
        kept_rhat.push(row);
    }

    let mut recovered = fit.clone();
    recovered.rhat = kept_rhat;
    (kept, recovered)
}

fn chi2_gate(dim: usize) -> f32 {
    let idx = dim.clamp(1, CHI2_QUANTILE_99.len()) - 1;
    CHI2_QUANTILE_99[idx].sqrt()
}
