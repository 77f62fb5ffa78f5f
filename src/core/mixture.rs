//! core/mixture.rs — probabilistic mixture fit over spike features.
//!
//! The clustering engine treats the solver as a collaborator behind the
//! [`MixtureSolver`] trait: it prepares inputs, asks for one fit per branch,
//! and during recovery issues a single "extend responsibilities to new
//! points" call plus the mahalanobis query that [`MixtureFit`] exposes.
//! [`EmSolver`] is the shipped implementation: full-covariance EM with BIC
//! model selection over the component count.

use crate::core::coreset::{nearest_center, seed_centers};
use crate::error::SortError;
use rand::rngs::StdRng;
use rand::Rng;

/// Fitted mixture state: soft assignments plus per-component sufficient
/// statistics. `prec` rows are D x D precision matrices (row-major).
#[derive(Clone, Debug)]
pub struct MixtureFit {
    pub dim: usize,
    /// N x K responsibilities; rows sum to 1 after cleanup.
    pub rhat: Vec<Vec<f32>>,
    /// K x D component means.
    pub mu: Vec<Vec<f32>>,
    /// K x (D*D) component precisions.
    pub prec: Vec<Vec<f32>>,
    /// Log-determinant of each precision.
    pub logdet_prec: Vec<f32>,
    /// Effective point count per component.
    pub nu: Vec<f32>,
}

impl MixtureFit {
    pub fn n_components(&self) -> usize {
        self.mu.len()
    }

    pub fn n_points(&self) -> usize {
        self.rhat.len()
    }

    /// Mixing weights from the effective counts.
    pub fn weights(&self) -> Vec<f32> {
        let total: f32 = self.nu.iter().sum();
        if total <= 0.0 {
            return vec![1.0 / self.n_components() as f32; self.n_components()];
        }
        self.nu.iter().map(|&n| n / total).collect()
    }

    /// Mahalanobis distance (not squared) of `x` to component `k`.
    pub fn mahalanobis_one(&self, x: &[f32], k: usize) -> f32 {
        let d = self.dim;
        let mu = &self.mu[k];
        let prec = &self.prec[k];
        let mut q = 0.0f64;
        for a in 0..d {
            let da = (x[a] - mu[a]) as f64;
            for b in 0..d {
                let db = (x[b] - mu[b]) as f64;
                q += da * prec[a * d + b] as f64 * db;
            }
        }
        (q.max(0.0)).sqrt() as f32
    }

    /// N x K matrix of mahalanobis distances from every point to every
    /// component.
    pub fn mahalanobis(&self, points: &[Vec<f32>]) -> Vec<Vec<f32>> {
        points
            .iter()
            .map(|x| {
                (0..self.n_components())
                    .map(|k| self.mahalanobis_one(x, k))
                    .collect()
            })
            .collect()
    }

    /// K x K distances between component means, each mean measured under the
    /// other component's precision. Callers symmetrize as needed.
    pub fn component_distances(&self) -> Vec<Vec<f32>> {
        (0..self.n_components())
            .map(|i| {
                (0..self.n_components())
                    .map(|j| self.mahalanobis_one(&self.mu[j], i))
                    .collect()
            })
            .collect()
    }

    /// Hard labels from the responsibility rows.
    pub fn hard_assignments(&self) -> Vec<u32> {
        self.rhat.iter().map(|row| argmax(row) as u32).collect()
    }

    /// Snapshot restricted to the listed components. Responsibility rows are
    /// renormalized over the kept columns; rows left without mass are
    /// dropped, and the second return value lists the surviving row indices.
    pub fn restrict(&self, comps: &[usize]) -> (MixtureFit, Vec<usize>) {
        let mut rhat = Vec::new();
        let mut kept_rows = Vec::new();
        for (i, row) in self.rhat.iter().enumerate() {
            let picked: Vec<f32> = comps.iter().map(|&k| row[k]).collect();
            let sum: f32 = picked.iter().sum();
            if sum > 0.0 {
                rhat.push(picked.iter().map(|&r| r / sum).collect());
                kept_rows.push(i);
            }
        }
        let fit = MixtureFit {
            dim: self.dim,
            rhat,
            mu: comps.iter().map(|&k| self.mu[k].clone()).collect(),
            prec: comps.iter().map(|&k| self.prec[k].clone()).collect(),
            logdet_prec: comps.iter().map(|&k| self.logdet_prec[k]).collect(),
            nu: comps.iter().map(|&k| self.nu[k]).collect(),
        };
        (fit, kept_rows)
    }
}

pub(crate) fn argmax(row: &[f32]) -> usize {
    let mut best = 0usize;
    for (i, &v) in row.iter().enumerate() {
        if v > row[best] {
            best = i;
        }
    }
    best
}

/// External solver contract: one fit per branch, one responsibility
/// extension during recovery. The group tag is a trivial per-point label the
/// solver may use for masking; this engine always passes identity groups.
pub trait MixtureSolver {
    fn fit(
        &self,
        feats: &[Vec<f32>],
        groups: &[u32],
        rng: &mut StdRng,
    ) -> Result<MixtureFit, SortError>;

    /// Responsibilities of new points under the fixed fitted parameters.
    fn extend(&self, fit: &MixtureFit, feats: &[Vec<f32>]) -> Vec<Vec<f32>>;
}

/// Full-covariance EM with BIC selection of the active component count.
#[derive(Clone, Debug)]
pub struct EmSolver {
    pub max_components: usize,
    pub max_iters: usize,
    pub tol: f64,
    pub ridge: f64,
}

impl Default for EmSolver {
    fn default() -> Self {
        Self {
            max_components: 8,
            max_iters: 60,
            tol: 1e-4,
            ridge: 1e-3,
        }
    }
}

impl EmSolver {
    pub fn with_max_components(max_components: usize) -> Self {
        Self {
            max_components: max_components.max(1),
            ..Self::default()
        }
    }
}

impl MixtureSolver for EmSolver {
    fn fit(
        &self,
        feats: &[Vec<f32>],
        _groups: &[u32],
        rng: &mut StdRng,
    ) -> Result<MixtureFit, SortError> {
        let n = feats.len();
        if n == 0 {
            return Err(SortError::DegenerateFit("no points".into()));
        }
        let d = feats[0].len();
        if d == 0 {
            return Err(SortError::DegenerateFit("zero-dimensional features".into()));
        }
        // Leave enough points per component to estimate a full covariance.
        let kmax = self
            .max_components
            .min(n / (2 * (d + 1)).max(1))
            .max(1);

        let mut best: Option<(MixtureFit, f64)> = None;
        let mut last_err: Option<SortError> = None;
        for k in 1..=kmax {
            match self.run_em(feats, k, rng) {
                Ok((fit, loglik)) => {
                    let params = (k * (d + d * (d + 1) / 2) + (k - 1)) as f64;
                    let bic = -2.0 * loglik + params * (n as f64).ln();
                    if best.as_ref().map(|(_, b)| bic < *b).unwrap_or(true) {
                        best = Some((fit, bic));
                    }
                }
                Err(err) => {
                    last_err = Some(err);
                }
            }
        }

        best.map(|(fit, _)| fit).ok_or_else(|| {
            last_err.unwrap_or_else(|| SortError::DegenerateFit("all fits failed".into()))
        })
    }

    fn extend(&self, fit: &MixtureFit, feats: &[Vec<f32>]) -> Vec<Vec<f32>> {
        let weights = fit.weights();
        let log_w: Vec<f64> = weights.iter().map(|&w| (w.max(1e-30) as f64).ln()).collect();
        feats
            .iter()
            .map(|x| responsibilities_row(fit, x, &log_w).0)
            .collect()
    }
}

/// One E-step row: responsibilities and the point's log-likelihood.
fn responsibilities_row(fit: &MixtureFit, x: &[f32], log_w: &[f64]) -> (Vec<f32>, f64) {
    let d = fit.dim as f64;
    let k = fit.n_components();
    let half_log_2pi = 0.5 * d * (2.0 * std::f64::consts::PI).ln();
    let mut logp = vec![0.0f64; k];
    for (c, lp) in logp.iter_mut().enumerate() {
        let m = fit.mahalanobis_one(x, c) as f64;
        *lp = log_w[c] + 0.5 * fit.logdet_prec[c] as f64 - half_log_2pi - 0.5 * m * m;
    }
    let lse = logsumexp(&logp);
    let row = logp.iter().map(|&lp| (lp - lse).exp() as f32).collect();
    (row, lse)
}

fn logsumexp(v: &[f64]) -> f64 {
    let m = v.iter().cloned().fold(f64::NEG_INFINITY, f64::max);
    if m == f64::NEG_INFINITY {
        return m;
    }
    m + v.iter().map(|&x| (x - m).exp()).sum::<f64>().ln()
}

impl EmSolver {
    fn run_em(
        &self,
        feats: &[Vec<f32>],
        k: usize,
        rng: &mut StdRng,
    ) -> Result<(MixtureFit, f64), SortError> {
        // Furthest-point-biased init, then hard assignment for the first
        // M-step.
        let centers = seed_centers(feats, k, 1, rng);
        let mut rhat: Vec<Vec<f32>> = feats
            .iter()
            .map(|row| {
                let (best, _) = nearest_center(row, &centers);
                let mut r = vec![0.0f32; k];
                r[best] = 1.0;
                r
            })
            .collect();

        let mut fit = self.m_step(feats, &rhat, rng)?;
        let mut prev_ll = f64::NEG_INFINITY;
        let mut loglik = prev_ll;

        for _ in 0..self.max_iters {
            let weights = fit.weights();
            let log_w: Vec<f64> =
                weights.iter().map(|&w| (w.max(1e-30) as f64).ln()).collect();
            loglik = 0.0;
            for (i, x) in feats.iter().enumerate() {
                let (row, lse) = responsibilities_row(&fit, x, &log_w);
                rhat[i] = row;
                loglik += lse;
            }

            if (loglik - prev_ll).abs() < self.tol * loglik.abs().max(1.0) {
                break;
            }
            prev_ll = loglik;
            fit = self.m_step(feats, &rhat, rng)?;
        }

        fit.rhat = rhat;
        Ok((fit, loglik))
    }

    fn m_step(
        &self,
        feats: &[Vec<f32>],
        rhat: &[Vec<f32>],
        rng: &mut StdRng,
    ) -> Result<MixtureFit, SortError> {
        let n = feats.len();
        let d = feats[0].len();
        let k = rhat[0].len();

        let mut nu = vec![0.0f64; k];
        for row in rhat {
            for (c, &r) in row.iter().enumerate() {
                nu[c] += r as f64;
            }
        }

        let mut mu = vec![vec![0.0f64; d]; k];
        for (x, row) in feats.iter().zip(rhat.iter()) {
            for (c, &r) in row.iter().enumerate() {
                for (m, &v) in mu[c].iter_mut().zip(x.iter()) {
                    *m += r as f64 * v as f64;
                }
            }
        }
        for c in 0..k {
            if nu[c] < 1e-6 {
                // Dead component: restart it on a random point.
                let pick = rng.random_range(0..n);
                for (m, &v) in mu[c].iter_mut().zip(feats[pick].iter()) {
                    *m = v as f64;
                }
                nu[c] = 1.0;
            } else {
                for m in mu[c].iter_mut() {
                    *m /= nu[c];
                }
            }
        }

        let mut prec = Vec::with_capacity(k);
        let mut logdet_prec = Vec::with_capacity(k);
        for c in 0..k {
            let mut cov = vec![0.0f64; d * d];
            for (x, row) in feats.iter().zip(rhat.iter()) {
                let r = row[c] as f64;
                if r == 0.0 {
                    continue;
                }
                for a in 0..d {
                    let da = x[a] as f64 - mu[c][a];
                    for b in a..d {
                        cov[a * d + b] += r * da * (x[b] as f64 - mu[c][b]);
                    }
                }
            }
            for a in 0..d {
                for b in a..d {
                    cov[a * d + b] /= nu[c].max(1.0);
                    cov[b * d + a] = cov[a * d + b];
                }
            }

            // Ridge escalation until the covariance factorizes.
            let mut ridge = self.ridge;
            let inverted = loop {
                let mut reg = cov.clone();
                for a in 0..d {
                    reg[a * d + a] += ridge;
                }
                match invert_spd(&reg, d) {
                    Some(res) => break Some(res),
                    None if ridge < 1e3 => ridge *= 10.0,
                    None => break None,
                }
            };
            let (inv, logdet_inv) = inverted.ok_or_else(|| {
                SortError::DegenerateFit(format!("covariance of component {c} is singular"))
            })?;
            prec.push(inv.iter().map(|&v| v as f32).collect());
            logdet_prec.push(logdet_inv as f32);
        }

        Ok(MixtureFit {
            dim: d,
            rhat: Vec::new(),
            mu: mu
                .into_iter()
                .map(|m| m.into_iter().map(|v| v as f32).collect())
                .collect(),
            prec,
            logdet_prec,
            nu: nu.into_iter().map(|v| v as f32).collect(),
        })
    }
}

/// Cholesky-based inverse of a symmetric positive-definite matrix.
/// Returns (inverse, log-determinant of the inverse), or None if the
/// factorization breaks down.
fn invert_spd(a: &[f64], d: usize) -> Option<(Vec<f64>, f64)> {
    // Lower-triangular factor.
    let mut l = vec![0.0f64; d * d];
    for i in 0..d {
        for j in 0..=i {
            let mut sum = a[i * d + j];
            for k in 0..j {
                sum -= l[i * d + k] * l[j * d + k];
            }
            if i == j {
                if sum <= 0.0 {
                    return None;
                }
                l[i * d + i] = sum.sqrt();
            } else {
                l[i * d + j] = sum / l[j * d + j];
            }
        }
    }

    let logdet_a: f64 = (0..d).map(|i| l[i * d + i].ln()).sum::<f64>() * 2.0;

    // Solve L L^T X = I column by column.
    let mut inv = vec![0.0f64; d * d];
    let mut y = vec![0.0f64; d];
    for col in 0..d {
        for i in 0..d {
            let mut sum = if i == col { 1.0 } else { 0.0 };
            for k in 0..i {
                sum -= l[i * d + k] * y[k];
            }
            y[i] = sum / l[i * d + i];
        }
        for i in (0..d).rev() {
            let mut sum = y[i];
            for k in (i + 1)..d {
                sum -= l[k * d + i] * inv[k * d + col];
            }
            inv[i * d + col] = sum / l[i * d + i];
        }
    }

    Some((inv, -logdet_a))
}
