//! core/pca.rs — variance-maximizing linear embedding for spike features.
//!
//! The basis is always fit on a *reference* index subset and applied to a
//! *target* subset, so points that have not survived triage/recovery never
//! leak into the projection. The embedding is deterministic up to component
//! sign, which downstream code never depends on (only relative distances and
//! assignments are used).

/// Hard cap on the embedding rank. Low-variance directions mostly encode
/// collision residue and overfit the mixture model.
pub const MAX_RANK: usize = 5;

/// A fitted orthogonal projection: mean plus the leading eigenvectors of the
/// reference covariance, ordered by decreasing variance.
#[derive(Clone, Debug)]
pub struct PcaBasis {
    pub mean: Vec<f64>,
    /// rank x dim, row-major.
    pub components: Vec<Vec<f64>>,
}

impl PcaBasis {
    /// Fit on the rows of `data` selected by `reference`.
    /// Effective rank = min(|reference|, dim, `max_rank`).
    pub fn fit(data: &[Vec<f32>], reference: &[usize], max_rank: usize) -> Self {
        assert!(!reference.is_empty(), "empty reference set");
        let dim = data[reference[0]].len();
        let rank = reference.len().min(dim).min(max_rank).max(1);

        let n = reference.len() as f64;
        let mut mean = vec![0.0f64; dim];
        for &i in reference {
            for (m, &x) in mean.iter_mut().zip(data[i].iter()) {
                *m += x as f64;
            }
        }
        for m in mean.iter_mut() {
            *m /= n;
        }

        let mut cov = vec![vec![0.0f64; dim]; dim];
        for &i in reference {
            let row = &data[i];
            for a in 0..dim {
                let da = row[a] as f64 - mean[a];
                for b in a..dim {
                    cov[a][b] += da * (row[b] as f64 - mean[b]);
                }
            }
        }
        let denom = (n - 1.0).max(1.0);
        for a in 0..dim {
            for b in a..dim {
                cov[a][b] /= denom;
                cov[b][a] = cov[a][b];
            }
        }

        let (eigvals, eigvecs) = jacobi_eigen(cov);
        let mut order: Vec<usize> = (0..dim).collect();
        order.sort_by(|&a, &b| {
            eigvals[b]
                .partial_cmp(&eigvals[a])
                .unwrap_or(std::cmp::Ordering::Equal)
        });

        let components = order
            .iter()
            .take(rank)
            .map(|&j| (0..dim).map(|i| eigvecs[i][j]).collect())
            .collect();

        Self { mean, components }
    }

    /// Project the rows of `data` selected by `target`.
    pub fn transform(&self, data: &[Vec<f32>], target: &[usize]) -> Vec<Vec<f32>> {
        target
            .iter()
            .map(|&i| {
                let row = &data[i];
                self.components
                    .iter()
                    .map(|comp| {
                        comp.iter()
                            .zip(row.iter().zip(self.mean.iter()))
                            .map(|(&c, (&x, &m))| c * (x as f64 - m))
                            .sum::<f64>() as f32
                    })
                    .collect()
            })
            .collect()
    }
}

/// Fit on `reference`, apply to `target`, rank capped at `max_rank`.
pub fn featurize(
    data: &[Vec<f32>],
    reference: &[usize],
    target: &[usize],
    max_rank: usize,
) -> Vec<Vec<f32>> {
    PcaBasis::fit(data, reference, max_rank).transform(data, target)
}

/// Cyclic Jacobi eigendecomposition of a symmetric matrix.
/// Returns (eigenvalues, eigenvector matrix with eigenvectors as columns).
fn jacobi_eigen(mut a: Vec<Vec<f64>>) -> (Vec<f64>, Vec<Vec<f64>>) {
    let n = a.len();
    let mut v = vec![vec![0.0f64; n]; n];
    for (i, row) in v.iter_mut().enumerate() {
        row[i] = 1.0;
    }

    for _sweep in 0..100 {
        let mut off = 0.0f64;
        for p in 0..n {
            for q in (p + 1)..n {
                off += a[p][q] * a[p][q];
            }
        }
        if off.sqrt() < 1e-12 {
            break;
        }

        for p in 0..n.saturating_sub(1) {
            for q in (p + 1)..n {
                let apq = a[p][q];
                if apq.abs() < 1e-300 {
                    continue;
                }
                let theta = (a[q][q] - a[p][p]) / (2.0 * apq);
                let t = if theta >= 0.0 {
                    1.0 / (theta + (1.0 + theta * theta).sqrt())
                } else {
                    1.0 / (theta - (1.0 + theta * theta).sqrt())
                };
                let c = 1.0 / (1.0 + t * t).sqrt();
                let s = t * c;

                for row in a.iter_mut() {
                    let akp = row[p];
                    let akq = row[q];
                    row[p] = c * akp - s * akq;
                    row[q] = s * akp + c * akq;
                }
                for k in 0..n {
                    let apk = a[p][k];
                    let aqk = a[q][k];
                    a[p][k] = c * apk - s * aqk;
                    a[q][k] = s * apk + c * aqk;
                }
                for row in v.iter_mut() {
                    let vkp = row[p];
                    let vkq = row[q];
                    row[p] = c * vkp - s * vkq;
                    row[q] = s * vkp + c * vkq;
                }
            }
        }
    }

    let eigvals = (0..n).map(|i| a[i][i]).collect();
    (eigvals, v)
}
