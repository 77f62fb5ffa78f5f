//! core/stability.rs — contraction of over-segmented mixture components
//! into stable partitions.
//!
//! Stability of a partition is the average responsibility mass it keeps,
//! taken over the points that put any mass into it. Components whose
//! symmetrized mahalanobis distance falls below a searched threshold are
//! connected; the search walks the target partition count down from K-1
//! until every partition is stable (or two partitions remain), then
//! enforces the minimum-spike floor on the result.

use crate::core::mixture::{argmax, MixtureFit};
use crate::error::SortError;

/// A partition is accepted once its stability exceeds this.
pub const STABILITY_THRESHOLD: f32 = 0.9;

/// Responsibility entries below this are zeroed before renormalization.
pub const ASSIGNMENT_DELETE_THRESHOLD: f32 = 0.001;

/// Bisection bound; exceeding it means the component count was not monotone
/// in the threshold, which is an internal-consistency failure.
pub const MAX_BISECT_ITERS: usize = 1000;

/// Result of the merge: per-point partition labels, per-partition stability,
/// and the surviving row indices (relative to the fit's points).
#[derive(Clone, Debug)]
pub struct MergeOutcome {
    pub assignments: Vec<u32>,
    pub stability: Vec<f32>,
    pub kept_rows: Vec<usize>,
    pub n_partitions: usize,
}

/// Weight-masked average responsibility per partition: for each column, the
/// mean of its entries over rows that hold nonzero mass in it.
pub fn partition_stability(rhat: &[Vec<f32>]) -> Vec<f32> {
    let k = rhat.first().map(|r| r.len()).unwrap_or(0);
    let mut sums = vec![0.0f64; k];
    let mut counts = vec![0usize; k];
    for row in rhat {
        for (c, &r) in row.iter().enumerate() {
            if r > 0.0 {
                sums[c] += r as f64;
                counts[c] += 1;
            }
        }
    }
    (0..k)
        .map(|c| {
            if counts[c] == 0 {
                0.0
            } else {
                (sums[c] / counts[c] as f64) as f32
            }
        })
        .collect()
}

/// Merge over-segmented components and enforce the minimum-spike floor.
///
/// Each floor pass operates on an immutable reduced snapshot of the model
/// (`MixtureFit::restrict`), never on mutated state: dropped partitions'
/// points are reassigned through renormalized responsibilities, and only
/// points left with no mass anywhere disappear from `kept_rows`.
pub fn merge(fit: &MixtureFit, min_spikes: usize) -> Result<MergeOutcome, SortError> {
    let mut model = fit.clone();
    let mut kept_rows: Vec<usize> = (0..fit.n_points()).collect();
    let (mut assignments, mut stability, mut components) = anneal(&model)?;

    loop {
        let n_parts = stability.len();
        let mut counts = vec![0usize; n_parts];
        for &a in &assignments {
            counts[a as usize] += 1;
        }
        let min_c = counts.iter().copied().min().unwrap_or(0);
        let max_c = counts.iter().copied().max().unwrap_or(0);
        if !(min_c < min_spikes && max_c >= min_spikes) {
            return Ok(MergeOutcome {
                assignments,
                stability,
                kept_rows,
                n_partitions: n_parts,
            });
        }

        let keep_parts: Vec<usize> = (0..n_parts)
            .filter(|&p| counts[p] >= min_spikes)
            .collect();
        let keep_comps: Vec<usize> = keep_parts
            .iter()
            .flat_map(|&p| components[p].iter().copied())
            .collect();

        if keep_comps.len() > 1 {
            let (reduced, rows) = model.restrict(&keep_comps);
            kept_rows = rows.iter().map(|&r| kept_rows[r]).collect();
            model = reduced;
            let (a, s, c) = anneal(&model)?;
            assignments = a;
            stability = s;
            components = c;
        } else {
            // One component left: every point still carrying mass on it
            // collapses into a single partition.
            let comp = keep_comps[0];
            let rows: Vec<usize> = model
                .rhat
                .iter()
                .enumerate()
                .filter(|(_, row)| row[comp] > 0.0)
                .map(|(i, _)| i)
                .collect();
            kept_rows = rows.iter().map(|&r| kept_rows[r]).collect();
            let n = kept_rows.len();
            return Ok(MergeOutcome {
                assignments: vec![0; n],
                stability: vec![1.0],
                kept_rows,
                n_partitions: 1,
            });
        }
    }
}

/// Walk the target component count down from K-1 to 2, stopping at the first
/// stable partitioning. Returns (labels, stability, member components per
/// partition).
fn anneal(
    fit: &MixtureFit,
) -> Result<(Vec<u32>, Vec<f32>, Vec<Vec<usize>>), SortError> {
    let k = fit.n_components();
    let stability = partition_stability(&fit.rhat);
    if k <= 2 || stability.iter().all(|&s| s > STABILITY_THRESHOLD) {
        let identity: Vec<Vec<usize>> = (0..k).map(|i| vec![i]).collect();
        return Ok((fit.hard_assignments(), stability, identity));
    }

    // Symmetrized (max of both directions) component distance matrix.
    let mut dist = fit.component_distances();
    for i in 0..k {
        for j in (i + 1)..k {
            let d = dist[i][j].max(dist[j][i]);
            dist[i][j] = d;
            dist[j][i] = d;
        }
    }

    let mut tau_min = 0.0f32;
    for k_target in (2..k).rev() {
        let (components, tau) = components_at_k(&dist, tau_min, k_target)?;
        tau_min = tau;

        let merged = merge_columns(&fit.rhat, &components);
        let stability = partition_stability(&merged);
        if stability.iter().all(|&s| s > STABILITY_THRESHOLD) || k_target == 2 {
            let assignments = merged.iter().map(|row| argmax(row) as u32).collect();
            return Ok((assignments, stability, components));
        }
    }

    Err(SortError::DegenerateFit(
        "stability annealing fell through without a partition".into(),
    ))
}

/// Sum member-component responsibility columns per partition, zero entries
/// below the delete threshold, renormalize rows.
fn merge_columns(rhat: &[Vec<f32>], components: &[Vec<usize>]) -> Vec<Vec<f32>> {
    rhat.iter()
        .map(|row| {
            let mut merged: Vec<f32> = components
                .iter()
                .map(|members| members.iter().map(|&c| row[c]).sum())
                .collect();
            for v in merged.iter_mut() {
                if *v < ASSIGNMENT_DELETE_THRESHOLD {
                    *v = 0.0;
                }
            }
            let sum: f32 = merged.iter().sum();
            debug_assert!(sum > 0.0, "row lost all mass during merge");
            if sum > 0.0 {
                for v in merged.iter_mut() {
                    *v /= sum;
                }
            }
            merged
        })
        .collect()
}

/// Largest threshold yielding exactly `k_target` connected components, via
/// unit-step linear probing then bisection. `tau_min` must sit where the
/// graph still has `k_target + 1` components (threshold/count monotonicity).
fn components_at_k(
    dist: &[Vec<f32>],
    tau_min: f32,
    k_target: usize,
) -> Result<(Vec<Vec<usize>>, f32), SortError> {
    let at_min = connected_components(dist, tau_min);
    if at_min.len() != k_target + 1 {
        return Err(SortError::ComponentCountMismatch {
            expected: k_target + 1,
            found: at_min.len(),
            threshold: tau_min,
        });
    }

    let mut tau = tau_min;
    let mut cc = at_min;
    while cc.len() > k_target {
        tau += 1.0;
        cc = connected_components(dist, tau);
    }
    if cc.len() == k_target {
        return Ok((cc, tau));
    }

    // Overshot: the count dropped past k_target inside (tau - 1, tau].
    let mut hi = tau;
    let mut lo = tau - 1.0;
    let at_lo = connected_components(dist, lo);
    if at_lo.len() <= k_target {
        return Err(SortError::ComponentCountMismatch {
            expected: k_target + 1,
            found: at_lo.len(),
            threshold: lo,
        });
    }

    for _ in 0..MAX_BISECT_ITERS {
        let mid = 0.5 * (hi + lo);
        let cc = connected_components(dist, mid);
        match cc.len().cmp(&k_target) {
            std::cmp::Ordering::Equal => return Ok((cc, mid)),
            std::cmp::Ordering::Greater => lo = mid,
            std::cmp::Ordering::Less => hi = mid,
        }
    }
    Err(SortError::ThresholdSearchDiverged(MAX_BISECT_ITERS))
}

/// Connected components of the graph with an edge wherever the symmetrized
/// distance is below `tau`. Components are ordered by smallest member so the
/// partition label order is deterministic.
fn connected_components(dist: &[Vec<f32>], tau: f32) -> Vec<Vec<usize>> {
    let k = dist.len();
    let mut parent: Vec<usize> = (0..k).collect();

    fn find(parent: &mut Vec<usize>, mut i: usize) -> usize {
        while parent[i] != i {
            parent[i] = parent[parent[i]];
            i = parent[i];
        }
        i
    }

    for i in 0..k {
        for j in (i + 1)..k {
            if dist[i][j] < tau {
                let ri = find(&mut parent, i);
                let rj = find(&mut parent, j);
                if ri != rj {
                    parent[ri.max(rj)] = ri.min(rj);
                }
            }
        }
    }

    let mut groups: Vec<Vec<usize>> = Vec::new();
    let mut root_to_group = vec![usize::MAX; k];
    for i in 0..k {
        let r = find(&mut parent, i);
        if root_to_group[r] == usize::MAX {
            root_to_group[r] = groups.len();
            groups.push(Vec::new());
        }
        groups[root_to_group[r]].push(i);
    }
    groups
}

#[cfg(test)]
mod tests {
    use super::*;

    /// Fit with hand-set responsibilities and unit precisions at the given
    /// 1-d means.
    fn fit_from(rhat: Vec<Vec<f32>>, means: &[f32]) -> MixtureFit {
        let k = means.len();
        let n = rhat.len();
        MixtureFit {
            dim: 1,
            rhat,
            mu: means.iter().map(|&m| vec![m]).collect(),
            prec: vec![vec![1.0]; k],
            logdet_prec: vec![0.0; k],
            nu: vec![n as f32 / k as f32; k],
        }
    }

    fn binary_rows(sizes: &[usize]) -> Vec<Vec<f32>> {
        let k = sizes.len();
        let mut rows = Vec::new();
        for (c, &s) in sizes.iter().enumerate() {
            for _ in 0..s {
                let mut row = vec![0.0f32; k];
                row[c] = 1.0;
                rows.push(row);
            }
        }
        rows
    }

    #[test]
    fn stable_components_are_left_alone() {
        let fit = fit_from(binary_rows(&[40, 40, 40]), &[0.0, 100.0, 200.0]);
        let out = merge(&fit, 5).unwrap();
        assert_eq!(out.n_partitions, 3);
        assert_eq!(out.kept_rows.len(), 120);
        assert!(out.stability.iter().all(|&s| s > STABILITY_THRESHOLD));
    }

    #[test]
    fn split_component_pair_is_contracted() {
        // Components 0 and 1 share one blob's mass 50/50; component 2 is a
        // clean distant blob. The pair's stability is 0.5, so annealing must
        // fuse it.
        let mut rhat = Vec::new();
        for _ in 0..60 {
            rhat.push(vec![0.5, 0.5, 0.0]);
        }
        for _ in 0..60 {
            rhat.push(vec![0.0, 0.0, 1.0]);
        }
        let fit = fit_from(rhat, &[0.0, 0.6, 100.0]);
        let out = merge(&fit, 5).unwrap();
        assert_eq!(out.n_partitions, 2);
        assert_eq!(out.kept_rows.len(), 120);
        let first = out.assignments[0];
        assert!(out.assignments[..60].iter().all(|&a| a == first));
        assert_ne!(out.assignments[60], first);
        assert!(out.stability.iter().all(|&s| s > STABILITY_THRESHOLD));
    }

    #[test]
    fn partition_count_stays_within_bounds() {
        let fit = fit_from(binary_rows(&[30, 30, 30, 30]), &[0.0, 3.0, 6.0, 9.0]);
        let out = merge(&fit, 5).unwrap();
        assert!(out.n_partitions >= 1);
        assert!(out.n_partitions <= fit.n_components());
    }

    #[test]
    fn undersized_partition_collapses_to_survivor() {
        let fit = fit_from(binary_rows(&[95, 5]), &[0.0, 50.0]);
        let out = merge(&fit, 10).unwrap();
        assert_eq!(out.n_partitions, 1);
        assert_eq!(out.kept_rows.len(), 95);
        assert!(out.kept_rows.iter().all(|&r| r < 95));
    }

    #[test]
    fn all_partitions_undersized_are_returned_as_is() {
        let fit = fit_from(binary_rows(&[4, 3]), &[0.0, 50.0]);
        let out = merge(&fit, 10).unwrap();
        assert_eq!(out.n_partitions, 2);
        assert_eq!(out.kept_rows.len(), 7);
    }

    #[test]
    fn probe_boundary_mismatch_is_fatal() {
        // Two clear components at tau_min = 0, but the caller claims there
        // should be four.
        let dist = vec![
            vec![0.0, 1.0, 9.0],
            vec![1.0, 0.0, 9.0],
            vec![9.0, 9.0, 0.0],
        ];
        let err = components_at_k(&dist, 0.0, 3).unwrap_err();
        match err {
            SortError::ComponentCountMismatch { expected, found, .. } => {
                assert_eq!(expected, 4);
                assert_eq!(found, 3);
            }
            other => panic!("unexpected error: {other}"),
        }
    }

    #[test]
    fn threshold_search_finds_exact_count() {
        // Distances 1 and 9: tau slightly above 1 gives 2 components.
        let dist = vec![
            vec![0.0, 1.0, 9.0],
            vec![1.0, 0.0, 9.0],
            vec![9.0, 9.0, 0.0],
        ];
        let (cc, tau) = components_at_k(&dist, 0.0, 2).unwrap();
        assert_eq!(cc.len(), 2);
        assert!(tau > 1.0 && tau < 9.0, "tau {tau}");
        assert_eq!(cc[0], vec![0, 1]);
        assert_eq!(cc[1], vec![2]);
    }

    #[test]
    fn stability_metric_masks_zero_rows() {
        let rhat = vec![
            vec![1.0, 0.0],
            vec![0.8, 0.2],
            vec![0.0, 1.0],
        ];
        let s = partition_stability(&rhat);
        assert!((s[0] - 0.9).abs() < 1e-6);
        assert!((s[1] - 0.6).abs() < 1e-6);
    }
}
