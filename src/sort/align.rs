//! sort/align.rs — per-spike temporal alignment against a reference
//! template. Shifts are estimated once, on the clustering channel during the
//! local stage, and reused verbatim in the distant stage.

use crate::io::reader::WaveformMatrix;

/// Estimated displacement of each spike relative to the reference, in
/// samples; positive means the spike occurs later than the reference.
/// Integer-lag cross-correlation with parabolic sub-sample refinement.
pub fn estimate_shifts(
    wf: &WaveformMatrix,
    chan_col: usize,
    reference: &[f32],
    max_shift: usize,
) -> Vec<f32> {
    let t_len = wf.n_samples.min(reference.len());
    let max_shift = max_shift.min(t_len.saturating_sub(1)) as i64;
    let mut shifts = Vec::with_capacity(wf.n_spikes);

    let mut corr = vec![0.0f32; (2 * max_shift + 1) as usize];
    for spike in 0..wf.n_spikes {
        for (li, lag) in (-max_shift..=max_shift).enumerate() {
            let mut c = 0.0f32;
            for (t, &r) in reference.iter().enumerate().take(t_len) {
                let tt = t as i64 + lag;
                if tt < 0 || tt >= t_len as i64 {
                    continue;
                }
                c += r * wf.get(spike, tt as usize, chan_col);
            }
            corr[li] = c;
        }

        let mut best = 0usize;
        for (i, &c) in corr.iter().enumerate() {
            if c > corr[best] {
                best = i;
            }
        }

        // Parabolic refinement needs both neighbors.
        let mut shift = best as f32 - max_shift as f32;
        if best > 0 && best + 1 < corr.len() {
            let c0 = corr[best - 1];
            let c1 = corr[best];
            let c2 = corr[best + 1];
            let denom = c0 - 2.0 * c1 + c2;
            if denom.abs() > 1e-12 {
                let delta = 0.5 * (c0 - c2) / denom;
                shift += delta.clamp(-1.0, 1.0);
            }
        }
        shifts.push(shift);
    }
    shifts
}

/// Resample every channel of every spike at `t + shift` (linear
/// interpolation, edge clamp), undoing the per-spike displacement.
pub fn apply_shifts(wf: &mut WaveformMatrix, shifts: &[f32]) {
    debug_assert_eq!(shifts.len(), wf.n_spikes);
    let t_len = wf.n_samples;
    let mut trace = vec![0.0f32; t_len];
    for spike in 0..wf.n_spikes {
        let shift = shifts[spike];
        if shift == 0.0 {
            continue;
        }
        for c in 0..wf.n_channels {
            for (t, v) in trace.iter_mut().enumerate() {
                let pos = (t as f32 + shift).clamp(0.0, (t_len - 1) as f32);
                let lo = pos.floor() as usize;
                let hi = (lo + 1).min(t_len - 1);
                let frac = pos - lo as f32;
                *v = wf.get(spike, lo, c) * (1.0 - frac) + wf.get(spike, hi, c) * frac;
            }
            for (t, &v) in trace.iter().enumerate() {
                wf.set(spike, t, c, v);
            }
        }
    }
}
