//! sort/denoise.rs — waveform-to-feature reduction ahead of clustering.
//!
//! The local stage projects each loaded channel onto a fixed template-space
//! basis, scaled by the basis noise level, so the mixture sees
//! noise-normalized coordinates. The distant stage instead samples the raw
//! waveforms at the template's connected active region, which keeps far
//! channels comparable without a per-channel basis.

use crate::io::probe::Adjacency;
use crate::io::reader::WaveformMatrix;
use crate::io::template_space::TemplateSpace;

/// Template samples below this (negative) level count as active in the
/// distant stage.
pub const ACTIVE_THRESHOLD: f32 = -0.5;

/// At most this many timepoints survive per channel in the distant stage.
pub const MAX_TIMEPOINTS_PER_CHANNEL: usize = 3;

/// Project every spike onto the basis of its channel role. The clustering
/// channel uses the main basis, all other loaded channels the secondary one;
/// each coefficient is divided by the matching noise scale. Output layout is
/// channel-major: rank coefficients for column 0, then column 1, and so on.
pub fn denoise_local(
    wf: &WaveformMatrix,
    loaded_channels: &[usize],
    main_channel: usize,
    space: &TemplateSpace,
) -> Vec<Vec<f32>> {
    let rank = space.rank();
    debug_assert_eq!(loaded_channels.len(), wf.n_channels);

    let mut out = Vec::with_capacity(wf.n_spikes);
    for spike in 0..wf.n_spikes {
        let mut feats = Vec::with_capacity(rank * wf.n_channels);
        for (col, &chan) in loaded_channels.iter().enumerate() {
            let (comps, noise) = if chan == main_channel {
                (&space.main_components, &space.main_noise_std)
            } else {
                (&space.sec_components, &space.sec_noise_std)
            };
            for r in 0..rank {
                let mut dot = 0.0f32;
                let t_len = wf.n_samples.min(comps[r].len());
                for t in 0..t_len {
                    dot += wf.get(spike, t, col) * comps[r][t];
                }
                feats.push(dot / noise[r].max(1e-6));
            }
        }
        out.push(feats);
    }
    out
}

/// Raw-sample features at the template's active region.
///
/// The region is grown from the template's global minimum over (time,
/// channel) locations below [`ACTIVE_THRESHOLD`], connecting locations on
/// adjacent channels within one timepoint of each other, then capped at
/// [`MAX_TIMEPOINTS_PER_CHANNEL`] deepest samples per channel. When nothing
/// crosses the threshold the minimum alone is used.
pub fn denoise_distant(
    wf: &WaveformMatrix,
    loaded_channels: &[usize],
    adjacency: &Adjacency,
) -> Vec<Vec<f32>> {
    let rows: Vec<usize> = (0..wf.n_spikes).collect();
    let template = wf.median_template(&rows);

    // (time, column) locations where the template is active.
    let mut points: Vec<(usize, usize)> = Vec::new();
    let mut deepest = (0usize, 0usize);
    let mut deepest_val = f32::INFINITY;
    for (t, row) in template.iter().enumerate() {
        for (c, &v) in row.iter().enumerate() {
            if v < deepest_val {
                deepest_val = v;
                deepest = (t, c);
            }
            if v < ACTIVE_THRESHOLD {
                points.push((t, c));
            }
        }
    }
    if points.is_empty() {
        points.push(deepest);
    }

    // Seed the flood fill at the most negative active location.
    let seed = points
        .iter()
        .enumerate()
        .min_by(|a, b| {
            let va = template[a.1 .0][a.1 .1];
            let vb = template[b.1 .0][b.1 .1];
            va.partial_cmp(&vb).unwrap_or(std::cmp::Ordering::Equal)
        })
        .map(|(i, _)| i)
        .unwrap_or(0);

    let mut keep = vec![false; points.len()];
    let mut stack = vec![seed];
    while let Some(i) = stack.pop() {
        if keep[i] {
            continue;
        }
        keep[i] = true;
        let (ti, ci) = points[i];
        for (j, &(tj, cj)) in points.iter().enumerate() {
            if keep[j] {
                continue;
            }
            let dt = (ti as i64 - tj as i64).abs();
            if dt <= 1 && adjacency.is_neighbor(loaded_channels[ci], loaded_channels[cj]) {
                stack.push(j);
            }
        }
    }

    // Cap each channel at its deepest surviving timepoints.
    let mut by_channel: Vec<Vec<(usize, usize)>> = vec![Vec::new(); wf.n_channels];
    for (i, &(t, c)) in points.iter().enumerate() {
        if keep[i] {
            by_channel[c].push((t, c));
        }
    }
    let mut locations: Vec<(usize, usize)> = Vec::new();
    for chan_points in by_channel.iter_mut() {
        chan_points.sort_by(|a, b| {
            template[a.0][a.1]
                .partial_cmp(&template[b.0][b.1])
                .unwrap_or(std::cmp::Ordering::Equal)
        });
        chan_points.truncate(MAX_TIMEPOINTS_PER_CHANNEL);
        locations.extend_from_slice(chan_points);
    }
    locations.sort_unstable();

    (0..wf.n_spikes)
        .map(|spike| {
            locations
                .iter()
                .map(|&(t, c)| wf.get(spike, t, c))
                .collect()
        })
        .collect()
}
