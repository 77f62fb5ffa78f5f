//! sort/context.rs — per-channel working state: the cleaned spike list, the
//! detected clustering channel and its neighborhood, and the loaded stage
//! data (waveforms, shifts, features) the recursion operates on.

use crate::config::AppConfig;
use crate::error::SortError;
use crate::io::archive::ChannelInput;
use crate::io::probe::Adjacency;
use crate::io::reader::{peak_channel, TemplateBank, WaveformMatrix, WaveformSource};
use crate::io::template_space::TemplateSpace;
use crate::sort::{align, denoise};
use rand::rngs::StdRng;
use tracing::debug;

/// Spikes sampled when detecting the clustering channel.
const MAIN_CHANNEL_SAMPLE: usize = 500;

/// Samples are clamped to this magnitude right after loading.
const CLIP_LIMIT: f32 = 1000.0;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub enum Mode {
    /// Cluster raw waveforms.
    Raw,
    /// Cluster residual waveforms with unit templates added back.
    Residual,
}

/// Everything residual-mode reads need, bundled so a residual context can
/// only be built complete. `ids` is aligned with the cleaned spike list.
pub struct ResidualData<'a> {
    pub source: &'a dyn WaveformSource,
    pub bank: &'a TemplateBank,
    pub ids: Vec<u32>,
}

pub struct ChannelContext<'a> {
    pub cfg: &'a AppConfig,
    pub raw: &'a dyn WaveformSource,
    pub residual: Option<ResidualData<'a>>,
    pub space: &'a TemplateSpace,
    pub adjacency: &'a Adjacency,
    pub rng: StdRng,

    /// Detected clustering channel and its neighborhood.
    pub channel: usize,
    pub neighbor_chans: Vec<usize>,

    /// Cleaned channel-scoped spike list; all stage indices point into it.
    pub spike_times: Vec<i64>,
    /// Per-spike alignment shift, filled during the local stage.
    pub shifts: Vec<f32>,
    /// Minimum surviving spikes for a unit on this channel.
    pub min_spikes: usize,

    // Stage state, rebuilt by `prepare_stage`.
    pub indices_in: Vec<usize>,
    pub loaded_channels: Vec<usize>,
    pub wf: WaveformMatrix,
    pub denoised: Vec<Vec<f32>>,
}

impl<'a> ChannelContext<'a> {
    /// Clean the input spike list, detect the clustering channel, and set
    /// the per-channel floor. Runs in residual mode when the input carries
    /// unit ids and a template bank is available; otherwise raw. Returns
    /// `None` when no usable spikes remain.
    #[allow(clippy::too_many_arguments)]
    pub fn new(
        cfg: &'a AppConfig,
        raw: &'a dyn WaveformSource,
        residual: Option<&'a dyn WaveformSource>,
        bank: Option<&'a TemplateBank>,
        space: &'a TemplateSpace,
        adjacency: &'a Adjacency,
        input: ChannelInput,
        mut rng: StdRng,
    ) -> Result<Option<Self>, SortError> {
        let original_count = input.spike_times.len();
        if original_count == 0 {
            return Ok(None);
        }

        let (spike_times, upsampled_ids) = clean_input_spikes(
            input,
            cfg.cluster.max_total_spikes,
            cfg.recording.spike_size,
            raw.rec_len(),
            &mut rng,
        );
        if spike_times.is_empty() {
            return Ok(None);
        }
        let residual = match (upsampled_ids, bank) {
            (Some(ids), Some(bank)) => Some(ResidualData {
                source: residual.unwrap_or(raw),
                bank,
                ids,
            }),
            _ => None,
        };

        let span = (spike_times.iter().copied().max().unwrap_or(0)
            - spike_times.iter().copied().min().unwrap_or(0)) as f32;
        let n_sec = span / cfg.recording.sampling_rate;
        let scale = (cfg.cluster.max_total_spikes as f32 / original_count as f32).min(1.0);
        let min_spikes = ((n_sec * cfg.cluster.min_firing_rate_hz * scale) as usize).max(1);

        let n = spike_times.len();
        let mut ctx = Self {
            cfg,
            raw,
            residual,
            space,
            adjacency,
            rng,
            channel: 0,
            neighbor_chans: Vec::new(),
            spike_times,
            shifts: vec![0.0; n],
            min_spikes,
            indices_in: Vec::new(),
            loaded_channels: Vec::new(),
            wf: WaveformMatrix::default(),
            denoised: Vec::new(),
        };
        ctx.channel = ctx.find_main_channel();
        ctx.neighbor_chans = adjacency.neighbors(ctx.channel);
        debug!(
            channel = ctx.channel,
            spikes = ctx.spike_times.len(),
            min_spikes = ctx.min_spikes,
            "channel context ready"
        );
        Ok(Some(ctx))
    }

    pub fn n_spikes(&self) -> usize {
        self.spike_times.len()
    }

    pub fn mode(&self) -> Mode {
        if self.residual.is_some() {
            Mode::Residual
        } else {
            Mode::Raw
        }
    }

    /// Clustering channel: largest mean-template peak-to-peak amplitude over
    /// a capped spike sample, at full channel extent.
    fn find_main_channel(&mut self) -> usize {
        let n = self.spike_times.len();
        let take = n.min(MAIN_CHANNEL_SAMPLE);
        let mut picked = rand::seq::index::sample(&mut self.rng, n, take).into_vec();
        picked.sort_unstable();
        let times: Vec<i64> = picked.iter().map(|&i| self.spike_times[i]).collect();

        let all: Vec<usize> = (0..self.raw.n_channels()).collect();
        let (wf, _skipped) = self.read(&times, &picked, &all);
        if wf.n_spikes == 0 {
            return 0;
        }

        let mut mean = vec![vec![0.0f32; wf.n_channels]; wf.n_samples];
        for spike in 0..wf.n_spikes {
            for (t, row) in mean.iter_mut().enumerate() {
                for (c, v) in row.iter_mut().enumerate() {
                    *v += wf.get(spike, t, c);
                }
            }
        }
        let inv = 1.0 / wf.n_spikes as f32;
        for row in mean.iter_mut() {
            for v in row.iter_mut() {
                *v *= inv;
            }
        }
        peak_channel(&mean)
    }

    fn read(
        &self,
        times: &[i64],
        picked: &[usize],
        channels: &[usize],
    ) -> (WaveformMatrix, Vec<usize>) {
        match &self.residual {
            None => self
                .raw
                .read_waveforms(times, self.cfg.recording.spike_size, channels),
            Some(res) => {
                let unit_ids: Vec<u32> = picked.iter().map(|&i| res.ids[i]).collect();
                res.source.read_clean_waveforms(
                    times,
                    &unit_ids,
                    res.bank,
                    self.cfg.recording.spike_size,
                    channels,
                )
            }
        }
    }

    /// Load and featurize one stage over the given spike indices. The local
    /// stage restricts to the clustering channel's neighborhood, estimates
    /// alignment shifts against the reference template and projects onto the
    /// template-space basis; the distant stage loads every channel, reuses
    /// the stored shifts and samples the active template region.
    pub fn prepare_stage(&mut self, mut indices: Vec<usize>, local: bool) {
        self.loaded_channels = if local {
            self.neighbor_chans.clone()
        } else {
            (0..self.raw.n_channels()).collect()
        };

        let times: Vec<i64> = indices.iter().map(|&i| self.spike_times[i]).collect();
        let (mut wf, skipped) = self.read(&times, &indices, &self.loaded_channels.clone());
        for &s in skipped.iter().rev() {
            indices.remove(s);
        }
        wf.clip(CLIP_LIMIT);

        let shifts = if local {
            let col = self
                .loaded_channels
                .iter()
                .position(|&c| c == self.channel)
                .unwrap_or(0);
            let max_shift = self.cfg.recording.spike_size / 4;
            let shifts = align::estimate_shifts(&wf, col, &self.space.ref_template, max_shift);
            for (&idx, &s) in indices.iter().zip(shifts.iter()) {
                self.shifts[idx] = s;
            }
            shifts
        } else {
            indices.iter().map(|&i| self.shifts[i]).collect()
        };
        align::apply_shifts(&mut wf, &shifts);

        self.denoised = if local {
            denoise::denoise_local(&wf, &self.loaded_channels, self.channel, self.space)
        } else {
            denoise::denoise_distant(&wf, &self.loaded_channels, self.adjacency)
        };
        self.wf = wf;
        self.indices_in = indices;
    }

    /// Median template of the given spikes at full channel extent, always
    /// read from the raw recording, with the stored alignment applied.
    pub fn all_channel_template(&self, indices: &[usize]) -> Vec<Vec<f32>> {
        let mut indices = indices.to_vec();
        let times: Vec<i64> = indices.iter().map(|&i| self.spike_times[i]).collect();
        let all: Vec<usize> = (0..self.raw.n_channels()).collect();
        let (mut wf, skipped) =
            self.raw
                .read_waveforms(&times, self.cfg.recording.spike_size, &all);
        for &s in skipped.iter().rev() {
            indices.remove(s);
        }
        wf.clip(CLIP_LIMIT);
        let shifts: Vec<f32> = indices.iter().map(|&i| self.shifts[i]).collect();
        align::apply_shifts(&mut wf, &shifts);
        let rows: Vec<usize> = (0..wf.n_spikes).collect();
        wf.median_template(&rows)
    }
}

/// Cap the spike list, then drop spikes whose waveform window would cross a
/// recording edge. The cap draw is random but re-sorted so the list stays in
/// time order.
fn clean_input_spikes(
    input: ChannelInput,
    max_total: usize,
    spike_size: usize,
    rec_len: usize,
    rng: &mut StdRng,
) -> (Vec<i64>, Option<Vec<u32>>) {
    let ChannelInput {
        mut spike_times,
        mut upsampled_ids,
    } = input;

    if spike_times.len() > max_total {
        let mut picked = rand::seq::index::sample(rng, spike_times.len(), max_total).into_vec();
        picked.sort_unstable();
        spike_times = picked.iter().map(|&i| spike_times[i]).collect();
        upsampled_ids = upsampled_ids.map(|ids| picked.iter().map(|&i| ids[i]).collect());
    }

    let half = (spike_size / 2) as i64;
    let fits = |t: i64| t - half >= 0 && t - half + spike_size as i64 <= rec_len as i64;
    if let Some(ids) = upsampled_ids {
        let pairs: Vec<(i64, u32)> = spike_times
            .into_iter()
            .zip(ids)
            .filter(|&(t, _)| fits(t))
            .collect();
        let (times, ids): (Vec<i64>, Vec<u32>) = pairs.into_iter().unzip();
        (times, Some(ids))
    } else {
        spike_times.retain(|&t| fits(t));
        (spike_times, None)
    }
}
