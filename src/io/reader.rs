//! io/reader.rs — read-only waveform access by explicit spike-time index
//! list. Sources are shareable across channel workers without locking; all
//! state lives in the caller.

use crate::error::SortError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Spike-major waveform tensor (spike x time x channel), index-aligned with
/// the spike subset it was loaded for.
#[derive(Clone, Debug, Default)]
pub struct WaveformMatrix {
    pub data: Vec<f32>,
    pub n_spikes: usize,
    pub n_samples: usize,
    pub n_channels: usize,
}

impl WaveformMatrix {
    pub fn zeros(n_spikes: usize, n_samples: usize, n_channels: usize) -> Self {
        Self {
            data: vec![0.0; n_spikes * n_samples * n_channels],
            n_spikes,
            n_samples,
            n_channels,
        }
    }

    #[inline]
    fn idx(&self, spike: usize, t: usize, chan: usize) -> usize {
        (spike * self.n_samples + t) * self.n_channels + chan
    }

    #[inline]
    pub fn get(&self, spike: usize, t: usize, chan: usize) -> f32 {
        self.data[self.idx(spike, t, chan)]
    }

    #[inline]
    pub fn set(&mut self, spike: usize, t: usize, chan: usize, v: f32) {
        let i = self.idx(spike, t, chan);
        self.data[i] = v;
    }

    /// Clamp every sample into [-limit, limit]. Neuropixel-style artifacts
    /// otherwise dominate the projections.
    pub fn clip(&mut self, limit: f32) {
        for v in self.data.iter_mut() {
            *v = v.clamp(-limit, limit);
        }
    }

    /// Per-(time, channel) median over the selected spike rows.
    pub fn median_template(&self, rows: &[usize]) -> Vec<Vec<f32>> {
        let mut template = vec![vec![0.0f32; self.n_channels]; self.n_samples];
        if rows.is_empty() {
            return template;
        }
        let mut column = vec![0.0f32; rows.len()];
        for t in 0..self.n_samples {
            for c in 0..self.n_channels {
                for (k, &r) in rows.iter().enumerate() {
                    column[k] = self.get(r, t, c);
                }
                template[t][c] = median_in_place(&mut column);
            }
        }
        template
    }
}

fn median_in_place(values: &mut [f32]) -> f32 {
    values.sort_by(|a, b| a.partial_cmp(b).unwrap_or(std::cmp::Ordering::Equal));
    let n = values.len();
    if n % 2 == 1 {
        values[n / 2]
    } else {
        0.5 * (values[n / 2 - 1] + values[n / 2])
    }
}

/// Channel index (into the template's columns) with the largest
/// peak-to-peak amplitude.
pub fn peak_channel(template: &[Vec<f32>]) -> usize {
    let n_channels = template.first().map(|r| r.len()).unwrap_or(0);
    let mut best = 0usize;
    let mut best_ptp = f32::NEG_INFINITY;
    for c in 0..n_channels {
        let mut lo = f32::INFINITY;
        let mut hi = f32::NEG_INFINITY;
        for row in template {
            lo = lo.min(row[c]);
            hi = hi.max(row[c]);
        }
        let ptp = hi - lo;
        if ptp > best_ptp {
            best_ptp = ptp;
            best = c;
        }
    }
    best
}

/// Per-unit templates at full channel extent, added back onto residual
/// reads.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct TemplateBank {
    /// unit x time x channel.
    pub templates: Vec<Vec<Vec<f32>>>,
}

impl TemplateBank {
    pub fn n_units(&self) -> usize {
        self.templates.len()
    }
}

/// Read-only waveform source addressed by explicit spike-time lists.
/// `read_waveforms` returns the loaded tensor plus the positions (within the
/// request) of spikes that fell outside the recording and were skipped.
pub trait WaveformSource: Sync {
    fn n_channels(&self) -> usize;
    fn rec_len(&self) -> usize;

    fn read_waveforms(
        &self,
        spike_times: &[i64],
        spike_size: usize,
        channels: &[usize],
    ) -> (WaveformMatrix, Vec<usize>);

    /// Residual variant: read, then add each spike's unit template back so
    /// the waveform looks like clean data again.
    fn read_clean_waveforms(
        &self,
        spike_times: &[i64],
        unit_ids: &[u32],
        bank: &TemplateBank,
        spike_size: usize,
        channels: &[usize],
    ) -> (WaveformMatrix, Vec<usize>) {
        let (mut wf, skipped) = self.read_waveforms(spike_times, spike_size, channels);
        // Positions surviving the skip, in request order.
        let mut kept: Vec<usize> = (0..spike_times.len()).collect();
        for &s in skipped.iter().rev() {
            kept.remove(s);
        }
        for (row, &pos) in kept.iter().enumerate() {
            let unit = unit_ids[pos] as usize;
            let template = &bank.templates[unit];
            for t in 0..wf.n_samples.min(template.len()) {
                for (cc, &chan) in channels.iter().enumerate() {
                    let add = template[t][chan];
                    let v = wf.get(row, t, cc);
                    wf.set(row, t, cc, v + add);
                }
            }
        }
        (wf, skipped)
    }
}

/// Flat in-memory recording, time-major (sample t, channel c).
#[derive(Clone, Debug)]
pub struct RawRecording {
    samples: Vec<f32>,
    n_samples: usize,
    n_channels: usize,
}

impl RawRecording {
    pub fn new(samples: Vec<f32>, n_channels: usize) -> Self {
        assert!(n_channels > 0);
        assert_eq!(samples.len() % n_channels, 0);
        let n_samples = samples.len() / n_channels;
        Self {
            samples,
            n_samples,
            n_channels,
        }
    }

    /// Load little-endian f32 samples from a flat binary file.
    pub fn from_file(path: &Path, n_channels: usize) -> Result<Self, SortError> {
        let bytes = std::fs::read(path)?;
        let samples = bytes
            .chunks_exact(4)
            .map(|b| f32::from_le_bytes([b[0], b[1], b[2], b[3]]))
            .collect();
        Ok(Self::new(samples, n_channels))
    }

    #[inline]
    pub fn sample(&self, t: usize, c: usize) -> f32 {
        self.samples[t * self.n_channels + c]
    }

    /// Add `amplitude * shape[t]` onto channel `c` starting at `t0`.
    /// Test/synthesis helper for building recordings.
    pub fn add_waveform(&mut self, t0: i64, c: usize, shape: &[f32], amplitude: f32) {
        for (dt, &s) in shape.iter().enumerate() {
            let t = t0 + dt as i64;
            if t < 0 || t >= self.n_samples as i64 {
                continue;
            }
            self.samples[t as usize * self.n_channels + c] += amplitude * s;
        }
    }
}

impl WaveformSource for RawRecording {
    fn n_channels(&self) -> usize {
        self.n_channels
    }

    fn rec_len(&self) -> usize {
        self.n_samples
    }

    fn read_waveforms(
        &self,
        spike_times: &[i64],
        spike_size: usize,
        channels: &[usize],
    ) -> (WaveformMatrix, Vec<usize>) {
        let half = (spike_size / 2) as i64;
        let mut skipped = Vec::new();
        let mut kept_starts = Vec::new();
        for (i, &t) in spike_times.iter().enumerate() {
            let start = t - half;
            if start < 0 || start + spike_size as i64 > self.n_samples as i64 {
                skipped.push(i);
            } else {
                kept_starts.push(start as usize);
            }
        }

        let mut wf = WaveformMatrix::zeros(kept_starts.len(), spike_size, channels.len());
        for (row, &start) in kept_starts.iter().enumerate() {
            for t in 0..spike_size {
                for (cc, &chan) in channels.iter().enumerate() {
                    wf.set(row, t, cc, self.sample(start + t, chan));
                }
            }
        }
        (wf, skipped)
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn ramp_recording(n_samples: usize, n_channels: usize) -> RawRecording {
        let samples = (0..n_samples * n_channels)
            .map(|i| i as f32)
            .collect::<Vec<_>>();
        RawRecording::new(samples, n_channels)
    }

    #[test]
    fn reads_centered_windows() {
        let rec = ramp_recording(100, 2);
        let (wf, skipped) = rec.read_waveforms(&[50], 5, &[0, 1]);
        assert!(skipped.is_empty());
        assert_eq!(wf.n_spikes, 1);
        // Window starts at t = 48; channel 0 sample there is 96.
        assert_eq!(wf.get(0, 0, 0), 96.0);
        assert_eq!(wf.get(0, 0, 1), 97.0);
        assert_eq!(wf.get(0, 4, 0), 104.0);
    }

    #[test]
    fn edge_spikes_are_skipped() {
        let rec = ramp_recording(100, 1);
        let (wf, skipped) = rec.read_waveforms(&[1, 50, 99], 11, &[0]);
        assert_eq!(skipped, vec![0, 2]);
        assert_eq!(wf.n_spikes, 1);
    }

    #[test]
    fn median_template_is_robust_to_one_outlier() {
        let mut wf = WaveformMatrix::zeros(5, 1, 1);
        for i in 0..5 {
            wf.set(i, 0, 0, 1.0);
        }
        wf.set(4, 0, 0, 1000.0);
        let rows: Vec<usize> = (0..5).collect();
        let template = wf.median_template(&rows);
        assert_eq!(template[0][0], 1.0);
    }

    #[test]
    fn peak_channel_uses_peak_to_peak() {
        // Channel 1 swings -3..1, channel 0 only 0..2.
        let template = vec![vec![0.0, -3.0], vec![2.0, 1.0]];
        assert_eq!(peak_channel(&template), 1);
    }

    #[test]
    fn clean_read_adds_unit_template_back() {
        let rec = RawRecording::new(vec![0.0; 200], 1);
        let bank = TemplateBank {
            templates: vec![vec![vec![2.5]; 5]],
        };
        let (wf, skipped) = rec.read_clean_waveforms(&[100], &[0], &bank, 5, &[0]);
        assert!(skipped.is_empty());
        for t in 0..5 {
            assert_eq!(wf.get(0, t, 0), 2.5);
        }
    }
}
