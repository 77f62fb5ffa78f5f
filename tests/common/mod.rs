//! Shared builders for pipeline tests: synthetic recordings with planted
//! spike populations, plus input-archive plumbing.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use spiketree::config::AppConfig;
use spiketree::io::archive::ChannelInput;
use spiketree::io::reader::RawRecording;
use std::path::{Path, PathBuf};

pub const SPIKE_SIZE: usize = 61;

/// Unit-depth negative spike, peak at the window center.
pub fn spike_shape() -> Vec<f32> {
    let center = SPIKE_SIZE as f32 / 2.0;
    let width = SPIKE_SIZE as f32 / 12.0;
    (0..SPIKE_SIZE)
        .map(|t| {
            let d = (t as f32 - center) / width;
            -(-0.5 * d * d).exp()
        })
        .collect()
}

/// Approximate standard gaussian draw.
pub fn gauss(rng: &mut StdRng) -> f32 {
    (0..4).map(|_| rng.random_range(-1.0f32..1.0)).sum::<f32>() / 2.0
}

/// One planted population: spike times plus (channel, amplitude) deposits.
pub struct Population {
    pub times: Vec<i64>,
    pub deposits: Vec<(usize, f32)>,
}

/// Recording with background noise and the given populations planted at
/// their spike times, with a few percent amplitude jitter per spike.
pub fn synth_recording(
    rec_len: usize,
    n_channels: usize,
    pops: &[Population],
    seed: u64,
) -> RawRecording {
    let mut rng = StdRng::seed_from_u64(seed);
    let mut samples = vec![0.0f32; rec_len * n_channels];
    for v in samples.iter_mut() {
        *v = 0.3 * gauss(&mut rng);
    }
    let mut rec = RawRecording::new(samples, n_channels);

    let shape = spike_shape();
    for pop in pops {
        for &t in &pop.times {
            let jitter = 1.0 + 0.03 * gauss(&mut rng);
            for &(c, a) in &pop.deposits {
                rec.add_waveform(t - (SPIKE_SIZE / 2) as i64, c, &shape, a * jitter);
            }
        }
    }
    rec
}

pub fn base_config(n_channels: usize) -> AppConfig {
    let mut cfg = AppConfig::default();
    cfg.recording.n_channels = n_channels;
    cfg.recording.spike_size = SPIKE_SIZE;
    cfg
}

pub fn write_input(dir: &Path, channel: usize, times: &[i64]) -> PathBuf {
    let path = dir.join(format!("channel_{channel:03}.json"));
    let input = ChannelInput {
        spike_times: times.to_vec(),
        upsampled_ids: None,
    };
    input.save(&path).expect("write input archive");
    path
}

/// Fraction of the unit's train landing within `tol` samples of any planted
/// time.
pub fn coverage(train: &[f32], planted: &[i64], tol: f32) -> f32 {
    if train.is_empty() {
        return 0.0;
    }
    let hits = train
        .iter()
        .filter(|&&t| planted.iter().any(|&p| (t - p as f32).abs() <= tol))
        .count();
    hits as f32 / train.len() as f32
}
