use serde::{Deserialize, Serialize};
use std::fs;
use std::path::Path;

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RecordingConfig {
    #[serde(default = "RecordingConfig::default_sampling_rate")]
    pub sampling_rate: f32,
    /// Waveform window length in samples.
    #[serde(default = "RecordingConfig::default_spike_size")]
    pub spike_size: usize,
    #[serde(default = "RecordingConfig::default_n_channels")]
    pub n_channels: usize,
}

impl RecordingConfig {
    fn default_sampling_rate() -> f32 {
        30_000.0
    }
    fn default_spike_size() -> usize {
        61
    }
    fn default_n_channels() -> usize {
        1
    }
}

impl Default for RecordingConfig {
    fn default() -> Self {
        Self {
            sampling_rate: Self::default_sampling_rate(),
            spike_size: Self::default_spike_size(),
            n_channels: Self::default_n_channels(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct ClusterConfig {
    /// Hard cap on points handed to one mixture fit.
    #[serde(default = "ClusterConfig::default_max_fit_spikes")]
    pub max_fit_spikes: usize,
    /// Hard cap on spikes clustered per channel.
    #[serde(default = "ClusterConfig::default_max_total_spikes")]
    pub max_total_spikes: usize,
    /// Floor on unit firing rate; sets the minimum-spike floor together
    /// with the recording duration.
    #[serde(default = "ClusterConfig::default_min_firing_rate_hz")]
    pub min_firing_rate_hz: f32,
    /// Upper bound on mixture components per fit.
    #[serde(default = "ClusterConfig::default_max_components")]
    pub max_components: usize,
    /// Re-cluster every local unit at full channel extent.
    #[serde(default = "ClusterConfig::default_full_run")]
    pub full_run: bool,
    #[serde(default = "ClusterConfig::default_seed")]
    pub seed: u64,
}

impl ClusterConfig {
    fn default_max_fit_spikes() -> usize {
        10_000
    }
    fn default_max_total_spikes() -> usize {
        50_000
    }
    fn default_min_firing_rate_hz() -> f32 {
        0.1
    }
    fn default_max_components() -> usize {
        8
    }
    fn default_full_run() -> bool {
        false
    }
    fn default_seed() -> u64 {
        0
    }
}

impl Default for ClusterConfig {
    fn default() -> Self {
        Self {
            max_fit_spikes: Self::default_max_fit_spikes(),
            max_total_spikes: Self::default_max_total_spikes(),
            min_firing_rate_hz: Self::default_min_firing_rate_hz(),
            max_components: Self::default_max_components(),
            full_run: Self::default_full_run(),
            seed: Self::default_seed(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct RunConfig {
    #[serde(default = "RunConfig::default_workers")]
    pub workers: usize,
}

impl RunConfig {
    fn default_workers() -> usize {
        4
    }
}

impl Default for RunConfig {
    fn default() -> Self {
        Self {
            workers: Self::default_workers(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize, Default)]
pub struct AppConfig {
    #[serde(default)]
    pub recording: RecordingConfig,
    #[serde(default)]
    pub cluster: ClusterConfig,
    #[serde(default)]
    pub run: RunConfig,
}

impl AppConfig {
    /// Read the config at `path`, or write a commented default file there
    /// and return the defaults.
    pub fn load_or_default(path: &str) -> Self {
        let path_obj = Path::new(path);
        if path_obj.exists() {
            match fs::read_to_string(path_obj) {
                Ok(contents) => match toml::from_str(&contents) {
                    Ok(cfg) => return cfg,
                    Err(err) => {
                        eprintln!("Failed to parse config {path}: {err}. Using defaults.");
                    }
                },
                Err(err) => {
                    eprintln!("Failed to read config {path}: {err}. Using defaults.");
                }
            }
            return Self::default();
        }

        // File does not exist: write commented defaults and return them.
        let default_cfg = Self::default();
        match toml::to_string_pretty(&default_cfg) {
            Ok(text) => {
                let mut commented = String::new();
                for line in text.lines() {
                    let trimmed = line.trim();
                    if trimmed.is_empty() || (trimmed.starts_with('[') && trimmed.ends_with(']')) {
                        commented.push_str(line);
                    } else {
                        commented.push_str("# ");
                        commented.push_str(line);
                    }
                    commented.push('\n');
                }
                if let Err(err) = fs::write(path_obj, commented) {
                    eprintln!("Failed to write default config to {path}: {err}");
                }
            }
            Err(err) => {
                eprintln!("Failed to serialize default config: {err}");
            }
        }
        default_cfg
    }
}
