//! io/archive.rs — per-channel input and output artifacts.
//!
//! The output archive's existence is the restart signal: a channel whose
//! archive is already on disk is skipped entirely, which makes reruns free.

use crate::error::SortError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Input artifact: the channel's spike times, plus per-spike upsampled
/// template ids in residual mode.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct ChannelInput {
    pub spike_times: Vec<i64>,
    #[serde(default)]
    pub upsampled_ids: Option<Vec<u32>>,
}

impl ChannelInput {
    pub fn load(path: &Path) -> Result<Self, SortError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SortError> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

/// Audit record for one recursion branch: lineage, coarse labels and the
/// feature snapshot after triage and recovery. Written for every branch
/// that reached the partition decision, whether or not it survived.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct BranchRecord {
    pub generation: u32,
    pub branch: u32,
    pub history: Vec<u32>,
    /// Coarse partition label per recovered point.
    pub labels: Vec<u32>,
    /// Low-rank features of the recovered points.
    pub features: Vec<Vec<f32>>,
    /// Spike indices (channel-scoped) of the recovered points.
    pub indices: Vec<usize>,
}

impl BranchRecord {
    /// Lineage path in [generation, history.., branch] layout.
    pub fn lineage(&self) -> Vec<u32> {
        let mut lin = Vec::with_capacity(self.history.len() + 2);
        lin.push(self.generation);
        lin.extend_from_slice(&self.history);
        lin.push(self.branch);
        lin
    }
}

/// Output artifact for one channel.
#[derive(Clone, Debug, Default, Serialize, Deserialize)]
pub struct ChannelOutput {
    pub channel: usize,
    /// Alignment-shift-corrected spike times per discovered unit.
    pub spike_trains: Vec<Vec<f32>>,
    /// time x channel median templates per unit.
    pub templates: Vec<Vec<Vec<f32>>>,
    /// Per-unit lineage in [generation, history.., branch] layout.
    pub lineages: Vec<Vec<u32>>,
    /// Per-unit indices relative to the local stage's spike list.
    pub clustered_indices_local: Vec<Vec<usize>>,
    /// Same bookkeeping after the distant stage (full runs only).
    pub clustered_indices_distant: Vec<Vec<usize>>,
    /// One audit record per clustered branch across both stages.
    pub branch_records: Vec<BranchRecord>,
    /// Generation-0 features and surviving indices, kept for audit.
    pub gen0_features: Vec<Vec<f32>>,
    pub gen0_indices: Vec<usize>,
    /// Spike times after capping and edge cleanup.
    pub spike_times_original: Vec<i64>,
}

impl ChannelOutput {
    pub fn n_units(&self) -> usize {
        self.spike_trains.len()
    }

    pub fn exists(path: &Path) -> bool {
        path.exists()
    }

    pub fn load(path: &Path) -> Result<Self, SortError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SortError> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn lineage_layout_is_gen_history_branch() {
        let rec = BranchRecord {
            generation: 3,
            branch: 1,
            history: vec![0, 2],
            labels: vec![],
            features: vec![],
            indices: vec![],
        };
        assert_eq!(rec.lineage(), vec![3, 0, 2, 1]);
    }

    #[test]
    fn output_round_trips() {
        let out = ChannelOutput {
            channel: 4,
            spike_trains: vec![vec![100.5, 200.0]],
            templates: vec![vec![vec![0.0, -1.0]]],
            lineages: vec![vec![0, 0]],
            clustered_indices_local: vec![vec![0, 1]],
            ..Default::default()
        };
        let dir = std::env::temp_dir().join(format!(
            "spiketree_archive_{}",
            std::time::SystemTime::now()
                .duration_since(std::time::UNIX_EPOCH)
                .unwrap()
                .as_nanos()
        ));
        let path = dir.join("channel_004.json");
        assert!(!ChannelOutput::exists(&path));
        out.save(&path).unwrap();
        assert!(ChannelOutput::exists(&path));
        let loaded = ChannelOutput::load(&path).unwrap();
        assert_eq!(loaded.channel, 4);
        assert_eq!(loaded.n_units(), 1);
        assert_eq!(loaded.spike_trains[0], vec![100.5, 200.0]);
        let _ = std::fs::remove_dir_all(&dir);
    }
}
