//! io/probe.rs — boolean channel-adjacency matrix for the sensor array.

use crate::error::SortError;
use serde::{Deserialize, Serialize};
use std::path::Path;

/// Symmetric adjacency over channels; every channel is its own neighbor.
#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct Adjacency {
    pub matrix: Vec<Vec<bool>>,
}

impl Adjacency {
    pub fn n_channels(&self) -> usize {
        self.matrix.len()
    }

    pub fn is_neighbor(&self, a: usize, b: usize) -> bool {
        self.matrix[a][b]
    }

    pub fn neighbors(&self, c: usize) -> Vec<usize> {
        self.matrix[c]
            .iter()
            .enumerate()
            .filter(|(_, &adj)| adj)
            .map(|(i, _)| i)
            .collect()
    }

    /// Every channel adjacent to every other (single-shank test setups).
    pub fn all_to_all(n: usize) -> Self {
        Self {
            matrix: vec![vec![true; n]; n],
        }
    }

    /// Adjacency from 2-d contact positions and a neighbor radius.
    pub fn from_positions(positions: &[(f32, f32)], radius: f32) -> Self {
        let n = positions.len();
        let r2 = radius * radius;
        let matrix = (0..n)
            .map(|a| {
                (0..n)
                    .map(|b| {
                        let dx = positions[a].0 - positions[b].0;
                        let dy = positions[a].1 - positions[b].1;
                        dx * dx + dy * dy <= r2
                    })
                    .collect()
            })
            .collect();
        Self { matrix }
    }

    pub fn load(path: &Path) -> Result<Self, SortError> {
        let text = std::fs::read_to_string(path)?;
        Ok(serde_json::from_str(&text)?)
    }

    pub fn save(&self, path: &Path) -> Result<(), SortError> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }
}
