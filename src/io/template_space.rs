//! io/template_space.rs — fixed template-space assets, loaded once per
//! worker: orthogonal projection bases for the clustering and
//! non-clustering channel roles, matching noise-scale vectors, and the
//! reference template used for alignment.

use crate::error::SortError;
use serde::{Deserialize, Serialize};
use std::path::Path;

#[derive(Clone, Debug, Serialize, Deserialize)]
pub struct TemplateSpace {
    /// rank x spike_size basis for the clustering channel.
    pub main_components: Vec<Vec<f32>>,
    /// rank x spike_size basis for the remaining loaded channels.
    pub sec_components: Vec<Vec<f32>>,
    pub main_noise_std: Vec<f32>,
    pub sec_noise_std: Vec<f32>,
    /// Alignment reference, spike_size samples.
    pub ref_template: Vec<f32>,
}

impl TemplateSpace {
    pub fn rank(&self) -> usize {
        self.main_components.len()
    }

    pub fn spike_size(&self) -> usize {
        self.ref_template.len()
    }

    pub fn load(path: &Path) -> Result<Self, SortError> {
        let text = std::fs::read_to_string(path)?;
        let mut space: TemplateSpace = serde_json::from_str(&text)?;
        space.window_edges();
        Ok(space)
    }

    pub fn save(&self, path: &Path) -> Result<(), SortError> {
        std::fs::write(path, serde_json::to_string(self)?)?;
        Ok(())
    }

    /// Zero the basis outside the central window so edge samples (mostly
    /// collision residue) cannot drive the projection. The window scales
    /// with the spike size from its reference 61-sample layout.
    pub fn window_edges(&mut self) {
        let spike_size = self.main_components.first().map(|c| c.len()).unwrap_or(0);
        if spike_size == 0 {
            return;
        }
        let w0 = 15 * spike_size / 61;
        let w1 = 40 * spike_size / 61;
        for comp in self
            .main_components
            .iter_mut()
            .chain(self.sec_components.iter_mut())
        {
            for (t, v) in comp.iter_mut().enumerate() {
                if t < w0 || t >= w1 {
                    *v = 0.0;
                }
            }
        }
    }

    /// Synthetic cosine basis with unit noise scales and a standard negative
    /// spike as the alignment reference. Used by tests and synthetic runs.
    pub fn cosine(rank: usize, spike_size: usize) -> Self {
        let basis = |r: usize| -> Vec<f32> {
            let norm = if r == 0 {
                (1.0 / spike_size as f32).sqrt()
            } else {
                (2.0 / spike_size as f32).sqrt()
            };
            (0..spike_size)
                .map(|t| {
                    norm * (std::f32::consts::PI * r as f32 * (t as f32 + 0.5)
                        / spike_size as f32)
                        .cos()
                })
                .collect()
        };
        let components: Vec<Vec<f32>> = (0..rank).map(basis).collect();

        let center = spike_size as f32 / 2.0;
        let width = spike_size as f32 / 12.0;
        let ref_template = (0..spike_size)
            .map(|t| {
                let d = (t as f32 - center) / width;
                -(-0.5 * d * d).exp()
            })
            .collect();

        let mut space = Self {
            main_components: components.clone(),
            sec_components: components,
            main_noise_std: vec![1.0; rank],
            sec_noise_std: vec![1.0; rank],
            ref_template,
        };
        space.window_edges();
        space
    }
}
