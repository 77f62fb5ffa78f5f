//! sort/recursion.rs — the divisive clustering loop for one channel.
//!
//! Each branch runs the same pipeline: featurize, triage, subsample, fit,
//! recover, then merge to a stable partitioning. One surviving partition
//! emits a unit; several spawn child branches. The recursion is an explicit
//! work stack, so lineage bookkeeping travels with each task instead of
//! living in call frames.

use crate::core::coreset;
use crate::core::mixture::MixtureSolver;
use crate::core::pca::{featurize, MAX_RANK};
use crate::core::stability::merge;
use crate::core::triage::knn_triage;
use crate::error::SortError;
use crate::io::archive::{BranchRecord, ChannelOutput};
use crate::io::reader::peak_channel;
use crate::sort::assemble::{Assembler, DistantUnit, LocalUnit};
use crate::sort::context::{ChannelContext, Mode};
use crate::sort::recover::recover_spikes;
use tracing::{debug, info};

/// One pending branch. `rows` index the current stage's spike list.
struct BranchTask {
    rows: Vec<usize>,
    generation: u32,
    branch: u32,
    history: Vec<u32>,
}

impl BranchTask {
    fn lineage(&self) -> Vec<u32> {
        let mut lin = Vec::with_capacity(self.history.len() + 2);
        lin.push(self.generation);
        lin.extend_from_slice(&self.history);
        lin.push(self.branch);
        lin
    }
}

pub struct ChannelSorter<'a> {
    ctx: ChannelContext<'a>,
    solver: &'a dyn MixtureSolver,
    assembler: Assembler,
}

impl<'a> ChannelSorter<'a> {
    pub fn new(ctx: ChannelContext<'a>, solver: &'a dyn MixtureSolver) -> Self {
        Self {
            ctx,
            solver,
            assembler: Assembler::default(),
        }
    }

    /// Run the local stage, then (on full runs) re-cluster every local unit
    /// at full channel extent, and assemble the archive.
    pub fn run(mut self) -> Result<ChannelOutput, SortError> {
        let full_run = self.ctx.cfg.cluster.full_run;

        let all: Vec<usize> = (0..self.ctx.n_spikes()).collect();
        self.ctx.prepare_stage(all, true);
        let rows: Vec<usize> = (0..self.ctx.indices_in.len()).collect();
        self.cluster_stage(
            None,
            BranchTask {
                rows,
                generation: 0,
                branch: 0,
                history: Vec::new(),
            },
        )?;
        info!(
            channel = self.ctx.channel,
            units = self.assembler.local_units.len(),
            "local stage finished"
        );

        if full_run {
            for ii in 0..self.assembler.local_units.len() {
                let (indices, lineage, parent_rows) = {
                    let unit = &self.assembler.local_units[ii];
                    (unit.indices.clone(), unit.lineage.clone(), unit.rows.clone())
                };
                self.ctx.prepare_stage(indices, false);
                let rows: Vec<usize> = (0..self.ctx.indices_in.len()).collect();
                let generation = lineage[0] + 1;
                let branch = *lineage.last().unwrap_or(&0);
                let history = lineage[1..lineage.len().saturating_sub(1)].to_vec();
                self.cluster_stage(
                    Some(&parent_rows),
                    BranchTask {
                        rows,
                        generation,
                        branch,
                        history,
                    },
                )?;
            }
            info!(
                channel = self.ctx.channel,
                units = self.assembler.distant_units.len(),
                "distant stage finished"
            );
        }

        Ok(self.assembler.finalize(&self.ctx, full_run))
    }

    /// Drain one stage's branch stack. `parent_rows` is `None` during the
    /// local stage; the distant stage passes the parent unit's local rows.
    /// Children are pushed in reverse partition order so they pop
    /// lowest-label first.
    fn cluster_stage(
        &mut self,
        parent_rows: Option<&[usize]>,
        root: BranchTask,
    ) -> Result<(), SortError> {
        let local = parent_rows.is_none();
        let min_spikes = self.ctx.min_spikes;
        let mut stack = vec![root];

        while let Some(task) = stack.pop() {
            if task.rows.len() < min_spikes {
                debug!(
                    generation = task.generation,
                    branch = task.branch,
                    spikes = task.rows.len(),
                    "branch below the spike floor, dropped"
                );
                continue;
            }

            let feats = featurize(&self.ctx.denoised, &task.rows, &task.rows, MAX_RANK);
            if local && task.generation == 0 {
                self.assembler.gen0_features = feats.clone();
            }

            // Triage only thins the fit input; recovery below re-extends the
            // fit over every point in the branch, so triaged points can come
            // back.
            let fit_pool: Vec<Vec<f32>> = if self.ctx.mode() == Mode::Raw {
                knn_triage(&feats)
                    .into_iter()
                    .map(|i| feats[i].clone())
                    .collect()
            } else {
                feats.clone()
            };

            let picked = coreset::subsample(
                &fit_pool,
                self.ctx.cfg.cluster.max_fit_spikes,
                &mut self.ctx.rng,
            );
            let fit_feats: Vec<Vec<f32>> = picked.iter().map(|&i| fit_pool[i].clone()).collect();
            let groups: Vec<u32> = (0..fit_feats.len() as u32).collect();
            let fit = self.solver.fit(&fit_feats, &groups, &mut self.ctx.rng)?;
            debug!(
                generation = task.generation,
                branch = task.branch,
                spikes = task.rows.len(),
                fitted = fit_feats.len(),
                components = fit.n_components(),
                "branch fitted"
            );

            let (recovered, fit) = recover_spikes(self.solver, &fit, &feats);
            if recovered.len() < min_spikes {
                continue;
            }
            let mut rows: Vec<usize> = recovered.iter().map(|&i| task.rows[i]).collect();
            let mut feats: Vec<Vec<f32>> = recovered.iter().map(|&i| feats[i].clone()).collect();

            let (labels, n_partitions) = if fit.n_components() > 1 {
                let out = merge(&fit, min_spikes)?;
                rows = out.kept_rows.iter().map(|&r| rows[r]).collect();
                feats = out.kept_rows.iter().map(|&r| feats[r].clone()).collect();
                (out.assignments, out.n_partitions)
            } else {
                (vec![0u32; rows.len()], 1)
            };

            let indices: Vec<usize> = rows.iter().map(|&r| self.ctx.indices_in[r]).collect();
            self.assembler.branch_records.push(BranchRecord {
                generation: task.generation,
                branch: task.branch,
                history: task.history.clone(),
                labels: labels.clone(),
                features: feats,
                indices: indices.clone(),
            });
            if local && task.generation == 0 {
                self.assembler.gen0_indices = indices;
            }

            if n_partitions == 1 {
                self.emit(parent_rows, &rows, task.lineage());
            } else {
                for part in (0..n_partitions as u32).rev() {
                    let child_rows: Vec<usize> = rows
                        .iter()
                        .zip(labels.iter())
                        .filter(|(_, &l)| l == part)
                        .map(|(&r, _)| r)
                        .collect();
                    let mut history = task.history.clone();
                    history.push(task.branch);
                    stack.push(BranchTask {
                        rows: child_rows,
                        generation: task.generation + 1,
                        branch: part,
                        history,
                    });
                }
            }
        }
        Ok(())
    }

    /// Accept one partition as a unit if its template peaks inside the
    /// clustering channel's neighborhood; residual-mode templates carry no
    /// such guarantee and are gated later against raw data instead.
    fn emit(&mut self, parent_rows: Option<&[usize]>, rows: &[usize], lineage: Vec<u32>) {
        let template = self.ctx.wf.median_template(rows);
        let col = peak_channel(&template);
        let mc = self.ctx.loaded_channels[col];
        if self.ctx.mode() == Mode::Raw && !self.ctx.neighbor_chans.contains(&mc) {
            debug!(
                peak = mc,
                channel = self.ctx.channel,
                "partition peaks outside the neighborhood, dropped"
            );
            return;
        }

        let indices: Vec<usize> = rows.iter().map(|&r| self.ctx.indices_in[r]).collect();
        match parent_rows {
            None => {
                debug!(spikes = indices.len(), ?lineage, "local unit accepted");
                self.assembler.local_units.push(LocalUnit {
                    indices,
                    rows: rows.to_vec(),
                    template,
                    lineage,
                });
            }
            Some(parent) => {
                let mapped: Vec<usize> = rows.iter().map(|&r| parent[r]).collect();
                debug!(spikes = indices.len(), ?lineage, "distant unit accepted");
                self.assembler.distant_units.push(DistantUnit {
                    indices,
                    rows: mapped,
                    template,
                    lineage,
                });
            }
        }
    }
}
