//! sort/assemble.rs — collects units emitted by the recursion and applies
//! the final full-extent template gate before building the channel archive.

use crate::io::archive::{BranchRecord, ChannelOutput};
use crate::io::reader::peak_channel;
use crate::sort::context::{ChannelContext, Mode};
use tracing::debug;

/// Unit accepted by the local stage. `rows` index the local stage's spike
/// list, `indices` the channel's cleaned spike list.
pub struct LocalUnit {
    pub indices: Vec<usize>,
    pub rows: Vec<usize>,
    pub template: Vec<Vec<f32>>,
    pub lineage: Vec<u32>,
}

/// Unit accepted by the distant re-clustering of one local unit. `rows` are
/// the parent unit's local rows surviving the distant pass; the template is
/// at full channel extent.
pub struct DistantUnit {
    pub indices: Vec<usize>,
    pub rows: Vec<usize>,
    pub template: Vec<Vec<f32>>,
    pub lineage: Vec<u32>,
}

#[derive(Default)]
pub struct Assembler {
    pub local_units: Vec<LocalUnit>,
    pub distant_units: Vec<DistantUnit>,
    pub branch_records: Vec<BranchRecord>,
    pub gen0_features: Vec<Vec<f32>>,
    pub gen0_indices: Vec<usize>,
}

impl Assembler {
    /// Apply the final gate and build the archive. Without a full run, each
    /// local unit must place its full-extent template peak inside the
    /// clustering channel's neighborhood. With a full run the distant stage
    /// already clustered at full extent; only residual mode re-checks
    /// against a fresh raw-data template.
    pub fn finalize(self, ctx: &ChannelContext, full_run: bool) -> ChannelOutput {
        let mut out = ChannelOutput {
            channel: ctx.channel,
            branch_records: self.branch_records,
            gen0_features: self.gen0_features,
            gen0_indices: self.gen0_indices,
            spike_times_original: ctx.spike_times.clone(),
            ..Default::default()
        };
        out.clustered_indices_local = self.local_units.iter().map(|u| u.rows.clone()).collect();

        if !full_run {
            for unit in self.local_units {
                let template = ctx.all_channel_template(&unit.indices);
                let mc = peak_channel(&template);
                if !ctx.neighbor_chans.contains(&mc) {
                    debug!(
                        peak = mc,
                        channel = ctx.channel,
                        "unit peaks outside the neighborhood, dropped"
                    );
                    continue;
                }
                push_unit(&mut out, ctx, &unit.indices, template, unit.lineage);
            }
            return out;
        }

        for unit in self.distant_units {
            let template = if ctx.mode() == Mode::Residual {
                let template = ctx.all_channel_template(&unit.indices);
                let mc = peak_channel(&template);
                if !ctx.neighbor_chans.contains(&mc) {
                    debug!(peak = mc, "distant unit failed the raw template gate");
                    continue;
                }
                template
            } else {
                unit.template
            };
            push_unit(&mut out, ctx, &unit.indices, template, unit.lineage);
            out.clustered_indices_distant.push(unit.rows);
        }
        out
    }
}

fn push_unit(
    out: &mut ChannelOutput,
    ctx: &ChannelContext,
    indices: &[usize],
    template: Vec<Vec<f32>>,
    lineage: Vec<u32>,
) {
    let train: Vec<f32> = indices
        .iter()
        .map(|&i| ctx.spike_times[i] as f32 + ctx.shifts[i])
        .collect();
    out.spike_trains.push(train);
    out.templates.push(template);
    out.lineages.push(lineage);
}
