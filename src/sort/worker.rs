//! sort/worker.rs — channel job loop. Each worker drains a shared job
//! channel; one job is one input archive. A channel whose output archive
//! already exists is skipped, so interrupted runs resume for free.

use crate::config::AppConfig;
use crate::core::coreset::channel_rng;
use crate::core::mixture::EmSolver;
use crate::error::SortError;
use crate::io::archive::{ChannelInput, ChannelOutput};
use crate::io::probe::Adjacency;
use crate::io::reader::{TemplateBank, WaveformSource};
use crate::io::template_space::TemplateSpace;
use crate::sort::context::ChannelContext;
use crate::sort::recursion::ChannelSorter;
use crossbeam_channel::Receiver;
use std::path::PathBuf;
use tracing::{error, info};

/// One unit of work: cluster the spikes of one input archive.
#[derive(Clone, Debug)]
pub struct ChannelJob {
    pub channel_id: usize,
    pub input_path: PathBuf,
    pub output_path: PathBuf,
}

/// Everything a worker shares read-only across jobs.
pub struct SortResources<'a> {
    pub cfg: &'a AppConfig,
    pub raw: &'a dyn WaveformSource,
    pub residual: Option<&'a dyn WaveformSource>,
    pub bank: Option<&'a TemplateBank>,
    pub space: &'a TemplateSpace,
    pub adjacency: &'a Adjacency,
}

/// Process one job. Returns false when the output already existed and the
/// job was skipped.
pub fn process_channel(res: &SortResources, job: &ChannelJob) -> Result<bool, SortError> {
    if ChannelOutput::exists(&job.output_path) {
        info!(channel = job.channel_id, "output archive present, skipping");
        return Ok(false);
    }

    let input = ChannelInput::load(&job.input_path)?;
    let rng = channel_rng(res.cfg.cluster.seed, job.channel_id);

    let ctx = ChannelContext::new(
        res.cfg,
        res.raw,
        res.residual,
        res.bank,
        res.space,
        res.adjacency,
        input,
        rng,
    )?;
    let output = match ctx {
        None => {
            info!(channel = job.channel_id, "no usable spikes");
            ChannelOutput {
                channel: job.channel_id,
                ..Default::default()
            }
        }
        Some(ctx) => {
            let solver = EmSolver::with_max_components(res.cfg.cluster.max_components);
            ChannelSorter::new(ctx, &solver).run()?
        }
    };

    info!(
        channel = job.channel_id,
        units = output.n_units(),
        "channel clustered"
    );
    output.save(&job.output_path)?;
    Ok(true)
}

/// Worker loop: drain jobs until the channel closes. Failures are logged and
/// do not stop the remaining jobs.
pub fn run(res: &SortResources, jobs: &Receiver<ChannelJob>) {
    while let Ok(job) = jobs.recv() {
        if let Err(err) = process_channel(res, &job) {
            error!(channel = job.channel_id, "channel failed: {err}");
        }
    }
}
