// Entry point: loads the shared recording assets, scans the input archives
// and fans channel jobs out to a small worker pool.

use clap::Parser;
use crossbeam_channel::unbounded;
use spiketree::config::AppConfig;
use spiketree::core::pca::MAX_RANK;
use spiketree::error::SortError;
use spiketree::io::probe::Adjacency;
use spiketree::io::reader::{RawRecording, TemplateBank, WaveformSource};
use spiketree::io::template_space::TemplateSpace;
use spiketree::sort::worker::{self, ChannelJob, SortResources};
use std::path::{Path, PathBuf};
use tracing::info;

#[derive(Parser, Debug)]
#[command(
    name = "spiketree",
    about = "Recursive divisive clustering of extracellular spike waveforms"
)]
struct Args {
    /// Config file; written with commented defaults when missing.
    #[arg(long, default_value = "spiketree.toml")]
    config: String,
    /// Raw recording: flat little-endian f32, time-major.
    #[arg(long)]
    data: PathBuf,
    /// Residual recording for residual-mode runs.
    #[arg(long)]
    residual: Option<PathBuf>,
    /// Unit template bank (JSON); required for residual-mode clustering.
    #[arg(long)]
    templates: Option<PathBuf>,
    /// Directory of channel_<id>.json input archives.
    #[arg(long)]
    inputs: PathBuf,
    /// Output directory for channel archives.
    #[arg(long)]
    out: PathBuf,
    /// Channel adjacency (JSON); all-to-all when omitted.
    #[arg(long)]
    adjacency: Option<PathBuf>,
    /// Template-space assets (JSON); a synthetic cosine basis when omitted.
    #[arg(long)]
    space: Option<PathBuf>,
}

fn main() -> Result<(), SortError> {
    tracing_subscriber::fmt()
        .with_env_filter(tracing_subscriber::EnvFilter::from_default_env())
        .init();

    let args = Args::parse();
    let cfg = AppConfig::load_or_default(&args.config);

    let raw = RawRecording::from_file(&args.data, cfg.recording.n_channels)?;
    let residual = match &args.residual {
        Some(p) => Some(RawRecording::from_file(p, cfg.recording.n_channels)?),
        None => None,
    };
    let bank: Option<TemplateBank> = match &args.templates {
        Some(p) => {
            let text = std::fs::read_to_string(p)?;
            Some(serde_json::from_str(&text)?)
        }
        None => None,
    };
    let adjacency = match &args.adjacency {
        Some(p) => Adjacency::load(p)?,
        None => Adjacency::all_to_all(cfg.recording.n_channels),
    };
    let space = match &args.space {
        Some(p) => TemplateSpace::load(p)?,
        None => TemplateSpace::cosine(MAX_RANK, cfg.recording.spike_size),
    };

    std::fs::create_dir_all(&args.out)?;
    let jobs = scan_jobs(&args.inputs, &args.out)?;
    info!(jobs = jobs.len(), workers = cfg.run.workers, "starting run");

    let (tx, rx) = unbounded();
    for job in jobs {
        let _ = tx.send(job);
    }
    drop(tx);

    let res = SortResources {
        cfg: &cfg,
        raw: &raw,
        residual: residual.as_ref().map(|r| r as &dyn WaveformSource),
        bank: bank.as_ref(),
        space: &space,
        adjacency: &adjacency,
    };
    std::thread::scope(|s| {
        for _ in 0..cfg.run.workers.max(1) {
            let rx = rx.clone();
            let res = &res;
            s.spawn(move || worker::run(res, &rx));
        }
    });

    info!("run finished");
    Ok(())
}

/// Collect channel_<id>.json inputs, in channel order.
fn scan_jobs(inputs: &Path, out: &Path) -> Result<Vec<ChannelJob>, SortError> {
    let mut jobs = Vec::new();
    for entry in std::fs::read_dir(inputs)? {
        let path = entry?.path();
        if path.extension().and_then(|e| e.to_str()) != Some("json") {
            continue;
        }
        let Some(stem) = path.file_stem().and_then(|s| s.to_str()) else {
            continue;
        };
        let Some(id) = stem.strip_prefix("channel_") else {
            continue;
        };
        let Ok(channel_id) = id.parse::<usize>() else {
            continue;
        };
        jobs.push(ChannelJob {
            channel_id,
            input_path: path,
            output_path: out.join(format!("channel_{channel_id:03}.json")),
        });
    }
    jobs.sort_by_key(|j| j.channel_id);
    Ok(jobs)
}
