mod common;

use common::{base_config, synth_recording, write_input, Population};
use spiketree::io::archive::ChannelOutput;
use spiketree::io::probe::Adjacency;
use spiketree::io::template_space::TemplateSpace;
use spiketree::sort::worker::{process_channel, ChannelJob, SortResources};

#[test]
fn sparse_channel_yields_no_units() {
    // Three spikes over ten seconds against a 1 Hz firing-rate floor: the
    // whole channel falls below the spike floor and must finish cleanly
    // with an empty archive.
    let times = vec![1_000i64, 150_000, 299_000];
    let rec = synth_recording(
        300_000,
        1,
        &[Population {
            times: times.clone(),
            deposits: vec![(0, 50.0)],
        }],
        13,
    );

    let mut cfg = base_config(1);
    cfg.cluster.min_firing_rate_hz = 1.0;
    let space = TemplateSpace::cosine(5, 61);
    let adjacency = Adjacency::all_to_all(1);
    let dir = tempfile::tempdir().unwrap();
    let input_path = write_input(dir.path(), 0, &times);
    let output_path = dir.path().join("out_000.json");

    let res = SortResources {
        cfg: &cfg,
        raw: &rec,
        residual: None,
        bank: None,
        space: &space,
        adjacency: &adjacency,
    };
    let job = ChannelJob {
        channel_id: 0,
        input_path,
        output_path: output_path.clone(),
    };
    let ran = process_channel(&res, &job).unwrap();
    assert!(ran, "the job itself must run and archive");

    let out = ChannelOutput::load(&output_path).unwrap();
    assert_eq!(out.n_units(), 0);
    assert_eq!(out.spike_times_original, times);
}

#[test]
fn empty_input_archives_cleanly() {
    let rec = synth_recording(10_000, 1, &[], 14);
    let cfg = base_config(1);
    let space = TemplateSpace::cosine(5, 61);
    let adjacency = Adjacency::all_to_all(1);
    let dir = tempfile::tempdir().unwrap();
    let input_path = write_input(dir.path(), 3, &[]);
    let output_path = dir.path().join("out_003.json");

    let res = SortResources {
        cfg: &cfg,
        raw: &rec,
        residual: None,
        bank: None,
        space: &space,
        adjacency: &adjacency,
    };
    let job = ChannelJob {
        channel_id: 3,
        input_path,
        output_path: output_path.clone(),
    };
    process_channel(&res, &job).unwrap();
    let out = ChannelOutput::load(&output_path).unwrap();
    assert_eq!(out.n_units(), 0);
    assert_eq!(out.channel, 3);
}
