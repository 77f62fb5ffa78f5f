mod common;

use common::{base_config, coverage, synth_recording, write_input, Population};
use spiketree::io::archive::ChannelOutput;
use spiketree::io::probe::Adjacency;
use spiketree::io::template_space::TemplateSpace;
use spiketree::sort::worker::{process_channel, ChannelJob, SortResources};

#[test]
fn two_populations_split_into_two_units() {
    // Interleaved trains, both peaking on channel 0 at very different
    // amplitudes.
    let times_a: Vec<i64> = (0..300).map(|i| 300 + i * 400).collect();
    let times_b: Vec<i64> = (0..300).map(|i| 500 + i * 400).collect();
    let rec = synth_recording(
        121_000,
        1,
        &[
            Population {
                times: times_a.clone(),
                deposits: vec![(0, 80.0)],
            },
            Population {
                times: times_b.clone(),
                deposits: vec![(0, 30.0)],
            },
        ],
        12,
    );

    let cfg = base_config(1);
    let space = TemplateSpace::cosine(5, 61);
    let adjacency = Adjacency::all_to_all(1);
    let dir = tempfile::tempdir().unwrap();
    let mut all_times = [times_a.clone(), times_b.clone()].concat();
    all_times.sort_unstable();
    let input_path = write_input(dir.path(), 0, &all_times);
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
    process_channel(&res, &job).unwrap();

    let out = ChannelOutput::load(&output_path).unwrap();
    assert_eq!(out.n_units(), 2, "two populations must split");

    // Each unit maps cleanly onto exactly one planted train.
    let mut matched_a = false;
    let mut matched_b = false;
    for train in &out.spike_trains {
        assert!(train.len() >= 250, "unit too small: {}", train.len());
        let cov_a = coverage(train, &times_a, 8.0);
        let cov_b = coverage(train, &times_b, 8.0);
        if cov_a > 0.9 {
            matched_a = true;
            assert!(cov_b < 0.1, "unit mixes populations");
        } else if cov_b > 0.9 {
            matched_b = true;
            assert!(cov_a < 0.1, "unit mixes populations");
        } else {
            panic!("unit matches neither population: {cov_a} / {cov_b}");
        }
    }
    assert!(matched_a && matched_b);

    // Splitting means the surviving units sit one generation down.
    for lineage in &out.lineages {
        assert_eq!(lineage[0], 1, "split units should be generation 1");
    }
}
