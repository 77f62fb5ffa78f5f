mod common;

use common::{base_config, coverage, synth_recording, write_input, Population};
use spiketree::io::archive::ChannelOutput;
use spiketree::io::probe::Adjacency;
use spiketree::io::template_space::TemplateSpace;
use spiketree::sort::worker::{process_channel, ChannelJob, SortResources};

#[test]
fn distant_peak_unit_is_gated_out() {
    // Channel layout: 0 and 1 are neighbors, 2 is isolated. Population A
    // belongs to channel 0. Population B peaks on channel 2 but bleeds onto
    // channel 1, so it passes the local neighborhood gate and must only be
    // rejected by the final full-extent template check.
    let adjacency =
        Adjacency::from_positions(&[(0.0, 0.0), (0.0, 15.0), (0.0, 60.0)], 20.0);
    assert_eq!(adjacency.neighbors(0), vec![0, 1]);
    assert_eq!(adjacency.neighbors(2), vec![2]);

    let times_a: Vec<i64> = (0..150).map(|i| 300 + i * 400).collect();
    let times_b: Vec<i64> = (0..150).map(|i| 500 + i * 400).collect();
    let rec = synth_recording(
        62_000,
        3,
        &[
            Population {
                times: times_a.clone(),
                deposits: vec![(0, 80.0), (1, 20.0)],
            },
            Population {
                times: times_b.clone(),
                deposits: vec![(1, 25.0), (2, 60.0)],
            },
        ],
        17,
    );

    let cfg = base_config(3);
    let space = TemplateSpace::cosine(5, 61);
    let dir = tempfile::tempdir().unwrap();
    let mut all_times = [times_a.clone(), times_b].concat();
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
    assert_eq!(out.channel, 0);

    // Both populations cluster locally, only population A survives the
    // full-extent gate.
    assert!(
        out.clustered_indices_local.len() >= 2,
        "both populations should form local units, got {}",
        out.clustered_indices_local.len()
    );
    assert_eq!(out.n_units(), 1, "the distant-peak unit must be dropped");
    assert!(coverage(&out.spike_trains[0], &times_a, 8.0) > 0.9);
}
