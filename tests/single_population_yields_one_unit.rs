mod common;

use common::{base_config, coverage, synth_recording, write_input, Population};
use spiketree::io::archive::ChannelOutput;
use spiketree::io::probe::Adjacency;
use spiketree::io::template_space::TemplateSpace;
use spiketree::sort::worker::{process_channel, ChannelJob, SortResources};

#[test]
fn single_population_yields_one_unit() {
    let times: Vec<i64> = (0..200).map(|i| 300 + i * 300).collect();
    let rec = synth_recording(
        61_000,
        2,
        &[Population {
            times: times.clone(),
            deposits: vec![(0, 60.0), (1, 15.0)],
        }],
        11,
    );

    let cfg = base_config(2);
    let space = TemplateSpace::cosine(5, 61);
    let adjacency = Adjacency::all_to_all(2);
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
    assert!(ran);

    let out = ChannelOutput::load(&output_path).unwrap();
    assert_eq!(out.channel, 0, "clustering channel should be the loud one");
    assert_eq!(out.n_units(), 1, "one population must give one unit");

    let train = &out.spike_trains[0];
    assert!(
        train.len() >= 180,
        "unit should cover most spikes, got {}",
        train.len()
    );
    assert!(coverage(train, &times, 8.0) > 0.95);

    // Audit trail: generation-0 snapshot and at least the root branch record.
    assert!(!out.gen0_features.is_empty());
    assert!(!out.gen0_indices.is_empty());
    assert!(!out.branch_records.is_empty());
    assert_eq!(out.branch_records[0].lineage(), vec![0, 0]);
    assert_eq!(out.lineages[0], vec![0, 0]);

    // Unit template should dip well below the noise floor on channel 0.
    let template = &out.templates[0];
    let min0 = template
        .iter()
        .map(|row| row[0])
        .fold(f32::INFINITY, f32::min);
    assert!(min0 < -30.0, "template minimum {min0}");
}
