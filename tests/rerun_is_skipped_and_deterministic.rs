mod common;

use common::{base_config, synth_recording, write_input, Population};
use spiketree::io::archive::ChannelOutput;
use spiketree::io::probe::Adjacency;
use spiketree::io::template_space::TemplateSpace;
use spiketree::sort::worker::{process_channel, ChannelJob, SortResources};

#[test]
fn rerun_is_skipped_and_deterministic() {
    let times: Vec<i64> = (0..120).map(|i| 300 + i * 400).collect();
    let rec = synth_recording(
        50_000,
        2,
        &[Population {
            times: times.clone(),
            deposits: vec![(0, 50.0), (1, 20.0)],
        }],
        18,
    );

    let cfg = base_config(2);
    let space = TemplateSpace::cosine(5, 61);
    let adjacency = Adjacency::all_to_all(2);
    let dir = tempfile::tempdir().unwrap();
    let input_path = write_input(dir.path(), 5, &times);
    let output_path = dir.path().join("out_005.json");

    let res = SortResources {
        cfg: &cfg,
        raw: &rec,
        residual: None,
        bank: None,
        space: &space,
        adjacency: &adjacency,
    };
    let job = ChannelJob {
        channel_id: 5,
        input_path,
        output_path: output_path.clone(),
    };

    assert!(process_channel(&res, &job).unwrap(), "first run does work");
    let first = ChannelOutput::load(&output_path).unwrap();

    // An existing archive short-circuits the job.
    assert!(!process_channel(&res, &job).unwrap(), "rerun must skip");

    // Removing the archive and rerunning reproduces it exactly: all
    // randomness is keyed off (seed, channel id).
    std::fs::remove_file(&output_path).unwrap();
    assert!(process_channel(&res, &job).unwrap());
    let second = ChannelOutput::load(&output_path).unwrap();

    assert_eq!(first.n_units(), second.n_units());
    assert_eq!(first.spike_trains, second.spike_trains);
    assert_eq!(first.lineages, second.lineages);
    assert_eq!(first.gen0_indices, second.gen0_indices);
    assert_eq!(first.clustered_indices_local, second.clustered_indices_local);
}

#[test]
fn different_seed_keeps_unit_structure() {
    // Different seed, same well-separated data: unit structure must be
    // stable even though subsampling differs.
    let times: Vec<i64> = (0..120).map(|i| 300 + i * 400).collect();
    let rec = synth_recording(
        50_000,
        1,
        &[Population {
            times: times.clone(),
            deposits: vec![(0, 50.0)],
        }],
        19,
    );

    let space = TemplateSpace::cosine(5, 61);
    let adjacency = Adjacency::all_to_all(1);
    let dir = tempfile::tempdir().unwrap();
    let input_path = write_input(dir.path(), 0, &times);

    let mut unit_counts = Vec::new();
    for seed in [0u64, 42] {
        let mut cfg = base_config(1);
        cfg.cluster.seed = seed;
        let res = SortResources {
            cfg: &cfg,
            raw: &rec,
            residual: None,
            bank: None,
            space: &space,
            adjacency: &adjacency,
        };
        let output_path = dir.path().join(format!("out_seed_{seed}.json"));
        let job = ChannelJob {
            channel_id: 0,
            input_path: input_path.clone(),
            output_path: output_path.clone(),
        };
        process_channel(&res, &job).unwrap();
        unit_counts.push(ChannelOutput::load(&output_path).unwrap().n_units());
    }
    assert_eq!(unit_counts, vec![1, 1]);
}
