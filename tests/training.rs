use std::fs;
use std::path::PathBuf;

use approx::assert_relative_eq;
use rand::{rngs::StdRng, SeedableRng};

use fastbelief::config::ExperimentConfig;
use fastbelief::data::{DataLoader, Dataset};
use fastbelief::metrics::{JsonLinesSink, MemorySink, Record};
use fastbelief::nn::{CrossEntropyLoss, LogisticRegression, Module};
use fastbelief::optim::{FastAdaBelief, FastAdaBeliefConfig};
use fastbelief::regret::{RegretTracker, REFERENCE_LOSS_KEY};
use fastbelief::training::{train_model, EPOCH_KEY, TEST_ACCURACY_KEY};
use fastbelief::utils::{self, serialization, Seeder};

fn scratch(name: &str) -> PathBuf {
    let dir = std::env::temp_dir().join(format!("fastbelief-it-{}", std::process::id()));
    fs::create_dir_all(&dir).unwrap();
    dir.join(name)
}

fn mk_model(seed: u64) -> LogisticRegression {
    LogisticRegression::new(3, 3, 1, &mut StdRng::seed_from_u64(seed))
}

fn mk_optimizer(model: &dyn Module) -> FastAdaBelief {
    FastAdaBelief::new(model.parameters().into_values(), FastAdaBeliefConfig::with_lr(0.05))
        .unwrap()
}

fn snapshot(model: &dyn Module) -> Vec<ndarray::ArrayD<f32>> {
    model.parameters().values().map(|p| p.data_clone()).collect()
}

#[test]
fn resumed_training_matches_uninterrupted_training() {
    let data = Dataset::synthetic(9, 3, 48, 0.5, &mut StdRng::seed_from_u64(2)).unwrap();
    let loader = DataLoader::new(&data, 8).unwrap();
    let loss_fn = CrossEntropyLoss::new();

    let mut model = mk_model(0);
    let mut optimizer = mk_optimizer(&model);
    let mut sink = MemorySink::new();
    train_model(&mut model, &loss_fn, &mut optimizer, &loader, None, 2, &mut sink).unwrap();

    let model_path = scratch("resume-model.bin");
    let optim_path = scratch("resume-optim.bin");
    utils::save(&model, &model_path, false).unwrap();
    serialization::save_optimizer(&optimizer, &optim_path).unwrap();

    train_model(&mut model, &loss_fn, &mut optimizer, &loader, None, 2, &mut sink).unwrap();

    // A differently seeded model picks up where the first left off.
    let mut resumed = mk_model(99);
    utils::load(&resumed, &model_path, true, false).unwrap();
    let mut resumed_optimizer = mk_optimizer(&resumed);
    serialization::load_optimizer(&mut resumed_optimizer, &optim_path).unwrap();
    train_model(&mut resumed, &loss_fn, &mut resumed_optimizer, &loader, None, 2, &mut sink)
        .unwrap();

    assert_eq!(snapshot(&model), snapshot(&resumed));
}

#[test]
fn trained_reference_beats_fresh_candidates_early_on() {
    let seeder = Seeder::new(4);
    let data = Dataset::synthetic(9, 3, 120, 0.3, &mut seeder.rng_for(0)).unwrap();
    let (train, test) = data.split(0.75);
    let loss_fn = CrossEntropyLoss::new();

    let mut reference = LogisticRegression::new(3, 3, 1, &mut seeder.rng());
    let mut optimizer = mk_optimizer(&reference);
    let train_loader = DataLoader::shuffled(&train, 10, &mut seeder.rng_for(1)).unwrap();
    let test_loader = DataLoader::new(&test, 10).unwrap();
    let mut sink = MemorySink::new();
    let history = train_model(
        &mut reference,
        &loss_fn,
        &mut optimizer,
        &train_loader,
        Some(&test_loader),
        20,
        &mut sink,
    )
    .unwrap();
    assert_eq!(history.last().and_then(|r| r.get(EPOCH_KEY)), Some(19.0));
    assert!(sink.series(TEST_ACCURACY_KEY)[19] >= 80.0);

    let mut tracker = RegretTracker::with_fast_adabelief(
        &[0.01, 0.001],
        &FastAdaBeliefConfig::default(),
        || Box::new(LogisticRegression::new(3, 3, 1, &mut seeder.rng())),
    )
    .unwrap();
    let mut regret_sink = MemorySink::new();
    let summaries = tracker
        .run(&mut reference, &train_loader, &loss_fn, &mut regret_sink)
        .unwrap();

    assert_eq!(regret_sink.records.len(), train_loader.num_batches());
    assert!(regret_sink.series(REFERENCE_LOSS_KEY).iter().all(|l| l.is_finite()));
    // An untrained model is worse than the trained one on the first batch.
    let first = &regret_sink.records[0];
    assert!(first.get("Regret_1e-3").unwrap_or(0.0) > 0.0);
    assert!(summaries.iter().all(|s| s.regret.is_finite()));
}

#[test]
fn metrics_file_holds_one_json_record_per_epoch() {
    let data = Dataset::synthetic(9, 3, 30, 0.5, &mut StdRng::seed_from_u64(8)).unwrap();
    let loader = DataLoader::new(&data, 10).unwrap();
    let mut model = mk_model(1);
    let mut optimizer = mk_optimizer(&model);

    let path = scratch("metrics.jsonl");
    let mut sink = JsonLinesSink::create(&path).unwrap();
    let history = train_model(
        &mut model,
        &CrossEntropyLoss::new(),
        &mut optimizer,
        &loader,
        None,
        3,
        &mut sink,
    )
    .unwrap();
    drop(sink);

    let text = fs::read_to_string(&path).unwrap();
    let parsed: Vec<Record> = text
        .lines()
        .map(|line| serde_json::from_str(line).unwrap())
        .collect();
    assert_eq!(parsed.len(), history.len());
    for (read, written) in parsed.iter().zip(&history) {
        assert_eq!(read.len(), written.len());
        for (name, value) in written.iter() {
            assert_relative_eq!(read.get(name).unwrap(), value, max_relative = 1e-12);
        }
    }
}

#[test]
fn config_file_drives_model_and_optimizer_choice() {
    let path = scratch("experiment.json");
    fs::write(
        &path,
        r#"{
            "seed": 3,
            "dataset": { "name": "mnist", "samples": 200 },
            "model": "nn",
            "optimizer": { "name": "adam" },
            "epochs": 1,
            "regret": { "lrs": [0.1, 0.01], "parallel": true }
        }"#,
    )
    .unwrap();

    let config = ExperimentConfig::from_file(&path).unwrap();
    config.validate().unwrap();
    assert_eq!(config.dataset.batch_size, 64);
    assert!(config.regret.enabled);

    let dims = config.dataset_kind().unwrap().dims();
    assert_eq!(dims.features(), 28 * 28);
    let model = config
        .model_kind()
        .unwrap()
        .build(dims, &mut Seeder::new(config.seed).rng());
    assert_eq!(model.parameters().len(), 8);
    assert!(config.optimizer.build(model.parameters().into_values()).is_ok());
}
