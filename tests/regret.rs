use std::collections::BTreeMap;

use rand::{rngs::StdRng, SeedableRng};

use fastbelief::data::{Batch, DataLoader, Dataset};
use fastbelief::metrics::MemorySink;
use fastbelief::nn::{CrossEntropyLoss, LogisticRegression, Module};
use fastbelief::optim::FastAdaBeliefConfig;
use fastbelief::regret::{regret_key, CandidateSummary, RegretTracker, PROGRESS_KEY};

const MODEL_SEED: u64 = 7;

fn mk_dataset() -> Dataset {
    // 3x3 single-channel "images", 4 classes
    Dataset::synthetic(9, 4, 60, 0.5, &mut StdRng::seed_from_u64(3)).unwrap()
}

fn mk_model() -> Box<dyn Module> {
    Box::new(LogisticRegression::new(3, 4, 1, &mut StdRng::seed_from_u64(MODEL_SEED)))
}

fn mk_tracker(lrs: &[f32], parallel: bool) -> RegretTracker {
    let config = FastAdaBeliefConfig {
        weight_decay: 0.0,
        ..Default::default()
    };
    RegretTracker::with_fast_adabelief(lrs, &config, mk_model)
        .unwrap()
        .parallel(parallel)
}

fn run(tracker: &mut RegretTracker, batches: Vec<Batch>) -> (Vec<CandidateSummary>, MemorySink) {
    let mut reference = mk_model();
    let mut sink = MemorySink::new();
    let summaries = tracker
        .run(&mut *reference, batches, &CrossEntropyLoss::new(), &mut sink)
        .unwrap();
    (summaries, sink)
}

fn batches(data: &Dataset, batch_size: usize) -> Vec<Batch> {
    DataLoader::new(data, batch_size).unwrap().iter().collect()
}

fn by_label(summaries: &[CandidateSummary]) -> BTreeMap<String, f64> {
    summaries
        .iter()
        .map(|s| (s.label.clone(), s.regret))
        .collect()
}

#[test]
fn frozen_copy_of_reference_has_zero_regret_at_every_batch() {
    let data = mk_dataset();
    let mut tracker = mk_tracker(&[0.0], false);
    let (summaries, sink) = run(&mut tracker, batches(&data, 7));

    assert_eq!(summaries[0].regret, 0.0);
    let regrets = sink.series(&regret_key("0e0"));
    assert_eq!(regrets.len(), 9);
    assert!(regrets.iter().all(|&r| r == 0.0));
}

#[test]
fn candidate_order_does_not_change_any_regret() {
    let data = mk_dataset();
    let (forward, _) = run(&mut mk_tracker(&[0.1, 0.01, 0.001], false), batches(&data, 10));
    let (shuffled, _) = run(&mut mk_tracker(&[0.001, 0.1, 0.01], false), batches(&data, 10));

    assert_eq!(by_label(&forward), by_label(&shuffled));
    assert_eq!(shuffled[0].label, "1e-3");
}

#[test]
fn batch_order_changes_regret() {
    let data = mk_dataset();
    let in_order = batches(&data, 10);
    let mut reversed = in_order.clone();
    reversed.reverse();

    let (a, _) = run(&mut mk_tracker(&[0.1], false), in_order);
    let (b, _) = run(&mut mk_tracker(&[0.1], false), reversed);
    assert_ne!(a[0].regret, b[0].regret);
}

#[test]
fn parallel_stepping_matches_sequential() {
    let data = mk_dataset();
    let lrs = [0.1, 0.01, 0.001, 0.0001, 0.00001];
    let (sequential, seq_sink) = run(&mut mk_tracker(&lrs, false), batches(&data, 8));
    let (parallel, par_sink) = run(&mut mk_tracker(&lrs, true), batches(&data, 8));

    assert_eq!(sequential, parallel);
    assert_eq!(seq_sink.records, par_sink.records);
}

#[test]
fn progress_reaches_one_on_the_last_batch() {
    let data = mk_dataset();
    let (_, sink) = run(&mut mk_tracker(&[0.01], false), batches(&data, 16));
    let progress = sink.series(PROGRESS_KEY);
    assert_eq!(progress.len(), 4);
    assert!(progress.windows(2).all(|w| w[0] < w[1]));
    assert_eq!(progress.last().copied(), Some(1.0));
}

#[test]
fn reference_and_candidates_do_not_share_parameters() {
    let data = mk_dataset();
    let mut tracker = mk_tracker(&[0.1], false);
    let mut reference = mk_model();
    let before = reference.parameters()["linear.weight"].data_clone();

    tracker
        .run(&mut *reference, batches(&data, 10), &CrossEntropyLoss::new(), &mut MemorySink::new())
        .unwrap();

    let after = reference.parameters()["linear.weight"].data_clone();
    assert_eq!(before, after);
    let candidate = tracker.model(0).unwrap().parameters()["linear.weight"].data_clone();
    assert_ne!(candidate, before);
}
