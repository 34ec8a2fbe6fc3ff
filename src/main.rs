use std::env;

use anyhow::{ensure, Context, Result};
use log::info;

use fastbelief::config::ExperimentConfig;
use fastbelief::data::{self, DataLoader, Dataset};
use fastbelief::metrics::{Fanout, JsonLinesSink, LogSink};
use fastbelief::nn::Module;
use fastbelief::regret::RegretTracker;
use fastbelief::training::train_model;
use fastbelief::utils::{self, Seeder};

// Independent RNG streams; the base stream initialises models.
const DATA_STREAM: u64 = 0;
const SHUFFLE_STREAM: u64 = 1;
const REGRET_STREAM: u64 = 2;

fn main() -> Result<()> {
    env_logger::init();

    let config = match env::args().nth(1) {
        Some(path) => ExperimentConfig::from_file(&path)
            .with_context(|| format!("reading config {path}"))?,
        None => ExperimentConfig::default(),
    };
    config.validate()?;
    info!("config: {}", serde_json::to_string(&config)?);

    let seeder = Seeder::new(config.seed);
    let dims = config.dataset_kind()?.dims();
    let settings = &config.dataset;
    let generate = || {
        Dataset::synthetic(
            dims.features(),
            dims.num_classes,
            settings.samples,
            settings.noise,
            &mut seeder.rng_for(DATA_STREAM),
        )
    };
    let dataset = match &settings.cache {
        Some(path) => data::load_or_fetch(path, |p| generate()?.save(p))?,
        None => generate()?,
    };
    ensure!(
        dataset.features() == dims.features() && dataset.num_classes() == dims.num_classes,
        "dataset has {} features and {} classes, expected {} and {}",
        dataset.features(),
        dataset.num_classes(),
        dims.features(),
        dims.num_classes
    );
    let (train, test) = dataset.split(settings.train_fraction);
    info!("dataset {}: {} train / {} test", settings.name, train.len(), test.len());

    let mut sink = Fanout::new();
    sink.push(Box::new(LogSink::new("")));
    if let Some(path) = &config.metrics {
        sink.push(Box::new(JsonLinesSink::create(path)?));
    }

    // Reference model
    let mut model = config.model_kind()?.build(dims, &mut seeder.rng());
    let loss_fn = config.loss_kind()?.build();
    let mut optimizer = config.optimizer.build(model.parameters().into_values())?;
    let train_loader =
        DataLoader::shuffled(&train, settings.batch_size, &mut seeder.rng_for(SHUFFLE_STREAM))?;
    let test_loader = DataLoader::new(&test, settings.batch_size)?;
    train_model(
        &mut *model,
        &*loss_fn,
        &mut *optimizer,
        &train_loader,
        (!test.is_empty()).then_some(&test_loader),
        config.epochs,
        &mut sink,
    )?;

    if let Some(path) = &config.checkpoint {
        utils::save(&*model, path, false)?;
        info!("saved reference model to {}", path.display());
    }

    if config.regret.enabled {
        let regret_kind = config.regret_model_kind()?;
        let mut tracker = RegretTracker::with_fast_adabelief(
            &config.regret.lrs,
            &config.regret.candidate_config(),
            || regret_kind.build(dims, &mut seeder.rng()),
        )?
        .parallel(config.regret.parallel);
        let loader = DataLoader::shuffled(
            &train,
            config.regret.batch_size,
            &mut seeder.rng_for(REGRET_STREAM),
        )?;
        let summaries = tracker.run(&mut *model, &loader, &*loss_fn, &mut sink)?;
        for summary in summaries {
            println!("lr={} regret={:.6}", summary.label, summary.regret);
        }
    }

    Ok(())
}
