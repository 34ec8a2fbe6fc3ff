//! # Training Loop
//!
//! Epoch-based supervised training with per-epoch metrics.

use crate::data::{Batch, DataLoader};
use crate::metrics::{MetricsSink, Record};
use crate::nn::{backprop, functional::num_correct, Loss, Module};
use crate::optim::Optimizer;
use crate::tensor::TensorError;
use crate::utils::serialization::SerializationError;
use log::info;

pub const TRAIN_LOSS_KEY: &str = "TrainLoss";
pub const TRAIN_ACCURACY_KEY: &str = "TrainAccuracy";
pub const TEST_LOSS_KEY: &str = "TestLoss";
pub const TEST_ACCURACY_KEY: &str = "TestAccuracy";
pub const EPOCH_KEY: &str = "Epoch";

#[derive(thiserror::Error, Debug)]
pub enum TrainingError {
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("failed to emit metrics: {0}")]
    Metrics(#[from] SerializationError),
}

/// Summed batch loss and percentage accuracy over one pass.
#[derive(Debug, Clone, Copy, PartialEq, Default)]
pub struct PassStats {
    pub loss: f64,
    pub accuracy: f64,
    pub samples: usize,
}

#[derive(Default)]
struct Tally {
    loss: f64,
    correct: usize,
    samples: usize,
}

impl Tally {
    fn add(&mut self, loss: f64, correct: usize, samples: usize) {
        self.loss += loss;
        self.correct += correct;
        self.samples += samples;
    }

    fn finish(self) -> PassStats {
        let accuracy = if self.samples == 0 {
            0.0
        } else {
            100.0 * self.correct as f64 / self.samples as f64
        };
        PassStats {
            loss: self.loss,
            accuracy,
            samples: self.samples,
        }
    }
}

/// Scores `model` on every batch without touching its parameters.
pub fn evaluate<M, L, I>(model: &M, loss_fn: &L, batches: I) -> Result<PassStats, TensorError>
where
    M: Module + ?Sized,
    L: Loss + ?Sized,
    I: IntoIterator<Item = Batch>,
{
    let mut tally = Tally::default();
    for batch in batches {
        let logits = model.forward(&batch.inputs)?;
        let loss = loss_fn.loss(&logits, &batch.labels)?;
        tally.add(loss as f64, num_correct(&logits, &batch.labels), batch.len());
    }
    Ok(tally.finish())
}

/// One pass of zero_grad, forward, backward and step per batch.
pub fn train_epoch<M, L, O, I>(
    model: &M,
    loss_fn: &L,
    optimizer: &mut O,
    batches: I,
) -> Result<PassStats, TensorError>
where
    M: Module + ?Sized,
    L: Loss + ?Sized,
    O: Optimizer + ?Sized,
    I: IntoIterator<Item = Batch>,
{
    let mut tally = Tally::default();
    for batch in batches {
        optimizer.zero_grad();
        let (loss, logits) = backprop(model, loss_fn, &batch.inputs, &batch.labels)?;
        optimizer.step()?;
        tally.add(loss as f64, num_correct(&logits, &batch.labels), batch.len());
    }
    Ok(tally.finish())
}

/// Trains for `epochs` epochs, emitting one record per epoch.
///
/// When `test` is given the model is scored on it in eval mode after each
/// epoch and put back in training mode.
pub fn train_model<M, L, O, S>(
    model: &mut M,
    loss_fn: &L,
    optimizer: &mut O,
    train: &DataLoader<'_>,
    test: Option<&DataLoader<'_>>,
    epochs: usize,
    sink: &mut S,
) -> Result<Vec<Record>, TrainingError>
where
    M: Module + ?Sized,
    L: Loss + ?Sized,
    O: Optimizer + ?Sized,
    S: MetricsSink + ?Sized,
{
    model.train();
    let mut history = Vec::with_capacity(epochs);
    for epoch in 0..epochs {
        let stats = train_epoch(&*model, loss_fn, optimizer, train)?;

        let mut record = Record::new();
        record.insert(EPOCH_KEY, epoch as f64);
        record.insert(TRAIN_LOSS_KEY, stats.loss);
        record.insert(TRAIN_ACCURACY_KEY, stats.accuracy);

        if let Some(test) = test {
            model.eval();
            let result = evaluate(&*model, loss_fn, test);
            model.train();
            let test_stats = result?;
            record.insert(TEST_LOSS_KEY, test_stats.loss);
            record.insert(TEST_ACCURACY_KEY, test_stats.accuracy);
        }

        info!(
            "Epoch {}/{epochs}: train loss {:.4}, train accuracy {:.2}%",
            epoch + 1,
            stats.loss,
            stats.accuracy
        );
        sink.emit(&record)?;
        history.push(record);
    }
    sink.flush()?;
    Ok(history)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::data::Dataset;
    use crate::metrics::MemorySink;
    use crate::nn::{CrossEntropyLoss, LogisticRegression};
    use crate::optim::{FastAdaBelief, FastAdaBeliefConfig};
    use rand::{rngs::StdRng, SeedableRng};

    #[test]
    fn training_reduces_loss_on_separable_data() {
        let data = Dataset::synthetic(9, 3, 90, 0.05, &mut StdRng::seed_from_u64(11)).unwrap();
        let (train, test) = data.split(0.8);
        let mut model = LogisticRegression::new(3, 3, 1, &mut StdRng::seed_from_u64(0));
        let loss_fn = CrossEntropyLoss::new();
        let mut optimizer = FastAdaBelief::new(
            model.parameters().into_values(),
            FastAdaBeliefConfig::with_lr(0.05),
        )
        .unwrap();
        let mut sink = MemorySink::new();

        let train_loader = DataLoader::new(&train, 8).unwrap();
        let test_loader = DataLoader::new(&test, 8).unwrap();
        let history = train_model(
            &mut model,
            &loss_fn,
            &mut optimizer,
            &train_loader,
            Some(&test_loader),
            15,
            &mut sink,
        )
        .unwrap();

        assert_eq!(history.len(), 15);
        let losses = sink.series(TRAIN_LOSS_KEY);
        assert!(losses[14] < losses[0]);
        assert!(sink.series(TEST_ACCURACY_KEY)[14] >= 80.0);
        assert!(model.is_training());
        let final_stats = evaluate(&model, &loss_fn, &test_loader).unwrap();
        assert_eq!(final_stats.samples, test.len());
    }

    #[test]
    fn evaluate_does_not_write_gradients() {
        let data = Dataset::synthetic(4, 2, 10, 0.1, &mut StdRng::seed_from_u64(1)).unwrap();
        let model = LogisticRegression::new(2, 2, 1, &mut StdRng::seed_from_u64(0));
        evaluate(&model, &CrossEntropyLoss::new(), &DataLoader::new(&data, 4).unwrap()).unwrap();
        assert!(model.parameters().values().all(|p| p.grad().is_none()));
    }
}
