//! # Online Regret
//!
//! Runs several freshly initialised models, each with its own optimizer and
//! learning rate, over one stream of batches and accumulates how much worse
//! each does than a fixed reference model:
//!
//! ```text
//! regret_k += (loss_k(batch) - loss_ref(batch)) * batch_size
//! ```
//!
//! `loss_k` is measured before candidate `k` takes its step on the batch, so
//! no candidate is ever scored on data it has already trained on.

use crate::data::Batch;
use crate::metrics::{MetricsSink, Record};
use crate::nn::{backprop, Loss, Module};
use crate::optim::{FastAdaBelief, FastAdaBeliefConfig, Optimizer};
use crate::tensor::{TensorData, TensorError};
use crate::utils::serialization::SerializationError;
use log::{debug, info};
use rayon::prelude::*;
use serde::Serialize;

/// Learning rates tried when none are configured.
pub const DEFAULT_LEARNING_RATES: [TensorData; 5] = [0.1, 0.01, 0.001, 0.0001, 0.00001];

/// Metric key of the fraction of the stream consumed so far.
pub const PROGRESS_KEY: &str = "DatasetProportion";
/// Metric key of the reference model's loss on the current batch.
pub const REFERENCE_LOSS_KEY: &str = "ReferenceLoss";

#[derive(thiserror::Error, Debug)]
pub enum RegretError {
    #[error(transparent)]
    Tensor(#[from] TensorError),
    #[error("failed to emit metrics: {0}")]
    Metrics(#[from] SerializationError),
}

/// Label used in metric keys for a candidate, e.g. `1e-3`.
pub fn label_for(lr: TensorData) -> String {
    format!("{lr:e}")
}

pub fn loss_key(label: &str) -> String {
    format!("Loss_{label}")
}

pub fn regret_key(label: &str) -> String {
    format!("Regret_{label}")
}

struct Candidate {
    label: String,
    lr: TensorData,
    model: Box<dyn Module>,
    optimizer: Box<dyn Optimizer>,
    regret: f64,
    last_loss: Option<f64>,
}

impl Candidate {
    /// Scores the candidate on `batch`, then trains it on `batch`.
    fn observe<L>(
        &mut self,
        batch: &Batch,
        loss_fn: &L,
        reference_loss: f64,
    ) -> Result<f64, TensorError>
    where
        L: Loss + ?Sized,
    {
        self.optimizer.zero_grad();
        let (loss, _) = backprop(&*self.model, loss_fn, &batch.inputs, &batch.labels)?;
        self.optimizer.step()?;

        let loss = loss as f64;
        self.regret += (loss - reference_loss) * batch.len() as f64;
        self.last_loss = Some(loss);
        Ok(loss)
    }
}

/// Final standing of one candidate.
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct CandidateSummary {
    pub label: String,
    pub lr: TensorData,
    pub regret: f64,
    /// Loss on the last batch seen, if any.
    pub last_loss: Option<f64>,
}

/// Candidates that all see the same batches in the same order.
#[derive(Default)]
pub struct RegretTracker {
    candidates: Vec<Candidate>,
    parallel: bool,
}

impl RegretTracker {
    pub fn new() -> Self {
        Self::default()
    }

    /// One FastAdaBelief candidate per learning rate. `base` supplies every
    /// other hyperparameter; `build_model` is called once per candidate and
    /// must return an independent model.
    pub fn with_fast_adabelief<F>(
        lrs: &[TensorData],
        base: &FastAdaBeliefConfig,
        mut build_model: F,
    ) -> Result<Self, TensorError>
    where
        F: FnMut() -> Box<dyn Module>,
    {
        let mut tracker = RegretTracker::new();
        for &lr in lrs {
            let model = build_model();
            let config = FastAdaBeliefConfig { lr, ..*base };
            let optimizer = FastAdaBelief::new(model.parameters().into_values(), config)?;
            tracker.add_candidate(lr, model, Box::new(optimizer))?;
        }
        Ok(tracker)
    }

    /// Adds a candidate. `optimizer` must manage `model`'s parameters.
    /// Learning rates must be distinct, since they name the metrics.
    pub fn add_candidate(
        &mut self,
        lr: TensorData,
        mut model: Box<dyn Module>,
        optimizer: Box<dyn Optimizer>,
    ) -> Result<(), TensorError> {
        let label = label_for(lr);
        if self.candidates.iter().any(|c| c.label == label) {
            return Err(TensorError::InvalidConfig(format!(
                "duplicate candidate learning rate {label}"
            )));
        }
        model.train();
        self.candidates.push(Candidate {
            label,
            lr,
            model,
            optimizer,
            regret: 0.0,
            last_loss: None,
        });
        Ok(())
    }

    /// Steps candidates on the rayon pool within each batch. Results are
    /// identical to the sequential order.
    pub fn parallel(mut self, parallel: bool) -> Self {
        self.parallel = parallel;
        self
    }

    pub fn len(&self) -> usize {
        self.candidates.len()
    }

    pub fn is_empty(&self) -> bool {
        self.candidates.is_empty()
    }

    /// Model of the candidate at `index`, in insertion order.
    pub fn model(&self, index: usize) -> Option<&dyn Module> {
        self.candidates.get(index).map(|c| &*c.model)
    }

    pub fn summaries(&self) -> Vec<CandidateSummary> {
        self.candidates
            .iter()
            .map(|c| CandidateSummary {
                label: c.label.clone(),
                lr: c.lr,
                regret: c.regret,
                last_loss: c.last_loss,
            })
            .collect()
    }

    /// Consumes `batches` once. For each batch the reference model (in eval
    /// mode, never updated) is scored, then every candidate is scored and
    /// stepped, and one record is emitted to `sink`.
    pub fn run<I, L, S>(
        &mut self,
        reference: &mut dyn Module,
        batches: I,
        loss_fn: &L,
        sink: &mut S,
    ) -> Result<Vec<CandidateSummary>, RegretError>
    where
        I: IntoIterator<Item = Batch>,
        I::IntoIter: ExactSizeIterator,
        L: Loss + ?Sized,
        S: MetricsSink + ?Sized,
    {
        reference.eval();
        let batches = batches.into_iter();
        let total = batches.len();
        info!(
            "Regret pass: {} candidates over {total} batches",
            self.candidates.len()
        );

        for (index, batch) in batches.enumerate() {
            let logits = reference.forward(&batch.inputs)?;
            let reference_loss = loss_fn.loss(&logits, &batch.labels)? as f64;

            let losses: Vec<f64> = if self.parallel {
                self.candidates
                    .par_iter_mut()
                    .map(|c| c.observe(&batch, loss_fn, reference_loss))
                    .collect::<Result<_, _>>()?
            } else {
                self.candidates
                    .iter_mut()
                    .map(|c| c.observe(&batch, loss_fn, reference_loss))
                    .collect::<Result<_, _>>()?
            };

            let mut record = Record::new();
            for (candidate, loss) in self.candidates.iter().zip(losses) {
                record.insert(loss_key(&candidate.label), loss);
                record.insert(regret_key(&candidate.label), candidate.regret);
            }
            record.insert(REFERENCE_LOSS_KEY, reference_loss);
            record.insert(PROGRESS_KEY, (index + 1) as f64 / total as f64);
            sink.emit(&record)?;
            debug!("Regret batch {}/{total}: reference loss {reference_loss:.6}", index + 1);
        }
        sink.flush()?;

        let summaries = self.summaries();
        for s in &summaries {
            info!("Candidate lr={}: regret {:.6}", s.label, s.regret);
        }
        Ok(summaries)
    }
}
