//! # fastbelief
//!
//! The FastAdaBelief optimizer, SGD and Adam baselines, and an experiment
//! harness that measures the online regret of several learning rates
//! against a trained reference model.

pub mod config;
pub mod data;
pub mod metrics;
pub mod nn;
pub mod optim;
pub mod regret;
pub mod tensor;
pub mod training;
pub mod utils;

pub mod prelude {
    pub use crate::data::{Batch, DataLoader, Dataset};
    pub use crate::nn::{CrossEntropyLoss, Loss, Module};
    pub use crate::optim::{FastAdaBelief, FastAdaBeliefConfig, Optimizer};
    pub use crate::regret::RegretTracker;
    pub use crate::tensor::{Tensor, TensorData, TensorError};
}
