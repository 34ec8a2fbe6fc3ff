//! # Optimization Algorithms (`optim`)
//!
//! FastAdaBelief plus the SGD, Adam and AdaBelief baselines. Every optimizer keeps its
//! per-parameter buffers in a [`StateStore`] keyed by parameter identity and
//! skips parameters whose gradient is absent.

use crate::tensor::{Tensor, TensorData, TensorError};
use ndarray::ArrayD;
use std::collections::HashSet;

// --- Submodules ---
pub mod adabelief;
pub mod adam;
pub mod fast_adabelief;
pub mod sgd;
pub mod state;

// Re-export optimizers
pub use adabelief::{AdaBelief, AdaBeliefConfig};
pub use adam::{Adam, AdamConfig};
pub use fast_adabelief::{FastAdaBelief, FastAdaBeliefConfig, FastAdaBeliefOverrides, ParamState};
pub use sgd::{SgdConfig, SGD};
pub use state::StateStore;

// --- Optimizer Trait ---

/// Base trait for all optimizers.
pub trait Optimizer: Send {
    /// Performs a single optimization step over every managed parameter that
    /// currently holds a gradient.
    fn step(&mut self) -> Result<(), TensorError>;

    /// Zeros the gradients of all parameters managed by the optimizer.
    /// Call this before computing gradients for a new batch.
    fn zero_grad(&mut self);

    /// Discards all per-parameter state. Parameters keep their values.
    fn reset_state(&mut self);

    /// Learning rate of the first parameter group.
    fn learning_rate(&self) -> TensorData;
}

/// A set of parameters sharing one set of hyperparameters.
#[derive(Debug, Clone)]
pub struct ParamGroup<H> {
    pub params: Vec<Tensor>,
    pub options: H,
}

impl<H> ParamGroup<H> {
    pub fn new<I>(params: I, options: H) -> Self
    where
        I: IntoIterator<Item = Tensor>,
    {
        ParamGroup {
            params: params.into_iter().collect(),
            options,
        }
    }
}

/// Fails with `ShapeMismatch` unless `grad` has the parameter's shape.
pub(crate) fn ensure_same_shape(
    param: &ArrayD<TensorData>,
    grad: &ArrayD<TensorData>,
) -> Result<(), TensorError> {
    if param.shape() != grad.shape() {
        return Err(TensorError::ShapeMismatch {
            expected: param.shape().to_vec(),
            got: grad.shape().to_vec(),
        });
    }
    Ok(())
}

/// Fails with `InvalidConfig` if any parameter is listed twice.
pub(crate) fn ensure_distinct<'a, I>(params: I) -> Result<(), TensorError>
where
    I: IntoIterator<Item = &'a Tensor>,
{
    let mut seen = HashSet::new();
    if params.into_iter().all(|p| seen.insert(p.id())) {
        Ok(())
    } else {
        Err(invalid("a parameter is listed more than once"))
    }
}

pub(crate) fn invalid(msg: impl Into<String>) -> TensorError {
    TensorError::InvalidConfig(msg.into())
}
