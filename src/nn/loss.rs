//! # Loss Functions
//!
//! Criteria comparing `(N, C)` logits with class labels. Each returns the
//! scalar loss together with its gradient w.r.t. the logits, which is the
//! `grad_output` fed to [`Module::backward`](crate::nn::Module::backward).

use crate::nn::functional as F;
use crate::tensor::{TensorData, TensorError};
use ndarray::{Array1, Array2};
use serde::{Deserialize, Serialize};
use std::fmt::Debug;

/// Specifies the reduction applied over the batch.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Reduction {
    /// Average over the batch.
    #[default]
    Mean,
    /// Sum over the batch.
    Sum,
}

impl Reduction {
    fn apply(
        self,
        batch: usize,
        (loss, grad): (TensorData, Array2<TensorData>),
    ) -> (TensorData, Array2<TensorData>) {
        match self {
            Reduction::Mean => (loss, grad),
            Reduction::Sum => {
                let n = batch as TensorData;
                (loss * n, grad * n)
            }
        }
    }
}

/// A differentiable criterion over class labels.
pub trait Loss: Debug + Send + Sync {
    /// Loss and its gradient w.r.t. `logits`.
    fn loss_and_grad(
        &self,
        logits: &Array2<TensorData>,
        labels: &Array1<usize>,
    ) -> Result<(TensorData, Array2<TensorData>), TensorError>;

    /// Loss only.
    fn loss(
        &self,
        logits: &Array2<TensorData>,
        labels: &Array1<usize>,
    ) -> Result<TensorData, TensorError> {
        self.loss_and_grad(logits, labels).map(|(loss, _)| loss)
    }
}

impl<L: Loss + ?Sized> Loss for Box<L> {
    fn loss_and_grad(
        &self,
        logits: &Array2<TensorData>,
        labels: &Array1<usize>,
    ) -> Result<(TensorData, Array2<TensorData>), TensorError> {
        (**self).loss_and_grad(logits, labels)
    }
}

/// Combines LogSoftmax and negative log-likelihood.
#[derive(Debug, Clone, Copy, Default)]
pub struct CrossEntropyLoss {
    pub reduction: Reduction,
}

impl CrossEntropyLoss {
    pub fn new() -> Self {
        Self::default()
    }

    pub fn with_reduction(reduction: Reduction) -> Self {
        CrossEntropyLoss { reduction }
    }
}

impl Loss for CrossEntropyLoss {
    fn loss_and_grad(
        &self,
        logits: &Array2<TensorData>,
        labels: &Array1<usize>,
    ) -> Result<(TensorData, Array2<TensorData>), TensorError> {
        let out = F::cross_entropy_with_grad(logits, labels)?;
        Ok(self.reduction.apply(logits.nrows(), out))
    }
}

/// Mean squared error between the logits and one-hot encoded labels.
#[derive(Debug, Clone, Copy, Default)]
pub struct MseLoss {
    pub reduction: Reduction,
}

impl MseLoss {
    pub fn new() -> Self {
        Self::default()
    }
}

impl Loss for MseLoss {
    fn loss_and_grad(
        &self,
        logits: &Array2<TensorData>,
        labels: &Array1<usize>,
    ) -> Result<(TensorData, Array2<TensorData>), TensorError> {
        let out = F::mse_with_grad(logits, labels)?;
        Ok(self.reduction.apply(logits.nrows(), out))
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn sum_reduction_scales_by_batch() {
        let logits = arr2(&[[0.3, -0.1], [1.2, 0.4], [0.0, 0.0]]);
        let labels = arr1(&[0, 1, 1]);
        let (mean, mean_grad) = CrossEntropyLoss::new().loss_and_grad(&logits, &labels).unwrap();
        let (sum, sum_grad) = CrossEntropyLoss::with_reduction(Reduction::Sum)
            .loss_and_grad(&logits, &labels)
            .unwrap();
        assert_relative_eq!(sum, mean * 3.0, epsilon = 1e-5);
        assert_relative_eq!(sum_grad[[1, 1]], mean_grad[[1, 1]] * 3.0, epsilon = 1e-6);
    }

    #[test]
    fn mse_against_one_hot() {
        // diff = [[-1, 0], [-1, 1]] -> mean of squares = 0.75
        let loss = MseLoss::new()
            .loss(&arr2(&[[0.0, 0.0], [0.0, 1.0]]), &arr1(&[0, 0]))
            .unwrap();
        assert_relative_eq!(loss, 0.75);
    }

    #[test]
    fn boxed_loss_delegates() {
        let boxed: Box<dyn Loss> = Box::new(CrossEntropyLoss::new());
        let loss = boxed.loss(&Array2::zeros((1, 2)), &arr1(&[1])).unwrap();
        assert_relative_eq!(loss, (2.0 as TensorData).ln(), epsilon = 1e-6);
    }
}
