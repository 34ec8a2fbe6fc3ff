//! # Activation Function Modules

use crate::nn::functional as F;
use crate::nn::Module;
use crate::tensor::{Tensor, TensorData, TensorError};
use ndarray::Array2;
use std::collections::BTreeMap;

/// Applies the Rectified Linear Unit function element-wise.
/// `ReLU(x) = max(0, x)`
#[derive(Debug, Clone, Copy, Default)]
pub struct ReLU;

impl ReLU {
    /// Creates a new ReLU module.
    pub fn new() -> Self {
        ReLU
    }
}

impl Module for ReLU {
    fn forward(&self, input: &Array2<TensorData>) -> Result<Array2<TensorData>, TensorError> {
        Ok(F::relu(input))
    }

    fn backward(
        &self,
        input: &Array2<TensorData>,
        grad_output: &Array2<TensorData>,
    ) -> Result<Array2<TensorData>, TensorError> {
        F::relu_backward(input, grad_output)
    }

    /// ReLU has no parameters.
    fn parameters(&self) -> BTreeMap<String, Tensor> {
        BTreeMap::new()
    }
}
