//! Classification models used by the training and regret harness.
//!
//! Inputs are flattened images: `input_size * input_size * channels` features
//! per row.

use super::{Linear, Module, ReLU, Sequential};
use crate::tensor::{Tensor, TensorData, TensorError};
use ndarray::Array2;
use rand::Rng;
use std::collections::BTreeMap;

/// Hidden widths of [`Layer4NN`].
pub const LAYER4_HIDDEN: [usize; 3] = [256, 128, 64];

fn flat_features(input_size: usize, channels: usize) -> usize {
    input_size * input_size * channels
}

/// Multinomial logistic regression: a single affine map to class logits.
#[derive(Debug)]
pub struct LogisticRegression {
    linear: Linear,
    training: bool,
}

impl LogisticRegression {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        num_classes: usize,
        channels: usize,
        rng: &mut R,
    ) -> Self {
        LogisticRegression {
            linear: Linear::new(flat_features(input_size, channels), num_classes, true, rng),
            training: true,
        }
    }
}

impl Module for LogisticRegression {
    fn forward(&self, input: &Array2<TensorData>) -> Result<Array2<TensorData>, TensorError> {
        self.linear.forward(input)
    }

    fn backward(
        &self,
        input: &Array2<TensorData>,
        grad_output: &Array2<TensorData>,
    ) -> Result<Array2<TensorData>, TensorError> {
        self.linear.backward(input, grad_output)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        self.linear
            .parameters()
            .into_iter()
            .map(|(name, param)| (format!("linear.{name}"), param))
            .collect()
    }

    fn train(&mut self) {
        self.training = true;
    }

    fn eval(&mut self) {
        self.training = false;
    }

    fn is_training(&self) -> bool {
        self.training
    }
}

/// Four dense layers with ReLU in between.
#[derive(Debug)]
pub struct Layer4NN {
    layers: Sequential,
}

impl Layer4NN {
    pub fn new<R: Rng + ?Sized>(
        input_size: usize,
        num_classes: usize,
        channels: usize,
        rng: &mut R,
    ) -> Self {
        let [h1, h2, h3] = LAYER4_HIDDEN;
        let in_features = flat_features(input_size, channels);
        let layers = Sequential::from_modules(vec![
            Box::new(Linear::new(in_features, h1, true, rng)),
            Box::new(ReLU::new()),
            Box::new(Linear::new(h1, h2, true, rng)),
            Box::new(ReLU::new()),
            Box::new(Linear::new(h2, h3, true, rng)),
            Box::new(ReLU::new()),
            Box::new(Linear::new(h3, num_classes, true, rng)),
        ]);
        Layer4NN { layers }
    }
}

impl Module for Layer4NN {
    fn forward(&self, input: &Array2<TensorData>) -> Result<Array2<TensorData>, TensorError> {
        self.layers.forward(input)
    }

    fn backward(
        &self,
        input: &Array2<TensorData>,
        grad_output: &Array2<TensorData>,
    ) -> Result<Array2<TensorData>, TensorError> {
        self.layers.backward(input, grad_output)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        self.layers.parameters()
    }

    fn zero_grad(&self) {
        self.layers.zero_grad()
    }

    fn train(&mut self) {
        self.layers.train()
    }

    fn eval(&mut self) {
        self.layers.eval()
    }

    fn is_training(&self) -> bool {
        self.layers.is_training()
    }
}
