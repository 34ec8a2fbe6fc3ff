//! # Neural Network Module (`nn`)
//!
//! Layers and models with hand-written backward passes. Each module writes
//! the gradients of its own parameters into their gradient slots, which is
//! all the optimizers need.

use crate::tensor::{Tensor, TensorData, TensorError};
use ndarray::{Array1, Array2};
use std::collections::BTreeMap;
use std::fmt::Debug;

// --- Submodules ---
pub mod functional;
pub mod loss;
pub mod models;
pub mod modules;

// Re-export common items
pub use loss::{CrossEntropyLoss, Loss, MseLoss};
pub use models::{Layer4NN, LogisticRegression};
pub use modules::*;

// --- Core Trait: Module ---

/// Base trait for all neural network modules (layers, containers, models).
pub trait Module: Debug + Send + Sync {
    /// Performs the forward pass on a `(batch, features)` input.
    fn forward(&self, input: &Array2<TensorData>) -> Result<Array2<TensorData>, TensorError>;

    /// Propagates `grad_output` (the loss gradient w.r.t. this module's
    /// output for `input`) back through the module. Parameter gradients are
    /// accumulated into the parameters; the gradient w.r.t. `input` is returned.
    fn backward(
        &self,
        input: &Array2<TensorData>,
        grad_output: &Array2<TensorData>,
    ) -> Result<Array2<TensorData>, TensorError>;

    /// Named trainable parameters, in a deterministic order.
    fn parameters(&self) -> BTreeMap<String, Tensor>;

    /// All tensors making up the module's state. Defaults to `parameters()`.
    fn tensors(&self) -> BTreeMap<String, Tensor> {
        self.parameters()
    }

    /// Zeros the gradients of all parameters within the module.
    fn zero_grad(&self) {
        for param in self.parameters().values() {
            param.zero_grad();
        }
    }

    /// Sets the module to training mode.
    fn train(&mut self) {}

    /// Sets the module to evaluation mode.
    fn eval(&mut self) {}

    fn is_training(&self) -> bool {
        true
    }
}

impl Module for Box<dyn Module> {
    fn forward(&self, input: &Array2<TensorData>) -> Result<Array2<TensorData>, TensorError> {
        (**self).forward(input)
    }

    fn backward(
        &self,
        input: &Array2<TensorData>,
        grad_output: &Array2<TensorData>,
    ) -> Result<Array2<TensorData>, TensorError> {
        (**self).backward(input, grad_output)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        (**self).parameters()
    }

    fn tensors(&self) -> BTreeMap<String, Tensor> {
        (**self).tensors()
    }

    fn zero_grad(&self) {
        (**self).zero_grad()
    }

    fn train(&mut self) {
        (**self).train()
    }

    fn eval(&mut self) {
        (**self).eval()
    }

    fn is_training(&self) -> bool {
        (**self).is_training()
    }
}

/// Forward, loss and backward for one batch.
///
/// Returns the batch loss and the logits. Gradients are accumulated into the
/// model's parameters, so call `zero_grad` first.
pub fn backprop<M, L>(
    model: &M,
    loss_fn: &L,
    inputs: &Array2<TensorData>,
    labels: &Array1<usize>,
) -> Result<(TensorData, Array2<TensorData>), TensorError>
where
    M: Module + ?Sized,
    L: Loss + ?Sized,
{
    let logits = model.forward(inputs)?;
    let (loss, grad) = loss_fn.loss_and_grad(&logits, labels)?;
    model.backward(inputs, &grad)?;
    Ok((loss, logits))
}

// --- Common Module Structures ---

/// A sequential container for modules.
/// The forward pass applies each module in order.
#[derive(Debug)]
pub struct Sequential {
    modules: Vec<Box<dyn Module>>,
    training: bool,
}

impl Default for Sequential {
    fn default() -> Self {
        Sequential {
            modules: Vec::new(),
            training: true,
        }
    }
}

impl Sequential {
    /// Creates a new empty Sequential container.
    pub fn new() -> Self {
        Self::default()
    }

    /// Creates a Sequential container from a vector of modules.
    pub fn from_modules(modules: Vec<Box<dyn Module>>) -> Self {
        Sequential {
            modules,
            training: true,
        }
    }

    /// Adds a module to the sequence.
    pub fn add_module(&mut self, module: Box<dyn Module>) {
        self.modules.push(module);
    }

    pub fn len(&self) -> usize {
        self.modules.len()
    }

    pub fn is_empty(&self) -> bool {
        self.modules.is_empty()
    }
}

impl Module for Sequential {
    fn forward(&self, input: &Array2<TensorData>) -> Result<Array2<TensorData>, TensorError> {
        let mut current = input.clone();
        for module in &self.modules {
            current = module.forward(&current)?;
        }
        Ok(current)
    }

    fn backward(
        &self,
        input: &Array2<TensorData>,
        grad_output: &Array2<TensorData>,
    ) -> Result<Array2<TensorData>, TensorError> {
        // activations[i] is the input seen by module i
        let mut activations = Vec::with_capacity(self.modules.len());
        let mut current = input.clone();
        for module in &self.modules {
            let next = module.forward(&current)?;
            activations.push(current);
            current = next;
        }

        let mut grad = grad_output.clone();
        for (module, activation) in self.modules.iter().zip(&activations).rev() {
            grad = module.backward(activation, &grad)?;
        }
        Ok(grad)
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = BTreeMap::new();
        for (i, module) in self.modules.iter().enumerate() {
            for (name, param) in module.parameters() {
                params.insert(format!("{i}.{name}"), param);
            }
        }
        params
    }

    fn tensors(&self) -> BTreeMap<String, Tensor> {
        let mut tensors = BTreeMap::new();
        for (i, module) in self.modules.iter().enumerate() {
            for (name, tensor) in module.tensors() {
                tensors.insert(format!("{i}.{name}"), tensor);
            }
        }
        tensors
    }

    fn zero_grad(&self) {
        for module in &self.modules {
            module.zero_grad();
        }
    }

    fn train(&mut self) {
        self.training = true;
        for module in &mut self.modules {
            module.train();
        }
    }

    fn eval(&mut self) {
        self.training = false;
        for module in &mut self.modules {
            module.eval();
        }
    }

    fn is_training(&self) -> bool {
        self.training
    }
}
