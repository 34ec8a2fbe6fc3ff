//! # Tensor Module
//!
//! Defines the `Tensor` handle used for trainable parameters: a shared,
//! lockable `ndarray::ArrayD` plus a gradient slot of the same shape.
//! Gradients are written by the owning model's backward pass and read by
//! the optimizers; there is no computation graph here.

use ndarray::{ArrayD, IxDyn};
use rand::Rng;
use rand_distr::{Distribution, Uniform};
use std::sync::{Arc, Mutex, MutexGuard, RwLock, RwLockReadGuard, RwLockWriteGuard};

// --- Error Handling ---
#[derive(thiserror::Error, Debug)]
pub enum TensorError {
    #[error("Shape mismatch: expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Incompatible shapes for operation {op}: {shape1:?} and {shape2:?}")]
    IncompatibleShapes {
        op: String,
        shape1: Vec<usize>,
        shape2: Vec<usize>,
    },
    #[error("Index out of bounds: index {index:?} for shape {shape:?}")]
    IndexOutOfBounds {
        index: Vec<usize>,
        shape: Vec<usize>,
    },
    #[error("Invalid configuration: {0}")]
    InvalidConfig(String),
    #[error("Batch contains no samples")]
    EmptyBatch,
    #[error("ndarray error: {0}")]
    NdarrayError(#[from] ndarray::ShapeError),
}

/// Element type of every tensor in the crate.
pub type TensorData = f32;

/// Identity of a parameter: the address of its shared storage.
///
/// Two parameters holding equal values still have distinct ids, and clones
/// of one `Tensor` handle share an id.
pub type ParamId = usize;

/// # Tensor
///
/// A parameter handle. Cloning is cheap and shares both the data and the
/// gradient slot; use [`Tensor::deep_clone`] for an independent allocation.
#[derive(Clone, Debug)]
pub struct Tensor {
    data: Arc<RwLock<ArrayD<TensorData>>>,
    shape: Vec<usize>,
    grad: Arc<Mutex<Option<ArrayD<TensorData>>>>,
    pub requires_grad: bool,
}

impl Tensor {
    /// Creates a new Tensor from an ndarray::ArrayD.
    pub fn new(data: ArrayD<TensorData>, requires_grad: bool) -> Self {
        let shape = data.shape().to_vec();
        Tensor {
            data: Arc::new(RwLock::new(data)),
            shape,
            grad: Arc::new(Mutex::new(None)),
            requires_grad,
        }
    }

    /// Builds a tensor from a flat vector in row-major order.
    pub fn from_vec(
        shape: &[usize],
        values: Vec<TensorData>,
        requires_grad: bool,
    ) -> Result<Self, TensorError> {
        let data = ArrayD::from_shape_vec(IxDyn(shape), values)?;
        Ok(Tensor::new(data, requires_grad))
    }

    /// Returns the identity used to key optimizer state.
    pub fn id(&self) -> ParamId {
        Arc::as_ptr(&self.data) as *const () as usize
    }

    /// Returns the shape of the tensor.
    pub fn shape(&self) -> &[usize] {
        &self.shape
    }

    /// Returns the number of dimensions.
    pub fn ndim(&self) -> usize {
        self.shape.len()
    }

    /// Returns the total number of elements.
    pub fn size(&self) -> usize {
        self.shape.iter().product()
    }

    /// Provides read-only access to the underlying data.
    pub fn data(&self) -> RwLockReadGuard<'_, ArrayD<TensorData>> {
        self.data.read().expect("Tensor data RwLock poisoned")
    }

    /// Provides mutable access to the underlying data.
    pub fn data_mut(&self) -> RwLockWriteGuard<'_, ArrayD<TensorData>> {
        self.data.write().expect("Tensor data RwLock poisoned")
    }

    /// Clones the underlying data into a new ArrayD.
    pub fn data_clone(&self) -> ArrayD<TensorData> {
        self.data().clone()
    }

    /// Copies data and gradient into fresh storage with a new identity.
    pub fn deep_clone(&self) -> Self {
        let copy = Tensor::new(self.data_clone(), self.requires_grad);
        *copy.grad_slot() = self.grad();
        copy
    }

    /// Overwrites the data with `values`, keeping identity and shape.
    pub fn assign(&self, values: &ArrayD<TensorData>) -> Result<(), TensorError> {
        if values.shape() != self.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: values.shape().to_vec(),
            });
        }
        self.data_mut().assign(values);
        Ok(())
    }

    pub(crate) fn grad_slot(&self) -> MutexGuard<'_, Option<ArrayD<TensorData>>> {
        self.grad.lock().expect("Gradient Mutex poisoned")
    }

    /// Retrieves a copy of the gradient, if one has been computed.
    pub fn grad(&self) -> Option<ArrayD<TensorData>> {
        self.grad_slot().clone()
    }

    /// Replaces the gradient. Ignored when the tensor does not require grad.
    pub fn set_grad(&self, grad: ArrayD<TensorData>) -> Result<(), TensorError> {
        if !self.requires_grad {
            return Ok(());
        }
        if grad.shape() != self.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: grad.shape().to_vec(),
            });
        }
        *self.grad_slot() = Some(grad);
        Ok(())
    }

    /// Adds `incoming` to the existing gradient, creating it if absent.
    pub fn accumulate_grad(&self, incoming: &ArrayD<TensorData>) -> Result<(), TensorError> {
        if !self.requires_grad {
            return Ok(());
        }
        if incoming.shape() != self.shape() {
            return Err(TensorError::ShapeMismatch {
                expected: self.shape.clone(),
                got: incoming.shape().to_vec(),
            });
        }

        let mut slot = self.grad_slot();
        match slot.as_mut() {
            Some(existing) => *existing += incoming,
            None => *slot = Some(incoming.clone()),
        }
        Ok(())
    }

    /// Zeroes the gradient if it exists; an absent gradient stays absent.
    pub fn zero_grad(&self) {
        if let Some(grad) = self.grad_slot().as_mut() {
            grad.fill(0.0);
        }
    }

    /// Drops the gradient so the next optimizer step skips this tensor.
    pub fn clear_grad(&self) {
        *self.grad_slot() = None;
    }
}

// --- Helper functions ---

/// Helper to create a tensor filled with zeros.
pub fn zeros(shape: &[usize], requires_grad: bool) -> Tensor {
    Tensor::new(ArrayD::zeros(IxDyn(shape)), requires_grad)
}

/// Helper to create a tensor filled with ones.
pub fn ones(shape: &[usize], requires_grad: bool) -> Tensor {
    Tensor::new(ArrayD::ones(IxDyn(shape)), requires_grad)
}

/// Helper to create a tensor with values drawn uniformly from `[low, high)`.
pub fn uniform<R: Rng + ?Sized>(
    shape: &[usize],
    low: TensorData,
    high: TensorData,
    rng: &mut R,
    requires_grad: bool,
) -> Tensor {
    let range = Uniform::new(low, high);
    let data = ArrayD::from_shape_simple_fn(IxDyn(shape), || range.sample(rng));
    Tensor::new(data, requires_grad)
}
