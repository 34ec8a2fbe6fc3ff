//! # Checkpoint Serialization
//!
//! Saving and loading module parameters and FastAdaBelief optimizer state.
//! Uses `serde` for serialization and `bincode` as the binary format.

use crate::nn::Module;
use crate::optim::{FastAdaBelief, FastAdaBeliefConfig, ParamState};
use crate::tensor::{Tensor, TensorData, TensorError};

use log::warn;
use ndarray::{ArrayD, IxDyn};
use serde::{Deserialize, Serialize};
use std::collections::{BTreeMap, BTreeSet};
use std::fs::File;
use std::io::{BufReader, BufWriter};
use std::path::Path;

// --- Error Type ---
#[derive(thiserror::Error, Debug)]
pub enum SerializationError {
    #[error("IO Error: {0}")]
    Io(#[from] std::io::Error),
    #[error("Serialization Error (Bincode): {0}")]
    Bincode(#[from] bincode::Error),
    #[error("Serialization Error (JSON): {0}")]
    Json(#[from] serde_json::Error),
    #[error("Tensor shape mismatch during loading: key '{key}', expected {expected:?}, got {got:?}")]
    ShapeMismatch {
        key: String,
        expected: Vec<usize>,
        got: Vec<usize>,
    },
    #[error("Missing key in state dict during loading: '{0}'")]
    MissingKey(String),
    #[error("Unexpected key in state dict during loading: '{0}'")]
    UnexpectedKey(String),
    #[error(transparent)]
    Tensor(#[from] TensorError),
}

// --- Serializable Tensor Wrapper ---

/// Shape plus flat row-major data.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SerializableTensor {
    shape: Vec<usize>,
    data: Vec<TensorData>,
}

impl SerializableTensor {
    fn from_array(array: &ArrayD<TensorData>) -> Self {
        SerializableTensor {
            shape: array.shape().to_vec(),
            data: array.iter().copied().collect(),
        }
    }

    fn from_tensor(tensor: &Tensor) -> Self {
        Self::from_array(&tensor.data())
    }

    fn to_ndarray(&self) -> Result<ArrayD<TensorData>, SerializationError> {
        let array = ArrayD::from_shape_vec(IxDyn(&self.shape), self.data.clone())
            .map_err(TensorError::from)?;
        Ok(array)
    }

    fn expect_shape(&self, key: &str, expected: &[usize]) -> Result<(), SerializationError> {
        if self.shape != expected {
            return Err(SerializationError::ShapeMismatch {
                key: key.to_string(),
                expected: expected.to_vec(),
                got: self.shape.clone(),
            });
        }
        Ok(())
    }
}

// --- State Dictionary Type ---
// BTreeMap keeps the on-disk order stable.
pub type StateDict = BTreeMap<String, SerializableTensor>;

/// Copies the module's tensors into a state dict.
pub fn state_dict(module: &dyn Module, include_buffers: bool) -> StateDict {
    let tensors = if include_buffers {
        module.tensors()
    } else {
        module.parameters()
    };
    tensors
        .iter()
        .map(|(key, tensor)| (key.clone(), SerializableTensor::from_tensor(tensor)))
        .collect()
}

/// Writes `state` into the module's tensors.
///
/// With `strict`, every module key must be present and no extra keys are
/// allowed; otherwise mismatched keys are logged and skipped. Shapes are
/// always checked, and nothing is written unless every check passes.
pub fn load_state_dict(
    module: &dyn Module,
    state: &StateDict,
    strict: bool,
    include_buffers: bool,
) -> Result<(), SerializationError> {
    let module_tensors = if include_buffers {
        module.tensors()
    } else {
        module.parameters()
    };

    let mut updates = Vec::with_capacity(module_tensors.len());
    for (key, target) in &module_tensors {
        match state.get(key) {
            Some(saved) => {
                saved.expect_shape(key, target.shape())?;
                updates.push((target, saved.to_ndarray()?));
            }
            None if strict => return Err(SerializationError::MissingKey(key.clone())),
            None => warn!("Key '{key}' not found in loaded state dict. Skipping."),
        }
    }

    for key in state.keys().filter(|k| !module_tensors.contains_key(*k)) {
        if strict {
            return Err(SerializationError::UnexpectedKey(key.clone()));
        }
        warn!("Key '{key}' found in loaded state dict but not used by the module.");
    }

    for (target, values) in updates {
        target.assign(&values)?;
    }
    Ok(())
}

// --- Save / Load Functions ---

/// Saves the state dictionary of a module to a file.
pub fn save<P: AsRef<Path>>(
    module: &dyn Module,
    path: P,
    include_buffers: bool,
) -> Result<(), SerializationError> {
    let writer = BufWriter::new(File::create(path.as_ref())?);
    bincode::serialize_into(writer, &state_dict(module, include_buffers))?;
    Ok(())
}

/// Loads a state dictionary from a file into the module's tensors.
pub fn load<P: AsRef<Path>>(
    module: &dyn Module,
    path: P,
    strict: bool,
    include_buffers: bool,
) -> Result<(), SerializationError> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let loaded: StateDict = bincode::deserialize_from(reader)?;
    load_state_dict(module, &loaded, strict, include_buffers)
}

// --- Optimizer State ---

#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct SerializableParamState {
    step: u64,
    hat_g: SerializableTensor,
    v: SerializableTensor,
}

/// FastAdaBelief checkpoint: per-group hyperparameters plus per-parameter
/// state keyed by `"{group}.{index}"`. Parameters never updated have no entry.
#[derive(Serialize, Deserialize, Debug, Clone, PartialEq)]
pub struct OptimizerStateDict {
    pub groups: Vec<FastAdaBeliefConfig>,
    pub state: BTreeMap<String, SerializableParamState>,
}

fn param_key(group: usize, index: usize) -> String {
    format!("{group}.{index}")
}

pub fn optimizer_state_dict(optimizer: &FastAdaBelief) -> OptimizerStateDict {
    let mut state = BTreeMap::new();
    for (g, group) in optimizer.param_groups().iter().enumerate() {
        for (i, param) in group.params.iter().enumerate() {
            if let Some(s) = optimizer.state_for(param) {
                state.insert(
                    param_key(g, i),
                    SerializableParamState {
                        step: s.step,
                        hat_g: SerializableTensor::from_array(&s.hat_g),
                        v: SerializableTensor::from_array(&s.v),
                    },
                );
            }
        }
    }
    OptimizerStateDict {
        groups: optimizer
            .param_groups()
            .iter()
            .map(|group| group.options)
            .collect(),
        state,
    }
}

/// Restores per-parameter state into an optimizer built over the same
/// parameter layout. Hyperparameters stay as constructed; the saved group
/// count must match. Existing state is replaced.
pub fn load_optimizer_state_dict(
    optimizer: &mut FastAdaBelief,
    dict: &OptimizerStateDict,
) -> Result<(), SerializationError> {
    if dict.groups.len() != optimizer.param_groups().len() {
        return Err(SerializationError::ShapeMismatch {
            key: "param_groups".to_string(),
            expected: vec![optimizer.param_groups().len()],
            got: vec![dict.groups.len()],
        });
    }

    let mut restored = Vec::new();
    let mut known = BTreeSet::new();
    for (g, group) in optimizer.param_groups().iter().enumerate() {
        for (i, param) in group.params.iter().enumerate() {
            let key = param_key(g, i);
            if let Some(saved) = dict.state.get(&key) {
                saved.hat_g.expect_shape(&key, param.shape())?;
                saved.v.expect_shape(&key, param.shape())?;
                let state = ParamState {
                    step: saved.step,
                    hat_g: saved.hat_g.to_ndarray()?,
                    v: saved.v.to_ndarray()?,
                };
                restored.push((param.clone(), state));
            }
            known.insert(key);
        }
    }
    if let Some(key) = dict.state.keys().find(|k| !known.contains(*k)) {
        return Err(SerializationError::UnexpectedKey(key.clone()));
    }

    let store = optimizer.state_mut();
    store.reset();
    for (param, state) in restored {
        store.insert(&param, state);
    }
    Ok(())
}

pub fn save_optimizer<P: AsRef<Path>>(
    optimizer: &FastAdaBelief,
    path: P,
) -> Result<(), SerializationError> {
    let writer = BufWriter::new(File::create(path.as_ref())?);
    bincode::serialize_into(writer, &optimizer_state_dict(optimizer))?;
    Ok(())
}

pub fn load_optimizer<P: AsRef<Path>>(
    optimizer: &mut FastAdaBelief,
    path: P,
) -> Result<(), SerializationError> {
    let reader = BufReader::new(File::open(path.as_ref())?);
    let dict: OptimizerStateDict = bincode::deserialize_from(reader)?;
    load_optimizer_state_dict(optimizer, &dict)
}
