//! # FastAdaBelief Optimizer
//!
//! An AdaBelief-style method without bias correction. The second moment tracks
//! the variance of the gradient around its own EMA with a step-dependent decay
//! `beta_2(t) = 1 - gamma / t`, and the step is divided by `t * v + delta`.
//!
//! For every parameter with a gradient, at step `t`:
//!
//! ```text
//! g     = grad + weight_decay * p            (when weight_decay != 0)
//! hat_g = beta_1 * hat_g + (1 - beta_1) * g
//! v     = beta_2(t) * v + (1 - beta_2(t)) * (g - hat_g)^2
//! p     = p - lr * hat_g / (t * v + delta)
//! ```

use super::{ensure_distinct, ensure_same_shape, invalid, Optimizer, ParamGroup, StateStore};
use crate::tensor::{Tensor, TensorData, TensorError};
use log::{debug, trace};
use ndarray::{ArrayD, IxDyn, Zip};
use serde::{Deserialize, Serialize};

/// Hyperparameters of one FastAdaBelief parameter group.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastAdaBeliefConfig {
    pub lr: TensorData,
    /// Decay of the gradient EMA.
    pub beta_1: TensorData,
    /// Floor of the denominator. Must be strictly positive.
    pub delta: TensorData,
    /// Accepted for compatibility; not read by the update rule.
    pub xi_1: TensorData,
    /// Accepted for compatibility; not read by the update rule.
    pub xi_2: TensorData,
    /// Shape of the variance decay `beta_2(t) = 1 - gamma / t`.
    pub gamma: TensorData,
    pub weight_decay: TensorData,
}

impl Default for FastAdaBeliefConfig {
    fn default() -> Self {
        FastAdaBeliefConfig {
            lr: 0.01,
            beta_1: 0.9,
            delta: 1e-2,
            xi_1: 0.1,
            xi_2: 0.1,
            gamma: 0.9,
            weight_decay: 1e-2,
        }
    }
}

impl FastAdaBeliefConfig {
    pub fn with_lr(lr: TensorData) -> Self {
        FastAdaBeliefConfig {
            lr,
            ..Default::default()
        }
    }

    /// Rejects hyperparameters the recurrence cannot run with.
    pub fn validate(&self) -> Result<(), TensorError> {
        if !(self.lr >= 0.0) {
            return Err(invalid(format!("learning rate must be >= 0, got {}", self.lr)));
        }
        if !(self.delta > 0.0) {
            return Err(invalid(format!("delta must be > 0, got {}", self.delta)));
        }
        if !(0.0..1.0).contains(&self.beta_1) {
            return Err(invalid(format!("beta_1 must be in [0, 1), got {}", self.beta_1)));
        }
        if !(self.gamma > 0.0 && self.gamma <= 1.0) {
            return Err(invalid(format!("gamma must be in (0, 1], got {}", self.gamma)));
        }
        if !(self.weight_decay >= 0.0) {
            return Err(invalid(format!(
                "weight_decay must be >= 0, got {}",
                self.weight_decay
            )));
        }
        Ok(())
    }

    /// Variance decay at step `t` (1-based).
    pub fn beta_2(&self, t: u64) -> TensorData {
        1.0 - self.gamma / t as TensorData
    }
}

/// Per-group replacements for the optimizer defaults.
#[derive(Debug, Clone, Copy, Default, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct FastAdaBeliefOverrides {
    pub lr: Option<TensorData>,
    pub beta_1: Option<TensorData>,
    pub delta: Option<TensorData>,
    pub gamma: Option<TensorData>,
    pub weight_decay: Option<TensorData>,
}

impl FastAdaBeliefOverrides {
    pub fn apply(&self, base: &FastAdaBeliefConfig) -> FastAdaBeliefConfig {
        FastAdaBeliefConfig {
            lr: self.lr.unwrap_or(base.lr),
            beta_1: self.beta_1.unwrap_or(base.beta_1),
            delta: self.delta.unwrap_or(base.delta),
            gamma: self.gamma.unwrap_or(base.gamma),
            weight_decay: self.weight_decay.unwrap_or(base.weight_decay),
            ..*base
        }
    }
}

/// State kept for each parameter after its first update.
#[derive(Debug, Clone, PartialEq)]
pub struct ParamState {
    pub step: u64,
    /// EMA of the gradient.
    pub hat_g: ArrayD<TensorData>,
    /// EMA of the squared deviation of the gradient from `hat_g`.
    pub v: ArrayD<TensorData>,
}

impl ParamState {
    pub fn zeros(shape: &[usize]) -> Self {
        ParamState {
            step: 0,
            hat_g: ArrayD::zeros(IxDyn(shape)),
            v: ArrayD::zeros(IxDyn(shape)),
        }
    }
}

/// Applies one FastAdaBelief step to `param` in place.
///
/// Shapes are checked before anything is touched, so a mismatch leaves both
/// `param` and `state` (including the step counter) unchanged.
pub fn update(
    param: &mut ArrayD<TensorData>,
    grad: &ArrayD<TensorData>,
    state: &mut ParamState,
    config: &FastAdaBeliefConfig,
) -> Result<(), TensorError> {
    ensure_same_shape(param, grad)?;
    ensure_same_shape(param, &state.hat_g)?;
    ensure_same_shape(param, &state.v)?;

    state.step += 1;
    let t = state.step as TensorData;
    let beta_1 = config.beta_1;
    let beta_2 = config.beta_2(state.step);
    let lr = config.lr;
    let delta = config.delta;
    let weight_decay = config.weight_decay;

    Zip::from(param)
        .and(grad)
        .and(&mut state.hat_g)
        .and(&mut state.v)
        .for_each(|p, &g, hat_g, v| {
            let g = if weight_decay != 0.0 {
                g + weight_decay * *p
            } else {
                g
            };
            *hat_g = beta_1 * *hat_g + (1.0 - beta_1) * g;
            let dev = g - *hat_g;
            *v = beta_2 * *v + (1.0 - beta_2) * dev * dev;
            let denom = t * *v + delta;
            *p += -lr * *hat_g * denom.recip();
        });

    Ok(())
}

/// FastAdaBelief over one or more parameter groups.
pub struct FastAdaBelief {
    groups: Vec<ParamGroup<FastAdaBeliefConfig>>,
    defaults: FastAdaBeliefConfig,
    state: StateStore<ParamState>,
}

impl FastAdaBelief {
    /// Creates an optimizer with a single parameter group.
    pub fn new<I>(params: I, config: FastAdaBeliefConfig) -> Result<Self, TensorError>
    where
        I: IntoIterator<Item = Tensor>,
    {
        config.validate()?;
        let mut optimizer = FastAdaBelief {
            groups: Vec::new(),
            defaults: config,
            state: StateStore::new(),
        };
        optimizer.add_param_group(params, FastAdaBeliefOverrides::default())?;
        debug!(
            "FastAdaBelief: lr={} beta_1={} delta={} gamma={} weight_decay={}",
            config.lr, config.beta_1, config.delta, config.gamma, config.weight_decay
        );
        Ok(optimizer)
    }

    /// Appends a group whose hyperparameters are the defaults with
    /// `overrides` applied. A parameter may belong to one group only.
    pub fn add_param_group<I>(
        &mut self,
        params: I,
        overrides: FastAdaBeliefOverrides,
    ) -> Result<(), TensorError>
    where
        I: IntoIterator<Item = Tensor>,
    {
        let options = overrides.apply(&self.defaults);
        options.validate()?;

        let group = ParamGroup::new(params, options);
        ensure_distinct(
            self.groups
                .iter()
                .chain(std::iter::once(&group))
                .flat_map(|g| g.params.iter()),
        )?;

        self.groups.push(group);
        Ok(())
    }

    pub fn param_groups(&self) -> &[ParamGroup<FastAdaBeliefConfig>] {
        &self.groups
    }

    pub fn defaults(&self) -> &FastAdaBeliefConfig {
        &self.defaults
    }

    pub fn state(&self) -> &StateStore<ParamState> {
        &self.state
    }

    pub(crate) fn state_mut(&mut self) -> &mut StateStore<ParamState> {
        &mut self.state
    }

    /// State recorded for `param`, if it has been updated at least once.
    pub fn state_for(&self, param: &Tensor) -> Option<&ParamState> {
        self.state.get(param)
    }
}

impl Optimizer for FastAdaBelief {
    fn step(&mut self) -> Result<(), TensorError> {
        let FastAdaBelief { groups, state, .. } = self;

        for group in groups.iter() {
            for param in &group.params {
                if !param.requires_grad {
                    continue;
                }
                let grad_slot = param.grad_slot();
                let Some(grad) = grad_slot.as_ref() else {
                    trace!("skipping parameter {:#x}: no gradient", param.id());
                    continue;
                };

                let mut data = param.data_mut();
                // Checked here as well so a bad gradient never creates state.
                ensure_same_shape(&data, grad)?;
                let entry = state.get_or_init(param, |p| ParamState::zeros(p.shape()));
                update(&mut data, grad, entry, &group.options)?;
            }
        }
        Ok(())
    }

    fn zero_grad(&mut self) {
        for param in self.groups.iter().flat_map(|g| g.params.iter()) {
            param.zero_grad();
        }
    }

    fn reset_state(&mut self) {
        self.state.reset();
    }

    fn learning_rate(&self) -> TensorData {
        self.groups
            .first()
            .map(|g| g.options.lr)
            .unwrap_or(self.defaults.lr)
    }
}
