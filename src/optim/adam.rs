//! # Adam Optimizer

use super::{ensure_distinct, ensure_same_shape, invalid, Optimizer, StateStore};
use crate::tensor::{Tensor, TensorData, TensorError};
use log::debug;
use ndarray::{ArrayD, IxDyn, Zip};
use serde::{Deserialize, Serialize};

/// Hyperparameters for [`Adam`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdamConfig {
    pub lr: TensorData,
    pub betas: (TensorData, TensorData),
    pub eps: TensorData,
    /// L2 penalty added to the gradient.
    pub weight_decay: TensorData,
    pub amsgrad: bool,
}

impl Default for AdamConfig {
    fn default() -> Self {
        AdamConfig {
            lr: 1e-3,
            betas: (0.9, 0.999),
            eps: 1e-8,
            weight_decay: 0.0,
            amsgrad: false,
        }
    }
}

impl AdamConfig {
    pub fn validate(&self) -> Result<(), TensorError> {
        if !(self.lr >= 0.0) {
            return Err(invalid("Invalid learning rate: must be >= 0"));
        }
        if !(self.eps >= 0.0) {
            return Err(invalid("Invalid epsilon value: must be >= 0"));
        }
        if !(0.0..1.0).contains(&self.betas.0) {
            return Err(invalid("Invalid beta parameter at index 0"));
        }
        if !(0.0..1.0).contains(&self.betas.1) {
            return Err(invalid("Invalid beta parameter at index 1"));
        }
        if !(self.weight_decay >= 0.0) {
            return Err(invalid("Invalid weight_decay value: must be >= 0"));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct AdamParamState {
    step: u64,
    exp_avg: ArrayD<TensorData>,
    exp_avg_sq: ArrayD<TensorData>,
    max_exp_avg_sq: Option<ArrayD<TensorData>>,
}

/// Implements the Adam algorithm.
/// Reference: Adam: A Method for Stochastic Optimization - https://arxiv.org/abs/1412.6980
pub struct Adam {
    params: Vec<Tensor>,
    config: AdamConfig,
    state: StateStore<AdamParamState>,
}

impl Adam {
    pub fn new<I>(params: I, config: AdamConfig) -> Result<Self, TensorError>
    where
        I: IntoIterator<Item = Tensor>,
    {
        config.validate()?;
        let params: Vec<Tensor> = params.into_iter().collect();
        ensure_distinct(&params)?;
        debug!(
            "Adam: lr={} betas={:?} eps={} weight_decay={} amsgrad={}",
            config.lr, config.betas, config.eps, config.weight_decay, config.amsgrad
        );
        Ok(Adam {
            params,
            config,
            state: StateStore::new(),
        })
    }
}

impl Optimizer for Adam {
    fn step(&mut self) -> Result<(), TensorError> {
        let AdamConfig {
            lr,
            betas: (beta1, beta2),
            eps,
            weight_decay,
            amsgrad,
        } = self.config;

        for param in &self.params {
            if !param.requires_grad {
                continue;
            }
            let grad_slot = param.grad_slot();
            let Some(grad) = grad_slot.as_ref() else {
                continue;
            };

            let mut data = param.data_mut();
            ensure_same_shape(&data, grad)?;
            let state = self.state.get_or_init(param, |p| AdamParamState {
                step: 0,
                exp_avg: ArrayD::zeros(IxDyn(p.shape())),
                exp_avg_sq: ArrayD::zeros(IxDyn(p.shape())),
                max_exp_avg_sq: amsgrad.then(|| ArrayD::zeros(IxDyn(p.shape()))),
            });

            state.step += 1;
            let bias_correction1 = 1.0 - beta1.powi(state.step as i32);
            let bias_correction2 = 1.0 - beta2.powi(state.step as i32);
            let step_size = lr / bias_correction1;
            let bc2_sqrt = bias_correction2.sqrt();

            let effective = |g: TensorData, p: TensorData| {
                if weight_decay != 0.0 {
                    g + weight_decay * p
                } else {
                    g
                }
            };

            Zip::from(&*data)
                .and(grad)
                .and(&mut state.exp_avg)
                .and(&mut state.exp_avg_sq)
                .for_each(|&p, &g, m, v| {
                    let g = effective(g, p);
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    *v = beta2 * *v + (1.0 - beta2) * g * g;
                });

            let second_moment = match state.max_exp_avg_sq.as_mut() {
                Some(max_v) => {
                    Zip::from(&mut *max_v)
                        .and(&state.exp_avg_sq)
                        .for_each(|max, &v| *max = max.max(v));
                    &*max_v
                }
                None => &state.exp_avg_sq,
            };

            Zip::from(&mut *data)
                .and(&state.exp_avg)
                .and(second_moment)
                .for_each(|p, &m, &v| {
                    let denom = v.sqrt() / bc2_sqrt + eps;
                    *p -= step_size * m / denom;
                });
        }
        Ok(())
    }

    fn zero_grad(&mut self) {
        for param in &self.params {
            param.zero_grad();
        }
    }

    fn reset_state(&mut self) {
        self.state.reset();
    }

    fn learning_rate(&self) -> TensorData {
        self.config.lr
    }
}
