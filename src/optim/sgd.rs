//! # Stochastic Gradient Descent (SGD) Optimizer

use super::{ensure_distinct, ensure_same_shape, invalid, Optimizer, StateStore};
use crate::tensor::{Tensor, TensorData, TensorError};
use log::debug;
use ndarray::{ArrayD, Zip};
use serde::{Deserialize, Serialize};

/// Hyperparameters for [`SGD`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct SgdConfig {
    pub lr: TensorData,
    pub momentum: TensorData,
    pub dampening: TensorData,
    pub weight_decay: TensorData,
    pub nesterov: bool,
}

impl Default for SgdConfig {
    fn default() -> Self {
        SgdConfig {
            lr: 0.01,
            momentum: 0.0,
            dampening: 0.0,
            weight_decay: 0.0,
            nesterov: false,
        }
    }
}

impl SgdConfig {
    pub fn validate(&self) -> Result<(), TensorError> {
        if self.lr < 0.0 {
            return Err(invalid("Invalid learning rate: cannot be negative"));
        }
        if self.momentum < 0.0 {
            return Err(invalid("Invalid momentum value: cannot be negative"));
        }
        if self.weight_decay < 0.0 {
            return Err(invalid("Invalid weight_decay value: cannot be negative"));
        }
        if self.nesterov && (self.momentum <= 0.0 || self.dampening != 0.0) {
            return Err(invalid(
                "Nesterov momentum requires momentum > 0 and dampening = 0",
            ));
        }
        Ok(())
    }
}

/// Implements the Stochastic Gradient Descent optimizer.
/// Supports momentum, dampening, weight decay, and Nesterov momentum.
pub struct SGD {
    params: Vec<Tensor>,
    config: SgdConfig,
    momentum_buffers: StateStore<ArrayD<TensorData>>,
}

impl SGD {
    pub fn new<I>(params: I, config: SgdConfig) -> Result<Self, TensorError>
    where
        I: IntoIterator<Item = Tensor>,
    {
        config.validate()?;
        let params: Vec<Tensor> = params.into_iter().collect();
        ensure_distinct(&params)?;
        debug!(
            "SGD: lr={} momentum={} nesterov={}",
            config.lr, config.momentum, config.nesterov
        );
        Ok(SGD {
            params,
            config,
            momentum_buffers: StateStore::new(),
        })
    }

    /// Plain gradient descent with only a learning rate.
    pub fn simple<I>(params: I, lr: TensorData) -> Result<Self, TensorError>
    where
        I: IntoIterator<Item = Tensor>,
    {
        Self::new(
            params,
            SgdConfig {
                lr,
                ..Default::default()
            },
        )
    }
}

impl Optimizer for SGD {
    fn step(&mut self) -> Result<(), TensorError> {
        let SgdConfig {
            lr,
            momentum,
            dampening,
            weight_decay,
            nesterov,
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

            let mut d_p = grad.clone();
            if weight_decay != 0.0 {
                d_p.scaled_add(weight_decay, &*data);
            }

            if momentum != 0.0 {
                let mut first_touch = false;
                let buf = self.momentum_buffers.get_or_init(param, |_| {
                    first_touch = true;
                    d_p.clone()
                });
                if !first_touch {
                    Zip::from(&mut *buf)
                        .and(&d_p)
                        .for_each(|b, &g| *b = momentum * *b + (1.0 - dampening) * g);
                }

                if nesterov {
                    d_p.scaled_add(momentum, &*buf);
                } else {
                    d_p.assign(&*buf);
                }
            }

            data.scaled_add(-lr, &d_p);
        }
        Ok(())
    }

    fn zero_grad(&mut self) {
        for param in &self.params {
            param.zero_grad();
        }
    }

    fn reset_state(&mut self) {
        self.momentum_buffers.reset();
    }

    fn learning_rate(&self) -> TensorData {
        self.config.lr
    }
}
