//! # AdaBelief Optimizer
//!
//! Adam with the second moment replaced by the EMA of `(g - m)^2`, the
//! "belief" in the current gradient. Both moments are bias corrected.

use super::{ensure_distinct, ensure_same_shape, invalid, Optimizer, StateStore};
use crate::tensor::{Tensor, TensorData, TensorError};
use log::debug;
use ndarray::{ArrayD, IxDyn, Zip};
use serde::{Deserialize, Serialize};

/// Hyperparameters for [`AdaBelief`].
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AdaBeliefConfig {
    pub lr: TensorData,
    pub betas: (TensorData, TensorData),
    pub eps: TensorData,
    /// L2 penalty added to the gradient.
    pub weight_decay: TensorData,
    /// Divide by the running maximum of the belief instead of its EMA.
    pub amsgrad: bool,
}

impl Default for AdaBeliefConfig {
    fn default() -> Self {
        AdaBeliefConfig {
            lr: 1e-3,
            betas: (0.9, 0.999),
            eps: 1e-16,
            weight_decay: 0.0,
            amsgrad: false,
        }
    }
}

impl AdaBeliefConfig {
    pub fn validate(&self) -> Result<(), TensorError> {
        if !(self.lr >= 0.0) {
            return Err(invalid(format!("learning rate must be >= 0, got {}", self.lr)));
        }
        if !(self.eps >= 0.0) {
            return Err(invalid(format!("eps must be >= 0, got {}", self.eps)));
        }
        let (beta1, beta2) = self.betas;
        if !(0.0..1.0).contains(&beta1) || !(0.0..1.0).contains(&beta2) {
            return Err(invalid(format!("betas must lie in [0, 1), got {:?}", self.betas)));
        }
        if !(self.weight_decay >= 0.0) {
            return Err(invalid(format!(
                "weight_decay must be >= 0, got {}",
                self.weight_decay
            )));
        }
        Ok(())
    }
}

#[derive(Clone, Debug)]
struct BeliefState {
    step: u64,
    exp_avg: ArrayD<TensorData>,
    exp_avg_belief: ArrayD<TensorData>,
    max_exp_avg_belief: Option<ArrayD<TensorData>>,
}

/// AdaBelief (Zhuang et al., 2020) over a flat parameter list.
pub struct AdaBelief {
    params: Vec<Tensor>,
    config: AdaBeliefConfig,
    state: StateStore<BeliefState>,
}

impl AdaBelief {
    pub fn new<I>(params: I, config: AdaBeliefConfig) -> Result<Self, TensorError>
    where
        I: IntoIterator<Item = Tensor>,
    {
        config.validate()?;
        let params: Vec<Tensor> = params.into_iter().collect();
        ensure_distinct(&params)?;
        debug!(
            "AdaBelief: lr={} betas={:?} eps={} amsgrad={}",
            config.lr, config.betas, config.eps, config.amsgrad
        );
        Ok(AdaBelief {
            params,
            config,
            state: StateStore::new(),
        })
    }

    /// Steps taken so far for `param`, or `None` before its first update.
    pub fn step_count(&self, param: &Tensor) -> Option<u64> {
        self.state.get(param).map(|s| s.step)
    }
}

impl Optimizer for AdaBelief {
    fn step(&mut self) -> Result<(), TensorError> {
        let AdaBeliefConfig {
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
            let state = self.state.get_or_init(param, |p| BeliefState {
                step: 0,
                exp_avg: ArrayD::zeros(IxDyn(p.shape())),
                exp_avg_belief: ArrayD::zeros(IxDyn(p.shape())),
                max_exp_avg_belief: amsgrad.then(|| ArrayD::zeros(IxDyn(p.shape()))),
            });

            state.step += 1;
            let bias_correction1 = 1.0 - beta1.powi(state.step as i32);
            let bias_correction2 = 1.0 - beta2.powi(state.step as i32);
            let step_size = lr / bias_correction1;
            let bc2_sqrt = bias_correction2.sqrt();

            Zip::from(&*data)
                .and(grad)
                .and(&mut state.exp_avg)
                .and(&mut state.exp_avg_belief)
                .for_each(|&p, &g, m, s| {
                    let g = if weight_decay != 0.0 { g + weight_decay * p } else { g };
                    *m = beta1 * *m + (1.0 - beta1) * g;
                    let belief = g - *m;
                    *s = beta2 * *s + (1.0 - beta2) * belief * belief;
                });

            let belief = match state.max_exp_avg_belief.as_mut() {
                Some(max_s) => {
                    Zip::from(&mut *max_s)
                        .and(&state.exp_avg_belief)
                        .for_each(|max, &s| *max = max.max(s));
                    &*max_s
                }
                None => &state.exp_avg_belief,
            };

            Zip::from(&mut *data)
                .and(&state.exp_avg)
                .and(belief)
                .for_each(|p, &m, &s| {
                    *p -= step_size * m / (s.sqrt() / bc2_sqrt + eps);
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

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::arr1;

    #[test]
    fn first_step_matches_hand_computation() {
        // m = 0.2, s = 0.001 * 1.8^2; corrected: m = 2, sqrt(s) = 1.8
        let p = Tensor::from_vec(&[1], vec![1.0], true).unwrap();
        p.set_grad(arr1(&[2.0]).into_dyn()).unwrap();
        let mut opt = AdaBelief::new([p.clone()], AdaBeliefConfig::default()).unwrap();
        opt.step().unwrap();

        assert_eq!(opt.step_count(&p), Some(1));
        assert_relative_eq!(p.data()[[0]], 1.0 - 1e-3 * 2.0 / 1.8, epsilon = 1e-6);
    }

    #[test]
    fn constant_gradient_keeps_moving_the_parameter() {
        let p = Tensor::from_vec(&[2], vec![0.0, 0.0], true).unwrap();
        p.set_grad(arr1(&[1.0, -1.0]).into_dyn()).unwrap();
        let config = AdaBeliefConfig {
            amsgrad: true,
            ..Default::default()
        };
        let mut opt = AdaBelief::new([p.clone()], config).unwrap();
        for _ in 0..5 {
            opt.step().unwrap();
        }
        assert!(p.data()[[0]] < 0.0);
        assert!(p.data()[[1]] > 0.0);
        assert_eq!(opt.step_count(&p), Some(5));
    }

    #[test]
    fn missing_gradient_is_skipped() {
        let p = Tensor::from_vec(&[1], vec![3.0], true).unwrap();
        let mut opt = AdaBelief::new([p.clone()], AdaBeliefConfig::default()).unwrap();
        opt.step().unwrap();
        assert_eq!(p.data()[[0]], 3.0);
        assert_eq!(opt.step_count(&p), None);
    }

    #[test]
    fn rejects_repeated_parameter() {
        let p = Tensor::from_vec(&[1], vec![1.0], true).unwrap();
        let err = AdaBelief::new([p.clone(), p], AdaBeliefConfig::default()).err();
        assert!(matches!(err, Some(TensorError::InvalidConfig(_))));
    }
}
