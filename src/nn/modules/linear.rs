//! # Linear Layer Module

use crate::nn::Module;
use crate::tensor::{uniform, Tensor, TensorData, TensorError};
use ndarray::{Array1, Array2, Axis, Ix1, Ix2};
use rand::Rng;
use std::collections::BTreeMap;

/// Applies a linear transformation to the incoming data: `y = xA^T + b`.
///
/// Input shape: `(N, in_features)`. Output shape: `(N, out_features)`.
#[derive(Debug)]
pub struct Linear {
    pub weight: Tensor,       // Shape: (out_features, in_features)
    pub bias: Option<Tensor>, // Shape: (out_features)

    in_features: usize,
    out_features: usize,
}

impl Linear {
    /// Creates a new Linear module.
    ///
    /// # Arguments
    /// * `in_features`: Size of each input sample.
    /// * `out_features`: Size of each output sample.
    /// * `bias`: Whether to include a bias term.
    /// * `rng`: Source for the initial values.
    ///
    /// Weight and bias are drawn from `U(-k, k)` with `k = 1/sqrt(in_features)`
    /// (Kaiming-uniform with a fan-in bound).
    pub fn new<R: Rng + ?Sized>(
        in_features: usize,
        out_features: usize,
        bias: bool,
        rng: &mut R,
    ) -> Self {
        let k = (1.0 / in_features.max(1) as TensorData).sqrt();
        let weight = uniform(&[out_features, in_features], -k, k, rng, true);
        let bias = bias.then(|| uniform(&[out_features], -k, k, rng, true));

        Linear {
            weight,
            bias,
            in_features,
            out_features,
        }
    }

    pub fn in_features(&self) -> usize {
        self.in_features
    }

    pub fn out_features(&self) -> usize {
        self.out_features
    }

    fn weight_2d(&self) -> Result<Array2<TensorData>, TensorError> {
        Ok(self.weight.data_clone().into_dimensionality::<Ix2>()?)
    }

    fn check_input(&self, input: &Array2<TensorData>) -> Result<(), TensorError> {
        if input.ncols() != self.in_features {
            return Err(TensorError::ShapeMismatch {
                expected: vec![input.nrows(), self.in_features],
                got: input.shape().to_vec(),
            });
        }
        Ok(())
    }
}

impl Module for Linear {
    fn forward(&self, input: &Array2<TensorData>) -> Result<Array2<TensorData>, TensorError> {
        self.check_input(input)?;
        let mut output = input.dot(&self.weight_2d()?.t());
        if let Some(ref bias) = self.bias {
            let bias = bias.data_clone().into_dimensionality::<Ix1>()?;
            output += &bias;
        }
        Ok(output)
    }

    /// `dW = g^T x`, `db = sum_rows(g)`, `dx = g W`.
    fn backward(
        &self,
        input: &Array2<TensorData>,
        grad_output: &Array2<TensorData>,
    ) -> Result<Array2<TensorData>, TensorError> {
        self.check_input(input)?;
        if grad_output.dim() != (input.nrows(), self.out_features) {
            return Err(TensorError::ShapeMismatch {
                expected: vec![input.nrows(), self.out_features],
                got: grad_output.shape().to_vec(),
            });
        }

        let weight = self.weight_2d()?;
        self.weight
            .accumulate_grad(&grad_output.t().dot(input).into_dyn())?;
        if let Some(ref bias) = self.bias {
            let db: Array1<TensorData> = grad_output.sum_axis(Axis(0));
            bias.accumulate_grad(&db.into_dyn())?;
        }
        Ok(grad_output.dot(&weight))
    }

    fn parameters(&self) -> BTreeMap<String, Tensor> {
        let mut params = BTreeMap::new();
        params.insert("weight".to_string(), self.weight.clone());
        if let Some(ref bias) = self.bias {
            params.insert("bias".to_string(), bias.clone());
        }
        params
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};
    use rand::{rngs::StdRng, SeedableRng};

    fn fixed_layer() -> Linear {
        let layer = Linear::new(2, 2, true, &mut StdRng::seed_from_u64(0));
        layer
            .weight
            .assign(&arr2(&[[1.0, 2.0], [3.0, 4.0]]).into_dyn())
            .unwrap();
        layer
            .bias
            .as_ref()
            .unwrap()
            .assign(&arr1(&[0.5, -0.5]).into_dyn())
            .unwrap();
        layer
    }

    #[test]
    fn init_is_bounded_by_fan_in() {
        let layer = Linear::new(16, 3, true, &mut StdRng::seed_from_u64(1));
        assert_eq!(layer.weight.shape(), &[3, 16]);
        assert!(layer.weight.data().iter().all(|w| w.abs() <= 0.25));
    }

    #[test]
    fn forward_applies_weight_and_bias() {
        let out = fixed_layer().forward(&arr2(&[[1.0, 1.0]])).unwrap();
        assert_eq!(out, arr2(&[[3.5, 6.5]]));
    }

    #[test]
    fn backward_writes_parameter_gradients() {
        let layer = fixed_layer();
        let x = arr2(&[[1.0, 2.0], [0.0, -1.0]]);
        let g = arr2(&[[1.0, 0.0], [0.5, 1.0]]);
        let dx = layer.backward(&x, &g).unwrap();

        let dw = layer.weight.grad().unwrap();
        assert_relative_eq!(dw[[0, 0]], 1.0);
        assert_relative_eq!(dw[[0, 1]], 1.5);
        assert_relative_eq!(dw[[1, 0]], 0.0);
        assert_relative_eq!(dw[[1, 1]], -1.0);
        assert_eq!(
            layer.bias.as_ref().unwrap().grad().unwrap(),
            arr1(&[1.5, 1.0]).into_dyn()
        );
        assert_eq!(dx, arr2(&[[1.0, 2.0], [3.5, 5.0]]));
    }

    #[test]
    fn rejects_wrong_input_width() {
        let err = fixed_layer().forward(&arr2(&[[1.0, 2.0, 3.0]])).unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    }
}
