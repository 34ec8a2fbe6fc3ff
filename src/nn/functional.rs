//! # Neural Network Functional Interface (`nn::functional`)
//!
//! Stateless row-wise operations on `(N, C)` batches, with the closed-form
//! derivatives the layers and losses need.

use crate::tensor::{TensorData, TensorError};
use ndarray::{Array1, Array2, Axis, Zip};

// --- Activation Functions ---

/// Applies the Rectified Linear Unit (ReLU) function element-wise.
/// `relu(x) = max(0, x)`
pub fn relu(input: &Array2<TensorData>) -> Array2<TensorData> {
    input.mapv(|x| x.max(0.0))
}

/// Gradient of `relu` at `input`, given the gradient of its output.
pub fn relu_backward(
    input: &Array2<TensorData>,
    grad_output: &Array2<TensorData>,
) -> Result<Array2<TensorData>, TensorError> {
    check_same(input, grad_output, "relu_backward")?;
    let mut grad = grad_output.clone();
    Zip::from(&mut grad).and(input).for_each(|g, &x| {
        if x <= 0.0 {
            *g = 0.0;
        }
    });
    Ok(grad)
}

/// Row-wise LogSoftmax in the stable form `x - max(x) - log(sum(exp(x - max(x))))`.
pub fn log_softmax(input: &Array2<TensorData>) -> Array2<TensorData> {
    let mut out = input.clone();
    for mut row in out.axis_iter_mut(Axis(0)) {
        let max = row.fold(TensorData::NEG_INFINITY, |m, &x| m.max(x));
        let log_sum_exp = row.iter().map(|&x| (x - max).exp()).sum::<TensorData>().ln();
        row.mapv_inplace(|x| x - max - log_sum_exp);
    }
    out
}

/// Row-wise Softmax.
pub fn softmax(input: &Array2<TensorData>) -> Array2<TensorData> {
    log_softmax(input).mapv_into(TensorData::exp)
}

// --- Loss Functions ---

/// Mean cross entropy of `logits` against class indices, and its gradient
/// with respect to the logits: `(softmax(logits) - one_hot(target)) / N`.
pub fn cross_entropy_with_grad(
    logits: &Array2<TensorData>,
    target: &Array1<usize>,
) -> Result<(TensorData, Array2<TensorData>), TensorError> {
    check_targets(logits, target, "cross_entropy")?;
    let n = logits.nrows();
    let log_probs = log_softmax(logits);

    let total: f64 = target
        .iter()
        .enumerate()
        .map(|(i, &y)| -(log_probs[[i, y]] as f64))
        .sum();

    let mut grad = log_probs.mapv_into(TensorData::exp);
    for (i, &y) in target.iter().enumerate() {
        grad[[i, y]] -= 1.0;
    }
    grad /= n as TensorData;

    Ok(((total / n as f64) as TensorData, grad))
}

/// Mean squared error between `logits` and one-hot targets, and its gradient.
pub fn mse_with_grad(
    logits: &Array2<TensorData>,
    target: &Array1<usize>,
) -> Result<(TensorData, Array2<TensorData>), TensorError> {
    check_targets(logits, target, "mse")?;
    let mut diff = logits.clone();
    for (i, &y) in target.iter().enumerate() {
        diff[[i, y]] -= 1.0;
    }

    let len = diff.len() as TensorData;
    let loss = diff.iter().map(|&d| (d * d) as f64).sum::<f64>() / len as f64;
    let grad = diff * (2.0 / len);
    Ok((loss as TensorData, grad))
}

/// Number of rows whose arg-max equals the target class.
pub fn num_correct(logits: &Array2<TensorData>, target: &Array1<usize>) -> usize {
    logits
        .axis_iter(Axis(0))
        .zip(target.iter())
        .filter(|(row, y)| argmax(row.iter().copied()) == Some(**y))
        .count()
}

fn argmax<I: Iterator<Item = TensorData>>(values: I) -> Option<usize> {
    values
        .enumerate()
        .fold(None, |best: Option<(usize, TensorData)>, (i, x)| match best {
            Some((_, b)) if b >= x => best,
            _ => Some((i, x)),
        })
        .map(|(i, _)| i)
}

fn check_same(
    a: &Array2<TensorData>,
    b: &Array2<TensorData>,
    op: &str,
) -> Result<(), TensorError> {
    if a.shape() != b.shape() {
        return Err(TensorError::IncompatibleShapes {
            op: op.to_string(),
            shape1: a.shape().to_vec(),
            shape2: b.shape().to_vec(),
        });
    }
    Ok(())
}

fn check_targets(
    logits: &Array2<TensorData>,
    target: &Array1<usize>,
    op: &str,
) -> Result<(), TensorError> {
    if logits.nrows() == 0 {
        return Err(TensorError::EmptyBatch);
    }
    if logits.nrows() != target.len() {
        return Err(TensorError::IncompatibleShapes {
            op: op.to_string(),
            shape1: logits.shape().to_vec(),
            shape2: target.shape().to_vec(),
        });
    }
    let classes = logits.ncols();
    if let Some((i, &y)) = target.iter().enumerate().find(|(_, y)| **y >= classes) {
        return Err(TensorError::IndexOutOfBounds {
            index: vec![i, y],
            shape: logits.shape().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use approx::assert_relative_eq;
    use ndarray::{arr1, arr2};

    #[test]
    fn softmax_rows_sum_to_one_for_large_logits() {
        let probs = softmax(&arr2(&[[1000.0, 1000.0], [0.0, -1000.0]]));
        assert_relative_eq!(probs[[0, 0]], 0.5, epsilon = 1e-6);
        assert_relative_eq!(probs.row(1).sum(), 1.0, epsilon = 1e-6);
    }

    #[test]
    fn cross_entropy_of_uniform_logits_is_log_classes() {
        let (loss, grad) =
            cross_entropy_with_grad(&Array2::zeros((2, 4)), &arr1(&[0, 3])).unwrap();
        assert_relative_eq!(loss, (4.0 as TensorData).ln(), epsilon = 1e-6);
        assert_relative_eq!(grad[[0, 0]], (0.25 - 1.0) / 2.0, epsilon = 1e-6);
        assert_relative_eq!(grad[[0, 1]], 0.25 / 2.0, epsilon = 1e-6);
    }

    #[test]
    fn cross_entropy_gradient_matches_finite_difference() {
        let logits = arr2(&[[0.2, -0.4, 1.1], [0.5, 0.3, -0.8]]);
        let target = arr1(&[2, 0]);
        let (_, grad) = cross_entropy_with_grad(&logits, &target).unwrap();

        let h = 1e-2;
        for i in 0..2 {
            for j in 0..3 {
                let mut plus = logits.clone();
                let mut minus = logits.clone();
                plus[[i, j]] += h;
                minus[[i, j]] -= h;
                let (lp, _) = cross_entropy_with_grad(&plus, &target).unwrap();
                let (lm, _) = cross_entropy_with_grad(&minus, &target).unwrap();
                assert_relative_eq!((lp - lm) / (2.0 * h), grad[[i, j]], epsilon = 1e-3);
            }
        }
    }

    #[test]
    fn rejects_out_of_range_labels() {
        let err = cross_entropy_with_grad(&Array2::zeros((1, 3)), &arr1(&[3])).unwrap_err();
        assert!(matches!(err, TensorError::IndexOutOfBounds { .. }));
    }

    #[test]
    fn rejects_empty_batch() {
        let err = mse_with_grad(&Array2::zeros((0, 3)), &arr1(&[])).unwrap_err();
        assert!(matches!(err, TensorError::EmptyBatch));
    }

    #[test]
    fn relu_backward_masks_non_positive_inputs() {
        let x = arr2(&[[-1.0, 0.0, 2.0]]);
        let g = relu_backward(&x, &arr2(&[[5.0, 5.0, 5.0]])).unwrap();
        assert_eq!(g, arr2(&[[0.0, 0.0, 5.0]]));
        assert_eq!(relu(&x), arr2(&[[0.0, 0.0, 2.0]]));
    }

    #[test]
    fn counts_correct_predictions() {
        let logits = arr2(&[[0.1, 0.9], [0.8, 0.2], [0.3, 0.7]]);
        assert_eq!(num_correct(&logits, &arr1(&[1, 0, 0])), 2);
    }
}
