//! Differentiable negative Sharpe objective.
//!
//! For positions `p` and realized returns `y` of identical shape the loss is
//!
//! ```text
//! -( E[p·y] / sqrt(E[(p·y)²] - E[p·y]² + ε) ) * sqrt(A)
//! ```
//!
//! reduced over every element. The weighted form replaces each expectation with
//! a mask-weighted average so padded cells do not contribute.

use candle_core::{Tensor, D};

use crate::candle_backend::scalar_to_f64;
use crate::sharpe::StabilityConfig;
use crate::{Result, TensorError};

/// Negative annualized Sharpe ratio of captured returns.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct SharpeLoss {
    output_size: usize,
    stability: StabilityConfig,
}

impl Default for SharpeLoss {
    fn default() -> Self {
        Self::new(1)
    }
}

impl SharpeLoss {
    /// Creates the objective for `output_size` position channels.
    pub fn new(output_size: usize) -> Self {
        Self {
            output_size,
            stability: StabilityConfig::default(),
        }
    }

    /// Replaces the numeric constants.
    pub fn with_stability(mut self, stability: StabilityConfig) -> Self {
        self.stability = stability;
        self
    }

    /// Number of position channels the objective expects.
    pub fn output_size(&self) -> usize {
        self.output_size
    }

    /// Numeric constants in use.
    pub fn stability(&self) -> &StabilityConfig {
        &self.stability
    }

    /// Loss over all elements; every cell is assumed valid.
    pub fn compute(&self, positions: &Tensor, returns: &Tensor) -> Result<Tensor> {
        check_same_shape(positions, returns)?;
        let captured = positions.mul(returns)?;
        let mean = captured.mean_all()?;
        let mean_sq = captured.sqr()?.mean_all()?;
        self.finish(mean, mean_sq)
    }

    /// Loss over the cells selected by `weights`.
    ///
    /// `weights` is either `(batch, time)`, broadcast across channels, or the
    /// full shape of `positions`. An all-zero mask yields a zero loss.
    pub fn weighted(&self, positions: &Tensor, returns: &Tensor, weights: &Tensor) -> Result<Tensor> {
        check_same_shape(positions, returns)?;
        let weights = if weights.dims() == positions.dims() {
            weights.clone()
        } else if positions.rank() == weights.rank() + 1
            && positions.dims()[..weights.rank()] == *weights.dims()
        {
            weights.unsqueeze(D::Minus1)?.broadcast_as(positions.shape())?
        } else {
            return Err(TensorError::ShapeMismatch {
                expected: positions.dims().to_vec(),
                got: weights.dims().to_vec(),
            });
        };
        let weights = weights.to_dtype(positions.dtype())?.detach();
        let total = scalar_to_f64(&weights.sum_all()?)?;
        // weighted sums are zero when nothing is active
        let total = if total > 0.0 { total } else { 1.0 };

        let captured = positions.mul(returns)?;
        let mean = (captured.mul(&weights)?.sum_all()? / total)?;
        let mean_sq = (captured.sqr()?.mul(&weights)?.sum_all()? / total)?;
        self.finish(mean, mean_sq)
    }

    fn finish(&self, mean: Tensor, mean_sq: Tensor) -> Result<Tensor> {
        let variance = mean_sq.sub(&mean.sqr()?)?;
        let scale = (variance + self.stability.epsilon)?.sqrt()?;
        let sharpe = (mean.div(&scale)? * self.stability.annualization.sqrt())?;
        Ok(sharpe.neg()?)
    }
}

fn check_same_shape(a: &Tensor, b: &Tensor) -> Result<()> {
    if a.dims() != b.dims() {
        return Err(TensorError::ShapeMismatch {
            expected: a.dims().to_vec(),
            got: b.dims().to_vec(),
        });
    }
    Ok(())
}

#[cfg(test)]
mod tests {
    use super::*;
    use candle_core::{DType, Device, Var};

    fn tensor(values: &[f32], shape: (usize, usize, usize)) -> Tensor {
        Tensor::from_vec(values.to_vec(), shape, &Device::Cpu).unwrap()
    }

    fn value(t: &Tensor) -> f64 {
        scalar_to_f64(t).unwrap()
    }

    fn reference(captured: &[f64]) -> f64 {
        let n = captured.len() as f64;
        let m = captured.iter().sum::<f64>() / n;
        let m2 = captured.iter().map(|x| x * x).sum::<f64>() / n;
        -(m / (m2 - m * m + 1e-9).sqrt()) * 252f64.sqrt()
    }

    #[test]
    fn test_matches_moment_formula() {
        let p = [1.0, 0.5, -1.0, 0.25, 1.0, -0.5];
        let y = [0.01, -0.02, 0.03, 0.01, 0.02, -0.01];
        let loss = SharpeLoss::new(1)
            .compute(&tensor(&p, (2, 3, 1)), &tensor(&y, (2, 3, 1)))
            .unwrap();
        let captured: Vec<f64> = p.iter().zip(&y).map(|(a, b)| (a * b) as f64).collect();
        assert!((value(&loss) - reference(&captured)).abs() < 1e-3);
    }

    #[test]
    fn test_constant_captured_returns_stay_finite() {
        let p = [1.0f32; 6];
        let y = [0.01f32; 6];
        let loss = SharpeLoss::new(1)
            .compute(&tensor(&p, (3, 2, 1)), &tensor(&y, (3, 2, 1)))
            .unwrap();
        let v = value(&loss);
        assert!(v.is_finite());
        assert!(v.abs() <= 0.01 / 1e-9f64.sqrt() * 252f64.sqrt() * 1.01);
    }

    #[test]
    fn test_multiple_output_channels_reduce_over_all_elements() {
        let p = [1.0, -1.0, 0.5, 0.5];
        let y = [0.02, 0.01, -0.01, 0.03];
        let loss = SharpeLoss::new(2)
            .compute(&tensor(&p, (1, 2, 2)), &tensor(&y, (1, 2, 2)))
            .unwrap();
        let captured: Vec<f64> = p.iter().zip(&y).map(|(a, b)| (a * b) as f64).collect();
        assert!((value(&loss) - reference(&captured)).abs() < 1e-3);
    }

    #[test]
    fn test_weighted_with_full_mask_equals_unweighted() {
        let p = [0.9, 0.1, 0.4, 0.7];
        let y = [0.01, -0.02, 0.005, 0.02];
        let pt = tensor(&p, (2, 2, 1));
        let yt = tensor(&y, (2, 2, 1));
        let ones = Tensor::ones((2, 2), DType::F32, &Device::Cpu).unwrap();
        let loss = SharpeLoss::new(1);
        let a = value(&loss.compute(&pt, &yt).unwrap());
        let b = value(&loss.weighted(&pt, &yt, &ones).unwrap());
        assert!((a - b).abs() < 1e-4);
    }

    #[test]
    fn test_weighted_ignores_masked_cells() {
        let p = [1.0, 1.0, 1.0, 50.0];
        let y = [0.01, -0.02, 0.03, 9.0];
        let mask = Tensor::from_vec(vec![1f32, 1.0, 1.0, 0.0], (2, 2), &Device::Cpu).unwrap();
        let loss = SharpeLoss::new(1)
            .weighted(&tensor(&p, (2, 2, 1)), &tensor(&y, (2, 2, 1)), &mask)
            .unwrap();
        assert!((value(&loss) - reference(&[0.01, -0.02, 0.03])).abs() < 1e-3);
    }

    #[test]
    fn test_fractional_mask_is_a_true_weighted_mean() {
        let p = [1.0, 1.0, 1.0, 50.0];
        let y = [0.01, -0.02, 0.03, 9.0];
        let mask = Tensor::from_vec(vec![0.1f32, 0.1, 0.1, 0.0], (2, 2), &Device::Cpu).unwrap();
        let loss = SharpeLoss::new(1)
            .weighted(&tensor(&p, (2, 2, 1)), &tensor(&y, (2, 2, 1)), &mask)
            .unwrap();
        assert!((value(&loss) - reference(&[0.01, -0.02, 0.03])).abs() < 1e-3);
    }

    #[test]
    fn test_all_inactive_mask_degrades_to_zero() {
        let p = [1.0f32; 4];
        let y = [0.01f32; 4];
        let mask = Tensor::zeros((2, 2), DType::F32, &Device::Cpu).unwrap();
        let loss = SharpeLoss::new(1)
            .weighted(&tensor(&p, (2, 2, 1)), &tensor(&y, (2, 2, 1)), &mask)
            .unwrap();
        assert_eq!(value(&loss), 0.0);
    }

    #[test]
    fn test_shape_mismatch() {
        let loss = SharpeLoss::new(1);
        let err = loss
            .compute(&tensor(&[1.0; 4], (2, 2, 1)), &tensor(&[1.0; 4], (1, 4, 1)))
            .unwrap_err();
        assert!(matches!(err, TensorError::ShapeMismatch { .. }));
    }

    #[test]
    fn test_objective_is_differentiable() {
        let positions = Var::from_tensor(&tensor(&[0.2, 0.4, 0.6, 0.8], (1, 4, 1))).unwrap();
        let returns = tensor(&[0.01, -0.02, 0.03, 0.01], (1, 4, 1));
        let loss = SharpeLoss::new(1)
            .compute(positions.as_tensor(), &returns)
            .unwrap();
        let grads = loss.backward().unwrap();
        let grad = grads.get(positions.as_tensor()).unwrap();
        let values = grad.flatten_all().unwrap().to_vec1::<f32>().unwrap();
        assert_eq!(values.len(), 4);
        assert!(values.iter().all(|g| g.is_finite()));
        assert!(values.iter().any(|g| *g != 0.0));
    }
}
