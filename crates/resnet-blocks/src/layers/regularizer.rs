//! # L2 Kernel Regularization
//!
//! ``burn`` applies weight decay in its optimizers, uniformly over every
//! parameter. Residual blocks instead penalize only their convolution kernels:
//!
//! ```text
//! penalty = factor * sum(kernel ^ 2)
//! ```
//!
//! which a training step adds to its loss. Biases and normalization
//! parameters are never penalized.

use anyhow::bail;
use burn::module::Param;
use burn::nn::conv::Conv2d;
use burn::prelude::{Backend, Tensor};
use serde::{Deserialize, Serialize};

/// An L2 penalty on kernel weights.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct L2Regularizer {
    /// The penalty coefficient; `0.0` disables the penalty.
    pub factor: f64,
}

impl L2Regularizer {
    /// Create a new regularizer.
    ///
    /// # Errors
    ///
    /// If `factor` is negative or not finite.
    pub fn try_new(factor: f64) -> anyhow::Result<Self> {
        if !factor.is_finite() || factor < 0.0 {
            bail!("weight_decay must be a finite non-negative value: {factor}");
        }
        Ok(Self { factor })
    }

    /// Is the penalty disabled?
    pub fn is_zero(&self) -> bool {
        self.factor == 0.0
    }

    /// The penalty for a single weight tensor.
    ///
    /// # Returns
    ///
    /// A ``[1]`` tensor.
    pub fn penalty<B: Backend, const D: usize>(
        &self,
        weight: &Param<Tensor<B, D>>,
    ) -> Tensor<B, 1> {
        let weight = weight.val();
        if self.is_zero() {
            return Tensor::zeros([1], &weight.device());
        }
        weight.powf_scalar(2.0).sum().mul_scalar(self.factor)
    }

    /// The penalty for a conv layer's kernel; the bias is not penalized.
    pub fn conv_penalty<B: Backend>(
        &self,
        conv: &Conv2d<B>,
    ) -> Tensor<B, 1> {
        self.penalty(&conv.weight)
    }
}

/// Modules which contribute a regularization term to the training loss.
pub trait Regularized<B: Backend> {
    /// The summed L2 penalty over every penalized kernel.
    ///
    /// # Returns
    ///
    /// A ``[1]`` tensor.
    fn l2_penalty(&self) -> Tensor<B, 1>;
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;
    use burn::nn::conv::Conv2dConfig;

    type B = NdArray<f32>;

    #[test]
    fn test_try_new() {
        assert_eq!(L2Regularizer::try_new(1e-4).unwrap().factor, 1e-4);
        assert!(L2Regularizer::try_new(0.0).unwrap().is_zero());
        assert!(L2Regularizer::try_new(-1.0).is_err());
        assert!(L2Regularizer::try_new(f64::NAN).is_err());
        assert!(L2Regularizer::try_new(f64::INFINITY).is_err());
    }

    #[test]
    fn test_penalty() {
        let device = Default::default();
        let weight: Param<Tensor<B, 2>> =
            Param::from_tensor(Tensor::from_data([[1.0, -2.0], [3.0, 0.5]], &device));

        let penalty = L2Regularizer::try_new(0.5).unwrap().penalty(&weight);
        assert_eq!(penalty.dims(), [1]);
        // 0.5 * (1 + 4 + 9 + 0.25)
        let value: f32 = penalty.into_scalar();
        assert!((value - 7.125).abs() < 1e-5);
    }

    #[test]
    fn test_zero_penalty() {
        let device = Default::default();
        let conv = Conv2dConfig::new([2, 3], [3, 3]).init::<B>(&device);
        let penalty = L2Regularizer::default().conv_penalty(&conv);
        assert_eq!(penalty.into_scalar(), 0.0);
    }

    #[test]
    fn test_conv_penalty_ignores_bias() {
        let device = Default::default();
        let conv = Conv2dConfig::new([2, 3], [1, 1])
            .with_bias(true)
            .init::<B>(&device);

        let reg = L2Regularizer::try_new(2.0).unwrap();
        let expected: f32 = conv.weight.val().powf_scalar(2.0).sum().into_scalar() * 2.0;
        let actual: f32 = reg.conv_penalty(&conv).into_scalar();
        assert!((expected - actual).abs() < 1e-5);
    }
}
