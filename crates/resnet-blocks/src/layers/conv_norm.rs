//! # `ConvNorm2d` Module
//!
//! A [`ConvNorm2d`] module is a named [`Conv2d`] layer followed by a named
//! [`BatchNorm`] layer over the conv's output channels.
//!
//! Every branch of a residual block is one of these; activation is applied
//! by the block, since the last main-path unit and the shortcut projection
//! are not activated before the residual sum.

use crate::layers::naming::LayerLabel;
use crate::layers::regularizer::L2Regularizer;
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::conv::{Conv2d, Conv2dConfig};
use burn::nn::{BatchNorm, BatchNormConfig};
use burn::prelude::{Backend, Tensor};

/// [`ConvNorm2d`] Meta.
pub trait ConvNorm2dMeta {
    /// Number of input channels.
    fn in_channels(&self) -> usize;

    /// Number of output channels.
    fn out_channels(&self) -> usize;

    /// Kernel size.
    fn kernel_size(&self) -> [usize; 2];

    /// Get the stride.
    fn stride(&self) -> [usize; 2];

    /// Get the dilation.
    fn dilation(&self) -> [usize; 2];
}

/// [`ConvNorm2d`] Config.
#[derive(Config, Debug)]
pub struct ConvNorm2dConfig {
    /// The [`Conv2d`] config.
    pub conv: Conv2dConfig,

    /// The [`BatchNorm`] config.
    ///
    /// The feature size is replaced with the conv's output channels.
    pub norm: BatchNormConfig,

    /// Layer names.
    pub label: LayerLabel,
}

impl ConvNorm2dMeta for ConvNorm2dConfig {
    fn in_channels(&self) -> usize {
        self.conv.channels[0]
    }

    fn out_channels(&self) -> usize {
        self.conv.channels[1]
    }

    fn kernel_size(&self) -> [usize; 2] {
        self.conv.kernel_size
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn dilation(&self) -> [usize; 2] {
        self.conv.dilation
    }
}

impl ConvNorm2dConfig {
    /// Initialize a [`ConvNorm2d`].
    pub fn init<B: Backend>(
        self,
        device: &B::Device,
    ) -> ConvNorm2d<B> {
        let norm = BatchNormConfig {
            num_features: self.out_channels(),
            ..self.norm
        };
        ConvNorm2d {
            conv: self.conv.init(device),
            norm: norm.init(device),
            label: Ignored(self.label),
        }
    }
}

/// Named [`Conv2d`] and [`BatchNorm`] pair.
#[derive(Module, Debug)]
pub struct ConvNorm2d<B: Backend> {
    /// Internal Conv2d layer.
    pub conv: Conv2d<B>,

    /// Internal Norm Layer.
    pub norm: BatchNorm<B, 2>,

    /// Layer names.
    pub label: Ignored<LayerLabel>,
}

impl<B: Backend> ConvNorm2dMeta for ConvNorm2d<B> {
    fn in_channels(&self) -> usize {
        self.conv.weight.shape().dims[1] * self.conv.groups
    }

    fn out_channels(&self) -> usize {
        self.conv.weight.shape().dims[0]
    }

    fn kernel_size(&self) -> [usize; 2] {
        self.conv.kernel_size
    }

    fn stride(&self) -> [usize; 2] {
        self.conv.stride
    }

    fn dilation(&self) -> [usize; 2] {
        self.conv.dilation
    }
}

impl<B: Backend> ConvNorm2d<B> {
    /// The conv layer name.
    pub fn conv_name(&self) -> &str {
        &self.label.conv
    }

    /// The norm layer name.
    pub fn norm_name(&self) -> &str {
        &self.label.norm
    }

    /// The L2 penalty on the conv kernel.
    pub fn l2_penalty(
        &self,
        regularizer: &L2Regularizer,
    ) -> Tensor<B, 1> {
        regularizer.conv_penalty(&self.conv)
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, out_height, out_width]``
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let [batch] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())]
        );

        let x = self.conv.forward(input);
        let x = self.norm.forward(x);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[("batch", batch), ("out_channels", self.out_channels())]
        );

        x
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::nn::PaddingConfig2d;
    use burn::tensor::Distribution;

    fn test_label() -> LayerLabel {
        LayerLabel::new("res2a_branch2b", "bn2a_branch2b")
    }

    #[test]
    fn test_conv_norm_config() {
        let conv = Conv2dConfig::new([2, 4], [3, 3])
            .with_stride([2, 2])
            .with_dilation([1, 1])
            .with_padding(PaddingConfig2d::Explicit(1, 1));

        let config = ConvNorm2dConfig::new(conv, BatchNormConfig::new(0), test_label());

        assert_eq!(config.in_channels(), 2);
        assert_eq!(config.out_channels(), 4);
        assert_eq!(config.kernel_size(), [3, 3]);
        assert_eq!(config.stride(), [2, 2]);
        assert_eq!(config.dilation(), [1, 1]);
    }

    #[test]
    fn test_conv_norm_forward() {
        type B = NdArray<f32>;
        let device = Default::default();

        let config = ConvNorm2dConfig::new(
            Conv2dConfig::new([2, 4], [3, 3])
                .with_dilation([2, 2])
                .with_padding(PaddingConfig2d::Explicit(2, 2)),
            BatchNormConfig::new(0),
            test_label(),
        );
        let layer: ConvNorm2d<B> = config.init(&device);

        assert_eq!(layer.in_channels(), 2);
        assert_eq!(layer.out_channels(), 4);
        assert_eq!(layer.dilation(), [2, 2]);
        assert_eq!(layer.norm.gamma.val().dims(), [4]);
        assert_eq!(layer.conv_name(), "res2a_branch2b");
        assert_eq!(layer.norm_name(), "bn2a_branch2b");

        let input = Tensor::random([3, 2, 9, 7], Distribution::Default, &device);
        let output = layer.forward(input.clone());

        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 3),
                ("out_channels", 4),
                ("out_height", 9),
                ("out_width", 7)
            ],
        );

        let expected = layer.norm.forward(layer.conv.forward(input));
        output.to_data().assert_eq(&expected.to_data(), true);
    }

    #[test]
    #[should_panic]
    fn test_conv_norm_rejects_wrong_channels() {
        type B = NdArray<f32>;
        let device = Default::default();

        let layer: ConvNorm2d<B> = ConvNorm2dConfig::new(
            Conv2dConfig::new([2, 4], [1, 1]),
            BatchNormConfig::new(0),
            test_label(),
        )
        .init(&device);

        layer.forward(Tensor::ones([1, 3, 4, 4], &device));
    }
}
