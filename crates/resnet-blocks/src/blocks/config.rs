//! # [`ResidualBlockConfig`] - Residual Block Config
//!
//! [`ResidualBlockMeta`] defines a common meta API for
//! [`ResidualBlockConfig`] and [`ResidualBlock`].
//!
//! [`ResidualBlockConfig`] implements [`Config`], and provides
//! [`ResidualBlockConfig::init`] to initialize a [`ResidualBlock`].

use crate::blocks::residual::ResidualBlock;
use crate::layers::activation::ActivationConfig;
use crate::layers::conv_norm::ConvNorm2dConfig;
use crate::layers::conv_shape::{same_padding, strided_pointwise_resolution};
use crate::layers::layout::ChannelLayout;
use crate::layers::naming::{BlockName, Branch};
use crate::layers::regularizer::L2Regularizer;
use anyhow::{Context, bail};
use burn::config::Config;
use burn::module::Ignored;
use burn::nn::conv::Conv2dConfig;
use burn::nn::{BatchNormConfig, Initializer, PaddingConfig2d};
use burn::prelude::Backend;
use serde::{Deserialize, Serialize};

/// The shortcut path of a residual block.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub enum ShortcutKind {
    /// The input is added to the main path unchanged.
    Identity,

    /// The input passes through a strided 1x1 conv/norm projection.
    Projection,
}

/// [`ResidualBlock`] Meta API.
pub trait ResidualBlockMeta {
    /// The number of input channels.
    fn in_channels(&self) -> usize;

    /// Output channels of the three main-path convs.
    fn filters(&self) -> [usize; 3];

    /// The number of output channels; `filters[2]`.
    fn out_channels(&self) -> usize {
        self.filters()[2]
    }

    /// The middle conv kernel size.
    fn kernel_size(&self) -> usize;

    /// The stride of the first main-path conv and of the projection.
    fn stride(&self) -> [usize; 2];

    /// The dilation of the middle conv.
    fn dilation(&self) -> [usize; 2];

    /// The shortcut kind.
    fn shortcut(&self) -> ShortcutKind;

    /// Does the block have a projection shortcut?
    fn has_projection(&self) -> bool {
        self.shortcut() == ShortcutKind::Projection
    }

    /// The channel layout of the block's input and output tensors.
    fn layout(&self) -> ChannelLayout;

    /// Get the output resolution for a given input resolution.
    ///
    /// # Arguments
    ///
    /// - `input_resolution`: ``[in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[ceil(in_height / stride[0]), ceil(in_width / stride[1])]``
    fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        strided_pointwise_resolution(input_resolution, self.stride())
    }

    /// Get the output shape for a given input shape.
    ///
    /// Both shapes are in the block's [`ChannelLayout`].
    fn output_shape(
        &self,
        input_shape: [usize; 4],
    ) -> [usize; 4] {
        let layout = self.layout();
        let [batch, _, height, width] = layout.channels_first_dims(input_shape);
        let [out_height, out_width] = self.output_resolution([height, width]);
        layout.from_channels_first_dims([batch, self.out_channels(), out_height, out_width])
    }
}

/// [`ResidualBlock`] Config.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Config, Debug)]
pub struct ResidualBlockConfig {
    /// The middle conv kernel size.
    ///
    /// Even sizes pad the bottom/right edge one more than the top/left edge.
    pub kernel_size: usize,

    /// Output channels of the three main-path convs.
    pub filters: [usize; 3],

    /// Stage label, used in layer names.
    pub stage: usize,

    /// Block label, used in layer names.
    pub block: String,

    /// The number of input channels.
    ///
    /// Must equal `filters[2]` for [`ShortcutKind::Identity`].
    pub in_channels: usize,

    /// The shortcut kind.
    pub shortcut: ShortcutKind,

    /// The stride of the first main-path conv and of the projection.
    #[config(default = "[1, 1]")]
    pub stride: [usize; 2],

    /// The dilation of the middle conv.
    #[config(default = "[1, 1]")]
    pub dilation: [usize; 2],

    /// L2 penalty coefficient for conv kernels.
    #[config(default = "0.0")]
    pub weight_decay: f64,

    /// The channel layout of input and output tensors.
    #[config(default = "ChannelLayout::ChannelsFirst")]
    pub layout: ChannelLayout,

    /// The activation applied after `2a`, `2b`, and the residual sum.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,

    /// The [`BatchNormConfig`] of every branch.
    ///
    /// The feature size is replaced with each conv's output channels.
    #[config(default = "BatchNormConfig::new(0).with_epsilon(1e-3).with_momentum(0.01)")]
    pub norm: BatchNormConfig,

    /// Do the convs carry a bias?
    #[config(default = "true")]
    pub conv_bias: bool,

    /// The conv kernel initializer.
    #[config(default = "Initializer::XavierUniform { gain: 1.0 }")]
    pub initializer: Initializer,
}

impl ResidualBlockMeta for ResidualBlockConfig {
    fn in_channels(&self) -> usize {
        self.in_channels
    }

    fn filters(&self) -> [usize; 3] {
        self.filters
    }

    fn kernel_size(&self) -> usize {
        self.kernel_size
    }

    fn stride(&self) -> [usize; 2] {
        self.stride
    }

    fn dilation(&self) -> [usize; 2] {
        self.dilation
    }

    fn shortcut(&self) -> ShortcutKind {
        self.shortcut
    }

    fn layout(&self) -> ChannelLayout {
        self.layout
    }
}

impl ResidualBlockConfig {
    /// The stage/block name.
    pub fn name(&self) -> BlockName {
        BlockName::new(self.stage, self.block.clone())
    }

    /// Check if the config is valid.
    ///
    /// # Errors
    ///
    /// Describing the first invalid parameter.
    pub fn try_validate(&self) -> anyhow::Result<()> {
        let name = self.name();

        if self.block.is_empty() {
            bail!("block {name}: block label is empty");
        }
        if self.block.starts_with(|c: char| c.is_ascii_digit()) {
            bail!(
                "block {name}: block label must not start with a digit: {:?}",
                self.block
            );
        }
        if same_padding(self.kernel_size, 1).is_none() {
            bail!("block {name}: kernel_size must be > 0");
        }
        if self.filters.contains(&0) {
            bail!("block {name}: filters must be > 0: {:?}", self.filters);
        }
        if self.in_channels == 0 {
            bail!("block {name}: in_channels must be > 0");
        }
        if self.stride.contains(&0) {
            bail!("block {name}: stride must be > 0: {:?}", self.stride);
        }
        if self.dilation.contains(&0) {
            bail!("block {name}: dilation must be > 0: {:?}", self.dilation);
        }
        L2Regularizer::try_new(self.weight_decay).with_context(|| format!("block {name}"))?;

        if self.shortcut == ShortcutKind::Identity {
            if self.in_channels != self.filters[2] {
                bail!(
                    "block {name}: identity shortcut requires matching channels: in_channels ({}) != filters[2] ({})",
                    self.in_channels,
                    self.filters[2]
                );
            }
            if self.stride != [1, 1] {
                bail!(
                    "block {name}: identity shortcut requires stride [1, 1]: {:?}",
                    self.stride
                );
            }
        }
        Ok(())
    }

    /// Panic if `try_validate` returns an error.
    pub fn expect_valid(&self) {
        if let Err(err) = self.try_validate() {
            panic!("{err:#}");
        }
    }

    fn conv_config(
        &self,
        channels: [usize; 2],
        kernel_size: usize,
    ) -> Conv2dConfig {
        Conv2dConfig::new(channels, [kernel_size, kernel_size])
            .with_bias(self.conv_bias)
            .with_initializer(self.initializer.clone())
    }

    fn branch_config(
        &self,
        branch: Branch,
        conv: Conv2dConfig,
    ) -> ConvNorm2dConfig {
        ConvNorm2dConfig::new(conv, self.norm.clone(), self.name().label(branch))
    }

    /// Initialize a [`ResidualBlock`].
    ///
    /// # Errors
    ///
    /// If the config is invalid; see [`ResidualBlockConfig::try_validate`].
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> anyhow::Result<ResidualBlock<B>> {
        self.try_validate()?;

        let [f1, f2, f3] = self.filters;
        let name = self.name();
        let regularizer = L2Regularizer::try_new(self.weight_decay)?;

        let [[top, bottom], [left, right]] = [
            same_padding(self.kernel_size, self.dilation[0]),
            same_padding(self.kernel_size, self.dilation[1]),
        ]
        .map(|p| p.unwrap_or_default());

        // Even kernels pad one edge more; burn's conv padding is symmetric.
        let (conv_padding, pad2b) = if top == bottom && left == right {
            (PaddingConfig2d::Explicit(top, left), None)
        } else {
            (
                PaddingConfig2d::Explicit(0, 0),
                Some((left, right, top, bottom)),
            )
        };

        let branch2a = self.branch_config(
            Branch::Main2a,
            self.conv_config([self.in_channels, f1], 1)
                .with_stride(self.stride),
        );
        let branch2b = self.branch_config(
            Branch::Main2b,
            self.conv_config([f1, f2], self.kernel_size)
                .with_dilation(self.dilation)
                .with_padding(conv_padding),
        );
        let branch2c = self.branch_config(Branch::Main2c, self.conv_config([f2, f3], 1));

        let shortcut = match self.shortcut {
            ShortcutKind::Identity => None,
            ShortcutKind::Projection => Some(self.branch_config(
                Branch::Shortcut,
                self.conv_config([self.in_channels, f3], 1)
                    .with_stride(self.stride),
            )),
        };

        tracing::debug!(
            block = %name,
            in_channels = self.in_channels,
            filters = ?self.filters,
            kernel_size = self.kernel_size,
            stride = ?self.stride,
            dilation = ?self.dilation,
            shortcut = ?self.shortcut,
            weight_decay = self.weight_decay,
            "building residual block"
        );

        Ok(ResidualBlock {
            branch2a: branch2a.init(device),
            act2a: self.activation.init(device),
            pad2b: Ignored(pad2b),
            branch2b: branch2b.init(device),
            act2b: self.activation.init(device),
            branch2c: branch2c.init(device),
            shortcut: shortcut.map(|c| c.init(device)),
            act: self.activation.init(device),
            name: Ignored(name),
            layout: Ignored(self.layout),
            regularizer: Ignored(regularizer),
        })
    }

    /// Initialize a [`ResidualBlock`].
    ///
    /// # Panics
    ///
    /// If the config is invalid; see [`ResidualBlockConfig::try_validate`].
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> ResidualBlock<B> {
        match self.try_init(device) {
            Ok(block) => block,
            Err(err) => panic!("{err:#}"),
        }
    }
}
