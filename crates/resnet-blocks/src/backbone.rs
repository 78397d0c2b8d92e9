//! # `ResNet` Backbone
//!
//! Chains residual blocks into the stage layout of `ResNet-50/101`:
//!
//! ```text
//! conv1 7x7/2 -> bn_conv1 -> act -> maxpool 3x3/2
//! stage 2: conv_block(stride=1), identity_block * (n - 1)
//! stage 3: conv_block(stride=2), identity_block * (n - 1)
//! ...
//! ```
//!
//! [`BackboneConfig::with_output_stride`] trades the stride of trailing stages
//! for dilation; those stages are built from the atrous builders, keeping
//! feature maps at 1/16 or 1/8 of the input resolution for dense prediction.

use crate::blocks::{
    ResidualBlock, ResidualBlockConfig, ResidualBlockMeta, atrous_conv_block,
    atrous_identity_block, conv_block, identity_block,
};
use crate::layers::activation::{Activation, ActivationConfig};
use crate::layers::conv_norm::{ConvNorm2d, ConvNorm2dConfig, ConvNorm2dMeta};
use crate::layers::conv_shape::expect_conv1d_output_size;
use crate::layers::layout::ChannelLayout;
use crate::layers::naming::{LayerLabel, LayerNameRegistry, block_label};
use crate::layers::regularizer::{L2Regularizer, Regularized};
use anyhow::{Context, bail};
use bimm_contracts::unpack_shape_contract;
use burn::config::Config;
use burn::module::{Ignored, Module};
use burn::nn::conv::Conv2dConfig;
use burn::nn::pool::{MaxPool2d, MaxPool2dConfig};
use burn::nn::{BatchNormConfig, Initializer, PaddingConfig2d};
use burn::prelude::{Backend, Tensor};

/// The total stride of the stem.
pub const STEM_STRIDE: usize = 4;

/// A stage of residual blocks.
#[derive(Config, Debug)]
pub struct StageConfig {
    /// Stage label, used in layer names.
    pub stage: usize,

    /// The number of blocks.
    pub num_blocks: usize,

    /// Output channels of each block's three main-path convs.
    pub filters: [usize; 3],

    /// The stride of the stage's first block.
    #[config(default = 2)]
    pub stride: usize,

    /// The dilation of every block's middle conv.
    ///
    /// Stages with a dilation above 1 are built from the atrous builders.
    #[config(default = 1)]
    pub dilation: usize,
}

impl StageConfig {
    /// Build the block configs of the stage.
    ///
    /// # Arguments
    ///
    /// - `in_channels`: the channel count entering the stage.
    /// - `kernel_size`: the middle conv kernel size.
    pub fn block_configs(
        &self,
        in_channels: usize,
        kernel_size: usize,
    ) -> Vec<ResidualBlockConfig> {
        let stride = [self.stride, self.stride];
        let dilation = [self.dilation, self.dilation];
        let atrous = self.dilation > 1;

        (0..self.num_blocks)
            .map(|idx| {
                let label = block_label(idx, self.num_blocks);
                match (idx, atrous) {
                    (0, false) => {
                        conv_block(kernel_size, self.filters, self.stage, label, in_channels)
                            .with_stride(stride)
                    }
                    (0, true) => atrous_conv_block(
                        kernel_size,
                        self.filters,
                        self.stage,
                        label,
                        in_channels,
                    )
                    .with_stride(stride)
                    .with_dilation(dilation),
                    (_, false) => identity_block(kernel_size, self.filters, self.stage, label),
                    (_, true) => {
                        atrous_identity_block(kernel_size, self.filters, self.stage, label)
                            .with_dilation(dilation)
                    }
                }
            })
            .collect()
    }
}

/// [`Backbone`] Config.
#[derive(Config, Debug)]
pub struct BackboneConfig {
    /// The residual stages.
    pub stages: Vec<StageConfig>,

    /// The number of input image channels.
    #[config(default = 3)]
    pub in_channels: usize,

    /// The stem conv output channels.
    #[config(default = 64)]
    pub stem_channels: usize,

    /// The middle conv kernel size of every block.
    #[config(default = 3)]
    pub kernel_size: usize,

    /// L2 penalty coefficient for every conv kernel.
    #[config(default = "0.0")]
    pub weight_decay: f64,

    /// The channel layout of input and output tensors.
    #[config(default = "ChannelLayout::ChannelsFirst")]
    pub layout: ChannelLayout,

    /// The activation used throughout.
    #[config(default = "ActivationConfig::Relu")]
    pub activation: ActivationConfig,
}

impl BackboneConfig {
    /// Build a standard four-stage layout with the given block counts.
    pub fn standard(blocks: [usize; 4]) -> Self {
        let filters = [[64, 64, 256], [128, 128, 512], [256, 256, 1024], [512, 512, 2048]];
        let stages = blocks
            .into_iter()
            .zip(filters)
            .enumerate()
            .map(|(idx, (num_blocks, filters))| {
                StageConfig::new(idx + 2, num_blocks, filters)
                    .with_stride(if idx == 0 { 1 } else { 2 })
            })
            .collect();
        Self::new(stages)
    }

    /// `ResNet-50` stage layout.
    pub fn resnet50() -> Self {
        Self::standard([3, 4, 6, 3])
    }

    /// `ResNet-101` stage layout.
    pub fn resnet101() -> Self {
        Self::standard([3, 4, 23, 3])
    }

    /// The total stride of the backbone.
    pub fn output_stride(&self) -> usize {
        self.stages
            .iter()
            .fold(STEM_STRIDE, |acc, stage| acc * stage.stride)
    }

    /// Convert trailing stages to dilated stages to cap the output stride.
    ///
    /// Once the running stride reaches `output_stride`, each later stage's
    /// stride is folded into a cumulative dilation rate instead; every stage
    /// after the first folded one is dilated by that rate.
    ///
    /// # Errors
    ///
    /// If `output_stride` is smaller than [`STEM_STRIDE`].
    pub fn with_output_stride(
        self,
        output_stride: usize,
    ) -> anyhow::Result<Self> {
        if output_stride < STEM_STRIDE {
            bail!("output_stride must be >= {STEM_STRIDE}: {output_stride}");
        }

        let mut current = STEM_STRIDE;
        let mut rate = 1;
        let stages = self
            .stages
            .into_iter()
            .map(|stage| {
                if current * stage.stride > output_stride {
                    rate *= stage.stride;
                    StageConfig {
                        stride: 1,
                        dilation: stage.dilation * rate,
                        ..stage
                    }
                } else {
                    current *= stage.stride;
                    StageConfig {
                        dilation: stage.dilation * rate,
                        ..stage
                    }
                }
            })
            .collect();

        Ok(Self { stages, ..self })
    }

    /// The output channels of the final stage.
    pub fn out_channels(&self) -> usize {
        self.stages
            .last()
            .map(|stage| stage.filters[2])
            .unwrap_or(self.stem_channels)
    }

    /// Build every block config, in order.
    pub fn block_configs(&self) -> Vec<Vec<ResidualBlockConfig>> {
        let mut in_channels = self.stem_channels;
        self.stages
            .iter()
            .map(|stage| {
                let blocks = stage
                    .block_configs(in_channels, self.kernel_size)
                    .into_iter()
                    .map(|block| {
                        block
                            .with_weight_decay(self.weight_decay)
                            .with_layout(self.layout)
                            .with_activation(self.activation.clone())
                    })
                    .collect();
                in_channels = stage.filters[2];
                blocks
            })
            .collect()
    }

    /// Get the output resolution for a given input resolution.
    pub fn output_resolution(
        &self,
        input_resolution: [usize; 2],
    ) -> [usize; 2] {
        let stem = input_resolution.map(|size| {
            let x = expect_conv1d_output_size(size, 7, 2, 3, 1);
            expect_conv1d_output_size(x, 3, 2, 1, 1)
        });
        self.block_configs()
            .iter()
            .flatten()
            .fold(stem, |res, block| block.output_resolution(res))
    }

    /// Check if the config is valid.
    ///
    /// # Errors
    ///
    /// Describing the first invalid stage or block.
    pub fn try_validate(&self) -> anyhow::Result<()> {
        if self.stages.is_empty() {
            bail!("stages is empty");
        }
        if self.in_channels == 0 || self.stem_channels == 0 {
            bail!(
                "in_channels ({}) and stem_channels ({}) must be > 0",
                self.in_channels,
                self.stem_channels
            );
        }
        for stage in &self.stages {
            if stage.num_blocks == 0 {
                bail!("stage {}: num_blocks must be > 0", stage.stage);
            }
        }
        L2Regularizer::try_new(self.weight_decay)?;
        for block in self.block_configs().iter().flatten() {
            block.try_validate()?;
        }
        Ok(())
    }

    /// Initialize a [`Backbone`].
    ///
    /// Every layer name is registered; duplicates are an error.
    ///
    /// # Errors
    ///
    /// If the config is invalid, or two layers share a name.
    pub fn try_init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> anyhow::Result<Backbone<B>> {
        self.try_validate()?;

        let regularizer = L2Regularizer::try_new(self.weight_decay)?;
        let mut registry = LayerNameRegistry::new();

        let stem: ConvNorm2dConfig = ConvNorm2dConfig::new(
            Conv2dConfig::new([self.in_channels, self.stem_channels], [7, 7])
                .with_stride([2, 2])
                .with_padding(PaddingConfig2d::Explicit(3, 3))
                .with_initializer(Initializer::XavierUniform { gain: 1.0 }),
            BatchNormConfig::new(0)
                .with_epsilon(1e-3)
                .with_momentum(0.01),
            LayerLabel::new("conv1", "bn_conv1"),
        );
        registry.register_all([&stem.label.conv, &stem.label.norm])?;

        let mut stages = Vec::with_capacity(self.stages.len());
        for (stage, blocks) in self.stages.iter().zip(self.block_configs()) {
            let mut modules = Vec::with_capacity(blocks.len());
            for config in blocks {
                let block: ResidualBlock<B> = config.try_init(device)?;
                registry
                    .register_all(block.layer_names())
                    .with_context(|| format!("stage {}", stage.stage))?;
                modules.push(block);
            }
            stages.push(BackboneStage {
                stage: stage.stage,
                blocks: modules,
            });
        }

        tracing::info!(
            stages = self.stages.len(),
            blocks = stages.iter().map(|s| s.blocks.len()).sum::<usize>(),
            layers = registry.len(),
            output_stride = self.output_stride(),
            out_channels = self.out_channels(),
            "built backbone"
        );

        Ok(Backbone {
            stem: stem.init(device),
            stem_act: self.activation.init(device),
            pool: MaxPool2dConfig::new([3, 3])
                .with_strides([2, 2])
                .with_padding(PaddingConfig2d::Explicit(1, 1))
                .init(),
            stages,
            layout: Ignored(self.layout),
            regularizer: Ignored(regularizer),
        })
    }

    /// Initialize a [`Backbone`].
    ///
    /// # Panics
    ///
    /// If [`BackboneConfig::try_init`] fails.
    pub fn init<B: Backend>(
        &self,
        device: &B::Device,
    ) -> Backbone<B> {
        match self.try_init(device) {
            Ok(backbone) => backbone,
            Err(err) => panic!("{err:#}"),
        }
    }
}

/// A stage of residual blocks.
#[derive(Module, Debug)]
pub struct BackboneStage<B: Backend> {
    /// Stage label.
    pub stage: usize,

    /// The blocks, in order.
    pub blocks: Vec<ResidualBlock<B>>,
}

impl<B: Backend> BackboneStage<B> {
    /// Apply the stage to a channels-first tensor.
    pub fn forward_channels_first(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        self.blocks
            .iter()
            .fold(input, |x, block| block.forward_channels_first(x))
    }

    /// The output channels of the stage.
    pub fn out_channels(&self) -> usize {
        self.blocks
            .last()
            .map(|block| block.out_channels())
            .unwrap_or_default()
    }
}

/// `ResNet` feature backbone.
#[derive(Module, Debug)]
pub struct Backbone<B: Backend> {
    /// ``conv1`` / ``bn_conv1``.
    pub stem: ConvNorm2d<B>,
    /// Stem activation.
    pub stem_act: Activation<B>,
    /// Stem max pool.
    pub pool: MaxPool2d,

    /// Residual stages.
    pub stages: Vec<BackboneStage<B>>,

    /// Input/output tensor layout.
    pub layout: Ignored<ChannelLayout>,

    /// Stem kernel penalty.
    pub regularizer: Ignored<L2Regularizer>,
}

impl<B: Backend> Backbone<B> {
    /// The number of input image channels.
    pub fn in_channels(&self) -> usize {
        self.stem.in_channels()
    }

    /// The output channels of the final stage.
    pub fn out_channels(&self) -> usize {
        self.stages
            .last()
            .map(|stage| stage.out_channels())
            .unwrap_or_else(|| self.stem.out_channels())
    }

    /// Every layer name, in construction order.
    pub fn layer_names(&self) -> Vec<String> {
        let mut names = vec![
            self.stem.conv_name().to_string(),
            self.stem.norm_name().to_string(),
        ];
        for stage in &self.stages {
            for block in &stage.blocks {
                names.extend(block.layer_names());
            }
        }
        names
    }

    fn stem_forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        unpack_shape_contract!(
            ["batch", "in_channels", "height", "width"],
            &input,
            &["batch"],
            &[("in_channels", self.in_channels())]
        );
        let x = self.stem_act.forward(self.stem.forward(input));
        self.pool.forward(x)
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: an image batch in the backbone's layout.
    ///
    /// # Returns
    ///
    /// The final stage's feature map, in the backbone's layout.
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let layout = *self.layout;
        let x = self.stem_forward(layout.to_channels_first(input));
        let x = self
            .stages
            .iter()
            .fold(x, |x, stage| stage.forward_channels_first(x));
        layout.from_channels_first(x)
    }

    /// Forward Pass, returning every stage's feature map.
    ///
    /// # Returns
    ///
    /// One feature map per stage, in the backbone's layout.
    pub fn forward_features(
        &self,
        input: Tensor<B, 4>,
    ) -> Vec<Tensor<B, 4>> {
        let layout = *self.layout;
        let mut x = self.stem_forward(layout.to_channels_first(input));
        let mut features = Vec::with_capacity(self.stages.len());
        for stage in &self.stages {
            x = stage.forward_channels_first(x);
            features.push(layout.from_channels_first(x.clone()));
        }
        features
    }
}

impl<B: Backend> Regularized<B> for Backbone<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        self.stages
            .iter()
            .flat_map(|stage| stage.blocks.iter())
            .fold(self.stem.l2_penalty(&self.regularizer), |acc, block| {
                acc + block.l2_penalty()
            })
    }
}
