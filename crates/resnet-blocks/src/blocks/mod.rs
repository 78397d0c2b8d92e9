//! # Residual Blocks
//!
//! The four builders below cover the bottleneck residual units of a
//! `ResNet` backbone. Each returns a [`ResidualBlockConfig`]; optional
//! settings are adjusted with its ``with_*`` methods, and
//! [`ResidualBlockConfig::init`] produces the [`ResidualBlock`] module.
//!
//! ```rust,ignore
//! let block: ResidualBlock<B> = conv_block(3, [64, 64, 256], 2, "a", 64)
//!     .with_stride([1, 1])
//!     .with_weight_decay(1e-4)
//!     .with_layout(ChannelLayout::ChannelsLast)
//!     .init(&device);
//!
//! let y = block.forward(x);
//! ```

pub mod config;
pub mod residual;

pub use config::{ResidualBlockConfig, ResidualBlockMeta, ShortcutKind};
pub use residual::ResidualBlock;

/// The dilation rate applied by the atrous builders.
pub const ATROUS_DILATION: [usize; 2] = [2, 2];

/// The stride applied by [`conv_block`].
pub const CONV_BLOCK_STRIDE: [usize; 2] = [2, 2];

/// Identity shortcut block.
///
/// Main path ``1x1 -> k x k -> 1x1`` with `filters` output channels;
/// the input is added back unchanged, so the input channel count
/// must equal `filters[2]`.
///
/// # Arguments
///
/// - `kernel_size`: the middle conv kernel size.
/// - `filters`: the output channels of the three main-path convs.
/// - `stage`: the stage label, used in layer names.
/// - `block`: the block label, used in layer names.
pub fn identity_block<S: Into<String>>(
    kernel_size: usize,
    filters: [usize; 3],
    stage: usize,
    block: S,
) -> ResidualBlockConfig {
    ResidualBlockConfig::new(
        kernel_size,
        filters,
        stage,
        block.into(),
        filters[2],
        ShortcutKind::Identity,
    )
}

/// Projection shortcut block.
///
/// As [`identity_block`], with a strided first conv (default
/// [`CONV_BLOCK_STRIDE`]) and a learned, equally strided 1x1
/// conv/norm projection on the shortcut.
///
/// # Arguments
///
/// - `kernel_size`: the middle conv kernel size.
/// - `filters`: the output channels of the three main-path convs.
/// - `stage`: the stage label, used in layer names.
/// - `block`: the block label, used in layer names.
/// - `in_channels`: the input channel count.
pub fn conv_block<S: Into<String>>(
    kernel_size: usize,
    filters: [usize; 3],
    stage: usize,
    block: S,
    in_channels: usize,
) -> ResidualBlockConfig {
    ResidualBlockConfig::new(
        kernel_size,
        filters,
        stage,
        block.into(),
        in_channels,
        ShortcutKind::Projection,
    )
    .with_stride(CONV_BLOCK_STRIDE)
}

/// Identity shortcut block with a dilated middle conv.
///
/// The middle conv uses [`ATROUS_DILATION`], widening the receptive field
/// while preserving resolution.
pub fn atrous_identity_block<S: Into<String>>(
    kernel_size: usize,
    filters: [usize; 3],
    stage: usize,
    block: S,
) -> ResidualBlockConfig {
    identity_block(kernel_size, filters, stage, block).with_dilation(ATROUS_DILATION)
}

/// Projection shortcut block with a dilated middle conv.
///
/// Unlike [`conv_block`], the default stride is ``[1, 1]``: the projection
/// changes channel depth without downsampling.
pub fn atrous_conv_block<S: Into<String>>(
    kernel_size: usize,
    filters: [usize; 3],
    stage: usize,
    block: S,
    in_channels: usize,
) -> ResidualBlockConfig {
    conv_block(kernel_size, filters, stage, block, in_channels)
        .with_stride([1, 1])
        .with_dilation(ATROUS_DILATION)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::layers::layout::ChannelLayout;
    use bimm_contracts::assert_shape_contract;
    use burn::backend::NdArray;
    use burn::prelude::Tensor;
    use burn::tensor::Distribution;

    type B = NdArray<f32>;

    #[test]
    fn test_builder_defaults() {
        let config = identity_block(3, [64, 64, 256], 2, "b");
        assert_eq!(config.shortcut, ShortcutKind::Identity);
        assert_eq!(config.in_channels(), 256);
        assert_eq!(config.stride(), [1, 1]);
        assert_eq!(config.dilation(), [1, 1]);
        assert_eq!(config.weight_decay, 0.0);

        let config = conv_block(3, [64, 64, 256], 3, "a", 128);
        assert_eq!(config.shortcut, ShortcutKind::Projection);
        assert_eq!(config.in_channels(), 128);
        assert_eq!(config.stride(), [2, 2]);
        assert_eq!(config.dilation(), [1, 1]);

        let config = atrous_identity_block(3, [64, 64, 256], 4, "b");
        assert_eq!(config.shortcut, ShortcutKind::Identity);
        assert_eq!(config.stride(), [1, 1]);
        assert_eq!(config.dilation(), [2, 2]);

        let config = atrous_conv_block(3, [64, 64, 256], 4, "a", 128);
        assert_eq!(config.shortcut, ShortcutKind::Projection);
        assert_eq!(config.stride(), [1, 1]);
        assert_eq!(config.dilation(), [2, 2]);
    }

    #[test]
    fn test_channels_last_stage_transition() {
        let device = Default::default();

        let down: ResidualBlock<B> = conv_block(3, [64, 64, 256], 3, "a", 64)
            .with_layout(ChannelLayout::ChannelsLast)
            .init(&device);

        let input = Tensor::random([2, 56, 56, 64], Distribution::Default, &device);
        let x = down.forward(input);
        assert_eq!(x.dims(), [2, 28, 28, 256]);

        let identity: ResidualBlock<B> = identity_block(3, [64, 64, 256], 3, "b")
            .with_layout(ChannelLayout::ChannelsLast)
            .init(&device);

        let y = identity.forward(x);
        assert_eq!(y.dims(), [2, 28, 28, 256]);
    }

    #[test]
    fn test_atrous_identity_matches_identity_resolution() {
        let device = Default::default();
        let input: Tensor<B, 4> = Tensor::random([2, 16, 11, 13], Distribution::Default, &device);

        let plain: ResidualBlock<B> = identity_block(3, [4, 4, 16], 2, "b").init(&device);
        let atrous: ResidualBlock<B> = atrous_identity_block(3, [4, 4, 16], 2, "b").init(&device);

        let a = plain.forward(input.clone());
        let b = atrous.forward(input);
        assert_eq!(a.dims(), b.dims());
        assert_eq!(b.dims(), [2, 16, 11, 13]);
    }

    #[test]
    fn test_atrous_conv_block_preserves_resolution() {
        let device = Default::default();

        let block: ResidualBlock<B> = atrous_conv_block(3, [8, 8, 32], 5, "a", 16).init(&device);

        let input = Tensor::random([1, 16, 10, 10], Distribution::Default, &device);
        let output = block.forward(input);

        assert_shape_contract!(
            ["batch", "out_channels", "out_height", "out_width"],
            &output,
            &[
                ("batch", 1),
                ("out_channels", 32),
                ("out_height", 10),
                ("out_width", 10)
            ],
        );
    }

    #[test]
    fn test_distinct_stage_block_names() {
        let device = Default::default();

        let a: ResidualBlock<B> = identity_block(3, [4, 4, 16], 2, "b").init(&device);
        let b: ResidualBlock<B> = identity_block(3, [4, 4, 16], 2, "c").init(&device);
        let c: ResidualBlock<B> = identity_block(3, [4, 4, 16], 3, "b").init(&device);

        let mut registry = crate::layers::naming::LayerNameRegistry::new();
        registry.register_all(a.layer_names()).unwrap();
        registry.register_all(b.layer_names()).unwrap();
        registry.register_all(c.layer_names()).unwrap();
        assert_eq!(registry.len(), 18);

        assert!(registry.register_all(a.layer_names()).is_err());
    }

    #[test]
    fn test_digit_block_labels_are_rejected() {
        let device = Default::default();

        let block: ResidualBlock<B> = identity_block(3, [4, 4, 16], 11, "a").init(&device);
        assert_eq!(block.layer_names()[0], "res11a_branch2a");

        // (1, "1a") would also be named "res11a_branch2a".
        let err = identity_block(3, [4, 4, 16], 1, "1a")
            .try_init::<B>(&device)
            .unwrap_err();
        assert!(
            err.to_string()
                .contains("block label must not start with a digit"),
            "{err}"
        );
    }

    #[test]
    fn test_identity_channel_mismatch_fails_at_construction() {
        let device = Default::default();

        let config = ResidualBlockConfig {
            in_channels: 64,
            ..identity_block(3, [64, 64, 256], 2, "b")
        };
        let result = config.try_init::<B>(&device);

        let err = result.unwrap_err().to_string();
        assert!(err.contains("in_channels (64) != filters[2] (256)"), "{err}");
    }
}
