//! # [`ResidualBlock`] Module
//!
//! Applies, to input `x`:
//!
//! ```text
//! y = act(bn2a(conv2a(x)))          // 1x1, strided
//! y = act(bn2b(conv2b(y)))          // k x k, dilated, same padding
//! y = bn2c(conv2c(y))               // 1x1
//! s = x | bn1(conv1(x))             // identity, or strided 1x1 projection
//! return act(y + s)
//! ```

use crate::blocks::config::{ResidualBlockMeta, ShortcutKind};
use crate::layers::activation::Activation;
use crate::layers::conv_norm::{ConvNorm2d, ConvNorm2dMeta};
use crate::layers::layout::ChannelLayout;
use crate::layers::naming::BlockName;
use crate::layers::regularizer::{L2Regularizer, Regularized};
use bimm_contracts::{assert_shape_contract_periodically, unpack_shape_contract};
use burn::module::{Ignored, Module};
use burn::prelude::{Backend, Tensor};

/// Bottleneck residual block with an identity or projection shortcut.
///
/// Implements [`ResidualBlockMeta`].
#[derive(Module, Debug)]
pub struct ResidualBlock<B: Backend> {
    /// First 1x1 conv/norm; carries the block stride.
    pub branch2a: ConvNorm2d<B>,
    /// Activation after `branch2a`.
    pub act2a: Activation<B>,

    /// ``(left, right, top, bottom)`` input padding of `branch2b`, for even
    /// kernel sizes; odd sizes pad inside the conv.
    pub pad2b: Ignored<Option<(usize, usize, usize, usize)>>,

    /// Middle ``k x k`` conv/norm; carries the dilation.
    pub branch2b: ConvNorm2d<B>,
    /// Activation after `branch2b`.
    pub act2b: Activation<B>,

    /// Last 1x1 conv/norm; not activated before the residual sum.
    pub branch2c: ConvNorm2d<B>,

    /// Optional projection shortcut.
    pub shortcut: Option<ConvNorm2d<B>>,

    /// Activation after the residual sum.
    pub act: Activation<B>,

    /// Stage/block name.
    pub name: Ignored<BlockName>,

    /// Input/output tensor layout.
    pub layout: Ignored<ChannelLayout>,

    /// Kernel penalty.
    pub regularizer: Ignored<L2Regularizer>,
}

impl<B: Backend> ResidualBlockMeta for ResidualBlock<B> {
    fn in_channels(&self) -> usize {
        self.branch2a.in_channels()
    }

    fn filters(&self) -> [usize; 3] {
        [
            self.branch2a.out_channels(),
            self.branch2b.out_channels(),
            self.branch2c.out_channels(),
        ]
    }

    fn kernel_size(&self) -> usize {
        self.branch2b.kernel_size()[0]
    }

    fn stride(&self) -> [usize; 2] {
        self.branch2a.stride()
    }

    fn dilation(&self) -> [usize; 2] {
        self.branch2b.dilation()
    }

    fn shortcut(&self) -> ShortcutKind {
        match self.shortcut {
            Some(_) => ShortcutKind::Projection,
            None => ShortcutKind::Identity,
        }
    }

    fn layout(&self) -> ChannelLayout {
        *self.layout
    }
}

impl<B: Backend> ResidualBlock<B> {
    /// The stage/block name.
    pub fn name(&self) -> &BlockName {
        &self.name
    }

    /// The conv/norm units, in construction order.
    pub fn branches(&self) -> Vec<&ConvNorm2d<B>> {
        let mut branches = vec![&self.branch2a, &self.branch2b, &self.branch2c];
        branches.extend(self.shortcut.as_ref());
        branches
    }

    /// Every conv and norm layer name, in construction order.
    pub fn layer_names(&self) -> Vec<String> {
        self.branches()
            .into_iter()
            .flat_map(|b| [b.conv_name().to_string(), b.norm_name().to_string()])
            .collect()
    }

    /// Forward Pass.
    ///
    /// # Arguments
    ///
    /// - `input`: an ``[batch, in_height, in_width, in_channels]`` or
    ///   ``[batch, in_channels, in_height, in_width]`` tensor, per [`Self::layout`].
    ///
    /// # Returns
    ///
    /// An ``out_channels=filters[2]`` tensor in the same layout;
    /// see [`ResidualBlockMeta::output_shape`].
    pub fn forward(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let layout = self.layout();
        let x = self.forward_channels_first(layout.to_channels_first(input));
        layout.from_channels_first(x)
    }

    /// Forward Pass, on channels-first tensors regardless of [`Self::layout`].
    ///
    /// # Arguments
    ///
    /// - `input`: ``[batch, in_channels, in_height, in_width]``.
    ///
    /// # Returns
    ///
    /// ``[batch, out_channels, ceil(in_height/stride[0]), ceil(in_width/stride[1])]``
    pub fn forward_channels_first(
        &self,
        input: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        let _span = tracing::trace_span!("residual_block", block = %self.name()).entered();

        let [batch, in_height, in_width] = unpack_shape_contract!(
            ["batch", "in_channels", "in_height", "in_width"],
            &input,
            &["batch", "in_height", "in_width"],
            &[("in_channels", self.in_channels())]
        );
        let [out_height, out_width] = self.output_resolution([in_height, in_width]);

        let identity = match &self.shortcut {
            Some(projection) => projection.forward(input.clone()),
            None => input.clone(),
        };

        let x = self.act2a.forward(self.branch2a.forward(input));
        let x = match *self.pad2b {
            Some(padding) => x.pad(padding, 0.0),
            None => x,
        };
        let x = self.act2b.forward(self.branch2b.forward(x));
        let x = self.branch2c.forward(x);

        let x = self.act.forward(x + identity);

        assert_shape_contract_periodically!(
            ["batch", "out_channels", "out_height", "out_width"],
            &x,
            &[
                ("batch", batch),
                ("out_channels", self.out_channels()),
                ("out_height", out_height),
                ("out_width", out_width)
            ]
        );

        x
    }

    /// Convert the block into a plain ``tensor -> tensor`` function.
    pub fn into_fn(self) -> impl Fn(Tensor<B, 4>) -> Tensor<B, 4> {
        move |input| self.forward(input)
    }
}

impl<B: Backend> Regularized<B> for ResidualBlock<B> {
    fn l2_penalty(&self) -> Tensor<B, 1> {
        let regularizer = *self.regularizer;
        self.branches()
            .into_iter()
            .map(|b| b.l2_penalty(&regularizer))
            .reduce(|a, b| a + b)
            .unwrap_or_else(|| Tensor::zeros([1], &self.branch2a.conv.weight.device()))
    }
}
