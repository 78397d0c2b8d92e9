//! # Channel Layout
//!
//! ``burn`` convolutions operate on channels-first ``[batch, channels, height, width]``
//! tensors. A [`ChannelLayout`] records which convention a caller's tensors use,
//! so blocks can accept channels-last ``[batch, height, width, channels]`` input
//! without consulting any process-wide setting.

use burn::prelude::{Backend, Tensor};
use serde::{Deserialize, Serialize};

/// The position of the channel axis in a rank-4 image tensor.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Default, Serialize, Deserialize)]
pub enum ChannelLayout {
    /// ``[batch, channels, height, width]``
    #[default]
    ChannelsFirst,

    /// ``[batch, height, width, channels]``
    ChannelsLast,
}

impl ChannelLayout {
    /// The index of the channel axis.
    pub fn channel_axis(&self) -> usize {
        match self {
            ChannelLayout::ChannelsFirst => 1,
            ChannelLayout::ChannelsLast => 3,
        }
    }

    /// Reorder shape dims in this layout to ``[batch, channels, height, width]``.
    pub fn channels_first_dims(
        &self,
        dims: [usize; 4],
    ) -> [usize; 4] {
        match self {
            ChannelLayout::ChannelsFirst => dims,
            ChannelLayout::ChannelsLast => [dims[0], dims[3], dims[1], dims[2]],
        }
    }

    /// Reorder ``[batch, channels, height, width]`` dims into this layout.
    pub fn from_channels_first_dims(
        &self,
        dims: [usize; 4],
    ) -> [usize; 4] {
        match self {
            ChannelLayout::ChannelsFirst => dims,
            ChannelLayout::ChannelsLast => [dims[0], dims[2], dims[3], dims[1]],
        }
    }

    /// Permute a tensor in this layout to channels-first.
    pub fn to_channels_first<B: Backend>(
        &self,
        tensor: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            ChannelLayout::ChannelsFirst => tensor,
            ChannelLayout::ChannelsLast => tensor.permute([0, 3, 1, 2]),
        }
    }

    /// Permute a channels-first tensor into this layout.
    pub fn from_channels_first<B: Backend>(
        &self,
        tensor: Tensor<B, 4>,
    ) -> Tensor<B, 4> {
        match self {
            ChannelLayout::ChannelsFirst => tensor,
            ChannelLayout::ChannelsLast => tensor.permute([0, 2, 3, 1]),
        }
    }
}
