#![warn(missing_docs)]
//!# resnet-blocks - `ResNet` Residual Block Builders
//!
//! Builders for the bottleneck residual units of `ResNet`-style networks,
//! on top of ``burn``.
//!
//! ## Notable Components
//!
//! * [`blocks`] - residual block builders and modules.
//!   * [`blocks::identity_block`] - identity shortcut block.
//!   * [`blocks::conv_block`] - projection shortcut block; downsamples by default.
//!   * [`blocks::atrous_identity_block`] - identity block with a dilated middle conv.
//!   * [`blocks::atrous_conv_block`] - projection block with a dilated middle conv.
//!   * [`blocks::residual::ResidualBlock`] - the block module.
//! * [`layers`] - the component layers blocks are assembled from.
//!   * [`layers::activation`] - activation layer wrapper.
//!   * [`layers::conv_norm`] - ``Conv2d + BatchNorm`` unit.
//!   * [`layers::layout`] - explicit channel layout handling.
//!   * [`layers::naming`] - deterministic layer names and collision checks.
//!   * [`layers::regularizer`] - L2 kernel penalties.
//! * [`backbone`] - `ResNet-50` / `ResNet-101` backbones assembled from the blocks.

/// Test-only macro import.
#[cfg(test)]
#[allow(unused_imports)]
#[macro_use]
extern crate hamcrest;

pub mod backbone;
pub mod blocks;
pub mod layers;
