//! Component layers for residual blocks.
pub mod activation;
pub mod conv_norm;
pub mod conv_shape;
pub mod layout;
pub mod naming;
pub mod regularizer;
