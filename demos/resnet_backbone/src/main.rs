//! Builds a `ResNet` backbone from residual blocks and runs one random batch.
//!
//! ```text
//! $ RUST_LOG=debug resnet_backbone --depth=50 --output-stride=16 --channels-last
//! ```
use burn::backend::NdArray;
use burn::prelude::{Backend, Config, Tensor};
use burn::tensor::Distribution;
use clap::{Parser, arg};
use resnet_blocks::backbone::{Backbone, BackboneConfig};
use resnet_blocks::layers::layout::ChannelLayout;
use resnet_blocks::layers::regularizer::Regularized;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
pub struct Args {
    /// Backbone depth; 50 or 101.
    #[arg(long, default_value_t = 50)]
    depth: usize,

    /// Output stride; 8, 16 or 32.
    #[arg(long, default_value_t = 32)]
    output_stride: usize,

    /// Batch size.
    #[arg(short, long, default_value_t = 1)]
    batch_size: usize,

    /// Input image height.
    #[arg(long, default_value_t = 224)]
    height: usize,

    /// Input image width.
    #[arg(long, default_value_t = 224)]
    width: usize,

    /// L2 penalty coefficient for conv kernels.
    #[arg(long, default_value_t = 1e-4)]
    weight_decay: f64,

    /// Use ``[batch, height, width, channels]`` tensors.
    #[arg(long, default_value_t = false)]
    channels_last: bool,

    /// Write the backbone config to this path as JSON.
    #[arg(long)]
    save_config: Option<String>,
}

fn main() -> anyhow::Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .with_target(true)
        .init();

    let args = Args::parse();

    type B = NdArray<f32>;
    let device = Default::default();
    backend_main::<B>(&args, &device)
}

/// Build the configured backbone and report its feature shapes.
pub fn backend_main<B: Backend>(
    args: &Args,
    device: &B::Device,
) -> anyhow::Result<()> {
    let config = match args.depth {
        50 => BackboneConfig::resnet50(),
        101 => BackboneConfig::resnet101(),
        depth => anyhow::bail!("unsupported depth: {depth}"),
    };
    let layout = if args.channels_last {
        ChannelLayout::ChannelsLast
    } else {
        ChannelLayout::ChannelsFirst
    };
    let config = config
        .with_weight_decay(args.weight_decay)
        .with_layout(layout)
        .with_output_stride(args.output_stride)?;

    if let Some(path) = &args.save_config {
        config.save(path)?;
        tracing::info!(path = %path, "saved backbone config");
    }

    let backbone: Backbone<B> = config.try_init(device)?;

    let shape = layout.from_channels_first_dims([
        args.batch_size,
        config.in_channels,
        args.height,
        args.width,
    ]);
    let input: Tensor<B, 4> = Tensor::random(shape, Distribution::Default, device);

    let features = backbone.forward_features(input);
    for (stage, feature) in config.stages.iter().zip(&features) {
        tracing::info!(stage = stage.stage, shape = ?feature.dims(), "stage output");
    }

    let [out_height, out_width] = config.output_resolution([args.height, args.width]);
    tracing::info!(
        output_stride = config.output_stride(),
        expected = ?[out_height, out_width],
        layers = backbone.layer_names().len(),
        l2_penalty = ?backbone.l2_penalty().into_scalar(),
        "done"
    );

    Ok(())
}
