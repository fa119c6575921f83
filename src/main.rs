use burn::{module::Module, prelude::*};
use clap::{Parser, Subcommand};
use psgan::{
    config::load_with_defaults,
    utils::{image_to_tensor, load_image, save_image},
    PsganConfig, TransferGuidance,
};
use std::{
    error::Error,
    path::{Path, PathBuf},
};
use tracing_subscriber::EnvFilter;

#[cfg(not(feature = "wgpu"))]
type MyBackend = burn::backend::NdArray<f32>;
#[cfg(feature = "wgpu")]
type MyBackend = burn::backend::Wgpu<f32>;

#[derive(Parser, Debug)]
#[command(name = "psgan", version, about = "PSGAN makeup transfer models")]
struct Cli {
    /// JSON model configuration. Omitted fields keep their defaults.
    #[arg(long, global = true)]
    config: Option<PathBuf>,

    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// Transfer the makeup of a reference portrait onto a source portrait.
    Transfer {
        #[arg(long)]
        source: PathBuf,
        #[arg(long)]
        reference: PathBuf,
        #[arg(long)]
        output: PathBuf,
        /// Side length both images are resized to. Must be a multiple of 4.
        #[arg(long, default_value_t = 256)]
        size: u32,
    },
    /// Report parameter counts and output shapes of both networks.
    Inspect {
        #[arg(long, default_value_t = 256)]
        size: usize,
    },
}

fn main() -> Result<(), Box<dyn Error>> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let cli = Cli::parse();
    let config = load_config(cli.config.as_deref())?;
    let device = Default::default();

    match cli.command {
        Commands::Transfer {
            source,
            reference,
            output,
            size,
        } => transfer(&config, &source, &reference, &output, size, &device),
        Commands::Inspect { size } => {
            inspect(&config, size, &device);
            Ok(())
        }
    }
}

fn load_config(path: Option<&Path>) -> Result<PsganConfig, Box<dyn Error>> {
    let config = match path {
        Some(path) => load_with_defaults(&PsganConfig::new(), path)?,
        None => PsganConfig::new(),
    };
    config.validate()?;

    Ok(config)
}

fn transfer(
    config: &PsganConfig,
    source: &Path,
    reference: &Path,
    output: &Path,
    size: u32,
    device: &Device<MyBackend>,
) -> Result<(), Box<dyn Error>> {
    if size == 0 || size % 4 != 0 {
        return Err(format!("--size must be a positive multiple of 4, got {size}").into());
    }

    let generator = config.generator.init::<MyBackend>(device);
    tracing::warn!("no trained weights are loaded; the output reflects random initialisation");

    let source = image_to_tensor::<MyBackend>(&load_image(source, size)?, device).unsqueeze();
    let reference = image_to_tensor::<MyBackend>(&load_image(reference, size)?, device).unsqueeze();

    let (image, attention) =
        generator.try_forward(source, reference, TransferGuidance::default())?;
    tracing::info!(attention = ?attention.dims(), "computed correspondence");

    save_image(image.squeeze::<3>(0), output)?;
    tracing::info!(path = %output.display(), "saved transferred image");

    Ok(())
}

fn inspect(config: &PsganConfig, size: usize, device: &Device<MyBackend>) {
    let model = config.init::<MyBackend>(device);
    tracing::info!(
        generator = model.generator.num_params(),
        discriminator = model.discriminator.num_params(),
        "parameter counts"
    );

    let source = Tensor::<MyBackend, 4>::zeros([1, 3, size, size], device);
    let reference = Tensor::<MyBackend, 4>::zeros([1, 3, size, size], device);
    let (image, attention) = model
        .generator
        .forward(source, reference, TransferGuidance::default());
    tracing::info!(image = ?image.dims(), attention = ?attention.dims(), "generator output");

    let patches = model.discriminator.forward(image);
    tracing::info!(patches = ?patches.dims(), "discriminator output");
}
