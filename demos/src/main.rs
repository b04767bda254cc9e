//! Command line front end for the semseg-burn zoo.
//!
//! ## Usage
//!
//! ```bash
//! # List registered models and their pretrained weights
//! cargo run --bin semseg -- models
//!
//! # Show the configuration of a model
//! cargo run --bin semseg -- info deeplabv3_resnet50 --aux-loss
//!
//! # Segment an image and color the mask with the Cityscapes palette
//! cargo run --bin semseg --features pretrained -- predict \
//!     --model bisenet_resnet18 --weights DEFAULT --dataset Cityscapes \
//!     --image street.png --output mask.png
//!
//! # Count the samples of a local dataset copy
//! cargo run --bin semseg -- inspect-dataset VOC --root data
//! ```

mod backend;

use std::{
    collections::BTreeSet,
    path::{Path, PathBuf},
    time::Instant,
};

use anyhow::{Context, Result};
use backend::{backend_name, create_device, SelectedBackend};
use burn::{data::dataset::Dataset, prelude::*};
use clap::{Parser, Subcommand};
use image::GrayImage;
use semseg_burn::{
    build_model,
    datasets::{
        colorize, dataset_metadata, dataset_zoo, image_to_tensor, resolve_dataset,
        resolve_metadata, IGNORE_INDEX,
    },
    model_zoo, resolve_model, BackboneWeights, ModelOptions, WeightsConfig,
};
use tracing::info;
use tracing_subscriber::EnvFilter;

#[derive(Parser, Debug)]
#[command(name = "semseg", author, version, about = "Semantic segmentation model and dataset zoo")]
struct Args {
    #[command(subcommand)]
    command: Commands,
}

#[derive(Subcommand, Debug)]
enum Commands {
    /// List registered models and their pretrained weights
    Models,
    /// List registered datasets and label spaces
    Datasets,
    /// Print the configuration and parameter count of a model
    Info {
        /// Model name
        model: String,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Segment an image and write the colored class mask
    Predict {
        /// Model name
        #[arg(short, long)]
        model: String,
        /// Input image
        #[arg(short, long)]
        image: PathBuf,
        /// Output mask image
        #[arg(short, long, default_value = "mask.png")]
        output: PathBuf,
        /// Dataset whose colors are used for the mask
        #[arg(long)]
        dataset: Option<String>,
        #[command(flatten)]
        options: OptionArgs,
    },
    /// Count the samples of a dataset and describe the first one
    InspectDataset {
        /// Dataset name
        name: String,
        /// Dataset root directory
        #[arg(short, long)]
        root: PathBuf,
        /// Split to load, defaults to the validation split
        #[arg(short, long)]
        split: Option<String>,
    },
}

#[derive(clap::Args, Debug)]
struct OptionArgs {
    /// Model weights (`DEFAULT` or a weights name)
    #[arg(short, long)]
    weights: Option<String>,
    /// Number of output classes
    #[arg(long)]
    num_classes: Option<usize>,
    /// Build the auxiliary classifier
    #[arg(long)]
    aux_loss: bool,
    /// Initialize the backbone randomly instead of from ImageNet weights
    #[arg(long)]
    no_backbone_weights: bool,
}

impl OptionArgs {
    fn to_options(&self) -> ModelOptions {
        let weights_backbone = if self.no_backbone_weights {
            BackboneWeights::None
        } else {
            BackboneWeights::Default
        };
        ModelOptions::new()
            .with_weights(self.weights.clone())
            .with_num_classes(self.num_classes)
            .with_aux_loss(self.aux_loss.then_some(true))
            .with_weights_backbone(weights_backbone)
    }
}

fn main() -> Result<()> {
    tracing_subscriber::fmt()
        .with_env_filter(
            EnvFilter::try_from_default_env().unwrap_or_else(|_| EnvFilter::new("info")),
        )
        .init();

    let args = Args::parse();

    match args.command {
        Commands::Models => list_models(),
        Commands::Datasets => list_datasets(),
        Commands::Info { model, options } => show_info(&model, &options.to_options())?,
        Commands::Predict {
            model,
            image,
            output,
            dataset,
            options,
        } => predict(
            &model,
            &options.to_options(),
            &image,
            &output,
            dataset.as_deref(),
        )?,
        Commands::InspectDataset { name, root, split } => {
            inspect_dataset(&name, &root, split.as_deref())?;
        }
    }

    Ok(())
}

fn list_models() {
    println!("Available models:");
    for (name, entry) in model_zoo() {
        if entry.weights.is_empty() {
            println!("  - {name}");
        } else {
            let weights: Vec<_> = entry.weights.iter().map(|w| w.name).collect();
            println!("  - {name} (weights: {})", weights.join(", "));
        }
    }
}

fn list_datasets() {
    println!("Available datasets:");
    for (name, meta) in dataset_metadata() {
        let note = if dataset_zoo().contains_key(name) {
            ""
        } else {
            " [metadata only]"
        };
        println!(
            "  - {name}: {} classes, ignore index {}{note}",
            meta.num_classes, meta.ignore_index
        );
    }
}

fn show_info(model: &str, options: &ModelOptions) -> Result<()> {
    let entry = resolve_model(model)?;
    let config = entry.config(options)?;

    let device = create_device();
    let network = config.init::<SelectedBackend>(&device)?;

    println!("Model: {model}");
    println!("Classes: {}", config.num_classes());
    println!("Auxiliary classifier: {}", config.has_aux());
    println!("Parameters: {}", network.num_params());
    println!(
        "Configuration:\n{}",
        serde_json::to_string_pretty(&config).context("Failed to serialize the configuration")?
    );
    for weights in entry.weights {
        println!(
            "Weights {}: {} classes, {}",
            weights.name,
            weights.num_classes(),
            weights.description
        );
    }

    Ok(())
}

fn predict(
    model: &str,
    options: &ModelOptions,
    image_path: &Path,
    output: &Path,
    dataset: Option<&str>,
) -> Result<()> {
    let colors = dataset
        .map(resolve_metadata)
        .transpose()?
        .and_then(|meta| meta.colors);

    let device = create_device();
    info!("Using backend: {}", backend_name());

    let network =
        build_model::<SelectedBackend>(model, options, &WeightsConfig::from_env(), &device)?;

    let image = image::open(image_path)
        .with_context(|| format!("Failed to open image: {}", image_path.display()))?
        .to_rgb8();
    let (width, height) = image.dimensions();
    let input = image_to_tensor::<SelectedBackend>(&image, &device);

    let start = Instant::now();
    let classes = network.forward(input).out.argmax(1);
    let classes = classes
        .into_data()
        .convert::<i32>()
        .to_vec::<i32>()
        .map_err(|e| anyhow::anyhow!("Failed to read the prediction: {e:?}"))?;
    info!("Inference took {:?}", start.elapsed());

    let mask: Vec<u8> = classes
        .into_iter()
        .map(|class| u8::try_from(class).unwrap_or(IGNORE_INDEX))
        .collect();
    let found: BTreeSet<u8> = mask.iter().copied().collect();
    let mask = GrayImage::from_raw(width, height, mask)
        .context("Prediction does not match the image size")?;

    colorize(&mask, colors)
        .save(output)
        .with_context(|| format!("Failed to write mask: {}", output.display()))?;

    println!("Predicted classes: {found:?}");
    println!("Mask written to {}", output.display());
    Ok(())
}

fn inspect_dataset(name: &str, root: &Path, split: Option<&str>) -> Result<()> {
    let entry = resolve_dataset(name)?;
    let split = split.unwrap_or(entry.val_split);
    let dataset = entry
        .build(root, split, None)
        .with_context(|| format!("Failed to load {name} ({split}) from {}", root.display()))?;

    println!("Dataset: {name} ({split})");
    println!("Classes: {}", entry.meta.num_classes);
    println!("Samples: {}", dataset.len());

    if let Some(item) = dataset.get(0) {
        let classes: BTreeSet<u8> = item.target.pixels().map(|p| p.0[0]).collect();
        let labels: Vec<_> = classes
            .iter()
            .map(|&class| entry.meta.label(class as usize).unwrap_or("ignore"))
            .collect();
        println!("First sample: {}x{}", item.image.width(), item.image.height());
        println!("Labels in first sample: {}", labels.join(", "));
    }

    Ok(())
}
