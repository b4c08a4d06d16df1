//! Anchor Layout Tool
//!
//! Prints the anchor pyramid a configuration produces: the grid of every level, the
//! anchors per cell and the total the detection head has to emit.
//!
//! ## Usage
//!
//! ```bash
//! # Layout of the MobileNet preset
//! cargo run --bin anchors
//!
//! # Layout of a configuration file, with the first 8 anchors
//! cargo run --bin anchors -- --config retinaface.json --show 8
//!
//! # Save the ResNet-50 preset as a starting point for a configuration file
//! cargo run --bin anchors -- --backbone resnet50 --save-config retinaface.json
//! ```

use std::path::PathBuf;

use anyhow::{Context, Result};
use burn::config::Config;
use clap::Parser;
use retinaface_burn::{AnchorConfig, AnchorGenerator};
use retinaface_tools::{init_logging, load_model_config};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backbone preset (mobilenet or resnet50), used without a configuration file
    #[arg(long)]
    backbone: Option<String>,

    /// Override the training image size as HEIGHT WIDTH
    #[arg(long, num_args = 2, value_names = ["HEIGHT", "WIDTH"])]
    image_size: Option<Vec<usize>>,

    /// Number of leading anchors to print
    #[arg(long, default_value = "0")]
    show: usize,

    /// Write the resolved configuration to this path
    #[arg(long)]
    save_config: Option<PathBuf>,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    let mut config = load_model_config(args.config.as_deref(), args.backbone.as_deref())?;
    if let Some(size) = &args.image_size {
        config.anchors.image_size = [size[0], size[1]];
        config
            .validate()
            .context("Invalid image size override")?;
    }

    if let Some(path) = &args.save_config {
        config
            .save(path)
            .with_context(|| format!("Failed to write config file: {}", path.display()))?;
        tracing::info!(path = %path.display(), "configuration saved");
    }

    let generator = AnchorGenerator::new(config.anchors.clone())?;
    let anchors = generator.generate();

    let [height, width] = config.anchors.image_size;
    println!("Backbone: {}", config.backbone.name());
    println!("Image size: {height}x{width}");
    print_levels(&config.anchors);
    println!("Total anchors: {}", anchors.len());

    if args.show > 0 {
        println!("\n=== Leading Anchors (cx, cy, w, h) ===");
        for (index, [cx, cy, w, h]) in anchors.as_slice().iter().take(args.show).enumerate() {
            println!("{index:>6}: {cx:.5} {cy:.5} {w:.5} {h:.5}");
        }
    }

    Ok(())
}

/// Print the grid and anchor count of every pyramid level.
fn print_levels(config: &AnchorConfig) {
    println!("\n=== Pyramid Levels ===");
    for (level, [rows, cols]) in config.levels.iter().zip(config.feature_maps()) {
        let per_cell = AnchorConfig::anchors_per_cell(level);
        println!(
            "stride {:>3}: grid {rows}x{cols}, sizes {:?}, ratios {:?}, {per_cell} per cell, {} anchors",
            level.stride,
            level.min_sizes,
            level.aspect_ratios,
            rows * cols * per_cell
        );
    }
    println!();
}
