//! Target Inspection Tool
//!
//! Builds the training targets of WIDER FACE samples and reports how the faces were
//! matched to anchors, then scores an untrained head (all-zero predictions) against the
//! targets. Useful for checking thresholds and anchor sizes against a dataset before a
//! run is started.
//!
//! ## Usage
//!
//! ```bash
//! # Normalize by the real image sizes
//! cargo run --bin inspect_targets -- --labels widerface/train/label.txt \
//!     --images widerface/train/images
//!
//! # Without images, assuming every image is 1024x768
//! cargo run --bin inspect_targets -- --labels widerface/train/label.txt \
//!     --source-size 1024 768 --limit 50
//! ```

use std::path::{Path, PathBuf};

use anyhow::{Context, Result};
use burn::{data::dataset::Dataset, prelude::*};
use clap::Parser;
use retinaface_burn::{
    load_widerface_labels, GroundTruth, MultiBoxLoss, Predictions, RetinaFaceConfig,
    TargetBuilder, WiderFaceDataset, NUM_LANDMARKS,
};
use retinaface_tools::{
    create_device, get_backend_name, init_logging, load_model_config, SelectedBackend,
    SelectedDevice,
};

#[derive(Parser, Debug)]
#[command(author, version, about, long_about = None)]
struct Args {
    /// WIDER FACE label file
    #[arg(long)]
    labels: PathBuf,

    /// Image directory; when given, boxes are normalized by the real image sizes
    #[arg(long)]
    images: Option<PathBuf>,

    /// Image size as WIDTH HEIGHT assumed when no image directory is given
    #[arg(long, num_args = 2, value_names = ["WIDTH", "HEIGHT"], default_values_t = [1024, 1024])]
    source_size: Vec<u32>,

    /// Configuration file path
    #[arg(short, long)]
    config: Option<PathBuf>,

    /// Backbone preset (mobilenet or resnet50), used without a configuration file
    #[arg(long)]
    backbone: Option<String>,

    /// Number of samples to inspect
    #[arg(long, default_value = "10")]
    limit: usize,

    /// Batch size for the loss report
    #[arg(long, default_value = "4")]
    batch_size: usize,
}

/// Match statistics accumulated over all inspected samples.
#[derive(Debug, Default)]
struct Summary {
    samples: usize,
    faces: usize,
    positives: usize,
    ignored: usize,
    landmark_targets: usize,
    unmatched_faces: usize,
}

fn main() -> Result<()> {
    init_logging();
    let args = Args::parse();

    if args.batch_size == 0 {
        anyhow::bail!("Batch size must be at least 1");
    }

    let device = create_device();

    let config = load_model_config(args.config.as_deref(), args.backbone.as_deref())?;
    let builder =
        TargetBuilder::from_config(&config).context("Failed to create target builder")?;

    let samples = match &args.images {
        Some(images) => samples_from_images(&args.labels, images, &config, args.limit)?,
        None => {
            let source_size = [args.source_size[0], args.source_size[1]];
            samples_from_labels(&args.labels, source_size, args.limit)?
        }
    };
    if samples.is_empty() {
        anyhow::bail!("No valid samples found in {}", args.labels.display());
    }

    let summary = inspect_samples(&builder, &samples, &device);
    print_summary(&summary, builder.anchors().len());

    report_baseline_loss(&builder, &config, &samples, args.batch_size, &device)?;

    Ok(())
}

/// Samples normalized by the size of their image files.
fn samples_from_images(
    labels: &Path,
    images: &Path,
    config: &RetinaFaceConfig,
    limit: usize,
) -> Result<Vec<(String, GroundTruth)>> {
    let dataset = WiderFaceDataset::from_parts(labels, images, config.anchors.image_size)
        .context("Failed to create dataset")?;

    Ok((0..dataset.len().min(limit))
        .filter_map(|index| dataset.get(index))
        .map(|item| (item.path, item.ground_truth))
        .collect())
}

/// Samples normalized by a fixed image size; malformed entries are skipped.
fn samples_from_labels(
    labels: &Path,
    [width, height]: [u32; 2],
    limit: usize,
) -> Result<Vec<(String, GroundTruth)>> {
    let entries = load_widerface_labels(labels).context("Failed to load label file")?;

    Ok(entries
        .into_iter()
        .filter_map(|entry| match entry.to_ground_truth(width, height) {
            Ok(ground_truth) => Some((entry.path, ground_truth)),
            Err(error) => {
                tracing::warn!(path = %entry.path, %error, "skipping sample");
                None
            }
        })
        .take(limit)
        .collect())
}

/// Build the targets of every sample and log its match statistics.
fn inspect_samples(
    builder: &TargetBuilder,
    samples: &[(String, GroundTruth)],
    device: &SelectedDevice,
) -> Summary {
    let mut summary = Summary::default();

    for (path, ground_truth) in samples {
        let targets = builder.build::<SelectedBackend>(ground_truth, device);
        let positives = targets.num_positives();
        let ignored = targets.num_ignored();
        let landmark_targets = targets.num_landmark_targets();
        let unmatched_faces = targets.num_unmatched_faces(ground_truth.len());

        tracing::info!(
            %path,
            faces = ground_truth.len(),
            positives,
            ignored,
            landmark_targets,
            "targets built"
        );
        if unmatched_faces > 0 {
            tracing::warn!(%path, unmatched_faces, "faces without a positive anchor");
        }

        summary.samples += 1;
        summary.faces += ground_truth.len();
        summary.positives += positives;
        summary.ignored += ignored;
        summary.landmark_targets += landmark_targets;
        summary.unmatched_faces += unmatched_faces;
    }

    summary
}

fn print_summary(summary: &Summary, num_anchors: usize) {
    println!("\n=== Target Summary ===");
    println!("Backend: {}", get_backend_name());
    println!("Samples: {}", summary.samples);
    println!("Anchors per image: {num_anchors}");
    println!("Faces: {}", summary.faces);
    println!("Positive anchors: {}", summary.positives);
    if summary.faces > 0 {
        println!(
            "Positives per face: {:.2}",
            summary.positives as f64 / summary.faces as f64
        );
    }
    println!("Ignored anchors: {}", summary.ignored);
    println!("Landmark targets: {}", summary.landmark_targets);
    println!("Faces without a positive anchor: {}", summary.unmatched_faces);
}

/// Score all-zero predictions against the targets, batch by batch.
fn report_baseline_loss(
    builder: &TargetBuilder,
    config: &RetinaFaceConfig,
    samples: &[(String, GroundTruth)],
    batch_size: usize,
    device: &SelectedDevice,
) -> Result<()> {
    println!("\n=== Baseline Loss (untrained head) ===");

    let loss: MultiBoxLoss<SelectedBackend> = config.loss.init()?;
    let num_anchors = builder.anchors().len();

    for (index, chunk) in samples.chunks(batch_size).enumerate() {
        let ground_truths: Vec<GroundTruth> =
            chunk.iter().map(|(_, ground_truth)| ground_truth.clone()).collect();
        let targets = builder.build_batch::<SelectedBackend>(&ground_truths, device)?;

        let batch = ground_truths.len();
        let predictions = Predictions {
            boxes: Tensor::zeros([batch, num_anchors, 4], device),
            logits: Tensor::zeros([batch, num_anchors, 2], device),
            landmarks: Tensor::zeros([batch, num_anchors, NUM_LANDMARKS * 2], device),
        };

        let output = loss.forward(predictions, targets)?;
        let mut terms: Vec<_> = output.to_loss_dict().into_iter().collect();
        terms.sort_by(|a, b| a.0.cmp(&b.0));

        let terms = terms
            .iter()
            .map(|(name, value)| format!("{name}={value:.4}"))
            .collect::<Vec<_>>()
            .join(", ");
        println!(
            "Batch {}: {terms} (positives {}, hard negatives {})",
            index + 1,
            output.num_positives,
            output.num_negatives
        );
    }

    Ok(())
}
