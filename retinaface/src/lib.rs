//! Training targets and multi-task loss for RetinaFace, built on Burn.
//!
//! The crate turns annotated faces into dense per-anchor training targets and scores head
//! predictions against them. Everything is generic over the Burn backend and runs as
//! batched tensor operations.
//!
//! ## Pipeline
//!
//! - [`AnchorGenerator`] tiles the configured pyramid levels into an immutable [`Anchors`]
//!   set, generated once per run and shared by every consumer.
//! - [`AnchorMatcher`] labels every anchor positive, negative or ignored from its IoU with
//!   the ground truth, forcing each face's best anchor positive.
//! - [`BoxCoder`] encodes matched boxes and landmarks as variance-scaled offsets.
//! - [`TargetBuilder`] combines the three into [`EncodedTargets`] / [`TargetBatch`].
//! - [`MultiBoxLoss`] computes the Smooth-L1 box and landmark terms and the cross-entropy
//!   term with hard-negative mining.
//!
//! ## Features
//!
//! - `train`: WIDER FACE dataset loading and batching, training step output and loss
//!   metrics for Burn's `Learner`.
//!
//! ## Usage
//!
//! ```rust,ignore
//! use retinaface_burn::{
//!     GroundTruth, FaceAnnotation, MultiBoxLoss, Predictions, RetinaFaceConfig, TargetBuilder,
//! };
//!
//! let config = RetinaFaceConfig::mobilenet();
//! let builder = TargetBuilder::from_config(&config)?;
//! let loss = config.loss.init::<B>()?;
//!
//! let faces = GroundTruth::new(vec![FaceAnnotation::new([0.1, 0.2, 0.3, 0.45])])?;
//! let targets = builder.build_batch::<B>(&[faces], &device)?;
//! let output = loss.forward(predictions, targets)?;
//! output.loss.backward();
//! ```

pub mod anchors;
pub mod annotation;
pub mod box_coder;
pub mod config;
pub mod error;
pub mod losses;
pub mod matcher;
pub mod schedule;
pub mod targets;

#[cfg(feature = "train")]
pub mod dataset;
#[cfg(feature = "train")]
pub mod metrics;
#[cfg(feature = "train")]
pub mod training;


pub use anchors::{center_to_corners, corners_to_center, AnchorGenerator, Anchors};
pub use annotation::{
    load_widerface_labels, parse_widerface_labels, FaceAnnotation, GroundTruth, LabeledFace,
    LabeledImage, Landmark,
};
pub use box_coder::{BoxCoder, NUM_LANDMARKS};
pub use config::*;
pub use error::{DataError, RetinaFaceError, RetinaFaceResult};
pub use losses::{
    MultiBoxLoss, MultiBoxLossConfig, MultiBoxLossOutput, Predictions, SmoothL1Loss,
    SmoothL1LossConfig,
};
pub use matcher::{iou_matrix, AnchorMatcher, MatchResult};
pub use schedule::{PhaseRunner, TrainingPhaseConfig, TrainingScheduleConfig};
pub use targets::{EncodedTargets, TargetBatch, TargetBuilder};

#[cfg(feature = "train")]
pub use dataset::{FaceBatch, FaceBatcher, FaceItem, WiderFaceDataset, RGB_MEAN};
#[cfg(feature = "train")]
pub use metrics::{LossComponent, LossComponentInput, LossComponentMetric};
#[cfg(feature = "train")]
pub use training::RetinaFaceOutput;
