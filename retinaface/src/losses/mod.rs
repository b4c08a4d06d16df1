//! Loss functions for RetinaFace training.
//!
//! - `smooth_l1`: the regression loss shared by the box and landmark terms
//! - `confidence`: per-anchor cross-entropy and hard-negative mining
//! - `multibox`: the weighted multi-task loss

pub mod confidence;
pub mod multibox;
pub mod smooth_l1;

// Re-export loss functions and their configs
pub use confidence::{hard_negative_mask, per_anchor_cross_entropy};
pub use multibox::{MultiBoxLoss, MultiBoxLossConfig, MultiBoxLossOutput, Predictions};
pub use smooth_l1::{SmoothL1Loss, SmoothL1LossConfig};
