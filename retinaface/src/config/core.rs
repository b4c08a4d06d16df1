//! Core configuration structures for RetinaFace training.
//!
//! This module contains the configuration of every stage of target construction
//! (anchor layout, matching thresholds, encoding variances) and the aggregate
//! [`RetinaFaceConfig`] that is validated once at startup.

use crate::{
    error::{RetinaFaceError, RetinaFaceResult},
    losses::MultiBoxLossConfig,
    schedule::TrainingScheduleConfig,
};
use burn::prelude::*;

use super::enums::Backbone;

/// Main configuration for RetinaFace training.
///
/// Aggregates the anchor layout, matcher, box coder, loss and training schedule.
#[derive(Config, Debug)]
pub struct RetinaFaceConfig {
    /// Backbone the detector head sits on.
    #[config(default = "Backbone::MobileNet025")]
    pub backbone: Backbone,
    /// Anchor layout.
    #[config(default = "AnchorConfig::new()")]
    pub anchors: AnchorConfig,
    /// IoU assignment thresholds.
    #[config(default = "MatcherConfig::new()")]
    pub matcher: MatcherConfig,
    /// Regression target encoding.
    #[config(default = "BoxCoderConfig::new()")]
    pub box_coder: BoxCoderConfig,
    /// Multi-task loss weights and mining parameters.
    #[config(default = "MultiBoxLossConfig::new()")]
    pub loss: MultiBoxLossConfig,
    /// Freeze / unfreeze phases.
    #[config(default = "TrainingScheduleConfig::new()")]
    pub schedule: TrainingScheduleConfig,
}

/// One feature pyramid level of the anchor layout.
#[derive(Config, Debug)]
pub struct AnchorLevelConfig {
    /// Downsampling factor of the level's feature map, in pixels.
    pub stride: usize,
    /// Anchor side lengths in pixels, one anchor per size and aspect ratio at every cell.
    pub min_sizes: Vec<f32>,
    /// Width / height ratios applied to every size.
    #[config(default = "vec![1.0]")]
    pub aspect_ratios: Vec<f32>,
}

/// Anchor layout over the training image.
#[derive(Config, Debug)]
pub struct AnchorConfig {
    /// Training image size as `[height, width]` in pixels.
    #[config(default = "[640, 640]")]
    pub image_size: [usize; 2],
    /// Pyramid levels, in the order the detection head emits them.
    #[config(default = "default_levels()")]
    pub levels: Vec<AnchorLevelConfig>,
    /// Clamp anchor coordinates to `[0, 1]`.
    #[config(default = false)]
    pub clip: bool,
}

/// Thresholds of the IoU-based anchor assignment.
///
/// Anchors whose best IoU falls in `[negative_threshold, positive_threshold)` are ignored.
/// Equal thresholds leave no ignored band.
#[derive(Config, Debug)]
pub struct MatcherConfig {
    #[config(default = 0.35)]
    pub positive_threshold: f32,
    #[config(default = 0.3)]
    pub negative_threshold: f32,
}

/// Variances of the center-offset / log-scale encoding.
#[derive(Config, Debug)]
pub struct BoxCoderConfig {
    /// `[center variance, size variance]`.
    #[config(default = "[0.1, 0.2]")]
    pub variances: [f32; 2],
}

/// RetinaFace pyramid: strides 8, 16 and 32 with two square anchors per cell.
fn default_levels() -> Vec<AnchorLevelConfig> {
    vec![
        AnchorLevelConfig::new(8, vec![16.0, 32.0]),
        AnchorLevelConfig::new(16, vec![64.0, 128.0]),
        AnchorLevelConfig::new(32, vec![256.0, 512.0]),
    ]
}

impl RetinaFaceConfig {
    /// Reference configuration for the MobileNet 0.25 backbone (640 x 640 input).
    #[must_use]
    pub fn mobilenet() -> Self {
        Self::for_backbone(Backbone::MobileNet025)
    }

    /// Reference configuration for the ResNet-50 backbone (840 x 840 input).
    #[must_use]
    pub fn resnet50() -> Self {
        Self::for_backbone(Backbone::Resnet50)
    }

    fn for_backbone(backbone: Backbone) -> Self {
        let size = backbone.default_image_size();
        Self::new()
            .with_anchors(AnchorConfig::new().with_image_size([size, size]))
            .with_backbone(backbone)
    }

    /// Validate the configuration and return appropriate errors for invalid settings.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::InvalidConfiguration)` if any validation rule is violated.
    pub fn validate(&self) -> RetinaFaceResult<()> {
        self.anchors.validate()?;
        self.matcher.validate()?;
        self.box_coder.validate()?;
        self.loss.validate()?;
        self.schedule.validate()?;
        Ok(())
    }
}

impl AnchorConfig {
    /// Number of anchors placed at every grid cell of `level`.
    #[must_use]
    pub fn anchors_per_cell(level: &AnchorLevelConfig) -> usize {
        level.min_sizes.len() * level.aspect_ratios.len()
    }

    /// Feature map size `[rows, cols]` of every level, `ceil(size / stride)`.
    #[must_use]
    pub fn feature_maps(&self) -> Vec<[usize; 2]> {
        let [height, width] = self.image_size;
        self.levels
            .iter()
            .map(|level| [height.div_ceil(level.stride), width.div_ceil(level.stride)])
            .collect()
    }

    /// Total number of anchors this layout produces.
    #[must_use]
    pub fn num_anchors(&self) -> usize {
        self.levels
            .iter()
            .zip(self.feature_maps())
            .map(|(level, [rows, cols])| rows * cols * Self::anchors_per_cell(level))
            .sum()
    }

    /// Validate the anchor layout.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::InvalidConfiguration)` on a zero image dimension,
    /// an empty level list, a zero stride, an empty size list or a non-positive size or ratio.
    pub fn validate(&self) -> RetinaFaceResult<()> {
        let [height, width] = self.image_size;
        if height == 0 || width == 0 {
            return Err(invalid(format!(
                "Image size must be non-zero, got {height}x{width}"
            )));
        }
        if self.levels.is_empty() {
            return Err(invalid("At least one anchor level is required".to_string()));
        }

        for (index, level) in self.levels.iter().enumerate() {
            if level.stride == 0 {
                return Err(invalid(format!("Anchor level {index} has a zero stride")));
            }
            if level.min_sizes.is_empty() {
                return Err(invalid(format!("Anchor level {index} has no anchor sizes")));
            }
            if level.aspect_ratios.is_empty() {
                return Err(invalid(format!(
                    "Anchor level {index} has no aspect ratios"
                )));
            }
            if let Some(size) = level
                .min_sizes
                .iter()
                .find(|size| !(size.is_finite() && **size > 0.0))
            {
                return Err(invalid(format!(
                    "Anchor level {index} has an invalid size: {size}"
                )));
            }
            if let Some(ratio) = level
                .aspect_ratios
                .iter()
                .find(|ratio| !(ratio.is_finite() && **ratio > 0.0))
            {
                return Err(invalid(format!(
                    "Anchor level {index} has an invalid aspect ratio: {ratio}"
                )));
            }
        }

        Ok(())
    }
}

impl MatcherConfig {
    /// Validate the thresholds.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::InvalidConfiguration)` if a threshold lies outside
    /// `[0, 1]` or the negative threshold exceeds the positive one.
    pub fn validate(&self) -> RetinaFaceResult<()> {
        for (name, value) in [
            ("positive_threshold", self.positive_threshold),
            ("negative_threshold", self.negative_threshold),
        ] {
            if !(0.0..=1.0).contains(&value) {
                return Err(invalid(format!(
                    "{name} must lie in [0, 1], got {value}"
                )));
            }
        }

        if self.negative_threshold > self.positive_threshold {
            return Err(invalid(format!(
                "negative_threshold ({}) must not exceed positive_threshold ({})",
                self.negative_threshold, self.positive_threshold
            )));
        }

        Ok(())
    }

    /// Width of the IoU band whose anchors are ignored.
    #[must_use]
    pub fn ignored_band(&self) -> f32 {
        (self.positive_threshold - self.negative_threshold).max(0.0)
    }
}

impl BoxCoderConfig {
    /// Validate the variances.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::InvalidConfiguration)` if a variance is not a positive
    /// finite number.
    pub fn validate(&self) -> RetinaFaceResult<()> {
        if self
            .variances
            .iter()
            .any(|variance| !(variance.is_finite() && *variance > 0.0))
        {
            return Err(invalid(format!(
                "Variances must be positive, got {:?}",
                self.variances
            )));
        }
        Ok(())
    }
}

fn invalid(reason: String) -> RetinaFaceError {
    RetinaFaceError::InvalidConfiguration { reason }
}
