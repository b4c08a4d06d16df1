//! RetinaFace multi-task loss.
//!
//! Three terms, weighted and summed:
//!
//! - localization: Smooth-L1 over the box deltas of positive anchors;
//! - classification: softmax cross-entropy over positives plus mined hard negatives;
//! - landmark: Smooth-L1 over the landmark deltas of positives with annotated landmarks.
//!
//! Each term is normalized by the number of anchors it covers, clamped to at least one.
//!
//! Hard negatives are mined per image, `neg_pos_ratio` per positive. An image without
//! faces therefore adds no classification signal while other images in the batch have
//! positives; only an all-negative batch mines up to `negatives_for_hard` per image.

use std::collections::HashMap;

use burn::{
    prelude::*,
    tensor::{backend::Backend, cast::ToElement, ElementConversion, Tensor},
};

use super::{
    confidence::{hard_negative_mask, per_anchor_cross_entropy},
    smooth_l1::SmoothL1Loss,
};
use crate::{
    box_coder::NUM_LANDMARKS,
    config::AnchorLabel,
    error::{RetinaFaceError, RetinaFaceResult},
    targets::TargetBatch,
};

/// Configuration for the multi-task loss.
#[derive(Config, Debug)]
pub struct MultiBoxLossConfig {
    #[config(default = 2.0)]
    pub loc_weight: f32,
    #[config(default = 1.0)]
    pub cls_weight: f32,
    #[config(default = 1.0)]
    pub landmark_weight: f32,
    /// Hard negatives mined per positive anchor of an image.
    #[config(default = 7)]
    pub neg_pos_ratio: usize,
    /// Negatives mined per image when the whole batch has no positive anchor.
    #[config(default = 100)]
    pub negatives_for_hard: usize,
}

impl MultiBoxLossConfig {
    /// Validate the weights and mining parameters.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::InvalidConfiguration)` for a negative or non-finite
    /// weight or a zero `neg_pos_ratio`.
    pub fn validate(&self) -> RetinaFaceResult<()> {
        for (name, weight) in [
            ("loc_weight", self.loc_weight),
            ("cls_weight", self.cls_weight),
            ("landmark_weight", self.landmark_weight),
        ] {
            if !(weight.is_finite() && weight >= 0.0) {
                return Err(RetinaFaceError::InvalidConfiguration {
                    reason: format!("{name} must be a non-negative number, got {weight}"),
                });
            }
        }
        if self.neg_pos_ratio == 0 {
            return Err(RetinaFaceError::InvalidConfiguration {
                reason: "neg_pos_ratio must be at least 1".to_string(),
            });
        }
        Ok(())
    }

    /// Validate and initialize the loss.
    ///
    /// # Errors
    ///
    /// See [`MultiBoxLossConfig::validate`].
    pub fn init<B: Backend>(&self) -> RetinaFaceResult<MultiBoxLoss<B>> {
        self.validate()?;
        Ok(MultiBoxLoss {
            loc_weight: self.loc_weight,
            cls_weight: self.cls_weight,
            landmark_weight: self.landmark_weight,
            neg_pos_ratio: self.neg_pos_ratio,
            negatives_for_hard: self.negatives_for_hard,
            smooth_l1: SmoothL1Loss::new(),
        })
    }
}

/// Multi-task detection loss with hard-negative mining.
#[derive(Module, Debug)]
pub struct MultiBoxLoss<B: Backend> {
    pub loc_weight: f32,
    pub cls_weight: f32,
    pub landmark_weight: f32,
    pub neg_pos_ratio: usize,
    pub negatives_for_hard: usize,
    pub smooth_l1: SmoothL1Loss<B>,
}

/// Raw head outputs, aligned 1:1 with the anchor set.
#[derive(Debug, Clone)]
pub struct Predictions<B: Backend> {
    /// `[batch, M, 4]` box deltas.
    pub boxes: Tensor<B, 3>,
    /// `[batch, M, C]` class logits, `C >= 2`, class 1 = face.
    pub logits: Tensor<B, 3>,
    /// `[batch, M, 10]` landmark deltas.
    pub landmarks: Tensor<B, 3>,
}

impl<B: Backend> Predictions<B> {
    pub fn num_anchors(&self) -> usize {
        self.boxes.dims()[1]
    }

    /// Check the prediction shapes against a batch of `batch_size` images and `num_anchors`
    /// anchors.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::AnchorCountMismatch)` if any head disagrees with
    /// `num_anchors`, and `Err(RetinaFaceError::InvalidTensorShape)` for any other mismatch.
    pub fn validate(&self, batch_size: usize, num_anchors: usize) -> RetinaFaceResult<()> {
        let heads = [
            ("boxes", self.boxes.dims(), Some(4)),
            ("logits", self.logits.dims(), None),
            ("landmarks", self.landmarks.dims(), Some(NUM_LANDMARKS * 2)),
        ];

        for (name, [batch, anchors, width], expected_width) in heads {
            if anchors != num_anchors {
                return Err(RetinaFaceError::AnchorCountMismatch {
                    expected: num_anchors,
                    actual: anchors,
                });
            }
            let width_ok = expected_width.map_or(width >= 2, |expected| width == expected);
            if batch != batch_size || !width_ok {
                let expected = expected_width.map_or_else(
                    || format!("[{batch_size}, {num_anchors}, C >= 2]"),
                    |width| format!("[{batch_size}, {num_anchors}, {width}]"),
                );
                return Err(RetinaFaceError::InvalidTensorShape {
                    expected,
                    actual: format!("{name} [{batch}, {anchors}, {width}]"),
                });
            }
        }
        Ok(())
    }
}

/// Loss terms of one batch.
#[derive(Debug, Clone)]
pub struct MultiBoxLossOutput<B: Backend> {
    /// Weighted sum of the three terms, `[1]`.
    pub loss: Tensor<B, 1>,
    pub loss_loc: Tensor<B, 1>,
    pub loss_cls: Tensor<B, 1>,
    pub loss_landmark: Tensor<B, 1>,
    /// Positive anchors in the batch.
    pub num_positives: usize,
    /// Hard negatives selected for the classification term.
    pub num_negatives: usize,
}

impl<B: Backend> MultiBoxLossOutput<B> {
    /// Scalar values of every term, keyed `loss`, `loss_loc`, `loss_cls` and `loss_ldm`.
    pub fn to_loss_dict(&self) -> HashMap<String, f64> {
        [
            ("loss", &self.loss),
            ("loss_loc", &self.loss_loc),
            ("loss_cls", &self.loss_cls),
            ("loss_ldm", &self.loss_landmark),
        ]
        .into_iter()
        .map(|(name, value)| (name.to_string(), value.clone().into_scalar().to_f64()))
        .collect()
    }
}

impl<B: Backend> Default for MultiBoxLoss<B> {
    fn default() -> Self {
        Self::new()
    }
}

impl<B: Backend> MultiBoxLoss<B> {
    /// Create the loss with the reference weights (2, 1, 1) and a 7:1 mining ratio.
    pub fn new() -> Self {
        let config = MultiBoxLossConfig::new();
        Self {
            loc_weight: config.loc_weight,
            cls_weight: config.cls_weight,
            landmark_weight: config.landmark_weight,
            neg_pos_ratio: config.neg_pos_ratio,
            negatives_for_hard: config.negatives_for_hard,
            smooth_l1: SmoothL1Loss::new(),
        }
    }

    /// Calculate the multi-task loss of a batch.
    ///
    /// # Arguments
    /// * `predictions` - Head outputs for every anchor
    /// * `targets` - Targets built against the same anchor set
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::AnchorCountMismatch)` if predictions and targets are not
    /// aligned to the same anchors, or `Err(RetinaFaceError::InvalidTensorShape)` for any
    /// other shape mismatch.
    pub fn forward(
        &self,
        predictions: Predictions<B>,
        targets: TargetBatch<B>,
    ) -> RetinaFaceResult<MultiBoxLossOutput<B>> {
        predictions.validate(targets.batch_size(), targets.num_anchors())?;

        let positive = targets
            .labels
            .clone()
            .equal_elem(AnchorLabel::Positive.value());
        let negative = targets
            .labels
            .clone()
            .equal_elem(AnchorLabel::Negative.value());

        let positive_weight = positive.clone().float();
        let loss_loc = normalized_sum(
            self.smooth_l1
                .forward_rows(predictions.boxes, targets.boxes),
            positive_weight,
        );

        let landmark_weight = (targets.landmark_valid.int() + positive.clone().int())
            .equal_elem(2)
            .float();
        let loss_landmark = normalized_sum(
            self.smooth_l1
                .forward_rows(predictions.landmarks, targets.landmarks),
            landmark_weight,
        );

        let cross_entropy = per_anchor_cross_entropy(predictions.logits, targets.labels);
        let positives_per_image = positive.clone().int().sum_dim(1);
        let negatives_per_image = negative.clone().int().sum_dim(1);
        let num_positives = to_count(positives_per_image.clone().sum());

        let quota = if num_positives == 0 {
            negatives_per_image.clamp_max(self.negatives_for_hard as i64)
        } else {
            positives_per_image
                .mul_scalar(self.neg_pos_ratio as i64)
                .min_pair(negatives_per_image)
        };
        let hard_negatives = hard_negative_mask(cross_entropy.clone().detach(), negative, quota);
        let num_negatives = to_count(hard_negatives.clone().int().sum());

        let loss_cls = normalized_sum(
            cross_entropy,
            (positive.int() + hard_negatives.int()).float(),
        );

        let loss = loss_loc.clone() * self.loc_weight
            + loss_cls.clone() * self.cls_weight
            + loss_landmark.clone() * self.landmark_weight;

        tracing::trace!(num_positives, num_negatives, "multibox loss");

        Ok(MultiBoxLossOutput {
            loss,
            loss_loc,
            loss_cls,
            loss_landmark,
            num_positives,
            num_negatives,
        })
    }
}

/// `sum(values * weight) / max(sum(weight), 1)`.
fn normalized_sum<B: Backend>(values: Tensor<B, 2>, weight: Tensor<B, 2>) -> Tensor<B, 1> {
    let count = weight.clone().sum().clamp_min(1.0);
    (values * weight).sum() / count
}

fn to_count<B: Backend>(value: Tensor<B, 1, Int>) -> usize {
    value.into_scalar().elem::<i64>() as usize
}
