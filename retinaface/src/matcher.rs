//! IoU-based anchor assignment.
//!
//! Every anchor is labeled from its best ground-truth IoU:
//!
//! - `iou >= positive_threshold` → positive, matched to that ground truth;
//! - `iou < negative_threshold` → negative;
//! - anything in between → ignored.
//!
//! On top of the threshold rule each ground truth forces its single best anchor positive,
//! so small faces always receive at least one positive anchor. When two ground truths
//! share a best anchor, the earlier one keeps it and the later one falls back to its best
//! unclaimed anchor. Ties on equal IoU resolve to the lowest index.

use burn::{
    prelude::*,
    tensor::{backend::Backend, ElementConversion},
};

use crate::{
    config::{AnchorLabel, MatcherConfig},
    error::RetinaFaceResult,
};

/// Assigns a label and a ground-truth index to every anchor of one image.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct AnchorMatcher {
    positive_threshold: f32,
    negative_threshold: f32,
}

/// Per-anchor outcome of [`AnchorMatcher::match_anchors`].
#[derive(Debug, Clone)]
pub struct MatchResult<B: Backend> {
    /// `[M]` labels: `1` positive, `0` negative, `-1` ignored.
    pub labels: Tensor<B, 1, Int>,
    /// `[M]` matched ground-truth index, `-1` for every non-positive anchor.
    pub matched_gt: Tensor<B, 1, Int>,
    /// `[M]` IoU between each anchor and the ground truth it was matched against.
    pub matched_iou: Tensor<B, 1>,
}

impl<B: Backend> MatchResult<B> {
    /// Result for an image without ground truth: every anchor is negative.
    pub fn all_negative(num_anchors: usize, device: &B::Device) -> Self {
        Self {
            labels: Tensor::zeros([num_anchors], device),
            matched_gt: Tensor::full([num_anchors], -1, device),
            matched_iou: Tensor::zeros([num_anchors], device),
        }
    }

    /// Number of anchors.
    pub fn len(&self) -> usize {
        self.labels.dims()[0]
    }

    pub fn is_empty(&self) -> bool {
        self.len() == 0
    }

    /// `[M]` mask of the anchors carrying `label`.
    pub fn mask(&self, label: AnchorLabel) -> Tensor<B, 1, Bool> {
        self.labels.clone().equal_elem(label.value())
    }

    /// Number of anchors carrying `label`.
    pub fn count(&self, label: AnchorLabel) -> usize {
        self.mask(label).int().sum().into_scalar().elem::<i64>() as usize
    }
}

impl AnchorMatcher {
    /// Create a matcher from validated thresholds.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::InvalidConfiguration)` if a threshold lies outside
    /// `[0, 1]` or `negative_threshold > positive_threshold`.
    pub fn new(config: &MatcherConfig) -> RetinaFaceResult<Self> {
        config.validate()?;
        Ok(Self {
            positive_threshold: config.positive_threshold,
            negative_threshold: config.negative_threshold,
        })
    }

    pub const fn positive_threshold(&self) -> f32 {
        self.positive_threshold
    }

    pub const fn negative_threshold(&self) -> f32 {
        self.negative_threshold
    }

    /// Match `[N, 4]` ground-truth boxes against `[M, 4]` anchors, both as `(x1, y1, x2, y2)`.
    pub fn match_anchors<B: Backend>(
        &self,
        gt_boxes: Tensor<B, 2>,
        anchors: Tensor<B, 2>,
    ) -> MatchResult<B> {
        let device = anchors.device();
        let [num_gt, _] = gt_boxes.dims();
        let [num_anchors, _] = anchors.dims();

        if num_gt == 0 {
            return MatchResult::all_negative(num_anchors, &device);
        }

        let iou = iou_matrix(gt_boxes, anchors);

        // Best ground truth of every anchor.
        let best_iou = iou.clone().max_dim(0).reshape([num_anchors]);
        let best_gt = first_argmax(iou.clone(), 0).reshape([num_anchors]);

        let forced_gt = Tensor::<B, 1, Int>::from_data(
            TensorData::new(force_best_anchors(&iou), [num_anchors]),
            &device,
        );
        let is_forced = forced_gt.clone().greater_equal_elem(0);

        let matched = best_gt.mask_where(is_forced.clone(), forced_gt);
        let matched_iou = iou
            .gather(0, matched.clone().reshape([1, num_anchors]))
            .reshape([num_anchors]);

        let positive = (best_iou
            .clone()
            .greater_equal_elem(self.positive_threshold)
            .int()
            + is_forced.int())
        .greater_elem(0);
        let labels = Tensor::<B, 1, Int>::full([num_anchors], AnchorLabel::Ignored.value(), &device)
            .mask_fill(
                best_iou.lower_elem(self.negative_threshold),
                AnchorLabel::Negative.value(),
            )
            .mask_fill(positive.clone(), AnchorLabel::Positive.value());
        let matched_gt = matched.mask_fill(positive.bool_not(), -1);

        MatchResult {
            labels,
            matched_gt,
            matched_iou,
        }
    }
}

/// Ground truth forced onto every anchor, `-1` where none is.
///
/// Faces claim anchors in order: each takes its best anchor, or, when an earlier face already
/// holds that one, its best anchor still unclaimed.
fn force_best_anchors<B: Backend>(iou: &Tensor<B, 2>) -> Vec<i64> {
    let [_, num_anchors] = iou.dims();
    let best_anchor: Vec<usize> = first_argmax(iou.clone(), 1)
        .into_data()
        .iter::<i64>()
        .map(|index| index as usize)
        .collect();

    let mut forced = vec![-1_i64; num_anchors];
    for (gt, &best) in best_anchor.iter().enumerate() {
        let anchor = if forced[best] < 0 {
            Some(best)
        } else {
            best_unclaimed_anchor(iou, gt, &forced)
        };
        match anchor {
            Some(anchor) => forced[anchor] = gt as i64,
            None => tracing::debug!(gt, "no unclaimed anchor left to force"),
        }
    }
    forced
}

/// Highest-IoU anchor of `gt` not yet forced, lowest index on ties.
fn best_unclaimed_anchor<B: Backend>(iou: &Tensor<B, 2>, gt: usize, forced: &[i64]) -> Option<usize> {
    let row = iou.clone().narrow(0, gt, 1).into_data();
    row.iter::<f32>()
        .zip(forced)
        .enumerate()
        .filter(|(_, (_, owner))| **owner < 0)
        .fold(None, |best: Option<(usize, f32)>, (anchor, (value, _))| match best {
            Some((_, best_value)) if best_value >= value => best,
            _ => Some((anchor, value)),
        })
        .map(|(anchor, _)| anchor)
}

/// IoU matrix `[N, M]` between `[N, 4]` and `[M, 4]` corner-form boxes.
///
/// Coordinates broadcast as `[N, 1]` against `[1, M]`; no intermediate is larger than `[N, M]`.
pub fn iou_matrix<B: Backend>(boxes_a: Tensor<B, 2>, boxes_b: Tensor<B, 2>) -> Tensor<B, 2> {
    let [m, _] = boxes_b.dims();
    let a = |index| boxes_a.clone().narrow(1, index, 1);
    let b = |index| boxes_b.clone().narrow(1, index, 1).reshape([1, m]);

    let inter_w = overlap(a(0), a(2), b(0), b(2));
    let inter_h = overlap(a(1), a(3), b(1), b(3));
    let inter = inter_w * inter_h;

    let area_a = (a(2) - a(0)) * (a(3) - a(1));
    let area_b = (b(2) - b(0)) * (b(3) - b(1));

    inter.clone() / (area_a + area_b - inter)
}

/// Length of the overlap of `[a_min, a_max]` (`[N, 1]`) and `[b_min, b_max]` (`[1, M]`).
fn overlap<B: Backend>(
    a_min: Tensor<B, 2>,
    a_max: Tensor<B, 2>,
    b_min: Tensor<B, 2>,
    b_max: Tensor<B, 2>,
) -> Tensor<B, 2> {
    // max(a, b) = b + relu(a - b), min(a, b) = b - relu(b - a)
    let start = b_min.clone() + (a_min - b_min).clamp_min(0.0);
    let end = b_max.clone() - (b_max - a_max).clamp_min(0.0);
    (end - start).clamp_min(0.0)
}

/// Index of the maximum along `dim`, resolving ties to the lowest index. Keeps `dim`.
fn first_argmax<B: Backend>(values: Tensor<B, 2>, dim: usize) -> Tensor<B, 2, Int> {
    let dims = values.dims();
    let len = dims[dim];
    let device = values.device();

    let mut index_shape = [1, 1];
    index_shape[dim] = len;
    let indices = Tensor::<B, 1, Int>::arange(0..len as i64, &device).reshape(index_shape);

    // Non-maximal entries are pushed past every valid index before taking the minimum.
    let max = values.clone().max_dim(dim);
    let not_max = (values - max).equal_elem(0.0).bool_not();
    (not_max.int().mul_scalar(len as i64) + indices).min_dim(dim)
}
