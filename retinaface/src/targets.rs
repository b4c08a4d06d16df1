//! Dense per-anchor training targets.
//!
//! [`TargetBuilder`] owns the shared anchor set and turns the ground truth of each image
//! into targets aligned 1:1 with the anchors, and therefore with the network predictions.

use burn::{
    prelude::*,
    tensor::{backend::Backend, ElementConversion},
};

use crate::{
    anchors::{center_to_corners, AnchorGenerator, Anchors},
    annotation::GroundTruth,
    box_coder::{BoxCoder, NUM_LANDMARKS},
    config::{AnchorLabel, RetinaFaceConfig},
    error::{RetinaFaceError, RetinaFaceResult},
    matcher::AnchorMatcher,
};

/// Targets of one image, `M` = number of anchors.
#[derive(Debug, Clone)]
pub struct EncodedTargets<B: Backend> {
    /// `[M, 4]` box regression targets, zero for non-positive anchors.
    pub boxes: Tensor<B, 2>,
    /// `[M]` labels: `1` face, `0` background, `-1` ignored.
    pub labels: Tensor<B, 1, Int>,
    /// `[M, 10]` landmark regression targets, zero where `landmark_valid` is unset.
    pub landmarks: Tensor<B, 2>,
    /// `[M]` positive anchors whose ground truth carries landmarks.
    pub landmark_valid: Tensor<B, 1, Bool>,
    /// `[M]` ground-truth index of every positive anchor, `-1` elsewhere.
    pub matched_gt: Tensor<B, 1, Int>,
}

impl<B: Backend> EncodedTargets<B> {
    pub fn num_anchors(&self) -> usize {
        self.labels.dims()[0]
    }

    pub fn num_positives(&self) -> usize {
        count(self.labels.clone().equal_elem(AnchorLabel::Positive.value()))
    }

    pub fn num_ignored(&self) -> usize {
        count(self.labels.clone().equal_elem(AnchorLabel::Ignored.value()))
    }

    pub fn num_landmark_targets(&self) -> usize {
        count(self.landmark_valid.clone())
    }

    /// Number of the image's `num_faces` faces that no positive anchor is matched to.
    pub fn num_unmatched_faces(&self, num_faces: usize) -> usize {
        let mut matched = vec![false; num_faces];
        for gt in self.matched_gt.clone().into_data().iter::<i64>() {
            if let Some(flag) = usize::try_from(gt).ok().and_then(|gt| matched.get_mut(gt)) {
                *flag = true;
            }
        }
        matched.into_iter().filter(|matched| !matched).count()
    }
}

/// Targets of a batch, stacked along a leading batch dimension.
#[derive(Debug, Clone)]
pub struct TargetBatch<B: Backend> {
    /// `[batch, M, 4]`
    pub boxes: Tensor<B, 3>,
    /// `[batch, M]`
    pub labels: Tensor<B, 2, Int>,
    /// `[batch, M, 10]`
    pub landmarks: Tensor<B, 3>,
    /// `[batch, M]`
    pub landmark_valid: Tensor<B, 2, Bool>,
}

impl<B: Backend> TargetBatch<B> {
    /// Stack per-image targets.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::Dataset)` for an empty batch and
    /// `Err(RetinaFaceError::AnchorCountMismatch)` if the images disagree on the anchor count.
    pub fn stack(targets: Vec<EncodedTargets<B>>) -> RetinaFaceResult<Self> {
        let expected = targets
            .first()
            .map(EncodedTargets::num_anchors)
            .ok_or_else(|| RetinaFaceError::Dataset {
                message: "Cannot build targets for an empty batch".to_string(),
            })?;
        if let Some(actual) = targets
            .iter()
            .map(EncodedTargets::num_anchors)
            .find(|&actual| actual != expected)
        {
            return Err(RetinaFaceError::AnchorCountMismatch { expected, actual });
        }

        let mut boxes = Vec::with_capacity(targets.len());
        let mut labels = Vec::with_capacity(targets.len());
        let mut landmarks = Vec::with_capacity(targets.len());
        let mut landmark_valid = Vec::with_capacity(targets.len());
        for target in targets {
            boxes.push(target.boxes);
            labels.push(target.labels);
            landmarks.push(target.landmarks);
            landmark_valid.push(target.landmark_valid);
        }

        Ok(Self {
            boxes: Tensor::stack(boxes, 0),
            labels: Tensor::stack(labels, 0),
            landmarks: Tensor::stack(landmarks, 0),
            landmark_valid: Tensor::stack(landmark_valid, 0),
        })
    }

    pub fn batch_size(&self) -> usize {
        self.labels.dims()[0]
    }

    pub fn num_anchors(&self) -> usize {
        self.labels.dims()[1]
    }
}

/// Builds [`EncodedTargets`] from ground truth against a fixed anchor set.
#[derive(Debug, Clone)]
pub struct TargetBuilder {
    anchors: Anchors,
    matcher: AnchorMatcher,
    coder: BoxCoder,
}

impl TargetBuilder {
    pub const fn new(anchors: Anchors, matcher: AnchorMatcher, coder: BoxCoder) -> Self {
        Self {
            anchors,
            matcher,
            coder,
        }
    }

    /// Validate `config` and build the anchor set, matcher and coder it describes.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::InvalidConfiguration)` if any part of `config` is invalid.
    pub fn from_config(config: &RetinaFaceConfig) -> RetinaFaceResult<Self> {
        config.validate()?;
        let anchors = AnchorGenerator::new(config.anchors.clone())?.generate();
        let matcher = AnchorMatcher::new(&config.matcher)?;
        let coder = BoxCoder::new(&config.box_coder)?;

        tracing::info!(
            anchors = anchors.len(),
            positive_threshold = matcher.positive_threshold(),
            negative_threshold = matcher.negative_threshold(),
            "target builder ready"
        );

        Ok(Self::new(anchors, matcher, coder))
    }

    pub const fn anchors(&self) -> &Anchors {
        &self.anchors
    }

    pub const fn matcher(&self) -> &AnchorMatcher {
        &self.matcher
    }

    pub const fn coder(&self) -> &BoxCoder {
        &self.coder
    }

    /// Build the targets of one image.
    pub fn build<B: Backend>(
        &self,
        ground_truth: &GroundTruth,
        device: &B::Device,
    ) -> EncodedTargets<B> {
        let num_anchors = self.anchors.len();
        let anchors = self.anchors.to_tensor::<B>(device);

        if ground_truth.is_empty() {
            return EncodedTargets {
                boxes: Tensor::zeros([num_anchors, 4], device),
                labels: Tensor::zeros([num_anchors], device),
                landmarks: Tensor::zeros([num_anchors, NUM_LANDMARKS * 2], device),
                landmark_valid: Tensor::<B, 1, Int>::zeros([num_anchors], device).bool(),
                matched_gt: Tensor::full([num_anchors], -1, device),
            };
        }

        let matched = self
            .matcher
            .match_anchors(ground_truth.boxes_tensor(device), center_to_corners(anchors.clone()));

        let positive = matched.mask(AnchorLabel::Positive);
        // Non-positive anchors point at face 0; their targets are zeroed below.
        let face_index = matched.matched_gt.clone().clamp_min(0);

        let boxes = self.coder.encode(
            ground_truth
                .boxes_tensor(device)
                .select(0, face_index.clone()),
            anchors.clone(),
        );
        let boxes = boxes.mask_fill(expand(positive.clone(), 4).bool_not(), 0.0);

        let has_landmarks = ground_truth
            .landmark_mask::<B>(device)
            .int()
            .select(0, face_index.clone());
        let landmark_valid = (has_landmarks + positive.int()).equal_elem(2);

        let landmarks = self.coder.encode_landmarks(
            ground_truth.landmarks_tensor(device).select(0, face_index),
            anchors,
        );
        let landmarks = landmarks.mask_fill(
            expand(landmark_valid.clone(), NUM_LANDMARKS * 2).bool_not(),
            0.0,
        );

        EncodedTargets {
            boxes,
            labels: matched.labels,
            landmarks,
            landmark_valid,
            matched_gt: matched.matched_gt,
        }
    }

    /// Build and stack the targets of a batch of images.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::Dataset)` for an empty batch.
    pub fn build_batch<B: Backend>(
        &self,
        ground_truths: &[GroundTruth],
        device: &B::Device,
    ) -> RetinaFaceResult<TargetBatch<B>> {
        TargetBatch::stack(
            ground_truths
                .iter()
                .map(|ground_truth| self.build(ground_truth, device))
                .collect(),
        )
    }
}

/// Repeat an `[M]` mask over `width` columns.
fn expand<B: Backend>(mask: Tensor<B, 1, Bool>, width: usize) -> Tensor<B, 2, Bool> {
    let [len] = mask.dims();
    mask.reshape([len, 1]).repeat_dim(1, width)
}

fn count<B: Backend, const D: usize>(mask: Tensor<B, D, Bool>) -> usize {
    mask.int().sum().into_scalar().elem::<i64>() as usize
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        annotation::FaceAnnotation,
        config::{AnchorConfig, AnchorLevelConfig, BoxCoderConfig, MatcherConfig},
    };
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    /// 64 x 64 image, one 4 x 4 level with three square sizes per cell.
    fn builder() -> TargetBuilder {
        let config = AnchorConfig::new()
            .with_image_size([64, 64])
            .with_levels(vec![AnchorLevelConfig::new(16, vec![16.0, 24.0, 32.0])]);
        TargetBuilder::new(
            AnchorGenerator::new(config).unwrap().generate(),
            AnchorMatcher::new(&MatcherConfig::new()).unwrap(),
            BoxCoder::new(&BoxCoderConfig::new()).unwrap(),
        )
    }

    fn floats<const D: usize>(tensor: Tensor<TestBackend, D>) -> Vec<f32> {
        tensor.into_data().to_vec::<f32>().unwrap()
    }

    #[test]
    fn test_single_face_yields_three_encoded_positives() {
        let device = Default::default();
        let builder = builder();

        // 24 px face centered on cell (1, 1): IoU 0.44, 1.0 and 0.56 with that cell's
        // anchors and below 0.3 everywhere else.
        let face = FaceAnnotation::new([0.1875, 0.1875, 0.5625, 0.5625])
            .with_landmarks([[0.4375, 0.375]; NUM_LANDMARKS]);
        let targets = builder.build::<TestBackend>(&GroundTruth::new(vec![face]).unwrap(), &device);

        assert_eq!(targets.num_anchors(), 4 * 4 * 3);
        assert_eq!(targets.num_positives(), 3);
        assert_eq!(targets.num_ignored(), 0);
        assert_eq!(targets.num_landmark_targets(), 3);

        let labels = targets
            .labels
            .clone()
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        let positives: Vec<usize> = labels
            .iter()
            .enumerate()
            .filter(|(_, label)| **label == 1)
            .map(|(index, _)| index)
            .collect();
        assert_eq!(positives, vec![15, 16, 17]);

        let boxes = floats(targets.boxes);
        let expected_scales = [1.5_f32.ln() / 0.2, 0.0, 0.75_f32.ln() / 0.2];
        for (anchor, scale) in positives.iter().zip(expected_scales) {
            let row = &boxes[anchor * 4..anchor * 4 + 4];
            assert!(row[0].abs() < 1e-5 && row[1].abs() < 1e-5);
            assert!((row[2] - scale).abs() < 1e-4, "{row:?}");
            assert!((row[3] - scale).abs() < 1e-4, "{row:?}");
        }
        assert!(boxes
            .iter()
            .enumerate()
            .filter(|(index, _)| !positives.contains(&(index / 4)))
            .all(|(_, value)| *value == 0.0));

        // Landmark x offset 0.0625 over the 16 px anchor: 0.0625 / (0.25 * 0.1).
        let landmarks = floats(targets.landmarks);
        assert!((landmarks[15 * 10] - 2.5).abs() < 1e-4);
        assert!(landmarks[15 * 10 + 1].abs() < 1e-5);
    }

    #[test]
    fn test_no_faces_gives_negative_zero_targets() {
        let device = Default::default();
        let targets = builder().build::<TestBackend>(&GroundTruth::empty(), &device);

        assert_eq!(targets.num_positives(), 0);
        assert_eq!(targets.num_ignored(), 0);
        assert_eq!(targets.num_landmark_targets(), 0);
        assert!(floats(targets.boxes).iter().all(|value| *value == 0.0));
        assert!(floats(targets.landmarks).iter().all(|value| *value == 0.0));
    }

    #[test]
    fn test_landmark_validity_follows_the_matched_face() {
        let device = Default::default();
        let ground_truth = GroundTruth::new(vec![
            FaceAnnotation::new([0.1875, 0.1875, 0.5625, 0.5625]),
            FaceAnnotation::new([0.75, 0.75, 1.0, 1.0]).with_landmarks([[0.875, 0.875]; 5]),
        ])
        .unwrap();

        let targets = builder().build::<TestBackend>(&ground_truth, &device);
        let labels = targets
            .labels
            .clone()
            .into_data()
            .convert::<i64>()
            .to_vec::<i64>()
            .unwrap();
        let valid = targets
            .landmark_valid
            .clone()
            .into_data()
            .to_vec::<bool>()
            .unwrap();

        // Landmark targets exist only for positives of the second face.
        assert!(targets.num_landmark_targets() > 0);
        assert!(!valid[15] && !valid[16] && !valid[17]);
        for (label, valid) in labels.iter().zip(&valid) {
            if *valid {
                assert_eq!(*label, 1);
            }
        }
    }

    #[test]
    fn test_every_face_keeps_a_matched_anchor() {
        let device = Default::default();
        let builder = builder();

        // Two faces whose best anchor is the same 16 px anchor of cell (1, 1).
        let ground_truth = GroundTruth::new(vec![
            FaceAnnotation::new([0.25, 0.25, 0.5, 0.5]),
            FaceAnnotation::new([0.25, 0.25, 0.5, 0.48]),
        ])
        .unwrap();
        let targets = builder.build::<TestBackend>(&ground_truth, &device);

        assert!(targets.num_positives() >= 2);
        assert_eq!(targets.num_unmatched_faces(ground_truth.len()), 0);

        let empty = builder.build::<TestBackend>(&GroundTruth::empty(), &device);
        assert_eq!(empty.num_unmatched_faces(0), 0);
        // Faces the targets were not built from count as unmatched.
        assert_eq!(empty.num_unmatched_faces(2), 2);
        assert_eq!(targets.num_unmatched_faces(3), 1);
    }

    #[test]
    fn test_build_batch_stacks_images() {
        let device = Default::default();
        let builder = builder();
        let face = FaceAnnotation::new([0.1875, 0.1875, 0.5625, 0.5625]);
        let ground_truths = vec![GroundTruth::new(vec![face]).unwrap(), GroundTruth::empty()];

        let batch = builder
            .build_batch::<TestBackend>(&ground_truths, &device)
            .unwrap();

        assert_eq!(batch.batch_size(), 2);
        assert_eq!(batch.num_anchors(), 48);
        assert_eq!(batch.boxes.dims(), [2, 48, 4]);
        assert_eq!(batch.landmarks.dims(), [2, 48, 10]);
        assert_eq!(batch.landmark_valid.dims(), [2, 48]);

        assert!(builder.build_batch::<TestBackend>(&[], &device).is_err());
    }

    #[test]
    fn test_from_config_rejects_invalid_configuration() {
        let config = RetinaFaceConfig::mobilenet().with_box_coder(
            BoxCoderConfig::new().with_variances([0.1, 0.0]),
        );
        assert!(TargetBuilder::from_config(&config).is_err());

        let builder = TargetBuilder::from_config(&RetinaFaceConfig::mobilenet()).unwrap();
        assert_eq!(builder.anchors().len(), 16_800);
    }
}
