//! Regression target encoding.
//!
//! Boxes are encoded relative to their anchor as a variance-scaled center offset and a
//! log-scale size ratio. Landmark points use the same center offset without a size term.

use burn::{prelude::*, tensor::backend::Backend};

use crate::{config::BoxCoderConfig, error::RetinaFaceResult};

/// Number of landmark points per face.
pub const NUM_LANDMARKS: usize = 5;

/// Stateless encoder between ground-truth geometry and regression targets.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct BoxCoder {
    variances: [f32; 2],
}

impl BoxCoder {
    /// Create a coder from a validated configuration.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::InvalidConfiguration)` for non-positive variances.
    pub fn new(config: &BoxCoderConfig) -> RetinaFaceResult<Self> {
        config.validate()?;
        Ok(Self {
            variances: config.variances,
        })
    }

    pub const fn variances(&self) -> [f32; 2] {
        self.variances
    }

    /// Encode `[K, 4]` corner boxes against `[K, 4]` center-form anchors.
    pub fn encode<B: Backend>(&self, boxes: Tensor<B, 2>, anchors: Tensor<B, 2>) -> Tensor<B, 2> {
        let [center_var, size_var] = self.variances;
        let anchor_center = anchors.clone().narrow(1, 0, 2);
        let anchor_size = anchors.narrow(1, 2, 2);

        let min = boxes.clone().narrow(1, 0, 2);
        let max = boxes.narrow(1, 2, 2);
        let center = (min.clone() + max.clone()) / 2.0;
        let size = max - min;

        let offset = (center - anchor_center) / (anchor_size.clone() * center_var);
        let scale = (size / anchor_size).log() / size_var;

        Tensor::cat(vec![offset, scale], 1)
    }

    /// Inverse of [`BoxCoder::encode`]: `[K, 4]` targets back to corner boxes.
    pub fn decode<B: Backend>(&self, deltas: Tensor<B, 2>, anchors: Tensor<B, 2>) -> Tensor<B, 2> {
        let [center_var, size_var] = self.variances;
        let anchor_center = anchors.clone().narrow(1, 0, 2);
        let anchor_size = anchors.narrow(1, 2, 2);

        let center = deltas.clone().narrow(1, 0, 2) * center_var * anchor_size.clone()
            + anchor_center;
        let size = (deltas.narrow(1, 2, 2) * size_var).exp() * anchor_size;
        let half = size / 2.0;

        Tensor::cat(vec![center.clone() - half.clone(), center + half], 1)
    }

    /// Encode `[K, 10]` landmarks (five interleaved `x, y` points) against `[K, 4]` anchors.
    pub fn encode_landmarks<B: Backend>(
        &self,
        landmarks: Tensor<B, 2>,
        anchors: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let [k, _] = landmarks.dims();
        let (anchor_center, anchor_size) = Self::per_point(anchors);

        let points = landmarks.reshape([k, NUM_LANDMARKS, 2]);
        ((points - anchor_center) / (anchor_size * self.variances[0]))
            .reshape([k, NUM_LANDMARKS * 2])
    }

    /// Inverse of [`BoxCoder::encode_landmarks`].
    pub fn decode_landmarks<B: Backend>(
        &self,
        deltas: Tensor<B, 2>,
        anchors: Tensor<B, 2>,
    ) -> Tensor<B, 2> {
        let [k, _] = deltas.dims();
        let (anchor_center, anchor_size) = Self::per_point(anchors);

        let points = deltas.reshape([k, NUM_LANDMARKS, 2]);
        (points * self.variances[0] * anchor_size + anchor_center).reshape([k, NUM_LANDMARKS * 2])
    }

    /// Anchor centers and sizes repeated for each landmark point: two `[K, 5, 2]` tensors.
    fn per_point<B: Backend>(anchors: Tensor<B, 2>) -> (Tensor<B, 3>, Tensor<B, 3>) {
        let [k, _] = anchors.dims();
        let center = anchors
            .clone()
            .narrow(1, 0, 2)
            .reshape([k, 1, 2])
            .repeat_dim(1, NUM_LANDMARKS);
        let size = anchors
            .narrow(1, 2, 2)
            .reshape([k, 1, 2])
            .repeat_dim(1, NUM_LANDMARKS);
        (center, size)
    }
}

impl Default for BoxCoder {
    fn default() -> Self {
        Self {
            variances: BoxCoderConfig::new().variances,
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn assert_all_close(actual: Tensor<TestBackend, 2>, expected: &[f32]) {
        let actual = actual.into_data().to_vec::<f32>().unwrap();
        assert_eq!(actual.len(), expected.len());
        for (a, e) in actual.iter().zip(expected) {
            assert!((a - e).abs() < 1e-5, "expected {expected:?}, got {actual:?}");
        }
    }

    #[test]
    fn test_encode_matches_formula() {
        let device = Default::default();
        let coder = BoxCoder::default();

        let anchors = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.5, 0.2, 0.4]], &device);
        let boxes = Tensor::<TestBackend, 2>::from_floats([[0.42, 0.35, 0.62, 0.75]], &device);

        // Center (0.52, 0.55), size (0.2, 0.4).
        let encoded = coder.encode(boxes, anchors);
        assert_all_close(
            encoded,
            &[0.02 / (0.2 * 0.1), 0.05 / (0.4 * 0.1), 0.0, 0.0],
        );
    }

    #[test]
    fn test_encode_log_scale() {
        let device = Default::default();
        let coder = BoxCoder::default();

        let anchors = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.5, 0.1, 0.1]], &device);
        let boxes = Tensor::<TestBackend, 2>::from_floats([[0.4, 0.45, 0.6, 0.55]], &device);

        let encoded = coder.encode(boxes, anchors);
        assert_all_close(encoded, &[0.0, 0.0, 2.0_f32.ln() / 0.2, 0.0]);
    }

    #[test]
    fn test_box_round_trip() {
        let device = Default::default();
        let coder = BoxCoder::new(&BoxCoderConfig::new().with_variances([0.15, 0.25])).unwrap();

        let anchors = Tensor::<TestBackend, 2>::from_floats(
            [[0.3, 0.3, 0.1, 0.2], [0.7, 0.6, 0.25, 0.25], [0.05, 0.9, 0.05, 0.1]],
            &device,
        );
        let boxes = [
            0.21, 0.17, 0.43, 0.49, //
            0.51, 0.55, 0.93, 0.71, //
            0.01, 0.80, 0.12, 0.99,
        ];
        let boxes_tensor = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(boxes.to_vec(), [3, 4]),
            &device,
        );

        let decoded = coder.decode(coder.encode(boxes_tensor, anchors.clone()), anchors);
        assert_all_close(decoded, &boxes);
    }

    #[test]
    fn test_landmark_encoding_and_round_trip() {
        let device = Default::default();
        let coder = BoxCoder::default();

        let anchors = Tensor::<TestBackend, 2>::from_floats([[0.5, 0.5, 0.2, 0.4]], &device);
        let landmarks = [0.5, 0.5, 0.52, 0.54, 0.48, 0.46, 0.6, 0.5, 0.5, 0.7];
        let landmarks_tensor = Tensor::<TestBackend, 2>::from_data(
            TensorData::new(landmarks.to_vec(), [1, 10]),
            &device,
        );

        let encoded = coder.encode_landmarks(landmarks_tensor, anchors.clone());
        assert_all_close(
            encoded.clone(),
            &[0.0, 0.0, 1.0, 1.0, -1.0, -1.0, 5.0, 0.0, 0.0, 5.0],
        );

        let decoded = coder.decode_landmarks(encoded, anchors);
        assert_all_close(decoded, &landmarks);
    }

    #[test]
    fn test_rejects_non_positive_variance() {
        assert!(BoxCoder::new(&BoxCoderConfig::new().with_variances([0.0, 0.2])).is_err());
        assert!(BoxCoder::new(&BoxCoderConfig::new().with_variances([0.1, -1.0])).is_err());
    }
}
