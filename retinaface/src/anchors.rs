//! Anchor generation.
//!
//! Anchors tile every pyramid level's feature map in row-major order. Inside a cell the
//! anchors are ordered by size, then aspect ratio. Levels follow the configured order,
//! which must match the order in which the detection head concatenates its outputs.

use std::sync::Arc;

use burn::tensor::{backend::Backend, Tensor, TensorData};

use crate::{config::AnchorConfig, error::RetinaFaceResult};

/// Produces the anchor set of a validated [`AnchorConfig`].
#[derive(Debug, Clone)]
pub struct AnchorGenerator {
    config: AnchorConfig,
}

impl AnchorGenerator {
    /// Create a generator, validating the layout.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::InvalidConfiguration)` for a malformed layout
    /// (zero stride, empty size list, ...).
    pub fn new(config: AnchorConfig) -> RetinaFaceResult<Self> {
        config.validate()?;
        Ok(Self { config })
    }

    /// The layout this generator tiles.
    pub const fn config(&self) -> &AnchorConfig {
        &self.config
    }

    /// Generate the full ordered anchor list.
    pub fn generate(&self) -> Anchors {
        let [height, width] = self.config.image_size;
        let (height, width) = (height as f32, width as f32);

        let mut boxes = Vec::with_capacity(self.config.num_anchors());
        for (level, [rows, cols]) in self.config.levels.iter().zip(self.config.feature_maps()) {
            let stride = level.stride as f32;
            for row in 0..rows {
                let cy = (row as f32 + 0.5) * stride / height;
                for col in 0..cols {
                    let cx = (col as f32 + 0.5) * stride / width;
                    for &size in &level.min_sizes {
                        for &ratio in &level.aspect_ratios {
                            let ratio = ratio.sqrt();
                            boxes.push([cx, cy, size / width * ratio, size / height / ratio]);
                        }
                    }
                }
            }
        }

        if self.config.clip {
            for anchor in &mut boxes {
                for value in anchor.iter_mut() {
                    *value = value.clamp(0.0, 1.0);
                }
            }
        }

        tracing::debug!(
            anchors = boxes.len(),
            levels = self.config.levels.len(),
            "generated anchors"
        );

        Anchors {
            boxes: boxes.into(),
            image_size: self.config.image_size,
        }
    }
}

/// Immutable, cheaply clonable anchor set in normalized `(cx, cy, w, h)` form.
///
/// Built once per training run and shared by every consumer; predictions and targets
/// are aligned to its order.
#[derive(Debug, Clone)]
pub struct Anchors {
    boxes: Arc<[[f32; 4]]>,
    image_size: [usize; 2],
}

impl Anchors {
    /// Number of anchors.
    pub fn len(&self) -> usize {
        self.boxes.len()
    }

    pub fn is_empty(&self) -> bool {
        self.boxes.is_empty()
    }

    /// Image size `[height, width]` the anchors were generated for.
    pub const fn image_size(&self) -> [usize; 2] {
        self.image_size
    }

    pub fn as_slice(&self) -> &[[f32; 4]] {
        &self.boxes
    }

    /// Anchors as a `[num_anchors, 4]` tensor of `(cx, cy, w, h)`.
    pub fn to_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let flat: Vec<f32> = self.boxes.iter().flatten().copied().collect();
        Tensor::from_data(TensorData::new(flat, [self.len(), 4]), device)
    }

    /// Anchors as a `[num_anchors, 4]` tensor of `(x1, y1, x2, y2)` corners.
    pub fn to_corners_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        center_to_corners(self.to_tensor(device))
    }
}

/// Converts `(cx, cy, w, h)` boxes to `(x1, y1, x2, y2)`.
pub fn center_to_corners<B: Backend>(boxes: Tensor<B, 2>) -> Tensor<B, 2> {
    let center = boxes.clone().narrow(1, 0, 2);
    let half = boxes.narrow(1, 2, 2) / 2.0;
    Tensor::cat(vec![center.clone() - half.clone(), center + half], 1)
}

/// Converts `(x1, y1, x2, y2)` boxes to `(cx, cy, w, h)`.
pub fn corners_to_center<B: Backend>(boxes: Tensor<B, 2>) -> Tensor<B, 2> {
    let min = boxes.clone().narrow(1, 0, 2);
    let max = boxes.narrow(1, 2, 2);
    Tensor::cat(vec![(min.clone() + max.clone()) / 2.0, max - min], 1)
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::config::AnchorLevelConfig;
    use burn::backend::NdArray;

    type TestBackend = NdArray<f32>;

    fn assert_close(actual: f32, expected: f32) {
        assert!(
            (actual - expected).abs() < 1e-6,
            "expected {expected}, got {actual}"
        );
    }

    #[test]
    fn test_default_layout_count() {
        let generator = AnchorGenerator::new(AnchorConfig::new()).unwrap();
        let anchors = generator.generate();

        // 80x80, 40x40 and 20x20 grids with two anchors per cell.
        assert_eq!(anchors.len(), (80 * 80 + 40 * 40 + 20 * 20) * 2);
        assert_eq!(anchors.len(), generator.config().num_anchors());
    }

    #[test]
    fn test_count_with_ceil_and_aspect_ratios() {
        let config = AnchorConfig::new()
            .with_image_size([100, 60])
            .with_levels(vec![
                AnchorLevelConfig::new(8, vec![16.0]).with_aspect_ratios(vec![0.5, 1.0, 2.0]),
                AnchorLevelConfig::new(32, vec![64.0, 128.0]),
            ]);
        let anchors = AnchorGenerator::new(config).unwrap().generate();

        // ceil(100/8) x ceil(60/8) = 13 x 8 cells * 3, ceil(100/32) x ceil(60/32) = 4 x 2 cells * 2
        assert_eq!(anchors.len(), 13 * 8 * 3 + 4 * 2 * 2);
    }

    #[test]
    fn test_ordering_is_row_major_then_size() {
        let anchors = AnchorGenerator::new(AnchorConfig::new())
            .unwrap()
            .generate();
        let boxes = anchors.as_slice();

        // First cell: both sizes.
        assert_close(boxes[0][0], 4.0 / 640.0);
        assert_close(boxes[0][1], 4.0 / 640.0);
        assert_close(boxes[0][2], 16.0 / 640.0);
        assert_close(boxes[1][2], 32.0 / 640.0);
        assert_close(boxes[1][0], boxes[0][0]);

        // Next column of the same row.
        assert_close(boxes[2][0], 12.0 / 640.0);
        assert_close(boxes[2][1], 4.0 / 640.0);

        // First anchor of the second row.
        assert_close(boxes[80 * 2][0], 4.0 / 640.0);
        assert_close(boxes[80 * 2][1], 12.0 / 640.0);

        // First anchor of the second level.
        let second_level = boxes[80 * 80 * 2];
        assert_close(second_level[0], 8.0 / 640.0);
        assert_close(second_level[2], 64.0 / 640.0);
    }

    #[test]
    fn test_aspect_ratio_shapes() {
        let config = AnchorConfig::new()
            .with_image_size([64, 64])
            .with_levels(vec![
                AnchorLevelConfig::new(32, vec![16.0]).with_aspect_ratios(vec![4.0])
            ]);
        let anchors = AnchorGenerator::new(config).unwrap().generate();
        let [_, _, w, h] = anchors.as_slice()[0];

        assert_close(w, 32.0 / 64.0);
        assert_close(h, 8.0 / 64.0);
    }

    #[test]
    fn test_clip() {
        let config = AnchorConfig::new()
            .with_image_size([32, 32])
            .with_levels(vec![AnchorLevelConfig::new(32, vec![64.0])])
            .with_clip(true);
        let anchors = AnchorGenerator::new(config).unwrap().generate();

        assert_eq!(anchors.as_slice(), &[[0.5, 0.5, 1.0, 1.0]]);
    }

    #[test]
    fn test_rejects_malformed_layout() {
        let zero_stride =
            AnchorConfig::new().with_levels(vec![AnchorLevelConfig::new(0, vec![16.0])]);
        assert!(AnchorGenerator::new(zero_stride).is_err());

        let no_sizes = AnchorConfig::new().with_levels(vec![AnchorLevelConfig::new(8, vec![])]);
        assert!(AnchorGenerator::new(no_sizes).is_err());

        let no_levels = AnchorConfig::new().with_levels(vec![]);
        assert!(AnchorGenerator::new(no_levels).is_err());
    }

    #[test]
    fn test_tensor_conversions() {
        let device = Default::default();
        let config = AnchorConfig::new()
            .with_image_size([32, 32])
            .with_levels(vec![AnchorLevelConfig::new(16, vec![8.0])]);
        let anchors = AnchorGenerator::new(config).unwrap().generate();

        let centers = anchors.to_tensor::<TestBackend>(&device);
        assert_eq!(centers.dims(), [4, 4]);

        let corners = anchors
            .to_corners_tensor::<TestBackend>(&device)
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        // Cell (0, 0): center 0.25, side 0.25.
        assert_close(corners[0], 0.125);
        assert_close(corners[1], 0.125);
        assert_close(corners[2], 0.375);
        assert_close(corners[3], 0.375);

        let round_trip = corners_to_center(anchors.to_corners_tensor::<TestBackend>(&device))
            .into_data()
            .to_vec::<f32>()
            .unwrap();
        let original: Vec<f32> = anchors.as_slice().iter().flatten().copied().collect();
        for (a, b) in round_trip.iter().zip(original) {
            assert_close(*a, b);
        }
    }
}
