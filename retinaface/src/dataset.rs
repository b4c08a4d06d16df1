//! WIDER FACE dataset and batching for RetinaFace training.
//!
//! The dataset yields resized, mean-subtracted images together with their validated ground
//! truth. The batcher stacks the images and builds the dense anchor targets of every
//! sample, so each batch is ready for [`MultiBoxLoss`](crate::losses::MultiBoxLoss).

use std::path::{Path, PathBuf};

use burn::data::{dataloader::batcher::Batcher, dataset::Dataset};
use burn::tensor::{backend::Backend, Tensor, TensorData};

use image::{self, imageops::FilterType, DynamicImage};

use crate::{
    annotation::{load_widerface_labels, GroundTruth, LabeledImage},
    error::{RetinaFaceError, RetinaFaceResult},
    targets::{TargetBatch, TargetBuilder},
};

/// Per-channel RGB mean subtracted from every pixel, on the 0-255 scale.
pub const RGB_MEAN: [f32; 3] = [123.0, 117.0, 104.0];

/// A single preprocessed sample.
#[derive(Debug, Clone)]
pub struct FaceItem {
    /// Image path relative to the dataset's image directory.
    pub path: String,
    /// Mean-subtracted pixels in `[3, H, W]` order.
    pub image: Vec<f32>,
    /// `[height, width]` of `image`.
    pub image_size: [usize; 2],
    pub ground_truth: GroundTruth,
}

/// A batch of images and their dense targets.
#[derive(Debug, Clone)]
pub struct FaceBatch<B: Backend> {
    /// `[batch, 3, H, W]`
    pub images: Tensor<B, 4>,
    pub targets: TargetBatch<B>,
}

/// Batcher turning [`FaceItem`]s into a [`FaceBatch`].
#[derive(Debug, Clone)]
pub struct FaceBatcher {
    builder: TargetBuilder,
}

impl FaceBatcher {
    pub const fn new(builder: TargetBuilder) -> Self {
        Self { builder }
    }

    pub const fn builder(&self) -> &TargetBuilder {
        &self.builder
    }
}

impl<B: Backend> Batcher<B, FaceItem, FaceBatch<B>> for FaceBatcher {
    fn batch(&self, items: Vec<FaceItem>, device: &B::Device) -> FaceBatch<B> {
        let mut images = Vec::with_capacity(items.len());
        let mut targets = Vec::with_capacity(items.len());

        for item in items {
            let [height, width] = item.image_size;
            images.push(Tensor::<B, 3>::from_data(
                TensorData::new(item.image, [3, height, width]),
                device,
            ));
            targets.push(self.builder.build::<B>(&item.ground_truth, device));
        }

        let targets = TargetBatch::stack(targets).unwrap_or_else(|error| {
            panic!(
                "Failed to stack targets: {error}. Every item of a batch is built against \
                 the same anchors, so this indicates a programming error."
            )
        });

        FaceBatch {
            images: Tensor::stack(images, 0),
            targets,
        }
    }
}

/// WIDER FACE training set: a `label.txt` plus an `images/` directory.
pub struct WiderFaceDataset {
    images_dir: PathBuf,
    entries: Vec<LabeledImage>,
    image_size: [usize; 2],
}

impl WiderFaceDataset {
    /// Load a dataset laid out as `root/label.txt` and `root/images/`.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::Dataset)` if the label file cannot be read.
    pub fn new(root: impl AsRef<Path>, image_size: [usize; 2]) -> RetinaFaceResult<Self> {
        let root = root.as_ref();
        Self::from_parts(root.join("label.txt"), root.join("images"), image_size)
    }

    /// Load a dataset from an explicit label file and image directory.
    ///
    /// Entries with malformed annotations, without an image file or whose image header
    /// cannot be decoded are skipped with a warning.
    ///
    /// # Errors
    ///
    /// Returns `Err(RetinaFaceError::Dataset)` if the label file cannot be read or the
    /// image directory does not exist.
    pub fn from_parts(
        label_path: impl AsRef<Path>,
        images_dir: impl AsRef<Path>,
        image_size: [usize; 2],
    ) -> RetinaFaceResult<Self> {
        let images_dir = images_dir.as_ref().to_path_buf();
        if !images_dir.is_dir() {
            return Err(RetinaFaceError::Dataset {
                message: format!("Image directory not found: {}", images_dir.display()),
            });
        }

        let labeled = load_widerface_labels(label_path)?;
        let total = labeled.len();
        let entries: Vec<LabeledImage> = labeled
            .into_iter()
            .filter(|entry| {
                if let Err(error) = entry.validate() {
                    tracing::warn!(path = %entry.path, %error, "skipping sample");
                    return false;
                }
                let path = images_dir.join(&entry.path);
                if !path.is_file() {
                    tracing::warn!(path = %entry.path, "skipping sample without image file");
                    return false;
                }
                if let Err(error) = image::image_dimensions(&path) {
                    tracing::warn!(path = %entry.path, %error, "skipping undecodable image");
                    return false;
                }
                true
            })
            .collect();

        tracing::info!(
            samples = entries.len(),
            skipped = total - entries.len(),
            "WIDER FACE dataset ready"
        );

        Ok(Self {
            images_dir,
            entries,
            image_size,
        })
    }

    /// Label entries kept after validation.
    pub fn entries(&self) -> &[LabeledImage] {
        &self.entries
    }

    fn load(&self, entry: &LabeledImage) -> RetinaFaceResult<FaceItem> {
        let path = self.images_dir.join(&entry.path);
        let image = image::open(&path).map_err(|e| RetinaFaceError::Dataset {
            message: format!("Failed to open image {}: {e}", path.display()),
        })?;

        let ground_truth = entry.to_ground_truth(image.width(), image.height())?;
        let [height, width] = self.image_size;
        let image = image.resize_exact(width as u32, height as u32, FilterType::Lanczos3);

        Ok(FaceItem {
            path: entry.path.clone(),
            image: image_to_chw(&image),
            image_size: self.image_size,
            ground_truth,
        })
    }
}

impl Dataset<FaceItem> for WiderFaceDataset {
    /// Load and preprocess a sample.
    ///
    /// Only image headers are checked up front, so a file truncated past its header
    /// still yields `None` here. Burn's dataloader ends the epoch at the first `None`.
    fn get(&self, index: usize) -> Option<FaceItem> {
        let entry = self.entries.get(index)?;
        match self.load(entry) {
            Ok(item) => Some(item),
            Err(error) => {
                tracing::warn!(path = %entry.path, %error, "failed to load sample");
                None
            }
        }
    }

    fn len(&self) -> usize {
        self.entries.len()
    }
}

/// Mean-subtracted `[3, H, W]` pixels of an image.
fn image_to_chw(image: &DynamicImage) -> Vec<f32> {
    let rgb = image.to_rgb8();
    let plane = rgb.width() as usize * rgb.height() as usize;

    let mut data = vec![0.0; 3 * plane];
    for (index, pixel) in rgb.pixels().enumerate() {
        for (channel, mean) in RGB_MEAN.iter().enumerate() {
            data[channel * plane + index] = f32::from(pixel[channel]) - mean;
        }
    }
    data
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::{
        anchors::AnchorGenerator,
        annotation::FaceAnnotation,
        box_coder::BoxCoder,
        config::{AnchorConfig, AnchorLevelConfig, BoxCoderConfig, MatcherConfig},
        matcher::AnchorMatcher,
    };
    use burn::backend::NdArray;
    use image::{Rgb, RgbImage};

    type TestBackend = NdArray<f32>;

    fn builder() -> TargetBuilder {
        let config = AnchorConfig::new()
            .with_image_size([32, 32])
            .with_levels(vec![AnchorLevelConfig::new(8, vec![8.0, 16.0])]);
        TargetBuilder::new(
            AnchorGenerator::new(config).unwrap().generate(),
            AnchorMatcher::new(&MatcherConfig::new()).unwrap(),
            BoxCoder::new(&BoxCoderConfig::new()).unwrap(),
        )
    }

    #[test]
    fn test_image_to_chw_subtracts_mean() {
        let image = DynamicImage::ImageRgb8(RgbImage::from_pixel(2, 1, Rgb([123, 120, 100])));
        assert_eq!(image_to_chw(&image), vec![0.0, 0.0, 3.0, 3.0, -4.0, -4.0]);
    }

    #[test]
    fn test_face_batcher() {
        let device = Default::default();
        let batcher = FaceBatcher::new(builder());

        let face = FaceAnnotation::new([0.25, 0.25, 0.5, 0.5]).with_landmarks([[0.375; 2]; 5]);
        let items = vec![
            FaceItem {
                path: "a.jpg".to_string(),
                image: vec![0.0; 3 * 32 * 32],
                image_size: [32, 32],
                ground_truth: GroundTruth::new(vec![face]).unwrap(),
            },
            FaceItem {
                path: "b.jpg".to_string(),
                image: vec![1.0; 3 * 32 * 32],
                image_size: [32, 32],
                ground_truth: GroundTruth::empty(),
            },
        ];

        let batch: FaceBatch<TestBackend> = batcher.batch(items, &device);

        assert_eq!(batch.images.dims(), [2, 3, 32, 32]);
        assert_eq!(batch.targets.boxes.dims(), [2, 4 * 4 * 2, 4]);
        assert_eq!(batch.targets.labels.dims(), [2, 32]);
    }

    #[test]
    fn test_dataset_skips_malformed_and_missing_samples() {
        let root = std::env::temp_dir().join(format!("retinaface-dataset-{}", std::process::id()));
        let images = root.join("images");
        std::fs::create_dir_all(images.join("0--Parade")).unwrap();

        RgbImage::from_pixel(64, 48, Rgb([200, 100, 50]))
            .save(images.join("0--Parade/good.png"))
            .unwrap();
        RgbImage::from_pixel(64, 48, Rgb([0, 0, 0]))
            .save(images.join("0--Parade/degenerate.png"))
            .unwrap();
        std::fs::write(
            root.join("label.txt"),
            "# 0--Parade/good.png\n\
             16 12 32 24 24 20 0.0 40 20 0.0 32 26 0.0 26 30 0.0 38 30 0.0 0.9\n\
             # 0--Parade/degenerate.png\n\
             10 10 0 12\n\
             # 0--Parade/missing.png\n\
             1 1 5 5\n",
        )
        .unwrap();

        let dataset = WiderFaceDataset::new(&root, [32, 32]).unwrap();
        assert_eq!(dataset.len(), 1);

        let item = dataset.get(0).unwrap();
        assert_eq!(item.image_size, [32, 32]);
        assert_eq!(item.image.len(), 3 * 32 * 32);
        assert_eq!(item.image[0], 200.0 - 123.0);

        let face = &item.ground_truth.faces()[0];
        assert_eq!(face.bbox, [0.25, 0.25, 0.75, 0.75]);
        assert!(face.has_landmarks());

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_dataset_skips_undecodable_images() {
        let root =
            std::env::temp_dir().join(format!("retinaface-undecodable-{}", std::process::id()));
        let images = root.join("images");
        std::fs::create_dir_all(&images).unwrap();

        std::fs::write(images.join("corrupt.png"), b"not an image").unwrap();
        RgbImage::from_pixel(40, 40, Rgb([10, 20, 30]))
            .save(images.join("good.png"))
            .unwrap();
        std::fs::write(
            root.join("label.txt"),
            "# corrupt.png
             4 4 10 10
             # good.png
             4 4 10 10
",
        )
        .unwrap();

        let dataset = WiderFaceDataset::new(&root, [32, 32]).unwrap();
        assert_eq!(dataset.len(), 1);
        assert_eq!(dataset.entries()[0].path, "good.png");
        // Every kept index loads, so the dataloader sees the whole epoch.
        assert!((0..dataset.len()).all(|index| dataset.get(index).is_some()));

        std::fs::remove_dir_all(&root).unwrap();
    }

    #[test]
    fn test_missing_image_directory_is_an_error() {
        let result = WiderFaceDataset::from_parts(
            "does-not-exist/label.txt",
            "does-not-exist/images",
            [32, 32],
        );
        assert!(matches!(result, Err(RetinaFaceError::Dataset { .. })));
    }
}
