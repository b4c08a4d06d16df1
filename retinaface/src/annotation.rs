//! Ground-truth faces and WIDER FACE label parsing.
//!
//! A [`GroundTruth`] only exists in validated form: every box has a positive extent, every
//! coordinate is finite and every landmark set is either complete or absent.

use std::path::Path;

use burn::tensor::{backend::Backend, Bool, Tensor, TensorData};

use crate::{
    box_coder::NUM_LANDMARKS,
    error::{DataError, RetinaFaceError, RetinaFaceResult},
};

/// One facial landmark point in normalized image coordinates.
#[derive(Debug, Clone, Copy, PartialEq)]
pub struct Landmark {
    pub x: f32,
    pub y: f32,
    pub valid: bool,
}

impl Landmark {
    pub const fn new(x: f32, y: f32) -> Self {
        Self { x, y, valid: true }
    }

    pub const fn missing() -> Self {
        Self {
            x: 0.0,
            y: 0.0,
            valid: false,
        }
    }
}

/// A single annotated face.
#[derive(Debug, Clone, PartialEq)]
pub struct FaceAnnotation {
    /// `(x1, y1, x2, y2)`, normalized to `[0, 1]`.
    pub bbox: [f32; 4],
    /// Eyes, nose tip and mouth corners, when annotated.
    pub landmarks: Option<[Landmark; NUM_LANDMARKS]>,
}

impl FaceAnnotation {
    pub const fn new(bbox: [f32; 4]) -> Self {
        Self {
            bbox,
            landmarks: None,
        }
    }

    #[must_use]
    pub fn with_landmarks(mut self, points: [[f32; 2]; NUM_LANDMARKS]) -> Self {
        self.landmarks = Some(points.map(|[x, y]| Landmark::new(x, y)));
        self
    }

    /// Whether the face carries a complete landmark set.
    pub fn has_landmarks(&self) -> bool {
        self.landmarks.is_some()
    }

    fn validated(mut self, index: usize) -> Result<Self, DataError> {
        let [x1, y1, x2, y2] = self.bbox;
        if !self.bbox.iter().all(|value| value.is_finite()) {
            return Err(DataError::NonFiniteCoordinate { index });
        }
        let (width, height) = (x2 - x1, y2 - y1);
        if width <= 0.0 || height <= 0.0 {
            return Err(DataError::DegenerateBox {
                index,
                width,
                height,
            });
        }

        let Some(points) = self.landmarks else {
            return Ok(self);
        };
        match points.iter().filter(|point| point.valid).count() {
            0 => self.landmarks = None,
            NUM_LANDMARKS => {
                if !points
                    .iter()
                    .all(|point| point.x.is_finite() && point.y.is_finite())
                {
                    return Err(DataError::NonFiniteCoordinate { index });
                }
            }
            _ => return Err(DataError::InconsistentLandmarks { index }),
        }

        Ok(self)
    }
}

/// Validated ground truth of one training image.
#[derive(Debug, Clone, Default, PartialEq)]
pub struct GroundTruth {
    faces: Vec<FaceAnnotation>,
}

impl GroundTruth {
    /// Validate and wrap the faces of one image.
    ///
    /// A landmark set whose points are all flagged invalid is treated as absent.
    ///
    /// # Errors
    ///
    /// Returns the [`DataError`] of the first malformed face.
    pub fn new(faces: Vec<FaceAnnotation>) -> Result<Self, DataError> {
        let faces = faces
            .into_iter()
            .enumerate()
            .map(|(index, face)| face.validated(index))
            .collect::<Result<Vec<_>, _>>()?;
        Ok(Self { faces })
    }

    /// Ground truth of an image without faces.
    pub const fn empty() -> Self {
        Self { faces: Vec::new() }
    }

    pub fn faces(&self) -> &[FaceAnnotation] {
        &self.faces
    }

    pub fn len(&self) -> usize {
        self.faces.len()
    }

    pub fn is_empty(&self) -> bool {
        self.faces.is_empty()
    }

    /// Boxes as an `[N, 4]` corner-form tensor.
    pub fn boxes_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let flat: Vec<f32> = self.faces.iter().flat_map(|face| face.bbox).collect();
        Tensor::from_data(TensorData::new(flat, [self.len(), 4]), device)
    }

    /// Landmarks as an `[N, 10]` tensor of interleaved `x, y`; zeros for faces without them.
    pub fn landmarks_tensor<B: Backend>(&self, device: &B::Device) -> Tensor<B, 2> {
        let flat: Vec<f32> = self
            .faces
            .iter()
            .flat_map(|face| {
                face.landmarks
                    .unwrap_or([Landmark::missing(); NUM_LANDMARKS])
                    .into_iter()
                    .flat_map(|point| [point.x, point.y])
            })
            .collect();
        Tensor::from_data(
            TensorData::new(flat, [self.len(), NUM_LANDMARKS * 2]),
            device,
        )
    }

    /// `[N]` mask of the faces carrying landmarks.
    pub fn landmark_mask<B: Backend>(&self, device: &B::Device) -> Tensor<B, 1, Bool> {
        let flags: Vec<bool> = self.faces.iter().map(FaceAnnotation::has_landmarks).collect();
        Tensor::from_data(TensorData::new(flags, [self.len()]), device)
    }
}

/// A face as written in a WIDER FACE label file, in pixels.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledFace {
    /// `(x, y, width, height)`.
    pub bbox: [f32; 4],
    pub landmarks: Option<[[f32; 2]; NUM_LANDMARKS]>,
}

/// All faces of one image listed in a label file.
#[derive(Debug, Clone, PartialEq)]
pub struct LabeledImage {
    /// Image path relative to the label file's `images/` directory.
    pub path: String,
    pub faces: Vec<LabeledFace>,
}

impl LabeledImage {
    /// Validate the pixel annotation without normalizing it.
    ///
    /// # Errors
    ///
    /// Returns the [`DataError`] of the first malformed face.
    pub fn validate(&self) -> Result<(), DataError> {
        self.to_ground_truth(1, 1).map(|_| ())
    }

    /// Normalize the pixel annotation by the source image size.
    ///
    /// # Errors
    ///
    /// Returns the [`DataError`] of the first malformed face.
    pub fn to_ground_truth(&self, width: u32, height: u32) -> Result<GroundTruth, DataError> {
        let (width, height) = (width as f32, height as f32);
        let faces = self
            .faces
            .iter()
            .map(|face| {
                let [x, y, w, h] = face.bbox;
                let annotation =
                    FaceAnnotation::new([x / width, y / height, (x + w) / width, (y + h) / height]);
                match face.landmarks {
                    Some(points) => annotation
                        .with_landmarks(points.map(|[px, py]| [px / width, py / height])),
                    None => annotation,
                }
            })
            .collect();
        GroundTruth::new(faces)
    }
}

/// Values on a face line carrying landmarks: a box and five `x y flag` triples.
const FULL_FACE_FIELDS: usize = 4 + NUM_LANDMARKS * 3;

/// Parse the contents of a WIDER FACE `label.txt`.
///
/// Every image starts with a `# path` header followed by one line per face. Face lines
/// hold `x y w h` and, optionally, five `x y flag` landmark triples and a score; a
/// negative first landmark coordinate marks the landmarks as absent. Images with a
/// malformed face line are skipped with a warning.
pub fn parse_widerface_labels(text: &str) -> Vec<LabeledImage> {
    let mut images = Vec::new();
    let mut current: Option<(LabeledImage, Option<DataError>)> = None;

    for (number, line) in text.lines().enumerate() {
        let line = line.trim();
        if line.is_empty() {
            continue;
        }

        if let Some(path) = line.strip_prefix('#') {
            finish_entry(current.take(), &mut images);
            current = Some((
                LabeledImage {
                    path: path.trim().to_string(),
                    faces: Vec::new(),
                },
                None,
            ));
            continue;
        }

        let Some((image, error)) = current.as_mut() else {
            tracing::warn!(line = number + 1, "face line before any image header");
            continue;
        };
        if error.is_some() {
            continue;
        }
        match parse_face_line(line, number + 1) {
            Ok(face) => image.faces.push(face),
            Err(parse_error) => *error = Some(parse_error),
        }
    }
    finish_entry(current.take(), &mut images);

    images
}

/// Read and parse a WIDER FACE `label.txt` from disk.
///
/// # Errors
///
/// Returns `Err(RetinaFaceError::Dataset)` if the file cannot be read.
pub fn load_widerface_labels(path: impl AsRef<Path>) -> RetinaFaceResult<Vec<LabeledImage>> {
    let path = path.as_ref();
    let text = std::fs::read_to_string(path).map_err(|e| RetinaFaceError::Dataset {
        message: format!("Failed to read label file {}: {e}", path.display()),
    })?;
    let images = parse_widerface_labels(&text);
    tracing::info!(path = %path.display(), images = images.len(), "loaded labels");
    Ok(images)
}

fn finish_entry(entry: Option<(LabeledImage, Option<DataError>)>, images: &mut Vec<LabeledImage>) {
    match entry {
        Some((image, None)) => images.push(image),
        Some((image, Some(error))) => {
            tracing::warn!(path = %image.path, %error, "skipping malformed label entry");
        }
        None => {}
    }
}

fn parse_face_line(line: &str, number: usize) -> Result<LabeledFace, DataError> {
    let values = line
        .split_whitespace()
        .map(str::parse::<f32>)
        .collect::<Result<Vec<_>, _>>()
        .map_err(|e| DataError::MalformedLabel {
            line: number,
            reason: e.to_string(),
        })?;

    if values.len() < 4 || (values.len() > 4 && values.len() < FULL_FACE_FIELDS) {
        return Err(DataError::MalformedLabel {
            line: number,
            reason: format!(
                "expected 4 or at least {FULL_FACE_FIELDS} values, got {}",
                values.len()
            ),
        });
    }

    let bbox = [values[0], values[1], values[2], values[3]];
    let landmarks = (values.len() >= FULL_FACE_FIELDS && values[4] >= 0.0).then(|| {
        std::array::from_fn(|point| {
            let offset = 4 + point * 3;
            [values[offset], values[offset + 1]]
        })
    });

    Ok(LabeledFace { bbox, landmarks })
}
