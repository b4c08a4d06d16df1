use thiserror::Error;

/// The error type for `retinaface-burn` operations.
///
/// Every variant except [`RetinaFaceError::Data`] is fatal: it signals a configuration or
/// wiring mistake that must be fixed before training can start.
#[derive(Error, Debug)]
pub enum RetinaFaceError {
    /// Error for when an invalid configuration is provided.
    /// This can happen if configuration parameters are logically inconsistent.
    #[error("Invalid configuration: {reason}")]
    InvalidConfiguration {
        /// The reason why the configuration is invalid.
        reason: String,
    },

    /// Error for when predictions and targets disagree on the number of anchors.
    #[error("Anchor count mismatch: expected {expected} anchors, got {actual}")]
    AnchorCountMismatch {
        /// The number of anchors produced by the anchor generator.
        expected: usize,
        /// The number of anchors found in the offending tensor.
        actual: usize,
    },

    /// Error for when an input tensor has an invalid shape.
    #[error("Invalid input tensor shape: expected {expected}, got {actual}")]
    InvalidTensorShape {
        /// The expected tensor shape.
        expected: String,
        /// The actual tensor shape.
        actual: String,
    },

    /// Error for when dataset operations fail.
    #[error("Dataset error: {message}")]
    Dataset {
        /// The error message.
        message: String,
    },

    /// A malformed ground-truth sample.
    #[error(transparent)]
    Data(#[from] DataError),
}

impl RetinaFaceError {
    /// Returns `true` when the error only affects a single sample and the run may continue
    /// after skipping it.
    #[must_use]
    pub const fn is_recoverable(&self) -> bool {
        matches!(self, Self::Data(_))
    }
}

/// Per-sample annotation errors.
///
/// These are recoverable: the offending sample is skipped with a warning.
#[derive(Error, Debug, Clone, PartialEq)]
pub enum DataError {
    /// A ground-truth box with zero or negative extent.
    #[error("face {index} has a degenerate box ({width} x {height})")]
    DegenerateBox {
        /// Index of the face within its sample.
        index: usize,
        /// Box width (x2 - x1).
        width: f32,
        /// Box height (y2 - y1).
        height: f32,
    },

    /// A box or landmark coordinate that is NaN or infinite.
    #[error("face {index} has a non-finite coordinate")]
    NonFiniteCoordinate {
        /// Index of the face within its sample.
        index: usize,
    },

    /// Some, but not all, of the five landmark points are flagged valid.
    #[error("face {index} has a partially valid landmark set")]
    InconsistentLandmarks {
        /// Index of the face within its sample.
        index: usize,
    },

    /// A line of a label file that could not be parsed.
    #[error("malformed label at line {line}: {reason}")]
    MalformedLabel {
        /// 1-based line number.
        line: usize,
        /// What was wrong with it.
        reason: String,
    },
}

/// A specialized `Result` type for `retinaface-burn` operations.
pub type RetinaFaceResult<T> = Result<T, RetinaFaceError>;
