//! Enumeration types for RetinaFace configuration.

use burn::prelude::*;

/// Defines the backbone feature extractor the detector is trained with.
///
/// The backbone itself lives outside this crate; the variant only selects the input
/// resolution and how many leading layers stay frozen during the first training phase.
#[derive(Config, Debug, PartialEq, Eq)]
pub enum Backbone {
    /// MobileNet 0.25.
    MobileNet025,
    /// ResNet-50.
    Resnet50,
}

impl Backbone {
    /// Square training resolution used by the reference configurations.
    #[must_use]
    pub const fn default_image_size(&self) -> usize {
        match self {
            Self::MobileNet025 => 640,
            Self::Resnet50 => 840,
        }
    }

    /// Number of leading layers frozen while the backbone is not trainable.
    #[must_use]
    pub const fn frozen_layers(&self) -> usize {
        match self {
            Self::MobileNet025 => 81,
            Self::Resnet50 => 173,
        }
    }

    /// Short lowercase name, used on the command line and in logs.
    #[must_use]
    pub const fn name(&self) -> &'static str {
        match self {
            Self::MobileNet025 => "mobilenet",
            Self::Resnet50 => "resnet50",
        }
    }

    /// Inverse of [`Backbone::name`].
    #[must_use]
    pub fn from_name(name: &str) -> Option<Self> {
        [Self::MobileNet025, Self::Resnet50]
            .into_iter()
            .find(|backbone| backbone.name().eq_ignore_ascii_case(name))
    }
}

/// Label assigned to an anchor by the matcher.
///
/// The discriminants are the values stored in label tensors.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum AnchorLabel {
    /// Excluded from every loss term.
    Ignored = -1,
    /// Background.
    Negative = 0,
    /// Face.
    Positive = 1,
}

impl AnchorLabel {
    /// Converts a raw label tensor value back into an [`AnchorLabel`].
    #[must_use]
    pub const fn from_value(value: i64) -> Option<Self> {
        match value {
            -1 => Some(Self::Ignored),
            0 => Some(Self::Negative),
            1 => Some(Self::Positive),
            _ => None,
        }
    }

    /// Value stored in label tensors.
    #[must_use]
    pub const fn value(self) -> i64 {
        self as i64
    }
}
