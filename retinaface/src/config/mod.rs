//! Configuration module for RetinaFace training.
//!
//! - `core`: the configuration structures and their validation
//! - `enums`: enumeration types used in configurations

pub mod core;
pub mod enums;

pub use self::core::{
    AnchorConfig, AnchorLevelConfig, BoxCoderConfig, MatcherConfig, RetinaFaceConfig,
};
pub use enums::{AnchorLabel, Backbone};
