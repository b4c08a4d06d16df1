//! RetinaFace tools
//!
//! Command line utilities for checking an anchor layout and the training targets it
//! produces before a run is started.
//!
//! ## Available Tools
//!
//! - `anchors`: Print the anchor pyramid of a configuration
//! - `inspect_targets`: Build targets for WIDER FACE samples and report match statistics
//!   and the loss of an untrained head
//!
//! ## Usage
//!
//! ```bash
//! # Anchor layout of the ResNet-50 preset
//! cargo run --bin anchors -- --backbone resnet50
//!
//! # Write the resolved configuration for later edits
//! cargo run --bin anchors -- --backbone mobilenet --save-config retinaface.json
//!
//! # Inspect the targets of the first 20 training images
//! cargo run --bin inspect_targets -- --labels widerface/train/label.txt \
//!     --images widerface/train/images --limit 20
//! ```

pub mod common;
pub mod config;

pub use common::{
    create_device, get_backend_name, init_logging, SelectedBackend, SelectedDevice,
};
pub use config::load_model_config;
