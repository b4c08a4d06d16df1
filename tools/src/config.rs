//! Configuration loading for the RetinaFace tools.

use std::path::Path;

use anyhow::{anyhow, Context, Result};
use retinaface_burn::{Backbone, RetinaFaceConfig};

/// Resolve the RetinaFace configuration a tool runs with.
///
/// A JSON file takes precedence over a backbone preset; without either the MobileNet
/// preset is used. The result is validated before it is returned.
pub fn load_model_config(path: Option<&Path>, backbone: Option<&str>) -> Result<RetinaFaceConfig> {
    let config = if let Some(path) = path {
        let config_str = std::fs::read_to_string(path)
            .with_context(|| format!("Failed to read config file: {}", path.display()))?;
        serde_json::from_str::<RetinaFaceConfig>(&config_str)
            .with_context(|| format!("Failed to parse config file: {}", path.display()))?
    } else {
        match backbone {
            Some(name) => preset(
                Backbone::from_name(name).ok_or_else(|| anyhow!("Unknown backbone: {name}"))?,
            ),
            None => RetinaFaceConfig::mobilenet(),
        }
    };

    config
        .validate()
        .context("Invalid RetinaFace configuration")?;
    Ok(config)
}

fn preset(backbone: Backbone) -> RetinaFaceConfig {
    match backbone {
        Backbone::MobileNet025 => RetinaFaceConfig::mobilenet(),
        Backbone::Resnet50 => RetinaFaceConfig::resnet50(),
    }
}
