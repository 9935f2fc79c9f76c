//! Configuration management for the screen analyzer.
//!
//! Loads configuration from TOML files and provides runtime defaults.

use serde::{Deserialize, Serialize};
use std::path::PathBuf;
use tracing::{info, warn};

use crate::types::EngineError;

/// Main configuration structure
#[derive(Debug, Clone, Default, Serialize, Deserialize)]
pub struct Config {
    #[serde(default)]
    pub general: GeneralConfig,

    #[serde(default)]
    pub detector: DetectorConfig,

    #[serde(default)]
    pub ocr: OcrConfig,

    #[serde(default)]
    pub ui: UiConfig,

    #[serde(default)]
    pub fusion: FusionConfig,
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct GeneralConfig {
    /// Whether the analyzer is enabled
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Log level (trace, debug, info, warn, error)
    #[serde(default = "default_log_level")]
    pub log_level: String,
}

impl Default for GeneralConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            log_level: "info".to_string(),
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectorConfig {
    /// Seconds between background object detection cycles
    #[serde(default = "default_detector_interval")]
    pub interval_seconds: u64,

    /// Detections below this confidence are dropped
    #[serde(default = "default_min_confidence")]
    pub min_confidence: f32,

    /// Path to the object detector binary
    #[serde(default)]
    pub binary_path: Option<String>,
}

impl Default for DetectorConfig {
    fn default() -> Self {
        Self {
            interval_seconds: 5,
            min_confidence: 0.25,
            binary_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct OcrConfig {
    /// Recognition mode: "fast" or "accurate"
    #[serde(default = "default_ocr_mode")]
    pub mode: String,

    /// Path to the OCR binary
    #[serde(default)]
    pub binary_path: Option<String>,
}

impl Default for OcrConfig {
    fn default() -> Self {
        Self {
            mode: "fast".to_string(),
            binary_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct UiConfig {
    /// Enable accessibility-tree inspection
    #[serde(default = "default_true")]
    pub enabled: bool,

    /// Maximum tree depth to walk
    #[serde(default = "default_max_depth")]
    pub max_depth: u32,

    /// Path to the accessibility reader binary
    #[serde(default)]
    pub binary_path: Option<String>,
}

impl Default for UiConfig {
    fn default() -> Self {
        Self {
            enabled: true,
            max_depth: 5,
            binary_path: None,
        }
    }
}

#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusionConfig {
    /// IoU threshold for clustering detections into one entity
    #[serde(default = "default_iou_threshold")]
    pub iou_threshold: f32,

    /// Treat UI-element labels as ground truth when a cluster has one
    #[serde(default = "default_true")]
    pub prefer_ui_labels: bool,
}

impl Default for FusionConfig {
    fn default() -> Self {
        Self {
            iou_threshold: 0.5,
            prefer_ui_labels: true,
        }
    }
}

// Default value functions for serde
fn default_true() -> bool {
    true
}

fn default_log_level() -> String {
    "info".to_string()
}

fn default_detector_interval() -> u64 {
    5
}

fn default_min_confidence() -> f32 {
    0.25
}

fn default_ocr_mode() -> String {
    "fast".to_string()
}

fn default_max_depth() -> u32 {
    5
}

fn default_iou_threshold() -> f32 {
    0.5
}

impl Config {
    /// Load configuration from the default path
    pub fn load() -> Self {
        Self::load_from_path(Self::default_config_path())
    }

    /// Load configuration from a specific path
    pub fn load_from_path(path: PathBuf) -> Self {
        match std::fs::read_to_string(&path) {
            Ok(contents) => match toml::from_str(&contents) {
                Ok(config) => {
                    info!("Loaded configuration from {:?}", path);
                    config
                }
                Err(e) => {
                    warn!("Failed to parse config file: {}, using defaults", e);
                    Self::default()
                }
            },
            Err(_) => {
                info!("No config file found at {:?}, using defaults", path);
                Self::default()
            }
        }
    }

    /// Get the default configuration file path
    pub fn default_config_path() -> PathBuf {
        dirs::config_dir()
            .unwrap_or_else(|| PathBuf::from("."))
            .join("screen-analyzer")
            .join("config.toml")
    }

    /// Save configuration to a specific path
    pub fn save_to_path(&self, path: PathBuf) -> std::io::Result<()> {
        if let Some(parent) = path.parent() {
            std::fs::create_dir_all(parent)?;
        }

        let contents = toml::to_string_pretty(self)
            .map_err(|e| std::io::Error::new(std::io::ErrorKind::InvalidData, e.to_string()))?;

        std::fs::write(&path, contents)?;
        info!("Saved configuration to {:?}", path);
        Ok(())
    }

    /// Validate values that have no sensible fallback.
    ///
    /// Called at engine construction; failures are fatal and surface to the
    /// caller immediately.
    pub fn validate(&self) -> Result<(), EngineError> {
        if self.ocr.mode != "fast" && self.ocr.mode != "accurate" {
            return Err(EngineError::Configuration(format!(
                "invalid ocr mode '{}' (expected 'fast' or 'accurate')",
                self.ocr.mode
            )));
        }

        if !(self.fusion.iou_threshold > 0.0 && self.fusion.iou_threshold <= 1.0) {
            return Err(EngineError::Configuration(format!(
                "fusion.iou_threshold {} outside (0, 1]",
                self.fusion.iou_threshold
            )));
        }

        if self.detector.interval_seconds == 0 {
            return Err(EngineError::Configuration(
                "detector.interval_seconds must be at least 1".to_string(),
            ));
        }

        Ok(())
    }
}
