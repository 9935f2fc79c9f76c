//! UI element reader.
//!
//! Walks the accessibility/automation tree of a window via the ax-reader
//! helper binary and flattens it into detections with source `ui_element`.
//! These come from the OS, not inference, so confidence is fixed at 1.0.

use crate::config::UiConfig;
use crate::types::{Detection, DetectionSource, EngineError, Rect, WindowHandle};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use tokio::process::Command;
use tracing::{debug, warn};

/// One element as reported by the helper binary
#[derive(Debug, Deserialize)]
struct RawElement {
    role: String,
    #[serde(default)]
    label: String,
    /// [x, y, width, height] in desktop coordinates
    bbox: [i32; 4],
    #[serde(default = "default_flag")]
    visible: bool,
    #[serde(default)]
    children: Vec<RawElement>,
}

fn default_flag() -> bool {
    true
}

/// Reads the accessibility tree of a window
#[async_trait::async_trait]
pub trait UiReader: Send + Sync {
    /// Flattened UI elements for a window, in tree order.
    ///
    /// Fails with [`EngineError::Inspection`] when the target process denies
    /// automation access; callers fall back to vision-only detection.
    async fn read(&self, window: &WindowHandle) -> Result<Vec<Detection>, EngineError>;
}

/// Accessibility-tree reader backed by the ax-reader helper binary
pub struct AxTreeReader {
    binary_path: PathBuf,
    max_depth: u32,
}

impl AxTreeReader {
    pub fn new(config: &UiConfig) -> Self {
        let binary_path = config
            .binary_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_binary_path);

        Self {
            binary_path,
            max_depth: config.max_depth,
        }
    }

    /// Get the default binary path
    fn default_binary_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        let paths = [
            exe_dir.join("ax-reader"),
            PathBuf::from("ax-reader/target/release/ax-reader"),
            PathBuf::from("../ax-reader/target/release/ax-reader"),
            PathBuf::from("/usr/local/bin/ax-reader"),
        ];

        for path in paths {
            if path.exists() {
                return path;
            }
        }

        // Fallback - resolved via PATH, fails gracefully otherwise
        PathBuf::from("ax-reader")
    }

    /// Check if the helper binary is available
    pub fn is_available(&self) -> bool {
        self.binary_path.exists()
    }

    /// Depth-first flatten, dropping invisible and unlabeled leaf elements
    fn flatten(elements: Vec<RawElement>, out: &mut Vec<Detection>) {
        for element in elements {
            if !element.visible {
                continue;
            }

            let [x, y, w, h] = element.bbox;
            let has_children = !element.children.is_empty();

            if !element.label.trim().is_empty() || has_children {
                let label = if element.label.trim().is_empty() {
                    element.role.clone()
                } else {
                    element.label.clone()
                };

                // Disabled controls still describe the screen; keep them,
                // with the label untouched so content matching stays exact.
                out.push(Detection::new(
                    DetectionSource::UiElement,
                    label,
                    Rect::new(x, y, w.max(0) as u32, h.max(0) as u32),
                    1.0,
                ));
            }

            Self::flatten(element.children, out);
        }
    }
}

#[async_trait::async_trait]
impl UiReader for AxTreeReader {
    async fn read(&self, window: &WindowHandle) -> Result<Vec<Detection>, EngineError> {
        debug!(
            "Reading UI tree for {} ({}) via {}",
            window.title,
            window.id,
            self.binary_path.display()
        );

        let output = Command::new(&self.binary_path)
            .arg("--window-id")
            .arg(window.id.to_string())
            .arg("--max-depth")
            .arg(self.max_depth.to_string())
            .arg("--json")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(EngineError::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("UI inspection failed for {}: {}", window.title, stderr);
            return Err(EngineError::Inspection(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);

        let value: serde_json::Value = serde_json::from_str(&stdout).map_err(|e| {
            EngineError::Inspection(format!("malformed ax-reader output: {}", e))
        })?;

        // Elevated/protected windows report a denial instead of a tree
        if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
            return Err(EngineError::Inspection(error.to_string()));
        }

        let elements: Vec<RawElement> = serde_json::from_value(
            value.get("elements").cloned().unwrap_or(value),
        )
        .map_err(|e| EngineError::Inspection(format!("malformed element tree: {}", e)))?;

        let mut detections = Vec::new();
        Self::flatten(elements, &mut detections);

        debug!(
            "UI tree for {} yielded {} elements",
            window.title,
            detections.len()
        );

        Ok(detections)
    }
}
