//! Optical text recognition.
//!
//! Wraps the ocr-engine helper binary: frames are written to a temp PNG,
//! recognized spans come back as JSON with frame-local boxes, and the
//! wrapper translates them into desktop coordinates. The recognition model
//! lives in the helper process, so first-call model-load latency is absorbed
//! there and never surfaces as an error here.

use crate::config::OcrConfig;
use crate::types::{Detection, DetectionSource, EngineError, Frame, Rect};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::str::FromStr;
use std::sync::atomic::{AtomicU64, Ordering};
use tokio::process::Command;
use tracing::{debug, warn};

/// Engine mode: trade recognition speed against accuracy
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OcrMode {
    Fast,
    Accurate,
}

impl OcrMode {
    pub fn as_str(&self) -> &'static str {
        match self {
            OcrMode::Fast => "fast",
            OcrMode::Accurate => "accurate",
        }
    }
}

impl FromStr for OcrMode {
    type Err = EngineError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s {
            "fast" => Ok(OcrMode::Fast),
            "accurate" => Ok(OcrMode::Accurate),
            other => Err(EngineError::Configuration(format!(
                "invalid ocr mode '{}' (expected 'fast' or 'accurate')",
                other
            ))),
        }
    }
}

/// One text span as reported by the helper binary
#[derive(Debug, Deserialize)]
struct RawSpan {
    text: String,
    /// [x, y, width, height] in frame-local coordinates
    bbox: [i32; 4],
    confidence: f32,
}

/// Recognizes text in a captured frame
#[async_trait::async_trait]
pub trait TextRecognizer: Send + Sync {
    /// Text spans found in the frame, with desktop-coordinate boxes.
    ///
    /// Empty and whitespace-only spans are discarded before they reach
    /// fusion.
    async fn recognize(&self, frame: &Frame) -> Result<Vec<Detection>, EngineError>;
}

/// OCR client backed by the ocr-engine helper binary
pub struct OcrClient {
    binary_path: PathBuf,
    mode: OcrMode,
}

impl OcrClient {
    pub fn new(config: &OcrConfig) -> Result<Self, EngineError> {
        let mode = OcrMode::from_str(&config.mode)?;

        let binary_path = config
            .binary_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_binary_path);

        Ok(Self { binary_path, mode })
    }

    /// Get the default binary path
    fn default_binary_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        let paths = [
            exe_dir.join("ocr-engine"),
            PathBuf::from("ocr-engine/target/release/ocr-engine"),
            PathBuf::from("../ocr-engine/target/release/ocr-engine"),
            PathBuf::from("/usr/local/bin/ocr-engine"),
        ];

        for path in paths {
            if path.exists() {
                return path;
            }
        }

        PathBuf::from("ocr-engine")
    }

    /// Check if the helper binary is available
    pub fn is_available(&self) -> bool {
        self.binary_path.exists()
    }

    pub fn mode(&self) -> OcrMode {
        self.mode
    }

    /// Convert raw spans to detections, translating frame-local boxes into
    /// desktop coordinates and dropping blank spans
    fn spans_to_detections(frame: &Frame, spans: Vec<RawSpan>) -> Vec<Detection> {
        spans
            .into_iter()
            .filter(|span| !span.text.trim().is_empty())
            .map(|span| {
                let [x, y, w, h] = span.bbox;
                let local = Rect::new(x, y, w.max(0) as u32, h.max(0) as u32);
                Detection::new(
                    DetectionSource::Ocr,
                    span.text.trim().to_string(),
                    frame.to_desktop(local),
                    span.confidence.clamp(0.0, 1.0),
                )
            })
            .collect()
    }
}

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Per-call scratch path; concurrent recognitions in one process must never
/// share a file, or one call's cleanup deletes another call's image.
fn scratch_image_path() -> PathBuf {
    let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "screen_analyzer_ocr_{}_{}.png",
        std::process::id(),
        seq
    ))
}

#[async_trait::async_trait]
impl TextRecognizer for OcrClient {
    async fn recognize(&self, frame: &Frame) -> Result<Vec<Detection>, EngineError> {
        let temp_path = scratch_image_path();

        frame.image.save(&temp_path).map_err(|e| {
            EngineError::Recognition(format!("failed to save temp image: {}", e))
        })?;

        let result = self.run_ocr(&temp_path, frame).await;

        let _ = std::fs::remove_file(&temp_path);

        result
    }
}

impl OcrClient {
    async fn run_ocr(&self, path: &PathBuf, frame: &Frame) -> Result<Vec<Detection>, EngineError> {
        debug!(
            "Running {} OCR on {}x{} frame",
            self.mode.as_str(),
            frame.image.width(),
            frame.image.height()
        );

        let output = Command::new(&self.binary_path)
            .arg("--image")
            .arg(path)
            .arg("--mode")
            .arg(self.mode.as_str())
            .arg("--json")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await
            .map_err(EngineError::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            warn!("OCR failed: {}", stderr);
            return Err(EngineError::Recognition(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);

        let value: serde_json::Value = serde_json::from_str(&stdout).map_err(|e| {
            EngineError::Recognition(format!("malformed ocr-engine output: {}", e))
        })?;

        if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
            return Err(EngineError::Recognition(error.to_string()));
        }

        let spans: Vec<RawSpan> = match value.get("spans") {
            Some(spans) => serde_json::from_value(spans.clone()).map_err(|e| {
                EngineError::Recognition(format!("malformed span list: {}", e))
            })?,
            None => Vec::new(),
        };

        let detections = Self::spans_to_detections(frame, spans);
        debug!("OCR yielded {} spans", detections.len());

        Ok(detections)
    }
}
