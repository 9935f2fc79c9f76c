//! Screen Analyzer - Multi-source screen understanding engine
//!
//! This crate builds a unified picture of what is on screen by combining
//! three independent sources of evidence:
//!
//! - **UI elements**: Roles and labels read from the accessibility tree
//! - **OCR**: Text spans recognized from captured pixels
//! - **Object detection**: Visual objects found by a background detector
//!
//! # Architecture
//!
//! The `ScreenAnalyzer` orchestrator enumerates windows, captures their
//! pixels, gathers detections from all three sources, and fuses spatially
//! overlapping ones into deduplicated entities. Object detection runs on its
//! own periodic loop over the full desktop and publishes into a lock-free
//! snapshot cache that analyses read without blocking.

pub mod capture;
pub mod config;
pub mod detector;
pub mod fusion;
pub mod ocr;
pub mod orchestrator;
pub mod types;
pub mod ui_reader;

// Re-export commonly used types
pub use capture::{CaptureProvider, SystemCapture};
pub use config::Config;
pub use detector::{
    detection_cache, CacheWriter, DetectionCache, DetectionLoop, ObjectDetector, VisionDetector,
};
pub use fusion::{fuse, FusionOptions};
pub use ocr::{OcrClient, OcrMode, TextRecognizer};
pub use orchestrator::{DesktopState, ScreenAnalyzer, WindowSummary};
pub use types::{
    Detection, DetectionSnapshot, DetectionSource, EngineError, Frame, FusedEntity, Rect,
    SnapshotOrigin, WindowHandle, WindowId,
};
pub use ui_reader::{AxTreeReader, UiReader};
