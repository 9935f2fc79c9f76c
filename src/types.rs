//! Core types used throughout the screen analyzer.
//!
//! This module defines the fundamental data structures for window handles,
//! captured frames, raw detections, and fused screen entities.

use chrono::{DateTime, Utc};
use image::DynamicImage;
use serde::de::{self, Deserializer, SeqAccess, Visitor};
use serde::ser::{SerializeSeq, Serializer};
use serde::{Deserialize, Serialize};
use std::sync::Arc;

/// Unique identifier for a window (platform-specific)
pub type WindowId = u64;

/// Rectangle in desktop coordinates (virtual screen pixels).
///
/// Serialized on the wire as `[x, y, x2, y2]` corner form.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub struct Rect {
    pub x: i32,
    pub y: i32,
    pub width: u32,
    pub height: u32,
}

impl Rect {
    pub fn new(x: i32, y: i32, width: u32, height: u32) -> Self {
        Self { x, y, width, height }
    }

    /// Build from corner coordinates, clamping inverted corners to zero size
    pub fn from_corners(x1: i32, y1: i32, x2: i32, y2: i32) -> Self {
        Self {
            x: x1,
            y: y1,
            width: (x2 - x1).max(0) as u32,
            height: (y2 - y1).max(0) as u32,
        }
    }

    pub fn right(&self) -> i32 {
        self.x + self.width as i32
    }

    pub fn bottom(&self) -> i32 {
        self.y + self.height as i32
    }

    pub fn area(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// Get the center point of the rectangle
    pub fn center(&self) -> (i32, i32) {
        (
            self.x + (self.width as i32 / 2),
            self.y + (self.height as i32 / 2),
        )
    }

    /// Check if a point is inside this rectangle
    pub fn contains(&self, x: i32, y: i32) -> bool {
        x >= self.x && x < self.right() && y >= self.y && y < self.bottom()
    }

    /// Overlapping region of two rectangles, if any
    pub fn intersection(&self, other: &Rect) -> Option<Rect> {
        let x1 = self.x.max(other.x);
        let y1 = self.y.max(other.y);
        let x2 = self.right().min(other.right());
        let y2 = self.bottom().min(other.bottom());

        if x2 > x1 && y2 > y1 {
            Some(Rect::from_corners(x1, y1, x2, y2))
        } else {
            None
        }
    }

    /// Smallest rectangle enclosing both
    pub fn union(&self, other: &Rect) -> Rect {
        Rect::from_corners(
            self.x.min(other.x),
            self.y.min(other.y),
            self.right().max(other.right()),
            self.bottom().max(other.bottom()),
        )
    }

    /// Check whether the two rectangles overlap at all
    pub fn intersects(&self, other: &Rect) -> bool {
        self.intersection(other).is_some()
    }

    /// Intersection-over-union overlap ratio, in [0, 1]
    pub fn iou(&self, other: &Rect) -> f32 {
        let inter = match self.intersection(other) {
            Some(r) => r.area(),
            None => return 0.0,
        };
        let union = self.area() + other.area() - inter;
        if union == 0 {
            return 0.0;
        }
        inter as f32 / union as f32
    }
}

impl Serialize for Rect {
    fn serialize<S: Serializer>(&self, serializer: S) -> Result<S::Ok, S::Error> {
        let mut seq = serializer.serialize_seq(Some(4))?;
        seq.serialize_element(&self.x)?;
        seq.serialize_element(&self.y)?;
        seq.serialize_element(&self.right())?;
        seq.serialize_element(&self.bottom())?;
        seq.end()
    }
}

impl<'de> Deserialize<'de> for Rect {
    fn deserialize<D: Deserializer<'de>>(deserializer: D) -> Result<Self, D::Error> {
        struct RectVisitor;

        impl<'de> Visitor<'de> for RectVisitor {
            type Value = Rect;

            fn expecting(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
                f.write_str("a [x, y, x2, y2] array")
            }

            fn visit_seq<A: SeqAccess<'de>>(self, mut seq: A) -> Result<Rect, A::Error> {
                let x1: i32 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(0, &self))?;
                let y1: i32 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(1, &self))?;
                let x2: i32 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(2, &self))?;
                let y2: i32 = seq
                    .next_element()?
                    .ok_or_else(|| de::Error::invalid_length(3, &self))?;
                Ok(Rect::from_corners(x1, y1, x2, y2))
            }
        }

        deserializer.deserialize_seq(RectVisitor)
    }
}

/// A window as seen at enumeration time.
///
/// Handles are enumerated fresh on every query and never cached beyond one
/// call, since windows open, close, and move continuously.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct WindowHandle {
    /// Unique window identifier
    pub id: WindowId,
    /// Window title
    pub title: String,
    /// Owning application name
    pub app_name: String,
    /// Process ID of the owning application
    pub pid: u32,
    /// Window rectangle in desktop coordinates
    #[serde(rename = "bbox")]
    pub bounds: Rect,
    /// Whether this window has keyboard focus
    pub is_active: bool,
    /// Position in the desktop z-order, 0 = frontmost
    pub z_order: u32,
}

/// An immutable raster capture of part of the desktop.
///
/// The image is never mutated after capture; detectors read it and translate
/// their local coordinates through [`Frame::to_desktop`].
#[derive(Clone)]
pub struct Frame {
    /// Captured pixels
    pub image: Arc<DynamicImage>,
    /// Desktop rectangle the pixels were captured from
    pub bounds: Rect,
    /// Capture timestamp
    pub captured_at: DateTime<Utc>,
}

impl Frame {
    pub fn new(image: DynamicImage, bounds: Rect) -> Self {
        Self {
            image: Arc::new(image),
            bounds,
            captured_at: Utc::now(),
        }
    }

    /// Translate a frame-local rectangle into desktop coordinates
    pub fn to_desktop(&self, local: Rect) -> Rect {
        Rect::new(
            local.x + self.bounds.x,
            local.y + self.bounds.y,
            local.width,
            local.height,
        )
    }
}

impl std::fmt::Debug for Frame {
    fn fmt(&self, f: &mut std::fmt::Formatter) -> std::fmt::Result {
        f.debug_struct("Frame")
            .field("bounds", &self.bounds)
            .field("captured_at", &self.captured_at)
            .field("size", &(self.image.width(), self.image.height()))
            .finish()
    }
}

/// Which detection modality produced a finding
#[derive(Debug, Clone, Copy, PartialEq, Eq, PartialOrd, Ord, Hash, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum DetectionSource {
    /// OS accessibility/automation tree
    UiElement,
    /// Optical character recognition
    Ocr,
    /// Learned visual object detector
    Object,
}

impl DetectionSource {
    pub fn as_str(&self) -> &'static str {
        match self {
            DetectionSource::UiElement => "ui_element",
            DetectionSource::Ocr => "ocr",
            DetectionSource::Object => "object",
        }
    }
}

/// One raw finding from a single source, normalized so fusion can treat all
/// modalities uniformly.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct Detection {
    /// Modality that produced this finding
    pub source: DetectionSource,
    /// Text content or class name
    pub label: String,
    /// Bounding box in desktop coordinates
    #[serde(rename = "bbox")]
    pub bounds: Rect,
    /// Confidence in [0, 1]; 1.0 for UI elements (OS-provided, not inferred)
    pub confidence: f32,
    /// Child elements (UI tree only)
    #[serde(default, skip_serializing_if = "Vec::is_empty")]
    pub children: Vec<Detection>,
}

impl Detection {
    pub fn new(
        source: DetectionSource,
        label: impl Into<String>,
        bounds: Rect,
        confidence: f32,
    ) -> Self {
        Self {
            source,
            label: label.into(),
            bounds,
            confidence,
            children: Vec::new(),
        }
    }
}

/// One merged on-screen entity after combining overlapping detections
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct FusedEntity {
    /// Chosen label (UI-element labels take precedence by default)
    pub label: String,
    /// Smallest rectangle enclosing all merged detections
    #[serde(rename = "bbox")]
    pub bounds: Rect,
    /// Maximum confidence among merged detections
    pub confidence: f32,
    /// Distinct source kinds that contributed, sorted
    pub sources: Vec<DetectionSource>,
    /// Number of raw detections absorbed
    pub merged: usize,
}

/// What a snapshot describes
#[derive(Debug, Clone, Serialize, Deserialize)]
#[serde(rename_all = "snake_case", tag = "kind")]
pub enum SnapshotOrigin {
    /// Whole-desktop analysis
    Desktop,
    /// Single-window analysis
    Window { window: WindowHandle },
}

/// A timestamped, immutable description of what is on screen.
///
/// Snapshots are published and handed to callers as `Arc<DetectionSnapshot>`
/// and never mutated afterwards; callers can never observe a partial write.
#[derive(Debug, Clone, Serialize, Deserialize)]
pub struct DetectionSnapshot {
    /// When the underlying capture happened
    pub captured_at: DateTime<Utc>,
    /// Whole desktop or a specific window
    pub origin: SnapshotOrigin,
    /// Fused entities, ordered by confidence desc then reading order
    pub entities: Vec<FusedEntity>,
}

impl DetectionSnapshot {
    /// An empty snapshot (e.g., the target window vanished before capture)
    pub fn empty(origin: SnapshotOrigin) -> Self {
        Self {
            captured_at: Utc::now(),
            origin,
            entities: Vec::new(),
        }
    }
}

/// Errors raised by the analysis engine
#[derive(Debug, thiserror::Error)]
pub enum EngineError {
    /// Target window vanished or the OS denied the screenshot
    #[error("capture failed: {0}")]
    Capture(String),

    /// Automation access denied for the target process
    #[error("ui inspection failed: {0}")]
    Inspection(String),

    /// OCR or object detector model failure
    #[error("recognition failed: {0}")]
    Recognition(String),

    /// Invalid engine selection or resource unavailable at startup
    #[error("configuration error: {0}")]
    Configuration(String),

    #[error("io error: {0}")]
    Io(#[from] std::io::Error),
}

impl EngineError {
    /// Recoverable errors are absorbed at the orchestrator boundary;
    /// configuration errors are fatal and surface to the caller.
    pub fn is_recoverable(&self) -> bool {
        !matches!(self, EngineError::Configuration(_))
    }
}
