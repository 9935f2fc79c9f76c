//! Screen state orchestrator.
//!
//! The public face of the engine: composes capture, UI inspection, text
//! recognition, and the background object-detection cache into whole-desktop
//! and single-window analyses.
//!
//! Per-modality failures are absorbed here. A failed UI read degrades to
//! vision-only detection, a failed recognition drops that modality for the
//! call, and a failed capture (window closed) yields an empty snapshot.
//! Callers always get a well-formed snapshot, never an error, for analysis
//! operations.

use crate::capture::CaptureProvider;
use crate::config::Config;
use crate::detector::DetectionCache;
use crate::fusion::{self, FusionOptions};
use crate::ocr::TextRecognizer;
use crate::types::{
    Detection, DetectionSnapshot, DetectionSource, EngineError, FusedEntity, Rect,
    SnapshotOrigin, WindowHandle,
};
use crate::ui_reader::UiReader;
use serde::Serialize;
use std::sync::Arc;
use tracing::{debug, warn};

/// All windows plus the focused one
#[derive(Debug, Clone, Serialize)]
pub struct DesktopState {
    /// Every visible window, front to back
    pub windows: Vec<WindowHandle>,
    /// The window with keyboard focus, if any
    pub active: Option<WindowHandle>,
}

/// Short per-window digest for downstream consumers
#[derive(Debug, Clone, Serialize)]
pub struct WindowSummary {
    pub window: WindowHandle,
    /// Number of fused entities found in the window
    pub entity_count: usize,
    /// Top entity labels in reading order
    pub digest: String,
}

/// The screen state orchestrator
pub struct ScreenAnalyzer {
    capture: Arc<dyn CaptureProvider>,
    ui_reader: Arc<dyn UiReader>,
    recognizer: Arc<dyn TextRecognizer>,
    cache: DetectionCache,
    fusion_opts: FusionOptions,
    ui_enabled: bool,
}

impl ScreenAnalyzer {
    /// Build the orchestrator, validating configuration.
    ///
    /// Configuration errors are fatal and surface immediately; everything
    /// downstream is recoverable.
    pub fn new(
        config: &Config,
        capture: Arc<dyn CaptureProvider>,
        ui_reader: Arc<dyn UiReader>,
        recognizer: Arc<dyn TextRecognizer>,
        cache: DetectionCache,
    ) -> Result<Self, EngineError> {
        config.validate()?;

        Ok(Self {
            capture,
            ui_reader,
            recognizer,
            cache,
            fusion_opts: FusionOptions::from(&config.fusion),
            ui_enabled: config.ui.enabled,
        })
    }

    /// All windows and the active one, enumerated fresh
    pub fn desktop_state(&self) -> Result<DesktopState, EngineError> {
        let windows = self.capture.list_windows()?;
        let active = windows.iter().find(|w| w.is_active).cloned();
        Ok(DesktopState { windows, active })
    }

    /// Analyze one window: capture, inspect, recognize, fuse.
    ///
    /// UI and OCR detections reflect the same captured frame; cached object
    /// detections are overlaid as-is and may be up to one detection period
    /// old.
    pub async fn analyze_window(
        &self,
        window: &WindowHandle,
        detect_text: bool,
    ) -> DetectionSnapshot {
        let origin = SnapshotOrigin::Window {
            window: window.clone(),
        };

        let frame = match self.capture.capture_window(window) {
            Ok(frame) => frame,
            Err(e) => {
                // Window closed between enumeration and capture
                debug!("Capture failed for {}: {}", window.title, e);
                return DetectionSnapshot::empty(origin);
            }
        };

        let mut detections: Vec<Detection> = Vec::new();

        if self.ui_enabled {
            match self.ui_reader.read(window).await {
                Ok(elements) => detections.extend(elements),
                Err(e) => {
                    warn!(
                        "UI inspection failed for {}, proceeding vision-only: {}",
                        window.title, e
                    );
                }
            }
        }

        if detect_text {
            match self.recognizer.recognize(&frame).await {
                Ok(spans) => detections.extend(spans),
                Err(e) => {
                    warn!("Text recognition failed for {}: {}", window.title, e);
                }
            }
        }

        detections.extend(self.cached_objects_in(&window.bounds));

        let entities = fusion::fuse(detections, &self.fusion_opts);

        DetectionSnapshot {
            captured_at: frame.captured_at,
            origin,
            entities,
        }
    }

    /// Analyze the whole desktop: capture the main display, recognize text,
    /// and overlay the cached object detections.
    ///
    /// No UI inspection runs here; the accessibility tree is per-window.
    pub async fn analyze_full_screen(&self, detect_text: bool) -> DetectionSnapshot {
        let frame = match self.capture.capture_full_screen() {
            Ok(frame) => frame,
            Err(e) => {
                debug!("Full-screen capture failed: {}", e);
                return DetectionSnapshot::empty(SnapshotOrigin::Desktop);
            }
        };

        let mut detections: Vec<Detection> = Vec::new();

        if detect_text {
            match self.recognizer.recognize(&frame).await {
                Ok(spans) => detections.extend(spans),
                Err(e) => {
                    warn!("Text recognition failed for full screen: {}", e);
                }
            }
        }

        detections.extend(self.cached_objects_in(&frame.bounds));

        DetectionSnapshot {
            captured_at: frame.captured_at,
            origin: SnapshotOrigin::Desktop,
            entities: fusion::fuse(detections, &self.fusion_opts),
        }
    }

    /// Analyze whichever window currently has focus
    pub async fn analyze_active_window(&self, detect_text: bool) -> DetectionSnapshot {
        let active = match self.capture.active_window() {
            Ok(Some(window)) => window,
            Ok(None) => {
                debug!("No active window");
                return DetectionSnapshot::empty(SnapshotOrigin::Desktop);
            }
            Err(e) => {
                debug!("Active window lookup failed: {}", e);
                return DetectionSnapshot::empty(SnapshotOrigin::Desktop);
            }
        };

        self.analyze_window(&active, detect_text).await
    }

    /// Find a window by title substring, case-insensitively
    pub fn find_window(&self, title_substring: &str) -> Result<Option<WindowHandle>, EngineError> {
        let needle = title_substring.to_lowercase();
        Ok(self
            .capture
            .list_windows()?
            .into_iter()
            .find(|w| w.title.to_lowercase().contains(&needle)))
    }

    /// Find windows whose fused entity labels contain the query.
    ///
    /// Windows that close mid-scan yield empty analyses and are skipped.
    pub async fn find_window_by_content(
        &self,
        query: &str,
    ) -> Result<Vec<WindowHandle>, EngineError> {
        let needle = query.to_lowercase();
        let mut matches = Vec::new();

        for window in self.capture.list_windows()? {
            let snapshot = self.analyze_window(&window, true).await;
            let hit = snapshot
                .entities
                .iter()
                .any(|e| e.label.to_lowercase().contains(&needle));
            if hit {
                matches.push(window);
            }
        }

        Ok(matches)
    }

    /// Short digest per window, for downstream consumers
    pub async fn summaries(&self) -> Result<Vec<WindowSummary>, EngineError> {
        let windows = self.capture.list_windows()?;
        let mut summaries = Vec::with_capacity(windows.len());

        for window in windows {
            let snapshot = self.analyze_window(&window, true).await;
            summaries.push(WindowSummary {
                entity_count: snapshot.entities.len(),
                digest: build_digest(&snapshot.entities),
                window,
            });
        }

        Ok(summaries)
    }

    /// Latest background object detections, without blocking.
    ///
    /// Returns `None` before the first detection cycle completes.
    pub fn latest_object_snapshot(&self) -> Option<Arc<DetectionSnapshot>> {
        self.cache.latest()
    }

    /// Cached object entities overlapping a window, replayed as detections
    /// so fusion treats them uniformly
    fn cached_objects_in(&self, bounds: &Rect) -> Vec<Detection> {
        let snapshot = match self.cache.latest() {
            Some(s) => s,
            None => return Vec::new(),
        };

        snapshot
            .entities
            .iter()
            .filter(|e| e.bounds.intersects(bounds))
            .map(|e| {
                Detection::new(
                    DetectionSource::Object,
                    e.label.clone(),
                    e.bounds,
                    e.confidence,
                )
            })
            .collect()
    }
}

/// Maximum number of labels in a window digest
const DIGEST_LABELS: usize = 8;

/// Maximum digest length in characters
const DIGEST_MAX_CHARS: usize = 120;

/// Join the top entity labels in reading order, capped in count and length
fn build_digest(entities: &[FusedEntity]) -> String {
    let mut ordered: Vec<&FusedEntity> = entities.iter().collect();
    ordered.sort_by(|a, b| a.bounds.y.cmp(&b.bounds.y).then(a.bounds.x.cmp(&b.bounds.x)));

    let mut digest = String::new();
    for entity in ordered.into_iter().take(DIGEST_LABELS) {
        if !digest.is_empty() {
            digest.push_str(", ");
        }
        digest.push_str(&entity.label);
        if digest.chars().count() >= DIGEST_MAX_CHARS {
            break;
        }
    }

    if digest.chars().count() > DIGEST_MAX_CHARS {
        digest = digest.chars().take(DIGEST_MAX_CHARS).collect();
        digest.push('…');
    }

    digest
}
