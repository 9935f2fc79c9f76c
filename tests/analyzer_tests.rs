//! Integration tests for the screen analysis pipeline.
//!
//! Capture, UI inspection, text recognition, and object detection are
//! replaced with scripted fakes so the full orchestrator and detection-loop
//! paths run without a display server or helper binaries.

use async_trait::async_trait;
use image::DynamicImage;
use screen_analyzer::{
    detection_cache, CaptureProvider, Config, Detection, DetectionLoop, DetectionSource,
    EngineError, Frame, FusionOptions, ObjectDetector, Rect, ScreenAnalyzer, SnapshotOrigin,
    TextRecognizer, UiReader, WindowHandle,
};
use std::sync::atomic::{AtomicUsize, Ordering};
use std::sync::Arc;
use std::time::Duration;

fn window(id: u64, title: &str, bounds: Rect, is_active: bool) -> WindowHandle {
    WindowHandle {
        id,
        title: title.to_string(),
        app_name: "TestApp".to_string(),
        pid: 4242,
        bounds,
        is_active,
        z_order: if is_active { 0 } else { 1 },
    }
}

fn detection(source: DetectionSource, label: &str, bounds: Rect, confidence: f32) -> Detection {
    Detection::new(source, label, bounds, confidence)
}

/// Capture provider serving a fixed window list and blank frames
struct FakeCapture {
    windows: Vec<WindowHandle>,
    fail_capture: bool,
    captures: AtomicUsize,
}

impl FakeCapture {
    fn new(windows: Vec<WindowHandle>) -> Self {
        Self {
            windows,
            fail_capture: false,
            captures: AtomicUsize::new(0),
        }
    }

    fn failing(windows: Vec<WindowHandle>) -> Self {
        Self {
            fail_capture: true,
            ..Self::new(windows)
        }
    }

    fn frame(&self, bounds: Rect) -> Result<Frame, EngineError> {
        if self.fail_capture {
            return Err(EngineError::Capture("window vanished".to_string()));
        }
        self.captures.fetch_add(1, Ordering::SeqCst);
        let image = DynamicImage::new_rgba8(bounds.width.max(1), bounds.height.max(1));
        Ok(Frame::new(image, bounds))
    }
}

impl CaptureProvider for FakeCapture {
    fn list_windows(&self) -> Result<Vec<WindowHandle>, EngineError> {
        Ok(self.windows.clone())
    }

    fn capture_window(&self, window: &WindowHandle) -> Result<Frame, EngineError> {
        self.frame(window.bounds)
    }

    fn capture_region(&self, region: Rect) -> Result<Frame, EngineError> {
        self.frame(region)
    }

    fn capture_full_screen(&self) -> Result<Frame, EngineError> {
        self.frame(Rect::new(0, 0, 1920, 1080))
    }
}

/// UI reader returning a scripted element list, or a scripted failure
struct FakeUiReader {
    elements: Vec<Detection>,
    fail: bool,
}

#[async_trait]
impl UiReader for FakeUiReader {
    async fn read(&self, _window: &WindowHandle) -> Result<Vec<Detection>, EngineError> {
        if self.fail {
            return Err(EngineError::Inspection("automation denied".to_string()));
        }
        Ok(self.elements.clone())
    }
}

/// Recognizer returning a scripted span list, or a scripted failure
struct FakeRecognizer {
    spans: Vec<Detection>,
    fail: bool,
}

#[async_trait]
impl TextRecognizer for FakeRecognizer {
    async fn recognize(&self, _frame: &Frame) -> Result<Vec<Detection>, EngineError> {
        if self.fail {
            return Err(EngineError::Recognition("engine crashed".to_string()));
        }
        Ok(self.spans.clone())
    }
}

/// Object detector returning a scripted box list and counting invocations
struct FakeDetector {
    objects: Vec<Detection>,
    calls: Arc<AtomicUsize>,
}

#[async_trait]
impl ObjectDetector for FakeDetector {
    async fn detect(&self, _frame: &Frame) -> Result<Vec<Detection>, EngineError> {
        self.calls.fetch_add(1, Ordering::SeqCst);
        Ok(self.objects.clone())
    }
}

fn analyzer(
    capture: FakeCapture,
    ui: FakeUiReader,
    ocr: FakeRecognizer,
) -> (ScreenAnalyzer, screen_analyzer::DetectionCache) {
    let (_writer, cache) = detection_cache();
    let analyzer = ScreenAnalyzer::new(
        &Config::default(),
        Arc::new(capture),
        Arc::new(ui),
        Arc::new(ocr),
        cache.clone(),
    )
    .expect("default config is valid");
    (analyzer, cache)
}

#[tokio::test]
async fn test_overlapping_ui_and_ocr_merge_into_one_entity() {
    let win = window(1, "Login", Rect::new(0, 0, 800, 600), true);
    let capture = FakeCapture::new(vec![win.clone()]);
    let ui = FakeUiReader {
        elements: vec![detection(
            DetectionSource::UiElement,
            "Submit",
            Rect::new(100, 200, 80, 30),
            1.0,
        )],
        fail: false,
    };
    let ocr = FakeRecognizer {
        spans: vec![detection(
            DetectionSource::Ocr,
            "Submit",
            Rect::new(102, 201, 76, 28),
            0.93,
        )],
        fail: false,
    };

    let (analyzer, _cache) = analyzer(capture, ui, ocr);
    let snapshot = analyzer.analyze_window(&win, true).await;

    assert_eq!(snapshot.entities.len(), 1);
    let entity = &snapshot.entities[0];
    assert_eq!(entity.label, "Submit");
    assert_eq!(entity.merged, 2);
    assert_eq!(
        entity.sources,
        vec![DetectionSource::UiElement, DetectionSource::Ocr]
    );
    match &snapshot.origin {
        SnapshotOrigin::Window { window } => assert_eq!(window.id, 1),
        other => panic!("expected window origin, got {:?}", other),
    }
}

#[tokio::test]
async fn test_capture_failure_yields_empty_snapshot_not_error() {
    let win = window(1, "Gone", Rect::new(0, 0, 400, 300), true);
    let capture = FakeCapture::failing(vec![win.clone()]);
    let ui = FakeUiReader {
        elements: vec![detection(
            DetectionSource::UiElement,
            "Button",
            Rect::new(10, 10, 50, 20),
            1.0,
        )],
        fail: false,
    };
    let ocr = FakeRecognizer {
        spans: Vec::new(),
        fail: false,
    };

    let (analyzer, _cache) = analyzer(capture, ui, ocr);
    let snapshot = analyzer.analyze_window(&win, true).await;

    assert!(snapshot.entities.is_empty());
}

#[tokio::test]
async fn test_ui_failure_degrades_to_vision_only() {
    let win = window(1, "Stubborn", Rect::new(0, 0, 400, 300), true);
    let capture = FakeCapture::new(vec![win.clone()]);
    let ui = FakeUiReader {
        elements: Vec::new(),
        fail: true,
    };
    let ocr = FakeRecognizer {
        spans: vec![detection(
            DetectionSource::Ocr,
            "still readable",
            Rect::new(20, 20, 100, 16),
            0.88,
        )],
        fail: false,
    };

    let (analyzer, _cache) = analyzer(capture, ui, ocr);
    let snapshot = analyzer.analyze_window(&win, true).await;

    assert_eq!(snapshot.entities.len(), 1);
    assert_eq!(snapshot.entities[0].label, "still readable");
    assert_eq!(snapshot.entities[0].sources, vec![DetectionSource::Ocr]);
}

#[tokio::test]
async fn test_recognition_failure_omits_text_modality() {
    let win = window(1, "NoText", Rect::new(0, 0, 400, 300), true);
    let capture = FakeCapture::new(vec![win.clone()]);
    let ui = FakeUiReader {
        elements: vec![detection(
            DetectionSource::UiElement,
            "Toolbar",
            Rect::new(0, 0, 400, 40),
            1.0,
        )],
        fail: false,
    };
    let ocr = FakeRecognizer {
        spans: Vec::new(),
        fail: true,
    };

    let (analyzer, _cache) = analyzer(capture, ui, ocr);
    let snapshot = analyzer.analyze_window(&win, true).await;

    assert_eq!(snapshot.entities.len(), 1);
    assert_eq!(snapshot.entities[0].label, "Toolbar");
}

#[tokio::test]
async fn test_detect_text_false_skips_recognition() {
    let win = window(1, "Quick", Rect::new(0, 0, 400, 300), true);
    let capture = FakeCapture::new(vec![win.clone()]);
    let ui = FakeUiReader {
        elements: vec![detection(
            DetectionSource::UiElement,
            "Menu",
            Rect::new(0, 0, 100, 20),
            1.0,
        )],
        fail: false,
    };
    // Would fail loudly if invoked
    let ocr = FakeRecognizer {
        spans: Vec::new(),
        fail: true,
    };

    let (analyzer, _cache) = analyzer(capture, ui, ocr);
    let snapshot = analyzer.analyze_window(&win, false).await;

    assert_eq!(snapshot.entities.len(), 1);
    assert_eq!(snapshot.entities[0].label, "Menu");
}

#[tokio::test]
async fn test_full_screen_analysis_fuses_text_with_cached_objects() {
    let capture = Arc::new(FakeCapture::new(Vec::new()));
    let ui = FakeUiReader {
        elements: Vec::new(),
        fail: false,
    };
    let ocr = FakeRecognizer {
        spans: vec![detection(
            DetectionSource::Ocr,
            "Recycle Bin",
            Rect::new(40, 40, 100, 20),
            0.9,
        )],
        fail: false,
    };

    let (writer, cache) = detection_cache();
    let mut cached = screen_analyzer::DetectionSnapshot::empty(SnapshotOrigin::Desktop);
    cached.entities = screen_analyzer::fuse(
        vec![detection(
            DetectionSource::Object,
            "monitor",
            Rect::new(500, 300, 200, 150),
            0.77,
        )],
        &FusionOptions::default(),
    );
    writer.publish(cached);

    let analyzer = ScreenAnalyzer::new(
        &Config::default(),
        capture,
        Arc::new(ui),
        Arc::new(ocr),
        cache,
    )
    .expect("default config is valid");

    let snapshot = analyzer.analyze_full_screen(true).await;

    assert!(matches!(snapshot.origin, SnapshotOrigin::Desktop));
    assert_eq!(snapshot.entities.len(), 2);
    let labels: Vec<&str> = snapshot.entities.iter().map(|e| e.label.as_str()).collect();
    assert!(labels.contains(&"Recycle Bin"));
    assert!(labels.contains(&"monitor"));
}

#[tokio::test]
async fn test_full_screen_capture_failure_yields_empty_snapshot() {
    let capture = FakeCapture::failing(Vec::new());
    let ui = FakeUiReader {
        elements: Vec::new(),
        fail: false,
    };
    let ocr = FakeRecognizer {
        spans: vec![detection(
            DetectionSource::Ocr,
            "never reached",
            Rect::new(0, 0, 50, 10),
            0.9,
        )],
        fail: false,
    };

    let (analyzer, _cache) = analyzer(capture, ui, ocr);
    let snapshot = analyzer.analyze_full_screen(true).await;

    assert!(snapshot.entities.is_empty());
    assert!(matches!(snapshot.origin, SnapshotOrigin::Desktop));
}

#[tokio::test]
async fn test_find_window_matches_title_case_insensitively() {
    let windows = vec![
        window(1, "Mail - Inbox", Rect::new(0, 0, 800, 600), true),
        window(2, "Terminal", Rect::new(800, 0, 640, 480), false),
    ];
    let capture = FakeCapture::new(windows);
    let ui = FakeUiReader {
        elements: Vec::new(),
        fail: false,
    };
    let ocr = FakeRecognizer {
        spans: Vec::new(),
        fail: false,
    };

    let (analyzer, _cache) = analyzer(capture, ui, ocr);

    let found = analyzer.find_window("INBOX").expect("enumeration succeeds");
    assert_eq!(found.map(|w| w.id), Some(1));

    let missing = analyzer.find_window("browser").expect("enumeration succeeds");
    assert!(missing.is_none());
}

#[tokio::test]
async fn test_find_window_by_content_matches_fused_labels() {
    let windows = vec![
        window(1, "Editor", Rect::new(0, 0, 800, 600), true),
        window(2, "Player", Rect::new(800, 0, 640, 480), false),
    ];
    let capture = FakeCapture::new(windows);
    let ui = FakeUiReader {
        elements: Vec::new(),
        fail: false,
    };
    // Both windows see the same spans; the query only matches one label
    let ocr = FakeRecognizer {
        spans: vec![detection(
            DetectionSource::Ocr,
            "Save Changes",
            Rect::new(10, 10, 120, 20),
            0.9,
        )],
        fail: false,
    };

    let (analyzer, _cache) = analyzer(capture, ui, ocr);

    let hits = analyzer
        .find_window_by_content("save")
        .await
        .expect("enumeration succeeds");
    assert_eq!(hits.len(), 2);

    let none = analyzer
        .find_window_by_content("quit")
        .await
        .expect("enumeration succeeds");
    assert!(none.is_empty());
}

#[tokio::test]
async fn test_desktop_state_reports_active_window() {
    let windows = vec![
        window(1, "Front", Rect::new(0, 0, 800, 600), false),
        window(2, "Focused", Rect::new(100, 100, 640, 480), true),
    ];
    let capture = FakeCapture::new(windows);
    let ui = FakeUiReader {
        elements: Vec::new(),
        fail: false,
    };
    let ocr = FakeRecognizer {
        spans: Vec::new(),
        fail: false,
    };

    let (analyzer, _cache) = analyzer(capture, ui, ocr);
    let state = analyzer.desktop_state().expect("enumeration succeeds");

    assert_eq!(state.windows.len(), 2);
    assert_eq!(state.active.as_ref().map(|w| w.id), Some(2));
}

#[tokio::test]
async fn test_summaries_cover_every_window() {
    let windows = vec![
        window(1, "One", Rect::new(0, 0, 400, 300), true),
        window(2, "Two", Rect::new(400, 0, 400, 300), false),
    ];
    let capture = FakeCapture::new(windows);
    let ui = FakeUiReader {
        elements: vec![detection(
            DetectionSource::UiElement,
            "OK",
            Rect::new(10, 10, 40, 20),
            1.0,
        )],
        fail: false,
    };
    let ocr = FakeRecognizer {
        spans: Vec::new(),
        fail: false,
    };

    let (analyzer, _cache) = analyzer(capture, ui, ocr);
    let summaries = analyzer.summaries().await.expect("enumeration succeeds");

    assert_eq!(summaries.len(), 2);
    for summary in &summaries {
        assert_eq!(summary.entity_count, 1);
        assert_eq!(summary.digest, "OK");
    }
}

#[tokio::test]
async fn test_detection_loop_publishes_and_window_analysis_overlays_cache() {
    let win = window(1, "Desk", Rect::new(0, 0, 1920, 1080), true);
    let capture = Arc::new(FakeCapture::new(vec![win.clone()]));
    let calls = Arc::new(AtomicUsize::new(0));
    let detector = Arc::new(FakeDetector {
        objects: vec![detection(
            DetectionSource::Object,
            "coffee cup",
            Rect::new(300, 400, 60, 60),
            0.81,
        )],
        calls: calls.clone(),
    });

    let (writer, cache) = detection_cache();
    assert!(cache.latest().is_none());

    let detection_loop = DetectionLoop::spawn(
        capture.clone(),
        detector,
        writer,
        Duration::from_millis(20),
        FusionOptions::default(),
    );

    // Wait for at least one cycle to publish
    let mut published = None;
    for _ in 0..50 {
        tokio::time::sleep(Duration::from_millis(10)).await;
        if let Some(snapshot) = cache.latest() {
            published = Some(snapshot);
            break;
        }
    }
    let snapshot = published.expect("loop published within the deadline");
    assert_eq!(snapshot.entities.len(), 1);
    assert_eq!(snapshot.entities[0].label, "coffee cup");
    assert!(matches!(snapshot.origin, SnapshotOrigin::Desktop));

    // A window analysis overlays the cached object onto its own detections
    let ui = FakeUiReader {
        elements: Vec::new(),
        fail: false,
    };
    let ocr = FakeRecognizer {
        spans: Vec::new(),
        fail: false,
    };
    let analyzer = ScreenAnalyzer::new(
        &Config::default(),
        capture,
        Arc::new(ui),
        Arc::new(ocr),
        cache.clone(),
    )
    .expect("default config is valid");

    let analysis = analyzer.analyze_window(&win, false).await;
    assert_eq!(analysis.entities.len(), 1);
    assert_eq!(analysis.entities[0].label, "coffee cup");
    assert_eq!(analysis.entities[0].sources, vec![DetectionSource::Object]);

    detection_loop.stop().await;
    assert!(detection_loop_stopped_within(&calls).await);
}

/// After stop() returns the loop must run no further cycles
async fn detection_loop_stopped_within(calls: &AtomicUsize) -> bool {
    let before = calls.load(Ordering::SeqCst);
    tokio::time::sleep(Duration::from_millis(60)).await;
    calls.load(Ordering::SeqCst) == before
}

#[tokio::test]
async fn test_cached_snapshot_is_immutable_across_readers() {
    let (writer, cache) = detection_cache();
    let other = cache.clone();

    let mut snapshot =
        screen_analyzer::DetectionSnapshot::empty(SnapshotOrigin::Desktop);
    snapshot.entities = screen_analyzer::fuse(
        vec![detection(
            DetectionSource::Object,
            "plant",
            Rect::new(0, 0, 40, 40),
            0.7,
        )],
        &FusionOptions::default(),
    );
    writer.publish(snapshot);

    let a = cache.latest().expect("published");
    let b = other.latest().expect("published");
    assert!(Arc::ptr_eq(&a, &b));

    // Replacement is wholesale; earlier readers keep their snapshot
    writer.publish(screen_analyzer::DetectionSnapshot::empty(
        SnapshotOrigin::Desktop,
    ));
    assert_eq!(a.entities.len(), 1);
    assert!(cache.latest().expect("published").entities.is_empty());
}

#[tokio::test]
async fn test_analyze_active_window_without_focus_is_empty() {
    let windows = vec![window(1, "Unfocused", Rect::new(0, 0, 400, 300), false)];
    let capture = FakeCapture::new(windows);
    let ui = FakeUiReader {
        elements: Vec::new(),
        fail: false,
    };
    let ocr = FakeRecognizer {
        spans: Vec::new(),
        fail: false,
    };

    let (analyzer, _cache) = analyzer(capture, ui, ocr);
    let snapshot = analyzer.analyze_active_window(true).await;

    assert!(snapshot.entities.is_empty());
    assert!(matches!(snapshot.origin, SnapshotOrigin::Desktop));
}
