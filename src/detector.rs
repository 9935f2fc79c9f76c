//! Visual object detection and its background refresh loop.
//!
//! The detector runs on its own schedule, independent of caller requests:
//! capture full screen, run the vision-detector helper, publish a fresh
//! snapshot into the detection cache by wholesale replacement. Readers never
//! lock and never observe a partial snapshot.

use crate::capture::CaptureProvider;
use crate::config::DetectorConfig;
use crate::fusion::{self, FusionOptions};
use crate::types::{
    Detection, DetectionSnapshot, DetectionSource, EngineError, Frame, Rect, SnapshotOrigin,
};
use serde::Deserialize;
use std::path::PathBuf;
use std::process::Stdio;
use std::sync::atomic::{AtomicU64, Ordering};
use std::sync::Arc;
use std::time::Duration;
use tokio::process::Command;
use tokio::sync::watch;
use tokio::task::JoinHandle;
use tracing::{debug, info, warn};

/// One object as reported by the helper binary
#[derive(Debug, Deserialize)]
struct RawObject {
    class_name: String,
    /// [x, y, width, height] in frame-local coordinates
    bbox: [i32; 4],
    confidence: f32,
}

/// Runs a learned detector over a captured frame
#[async_trait::async_trait]
pub trait ObjectDetector: Send + Sync {
    /// Labeled boxes found in the frame, in desktop coordinates
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, EngineError>;
}

/// Object detector backed by the vision-detector helper binary
pub struct VisionDetector {
    binary_path: PathBuf,
    min_confidence: f32,
}

impl VisionDetector {
    pub fn new(config: &DetectorConfig) -> Self {
        let binary_path = config
            .binary_path
            .as_ref()
            .map(PathBuf::from)
            .unwrap_or_else(Self::default_binary_path);

        Self {
            binary_path,
            min_confidence: config.min_confidence,
        }
    }

    /// Get the default binary path
    fn default_binary_path() -> PathBuf {
        let exe_dir = std::env::current_exe()
            .ok()
            .and_then(|p| p.parent().map(|p| p.to_path_buf()))
            .unwrap_or_else(|| PathBuf::from("."));

        let paths = [
            exe_dir.join("vision-detector"),
            PathBuf::from("vision-detector/target/release/vision-detector"),
            PathBuf::from("../vision-detector/target/release/vision-detector"),
            PathBuf::from("/usr/local/bin/vision-detector"),
        ];

        for path in paths {
            if path.exists() {
                return path;
            }
        }

        PathBuf::from("vision-detector")
    }

    /// Check if the helper binary is available
    pub fn is_available(&self) -> bool {
        self.binary_path.exists()
    }

    /// Convert raw objects to detections, translating frame-local boxes and
    /// dropping low-confidence findings
    fn objects_to_detections(
        frame: &Frame,
        objects: Vec<RawObject>,
        min_confidence: f32,
    ) -> Vec<Detection> {
        objects
            .into_iter()
            .filter(|obj| obj.confidence >= min_confidence)
            .map(|obj| {
                let [x, y, w, h] = obj.bbox;
                let local = Rect::new(x, y, w.max(0) as u32, h.max(0) as u32);
                Detection::new(
                    DetectionSource::Object,
                    obj.class_name,
                    frame.to_desktop(local),
                    obj.confidence.clamp(0.0, 1.0),
                )
            })
            .collect()
    }
}

static SCRATCH_SEQ: AtomicU64 = AtomicU64::new(0);

/// Per-call scratch path; detections triggered outside the single-flight
/// loop must never share a file with an in-flight cycle.
fn scratch_image_path() -> PathBuf {
    let seq = SCRATCH_SEQ.fetch_add(1, Ordering::Relaxed);
    std::env::temp_dir().join(format!(
        "screen_analyzer_detect_{}_{}.png",
        std::process::id(),
        seq
    ))
}

#[async_trait::async_trait]
impl ObjectDetector for VisionDetector {
    async fn detect(&self, frame: &Frame) -> Result<Vec<Detection>, EngineError> {
        let temp_path = scratch_image_path();

        frame.image.save(&temp_path).map_err(|e| {
            EngineError::Recognition(format!("failed to save temp image: {}", e))
        })?;

        let output = Command::new(&self.binary_path)
            .arg("--image")
            .arg(&temp_path)
            .arg("--json")
            .stdout(Stdio::piped())
            .stderr(Stdio::piped())
            .output()
            .await;

        let _ = std::fs::remove_file(&temp_path);

        let output = output.map_err(EngineError::Io)?;

        if !output.status.success() {
            let stderr = String::from_utf8_lossy(&output.stderr);
            return Err(EngineError::Recognition(stderr.trim().to_string()));
        }

        let stdout = String::from_utf8_lossy(&output.stdout);

        let value: serde_json::Value = serde_json::from_str(&stdout).map_err(|e| {
            EngineError::Recognition(format!("malformed vision-detector output: {}", e))
        })?;

        if let Some(error) = value.get("error").and_then(|e| e.as_str()) {
            return Err(EngineError::Recognition(error.to_string()));
        }

        let objects: Vec<RawObject> = match value.get("detections") {
            Some(objects) => serde_json::from_value(objects.clone()).map_err(|e| {
                EngineError::Recognition(format!("malformed detection list: {}", e))
            })?,
            None => Vec::new(),
        };

        let detections = Self::objects_to_detections(frame, objects, self.min_confidence);
        debug!("Object detector yielded {} boxes", detections.len());

        Ok(detections)
    }
}

/// Shared value inside the cache channel
type CachedSnapshot = Option<Arc<DetectionSnapshot>>;

/// Read side of the background detection cache.
///
/// `latest()` is non-blocking and returns whatever was most recently
/// published, or `None` before the first cycle completes. Snapshots are
/// replaced wholesale, never mutated, so two reads with no intervening
/// publish return the same `Arc`.
#[derive(Clone)]
pub struct DetectionCache {
    rx: watch::Receiver<CachedSnapshot>,
}

impl DetectionCache {
    /// The most recent snapshot, if any cycle has completed
    pub fn latest(&self) -> Option<Arc<DetectionSnapshot>> {
        self.rx.borrow().clone()
    }
}

/// Write side of the cache; held only by the background loop
pub struct CacheWriter {
    tx: watch::Sender<CachedSnapshot>,
}

impl CacheWriter {
    /// Publish a new snapshot, replacing the previous one atomically
    pub fn publish(&self, snapshot: DetectionSnapshot) {
        let _ = self.tx.send(Some(Arc::new(snapshot)));
    }
}

/// Create an empty cache and its single writer
pub fn detection_cache() -> (CacheWriter, DetectionCache) {
    let (tx, rx) = watch::channel(None);
    (CacheWriter { tx }, DetectionCache { rx })
}

/// The background detection loop, with an explicit lifecycle.
///
/// At most one cycle is in flight at a time; if a cycle overruns the period,
/// the next starts immediately after it finishes. A failed cycle is logged
/// and skipped while the cache keeps serving the last good snapshot. The
/// loop exits only when [`DetectionLoop::stop`] flips the shutdown flag.
pub struct DetectionLoop {
    shutdown: watch::Sender<bool>,
    handle: JoinHandle<()>,
}

impl DetectionLoop {
    /// Start the loop on the given period
    pub fn spawn(
        provider: Arc<dyn CaptureProvider>,
        detector: Arc<dyn ObjectDetector>,
        writer: CacheWriter,
        period: Duration,
        fusion_opts: FusionOptions,
    ) -> Self {
        let (shutdown_tx, mut shutdown_rx) = watch::channel(false);

        let handle = tokio::spawn(async move {
            let mut interval = tokio::time::interval(period);
            // An over-long cycle starts the next one immediately after,
            // never overlapping.
            interval.set_missed_tick_behavior(tokio::time::MissedTickBehavior::Delay);

            info!("Object detection loop started ({:?} period)", period);

            loop {
                tokio::select! {
                    _ = interval.tick() => {}
                    _ = shutdown_rx.changed() => break,
                }

                if *shutdown_rx.borrow() {
                    break;
                }

                match run_cycle(provider.as_ref(), detector.as_ref(), &fusion_opts).await {
                    Ok(snapshot) => {
                        debug!(
                            "Detection cycle published {} entities",
                            snapshot.entities.len()
                        );
                        writer.publish(snapshot);
                    }
                    Err(e) => {
                        // Keep serving the previous snapshot
                        warn!("Detection cycle failed, skipping: {}", e);
                    }
                }
            }

            info!("Object detection loop stopped");
        });

        Self {
            shutdown: shutdown_tx,
            handle,
        }
    }

    /// Signal shutdown and wait for the current cycle to finish
    pub async fn stop(self) {
        let _ = self.shutdown.send(true);
        let _ = self.handle.await;
    }

    /// Whether the loop task has exited
    pub fn is_stopped(&self) -> bool {
        self.handle.is_finished()
    }
}

/// One capture-detect-publish cycle
async fn run_cycle(
    provider: &dyn CaptureProvider,
    detector: &dyn ObjectDetector,
    fusion_opts: &FusionOptions,
) -> Result<DetectionSnapshot, EngineError> {
    let frame = provider.capture_full_screen()?;
    let captured_at = frame.captured_at;

    let detections = detector.detect(&frame).await?;
    let entities = fusion::fuse(detections, fusion_opts);

    Ok(DetectionSnapshot {
        captured_at,
        origin: SnapshotOrigin::Desktop,
        entities,
    })
}
