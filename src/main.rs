//! Screen Analyzer - Main entry point
//!
//! This binary runs the screen understanding engine as a daemon: it starts
//! the background object-detection loop and periodically logs a digest of
//! every visible window.

use screen_analyzer::{
    detection_cache, AxTreeReader, Config, DetectionLoop, FusionOptions, OcrClient,
    ScreenAnalyzer, SystemCapture, VisionDetector,
};
use std::sync::Arc;
use std::time::Duration;
use tokio::sync::watch;
use tracing::{error, info, Level};
use tracing_subscriber::FmtSubscriber;

#[tokio::main]
async fn main() -> Result<(), Box<dyn std::error::Error>> {
    // Load configuration before logging so the log level applies from the start
    let config = Config::load();

    let level: Level = config.general.log_level.parse().unwrap_or(Level::INFO);
    let _subscriber = FmtSubscriber::builder()
        .with_max_level(level)
        .with_target(false)
        .init();

    info!("Starting Screen Analyzer");
    info!("Configuration loaded from {:?}", Config::default_config_path());

    if !config.general.enabled {
        info!("Analyzer is disabled in configuration, exiting");
        return Ok(());
    }

    // Wire up the capture, inspection, and recognition services
    let capture = Arc::new(SystemCapture::new());
    let ui_reader = Arc::new(AxTreeReader::new(&config.ui));
    let recognizer = Arc::new(OcrClient::new(&config.ocr)?);
    let detector = Arc::new(VisionDetector::new(&config.detector));

    if !ui_reader.is_available() {
        info!("UI reader helper not found, analyses will be vision-only");
    }

    let (writer, cache) = detection_cache();
    let period = Duration::from_secs(config.detector.interval_seconds);

    let detection_loop = DetectionLoop::spawn(
        capture.clone(),
        detector,
        writer,
        period,
        FusionOptions::from(&config.fusion),
    );

    let analyzer = ScreenAnalyzer::new(&config, capture, ui_reader, recognizer, cache)?;

    // Ctrl-C flips the shutdown flag; the loop below drains gracefully
    let (shutdown_tx, mut shutdown_rx) = watch::channel(false);
    ctrlc::set_handler(move || {
        let _ = shutdown_tx.send(true);
    })?;

    info!("Analyzer running with {}s detection interval", period.as_secs());

    let mut tick_interval = tokio::time::interval(period);

    loop {
        tokio::select! {
            _ = tick_interval.tick() => {}
            _ = shutdown_rx.changed() => break,
        }

        match analyzer.summaries().await {
            Ok(summaries) => {
                for summary in &summaries {
                    info!(
                        "{} [{}]: {} entities{}{}",
                        summary.window.title,
                        summary.window.app_name,
                        summary.entity_count,
                        if summary.digest.is_empty() { "" } else { " - " },
                        summary.digest
                    );
                }
            }
            Err(e) => {
                error!("Window enumeration failed: {}", e);
            }
        }
    }

    info!("Shutting down");
    detection_loop.stop().await;

    Ok(())
}
