use anyhow::{Context, Result};
use log::{info, warn};
use std::sync::Arc;
use std::time::Duration;

use aiscale_capture::capture::{CaptureLoop, FrameSource, StillImageSource, TestPatternSource};
use aiscale_capture::storage::CaptureWriter;
use aiscale_capture::{Config, SharedSettings};

const DEFAULT_FRAME_COUNT: u64 = 90;

#[tokio::main]
async fn main() -> Result<()> {
    env_logger::init();
    info!("Starting live color correction");

    let config = Config::load()?;
    info!(
        "Configuration loaded: {}x{} device {} ({})",
        config.camera.width,
        config.camera.height,
        config.camera.device_index,
        config.expected_camera_type()
    );

    let mut args = std::env::args().skip(1);
    let source: Box<dyn FrameSource> = match args.next() {
        Some(path) => Box::new(StillImageSource::open(&path)?),
        None => {
            warn!("No input image given, using test pattern");
            Box::new(TestPatternSource::with_cast(
                config.camera.width,
                config.camera.height,
                [1.25, 1.0, 0.85],
            ))
        }
    };
    let frame_count = match args.next() {
        Some(n) => n.parse().with_context(|| format!("Invalid frame count: {}", n))?,
        None => DEFAULT_FRAME_COUNT,
    };

    let settings = Arc::new(SharedSettings::new(config.processing));
    let capture = CaptureLoop::start(source, settings, config.capture_options())?;

    let frames = capture.frames().clone();
    let received = tokio::task::spawn_blocking(move || {
        let mut received = 0u64;
        while received < frame_count {
            match frames.recv_timeout(Duration::from_secs(2)) {
                Ok(processed) => {
                    received += 1;
                    if processed.sequence % 30 == 1 {
                        info!("Frame {}: {}", processed.sequence, processed.diagnostics);
                    }
                }
                Err(e) => {
                    warn!("Capture stalled: {}", e);
                    break;
                }
            }
        }
        received
    })
    .await
    .context("Display task panicked")?;
    info!("Displayed {} frames", received);

    let snapshot = capture.snapshot()?;
    let mut writer = CaptureWriter::new(&config.capture.save_dir);
    let path = writer
        .save(&snapshot.frame, &snapshot.diagnostics.mode.to_string())
        .await?;
    info!("Snapshot {} written to {}", snapshot.sequence, path.display());

    capture.stop()?;
    info!("Application shut down gracefully");
    Ok(())
}
