use anyhow::{anyhow, Context, Result};
use crossbeam::channel::{self, Receiver, RecvTimeoutError, Sender, TryRecvError};
use log::{debug, error, info, warn};
use std::path::Path;
use std::sync::{Arc, Mutex};
use std::thread::{self, JoinHandle};
use std::time::Duration;

use crate::camera_profile::CameraType;
use crate::dehaze::DehazeConfig;
use crate::diagnostics::DiagnosticsRecord;
use crate::frame::Frame;
use crate::processor::FrameProcessor;
use crate::settings::SharedSettings;
use crate::white_balance::EstimatorConfig;

/// Anything that can hand the capture loop raw BGR frames.
pub trait FrameSource: Send {
    fn name(&self) -> &str;

    fn resolution(&self) -> (u32, u32);

    /// Position of the device in the platform's camera list.
    fn device_index(&self) -> u32 {
        0
    }

    fn read(&mut self) -> Result<Frame>;

    fn camera_type(&self) -> CameraType {
        let (width, height) = self.resolution();
        CameraType::classify(width, height, self.device_index())
    }
}

/// Synthetic camera used when no device is available: a moving gradient
/// tinted by a fixed color cast.
pub struct TestPatternSource {
    width: u32,
    height: u32,
    /// Multiplier per BGR channel, e.g. `[1.3, 1.0, 0.8]` for a blue cast.
    cast: [f32; 3],
    frame_index: u32,
}

impl TestPatternSource {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_cast(width, height, [1.0, 1.0, 1.0])
    }

    pub fn with_cast(width: u32, height: u32, cast: [f32; 3]) -> Self {
        Self {
            width,
            height,
            cast,
            frame_index: 0,
        }
    }
}

impl FrameSource for TestPatternSource {
    fn name(&self) -> &str {
        "test pattern"
    }

    fn resolution(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn read(&mut self) -> Result<Frame> {
        let (w, h) = (self.width.max(1), self.height.max(1));
        let shift = self.frame_index % w;
        let cast = self.cast;
        self.frame_index = self.frame_index.wrapping_add(1);

        Ok(Frame::from_fn(self.width, self.height, |x, y| {
            let xs = (x + shift) % w;
            let r = 60.0 + 120.0 * xs as f32 / w as f32;
            let g = 60.0 + 120.0 * y as f32 / h as f32;
            let b = 60.0 + 120.0 * (xs + y) as f32 / (w + h) as f32;
            let tint = |v: f32, k: f32| (v * k).round().clamp(0.0, 255.0) as u8;
            [tint(b, cast[0]), tint(g, cast[1]), tint(r, cast[2])]
        }))
    }
}

/// Replays one decoded image as a live feed.
pub struct StillImageSource {
    name: String,
    frame: Frame,
}

impl StillImageSource {
    pub fn open<P: AsRef<Path>>(path: P) -> Result<Self> {
        let path = path.as_ref();
        let image = image::open(path)
            .with_context(|| format!("Failed to load image from {}", path.display()))?
            .to_rgb8();
        debug!("Loaded still source {}: {}x{}", path.display(), image.width(), image.height());
        Ok(Self {
            name: path.display().to_string(),
            frame: Frame::from_rgb_image(&image),
        })
    }

    pub fn from_frame(name: impl Into<String>, frame: Frame) -> Self {
        Self {
            name: name.into(),
            frame,
        }
    }
}

impl FrameSource for StillImageSource {
    fn name(&self) -> &str {
        &self.name
    }

    fn resolution(&self) -> (u32, u32) {
        self.frame.dimensions()
    }

    fn read(&mut self) -> Result<Frame> {
        Ok(self.frame.clone())
    }
}

/// A corrected frame as published by the capture loop.
#[derive(Debug, Clone)]
pub struct ProcessedFrame {
    pub sequence: u64,
    pub frame: Frame,
    pub diagnostics: DiagnosticsRecord,
}

pub enum CaptureCommand {
    ChangeSource(Box<dyn FrameSource>),
    Stop,
}

#[derive(Debug, Clone, Copy)]
pub struct CaptureOptions {
    /// Pause between reads; zero runs as fast as the source delivers.
    pub frame_interval: Duration,
    pub snapshot_timeout: Duration,
    pub snapshot_retries: u32,
    pub estimator: EstimatorConfig,
    pub dehaze: DehazeConfig,
}

impl Default for CaptureOptions {
    fn default() -> Self {
        Self {
            frame_interval: Duration::from_millis(33),
            snapshot_timeout: Duration::from_millis(500),
            snapshot_retries: 3,
            estimator: EstimatorConfig::default(),
            dehaze: DehazeConfig::default(),
        }
    }
}

/// Background thread running read -> process -> publish.
///
/// The display side receives frames on a one-slot channel; frames it is too
/// slow to take are dropped so capture never stalls. The most recent frame
/// is also kept for saving.
pub struct CaptureLoop {
    commands: Sender<CaptureCommand>,
    frames: Receiver<Arc<ProcessedFrame>>,
    latest: Arc<Mutex<Option<Arc<ProcessedFrame>>>>,
    settings: Arc<SharedSettings>,
    options: CaptureOptions,
    handle: Option<JoinHandle<()>>,
}

impl CaptureLoop {
    pub fn start(source: Box<dyn FrameSource>, settings: Arc<SharedSettings>, options: CaptureOptions) -> Result<Self> {
        let (command_tx, command_rx) = channel::unbounded();
        let (frame_tx, frame_rx) = channel::bounded(1);
        let latest = Arc::new(Mutex::new(None));

        let worker = Worker {
            source,
            processor: None,
            resolution: (0, 0),
            settings: Arc::clone(&settings),
            commands: command_rx,
            frames: frame_tx,
            latest: Arc::clone(&latest),
            options,
            sequence: 0,
        };

        let handle = thread::Builder::new()
            .name("capture".to_string())
            .spawn(move || worker.run())
            .context("Failed to spawn capture thread")?;

        Ok(Self {
            commands: command_tx,
            frames: frame_rx,
            latest,
            settings,
            options,
            handle: Some(handle),
        })
    }

    /// Stream of corrected frames for the display sink.
    pub fn frames(&self) -> &Receiver<Arc<ProcessedFrame>> {
        &self.frames
    }

    pub fn settings(&self) -> &Arc<SharedSettings> {
        &self.settings
    }

    pub fn latest(&self) -> Option<Arc<ProcessedFrame>> {
        self.latest.lock().unwrap_or_else(|p| p.into_inner()).clone()
    }

    /// Switches to another device; white balance history starts over.
    pub fn change_source(&self, source: Box<dyn FrameSource>) -> Result<()> {
        self.commands
            .send(CaptureCommand::ChangeSource(source))
            .map_err(|_| anyhow!("Capture thread has stopped"))
    }

    /// Frame to save: the one just shown if there is one, otherwise the next
    /// one off the line, waiting a bounded time per attempt.
    pub fn snapshot(&self) -> Result<Arc<ProcessedFrame>> {
        if let Some(frame) = self.latest() {
            return Ok(frame);
        }

        for attempt in 1..=self.options.snapshot_retries.max(1) {
            match self.frames.recv_timeout(self.options.snapshot_timeout) {
                Ok(frame) => return Ok(frame),
                Err(RecvTimeoutError::Timeout) => {
                    warn!("Snapshot attempt {} timed out", attempt);
                    if let Some(frame) = self.latest() {
                        return Ok(frame);
                    }
                }
                Err(RecvTimeoutError::Disconnected) => break,
            }
        }
        Err(anyhow!("No frame available for capture"))
    }

    pub fn is_running(&self) -> bool {
        self.handle.as_ref().map(|h| !h.is_finished()).unwrap_or(false)
    }

    pub fn stop(mut self) -> Result<()> {
        self.shutdown()
    }

    fn shutdown(&mut self) -> Result<()> {
        if let Some(handle) = self.handle.take() {
            let _ = self.commands.send(CaptureCommand::Stop);
            handle.join().map_err(|_| anyhow!("Capture thread panicked"))?;
            info!("Capture loop stopped");
        }
        Ok(())
    }
}

impl Drop for CaptureLoop {
    fn drop(&mut self) {
        if let Err(e) = self.shutdown() {
            error!("Failed to stop capture loop: {}", e);
        }
    }
}

struct Worker {
    source: Box<dyn FrameSource>,
    processor: Option<FrameProcessor>,
    resolution: (u32, u32),
    settings: Arc<SharedSettings>,
    commands: Receiver<CaptureCommand>,
    frames: Sender<Arc<ProcessedFrame>>,
    latest: Arc<Mutex<Option<Arc<ProcessedFrame>>>>,
    options: CaptureOptions,
    sequence: u64,
}

impl Worker {
    fn run(mut self) {
        info!("Capture loop started on {}", self.source.name());
        loop {
            match self.commands.try_recv() {
                Ok(CaptureCommand::Stop) | Err(TryRecvError::Disconnected) => break,
                Ok(CaptureCommand::ChangeSource(source)) => {
                    info!("Switching capture source to {}", source.name());
                    self.source = source;
                    // Forces re-classification on the next frame.
                    self.resolution = (0, 0);
                }
                Err(TryRecvError::Empty) => {}
            }

            match self.source.read() {
                Ok(frame) => self.handle_frame(frame),
                Err(e) => error!("Failed to read from {}: {:#}", self.source.name(), e),
            }

            if !self.options.frame_interval.is_zero() {
                thread::sleep(self.options.frame_interval);
            }
        }
    }

    fn handle_frame(&mut self, frame: Frame) {
        if frame.dimensions() != self.resolution {
            self.resolution = frame.dimensions();
            let camera_type = self.source.camera_type();
            info!(
                "Camera session {}: {}x{} classified as {}",
                self.source.name(),
                self.resolution.0,
                self.resolution.1,
                camera_type
            );
            match self.processor.as_mut() {
                Some(processor) => processor.on_camera_changed(camera_type),
                None => {
                    self.processor = Some(FrameProcessor::new(
                        camera_type,
                        self.options.estimator,
                        self.options.dehaze,
                    ))
                }
            }
        }

        let Some(processor) = self.processor.as_mut() else {
            return;
        };
        let settings = self.settings.snapshot();
        let (corrected, diagnostics) = processor.process(&frame, &settings);

        self.sequence += 1;
        let processed = Arc::new(ProcessedFrame {
            sequence: self.sequence,
            frame: corrected,
            diagnostics,
        });
        if self.sequence % 100 == 0 {
            debug!("Frame {}: {}", self.sequence, diagnostics);
        }

        *self.latest.lock().unwrap_or_else(|p| p.into_inner()) = Some(Arc::clone(&processed));
        // Display is behind; it will pick up a later frame.
        let _ = self.frames.try_send(processed);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::settings::{SettingsUpdate, WbMode};

    struct BrokenSource;

    impl FrameSource for BrokenSource {
        fn name(&self) -> &str {
            "broken"
        }

        fn resolution(&self) -> (u32, u32) {
            (0, 0)
        }

        fn read(&mut self) -> Result<Frame> {
            Err(anyhow!("device unplugged"))
        }
    }

    fn fast_options() -> CaptureOptions {
        CaptureOptions {
            frame_interval: Duration::from_millis(1),
            snapshot_timeout: Duration::from_millis(200),
            snapshot_retries: 2,
            ..CaptureOptions::default()
        }
    }

    #[test]
    fn test_test_pattern_animates() {
        let mut source = TestPatternSource::with_cast(32, 16, [1.3, 1.0, 0.8]);
        let a = source.read().unwrap();
        let b = source.read().unwrap();
        assert_eq!(a.dimensions(), (32, 16));
        assert_ne!(a, b);
        let means = a.channel_means();
        assert!(means[0] > means[2]);
    }

    #[test]
    fn test_loop_publishes_corrected_frames() {
        let settings = Arc::new(SharedSettings::default());
        let capture = CaptureLoop::start(
            Box::new(TestPatternSource::new(40, 30)),
            Arc::clone(&settings),
            fast_options(),
        )
        .unwrap();

        let first = capture.frames().recv_timeout(Duration::from_secs(5)).unwrap();
        assert_eq!(first.frame.dimensions(), (40, 30));
        assert_eq!(first.diagnostics.mode, WbMode::Auto);

        settings.update(&SettingsUpdate {
            wb_mode: Some(WbMode::Manual),
            ..Default::default()
        });
        let manual = (0..200)
            .filter_map(|_| capture.frames().recv_timeout(Duration::from_secs(5)).ok())
            .find(|f| f.diagnostics.mode == WbMode::Manual);
        assert!(manual.is_some());

        let snap = capture.snapshot().unwrap();
        assert!(snap.sequence >= first.sequence);
        capture.stop().unwrap();
    }

    #[test]
    fn test_change_source_switches_resolution() {
        let capture = CaptureLoop::start(
            Box::new(TestPatternSource::new(40, 30)),
            Arc::new(SharedSettings::default()),
            fast_options(),
        )
        .unwrap();
        capture.frames().recv_timeout(Duration::from_secs(5)).unwrap();

        capture
            .change_source(Box::new(StillImageSource::from_frame("still", Frame::filled(20, 10, [90, 100, 110]))))
            .unwrap();
        let switched = (0..200)
            .filter_map(|_| capture.frames().recv_timeout(Duration::from_secs(5)).ok())
            .find(|f| f.frame.dimensions() == (20, 10));
        assert!(switched.is_some());
    }

    #[test]
    fn test_snapshot_without_frames_fails() {
        let capture = CaptureLoop::start(Box::new(BrokenSource), Arc::new(SharedSettings::default()), fast_options()).unwrap();
        assert!(capture.snapshot().is_err());
        assert!(capture.is_running());
        capture.stop().unwrap();
    }

    #[test]
    fn test_still_image_source_missing_file() {
        assert!(StillImageSource::open("/nonexistent/produce.png").is_err());
    }
}
