use anyhow::{Context, Result};
use chrono::{DateTime, Local};
use std::path::{Path, PathBuf};

use crate::frame::Frame;

/// Writes captured frames as PNGs, grouped in one folder per session:
/// `<root>/session_YYYYmmdd_HHMMSS/capture_NNN_<label>.png`.
pub struct CaptureWriter {
    root: PathBuf,
    session_folder: Option<String>,
    counter: u32,
}

impl CaptureWriter {
    pub fn new<P: Into<PathBuf>>(root: P) -> Self {
        Self {
            root: root.into(),
            session_folder: None,
            counter: 0,
        }
    }

    pub fn root(&self) -> &Path {
        &self.root
    }

    /// Folder of the current session, once something has been saved.
    pub fn session_dir(&self) -> Option<PathBuf> {
        self.session_folder.as_ref().map(|folder| self.root.join(folder))
    }

    pub fn saved_count(&self) -> u32 {
        self.counter
    }

    pub async fn save(&mut self, frame: &Frame, label: &str) -> Result<PathBuf> {
        if frame.is_empty() {
            anyhow::bail!("Refusing to save an empty frame");
        }

        let session_dir = match self.session_dir() {
            Some(dir) => dir,
            None => {
                let now: DateTime<Local> = Local::now();
                let folder = format!("session_{}", now.format("%Y%m%d_%H%M%S"));
                let dir = self.root.join(&folder);
                self.session_folder = Some(folder);
                self.counter = 0;
                dir
            }
        };
        tokio::fs::create_dir_all(&session_dir)
            .await
            .with_context(|| format!("Failed to create session directory: {}", session_dir.display()))?;

        self.counter += 1;
        let filename = format!("capture_{:03}_{}.png", self.counter, sanitize_label(label));
        let path = session_dir.join(filename);

        let image = frame.to_rgb_image();
        let target = path.clone();
        tokio::task::spawn_blocking(move || image.save(&target))
            .await
            .context("Image encoder task panicked")?
            .with_context(|| format!("Failed to write {}", path.display()))?;

        log::info!("Saved capture to {}", path.display());
        Ok(path)
    }

    /// Next save opens a fresh session folder.
    pub fn start_new_session(&mut self) {
        self.session_folder = None;
        self.counter = 0;
    }
}

fn sanitize_label(label: &str) -> String {
    let cleaned: String = label
        .trim()
        .to_lowercase()
        .chars()
        .map(|c| if c.is_ascii_alphanumeric() { c } else { '_' })
        .collect();
    if cleaned.is_empty() {
        "frame".to_string()
    } else {
        cleaned
    }
}
