//! Frame capture: an external screenshot command, or a PNG already on disk.

use std::fs;
use std::io;
use std::path::PathBuf;
use std::process::{Child, Command, ExitStatus, Stdio};
use std::thread;
use std::time::{Duration, Instant};

use image::RgbaImage;
use log::{error, info};
use overcast_core::config::{CaptureConfig, CropBox};
use overcast_core::error::RunError;
use overcast_core::layout::RunLayout;
use overcast_core::sinks::{store_capture, Capture};

const POLL_INTERVAL: Duration = Duration::from_millis(200);

/// Kills and reaps the child on every exit path.
struct ChildGuard(Child);

impl Drop for ChildGuard {
    fn drop(&mut self) {
        let _ = self.0.kill();
        let _ = self.0.wait();
    }
}

fn wait_with_timeout(child: &mut Child, timeout: Duration) -> Result<ExitStatus, RunError> {
    let started = Instant::now();
    loop {
        match child.try_wait() {
            Ok(Some(status)) => return Ok(status),
            Ok(None) if started.elapsed() >= timeout => {
                return Err(RunError::CaptureFailure(format!(
                    "capture command timed out after {}s",
                    timeout.as_secs()
                )))
            }
            Ok(None) => thread::sleep(POLL_INTERVAL),
            Err(e) => return Err(RunError::CaptureFailure(format!("cannot wait for capture command: {e}"))),
        }
    }
}

fn load_png(path: &std::path::Path) -> Result<RgbaImage, RunError> {
    image::open(path)
        .map(|img| img.to_rgba8())
        .map_err(|e| RunError::CaptureFailure(format!("cannot decode {}: {e}", path.display())))
}

fn write_error_log(layout: &RunLayout, err: &RunError) {
    let path = layout.capture_error_log();
    let text = format!("{}\n{err}\n", chrono::Utc::now().to_rfc3339());
    match fs::write(&path, text) {
        Ok(()) => info!("capture diagnostics written to {}", path.display()),
        Err(e) => error!("cannot write {}: {e}", path.display()),
    }
}

/// Runs the configured screenshot program, then crops its output.
pub struct CommandCapture {
    config: CaptureConfig,
    crop: CropBox,
}

impl CommandCapture {
    pub fn new(config: CaptureConfig, crop: CropBox) -> Self {
        Self { config, crop }
    }

    fn args(&self, output: &str) -> Vec<String> {
        self.config
            .args
            .iter()
            .map(|a| a.replace("{output}", output).replace("{url}", &self.config.url))
            .collect()
    }

    fn run(&self, layout: &RunLayout) -> Result<RgbaImage, RunError> {
        let output = layout.full_capture();
        // A rerun in the same slot must not pick up the previous frame.
        match fs::remove_file(&output) {
            Ok(()) => {}
            Err(e) if e.kind() == io::ErrorKind::NotFound => {}
            Err(e) => {
                return Err(RunError::CaptureFailure(format!(
                    "cannot clear stale {}: {e}",
                    output.display()
                )))
            }
        }
        let args = self.args(&output.to_string_lossy());
        info!("capturing {} with {}", self.config.url, self.config.program);

        let child = Command::new(&self.config.program)
            .args(&args)
            .stdin(Stdio::null())
            .stdout(Stdio::null())
            .stderr(Stdio::null())
            .spawn()
            .map_err(|e| RunError::CaptureFailure(format!("cannot start {}: {e}", self.config.program)))?;
        let mut guard = ChildGuard(child);

        let status = wait_with_timeout(&mut guard.0, Duration::from_secs(self.config.timeout_secs))?;
        if !status.success() {
            return Err(RunError::CaptureFailure(format!(
                "{} exited with {status}",
                self.config.program
            )));
        }
        drop(guard);

        if !output.is_file() {
            return Err(RunError::CaptureFailure(format!(
                "{} exited without writing {}",
                self.config.program,
                output.display()
            )));
        }
        let full = load_png(&output)?;
        store_capture(layout, &full, &self.crop)
    }
}

impl Capture for CommandCapture {
    fn capture(&mut self, layout: &RunLayout) -> Result<RgbaImage, RunError> {
        let result = self.run(layout);
        if let Err(err) = &result {
            write_error_log(layout, err);
        }
        result
    }
}

/// Reuses one full-size capture for every run.
pub struct FileCapture {
    path: PathBuf,
    crop: CropBox,
}

impl FileCapture {
    pub fn new(path: PathBuf, crop: CropBox) -> Self {
        Self { path, crop }
    }
}

impl Capture for FileCapture {
    fn capture(&mut self, layout: &RunLayout) -> Result<RgbaImage, RunError> {
        info!("using pre-captured frame {}", self.path.display());
        let result = load_png(&self.path).and_then(|full| store_capture(layout, &full, &self.crop));
        if let Err(err) = &result {
            write_error_log(layout, err);
        }
        result
    }
}
