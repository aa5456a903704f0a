//! Collaborator seams around the analysis core, plus the delivery retry policy.
//!
//! Capture is the only run-fatal collaborator. Everything downstream of the
//! analyzer is best-effort: a `SinkError` is logged and the run carries on.

use std::path::PathBuf;
use std::time::Duration;

use chrono::{DateTime, FixedOffset};
use image::{imageops, RgbaImage};
use log::{error, info, warn};

use crate::analyze::AnalysisRecord;
use crate::config::{CropBox, DeliveryConfig};
use crate::error::{RunError, SinkError};
use crate::layout::RunLayout;
use crate::scheduler::Clock;

/// Produces the run's cropped frame. Implementations save both the full and
/// the cropped image into `layout`.
pub trait Capture {
    fn capture(&mut self, layout: &RunLayout) -> Result<RgbaImage, RunError>;
}

/// Persists one record, keyed on `(region_name, timestamp)`. Writing the same
/// key twice overwrites.
pub trait RecordStore {
    fn upsert(&mut self, record: &AnalysisRecord) -> Result<(), SinkError>;
}

/// Renders a human-readable summary of a run; returns the written path.
pub trait Reporter {
    fn render(&mut self, summary: &RunSummary<'_>) -> Result<PathBuf, SinkError>;
}

/// Sends one JSON body. `Ok` carries a success status; anything else is an error.
pub trait Transport {
    fn post_json(&self, endpoint: &str, body: &str) -> Result<u16, SinkError>;
}

/// What the reporter sees of a finished analysis.
pub struct RunSummary<'a> {
    pub district: &'a str,
    pub timestamp: DateTime<FixedOffset>,
    pub layout: &'a RunLayout,
    pub records: &'a [AnalysisRecord],
    /// `(region name, image path)` for every visualisation that was written.
    pub visualizations: &'a [(String, PathBuf)],
    pub json: &'a str,
}

/// Cut the configured box out of a full capture.
pub fn crop_capture(full: &RgbaImage, crop: &CropBox) -> Result<RgbaImage, RunError> {
    if !crop.fits(full.width(), full.height()) {
        return Err(RunError::CaptureFailure(format!(
            "crop box {:?} does not fit a {}x{} capture",
            crop.0,
            full.width(),
            full.height()
        )));
    }
    Ok(imageops::crop_imm(full, crop.left(), crop.upper(), crop.width(), crop.height()).to_image())
}

/// Crop `full` and write both images into the run layout.
pub fn store_capture(layout: &RunLayout, full: &RgbaImage, crop: &CropBox) -> Result<RgbaImage, RunError> {
    let cropped = crop_capture(full, crop)?;
    for (image, path) in [(full, layout.full_capture()), (&cropped, layout.cropped_capture())] {
        image
            .save(&path)
            .map_err(|e| RunError::CaptureFailure(format!("cannot save {}: {e}", path.display())))?;
    }
    info!(
        "captured {}x{} frame, cropped to {}x{}",
        full.width(),
        full.height(),
        cropped.width(),
        cropped.height()
    );
    Ok(cropped)
}

// ── Delivery ─────────────────────────────────────────────────────────────────

#[derive(Debug, Clone, PartialEq, Eq)]
pub enum DeliveryOutcome {
    /// No endpoint configured or nothing to send.
    Skipped,
    Delivered { attempts: u32 },
    Exhausted { attempts: u32 },
}

/// Retry policy around a [`Transport`].
pub struct Delivery {
    transport: Box<dyn Transport>,
    endpoint: Option<String>,
    attempts: u32,
    pause: Duration,
}

impl Delivery {
    pub fn new(transport: Box<dyn Transport>, config: &DeliveryConfig) -> Self {
        Self {
            transport,
            endpoint: config.endpoint.clone(),
            attempts: config.attempts.max(1),
            pause: Duration::from_secs(config.pause_secs),
        }
    }

    /// POST `records` as a JSON array, retrying with a fixed pause between
    /// attempts. Never fails the run.
    pub fn deliver(&self, records: &[AnalysisRecord], clock: &dyn Clock) -> DeliveryOutcome {
        let Some(endpoint) = self.endpoint.as_deref() else {
            warn!("no delivery endpoint configured; skipping delivery");
            return DeliveryOutcome::Skipped;
        };
        if records.is_empty() {
            warn!("no results to deliver; skipping delivery");
            return DeliveryOutcome::Skipped;
        }
        let body = match serde_json::to_string(records) {
            Ok(body) => body,
            Err(e) => {
                error!("cannot serialise results for delivery: {e}");
                return DeliveryOutcome::Exhausted { attempts: 0 };
            }
        };

        for attempt in 1..=self.attempts {
            info!("delivering {} records to {endpoint} (attempt {attempt}/{})", records.len(), self.attempts);
            match self.transport.post_json(endpoint, &body) {
                Ok(status) => {
                    info!("delivery succeeded with status {status}");
                    return DeliveryOutcome::Delivered { attempts: attempt };
                }
                Err(e) => {
                    error!("attempt {attempt}: {e}");
                    if attempt < self.attempts {
                        info!("retrying in {}s", self.pause.as_secs());
                        clock.sleep(self.pause);
                    }
                }
            }
        }
        error!("all {} delivery attempts failed", self.attempts);
        DeliveryOutcome::Exhausted { attempts: self.attempts }
    }
}
