//! Error taxonomy for the analysis pipeline.
//!
//! Each enum corresponds to a blast radius: boundary and config errors stop the
//! process, `RunError` stops one run, `GeometryAlignmentError` drops one region,
//! and `SinkError` is only ever logged.

use std::path::PathBuf;

use thiserror::Error;

/// Configuration could not be read or is internally inconsistent.
#[derive(Debug, Error)]
pub enum ConfigError {
    #[error("cannot read config {path}: {source}")]
    Io {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
    #[error("cannot parse config {path}: {source}")]
    Parse {
        path: PathBuf,
        #[source]
        source: serde_json::Error,
    },
    #[error("invalid config: {0}")]
    Invalid(String),
}

/// Failure while loading the boundary layer. Always fatal at start-up.
#[derive(Debug, Error)]
pub enum BoundaryError {
    #[error("boundary dataset unavailable at {path}: {reason}")]
    DataUnavailable { path: PathBuf, reason: String },
    #[error("boundary dataset schema error: {0}")]
    SchemaError(String),
    #[error("no regions found for district '{district}'")]
    EmptyResult { district: String },
}

/// Failure that aborts the current run but not the process.
#[derive(Debug, Error)]
pub enum RunError {
    #[error("capture failed: {0}")]
    CaptureFailure(String),
    #[error(
        "captured frame is {frame_width}x{frame_height} but the extent is calibrated for {extent_width}x{extent_height}"
    )]
    ExtentMismatch {
        frame_width: u32,
        frame_height: u32,
        extent_width: u32,
        extent_height: u32,
    },
    #[error("cannot prepare run directory {path}: {source}")]
    Layout {
        path: PathBuf,
        #[source]
        source: std::io::Error,
    },
}

/// A single region could not be aligned onto the raster.
#[derive(Debug, Error)]
#[error("cannot align region '{region}': {reason}")]
pub struct GeometryAlignmentError {
    pub region: String,
    pub reason: String,
}

/// Failure of a best-effort output sink.
#[derive(Debug, Error)]
pub enum SinkError {
    #[error("persistence failed: {0}")]
    Persistence(String),
    #[error("report rendering failed: {0}")]
    Reporting(String),
    #[error("delivery failed: {0}")]
    Delivery(String),
}
