//! Cloud coverage per administrative region from an unregistered satellite
//! screenshot: boundary loading, geo-alignment, all-touched rasterization,
//! HSV cloud classification and the scheduled run loop around them.

pub mod analyze;
pub mod boundary;
pub mod classify;
pub mod config;
pub mod error;
pub mod geo_transform;
pub mod layout;
pub mod raster;
pub mod scheduler;
pub mod sinks;
pub mod timestamp;

pub use analyze::{AnalysisRecord, RegionAnalyzer};
pub use boundary::{BoundaryLayer, Region};
pub use config::Config;
pub use scheduler::{Clock, Collaborators, CycleOutcome, Scheduler, SystemClock};
