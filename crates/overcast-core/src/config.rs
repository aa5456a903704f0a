//! Deployment configuration, loaded once from JSON and passed by reference.
//!
//! Every field defaults to the reference deployment (Ramanathapuram on the
//! windy.com satellite layer), so `{}` is a complete config.

use std::fs;
use std::path::{Path, PathBuf};
use std::time::Duration;

use chrono::FixedOffset;
use serde::{Deserialize, Serialize};

use crate::boundary::DistrictFilter;
use crate::error::ConfigError;
use crate::geo_transform::{AlignmentParams, ImageExtent};

/// Pixel box `[left, upper, right, lower]` cut from the full capture.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub struct CropBox(pub [u32; 4]);

impl Default for CropBox {
    fn default() -> Self {
        Self([575, 135, 1060, 610])
    }
}

impl CropBox {
    pub fn left(&self) -> u32 {
        self.0[0]
    }

    pub fn upper(&self) -> u32 {
        self.0[1]
    }

    pub fn width(&self) -> u32 {
        self.0[2].saturating_sub(self.0[0])
    }

    pub fn height(&self) -> u32 {
        self.0[3].saturating_sub(self.0[1])
    }

    /// True if the box is non-empty and lies within an image of this size.
    pub fn fits(&self, width: u32, height: u32) -> bool {
        let [l, u, r, b] = self.0;
        l < r && r <= width && u < b && b <= height
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct CaptureConfig {
    /// External screenshot program, e.g. a headless browser wrapper script.
    pub program: String,
    /// Arguments; `{url}` and `{output}` are substituted.
    pub args: Vec<String>,
    pub url: String,
    pub timeout_secs: u64,
}

impl Default for CaptureConfig {
    fn default() -> Self {
        Self {
            program: "chromium".into(),
            args: vec![
                "--headless".into(),
                "--no-sandbox".into(),
                "--disable-dev-shm-usage".into(),
                "--hide-scrollbars".into(),
                "--window-size=1920,1080".into(),
                "--virtual-time-budget=15000".into(),
                "--screenshot={output}".into(),
                "{url}".into(),
            ],
            url: "https://www.windy.com/-Satellite-satellite?satellite,9.466,78.742,9,p:favs".into(),
            timeout_secs: 90,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ScheduleConfig {
    pub interval_secs: u64,
    pub recovery_secs: u64,
    pub grid_minutes: u32,
    /// Deployment zone as `±HH:MM`.
    pub utc_offset: String,
}

impl Default for ScheduleConfig {
    fn default() -> Self {
        Self {
            interval_secs: 300,
            recovery_secs: 120,
            grid_minutes: 15,
            utc_offset: "+05:30".into(),
        }
    }
}

impl ScheduleConfig {
    pub fn interval(&self) -> Duration {
        Duration::from_secs(self.interval_secs)
    }

    pub fn recovery(&self) -> Duration {
        Duration::from_secs(self.recovery_secs)
    }

    pub fn offset(&self) -> Result<FixedOffset, ConfigError> {
        parse_utc_offset(&self.utc_offset)
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct DeliveryConfig {
    /// `None` disables delivery.
    pub endpoint: Option<String>,
    pub attempts: u32,
    pub pause_secs: u64,
    pub timeout_secs: u64,
}

impl Default for DeliveryConfig {
    fn default() -> Self {
        Self {
            endpoint: None,
            attempts: 3,
            pause_secs: 10,
            timeout_secs: 120,
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct OutputConfig {
    pub root: PathBuf,
    pub database: PathBuf,
}

impl Default for OutputConfig {
    fn default() -> Self {
        Self {
            root: PathBuf::from("images"),
            database: PathBuf::from("overcast.sqlite3"),
        }
    }
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct Config {
    pub district: DistrictFilter,
    pub boundary_path: PathBuf,
    pub extent: ImageExtent,
    pub alignment: AlignmentParams,
    pub crop_box: CropBox,
    pub capture: CaptureConfig,
    pub schedule: ScheduleConfig,
    pub delivery: DeliveryConfig,
    pub output: OutputConfig,
}

impl Default for Config {
    fn default() -> Self {
        Self {
            district: DistrictFilter::default(),
            boundary_path: PathBuf::from("data/gadm41_IND_3.json"),
            extent: ImageExtent::default(),
            alignment: AlignmentParams::default(),
            crop_box: CropBox::default(),
            capture: CaptureConfig::default(),
            schedule: ScheduleConfig::default(),
            delivery: DeliveryConfig::default(),
            output: OutputConfig::default(),
        }
    }
}

impl Config {
    pub fn load(path: &Path) -> Result<Self, ConfigError> {
        let text = fs::read_to_string(path).map_err(|source| ConfigError::Io {
            path: path.to_path_buf(),
            source,
        })?;
        let config: Config = serde_json::from_str(&text).map_err(|source| ConfigError::Parse {
            path: path.to_path_buf(),
            source,
        })?;
        config.validate()?;
        Ok(config)
    }

    pub fn validate(&self) -> Result<(), ConfigError> {
        self.extent.validate().map_err(ConfigError::Invalid)?;
        self.alignment.validate().map_err(ConfigError::Invalid)?;

        if !self.crop_box.fits(u32::MAX, u32::MAX) {
            return Err(ConfigError::Invalid(format!("crop box {:?} is empty", self.crop_box.0)));
        }
        if self.crop_box.width() != self.extent.pixel_width
            || self.crop_box.height() != self.extent.pixel_height
        {
            return Err(ConfigError::Invalid(format!(
                "crop box is {}x{} but the extent is calibrated for {}x{}",
                self.crop_box.width(),
                self.crop_box.height(),
                self.extent.pixel_width,
                self.extent.pixel_height
            )));
        }

        let grid = self.schedule.grid_minutes;
        if grid == 0 || 60 % grid != 0 {
            return Err(ConfigError::Invalid(format!(
                "grid_minutes must divide 60, got {grid}"
            )));
        }
        self.schedule.offset()?;

        if self.delivery.attempts == 0 {
            return Err(ConfigError::Invalid("delivery.attempts must be at least 1".into()));
        }
        Ok(())
    }
}

/// Parse `±HH:MM` (or `Z`) into a fixed offset.
pub fn parse_utc_offset(text: &str) -> Result<FixedOffset, ConfigError> {
    let invalid = || ConfigError::Invalid(format!("utc_offset '{text}' is not ±HH:MM"));
    if text == "Z" {
        return FixedOffset::east_opt(0).ok_or_else(invalid);
    }

    let (sign, rest) = match text.as_bytes().first() {
        Some(b'+') => (1, &text[1..]),
        Some(b'-') => (-1, &text[1..]),
        _ => return Err(invalid()),
    };
    let (hh, mm) = rest.split_once(':').ok_or_else(invalid)?;
    let hours: i32 = hh.parse().map_err(|_| invalid())?;
    let minutes: i32 = mm.parse().map_err(|_| invalid())?;
    if hh.len() != 2 || mm.len() != 2 || hours > 23 || minutes > 59 {
        return Err(invalid());
    }
    FixedOffset::east_opt(sign * (hours * 3600 + minutes * 60)).ok_or_else(invalid)
}
