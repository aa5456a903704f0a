//! On-disk layout of one run's artifacts.
//!
//! ```text
//! <root>/<district_slug>/<YYYY-MM-DD_HH-MM-SS>/
//!     full/capture_full.png
//!     cropped/capture_cropped.png
//!     masked_regions/<region_slug>/<region_slug>_masked.png
//!     cloud_analysis_results.json
//!     report.html
//!     error_capture.log
//! ```

use std::fs;
use std::io;
use std::path::{Path, PathBuf};

use chrono::{DateTime, FixedOffset};

use crate::timestamp::DIR_FORMAT;

/// Lowercase, spaces to underscores, dots removed.
pub fn slug(name: &str) -> String {
    name.chars()
        .filter(|&c| c != '.')
        .map(|c| if c == ' ' { '_' } else { c })
        .flat_map(char::to_lowercase)
        .collect()
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RunLayout {
    dir: PathBuf,
}

impl RunLayout {
    pub fn new(root: &Path, district: &str, timestamp: DateTime<FixedOffset>) -> Self {
        Self {
            dir: root
                .join(slug(district))
                .join(timestamp.format(DIR_FORMAT).to_string()),
        }
    }

    /// Create the run directory and its fixed subdirectories. Re-running into
    /// an existing directory is fine; files are overwritten.
    pub fn create(&self) -> io::Result<()> {
        fs::create_dir_all(self.dir.join("full"))?;
        fs::create_dir_all(self.dir.join("cropped"))?;
        fs::create_dir_all(self.dir.join("masked_regions"))
    }

    pub fn dir(&self) -> &Path {
        &self.dir
    }

    pub fn full_capture(&self) -> PathBuf {
        self.dir.join("full").join("capture_full.png")
    }

    pub fn cropped_capture(&self) -> PathBuf {
        self.dir.join("cropped").join("capture_cropped.png")
    }

    pub fn results_json(&self) -> PathBuf {
        self.dir.join("cloud_analysis_results.json")
    }

    pub fn region_visualization(&self, region: &str) -> PathBuf {
        let s = slug(region);
        self.dir
            .join("masked_regions")
            .join(&s)
            .join(format!("{s}_masked.png"))
    }

    pub fn report(&self) -> PathBuf {
        self.dir.join("report.html")
    }

    pub fn capture_error_log(&self) -> PathBuf {
        self.dir.join("error_capture.log")
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;

    #[test]
    fn slugs() {
        assert_eq!(slug("Ramanathapuram"), "ramanathapuram");
        assert_eq!(slug("R.S. Mangalam"), "rs_mangalam");
        assert_eq!(slug("Kadaladi Taluk"), "kadaladi_taluk");
    }

    #[test]
    fn paths_follow_district_and_timestamp() {
        let ts = FixedOffset::east_opt(19_800)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 1, 10, 15, 0)
            .unwrap();
        let layout = RunLayout::new(Path::new("images"), "Ramanathapuram", ts);
        assert_eq!(layout.dir(), Path::new("images/ramanathapuram/2025-06-01_10-15-00"));
        assert_eq!(
            layout.region_visualization("R.S. Mangalam"),
            Path::new("images/ramanathapuram/2025-06-01_10-15-00/masked_regions/rs_mangalam/rs_mangalam_masked.png")
        );
        assert!(layout.full_capture().ends_with("full/capture_full.png"));
        assert!(layout.cropped_capture().ends_with("cropped/capture_cropped.png"));
    }

    #[test]
    fn create_is_repeatable() {
        let root = tempfile::tempdir().unwrap();
        let ts = FixedOffset::east_opt(0)
            .unwrap()
            .with_ymd_and_hms(2025, 1, 1, 0, 0, 0)
            .unwrap();
        let layout = RunLayout::new(root.path(), "Test District", ts);
        layout.create().unwrap();
        layout.create().unwrap();
        assert!(layout.dir().join("masked_regions").is_dir());
        assert!(root.path().join("test_district").is_dir());
    }
}
