//! Per-region cloud coverage over one captured frame.
//!
//! For each region: align → burn mask → count opaque masked pixels and the
//! cloudy subset → format the percentage. A region that fails alignment is
//! logged and left out; the rest of the run carries on.

use chrono::{DateTime, FixedOffset};
use image::{Rgba, RgbaImage};
use log::{error, info, warn};
use serde::{Serialize, Serializer};

use crate::boundary::{BoundaryLayer, Region};
use crate::classify::is_cloud;
use crate::error::{GeometryAlignmentError, RunError};
use crate::geo_transform::{align_region, pixel_transform, AffineMap, AlignmentParams, ImageExtent};
use crate::raster::burn;
use crate::timestamp::PAYLOAD_FORMAT;

pub const CLASSIFICATION_TYPE: &str = "Cloud Coverage";

// ── Record ───────────────────────────────────────────────────────────────────

/// One region's result for one run. Field names on the wire follow the
/// receiving API (`taluk`, `values`, `type`).
#[derive(Debug, Clone, PartialEq, Serialize)]
pub struct AnalysisRecord {
    pub district: String,
    #[serde(rename = "taluk")]
    pub region_name: String,
    /// Two decimals and a trailing `%`, e.g. `"42.17%"`.
    #[serde(rename = "values")]
    pub cloud_percentage: String,
    #[serde(rename = "type")]
    pub classification_type: String,
    #[serde(serialize_with = "serialize_payload_time")]
    pub timestamp: DateTime<FixedOffset>,
}

fn serialize_payload_time<S: Serializer>(ts: &DateTime<FixedOffset>, s: S) -> Result<S::Ok, S::Error> {
    s.collect_str(&ts.format(PAYLOAD_FORMAT))
}

/// Opaque pixels under the mask, and how many of them are cloud.
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq)]
pub struct PixelCounts {
    pub total: u64,
    pub cloudy: u64,
}

impl PixelCounts {
    /// `"0.00%"` when no pixel was counted.
    pub fn formatted_percentage(&self) -> String {
        let pct = if self.total == 0 {
            0.0
        } else {
            (self.cloudy as f64 / self.total as f64) * 100.0
        };
        format!("{pct:.2}%")
    }
}

pub struct RegionAnalysis {
    pub record: AnalysisRecord,
    pub counts: PixelCounts,
    /// Masked opaque pixels on a transparent canvas.
    pub visualization: Option<RgbaImage>,
}

/// Everything the analyzer produced for one frame.
pub struct FrameAnalysis {
    pub regions: Vec<RegionAnalysis>,
    pub failed: Vec<GeometryAlignmentError>,
    /// Regions that counted no opaque pixel (reported as `0.00%` with a warning).
    pub zero_pixel_regions: Vec<String>,
}

impl FrameAnalysis {
    pub fn records(&self) -> Vec<AnalysisRecord> {
        self.regions.iter().map(|r| r.record.clone()).collect()
    }
}

// ── Analyzer ─────────────────────────────────────────────────────────────────

pub struct RegionAnalyzer<'a> {
    extent: &'a ImageExtent,
    alignment: &'a AlignmentParams,
    map: AffineMap,
    visualize: bool,
}

impl<'a> RegionAnalyzer<'a> {
    pub fn new(extent: &'a ImageExtent, alignment: &'a AlignmentParams) -> Self {
        Self {
            extent,
            alignment,
            map: pixel_transform(extent),
            visualize: true,
        }
    }

    pub fn with_visualization(mut self, enabled: bool) -> Self {
        self.visualize = enabled;
        self
    }

    /// Analyze every region of `layer` against `frame`.
    ///
    /// Fails only when the frame does not match the calibrated extent, which
    /// would invalidate every region at once.
    pub fn analyze(
        &self,
        layer: &BoundaryLayer,
        frame: &RgbaImage,
        timestamp: DateTime<FixedOffset>,
    ) -> Result<FrameAnalysis, RunError> {
        if frame.width() != self.extent.pixel_width || frame.height() != self.extent.pixel_height {
            return Err(RunError::ExtentMismatch {
                frame_width: frame.width(),
                frame_height: frame.height(),
                extent_width: self.extent.pixel_width,
                extent_height: self.extent.pixel_height,
            });
        }

        info!(
            "image extent LON({}-{}) LAT({}-{}); zoom={} x_offset={:.2} y_offset={:.2}",
            self.extent.min_lon,
            self.extent.max_lon,
            self.extent.min_lat,
            self.extent.max_lat,
            self.alignment.zoom_factor,
            self.alignment.x_offset(),
            self.alignment.y_offset()
        );

        let mut out = FrameAnalysis {
            regions: Vec::with_capacity(layer.len()),
            failed: Vec::new(),
            zero_pixel_regions: Vec::new(),
        };
        for region in layer.regions() {
            match self.analyze_region(region, frame, &layer.district, timestamp) {
                Ok(analysis) => {
                    if analysis.counts.total == 0 {
                        out.zero_pixel_regions.push(region.name.clone());
                    }
                    out.regions.push(analysis);
                }
                Err(err) => {
                    error!("{err}");
                    out.failed.push(err);
                }
            }
        }
        Ok(out)
    }

    pub fn analyze_region(
        &self,
        region: &Region,
        frame: &RgbaImage,
        district: &str,
        timestamp: DateTime<FixedOffset>,
    ) -> Result<RegionAnalysis, GeometryAlignmentError> {
        let aligned = align_region(&region.name, &region.geometry, self.extent, self.alignment)?;
        let width = frame.width() as usize;
        let height = frame.height() as usize;
        let mask = burn(&aligned, &self.map, width, height);

        let mut counts = PixelCounts::default();
        let mut canvas = self
            .visualize
            .then(|| RgbaImage::from_pixel(frame.width(), frame.height(), Rgba([0, 0, 0, 0])));

        for (row, col) in mask.iter_inside() {
            let Rgba([r, g, b, a]) = *frame.get_pixel(col as u32, row as u32);
            if a == 0 {
                continue;
            }
            counts.total += 1;
            if is_cloud([r, g, b]) {
                counts.cloudy += 1;
            }
            if let Some(canvas) = canvas.as_mut() {
                canvas.put_pixel(col as u32, row as u32, Rgba([r, g, b, 255]));
            }
        }

        if counts.total == 0 {
            warn!(
                "region '{}' has 0 opaque pixels after masking; geometry may lie outside the extent or alignment is off",
                region.name
            );
        }

        let cloud_percentage = counts.formatted_percentage();
        info!(
            "cloud coverage for {}: {} (total pixels: {}, cloudy pixels: {})",
            region.name, cloud_percentage, counts.total, counts.cloudy
        );

        Ok(RegionAnalysis {
            record: AnalysisRecord {
                district: district.to_string(),
                region_name: region.name.clone(),
                cloud_percentage,
                classification_type: CLASSIFICATION_TYPE.to_string(),
                timestamp,
            },
            counts,
            visualization: canvas,
        })
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use chrono::TimeZone;
    use geo::{polygon, MultiPolygon};

    fn extent_100() -> ImageExtent {
        ImageExtent {
            min_lon: 79.0,
            max_lon: 80.0,
            min_lat: 9.0,
            max_lat: 10.0,
            pixel_width: 100,
            pixel_height: 100,
        }
    }

    fn identity() -> AlignmentParams {
        AlignmentParams {
            zoom_factor: 1.0,
            offset_left: 0.0,
            offset_right: 0.0,
            offset_up: 0.0,
            offset_down: 0.0,
        }
    }

    fn region(name: &str, min_lon: f64, min_lat: f64, max_lon: f64, max_lat: f64) -> Region {
        Region {
            name: name.into(),
            geometry: MultiPolygon(vec![polygon![
                (x: min_lon, y: min_lat),
                (x: max_lon, y: min_lat),
                (x: max_lon, y: max_lat),
                (x: min_lon, y: max_lat)
            ]]),
        }
    }

    fn ts() -> DateTime<FixedOffset> {
        FixedOffset::east_opt(19_800)
            .unwrap()
            .with_ymd_and_hms(2025, 6, 1, 10, 15, 0)
            .unwrap()
    }

    fn layer(regions: Vec<Region>) -> BoundaryLayer {
        BoundaryLayer::from_regions("Ramanathapuram", regions)
    }

    #[test]
    fn all_white_frame_is_fully_cloudy() {
        let extent = extent_100();
        let params = identity();
        let frame = RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255]));
        let analysis = RegionAnalyzer::new(&extent, &params)
            .analyze(&layer(vec![region("Full", 79.0, 9.0, 80.0, 10.0)]), &frame, ts())
            .unwrap();
        let only = &analysis.regions[0];
        assert_eq!(only.record.cloud_percentage, "100.00%");
        assert_eq!(only.counts.total, 10_000);
    }

    #[test]
    fn all_black_frame_is_clear() {
        let extent = extent_100();
        let params = identity();
        let frame = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        let analysis = RegionAnalyzer::new(&extent, &params)
            .analyze(&layer(vec![region("Full", 79.0, 9.0, 80.0, 10.0)]), &frame, ts())
            .unwrap();
        assert_eq!(analysis.regions[0].record.cloud_percentage, "0.00%");
        assert_eq!(analysis.regions[0].counts.total, 10_000);
    }

    #[test]
    fn transparent_pixels_are_not_counted() {
        let extent = extent_100();
        let params = identity();
        let mut frame = RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255]));
        // Left half dark and opaque, right half white but transparent.
        for (x, _, px) in frame.enumerate_pixels_mut() {
            *px = if x < 50 { Rgba([10, 10, 10, 255]) } else { Rgba([255, 255, 255, 0]) };
        }
        let analysis = RegionAnalyzer::new(&extent, &params)
            .analyze(&layer(vec![region("Full", 79.0, 9.0, 80.0, 10.0)]), &frame, ts())
            .unwrap();
        let only = &analysis.regions[0];
        assert_eq!(only.counts.total, 5_000);
        assert_eq!(only.counts.cloudy, 0);
        let vis = only.visualization.as_ref().unwrap();
        assert_eq!(vis.get_pixel(10, 10).0, [10, 10, 10, 255]);
        assert_eq!(vis.get_pixel(80, 10).0[3], 0);
    }

    #[test]
    fn region_outside_extent_reports_zero_and_run_continues() {
        let extent = extent_100();
        let params = identity();
        let frame = RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 255]));
        let analysis = RegionAnalyzer::new(&extent, &params)
            .analyze(
                &layer(vec![
                    region("Offshore", 85.0, 15.0, 86.0, 16.0),
                    region("Inland", 79.0, 9.0, 79.5, 9.5),
                ]),
                &frame,
                ts(),
            )
            .unwrap();
        assert_eq!(analysis.regions.len(), 2);
        assert_eq!(analysis.regions[0].record.cloud_percentage, "0.00%");
        assert_eq!(analysis.regions[0].counts.total, 0);
        assert_eq!(analysis.regions[1].record.cloud_percentage, "100.00%");
        assert_eq!(analysis.zero_pixel_regions, ["Offshore"]);
    }

    #[test]
    fn fully_transparent_region_is_flagged() {
        let extent = extent_100();
        let params = identity();
        let frame = RgbaImage::from_pixel(100, 100, Rgba([255, 255, 255, 0]));
        let analysis = RegionAnalyzer::new(&extent, &params)
            .analyze(&layer(vec![region("Inland", 79.0, 9.0, 79.5, 9.5)]), &frame, ts())
            .unwrap();
        assert_eq!(analysis.regions[0].record.cloud_percentage, "0.00%");
        assert_eq!(analysis.zero_pixel_regions, ["Inland"]);
        assert!(analysis.failed.is_empty());
    }

    #[test]
    fn degenerate_region_is_dropped_others_kept() {
        let extent = extent_100();
        let params = identity();
        let frame = RgbaImage::from_pixel(100, 100, Rgba([0, 0, 0, 255]));
        let broken = Region {
            name: "Broken".into(),
            geometry: MultiPolygon(vec![]),
        };
        let analysis = RegionAnalyzer::new(&extent, &params)
            .analyze(&layer(vec![broken, region("Inland", 79.0, 9.0, 79.5, 9.5)]), &frame, ts())
            .unwrap();
        assert_eq!(analysis.regions.len(), 1);
        assert_eq!(analysis.failed.len(), 1);
        assert_eq!(analysis.failed[0].region, "Broken");
        assert!(analysis.zero_pixel_regions.is_empty());
    }

    #[test]
    fn mismatched_frame_aborts() {
        let extent = extent_100();
        let params = identity();
        let frame = RgbaImage::new(50, 100);
        let err = RegionAnalyzer::new(&extent, &params)
            .analyze(&layer(vec![region("Full", 79.0, 9.0, 80.0, 10.0)]), &frame, ts())
            .err()
            .unwrap();
        assert!(matches!(err, RunError::ExtentMismatch { frame_width: 50, .. }));
    }

    #[test]
    fn percentage_formatting() {
        assert_eq!(PixelCounts { total: 3, cloudy: 1 }.formatted_percentage(), "33.33%");
        assert_eq!(PixelCounts { total: 3, cloudy: 2 }.formatted_percentage(), "66.67%");
        assert_eq!(PixelCounts { total: 0, cloudy: 0 }.formatted_percentage(), "0.00%");
    }

    #[test]
    fn record_serializes_with_wire_names() {
        let record = AnalysisRecord {
            district: "Ramanathapuram".into(),
            region_name: "Kadaladi".into(),
            cloud_percentage: "12.50%".into(),
            classification_type: CLASSIFICATION_TYPE.into(),
            timestamp: ts(),
        };
        let json = serde_json::to_value(&record).unwrap();
        assert_eq!(json["taluk"], "Kadaladi");
        assert_eq!(json["values"], "12.50%");
        assert_eq!(json["type"], "Cloud Coverage");
        assert_eq!(json["timestamp"], "2025-06-01 10:15:00");
    }
}
