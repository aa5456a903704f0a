//! Geographic ↔ pixel mapping and the empirical alignment correction.
//!
//! The capture source renders its map in a projection that is not quite
//! equirectangular, so boundary polygons are first scaled about the extent
//! centre and shifted by calibrated offsets, then mapped into pixel space with
//! a plain bounding-box affine (rows grow downward, latitude grows upward).

use geo::{AffineOps, AffineTransform, Coord, CoordsIter, MultiPolygon, Scale, Translate};
use serde::{Deserialize, Serialize};

use crate::error::GeometryAlignmentError;

// ── Extent ───────────────────────────────────────────────────────────────────

/// Geographic footprint of the cropped capture and its pixel dimensions.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct ImageExtent {
    pub min_lon: f64,
    pub max_lon: f64,
    pub min_lat: f64,
    pub max_lat: f64,
    pub pixel_width: u32,
    pub pixel_height: u32,
}

impl Default for ImageExtent {
    fn default() -> Self {
        Self {
            min_lon: 78.80,
            max_lon: 80.35,
            min_lat: 8.95,
            max_lat: 10.53,
            pixel_width: 485,
            pixel_height: 475,
        }
    }
}

impl ImageExtent {
    /// Midpoint of the lon/lat bounds. This is the scale origin for alignment.
    pub fn center(&self) -> Coord<f64> {
        Coord {
            x: (self.min_lon + self.max_lon) / 2.0,
            y: (self.min_lat + self.max_lat) / 2.0,
        }
    }

    pub fn validate(&self) -> Result<(), String> {
        let bounds = [self.min_lon, self.max_lon, self.min_lat, self.max_lat];
        if bounds.iter().any(|v| !v.is_finite()) {
            return Err("extent bounds must be finite".into());
        }
        if self.min_lon >= self.max_lon {
            return Err(format!(
                "extent min_lon ({}) must be below max_lon ({})",
                self.min_lon, self.max_lon
            ));
        }
        if self.min_lat >= self.max_lat {
            return Err(format!(
                "extent min_lat ({}) must be below max_lat ({})",
                self.min_lat, self.max_lat
            ));
        }
        if self.pixel_width == 0 || self.pixel_height == 0 {
            return Err("extent pixel dimensions must be non-zero".into());
        }
        Ok(())
    }
}

// ── Alignment ────────────────────────────────────────────────────────────────

/// Calibrated scale/translate correction applied to every boundary polygon.
/// Offsets are in degrees.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(default)]
pub struct AlignmentParams {
    pub zoom_factor: f64,
    pub offset_left: f64,
    pub offset_right: f64,
    pub offset_up: f64,
    pub offset_down: f64,
}

impl Default for AlignmentParams {
    fn default() -> Self {
        Self {
            zoom_factor: 1.18,
            offset_left: 0.20,
            offset_right: 1.13,
            offset_up: 0.52,
            offset_down: 0.32,
        }
    }
}

impl AlignmentParams {
    /// Net eastward shift in degrees.
    pub fn x_offset(&self) -> f64 {
        self.offset_right - self.offset_left
    }

    /// Net northward shift in degrees.
    pub fn y_offset(&self) -> f64 {
        self.offset_up - self.offset_down
    }

    pub fn validate(&self) -> Result<(), String> {
        let values = [
            self.zoom_factor,
            self.offset_left,
            self.offset_right,
            self.offset_up,
            self.offset_down,
        ];
        if values.iter().any(|v| !v.is_finite()) {
            return Err("alignment parameters must be finite".into());
        }
        if self.zoom_factor <= 0.0 {
            return Err(format!("zoom_factor must be positive, got {}", self.zoom_factor));
        }
        Ok(())
    }
}

/// Scale `geometry` by `zoom_factor` about the extent centre, then translate by
/// the net offsets. Every region in a run goes through the same call, so their
/// relative placement is preserved even when absolute alignment is off.
pub fn align_polygon(
    geometry: &MultiPolygon<f64>,
    extent: &ImageExtent,
    params: &AlignmentParams,
) -> MultiPolygon<f64> {
    geometry
        .scale_around_point(params.zoom_factor, params.zoom_factor, extent.center())
        .translate(params.x_offset(), params.y_offset())
}

/// `align_polygon` plus the sanity checks that make a region unusable.
pub fn align_region(
    region: &str,
    geometry: &MultiPolygon<f64>,
    extent: &ImageExtent,
    params: &AlignmentParams,
) -> Result<MultiPolygon<f64>, GeometryAlignmentError> {
    let fail = |reason: &str| GeometryAlignmentError {
        region: region.to_string(),
        reason: reason.to_string(),
    };

    if geometry.0.iter().all(|p| p.exterior().0.len() < 4) {
        return Err(fail("geometry has no ring with at least three distinct vertices"));
    }

    let aligned = align_polygon(geometry, extent, params);
    if aligned.coords_iter().any(|c| !c.x.is_finite() || !c.y.is_finite()) {
        return Err(fail("aligned geometry contains non-finite coordinates"));
    }
    Ok(aligned)
}

// ── Pixel affine ─────────────────────────────────────────────────────────────

/// Forward map from (lon, lat) to continuous (col, row) pixel coordinates.
/// Pixel `(c, r)` covers `[c, c+1) × [r, r+1)` in the mapped space.
#[derive(Debug, Clone, Copy)]
pub struct AffineMap {
    to_pixel: AffineTransform<f64>,
    pub width: u32,
    pub height: u32,
}

impl AffineMap {
    #[inline]
    pub fn apply(&self, lon: f64, lat: f64) -> (f64, f64) {
        let c = self.to_pixel.apply(Coord { x: lon, y: lat });
        (c.x, c.y)
    }

    /// Map a geographic multipolygon into pixel space.
    pub fn to_pixel_space(&self, geometry: &MultiPolygon<f64>) -> MultiPolygon<f64> {
        geometry.affine_transform(&self.to_pixel)
    }
}

/// Standard bounding-box affine for the extent's pixel grid, y-axis inverted.
pub fn pixel_transform(extent: &ImageExtent) -> AffineMap {
    let x_res = (extent.max_lon - extent.min_lon) / extent.pixel_width as f64;
    let y_res = (extent.max_lat - extent.min_lat) / extent.pixel_height as f64;
    let to_pixel = AffineTransform::new(
        1.0 / x_res,
        0.0,
        -extent.min_lon / x_res,
        0.0,
        -1.0 / y_res,
        extent.max_lat / y_res,
    );
    AffineMap {
        to_pixel,
        width: extent.pixel_width,
        height: extent.pixel_height,
    }
}
