//! All-touched polygon rasterisation into a boolean mask.
//!
//! A cell is inside when the polygon overlaps it at all. That set is the union
//! of cells whose centre lies inside the polygon (scanline fill, even-odd per
//! polygon so holes are respected) and cells crossed by any ring edge
//! (supercover walk, row band by row band).
//!
//! Contact along a grid line or at a grid corner is not overlap: an edge lying
//! exactly on a cell boundary marks neither neighbour, so the result does not
//! depend on which side of the line the polygon sits.

use geo::{LineString, MultiPolygon, Polygon};

use crate::geo_transform::AffineMap;

/// Row-major boolean grid matching the raster's pixel dimensions.
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct RegionMask {
    data: Vec<bool>,
    pub width: usize,
    pub height: usize,
}

impl RegionMask {
    pub fn new(width: usize, height: usize) -> Self {
        Self {
            data: vec![false; width * height],
            width,
            height,
        }
    }

    #[inline]
    pub fn get(&self, row: usize, col: usize) -> bool {
        self.data[row * self.width + col]
    }

    #[inline]
    pub fn set(&mut self, row: usize, col: usize) {
        self.data[row * self.width + col] = true;
    }

    pub fn count(&self) -> usize {
        self.data.iter().filter(|&&v| v).count()
    }

    /// True if `(row, col)` is inside but has a 4-neighbour that is not (or
    /// sits on the grid edge).
    pub fn is_edge(&self, row: usize, col: usize) -> bool {
        if !self.get(row, col) {
            return false;
        }
        if row == 0 || col == 0 || row + 1 == self.height || col + 1 == self.width {
            return true;
        }
        !(self.get(row - 1, col)
            && self.get(row + 1, col)
            && self.get(row, col - 1)
            && self.get(row, col + 1))
    }

    /// Iterate `(row, col)` of every inside cell in row-major order.
    pub fn iter_inside(&self) -> impl Iterator<Item = (usize, usize)> + '_ {
        self.data
            .iter()
            .enumerate()
            .filter(|(_, &v)| v)
            .map(move |(i, _)| (i / self.width, i % self.width))
    }
}

/// Burn a geographic multipolygon into a `height × width` mask.
pub fn burn(geometry: &MultiPolygon<f64>, map: &AffineMap, width: usize, height: usize) -> RegionMask {
    let mut mask = RegionMask::new(width, height);
    if width == 0 || height == 0 {
        return mask;
    }

    let pixel_space = map.to_pixel_space(geometry);
    for polygon in &pixel_space.0 {
        fill_centres(polygon, &mut mask);
        for ring in rings(polygon) {
            for seg in ring.lines() {
                touch_segment(seg.start.x, seg.start.y, seg.end.x, seg.end.y, &mut mask);
            }
        }
    }
    mask
}

fn rings(polygon: &Polygon<f64>) -> impl Iterator<Item = &LineString<f64>> {
    std::iter::once(polygon.exterior()).chain(polygon.interiors().iter())
}

/// Mark every cell whose centre is inside `polygon` (even-odd over its rings).
fn fill_centres(polygon: &Polygon<f64>, mask: &mut RegionMask) {
    let mut crossings: Vec<f64> = Vec::new();

    for row in 0..mask.height {
        let yc = row as f64 + 0.5;
        crossings.clear();

        for ring in rings(polygon) {
            for seg in ring.lines() {
                let (x1, y1, x2, y2) = (seg.start.x, seg.start.y, seg.end.x, seg.end.y);
                // Half-open rule so shared vertices are counted once.
                if (y1 <= yc) != (y2 <= yc) {
                    crossings.push(x1 + (yc - y1) / (y2 - y1) * (x2 - x1));
                }
            }
        }

        crossings.sort_by(|a, b| a.total_cmp(b));
        for pair in crossings.chunks_exact(2) {
            // Columns whose centre c + 0.5 lies in [pair[0], pair[1]).
            let first = (pair[0] - 0.5).ceil().max(0.0);
            let last = ((pair[1] - 0.5).ceil() - 1.0).min(mask.width as f64 - 1.0);
            if first > last {
                continue;
            }
            for col in first as usize..=last as usize {
                mask.set(row, col);
            }
        }
    }
}

/// Inclusive range of unit cells whose open interior meets `[a, b]` (in
/// either order). Empty when the interval is a single integer point.
fn cell_span(a: f64, b: f64) -> (i64, i64) {
    let (lo, hi) = (a.min(b), a.max(b));
    let last = if hi.fract() == 0.0 { hi - 1.0 } else { hi.floor() };
    (lo.floor() as i64, last as i64)
}

/// Mark every cell whose interior the segment passes through.
fn touch_segment(x1: f64, y1: f64, x2: f64, y2: f64, mask: &mut RegionMask) {
    let max_row = mask.height as i64 - 1;
    let max_col = mask.width as i64 - 1;

    let (row_lo, row_hi) = cell_span(y1, y2);
    for row in row_lo.max(0)..=row_hi.min(max_row) {
        // Clip the segment to the band [row, row + 1].
        let (xa, xb) = if y1 == y2 {
            (x1, x2)
        } else {
            let ta = ((row as f64 - y1) / (y2 - y1)).clamp(0.0, 1.0);
            let tb = ((row as f64 + 1.0 - y1) / (y2 - y1)).clamp(0.0, 1.0);
            (x1 + ta * (x2 - x1), x1 + tb * (x2 - x1))
        };

        let (col_lo, col_hi) = cell_span(xa, xb);
        for col in col_lo.max(0)..=col_hi.min(max_col) {
            mask.set(row as usize, col as usize);
        }
    }
}
