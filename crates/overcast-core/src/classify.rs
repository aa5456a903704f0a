//! Per-pixel cloud heuristic in 8-bit HSV space.
//!
//! The HSV conversion reproduces the usual 8-bit convention (hue in 0..180,
//! saturation and value in 0..=255) with fixed-point division tables, so results
//! are bit-stable across platforms.

const HSV_SHIFT: u32 = 12;
const HSV_ROUND: i32 = 1 << (HSV_SHIFT - 1);

/// 8-bit hue/saturation/value triple.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct Hsv {
    /// 0..180 (degrees halved).
    pub h: u8,
    pub s: u8,
    pub v: u8,
}

/// `round((255 << 12) / v)`
#[inline]
fn sat_divisor(v: i32) -> i32 {
    ((255 << HSV_SHIFT) as f64 / v as f64).round() as i32
}

/// `round((180 << 12) / (6 * diff))`
#[inline]
fn hue_divisor(diff: i32) -> i32 {
    ((180 << HSV_SHIFT) as f64 / (6 * diff) as f64).round() as i32
}

pub fn rgb_to_hsv(r: u8, g: u8, b: u8) -> Hsv {
    let (r, g, b) = (r as i32, g as i32, b as i32);
    let v = r.max(g).max(b);
    let min = r.min(g).min(b);
    let diff = v - min;

    let s = if v == 0 {
        0
    } else {
        (diff * sat_divisor(v) + HSV_ROUND) >> HSV_SHIFT
    };

    let h = if diff == 0 {
        0
    } else {
        let raw = if v == r {
            g - b
        } else if v == g {
            b - r + 2 * diff
        } else {
            r - g + 4 * diff
        };
        let h = (raw * hue_divisor(diff) + HSV_ROUND) >> HSV_SHIFT;
        if h < 0 {
            h + 180
        } else {
            h
        }
    };

    Hsv {
        h: h as u8,
        s: s as u8,
        v: v as u8,
    }
}

/// True if the pixel looks like cloud: bright and grey, very bright, or a pale
/// blue-white within a moderate saturation bound.
pub fn is_cloud(rgb: [u8; 3]) -> bool {
    let [r, g, b] = rgb;
    let Hsv { s, v, .. } = rgb_to_hsv(r, g, b);

    if v > 190 && s < 60 {
        return true;
    }
    if v > 220 {
        return true;
    }
    r >= 180 && g >= 180 && b >= 190 && s < 90
}
