use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::depth::DepthFrame;
use crate::error::{MeasureError, MeasureResult};
use crate::geometry::Intrinsics;

/// Axis-aligned rectangle in RGB pixel coordinates, as drawn by a user or a detector.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct RegionOfInterest {
    pub left: f64,
    pub top: f64,
    pub right: f64,
    pub bottom: f64,
}

impl RegionOfInterest {
    /// Corners may be given in any order.
    pub fn new(x0: f64, y0: f64, x1: f64, y1: f64) -> Self {
        Self { left: x0.min(x1), top: y0.min(y1), right: x0.max(x1), bottom: y0.max(y1) }
    }

    pub fn width(&self) -> f64 {
        self.right - self.left
    }

    pub fn height(&self) -> f64 {
        self.bottom - self.top
    }

    fn is_finite(&self) -> bool {
        [self.left, self.top, self.right, self.bottom].iter().all(|v| v.is_finite())
    }
}

/// Inclusive pixel rectangle on the depth grid.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash, Serialize, Deserialize)]
pub struct DepthRect {
    pub xs: u32,
    pub ys: u32,
    pub xe: u32,
    pub ye: u32,
}

impl DepthRect {
    pub fn new(xs: u32, ys: u32, xe: u32, ye: u32) -> Self {
        Self { xs: xs.min(xe), ys: ys.min(ye), xe: xs.max(xe), ye: ys.max(ye) }
    }

    pub fn width(&self) -> u32 {
        self.xe - self.xs + 1
    }

    pub fn height(&self) -> u32 {
        self.ye - self.ys + 1
    }

    pub fn area(&self) -> usize {
        self.width() as usize * self.height() as usize
    }

    /// Distance between the outermost columns/rows.
    pub fn span(&self) -> (u32, u32) {
        (self.xe - self.xs, self.ye - self.ys)
    }

    #[inline]
    pub fn contains(&self, x: u32, y: u32) -> bool {
        x >= self.xs && x <= self.xe && y >= self.ys && y <= self.ye
    }

    /// Grown by `pad` on every side, clamped to a `width` x `height` grid.
    pub fn padded(&self, pad: u32, width: u32, height: u32) -> Self {
        Self {
            xs: self.xs.saturating_sub(pad),
            ys: self.ys.saturating_sub(pad),
            xe: (self.xe + pad).min(width - 1),
            ye: (self.ye + pad).min(height - 1),
        }
    }

    /// Row-major pixel coordinates.
    pub fn pixels(&self) -> impl Iterator<Item = (u32, u32)> {
        let r = *self;
        (r.ys..=r.ye).flat_map(move |y| (r.xs..=r.xe).map(move |x| (x, y)))
    }

    /// Border of the padded rectangle, excluding this rectangle's interior.
    pub fn ring(&self, pad: u32, width: u32, height: u32) -> impl Iterator<Item = (u32, u32)> {
        let inner = *self;
        self.padded(pad, width, height).pixels().filter(move |&(x, y)| !inner.contains(x, y))
    }
}

/// Static alignment between the RGB camera and the depth sensor.
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct RoiMapping {
    /// Visual nudge (RGB px) applied to the depth overlay; subtracted from the ROI.
    pub align_offset_px: (f64, f64),
    /// Physical lens-centre offset between the two sensors (mm).
    pub optical_offset_mm: Option<(f64, f64)>,
    /// Depth assumed for the parallax shift when the first pass has no valid samples.
    pub fallback_depth_mm: f64,
    pub min_span_px: u32,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct MappedRoi {
    pub rect: DepthRect,
    /// Rectangle before the parallax correction.
    pub first_pass: DepthRect,
    /// Median depth of the first pass, if it was needed and available.
    pub z_median_mm: Option<f64>,
    pub shift_px: (f64, f64),
}

/// Maps an RGB-space ROI onto the depth grid.
///
/// Pass one removes the alignment offset and rescales. If an optical offset is known,
/// the median depth of that first rectangle sets the parallax shift
/// `offset_mm / z_mm * f` and the rectangle is sampled again.
pub fn map_roi(
    roi: &RegionOfInterest,
    rgb_size: (u32, u32),
    depth: &DepthFrame<'_>,
    depth_k: &Intrinsics,
    mapping: &RoiMapping,
) -> MeasureResult<MappedRoi> {
    let (rgb_w, rgb_h) = rgb_size;
    if rgb_w == 0 || rgb_h == 0 {
        return Err(MeasureError::malformed(format!("rgb size {}x{}", rgb_w, rgb_h)));
    }
    if !roi.is_finite() {
        return Err(MeasureError::malformed("ROI has non-finite corners"));
    }

    let (dw, dh) = (depth.width(), depth.height());
    let sx = dw as f64 / rgb_w as f64;
    let sy = dh as f64 / rgb_h as f64;
    let (ax, ay) = mapping.align_offset_px;

    // alignment-compensated corners, kept inside the RGB frame, scaled onto the depth grid
    let left = (roi.left - ax).clamp(0.0, rgb_w as f64) * sx;
    let right = (roi.right - ax).clamp(0.0, rgb_w as f64) * sx;
    let top = (roi.top - ay).clamp(0.0, rgb_h as f64) * sy;
    let bottom = (roi.bottom - ay).clamp(0.0, rgb_h as f64) * sy;

    let place = |shift_x: f64, shift_y: f64| -> MeasureResult<DepthRect> {
        let snap = |v: f64, max: u32| (v.round().max(0.0) as u32).min(max - 1);
        let rect = DepthRect::new(
            snap(left + shift_x, dw),
            snap(top + shift_y, dh),
            snap(right + shift_x, dw),
            snap(bottom + shift_y, dh),
        );
        let (span_x, span_y) = rect.span();
        if span_x < mapping.min_span_px || span_y < mapping.min_span_px {
            return Err(MeasureError::RoiTooSmall { span_x, span_y, min_span: mapping.min_span_px });
        }
        Ok(rect)
    };

    let first_pass = place(0.0, 0.0)?;
    let Some((off_x, off_y)) = mapping.optical_offset_mm else {
        debug!(?first_pass, "roi: mapped without parallax correction");
        return Ok(MappedRoi { rect: first_pass, first_pass, z_median_mm: None, shift_px: (0.0, 0.0) });
    };

    let z_median_mm = depth.median_mm_in(&first_pass);
    let z = z_median_mm.unwrap_or(mapping.fallback_depth_mm).max(1.0);
    let shift_px = (off_x / z * depth_k.fx, off_y / z * depth_k.fy);
    let rect = place(shift_px.0, shift_px.1)?;
    debug!(?first_pass, ?rect, z_mm = z, ?shift_px, "roi: parallax-corrected");

    Ok(MappedRoi { rect, first_pass, z_median_mm, shift_px })
}
