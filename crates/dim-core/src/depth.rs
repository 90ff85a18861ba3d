use serde::{Deserialize, Serialize};

use crate::error::{MeasureError, MeasureResult};
use crate::roi::DepthRect;
use crate::segment::MaskResult;

/// Working range of the ToF module (mm), used when a frame arrives with the
/// normalized 0..255 scale instead of real calibration.
pub const DEFAULT_WORKING_RANGE_MM: (f64, f64) = (200.0, 2500.0);

/// Samples this close (in counts) to 0 or 255 are treated as sitting on the range limits.
pub const NEAR_LIMIT_COUNTS: u8 = 2;

/// 0 and 255 are reserved by the sensor for "no return" / "saturated".
#[inline]
pub fn is_valid_sample(u: u8) -> bool {
    u != 0 && u != 255
}

/// Linear byte -> millimetre mapping for an explicit `[scale_min, scale_max]`.
///
/// The trivial `[0, 255]` range means "no calibration known" and is replaced by
/// [`DEFAULT_WORKING_RANGE_MM`]. Callers filter 0/255 before converting.
pub fn mm_for_sample(u: u8, scale_min: f64, scale_max: f64) -> f64 {
    DepthScale::new(scale_min, scale_max).resolved().mm(u)
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthScale {
    pub min_mm: f64,
    pub max_mm: f64,
}

impl Default for DepthScale {
    fn default() -> Self {
        Self { min_mm: 0.0, max_mm: 255.0 }
    }
}

impl DepthScale {
    pub fn new(min_mm: f64, max_mm: f64) -> Self {
        Self { min_mm, max_mm }
    }

    pub fn is_uncalibrated(&self) -> bool {
        self.min_mm == 0.0 && self.max_mm == 255.0
    }

    /// The range actually used for conversion.
    pub fn resolved(self) -> Self {
        if self.is_uncalibrated() {
            let (min_mm, max_mm) = DEFAULT_WORKING_RANGE_MM;
            Self { min_mm, max_mm }
        } else {
            self
        }
    }

    #[inline]
    pub fn mm(&self, u: u8) -> f64 {
        let span = (self.max_mm - self.min_mm).max(1.0);
        self.min_mm + (u as f64 / 255.0) * span
    }
}

/// Borrowed 8-bit depth grid. The pipeline never writes through it; denoising
/// works on a private copy wrapped in a second `DepthFrame`.
#[derive(Debug, Clone, Copy)]
pub struct DepthFrame<'a> {
    width: u32,
    height: u32,
    data: &'a [u8],
    scale: DepthScale,
    raw_scale: DepthScale,
}

impl<'a> DepthFrame<'a> {
    /// `scale` is the raw metadata range; the default working range is substituted here.
    pub fn new(width: u32, height: u32, data: &'a [u8], scale: DepthScale) -> MeasureResult<Self> {
        if width == 0 || height == 0 {
            return Err(MeasureError::NoDepthGrid { width, height });
        }
        let expected = width as usize * height as usize;
        if data.len() != expected {
            return Err(MeasureError::malformed(format!(
                "depth buffer is {} bytes, expected {}x{}={}",
                data.len(),
                width,
                height,
                expected
            )));
        }
        if !scale.min_mm.is_finite() || !scale.max_mm.is_finite() || scale.max_mm <= scale.min_mm {
            return Err(MeasureError::malformed(format!(
                "depth scale [{}, {}] is not an increasing range",
                scale.min_mm, scale.max_mm
            )));
        }
        Ok(Self { width, height, data, scale: scale.resolved(), raw_scale: scale })
    }

    /// Same geometry and calibration over another buffer (used for the denoised copy).
    pub fn with_data<'b>(&self, data: &'b [u8]) -> MeasureResult<DepthFrame<'b>> {
        if data.len() != self.data.len() {
            return Err(MeasureError::malformed("working copy size differs from frame"));
        }
        Ok(DepthFrame {
            width: self.width,
            height: self.height,
            data,
            scale: self.scale,
            raw_scale: self.raw_scale,
        })
    }

    pub fn width(&self) -> u32 {
        self.width
    }

    pub fn height(&self) -> u32 {
        self.height
    }

    pub fn data(&self) -> &'a [u8] {
        self.data
    }

    /// Range used for conversion (after default substitution).
    pub fn scale(&self) -> DepthScale {
        self.scale
    }

    /// Range as supplied with the frame.
    pub fn raw_scale(&self) -> DepthScale {
        self.raw_scale
    }

    pub fn uses_default_range(&self) -> bool {
        self.raw_scale.is_uncalibrated()
    }

    #[inline]
    pub fn index(&self, x: u32, y: u32) -> usize {
        y as usize * self.width as usize + x as usize
    }

    #[inline]
    pub fn sample(&self, x: u32, y: u32) -> u8 {
        self.data[self.index(x, y)]
    }

    /// Calibrated depth, or `None` for reserved samples.
    #[inline]
    pub fn mm_at(&self, x: u32, y: u32) -> Option<f64> {
        let u = self.sample(x, y);
        is_valid_sample(u).then(|| self.scale.mm(u))
    }

    /// Median calibrated depth of the valid samples inside `rect`.
    pub fn median_mm_in(&self, rect: &DepthRect) -> Option<f64> {
        let mut hist = ByteHistogram::default();
        for (x, y) in rect.pixels() {
            hist.push(self.sample(x, y));
        }
        hist.median().map(|u| self.scale.mm(u))
    }
}

/// Median calibrated depth over the foreground pixels of `mask`.
pub fn median_depth_mm(frame: &DepthFrame<'_>, mask: &MaskResult) -> Option<f64> {
    let mut hist = ByteHistogram::default();
    for (x, y) in mask.foreground() {
        hist.push(frame.sample(x, y));
    }
    hist.median().map(|u| frame.scale().mm(u))
}

/// Counting histogram over valid 8-bit samples; gives the upper median without sorting.
#[derive(Debug, Clone)]
pub(crate) struct ByteHistogram {
    bins: [u32; 256],
    count: usize,
}

impl Default for ByteHistogram {
    fn default() -> Self {
        Self { bins: [0; 256], count: 0 }
    }
}

impl ByteHistogram {
    #[inline]
    pub(crate) fn push(&mut self, u: u8) {
        if is_valid_sample(u) {
            self.bins[u as usize] += 1;
            self.count += 1;
        }
    }

    pub(crate) fn count(&self) -> usize {
        self.count
    }

    pub(crate) fn median(&self) -> Option<u8> {
        if self.count == 0 {
            return None;
        }
        let target = self.count / 2;
        let mut seen = 0usize;
        for (u, &n) in self.bins.iter().enumerate() {
            seen += n as usize;
            if seen > target {
                return Some(u as u8);
            }
        }
        None
    }
}

/// Quick look at depth quality around an ROI, computed before any model fitting.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DepthSanity {
    pub valid_frac: f64,
    /// Fraction of ROI samples at (or within [`NEAR_LIMIT_COUNTS`] of) either end of the 8-bit range.
    pub near_limit_frac: f64,
    /// Ring median minus ROI median; positive when the ROI is closer than its surroundings.
    pub gap_mm: f64,
}

pub fn depth_sanity(frame: &DepthFrame<'_>, rect: &DepthRect, ring_pad: u32) -> DepthSanity {
    let mut inside = ByteHistogram::default();
    let mut near_limit = 0usize;
    let total = rect.area();
    for (x, y) in rect.pixels() {
        let u = frame.sample(x, y);
        if u <= NEAR_LIMIT_COUNTS || u >= 255 - NEAR_LIMIT_COUNTS {
            near_limit += 1;
        }
        inside.push(u);
    }

    let mut ring = ByteHistogram::default();
    for (x, y) in rect.ring(ring_pad, frame.width(), frame.height()) {
        ring.push(frame.sample(x, y));
    }

    let valid_frac = if total == 0 { 0.0 } else { inside.count() as f64 / total as f64 };
    let near_limit_frac = if total == 0 { 0.0 } else { near_limit as f64 / total as f64 };
    let gap_mm = match (inside.median(), ring.median()) {
        (Some(i), Some(r)) => frame.scale().mm(r) - frame.scale().mm(i),
        _ => 0.0,
    };
    DepthSanity { valid_frac, near_limit_frac, gap_mm }
}
