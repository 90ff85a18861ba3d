//! One measurement call: ROI mapping, plane, segmentation, box, dimensions.

use std::fmt;

use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::depth::{depth_sanity, is_valid_sample, DepthFrame, DepthSanity};
use crate::error::{MeasureError, MeasureResult};
use crate::geometry::{Intrinsics, LensModel, Point3};
use crate::metrics::{saturation_penalty, to_physical, DimResult, DimensionPolicy};
use crate::obb::{estimate_box, Orientation};
use crate::plane::{fit_plane, FallbackReason, PlaneFit, RansacConfig};
use crate::roi::{map_roi, MappedRoi, RegionOfInterest, RoiMapping};
use crate::segment::{segment, MaskResult, SegmentConfig};

/// Externally persisted camera calibration.
#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct Calibration {
    /// RGB lens.
    pub lens: LensModel,
    /// Depth sensor lens; when absent the RGB intrinsics are rescaled to the depth grid.
    pub depth_lens: Option<LensModel>,
    pub align_offset_px: (f64, f64),
    pub optical_offset_mm: Option<(f64, f64)>,
}

impl Default for Calibration {
    fn default() -> Self {
        Self {
            lens: LensModel::Fov { hfov_deg: 70.0, vfov_deg: 60.0 },
            depth_lens: None,
            align_offset_px: (0.0, 0.0),
            optical_offset_mm: None,
        }
    }
}

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct PipelineConfig {
    /// Width of the background ring around the ROI (depth px).
    pub ring_pad_px: u32,
    pub min_roi_samples: usize,
    pub min_roi_span_px: u32,
    /// Depth assumed for the parallax shift when the ROI has no valid samples yet.
    pub fallback_depth_mm: f64,
    /// Valid-depth fraction under which a diagnostic is attached.
    pub low_valid_frac: f64,
    pub ransac: RansacConfig,
    pub segment: SegmentConfig,
    pub dims: DimensionPolicy,
}

impl Default for PipelineConfig {
    fn default() -> Self {
        Self {
            ring_pad_px: 6,
            min_roi_samples: 40,
            min_roi_span_px: 2,
            fallback_depth_mm: 600.0,
            low_valid_frac: 0.60,
            ransac: RansacConfig::default(),
            segment: SegmentConfig::default(),
            dims: DimensionPolicy::default(),
        }
    }
}

/// Everything one call needs; nothing is retained between calls.
#[derive(Debug, Clone, Copy)]
pub struct MeasureRequest<'a> {
    pub depth: DepthFrame<'a>,
    /// Size of the RGB frame the ROI was drawn on.
    pub rgb_size: (u32, u32),
    pub roi: RegionOfInterest,
    pub calibration: Calibration,
}

/// Degraded-but-usable conditions folded into a result.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum Diagnostic {
    PlaneFallback { reason: FallbackReason },
    HeightBelowEvidence { height_mm: f64, min_mm: f64 },
    LowValidDepth { valid_frac: f64 },
    DepthNearRangeLimits { near_limit_frac: f64 },
    DefaultDepthRange { min_mm: f64, max_mm: f64 },
}

impl fmt::Display for Diagnostic {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            Diagnostic::PlaneFallback { reason: FallbackReason::TooFewRingPoints { found, required } } => {
                write!(f, "background ring has {} points (< {}); assumed a flat table", found, required)
            }
            Diagnostic::PlaneFallback { reason: FallbackReason::Degenerate } => {
                write!(f, "background samples are collinear; assumed a flat table")
            }
            Diagnostic::HeightBelowEvidence { height_mm, min_mm } => {
                write!(f, "height gap {:.1} mm is below {:.1} mm; height not reported", height_mm, min_mm)
            }
            Diagnostic::LowValidDepth { valid_frac } => {
                write!(f, "only {:.0}% of the ROI has valid depth; move closer", valid_frac * 100.0)
            }
            Diagnostic::DepthNearRangeLimits { near_limit_frac } => {
                write!(f, "{:.0}% of the ROI depth is at the sensor range limits; avoid glare", near_limit_frac * 100.0)
            }
            Diagnostic::DefaultDepthRange { min_mm, max_mm } => {
                write!(f, "no depth calibration; using {:.0}-{:.0} mm working range", min_mm, max_mm)
            }
        }
    }
}

#[derive(Debug, Clone, Serialize)]
pub struct Measurement {
    pub dims: DimResult,
    pub mask: MaskResult,
    pub orientation: Orientation,
    pub plane_fit: PlaneFit,
    pub mapped: MappedRoi,
    pub rgb_intrinsics: Intrinsics,
    pub depth_intrinsics: Intrinsics,
    pub z_median_mm: f64,
    pub sanity: DepthSanity,
    pub notes: Vec<Diagnostic>,
}

/// Intrinsics of the RGB frame and of the depth grid, computed once per call.
pub fn resolve_intrinsics(
    calibration: &Calibration,
    rgb_size: (u32, u32),
    depth_size: (u32, u32),
) -> MeasureResult<(Intrinsics, Intrinsics)> {
    let rgb = calibration.lens.intrinsics(rgb_size.0, rgb_size.1)?;
    let depth = match &calibration.depth_lens {
        Some(lens) => lens.intrinsics(depth_size.0, depth_size.1)?,
        None => rgb.rescaled(rgb_size, depth_size),
    };
    Ok((rgb, depth))
}

/// Runs the full pipeline. Pure: the depth buffer is only read, and identical inputs give
/// identical results.
pub fn measure(req: &MeasureRequest<'_>, cfg: &PipelineConfig, cancel: &CancelToken) -> MeasureResult<Measurement> {
    let frame = &req.depth;
    let (dw, dh) = (frame.width(), frame.height());
    let (rgb_k, depth_k) = resolve_intrinsics(&req.calibration, req.rgb_size, (dw, dh))?;
    let mut notes = Vec::new();

    if frame.uses_default_range() {
        let s = frame.scale();
        notes.push(Diagnostic::DefaultDepthRange { min_mm: s.min_mm, max_mm: s.max_mm });
    }

    let mapping = RoiMapping {
        align_offset_px: req.calibration.align_offset_px,
        optical_offset_mm: req.calibration.optical_offset_mm,
        fallback_depth_mm: cfg.fallback_depth_mm,
        min_span_px: cfg.min_roi_span_px,
    };
    let mapped = map_roi(&req.roi, req.rgb_size, frame, &depth_k, &mapping)?;
    let rect = mapped.rect;

    let sanity = depth_sanity(frame, &rect, cfg.ring_pad_px);
    let found = rect.pixels().filter(|&(x, y)| is_valid_sample(frame.sample(x, y))).count();
    if found < cfg.min_roi_samples {
        return Err(MeasureError::InsufficientRoiSamples { found, required: cfg.min_roi_samples });
    }
    debug!(?rect, valid_frac = sanity.valid_frac, gap_mm = sanity.gap_mm, "pipeline: roi sampled");

    let ring: Vec<Point3> = rect
        .ring(cfg.ring_pad_px, dw, dh)
        .filter_map(|(x, y)| frame.mm_at(x, y).map(|z| depth_k.back_project(x as f64, y as f64, z)))
        .collect();
    debug!(ring_points = ring.len(), "pipeline: ring collected");
    let plane_fit = fit_plane(&ring, &cfg.ransac, cancel)?;
    if let Some(reason) = plane_fit.fallback_reason() {
        notes.push(Diagnostic::PlaneFallback { reason });
    }

    let mask = segment(frame, &rect, plane_fit.plane(), &depth_k, &cfg.segment, cancel)?;
    let orientation = estimate_box(frame, &mask, &depth_k, cancel)?;
    let z_median_mm = orientation.reference_depth_mm;

    let mut dims = to_physical(
        &orientation.obb,
        z_median_mm,
        depth_k.fx,
        depth_k.fy,
        mask.valid_frac,
        orientation.height_mm,
        mask.area(),
        &cfg.dims,
    );

    if dims.height_mm.is_none() {
        notes.push(Diagnostic::HeightBelowEvidence {
            height_mm: orientation.height_mm,
            min_mm: cfg.dims.min_height_evidence_mm,
        });
    }
    if mask.valid_frac < cfg.low_valid_frac {
        notes.push(Diagnostic::LowValidDepth { valid_frac: mask.valid_frac });
    }
    if sanity.near_limit_frac > cfg.dims.saturation_knee {
        dims.confidence *= saturation_penalty(sanity.near_limit_frac, &cfg.dims);
        notes.push(Diagnostic::DepthNearRangeLimits { near_limit_frac: sanity.near_limit_frac });
    }
    for note in &notes {
        warn!(%note, "pipeline: degraded input");
    }
    debug!(
        length_mm = dims.length_mm,
        width_mm = dims.width_mm,
        height_mm = ?dims.height_mm,
        confidence = dims.confidence,
        "pipeline: done"
    );

    Ok(Measurement {
        dims,
        mask,
        orientation,
        plane_fit,
        mapped,
        rgb_intrinsics: rgb_k,
        depth_intrinsics: depth_k,
        z_median_mm,
        sanity,
        notes,
    })
}
