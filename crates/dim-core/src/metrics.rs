use serde::{Deserialize, Serialize};

use crate::obb::OrientedBox;

#[derive(Debug, Clone, Copy, PartialEq, Deserialize, Serialize)]
#[serde(default)]
pub struct ConfidenceWeights {
    pub valid_depth: f64,
    pub height_gap: f64,
    pub mask_area: f64,
}

impl Default for ConfidenceWeights {
    fn default() -> Self {
        Self { valid_depth: 0.45, height_gap: 0.35, mask_area: 0.20 }
    }
}

/// Reporting policy for dimensions, uncertainties and confidence.
#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct DimensionPolicy {
    /// Height gaps below this are indistinguishable from plane noise and reported as `None`.
    pub min_height_evidence_mm: f64,
    /// Sub-pixel localization error of an edge.
    pub sigma_px: f64,
    pub relative_sigma: f64,
    pub height_sigma_floor_mm: f64,
    pub height_relative_sigma: f64,
    pub weights: ConfidenceWeights,
    pub gap_norm_mm: f64,
    pub area_norm_px: f64,
    /// Fraction of ROI samples near the range limits above which confidence is penalised.
    pub saturation_knee: f64,
    pub saturation_penalty: f64,
}

impl Default for DimensionPolicy {
    fn default() -> Self {
        Self {
            min_height_evidence_mm: 10.0,
            sigma_px: 0.7,
            relative_sigma: 0.01,
            height_sigma_floor_mm: 3.0,
            height_relative_sigma: 0.10,
            weights: ConfidenceWeights::default(),
            gap_norm_mm: 25.0,
            area_norm_px: 8000.0,
            saturation_knee: 0.25,
            saturation_penalty: 0.5,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct DimResult {
    pub length_mm: f64,
    pub width_mm: f64,
    pub height_mm: Option<f64>,
    pub sigma_length_mm: f64,
    pub sigma_width_mm: f64,
    pub sigma_height_mm: Option<f64>,
    /// In `[0, 1]`.
    pub confidence: f64,
}

#[inline]
fn unit(v: f64) -> f64 {
    if v.is_nan() {
        0.0
    } else {
        v.clamp(0.0, 1.0)
    }
}

/// Weighted blend of valid depth, height-gap clarity and mask size; non-decreasing in each.
pub fn confidence(valid_frac: f64, gap_mm: f64, mask_area_px: usize, policy: &DimensionPolicy) -> f64 {
    let w = &policy.weights;
    let gap = unit(gap_mm / policy.gap_norm_mm.max(f64::EPSILON));
    let area = unit(mask_area_px as f64 / policy.area_norm_px.max(f64::EPSILON));
    unit(w.valid_depth.max(0.0) * unit(valid_frac) + w.height_gap.max(0.0) * gap + w.mask_area.max(0.0) * area)
}

/// Multiplier in `(0, 1]` for depth pinned at the sensor's range limits.
pub fn saturation_penalty(near_limit_frac: f64, policy: &DimensionPolicy) -> f64 {
    let excess = unit(near_limit_frac) - policy.saturation_knee;
    if excess <= 0.0 {
        return 1.0;
    }
    unit(1.0 - policy.saturation_penalty * excess)
}

/// Converts box extents to millimetres at `z_median_mm` and attaches uncertainty and confidence.
#[allow(clippy::too_many_arguments)]
pub fn to_physical(
    obb: &OrientedBox,
    z_median_mm: f64,
    fx: f64,
    fy: f64,
    valid_frac: f64,
    height_mm: f64,
    mask_area_px: usize,
    policy: &DimensionPolicy,
) -> DimResult {
    let mm_per_px_x = z_median_mm / fx;
    let mm_per_px_y = z_median_mm / fy;
    let length_mm = obb.w_px * mm_per_px_x;
    let width_mm = obb.h_px * mm_per_px_y;

    let sigma = |value: f64, mm_per_px: f64| {
        ((policy.sigma_px * mm_per_px).powi(2) + (policy.relative_sigma * value).powi(2)).sqrt()
    };

    let has_height = height_mm >= policy.min_height_evidence_mm;
    let height = has_height.then_some(height_mm);
    let sigma_height =
        height.map(|h| policy.height_sigma_floor_mm.max(policy.height_relative_sigma * h));

    DimResult {
        length_mm,
        width_mm,
        height_mm: height,
        sigma_length_mm: sigma(length_mm, mm_per_px_x),
        sigma_width_mm: sigma(width_mm, mm_per_px_y),
        sigma_height_mm: sigma_height,
        confidence: confidence(valid_frac, height_mm, mask_area_px, policy),
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn obb(w: f64, h: f64) -> OrientedBox {
        OrientedBox { center: (0.0, 0.0), w_px: w, h_px: h, angle_deg: 0.0 }
    }

    #[test]
    fn pinhole_scale_and_sigmas() {
        let p = DimensionPolicy::default();
        let d = to_physical(&obb(40.0, 20.0), 1000.0, 500.0, 250.0, 1.0, 120.0, 800, &p);
        assert!((d.length_mm - 80.0).abs() < 1e-9);
        assert!((d.width_mm - 80.0).abs() < 1e-9);
        let expect_l = ((0.7f64 * 2.0).powi(2) + 0.8f64.powi(2)).sqrt();
        let expect_w = ((0.7f64 * 4.0).powi(2) + 0.8f64.powi(2)).sqrt();
        assert!((d.sigma_length_mm - expect_l).abs() < 1e-12);
        assert!((d.sigma_width_mm - expect_w).abs() < 1e-12);
        assert_eq!(d.height_mm, Some(120.0));
        assert!((d.sigma_height_mm.unwrap() - 12.0).abs() < 1e-9);
    }

    #[test]
    fn weak_height_is_not_reported() {
        let p = DimensionPolicy::default();
        let d = to_physical(&obb(10.0, 10.0), 800.0, 100.0, 100.0, 1.0, 9.9, 100, &p);
        assert_eq!(d.height_mm, None);
        assert_eq!(d.sigma_height_mm, None);
        let d = to_physical(&obb(10.0, 10.0), 800.0, 100.0, 100.0, 1.0, 12.0, 100, &p);
        // floor dominates for low boxes
        assert_eq!(d.sigma_height_mm, Some(3.0));
    }

    #[test]
    fn confidence_is_monotonic_and_bounded() {
        let p = DimensionPolicy::default();
        let mut prev = -1.0;
        for i in 0..=20 {
            let c = confidence(i as f64 / 20.0, 12.0, 3000, &p);
            assert!(c >= prev && (0.0..=1.0).contains(&c));
            prev = c;
        }
        let mut prev = -1.0;
        for gap in [-5.0, 0.0, 5.0, 12.5, 25.0, 40.0, 1e6] {
            let c = confidence(0.8, gap, 3000, &p);
            assert!(c >= prev && (0.0..=1.0).contains(&c));
            prev = c;
        }
        assert!((confidence(1.0, 1000.0, 100_000, &p) - 1.0).abs() < 1e-12);
        assert_eq!(confidence(f64::NAN, 0.0, 0, &p), 0.0);
    }

    #[test]
    fn saturation_only_bites_past_the_knee() {
        let p = DimensionPolicy::default();
        assert_eq!(saturation_penalty(0.0, &p), 1.0);
        assert_eq!(saturation_penalty(0.25, &p), 1.0);
        assert!((saturation_penalty(0.45, &p) - 0.9).abs() < 1e-12);
        assert!(saturation_penalty(1.0, &p) < saturation_penalty(0.5, &p));
    }
}
