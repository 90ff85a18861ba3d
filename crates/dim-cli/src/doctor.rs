use anyhow::Result;
use tracing::warn;

use dim_core::{DepthScale, LensModel, PipelineConfig};

pub fn check_lens(name: &str, lens: &LensModel) -> Result<()> {
    match *lens {
        LensModel::Fov { hfov_deg, vfov_deg } => {
            anyhow::ensure!(hfov_deg > 10.0 && hfov_deg < 170.0, "{}.hfov_deg out of range", name);
            anyhow::ensure!(vfov_deg > 10.0 && vfov_deg < 170.0, "{}.vfov_deg out of range", name);
        }
        LensModel::Explicit { fx, fy, cx, cy } => {
            anyhow::ensure!(fx > 0.0 && fy > 0.0, "{}.fx/fy must be positive", name);
            anyhow::ensure!(cx >= 0.0 && cy >= 0.0, "{}.cx/cy must be inside the image", name);
            if (fx / fy - 1.0).abs() > 0.2 {
                warn!("{}: fx and fy differ by more than 20%", name);
            }
        }
    }
    Ok(())
}

pub fn check_depth_range(scale: &DepthScale) -> Result<()> {
    anyhow::ensure!(scale.min_mm.is_finite() && scale.max_mm.is_finite(), "depth scale not finite");
    anyhow::ensure!(scale.max_mm > scale.min_mm, "depth.scale_max must exceed depth.scale_min");
    if scale.is_uncalibrated() {
        let r = scale.resolved();
        warn!("depth: no calibration cached, default {}-{} mm range will be used", r.min_mm, r.max_mm);
    }
    Ok(())
}

pub fn check_pipeline(p: &PipelineConfig) -> Result<()> {
    anyhow::ensure!(p.ring_pad_px >= 1, "pipeline.ring_pad_px must be >= 1");
    anyhow::ensure!(p.min_roi_samples >= 3, "pipeline.min_roi_samples too low");
    anyhow::ensure!(p.fallback_depth_mm > 0.0, "pipeline.fallback_depth_mm must be positive");
    anyhow::ensure!((0.0..=1.0).contains(&p.low_valid_frac), "pipeline.low_valid_frac should be 0..1");

    anyhow::ensure!(p.ransac.iterations >= 1, "pipeline.ransac.iterations must be >= 1");
    anyhow::ensure!(p.ransac.inlier_threshold_mm > 0.0, "pipeline.ransac.inlier_threshold_mm must be positive");

    anyhow::ensure!(p.segment.height_threshold_mm > 0.0, "pipeline.segment.height_threshold_mm must be positive");
    anyhow::ensure!(
        (1..=9).contains(&p.segment.min_median_neighbors),
        "pipeline.segment.min_median_neighbors should be 1..9"
    );
    if p.segment.height_threshold_mm <= p.ransac.inlier_threshold_mm {
        warn!("segment: foreground threshold does not clear plane-fit noise");
    }

    let d = &p.dims;
    anyhow::ensure!(d.min_height_evidence_mm >= 0.0, "pipeline.dims.min_height_evidence_mm must be >= 0");
    anyhow::ensure!(d.gap_norm_mm > 0.0 && d.area_norm_px > 0.0, "pipeline.dims normalizers must be positive");
    anyhow::ensure!((0.0..=1.0).contains(&d.saturation_knee), "pipeline.dims.saturation_knee should be 0..1");
    let w = &d.weights;
    anyhow::ensure!(
        w.valid_depth >= 0.0 && w.height_gap >= 0.0 && w.mask_area >= 0.0,
        "pipeline.dims.weights must be non-negative"
    );
    let sum = w.valid_depth + w.height_gap + w.mask_area;
    anyhow::ensure!(sum > 0.0, "pipeline.dims.weights are all zero");
    if (sum - 1.0).abs() > 1e-6 {
        warn!("dims: confidence weights sum to {:.3}, confidence will saturate early or never reach 1", sum);
    }
    Ok(())
}
