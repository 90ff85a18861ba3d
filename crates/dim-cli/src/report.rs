use dim_core::{DepthScale, FallbackReason, Measurement, PoseLabel, RegionOfInterest, Stance};
use dim_proto::report::{
    CameraInfo, DepthInfo, Dims, MaskInfo, MeasurementReport, PlaneInfo, PoseInfo, RoiInfo, SanityInfo,
};

/// Inputs of the call that the measurement itself does not carry.
pub struct ReportInputs {
    pub depth_size: (u32, u32),
    pub raw_scale: DepthScale,
    pub rgb_size: (u32, u32),
    pub roi: RegionOfInterest,
    pub align_offset_px: (f64, f64),
    pub optical_offset_mm: Option<(f64, f64)>,
    pub iou: Option<f64>,
}

fn fallback_text(reason: FallbackReason) -> String {
    match reason {
        FallbackReason::TooFewRingPoints { found, required } => format!("too_few_ring_points({}/{})", found, required),
        FallbackReason::Degenerate => "degenerate".to_string(),
    }
}

pub fn build_report(m: &Measurement, inputs: &ReportInputs, ts_unix_ms: i64) -> MeasurementReport {
    let resolved = inputs.raw_scale.resolved();
    let plane = m.plane_fit.plane();
    let r = m.mapped.rect;
    let k = m.rgb_intrinsics;

    MeasurementReport {
        ts_unix_ms,
        depth: DepthInfo {
            width: inputs.depth_size.0,
            height: inputs.depth_size.1,
            scale_min_mm: inputs.raw_scale.min_mm,
            scale_max_mm: inputs.raw_scale.max_mm,
            resolved_min_mm: resolved.min_mm,
            resolved_max_mm: resolved.max_mm,
        },
        camera: CameraInfo {
            rgb_width: inputs.rgb_size.0,
            rgb_height: inputs.rgb_size.1,
            fx: k.fx,
            fy: k.fy,
            cx: k.cx,
            cy: k.cy,
            depth_fx: m.depth_intrinsics.fx,
            depth_fy: m.depth_intrinsics.fy,
            align_offset_px: [inputs.align_offset_px.0, inputs.align_offset_px.1],
            optical_offset_mm: inputs.optical_offset_mm.map(|(x, y)| [x, y]),
        },
        roi: RoiInfo {
            rgb: [inputs.roi.left, inputs.roi.top, inputs.roi.right, inputs.roi.bottom],
            depth: [r.xs, r.ys, r.xe, r.ye],
            parallax_shift_px: [m.mapped.shift_px.0, m.mapped.shift_px.1],
        },
        plane: PlaneInfo {
            normal: [plane.normal.x, plane.normal.y, plane.normal.z],
            d: plane.d,
            inliers: plane.inlier_count,
            inlier_ratio: plane.inlier_ratio,
            fallback: m.plane_fit.fallback_reason().map(fallback_text),
        },
        mask: MaskInfo {
            area_px: m.mask.area(),
            valid_frac: m.mask.valid_frac,
            height_threshold_mm: m.mask.height_threshold_mm,
            iou: inputs.iou,
        },
        pose: PoseInfo {
            label: match m.orientation.pose {
                PoseLabel::Front => dim_proto::report::PoseLabel::Front,
                PoseLabel::Side => dim_proto::report::PoseLabel::Side,
            },
            standing: m.orientation.stance == Stance::Standing,
            angle_deg: m.orientation.image_angle_deg,
            height_gap_mm: m.orientation.height_mm,
        },
        dims: Dims {
            length_mm: m.dims.length_mm,
            width_mm: m.dims.width_mm,
            height_mm: m.dims.height_mm,
            sigma_length_mm: m.dims.sigma_length_mm,
            sigma_width_mm: m.dims.sigma_width_mm,
            sigma_height_mm: m.dims.sigma_height_mm,
            confidence: m.dims.confidence,
        },
        sanity: SanityInfo {
            roi_valid_frac: m.sanity.valid_frac,
            near_limit_frac: m.sanity.near_limit_frac,
            ring_gap_mm: m.sanity.gap_mm,
        },
        notes: m.notes.iter().map(ToString::to_string).collect(),
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use dim_core::{measure, Calibration, CancelToken, DepthFrame, MeasureRequest, PipelineConfig};

    #[test]
    fn report_mirrors_measurement() {
        let mut buf = vec![100u8; 100 * 100];
        for y in 40..60 {
            for x in 40..60 {
                buf[y * 100 + x] = 60;
            }
        }
        let raw_scale = DepthScale::default();
        let roi = RegionOfInterest::new(40.0, 40.0, 60.0, 60.0);
        let req = MeasureRequest {
            depth: DepthFrame::new(100, 100, &buf, raw_scale).unwrap(),
            rgb_size: (100, 100),
            roi,
            calibration: Calibration::default(),
        };
        let m = measure(&req, &PipelineConfig::default(), &CancelToken::new()).unwrap();
        let inputs = ReportInputs {
            depth_size: (100, 100),
            raw_scale,
            rgb_size: (100, 100),
            roi,
            align_offset_px: (0.0, 0.0),
            optical_offset_mm: None,
            iou: None,
        };
        let r = build_report(&m, &inputs, 42);
        assert_eq!(r.ts_unix_ms, 42);
        assert_eq!((r.depth.resolved_min_mm, r.depth.resolved_max_mm), (200.0, 2500.0));
        assert_eq!(r.roi.depth, [40, 40, 60, 60]);
        assert_eq!(r.dims.length_mm, m.dims.length_mm);
        assert_eq!(r.mask.area_px, 396);
        assert!(r.plane.fallback.is_none());
        assert!(r.notes.iter().any(|n| n.contains("working range")));
    }
}
