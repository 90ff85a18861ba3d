use serde::{Deserialize, Serialize};

/// One finished measurement, as written next to the captured frames.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MeasurementReport {
    pub ts_unix_ms: i64,
    pub depth: DepthInfo,
    pub camera: CameraInfo,
    pub roi: RoiInfo,
    pub plane: PlaneInfo,
    pub mask: MaskInfo,
    pub pose: PoseInfo,
    pub dims: Dims,
    pub sanity: SanityInfo,
    /// Human-readable degraded-input notes.
    #[serde(default)]
    pub notes: Vec<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct DepthInfo {
    pub width: u32,
    pub height: u32,
    /// Range as delivered with the frame.
    pub scale_min_mm: f64,
    pub scale_max_mm: f64,
    /// Range actually used for conversion.
    pub resolved_min_mm: f64,
    pub resolved_max_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct CameraInfo {
    pub rgb_width: u32,
    pub rgb_height: u32,
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
    pub depth_fx: f64,
    pub depth_fy: f64,
    pub align_offset_px: [f64; 2],
    pub optical_offset_mm: Option<[f64; 2]>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct RoiInfo {
    /// left, top, right, bottom in RGB pixels
    pub rgb: [f64; 4],
    /// xs, ys, xe, ye on the depth grid (inclusive)
    pub depth: [u32; 4],
    pub parallax_shift_px: [f64; 2],
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PlaneInfo {
    pub normal: [f64; 3],
    pub d: f64,
    pub inliers: usize,
    pub inlier_ratio: f64,
    /// Why the flat fallback was used, if it was.
    pub fallback: Option<String>,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskInfo {
    pub area_px: usize,
    pub valid_frac: f64,
    pub height_threshold_mm: f64,
    /// Against a ground-truth mask, when one was supplied.
    pub iou: Option<f64>,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum PoseLabel {
    Front,
    Side,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct PoseInfo {
    pub label: PoseLabel,
    pub standing: bool,
    pub angle_deg: f64,
    pub height_gap_mm: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct Dims {
    pub length_mm: f64,
    pub width_mm: f64,
    pub height_mm: Option<f64>,
    pub sigma_length_mm: f64,
    pub sigma_width_mm: f64,
    pub sigma_height_mm: Option<f64>,
    pub confidence: f64,
}

#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct SanityInfo {
    pub roi_valid_frac: f64,
    pub near_limit_frac: f64,
    pub ring_gap_mm: f64,
}

#[cfg(test)]
mod tests {
    use super::*;

    fn sample() -> MeasurementReport {
        MeasurementReport {
            ts_unix_ms: 1_760_000_000_000,
            depth: DepthInfo {
                width: 100,
                height: 100,
                scale_min_mm: 0.0,
                scale_max_mm: 255.0,
                resolved_min_mm: 200.0,
                resolved_max_mm: 2500.0,
            },
            camera: CameraInfo {
                rgb_width: 800,
                rgb_height: 600,
                fx: 571.25,
                fy: 519.5,
                cx: 400.0,
                cy: 300.0,
                depth_fx: 71.375,
                depth_fy: 86.5,
                align_offset_px: [0.0, 0.0],
                optical_offset_mm: None,
            },
            roi: RoiInfo { rgb: [320.0, 240.0, 480.0, 360.0], depth: [40, 40, 60, 60], parallax_shift_px: [0.0, 0.0] },
            plane: PlaneInfo { normal: [0.0, 0.0, -1.0], d: 1102.0, inliers: 648, inlier_ratio: 1.0, fallback: None },
            mask: MaskInfo { area_px: 396, valid_frac: 1.0, height_threshold_mm: 20.0, iou: Some(0.9375) },
            pose: PoseInfo { label: PoseLabel::Front, standing: true, angle_deg: 0.0, height_gap_mm: 360.75 },
            dims: Dims {
                length_mm: 207.5,
                width_mm: 171.25,
                height_mm: None,
                sigma_length_mm: 7.5,
                sigma_width_mm: 6.125,
                sigma_height_mm: None,
                confidence: 0.8125,
            },
            sanity: SanityInfo { roi_valid_frac: 1.0, near_limit_frac: 0.0, ring_gap_mm: 360.75 },
            notes: vec!["no depth calibration; using 200-2500 mm working range".into()],
        }
    }

    #[test]
    fn report_survives_json() {
        let r = sample();
        let json = serde_json::to_string(&r).unwrap();
        let back: MeasurementReport = serde_json::from_str(&json).unwrap();
        assert_eq!(back, r);
    }

    #[test]
    fn missing_height_is_null() {
        let v = serde_json::to_value(sample()).unwrap();
        assert!(v["dims"]["height_mm"].is_null());
        assert_eq!(v["pose"]["label"], "Front");
        assert_eq!(v["roi"]["depth"][2], 60);
    }
}
