use dim_core::plane::fit_plane;
use dim_core::{
    measure, Calibration, CancelToken, DepthFrame, DepthRect, DepthScale, Diagnostic, LensModel, MeasureError,
    MeasureRequest, Measurement, MeasureResult, PipelineConfig, RegionOfInterest,
};

const W: u32 = 100;

fn paint(buf: &mut [u8], xs: std::ops::Range<u32>, ys: std::ops::Range<u32>, v: u8) {
    for y in ys {
        for x in xs.clone() {
            buf[(y * W + x) as usize] = v;
        }
    }
}

fn run(buf: &[u8], scale: DepthScale, roi: (f64, f64, f64, f64)) -> MeasureResult<Measurement> {
    run_with(buf, scale, roi, &CancelToken::new())
}

fn run_with(
    buf: &[u8],
    scale: DepthScale,
    roi: (f64, f64, f64, f64),
    cancel: &CancelToken,
) -> MeasureResult<Measurement> {
    let req = MeasureRequest {
        depth: DepthFrame::new(W, W, buf, scale)?,
        rgb_size: (W, W),
        roi: RegionOfInterest::new(roi.0, roi.1, roi.2, roi.3),
        calibration: Calibration {
            lens: LensModel::Fov { hfov_deg: 70.0, vfov_deg: 60.0 },
            ..Default::default()
        },
    };
    measure(&req, &PipelineConfig::default(), cancel)
}

fn block_scene() -> Vec<u8> {
    let mut buf = vec![100u8; (W * W) as usize];
    paint(&mut buf, 40..60, 40..60, 60);
    buf
}

#[test]
fn block_on_table_end_to_end() {
    let m = run(&block_scene(), DepthScale::default(), (40.0, 40.0, 60.0, 60.0)).unwrap();
    let scale = DepthScale::default().resolved();
    let k = m.depth_intrinsics;

    let expect_len = 20.0 * m.z_median_mm / k.fx;
    let expect_wid = 20.0 * m.z_median_mm / k.fy;
    assert!((m.dims.length_mm - expect_len).abs() <= 0.2 * expect_len, "{:?}", m.dims);
    assert!((m.dims.width_mm - expect_wid).abs() <= 0.2 * expect_wid, "{:?}", m.dims);
    assert!(m.dims.confidence > 0.5 && m.dims.confidence <= 1.0);

    let gap = scale.mm(100) - scale.mm(60);
    let height = m.dims.height_mm.unwrap();
    assert!((height - gap).abs() <= 0.15 * gap, "height {} gap {}", height, gap);

    assert!((m.z_median_mm - scale.mm(60)).abs() < 1e-9);
    assert_eq!(m.mapped.rect, DepthRect::new(40, 40, 60, 60));
    assert!(m.plane_fit.fallback_reason().is_none());
    assert!(m.plane_fit.plane().inlier_ratio >= 0.95);
    assert!(m.notes.contains(&Diagnostic::DefaultDepthRange { min_mm: 200.0, max_mm: 2500.0 }));
}

#[test]
fn identical_inputs_give_identical_results() {
    let mut buf = block_scene();
    // some speckle so the median and RANSAC both have work to do
    for i in (0..buf.len()).step_by(37) {
        buf[i] = buf[i].saturating_add(7);
    }
    let before = buf.clone();
    let a = run(&buf, DepthScale::default(), (38.0, 38.0, 62.0, 62.0)).unwrap();
    let b = run(&buf, DepthScale::default(), (38.0, 38.0, 62.0, 62.0)).unwrap();
    assert_eq!(a.dims, b.dims);
    assert_eq!(a.mask, b.mask);
    assert_eq!(a.plane_fit, b.plane_fit);
    assert_eq!(buf, before);
}

#[test]
fn flat_scene_fits_plane_and_finds_nothing() {
    let buf = vec![100u8; (W * W) as usize];
    let frame = DepthFrame::new(W, W, &buf, DepthScale::default()).unwrap();
    let k = dim_core::Intrinsics::from_fov(W, W, 70.0, 60.0).unwrap();
    let rect = DepthRect::new(40, 40, 60, 60);
    let ring: Vec<_> = rect
        .ring(6, W, W)
        .filter_map(|(x, y)| frame.mm_at(x, y).map(|z| k.back_project(x as f64, y as f64, z)))
        .collect();
    let fit = fit_plane(&ring, &Default::default(), &CancelToken::new()).unwrap();
    assert!(fit.plane().inlier_ratio >= 0.95);

    let err = run(&buf, DepthScale::default(), (40.0, 40.0, 60.0, 60.0)).unwrap_err();
    assert_eq!(err, MeasureError::SegmentationFailed);
}

#[test]
fn roi_off_the_grid_is_too_small() {
    let err = run(&block_scene(), DepthScale::default(), (150.0, 150.0, 180.0, 190.0)).unwrap_err();
    assert!(matches!(err, MeasureError::RoiTooSmall { .. }), "{:?}", err);
}

#[test]
fn block_on_tilted_table() {
    // calibrated 600..1400 mm; table is Z = 1100 + 0.2 X, block sits 150 mm closer along Z
    let scale = DepthScale::new(600.0, 1400.0);
    let k = dim_core::Intrinsics::from_fov(W, W, 70.0, 60.0).unwrap();
    let (z0, g) = (1100.0, 0.2);
    let buf: Vec<u8> = (0..W * W)
        .map(|i| {
            let (x, y) = (i % W, i / W);
            let rx = (x as f64 - k.cx) / k.fx;
            let mut z = z0 / (1.0 - g * rx);
            if (35..65).contains(&x) && (42..58).contains(&y) {
                z -= 150.0;
            }
            ((z - 600.0) / 800.0 * 255.0).round() as u8
        })
        .collect();

    let m = run(&buf, scale, (30.0, 38.0, 69.0, 61.0)).unwrap();
    let obb = m.orientation.obb;
    assert!((obb.w_px - 30.0).abs() <= 2.0, "w_px {}", obb.w_px);
    assert!((obb.h_px - 16.0).abs() <= 2.0, "h_px {}", obb.h_px);

    let along_normal = 150.0 / (1.0f64 + g * g).sqrt();
    let height = m.dims.height_mm.unwrap();
    assert!((height - along_normal).abs() <= 0.15 * along_normal, "height {}", height);
    assert!(m.notes.is_empty(), "{:?}", m.notes);
}

#[test]
fn nearby_object_outside_roi_is_ignored() {
    let mut buf = vec![100u8; (W * W) as usize];
    paint(&mut buf, 45..56, 45..56, 60);
    // taller box right next to the ROI, reaching into the ring and the search pad
    paint(&mut buf, 62..81, 30..71, 40);
    let m = run(&buf, DepthScale::default(), (40.0, 40.0, 60.0, 60.0)).unwrap();
    assert!(m.mask.is_foreground(50, 50));
    assert!(!m.mask.is_foreground(63, 50));
    assert_eq!(m.mask.area(), 11 * 11 - 4);
    assert!((m.orientation.obb.w_px - 11.0).abs() < 1e-6);
}

#[test]
fn range_limit_depth_lowers_confidence() {
    let mut near = vec![100u8; (W * W) as usize];
    paint(&mut near, 40..60, 40..60, 2);
    let pinned = run(&near, DepthScale::default(), (40.0, 40.0, 60.0, 60.0)).unwrap();
    let normal = run(&block_scene(), DepthScale::default(), (40.0, 40.0, 60.0, 60.0)).unwrap();

    assert!(pinned.sanity.near_limit_frac > 0.25);
    assert!(pinned.notes.iter().any(|n| matches!(n, Diagnostic::DepthNearRangeLimits { .. })));
    assert!(pinned.dims.confidence < normal.dims.confidence);
}

#[test]
fn holes_in_depth_are_reported() {
    let mut buf = block_scene();
    for x in (40..60).step_by(2) {
        paint(&mut buf, x..x + 1, 40..60, 0);
    }
    let m = run(&buf, DepthScale::default(), (40.0, 40.0, 60.0, 60.0)).unwrap();
    assert!(m.mask.valid_frac < 0.6);
    assert!(m.notes.iter().any(|n| matches!(n, Diagnostic::LowValidDepth { .. })));
    assert!(m.dims.height_mm.is_some());
}

#[test]
fn cancelled_token_aborts() {
    let token = CancelToken::new();
    token.cancel();
    let err = run_with(&block_scene(), DepthScale::default(), (40.0, 40.0, 60.0, 60.0), &token).unwrap_err();
    assert_eq!(err, MeasureError::Cancelled);
}
