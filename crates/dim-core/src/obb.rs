//! Oriented box on the supporting plane, height above it, and a coarse pose label.

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::depth::{median_depth_mm, DepthFrame};
use crate::error::{MeasureError, MeasureResult};
use crate::geometry::{Intrinsics, Point3};
use crate::plane::Plane;
use crate::segment::MaskResult;

/// Percentile of the non-negative per-pixel heights reported as the box height.
pub const HEIGHT_PERCENTILE: f64 = 0.90;

/// Below this eigenvalue contrast the principal axes are unreliable and a rotating sweep is used.
const ISOTROPY_LIMIT: f64 = 0.05;

/// Major axes within this many degrees of an image axis are labelled [`PoseLabel::Front`].
const FRONT_TOLERANCE_DEG: f64 = 15.0;

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct OrientedBox {
    /// Box centre on the depth grid (px).
    pub center: (f64, f64),
    /// Extent along the major axis, in horizontal depth-grid pixel pitches at the reference depth.
    pub w_px: f64,
    /// Extent along the minor axis, in vertical pixel pitches.
    pub h_px: f64,
    /// Major axis angle in the plane basis, degrees in `(-90, 90]`.
    pub angle_deg: f64,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum PoseLabel {
    Front,
    Side,
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
#[serde(rename_all = "snake_case")]
pub enum Stance {
    Standing,
    Lying,
}

#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Orientation {
    pub obb: OrientedBox,
    pub pose: PoseLabel,
    pub stance: Stance,
    /// Major axis as seen on the depth image, degrees in `(-90, 90]`.
    pub image_angle_deg: f64,
    /// 90th percentile of the non-negative heights above the plane (mm).
    pub height_mm: f64,
    /// Median mask depth used to express planar extents in pixels.
    pub reference_depth_mm: f64,
    /// Planar extents in millimetres (major, minor).
    pub extents_mm: (f64, f64),
    pub point_count: usize,
}

/// Orthonormal `(e1, e2)` spanning the plane, with `e2 = n x e1`.
///
/// For a plane facing the camera `e1` follows the image x axis.
pub fn plane_basis(normal: Point3) -> (Point3, Point3) {
    let helper = if normal.y.abs() < 0.9 { Point3::new(0.0, 1.0, 0.0) } else { Point3::new(1.0, 0.0, 0.0) };
    let e1 = normal.cross(helper);
    let e1 = e1 * (1.0 / e1.norm());
    (e1, normal.cross(e1))
}

/// Linearly interpolated percentile (`p` in `[0, 1]`); `None` for an empty slice.
pub fn percentile(values: &[f64], p: f64) -> Option<f64> {
    if values.is_empty() {
        return None;
    }
    let mut v = values.to_vec();
    v.sort_by(f64::total_cmp);
    let idx = (v.len() - 1) as f64 * p.clamp(0.0, 1.0);
    let lo = idx.floor() as usize;
    let hi = idx.ceil() as usize;
    let t = idx - lo as f64;
    Some(v[lo] * (1.0 - t) + v[hi] * t)
}

/// Principal direction of 2D points: `(angle_rad, lambda_major, lambda_minor)`.
pub fn principal_axes(points: &[(f64, f64)]) -> (f64, f64, f64) {
    let n = points.len().max(1) as f64;
    let (mx, my) = points.iter().fold((0.0, 0.0), |(sx, sy), &(x, y)| (sx + x, sy + y));
    let (mx, my) = (mx / n, my / n);
    let (mut sxx, mut syy, mut sxy) = (0.0, 0.0, 0.0);
    for &(x, y) in points {
        let (dx, dy) = (x - mx, y - my);
        sxx += dx * dx;
        syy += dy * dy;
        sxy += dx * dy;
    }
    let (sxx, syy, sxy) = (sxx / n, syy / n, sxy / n);

    let theta = 0.5 * (2.0 * sxy).atan2(sxx - syy);
    let mean = 0.5 * (sxx + syy);
    let r = (0.25 * (sxx - syy).powi(2) + sxy * sxy).sqrt();
    (theta, mean + r, mean - r)
}

/// `(min_a, max_a, min_b, max_b)` along the axes rotated by `theta`.
fn extents_at(points: &[(f64, f64)], theta: f64) -> (f64, f64, f64, f64) {
    let (s, c) = theta.sin_cos();
    let mut out = (f64::INFINITY, f64::NEG_INFINITY, f64::INFINITY, f64::NEG_INFINITY);
    for &(x, y) in points {
        let a = x * c + y * s;
        let b = -x * s + y * c;
        out.0 = out.0.min(a);
        out.1 = out.1.max(a);
        out.2 = out.2.min(b);
        out.3 = out.3.max(b);
    }
    out
}

/// Smallest-area rectangle over 0..90 degrees in 1 degree steps; earliest angle wins ties.
fn min_area_angle(points: &[(f64, f64)]) -> f64 {
    let mut best = (0.0, f64::INFINITY);
    for step in 0..90 {
        let theta = (step as f64).to_radians();
        let (a0, a1, b0, b1) = extents_at(points, theta);
        let area = (a1 - a0) * (b1 - b0);
        if area < best.1 {
            best = (theta, area);
        }
    }
    best.0
}

fn wrap_half_turn(deg: f64) -> f64 {
    let mut d = deg % 180.0;
    if d <= -90.0 {
        d += 180.0;
    } else if d > 90.0 {
        d -= 180.0;
    }
    d
}

/// Fits the oriented box to the foreground of `mask` using the raw (undenoised) depth.
pub fn estimate_box(
    frame: &DepthFrame<'_>,
    mask: &MaskResult,
    k: &Intrinsics,
    cancel: &CancelToken,
) -> MeasureResult<Orientation> {
    let plane: &Plane = &mask.plane;
    let n = plane.normal;
    let (e1, e2) = plane_basis(n);

    let mut flat = Vec::with_capacity(mask.area());
    let mut heights = Vec::with_capacity(mask.area());
    let mut pix_sum = (0.0, 0.0);
    for (i, (x, y)) in mask.foreground().enumerate() {
        cancel.checkpoint(i)?;
        let Some(z) = frame.mm_at(x, y) else { continue };
        let p = k.back_project(x as f64, y as f64, z);
        let h = plane.signed_distance(p);
        let q = p - n * h;
        flat.push((q.dot(e1), q.dot(e2)));
        if h >= 0.0 {
            heights.push(h);
        }
        pix_sum = (pix_sum.0 + x as f64, pix_sum.1 + y as f64);
    }
    if flat.is_empty() {
        return Err(MeasureError::SegmentationFailed);
    }
    let z_ref = median_depth_mm(frame, mask).ok_or(MeasureError::SegmentationFailed)?;

    let (mut theta, l1, l2) = principal_axes(&flat);
    let anisotropy = if l1 + l2 > 0.0 { (l1 - l2) / (l1 + l2) } else { 0.0 };
    if anisotropy < ISOTROPY_LIMIT {
        theta = min_area_angle(&flat);
    }

    let (a0, a1, b0, b1) = extents_at(&flat, theta);

    // centre of the rectangle in the plane basis, then back onto the grid
    let (s0, c0) = theta.sin_cos();
    let (ca, cb) = (0.5 * (a0 + a1), 0.5 * (b0 + b1));
    let (u, v) = (ca * c0 - cb * s0, ca * s0 + cb * c0);
    let centre3 = n * -plane.d + e1 * u + e2 * v;
    let count = flat.len() as f64;
    let center = k.project(centre3).unwrap_or((pix_sum.0 / count, pix_sum.1 / count));

    let (mut major_mm, mut minor_mm) = (a1 - a0, b1 - b0);
    if minor_mm > major_mm {
        std::mem::swap(&mut major_mm, &mut minor_mm);
        theta += std::f64::consts::FRAC_PI_2;
    }

    // pixel pitch at the reference depth, plus one pixel footprint
    let (mm_per_px_x, mm_per_px_y) = k.mm_per_px(z_ref);
    let w_px = major_mm / mm_per_px_x + 1.0;
    let h_px = minor_mm / mm_per_px_y + 1.0;

    let (s, c) = theta.sin_cos();
    let axis3 = e1 * c + e2 * s;
    let image_angle_deg = match (k.project(centre3), k.project(centre3 + axis3 * 10.0)) {
        (Some(p0), Some(p1)) => wrap_half_turn((p1.1 - p0.1).atan2(p1.0 - p0.0).to_degrees()),
        _ => wrap_half_turn(theta.to_degrees()),
    };
    let off_axis = image_angle_deg.abs().min((90.0 - image_angle_deg.abs()).abs());
    let pose = if off_axis <= FRONT_TOLERANCE_DEG { PoseLabel::Front } else { PoseLabel::Side };

    let height_mm = percentile(&heights, HEIGHT_PERCENTILE).unwrap_or(0.0);
    let stance = if height_mm >= major_mm { Stance::Standing } else { Stance::Lying };

    let obb = OrientedBox { center, w_px, h_px, angle_deg: wrap_half_turn(theta.to_degrees()) };
    debug!(
        w_px,
        h_px,
        angle = obb.angle_deg,
        height_mm,
        z_ref,
        anisotropy,
        points = flat.len(),
        "obb: box estimated"
    );

    Ok(Orientation {
        obb,
        pose,
        stance,
        image_angle_deg,
        height_mm,
        reference_depth_mm: z_ref,
        extents_mm: (major_mm, minor_mm),
        point_count: flat.len(),
    })
}
