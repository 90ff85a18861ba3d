//! Supporting-plane estimation from the ring of background pixels around the ROI.

use rand::rngs::StdRng;
use rand::{Rng, SeedableRng};
use serde::{Deserialize, Serialize};
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{MeasureError, MeasureResult};
use crate::geometry::Point3;

/// Cross products shorter than this (mm^2) come from (nearly) collinear samples.
const DEGENERATE_NORMAL_LEN: f64 = 1e-6;

/// The flat fallback still needs a median to stand on.
pub const MIN_FALLBACK_POINTS: usize = 3;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct RansacConfig {
    pub iterations: usize,
    pub inlier_threshold_mm: f64,
    /// Below this many ring points RANSAC is skipped in favour of the flat plane.
    pub min_ring_points: usize,
    pub seed: u64,
}

impl Default for RansacConfig {
    fn default() -> Self {
        Self { iterations: 150, inlier_threshold_mm: 6.0, min_ring_points: 50, seed: 1234 }
    }
}

/// `normal . P + d = 0`, with `|normal| = 1` and the camera on the positive side.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Plane {
    pub normal: Point3,
    pub d: f64,
    pub inlier_count: usize,
    pub trial_count: usize,
    pub inlier_ratio: f64,
}

impl Plane {
    /// Plane through three points, or `None` if they are collinear.
    pub fn from_points(a: Point3, b: Point3, c: Point3) -> Option<Self> {
        let normal = (b - a).cross(c - a);
        if normal.norm() < DEGENERATE_NORMAL_LEN {
            return None;
        }
        let normal = normal.normalized(DEGENERATE_NORMAL_LEN)?;
        Some(Self::oriented(normal, -normal.dot(a)))
    }

    /// `Z = z_mm`, facing the camera.
    pub fn flat(z_mm: f64) -> Self {
        Self::oriented(Point3::new(0.0, 0.0, -1.0), z_mm)
    }

    fn oriented(normal: Point3, d: f64) -> Self {
        let (normal, d) = if d < 0.0 { (-normal, -d) } else { (normal, d) };
        Self { normal, d, inlier_count: 0, trial_count: 0, inlier_ratio: 0.0 }
    }

    /// Positive toward the camera.
    #[inline]
    pub fn signed_distance(&self, p: Point3) -> f64 {
        self.normal.dot(p) + self.d
    }

    /// Foot of the perpendicular from `p`.
    #[inline]
    pub fn project(&self, p: Point3) -> Point3 {
        p - self.normal * self.signed_distance(p)
    }

    fn count_inliers(&self, points: &[Point3], threshold_mm: f64) -> usize {
        points.iter().filter(|&&p| self.signed_distance(p).abs() <= threshold_mm).count()
    }

    fn with_support(mut self, inliers: usize, trials: usize, total: usize) -> Self {
        self.inlier_count = inliers;
        self.trial_count = trials;
        self.inlier_ratio = if total == 0 { 0.0 } else { inliers as f64 / total as f64 };
        self
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Serialize, Deserialize)]
pub enum FallbackReason {
    TooFewRingPoints { found: usize, required: usize },
    /// Every RANSAC sample was collinear.
    Degenerate,
}

/// Outcome of [`fit_plane`]; the fallback arm keeps the reason visible to callers.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub enum PlaneFit {
    Ransac(Plane),
    Fallback { plane: Plane, reason: FallbackReason },
}

impl PlaneFit {
    pub fn plane(&self) -> &Plane {
        match self {
            PlaneFit::Ransac(p) => p,
            PlaneFit::Fallback { plane, .. } => plane,
        }
    }

    pub fn fallback_reason(&self) -> Option<FallbackReason> {
        match self {
            PlaneFit::Ransac(_) => None,
            PlaneFit::Fallback { reason, .. } => Some(*reason),
        }
    }
}

/// RANSAC over ring points with a seeded generator, falling back to `Z = median(ring Z)`.
///
/// Only an (almost) empty ring is fatal.
pub fn fit_plane(points: &[Point3], cfg: &RansacConfig, cancel: &CancelToken) -> MeasureResult<PlaneFit> {
    let n = points.len();
    if n < MIN_FALLBACK_POINTS {
        return Err(MeasureError::PlaneFitUnavailable { ring_points: n });
    }

    let required = cfg.min_ring_points.max(3);
    if n < required {
        warn!(ring_points = n, required, "plane: ring too small for RANSAC, using flat plane");
        return Ok(flat_fallback(points, cfg, FallbackReason::TooFewRingPoints { found: n, required }));
    }

    let mut rng = StdRng::seed_from_u64(cfg.seed);
    let mut best: Option<(Plane, usize)> = None;

    for iter in 0..cfg.iterations {
        cancel.checkpoint(iter)?;

        let i0 = rng.gen_range(0..n);
        let mut i1 = rng.gen_range(0..n);
        while i1 == i0 {
            i1 = rng.gen_range(0..n);
        }
        let mut i2 = rng.gen_range(0..n);
        while i2 == i0 || i2 == i1 {
            i2 = rng.gen_range(0..n);
        }

        let Some(candidate) = Plane::from_points(points[i0], points[i1], points[i2]) else {
            continue;
        };
        let inliers = candidate.count_inliers(points, cfg.inlier_threshold_mm);
        if best.map_or(true, |(_, b)| inliers > b) {
            best = Some((candidate, inliers));
        }
    }

    match best {
        Some((plane, inliers)) => {
            let plane = plane.with_support(inliers, cfg.iterations, n);
            debug!(
                inliers,
                ring_points = n,
                ratio = plane.inlier_ratio,
                nx = plane.normal.x,
                ny = plane.normal.y,
                nz = plane.normal.z,
                d = plane.d,
                "plane: ransac fit"
            );
            Ok(PlaneFit::Ransac(plane))
        }
        None => {
            warn!(ring_points = n, "plane: all samples degenerate, using flat plane");
            Ok(flat_fallback(points, cfg, FallbackReason::Degenerate))
        }
    }
}

fn flat_fallback(points: &[Point3], cfg: &RansacConfig, reason: FallbackReason) -> PlaneFit {
    let mut zs: Vec<f64> = points.iter().map(|p| p.z).collect();
    zs.sort_by(f64::total_cmp);
    let z_med = zs[zs.len() / 2];
    let plane = Plane::flat(z_med);
    let inliers = plane.count_inliers(points, cfg.inlier_threshold_mm);
    PlaneFit::Fallback { plane: plane.with_support(inliers, 0, points.len()), reason }
}
