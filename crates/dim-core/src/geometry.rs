use std::ops::{Add, Mul, Neg, Sub};

use serde::{Deserialize, Serialize};

use crate::error::{MeasureError, MeasureResult};

/// Camera-space point in millimetres (X right, Y down, Z forward).
#[derive(Debug, Clone, Copy, PartialEq, Default, Serialize, Deserialize)]
pub struct Point3 {
    pub x: f64,
    pub y: f64,
    pub z: f64,
}

impl Point3 {
    pub const fn new(x: f64, y: f64, z: f64) -> Self {
        Self { x, y, z }
    }

    #[inline]
    pub fn dot(self, o: Self) -> f64 {
        self.x * o.x + self.y * o.y + self.z * o.z
    }

    #[inline]
    pub fn cross(self, o: Self) -> Self {
        Self {
            x: self.y * o.z - self.z * o.y,
            y: self.z * o.x - self.x * o.z,
            z: self.x * o.y - self.y * o.x,
        }
    }

    #[inline]
    pub fn norm(self) -> f64 {
        self.dot(self).sqrt()
    }

    /// Unit vector, or `None` when the length is below `eps`.
    pub fn normalized(self, eps: f64) -> Option<Self> {
        let n = self.norm();
        (n >= eps).then(|| self * (1.0 / n))
    }
}

impl Add for Point3 {
    type Output = Self;
    fn add(self, o: Self) -> Self {
        Self::new(self.x + o.x, self.y + o.y, self.z + o.z)
    }
}

impl Sub for Point3 {
    type Output = Self;
    fn sub(self, o: Self) -> Self {
        Self::new(self.x - o.x, self.y - o.y, self.z - o.z)
    }
}

impl Mul<f64> for Point3 {
    type Output = Self;
    fn mul(self, s: f64) -> Self {
        Self::new(self.x * s, self.y * s, self.z * s)
    }
}

impl Neg for Point3 {
    type Output = Self;
    fn neg(self) -> Self {
        Self::new(-self.x, -self.y, -self.z)
    }
}

/// Pinhole intrinsics in pixel units of the grid they were derived for.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
pub struct Intrinsics {
    pub fx: f64,
    pub fy: f64,
    pub cx: f64,
    pub cy: f64,
}

impl Intrinsics {
    /// `fx = w / (2 tan(hfov/2))`, `fy = h / (2 tan(vfov/2))`, principal point at the centre.
    pub fn from_fov(width: u32, height: u32, hfov_deg: f64, vfov_deg: f64) -> MeasureResult<Self> {
        if width == 0 || height == 0 {
            return Err(MeasureError::malformed(format!("image size {}x{}", width, height)));
        }
        for (name, fov) in [("hfov", hfov_deg), ("vfov", vfov_deg)] {
            if !(fov.is_finite() && fov > 0.0 && fov < 180.0) {
                return Err(MeasureError::malformed(format!("{} {} deg outside (0, 180)", name, fov)));
            }
        }
        let fx = width as f64 / (2.0 * (hfov_deg.to_radians() / 2.0).tan());
        let fy = height as f64 / (2.0 * (vfov_deg.to_radians() / 2.0).tan());
        Ok(Self { fx, fy, cx: width as f64 / 2.0, cy: height as f64 / 2.0 })
    }

    pub fn explicit(fx: f64, fy: f64, cx: f64, cy: f64) -> MeasureResult<Self> {
        let finite = [fx, fy, cx, cy].iter().all(|v| v.is_finite());
        if !finite || fx <= 0.0 || fy <= 0.0 {
            return Err(MeasureError::malformed(format!(
                "intrinsics fx={} fy={} cx={} cy={}",
                fx, fy, cx, cy
            )));
        }
        Ok(Self { fx, fy, cx, cy })
    }

    /// Same lens expressed on a grid of another resolution.
    pub fn rescaled(&self, from: (u32, u32), to: (u32, u32)) -> Self {
        let sx = to.0 as f64 / from.0.max(1) as f64;
        let sy = to.1 as f64 / from.1.max(1) as f64;
        Self { fx: self.fx * sx, fy: self.fy * sy, cx: self.cx * sx, cy: self.cy * sy }
    }

    #[inline]
    pub fn back_project(&self, x: f64, y: f64, z_mm: f64) -> Point3 {
        Point3::new((x - self.cx) / self.fx * z_mm, (y - self.cy) / self.fy * z_mm, z_mm)
    }

    /// Inverse of [`back_project`](Self::back_project); `None` behind the camera.
    pub fn project(&self, p: Point3) -> Option<(f64, f64)> {
        if p.z <= 0.0 {
            return None;
        }
        Some((p.x / p.z * self.fx + self.cx, p.y / p.z * self.fy + self.cy))
    }

    /// First-order pinhole scale at depth `z_mm`.
    pub fn mm_per_px(&self, z_mm: f64) -> (f64, f64) {
        (z_mm / self.fx, z_mm / self.fy)
    }
}

/// How a lens is described by the settings layer.
#[derive(Debug, Clone, Copy, PartialEq, Serialize, Deserialize)]
#[serde(tag = "kind", rename_all = "snake_case")]
pub enum LensModel {
    Fov { hfov_deg: f64, vfov_deg: f64 },
    Explicit { fx: f64, fy: f64, cx: f64, cy: f64 },
}

impl LensModel {
    pub fn intrinsics(&self, width: u32, height: u32) -> MeasureResult<Intrinsics> {
        match *self {
            LensModel::Fov { hfov_deg, vfov_deg } => Intrinsics::from_fov(width, height, hfov_deg, vfov_deg),
            LensModel::Explicit { fx, fy, cx, cy } => Intrinsics::explicit(fx, fy, cx, cy),
        }
    }
}

/// Field of view (deg) implied by a target of `known_mm` spanning `px_len` pixels at `z_mm`.
pub fn fov_from_known_target(px_len: f64, known_mm: f64, z_mm: f64, image_px: u32) -> Option<f64> {
    if !(px_len > 1.0) || !(known_mm > 0.0) || !(z_mm > 0.0) || image_px == 0 {
        return None;
    }
    let half_tan = (image_px as f64 * (known_mm / px_len)) / (2.0 * z_mm);
    Some((2.0 * half_tan.atan()).to_degrees())
}
