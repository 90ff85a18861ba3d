use anyhow::{Context, Result};
use serde::Deserialize;

use dim_core::{Calibration, DepthScale, LensModel, PipelineConfig};

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct Config {
    /// RGB lens; the default FOV is used when absent.
    pub camera: Option<LensModel>,
    /// Depth sensor lens, if calibrated separately.
    pub depth_camera: Option<LensModel>,
    pub alignment: AlignmentCfg,
    pub depth: DepthCfg,
    pub pipeline: PipelineConfig,
}

#[derive(Debug, Clone, Default, Deserialize)]
#[serde(default)]
pub struct AlignmentCfg {
    pub dx_px: f64,
    pub dy_px: f64,
    pub optical_dx_mm: Option<f64>,
    pub optical_dy_mm: Option<f64>,
}

/// Cached depth range, used when a frame arrives without its own.
#[derive(Debug, Clone, Deserialize)]
#[serde(default)]
pub struct DepthCfg {
    pub scale_min: f64,
    pub scale_max: f64,
}

impl Default for DepthCfg {
    fn default() -> Self {
        let s = DepthScale::default();
        Self { scale_min: s.min_mm, scale_max: s.max_mm }
    }
}

impl Config {
    pub fn calibration(&self) -> Calibration {
        let a = &self.alignment;
        let optical_offset_mm = match (a.optical_dx_mm, a.optical_dy_mm) {
            (None, None) => None,
            (dx, dy) => Some((dx.unwrap_or(0.0), dy.unwrap_or(0.0))),
        };
        Calibration {
            lens: self.camera.unwrap_or(Calibration::default().lens),
            depth_lens: self.depth_camera,
            align_offset_px: (a.dx_px, a.dy_px),
            optical_offset_mm,
        }
    }

    pub fn depth_scale(&self, min_override: Option<f64>, max_override: Option<f64>) -> DepthScale {
        DepthScale::new(
            min_override.unwrap_or(self.depth.scale_min),
            max_override.unwrap_or(self.depth.scale_max),
        )
    }
}

pub fn load_config(path: &str) -> Result<Config> {
    let s = std::fs::read_to_string(path).context("read config")?;
    toml::from_str(&s).context("parse config toml")
}
