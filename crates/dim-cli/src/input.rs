use std::path::Path;

use anyhow::{Context, Result};
use image::{imageops::FilterType, GrayImage, Luma};
use tracing::debug;

use dim_core::RegionOfInterest;

/// 8-bit depth grid as read from disk.
#[derive(Debug, Clone)]
pub struct DepthGrid {
    pub width: u32,
    pub height: u32,
    pub data: Vec<u8>,
}

/// `WxH`, e.g. `100x100`.
pub fn parse_size(s: &str) -> Result<(u32, u32)> {
    let (w, h) = s.split_once(['x', 'X']).context("size must look like WxH")?;
    let w: u32 = w.trim().parse().context("size width")?;
    let h: u32 = h.trim().parse().context("size height")?;
    anyhow::ensure!(w > 0 && h > 0, "size must be non-zero");
    Ok((w, h))
}

/// `left,top,right,bottom` in RGB pixels.
pub fn parse_roi(s: &str) -> Result<RegionOfInterest> {
    let v = s
        .split(',')
        .map(|p| p.trim().parse::<f64>().context("roi coordinate"))
        .collect::<Result<Vec<_>>>()?;
    anyhow::ensure!(v.len() == 4, "roi needs 4 values: left,top,right,bottom");
    Ok(RegionOfInterest::new(v[0], v[1], v[2], v[3]))
}

fn is_raw(path: &Path) -> bool {
    matches!(path.extension().and_then(|e| e.to_str()), Some("raw" | "bin" | "u8"))
}

/// Reads either a headerless `.raw` dump (needs `size`) or any grayscale-convertible image.
pub fn load_depth(path: &Path, size: Option<(u32, u32)>) -> Result<DepthGrid> {
    if is_raw(path) {
        let (width, height) = size.context("raw depth needs --depth-size WxH")?;
        let data = std::fs::read(path).with_context(|| format!("read {}", path.display()))?;
        anyhow::ensure!(
            data.len() == width as usize * height as usize,
            "{} is {} bytes, expected {}x{}",
            path.display(),
            data.len(),
            width,
            height
        );
        return Ok(DepthGrid { width, height, data });
    }
    let img = image::open(path).with_context(|| format!("decode {}", path.display()))?.to_luma8();
    let (width, height) = img.dimensions();
    if let Some(expected) = size {
        anyhow::ensure!(expected == (width, height), "depth image is {}x{}, expected {}x{}", width, height, expected.0, expected.1);
    }
    debug!(width, height, "input: depth image loaded");
    Ok(DepthGrid { width, height, data: img.into_raw() })
}

pub fn rgb_dimensions(path: &Path) -> Result<(u32, u32)> {
    image::image_dimensions(path).with_context(|| format!("read header of {}", path.display()))
}

/// Any image, resized nearest-neighbour onto the depth grid; non-black is foreground.
pub fn load_truth_mask(path: &Path, width: u32, height: u32) -> Result<Vec<bool>> {
    let img = image::open(path).with_context(|| format!("decode {}", path.display()))?.to_luma8();
    let img = if img.dimensions() == (width, height) {
        img
    } else {
        image::imageops::resize(&img, width, height, FilterType::Nearest)
    };
    Ok(img.pixels().map(|p| p.0[0] > 0).collect())
}

pub fn mask_image(mask: &[bool], width: u32, height: u32) -> GrayImage {
    GrayImage::from_fn(width, height, |x, y| {
        let on = mask.get((y * width + x) as usize).copied().unwrap_or(false);
        Luma([if on { 255 } else { 0 }])
    })
}

pub fn write_mask_png(path: &Path, mask: &[bool], width: u32, height: u32) -> Result<()> {
    mask_image(mask, width, height)
        .save_with_format(path, image::ImageFormat::Png)
        .with_context(|| format!("write {}", path.display()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn sizes_and_rois_parse() {
        assert_eq!(parse_size("100x75").unwrap(), (100, 75));
        assert_eq!(parse_size(" 640 X 480").unwrap(), (640, 480));
        assert!(parse_size("100").is_err());
        assert!(parse_size("0x10").is_err());

        let roi = parse_roi("60, 40, 40, 60").unwrap();
        assert_eq!(roi, RegionOfInterest::new(40.0, 40.0, 60.0, 60.0));
        assert!(parse_roi("1,2,3").is_err());
        assert!(parse_roi("1,2,3,x").is_err());
    }

    #[test]
    fn mask_image_is_binary() {
        let img = mask_image(&[true, false, false, true], 2, 2);
        assert_eq!(img.get_pixel(0, 0).0[0], 255);
        assert_eq!(img.get_pixel(1, 0).0[0], 0);
        assert_eq!(img.get_pixel(1, 1).0[0], 255);
    }
}
