//! Foreground extraction: denoise, threshold above the plane, pick the component under the ROI.

use std::collections::VecDeque;

use serde::{Deserialize, Serialize};
use tracing::debug;

use crate::cancel::CancelToken;
use crate::depth::{is_valid_sample, DepthFrame};
use crate::error::{MeasureError, MeasureResult};
use crate::geometry::Intrinsics;
use crate::plane::Plane;
use crate::roi::DepthRect;

#[derive(Debug, Clone, Deserialize, Serialize)]
#[serde(default)]
pub struct SegmentConfig {
    /// Minimum elevation above the plane for a pixel to count as foreground.
    pub height_threshold_mm: f64,
    /// Extra depth pixels searched around the ROI so the true outline can exceed it.
    pub roi_pad_px: u32,
    /// Valid samples a 3x3 window needs before its centre is replaced by the median.
    pub min_median_neighbors: usize,
}

impl Default for SegmentConfig {
    fn default() -> Self {
        Self { height_threshold_mm: 20.0, roi_pad_px: 4, min_median_neighbors: 3 }
    }
}

/// Selected foreground component on a padded sub-rectangle of the depth grid.
#[derive(Debug, Clone, PartialEq, Serialize, Deserialize)]
pub struct MaskResult {
    /// Sub-rectangle the mask covers (depth-grid coordinates, inclusive).
    pub bounds: DepthRect,
    pub width: u32,
    pub height: u32,
    /// Row-major, `width * height` cells; `true` = foreground.
    pub mask: Vec<bool>,
    /// The unpadded ROI the component was chosen against.
    pub roi: DepthRect,
    pub valid_frac: f64,
    pub plane: Plane,
    pub height_threshold_mm: f64,
}

impl MaskResult {
    pub fn area(&self) -> usize {
        self.mask.iter().filter(|&&m| m).count()
    }

    /// Foreground test in depth-grid coordinates.
    pub fn is_foreground(&self, x: u32, y: u32) -> bool {
        if !self.bounds.contains(x, y) {
            return false;
        }
        let i = (y - self.bounds.ys) as usize * self.width as usize + (x - self.bounds.xs) as usize;
        self.mask[i]
    }

    /// Foreground pixels in depth-grid coordinates, row-major.
    pub fn foreground(&self) -> impl Iterator<Item = (u32, u32)> + '_ {
        self.bounds.pixels().zip(self.mask.iter()).filter_map(|(p, &m)| m.then_some(p))
    }

    /// The mask on the whole `grid_w` x `grid_h` depth grid.
    pub fn to_full_grid(&self, grid_w: u32, grid_h: u32) -> Vec<bool> {
        let mut out = vec![false; grid_w as usize * grid_h as usize];
        for (x, y) in self.foreground() {
            if x < grid_w && y < grid_h {
                out[y as usize * grid_w as usize + x as usize] = true;
            }
        }
        out
    }
}

/// `validSampleCount / totalSampleCount` over `rect`.
pub fn valid_fraction(frame: &DepthFrame<'_>, rect: &DepthRect) -> f64 {
    let valid = rect.pixels().filter(|&(x, y)| is_valid_sample(frame.sample(x, y))).count();
    valid as f64 / rect.area() as f64
}

/// 3x3 median over `rect`, ignoring reserved samples, written to a copy of the frame.
///
/// Windows are read from the input bytes, so the filter does not feed on its own output.
pub fn median3x3(frame: &DepthFrame<'_>, rect: &DepthRect, min_valid: usize) -> Vec<u8> {
    let src = frame.data();
    let mut out = src.to_vec();
    let (w, h) = (frame.width(), frame.height());
    let mut window = [0u8; 9];

    for (x, y) in rect.pixels() {
        let mut n = 0;
        for yy in y.saturating_sub(1)..=(y + 1).min(h - 1) {
            for xx in x.saturating_sub(1)..=(x + 1).min(w - 1) {
                let u = src[frame.index(xx, yy)];
                if is_valid_sample(u) {
                    window[n] = u;
                    n += 1;
                }
            }
        }
        if n >= min_valid.max(1) {
            window[..n].sort_unstable();
            out[frame.index(x, y)] = window[n / 2];
        }
    }
    out
}

/// Valid pixels of `bounds` at least `threshold_mm` above the plane.
pub fn candidate_mask(
    frame: &DepthFrame<'_>,
    bounds: &DepthRect,
    plane: &Plane,
    k: &Intrinsics,
    threshold_mm: f64,
    cancel: &CancelToken,
) -> MeasureResult<Vec<bool>> {
    let mut cand = vec![false; bounds.area()];
    for (i, (x, y)) in bounds.pixels().enumerate() {
        cancel.checkpoint(i)?;
        if let Some(z) = frame.mm_at(x, y) {
            let p = k.back_project(x as f64, y as f64, z);
            cand[i] = plane.signed_distance(p) >= threshold_mm;
        }
    }
    Ok(cand)
}

#[derive(Debug, Clone, PartialEq)]
pub struct Component {
    pub mask: Vec<bool>,
    pub size: usize,
    /// Pixels inside the ROI.
    pub overlap: usize,
}

/// 4-connected components of `cand` (a `width` x `height` grid); returns the one with the
/// most pixels inside `roi_local`, ties going to the larger component.
pub fn select_component(cand: &[bool], width: u32, height: u32, roi_local: &DepthRect) -> Option<Component> {
    let (w, h) = (width as usize, height as usize);
    let mut visited = vec![false; cand.len()];
    let mut queue = VecDeque::new();
    let mut best: Option<(Vec<usize>, usize)> = None;

    for start in 0..cand.len() {
        if !cand[start] || visited[start] {
            continue;
        }
        visited[start] = true;
        queue.push_back(start);
        let mut members = Vec::new();
        let mut overlap = 0usize;

        while let Some(i) = queue.pop_front() {
            members.push(i);
            let (x, y) = (i % w, i / w);
            if roi_local.contains(x as u32, y as u32) {
                overlap += 1;
            }
            let mut visit = |j: usize| {
                if cand[j] && !visited[j] {
                    visited[j] = true;
                    queue.push_back(j);
                }
            };
            if x + 1 < w {
                visit(i + 1);
            }
            if x > 0 {
                visit(i - 1);
            }
            if y + 1 < h {
                visit(i + w);
            }
            if y > 0 {
                visit(i - w);
            }
        }

        let better = match &best {
            None => true,
            Some((m, o)) => overlap > *o || (overlap == *o && members.len() > m.len()),
        };
        if better {
            best = Some((members, overlap));
        }
    }

    best.map(|(members, overlap)| {
        let mut mask = vec![false; cand.len()];
        for &i in &members {
            mask[i] = true;
        }
        Component { mask, size: members.len(), overlap }
    })
}

/// Segments the parcel under `roi` against `plane`.
///
/// The caller's frame is only read; the median filter runs on a private copy.
pub fn segment(
    frame: &DepthFrame<'_>,
    roi: &DepthRect,
    plane: &Plane,
    k: &Intrinsics,
    cfg: &SegmentConfig,
    cancel: &CancelToken,
) -> MeasureResult<MaskResult> {
    let valid_frac = valid_fraction(frame, roi);
    let denoised = median3x3(frame, roi, cfg.min_median_neighbors);
    let work = frame.with_data(&denoised)?;

    let bounds = roi.padded(cfg.roi_pad_px, frame.width(), frame.height());
    let (width, height) = (bounds.width(), bounds.height());
    let cand = candidate_mask(&work, &bounds, plane, k, cfg.height_threshold_mm, cancel)?;
    cancel.check()?;

    let roi_local = DepthRect::new(roi.xs - bounds.xs, roi.ys - bounds.ys, roi.xe - bounds.xs, roi.ye - bounds.ys);
    let candidates = cand.iter().filter(|&&c| c).count();
    let component = select_component(&cand, width, height, &roi_local)
        .filter(|c| c.overlap > 0)
        .ok_or(MeasureError::SegmentationFailed)?;

    debug!(
        candidates,
        size = component.size,
        overlap = component.overlap,
        valid_frac,
        "segment: component selected"
    );

    Ok(MaskResult {
        bounds,
        width,
        height,
        mask: component.mask,
        roi: *roi,
        valid_frac,
        plane: *plane,
        height_threshold_mm: cfg.height_threshold_mm,
    })
}

/// Intersection over union between `mask` and a full-grid ground-truth mask.
pub fn mask_iou(mask: &MaskResult, truth: &[bool], grid_w: u32, grid_h: u32) -> MeasureResult<f64> {
    let n = grid_w as usize * grid_h as usize;
    if truth.len() != n {
        return Err(MeasureError::malformed(format!(
            "ground truth has {} cells, grid is {}x{}",
            truth.len(),
            grid_w,
            grid_h
        )));
    }
    let pred = mask.to_full_grid(grid_w, grid_h);
    let (mut inter, mut union) = (0usize, 0usize);
    for (&p, &g) in pred.iter().zip(truth) {
        if p || g {
            union += 1;
        }
        if p && g {
            inter += 1;
        }
    }
    Ok(if union == 0 { 0.0 } else { inter as f64 / union as f64 })
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::depth::DepthScale;

    const W: u32 = 40;

    fn grid(fill: u8) -> Vec<u8> {
        vec![fill; (W * W) as usize]
    }

    fn paint(buf: &mut [u8], x0: u32, y0: u32, x1: u32, y1: u32, v: u8) {
        for y in y0..=y1 {
            for x in x0..=x1 {
                buf[(y * W + x) as usize] = v;
            }
        }
    }

    fn k() -> Intrinsics {
        Intrinsics::from_fov(W, W, 60.0, 60.0).unwrap()
    }

    fn background_plane(buf: &[u8]) -> Plane {
        let f = DepthFrame::new(W, W, buf, DepthScale::default()).unwrap();
        Plane::flat(f.mm_at(0, 0).unwrap())
    }

    #[test]
    fn median_removes_speckle_without_touching_input() {
        let mut buf = grid(100);
        buf[(10 * W + 10) as usize] = 30;
        buf[(11 * W + 10) as usize] = 0;
        let before = buf.clone();
        let f = DepthFrame::new(W, W, &buf, DepthScale::default()).unwrap();
        let out = median3x3(&f, &DepthRect::new(5, 5, 15, 15), 3);
        assert_eq!(buf, before);
        assert_eq!(out[(10 * W + 10) as usize], 100);
        // hole with enough valid neighbours is filled
        assert_eq!(out[(11 * W + 10) as usize], 100);
        // outside the rect nothing changes
        assert_eq!(out[..(5 * W) as usize], before[..(5 * W) as usize]);
    }

    #[test]
    fn median_leaves_sparse_cells_alone() {
        let mut buf = grid(0);
        buf[(10 * W + 10) as usize] = 90;
        buf[(10 * W + 11) as usize] = 95;
        let f = DepthFrame::new(W, W, &buf, DepthScale::default()).unwrap();
        let out = median3x3(&f, &DepthRect::new(8, 8, 12, 12), 3);
        assert_eq!(out, buf);
    }

    #[test]
    fn valid_fraction_is_exact_ratio() {
        let mut buf = grid(100);
        paint(&mut buf, 0, 0, 2, 0, 255);
        buf[W as usize] = 0;
        let f = DepthFrame::new(W, W, &buf, DepthScale::default()).unwrap();
        let r = DepthRect::new(0, 0, 3, 1);
        assert_eq!(valid_fraction(&f, &r), 4.0 / 8.0);
    }

    #[test]
    fn flat_scene_has_no_foreground() {
        let buf = grid(100);
        let f = DepthFrame::new(W, W, &buf, DepthScale::default()).unwrap();
        let plane = background_plane(&buf);
        let roi = DepthRect::new(10, 10, 30, 30);
        let cand = candidate_mask(&f, &roi, &plane, &k(), 20.0, &CancelToken::new()).unwrap();
        assert!(cand.iter().all(|c| !c));
        let err = segment(&f, &roi, &plane, &k(), &SegmentConfig::default(), &CancelToken::new());
        assert_eq!(err, Err(MeasureError::SegmentationFailed));
    }

    #[test]
    fn prefers_roi_overlap_over_size() {
        let mut buf = grid(100);
        // big distractor outside the ROI, touching the search pad only
        paint(&mut buf, 0, 0, 15, 39, 50);
        // small parcel centred in the ROI
        paint(&mut buf, 24, 18, 29, 23, 60);
        let f = DepthFrame::new(W, W, &buf, DepthScale::default()).unwrap();
        let plane = background_plane(&buf);
        let roi = DepthRect::new(19, 14, 34, 28);
        let m = segment(&f, &roi, &plane, &k(), &SegmentConfig::default(), &CancelToken::new()).unwrap();
        assert!(m.is_foreground(26, 20));
        assert!(!m.is_foreground(15, 20));
        // corners are eroded by the median, edges are kept
        assert_eq!(m.area(), 36 - 4);
        assert_eq!(m.mask.len(), (m.width * m.height) as usize);
        assert_eq!(m.valid_frac, 1.0);
    }

    #[test]
    fn component_tie_goes_to_larger() {
        // two blobs, both overlapping the roi by one pixel
        #[rustfmt::skip]
        let cand = [
            true,  false, true,  true,
            false, false, true,  true,
            false, false, false, false,
        ];
        let roi = DepthRect::new(0, 0, 2, 0);
        let c = select_component(&cand, 4, 3, &roi).unwrap();
        assert_eq!(c.size, 4);
        assert_eq!(c.overlap, 1);
        assert!(c.mask[3] && !c.mask[0]);
    }

    #[test]
    fn iou_against_truth() {
        let mut buf = grid(100);
        paint(&mut buf, 14, 14, 23, 23, 60);
        let f = DepthFrame::new(W, W, &buf, DepthScale::default()).unwrap();
        let plane = background_plane(&buf);
        let roi = DepthRect::new(12, 12, 25, 25);
        let m = segment(&f, &roi, &plane, &k(), &SegmentConfig::default(), &CancelToken::new()).unwrap();

        let truth: Vec<bool> = (0..W * W).map(|i| {
            let (x, y) = (i % W, i / W);
            (14..=23).contains(&x) && (14..=23).contains(&y)
        }).collect();
        let iou = mask_iou(&m, &truth, W, W).unwrap();
        assert!((iou - 96.0 / 100.0).abs() < 1e-12);
        assert!(mask_iou(&m, &truth[1..], W, W).is_err());
    }
}
