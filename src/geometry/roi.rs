use std::collections::VecDeque;
use std::path::Path;

use anyhow::{anyhow, Result};
use image::{GrayImage, Luma, RgbImage};

use crate::detect::Detection;

const FOREGROUND: u8 = 255;

/// One region of interest: a connected white blob of the mask image.
#[derive(Clone, Debug)]
pub struct Roi {
    pub id: u32,
    pub left: u32,
    pub top: u32,
    pub width: u32,
    pub height: u32,
    /// Per-pixel membership over the ROI's bounding rectangle.
    mask: GrayImage,
}

impl Roi {
    fn contains(&self, x: u32, y: u32) -> bool {
        if x < self.left || y < self.top {
            return false;
        }
        let (lx, ly) = (x - self.left, y - self.top);
        lx < self.width && ly < self.height && self.mask.get_pixel(lx, ly)[0] == FOREGROUND
    }

    pub fn area(&self) -> u64 {
        self.mask.pixels().filter(|p| p[0] == FOREGROUND).count() as u64
    }
}

/// Ordered set of ROIs parsed from a mask bitmap.
///
/// White regions are ROIs, black is background. ROI ids run from 0 in
/// top-to-bottom, then left-to-right order of the regions' top-left corners.
#[derive(Clone, Debug, Default)]
pub struct RoiMask {
    rois: Vec<Roi>,
}

impl RoiMask {
    pub fn load(path: &Path) -> Result<Self> {
        let image = image::open(path)
            .map_err(|e| anyhow!("failed to open mask file {}: {}", path.display(), e))?;
        Ok(Self::from_luma(&image.to_luma8()))
    }

    /// Like [`RoiMask::load`], but a missing or unreadable mask yields an empty
    /// ROI set so the stream is simply not processed.
    pub fn load_or_empty(path: &Path) -> Self {
        match Self::load(path) {
            Ok(mask) => {
                log::info!("loaded {} ROIs from {}", mask.len(), path.display());
                mask
            }
            Err(e) => {
                log::error!("{}; no ROIs will be processed", e);
                Self::default()
            }
        }
    }

    pub fn from_luma(image: &GrayImage) -> Self {
        let threshold = otsu_threshold(image);
        let (width, height) = image.dimensions();
        let binary = GrayImage::from_fn(width, height, |x, y| {
            if image.get_pixel(x, y)[0] > threshold {
                Luma([FOREGROUND])
            } else {
                Luma([0])
            }
        });

        let mut rois = connected_components(&binary);
        rois.sort_by_key(|roi| (roi.top, roi.left));
        for (id, roi) in rois.iter_mut().enumerate() {
            roi.id = id as u32;
        }
        Self { rois }
    }

    pub fn len(&self) -> usize {
        self.rois.len()
    }

    pub fn is_empty(&self) -> bool {
        self.rois.is_empty()
    }

    pub fn rois(&self) -> &[Roi] {
        &self.rois
    }

    pub fn get(&self, roi_id: u32) -> Option<&Roi> {
        self.rois.get(roi_id as usize)
    }

    /// Top-left corner of the ROI in frame pixels.
    pub fn offset(&self, roi_id: u32) -> Option<(u32, u32)> {
        self.get(roi_id).map(|roi| (roi.left, roi.top))
    }

    /// Crop of one ROI with pixels outside the mask zeroed.
    pub fn crop(&self, image: &RgbImage, roi_id: u32) -> Option<RgbImage> {
        let roi = self.get(roi_id)?;
        let (img_w, img_h) = image.dimensions();
        Some(RgbImage::from_fn(roi.width, roi.height, |lx, ly| {
            let (x, y) = (roi.left + lx, roi.top + ly);
            if x < img_w && y < img_h && roi.contains(x, y) {
                *image.get_pixel(x, y)
            } else {
                image::Rgb([0, 0, 0])
            }
        }))
    }

    /// All ROI crops in id order.
    pub fn apply(&self, image: &RgbImage) -> Vec<(u32, RgbImage)> {
        self.rois
            .iter()
            .filter_map(|roi| self.crop(image, roi.id).map(|crop| (roi.id, crop)))
            .collect()
    }

    /// Detections overlapping the ROI, as `(index into detections, IOD)`.
    ///
    /// Boxes are rounded to whole pixels with inclusive far edges and clipped
    /// to `frame_dims`. Detections with zero overlap are left out.
    pub fn roi_detections(
        &self,
        detections: &[Detection],
        roi_id: u32,
        frame_dims: (u32, u32),
    ) -> Vec<(usize, f32)> {
        let Some(roi) = self.get(roi_id) else {
            return Vec::new();
        };
        detections
            .iter()
            .enumerate()
            .filter_map(|(i, det)| {
                let iod = intersection_over_detection(roi, det, frame_dims);
                (iod > 0.0).then_some((i, iod))
            })
            .collect()
    }
}

fn intersection_over_detection(roi: &Roi, det: &Detection, frame_dims: (u32, u32)) -> f32 {
    let (frame_w, frame_h) = frame_dims;
    if frame_w == 0 || frame_h == 0 {
        return 0.0;
    }
    let round = |v: f32| (v + 0.5).floor() as i64;
    let clip_x = |v: i64| v.clamp(0, frame_w as i64 - 1);
    let clip_y = |v: i64| v.clamp(0, frame_h as i64 - 1);

    let (x1, x2) = (round(det.bbox.x1), round(det.bbox.x2));
    let (y1, y2) = (round(det.bbox.y1), round(det.bbox.y2));
    if x2 < 0 || y2 < 0 || x1 >= frame_w as i64 || y1 >= frame_h as i64 || x2 < x1 || y2 < y1 {
        return 0.0;
    }
    let (x1, x2, y1, y2) = (clip_x(x1), clip_x(x2), clip_y(y1), clip_y(y2));
    let area = ((x2 - x1 + 1) * (y2 - y1 + 1)) as f64;

    // Only the part of the box inside the ROI rectangle can intersect the mask.
    let ix1 = x1.max(roi.left as i64);
    let iy1 = y1.max(roi.top as i64);
    let ix2 = x2.min((roi.left + roi.width) as i64 - 1);
    let iy2 = y2.min((roi.top + roi.height) as i64 - 1);
    let mut inter = 0u64;
    for y in iy1..=iy2 {
        for x in ix1..=ix2 {
            if roi.contains(x as u32, y as u32) {
                inter += 1;
            }
        }
    }
    (inter as f64 / area) as f32
}

/// Otsu's threshold: the gray level maximising between-class variance.
/// Pixels strictly above it are foreground. A flat image yields 0.
fn otsu_threshold(image: &GrayImage) -> u8 {
    let mut histogram = [0u64; 256];
    for p in image.pixels() {
        histogram[p[0] as usize] += 1;
    }
    let total: u64 = histogram.iter().sum();
    if total == 0 {
        return 0;
    }
    let sum_all: f64 = histogram
        .iter()
        .enumerate()
        .map(|(v, n)| v as f64 * *n as f64)
        .sum();

    let mut best = 0u8;
    let mut best_variance = 0.0f64;
    let mut weight_bg = 0u64;
    let mut sum_bg = 0.0f64;
    for t in 0..256usize {
        weight_bg += histogram[t];
        if weight_bg == 0 {
            continue;
        }
        let weight_fg = total - weight_bg;
        if weight_fg == 0 {
            break;
        }
        sum_bg += t as f64 * histogram[t] as f64;
        let mean_bg = sum_bg / weight_bg as f64;
        let mean_fg = (sum_all - sum_bg) / weight_fg as f64;
        let variance = weight_bg as f64 * weight_fg as f64 * (mean_bg - mean_fg).powi(2);
        if variance > best_variance {
            best_variance = variance;
            best = t as u8;
        }
    }
    best
}

/// 4-connected foreground components, each as an [`Roi`] with id 0.
fn connected_components(binary: &GrayImage) -> Vec<Roi> {
    let (width, height) = binary.dimensions();
    let mut visited = vec![false; (width as usize) * (height as usize)];
    let index = |x: u32, y: u32| (y as usize) * (width as usize) + x as usize;
    let mut rois = Vec::new();

    for y in 0..height {
        for x in 0..width {
            if visited[index(x, y)] || binary.get_pixel(x, y)[0] != FOREGROUND {
                continue;
            }
            let mut pixels = Vec::new();
            let mut queue = VecDeque::from([(x, y)]);
            visited[index(x, y)] = true;
            while let Some((cx, cy)) = queue.pop_front() {
                pixels.push((cx, cy));
                let mut neighbours = Vec::with_capacity(4);
                if cx > 0 {
                    neighbours.push((cx - 1, cy));
                }
                if cy > 0 {
                    neighbours.push((cx, cy - 1));
                }
                if cx + 1 < width {
                    neighbours.push((cx + 1, cy));
                }
                if cy + 1 < height {
                    neighbours.push((cx, cy + 1));
                }
                for (nx, ny) in neighbours {
                    if !visited[index(nx, ny)] && binary.get_pixel(nx, ny)[0] == FOREGROUND {
                        visited[index(nx, ny)] = true;
                        queue.push_back((nx, ny));
                    }
                }
            }

            let left = pixels.iter().map(|p| p.0).min().unwrap_or(x);
            let right = pixels.iter().map(|p| p.0).max().unwrap_or(x);
            let top = pixels.iter().map(|p| p.1).min().unwrap_or(y);
            let bottom = pixels.iter().map(|p| p.1).max().unwrap_or(y);
            let (w, h) = (right - left + 1, bottom - top + 1);
            let mut mask = GrayImage::new(w, h);
            for (px, py) in pixels {
                mask.put_pixel(px - left, py - top, Luma([FOREGROUND]));
            }
            rois.push(Roi {
                id: 0,
                left,
                top,
                width: w,
                height: h,
                mask,
            });
        }
    }
    rois
}
