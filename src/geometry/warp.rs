use std::collections::HashMap;
use std::path::Path;

use anyhow::{anyhow, Result};
use image::{Rgb, RgbImage};
use nalgebra::{Matrix3, SMatrix, SVector, Vector3};
use serde::Deserialize;

#[derive(Debug, Deserialize)]
struct WarpFile {
    #[serde(default)]
    warps: Vec<WarpEntry>,
}

#[derive(Debug, Deserialize)]
struct WarpEntry {
    roi_id: u32,
    src_points: Vec<[f64; 2]>,
    dst_points: Vec<[f64; 2]>,
}

/// 3x3 projective transform.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct Homography(Matrix3<f64>);

/// Pivots below this make the point system degenerate.
const MIN_PIVOT: f64 = 1e-10;

impl Homography {
    pub fn identity() -> Self {
        Self(Matrix3::identity())
    }

    /// Solve the transform mapping the four `src` points onto `dst`.
    pub fn from_points(src: &[[f64; 2]; 4], dst: &[[f64; 2]; 4]) -> Option<Self> {
        let mut a = SMatrix::<f64, 8, 8>::zeros();
        let mut b = SVector::<f64, 8>::zeros();
        for i in 0..4 {
            let [x, y] = src[i];
            let [u, v] = dst[i];
            let rows = [
                [x, y, 1.0, 0.0, 0.0, 0.0, -u * x, -u * y],
                [0.0, 0.0, 0.0, x, y, 1.0, -v * x, -v * y],
            ];
            a.row_mut(2 * i).copy_from_slice(&rows[0]);
            a.row_mut(2 * i + 1).copy_from_slice(&rows[1]);
            b[2 * i] = u;
            b[2 * i + 1] = v;
        }

        let lu = a.lu();
        if lu.u().diagonal().iter().any(|d| d.abs() < MIN_PIVOT) {
            return None;
        }
        let h = lu.solve(&b)?;
        Some(Self(Matrix3::new(h[0], h[1], h[2], h[3], h[4], h[5], h[6], h[7], 1.0)))
    }

    pub fn apply(&self, x: f64, y: f64) -> Option<(f64, f64)> {
        let p = self.0 * Vector3::new(x, y, 1.0);
        if p.z.abs() < 1e-12 {
            return None;
        }
        Some((p.x / p.z, p.y / p.z))
    }

    pub fn inverse(&self) -> Option<Self> {
        if self.0.determinant().abs() < 1e-12 {
            return None;
        }
        self.0.try_inverse().map(Self)
    }
}

/// Per-ROI perspective rectification.
///
/// ROIs without a usable warp are passed through unchanged.
#[derive(Clone, Debug, Default)]
pub struct Warp {
    /// Inverse transforms (output pixel → source pixel) by ROI id.
    inverse: HashMap<u32, Homography>,
}

impl Warp {
    pub fn identity() -> Self {
        Self::default()
    }

    pub fn load(path: &Path) -> Result<Self> {
        let raw = std::fs::read_to_string(path)
            .map_err(|e| anyhow!("failed to read warp file {}: {}", path.display(), e))?;
        Self::from_json(&raw).map_err(|e| anyhow!("invalid warp file {}: {}", path.display(), e))
    }

    pub fn load_or_identity(path: &Path) -> Self {
        match Self::load(path) {
            Ok(warp) => warp,
            Err(e) => {
                log::info!("{}; ROI images are not warped", e);
                Self::identity()
            }
        }
    }

    pub fn from_json(raw: &str) -> Result<Self> {
        let file: WarpFile = serde_json::from_str(raw)?;
        let mut inverse = HashMap::new();
        for entry in file.warps {
            if entry.src_points.len() < 4 || entry.dst_points.len() < 4 {
                log::warn!("warp for ROI {} needs at least 4 point pairs", entry.roi_id);
                continue;
            }
            let src = [
                entry.src_points[0],
                entry.src_points[1],
                entry.src_points[2],
                entry.src_points[3],
            ];
            let dst = [
                entry.dst_points[0],
                entry.dst_points[1],
                entry.dst_points[2],
                entry.dst_points[3],
            ];
            match Homography::from_points(&src, &dst).and_then(|h| h.inverse()) {
                Some(inv) => {
                    inverse.entry(entry.roi_id).or_insert(inv);
                }
                None => log::warn!("warp for ROI {} is degenerate, ignoring", entry.roi_id),
            }
        }
        Ok(Self { inverse })
    }

    pub fn has_warp(&self, roi_id: u32) -> bool {
        self.inverse.contains_key(&roi_id)
    }

    /// Warp an ROI image. Output has the input's size; pixels mapping outside
    /// the source are black.
    pub fn apply(&self, image: &RgbImage, roi_id: u32) -> RgbImage {
        let Some(inv) = self.inverse.get(&roi_id) else {
            return image.clone();
        };
        let (width, height) = image.dimensions();
        RgbImage::from_fn(width, height, |x, y| {
            match inv.apply(x as f64, y as f64) {
                Some((sx, sy)) => sample_bilinear(image, sx, sy),
                None => Rgb([0, 0, 0]),
            }
        })
    }
}

fn sample_bilinear(image: &RgbImage, x: f64, y: f64) -> Rgb<u8> {
    let (width, height) = image.dimensions();
    if width == 0 || height == 0 || x < -0.5 || y < -0.5 {
        return Rgb([0, 0, 0]);
    }
    let max_x = (width - 1) as f64;
    let max_y = (height - 1) as f64;
    if x > max_x + 0.5 || y > max_y + 0.5 {
        return Rgb([0, 0, 0]);
    }
    let x = x.clamp(0.0, max_x);
    let y = y.clamp(0.0, max_y);
    let x0 = x.floor() as u32;
    let y0 = y.floor() as u32;
    let x1 = (x0 + 1).min(width - 1);
    let y1 = (y0 + 1).min(height - 1);
    let fx = x - x0 as f64;
    let fy = y - y0 as f64;

    let p00 = image.get_pixel(x0, y0);
    let p10 = image.get_pixel(x1, y0);
    let p01 = image.get_pixel(x0, y1);
    let p11 = image.get_pixel(x1, y1);
    let mut out = [0u8; 3];
    for (c, value) in out.iter_mut().enumerate() {
        let top = p00[c] as f64 * (1.0 - fx) + p10[c] as f64 * fx;
        let bottom = p01[c] as f64 * (1.0 - fx) + p11[c] as f64 * fx;
        *value = (top * (1.0 - fy) + bottom * fy).round().clamp(0.0, 255.0) as u8;
    }
    Rgb(out)
}

#[cfg(test)]
mod tests {
    use super::*;

    fn pattern() -> RgbImage {
        RgbImage::from_fn(16, 12, |x, y| Rgb([(x * 10) as u8, (y * 20) as u8, 7]))
    }

    #[test]
    fn homography_maps_points() {
        let src = [[0.0, 0.0], [10.0, 0.0], [10.0, 10.0], [0.0, 10.0]];
        let dst = [[0.0, 0.0], [20.0, 0.0], [20.0, 10.0], [0.0, 10.0]];
        let h = Homography::from_points(&src, &dst).unwrap();
        let (x, y) = h.apply(5.0, 5.0).unwrap();
        assert!((x - 10.0).abs() < 1e-9 && (y - 5.0).abs() < 1e-9);
        let back = h.inverse().unwrap().apply(10.0, 5.0).unwrap();
        assert!((back.0 - 5.0).abs() < 1e-9 && (back.1 - 5.0).abs() < 1e-9);
    }

    #[test]
    fn perspective_maps_every_corner() {
        let src = [[12.0, 40.0], [180.0, 35.0], [200.0, 120.0], [5.0, 110.0]];
        let dst = [[0.0, 0.0], [200.0, 0.0], [200.0, 80.0], [0.0, 80.0]];
        let h = Homography::from_points(&src, &dst).unwrap();
        let inv = h.inverse().unwrap();
        for (s, d) in src.iter().zip(&dst) {
            let (x, y) = h.apply(s[0], s[1]).unwrap();
            assert!((x - d[0]).abs() < 1e-6 && (y - d[1]).abs() < 1e-6);
            let (x, y) = inv.apply(d[0], d[1]).unwrap();
            assert!((x - s[0]).abs() < 1e-6 && (y - s[1]).abs() < 1e-6);
        }
        assert_eq!(Homography::identity().apply(3.0, 4.0), Some((3.0, 4.0)));
    }

    #[test]
    fn collinear_points_are_degenerate() {
        let src = [[0.0, 0.0], [1.0, 1.0], [2.0, 2.0], [3.0, 3.0]];
        assert!(Homography::from_points(&src, &src).is_none());
    }

    #[test]
    fn missing_roi_is_identity() {
        let warp = Warp::identity();
        let image = pattern();
        assert_eq!(warp.apply(&image, 0), image);
    }

    #[test]
    fn translation_shifts_pixels() {
        let json = r#"{"warps": [{"roi_id": 1,
            "src_points": [[0, 0], [10, 0], [10, 10], [0, 10]],
            "dst_points": [[2, 0], [12, 0], [12, 10], [2, 10]]}]}"#;
        let warp = Warp::from_json(json).unwrap();
        assert!(warp.has_warp(1));
        assert!(!warp.has_warp(0));

        let image = pattern();
        let out = warp.apply(&image, 1);
        assert_eq!(out.dimensions(), image.dimensions());
        assert_eq!(out.get_pixel(5, 3), image.get_pixel(3, 3));
        assert_eq!(*out.get_pixel(0, 3), Rgb([0, 0, 0]));
        // ROI 0 is untouched
        assert_eq!(warp.apply(&image, 0), image);
    }

    #[test]
    fn too_few_points_and_bad_files_fall_back() {
        let json = r#"{"warps": [{"roi_id": 0, "src_points": [[0, 0]], "dst_points": [[1, 1]]}]}"#;
        assert!(!Warp::from_json(json).unwrap().has_warp(0));
        assert!(Warp::from_json("not json").is_err());
        let warp = Warp::load_or_identity(Path::new("/nonexistent/warp.json"));
        assert!(!warp.has_warp(0));
    }
}
