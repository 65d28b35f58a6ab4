use std::f64::consts::PI;
use std::fmt;

use image::{imageops, imageops::FilterType, RgbImage};

/// Side of the grayscale thumbnail the DCT runs on.
const HASH_INPUT: u32 = 32;
/// Side of the low-frequency block kept from the DCT.
const HASH_SIDE: usize = 8;

/// 64-bit DCT perceptual hash.
///
/// Bits are the low-frequency 8x8 DCT coefficients compared against their
/// median, in row-major order. An all-black image hashes to zero.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq, Hash)]
pub struct PerceptualHash(pub u64);

impl PerceptualHash {
    pub fn of(image: &RgbImage) -> Self {
        if image.width() == 0 || image.height() == 0 {
            return Self::default();
        }
        let gray = imageops::grayscale(image);
        let thumb = imageops::resize(&gray, HASH_INPUT, HASH_INPUT, FilterType::Lanczos3);
        let n = HASH_INPUT as usize;
        let pixels: Vec<f64> = thumb.pixels().map(|p| p[0] as f64).collect();

        let cosines = cosine_table(n);

        // DCT-II down the columns, keeping only the first HASH_SIDE rows.
        let mut columns = vec![0.0f64; HASH_SIDE * n];
        for k in 0..HASH_SIDE {
            for x in 0..n {
                columns[k * n + x] = (0..n)
                    .map(|y| cosines[k * n + y] * pixels[y * n + x])
                    .sum();
            }
        }
        // Then along the rows.
        let mut coeffs = [0.0f64; HASH_SIDE * HASH_SIDE];
        for k in 0..HASH_SIDE {
            for l in 0..HASH_SIDE {
                coeffs[k * HASH_SIDE + l] = (0..n)
                    .map(|x| cosines[l * n + x] * columns[k * n + x])
                    .sum();
            }
        }

        let median = median(&coeffs);
        let bits = coeffs
            .iter()
            .enumerate()
            .filter(|(_, c)| **c > median)
            .fold(0u64, |acc, (i, _)| acc | (1u64 << i));
        Self(bits)
    }

    /// Hamming distance between two hashes.
    pub fn distance(&self, other: &PerceptualHash) -> u32 {
        (self.0 ^ other.0).count_ones()
    }
}

impl fmt::Display for PerceptualHash {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{:016x}", self.0)
    }
}

/// `table[k * n + i] = 2 cos(pi k (2i + 1) / 2n)`, the unnormalised DCT-II basis.
fn cosine_table(n: usize) -> Vec<f64> {
    let mut table = vec![0.0; HASH_SIDE * n];
    for k in 0..HASH_SIDE {
        for i in 0..n {
            table[k * n + i] = 2.0 * (PI * k as f64 * (2 * i + 1) as f64 / (2 * n) as f64).cos();
        }
    }
    table
}

fn median(values: &[f64]) -> f64 {
    let mut sorted = values.to_vec();
    sorted.sort_by(|a, b| a.total_cmp(b));
    let mid = sorted.len() / 2;
    if sorted.len() % 2 == 0 {
        (sorted[mid - 1] + sorted[mid]) / 2.0
    } else {
        sorted[mid]
    }
}
