//! DCT-based 64-bit perceptual image hashing
//!
//! The classic pHash recipe: grayscale, shrink to 32x32, run a 2D DCT, keep
//! the top-left 8x8 block of low frequencies, and set one bit per coefficient
//! above the block median (DC excluded from the median so a flat image does
//! not bias the threshold). Hashes are compared by Hamming distance.

use image::imageops::FilterType;
use image::DynamicImage;

const INPUT_SIZE: u32 = 32;
const BLOCK_SIZE: usize = 8;

/// Compute the 64-bit perceptual hash of an image.
pub fn perception_hash(img: &DynamicImage) -> u64 {
    let gray = img.to_luma8();
    let small = image::imageops::resize(&gray, INPUT_SIZE, INPUT_SIZE, FilterType::Triangle);

    let mut pixels = [[0f64; INPUT_SIZE as usize]; INPUT_SIZE as usize];
    for (x, y, pixel) in small.enumerate_pixels() {
        pixels[y as usize][x as usize] = f64::from(pixel[0]);
    }

    let freq = dct_2d(&pixels);

    let mut block = [0f64; BLOCK_SIZE * BLOCK_SIZE];
    for y in 0..BLOCK_SIZE {
        for x in 0..BLOCK_SIZE {
            block[y * BLOCK_SIZE + x] = freq[y][x];
        }
    }

    let median = median_without_dc(&block);

    let mut hash = 0u64;
    for (i, &coeff) in block.iter().enumerate() {
        if coeff > median {
            hash |= 1u64 << (63 - i);
        }
    }
    hash
}

/// Median of the 8x8 coefficient block, excluding the DC term at index 0.
fn median_without_dc(block: &[f64; BLOCK_SIZE * BLOCK_SIZE]) -> f64 {
    let mut ac: Vec<f64> = block[1..].to_vec();
    ac.sort_by(|a, b| a.partial_cmp(b).expect("DCT coefficients are finite"));
    let mid = ac.len() / 2;
    if ac.len() % 2 == 0 {
        (ac[mid - 1] + ac[mid]) / 2.0
    } else {
        ac[mid]
    }
}

/// Separable 2D DCT-II: rows first, then columns.
fn dct_2d(
    input: &[[f64; INPUT_SIZE as usize]; INPUT_SIZE as usize],
) -> [[f64; INPUT_SIZE as usize]; INPUT_SIZE as usize] {
    let n = INPUT_SIZE as usize;
    let mut rows = [[0f64; INPUT_SIZE as usize]; INPUT_SIZE as usize];
    for (y, row) in input.iter().enumerate() {
        rows[y] = dct_1d(row);
    }

    let mut out = [[0f64; INPUT_SIZE as usize]; INPUT_SIZE as usize];
    for x in 0..n {
        let mut column = [0f64; INPUT_SIZE as usize];
        for y in 0..n {
            column[y] = rows[y][x];
        }
        let transformed = dct_1d(&column);
        for y in 0..n {
            out[y][x] = transformed[y];
        }
    }
    out
}

fn dct_1d(input: &[f64; INPUT_SIZE as usize]) -> [f64; INPUT_SIZE as usize] {
    let n = INPUT_SIZE as usize;
    let mut out = [0f64; INPUT_SIZE as usize];
    for (k, slot) in out.iter_mut().enumerate() {
        let mut sum = 0.0;
        for (i, &value) in input.iter().enumerate() {
            sum += value * (std::f64::consts::PI / n as f64 * (i as f64 + 0.5) * k as f64).cos();
        }
        *slot = sum;
    }
    out
}
