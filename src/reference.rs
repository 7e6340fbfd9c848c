// reference.rs — CPU reference statistics.
//
// Straightforward sequential implementations of sum, average and population
// covariance over a stream of 4-vectors. These are the authoritative answers
// the GPU engine is validated against; nothing on the hot path calls them.
//
// Floating-point addition is not associative, so the GPU result (tile-local
// order, then row sums, then a column sum) differs from a pixel-scan sum by
// rounding. Comparisons go through `within_tolerance`. `two_pass_sum`
// reproduces the reduction engine's row-then-column order on the CPU for
// cases where the exact order matters.

use crate::convert::SampleEncoding;
use crate::image::{Image, Pixel};
use crate::math::{Mat4, Vec4};

/// Relative tolerance used when comparing GPU and CPU statistics.
pub const RELATIVE_TOLERANCE: f32 = 1e-2;
/// Absolute floor below which differences are ignored.
pub const ABSOLUTE_TOLERANCE: f32 = 1e-6;

/// Sequential sum of all samples.
pub fn total(iter: impl IntoIterator<Item = Vec4>) -> Vec4 {
    let mut total = Vec4::ZERO;
    for v in iter {
        total += v;
    }
    total
}

/// Arithmetic mean per channel. Returns `None` for an empty stream.
pub fn average(iter: impl IntoIterator<Item = Vec4>) -> Option<Vec4> {
    let mut count = 0usize;
    let mut total = Vec4::ZERO;
    for v in iter {
        count += 1;
        total += v;
    }
    (count > 0).then(|| total / count as f32)
}

/// Population covariance `E[(x-μ)(x-μ)ᵀ]` around a given mean.
///
/// Returns `None` for an empty stream.
pub fn covariance(iter: impl IntoIterator<Item = Vec4>, average: Vec4) -> Option<Mat4> {
    let mut count = 0usize;
    let mut total = Mat4::ZERO;
    for v in iter {
        count += 1;
        total += (v - average).outer();
    }
    (count > 0).then(|| total / count as f32)
}

/// All pixels of `img` widened to samples and decoded with `encoding`,
/// in row-major order.
pub fn samples<'a, T: Pixel>(
    img: &'a Image<T>,
    encoding: SampleEncoding,
) -> impl Iterator<Item = Vec4> + 'a {
    img.samples().map(move |v| encoding.decode(v))
}

/// Sum a row-major `width × height` grid the way the reduction engine does:
/// each row summed left to right, then the row sums top to bottom.
///
/// # Panics
/// Panics if `grid` holds fewer than `width * height` elements.
pub fn two_pass_sum(grid: &[Vec4], width: usize, height: usize) -> Vec4 {
    assert!(
        grid.len() >= width * height,
        "grid of {} elements is smaller than {width}×{height}",
        grid.len()
    );
    let mut column = Vec4::ZERO;
    for y in 0..height {
        let mut row = Vec4::ZERO;
        for v in &grid[y * width..(y + 1) * width] {
            row += *v;
        }
        column += row;
    }
    column
}

/// `|a - b| <= ABSOLUTE_TOLERANCE + RELATIVE_TOLERANCE * max(|a|, |b|)`.
#[inline]
pub fn within_tolerance(a: f32, b: f32) -> bool {
    (a - b).abs() <= ABSOLUTE_TOLERANCE + RELATIVE_TOLERANCE * a.abs().max(b.abs())
}

pub fn vec4_within_tolerance(a: Vec4, b: Vec4) -> bool {
    (0..4).all(|i| within_tolerance(a[i], b[i]))
}

pub fn mat4_within_tolerance(a: &Mat4, b: &Mat4) -> bool {
    (0..4).all(|c| vec4_within_tolerance(a.cols[c], b.cols[c]))
}
