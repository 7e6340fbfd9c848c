// math.rs — Host-side 4-vector and 4×4 matrix matching the WGSL layouts.
//
// Both types are `#[repr(C)]` + `Pod` so that slices of them can be written
// to and read back from device buffers with `bytemuck::cast_slice`:
//
//   Vec4 ↔ vec4<f32>      16 bytes
//   Mat4 ↔ mat4x4<f32>    64 bytes, column-major (cols[c][r])
//
// Only the arithmetic the statistics pipeline needs is provided. This is not
// a linear algebra library.

use std::fmt;
use std::ops::{Add, AddAssign, Div, Index, IndexMut, Mul, Sub};

// ---------------------------------------------------------------------------
// Vec4
// ---------------------------------------------------------------------------

/// A 4-component `f32` vector. One pixel sample (r, g, b, a).
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Vec4 {
    pub x: f32,
    pub y: f32,
    pub z: f32,
    pub w: f32,
}

impl Vec4 {
    pub const ZERO: Vec4 = Vec4::new(0.0, 0.0, 0.0, 0.0);
    pub const ONE: Vec4 = Vec4::new(1.0, 1.0, 1.0, 1.0);

    /// Size in bytes of one element in a device buffer.
    pub const STRIDE: usize = std::mem::size_of::<Vec4>();

    #[inline]
    pub const fn new(x: f32, y: f32, z: f32, w: f32) -> Self {
        Vec4 { x, y, z, w }
    }

    #[inline]
    pub const fn splat(v: f32) -> Self {
        Vec4::new(v, v, v, v)
    }

    #[inline]
    pub fn from_array(a: [f32; 4]) -> Self {
        Vec4::new(a[0], a[1], a[2], a[3])
    }

    #[inline]
    pub fn to_array(self) -> [f32; 4] {
        [self.x, self.y, self.z, self.w]
    }

    /// Component-wise product.
    #[inline]
    pub fn mul_elem(self, rhs: Vec4) -> Vec4 {
        Vec4::new(self.x * rhs.x, self.y * rhs.y, self.z * rhs.z, self.w * rhs.w)
    }

    /// Outer product `self · selfᵀ`.
    ///
    /// Column `c` is `self * self[c]`, the same construction the covariance
    /// kernel uses, so element `(r, c) = self[r] * self[c]`.
    pub fn outer(self) -> Mat4 {
        Mat4::from_cols(self * self.x, self * self.y, self * self.z, self * self.w)
    }
}

impl Index<usize> for Vec4 {
    type Output = f32;

    #[inline]
    fn index(&self, i: usize) -> &f32 {
        match i {
            0 => &self.x,
            1 => &self.y,
            2 => &self.z,
            3 => &self.w,
            _ => panic!("Vec4 index {i} out of range"),
        }
    }
}

impl IndexMut<usize> for Vec4 {
    #[inline]
    fn index_mut(&mut self, i: usize) -> &mut f32 {
        match i {
            0 => &mut self.x,
            1 => &mut self.y,
            2 => &mut self.z,
            3 => &mut self.w,
            _ => panic!("Vec4 index {i} out of range"),
        }
    }
}

impl Add for Vec4 {
    type Output = Vec4;

    #[inline]
    fn add(self, rhs: Vec4) -> Vec4 {
        Vec4::new(self.x + rhs.x, self.y + rhs.y, self.z + rhs.z, self.w + rhs.w)
    }
}

impl AddAssign for Vec4 {
    #[inline]
    fn add_assign(&mut self, rhs: Vec4) {
        *self = *self + rhs;
    }
}

impl Sub for Vec4 {
    type Output = Vec4;

    #[inline]
    fn sub(self, rhs: Vec4) -> Vec4 {
        Vec4::new(self.x - rhs.x, self.y - rhs.y, self.z - rhs.z, self.w - rhs.w)
    }
}

impl Mul<f32> for Vec4 {
    type Output = Vec4;

    #[inline]
    fn mul(self, s: f32) -> Vec4 {
        Vec4::new(self.x * s, self.y * s, self.z * s, self.w * s)
    }
}

impl Div<f32> for Vec4 {
    type Output = Vec4;

    #[inline]
    fn div(self, s: f32) -> Vec4 {
        Vec4::new(self.x / s, self.y / s, self.z / s, self.w / s)
    }
}

impl fmt::Display for Vec4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "({:.6}, {:.6}, {:.6}, {:.6})", self.x, self.y, self.z, self.w)
    }
}

// ---------------------------------------------------------------------------
// Mat4
// ---------------------------------------------------------------------------

/// A 4×4 `f32` matrix stored column-major, like WGSL `mat4x4<f32>`.
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct Mat4 {
    pub cols: [Vec4; 4],
}

impl Mat4 {
    pub const ZERO: Mat4 = Mat4 { cols: [Vec4::ZERO; 4] };

    /// Size in bytes of one element in a device buffer.
    pub const STRIDE: usize = std::mem::size_of::<Mat4>();

    /// Matrix from its four columns.
    pub fn from_cols(c0: Vec4, c1: Vec4, c2: Vec4, c3: Vec4) -> Self {
        Mat4 { cols: [c0, c1, c2, c3] }
    }

    /// Every element set to `v`. Used as the elementwise scale matrix.
    pub fn splat(v: f32) -> Self {
        Mat4 { cols: [Vec4::splat(v); 4] }
    }

    /// Element at row `r`, column `c`.
    #[inline]
    pub fn get(&self, r: usize, c: usize) -> f32 {
        self.cols[c][r]
    }

    #[inline]
    pub fn set(&mut self, r: usize, c: usize, v: f32) {
        self.cols[c][r] = v;
    }

    /// Elementwise (Hadamard) product.
    pub fn mul_elem(&self, rhs: &Mat4) -> Mat4 {
        Mat4 {
            cols: [
                self.cols[0].mul_elem(rhs.cols[0]),
                self.cols[1].mul_elem(rhs.cols[1]),
                self.cols[2].mul_elem(rhs.cols[2]),
                self.cols[3].mul_elem(rhs.cols[3]),
            ],
        }
    }

    pub fn transpose(&self) -> Mat4 {
        let mut t = Mat4::ZERO;
        for r in 0..4 {
            for c in 0..4 {
                t.set(c, r, self.get(r, c));
            }
        }
        t
    }

    /// Exact symmetry check, `M[r,c] == M[c,r]` bit for bit.
    pub fn is_symmetric(&self) -> bool {
        (0..4).all(|r| (0..4).all(|c| self.get(r, c) == self.get(c, r)))
    }
}

impl Add for Mat4 {
    type Output = Mat4;

    fn add(self, rhs: Mat4) -> Mat4 {
        Mat4 {
            cols: [
                self.cols[0] + rhs.cols[0],
                self.cols[1] + rhs.cols[1],
                self.cols[2] + rhs.cols[2],
                self.cols[3] + rhs.cols[3],
            ],
        }
    }
}

impl AddAssign for Mat4 {
    fn add_assign(&mut self, rhs: Mat4) {
        *self = *self + rhs;
    }
}

impl Mul<f32> for Mat4 {
    type Output = Mat4;

    fn mul(self, s: f32) -> Mat4 {
        Mat4 { cols: self.cols.map(|c| c * s) }
    }
}

impl Div<f32> for Mat4 {
    type Output = Mat4;

    fn div(self, s: f32) -> Mat4 {
        Mat4 { cols: self.cols.map(|c| c / s) }
    }
}

impl fmt::Display for Mat4 {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        for r in 0..4 {
            writeln!(
                f,
                "[{:>12.6} {:>12.6} {:>12.6} {:>12.6}]",
                self.get(r, 0),
                self.get(r, 1),
                self.get(r, 2),
                self.get(r, 3)
            )?;
        }
        Ok(())
    }
}
