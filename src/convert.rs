// convert.rs — Sample encodings and conversions into `Image<T>`.
//
// Two concerns live here:
//
// 1. The colour-space policy. Stored pixels may be sRGB-encoded; statistics
//    are usually wanted in linear light. The caller picks a
//    `SampleEncoding` and both the GPU sampling kernels and the CPU oracle
//    apply the same transfer function to the rgb channels. Alpha is always
//    linear and passes through unchanged.
//
// 2. Adapters from the `image` crate's buffers into our `Image<T>`.
//
// The GPU side mirrors `srgb_to_linear` in `shaders/statistics.wgsl`. Keep
// the two in sync: a mismatch shows up as an oracle disagreement well
// outside tolerance.

use crate::image::Image;
use crate::math::Vec4;

/// How stored sample values are encoded.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum SampleEncoding {
    /// Values are already linear; accumulate as stored.
    #[default]
    Linear,
    /// RGB channels are sRGB-encoded and are linearised before accumulation.
    Srgb,
}

impl SampleEncoding {
    /// Flag value handed to the sampling kernels.
    pub(crate) fn kernel_flag(self) -> u32 {
        match self {
            SampleEncoding::Linear => 0,
            SampleEncoding::Srgb => 1,
        }
    }

    /// Decode one sample into linear space according to this encoding.
    #[inline]
    pub fn decode(self, v: Vec4) -> Vec4 {
        match self {
            SampleEncoding::Linear => v,
            SampleEncoding::Srgb => Vec4::new(
                srgb_to_linear(v.x),
                srgb_to_linear(v.y),
                srgb_to_linear(v.z),
                v.w,
            ),
        }
    }
}

/// IEC 61966-2-1 sRGB electro-optical transfer function.
#[inline]
pub fn srgb_to_linear(c: f32) -> f32 {
    if c <= 0.04045 {
        c / 12.92
    } else {
        ((c + 0.055) / 1.055).powf(2.4)
    }
}

/// Inverse of [`srgb_to_linear`].
#[inline]
pub fn linear_to_srgb(c: f32) -> f32 {
    if c <= 0.0031308 {
        c * 12.92
    } else {
        1.055 * c.powf(1.0 / 2.4) - 0.055
    }
}

// ---------------------------------------------------------------------------
// `image` crate adapters
// ---------------------------------------------------------------------------

/// Copy an 8-bit RGBA buffer into an `Image<[u8; 4]>`.
pub fn from_rgba8(src: &image::RgbaImage) -> Image<[u8; 4]> {
    let (w, h) = src.dimensions();
    let data = src.pixels().map(|p| p.0).collect();
    Image::from_vec(w as usize, h as usize, data)
}

/// Copy a float RGBA buffer into an `Image<[f32; 4]>`.
pub fn from_rgba32f(src: &image::Rgba32FImage) -> Image<[f32; 4]> {
    let (w, h) = src.dimensions();
    let data = src.pixels().map(|p| p.0).collect();
    Image::from_vec(w as usize, h as usize, data)
}

/// Convert any decoded image into a float RGBA `Image`.
///
/// `image` normalises integer formats to [0, 1] during the conversion, so
/// the result matches what `[u8; 4]::to_vec4` would produce for 8-bit data.
pub fn from_dynamic(src: &image::DynamicImage) -> Image<[f32; 4]> {
    from_rgba32f(&src.to_rgba32f())
}

/// Convert a grayscale `Image<u8>` into RGBA with opaque alpha.
pub fn gray_to_rgba8(src: &Image<u8>) -> Image<[u8; 4]> {
    Image::from_fn(src.width(), src.height(), |x, y| {
        let v = src.get(x, y);
        [v, v, v, 255]
    })
}
