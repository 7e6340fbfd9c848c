// tests/common/mod.rs — Shared helpers for the GPU integration tests.
//
// GPU tests acquire their device through `gpu()`, which returns `None` (and
// says so on stderr) when the machine has no usable adapter. Each test
// returns early in that case, so the suite still passes on CI runners
// without a GPU.

#![allow(dead_code)]

use tilestat::gpu::GpuDevice;
use tilestat::image::Image;
use tilestat::math::Vec4;

pub fn gpu() -> Option<GpuDevice> {
    let _ = env_logger::builder().is_test(true).try_init();
    match GpuDevice::new() {
        Ok(gpu) => Some(gpu),
        Err(e) => {
            eprintln!("skipping GPU test: {e}");
            None
        }
    }
}

/// Deterministic pseudo-random values in [0, 1) (64-bit LCG).
pub struct Lcg(u64);

impl Lcg {
    pub fn new(seed: u64) -> Self {
        Lcg(seed)
    }

    pub fn next_f32(&mut self) -> f32 {
        self.0 = self.0.wrapping_mul(6364136223846793005).wrapping_add(1442695040888963407);
        (self.0 >> 40) as f32 / (1u64 << 24) as f32
    }

    pub fn next_vec4(&mut self) -> Vec4 {
        Vec4::new(self.next_f32(), self.next_f32(), self.next_f32(), self.next_f32())
    }
}

/// An RGBA float image with correlated channels: green follows red, blue is
/// independent noise, alpha is a horizontal ramp.
pub fn noise_image(width: usize, height: usize, seed: u64) -> Image<[f32; 4]> {
    let mut rng = Lcg::new(seed);
    Image::from_fn(width, height, |x, _| {
        let r = rng.next_f32();
        let g = 0.5 * r + 0.5 * rng.next_f32();
        let b = rng.next_f32();
        let a = x as f32 / width as f32;
        [r, g, b, a]
    })
}

/// An 8-bit RGBA image in [0, 255].
pub fn noise_image_u8(width: usize, height: usize, seed: u64) -> Image<[u8; 4]> {
    let mut rng = Lcg::new(seed);
    Image::from_fn(width, height, |_, _| {
        let mut px = [0u8; 4];
        for c in px.iter_mut() {
            *c = (rng.next_f32() * 256.0) as u8;
        }
        px
    })
}
