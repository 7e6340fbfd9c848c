// gpu/image.rs — Images resident on the GPU as sampling-pass input.
//
// RESPONSIBILITIES
// ─────────────────
// 1. `GpuImage` — an RGBA frame resident on the GPU as an `Rgba32Float`
//    texture, plus the `SampleEncoding` the sampling kernels should apply.
//
// 2. `GpuImage::upload()` — widen every pixel to a `Vec4` sample and copy it
//    to the texture via a staging buffer, handling stride compaction.
//
// 3. `readback()` — texture → host copy, used in tests.
//
// TEXTURE FORMAT
// ──────────────
// Every host pixel format (u8 gray, RGBA8, RGBA f32) is widened to
// `Rgba32Float`. The sampling kernels read texels with `textureLoad` only,
// so the texture is bound as non-filterable. Samples are
// uploaded *encoded*; linearisation happens in the kernel, driven by the
// encoding flag, and the CPU oracle applies the identical transform.
//
// THE STRIDE-COMPACTION PROBLEM
// ──────────────────────────────
// `copy_buffer_to_texture` needs `bytes_per_row` to be a multiple of 256.
// A 16-byte texel row of width W is `16·W` bytes, so rows are written into a
// staging buffer at `align_to(16·W, 256)` pitch; host stride padding is
// skipped while copying.

use log::debug;
use wgpu::util::DeviceExt;

use crate::convert::SampleEncoding;
use crate::gpu::device::GpuDevice;
use crate::gpu::errors::{GpuError, GpuResult};
use crate::image::{Image, Pixel};
use crate::math::Vec4;

/// wgpu requires buffer→texture row pitches to be a multiple of this.
const COPY_ALIGNMENT: u32 = wgpu::COPY_BYTES_PER_ROW_ALIGNMENT;

/// Bytes per `Rgba32Float` texel.
const TEXEL_BYTES: u32 = Vec4::STRIDE as u32;

/// A 4-channel image resident on the GPU.
///
/// Owns its texture; dropping it releases the GPU memory.
pub struct GpuImage {
    pub texture: wgpu::Texture,
    /// Full-texture view bound to the sampling kernels.
    pub view: wgpu::TextureView,
    pub width: u32,
    pub height: u32,
    /// How the stored samples are encoded.
    pub encoding: SampleEncoding,
}

impl GpuImage {
    /// Upload a host image.
    ///
    /// The copy is queued, not awaited. Dispatches submitted afterwards on
    /// the same queue see the pixels.
    ///
    /// # Errors
    /// `EmptyImage` for a zero-sized image; `Allocation` if the texture
    /// exceeds the device's limits or memory.
    pub fn upload<T: Pixel>(gpu: &GpuDevice, src: &Image<T>, encoding: SampleEncoding) -> GpuResult<Self> {
        let width = src.width() as u32;
        let height = src.height() as u32;
        if width == 0 || height == 0 {
            return Err(GpuError::EmptyImage { width, height });
        }

        let extent = wgpu::Extent3d { width, height, depth_or_array_layers: 1 };
        let bytes = width as u64 * height as u64 * TEXEL_BYTES as u64;

        gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let texture = gpu.device.create_texture(&wgpu::TextureDescriptor {
            label: Some("GpuImage"),
            size: extent,
            mip_level_count: 1,
            sample_count: 1,
            dimension: wgpu::TextureDimension::D2,
            format: wgpu::TextureFormat::Rgba32Float,
            usage: wgpu::TextureUsages::TEXTURE_BINDING
                | wgpu::TextureUsages::COPY_DST
                | wgpu::TextureUsages::COPY_SRC,
            view_formats: &[],
        });
        let validation = pollster::block_on(gpu.device.pop_error_scope());
        let oom = pollster::block_on(gpu.device.pop_error_scope());
        if let Some(err) = oom.or(validation) {
            texture.destroy();
            return Err(GpuError::Allocation { bytes, message: err.to_string() });
        }

        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());

        let staging = compact_rows(src, align_to(width * TEXEL_BYTES, COPY_ALIGNMENT));
        let staging_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("GpuImage::staging"),
            contents: &staging,
            usage: wgpu::BufferUsages::COPY_SRC,
        });

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("GpuImage::upload"),
        });
        encoder.copy_buffer_to_texture(
            wgpu::ImageCopyBuffer {
                buffer: &staging_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(align_to(width * TEXEL_BYTES, COPY_ALIGNMENT)),
                    rows_per_image: Some(height),
                },
            },
            wgpu::ImageCopyTexture {
                texture: &texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            extent,
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        debug!("uploaded {width}×{height} image ({encoding:?})");
        Ok(GpuImage { texture, view, width, height, encoding })
    }

    /// Number of pixels, `width * height`.
    pub fn pixel_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }

    /// `1 / (width * height)` as the scale factor the mean passes use.
    pub fn inverse_pixel_count(&self) -> f32 {
        1.0 / self.pixel_count() as f32
    }

    /// Read the texture back as samples in row-major order.
    ///
    /// Blocking; stalls until every queued upload/dispatch has finished.
    /// Tests and debugging only.
    pub fn readback(&self, gpu: &GpuDevice) -> GpuResult<Vec<Vec4>> {
        let pitch = align_to(self.width * TEXEL_BYTES, COPY_ALIGNMENT);
        let readback_buf = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("GpuImage::readback"),
            size: pitch as u64 * self.height as u64,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("GpuImage::readback"),
        });
        encoder.copy_texture_to_buffer(
            wgpu::ImageCopyTexture {
                texture: &self.texture,
                mip_level: 0,
                origin: wgpu::Origin3d::ZERO,
                aspect: wgpu::TextureAspect::All,
            },
            wgpu::ImageCopyBuffer {
                buffer: &readback_buf,
                layout: wgpu::ImageDataLayout {
                    offset: 0,
                    bytes_per_row: Some(pitch),
                    rows_per_image: Some(self.height),
                },
            },
            wgpu::Extent3d {
                width: self.width,
                height: self.height,
                depth_or_array_layers: 1,
            },
        );
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = readback_buf.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |r| {
            let _ = tx.send(r);
        });
        gpu.device.poll(wgpu::Maintain::Wait);
        rx.recv().map_err(|_| GpuError::Readback(wgpu::BufferAsyncError))??;

        let mapped = slice.get_mapped_range();
        let row_bytes = (self.width * TEXEL_BYTES) as usize;
        let mut out = Vec::with_capacity(self.pixel_count() as usize);
        for y in 0..self.height as usize {
            let start = y * pitch as usize;
            out.extend(
                mapped[start..start + row_bytes]
                    .chunks_exact(TEXEL_BYTES as usize)
                    .map(bytemuck::pod_read_unaligned::<Vec4>),
            );
        }
        drop(mapped);
        readback_buf.unmap();
        readback_buf.destroy();
        Ok(out)
    }
}

/// Widen `src` to `Vec4` texels and lay them out at `pitch` bytes per row.
fn compact_rows<T: Pixel>(src: &Image<T>, pitch: u32) -> Vec<u8> {
    let pitch = pitch as usize;
    let mut staging = vec![0u8; pitch * src.height()];
    for y in 0..src.height() {
        let row = &mut staging[y * pitch..];
        for (x, p) in src.row(y).iter().enumerate() {
            let off = x * TEXEL_BYTES as usize;
            row[off..off + TEXEL_BYTES as usize].copy_from_slice(bytemuck::bytes_of(&p.to_vec4()));
        }
    }
    staging
}

/// Round `value` up to the next multiple of `alignment`.
#[inline]
pub(crate) fn align_to(value: u32, alignment: u32) -> u32 {
    value.div_ceil(alignment) * alignment
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
