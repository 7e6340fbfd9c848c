// gpu/buffer.rs — Owned device allocations.
//
// `DeviceBuffer` is the only way this crate holds a `wgpu::Buffer`. It owns
// the allocation outright (no `Clone`), records the logical shape
// (count × stride) and destroys the GPU memory on `release()` or drop,
// whichever comes first. Every engine allocates its scratch buffers as
// locals, so an early `?` return frees them just like the success path does.
//
// READBACK:
// Storage buffers cannot be mapped directly. `read` copies into a transient
// MAP_READ staging buffer, submits the copy into the same queue as the
// dispatches, and blocks in `device.poll(Wait)` until the map callback
// fires. Because the copy is queued after every earlier dispatch, the bytes
// returned reflect all previously submitted work on this buffer.
//
// COPY ALIGNMENT:
// wgpu only copies whole 4-byte words (`COPY_BUFFER_ALIGNMENT`). Any stride
// is accepted; the allocation is rounded up to the next word, writes are
// zero-padded to it and reads trim the padding again. Callers only ever see
// `count * stride` bytes.
//
// ALLOCATION FAILURES:
// wgpu reports an out-of-memory or over-limit allocation through its error
// scopes rather than the return value of `create_buffer`. We push a scope
// around the allocation and turn anything captured into
// `GpuError::Allocation`.

use log::debug;

use crate::gpu::device::GpuDevice;
use crate::gpu::errors::{GpuError, GpuResult};

/// Anything that can hand a live `wgpu::Buffer` to a bind group.
///
/// Kernels bind through this trait rather than a raw handle, so a released
/// buffer is caught at bind time.
pub trait BindableBuffer {
    /// The underlying device buffer, or `BufferReleased`.
    fn device_buffer(&self) -> GpuResult<&wgpu::Buffer>;
    /// Number of elements.
    fn count(&self) -> usize;
    /// Size of one element in bytes.
    fn stride(&self) -> usize;
}

/// A flat, typed-by-stride block of device memory.
pub struct DeviceBuffer {
    buffer: Option<wgpu::Buffer>,
    count: usize,
    stride: usize,
    label: String,
}

impl DeviceBuffer {
    /// Allocate `count` elements of `stride` bytes, zero-initialised.
    ///
    /// Zero-element requests are rounded up to one element: wgpu refuses to
    /// bind empty storage buffers. `count()` still reports the request.
    pub fn create(gpu: &GpuDevice, count: usize, stride: usize, label: &str) -> GpuResult<Self> {
        let bytes = count
            .max(1)
            .checked_mul(stride)
            .and_then(|b| u64::try_from(b).ok())
            .ok_or_else(|| GpuError::Allocation {
                bytes: u64::MAX,
                message: format!("{count} × {stride} B overflows the address space"),
            })?;
        let bytes = word_aligned(bytes);
        let limits = gpu.limits();
        let max = limits.max_buffer_size.min(limits.max_storage_buffer_binding_size as u64);
        if stride == 0 || bytes > max {
            return Err(GpuError::Allocation {
                bytes,
                message: format!("request exceeds the device limit of {max} bytes"),
            });
        }

        gpu.device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);
        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let buffer = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some(label),
            size: bytes,
            usage: wgpu::BufferUsages::STORAGE
                | wgpu::BufferUsages::COPY_SRC
                | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let validation = pollster::block_on(gpu.device.pop_error_scope());
        let oom = pollster::block_on(gpu.device.pop_error_scope());
        if let Some(err) = oom.or(validation) {
            buffer.destroy();
            return Err(GpuError::Allocation { bytes, message: err.to_string() });
        }

        debug!("allocated `{label}`: {count} × {stride} B");
        Ok(DeviceBuffer {
            buffer: Some(buffer),
            count,
            stride,
            label: label.to_string(),
        })
    }

    /// Allocate `count` zeroed elements of type `T`.
    pub fn with_elements<T: bytemuck::Pod>(gpu: &GpuDevice, count: usize, label: &str) -> GpuResult<Self> {
        Self::create(gpu, count, std::mem::size_of::<T>(), label)
    }

    /// Allocate a buffer holding a copy of `data`.
    pub fn from_slice<T: bytemuck::Pod>(gpu: &GpuDevice, data: &[T], label: &str) -> GpuResult<Self> {
        let buf = Self::with_elements::<T>(gpu, data.len(), label)?;
        if !data.is_empty() {
            buf.write_slice(gpu, data)?;
        }
        Ok(buf)
    }

    #[inline]
    pub fn count(&self) -> usize {
        self.count
    }

    #[inline]
    pub fn stride(&self) -> usize {
        self.stride
    }

    /// Logical size, `count * stride`.
    #[inline]
    pub fn size_bytes(&self) -> u64 {
        self.count as u64 * self.stride as u64
    }

    pub fn label(&self) -> &str {
        &self.label
    }

    pub fn is_released(&self) -> bool {
        self.buffer.is_none()
    }

    fn live(&self) -> GpuResult<&wgpu::Buffer> {
        self.buffer
            .as_ref()
            .ok_or_else(|| GpuError::BufferReleased { label: self.label.clone() })
    }

    // -----------------------------------------------------------------------
    // Transfers
    // -----------------------------------------------------------------------

    /// Queue a host → device copy of exactly `size_bytes()` bytes.
    ///
    /// The write lands before any dispatch submitted afterwards.
    pub fn write(&self, gpu: &GpuDevice, bytes: &[u8]) -> GpuResult<()> {
        let buffer = self.live()?;
        if bytes.len() as u64 != self.size_bytes() {
            return Err(GpuError::TransferSize {
                expected: self.size_bytes(),
                actual: bytes.len() as u64,
            });
        }
        if bytes.is_empty() {
            return Ok(());
        }
        let aligned = word_aligned(self.size_bytes()) as usize;
        if aligned == bytes.len() {
            gpu.queue.write_buffer(buffer, 0, bytes);
        } else {
            let mut padded = bytes.to_vec();
            padded.resize(aligned, 0);
            gpu.queue.write_buffer(buffer, 0, &padded);
        }
        Ok(())
    }

    /// Typed [`write`](Self::write). `T` must match the buffer stride.
    pub fn write_slice<T: bytemuck::Pod>(&self, gpu: &GpuDevice, data: &[T]) -> GpuResult<()> {
        self.check_stride::<T>()?;
        self.write(gpu, bytemuck::cast_slice(data))
    }

    /// Blocking device → host copy of exactly `size_bytes()` bytes.
    pub fn read(&self, gpu: &GpuDevice) -> GpuResult<Vec<u8>> {
        let buffer = self.live()?;
        let size = self.size_bytes();
        if size == 0 {
            return Ok(Vec::new());
        }
        let aligned = word_aligned(size);

        let staging = gpu.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("DeviceBuffer::read staging"),
            size: aligned,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some("DeviceBuffer::read"),
        });
        encoder.copy_buffer_to_buffer(buffer, 0, &staging, 0, aligned);
        gpu.queue.submit(std::iter::once(encoder.finish()));

        let slice = staging.slice(..);
        let (tx, rx) = std::sync::mpsc::channel();
        slice.map_async(wgpu::MapMode::Read, move |result| {
            // The receiver only disappears if this function already returned.
            let _ = tx.send(result);
        });
        gpu.device.poll(wgpu::Maintain::Wait);

        let mapped = rx.recv().map_err(|_| GpuError::Readback(wgpu::BufferAsyncError))?;
        mapped?;

        let mut bytes = slice.get_mapped_range().to_vec();
        bytes.truncate(size as usize);
        staging.unmap();
        staging.destroy();
        Ok(bytes)
    }

    /// Typed [`read`](Self::read). `T` must match the buffer stride.
    pub fn read_as<T: bytemuck::Pod>(&self, gpu: &GpuDevice) -> GpuResult<Vec<T>> {
        self.check_stride::<T>()?;
        let bytes = self.read(gpu)?;
        // The Vec<u8> may not be aligned for T; copy element-wise.
        Ok(bytes
            .chunks_exact(self.stride)
            .map(bytemuck::pod_read_unaligned)
            .collect())
    }

    // -----------------------------------------------------------------------
    // Lifetime
    // -----------------------------------------------------------------------

    /// Free the device memory now. Calling it again is a no-op.
    pub fn release(&mut self) {
        if let Some(buffer) = self.buffer.take() {
            buffer.destroy();
            debug!("released `{}`", self.label);
        }
    }

    fn check_stride<T>(&self) -> GpuResult<()> {
        let expected = std::mem::size_of::<T>();
        if expected != self.stride {
            return Err(GpuError::StrideMismatch { expected, actual: self.stride });
        }
        Ok(())
    }
}

/// Round a byte count up to the copy granularity.
#[inline]
fn word_aligned(bytes: u64) -> u64 {
    bytes.next_multiple_of(wgpu::COPY_BUFFER_ALIGNMENT)
}

impl BindableBuffer for DeviceBuffer {
    fn device_buffer(&self) -> GpuResult<&wgpu::Buffer> {
        self.live()
    }

    fn count(&self) -> usize {
        self.count
    }

    fn stride(&self) -> usize {
        self.stride
    }
}

impl Drop for DeviceBuffer {
    fn drop(&mut self) {
        self.release();
    }
}

impl std::fmt::Debug for DeviceBuffer {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        f.debug_struct("DeviceBuffer")
            .field("label", &self.label)
            .field("count", &self.count)
            .field("stride", &self.stride)
            .field("released", &self.is_released())
            .finish()
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
