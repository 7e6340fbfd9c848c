// gpu/reduction.rs — Two-pass reduction of vec4 / mat4 grids.
//
// Folds a row-major W×H grid of elements down to one element in exactly two
// dispatches, whatever the grid size:
//
//   pass 1 (AccumulateX*):  grid W×H  ──row scans──▶  line 1×H
//                           ceil(H/16) groups, one thread per row, spread
//                           over (outer, inner, 1) past the per-axis limit
//   pass 2 (AccumulateY*):  line 1×H  ──column scan──▶ output[0]
//                           groups (1, 1, 1)
//
// The line buffer is the only scratch allocation: O(H), never O(W·H). It is a
// local `DeviceBuffer`, so it is released on the success path and on every
// early `?` return alike.
//
// Accumulation order is fixed (x order within a row, then y order over the
// rows); `reference::two_pass_sum` reproduces it on the CPU.
//
// GRID SIZE vs BUFFER SIZE
// ────────────────────────
// Width and height are logical. The input buffer only has to hold at least
// `W*H` elements, so oversized buffers can be reused across frames.

use bytemuck::Pod;
use log::debug;

use crate::gpu::buffer::{BindableBuffer, DeviceBuffer};
use crate::gpu::device::{GpuDevice, TILE_SIZE};
use crate::gpu::errors::{GpuError, GpuResult};
use crate::gpu::kernels::{ComputeProgram, Kernel, Program, Slot};
use crate::math::{Mat4, Vec4};

// ---------------------------------------------------------------------------
// Element kinds
// ---------------------------------------------------------------------------

/// An element type the reduction kernels can fold.
///
/// Ties a host type to its slots and kernels so `accumulate` is written once.
pub trait GridElement: Pod + Default {
    /// Size of one element in a device buffer.
    const STRIDE: usize;
    const INPUT_SLOT: Slot;
    const OUTPUT_SLOT: Slot;
    const ROW_KERNEL: Kernel;
    const COLUMN_KERNEL: Kernel;
    /// Elementwise scaling kernel for this element kind.
    const SCALE_KERNEL: Kernel;
}

impl GridElement for Vec4 {
    const STRIDE: usize = Vec4::STRIDE;
    const INPUT_SLOT: Slot = Slot::Input4;
    const OUTPUT_SLOT: Slot = Slot::Output4;
    const ROW_KERNEL: Kernel = Kernel::AccumulateX4;
    const COLUMN_KERNEL: Kernel = Kernel::AccumulateY4;
    const SCALE_KERNEL: Kernel = Kernel::Multiply4;
}

impl GridElement for Mat4 {
    const STRIDE: usize = Mat4::STRIDE;
    const INPUT_SLOT: Slot = Slot::Input4x4;
    const OUTPUT_SLOT: Slot = Slot::Output4x4;
    const ROW_KERNEL: Kernel = Kernel::AccumulateX4x4;
    const COLUMN_KERNEL: Kernel = Kernel::AccumulateY4x4;
    const SCALE_KERNEL: Kernel = Kernel::Multiply4x4;
}

// ---------------------------------------------------------------------------
// Argument checks
// ---------------------------------------------------------------------------

/// Check that a `width × height` grid of `E` fits in a buffer of `count`
/// elements of `stride` bytes.
pub(crate) fn check_grid<E: GridElement>(
    width: u32,
    height: u32,
    count: usize,
    stride: usize,
) -> GpuResult<()> {
    if stride != E::STRIDE {
        return Err(GpuError::StrideMismatch { expected: E::STRIDE, actual: stride });
    }
    let required = width as u64 * height as u64;
    if required > count as u64 {
        return Err(GpuError::DimensionMismatch {
            width,
            height,
            required,
            capacity: count as u64,
        });
    }
    Ok(())
}

/// Check that a result buffer has room for one `E`.
pub(crate) fn check_output<E: GridElement>(count: usize, stride: usize) -> GpuResult<()> {
    check_grid::<E>(1, 1, count, stride)
}

// ---------------------------------------------------------------------------
// GpuReduction
// ---------------------------------------------------------------------------

/// Reduction engine. Holds the compiled `reduction` program.
///
/// ```no_run
/// # use tilestat::gpu::{GpuDevice, GpuReduction, DeviceBuffer};
/// # use tilestat::math::Vec4;
/// # fn main() -> tilestat::gpu::GpuResult<()> {
/// let gpu = GpuDevice::new()?;
/// let reduction = GpuReduction::new(&gpu)?;
/// let grid = DeviceBuffer::from_slice(&gpu, &[Vec4::ONE; 6], "grid")?;
/// let total = reduction.accumulate4(&gpu, &grid, 3, 2)?;
/// assert_eq!(total, Vec4::splat(6.0));
/// # Ok(())
/// # }
/// ```
pub struct GpuReduction {
    program: ComputeProgram,
}

impl GpuReduction {
    /// Compile the reduction kernels. Fails with `ShaderUnavailable` if any
    /// of the four is missing or invalid.
    pub fn new(gpu: &GpuDevice) -> GpuResult<Self> {
        Ok(GpuReduction { program: ComputeProgram::load(gpu, Program::Reduction)? })
    }

    /// Reduce a `width × height` grid of `E` and read the result back.
    pub fn accumulate<E: GridElement>(
        &self,
        gpu: &GpuDevice,
        input: &dyn BindableBuffer,
        width: u32,
        height: u32,
    ) -> GpuResult<E> {
        let output = DeviceBuffer::with_elements::<E>(gpu, 1, "reduction result")?;
        self.accumulate_into::<E>(gpu, input, width, height, &output)?;
        let values = output.read_as::<E>(gpu)?;
        Ok(values.first().copied().unwrap_or_default())
    }

    /// Reduce a `width × height` grid of `E` into `output[0]`.
    ///
    /// Nothing is read back; `output` can feed further dispatches directly.
    /// `output` may be the input buffer itself.
    pub fn accumulate_into<E: GridElement>(
        &self,
        gpu: &GpuDevice,
        input: &dyn BindableBuffer,
        width: u32,
        height: u32,
        output: &dyn BindableBuffer,
    ) -> GpuResult<()> {
        check_grid::<E>(width, height, input.count(), input.stride())?;
        check_output::<E>(output.count(), output.stride())?;

        let line = DeviceBuffer::with_elements::<E>(gpu, height as usize, "reduction line")?;
        let (inner, outer) = gpu.spread_groups(height.div_ceil(TILE_SIZE));

        self.program
            .dispatch(E::ROW_KERNEL)?
            .set_input_size(width, height)
            .set_output_size(1, height)
            .bind_buffer(E::INPUT_SLOT, input)?
            .bind_buffer(E::OUTPUT_SLOT, &line)?
            .submit(gpu, [outer, inner, 1])?;

        self.program
            .dispatch(E::COLUMN_KERNEL)?
            .set_input_size(1, height)
            .set_output_size(1, 1)
            .bind_buffer(E::INPUT_SLOT, &line)?
            .bind_buffer(E::OUTPUT_SLOT, output)?
            .submit(gpu, [1, 1, 1])?;

        debug!("reduced {width}×{height} grid of {} B elements", E::STRIDE);
        Ok(())
    }

    /// Sum a vec4 grid.
    pub fn accumulate4(
        &self,
        gpu: &GpuDevice,
        input: &dyn BindableBuffer,
        width: u32,
        height: u32,
    ) -> GpuResult<Vec4> {
        self.accumulate::<Vec4>(gpu, input, width, height)
    }

    pub fn accumulate4_into(
        &self,
        gpu: &GpuDevice,
        input: &dyn BindableBuffer,
        width: u32,
        height: u32,
        output: &dyn BindableBuffer,
    ) -> GpuResult<()> {
        self.accumulate_into::<Vec4>(gpu, input, width, height, output)
    }

    /// Sum a mat4 grid.
    pub fn accumulate4x4(
        &self,
        gpu: &GpuDevice,
        input: &dyn BindableBuffer,
        width: u32,
        height: u32,
    ) -> GpuResult<Mat4> {
        self.accumulate::<Mat4>(gpu, input, width, height)
    }

    pub fn accumulate4x4_into(
        &self,
        gpu: &GpuDevice,
        input: &dyn BindableBuffer,
        width: u32,
        height: u32,
        output: &dyn BindableBuffer,
    ) -> GpuResult<()> {
        self.accumulate_into::<Mat4>(gpu, input, width, height, output)
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
