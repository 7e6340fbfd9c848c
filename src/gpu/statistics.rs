// gpu/statistics.rs — Sum, average and covariance of GPU images.
//
// Every statistic is one sampling dispatch followed by the two-pass
// reduction:
//
//   GpuImage W×H ──Sum/Covariance (16×16 tiles)──▶ tile grid ⌈W/16⌉×⌈H/16⌉
//                ──GpuReduction──▶ 1 element
//                ──Multiply4/4x4 by 1/N (mean passes only)──▶ result
//
// The `_into` forms leave the result on the device, so the average can feed
// the covariance pass without a host round-trip. The value forms allocate a
// one-element buffer, run the `_into` form and read it back.
//
// All dispatches go into the one queue of the `GpuDevice`; each pass sees the
// previous pass's writes through queue ordering alone.
//
// COVARIANCE NORMALISATION
// ────────────────────────
// The `covariance` kernel accumulates raw outer products (s-μ)(s-μ)ᵀ. The
// division by N is an explicit `multiply4x4` by `1/N` issued here, giving the
// population covariance. Nothing in the kernel divides.

use log::debug;

use crate::gpu::buffer::{BindableBuffer, DeviceBuffer};
use crate::gpu::device::{tile_grid, GpuDevice, TILE_SIZE};
use crate::gpu::errors::{GpuError, GpuResult};
use crate::gpu::image::GpuImage;
use crate::gpu::kernels::{ComputeProgram, Dispatch, Kernel, Program, Slot};
use crate::gpu::reduction::{check_grid, check_output, GpuReduction, GridElement};
use crate::math::{Mat4, Vec4};

/// Statistics engine: the compiled `statistics` program plus a reduction
/// engine. Build once, reuse for every image.
pub struct GpuStatistics {
    reduction: GpuReduction,
    program: ComputeProgram,
}

impl GpuStatistics {
    /// Compile both programs. Fails with `ShaderUnavailable` if any kernel is
    /// missing or invalid.
    pub fn new(gpu: &GpuDevice) -> GpuResult<Self> {
        Ok(GpuStatistics {
            reduction: GpuReduction::new(gpu)?,
            program: ComputeProgram::load(gpu, Program::Statistics)?,
        })
    }

    /// The reduction engine used for the tile grids.
    pub fn reduction(&self) -> &GpuReduction {
        &self.reduction
    }

    // -----------------------------------------------------------------------
    // Sum
    // -----------------------------------------------------------------------

    /// Per-channel sum of all pixel samples.
    pub fn sum(&self, gpu: &GpuDevice, image: &GpuImage) -> GpuResult<Vec4> {
        let out = DeviceBuffer::with_elements::<Vec4>(gpu, 1, "sum")?;
        self.sum_into(gpu, image, &out)?;
        read_one(gpu, &out)
    }

    /// Per-channel sum of all pixel samples, written to `output[0]`.
    pub fn sum_into(&self, gpu: &GpuDevice, image: &GpuImage, output: &dyn BindableBuffer) -> GpuResult<()> {
        check_output::<Vec4>(output.count(), output.stride())?;

        let (tx, ty) = tile_grid(image.width, image.height);
        let tiles = DeviceBuffer::with_elements::<Vec4>(gpu, (tx * ty) as usize, "sum tiles")?;

        self.program
            .dispatch(Kernel::Sum)?
            .set_input_size(image.width, image.height)
            .set_output_size(tx, ty)
            .set_flags([image.encoding.kernel_flag(), 0, 0, 0])
            .bind_image(image)
            .bind_buffer(Slot::Output4, &tiles)?
            .submit(gpu, [tx, ty, 1])?;

        self.reduction.accumulate4_into(gpu, &tiles, tx, ty, output)?;
        debug!("sum of {}×{} image over {tx}×{ty} tiles of {TILE_SIZE}²", image.width, image.height);
        Ok(())
    }

    // -----------------------------------------------------------------------
    // Average
    // -----------------------------------------------------------------------

    /// Per-channel arithmetic mean of all pixel samples.
    ///
    /// Bit-identical to `sum(image) * image.inverse_pixel_count()`.
    pub fn average(&self, gpu: &GpuDevice, image: &GpuImage) -> GpuResult<Vec4> {
        let out = DeviceBuffer::with_elements::<Vec4>(gpu, 1, "average")?;
        self.average_into(gpu, image, &out)?;
        read_one(gpu, &out)
    }

    /// Per-channel mean, written to `output[0]`.
    pub fn average_into(
        &self,
        gpu: &GpuDevice,
        image: &GpuImage,
        output: &dyn BindableBuffer,
    ) -> GpuResult<()> {
        check_output::<Vec4>(output.count(), output.stride())?;

        let sum = DeviceBuffer::with_elements::<Vec4>(gpu, 1, "average sum")?;
        self.sum_into(gpu, image, &sum)?;
        self.multiply4(gpu, &sum, Vec4::splat(image.inverse_pixel_count()), output)
    }

    // -----------------------------------------------------------------------
    // Covariance
    // -----------------------------------------------------------------------

    /// Population covariance (÷N) of the pixel samples.
    pub fn covariance(&self, gpu: &GpuDevice, image: &GpuImage) -> GpuResult<Mat4> {
        let out = DeviceBuffer::with_elements::<Mat4>(gpu, 1, "covariance")?;
        self.covariance_into(gpu, image, &out)?;
        read_one(gpu, &out)
    }

    /// Population covariance, written to `output[0]`. Computes the average
    /// on the device first.
    pub fn covariance_into(
        &self,
        gpu: &GpuDevice,
        image: &GpuImage,
        output: &dyn BindableBuffer,
    ) -> GpuResult<()> {
        check_output::<Mat4>(output.count(), output.stride())?;

        let average = DeviceBuffer::with_elements::<Vec4>(gpu, 1, "covariance average")?;
        self.average_into(gpu, image, &average)?;
        self.covariance_with_average_into(gpu, image, &average, output)
    }

    /// Population covariance about a caller-supplied mean in `average[0]`.
    ///
    /// `average` is typically the output of [`average_into`](Self::average_into)
    /// on the same image, but any vec4 buffer works.
    pub fn covariance_with_average_into(
        &self,
        gpu: &GpuDevice,
        image: &GpuImage,
        average: &dyn BindableBuffer,
        output: &dyn BindableBuffer,
    ) -> GpuResult<()> {
        check_output::<Vec4>(average.count(), average.stride())?;
        check_output::<Mat4>(output.count(), output.stride())?;

        let (tx, ty) = tile_grid(image.width, image.height);
        let tiles = DeviceBuffer::with_elements::<Mat4>(gpu, (tx * ty) as usize, "covariance tiles")?;

        self.program
            .dispatch(Kernel::Covariance)?
            .set_input_size(image.width, image.height)
            .set_output_size(tx, ty)
            .set_flags([image.encoding.kernel_flag(), 0, 0, 0])
            .bind_image(image)
            .bind_buffer(Slot::ParamBuffer4, average)?
            .bind_buffer(Slot::Output4x4, &tiles)?
            .submit(gpu, [tx, ty, 1])?;

        let raw = DeviceBuffer::with_elements::<Mat4>(gpu, 1, "covariance raw")?;
        self.reduction.accumulate4x4_into(gpu, &tiles, tx, ty, &raw)?;
        self.multiply4x4(gpu, &raw, Mat4::splat(image.inverse_pixel_count()), output)
    }

    // -----------------------------------------------------------------------
    // Scaling
    // -----------------------------------------------------------------------

    /// `output[i] = input[i] ∘ factor` for every element of `input`.
    ///
    /// `output` must hold at least as many elements as `input` and must be a
    /// different buffer.
    pub fn multiply4(
        &self,
        gpu: &GpuDevice,
        input: &dyn BindableBuffer,
        factor: Vec4,
        output: &dyn BindableBuffer,
    ) -> GpuResult<()> {
        self.scale::<Vec4>(gpu, input, output, |d| d.set_vector(factor))
    }

    /// Elementwise (Hadamard) scaling of every matrix in `input`.
    pub fn multiply4x4(
        &self,
        gpu: &GpuDevice,
        input: &dyn BindableBuffer,
        factor: Mat4,
        output: &dyn BindableBuffer,
    ) -> GpuResult<()> {
        self.scale::<Mat4>(gpu, input, output, |d| d.set_matrix(factor))
    }

    fn scale<'a, E: GridElement>(
        &'a self,
        gpu: &GpuDevice,
        input: &'a dyn BindableBuffer,
        output: &'a dyn BindableBuffer,
        set_factor: impl FnOnce(Dispatch<'a>) -> Dispatch<'a>,
    ) -> GpuResult<()> {
        let count = input.count();
        check_grid::<E>(count as u32, 1, output.count(), output.stride())?;
        if std::ptr::eq(input.device_buffer()?, output.device_buffer()?) {
            return Err(GpuError::AliasedBuffers { kernel: E::SCALE_KERNEL.name() });
        }

        let (inner, outer) = gpu.spread_groups((count as u32).div_ceil(TILE_SIZE));
        let dispatch = self
            .program
            .dispatch(E::SCALE_KERNEL)?
            .set_input_size(count as u32, 1)
            .set_output_size(count as u32, 1)
            .bind_buffer(E::INPUT_SLOT, input)?
            .bind_buffer(E::OUTPUT_SLOT, output)?;
        set_factor(dispatch).submit(gpu, [inner, outer, 1])
    }
}

/// Read element 0 of a result buffer.
fn read_one<E: GridElement>(gpu: &GpuDevice, buffer: &DeviceBuffer) -> GpuResult<E> {
    Ok(buffer.read_as::<E>(gpu)?.first().copied().unwrap_or_default())
}
