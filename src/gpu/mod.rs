// gpu/mod.rs — wgpu compute layer.
//
// Layering, leaves first:
//
//   device      adapter selection, limits, tile geometry
//   errors      GpuError / GpuResult
//   buffer      DeviceBuffer: owned storage buffers with blocking readback
//   kernels     program/kernel/slot table, compiled pipelines, Dispatch
//   image       GpuImage: Rgba32Float texture input for the sampling passes
//   reduction   GpuReduction: two-pass row/column fold of vec4/mat4 grids
//   statistics  GpuStatistics: sum, average, covariance of a GpuImage
//
// The CPU oracle in `crate::reference` is the authority every GPU result is
// checked against in tests.

pub mod buffer;
pub mod device;
pub mod errors;
pub mod image;
pub mod kernels;
pub mod reduction;
pub mod statistics;

pub use buffer::{BindableBuffer, DeviceBuffer};
pub use device::{DeviceProfile, GpuConfig, GpuDevice, TILE_SIZE};
pub use errors::{GpuError, GpuResult};
pub use image::GpuImage;
pub use kernels::{ComputeProgram, Kernel, Program, Slot, KERNEL_TABLE_VERSION};
pub use reduction::{GpuReduction, GridElement};
pub use statistics::GpuStatistics;
