// gpu/errors.rs — Error type shared by every GPU component.
//
// Nothing here is retriable. Allocation and shader failures are fatal to the
// calling operation; dimension/stride/slot errors are programmer mistakes
// caught before any work reaches the queue. Buffer release never produces an
// error.

use thiserror::Error;

/// Errors from device setup, buffer management and compute dispatch.
#[derive(Error, Debug)]
pub enum GpuError {
    /// No adapter survived selection (see `GpuConfig::allow_software`).
    #[error("no suitable GPU adapter found for backends {backends:?}")]
    NoSuitableAdapter { backends: wgpu::Backends },

    /// wgpu device request failed (driver issue, unsupported limits, ...).
    #[error("device request failed: {0}")]
    DeviceRequest(#[from] wgpu::RequestDeviceError),

    /// The fixed tile does not fit the profile's invocation limit.
    #[error("workgroup size {total} exceeds profile limit of {max} invocations")]
    WorkgroupTooLarge { total: u32, max: u32 },

    /// The device could not satisfy a buffer or texture allocation.
    #[error("device allocation of {bytes} bytes failed: {message}")]
    Allocation { bytes: u64, message: String },

    /// A named program or kernel is missing or failed to compile.
    #[error("compute kernel `{kernel}` of program `{program}` unavailable: {message}")]
    ShaderUnavailable {
        program: String,
        kernel: String,
        message: String,
    },

    /// A logical grid does not fit the buffer backing it.
    #[error("{width}×{height} grid needs {required} elements but buffer holds {capacity}")]
    DimensionMismatch {
        width: u32,
        height: u32,
        required: u64,
        capacity: u64,
    },

    /// A buffer's element stride does not match the element kind in use.
    #[error("buffer stride {actual} bytes does not match element stride {expected} bytes")]
    StrideMismatch { expected: usize, actual: usize },

    /// A host transfer did not cover the buffer exactly.
    #[error("transfer of {actual} bytes does not match buffer size {expected} bytes")]
    TransferSize { expected: u64, actual: u64 },

    /// A released buffer was used.
    #[error("device buffer `{label}` used after release")]
    BufferReleased { label: String },

    /// A kernel was dispatched with one of its slots left unbound.
    #[error("slot `{slot}` of kernel `{kernel}` was not bound before dispatch")]
    UnboundSlot { kernel: &'static str, slot: &'static str },

    /// A resource was bound to a slot the kernel does not have.
    #[error("kernel `{kernel}` has no buffer slot `{slot}`")]
    UnexpectedSlot { kernel: &'static str, slot: &'static str },

    /// A dispatch asked for more workgroups on one axis than the device allows.
    #[error("kernel `{kernel}` dispatch {groups:?} exceeds {max} workgroups per dimension")]
    DispatchTooLarge { kernel: &'static str, groups: [u32; 3], max: u32 },

    /// The same buffer was bound as both input and output of one dispatch.
    #[error("kernel `{kernel}` cannot read and write the same buffer")]
    AliasedBuffers { kernel: &'static str },

    /// Images must have at least one pixel.
    #[error("image has no pixels ({width}×{height})")]
    EmptyImage { width: u32, height: u32 },

    /// Mapping a buffer for readback failed.
    #[error("buffer readback failed: {0}")]
    Readback(#[from] wgpu::BufferAsyncError),
}

pub type GpuResult<T> = std::result::Result<T, GpuError>;
