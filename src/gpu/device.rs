// gpu/device.rs — wgpu device abstraction.
//
// Responsibilities:
//   - Enumerate adapters for the configured backends and pick real hardware
//     ahead of software renderers.
//   - Expose a `DeviceProfile` for simulating hardware limits on a
//     development machine (e.g. cap invocations to match Raspberry Pi).
//   - Check that the fixed statistics tile (16×16) fits the active profile.
//   - Own the single queue every engine submits into.
//
// ADAPTER SELECTION:
// wgpu's default `request_adapter` uses power preference heuristics that may
// grab llvmpipe on headless boxes. We enumerate explicitly, prefer
// Discrete/Integrated/Virtual/Other, and only accept `DeviceType::Cpu` when
// `GpuConfig::allow_software` is set.
//
// DEVICE LIMITS:
// Under a non-Native profile we request *lower* limits than the hardware
// supports. wgpu validates every dispatch against the requested limits, so a
// tile or buffer that would not fit the target is rejected at dev time.
//
// ORDERING:
// All dispatches go into `queue` in submission order. The engines rely on
// same-queue FIFO ordering for pass-to-pass visibility and never insert
// fences; `DeviceBuffer::read` is the only point where the host waits.

use std::fmt;

use log::{debug, info, warn};

use crate::gpu::errors::{GpuError, GpuResult};

/// Edge length of a compute tile. One workgroup covers `TILE_SIZE²` samples
/// in the sampling passes and `TILE_SIZE` rows in the row-reduction pass.
pub const TILE_SIZE: u32 = 16;

/// Hardware profile controlling device limits.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
pub enum DeviceProfile {
    /// Use the adapter's default wgpu limits. No artificial caps.
    #[default]
    Native,
    /// Simulate Raspberry Pi 4/5 (VideoCore VI/VII, V3DV Vulkan) limits.
    RaspberryPi,
}

impl DeviceProfile {
    /// Parse the value of `TILESTAT_PROFILE`.
    pub fn parse(s: &str) -> Option<Self> {
        match s.trim().to_ascii_lowercase().as_str() {
            "native" => Some(DeviceProfile::Native),
            "rpi" | "raspberrypi" | "raspberry-pi" => Some(DeviceProfile::RaspberryPi),
            _ => None,
        }
    }
}

impl fmt::Display for DeviceProfile {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        match self {
            DeviceProfile::Native => write!(f, "Native"),
            DeviceProfile::RaspberryPi => write!(f, "RaspberryPi (simulated limits)"),
        }
    }
}

// ---------------------------------------------------------------------------
// Configuration
// ---------------------------------------------------------------------------

/// Device selection settings.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GpuConfig {
    pub profile: DeviceProfile,
    /// Backends to enumerate adapters from.
    pub backends: wgpu::Backends,
    /// Accept a CPU/software adapter when no hardware adapter exists.
    pub allow_software: bool,
}

impl Default for GpuConfig {
    fn default() -> Self {
        GpuConfig {
            profile: DeviceProfile::Native,
            backends: wgpu::Backends::PRIMARY,
            allow_software: true,
        }
    }
}

impl GpuConfig {
    /// Defaults overridden from the environment:
    ///
    /// - `TILESTAT_PROFILE` — `native` or `rpi`
    /// - `WGPU_BACKEND` — e.g. `vulkan`, `metal`, `dx12`, `gl`
    /// - `TILESTAT_ALLOW_SOFTWARE` — `0` to reject llvmpipe and friends
    pub fn from_env() -> Self {
        let mut cfg = GpuConfig::default();
        if let Ok(p) = std::env::var("TILESTAT_PROFILE") {
            match DeviceProfile::parse(&p) {
                Some(profile) => cfg.profile = profile,
                None => warn!("ignoring unknown TILESTAT_PROFILE={p:?}"),
            }
        }
        if let Some(backends) = wgpu::util::backend_bits_from_env() {
            cfg.backends = backends;
        }
        if let Ok(v) = std::env::var("TILESTAT_ALLOW_SOFTWARE") {
            cfg.allow_software = !matches!(v.trim(), "0" | "false" | "no");
        }
        cfg
    }
}

/// Cached adapter information for logging and debugging.
#[derive(Debug, Clone)]
pub struct AdapterInfo {
    pub name: String,
    pub vendor: u32,
    pub device: u32,
    pub device_type: wgpu::DeviceType,
    pub backend: wgpu::Backend,
}

impl fmt::Display for AdapterInfo {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(f, "{} ({:?}, {:?})", self.name, self.backend, self.device_type)
    }
}

// ---------------------------------------------------------------------------
// GpuDevice
// ---------------------------------------------------------------------------

/// The GPU context: device, queue, and active profile.
///
/// Hold one `GpuDevice` for the lifetime of the application and pass it by
/// reference to buffers and engines.
///
/// # Field drop order
/// `_instance` is declared last so the `wgpu::Instance` outlives `device`
/// and `queue`; some Vulkan layers crash when the instance is destroyed
/// while device-level objects still exist.
pub struct GpuDevice {
    pub device: wgpu::Device,
    pub queue: wgpu::Queue,
    pub profile: DeviceProfile,
    pub adapter_info: AdapterInfo,
    limits: wgpu::Limits,
    _instance: wgpu::Instance,
}

impl GpuDevice {
    /// Create a device from `GpuConfig::from_env()`.
    pub fn new() -> GpuResult<Self> {
        Self::with_config(GpuConfig::from_env())
    }

    /// Create a device with an explicit configuration.
    pub fn with_config(config: GpuConfig) -> GpuResult<Self> {
        pollster::block_on(Self::init_async(config))
    }

    async fn init_async(config: GpuConfig) -> GpuResult<Self> {
        let flags = if cfg!(debug_assertions) {
            wgpu::InstanceFlags::VALIDATION
        } else {
            wgpu::InstanceFlags::empty()
        };

        let instance = wgpu::Instance::new(wgpu::InstanceDescriptor {
            backends: config.backends,
            flags,
            ..Default::default()
        });

        let adapters = instance.enumerate_adapters(config.backends);
        for a in &adapters {
            let info = a.get_info();
            debug!("adapter: {} ({:?}, {:?})", info.name, info.backend, info.device_type);
        }

        let adapter = select_adapter(adapters, config.allow_software)
            .ok_or(GpuError::NoSuitableAdapter { backends: config.backends })?;

        let raw_info = adapter.get_info();
        if raw_info.device_type == wgpu::DeviceType::Cpu {
            warn!("using software adapter {}; expect slow dispatches", raw_info.name);
        }
        let adapter_info = AdapterInfo {
            name: raw_info.name.clone(),
            vendor: raw_info.vendor,
            device: raw_info.device,
            device_type: raw_info.device_type,
            backend: raw_info.backend,
        };

        // Auto-detect RPi when the caller asked for Native but the adapter is V3D.
        let profile = match config.profile {
            DeviceProfile::Native if raw_info.name.to_ascii_lowercase().contains("v3d") => {
                info!("V3D adapter detected, using RaspberryPi profile");
                DeviceProfile::RaspberryPi
            }
            other => other,
        };

        check_tile_fits(profile)?;
        let limits = limits_for_profile(profile);

        let (device, queue): (wgpu::Device, wgpu::Queue) = adapter
            .request_device(
                &wgpu::DeviceDescriptor {
                    label: Some("tilestat"),
                    required_features: wgpu::Features::empty(),
                    required_limits: limits.clone(),
                    memory_hints: wgpu::MemoryHints::default(),
                },
                None,
            )
            .await?;

        info!("GPU ready: {adapter_info}, profile {profile}");

        Ok(GpuDevice {
            device,
            queue,
            profile,
            adapter_info,
            limits,
            _instance: instance,
        })
    }

    /// Limits the device was created with.
    pub fn limits(&self) -> &wgpu::Limits {
        &self.limits
    }

    /// Spread `groups` workgroups of a one-dimensional pass over two
    /// dispatch axes within this device's per-dimension limit.
    pub fn spread_groups(&self, groups: u32) -> (u32, u32) {
        spread_groups(groups, self.limits.max_compute_workgroups_per_dimension)
    }
}

impl fmt::Display for GpuDevice {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        write!(
            f,
            "GpuDevice {{ adapter: {}, profile: {}, tile: {TILE_SIZE}×{TILE_SIZE} }}",
            self.adapter_info, self.profile
        )
    }
}

/// `ceil(width / TILE_SIZE) × ceil(height / TILE_SIZE)`.
#[inline]
pub fn tile_grid(width: u32, height: u32) -> (u32, u32) {
    (width.div_ceil(TILE_SIZE), height.div_ceil(TILE_SIZE))
}

/// Split `groups` into `(inner, outer)` with `inner * outer >= groups` and
/// both at most `max`. Kernels rebuild the flat group index as
/// `outer_id * inner + inner_id` and guard the overshoot.
pub fn spread_groups(groups: u32, max: u32) -> (u32, u32) {
    let max = max.max(1);
    if groups <= max {
        return (groups, 1);
    }
    let outer = groups.div_ceil(max);
    (groups.div_ceil(outer), outer)
}

/// Tier 1: real hardware (or a VM/translation layer). Tier 2: software, if
/// allowed.
fn select_adapter(adapters: Vec<wgpu::Adapter>, allow_software: bool) -> Option<wgpu::Adapter> {
    let (hardware, software): (Vec<_>, Vec<_>) = adapters
        .into_iter()
        .partition(|a| a.get_info().device_type != wgpu::DeviceType::Cpu);

    hardware
        .into_iter()
        .min_by_key(|a| adapter_rank(a.get_info().device_type))
        .or_else(|| {
            if allow_software {
                software.into_iter().next()
            } else {
                None
            }
        })
}

fn adapter_rank(ty: wgpu::DeviceType) -> u8 {
    match ty {
        wgpu::DeviceType::DiscreteGpu => 0,
        wgpu::DeviceType::IntegratedGpu => 1,
        wgpu::DeviceType::VirtualGpu => 2,
        wgpu::DeviceType::Other => 3,
        wgpu::DeviceType::Cpu => 4,
    }
}

// ============================================================
// Limits helpers
// ============================================================

/// Build wgpu limits for the given profile.
fn limits_for_profile(profile: DeviceProfile) -> wgpu::Limits {
    match profile {
        DeviceProfile::Native => wgpu::Limits::default(),

        DeviceProfile::RaspberryPi => wgpu::Limits {
            max_compute_invocations_per_workgroup: 256,
            max_compute_workgroup_size_x: 256,
            max_compute_workgroup_size_y: 256,
            max_compute_workgroup_size_z: 64,
            max_texture_dimension_2d: 4096,
            // RPi shares 4 GiB with the CPU; keep any one buffer modest.
            max_storage_buffer_binding_size: 128 << 20,
            max_buffer_size: 128 << 20,
            ..wgpu::Limits::default()
        },
    }
}

fn max_invocations_for_profile(profile: DeviceProfile) -> u32 {
    limits_for_profile(profile).max_compute_invocations_per_workgroup
}

fn check_tile_fits(profile: DeviceProfile) -> GpuResult<()> {
    let total = TILE_SIZE * TILE_SIZE;
    let max = max_invocations_for_profile(profile);
    if total > max {
        return Err(GpuError::WorkgroupTooLarge { total, max });
    }
    Ok(())
}

// ============================================================
// Tests
// ============================================================
