// gpu/kernels.rs — Kernel table, compiled programs and the dispatch builder.
//
// KERNEL TABLE
// ────────────
// Every program, kernel and binding slot the engines use is named once,
// here. `KERNEL_TABLE_VERSION` is bumped whenever a kernel's bindings or the
// `KernelParams` layout change, since the WGSL sources in `src/shaders/`
// must change in lock step.
//
//   program     kernel           entry point       slots
//   ──────────  ───────────────  ────────────────  ─────────────────────────────
//   statistics  Sum              sum               params image out4
//   statistics  Covariance       covariance        params image buf4 out4x4
//   statistics  Multiply4        multiply4         params in4 out4
//   statistics  Multiply4x4      multiply4x4       params in4x4 out4x4
//   reduction   AccumulateX4     accumulate_x4     params in4 out4
//   reduction   AccumulateY4     accumulate_y4     params in4 out4
//   reduction   AccumulateX4x4   accumulate_x4x4   params in4x4 out4x4
//   reduction   AccumulateY4x4   accumulate_y4x4   params in4x4 out4x4
//
// Slots have fixed binding numbers shared by both programs, so a kernel's
// bind group layout is just the subset of slots it touches.
//
// RESOLUTION
// ──────────
// `ComputeProgram::load` compiles the module and builds a pipeline for each
// kernel of the program up front, inside wgpu validation error scopes. A
// missing entry point or a WGSL error therefore surfaces as
// `ShaderUnavailable` when the engine is constructed, never mid-pipeline.
//
// DISPATCH
// ────────
// `Dispatch` is the only way work reaches the queue:
//
//   program.dispatch(Kernel::Sum)?
//       .set_input_size(w, h)
//       .bind_image(&image)
//       .bind_buffer(Slot::Output4, &tiles)?
//       .submit(gpu, [tx, ty, 1])?;
//
// Each submit is its own command buffer on the shared queue; ordering
// between passes comes from queue FIFO order.

use std::collections::HashMap;
use std::fmt;

use log::debug;
use wgpu::util::DeviceExt;

use crate::gpu::buffer::BindableBuffer;
use crate::gpu::device::GpuDevice;
use crate::gpu::errors::{GpuError, GpuResult};
use crate::gpu::image::GpuImage;
use crate::math::{Mat4, Vec4};

/// Version of the program/kernel/slot table and the `KernelParams` layout.
pub const KERNEL_TABLE_VERSION: u32 = 2;

// ---------------------------------------------------------------------------
// Programs
// ---------------------------------------------------------------------------

/// A WGSL module shipped with the crate.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Program {
    Statistics,
    Reduction,
}

impl Program {
    pub fn name(self) -> &'static str {
        match self {
            Program::Statistics => "statistics",
            Program::Reduction => "reduction",
        }
    }

    pub fn source(self) -> &'static str {
        match self {
            Program::Statistics => include_str!("../shaders/statistics.wgsl"),
            Program::Reduction => include_str!("../shaders/reduction.wgsl"),
        }
    }

    /// Kernels this program provides.
    pub fn kernels(self) -> &'static [Kernel] {
        match self {
            Program::Statistics => &[
                Kernel::Sum,
                Kernel::Covariance,
                Kernel::Multiply4,
                Kernel::Multiply4x4,
            ],
            Program::Reduction => &[
                Kernel::AccumulateX4,
                Kernel::AccumulateY4,
                Kernel::AccumulateX4x4,
                Kernel::AccumulateY4x4,
            ],
        }
    }

    /// Look a program up by name.
    pub fn from_name(name: &str) -> Option<Program> {
        [Program::Statistics, Program::Reduction]
            .into_iter()
            .find(|p| p.name() == name)
    }
}

// ---------------------------------------------------------------------------
// Kernels
// ---------------------------------------------------------------------------

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Kernel {
    Sum,
    Covariance,
    Multiply4,
    Multiply4x4,
    AccumulateX4,
    AccumulateY4,
    AccumulateX4x4,
    AccumulateY4x4,
}

impl Kernel {
    pub const ALL: [Kernel; 8] = [
        Kernel::Sum,
        Kernel::Covariance,
        Kernel::Multiply4,
        Kernel::Multiply4x4,
        Kernel::AccumulateX4,
        Kernel::AccumulateY4,
        Kernel::AccumulateX4x4,
        Kernel::AccumulateY4x4,
    ];

    /// Table name of the kernel.
    pub fn name(self) -> &'static str {
        match self {
            Kernel::Sum => "Sum",
            Kernel::Covariance => "Covariance",
            Kernel::Multiply4 => "Multiply4",
            Kernel::Multiply4x4 => "Multiply4x4",
            Kernel::AccumulateX4 => "AccumulateX4",
            Kernel::AccumulateY4 => "AccumulateY4",
            Kernel::AccumulateX4x4 => "AccumulateX4x4",
            Kernel::AccumulateY4x4 => "AccumulateY4x4",
        }
    }

    /// WGSL entry point implementing the kernel.
    pub fn entry_point(self) -> &'static str {
        match self {
            Kernel::Sum => "sum",
            Kernel::Covariance => "covariance",
            Kernel::Multiply4 => "multiply4",
            Kernel::Multiply4x4 => "multiply4x4",
            Kernel::AccumulateX4 => "accumulate_x4",
            Kernel::AccumulateY4 => "accumulate_y4",
            Kernel::AccumulateX4x4 => "accumulate_x4x4",
            Kernel::AccumulateY4x4 => "accumulate_y4x4",
        }
    }

    pub fn program(self) -> Program {
        match self {
            Kernel::Sum | Kernel::Covariance | Kernel::Multiply4 | Kernel::Multiply4x4 => {
                Program::Statistics
            }
            _ => Program::Reduction,
        }
    }

    pub fn slots(self) -> &'static [Slot] {
        match self {
            Kernel::Sum => &[Slot::Params, Slot::InputImage, Slot::Output4],
            Kernel::Covariance => &[
                Slot::Params,
                Slot::InputImage,
                Slot::ParamBuffer4,
                Slot::Output4x4,
            ],
            Kernel::Multiply4 | Kernel::AccumulateX4 | Kernel::AccumulateY4 => {
                &[Slot::Params, Slot::Input4, Slot::Output4]
            }
            Kernel::Multiply4x4 | Kernel::AccumulateX4x4 | Kernel::AccumulateY4x4 => {
                &[Slot::Params, Slot::Input4x4, Slot::Output4x4]
            }
        }
    }

    pub fn from_name(name: &str) -> Option<Kernel> {
        Kernel::ALL.into_iter().find(|k| k.name() == name)
    }
}

impl fmt::Display for Kernel {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Slots
// ---------------------------------------------------------------------------

/// A named binding point. Binding numbers match `@binding(n)` in both
/// WGSL programs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Slot {
    /// `KernelParams` uniform. Always bound by `Dispatch` itself.
    Params,
    Input4,
    Input4x4,
    Output4,
    Output4x4,
    /// Read-only vec4 side input (the average, for covariance).
    ParamBuffer4,
    InputImage,
}

impl Slot {
    pub fn binding(self) -> u32 {
        match self {
            Slot::Params => 0,
            Slot::Input4 => 1,
            Slot::Input4x4 => 2,
            Slot::Output4 => 3,
            Slot::Output4x4 => 4,
            Slot::ParamBuffer4 => 5,
            Slot::InputImage => 6,
        }
    }

    pub fn name(self) -> &'static str {
        match self {
            Slot::Params => "params",
            Slot::Input4 => "input4",
            Slot::Input4x4 => "input4x4",
            Slot::Output4 => "output4",
            Slot::Output4x4 => "output4x4",
            Slot::ParamBuffer4 => "param_buf4",
            Slot::InputImage => "input_image",
        }
    }

    /// Element stride of a buffer bound here, if the slot takes a buffer
    /// of elements.
    pub fn element_stride(self) -> Option<usize> {
        match self {
            Slot::Input4 | Slot::Output4 | Slot::ParamBuffer4 => Some(Vec4::STRIDE),
            Slot::Input4x4 | Slot::Output4x4 => Some(Mat4::STRIDE),
            Slot::Params | Slot::InputImage => None,
        }
    }

    fn layout_entry(self) -> wgpu::BindGroupLayoutEntry {
        let storage = |read_only| wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        };
        let ty = match self {
            Slot::Params => wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: false,
                min_binding_size: wgpu::BufferSize::new(std::mem::size_of::<KernelParams>() as u64),
            },
            Slot::Input4 | Slot::Input4x4 | Slot::ParamBuffer4 => storage(true),
            Slot::Output4 | Slot::Output4x4 => storage(false),
            Slot::InputImage => wgpu::BindingType::Texture {
                multisampled: false,
                view_dimension: wgpu::TextureViewDimension::D2,
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
            },
        };
        wgpu::BindGroupLayoutEntry {
            binding: self.binding(),
            visibility: wgpu::ShaderStages::COMPUTE,
            ty,
            count: None,
        }
    }
}

impl fmt::Display for Slot {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(self.name())
    }
}

// ---------------------------------------------------------------------------
// Parameter block (must match WGSL struct Params exactly)
// ---------------------------------------------------------------------------

/// Uniform parameters shared by every kernel.
///
/// Layout must match `Params` in both WGSL programs:
///   offset   0: input_size   vec2<u32>
///   offset   8: output_size  vec2<u32>
///   offset  16: flags        vec4<u32>   (x: sample encoding)
///   offset  32: param0_4     vec4<f32>
///   offset  48: param0_4x4   mat4x4<f32>
///   total: 112 bytes
#[repr(C)]
#[derive(Debug, Clone, Copy, Default, PartialEq, bytemuck::Pod, bytemuck::Zeroable)]
pub struct KernelParams {
    pub input_size: [u32; 2],
    pub output_size: [u32; 2],
    pub flags: [u32; 4],
    pub param0_4: Vec4,
    pub param0_4x4: Mat4,
}

// ---------------------------------------------------------------------------
// ComputeProgram
// ---------------------------------------------------------------------------

struct CompiledKernel {
    pipeline: wgpu::ComputePipeline,
    bgl: wgpu::BindGroupLayout,
}

/// A compiled WGSL module with a pipeline per kernel.
///
/// This is the kernel-handle cache: built once per engine, reused for every
/// dispatch.
pub struct ComputeProgram {
    name: String,
    kernels: HashMap<Kernel, CompiledKernel>,
}

impl ComputeProgram {
    /// Compile one of the crate's programs and resolve all its kernels.
    pub fn load(gpu: &GpuDevice, program: Program) -> GpuResult<Self> {
        Self::from_source(gpu, program.name(), program.source(), program.kernels())
    }

    /// Compile a program by table name.
    pub fn load_by_name(gpu: &GpuDevice, name: &str) -> GpuResult<Self> {
        let program = Program::from_name(name).ok_or_else(|| GpuError::ShaderUnavailable {
            program: name.to_string(),
            kernel: "*".to_string(),
            message: "no such program".to_string(),
        })?;
        Self::load(gpu, program)
    }

    /// Compile WGSL `source` and build a pipeline for each of `kernels`.
    pub fn from_source(
        gpu: &GpuDevice,
        name: &str,
        source: &str,
        kernels: &[Kernel],
    ) -> GpuResult<Self> {
        let unavailable = |kernel: &str, message: String| GpuError::ShaderUnavailable {
            program: name.to_string(),
            kernel: kernel.to_string(),
            message,
        };

        gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);
        let module = gpu.device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some(name),
            source: wgpu::ShaderSource::Wgsl(source.into()),
        });
        if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
            return Err(unavailable("*", err.to_string()));
        }

        let mut compiled = HashMap::with_capacity(kernels.len());
        for &kernel in kernels {
            gpu.device.push_error_scope(wgpu::ErrorFilter::Validation);

            let entries: Vec<wgpu::BindGroupLayoutEntry> =
                kernel.slots().iter().map(|s| s.layout_entry()).collect();
            let bgl = gpu.device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
                label: Some(kernel.name()),
                entries: &entries,
            });
            let layout = gpu.device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
                label: Some(kernel.name()),
                bind_group_layouts: &[&bgl],
                push_constant_ranges: &[],
            });
            let pipeline = gpu.device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                label: Some(kernel.name()),
                layout: Some(&layout),
                module: &module,
                entry_point: kernel.entry_point(),
                compilation_options: wgpu::PipelineCompilationOptions::default(),
                cache: None,
            });

            if let Some(err) = pollster::block_on(gpu.device.pop_error_scope()) {
                return Err(unavailable(kernel.name(), err.to_string()));
            }
            compiled.insert(kernel, CompiledKernel { pipeline, bgl });
        }

        debug!("compiled program `{name}` ({} kernels)", compiled.len());
        Ok(ComputeProgram { name: name.to_string(), kernels: compiled })
    }

    pub fn name(&self) -> &str {
        &self.name
    }

    /// Resolve a kernel handle by table name.
    pub fn find_kernel(&self, name: &str) -> GpuResult<Kernel> {
        Kernel::from_name(name)
            .filter(|k| self.kernels.contains_key(k))
            .ok_or_else(|| GpuError::ShaderUnavailable {
                program: self.name.clone(),
                kernel: name.to_string(),
                message: "kernel not in program".to_string(),
            })
    }

    /// Start a dispatch of `kernel`.
    pub fn dispatch(&self, kernel: Kernel) -> GpuResult<Dispatch<'_>> {
        let compiled = self.kernels.get(&kernel).ok_or_else(|| GpuError::ShaderUnavailable {
            program: self.name.clone(),
            kernel: kernel.name().to_string(),
            message: "kernel not in program".to_string(),
        })?;
        Ok(Dispatch {
            kernel,
            compiled,
            params: KernelParams::default(),
            buffers: Vec::with_capacity(3),
            image: None,
        })
    }
}

// ---------------------------------------------------------------------------
// Dispatch
// ---------------------------------------------------------------------------

/// One kernel launch being assembled: parameters, bound resources, then
/// [`submit`](Dispatch::submit).
pub struct Dispatch<'a> {
    kernel: Kernel,
    compiled: &'a CompiledKernel,
    params: KernelParams,
    buffers: Vec<(Slot, &'a wgpu::Buffer)>,
    image: Option<&'a wgpu::TextureView>,
}

impl<'a> Dispatch<'a> {
    pub fn set_input_size(mut self, width: u32, height: u32) -> Self {
        self.params.input_size = [width, height];
        self
    }

    pub fn set_output_size(mut self, width: u32, height: u32) -> Self {
        self.params.output_size = [width, height];
        self
    }

    pub fn set_flags(mut self, flags: [u32; 4]) -> Self {
        self.params.flags = flags;
        self
    }

    pub fn set_vector(mut self, v: Vec4) -> Self {
        self.params.param0_4 = v;
        self
    }

    pub fn set_matrix(mut self, m: Mat4) -> Self {
        self.params.param0_4x4 = m;
        self
    }

    /// Bind `buffer` to `slot`. Fails if the slot is not one of the
    /// kernel's, the stride does not fit the slot, or the buffer was released.
    pub fn bind_buffer<B: BindableBuffer + ?Sized>(mut self, slot: Slot, buffer: &'a B) -> GpuResult<Self> {
        let expected = slot
            .element_stride()
            .filter(|_| self.kernel.slots().contains(&slot))
            .ok_or(GpuError::UnexpectedSlot {
                kernel: self.kernel.name(),
                slot: slot.name(),
            })?;
        if buffer.stride() != expected {
            return Err(GpuError::StrideMismatch { expected, actual: buffer.stride() });
        }
        let raw = buffer.device_buffer()?;
        self.buffers.retain(|(s, _)| *s != slot);
        self.buffers.push((slot, raw));
        Ok(self)
    }

    pub fn bind_image(mut self, image: &'a GpuImage) -> Self {
        self.image = Some(&image.view);
        self
    }

    /// Encode and submit the dispatch with `groups` workgroups.
    ///
    /// Fails with `DispatchTooLarge` if any axis exceeds the device's
    /// per-dimension workgroup limit.
    pub fn submit(self, gpu: &GpuDevice, groups: [u32; 3]) -> GpuResult<()> {
        let max = gpu.limits().max_compute_workgroups_per_dimension;
        if groups.iter().any(|&g| g > max) {
            return Err(GpuError::DispatchTooLarge { kernel: self.kernel.name(), groups, max });
        }
        let params_buf = gpu.device.create_buffer_init(&wgpu::util::BufferInitDescriptor {
            label: Some("KernelParams"),
            contents: bytemuck::bytes_of(&self.params),
            usage: wgpu::BufferUsages::UNIFORM,
        });

        let mut entries = Vec::with_capacity(self.kernel.slots().len());
        for &slot in self.kernel.slots() {
            let resource = match slot {
                Slot::Params => params_buf.as_entire_binding(),
                Slot::InputImage => match self.image {
                    Some(view) => wgpu::BindingResource::TextureView(view),
                    None => return Err(self.unbound(slot)),
                },
                _ => match self.buffers.iter().find(|(s, _)| *s == slot) {
                    Some((_, buf)) => buf.as_entire_binding(),
                    None => return Err(self.unbound(slot)),
                },
            };
            entries.push(wgpu::BindGroupEntry { binding: slot.binding(), resource });
        }

        let bind_group = gpu.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(self.kernel.name()),
            layout: &self.compiled.bgl,
            entries: &entries,
        });

        let mut encoder = gpu.device.create_command_encoder(&wgpu::CommandEncoderDescriptor {
            label: Some(self.kernel.name()),
        });
        {
            let mut pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some(self.kernel.entry_point()),
                timestamp_writes: None,
            });
            // Zero groups on any axis: nothing to run.
            if !groups.contains(&0) {
                pass.set_pipeline(&self.compiled.pipeline);
                pass.set_bind_group(0, &bind_group, &[]);
                pass.dispatch_workgroups(groups[0], groups[1], groups[2]);
            }
        }
        gpu.queue.submit(std::iter::once(encoder.finish()));

        debug!(
            "dispatched {} groups={:?} in={:?} out={:?}",
            self.kernel, groups, self.params.input_size, self.params.output_size
        );
        Ok(())
    }

    fn unbound(&self, slot: Slot) -> GpuError {
        GpuError::UnboundSlot { kernel: self.kernel.name(), slot: slot.name() }
    }
}

// ---------------------------------------------------------------------------
// Tests
// ---------------------------------------------------------------------------
