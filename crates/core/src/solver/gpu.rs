//! GPU compute device
//!
//! This module provides a GPU implementation of the `ComputeDevice` trait using
//! wgpu compute shaders and storage buffers. This backend is only available when
//! the `gpu` feature is enabled.
//!
//! # Shader Files
//!
//! Every kernel lives in `shaders/nebula.wgsl` as a separate entry point sharing one
//! bind group layout:
//!
//! - bindings 0-3: read-only inputs (`Dispatch::reads`, in order)
//! - bindings 4-7: outputs (`Dispatch::writes`, in order)
//! - binding 8: the dispatch's `ParamBlock`, selected by dynamic offset
//!
//! # Implementation
//!
//! A command list is encoded into one command buffer. Dispatches between two
//! barriers share a compute pass, and each barrier closes the pass. Swaps only flip
//! the host-side bindings used to resolve later dispatches, so a recorded tick is
//! submitted exactly as validated. Staging buffers handle CPU readback.

use super::command::{Command, CommandList, Dispatch, Kernel, ParamBlock};
use super::context::GpuContext;
use super::ComputeDevice;
use crate::error::{SimError, SimResult};
use crate::grid::{BufferBindings, FieldId, FieldLayout, PhysicalBuffer, Slot};
use std::borrow::Cow;
use std::sync::atomic::{AtomicBool, Ordering};
use std::sync::{mpsc, Arc};
use std::time::{Duration, Instant};
use tracing::{debug, info, trace};

const WORKGROUP_SIZE: u32 = 4;
const MAX_INPUTS: usize = 4;
const MAX_OUTPUTS: usize = 4;
const PARAMS_BINDING: u32 = 8;
const DUMMY_SIZE: u64 = 16;
const POLL_INTERVAL: Duration = Duration::from_micros(250);

// Helper to convert usize to u64 for byte offsets
#[inline]
fn usize_to_u64(v: usize) -> u64 {
    v as u64
}

#[inline]
fn storage_entry(binding: u32, read_only: bool) -> wgpu::BindGroupLayoutEntry {
    wgpu::BindGroupLayoutEntry {
        binding,
        visibility: wgpu::ShaderStages::COMPUTE,
        ty: wgpu::BindingType::Buffer {
            ty: wgpu::BufferBindingType::Storage { read_only },
            has_dynamic_offset: false,
            min_binding_size: None,
        },
        count: None,
    }
}

/// GPU compute device using wgpu compute shaders
///
/// Owns one storage buffer per physical field slot plus the pipelines for every
/// [`Kernel`].
pub struct GpuDevice {
    // GPU handles
    device: wgpu::Device,
    queue: wgpu::Queue,
    adapter_name: String,
    backend_label: String,

    layout: FieldLayout,
    bindings: BufferBindings,

    // Indexed by `FieldId::index()`, then `Slot::index()`
    buffers: Vec<Vec<wgpu::Buffer>>,
    dummy_input: wgpu::Buffer,
    dummy_outputs: Vec<wgpu::Buffer>,

    // Per-dispatch parameter blocks, one aligned slot each
    params_buffer: wgpu::Buffer,
    params_capacity: usize,
    params_stride: u64,

    bind_group_layout: wgpu::BindGroupLayout,
    // Indexed by `Kernel as usize`
    pipelines: Vec<wgpu::ComputePipeline>,

    submissions: u64,
}

impl GpuDevice {
    /// Create a new GPU device for `layout`
    ///
    /// Allocates zeroed storage for every field slot, loads the shader module and
    /// creates one compute pipeline per kernel.
    ///
    /// # Errors
    ///
    /// `SimError::ResourceAllocation` if the layout exceeds device limits or any
    /// buffer allocation fails.
    pub fn new(context: GpuContext, layout: FieldLayout) -> SimResult<Self> {
        layout.validate()?;
        if !context.can_allocate(layout) {
            return Err(SimError::ResourceAllocation {
                what: format!("GPU field buffers for {} / {}", layout.grid, layout.backbone),
                bytes: layout.grid.byte_size() * 11 + layout.backbone.byte_size(),
            });
        }

        let (device, queue, adapter_name) = context.into_device_queue();
        device.push_error_scope(wgpu::ErrorFilter::OutOfMemory);

        let mut buffers = Vec::with_capacity(FieldId::ALL.len());
        for field in FieldId::ALL {
            let dims = if field.on_backbone_grid() {
                layout.backbone
            } else {
                layout.grid
            };
            let slots = if field.is_double_buffered() { 2 } else { 1 };
            let field_buffers = (0..slots)
                .map(|slot| {
                    device.create_buffer(&wgpu::BufferDescriptor {
                        label: Some(&format!("{field} {}", if slot == 0 { "A" } else { "B" })),
                        size: dims.byte_size(),
                        usage: wgpu::BufferUsages::STORAGE
                            | wgpu::BufferUsages::COPY_SRC
                            | wgpu::BufferUsages::COPY_DST,
                        mapped_at_creation: false,
                    })
                })
                .collect();
            buffers.push(field_buffers);
        }

        let dummy = |label: &str| {
            device.create_buffer(&wgpu::BufferDescriptor {
                label: Some(label),
                size: DUMMY_SIZE,
                usage: wgpu::BufferUsages::STORAGE,
                mapped_at_creation: false,
            })
        };
        let dummy_input = dummy("Unused Input");
        let dummy_outputs = (0..MAX_OUTPUTS)
            .map(|i| dummy(&format!("Unused Output {i}")))
            .collect();

        let alignment = u64::from(device.limits().min_uniform_buffer_offset_alignment);
        let params_stride = usize_to_u64(std::mem::size_of::<ParamBlock>()).next_multiple_of(alignment);
        let params_capacity = 64;
        let params_buffer = Self::create_params_buffer(&device, params_stride, params_capacity);

        if let Some(error) = pollster::block_on(device.pop_error_scope()) {
            return Err(SimError::ResourceAllocation {
                what: format!("GPU field buffers: {error}"),
                bytes: layout.grid.byte_size() * 11 + layout.backbone.byte_size(),
            });
        }

        let shader = device.create_shader_module(wgpu::include_wgsl!("shaders/nebula.wgsl"));

        let mut entries: Vec<wgpu::BindGroupLayoutEntry> = (0..MAX_INPUTS)
            .map(|i| storage_entry(i as u32, true))
            .chain((0..MAX_OUTPUTS).map(|i| storage_entry((MAX_INPUTS + i) as u32, false)))
            .collect();
        entries.push(wgpu::BindGroupLayoutEntry {
            binding: PARAMS_BINDING,
            visibility: wgpu::ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Uniform,
                has_dynamic_offset: true,
                min_binding_size: wgpu::BufferSize::new(usize_to_u64(std::mem::size_of::<ParamBlock>())),
            },
            count: None,
        });

        let bind_group_layout = device.create_bind_group_layout(&wgpu::BindGroupLayoutDescriptor {
            label: Some("Nebula Bind Group Layout"),
            entries: &entries,
        });

        let pipeline_layout = device.create_pipeline_layout(&wgpu::PipelineLayoutDescriptor {
            label: Some("Nebula Pipeline Layout"),
            bind_group_layouts: &[&bind_group_layout],
            push_constant_ranges: &[],
        });

        let pipelines = Kernel::ALL
            .iter()
            .map(|kernel| {
                device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
                    label: Some(kernel.entry_point()),
                    layout: Some(&pipeline_layout),
                    module: &shader,
                    entry_point: Some(kernel.entry_point()),
                    compilation_options: wgpu::PipelineCompilationOptions::default(),
                    cache: None,
                })
            })
            .collect();

        info!(
            "GPU device ready on {}: grid {}, backbone {}",
            adapter_name, layout.grid, layout.backbone
        );

        Ok(Self {
            backend_label: format!("GPU ({adapter_name})"),
            device,
            queue,
            adapter_name,
            layout,
            bindings: BufferBindings::default(),
            buffers,
            dummy_input,
            dummy_outputs,
            params_buffer,
            params_capacity,
            params_stride,
            bind_group_layout,
            pipelines,
            submissions: 0,
        })
    }

    fn create_params_buffer(device: &wgpu::Device, stride: u64, capacity: usize) -> wgpu::Buffer {
        device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Dispatch Params"),
            size: stride * usize_to_u64(capacity),
            usage: wgpu::BufferUsages::UNIFORM | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        })
    }

    #[must_use]
    pub fn adapter_name(&self) -> &str {
        &self.adapter_name
    }

    fn buffer(&self, buffer: PhysicalBuffer) -> SimResult<&wgpu::Buffer> {
        self.buffers
            .get(buffer.field.index())
            .and_then(|slots| slots.get(buffer.slot.index()))
            .ok_or_else(|| SimError::Submission(format!("no GPU storage for {buffer}")))
    }

    fn field_bytes(&self, field: FieldId) -> u64 {
        if field.on_backbone_grid() {
            self.layout.backbone.byte_size()
        } else {
            self.layout.grid.byte_size()
        }
    }

    /// Upload every dispatch's parameters into consecutive aligned slots
    fn upload_params(&mut self, commands: &CommandList) {
        let count = commands.dispatch_count();
        if count > self.params_capacity {
            self.params_capacity = count.next_power_of_two();
            self.params_buffer =
                Self::create_params_buffer(&self.device, self.params_stride, self.params_capacity);
            debug!("Grew dispatch parameter buffer to {} slots", self.params_capacity);
        }

        let stride = self.params_stride as usize;
        let mut bytes = vec![0u8; stride * count];
        let dispatches = commands.commands().iter().filter_map(|c| match c {
            Command::Dispatch(d) => Some(d),
            _ => None,
        });
        for (slot, dispatch) in bytes.chunks_exact_mut(stride).zip(dispatches) {
            let block = bytemuck::bytes_of(&dispatch.params);
            slot[..block.len()].copy_from_slice(block);
        }
        if !bytes.is_empty() {
            self.queue.write_buffer(&self.params_buffer, 0, &bytes);
        }
    }

    fn create_bind_group(
        &self,
        dispatch: &Dispatch,
        bindings: &BufferBindings,
    ) -> SimResult<wgpu::BindGroup> {
        let mut inputs = [&self.dummy_input; MAX_INPUTS];
        for (slot, read) in inputs.iter_mut().zip(&dispatch.reads) {
            *slot = self.buffer(read.resolve(bindings))?;
        }
        let mut outputs: Vec<&wgpu::Buffer> = self.dummy_outputs.iter().collect();
        for (slot, write) in outputs.iter_mut().zip(&dispatch.writes) {
            *slot = self.buffer(write.resolve(bindings))?;
        }

        let mut entries: Vec<wgpu::BindGroupEntry<'_>> = inputs
            .iter()
            .chain(outputs.iter())
            .enumerate()
            .map(|(binding, buffer)| wgpu::BindGroupEntry {
                binding: binding as u32,
                resource: buffer.as_entire_binding(),
            })
            .collect();
        entries.push(wgpu::BindGroupEntry {
            binding: PARAMS_BINDING,
            resource: wgpu::BindingResource::Buffer(wgpu::BufferBinding {
                buffer: &self.params_buffer,
                offset: 0,
                size: wgpu::BufferSize::new(usize_to_u64(std::mem::size_of::<ParamBlock>())),
            }),
        });

        Ok(self.device.create_bind_group(&wgpu::BindGroupDescriptor {
            label: Some(dispatch.kernel.entry_point()),
            layout: &self.bind_group_layout,
            entries: &entries,
        }))
    }

    /// Encode `commands` starting from `bindings`, returning the final bindings
    fn encode(
        &self,
        commands: &CommandList,
        mut bindings: BufferBindings,
    ) -> SimResult<(wgpu::CommandBuffer, BufferBindings)> {
        // Bind groups must outlive the passes that reference them
        let mut bind_groups = Vec::with_capacity(commands.dispatch_count());
        let mut passes: Vec<Vec<(Kernel, [u32; 3], usize)>> = vec![Vec::new()];

        for command in commands.commands() {
            match command {
                Command::Stage(stage) => trace!("Encoding {stage}"),
                Command::Dispatch(dispatch) => {
                    bind_groups.push(self.create_bind_group(dispatch, &bindings)?);
                    let dims = dispatch.params.dimensions();
                    let groups = [
                        dims.width.div_ceil(WORKGROUP_SIZE),
                        dims.height.div_ceil(WORKGROUP_SIZE),
                        dims.depth.div_ceil(WORKGROUP_SIZE),
                    ];
                    if let Some(pass) = passes.last_mut() {
                        pass.push((dispatch.kernel, groups, bind_groups.len() - 1));
                    }
                }
                Command::Barrier => passes.push(Vec::new()),
                Command::Swap(field) => bindings.swap(*field),
            }
        }

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Nebula Tick Encoder"),
            });

        for pass in passes.iter().filter(|p| !p.is_empty()) {
            let mut compute_pass = encoder.begin_compute_pass(&wgpu::ComputePassDescriptor {
                label: Some("Nebula Pass"),
                timestamp_writes: None,
            });
            for &(kernel, [x, y, z], index) in pass {
                let offset = (self.params_stride * usize_to_u64(index)) as u32;
                compute_pass.set_pipeline(&self.pipelines[kernel as usize]);
                compute_pass.set_bind_group(0, &bind_groups[index], &[offset]);
                compute_pass.dispatch_workgroups(x, y, z);
            }
        }

        Ok((encoder.finish(), bindings))
    }
}

impl ComputeDevice for GpuDevice {
    fn layout(&self) -> FieldLayout {
        self.layout
    }

    fn bindings(&self) -> BufferBindings {
        self.bindings
    }

    fn submit(&mut self, commands: &CommandList) -> SimResult<()> {
        commands.validate(self.bindings)?;

        self.device.push_error_scope(wgpu::ErrorFilter::Validation);
        self.upload_params(commands);
        // Bindings are committed only once the queue accepted the work
        let (command_buffer, bindings) = match self.encode(commands, self.bindings) {
            Ok(encoded) => encoded,
            Err(e) => {
                let _ = pollster::block_on(self.device.pop_error_scope());
                return Err(e);
            }
        };
        self.queue.submit(std::iter::once(command_buffer));

        if let Some(error) = pollster::block_on(self.device.pop_error_scope()) {
            return Err(SimError::Submission(error.to_string()));
        }

        self.bindings = bindings;
        self.submissions += 1;
        trace!(
            "GPU submission {} with {} dispatches",
            self.submissions,
            commands.dispatch_count()
        );
        Ok(())
    }

    fn wait_idle(&mut self, timeout: Duration) -> SimResult<()> {
        let done = Arc::new(AtomicBool::new(false));
        let flag = Arc::clone(&done);
        self.queue
            .on_submitted_work_done(move || flag.store(true, Ordering::Release));

        let start = Instant::now();
        loop {
            let _ = self.device.poll(wgpu::Maintain::Poll);
            if done.load(Ordering::Acquire) {
                return Ok(());
            }
            let waited = start.elapsed();
            if waited >= timeout {
                return Err(SimError::SynchronizationTimeout {
                    waited_ms: u64::try_from(waited.as_millis()).unwrap_or(u64::MAX),
                });
            }
            std::thread::sleep(POLL_INTERVAL);
        }
    }

    fn read_field(&self, field: FieldId) -> SimResult<Cow<'_, [f32]>> {
        let size = self.field_bytes(field);
        let source = self.buffer(PhysicalBuffer {
            field,
            slot: self.bindings.current_slot(field),
        })?;

        let staging = self.device.create_buffer(&wgpu::BufferDescriptor {
            label: Some("Field Readback Staging"),
            size,
            usage: wgpu::BufferUsages::MAP_READ | wgpu::BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });

        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Field Readback Encoder"),
            });
        encoder.copy_buffer_to_buffer(source, 0, &staging, 0, size);
        self.queue.submit(std::iter::once(encoder.finish()));

        let buffer_slice = staging.slice(..);
        let (tx, rx) = mpsc::channel();
        buffer_slice.map_async(wgpu::MapMode::Read, move |result| {
            let _ = tx.send(result);
        });

        let _ = self.device.poll(wgpu::Maintain::Wait);
        rx.recv()
            .map_err(|e| SimError::Submission(format!("readback of {field} abandoned: {e}")))?
            .map_err(|e| SimError::Submission(format!("readback of {field} failed: {e}")))?;

        let data = buffer_slice.get_mapped_range();
        let result: Vec<f32> = bytemuck::cast_slice(&data).to_vec();
        drop(data);
        staging.unmap();

        Ok(Cow::Owned(result))
    }

    fn write_field(&mut self, field: FieldId, data: &[f32]) -> SimResult<()> {
        let expected = self.field_bytes(field);
        let bytes: &[u8] = bytemuck::cast_slice(data);
        if usize_to_u64(bytes.len()) != expected {
            return Err(SimError::Submission(format!(
                "write to {field}: {} values for a field of {}",
                data.len(),
                expected / 4
            )));
        }
        let target = self.buffer(PhysicalBuffer {
            field,
            slot: self.bindings.current_slot(field),
        })?;
        self.queue.write_buffer(target, 0, bytes);
        Ok(())
    }

    fn clear_transient(&mut self) -> SimResult<()> {
        let mut encoder = self
            .device
            .create_command_encoder(&wgpu::CommandEncoderDescriptor {
                label: Some("Clear Transient Encoder"),
            });
        for field in FieldId::ALL.into_iter().filter(|&f| f != FieldId::Backbone) {
            for slot in [Slot::A, Slot::B] {
                if slot == Slot::B && !field.is_double_buffered() {
                    continue;
                }
                encoder.clear_buffer(self.buffer(PhysicalBuffer { field, slot })?, 0, None);
            }
        }
        self.queue.submit(std::iter::once(encoder.finish()));
        self.bindings = BufferBindings::default();
        Ok(())
    }

    fn is_gpu_accelerated(&self) -> bool {
        true
    }

    fn backend_name(&self) -> &str {
        &self.backend_label
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::core_types::{FalloffKernel, InjectionSource, Vec3};
    use crate::grid::GridDimensions;
    use crate::solver::context::GpuInitResult;
    use crate::solver::cpu::CpuDevice;

    fn layout() -> FieldLayout {
        FieldLayout::new(GridDimensions::cubic(8), GridDimensions::cubic(16))
    }

    /// GPU device for `test`, or `None` after reporting why the test is skipped
    fn gpu_device(test: &str) -> Option<GpuDevice> {
        match GpuContext::new() {
            GpuInitResult::Success(context) => Some(GpuDevice::new(context, layout()).unwrap()),
            GpuInitResult::NoGpuFound => {
                eprintln!("skipping {test}: no GPU adapter found");
                None
            }
            GpuInitResult::InitFailed {
                adapter_name,
                error,
            } => {
                eprintln!("skipping {test}: GPU '{adapter_name}' failed to initialize: {error}");
                None
            }
        }
    }

    #[test]
    fn test_gpu_device_creation() {
        let Some(device) = gpu_device("test_gpu_device_creation") else {
            return;
        };
        assert!(device.is_gpu_accelerated());
        assert_eq!(device.layout(), layout());
        assert!(device.backend_name().starts_with("GPU"));
    }

    #[test]
    fn test_gpu_write_read_roundtrip() {
        let Some(mut device) = gpu_device("test_gpu_write_read_roundtrip") else {
            return;
        };
        let data: Vec<f32> = (0..layout().backbone.cell_count()).map(|i| i as f32).collect();
        device.write_field(FieldId::Backbone, &data).unwrap();
        assert_eq!(device.read_field(FieldId::Backbone).unwrap().as_ref(), &data[..]);
    }

    #[test]
    fn test_gpu_matches_cpu_injection() {
        let Some(mut gpu) = gpu_device("test_gpu_matches_cpu_injection") else {
            return;
        };
        let mut cpu = CpuDevice::new(layout()).unwrap();
        let source = InjectionSource {
            position: Vec3::new(4.0, 4.0, 4.0),
            radius: 3.0,
            velocity: Vec3::new(0.5, 0.0, -1.0),
            density_amount: 1.0,
            falloff: FalloffKernel::Smooth,
        };

        let mut list = CommandList::new();
        list.dispatch(Dispatch::inject(layout().grid, &source));
        list.barrier();
        for field in FieldId::SIMULATED {
            list.swap(field);
        }
        gpu.submit(&list).unwrap();
        gpu.wait_idle(Duration::from_secs(5)).unwrap();
        cpu.submit(&list).unwrap();

        let a = gpu.read_field(FieldId::Density).unwrap();
        let b = cpu.read_field(FieldId::Density).unwrap();
        for (x, y) in a.iter().zip(b.iter()) {
            assert!((x - y).abs() < 1e-5);
        }
        assert_eq!(gpu.bindings(), cpu.bindings());
    }
}
