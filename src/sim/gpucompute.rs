//! Compute side of the GPU backend: the feedback buffer pair, the kernel
//! pipeline and readbacks of the active buffer.

use std::sync::{
    Arc,
    mpsc::{self, Receiver, TryRecvError},
};

use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, Buffer, BufferAsyncError, BufferDescriptor, BufferUsages,
    CommandEncoderDescriptor, ComputePassDescriptor, ComputePipeline, Device,
    PipelineLayoutDescriptor, Queue, ShaderStages,
    util::{BufferInitDescriptor, DeviceExt},
};

use crate::sim::{PendingReadback, ReadbackPoll, kernel::KernelUniforms};

const WORKGROUP_SIZE: u32 = 8;

/// Layout of the stamp texture group, shared by the kernel and the render
/// pass (which uses it for the drag preview).
pub fn stamp_bind_group_layout(device: &Device) -> BindGroupLayout {
    device.create_bind_group_layout(&BindGroupLayoutDescriptor {
        label: Some("stamp bind group layout"),
        entries: &[BindGroupLayoutEntry {
            binding: 0,
            visibility: ShaderStages::COMPUTE | ShaderStages::FRAGMENT,
            ty: wgpu::BindingType::Texture {
                sample_type: wgpu::TextureSampleType::Float { filterable: false },
                view_dimension: wgpu::TextureViewDimension::D2,
                multisampled: false,
            },
            count: None,
        }],
    })
}

pub struct ComputeContext {
    device: Arc<Device>,
    queue: Arc<Queue>,
    bufs: [Buffer; 2],
    cells_layout: BindGroupLayout,
    /// `cells_bgs[i]` reads `bufs[i]` and writes the other one
    cells_bgs: [BindGroup; 2],
    params_buf: Buffer,
    params_bind_group: BindGroup,
    old_params: Option<KernelUniforms>,
    pipeline: ComputePipeline,
    active: usize,
    width: u32,
    height: u32,
}

impl ComputeContext {
    pub fn new(
        device: Arc<Device>,
        queue: Arc<Queue>,
        width: u32,
        height: u32,
        stamp_layout: &BindGroupLayout,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("life compute shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("./shader.wgsl").into()),
        });

        let storage = |binding, read_only| BindGroupLayoutEntry {
            binding,
            visibility: ShaderStages::COMPUTE,
            ty: wgpu::BindingType::Buffer {
                ty: wgpu::BufferBindingType::Storage { read_only },
                has_dynamic_offset: false,
                min_binding_size: None,
            },
            count: None,
        };
        let cells_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("cells bind group layout"),
            entries: &[storage(0, true), storage(1, false)],
        });

        let params_buf = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("kernel uniforms buffer"),
            contents: bytemuck::bytes_of(&KernelUniforms::passthrough(
                width,
                height,
                Default::default(),
            )),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });

        let params_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("kernel uniforms bind group layout"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::COMPUTE,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let params_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("kernel uniforms bind group"),
            layout: &params_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: params_buf.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("life pipeline layout"),
            bind_group_layouts: &[&cells_layout, &params_layout, stamp_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_compute_pipeline(&wgpu::ComputePipelineDescriptor {
            label: Some("life compute pipeline"),
            layout: Some(&pipeline_layout),
            module: &shader,
            entry_point: None,
            compilation_options: Default::default(),
            cache: None,
        });

        let bufs = Self::create_buffers(&device, width, height);
        let cells_bgs = Self::create_cells_bind_groups(&device, &cells_layout, &bufs);

        Self {
            device,
            queue,
            bufs,
            cells_layout,
            cells_bgs,
            params_buf,
            params_bind_group,
            old_params: None,
            pipeline,
            active: 0,
            width,
            height,
        }
    }

    fn create_buffers(device: &Device, width: u32, height: u32) -> [Buffer; 2] {
        let size = (width as u64 * height as u64 * 4).max(4);
        ["cells buffer 1", "cells buffer 2"].map(|label| {
            device.create_buffer(&BufferDescriptor {
                label: Some(label),
                size,
                usage: BufferUsages::STORAGE | BufferUsages::COPY_SRC | BufferUsages::COPY_DST,
                mapped_at_creation: false,
            })
        })
    }

    fn create_cells_bind_groups(
        device: &Device,
        layout: &BindGroupLayout,
        bufs: &[Buffer; 2],
    ) -> [BindGroup; 2] {
        [0, 1].map(|read| {
            device.create_bind_group(&BindGroupDescriptor {
                label: Some(if read == 0 {
                    "cells bind group (buf1 -> buf2)"
                } else {
                    "cells bind group (buf2 -> buf1)"
                }),
                layout,
                entries: &[
                    BindGroupEntry {
                        binding: 0,
                        resource: bufs[read].as_entire_binding(),
                    },
                    BindGroupEntry {
                        binding: 1,
                        resource: bufs[1 - read].as_entire_binding(),
                    },
                ],
            })
        })
    }

    pub fn buffers(&self) -> &[Buffer; 2] {
        &self.bufs
    }

    /// Index into [`buffers`](Self::buffers) of the buffer holding the
    /// current generation.
    pub fn active(&self) -> usize {
        self.active
    }

    pub fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    /// Upload `cells` into the back buffer and make it active.
    pub fn load(&mut self, cells: &[f32]) {
        self.queue
            .write_buffer(&self.bufs[1 - self.active], 0, bytemuck::cast_slice(cells));
        self.swap();
    }

    /// Replace both buffers. Their contents are zeroed and the render pass
    /// must be rebound to the new pair.
    pub fn resize(&mut self, width: u32, height: u32) {
        for buf in &self.bufs {
            buf.destroy();
        }
        self.bufs = Self::create_buffers(&self.device, width, height);
        self.cells_bgs = Self::create_cells_bind_groups(&self.device, &self.cells_layout, &self.bufs);
        self.active = 0;
        self.width = width;
        self.height = height;
    }

    pub fn step(&mut self, uniforms: &KernelUniforms, stamp: &BindGroup) {
        if self.old_params != Some(*uniforms) {
            self.queue
                .write_buffer(&self.params_buf, 0, bytemuck::bytes_of(uniforms));
            self.old_params = Some(*uniforms);
        }

        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("life compute encoder"),
            });
        {
            let mut pass = encoder.begin_compute_pass(&ComputePassDescriptor {
                label: Some("life compute pass"),
                timestamp_writes: None,
            });
            pass.set_pipeline(&self.pipeline);
            pass.set_bind_group(0, &self.cells_bgs[self.active], &[]);
            pass.set_bind_group(1, &self.params_bind_group, &[]);
            pass.set_bind_group(2, stamp, &[]);
            pass.dispatch_workgroups(
                self.width.div_ceil(WORKGROUP_SIZE),
                self.height.div_ceil(WORKGROUP_SIZE),
                1,
            );
        }
        self.queue.submit(std::iter::once(encoder.finish()));
    }

    pub fn swap(&mut self) {
        self.active = 1 - self.active;
    }

    /// Copy the active buffer into a fresh staging buffer and submit.
    fn stage_active(&self) -> Buffer {
        let staging = self.device.create_buffer(&BufferDescriptor {
            label: Some("cells readback buffer"),
            size: self.bufs[self.active].size(),
            usage: BufferUsages::MAP_READ | BufferUsages::COPY_DST,
            mapped_at_creation: false,
        });
        let mut encoder = self
            .device
            .create_command_encoder(&CommandEncoderDescriptor {
                label: Some("readback encoder"),
            });
        encoder.copy_buffer_to_buffer(&self.bufs[self.active], 0, &staging, 0, None);
        self.queue.submit(std::iter::once(encoder.finish()));
        staging
    }

    pub fn begin_readback(&self) -> GpuReadback {
        let staging = self.stage_active();
        let (tx, rx) = mpsc::channel();
        staging.map_async(wgpu::MapMode::Read, .., move |result| {
            // receiver gone means the sample was invalidated
            let _ = tx.send(result);
        });
        GpuReadback {
            device: self.device.clone(),
            staging: Some(staging),
            rx,
        }
    }

    #[cfg(not(target_arch = "wasm32"))]
    pub fn read_blocking(&self) -> anyhow::Result<Vec<f32>> {
        let staging = self.stage_active();
        let (tx, rx) = futures_intrusive::channel::shared::oneshot_channel();
        staging.map_async(wgpu::MapMode::Read, .., move |result| {
            let _ = tx.send(result);
        });
        self.device.poll(wgpu::PollType::Wait {
            submission_index: None,
            timeout: None,
        })?;
        match pollster::block_on(rx.receive()) {
            Some(Ok(())) => Ok(read_mapped(staging)),
            Some(Err(e)) => Err(e.into()),
            None => Err(anyhow::anyhow!("readback channel closed before mapping")),
        }
    }

    /// The browser can only complete a mapping by yielding to the event
    /// loop, so there is nothing to block on.
    #[cfg(target_arch = "wasm32")]
    pub fn read_blocking(&self) -> anyhow::Result<Vec<f32>> {
        Err(anyhow::anyhow!(
            "blocking readback is not available on this platform"
        ))
    }

    /// Free both feedback buffers and the uniforms now; the pipeline and
    /// bind groups go with `self`.
    pub fn destroy(self) {
        for buf in &self.bufs {
            buf.destroy();
        }
        self.params_buf.destroy();
    }
}

fn read_mapped(staging: Buffer) -> Vec<f32> {
    let cells = {
        let view = staging.get_mapped_range(..);
        bytemuck::cast_slice::<u8, f32>(&view).to_vec()
    };
    staging.unmap();
    staging.destroy();
    cells
}

/// An asynchronous copy of the active buffer. Polling drives the device
/// without blocking.
pub struct GpuReadback {
    device: Arc<Device>,
    staging: Option<Buffer>,
    rx: Receiver<Result<(), BufferAsyncError>>,
}

impl GpuReadback {
    /// A readback that fails on first poll, for a backend that was already
    /// released.
    pub fn closed(device: Arc<Device>) -> Self {
        let (_, rx) = mpsc::channel();
        Self {
            device,
            staging: None,
            rx,
        }
    }
}

impl PendingReadback for GpuReadback {
    fn poll(&mut self) -> ReadbackPoll {
        let _ = self.device.poll(wgpu::PollType::Poll);
        match self.rx.try_recv() {
            Ok(Ok(())) => match self.staging.take() {
                Some(staging) => ReadbackPoll::Ready(read_mapped(staging)),
                None => ReadbackPoll::Failed(anyhow::anyhow!("readback already consumed")),
            },
            Ok(Err(e)) => ReadbackPoll::Failed(e.into()),
            Err(TryRecvError::Empty) => ReadbackPoll::Pending,
            Err(TryRecvError::Disconnected) => {
                ReadbackPoll::Failed(anyhow::anyhow!("readback callback dropped"))
            }
        }
    }
}
