//! Integrated GPU backend: one device and queue shared by the life kernel
//! and the render pass, both reading the same feedback buffers.

use std::sync::Arc;

use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, Device, Instance, Queue,
    SurfaceConfiguration, Texture, TextureUsages, util::DeviceExt,
};
use winit::window::Window;

use crate::{
    prefab::{Prefab, PrefabCache, StampTexture},
    rendering::{RenderContext, RenderParams, RenderUniforms},
    sim::{
        CellBackend,
        gpucompute::{self, ComputeContext, GpuReadback},
        kernel::KernelUniforms,
    },
};

/// A prefab uploaded as an R32Float texture, bound for both pipelines.
pub struct GpuStampTexture {
    texture: Texture,
    bind_group: BindGroup,
}

impl GpuStampTexture {
    pub fn new(
        device: &Device,
        queue: &Queue,
        layout: &BindGroupLayout,
        label: &str,
        stamp: &StampTexture,
    ) -> Self {
        let texture = device.create_texture_with_data(
            queue,
            &wgpu::TextureDescriptor {
                label: Some(label),
                size: wgpu::Extent3d {
                    width: stamp.width,
                    height: stamp.height,
                    depth_or_array_layers: 1,
                },
                mip_level_count: 1,
                sample_count: 1,
                dimension: wgpu::TextureDimension::D2,
                format: wgpu::TextureFormat::R32Float,
                usage: TextureUsages::TEXTURE_BINDING | TextureUsages::COPY_DST,
                view_formats: &[],
            },
            wgpu::util::TextureDataOrder::LayerMajor,
            bytemuck::cast_slice(&stamp.texels),
        );
        let view = texture.create_view(&wgpu::TextureViewDescriptor::default());
        let bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some(label),
            layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: wgpu::BindingResource::TextureView(&view),
            }],
        });
        Self {
            texture,
            bind_group,
        }
    }

    /// Bound when no stamp or preview is active; a single dead texel.
    pub fn empty(device: &Device, queue: &Queue, layout: &BindGroupLayout) -> Self {
        let stamp = StampTexture {
            width: 1,
            height: 1,
            texels: vec![0.0],
        };
        Self::new(device, queue, layout, "empty stamp", &stamp)
    }

    pub fn bind_group(&self) -> &BindGroup {
        &self.bind_group
    }

    pub fn destroy(self) {
        self.texture.destroy();
    }
}

/// Everything `release` tears down.
struct GpuResources {
    compute: ComputeContext,
    render: RenderContext,
    prefabs: PrefabCache<GpuStampTexture>,
    empty_stamp: GpuStampTexture,
}

impl GpuResources {
    fn destroy(mut self) {
        for texture in self.prefabs.drain() {
            texture.destroy();
        }
        self.empty_stamp.destroy();
        self.compute.destroy();
        self.render.destroy();
    }
}

pub struct GpuSimRenderer {
    #[allow(dead_code)]
    instance: Instance, // keeps the surface's instance alive
    device: Arc<Device>,
    queue: Arc<Queue>,
    window: Arc<Window>,
    /// `None` once released
    resources: Option<GpuResources>,
    dimensions: (u32, u32),
}

impl GpuSimRenderer {
    /// Create the device, surface, both pipelines and the prefab textures
    /// for a `width` x `height` grid. The buffers start zeroed.
    pub async fn new(
        window: Arc<Window>,
        width: u32,
        height: u32,
        catalog: &'static [Prefab],
    ) -> Result<Self, anyhow::Error> {
        let instance = Instance::new(&wgpu::InstanceDescriptor::default());

        let surface = instance.create_surface(window.clone())?;

        let adapter = instance
            .request_adapter(&wgpu::RequestAdapterOptions {
                power_preference: wgpu::PowerPreference::HighPerformance,
                force_fallback_adapter: false,
                compatible_surface: Some(&surface),
            })
            .await?;

        log::info!("Using adapter: {:?}", adapter.get_info());

        let downlevel_caps = adapter.get_downlevel_capabilities();
        if !downlevel_caps
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return Err(anyhow::anyhow!("adapter does not support compute shaders"));
        }

        let (device, queue) = adapter
            .request_device(&wgpu::DeviceDescriptor {
                label: Some("lifesim device"),
                required_features: wgpu::Features::empty(),
                required_limits: wgpu::Limits::downlevel_defaults(),
                experimental_features: wgpu::ExperimentalFeatures::disabled(),
                memory_hints: wgpu::MemoryHints::MemoryUsage,
                trace: wgpu::Trace::Off,
            })
            .await?;

        let device = Arc::new(device);
        let queue = Arc::new(queue);

        let size = window.inner_size();
        let surface_caps = surface.get_capabilities(&adapter);
        let surface_format = surface_caps
            .formats
            .iter()
            .find(|f| f.is_srgb())
            .or(surface_caps.formats.first())
            .copied()
            .ok_or_else(|| anyhow::anyhow!("surface reports no supported formats"))?;

        let surface_config = SurfaceConfiguration {
            usage: TextureUsages::RENDER_ATTACHMENT,
            format: surface_format,
            width: size.width.max(1),
            height: size.height.max(1),
            present_mode: wgpu::PresentMode::AutoVsync,
            alpha_mode: surface_caps
                .alpha_modes
                .first()
                .copied()
                .unwrap_or(wgpu::CompositeAlphaMode::Auto),
            view_formats: vec![],
            desired_maximum_frame_latency: 2,
        };
        surface.configure(&device, &surface_config);

        let stamp_layout = gpucompute::stamp_bind_group_layout(&device);
        let compute = ComputeContext::new(
            device.clone(),
            queue.clone(),
            width,
            height,
            &stamp_layout,
        );
        let render = RenderContext::new(
            &device,
            surface,
            surface_config,
            compute.buffers(),
            &stamp_layout,
        );

        let prefabs = PrefabCache::build(catalog, |prefab| {
            GpuStampTexture::new(
                &device,
                &queue,
                &stamp_layout,
                prefab.name,
                &StampTexture::from_prefab(prefab),
            )
        });
        let empty_stamp = GpuStampTexture::empty(&device, &queue, &stamp_layout);

        Ok(Self {
            instance,
            device,
            queue,
            window,
            resources: Some(GpuResources {
                compute,
                render,
                prefabs,
                empty_stamp,
            }),
            dimensions: (width, height),
        })
    }

    /// Call after each frame to keep the animation loop going.
    pub fn request_redraw(&self) {
        self.window.request_redraw();
    }

    /// Reconfigure the surface after the window changed size.
    pub fn resize_surface(&mut self, width: u32, height: u32) {
        if let Some(res) = self.resources.as_mut() {
            res.render.configure(&self.device, width, height);
        }
    }

    pub fn surface_size(&self) -> (u32, u32) {
        self.resources
            .as_ref()
            .map_or((0, 0), |res| res.render.surface_size())
    }

    pub fn is_released(&self) -> bool {
        self.resources.is_none()
    }
}

impl CellBackend for GpuSimRenderer {
    type Readback = GpuReadback;

    fn dimensions(&self) -> (u32, u32) {
        self.dimensions
    }

    fn load(&mut self, cells: &[f32]) {
        if let Some(res) = self.resources.as_mut() {
            res.compute.load(cells);
        }
    }

    fn resize(&mut self, width: u32, height: u32) {
        if let Some(res) = self.resources.as_mut() {
            res.compute.resize(width, height);
            res.render.rebind(&self.device, res.compute.buffers());
            self.dimensions = (width, height);
        }
    }

    fn prefab(&self, name: &str) -> Option<&'static Prefab> {
        self.resources.as_ref()?.prefabs.prefab(name)
    }

    fn step(&mut self, uniforms: &KernelUniforms, stamp: Option<&str>) {
        let Some(res) = self.resources.as_mut() else {
            return;
        };
        let stamp = stamp
            .and_then(|name| res.prefabs.get(name))
            .unwrap_or(&res.empty_stamp);
        res.compute.step(uniforms, &stamp.bind_group);
    }

    fn swap(&mut self) {
        if let Some(res) = self.resources.as_mut() {
            res.compute.swap();
        }
    }

    fn begin_readback(&mut self) -> GpuReadback {
        match self.resources.as_ref() {
            Some(res) => res.compute.begin_readback(),
            None => GpuReadback::closed(self.device.clone()),
        }
    }

    fn read_blocking(&mut self) -> anyhow::Result<Vec<f32>> {
        match self.resources.as_ref() {
            Some(res) => res.compute.read_blocking(),
            None => Err(anyhow::anyhow!("renderer already released")),
        }
    }

    fn present(&mut self, params: &RenderParams) -> Result<(), wgpu::SurfaceError> {
        let Some(res) = self.resources.as_mut() else {
            return Ok(());
        };
        let (width, height) = res.compute.dimensions();
        let uniforms = RenderUniforms::new(params, width, height);
        let preview = params
            .preview
            .and_then(|p| res.prefabs.get(p.prefab))
            .unwrap_or(&res.empty_stamp);
        res.render.render(
            &self.device,
            &self.queue,
            res.compute.active(),
            uniforms,
            &preview.bind_group,
        )
    }

    /// Destroy buffers and textures and drop pipelines and the surface
    /// before returning.
    fn release(&mut self) {
        if let Some(res) = self.resources.take() {
            res.destroy();
            let _ = self.device.poll(wgpu::PollType::Poll);
            log::info!("GPU resources released");
        }
    }
}

#[cfg(all(test, not(target_arch = "wasm32")))]
mod tests {
    use super::*;
    use crate::{
        prefab::CATALOG,
        sim::{cpu::CpuBackend, kernel::BoundaryMode, seed_with},
    };

    /// A headless device, or `None` on machines without a usable adapter.
    fn headless_device() -> Option<(Arc<Device>, Arc<Queue>)> {
        let instance = Instance::new(&wgpu::InstanceDescriptor::default());
        let adapter =
            pollster::block_on(instance.request_adapter(&wgpu::RequestAdapterOptions::default()))
                .ok()?;
        if !adapter
            .get_downlevel_capabilities()
            .flags
            .contains(wgpu::DownlevelFlags::COMPUTE_SHADERS)
        {
            return None;
        }
        let (device, queue) = pollster::block_on(adapter.request_device(&wgpu::DeviceDescriptor {
            label: Some("lifesim test device"),
            required_features: wgpu::Features::empty(),
            required_limits: wgpu::Limits::downlevel_defaults(),
            experimental_features: wgpu::ExperimentalFeatures::disabled(),
            memory_hints: wgpu::MemoryHints::MemoryUsage,
            trace: wgpu::Trace::Off,
        }))
        .ok()?;
        Some((Arc::new(device), Arc::new(queue)))
    }

    #[test]
    fn compute_pass_matches_cpu_kernel_then_releases() {
        let _ = env_logger::builder().is_test(true).try_init();
        let Some((device, queue)) = headless_device() else {
            log::warn!("no compute-capable adapter; skipping");
            return;
        };
        let (w, h) = (16, 16);
        let layout = gpucompute::stamp_bind_group_layout(&device);
        let mut compute = ComputeContext::new(device.clone(), queue.clone(), w, h, &layout);
        let glider = CATALOG.iter().find(|p| p.name == "Glider").unwrap();
        let stamp = GpuStampTexture::new(
            &device,
            &queue,
            &layout,
            glider.name,
            &StampTexture::from_prefab(glider),
        );
        let empty = GpuStampTexture::empty(&device, &queue, &layout);

        let seed = seed_with(w, h, |x, y| x == 4 && (3..=5).contains(&y));
        let mut cpu = CpuBackend::new(w, h);
        compute.load(&seed);
        cpu.load(&seed);

        let passes = [
            (
                KernelUniforms::passthrough(w, h, BoundaryMode::Clamp).with_rule(true),
                None,
            ),
            (
                KernelUniforms::passthrough(w, h, BoundaryMode::Clamp)
                    .with_stamp([12.5 / 16.0, 12.5 / 16.0], 3, 3),
                Some(glider.name),
            ),
        ];
        for (uniforms, stamp_name) in passes {
            let bind_group = if stamp_name.is_some() {
                stamp.bind_group()
            } else {
                empty.bind_group()
            };
            compute.step(&uniforms, bind_group);
            compute.swap();
            cpu.step(&uniforms, stamp_name);
            cpu.swap();
            assert_eq!(compute.read_blocking().unwrap(), cpu.active_cells());
        }

        stamp.destroy();
        empty.destroy();
        compute.destroy();
        device
            .poll(wgpu::PollType::Wait {
                submission_index: None,
                timeout: None,
            })
            .unwrap();
    }
}
