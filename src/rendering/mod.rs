//! Display mapping: cell state to colour, optional grid lines, drag preview.
//!
//! `render.wgsl` does this on the GPU for the plane drawn through the
//! camera; [`display_cells`] is the CPU equivalent used by the headless
//! backend.

use glam::{Mat4, Vec2};
use wgpu::{
    BindGroup, BindGroupDescriptor, BindGroupEntry, BindGroupLayout, BindGroupLayoutDescriptor,
    BindGroupLayoutEntry, Buffer, BufferUsages, CommandEncoderDescriptor, Device, FragmentState,
    LoadOp, MultisampleState, Operations, PipelineLayoutDescriptor, PrimitiveState, Queue,
    RenderPassColorAttachment, RenderPassDescriptor, RenderPipeline, RenderPipelineDescriptor,
    ShaderStages, StoreOp, Surface, SurfaceConfiguration, TextureViewDescriptor, VertexState,
    util::{BufferInitDescriptor, DeviceExt},
};

use bytemuck::{Pod, Zeroable};

use crate::{prefab::StampTexture, util::Color};

/// Opacity of grid lines over the cell colour.
pub const GRID_BLEND: f32 = 0.4;
/// Opacity of the drag preview tint.
pub const PREVIEW_BLEND: f32 = 0.4;

pub const BACKGROUND_COLOR: Color = Color::rgb(5, 5, 5);
const PREVIEW_COLOR: Color = Color::rgb(0, 255, 0);

/// Footprint a pending drop would cover, in normalized grid coordinates.
#[derive(Clone, Copy, Debug, PartialEq)]
pub struct StampPreview {
    pub prefab: &'static str,
    pub min: Vec2,
    pub max: Vec2,
}

impl StampPreview {
    pub fn centered(prefab: &'static str, center: Vec2, size: Vec2) -> Self {
        Self {
            prefab,
            min: center - size * 0.5,
            max: center + size * 0.5,
        }
    }

    pub fn contains(&self, uv: Vec2) -> bool {
        uv.x >= self.min.x && uv.x < self.max.x && uv.y >= self.min.y && uv.y < self.max.y
    }
}

/// Everything the render pass needs for one frame.
#[derive(Clone, Debug)]
pub struct RenderParams {
    pub view_proj: Mat4,
    /// Plane extent in world units (aspect x 1)
    pub plane_size: Vec2,
    pub alive: Color,
    pub dead: Color,
    pub grid_visible: bool,
    pub preview: Option<StampPreview>,
}

/// Uniform block for `render.wgsl` (144 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct RenderUniforms {
    pub view_proj: [[f32; 4]; 4],
    pub alive: [f32; 4],
    pub dead: [f32; 4],
    pub resolution: [u32; 2],
    pub plane_size: [f32; 2],
    pub preview_min: [f32; 2],
    pub preview_max: [f32; 2],
    pub grid_visible: u32,
    pub preview_active: u32,
    pub _padding: [u32; 2],
}

impl RenderUniforms {
    pub fn new(params: &RenderParams, width: u32, height: u32) -> Self {
        let [ar, ag, ab] = params.alive.to_linear();
        let [dr, dg, db] = params.dead.to_linear();
        let (preview_min, preview_max) = params
            .preview
            .map_or(([0.0; 2], [0.0; 2]), |p| (p.min.to_array(), p.max.to_array()));
        Self {
            view_proj: params.view_proj.to_cols_array_2d(),
            alive: [ar, ag, ab, 1.0],
            dead: [dr, dg, db, 1.0],
            resolution: [width, height],
            plane_size: params.plane_size.to_array(),
            preview_min,
            preview_max,
            grid_visible: params.grid_visible as u32,
            preview_active: params.preview.is_some() as u32,
            _padding: [0; 2],
        }
    }
}

/// Weight (0 - 1) of a grid line at continuous grid coordinate `coord`,
/// where `footprint` is how many cells one output pixel spans.
pub fn grid_line_weight(coord: f32, footprint: f32) -> f32 {
    let dist = ((coord - 0.5).rem_euclid(1.0) - 0.5).abs() / footprint.max(f32::EPSILON);
    1.0 - dist.min(1.0)
}

/// Shade `cells` into `buf` (`out_size` pixels, top row first).
/// `preview_stamp` is the texture of the previewed prefab, if any; its set
/// bits are tinted more strongly than the rest of the footprint.
pub fn display_cells(
    cells: &[f32],
    width: usize,
    height: usize,
    params: &RenderParams,
    preview_stamp: Option<&StampTexture>,
    buf: &mut [u32],
    out_size: (usize, usize),
) {
    let (out_w, out_h) = out_size;
    let ratio_x = width as f32 / out_w as f32;
    let ratio_y = height as f32 / out_h as f32;
    let line_color = params.dead.scale(0.5);
    for py in 0..out_h {
        // grid row 0 is at the bottom of the image
        let gy = (out_h - 1 - py) as f32 * ratio_y + ratio_y * 0.5;
        let cell_y = (gy as usize).min(height - 1);
        for px in 0..out_w {
            let gx = px as f32 * ratio_x + ratio_x * 0.5;
            let cell_x = (gx as usize).min(width - 1);
            let state = cells[cell_y * width + cell_x];
            let mut color = params.dead.lerp(&params.alive, state);
            if params.grid_visible {
                let line = grid_line_weight(gx, ratio_x).max(grid_line_weight(gy, ratio_y));
                color = color.lerp(&line_color, line * GRID_BLEND);
            }
            if let Some(preview) = params.preview {
                let uv = Vec2::new(gx / width as f32, gy / height as f32);
                if preview.contains(uv) {
                    let local = (uv - preview.min) / (preview.max - preview.min);
                    let set = preview_stamp.is_some_and(|t| t.sample(local.x, local.y) > 0.5);
                    let strength = if set {
                        PREVIEW_BLEND * 1.5
                    } else {
                        PREVIEW_BLEND * 0.5
                    };
                    color = color.lerp(&PREVIEW_COLOR, strength);
                }
            }
            buf[py * out_w + px] = color.as_u32();
        }
    }
}

/// GPU render pass drawing the cell plane through the camera.
pub struct RenderContext {
    surface: Surface<'static>,
    surface_config: SurfaceConfiguration,
    pipeline: RenderPipeline,
    cells_layout: BindGroupLayout,
    /// `cells_bind_groups[i]` reads feedback buffer `i`
    cells_bind_groups: [BindGroup; 2],
    uniforms_buf: Buffer,
    uniforms_bind_group: BindGroup,
    last_uniforms: Option<RenderUniforms>,
}

impl RenderContext {
    pub fn new(
        device: &Device,
        surface: Surface<'static>,
        surface_config: SurfaceConfiguration,
        buffers: &[Buffer; 2],
        stamp_layout: &BindGroupLayout,
    ) -> Self {
        let shader = device.create_shader_module(wgpu::ShaderModuleDescriptor {
            label: Some("render shader"),
            source: wgpu::ShaderSource::Wgsl(include_str!("./render.wgsl").into()),
        });

        let cells_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("render cells bind group layout"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Storage { read_only: true },
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });
        let cells_bind_groups = Self::cells_bind_groups(device, &cells_layout, buffers);

        let uniforms_layout = device.create_bind_group_layout(&BindGroupLayoutDescriptor {
            label: Some("render uniforms bind group layout"),
            entries: &[BindGroupLayoutEntry {
                binding: 0,
                visibility: ShaderStages::VERTEX | ShaderStages::FRAGMENT,
                ty: wgpu::BindingType::Buffer {
                    ty: wgpu::BufferBindingType::Uniform,
                    has_dynamic_offset: false,
                    min_binding_size: None,
                },
                count: None,
            }],
        });

        let uniforms_buf = device.create_buffer_init(&BufferInitDescriptor {
            label: Some("render uniforms buffer"),
            contents: bytemuck::bytes_of(&RenderUniforms::zeroed()),
            usage: BufferUsages::UNIFORM | BufferUsages::COPY_DST,
        });

        let uniforms_bind_group = device.create_bind_group(&BindGroupDescriptor {
            label: Some("render uniforms bind group"),
            layout: &uniforms_layout,
            entries: &[BindGroupEntry {
                binding: 0,
                resource: uniforms_buf.as_entire_binding(),
            }],
        });

        let pipeline_layout = device.create_pipeline_layout(&PipelineLayoutDescriptor {
            label: Some("render pipeline layout"),
            bind_group_layouts: &[&cells_layout, &uniforms_layout, stamp_layout],
            push_constant_ranges: &[],
        });

        let pipeline = device.create_render_pipeline(&RenderPipelineDescriptor {
            label: Some("render pipeline"),
            layout: Some(&pipeline_layout),
            vertex: VertexState {
                module: &shader,
                entry_point: Some("vs_main"),
                buffers: &[],
                compilation_options: Default::default(),
            },
            fragment: Some(FragmentState {
                module: &shader,
                entry_point: Some("fs_main"),
                targets: &[Some(wgpu::ColorTargetState {
                    format: surface_config.format,
                    blend: Some(wgpu::BlendState::REPLACE),
                    write_mask: wgpu::ColorWrites::ALL,
                })],
                compilation_options: Default::default(),
            }),
            primitive: PrimitiveState {
                topology: wgpu::PrimitiveTopology::TriangleList,
                strip_index_format: None,
                front_face: wgpu::FrontFace::Ccw,
                cull_mode: None,
                unclipped_depth: false,
                polygon_mode: wgpu::PolygonMode::Fill,
                conservative: false,
            },
            depth_stencil: None,
            multisample: MultisampleState {
                count: 1,
                mask: !0,
                alpha_to_coverage_enabled: false,
            },
            multiview: None,
            cache: None,
        });

        Self {
            surface,
            surface_config,
            pipeline,
            cells_layout,
            cells_bind_groups,
            uniforms_buf,
            uniforms_bind_group,
            last_uniforms: None,
        }
    }

    fn cells_bind_groups(
        device: &Device,
        layout: &BindGroupLayout,
        buffers: &[Buffer; 2],
    ) -> [BindGroup; 2] {
        [0, 1].map(|i| {
            device.create_bind_group(&BindGroupDescriptor {
                label: Some(if i == 0 {
                    "render cells bind group (buf1)"
                } else {
                    "render cells bind group (buf2)"
                }),
                layout,
                entries: &[BindGroupEntry {
                    binding: 0,
                    resource: buffers[i].as_entire_binding(),
                }],
            })
        })
    }

    /// Point the cell bind groups at a new pair of feedback buffers.
    pub fn rebind(&mut self, device: &Device, buffers: &[Buffer; 2]) {
        self.cells_bind_groups = Self::cells_bind_groups(device, &self.cells_layout, buffers);
    }

    pub fn configure(&mut self, device: &Device, width: u32, height: u32) {
        if width > 0 && height > 0 {
            self.surface_config.width = width;
            self.surface_config.height = height;
            self.surface.configure(device, &self.surface_config);
        }
    }

    pub fn surface_size(&self) -> (u32, u32) {
        (self.surface_config.width, self.surface_config.height)
    }

    /// Free the uniform buffer now; the pipeline, bind groups and surface
    /// are dropped with `self`.
    pub fn destroy(self) {
        self.uniforms_buf.destroy();
    }

    /// Draw the plane from feedback buffer `active` and present.
    pub fn render(
        &mut self,
        device: &Device,
        queue: &Queue,
        active: usize,
        uniforms: RenderUniforms,
        preview_bind_group: &BindGroup,
    ) -> Result<(), wgpu::SurfaceError> {
        if self.last_uniforms != Some(uniforms) {
            queue.write_buffer(&self.uniforms_buf, 0, bytemuck::bytes_of(&uniforms));
            self.last_uniforms = Some(uniforms);
        }

        let output = self.surface.get_current_texture()?;
        let view = output
            .texture
            .create_view(&TextureViewDescriptor::default());

        let mut encoder = device.create_command_encoder(&CommandEncoderDescriptor {
            label: Some("render encoder"),
        });

        {
            let [r, g, b] = BACKGROUND_COLOR.to_linear();
            let mut render_pass = encoder.begin_render_pass(&RenderPassDescriptor {
                label: Some("render pass"),
                color_attachments: &[Some(RenderPassColorAttachment {
                    view: &view,
                    resolve_target: None,
                    ops: Operations {
                        load: LoadOp::Clear(wgpu::Color {
                            r: r as f64,
                            g: g as f64,
                            b: b as f64,
                            a: 1.0,
                        }),
                        store: StoreOp::Store,
                    },
                    depth_slice: None,
                })],
                depth_stencil_attachment: None,
                timestamp_writes: None,
                occlusion_query_set: None,
            });

            render_pass.set_pipeline(&self.pipeline);
            render_pass.set_bind_group(0, &self.cells_bind_groups[active], &[]);
            render_pass.set_bind_group(1, &self.uniforms_bind_group, &[]);
            render_pass.set_bind_group(2, preview_bind_group, &[]);
            render_pass.draw(0..6, 0..1);
        }

        queue.submit(std::iter::once(encoder.finish()));
        output.present();

        Ok(())
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    fn params(grid_visible: bool) -> RenderParams {
        RenderParams {
            view_proj: Mat4::IDENTITY,
            plane_size: Vec2::ONE,
            alive: Color::rgb(255, 255, 255),
            dead: Color::rgb(0, 0, 0),
            grid_visible,
            preview: None,
        }
    }

    #[test]
    fn uniform_block_matches_wgsl_layout() {
        assert_eq!(std::mem::size_of::<RenderUniforms>(), 144);
    }

    #[test]
    fn grid_lines_sit_on_cell_boundaries() {
        assert!((grid_line_weight(3.0, 0.1) - 1.0).abs() < 1e-6);
        assert_eq!(grid_line_weight(3.5, 0.1), 0.0);
        assert!(grid_line_weight(3.05, 0.1) > 0.0);
    }

    #[test]
    fn cells_map_to_alive_and_dead_colours() {
        // 2x2 grid, bottom-left alive
        let cells = [1.0, 0.0, 0.0, 0.0];
        let mut buf = vec![0u32; 4];
        display_cells(&cells, 2, 2, &params(false), None, &mut buf, (2, 2));
        // output row 1 is grid row 0
        assert_eq!(buf, vec![0x000000, 0x000000, 0xffffff, 0x000000]);
    }

    #[test]
    fn grid_toggle_only_changes_shading() {
        let cells = [1.0; 16];
        let mut plain = vec![0u32; 64];
        let mut gridded = vec![0u32; 64];
        display_cells(&cells, 4, 4, &params(false), None, &mut plain, (8, 8));
        display_cells(&cells, 4, 4, &params(true), None, &mut gridded, (8, 8));
        assert!(plain.iter().all(|&p| p == 0xffffff));
        assert!(gridded.iter().any(|&p| p != 0xffffff));
    }

    #[test]
    fn preview_box_is_half_open() {
        let preview = StampPreview::centered("Block", Vec2::splat(0.5), Vec2::splat(0.25));
        assert!(preview.contains(Vec2::splat(0.375)));
        assert!(!preview.contains(Vec2::splat(0.625)));
    }

    #[test]
    fn preview_highlights_the_pattern_bits() {
        let glider = crate::prefab::CATALOG
            .iter()
            .find(|p| p.name == "Glider")
            .unwrap();
        let stamp = StampTexture::from_prefab(glider);
        let mut with_preview = params(false);
        with_preview.preview = Some(StampPreview::centered(
            "Glider",
            Vec2::splat(0.5),
            Vec2::ONE,
        ));
        let cells = [0.0; 9];
        let mut buf = vec![0u32; 9];
        display_cells(&cells, 3, 3, &with_preview, Some(&stamp), &mut buf, (3, 3));

        let green = |p: u32| (p >> 8) & 0xff;
        // top row reads ".1." and the bottom row "111"
        let (set, unset) = (buf[1], buf[0]);
        assert!(green(set) > green(unset));
        assert!(green(unset) > 0);
        assert_eq!(buf[2], unset);
        assert!(buf[6..].iter().all(|&p| p == set));

        // without the texture the whole footprint gets the faint tint
        let mut faint = vec![0u32; 9];
        display_cells(&cells, 3, 3, &with_preview, None, &mut faint, (3, 3));
        assert!(faint.iter().all(|&p| p == unset));
    }
}
