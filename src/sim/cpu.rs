//! CPU rendition of the feedback-buffer pair and kernel.
//!
//! Rows are evaluated in parallel with rayon; every cell reads only the
//! active buffer and writes only the back buffer, so the result is the same
//! as one compute dispatch.

use rayon::prelude::*;

use crate::{
    prefab::{CATALOG, Prefab, PrefabCache, StampTexture},
    rendering::{self, RenderParams},
    sim::{
        CellBackend, PendingReadback, ReadbackPoll,
        kernel::{self, KernelUniforms},
    },
};

pub struct CpuBackend {
    cells: [Vec<f32>; 2],
    active: usize,
    width: u32,
    height: u32,
    prefabs: PrefabCache<StampTexture>,
    framebuffer: Vec<u32>,
    readback_latency: u32,
    fail_readbacks: bool,
    fail_blocking_reads: bool,
    steps: u64,
    released: bool,
}

impl CpuBackend {
    pub fn new(width: u32, height: u32) -> Self {
        Self::with_prefabs(width, height, CATALOG)
    }

    pub fn with_prefabs(width: u32, height: u32, catalog: &'static [Prefab]) -> Self {
        let len = width as usize * height as usize;
        Self {
            cells: [vec![0.0; len], vec![0.0; len]],
            active: 0,
            width,
            height,
            prefabs: PrefabCache::build(catalog, StampTexture::from_prefab),
            framebuffer: vec![0; len],
            readback_latency: 0,
            fail_readbacks: false,
            fail_blocking_reads: false,
            steps: 0,
            released: false,
        }
    }

    /// Make readbacks resolve only after `polls` calls to `poll`.
    pub fn with_readback_latency(mut self, polls: u32) -> Self {
        self.readback_latency = polls;
        self
    }

    /// Make every asynchronous readback fail once it resolves.
    pub fn with_failing_readbacks(mut self) -> Self {
        self.fail_readbacks = true;
        self
    }

    /// Make `read_blocking` fail too.
    pub fn with_failing_blocking_reads(mut self) -> Self {
        self.fail_blocking_reads = true;
        self
    }

    pub fn active_cells(&self) -> &[f32] {
        &self.cells[self.active]
    }

    pub fn cell(&self, x: u32, y: u32) -> f32 {
        self.cells[self.active][(y * self.width + x) as usize]
    }

    /// Kernel passes executed so far, rule-evaluating or not.
    pub fn steps(&self) -> u64 {
        self.steps
    }

    /// The last presented frame, one `0xRRGGBB` pixel per cell.
    pub fn framebuffer(&self) -> &[u32] {
        &self.framebuffer
    }

    pub fn is_released(&self) -> bool {
        self.released
    }
}

impl CellBackend for CpuBackend {
    type Readback = CpuReadback;

    fn dimensions(&self) -> (u32, u32) {
        (self.width, self.height)
    }

    fn load(&mut self, cells: &[f32]) {
        debug_assert_eq!(cells.len(), self.cells[self.active].len());
        let back = 1 - self.active;
        self.cells[back].copy_from_slice(cells);
        self.swap();
    }

    fn resize(&mut self, width: u32, height: u32) {
        let len = width as usize * height as usize;
        self.cells = [vec![0.0; len], vec![0.0; len]];
        self.framebuffer = vec![0; len];
        self.active = 0;
        self.width = width;
        self.height = height;
    }

    fn prefab(&self, name: &str) -> Option<&'static Prefab> {
        self.prefabs.prefab(name)
    }

    fn step(&mut self, uniforms: &KernelUniforms, stamp: Option<&str>) {
        let (width, height) = (self.width, self.height);
        let boundary = uniforms.boundary();
        let stamp = stamp.and_then(|name| self.prefabs.get(name));

        let [a, b] = &mut self.cells;
        let (src, dst) = if self.active == 0 {
            (&*a, b)
        } else {
            (&*b, a)
        };
        let read = |x: i64, y: i64| src[kernel::resolve_index(x, y, width, height, boundary)];

        dst.par_chunks_mut(width as usize)
            .enumerate()
            .for_each(|(y, row)| {
                for (x, out) in row.iter_mut().enumerate() {
                    *out = kernel::evaluate_cell(x as u32, y as u32, read, uniforms, stamp);
                }
            });
        self.steps += 1;
    }

    fn swap(&mut self) {
        self.active = 1 - self.active;
    }

    fn begin_readback(&mut self) -> CpuReadback {
        CpuReadback {
            cells: (!self.fail_readbacks).then(|| self.cells[self.active].clone()),
            remaining_polls: self.readback_latency,
        }
    }

    fn read_blocking(&mut self) -> anyhow::Result<Vec<f32>> {
        if self.fail_blocking_reads {
            anyhow::bail!("blocking readback unavailable");
        }
        Ok(self.cells[self.active].clone())
    }

    fn present(&mut self, params: &RenderParams) -> Result<(), wgpu::SurfaceError> {
        let size = (self.width as usize, self.height as usize);
        let preview = params.preview.and_then(|p| self.prefabs.get(p.prefab));
        rendering::display_cells(
            &self.cells[self.active],
            size.0,
            size.1,
            params,
            preview,
            &mut self.framebuffer,
            size,
        );
        Ok(())
    }

    fn release(&mut self) {
        self.cells = [Vec::new(), Vec::new()];
        self.framebuffer = Vec::new();
        self.prefabs.clear();
        self.released = true;
    }
}

/// Snapshot taken at `begin_readback`, handed out after a configurable
/// number of polls. `None` once consumed, or from a backend set up to fail.
pub struct CpuReadback {
    cells: Option<Vec<f32>>,
    remaining_polls: u32,
}

impl PendingReadback for CpuReadback {
    fn poll(&mut self) -> ReadbackPoll {
        if self.remaining_polls > 0 {
            self.remaining_polls -= 1;
            return ReadbackPoll::Pending;
        }
        match self.cells.take() {
            Some(cells) => ReadbackPoll::Ready(cells),
            None => ReadbackPoll::Failed(anyhow::anyhow!("readback mapping failed")),
        }
    }
}
