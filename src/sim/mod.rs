//! Cell state storage and the simulation backends.
//!
//! A backend owns the two feedback buffers (one "active", one "back") and
//! knows how to run the kernel from the first into the second. The engine
//! drives it through [`CellBackend`] and never touches buffers directly.

pub mod cpu;
pub mod gpucompute;
pub mod kernel;
pub mod stats;

use crate::{prefab::Prefab, rendering::RenderParams};
use kernel::KernelUniforms;

/// Play/pause state of the engine.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum GameState {
    #[default]
    Stopped,
    Running,
    Paused,
}

/// Population snapshot published by the stats sampler.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub struct StatsSnapshot {
    pub generation: u64,
    pub alive_count: u64,
    pub dead_count: u64,
}

impl StatsSnapshot {
    /// Count cells above the 0.5 alive threshold.
    pub fn count(generation: u64, cells: &[f32]) -> Self {
        let alive_count = cells.iter().filter(|&&c| c > 0.5).count() as u64;
        Self {
            generation,
            alive_count,
            dead_count: cells.len() as u64 - alive_count,
        }
    }

    pub fn total(&self) -> u64 {
        self.alive_count + self.dead_count
    }
}

/// Result of polling an outstanding readback.
pub enum ReadbackPoll {
    Pending,
    Ready(Vec<f32>),
    Failed(anyhow::Error),
}

/// A readback of the active buffer that may complete after later ticks.
pub trait PendingReadback {
    fn poll(&mut self) -> ReadbackPoll;
}

/// The state store plus the kernel that advances it.
pub trait CellBackend {
    type Readback: PendingReadback;

    fn dimensions(&self) -> (u32, u32);

    /// Replace the active buffer's contents.
    fn load(&mut self, cells: &[f32]);

    /// Recreate both buffers at the new size. Contents are undefined until
    /// the next `load`.
    fn resize(&mut self, width: u32, height: u32);

    /// The cached pattern called `name`, if this backend holds a texture
    /// for it.
    fn prefab(&self, name: &str) -> Option<&'static Prefab>;

    /// Run the kernel once from the active buffer into the back buffer,
    /// compositing `stamp` (a prefab name) when the uniforms enable it.
    fn step(&mut self, uniforms: &KernelUniforms, stamp: Option<&str>);

    /// Exchange the active and back roles.
    fn swap(&mut self);

    fn begin_readback(&mut self) -> Self::Readback;

    /// Read the active buffer, waiting for the device if needed.
    fn read_blocking(&mut self) -> anyhow::Result<Vec<f32>>;

    fn present(&mut self, params: &RenderParams) -> Result<(), wgpu::SurfaceError>;

    /// Release buffers, pipelines and cached textures. Nothing may be called
    /// afterwards.
    fn release(&mut self);
}

/// A freshly seeded grid of `width * height` cells, row 0 at the bottom.
pub fn seed_with(width: u32, height: u32, mut seed: impl FnMut(u32, u32) -> bool) -> Vec<f32> {
    let mut cells = Vec::with_capacity(width as usize * height as usize);
    for y in 0..height {
        for x in 0..width {
            cells.push(if seed(x, y) { 1.0 } else { 0.0 });
        }
    }
    cells
}

/// Random soup where each cell is alive with probability `density`.
pub fn seed_random(width: u32, height: u32, density: f32) -> Vec<f32> {
    seed_with(width, height, |_, _| fastrand::f32() < density)
}
