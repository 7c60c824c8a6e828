#![allow(dead_code)]

use glam::Vec2;
use lifesim::{
    config::EngineConfig,
    engine::GameEngine,
    interaction::plane_size,
    prefab::Prefab,
    sim::{CellBackend, cpu::CpuBackend},
};

pub const VIEWPORT: f32 = 200.0;

pub fn init_logging() {
    let _ = env_logger::builder().is_test(true).try_init();
}

/// An all-dead grid, stopped, with the whole plane in view.
pub fn empty_engine(width: u32, height: u32) -> GameEngine<CpuBackend> {
    engine_with(CpuBackend::new(width, height), width, height, |_| {})
}

pub fn engine_with(
    backend: CpuBackend,
    width: u32,
    height: u32,
    tweak: impl FnOnce(&mut EngineConfig),
) -> GameEngine<CpuBackend> {
    init_logging();
    let mut config = EngineConfig {
        width,
        height,
        random_percentage: 0.0,
        ..Default::default()
    };
    tweak(&mut config);
    let mut engine = GameEngine::new(backend, config).expect("valid config");
    engine.set_viewport(VIEWPORT, VIEWPORT);
    engine.camera_mut().set_zoom(1.0);
    engine
}

/// Viewport pixel over the centre of cell (`x`, `y`).
pub fn screen_of_cell<B: CellBackend>(engine: &GameEngine<B>, x: u32, y: u32) -> (f32, f32) {
    let (w, h) = engine.backend().dimensions();
    let uv = Vec2::new((x as f32 + 0.5) / w as f32, (y as f32 + 0.5) / h as f32);
    let world = (uv - 0.5) * plane_size(w, h);
    let ndc = engine.camera().view_proj().project_point3(world.extend(0.0));
    let viewport = engine.viewport();
    (
        (ndc.x + 1.0) * 0.5 * viewport.width,
        (1.0 - ndc.y) * 0.5 * viewport.height,
    )
}

/// Coordinates of every live cell, sorted.
pub fn live_cells(engine: &GameEngine<CpuBackend>) -> Vec<(u32, u32)> {
    let (w, h) = engine.backend().dimensions();
    let mut cells = Vec::new();
    for y in 0..h {
        for x in 0..w {
            if engine.backend().cell(x, y) > 0.5 {
                cells.push((x, y));
            }
        }
    }
    cells
}

pub fn interval_ms(engine: &GameEngine<CpuBackend>) -> f64 {
    1000.0 / engine.config().speed as f64
}

pub static SQUARE: [Prefab; 1] = [Prefab {
    name: "Square",
    category: lifesim::prefab::Category::StillLifes,
    rows: &["111", "111", "111"],
}];
