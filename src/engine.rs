//! The game engine: control surface, frame scheduler and observers.
//!
//! Everything runs on the caller's thread, one [`GameEngine::frame`] per
//! display refresh. Within a frame the order is always simulate, swap,
//! render; only the stats readback may resolve on a later frame.

use glam::Vec2;

use crate::{
    camera::Camera,
    config::{self, EngineConfig},
    error::ConfigError,
    interaction::{self, PlaneHit, Viewport},
    prefab::Prefab,
    rendering::{RenderParams, StampPreview},
    sim::{
        CellBackend, GameState, StatsSnapshot, seed_random, seed_with,
        kernel::KernelUniforms,
        stats::{SampleOutcome, StatsSampler},
    },
    util::Color,
};

const TICK_LOG_INTERVAL_MS: f64 = 2000.0;

/// Slack on the tick-due comparison. The clock advances by whole intervals,
/// so a frame exactly one interval later may measure a hair under it.
const TICK_TOLERANCE_MS: f64 = 1e-6;

type StatsObserver = Box<dyn FnMut(&StatsSnapshot)>;
type StateObserver = Box<dyn FnMut(GameState)>;

/// A drop waiting for the next kernel pass.
#[derive(Clone, Copy, Debug)]
struct StampRequest {
    prefab: &'static Prefab,
    uv: Vec2,
}

/// Achieved tick rate, reported at debug level.
#[derive(Default)]
struct TickLog {
    since_ms: Option<f64>,
    ticks: u32,
}

impl TickLog {
    fn record(&mut self, now_ms: f64, ticked: bool) {
        let since = *self.since_ms.get_or_insert(now_ms);
        if ticked {
            self.ticks += 1;
        }
        let elapsed = now_ms - since;
        if elapsed >= TICK_LOG_INTERVAL_MS {
            log::debug!(
                "achieved {:.1} ticks/s",
                self.ticks as f64 * 1000.0 / elapsed
            );
            self.since_ms = Some(now_ms);
            self.ticks = 0;
        }
    }

    fn restart(&mut self) {
        self.since_ms = None;
        self.ticks = 0;
    }
}

pub struct GameEngine<B: CellBackend> {
    backend: B,
    config: EngineConfig,
    camera: Camera,
    viewport: Viewport,
    state: GameState,
    generation: u64,
    last_tick_ms: Option<f64>,
    /// Last pointer position in viewport pixels
    pointer: Option<Vec2>,
    drawing: bool,
    pending_stamp: Option<StampRequest>,
    preview: Option<StampPreview>,
    sampler: StatsSampler<B::Readback>,
    stats: StatsSnapshot,
    stats_observers: Vec<StatsObserver>,
    state_observers: Vec<StateObserver>,
    tick_log: TickLog,
    disposed: bool,
}

impl<B: CellBackend> GameEngine<B> {
    /// Validate `config`, size the backend to it and seed a random soup.
    pub fn new(mut backend: B, config: EngineConfig) -> Result<Self, ConfigError> {
        let config = config.validated()?;
        if backend.dimensions() != (config.width, config.height) {
            backend.resize(config.width, config.height);
        }
        backend.load(&seed_random(
            config.width,
            config.height,
            config.random_percentage,
        ));
        log::info!(
            "engine initialized: {}x{} grid, {} ticks/s, {:?} boundary",
            config.width,
            config.height,
            config.speed,
            config.boundary
        );

        let total = config.cell_count();
        Ok(Self {
            backend,
            camera: Camera::new(config.zoom_min, config.zoom_max),
            viewport: Viewport::default(),
            state: GameState::Stopped,
            generation: 0,
            last_tick_ms: None,
            pointer: None,
            drawing: false,
            pending_stamp: None,
            preview: None,
            sampler: StatsSampler::new(config.stats_interval_ms),
            stats: StatsSnapshot {
                generation: 0,
                alive_count: 0,
                dead_count: total,
            },
            stats_observers: Vec::new(),
            state_observers: Vec::new(),
            tick_log: TickLog::default(),
            disposed: false,
            config,
        })
    }

    /// Replace the grid with `seed(x, y)` (row 0 at the bottom) and restart
    /// the generation count.
    pub fn seed(&mut self, seed: impl FnMut(u32, u32) -> bool) {
        if self.disposed {
            return;
        }
        let (width, height) = self.backend.dimensions();
        self.backend.load(&seed_with(width, height, seed));
        self.restart_generation();
    }

    /// Run one display refresh at time `now_ms`.
    pub fn frame(&mut self, now_ms: f64) -> Result<(), wgpu::SurfaceError> {
        if self.disposed {
            return Ok(());
        }
        let (width, height) = self.backend.dimensions();

        let tick_due = self.state == GameState::Running
            && self
                .last_tick_ms
                .is_none_or(|last| now_ms - last >= self.tick_interval_ms() - TICK_TOLERANCE_MS);
        let stamp = self.pending_stamp.take();

        if tick_due || self.drawing || stamp.is_some() {
            let mut uniforms =
                KernelUniforms::passthrough(width, height, self.config.boundary).with_rule(tick_due);
            if self.drawing {
                let center = self.pointer_hit().map(|hit| hit.uv.to_array());
                uniforms = uniforms.with_brush(center, self.config.brush_size);
            }
            if let Some(stamp) = stamp {
                uniforms = uniforms.with_stamp(
                    stamp.uv.to_array(),
                    stamp.prefab.width(),
                    stamp.prefab.height(),
                );
            }
            self.backend.step(&uniforms, stamp.map(|s| s.prefab.name));
            self.backend.swap();

            if tick_due {
                self.generation += 1;
                self.advance_clock(now_ms);
            }
        }
        if self.state == GameState::Running {
            self.tick_log.record(now_ms, tick_due);
        }

        self.poll_stats();

        let presented = self.backend.present(&self.render_params());

        if self.sampler.is_due(now_ms) {
            let readback = self.backend.begin_readback();
            self.sampler.begin(
                now_ms,
                readback,
                self.generation,
                width as u64 * height as u64,
            );
        }

        presented
    }

    fn tick_interval_ms(&self) -> f64 {
        1000.0 / self.config.speed as f64
    }

    /// Move the tick clock forward by one interval, snapping to the current
    /// phase when more than one interval behind so ticks never burst.
    fn advance_clock(&mut self, now_ms: f64) {
        let interval = self.tick_interval_ms();
        let next = match self.last_tick_ms {
            Some(last) if now_ms - (last + interval) < interval - TICK_TOLERANCE_MS => {
                last + interval
            }
            Some(last) => now_ms - (now_ms - last) % interval,
            None => now_ms,
        };
        self.last_tick_ms = Some(next);
    }

    fn poll_stats(&mut self) {
        match self.sampler.poll() {
            SampleOutcome::Published(snapshot) => self.publish_stats(snapshot),
            SampleOutcome::Failed { generation, error } => {
                log::warn!("async stats readback failed ({error:#}); reading synchronously");
                match self.backend.read_blocking() {
                    Ok(cells) if cells.len() as u64 == self.cell_count() => {
                        self.publish_stats(StatsSnapshot::count(generation, &cells));
                    }
                    Ok(cells) => log::warn!(
                        "blocking readback returned {} cells; stats cycle skipped",
                        cells.len()
                    ),
                    Err(e) => log::warn!("blocking readback failed ({e:#}); stats cycle skipped"),
                }
            }
            SampleOutcome::Idle | SampleOutcome::Pending => {}
        }
    }

    fn publish_stats(&mut self, snapshot: StatsSnapshot) {
        debug_assert_eq!(snapshot.total(), self.cell_count());
        self.stats = snapshot;
        for observer in &mut self.stats_observers {
            observer(&snapshot);
        }
    }

    fn set_state(&mut self, state: GameState) {
        if self.state == state {
            return;
        }
        log::debug!("play state {:?} -> {state:?}", self.state);
        self.state = state;
        for observer in &mut self.state_observers {
            observer(state);
        }
    }

    fn restart_generation(&mut self) {
        self.generation = 0;
        self.pending_stamp = None;
        self.sampler.invalidate();
        self.sampler.request_immediate();
    }

    fn cell_count(&self) -> u64 {
        let (width, height) = self.backend.dimensions();
        width as u64 * height as u64
    }

    fn pick(&self, screen: Vec2) -> Option<PlaneHit> {
        let (width, height) = self.backend.dimensions();
        interaction::pick(&self.camera, self.viewport, screen, width, height)
    }

    fn pointer_hit(&self) -> Option<PlaneHit> {
        self.pointer.and_then(|p| self.pick(p))
    }

    pub fn render_params(&self) -> RenderParams {
        let (width, height) = self.backend.dimensions();
        RenderParams {
            view_proj: self.camera.view_proj(),
            plane_size: interaction::plane_size(width, height),
            alive: self.config.alive_color,
            dead: self.config.dead_color,
            grid_visible: self.config.grid_visible,
            preview: self.preview,
        }
    }

    pub fn set_speed(&mut self, ticks_per_second: f32) -> Result<(), ConfigError> {
        self.config.speed = config::validate_speed(ticks_per_second)?;
        log::debug!("speed set to {} ticks/s", self.config.speed);
        Ok(())
    }

    pub fn set_brush_size(&mut self, radius: f32) -> Result<(), ConfigError> {
        self.config.brush_size = config::validate_brush_size(radius)?;
        Ok(())
    }

    pub fn set_draw_mode(&mut self, enabled: bool) {
        self.config.draw_mode = enabled;
        if !enabled {
            self.drawing = false;
        }
    }

    /// Stopped or paused starts running; running pauses.
    pub fn toggle_play(&mut self) -> GameState {
        let next = match self.state {
            GameState::Stopped | GameState::Paused => GameState::Running,
            GameState::Running => GameState::Paused,
        };
        if next == GameState::Running {
            self.tick_log.restart();
        }
        self.set_state(next);
        next
    }

    /// Kill every cell, stop, and publish empty stats straight away.
    pub fn clear(&mut self) {
        if self.disposed {
            return;
        }
        let (width, height) = self.backend.dimensions();
        self.backend
            .load(&vec![0.0; width as usize * height as usize]);
        self.generation = 0;
        self.pending_stamp = None;
        self.sampler.invalidate();
        self.set_state(GameState::Stopped);
        self.publish_stats(StatsSnapshot {
            generation: 0,
            alive_count: 0,
            dead_count: self.cell_count(),
        });
    }

    /// Reseed at the configured density without touching the play state.
    pub fn reset(&mut self) {
        if self.disposed {
            return;
        }
        let (width, height) = self.backend.dimensions();
        self.backend.load(&seed_random(
            width,
            height,
            self.config.random_percentage,
        ));
        self.restart_generation();
    }

    /// Recreate the grid at a new size and reseed it randomly.
    pub fn set_scene_dimensions(&mut self, width: u32, height: u32) -> Result<(), ConfigError> {
        config::validate_dimensions(width, height)?;
        if self.disposed || self.backend.dimensions() == (width, height) {
            return Ok(());
        }
        self.sampler.invalidate();
        self.backend.resize(width, height);
        self.config.width = width;
        self.config.height = height;
        self.backend
            .load(&seed_random(width, height, self.config.random_percentage));
        self.preview = None;
        self.restart_generation();
        log::info!("grid resized to {width}x{height}");
        Ok(())
    }

    pub fn set_colors(&mut self, alive: Color, dead: Color) {
        self.config.alive_color = alive;
        self.config.dead_color = dead;
    }

    pub fn set_grid_visible(&mut self, visible: bool) {
        self.config.grid_visible = visible;
    }

    pub fn set_random_percentage(&mut self, percentage: f32) {
        self.config.random_percentage = config::clamp_random_percentage(percentage);
    }

    pub fn zoom_in(&mut self) {
        self.camera.zoom_in();
    }

    pub fn zoom_out(&mut self) {
        self.camera.zoom_out();
    }

    pub fn reset_camera(&mut self) {
        self.camera.reset();
    }

    pub fn pan_by_pixels(&mut self, delta: Vec2) {
        self.camera.pan_by_pixels(delta, self.viewport.height);
    }

    /// Size of the drawable area in pixels.
    pub fn set_viewport(&mut self, width: f32, height: f32) {
        self.viewport = Viewport::new(width, height);
        self.camera.set_aspect(self.viewport.aspect());
    }

    pub fn pointer_move(&mut self, x: f32, y: f32) {
        self.pointer = Some(Vec2::new(x, y));
    }

    /// Press or release the primary button. Only starts a stroke in draw
    /// mode.
    pub fn pointer_down(&mut self, down: bool) {
        self.drawing = down && self.config.draw_mode;
    }

    /// Show where `prefab` would land if dropped at (`x`, `y`). Returns
    /// whether the preview is visible.
    pub fn drag_over(&mut self, x: f32, y: f32, prefab: &str) -> bool {
        self.preview = self.stamp_target(x, y, prefab).map(|stamp| {
            let (width, height) = self.backend.dimensions();
            let size = Vec2::new(
                stamp.prefab.width() as f32 / width as f32,
                stamp.prefab.height() as f32 / height as f32,
            );
            StampPreview::centered(stamp.prefab.name, stamp.uv, size)
        });
        self.preview.is_some()
    }

    pub fn drag_leave(&mut self) {
        self.preview = None;
    }

    /// Queue `prefab` to be stamped at (`x`, `y`) on the next frame. Returns
    /// false when the point misses the plane or the prefab is unknown.
    pub fn drop(&mut self, x: f32, y: f32, prefab: &str) -> bool {
        self.preview = None;
        match self.stamp_target(x, y, prefab) {
            Some(stamp) => {
                log::debug!("stamping {} at {}", stamp.prefab.name, stamp.uv);
                self.pending_stamp = Some(stamp);
                true
            }
            None => false,
        }
    }

    fn stamp_target(&self, x: f32, y: f32, prefab: &str) -> Option<StampRequest> {
        let Some(prefab) = self.backend.prefab(prefab) else {
            log::warn!("unknown prefab {prefab:?}");
            return None;
        };
        let hit = self.pick(Vec2::new(x, y))?;
        Some(StampRequest {
            prefab,
            uv: hit.uv,
        })
    }

    pub fn on_stats_update(&mut self, observer: impl FnMut(&StatsSnapshot) + 'static) {
        self.stats_observers.push(Box::new(observer));
    }

    pub fn on_state_change(&mut self, observer: impl FnMut(GameState) + 'static) {
        self.state_observers.push(Box::new(observer));
    }

    /// Release every backend resource. Later frames do nothing and pending
    /// readbacks are never published.
    pub fn dispose(&mut self) {
        if self.disposed {
            return;
        }
        self.sampler.invalidate();
        self.pending_stamp = None;
        self.preview = None;
        self.drawing = false;
        self.backend.release();
        self.disposed = true;
        log::info!("engine disposed");
    }

    pub fn is_disposed(&self) -> bool {
        self.disposed
    }

    pub fn generation(&self) -> u64 {
        self.generation
    }

    pub fn state(&self) -> GameState {
        self.state
    }

    /// The most recently published snapshot.
    pub fn stats(&self) -> StatsSnapshot {
        self.stats
    }

    pub fn config(&self) -> &EngineConfig {
        &self.config
    }

    pub fn camera(&self) -> &Camera {
        &self.camera
    }

    pub fn camera_mut(&mut self) -> &mut Camera {
        &mut self.camera
    }

    pub fn viewport(&self) -> Viewport {
        self.viewport
    }

    pub fn preview(&self) -> Option<StampPreview> {
        self.preview
    }

    pub fn is_drawing(&self) -> bool {
        self.drawing
    }

    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }
}
