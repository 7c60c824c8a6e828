use std::{cell::RefCell, sync::Arc};

use glam::Vec2;
use wasm_bindgen::prelude::*;
use watch::{WatchReceiver, WatchSender};
#[cfg(target_arch = "wasm32")]
use web_sys::HtmlCanvasElement;
use winit::{
    event::{ElementState, MouseButton, MouseScrollDelta, WindowEvent},
    event_loop::{ActiveEventLoop, EventLoop, EventLoopProxy},
    keyboard::{Key, NamedKey},
    window::WindowAttributes,
};

#[cfg(target_arch = "wasm32")]
use winit::platform::web::WindowAttributesExtWebSys;

use crate::{
    config::EngineConfig,
    engine::GameEngine,
    gpu::GpuSimRenderer,
    prefab::CATALOG,
    sim::{GameState, StatsSnapshot},
    util::Color,
};

pub mod camera;
pub mod config;
pub mod engine;
pub mod error;
pub mod gpu;
pub mod interaction;
pub mod prefab;
pub mod rendering;
pub mod sim;
pub mod util;

/// Speed change applied by the `[` and `]` keys.
const SPEED_STEP: f32 = 1.5;

/// Message type for GPU renderer events
pub enum GpuMessage {
    Initialized(GpuSimRenderer),
    Error(String),
}

/// A control-surface call queued for the next redraw.
#[derive(Clone, Debug, PartialEq)]
pub enum ControlMessage {
    TogglePlay,
    Clear,
    Reset,
    SetSpeed(f32),
    SetBrushSize(f32),
    SetDrawMode(bool),
    SetSceneDimensions(u32, u32),
    SetColors(Color, Color),
    SetGridVisible(bool),
    SetRandomPercentage(f32),
    ZoomIn,
    ZoomOut,
    ResetCamera,
    PointerMove(f32, f32),
    PointerDown(bool),
    DragOver(f32, f32, String),
    DragLeave,
    Drop(f32, f32, String),
    Dispose,
}

// The event loop and the embedding page share one thread.
thread_local! {
    static CONTROL_QUEUE: RefCell<Vec<ControlMessage>> = const { RefCell::new(Vec::new()) };
    static STATS_RX: RefCell<Option<WatchReceiver<StatsSnapshot>>> = const { RefCell::new(None) };
    static STATE_RX: RefCell<Option<WatchReceiver<GameState>>> = const { RefCell::new(None) };
}

/// Queue `message` for the running application.
pub fn send_control(message: ControlMessage) {
    CONTROL_QUEUE.with(|q| q.borrow_mut().push(message));
}

/// Apply one control message to `engine`.
pub fn apply_control<B: sim::CellBackend>(engine: &mut GameEngine<B>, message: ControlMessage) {
    let result = match message {
        ControlMessage::TogglePlay => {
            let state = engine.toggle_play();
            log::info!("Simulation {state:?}");
            Ok(())
        }
        ControlMessage::Clear => {
            engine.clear();
            Ok(())
        }
        ControlMessage::Reset => {
            engine.reset();
            Ok(())
        }
        ControlMessage::SetSpeed(speed) => engine.set_speed(speed),
        ControlMessage::SetBrushSize(radius) => engine.set_brush_size(radius),
        ControlMessage::SetDrawMode(enabled) => {
            engine.set_draw_mode(enabled);
            Ok(())
        }
        ControlMessage::SetSceneDimensions(width, height) => {
            engine.set_scene_dimensions(width, height)
        }
        ControlMessage::SetColors(alive, dead) => {
            engine.set_colors(alive, dead);
            Ok(())
        }
        ControlMessage::SetGridVisible(visible) => {
            engine.set_grid_visible(visible);
            Ok(())
        }
        ControlMessage::SetRandomPercentage(p) => {
            engine.set_random_percentage(p);
            Ok(())
        }
        ControlMessage::ZoomIn => {
            engine.zoom_in();
            Ok(())
        }
        ControlMessage::ZoomOut => {
            engine.zoom_out();
            Ok(())
        }
        ControlMessage::ResetCamera => {
            engine.reset_camera();
            Ok(())
        }
        ControlMessage::PointerMove(x, y) => {
            engine.pointer_move(x, y);
            Ok(())
        }
        ControlMessage::PointerDown(down) => {
            engine.pointer_down(down);
            Ok(())
        }
        ControlMessage::DragOver(x, y, prefab) => {
            engine.drag_over(x, y, &prefab);
            Ok(())
        }
        ControlMessage::DragLeave => {
            engine.drag_leave();
            Ok(())
        }
        ControlMessage::Drop(x, y, prefab) => {
            engine.drop(x, y, &prefab);
            Ok(())
        }
        ControlMessage::Dispose => {
            engine.dispose();
            Ok(())
        }
    };
    if let Err(e) = result {
        log::warn!("rejected control message: {e}");
    }
}

struct Application {
    proxy: Option<EventLoopProxy<GpuMessage>>,
    engine: Option<GameEngine<GpuSimRenderer>>,
    config: EngineConfig,
    stats_tx: Option<WatchSender<StatsSnapshot>>,
    state_tx: Option<WatchSender<GameState>>,
    /// Prefab picked with the number keys, dropped on the next click
    armed_prefab: Option<&'static str>,
    cursor: Vec2,
    panning: bool,
}

impl Application {
    fn new(
        event_loop: &EventLoop<GpuMessage>,
        config: EngineConfig,
        stats_tx: WatchSender<StatsSnapshot>,
        state_tx: WatchSender<GameState>,
    ) -> Self {
        Self {
            proxy: Some(event_loop.create_proxy()),
            engine: None,
            config,
            stats_tx: Some(stats_tx),
            state_tx: Some(state_tx),
            armed_prefab: None,
            cursor: Vec2::ZERO,
            panning: false,
        }
    }

    fn process_control_messages(&mut self) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let messages: Vec<_> = CONTROL_QUEUE.with(|q| q.borrow_mut().drain(..).collect());
        for message in messages {
            apply_control(engine, message);
        }
    }

    fn start_engine(&mut self, renderer: GpuSimRenderer) {
        let (width, height) = renderer.surface_size();
        let mut engine = match GameEngine::new(renderer, self.config.clone()) {
            Ok(engine) => engine,
            Err(e) => {
                log::error!("invalid engine configuration: {e}");
                return;
            }
        };
        engine.set_viewport(width as f32, height as f32);
        if let Some(tx) = self.stats_tx.take() {
            engine.on_stats_update(move |stats| {
                log::debug!(
                    "generation {}: {} alive, {} dead",
                    stats.generation,
                    stats.alive_count,
                    stats.dead_count
                );
                tx.send(*stats);
            });
        }
        if let Some(tx) = self.state_tx.take() {
            engine.on_state_change(move |state| {
                tx.send(state);
            });
        }
        engine.backend().request_redraw();
        self.engine = Some(engine);
    }

    fn handle_key(&mut self, key: &Key) {
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        let message = match key {
            Key::Named(NamedKey::Space) => ControlMessage::TogglePlay,
            Key::Named(NamedKey::Escape) => {
                self.armed_prefab = None;
                ControlMessage::DragLeave
            }
            Key::Character(c) => match c.as_str() {
                "c" => ControlMessage::Clear,
                "r" => ControlMessage::Reset,
                "g" => ControlMessage::SetGridVisible(!engine.config().grid_visible),
                "d" => ControlMessage::SetDrawMode(!engine.config().draw_mode),
                "+" | "=" => ControlMessage::ZoomIn,
                "-" => ControlMessage::ZoomOut,
                "0" => ControlMessage::ResetCamera,
                "[" => ControlMessage::SetSpeed(engine.config().speed / SPEED_STEP),
                "]" => ControlMessage::SetSpeed(engine.config().speed * SPEED_STEP),
                digit => {
                    let Some(prefab) = digit
                        .parse::<usize>()
                        .ok()
                        .and_then(|n| n.checked_sub(1))
                        .and_then(|i| CATALOG.get(i))
                    else {
                        return;
                    };
                    log::info!(
                        "armed {} ({}, {} cells)",
                        prefab.name,
                        prefab.category.label(),
                        prefab.population()
                    );
                    self.armed_prefab = Some(prefab.name);
                    ControlMessage::DragOver(self.cursor.x, self.cursor.y, prefab.name.into())
                }
            },
            _ => return,
        };
        apply_control(engine, message);
    }

    fn redraw(&mut self, event_loop: &ActiveEventLoop) {
        self.process_control_messages();
        let Some(engine) = self.engine.as_mut() else {
            return;
        };
        if engine.is_disposed() {
            self.engine = None;
            return;
        }
        match engine.frame(util::now_ms()) {
            Ok(()) => {}
            Err(wgpu::SurfaceError::Lost) => {
                let (w, h) = engine.backend().surface_size();
                engine.backend_mut().resize_surface(w, h);
            }
            Err(wgpu::SurfaceError::OutOfMemory) => {
                log::error!("Out of memory!");
                event_loop.exit();
                return;
            }
            Err(e) => log::warn!("Surface error: {e:?}"),
        }
        engine.backend().request_redraw();
    }
}

impl winit::application::ApplicationHandler<GpuMessage> for Application {
    fn resumed(&mut self, event_loop: &ActiveEventLoop) {
        if self.engine.is_some() {
            return;
        }

        #[cfg(target_arch = "wasm32")]
        let window_attrs = {
            let dom_window = web_sys::window().expect("could not get window");
            let canvas: HtmlCanvasElement = dom_window
                .document()
                .expect("could not get document")
                .get_element_by_id("life-surface")
                .expect("could not get element with id `life-surface` as required")
                .dyn_into()
                .expect("`life-surface` is not a canvas");
            WindowAttributes::default().with_canvas(Some(canvas))
        };
        #[cfg(not(target_arch = "wasm32"))]
        let window_attrs = WindowAttributes::default().with_title("lifesim");

        let window = match event_loop.create_window(window_attrs) {
            Ok(window) => Arc::new(window),
            Err(e) => {
                log::error!("failed to create window: {e}");
                return;
            }
        };
        let Some(proxy) = self.proxy.take() else {
            return;
        };
        let (width, height) = (self.config.width, self.config.height);
        let init = GpuSimRenderer::new(window, width, height, CATALOG);

        #[cfg(target_arch = "wasm32")]
        wasm_bindgen_futures::spawn_local(async move {
            let message = match init.await {
                Ok(renderer) => GpuMessage::Initialized(renderer),
                Err(e) => GpuMessage::Error(e.to_string()),
            };
            let _ = proxy.send_event(message);
        });

        #[cfg(not(target_arch = "wasm32"))]
        {
            let message = match pollster::block_on(init) {
                Ok(renderer) => GpuMessage::Initialized(renderer),
                Err(e) => GpuMessage::Error(e.to_string()),
            };
            let _ = proxy.send_event(message);
        }
    }

    fn window_event(
        &mut self,
        event_loop: &ActiveEventLoop,
        _window_id: winit::window::WindowId,
        event: WindowEvent,
    ) {
        match event {
            WindowEvent::CloseRequested | WindowEvent::Destroyed => {
                if let Some(mut engine) = self.engine.take() {
                    engine.dispose();
                }
                event_loop.exit();
            }
            WindowEvent::Resized(size) => {
                if let Some(engine) = self.engine.as_mut() {
                    engine
                        .backend_mut()
                        .resize_surface(size.width, size.height);
                    engine.set_viewport(size.width as f32, size.height as f32);
                }
            }
            WindowEvent::CursorMoved { position, .. } => {
                let position = Vec2::new(position.x as f32, position.y as f32);
                let delta = position - self.cursor;
                self.cursor = position;
                if let Some(engine) = self.engine.as_mut() {
                    if self.panning {
                        engine.pan_by_pixels(delta);
                    }
                    engine.pointer_move(position.x, position.y);
                    if let Some(prefab) = self.armed_prefab {
                        engine.drag_over(position.x, position.y, prefab);
                    }
                }
            }
            WindowEvent::CursorLeft { .. } => {
                self.panning = false;
                if let Some(engine) = self.engine.as_mut() {
                    engine.pointer_down(false);
                    engine.drag_leave();
                }
            }
            WindowEvent::MouseInput { state, button, .. } => {
                let pressed = state == ElementState::Pressed;
                let Some(engine) = self.engine.as_mut() else {
                    return;
                };
                match button {
                    MouseButton::Left if pressed => match self.armed_prefab.take() {
                        Some(prefab) => {
                            engine.drop(self.cursor.x, self.cursor.y, prefab);
                        }
                        None => engine.pointer_down(true),
                    },
                    MouseButton::Left => engine.pointer_down(false),
                    MouseButton::Right => self.panning = pressed,
                    _ => {}
                }
            }
            WindowEvent::MouseWheel { delta, .. } => {
                let y = match delta {
                    MouseScrollDelta::LineDelta(_, y) => y,
                    MouseScrollDelta::PixelDelta(p) => p.y as f32,
                };
                if let Some(engine) = self.engine.as_mut() {
                    if y > 0.0 {
                        engine.zoom_in();
                    } else if y < 0.0 {
                        engine.zoom_out();
                    }
                }
            }
            WindowEvent::KeyboardInput { event, .. }
                if event.state == ElementState::Pressed && !event.repeat =>
            {
                self.handle_key(&event.logical_key);
            }
            WindowEvent::RedrawRequested => self.redraw(event_loop),
            _ => (),
        };
    }

    fn user_event(&mut self, _event_loop: &ActiveEventLoop, event: GpuMessage) {
        match event {
            GpuMessage::Initialized(renderer) => {
                log::info!("GPU renderer initialized successfully");
                self.start_engine(renderer);
            }
            GpuMessage::Error(e) => {
                log::error!("GPU initialization error: {e}");
            }
        }
    }
}

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen(start)]
pub fn initialize() {
    console_error_panic_hook::set_once();
    let _ = fern::Dispatch::new()
        .format(|out, message, record| {
            out.finish(format_args!(
                "[{} {}] {}",
                record.level(),
                record.target(),
                message
            ))
        })
        .level(log::LevelFilter::Debug)
        .chain(fern::Output::call(console_log::log))
        .apply();
}

/// Handle for the embedding page. Calls are queued and applied on the next
/// redraw; getters read the latest published values.
#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
pub struct GameController;

#[cfg(target_arch = "wasm32")]
#[wasm_bindgen]
impl GameController {
    pub fn toggle_play() {
        send_control(ControlMessage::TogglePlay);
    }

    pub fn clear() {
        send_control(ControlMessage::Clear);
    }

    pub fn reset() {
        send_control(ControlMessage::Reset);
    }

    pub fn set_speed(ticks_per_second: f32) {
        send_control(ControlMessage::SetSpeed(ticks_per_second));
    }

    pub fn set_brush_size(radius: f32) {
        send_control(ControlMessage::SetBrushSize(radius));
    }

    pub fn set_draw_mode(enabled: bool) {
        send_control(ControlMessage::SetDrawMode(enabled));
    }

    pub fn set_scene_dimensions(width: u32, height: u32) {
        send_control(ControlMessage::SetSceneDimensions(width, height));
    }

    /// Colours as `#rrggbb`.
    pub fn set_colors(alive: &str, dead: &str) -> Result<(), JsValue> {
        let alive = Color::from_hex(alive).map_err(|e| JsValue::from_str(&e.to_string()))?;
        let dead = Color::from_hex(dead).map_err(|e| JsValue::from_str(&e.to_string()))?;
        send_control(ControlMessage::SetColors(alive, dead));
        Ok(())
    }

    pub fn set_grid_visible(visible: bool) {
        send_control(ControlMessage::SetGridVisible(visible));
    }

    pub fn set_random_percentage(percentage: f32) {
        send_control(ControlMessage::SetRandomPercentage(percentage));
    }

    pub fn zoom_in() {
        send_control(ControlMessage::ZoomIn);
    }

    pub fn zoom_out() {
        send_control(ControlMessage::ZoomOut);
    }

    pub fn reset_camera() {
        send_control(ControlMessage::ResetCamera);
    }

    /// Pointer position in CSS pixels relative to the canvas.
    pub fn pointer_move(x: f32, y: f32) {
        let p = physical(x, y);
        send_control(ControlMessage::PointerMove(p.x, p.y));
    }

    pub fn pointer_down(down: bool) {
        send_control(ControlMessage::PointerDown(down));
    }

    /// Position in CSS pixels relative to the canvas.
    pub fn drag_over(x: f32, y: f32, prefab: String) {
        let p = physical(x, y);
        send_control(ControlMessage::DragOver(p.x, p.y, prefab));
    }

    pub fn drag_leave() {
        send_control(ControlMessage::DragLeave);
    }

    /// Position in CSS pixels relative to the canvas.
    pub fn drop(x: f32, y: f32, prefab: String) {
        let p = physical(x, y);
        send_control(ControlMessage::Drop(p.x, p.y, prefab));
    }

    /// Takes effect at the next redraw, which releases every GPU resource
    /// before the event loop continues.
    pub fn dispose() {
        send_control(ControlMessage::Dispose);
    }

    /// Prefab names in catalog order.
    pub fn prefabs() -> Vec<String> {
        CATALOG.iter().map(|p| p.name.to_string()).collect()
    }

    pub fn generation() -> f64 {
        latest_stats().generation as f64
    }

    pub fn alive_count() -> f64 {
        latest_stats().alive_count as f64
    }

    pub fn dead_count() -> f64 {
        latest_stats().dead_count as f64
    }

    /// "stopped", "running" or "paused"
    pub fn state() -> String {
        let state = STATE_RX.with(|rx| {
            rx.borrow_mut()
                .as_mut()
                .map_or(GameState::Stopped, |rx| rx.get())
        });
        format!("{state:?}").to_lowercase()
    }
}

/// The engine measures the viewport in physical pixels, as winit reports
/// them; the page speaks CSS pixels.
#[cfg(target_arch = "wasm32")]
fn physical(x: f32, y: f32) -> Vec2 {
    let ratio = web_sys::window().map_or(1.0, |w| w.device_pixel_ratio());
    interaction::css_to_physical(Vec2::new(x, y), ratio)
}

/// The last snapshot the running engine published.
pub fn latest_stats() -> StatsSnapshot {
    STATS_RX.with(|rx| {
        rx.borrow_mut()
            .as_mut()
            .map_or_else(StatsSnapshot::default, |rx| rx.get())
    })
}

/// Open the window (or attach to the `life-surface` canvas on the web) and
/// run the engine with the default configuration.
#[wasm_bindgen]
pub fn start() {
    start_with(EngineConfig::default());
}

pub fn start_with(config: EngineConfig) {
    log::info!("Starting lifesim with GPU rendering");

    let event_loop = EventLoop::<GpuMessage>::with_user_event()
        .build()
        .expect("Failed to create event loop");

    let (stats_tx, stats_rx) = watch::channel(StatsSnapshot::default());
    let (state_tx, state_rx) = watch::channel(GameState::default());
    STATS_RX.with(|rx| *rx.borrow_mut() = Some(stats_rx));
    STATE_RX.with(|rx| *rx.borrow_mut() = Some(state_rx));

    #[allow(unused_mut)]
    let mut app = Application::new(&event_loop, config, stats_tx, state_tx);

    #[cfg(target_arch = "wasm32")]
    {
        use winit::platform::web::EventLoopExtWebSys;
        event_loop.spawn_app(app);
    }

    #[cfg(not(target_arch = "wasm32"))]
    {
        event_loop.run_app(&mut app).expect("Event loop error");
    }
}
