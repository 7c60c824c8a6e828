//! Engine configuration and the validation applied at the API boundary.

use crate::{error::ConfigError, sim::kernel::BoundaryMode, util::Color};

/// Largest accepted grid edge. 4096² cells fits comfortably inside the
/// downlevel storage-buffer binding limit.
pub const MAX_GRID_DIMENSION: u32 = 4096;

/// Random seeding density is capped; denser soups die off almost instantly.
pub const MAX_RANDOM_PERCENTAGE: f32 = 0.5;

pub const DEFAULT_GRID_SIZE: u32 = 512;

/// The configurable parameters of the engine
#[derive(Clone, Debug, PartialEq)]
pub struct EngineConfig {
    pub width: u32,
    pub height: u32,
    /// Rule ticks per second while running
    pub speed: f32,
    /// Brush radius in normalized grid units (fraction of grid height)
    pub brush_size: f32,
    pub draw_mode: bool,
    /// Probability (0 - 0.5) that a cell starts alive on random seeding
    pub random_percentage: f32,
    pub alive_color: Color,
    pub dead_color: Color,
    pub grid_visible: bool,
    pub zoom_min: f32,
    pub zoom_max: f32,
    pub stats_interval_ms: f64,
    pub boundary: BoundaryMode,
}

impl Default for EngineConfig {
    fn default() -> Self {
        Self {
            width: DEFAULT_GRID_SIZE,
            height: DEFAULT_GRID_SIZE,
            speed: 30.0,
            brush_size: 0.01,
            draw_mode: true,
            random_percentage: 0.2,
            alive_color: Color::rgb(43, 212, 191),
            dead_color: Color::rgb(5, 5, 5),
            grid_visible: false,
            zoom_min: 0.5,
            zoom_max: 50.0,
            stats_interval_ms: 1000.0,
            boundary: BoundaryMode::Clamp,
        }
    }
}

impl EngineConfig {
    /// Check every field, clamping the ones that are clamped rather than
    /// rejected.
    pub fn validated(mut self) -> Result<Self, ConfigError> {
        validate_dimensions(self.width, self.height)?;
        self.speed = validate_speed(self.speed)?;
        self.brush_size = validate_brush_size(self.brush_size)?;
        self.random_percentage = clamp_random_percentage(self.random_percentage);
        if !(self.zoom_min.is_finite()
            && self.zoom_max.is_finite()
            && self.zoom_min > 0.0
            && self.zoom_min <= self.zoom_max)
        {
            return Err(ConfigError::InvalidZoomRange {
                min: self.zoom_min,
                max: self.zoom_max,
            });
        }
        if !(self.stats_interval_ms.is_finite() && self.stats_interval_ms > 0.0) {
            return Err(ConfigError::InvalidStatsInterval(self.stats_interval_ms));
        }
        Ok(self)
    }

    pub fn cell_count(&self) -> u64 {
        self.width as u64 * self.height as u64
    }
}

pub fn validate_speed(speed: f32) -> Result<f32, ConfigError> {
    if speed.is_finite() && speed > 0.0 {
        Ok(speed)
    } else {
        Err(ConfigError::InvalidSpeed(speed))
    }
}

pub fn validate_brush_size(radius: f32) -> Result<f32, ConfigError> {
    if radius.is_finite() && radius > 0.0 {
        Ok(radius)
    } else {
        Err(ConfigError::InvalidBrushSize(radius))
    }
}

pub fn validate_dimensions(width: u32, height: u32) -> Result<(), ConfigError> {
    let range = 1..=MAX_GRID_DIMENSION;
    if range.contains(&width) && range.contains(&height) {
        Ok(())
    } else {
        Err(ConfigError::InvalidDimensions {
            width,
            height,
            max: MAX_GRID_DIMENSION,
        })
    }
}

pub fn clamp_random_percentage(p: f32) -> f32 {
    let clamped = if p.is_nan() {
        0.0
    } else {
        p.clamp(0.0, MAX_RANDOM_PERCENTAGE)
    };
    if clamped != p {
        log::warn!("random percentage {p} clamped to {clamped}");
    }
    clamped
}
