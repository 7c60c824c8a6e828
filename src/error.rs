//! Errors raised at the engine's control-surface boundary.
//!
//! GPU setup and readback plumbing report through `anyhow`; everything a
//! caller can get wrong by passing a bad value ends up here instead, before
//! it ever reaches a kernel dispatch.

use thiserror::Error;

#[derive(Debug, Clone, PartialEq, Error)]
pub enum ConfigError {
    #[error("simulation speed must be a positive number of ticks per second, got {0}")]
    InvalidSpeed(f32),

    #[error("brush radius must be positive, got {0}")]
    InvalidBrushSize(f32),

    #[error("grid dimensions {width}x{height} are outside 1..={max}")]
    InvalidDimensions { width: u32, height: u32, max: u32 },

    #[error("zoom range [{min}, {max}] is not a positive, ordered interval")]
    InvalidZoomRange { min: f32, max: f32 },

    #[error("stats interval must be positive, got {0}ms")]
    InvalidStatsInterval(f64),

    #[error("`{0}` is not a #rrggbb colour")]
    InvalidColor(String),
}
