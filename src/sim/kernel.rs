//! The per-cell update program.
//!
//! `evaluate_cell` is the CPU rendition of `shader.wgsl`; both read the same
//! `KernelUniforms` and must agree cell for cell. Precedence inside one pass:
//! stamp bits force a cell alive, then the brush does, and only then is the
//! B3/S23 rule (or pass-through when the rule is disabled) applied.

use bytemuck::{Pod, Zeroable};

use crate::prefab::StampTexture;

/// Brush position used when the pointer is off the plane. Far enough away
/// that no cell is ever inside the brush.
pub const NO_POINTER: [f32; 2] = [-100.0, -100.0];

/// How neighbour reads outside the grid are resolved.
#[derive(Clone, Copy, Debug, Default, PartialEq, Eq)]
pub enum BoundaryMode {
    /// Out-of-grid coordinates read the nearest edge cell.
    #[default]
    Clamp,
    /// Toroidal grid.
    Wrap,
}

/// Uniform block shared with the compute shader. Layout matches the WGSL
/// struct `KernelUniforms` (64 bytes).
#[repr(C)]
#[derive(Copy, Clone, Debug, PartialEq, Pod, Zeroable)]
pub struct KernelUniforms {
    pub resolution: [u32; 2],
    /// Brush centre in normalized grid coordinates
    pub mouse: [f32; 2],
    /// Stamp centre in normalized grid coordinates
    pub stamp_uv: [f32; 2],
    /// Stamp footprint in cells
    pub stamp_size: [u32; 2],
    pub brush_size: f32,
    pub drawing: u32,
    pub simulate: u32,
    pub stamping: u32,
    pub wrap: u32,
    pub _padding: [u32; 3],
}

impl KernelUniforms {
    /// A pass that copies every cell unchanged.
    pub fn passthrough(width: u32, height: u32, boundary: BoundaryMode) -> Self {
        Self {
            resolution: [width, height],
            mouse: NO_POINTER,
            stamp_uv: [0.0, 0.0],
            stamp_size: [0, 0],
            brush_size: 0.0,
            drawing: 0,
            simulate: 0,
            stamping: 0,
            wrap: (boundary == BoundaryMode::Wrap) as u32,
            _padding: [0; 3],
        }
    }

    pub fn with_rule(mut self, simulate: bool) -> Self {
        self.simulate = simulate as u32;
        self
    }

    /// Enable the brush. A `None` centre keeps the brush active but off-grid.
    pub fn with_brush(mut self, center: Option<[f32; 2]>, radius: f32) -> Self {
        self.drawing = 1;
        self.mouse = center.unwrap_or(NO_POINTER);
        self.brush_size = radius;
        self
    }

    pub fn with_stamp(mut self, center: [f32; 2], width: u32, height: u32) -> Self {
        self.stamping = 1;
        self.stamp_uv = center;
        self.stamp_size = [width, height];
        self
    }

    pub fn boundary(&self) -> BoundaryMode {
        if self.wrap != 0 {
            BoundaryMode::Wrap
        } else {
            BoundaryMode::Clamp
        }
    }
}

/// Resolve a possibly out-of-grid coordinate to a cell index.
#[inline(always)]
pub fn resolve_index(x: i64, y: i64, width: u32, height: u32, boundary: BoundaryMode) -> usize {
    let (w, h) = (width as i64, height as i64);
    let (x, y) = match boundary {
        BoundaryMode::Clamp => (x.clamp(0, w - 1), y.clamp(0, h - 1)),
        BoundaryMode::Wrap => (x.rem_euclid(w), y.rem_euclid(h)),
    };
    (y * w + x) as usize
}

/// Sum of the eight neighbours as read through `read`.
#[inline(always)]
pub fn neighbour_sum(x: i64, y: i64, read: impl Fn(i64, i64) -> f32) -> f32 {
    const N: [(i64, i64); 8] = [
        (-1, -1),
        (0, -1),
        (1, -1),
        (-1, 0),
        (1, 0),
        (-1, 1),
        (0, 1),
        (1, 1),
    ];
    N.iter().map(|(dx, dy)| read(x + dx, y + dy)).sum()
}

/// B3/S23 with a tolerance band around the integer sums.
#[inline(always)]
pub fn apply_rule(current: f32, sum: f32) -> f32 {
    if current > 0.5 {
        if !(1.9..=3.1).contains(&sum) {
            0.0
        } else {
            current
        }
    } else if sum > 2.9 && sum < 3.1 {
        1.0
    } else {
        current
    }
}

/// Next state of cell (`x`, `y`). `read` returns prior states and must
/// already apply the boundary policy for out-of-grid coordinates.
pub fn evaluate_cell(
    x: u32,
    y: u32,
    read: impl Fn(i64, i64) -> f32,
    u: &KernelUniforms,
    stamp: Option<&StampTexture>,
) -> f32 {
    let (w, h) = (u.resolution[0] as f32, u.resolution[1] as f32);
    let uv = [(x as f32 + 0.5) / w, (y as f32 + 0.5) / h];

    if u.stamping != 0
        && let Some(tex) = stamp
    {
        let size = [u.stamp_size[0] as f32 / w, u.stamp_size[1] as f32 / h];
        let min = [u.stamp_uv[0] - size[0] * 0.5, u.stamp_uv[1] - size[1] * 0.5];
        let max = [u.stamp_uv[0] + size[0] * 0.5, u.stamp_uv[1] + size[1] * 0.5];
        if uv[0] >= min[0] && uv[0] < max[0] && uv[1] >= min[1] && uv[1] < max[1] {
            let local = [(uv[0] - min[0]) / size[0], (uv[1] - min[1]) / size[1]];
            if tex.sample(local[0], local[1]) > 0.5 {
                return 1.0;
            }
        }
    }

    if u.drawing != 0 {
        let aspect = w / h;
        let dx = (uv[0] - u.mouse[0]) * aspect;
        let dy = uv[1] - u.mouse[1];
        if (dx * dx + dy * dy).sqrt() < u.brush_size {
            return 1.0;
        }
    }

    let (x, y) = (x as i64, y as i64);
    let current = read(x, y);
    if u.simulate == 0 {
        return current;
    }
    apply_rule(current, neighbour_sum(x, y, read))
}
