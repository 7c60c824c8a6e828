use crate::error::ConfigError;

#[derive(Clone, Copy, Debug, PartialEq, Eq)]
pub struct Color {
    r: u8,
    g: u8,
    b: u8,
}

impl Color {
    pub const fn rgb(r: u8, g: u8, b: u8) -> Self {
        Self { r, g, b }
    }

    /// Parse `#rrggbb` or `rrggbb`.
    pub fn from_hex(hex: &str) -> Result<Self, ConfigError> {
        let digits = hex.trim().trim_start_matches('#');
        if digits.len() != 6 || !digits.is_ascii() {
            return Err(ConfigError::InvalidColor(hex.to_string()));
        }
        let channel = |range: std::ops::Range<usize>| {
            u8::from_str_radix(&digits[range], 16)
                .map_err(|_| ConfigError::InvalidColor(hex.to_string()))
        };
        Ok(Self::rgb(channel(0..2)?, channel(2..4)?, channel(4..6)?))
    }

    pub fn as_u32(&self) -> u32 {
        (self.r as u32) << 16 | (self.g as u32) << 8 | (self.b as u32)
    }

    pub fn lerp(&self, other: &Color, factor: f32) -> Color {
        let factor = factor.clamp(0.0, 1.0);
        let r = (self.r as f32 + (other.r as f32 - self.r as f32) * factor).round() as u8;
        let g = (self.g as f32 + (other.g as f32 - self.g as f32) * factor).round() as u8;
        let b = (self.b as f32 + (other.b as f32 - self.b as f32) * factor).round() as u8;
        Color { r, g, b }
    }

    pub fn scale(&self, factor: f32) -> Color {
        Color::rgb(0, 0, 0).lerp(self, factor)
    }

    /// Linear-light channels for an sRGB render target.
    pub fn to_linear(&self) -> [f32; 3] {
        fn decode(c: u8) -> f32 {
            let c = c as f32 / 255.0;
            if c <= 0.04045 {
                c / 12.92
            } else {
                ((c + 0.055) / 1.055).powf(2.4)
            }
        }
        [decode(self.r), decode(self.g), decode(self.b)]
    }
}

/// Milliseconds on a monotonic-enough clock for frame scheduling.
#[cfg(target_arch = "wasm32")]
pub fn now_ms() -> f64 {
    js_sys::Date::now()
}

/// Milliseconds on a monotonic-enough clock for frame scheduling.
#[cfg(not(target_arch = "wasm32"))]
pub fn now_ms() -> f64 {
    use std::{sync::OnceLock, time::Instant};

    static START: OnceLock<Instant> = OnceLock::new();
    START.get_or_init(Instant::now).elapsed().as_secs_f64() * 1000.0
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn parses_hex_with_and_without_hash() {
        assert_eq!(Color::from_hex("#2bd4bf").unwrap(), Color::rgb(43, 212, 191));
        assert_eq!(Color::from_hex("050505").unwrap(), Color::rgb(5, 5, 5));
    }

    #[test]
    fn rejects_malformed_hex() {
        assert!(Color::from_hex("#12345").is_err());
        assert!(Color::from_hex("zzzzzz").is_err());
        assert!(Color::from_hex("#ééé").is_err());
    }

    #[test]
    fn lerp_hits_endpoints() {
        let dead = Color::rgb(5, 5, 5);
        let alive = Color::rgb(43, 212, 191);
        assert_eq!(dead.lerp(&alive, 0.0), dead);
        assert_eq!(dead.lerp(&alive, 1.0), alive);
    }

    #[test]
    fn linear_decode_is_monotonic() {
        let [lo, _, _] = Color::rgb(10, 0, 0).to_linear();
        let [hi, _, _] = Color::rgb(200, 0, 0).to_linear();
        assert!(lo < hi);
        assert!((Color::rgb(255, 255, 255).to_linear()[0] - 1.0).abs() < 1e-6);
    }
}
