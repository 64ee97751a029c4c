//! Hex color parsing for overlay decorations

use x11rb::protocol::render::Color;

/// An ARGB color parsed from `#RRGGBB` or `#AARRGGBB` (the `#` is optional)
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct HexColor(u32);

impl HexColor {
    pub fn parse(input: &str) -> Option<Self> {
        let hex = input.trim().trim_start_matches('#');
        if !hex.chars().all(|c| c.is_ascii_hexdigit()) {
            return None;
        }
        let value = u32::from_str_radix(hex, 16).ok()?;
        match hex.len() {
            6 => Some(Self(0xFF00_0000 | value)),
            8 => Some(Self(value)),
            _ => None,
        }
    }

    pub const fn from_argb32(argb: u32) -> Self {
        Self(argb)
    }

    fn channel(self, shift: u32) -> u8 {
        (self.0 >> shift) as u8
    }

    /// RENDER color with 16-bit channels, premultiplied by alpha
    pub fn to_x11_color(self) -> Color {
        let alpha = u32::from(self.channel(24));
        let premultiply = |c: u8| ((u32::from(c) * 257 * alpha) / 255) as u16;
        Color {
            red: premultiply(self.channel(16)),
            green: premultiply(self.channel(8)),
            blue: premultiply(self.channel(0)),
            alpha: (alpha * 257) as u16,
        }
    }

    pub fn to_hex_string(self) -> String {
        format!("#{:08X}", self.0)
    }
}
