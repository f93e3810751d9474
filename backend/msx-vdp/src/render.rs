//! Pixel types, palettes, and the per-mode line converters.
//!
//! Converters are pure per-call transforms from VRAM bytes to one scanline of host
//! pixels; they carry no state between lines. Callers are responsible for having
//! synchronized VRAM before handing it in (the converters use raw reads only).

pub mod bitmap;
pub mod character;

pub use bitmap::BitmapConverter;
pub use character::CharacterConverter;

use msx_common::frontend::Color;

/// Host pixel type the converters are generic over: palette index, RGB565-style word,
/// packed 32-bit, or the frontend colour struct.
pub trait Pixel: Copy + Default + PartialEq + std::fmt::Debug + 'static {}

impl Pixel for u8 {}
impl Pixel for u16 {}
impl Pixel for u32 {}
impl Pixel for Color {}

/// Fixed TMS9918/9929 palette; MSX1 chips have no writable palette registers.
pub const TMS_PALETTE: [Color; 16] = [
    Color::rgb(0, 0, 0),       // transparent
    Color::rgb(0, 0, 0),       // black
    Color::rgb(33, 200, 66),   // medium green
    Color::rgb(94, 220, 120),  // light green
    Color::rgb(84, 85, 237),   // dark blue
    Color::rgb(125, 118, 252), // light blue
    Color::rgb(212, 82, 77),   // dark red
    Color::rgb(66, 235, 245),  // cyan
    Color::rgb(252, 85, 84),   // medium red
    Color::rgb(255, 121, 120), // light red
    Color::rgb(212, 193, 84),  // dark yellow
    Color::rgb(230, 206, 128), // light yellow
    Color::rgb(33, 176, 59),   // dark green
    Color::rgb(201, 91, 186),  // magenta
    Color::rgb(204, 204, 204), // gray
    Color::rgb(255, 255, 255), // white
];

/// Expand a 9-bit GRB palette word (bits 10-8 G, 6-4 R, 2-0 B) to a host colour.
#[must_use]
pub fn grb_to_color(grb: u16) -> Color {
    let scale3 = |v: u16| ((v * 255) / 7) as u8;
    let g = scale3((grb >> 8) & 0x07);
    let r = scale3((grb >> 4) & 0x07);
    let b = scale3(grb & 0x07);
    Color::rgb(r, g, b)
}

/// Graphic7's fixed 256-colour palette: the pixel byte is GGGRRRBB.
#[must_use]
pub fn graphic7_color(byte: u8) -> Color {
    let scale3 = |v: u8| (u16::from(v) * 255 / 7) as u8;
    let scale2 = |v: u8| (u16::from(v) * 255 / 3) as u8;
    let g = scale3(byte >> 5);
    let r = scale3((byte >> 2) & 0x07);
    let b = scale2(byte & 0x03);
    Color::rgb(r, g, b)
}

#[must_use]
pub fn graphic7_palette() -> [Color; 256] {
    std::array::from_fn(|i| graphic7_color(i as u8))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn grb_expansion_extremes() {
        assert_eq!(grb_to_color(0x000), Color::rgb(0, 0, 0));
        assert_eq!(grb_to_color(0x777), Color::rgb(255, 255, 255));
        assert_eq!(grb_to_color(0x700), Color::rgb(0, 255, 0));
        assert_eq!(grb_to_color(0x070), Color::rgb(255, 0, 0));
        assert_eq!(grb_to_color(0x007), Color::rgb(0, 0, 255));
    }

    #[test]
    fn graphic7_palette_extremes() {
        assert_eq!(graphic7_color(0x00), Color::rgb(0, 0, 0));
        assert_eq!(graphic7_color(0xFF), Color::rgb(255, 255, 255));
        assert_eq!(graphic7_color(0xE0), Color::rgb(0, 255, 0));
        assert_eq!(graphic7_color(0x1C), Color::rgb(255, 0, 0));
        assert_eq!(graphic7_color(0x03), Color::rgb(0, 0, 255));
    }
}
