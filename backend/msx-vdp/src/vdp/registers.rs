//! Control register file, chip versions, and the display mode derived from M1-M5.

use crate::vram::VramSize;
use crate::VdpConfigError;
use bincode::{Decode, Encode};
use msx_common::frontend::TimingMode;
use msx_common::num::GetBit;
use std::fmt::{Display, Formatter};
use std::str::FromStr;

pub const REGISTER_COUNT: usize = 64;

// MSX1 exposes 8 registers, mirrored across the index space.
const VALUE_MASKS_MSX1: [u8; 8] = [0x03, 0xFB, 0x0F, 0xFF, 0x07, 0x7F, 0x07, 0xFF];

const VALUE_MASKS_MSX2: [u8; REGISTER_COUNT] = [
    0x7E, 0x7B, 0x7F, 0xFF, 0x3F, 0xFF, 0x3F, 0xFF, // R#0-R#7
    0xFB, 0xBF, 0x07, 0x03, 0xFF, 0xFF, 0x07, 0x0F, // R#8-R#15
    0x0F, 0xBF, 0xFF, 0xFF, 0x3F, 0x3F, 0x3F, 0xFF, // R#16-R#23
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // R#24-R#31
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, // R#32-R#39 (command engine)
    0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0xFF, 0x00, // R#40-R#47
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // R#48-R#55
    0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, 0x00, // R#56-R#63
];

/// V9938 power-on palette, stored in wire order: bits 10-8 = G, 6-4 = R, 2-0 = B.
pub const DEFAULT_PALETTE: [u16; 16] = [
    0x000, 0x000, 0x611, 0x733, 0x117, 0x327, 0x151, 0x627, 0x171, 0x373, 0x661, 0x664, 0x411,
    0x265, 0x555, 0x777,
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub enum VdpVersion {
    /// TMS9918A/TMS99X8A, the NTSC MSX1 chip.
    Tms99X8A,
    /// TMS9929A, the PAL MSX1 chip.
    Tms9929A,
    /// V9938 (MSX2).
    V9938,
    /// V9958 (MSX2+).
    V9958,
}

impl VdpVersion {
    #[must_use]
    pub const fn is_msx1(self) -> bool {
        matches!(self, Self::Tms99X8A | Self::Tms9929A)
    }

    /// Mask applied to the register index in a control-port register write.
    #[must_use]
    pub const fn register_index_mask(self) -> u8 {
        if self.is_msx1() { 0x07 } else { 0x3F }
    }

    /// Timing the chip is wired for; MSX2 chips are switchable via R#9.
    #[must_use]
    pub const fn default_timing(self) -> TimingMode {
        match self {
            Self::Tms9929A => TimingMode::Pal,
            Self::Tms99X8A | Self::V9938 | Self::V9958 => TimingMode::Ntsc,
        }
    }

    pub(crate) fn check_vram_size(self, size: VramSize) -> Result<(), VdpConfigError> {
        let supported = if self.is_msx1() {
            size == VramSize::Kb16
        } else {
            matches!(size, VramSize::Kb64 | VramSize::Kb128)
        };
        if supported {
            Ok(())
        } else {
            Err(VdpConfigError::VramSizeMismatch {
                version: self,
                vram_kb: (size.len() / 1024) as u32,
            })
        }
    }
}

impl Display for VdpVersion {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Tms99X8A => write!(f, "TMS99X8A"),
            Self::Tms9929A => write!(f, "TMS9929A"),
            Self::V9938 => write!(f, "V9938"),
            Self::V9958 => write!(f, "V9958"),
        }
    }
}

impl FromStr for VdpVersion {
    type Err = VdpConfigError;

    fn from_str(s: &str) -> Result<Self, Self::Err> {
        match s.to_ascii_uppercase().as_str() {
            "TMS99X8A" | "TMS9918A" | "TMS9918" => Ok(Self::Tms99X8A),
            "TMS9929A" | "TMS9929" => Ok(Self::Tms9929A),
            "V9938" => Ok(Self::V9938),
            "V9958" => Ok(Self::V9958),
            _ => Err(VdpConfigError::UnknownVersion(s.into())),
        }
    }
}

/// Display mode decoded from the 5-bit M5 M4 M3 M2 M1 code.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum DisplayMode {
    #[default]
    Graphic1,
    Text1,
    Multicolor,
    Graphic2,
    Text1Q,
    MulticolorQ,
    Graphic3,
    Text2,
    Graphic4,
    Graphic5,
    Graphic6,
    Graphic7,
    /// Any undefined M1-M5 combination; renders a fixed blank pattern.
    Bogus,
}

impl DisplayMode {
    /// Bits 4-2 come from R#0 bits 3-1 (M5 M4 M3), bits 1-0 from R#1 bits 3-4 (M2 M1).
    #[must_use]
    pub fn from_registers(r0: u8, r1: u8) -> Self {
        let code = ((r0 & 0x0E) << 1) | (u8::from(r1.bit(3)) << 1) | u8::from(r1.bit(4));
        Self::from_code(code)
    }

    #[must_use]
    pub fn from_code(code: u8) -> Self {
        match code {
            0x00 => Self::Graphic1,
            0x01 => Self::Text1,
            0x02 => Self::Multicolor,
            0x04 => Self::Graphic2,
            0x05 => Self::Text1Q,
            0x06 => Self::MulticolorQ,
            0x08 => Self::Graphic3,
            0x09 => Self::Text2,
            0x0C => Self::Graphic4,
            0x10 => Self::Graphic5,
            0x14 => Self::Graphic6,
            0x1C => Self::Graphic7,
            _ => Self::Bogus,
        }
    }

    #[must_use]
    pub const fn is_text(self) -> bool {
        matches!(self, Self::Text1 | Self::Text1Q | Self::Text2)
    }

    /// Linear or planar byte-per-pixel modes without name/pattern indirection.
    #[must_use]
    pub const fn is_bitmap(self) -> bool {
        matches!(self, Self::Graphic4 | Self::Graphic5 | Self::Graphic6 | Self::Graphic7)
    }

    /// Even/odd bytes split across VRAM halves.
    #[must_use]
    pub const fn is_planar(self) -> bool {
        matches!(self, Self::Graphic6 | Self::Graphic7)
    }

    /// Native display pixels per line (text border differences excluded).
    #[must_use]
    pub const fn line_width(self) -> u16 {
        match self {
            Self::Graphic5 | Self::Graphic6 => 512,
            Self::Text2 => 480,
            Self::Text1 | Self::Text1Q => 240,
            _ => 256,
        }
    }

    #[must_use]
    pub const fn sprite_mode(self, msx1: bool) -> crate::sprites::SpriteMode {
        use crate::sprites::SpriteMode;
        match self {
            Self::Text1 | Self::Text1Q | Self::Text2 => SpriteMode::Off,
            Self::Graphic1 | Self::Graphic2 | Self::Multicolor | Self::MulticolorQ => {
                SpriteMode::Mode1
            }
            Self::Bogus => {
                if msx1 {
                    SpriteMode::Mode1
                } else {
                    SpriteMode::Mode2
                }
            }
            _ => SpriteMode::Mode2,
        }
    }
}

impl Display for DisplayMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Graphic1 => write!(f, "Graphic1"),
            Self::Text1 => write!(f, "Text1"),
            Self::Multicolor => write!(f, "Multicolor"),
            Self::Graphic2 => write!(f, "Graphic2"),
            Self::Text1Q => write!(f, "Text1Q"),
            Self::MulticolorQ => write!(f, "MulticolorQ"),
            Self::Graphic3 => write!(f, "Graphic3"),
            Self::Text2 => write!(f, "Text2"),
            Self::Graphic4 => write!(f, "Graphic4"),
            Self::Graphic5 => write!(f, "Graphic5"),
            Self::Graphic6 => write!(f, "Graphic6"),
            Self::Graphic7 => write!(f, "Graphic7"),
            Self::Bogus => write!(f, "Bogus"),
        }
    }
}

/// The control register file plus every cache derived from it.
///
/// Caches are recomputed eagerly on commit, never per pixel; they are always consistent
/// with the register bytes as of the last [`Registers::commit`].
#[derive(Debug, Clone, Encode, Decode)]
pub struct Registers {
    version: VdpVersion,
    regs: [u8; REGISTER_COUNT],
    display_mode: DisplayMode,
    name_base: u32,
    colour_base: u32,
    colour_mask: u32,
    pattern_base: u32,
    pattern_mask: u32,
    sprite_attribute_base: u32,
    sprite_pattern_base: u32,
    pub palette: [u16; 16],
}

impl Registers {
    #[must_use]
    pub fn new(version: VdpVersion) -> Self {
        let mut registers = Self {
            version,
            regs: [0; REGISTER_COUNT],
            display_mode: DisplayMode::Graphic1,
            name_base: 0,
            colour_base: 0,
            colour_mask: 0,
            pattern_base: 0,
            pattern_mask: 0,
            sprite_attribute_base: 0,
            sprite_pattern_base: 0,
            palette: DEFAULT_PALETTE,
        };
        registers.recompute_all();
        registers
    }

    #[must_use]
    pub fn version(&self) -> VdpVersion {
        self.version
    }

    /// Legal-bits mask for `reg`, version dependent. Registers that do not exist mask to 0.
    #[must_use]
    pub fn value_mask(&self, reg: u8) -> u8 {
        let reg = reg as usize;
        if self.version.is_msx1() {
            VALUE_MASKS_MSX1[reg & 0x07]
        } else if self.version == VdpVersion::V9958 {
            match reg {
                25 => 0x7F,
                26 => 0x3F,
                27 => 0x07,
                _ => VALUE_MASKS_MSX2[reg],
            }
        } else {
            VALUE_MASKS_MSX2[reg]
        }
    }

    #[must_use]
    pub fn read(&self, reg: u8) -> u8 {
        self.regs[reg as usize]
    }

    /// Store an already-masked value and refresh the derived caches. The caller (the VDP)
    /// handles masking, the no-op short-circuit, and before/after notifications.
    pub fn commit(&mut self, reg: u8, value: u8) {
        self.regs[reg as usize] = value;
        match reg {
            0 | 1 => {
                self.display_mode = DisplayMode::from_registers(self.regs[0], self.regs[1]);
                self.recompute_table_bases();
            }
            2..=6 | 10 | 11 => self.recompute_table_bases(),
            _ => {}
        }
    }

    fn recompute_all(&mut self) {
        self.display_mode = DisplayMode::from_registers(self.regs[0], self.regs[1]);
        self.recompute_table_bases();
    }

    fn recompute_table_bases(&mut self) {
        let r2 = u32::from(self.regs[2]);
        let r3 = u32::from(self.regs[3]);
        let r4 = u32::from(self.regs[4]);
        let r5 = u32::from(self.regs[5]);
        let r6 = u32::from(self.regs[6]);
        let r10 = u32::from(self.regs[10]);
        let r11 = u32::from(self.regs[11]);

        self.name_base = match self.display_mode {
            // Text2's 80-column name table ignores the low base bits.
            DisplayMode::Text2 => (r2 & 0x7C) << 10,
            // Bitmap modes address 128/256-byte raster lines from the page bits.
            m if m.is_bitmap() => (r2 & 0x60) << 10,
            _ => r2 << 10,
        };

        match self.display_mode {
            DisplayMode::Graphic2 | DisplayMode::Graphic3 => {
                // Quarter addressing: the low base bits act as AND-masks over the
                // quarter index, wrapping the tables every 256 names.
                self.pattern_base = (r4 & 0x3C) << 11;
                self.pattern_mask = ((r4 & 0x03) << 11) | 0x7FF;
                self.colour_base = ((r10 & 0x07) << 14) | ((r3 & 0x80) << 6);
                self.colour_mask = ((r3 & 0x7F) << 6) | 0x3F;
            }
            _ => {
                self.pattern_base = (r4 & 0x3F) << 11;
                self.pattern_mask = 0x7FF;
                self.colour_base = ((r10 & 0x07) << 14) | (r3 << 6);
                self.colour_mask = 0x3F;
            }
        }

        self.sprite_attribute_base = ((r11 & 0x03) << 15) | (r5 << 7);
        self.sprite_pattern_base = r6 << 11;
    }

    #[must_use]
    pub fn display_mode(&self) -> DisplayMode {
        self.display_mode
    }

    #[must_use]
    pub fn name_base(&self) -> u32 {
        self.name_base
    }

    #[must_use]
    pub fn colour_base(&self) -> u32 {
        self.colour_base
    }

    #[must_use]
    pub fn colour_mask(&self) -> u32 {
        self.colour_mask
    }

    #[must_use]
    pub fn pattern_base(&self) -> u32 {
        self.pattern_base
    }

    #[must_use]
    pub fn pattern_mask(&self) -> u32 {
        self.pattern_mask
    }

    #[must_use]
    pub fn sprite_attribute_base(&self) -> u32 {
        self.sprite_attribute_base
    }

    #[must_use]
    pub fn sprite_pattern_base(&self) -> u32 {
        self.sprite_pattern_base
    }

    #[must_use]
    pub fn display_enabled(&self) -> bool {
        self.regs[1].bit(6)
    }

    #[must_use]
    pub fn vertical_interrupt_enabled(&self) -> bool {
        self.regs[1].bit(5)
    }

    #[must_use]
    pub fn horizontal_interrupt_enabled(&self) -> bool {
        self.regs[0].bit(4)
    }

    /// Sprite size in pixels before magnification (R#1 bit 1).
    #[must_use]
    pub fn sprite_size(&self) -> u8 {
        if self.regs[1].bit(1) { 16 } else { 8 }
    }

    #[must_use]
    pub fn sprites_magnified(&self) -> bool {
        self.regs[1].bit(0)
    }

    /// Text/backdrop colour pair (R#7): high nibble foreground, low nibble background.
    #[must_use]
    pub fn foreground_colour(&self) -> u8 {
        self.regs[7] >> 4
    }

    #[must_use]
    pub fn background_colour(&self) -> u8 {
        self.regs[7] & 0x0F
    }

    /// Text2 blink colour pair (R#12).
    #[must_use]
    pub fn blink_foreground_colour(&self) -> u8 {
        self.regs[12] >> 4
    }

    #[must_use]
    pub fn blink_background_colour(&self) -> u8 {
        self.regs[12] & 0x0F
    }

    /// Blink on/off periods in frames (R#13 nibbles, units of 10 frames).
    #[must_use]
    pub fn blink_periods(&self) -> (u16, u16) {
        (u16::from(self.regs[13] >> 4) * 10, u16::from(self.regs[13] & 0x0F) * 10)
    }

    /// 212-line display when R#9 bit 7 is set, 192 otherwise.
    #[must_use]
    pub fn display_lines(&self) -> u16 {
        if self.regs[9].bit(7) { 212 } else { 192 }
    }

    /// R#9 bit 1 selects PAL timing on MSX2; MSX1 chips are hard-wired.
    #[must_use]
    pub fn timing_mode(&self) -> TimingMode {
        if self.version.is_msx1() {
            self.version.default_timing()
        } else if self.regs[9].bit(1) {
            TimingMode::Pal
        } else {
            TimingMode::Ntsc
        }
    }

    #[must_use]
    pub fn vertical_scroll(&self) -> u8 {
        self.regs[23]
    }

    /// Signed horizontal adjust from R#18's low nibble: 0..7 = 0..7, 8..15 = -8..-1.
    #[must_use]
    pub fn horizontal_adjust(&self) -> i8 {
        (((self.regs[18] & 0x0F) ^ 8) as i8) - 8
    }

    #[must_use]
    pub fn vertical_adjust(&self) -> i8 {
        (((self.regs[18] >> 4) ^ 8) as i8) - 8
    }

    /// Horizontal-interrupt target line (R#19), matched against `line - R#23`.
    #[must_use]
    pub fn horizontal_scan_line(&self) -> u8 {
        self.regs[19]
    }

    /// Status register index selected for reads (R#15).
    #[must_use]
    pub fn status_pointer(&self) -> u8 {
        self.regs[15].bits(0..=3)
    }

    /// Palette index for the palette port (R#16).
    #[must_use]
    pub fn palette_pointer(&self) -> u8 {
        self.regs[16].bits(0..=3)
    }

    pub fn advance_palette_pointer(&mut self) {
        self.regs[16] = (self.regs[16] + 1) & 0x0F;
    }

    /// Indirect-access register index (R#17); bit 7 disables auto-increment.
    #[must_use]
    pub fn indirect_pointer(&self) -> u8 {
        self.regs[17].bits(0..=5)
    }

    #[must_use]
    pub fn indirect_auto_increment(&self) -> bool {
        !self.regs[17].bit(7)
    }

    pub fn advance_indirect_pointer(&mut self) {
        self.regs[17] = (self.regs[17] & 0xC0) | ((self.regs[17] + 1) & 0x3F);
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn version_from_str() {
        assert_eq!("TMS9918A".parse::<VdpVersion>().unwrap(), VdpVersion::Tms99X8A);
        assert_eq!("tms9929a".parse::<VdpVersion>().unwrap(), VdpVersion::Tms9929A);
        assert_eq!("V9938".parse::<VdpVersion>().unwrap(), VdpVersion::V9938);
        assert_eq!("v9958".parse::<VdpVersion>().unwrap(), VdpVersion::V9958);
        assert!(matches!(
            "V9990".parse::<VdpVersion>(),
            Err(VdpConfigError::UnknownVersion(_))
        ));
    }

    #[test]
    fn msx1_masks_are_mirrored() {
        let registers = Registers::new(VdpVersion::Tms99X8A);
        assert_eq!(registers.value_mask(0), 0x03);
        assert_eq!(registers.value_mask(8), 0x03);
        assert_eq!(registers.value_mask(63), 0xFF);
    }

    #[test]
    fn v9958_extra_registers() {
        let v9938 = Registers::new(VdpVersion::V9938);
        let v9958 = Registers::new(VdpVersion::V9958);
        assert_eq!(v9938.value_mask(25), 0x00);
        assert_eq!(v9958.value_mask(25), 0x7F);
        assert_eq!(v9958.value_mask(26), 0x3F);
        assert_eq!(v9958.value_mask(27), 0x07);
    }

    #[test]
    fn display_mode_decoding() {
        assert_eq!(DisplayMode::from_code(0x00), DisplayMode::Graphic1);
        assert_eq!(DisplayMode::from_code(0x01), DisplayMode::Text1);
        assert_eq!(DisplayMode::from_code(0x02), DisplayMode::Multicolor);
        assert_eq!(DisplayMode::from_code(0x04), DisplayMode::Graphic2);
        assert_eq!(DisplayMode::from_code(0x05), DisplayMode::Text1Q);
        assert_eq!(DisplayMode::from_code(0x06), DisplayMode::MulticolorQ);
        assert_eq!(DisplayMode::from_code(0x08), DisplayMode::Graphic3);
        assert_eq!(DisplayMode::from_code(0x09), DisplayMode::Text2);
        assert_eq!(DisplayMode::from_code(0x0C), DisplayMode::Graphic4);
        assert_eq!(DisplayMode::from_code(0x10), DisplayMode::Graphic5);
        assert_eq!(DisplayMode::from_code(0x14), DisplayMode::Graphic6);
        assert_eq!(DisplayMode::from_code(0x1C), DisplayMode::Graphic7);
        assert_eq!(DisplayMode::from_code(0x03), DisplayMode::Bogus);
        assert_eq!(DisplayMode::from_code(0x1F), DisplayMode::Bogus);

        // M3 in R#0 bit 1, M1 in R#1 bit 4.
        assert_eq!(DisplayMode::from_registers(0x02, 0x00), DisplayMode::Graphic2);
        assert_eq!(DisplayMode::from_registers(0x00, 0x10), DisplayMode::Text1);
        assert_eq!(DisplayMode::from_registers(0x00, 0x08), DisplayMode::Multicolor);
    }

    #[test]
    fn graphic2_quarter_masks() {
        let mut registers = Registers::new(VdpVersion::Tms99X8A);
        registers.commit(0, 0x02); // Graphic2
        registers.commit(3, 0xFF);
        registers.commit(4, 0x07);

        assert_eq!(registers.display_mode(), DisplayMode::Graphic2);
        assert_eq!(registers.pattern_base(), (0x04) << 11);
        assert_eq!(registers.pattern_mask(), (0x03 << 11) | 0x7FF);
        assert_eq!(registers.colour_base(), 0x80 << 6);
        assert_eq!(registers.colour_mask(), (0x7F << 6) | 0x3F);
    }

    #[test]
    fn graphic1_table_bases() {
        let mut registers = Registers::new(VdpVersion::Tms99X8A);
        registers.commit(2, 0x06);
        registers.commit(3, 0x80);
        registers.commit(4, 0x00);
        registers.commit(5, 0x36);
        registers.commit(6, 0x07);

        assert_eq!(registers.name_base(), 0x1800);
        assert_eq!(registers.colour_base(), 0x2000);
        assert_eq!(registers.pattern_base(), 0x0000);
        assert_eq!(registers.sprite_attribute_base(), 0x1B00);
        assert_eq!(registers.sprite_pattern_base(), 0x3800);
    }

    #[test]
    fn adjust_nibbles_are_signed() {
        let mut registers = Registers::new(VdpVersion::V9938);
        registers.commit(18, 0x00);
        assert_eq!(registers.horizontal_adjust(), 0);
        assert_eq!(registers.vertical_adjust(), 0);
        registers.commit(18, 0x77);
        assert_eq!(registers.horizontal_adjust(), 7);
        assert_eq!(registers.vertical_adjust(), 7);
        registers.commit(18, 0x88);
        assert_eq!(registers.horizontal_adjust(), -8);
        registers.commit(18, 0xFF);
        assert_eq!(registers.horizontal_adjust(), -1);
        assert_eq!(registers.vertical_adjust(), -1);
    }

    #[test]
    fn timing_mode_selection() {
        let mut registers = Registers::new(VdpVersion::V9938);
        assert_eq!(registers.timing_mode(), TimingMode::Ntsc);
        registers.commit(9, 0x02);
        assert_eq!(registers.timing_mode(), TimingMode::Pal);

        // MSX1 chips ignore R#9.
        let registers = Registers::new(VdpVersion::Tms9929A);
        assert_eq!(registers.timing_mode(), TimingMode::Pal);
    }
}
