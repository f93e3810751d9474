//! Line conversion for the name/pattern/colour-table modes (Graphic 1-3, Text 1/2,
//! Multicolor).

use crate::render::Pixel;
use crate::vdp::{DisplayMode, Registers};
use crate::vram::{DirtyTracker, VdpVram};

/// Converts one scanline of a character-based mode into host pixels.
///
/// Palette convention: entry 0 must already hold the backdrop colour, so colour 0
/// ("transparent") shows the backdrop without a special case per pixel.
pub struct CharacterConverter<'a, P> {
    registers: &'a Registers,
    vram: &'a VdpVram,
    palette: &'a [P; 16],
    blink_state: bool,
}

impl<'a, P: Pixel> CharacterConverter<'a, P> {
    #[must_use]
    pub fn new(
        registers: &'a Registers,
        vram: &'a VdpVram,
        palette: &'a [P; 16],
        blink_state: bool,
    ) -> Self {
        Self { registers, vram, palette, blink_state }
    }

    /// Render display line `line` into `out`, which must be the mode's native width.
    /// `force` disables the dirty-table short-circuit (required when `out` does not hold
    /// this frame's previous contents).
    pub fn convert_line(&self, out: &mut [P], line: u16, force: bool) {
        let mode = self.registers.display_mode();
        debug_assert_eq!(out.len(), mode.line_width() as usize);

        match mode {
            DisplayMode::Graphic1 => self.graphic1(out, line, force),
            DisplayMode::Graphic2 | DisplayMode::Graphic3 => self.graphic23(out, line, force),
            DisplayMode::Text1 | DisplayMode::Text1Q => self.text1(out, line),
            DisplayMode::Text2 => self.text2(out, line),
            DisplayMode::Multicolor | DisplayMode::MulticolorQ => self.multicolor(out, line),
            _ => self.bogus(out),
        }
    }

    fn read(&self, address: u32) -> u8 {
        self.vram.read_raw(address & self.vram.address_mask())
    }

    fn dirty(&self) -> &DirtyTracker {
        self.vram.dirty()
    }

    /// Line within the scrolled character screen.
    fn scrolled(&self, line: u16) -> u16 {
        u16::from((line as u8).wrapping_add(self.registers.vertical_scroll()))
    }

    fn graphic1(&self, out: &mut [P], line: u16, force: bool) {
        let scan = self.scrolled(line);
        let row = u32::from(scan) / 8;
        let l = u32::from(scan) & 7;
        let name_base = self.registers.name_base();
        let pattern_base = self.registers.pattern_base();
        let colour_base = self.registers.colour_base();

        for col in 0..32u32 {
            let name_entry = row * 32 + col;
            let character = u32::from(self.read(name_base + name_entry));
            if !force
                && !self.dirty().name_dirty(name_entry as usize)
                && !self.dirty().pattern_dirty(character as usize)
                && !self.dirty().colour_dirty((character / 64) as usize)
            {
                continue;
            }

            let pattern = self.read(pattern_base + character * 8 + l);
            let colour = self.read(colour_base + character / 8);
            let fg = self.palette[(colour >> 4) as usize];
            let bg = self.palette[(colour & 0x0F) as usize];
            for bit in 0..8 {
                out[(col * 8 + bit) as usize] =
                    if pattern & (0x80 >> bit) != 0 { fg } else { bg };
            }
        }
    }

    fn graphic23(&self, out: &mut [P], line: u16, force: bool) {
        let scan = self.scrolled(line);
        let row = u32::from(scan) / 8;
        let l = u32::from(scan) & 7;
        // The screen's three 256-name quarters wrap through the table masks.
        let quarter = u32::from(scan) / 64;
        let name_base = self.registers.name_base();
        let pattern_base = self.registers.pattern_base();
        let pattern_mask = self.registers.pattern_mask();
        let colour_base = self.registers.colour_base();
        let colour_mask = self.registers.colour_mask();

        for col in 0..32u32 {
            let name_entry = row * 32 + col;
            let character = u32::from(self.read(name_base + name_entry));
            let entry = (((quarter << 8) | character) << 3) | l;
            if !force
                && !self.dirty().name_dirty(name_entry as usize)
                && !self.dirty().pattern_dirty(((entry & pattern_mask) >> 3) as usize)
                && !self.dirty().colour_dirty(((entry & colour_mask) >> 3) as usize)
            {
                continue;
            }

            let pattern = self.read(pattern_base | (entry & pattern_mask));
            let colour = self.read(colour_base | (entry & colour_mask));
            let fg = self.palette[(colour >> 4) as usize];
            let bg = self.palette[(colour & 0x0F) as usize];
            for bit in 0..8 {
                out[(col * 8 + bit) as usize] =
                    if pattern & (0x80 >> bit) != 0 { fg } else { bg };
            }
        }
    }

    fn text1(&self, out: &mut [P], line: u16) {
        let row = u32::from(line) / 8;
        let l = u32::from(line) & 7;
        let name_base = self.registers.name_base();
        let pattern_base = self.registers.pattern_base();
        let fg = self.palette[self.registers.foreground_colour() as usize];
        let bg = self.palette[self.registers.background_colour() as usize];

        for col in 0..40u32 {
            let character = u32::from(self.read(name_base + row * 40 + col));
            let pattern = self.read(pattern_base + character * 8 + l);
            for bit in 0..6 {
                out[(col * 6 + bit) as usize] =
                    if pattern & (0x80 >> bit) != 0 { fg } else { bg };
            }
        }
    }

    fn text2(&self, out: &mut [P], line: u16) {
        let row = u32::from(line) / 8;
        let l = u32::from(line) & 7;
        let name_base = self.registers.name_base();
        let pattern_base = self.registers.pattern_base();
        let colour_base = self.registers.colour_base();
        let normal = (
            self.palette[self.registers.foreground_colour() as usize],
            self.palette[self.registers.background_colour() as usize],
        );
        let blink = (
            self.palette[self.registers.blink_foreground_colour() as usize],
            self.palette[self.registers.blink_background_colour() as usize],
        );

        for col in 0..80u32 {
            let character = u32::from(self.read(name_base + row * 80 + col));
            let pattern = self.read(pattern_base + character * 8 + l);

            // One blink-selection bit per character, MSB first.
            let bit_index = row * 80 + col;
            let blink_byte = self.read(colour_base + bit_index / 8);
            let blinking = blink_byte & (0x80 >> (bit_index % 8)) != 0;
            let (fg, bg) = if blinking && self.blink_state { blink } else { normal };

            for bit in 0..6 {
                out[(col * 6 + bit) as usize] =
                    if pattern & (0x80 >> bit) != 0 { fg } else { bg };
            }
        }
    }

    fn multicolor(&self, out: &mut [P], line: u16) {
        let scan = self.scrolled(line);
        let row = u32::from(scan) / 8;
        let l = u32::from(scan) & 7;
        let name_base = self.registers.name_base();
        let pattern_base = self.registers.pattern_base();

        for col in 0..32u32 {
            let character = u32::from(self.read(name_base + row * 32 + col));
            // Each pattern byte covers two 4x4 blocks; two byte pairs per char row.
            let block = self.read(pattern_base + character * 8 + (row & 3) * 2 + l / 4);
            let left = self.palette[(block >> 4) as usize];
            let right = self.palette[(block & 0x0F) as usize];
            for i in 0..4 {
                out[(col * 8 + i) as usize] = left;
                out[(col * 8 + 4 + i) as usize] = right;
            }
        }
    }

    /// Undefined mode combination: a defined blank line in the backdrop colour,
    /// reading no VRAM.
    fn bogus(&self, out: &mut [P]) {
        let bg = self.palette[self.registers.background_colour() as usize];
        out.fill(bg);
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vdp::VdpVersion;
    use crate::vram::{VramSize, WindowId};
    use msx_config::DirtyTracking;

    const PALETTE: [u8; 16] = [0, 1, 2, 3, 4, 5, 6, 7, 8, 9, 10, 11, 12, 13, 14, 15];

    fn graphic1_setup() -> (Registers, VdpVram) {
        let mut registers = Registers::new(VdpVersion::Tms99X8A);
        registers.commit(2, 0x06); // name table 0x1800
        registers.commit(3, 0x80); // colour table 0x2000
        registers.commit(4, 0x00); // pattern table 0x0000
        let vram = VdpVram::new(VramSize::Kb16, DirtyTracking::FullRedraw);
        (registers, vram)
    }

    #[test]
    fn graphic1_renders_character_pattern_and_colours() {
        let (registers, mut vram) = graphic1_setup();
        let t = crate::EmuTime::at(0, 4);

        // Character 65 ('A') at screen position (row 2, column 3).
        vram.write(0x1800 + 2 * 32 + 3, 65, t);
        // Pattern row 5 of character 65: 10100101.
        vram.write(65 * 8 + 5, 0xA5, t);
        // Colour byte for character group 65/8 = 8: fg 7, bg 2.
        vram.write(0x2000 + 8, 0x72, t);

        let converter = CharacterConverter::new(&registers, &vram, &PALETTE, false);
        let mut out = [0u8; 256];
        converter.convert_line(&mut out, 2 * 8 + 5, true);

        let cell = &out[3 * 8..3 * 8 + 8];
        assert_eq!(cell, &[7, 2, 7, 2, 2, 7, 2, 7]);
        // Empty neighbours render as colour 0's pair (colour byte 0).
        assert_eq!(out[0], 0);
    }

    #[test]
    fn incremental_tracking_matches_full_redraw_after_partial_write() {
        let (registers, mut full) = graphic1_setup();
        let mut inc = VdpVram::new(VramSize::Kb16, DirtyTracking::Incremental);
        inc.set_window(WindowId::NameTable, 0x1800, 0x1B00);
        inc.set_window(WindowId::PatternTable, 0x0000, 0x0800);
        inc.set_window(WindowId::ColorTable, 0x2000, 0x2020);
        let t = crate::EmuTime::at(0, 4);

        // Characters 65 and 66 side by side on row 2, distinct colour groups.
        for vram in [&mut full, &mut inc] {
            vram.write(0x1800 + 2 * 32 + 3, 65, t);
            vram.write(0x1800 + 2 * 32 + 4, 66, t);
            vram.write(65 * 8 + 5, 0xA5, t);
            vram.write(66 * 8 + 5, 0x3C, t);
            vram.write(0x2000 + 8, 0x72, t);
        }

        // First conversion starts from an all-dirty tracker.
        let mut line_inc = [0u8; 256];
        CharacterConverter::new(&registers, &inc, &PALETTE, false)
            .convert_line(&mut line_inc, 2 * 8 + 5, false);
        inc.dirty_mut().flush();

        // A single pattern write after the flush dirties character 65 only;
        // the rest of the line must survive in the persistent buffer.
        for vram in [&mut full, &mut inc] {
            vram.write(65 * 8 + 5, 0x0F, t);
        }
        CharacterConverter::new(&registers, &inc, &PALETTE, false)
            .convert_line(&mut line_inc, 2 * 8 + 5, false);

        let mut line_full = [0u8; 256];
        CharacterConverter::new(&registers, &full, &PALETTE, false)
            .convert_line(&mut line_full, 2 * 8 + 5, true);
        assert_eq!(line_inc, line_full);
    }

    #[test]
    fn graphic1_vertical_scroll_shifts_source_line() {
        let (registers, mut vram) = graphic1_setup();
        let mut registers = registers;
        registers.commit(23, 16);
        let t = crate::EmuTime::at(0, 4);

        // With scroll 16, display line 5 reads screen line 21 (row 2, pattern row 5).
        vram.write(0x1800 + 2 * 32, 1, t);
        vram.write(8 + 5, 0xFF, t);
        vram.write(0x2000, 0x51, t);

        let converter = CharacterConverter::new(&registers, &vram, &PALETTE, false);
        let mut out = [0u8; 256];
        converter.convert_line(&mut out, 5, true);
        assert_eq!(out[0], 5);
    }

    #[test]
    fn text1_renders_six_pixel_glyphs_from_r7_colours() {
        let mut registers = Registers::new(VdpVersion::Tms99X8A);
        registers.commit(0, 0x00);
        registers.commit(1, 0x10); // Text1
        registers.commit(2, 0x00);
        registers.commit(4, 0x01); // pattern table 0x0800
        registers.commit(7, 0xF4);
        let mut vram = VdpVram::new(VramSize::Kb16, DirtyTracking::FullRedraw);
        let t = crate::EmuTime::at(0, 4);

        vram.write(0, 2, t); // column 0, character 2
        vram.write(0x0800 + 2 * 8, 0b1100_0000, t);

        let converter = CharacterConverter::new(&registers, &vram, &PALETTE, false);
        let mut out = [0u8; 240];
        converter.convert_line(&mut out, 0, true);
        assert_eq!(&out[..6], &[15, 15, 4, 4, 4, 4]);
    }

    #[test]
    fn text2_blink_selects_alternate_colour_pair() {
        let mut registers = Registers::new(VdpVersion::V9938);
        registers.commit(0, 0x04);
        registers.commit(1, 0x10); // Text2
        registers.commit(2, 0x00);
        registers.commit(3, 0x27); // colour (blink) table 0x09C0
        registers.commit(4, 0x01);
        registers.commit(7, 0xF4);
        registers.commit(12, 0x8A); // blink pair: fg 8, bg 10
        assert_eq!(registers.display_mode(), DisplayMode::Text2);
        let mut vram = VdpVram::new(VramSize::Kb64, DirtyTracking::FullRedraw);
        let t = crate::EmuTime::at(0, 4);

        vram.write(0, 1, t); // column 0 blinks
        vram.write(1, 1, t); // column 1 does not
        vram.write(0x0800 + 8, 0b1000_0000, t);
        let colour_base = registers.colour_base();
        vram.write(colour_base, 0x80, t);

        let blink_on = CharacterConverter::new(&registers, &vram, &PALETTE, true);
        let mut out = [0u8; 480];
        blink_on.convert_line(&mut out, 0, true);
        assert_eq!(&out[..2], &[8, 10]);
        assert_eq!(&out[6..8], &[15, 4]);

        let blink_off = CharacterConverter::new(&registers, &vram, &PALETTE, false);
        blink_off.convert_line(&mut out, 0, true);
        assert_eq!(&out[..2], &[15, 4]);
    }

    #[test]
    fn multicolor_blocks() {
        let mut registers = Registers::new(VdpVersion::Tms99X8A);
        registers.commit(1, 0x08); // Multicolor
        registers.commit(2, 0x06);
        registers.commit(4, 0x00);
        assert_eq!(registers.display_mode(), DisplayMode::Multicolor);
        let mut vram = VdpVram::new(VramSize::Kb16, DirtyTracking::FullRedraw);
        let t = crate::EmuTime::at(0, 4);

        vram.write(0x1800, 3, t); // row 0 col 0 -> character 3
        vram.write(3 * 8, 0x9C, t); // lines 0-3: left colour 9, right colour 12

        let converter = CharacterConverter::new(&registers, &vram, &PALETTE, false);
        let mut out = [0u8; 256];
        converter.convert_line(&mut out, 0, true);
        assert_eq!(&out[..8], &[9, 9, 9, 9, 12, 12, 12, 12]);
    }

    #[test]
    fn bogus_mode_is_a_defined_blank() {
        let mut registers = Registers::new(VdpVersion::Tms99X8A);
        registers.commit(0, 0x02);
        registers.commit(1, 0x18); // M1+M2+M3: undefined
        registers.commit(7, 0x04);
        assert_eq!(registers.display_mode(), DisplayMode::Bogus);
        let vram = VdpVram::new(VramSize::Kb16, DirtyTracking::FullRedraw);

        let converter = CharacterConverter::new(&registers, &vram, &PALETTE, false);
        let mut out = [9u8; 256];
        converter.convert_line(&mut out, 0, true);
        assert!(out.iter().all(|&p| p == 4));
    }
}
