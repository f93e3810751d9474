//! Line conversion for the bitmap modes (Graphic 4-7): direct byte-to-pixel expansion
//! with no table indirection, planar for Graphic 6/7.

use crate::render::Pixel;
use crate::vdp::{DisplayMode, Registers};
use crate::vram::VdpVram;

pub struct BitmapConverter<'a, P> {
    registers: &'a Registers,
    vram: &'a VdpVram,
    palette: &'a [P; 16],
    palette256: &'a [P; 256],
}

impl<'a, P: Pixel> BitmapConverter<'a, P> {
    #[must_use]
    pub fn new(
        registers: &'a Registers,
        vram: &'a VdpVram,
        palette: &'a [P; 16],
        palette256: &'a [P; 256],
    ) -> Self {
        Self { registers, vram, palette, palette256 }
    }

    /// Render display line `line` into `out` at the mode's native width.
    pub fn convert_line(&self, out: &mut [P], line: u16) {
        let mode = self.registers.display_mode();
        debug_assert_eq!(out.len(), mode.line_width() as usize);

        let scan = u32::from((line as u8).wrapping_add(self.registers.vertical_scroll()));
        match mode {
            DisplayMode::Graphic4 => self.graphic4(out, scan),
            DisplayMode::Graphic5 => self.graphic5(out, scan),
            DisplayMode::Graphic6 => self.graphic6(out, scan),
            DisplayMode::Graphic7 => self.graphic7(out, scan),
            _ => out.fill(self.palette[self.registers.background_colour() as usize]),
        }
    }

    fn read(&self, address: u32) -> u8 {
        self.vram.read_raw(address & self.vram.address_mask())
    }

    fn read_planar(&self, logical: u32) -> u8 {
        self.read(VdpVram::planar(logical))
    }

    /// 256x212, 4bpp linear: 128 bytes per line, two pixels per byte.
    fn graphic4(&self, out: &mut [P], scan: u32) {
        let base = self.registers.name_base() + scan * 128;
        for i in 0..128 {
            let byte = self.read(base + i);
            out[(2 * i) as usize] = self.palette[(byte >> 4) as usize];
            out[(2 * i + 1) as usize] = self.palette[(byte & 0x0F) as usize];
        }
    }

    /// 512x212, 2bpp linear: 128 bytes per line, four pixels per byte.
    fn graphic5(&self, out: &mut [P], scan: u32) {
        let base = self.registers.name_base() + scan * 128;
        for i in 0..128 {
            let byte = self.read(base + i);
            for p in 0..4 {
                let colour = (byte >> (6 - 2 * p)) & 0x03;
                out[(4 * i + p) as usize] = self.palette[colour as usize];
            }
        }
    }

    /// 512x212, 4bpp planar: 256 logical bytes per line.
    fn graphic6(&self, out: &mut [P], scan: u32) {
        let base = self.registers.name_base() + scan * 256;
        for i in 0..256 {
            let byte = self.read_planar(base + i);
            out[(2 * i) as usize] = self.palette[(byte >> 4) as usize];
            out[(2 * i + 1) as usize] = self.palette[(byte & 0x0F) as usize];
        }
    }

    /// 256x212, 8bpp planar: one byte per pixel through the fixed GRB332 palette.
    fn graphic7(&self, out: &mut [P], scan: u32) {
        let base = self.registers.name_base() + scan * 256;
        for i in 0..256 {
            out[i as usize] = self.palette256[self.read_planar(base + i) as usize];
        }
    }
}
