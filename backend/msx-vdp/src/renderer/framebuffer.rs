//! Software raster backend: converts draw bands into a host frame buffer using the
//! per-mode converters, composites sprites, and hands finished frames to a frontend
//! `Renderer`.

use crate::render::{
    graphic7_color, grb_to_color, BitmapConverter, CharacterConverter, Pixel, TMS_PALETTE,
};
use crate::renderer::{RasterBackend, RenderCtx};
use crate::sprites::{SpriteMode, MAX_LINES};
use crate::vdp::{registers::DEFAULT_PALETTE, DisplayMode, FrameTiming, VdpVersion};
use msx_common::frontend::{Color, FrameSize, Renderer};

/// Ticks of border kept on each side of the display area (32 host pixels at 2 ticks
/// per pixel).
pub const BORDER_TICKS: u16 = 64;

/// Host frame width: 512 display pixels plus both borders.
pub const FRAME_WIDTH: usize = 512 + 2 * (BORDER_TICKS as usize / 2);

const MODE_LINE_WIDTH: usize = 512;

/// Converts a 9-bit GRB palette entry (already expanded to RGB) into the host pixel type.
pub trait PixelFormat: Pixel {
    fn from_color(color: Color) -> Self;
}

impl PixelFormat for Color {
    fn from_color(color: Color) -> Self {
        color
    }
}

impl PixelFormat for u32 {
    /// 0x00RRGGBB.
    fn from_color(color: Color) -> Self {
        (u32::from(color.r) << 16) | (u32::from(color.g) << 8) | u32::from(color.b)
    }
}

impl PixelFormat for u16 {
    /// RGB565.
    fn from_color(color: Color) -> Self {
        (u16::from(color.r >> 3) << 11) | (u16::from(color.g >> 2) << 5) | u16::from(color.b >> 3)
    }
}

pub struct FrameBufferBackend<P> {
    msx1: bool,
    timing: FrameTiming,
    mode: DisplayMode,
    bg_colour: u8,
    /// Raw 16-colour palette as host colours.
    palette_raw: [Color; 16],
    /// Display palette: entry 0 replaced by the backdrop colour.
    palette: [P; 16],
    palette256: [P; 256],
    border: P,
    /// Host frame, `FRAME_WIDTH` x `timing.lines`.
    frame: Vec<P>,
    /// Persistent native-width line buffers; lets the converters' dirty short-circuit
    /// keep last frame's pixels for unchanged groups.
    mode_lines: Vec<P>,
    scratch: Vec<P>,
}

impl<P: PixelFormat> FrameBufferBackend<P> {
    #[must_use]
    pub fn new(version: VdpVersion) -> Self {
        let msx1 = version.is_msx1();
        let palette_raw = if msx1 {
            TMS_PALETTE
        } else {
            std::array::from_fn(|i| grb_to_color(DEFAULT_PALETTE[i]))
        };
        let palette256 = std::array::from_fn(|i| P::from_color(graphic7_color(i as u8)));

        let mut backend = Self {
            msx1,
            timing: FrameTiming::default(),
            mode: DisplayMode::Graphic1,
            bg_colour: 0,
            palette_raw,
            palette: [P::default(); 16],
            palette256,
            border: P::default(),
            frame: Vec::new(),
            mode_lines: vec![P::default(); MODE_LINE_WIDTH * MAX_LINES],
            scratch: vec![P::default(); MODE_LINE_WIDTH],
        };
        backend.rebuild_palette();
        backend
    }

    #[must_use]
    pub fn frame_buffer(&self) -> &[P] {
        &self.frame
    }

    #[must_use]
    pub fn frame_size(&self) -> FrameSize {
        FrameSize { width: FRAME_WIDTH as u32, height: u32::from(self.timing.lines) }
    }

    #[must_use]
    pub fn pixel(&self, x: usize, y: usize) -> P {
        self.frame[y * FRAME_WIDTH + x]
    }

    fn rebuild_palette(&mut self) {
        for (i, colour) in self.palette_raw.iter().enumerate() {
            self.palette[i] = P::from_color(*colour);
        }
        // Colour 0 is transparent: it shows the backdrop.
        self.palette[0] = P::from_color(self.palette_raw[(self.bg_colour & 0x0F) as usize]);
        self.border = self.palette[0];
    }

    /// First tick of the visible window within a line.
    fn window_start(&self) -> u16 {
        self.timing.display_x_start - BORDER_TICKS
    }

    /// Clip a tick range to the visible window and convert to host pixels.
    fn host_span(&self, from_x: u16, to_x: u16) -> (usize, usize) {
        let start = self.window_start();
        let end = start + (FRAME_WIDTH as u16) * 2;
        let from = from_x.clamp(start, end);
        let to = to_x.clamp(start, end);
        (usize::from((from - start) / 2), usize::from((to - start) / 2))
    }

    /// Host pixels per native mode pixel (256-wide modes are doubled to 512).
    fn host_pixels_per_mode_pixel(&self) -> usize {
        let ticks_per_pixel = self.timing.display_width / self.mode.line_width();
        usize::from(ticks_per_pixel) / 2
    }

    fn composite_sprites(&mut self, ctx: &RenderCtx<'_>, display_line: u16) {
        let sprites = ctx.sprites.sprites_on_line(display_line);
        if sprites.is_empty() {
            return;
        }

        // Work in the 256-pixel sprite coordinate space, then scale when plotting.
        let mut colours = [0u8; 256];
        let mut drawn = [false; 256];
        let mode2 = ctx.sprites.mode() == SpriteMode::Mode2;

        for sprite in sprites {
            let colour_bits = sprite.colour & 0x0F;
            let cc = mode2 && sprite.colour & 0x40 != 0;
            if !cc && colour_bits == 0 {
                continue;
            }
            let mut pattern = sprite.pattern;
            let mut x = sprite.x;
            while pattern != 0 {
                if pattern & 0x8000_0000 != 0 && (0..256).contains(&i32::from(x)) {
                    let px = x as usize;
                    if cc {
                        // OR with the colour of preceding same-line sprites.
                        if drawn[px] {
                            colours[px] |= colour_bits;
                        }
                    } else if !drawn[px] {
                        colours[px] = colour_bits;
                        drawn[px] = true;
                    }
                }
                pattern <<= 1;
                x += 1;
            }
        }

        let scale = usize::from(self.mode.line_width()) / 256;
        for px in 0..256 {
            if drawn[px] {
                let host = self.palette[colours[px] as usize];
                for i in 0..scale {
                    self.scratch[px * scale + i] = host;
                }
            }
        }
    }
}

impl<P: PixelFormat> FrameBufferBackend<P> {
    /// Present the current frame through a frontend renderer.
    pub fn present<R: Renderer>(&self, renderer: &mut R) -> Result<(), R::Err>
    where
        P: Into<Color> + Copy,
    {
        let colors: Vec<Color> = self.frame.iter().map(|&p| p.into()).collect();
        renderer.render_frame(&colors, self.frame_size())
    }
}

impl<P: PixelFormat> RasterBackend for FrameBufferBackend<P> {
    fn frame_start(&mut self, timing: FrameTiming) {
        self.timing = timing;
        let len = FRAME_WIDTH * usize::from(timing.lines);
        // Keep previous contents where possible; unchanged pixels may be skipped.
        self.frame.resize(len, P::default());
    }

    fn frame_end(&mut self) {}

    fn set_display_mode(&mut self, mode: DisplayMode) {
        self.mode = mode;
    }

    fn set_display_enabled(&mut self, _enabled: bool) {
        // Blanked regions arrive as border draws; nothing to track here.
    }

    fn set_palette(&mut self, index: u8, grb: u16) {
        if self.msx1 {
            return;
        }
        self.palette_raw[(index & 0x0F) as usize] = grb_to_color(grb);
        self.rebuild_palette();
    }

    fn set_background_colour(&mut self, colour: u8) {
        self.bg_colour = colour & 0x0F;
        self.rebuild_palette();
    }

    fn draw_border(&mut self, _ctx: &mut RenderCtx<'_>, line: u16, from_x: u16, to_x: u16) {
        let (from, to) = self.host_span(from_x, to_x);
        let row = usize::from(line) * FRAME_WIDTH;
        self.frame[row + from..row + to].fill(self.border);
    }

    fn draw_display(&mut self, ctx: &mut RenderCtx<'_>, line: u16, from_x: u16, to_x: u16) {
        // Flush pending command-engine writes before any raw VRAM read below.
        ctx.vram.sync(ctx.time, ctx.cmd);

        let display_line = line - ctx.frame.line_zero;
        let width = usize::from(self.mode.line_width());

        {
            let out = &mut self.mode_lines
                [usize::from(display_line) * MODE_LINE_WIDTH..][..width];
            if self.mode.is_bitmap() {
                BitmapConverter::new(ctx.registers, ctx.vram, &self.palette, &self.palette256)
                    .convert_line(out, display_line);
            } else {
                CharacterConverter::new(
                    ctx.registers,
                    ctx.vram,
                    &self.palette,
                    ctx.frame.blink_state,
                )
                .convert_line(out, display_line, false);
            }
        }

        self.scratch[..width].copy_from_slice(
            &self.mode_lines[usize::from(display_line) * MODE_LINE_WIDTH..][..width],
        );
        if !self.mode.is_text() {
            self.composite_sprites(ctx, display_line);
        }

        // Blit the requested tick span, doubling 256-wide modes up to 512.
        let (host_from, host_to) = self.host_span(from_x, to_x);
        let display_host_start = usize::from(BORDER_TICKS / 2);
        let hpp = self.host_pixels_per_mode_pixel().max(1);
        let row = usize::from(line) * FRAME_WIDTH;
        for host_x in host_from..host_to {
            let pixel = if host_x >= display_host_start {
                let mode_px = (host_x - display_host_start) / hpp;
                if mode_px < width { self.scratch[mode_px] } else { self.border }
            } else {
                self.border
            };
            self.frame[row + host_x] = pixel;
        }
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::renderer::PixelRenderer;
    use crate::sprites::SpriteChecker;
    use crate::vdp::{Registers, TICKS_PER_LINE};
    use crate::vram::{NullCommandEngine, VdpVram, VramSize};
    use crate::EmuTime;
    use msx_config::{DirtyTracking, RendererConfig};

    fn graphic1_ctx_parts() -> (Registers, VdpVram, SpriteChecker) {
        let mut registers = Registers::new(VdpVersion::Tms99X8A);
        registers.commit(2, 0x06);
        registers.commit(3, 0x80);
        registers.commit(4, 0x00);
        registers.commit(7, 0x07); // backdrop cyan
        let vram = VdpVram::new(VramSize::Kb16, DirtyTracking::FullRedraw);
        let sprites = SpriteChecker::new(true);
        (registers, vram, sprites)
    }

    fn ctx<'a>(
        registers: &'a Registers,
        vram: &'a mut VdpVram,
        sprites: &'a mut SpriteChecker,
        cmd: &'a mut NullCommandEngine,
        frame_ticks: u64,
    ) -> RenderCtx<'a> {
        RenderCtx {
            registers,
            vram,
            sprites,
            cmd,
            frame: FrameTiming::default(),
            time: EmuTime::at(frame_ticks, 4),
            frame_ticks,
        }
    }

    #[test]
    fn border_and_display_pixels_land_in_the_frame() {
        let (registers, mut vram, mut sprites) = graphic1_ctx_parts();
        let mut cmd = NullCommandEngine;
        let t = EmuTime::at(0, 4);

        // Character 65 with a solid pattern row at row 0, column 0.
        vram.write(0x1800, 65, t);
        for row in 0..8 {
            vram.write(65 * 8 + row, 0xFF, t);
        }
        vram.write(0x2000 + 65 / 8, 0x51, t);

        let backend: FrameBufferBackend<Color> = FrameBufferBackend::new(VdpVersion::Tms99X8A);
        let mut renderer = PixelRenderer::new(RendererConfig::default(), backend);
        // Enable display so the display band is dispatched as display.
        {
            let mut c = ctx(&registers, &mut vram, &mut sprites, &mut cmd, 0);
            renderer.frame_start(c.frame, t);
            renderer.update_display_enabled(&mut c, true, t);
            renderer.update_backdrop(&mut c, 0x07, t);
        }

        let timing = FrameTiming::default();
        let target = u64::from(timing.line_zero + 1) * u64::from(TICKS_PER_LINE);
        let mut c = ctx(&registers, &mut vram, &mut sprites, &mut cmd, target);
        renderer.sync(&mut c, EmuTime::at(target, 4));

        let backend = renderer.backend();
        let first_display_line = usize::from(timing.line_zero);
        let display_x = usize::from(BORDER_TICKS / 2);

        // Border pixel: backdrop colour 7 (cyan in the TMS palette).
        assert_eq!(backend.pixel(0, first_display_line), TMS_PALETTE[7]);
        // First display pixel: foreground colour 5, doubled horizontally.
        assert_eq!(backend.pixel(display_x, first_display_line), TMS_PALETTE[5]);
        assert_eq!(backend.pixel(display_x + 1, first_display_line), TMS_PALETTE[5]);
    }

    #[test]
    fn sprites_overlay_the_display() {
        let (mut registers, mut vram, mut sprites) = graphic1_ctx_parts();
        registers.commit(5, 0x36); // attributes at 0x1B00
        registers.commit(6, 0x07); // patterns at 0x3800
        let mut cmd = NullCommandEngine;
        let t = EmuTime::at(0, 4);

        sprites.set_mode(SpriteMode::Mode1);
        sprites.set_attribute_base(0x1B00);
        sprites.set_pattern_base(0x3800);
        sprites.set_size(8);

        // Sprite 0: first shown on display line 1, X = 10, pattern 1, colour 6.
        vram.write(0x1B00, 0, t);
        vram.write(0x1B01, 10, t);
        vram.write(0x1B02, 1, t);
        vram.write(0x1B03, 6, t);
        vram.write(0x1B04, 208, t);
        // Pattern 1 row 0: leftmost pixel only.
        vram.write(0x3800 + 8, 0x80, t);

        let mut backend: FrameBufferBackend<Color> = FrameBufferBackend::new(VdpVersion::Tms99X8A);
        let timing = FrameTiming::default();
        backend.frame_start(timing);

        let line = timing.line_zero + 1;
        let mut c = ctx(&registers, &mut vram, &mut sprites, &mut cmd, 0);
        c.sprites.check_until_line(2, t, c.vram, c.cmd);
        backend.draw_display(
            &mut c,
            line,
            timing.display_x_start,
            timing.display_x_start + timing.display_width,
        );

        let display_x = usize::from(BORDER_TICKS / 2);
        let y = usize::from(line);
        // The sprite pixel lands at mode pixel 10, doubled to two host pixels.
        assert_eq!(backend.pixel(display_x + 2 * 10, y), TMS_PALETTE[6]);
        assert_eq!(backend.pixel(display_x + 2 * 10 + 1, y), TMS_PALETTE[6]);
        // The next mode pixel is untouched character background.
        assert_eq!(backend.pixel(display_x + 2 * 11, y), TMS_PALETTE[0]);
    }

    #[test]
    fn backdrop_shows_through_colour_zero() {
        let mut backend: FrameBufferBackend<Color> = FrameBufferBackend::new(VdpVersion::Tms99X8A);
        backend.set_background_colour(0x04);
        assert_eq!(backend.palette[0], TMS_PALETTE[4]);
        assert_eq!(backend.border, TMS_PALETTE[4]);
    }

    #[test]
    fn pixel_formats_pack_colours() {
        let c = Color::rgb(0xFF, 0x80, 0x00);
        assert_eq!(u32::from_color(c), 0x00FF_8000);
        assert_eq!(u16::from_color(c), 0b11111_100000_00000);
        assert_eq!(Color::from_color(c), c);
    }
}
