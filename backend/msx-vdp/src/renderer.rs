//! Incremental scanline rendering: subdivides elapsed virtual time into border and
//! display bands and dispatches them to a raster backend, under frame-skip control.

mod framebuffer;
mod frameskip;

pub use framebuffer::{FrameBufferBackend, PixelFormat, FRAME_WIDTH};
pub use frameskip::FrameSkipper;

use crate::emutime::EmuTime;
use crate::sprites::SpriteChecker;
use crate::vdp::{DisplayMode, FrameTiming, Registers, TICKS_PER_LINE};
use crate::vram::{CommandEngine, VdpVram};
use arrayvec::ArrayVec;
use msx_config::{RenderAccuracy, RendererConfig};

/// Split borrows of the VDP's components, valid for a single virtual-time step.
pub struct RenderCtx<'a> {
    pub registers: &'a Registers,
    pub vram: &'a mut VdpVram,
    pub sprites: &'a mut SpriteChecker,
    pub cmd: &'a mut dyn CommandEngine,
    pub frame: FrameTiming,
    /// The moment of the call; rendering never runs ahead of it.
    pub time: EmuTime,
    /// VDP ticks elapsed in the current frame at `time`.
    pub frame_ticks: u64,
}

/// Concrete drawing surface driven by [`PixelRenderer`].
///
/// `draw_*` coordinates are raster lines and VDP ticks within the line; the backend owns
/// the conversion to host pixels. State setters arrive only after rendering has been
/// synchronized up to the change time, so a backend can apply them immediately.
pub trait RasterBackend {
    fn frame_start(&mut self, timing: FrameTiming);

    /// Present the finished frame; called only for non-skipped frames.
    fn frame_end(&mut self);

    fn set_display_mode(&mut self, mode: DisplayMode);

    fn set_display_enabled(&mut self, enabled: bool);

    fn set_palette(&mut self, index: u8, grb: u16);

    fn set_background_colour(&mut self, colour: u8);

    fn draw_border(&mut self, ctx: &mut RenderCtx<'_>, line: u16, from_x: u16, to_x: u16);

    fn draw_display(&mut self, ctx: &mut RenderCtx<'_>, line: u16, from_x: u16, to_x: u16);
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
enum Band {
    Border,
    Display,
}

pub struct PixelRenderer<B> {
    config: RendererConfig,
    backend: B,
    skipper: FrameSkipper,
    frame: FrameTiming,
    display_enabled: bool,
    /// This frame is being drawn (not skipped by the frame-skip loop).
    draw_frame: bool,
    /// Next unrendered position: tick within line, raster line.
    next_x: u32,
    next_y: u16,
}

impl<B: RasterBackend> PixelRenderer<B> {
    #[must_use]
    pub fn new(config: RendererConfig, backend: B) -> Self {
        let skipper = FrameSkipper::new(config.frame_skip_mode, config.frame_skip);
        Self {
            config,
            backend,
            skipper,
            frame: FrameTiming::default(),
            display_enabled: false,
            draw_frame: true,
            next_x: 0,
            next_y: 0,
        }
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        &self.backend
    }

    pub fn backend_mut(&mut self) -> &mut B {
        &mut self.backend
    }

    pub fn record_sync_factor(&mut self, factor: f64) {
        self.skipper.record_sync_factor(factor);
    }

    pub fn frame_start(&mut self, timing: FrameTiming, _time: EmuTime) {
        self.frame = timing;
        self.next_x = 0;
        self.next_y = 0;
        self.draw_frame = self.skipper.frame_start();
        if self.draw_frame {
            self.backend.frame_start(timing);
        }
    }

    /// Render to the end of the frame and present unless skipped. Returns whether the
    /// frame was presented.
    pub fn frame_end(&mut self, ctx: &mut RenderCtx<'_>, _time: EmuTime) -> bool {
        if !self.draw_frame {
            return false;
        }
        self.render_until_ticks(ctx, ctx.frame.frame_ticks());
        self.backend.frame_end();
        true
    }

    /// Bring rendered output up to the context's current frame position.
    pub fn sync(&mut self, ctx: &mut RenderCtx<'_>, _time: EmuTime) {
        self.render_until_ticks(ctx, ctx.frame_ticks);
    }

    pub fn update_display_enabled(&mut self, ctx: &mut RenderCtx<'_>, enabled: bool, time: EmuTime) {
        self.sync(ctx, time);
        self.display_enabled = enabled;
        self.backend.set_display_enabled(enabled);
    }

    pub fn update_display_mode(&mut self, ctx: &mut RenderCtx<'_>, mode: DisplayMode, time: EmuTime) {
        self.sync(ctx, time);
        self.backend.set_display_mode(mode);
    }

    pub fn update_palette(&mut self, ctx: &mut RenderCtx<'_>, index: u8, grb: u16, time: EmuTime) {
        self.sync(ctx, time);
        self.backend.set_palette(index, grb);
    }

    pub fn update_backdrop(&mut self, ctx: &mut RenderCtx<'_>, colour: u8, time: EmuTime) {
        self.sync(ctx, time);
        self.backend.set_background_colour(colour);
    }

    /// A VRAM byte inside a render window is about to change; everything the old value
    /// contributed to must be on screen first.
    pub fn update_vram(&mut self, ctx: &mut RenderCtx<'_>, _address: u32, time: EmuTime) {
        if self.draw_frame {
            self.sync(ctx, time);
        }
    }

    /// Render the rectangle `[next, limit)`, where the limit is derived from elapsed
    /// frame ticks and the configured accuracy.
    fn render_until_ticks(&mut self, ctx: &mut RenderCtx<'_>, frame_ticks: u64) {
        if !self.draw_frame {
            return;
        }

        let (limit_x, limit_y) = match self.config.accuracy {
            RenderAccuracy::Screen => return,
            RenderAccuracy::Line => (0, (frame_ticks / u64::from(TICKS_PER_LINE)) as u16),
            RenderAccuracy::Pixel => (
                (frame_ticks % u64::from(TICKS_PER_LINE)) as u32,
                (frame_ticks / u64::from(TICKS_PER_LINE)) as u16,
            ),
        };
        let limit_y = limit_y.min(self.frame.lines);
        if (limit_y, limit_x) <= (self.next_y, self.next_x) {
            return;
        }

        let mut y = self.next_y;
        while y < limit_y || (y == limit_y && limit_x > 0) {
            let from_x = if y == self.next_y { self.next_x } else { 0 };
            let to_x = if y == limit_y { limit_x } else { u32::from(TICKS_PER_LINE) };
            if from_x < to_x {
                self.render_line_part(ctx, y, from_x as u16, to_x as u16);
            }
            if y == limit_y {
                break;
            }
            y += 1;
        }

        self.next_x = limit_x;
        self.next_y = limit_y;
    }

    /// Split one line's tick range into at most three bands around the display area.
    fn render_line_part(&mut self, ctx: &mut RenderCtx<'_>, line: u16, from_x: u16, to_x: u16) {
        let display_start = self.frame.display_x_start;
        let display_end = display_start + self.frame.display_width;
        let in_display_rows = line >= self.frame.line_zero
            && line < self.frame.line_zero + self.frame.display_lines;
        let display_band =
            if in_display_rows && self.display_enabled { Band::Display } else { Band::Border };

        let mut bands: ArrayVec<(Band, u16, u16), 3> = ArrayVec::new();
        let left = (from_x, to_x.min(display_start));
        if left.0 < left.1 {
            bands.push((Band::Border, left.0, left.1));
        }
        let mid = (from_x.max(display_start), to_x.min(display_end));
        if mid.0 < mid.1 {
            bands.push((display_band, mid.0, mid.1));
        }
        let right = (from_x.max(display_end), to_x);
        if right.0 < right.1 {
            bands.push((Band::Border, right.0, right.1));
        }

        for (band, x0, x1) in bands {
            match band {
                Band::Border => self.backend.draw_border(ctx, line, x0, x1),
                Band::Display => {
                    // Sprite data for this line must exist before the converters pull it.
                    let display_line = line - self.frame.line_zero;
                    let time = ctx.time;
                    ctx.sprites.check_until_line(display_line + 1, time, ctx.vram, ctx.cmd);
                    self.backend.draw_display(ctx, line, x0, x1);
                }
            }
        }
    }
}
