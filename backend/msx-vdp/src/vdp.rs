//! The VDP register/state machine: I/O port decoding, interrupt scheduling, frame timing,
//! and the notifications that keep the renderer and sprite checker consistent with
//! register state.

pub mod registers;

pub use registers::{DisplayMode, Registers, VdpVersion};

use crate::emutime::{EmuTime, VDP_TICK_SCALE};
use crate::renderer::{PixelRenderer, RasterBackend, RenderCtx};
use crate::sprites::{SpriteChecker, MAX_LINES};
use crate::vram::{CommandEngine, VdpVram, VramSize, WindowId};
use crate::VdpConfigError;
use bincode::{Decode, Encode};
use msx_common::frontend::{TickEffect, TimingMode};
use msx_common::num::{GetBit, U16Ext};
use msx_config::{RendererConfig, VdpConfig};

/// VDP ticks per scanline, fixed for every mode and timing standard.
pub const TICKS_PER_LINE: u32 = 1368;

pub const NTSC_LINES: u16 = 262;
pub const PAL_LINES: u16 = 313;

/// First display tick within a line, measured from line start.
const GRAPHICS_DISPLAY_X_START: u16 = 246;
const TEXT_DISPLAY_X_START: u16 = 262;

/// First display line for a 192-line frame, before R#18 adjust.
const NTSC_LINE_ZERO: u16 = 32;
const PAL_LINE_ZERO: u16 = 59;

/// Timing parameters sampled once per frame at vertical retrace; register changes
/// mid-frame take effect at the next frame start.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub struct FrameTiming {
    pub timing: TimingMode,
    /// Total raster lines in the field.
    pub lines: u16,
    /// First line of the display area.
    pub line_zero: u16,
    /// 192 or 212 display lines.
    pub display_lines: u16,
    /// First display tick within a line.
    pub display_x_start: u16,
    /// Display-area width in VDP ticks.
    pub display_width: u16,
    /// Text2 blink phase for this frame: true selects the R#12 colour pair.
    pub blink_state: bool,
}

impl FrameTiming {
    #[must_use]
    pub const fn frame_ticks(&self) -> u64 {
        self.lines as u64 * TICKS_PER_LINE as u64
    }
}

impl Default for FrameTiming {
    fn default() -> Self {
        Self {
            timing: TimingMode::Ntsc,
            lines: NTSC_LINES,
            line_zero: NTSC_LINE_ZERO,
            display_lines: 192,
            display_x_start: GRAPHICS_DISPLAY_X_START,
            display_width: 256 * VDP_TICK_SCALE as u16,
            blink_state: false,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum ControlLatch {
    Empty,
    FirstByte(u8),
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
enum PaletteLatch {
    Empty,
    FirstByte(u8),
}

pub struct Vdp<B: RasterBackend> {
    registers: Registers,
    vram: VdpVram,
    sprites: SpriteChecker,
    renderer: PixelRenderer<B>,
    cmd: Box<dyn CommandEngine>,
    config: VdpConfig,

    frame: FrameTiming,
    frame_start: EmuTime,
    time: EmuTime,
    hscan_fired: bool,
    vscan_fired: bool,
    vertical_irq: bool,
    horizontal_irq: bool,
    blink_state: bool,
    blink_counter: u16,

    control_latch: ControlLatch,
    palette_latch: PaletteLatch,
    /// Low 14 bits of the VRAM access pointer; R#14 holds bits 16-14 on MSX2.
    vram_pointer: u16,
    data_read_buffer: u8,
}

impl<B: RasterBackend> Vdp<B> {
    /// Build a VDP core. Fails only on configuration errors; everything after
    /// construction is total.
    pub fn new(
        version: VdpVersion,
        vram_kb: u32,
        config: VdpConfig,
        renderer_config: RendererConfig,
        backend: B,
        cmd: Box<dyn CommandEngine>,
    ) -> Result<Self, VdpConfigError> {
        let vram_size = VramSize::try_from(vram_kb)?;
        version.check_vram_size(vram_size)?;

        let renderer_config = renderer_config.clamped();
        let registers = Registers::new(version);
        let vram = VdpVram::new(vram_size, renderer_config.dirty_tracking);
        let sprites = SpriteChecker::new(config.limit_sprites);
        let renderer = PixelRenderer::new(renderer_config, backend);

        let mut vdp = Self {
            registers,
            vram,
            sprites,
            renderer,
            cmd,
            config,
            frame: FrameTiming::default(),
            frame_start: EmuTime::zero(VDP_TICK_SCALE),
            time: EmuTime::zero(VDP_TICK_SCALE),
            hscan_fired: false,
            vscan_fired: false,
            vertical_irq: false,
            horizontal_irq: false,
            blink_state: false,
            blink_counter: 0,
            control_latch: ControlLatch::Empty,
            palette_latch: PaletteLatch::Empty,
            vram_pointer: 0,
            data_read_buffer: 0,
        };
        vdp.update_vram_windows();
        // The power-on display mode already carries a sprite mode.
        vdp.sprites.set_mode(vdp.registers.display_mode().sprite_mode(version.is_msx1()));
        vdp.apply_sprite_registers();
        vdp.sample_frame_timing();
        vdp.start_frame(EmuTime::zero(VDP_TICK_SCALE));
        Ok(vdp)
    }

    // ----- getter surface for external serialization and embedding -----

    #[must_use]
    pub fn version(&self) -> VdpVersion {
        self.registers.version()
    }

    #[must_use]
    pub fn display_mode(&self) -> DisplayMode {
        self.registers.display_mode()
    }

    #[must_use]
    pub fn registers(&self) -> &Registers {
        &self.registers
    }

    #[must_use]
    pub fn frame_timing(&self) -> FrameTiming {
        self.frame
    }

    #[must_use]
    pub fn is_pal_timing(&self) -> bool {
        self.frame.timing == TimingMode::Pal
    }

    /// Ticks elapsed since the start of the current frame.
    #[must_use]
    pub fn ticks_this_frame(&self, time: EmuTime) -> u64 {
        self.frame_start.ticks_till(time)
    }

    /// IRQ line: OR of both latches gated by their enable bits.
    #[must_use]
    pub fn irq(&self) -> bool {
        (self.vertical_irq && self.registers.vertical_interrupt_enabled())
            || (self.horizontal_irq && self.registers.horizontal_interrupt_enabled())
    }

    #[must_use]
    pub fn backend(&self) -> &B {
        self.renderer.backend()
    }

    pub fn backend_mut(&mut self) -> &mut B {
        self.renderer.backend_mut()
    }

    /// Wall-clock-to-emulated-time ratio for the last presented frame; feeds the
    /// automatic frame-skip control loop.
    pub fn record_sync_factor(&mut self, factor: f64) {
        self.renderer.record_sync_factor(factor);
    }

    // ----- I/O ports -----

    /// CPU write to one of the four VDP ports.
    pub fn write_io(&mut self, port: u8, value: u8, time: EmuTime) {
        self.execute_until(time);
        match port & 3 {
            0 => self.write_data(value, time),
            1 => self.write_control(value, time),
            2 => self.write_palette(value, time),
            3 => self.write_indirect(value, time),
            _ => unreachable!(),
        }
    }

    /// CPU read from a VDP port. Port 1 returns the status register selected by R#15.
    pub fn read_io(&mut self, port: u8, time: EmuTime) -> u8 {
        self.execute_until(time);
        match port & 3 {
            0 => self.read_data(time),
            1 => self.read_status(time),
            // Ports 2 and 3 are write-only; reads float.
            _ => 0xFF,
        }
    }

    fn write_data(&mut self, value: u8, time: EmuTime) {
        self.control_latch = ControlLatch::Empty;
        let address = self.effective_vram_address();
        log::trace!("data port write {value:02X}, VRAM address {address:#07X}");

        if self.vram.render_window_covers(address) {
            self.with_renderer(time, |renderer, ctx| renderer.update_vram(ctx, address, time));
        }
        self.vram.write(address, value, time);
        self.increment_vram_pointer();
    }

    fn read_data(&mut self, time: EmuTime) -> u8 {
        self.control_latch = ControlLatch::Empty;
        let value = self.data_read_buffer;
        self.read_ahead(time);
        value
    }

    /// Fill the read buffer from the current pointer and advance it.
    fn read_ahead(&mut self, time: EmuTime) {
        let address = self.effective_vram_address();
        self.data_read_buffer = self.vram.read(address, time, self.cmd.as_mut());
        self.increment_vram_pointer();
    }

    fn effective_vram_address(&self) -> u32 {
        let mut address = (u32::from(self.registers.read(14) & 0x07) << 14)
            | u32::from(self.vram_pointer & 0x3FFF);
        if self.registers.display_mode().is_planar() {
            address = VdpVram::planar(address);
        }
        address & self.vram.address_mask()
    }

    fn increment_vram_pointer(&mut self) {
        self.vram_pointer = (self.vram_pointer + 1) & 0x3FFF;
        if self.vram_pointer == 0 && !self.registers.version().is_msx1() {
            // 14-bit pointer carry extends into R#14's bank bits.
            let r14 = (self.registers.read(14) + 1) & 0x07;
            self.registers.commit(14, r14);
        }
    }

    fn write_control(&mut self, value: u8, time: EmuTime) {
        match self.control_latch {
            ControlLatch::Empty => self.control_latch = ControlLatch::FirstByte(value),
            ControlLatch::FirstByte(first) => {
                self.control_latch = ControlLatch::Empty;
                // Bit 7 alone selects a register write; bit 6 is part of the index space
                // there and only distinguishes write from read setup otherwise.
                if value.bit(7) {
                    let reg = value & self.registers.version().register_index_mask();
                    self.change_register(reg, first, time);
                } else if value.bit(6) {
                    // Write setup: just load the pointer.
                    self.vram_pointer = (u16::from(value & 0x3F) << 8) | u16::from(first);
                } else {
                    // Read setup performs an immediate read-ahead.
                    self.vram_pointer = (u16::from(value & 0x3F) << 8) | u16::from(first);
                    self.read_ahead(time);
                }
            }
        }
    }

    fn write_palette(&mut self, value: u8, time: EmuTime) {
        if self.registers.version().is_msx1() {
            return;
        }
        match self.palette_latch {
            PaletteLatch::Empty => self.palette_latch = PaletteLatch::FirstByte(value),
            PaletteLatch::FirstByte(first) => {
                self.palette_latch = PaletteLatch::Empty;
                // First byte 0RRR0BBB, second byte 00000GGG.
                let grb = (u16::from(value & 0x07) << 8) | u16::from(first & 0x77);
                let index = self.registers.palette_pointer();
                log::debug!("palette[{index}] = {grb:03X}");

                self.with_renderer(time, |renderer, ctx| {
                    renderer.update_palette(ctx, index, grb, time);
                });
                self.registers.palette[index as usize] = grb;
                self.registers.advance_palette_pointer();
            }
        }
    }

    fn write_indirect(&mut self, value: u8, time: EmuTime) {
        if self.registers.version().is_msx1() {
            return;
        }
        let reg = self.registers.indirect_pointer();
        // R#17 itself is not writable through the indirect port.
        if reg != 17 {
            self.change_register(reg, value, time);
        }
        if self.registers.indirect_auto_increment() {
            self.registers.advance_indirect_pointer();
        }
    }

    // ----- register changes -----

    /// Mask, short-circuit, and commit a register write with its before/after effects.
    pub fn change_register(&mut self, reg: u8, value: u8, time: EmuTime) {
        // Command-engine registers pass through unconditionally; a rewrite of the
        // command register starts a new command.
        if (32..47).contains(&reg) {
            let masked = value & self.registers.value_mask(reg);
            self.registers.commit(reg, masked);
            self.cmd.write_register(reg - 32, masked, time);
            return;
        }

        let masked = value & self.registers.value_mask(reg);
        let old = self.registers.read(reg);
        if masked == old {
            return;
        }
        log::debug!("R#{reg} = {masked:02X} (was {old:02X})");

        let change = masked ^ old;
        let frame_ticks = self.current_frame_ticks(time);

        // Before effects: every renderer notification synchronizes rendering up to
        // `time` against pre-change state before recording the new value.
        match reg {
            0 | 1 => {
                let (new_r0, new_r1) = if reg == 0 {
                    (masked, self.registers.read(1))
                } else {
                    (self.registers.read(0), masked)
                };
                let new_mode = DisplayMode::from_registers(new_r0, new_r1);
                if new_mode != self.registers.display_mode() {
                    self.change_display_mode(new_mode, time, frame_ticks);
                }
                if reg == 1 {
                    if change.bit(6) {
                        let enabled = masked.bit(6);
                        self.with_renderer(time, |renderer, ctx| {
                            renderer.update_display_enabled(ctx, enabled, time);
                        });
                    }
                    if change & 0x03 != 0 {
                        self.sync_sprites(time, frame_ticks);
                    }
                }
            }
            2..=4 | 10 => {
                self.with_renderer(time, |renderer, ctx| renderer.sync(ctx, time));
            }
            5 | 6 | 11 => {
                self.with_renderer(time, |renderer, ctx| renderer.sync(ctx, time));
                self.sync_sprites(time, frame_ticks);
            }
            7 => {
                let colour = masked & 0x0F;
                self.with_renderer(time, |renderer, ctx| {
                    renderer.update_backdrop(ctx, colour, time);
                });
            }
            12 | 23 => {
                self.with_renderer(time, |renderer, ctx| renderer.sync(ctx, time));
            }
            _ => {}
        }

        self.registers.commit(reg, masked);

        // After effects, against committed state.
        match reg {
            0 | 1 => {
                self.update_vram_windows();
                self.apply_sprite_registers();
            }
            2..=6 | 10 | 11 => {
                self.update_vram_windows();
                self.apply_sprite_registers();
            }
            19 | 23 => {
                // Line-match offset changed; allow the horizontal latch to re-fire
                // later in this frame.
                if self.hscan_tick() > frame_ticks {
                    self.hscan_fired = false;
                }
            }
            _ => {}
        }
    }

    fn change_display_mode(&mut self, mode: DisplayMode, time: EmuTime, frame_ticks: u64) {
        log::debug!("display mode -> {mode}");
        self.with_renderer(time, |renderer, ctx| {
            renderer.update_display_mode(ctx, mode, time);
        });
        self.sync_sprites(time, frame_ticks);
        let sprite_mode = mode.sprite_mode(self.registers.version().is_msx1());
        self.sprites.set_mode(sprite_mode);
    }

    /// Advance sprite evaluation to the current display line before a sprite-affecting
    /// register takes effect.
    fn sync_sprites(&mut self, time: EmuTime, frame_ticks: u64) {
        let limit = self.display_line_at(frame_ticks);
        let Self { vram, sprites, cmd, .. } = self;
        sprites.check_until_line(limit, time, vram, cmd.as_mut());
    }

    fn apply_sprite_registers(&mut self) {
        self.sprites.set_attribute_base(
            self.registers.sprite_attribute_base() & self.vram.address_mask(),
        );
        self.sprites
            .set_pattern_base(self.registers.sprite_pattern_base() & self.vram.address_mask());
        self.sprites.set_size(self.registers.sprite_size());
        self.sprites.set_magnified(self.registers.sprites_magnified());
    }

    /// Resize the consumer windows after any table base change. Window extents only
    /// drive synchronization and dirty granularity; converters mask addresses themselves.
    fn update_vram_windows(&mut self) {
        let mask = self.vram.address_mask();
        let len = mask + 1;
        let clamp = |start: u32, size: u32| {
            let start = start & mask;
            (start, (start + size).min(len))
        };
        let mode = self.registers.display_mode();

        if mode.is_bitmap() {
            let (start, end) = clamp(self.registers.name_base(), 0x8000);
            self.vram.set_window(WindowId::Bitmap, start, end);
            self.vram.disable_window(WindowId::NameTable);
            self.vram.disable_window(WindowId::PatternTable);
            self.vram.disable_window(WindowId::ColorTable);
        } else {
            let (start, end) = clamp(self.registers.name_base(), 0x1000);
            self.vram.set_window(WindowId::NameTable, start, end);
            let (start, end) = clamp(self.registers.pattern_base(), 0x2000);
            self.vram.set_window(WindowId::PatternTable, start, end);
            let (start, end) = clamp(self.registers.colour_base(), 0x2000);
            self.vram.set_window(WindowId::ColorTable, start, end);
            self.vram.disable_window(WindowId::Bitmap);
        }

        // Mode 2 keeps its per-line colour table 512 bytes below the attributes.
        let attribute_base = self.registers.sprite_attribute_base();
        let (start, end) = clamp(attribute_base.wrapping_sub(512), 0x280);
        self.vram.set_window(WindowId::SpriteAttribute, start, end);
        let (start, end) = clamp(self.registers.sprite_pattern_base(), 0x800);
        self.vram.set_window(WindowId::SpritePattern, start, end);
    }

    // ----- status registers -----

    fn read_status(&mut self, time: EmuTime) -> u8 {
        self.control_latch = ControlLatch::Empty;
        let index =
            if self.registers.version().is_msx1() { 0 } else { self.registers.status_pointer() };
        let frame_ticks = self.current_frame_ticks(time);

        match index {
            0 => {
                self.sync_sprites(time, frame_ticks);
                let mut status = self.sprites.read_status();
                if self.vertical_irq {
                    status |= 0x80;
                }
                self.vertical_irq = false;
                log::trace!("S#0 read -> {status:02X}");
                status
            }
            1 => {
                let id = match self.registers.version() {
                    VdpVersion::V9958 => 0x04,
                    _ => 0x00,
                };
                let horizontal = if self.registers.horizontal_interrupt_enabled() {
                    let latched = self.horizontal_irq;
                    self.horizontal_irq = false;
                    latched
                } else {
                    // Latch disabled: the bit tracks the live horizontal retrace window
                    // on every line.
                    self.in_horizontal_retrace(frame_ticks)
                };
                id | u8::from(horizontal)
            }
            2 => {
                let mut status = 0x0C;
                if self.cmd.transfer_ready(time) {
                    status |= 0x80;
                }
                if self.in_vertical_retrace(frame_ticks) {
                    status |= 0x40;
                }
                if self.in_horizontal_retrace(frame_ticks) {
                    status |= 0x20;
                }
                if self.cmd.executing(time) {
                    status |= 0x01;
                }
                status
            }
            // Exact collision coordinates are not modeled; hardware-shaped zeros.
            3..=6 => match self.sprites.collision_coordinates() {
                Some((x, y)) => match index {
                    3 => x.lsb(),
                    4 => x.msb(),
                    5 => y.lsb(),
                    _ => y.msb(),
                },
                None => 0,
            },
            7 => self.cmd.transfer_colour(),
            8 => self.cmd.border_x().lsb(),
            9 => self.cmd.border_x().msb() | 0xFC,
            _ => 0xFF,
        }
    }

    fn in_vertical_retrace(&self, frame_ticks: u64) -> bool {
        let line = (frame_ticks / u64::from(TICKS_PER_LINE)) as u16;
        line < self.frame.line_zero || line >= self.frame.line_zero + self.frame.display_lines
    }

    fn in_horizontal_retrace(&self, frame_ticks: u64) -> bool {
        let tick_in_line = (frame_ticks % u64::from(TICKS_PER_LINE)) as u16;
        tick_in_line < self.frame.display_x_start
            || tick_in_line >= self.frame.display_x_start + self.frame.display_width
    }

    // ----- frame scheduling -----

    /// Advance virtual time to `time`, firing horizontal-scan, vertical-scan, and
    /// frame-end events in order. Returns `FrameRendered` when a frame was presented.
    pub fn execute_until(&mut self, time: EmuTime) -> TickEffect {
        debug_assert!(time >= self.time, "executing into the past");
        let mut effect = TickEffect::None;

        loop {
            let frame_ticks = self.frame_start.ticks_till(time);
            let frame_end = self.frame.frame_ticks();

            let hscan = self.hscan_tick();
            if !self.hscan_fired && hscan <= frame_ticks.min(frame_end) {
                self.hscan_fired = true;
                self.horizontal_irq = true;
                log::trace!("horizontal scan latch at tick {hscan}");
            }

            let vscan =
                u64::from(self.frame.line_zero + self.frame.display_lines) * u64::from(TICKS_PER_LINE);
            if !self.vscan_fired && vscan <= frame_ticks.min(frame_end) {
                self.vscan_fired = true;
                self.vertical_irq = true;
                log::trace!("vertical scan latch at tick {vscan}");
            }

            if frame_ticks < frame_end {
                break;
            }

            // Frame boundary: finish rendering, present if frame skip allows, and
            // sample next-frame timing.
            let end_time = self.frame_start + frame_end;
            // Status latches are CPU-visible even on skipped frames: bring the
            // sprite checker to the end of the display area before it resets.
            {
                let display_lines = self.frame.display_lines;
                let Self { vram, sprites, cmd, .. } = self;
                sprites.check_until_line(display_lines, end_time, vram, cmd.as_mut());
            }
            if self.finish_frame(end_time) {
                effect = TickEffect::FrameRendered;
                // Dirt accumulates across skipped frames; clear it only once drawn.
                self.vram.dirty_mut().flush();
            }
            self.frame_start = end_time;
            self.sample_frame_timing();
            self.start_frame(end_time);
        }

        self.time = time;
        effect
    }

    /// Tick offset within the frame of the horizontal line match.
    fn hscan_tick(&self) -> u64 {
        let target_line = self
            .registers
            .horizontal_scan_line()
            .wrapping_sub(self.registers.vertical_scroll());
        let line = u64::from(self.frame.line_zero) + u64::from(target_line);
        line * u64::from(TICKS_PER_LINE)
            + u64::from(self.frame.display_x_start + self.frame.display_width)
    }

    fn finish_frame(&mut self, time: EmuTime) -> bool {
        let Self { registers, vram, sprites, cmd, renderer, frame, .. } = self;
        let mut ctx = RenderCtx {
            registers,
            vram,
            sprites,
            cmd: cmd.as_mut(),
            frame: *frame,
            time,
            frame_ticks: frame.frame_ticks(),
        };
        renderer.frame_end(&mut ctx, time)
    }

    /// Sample timing parameters that stay fixed for the whole next frame.
    fn sample_frame_timing(&mut self) {
        let timing = self.registers.timing_mode();
        let display_lines = self.registers.display_lines();
        let base_line_zero = match timing {
            TimingMode::Ntsc => NTSC_LINE_ZERO,
            TimingMode::Pal => PAL_LINE_ZERO,
        };
        // 212-line mode starts ten lines earlier; R#18 shifts further.
        let mut line_zero = i32::from(base_line_zero) - i32::from(self.registers.vertical_adjust());
        if display_lines == 212 {
            line_zero -= 10;
        }

        let text = self.registers.display_mode().is_text();
        self.frame = FrameTiming {
            timing,
            lines: match timing {
                TimingMode::Ntsc => NTSC_LINES,
                TimingMode::Pal => PAL_LINES,
            },
            line_zero: line_zero.max(0) as u16,
            display_lines,
            display_x_start: if text { TEXT_DISPLAY_X_START } else { GRAPHICS_DISPLAY_X_START },
            display_width: if text { 960 } else { 1024 },
            blink_state: self.next_blink_state(),
        };
    }

    /// Advance the Text2 blink phase by one frame. R#13's high nibble is the display time
    /// of the alternate (R#12) colour pair, the low nibble that of the base pair.
    fn next_blink_state(&mut self) -> bool {
        let (on_frames, off_frames) = self.registers.blink_periods();
        if on_frames == 0 {
            self.blink_state = false;
        } else if off_frames == 0 {
            self.blink_state = true;
        } else {
            if self.blink_counter == 0 {
                self.blink_state = !self.blink_state;
                self.blink_counter = if self.blink_state { on_frames } else { off_frames };
            }
            self.blink_counter -= 1;
        }
        self.blink_state
    }

    fn start_frame(&mut self, time: EmuTime) {
        self.hscan_fired = false;
        self.vscan_fired = false;
        self.sprites.frame_start();
        self.renderer.frame_start(self.frame, time);
    }

    fn current_frame_ticks(&self, time: EmuTime) -> u64 {
        self.frame_start.ticks_till(time)
    }

    /// Display-relative line containing `frame_ticks`, clamped to the checker's range.
    fn display_line_at(&self, frame_ticks: u64) -> u16 {
        let line = (frame_ticks / u64::from(TICKS_PER_LINE)) as i64 - i64::from(self.frame.line_zero);
        line.clamp(0, MAX_LINES as i64) as u16
    }

    fn with_renderer<R>(
        &mut self,
        time: EmuTime,
        f: impl FnOnce(&mut PixelRenderer<B>, &mut RenderCtx<'_>) -> R,
    ) -> R {
        let frame_ticks = self.frame_start.ticks_till(time);
        let Self { registers, vram, sprites, cmd, renderer, frame, .. } = self;
        let mut ctx = RenderCtx {
            registers,
            vram,
            sprites,
            cmd: cmd.as_mut(),
            frame: *frame,
            time,
            frame_ticks,
        };
        f(renderer, &mut ctx)
    }
}

#[cfg(test)]
mod tests {
    use super::*;
    use crate::vram::NullCommandEngine;
    use msx_config::{FrameSkipMode, RenderAccuracy};
    use test_log::test;

    #[derive(Debug, Default)]
    struct RecordingBackend {
        display_enabled_calls: Vec<bool>,
        mode_calls: Vec<DisplayMode>,
        palette_calls: Vec<(u8, u16)>,
        frames_presented: u32,
    }

    impl RasterBackend for RecordingBackend {
        fn frame_start(&mut self, _timing: FrameTiming) {}

        fn frame_end(&mut self) {
            self.frames_presented += 1;
        }

        fn set_display_mode(&mut self, mode: DisplayMode) {
            self.mode_calls.push(mode);
        }

        fn set_display_enabled(&mut self, enabled: bool) {
            self.display_enabled_calls.push(enabled);
        }

        fn set_palette(&mut self, index: u8, grb: u16) {
            self.palette_calls.push((index, grb));
        }

        fn set_background_colour(&mut self, _colour: u8) {}

        fn draw_border(&mut self, _ctx: &mut RenderCtx<'_>, _line: u16, _from_x: u16, _to_x: u16) {}

        fn draw_display(&mut self, _ctx: &mut RenderCtx<'_>, _line: u16, _from_x: u16, _to_x: u16) {}
    }

    fn new_vdp(version: VdpVersion, vram_kb: u32) -> Vdp<RecordingBackend> {
        let renderer_config =
            RendererConfig { accuracy: RenderAccuracy::Pixel, ..RendererConfig::default() };
        Vdp::new(
            version,
            vram_kb,
            VdpConfig::default(),
            renderer_config,
            RecordingBackend::default(),
            Box::new(NullCommandEngine),
        )
        .unwrap()
    }

    fn msx1_vdp() -> Vdp<RecordingBackend> {
        new_vdp(VdpVersion::Tms99X8A, 16)
    }

    fn write_vram(vdp: &mut Vdp<RecordingBackend>, address: u16, bytes: &[u8], t: EmuTime) {
        vdp.write_io(1, (address & 0xFF) as u8, t);
        vdp.write_io(1, 0x40 | (address >> 8) as u8, t);
        for &byte in bytes {
            vdp.write_io(0, byte, t);
        }
    }

    /// Two overlapping 8x8 sprites plus the table-end sentinel, with the
    /// attribute and pattern tables moved off page zero.
    fn overlapping_sprites(vdp: &mut Vdp<RecordingBackend>, t: EmuTime) {
        vdp.change_register(5, 0x36, t); // attributes at 0x1B00
        vdp.change_register(6, 0x07, t); // patterns at 0x3800
        write_vram(vdp, 0x1B00, &[10, 20, 1, 1, 10, 20, 1, 2, 208], t);
        write_vram(vdp, 0x3808, &[0xFF; 8], t);
    }

    #[test]
    fn construction_validates_configuration() {
        assert!(matches!(
            Vdp::new(
                VdpVersion::V9938,
                16,
                VdpConfig::default(),
                RendererConfig::default(),
                RecordingBackend::default(),
                Box::new(NullCommandEngine),
            ),
            Err(VdpConfigError::VramSizeMismatch { .. })
        ));
        assert!(matches!(
            Vdp::new(
                VdpVersion::Tms99X8A,
                48,
                VdpConfig::default(),
                RendererConfig::default(),
                RecordingBackend::default(),
                Box::new(NullCommandEngine),
            ),
            Err(VdpConfigError::UnsupportedVramSize(48))
        ));
        assert!(!new_vdp(VdpVersion::V9958, 128).irq());
    }

    #[test]
    fn control_port_register_write_and_masking() {
        let mut vdp = msx1_vdp();
        let t = EmuTime::at(100, 4);

        // R#7 = 0xF5 via the two-byte control sequence.
        vdp.write_io(1, 0xF5, t);
        vdp.write_io(1, 0x87, t);
        assert_eq!(vdp.registers().read(7), 0xF5);
        assert_eq!(vdp.registers().foreground_colour(), 0x0F);
        assert_eq!(vdp.registers().background_colour(), 0x05);

        // R#0's MSX1 mask is 0x03.
        vdp.write_io(1, 0xFF, t);
        vdp.write_io(1, 0x80, t);
        assert_eq!(vdp.registers().read(0), 0x03);
    }

    #[test]
    fn register_write_decodes_on_the_high_bit_alone() {
        let mut vdp = msx1_vdp();
        let t = EmuTime::at(100, 4);

        // Prime the read buffer so a misdecoded read setup would be visible.
        write_vram(&mut vdp, 0x0000, &[0x11], t);
        vdp.write_io(1, 0x00, t);
        vdp.write_io(1, 0x00, t);

        // Bit 6 set alongside bit 7 is still a register write, not a read setup.
        vdp.write_io(1, 0xAA, t);
        vdp.write_io(1, 0xC7, t);
        assert_eq!(vdp.registers().read(7), 0xAA);

        // The buffered read from before is untouched by the register write.
        assert_eq!(vdp.read_io(0, t), 0x11);
    }

    #[test]
    fn sprites_latch_collisions_in_the_power_on_mode() {
        let mut vdp = msx1_vdp();
        let t = EmuTime::at(100, 4);
        assert_eq!(vdp.display_mode(), DisplayMode::Graphic1);
        overlapping_sprites(&mut vdp, t);

        // Read S#0 with the raster a dozen lines into the display area.
        let line = u64::from(vdp.frame_timing().line_zero) + 12;
        let t2 = EmuTime::at(line * 1368, 4);
        assert_eq!(vdp.read_io(1, t2) & 0x20, 0x20);
    }

    #[test]
    fn skipped_frames_still_latch_sprite_collisions() {
        let renderer_config = RendererConfig {
            frame_skip_mode: FrameSkipMode::Manual,
            frame_skip: 1,
            ..RendererConfig::default()
        };
        let mut vdp = Vdp::new(
            VdpVersion::Tms99X8A,
            16,
            VdpConfig::default(),
            renderer_config,
            RecordingBackend::default(),
            Box::new(NullCommandEngine),
        )
        .unwrap();

        let t = EmuTime::at(100, 4);
        overlapping_sprites(&mut vdp, t);

        // The first frame is dropped by the manual skip cadence, but S#0 must
        // report the collision all the same.
        let after_frame = EmuTime::at(vdp.frame_timing().frame_ticks() + 10, 4);
        assert_eq!(vdp.execute_until(after_frame), TickEffect::None);
        assert_eq!(vdp.backend().frames_presented, 0);
        assert_eq!(vdp.read_io(1, after_frame) & 0x20, 0x20);
    }

    #[test]
    fn data_port_write_then_buffered_read() {
        let mut vdp = msx1_vdp();
        let t = EmuTime::at(100, 4);

        // Write setup at address 0x1234, write two bytes.
        vdp.write_io(1, 0x34, t);
        vdp.write_io(1, 0x52, t);
        vdp.write_io(0, 0xAA, t);
        vdp.write_io(0, 0xBB, t);

        // Read setup triggers an immediate read-ahead; reads then lag one access.
        vdp.write_io(1, 0x34, t);
        vdp.write_io(1, 0x12, t);
        assert_eq!(vdp.read_io(0, t), 0xAA);
        assert_eq!(vdp.read_io(0, t), 0xBB);
    }

    #[test]
    fn redundant_register_write_is_a_no_op() {
        let mut vdp = msx1_vdp();
        let t = EmuTime::at(100, 4);

        vdp.change_register(1, 0x40, t);
        assert_eq!(vdp.backend().display_enabled_calls, vec![true]);

        // Same masked value again: no notification.
        vdp.change_register(1, 0x40, t);
        assert_eq!(vdp.backend().display_enabled_calls, vec![true]);
    }

    #[test]
    fn display_enable_toggle_notifies_in_order() {
        let mut vdp = msx1_vdp();
        let t = EmuTime::at(100, 4);

        vdp.change_register(1, 0x40, t);
        vdp.change_register(1, 0x00, t + 10);
        vdp.change_register(1, 0x40, t + 20);
        assert_eq!(vdp.backend().display_enabled_calls, vec![true, false, true]);
    }

    #[test]
    fn display_mode_change_notifies_backend() {
        let mut vdp = msx1_vdp();
        let t = EmuTime::at(100, 4);

        vdp.change_register(0, 0x02, t);
        assert_eq!(vdp.display_mode(), DisplayMode::Graphic2);
        assert_eq!(vdp.backend().mode_calls, vec![DisplayMode::Graphic2]);
    }

    #[test]
    fn palette_port_writes_and_auto_increments() {
        let mut vdp = new_vdp(VdpVersion::V9938, 128);
        let t = EmuTime::at(100, 4);

        vdp.change_register(16, 3, t);
        vdp.write_io(2, 0x17, t); // R=1, B=7
        vdp.write_io(2, 0x05, t); // G=5
        assert_eq!(vdp.registers().palette[3], 0x517);
        assert_eq!(vdp.registers().palette_pointer(), 4);
        assert_eq!(vdp.backend().palette_calls, vec![(3, 0x517)]);
    }

    #[test]
    fn indirect_port_honors_r17_auto_increment() {
        let mut vdp = new_vdp(VdpVersion::V9938, 128);
        let t = EmuTime::at(100, 4);

        vdp.change_register(17, 2, t);
        vdp.write_io(3, 0x11, t);
        vdp.write_io(3, 0x22, t);
        assert_eq!(vdp.registers().read(2), 0x11);
        assert_eq!(vdp.registers().read(3), 0x22);
        assert_eq!(vdp.registers().indirect_pointer(), 4);

        // High bit of R#17 freezes the pointer.
        vdp.change_register(17, 0x85, t);
        vdp.write_io(3, 0x33, t);
        vdp.write_io(3, 0x44, t);
        assert_eq!(vdp.registers().read(5), 0x44);
        assert_eq!(vdp.registers().indirect_pointer(), 5);
    }

    #[test]
    fn vertical_interrupt_latches_and_clears_on_status_read() {
        let mut vdp = msx1_vdp();
        vdp.change_register(1, 0x20, EmuTime::at(0, 4)); // IE0

        // Just before vertical scan: nothing pending.
        let vscan_tick = u64::from(vdp.frame_timing().line_zero + 192) * 1368;
        let before = EmuTime::at(vscan_tick - 1, 4);
        vdp.execute_until(before);
        assert!(!vdp.irq());

        let after = EmuTime::at(vscan_tick + 1, 4);
        vdp.execute_until(after);
        assert!(vdp.irq());

        let status = vdp.read_io(1, after);
        assert_eq!(status & 0x80, 0x80);
        assert!(!vdp.irq());
        assert_eq!(vdp.read_io(1, after) & 0x80, 0);
    }

    #[test]
    fn frame_boundary_presents_and_restarts() {
        let mut vdp = msx1_vdp();
        let frame_ticks = vdp.frame_timing().frame_ticks();

        let effect = vdp.execute_until(EmuTime::at(frame_ticks + 10, 4));
        assert_eq!(effect, TickEffect::FrameRendered);
        assert_eq!(vdp.backend().frames_presented, 1);
        assert_eq!(vdp.ticks_this_frame(EmuTime::at(frame_ticks + 10, 4)), 10);
    }

    #[test]
    fn msx2_data_pointer_carries_into_r14() {
        let mut vdp = new_vdp(VdpVersion::V9938, 128);
        let t = EmuTime::at(100, 4);

        // Point at the last byte of bank 0.
        vdp.write_io(1, 0xFF, t);
        vdp.write_io(1, 0x7F, t);
        vdp.write_io(0, 0x5A, t);
        assert_eq!(vdp.registers().read(14), 1);
    }

    #[test]
    fn status_1_reports_chip_id() {
        let mut vdp = new_vdp(VdpVersion::V9958, 128);
        let t = EmuTime::at(100, 4);
        vdp.change_register(15, 1, t);
        assert_eq!(vdp.read_io(1, t) & 0x3E, 0x04);

        let mut vdp = new_vdp(VdpVersion::V9938, 128);
        vdp.change_register(15, 1, t);
        assert_eq!(vdp.read_io(1, t) & 0x3E, 0x00);
    }
}
