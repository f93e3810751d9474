//! Per-scanline sprite evaluation for sprite modes 1 and 2.
//!
//! Sprites for display line N are evaluated from sprite-table state one line earlier (the
//! hardware pre-fetches patterns a line ahead). Results accumulate in per-line visibility
//! buffers; consumers must not read a line the checker has not reached yet.

use crate::emutime::EmuTime;
use crate::vram::{CommandEngine, VdpVram};
use bincode::{Decode, Encode};

/// Maximum scanlines in a field (PAL); NTSC uses fewer and simply leaves the tail unused.
pub const MAX_LINES: usize = 313;

/// Sprite-table capacity; also the upper bound on visible sprites per line when the
/// hardware limit is disabled.
pub const SPRITE_TABLE_LEN: usize = 32;

const STATUS_OVERFLOW_BIT: u8 = 0x40;
const STATUS_COLLISION_BIT: u8 = 0x20;
const STATUS_INDEX_MASK: u8 = 0x1F;

/// Mode-2 attribute bits held in the per-line colour byte.
const EARLY_CLOCK_BIT: u8 = 0x80;
const IGNORE_COLLISION_BIT: u8 = 0x20;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub enum SpriteMode {
    /// No sprites (text modes and blanked display).
    #[default]
    Off,
    /// TMS9918A-compatible: up to 4 sprites per line, table-end sentinel Y=208.
    Mode1,
    /// V9938/V9958: up to 8 sprites per line, per-line colour table, sentinel Y=216.
    Mode2,
}

impl SpriteMode {
    #[must_use]
    pub const fn visible_limit(self) -> usize {
        match self {
            Self::Off => 0,
            Self::Mode1 => 4,
            Self::Mode2 => 8,
        }
    }

    #[must_use]
    pub const fn sentinel_y(self) -> u8 {
        match self {
            Self::Off => 0,
            Self::Mode1 => 208,
            Self::Mode2 => 216,
        }
    }
}

/// One visible sprite on one line: left-aligned 32-bit pixel pattern, screen X, and the
/// colour/attribute byte (mode 2 keeps the CC/IC flags in the high bits).
#[derive(Debug, Clone, Copy, Default, PartialEq, Eq, Encode, Decode)]
pub struct SpritePattern {
    pub pattern: u32,
    pub x: i16,
    pub colour: u8,
}

#[derive(Debug, Clone, Copy, Encode, Decode)]
pub struct LineSpriteBuffer {
    sprites: [SpritePattern; SPRITE_TABLE_LEN],
    len: u8,
}

impl LineSpriteBuffer {
    const EMPTY: Self = Self { sprites: [SpritePattern { pattern: 0, x: 0, colour: 0 }; SPRITE_TABLE_LEN], len: 0 };

    fn push(&mut self, sprite: SpritePattern) {
        self.sprites[self.len as usize] = sprite;
        self.len += 1;
    }

    #[must_use]
    pub fn sprites(&self) -> &[SpritePattern] {
        &self.sprites[..self.len as usize]
    }
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct SpriteChecker {
    mode: SpriteMode,
    limit_sprites: bool,
    attribute_base: u32,
    pattern_base: u32,
    /// 8 or 16 pixels, before magnification.
    size: u8,
    magnified: bool,
    /// Sprite-related portion of S#0: 5S flag, collision flag, 5th/9th sprite index.
    status: u8,
    /// First line not yet evaluated this frame.
    current_line: u16,
    lines: Vec<LineSpriteBuffer>,
}

impl SpriteChecker {
    #[must_use]
    pub fn new(limit_sprites: bool) -> Self {
        Self {
            mode: SpriteMode::Off,
            limit_sprites,
            attribute_base: 0,
            pattern_base: 0,
            size: 8,
            magnified: false,
            status: 0,
            current_line: 0,
            lines: vec![LineSpriteBuffer::EMPTY; MAX_LINES],
        }
    }

    #[must_use]
    pub fn mode(&self) -> SpriteMode {
        self.mode
    }

    /// Called by the VDP at a display-mode-change boundary; never mid-scanline.
    pub fn set_mode(&mut self, mode: SpriteMode) {
        self.mode = mode;
    }

    pub fn set_attribute_base(&mut self, base: u32) {
        self.attribute_base = base;
    }

    pub fn set_pattern_base(&mut self, base: u32) {
        self.pattern_base = base;
    }

    pub fn set_size(&mut self, size: u8) {
        debug_assert!(size == 8 || size == 16);
        self.size = size;
    }

    pub fn set_magnified(&mut self, magnified: bool) {
        self.magnified = magnified;
    }

    pub fn set_limit_sprites(&mut self, limit: bool) {
        self.limit_sprites = limit;
    }

    /// Size in display pixels after magnification.
    #[must_use]
    pub fn magnified_size(&self) -> u16 {
        u16::from(self.size) << u8::from(self.magnified)
    }

    /// Reset per-frame progress. Latched status survives frame boundaries.
    pub fn frame_start(&mut self) {
        self.current_line = 0;
        for line in &mut self.lines {
            line.len = 0;
        }
    }

    /// Sprite bits of S#0. Reading clears the collision and overflow latches and the
    /// victim index, matching hardware's read-clears-latch behavior.
    pub fn read_status(&mut self) -> u8 {
        let status = self.status;
        self.status = 0;
        status
    }

    #[must_use]
    pub fn collision_latched(&self) -> bool {
        self.status & STATUS_COLLISION_BIT != 0
    }

    /// Coordinates of the latched collision. The exact collision point is not modeled;
    /// callers get `None` and should report zeros where hardware would report a position.
    #[must_use]
    pub fn collision_coordinates(&self) -> Option<(u16, u16)> {
        None
    }

    /// Evaluate all lines in `[current_line, limit)` against VRAM as of `time`.
    pub fn check_until_line(
        &mut self,
        limit: u16,
        time: EmuTime,
        vram: &mut VdpVram,
        cmd: &mut dyn CommandEngine,
    ) {
        if limit <= self.current_line || self.mode == SpriteMode::Off {
            self.current_line = self.current_line.max(limit);
            return;
        }

        // One flush up front; the scattered table reads below use the raw path.
        vram.sync(time, cmd);

        let limit = limit.min(MAX_LINES as u16);
        for line in self.current_line..limit {
            match self.mode {
                SpriteMode::Off => unreachable!(),
                SpriteMode::Mode1 => self.check_line_mode1(line, vram),
                SpriteMode::Mode2 => self.check_line_mode2(line, vram),
            }
        }
        self.current_line = limit;
    }

    /// Visible sprites for `line`. The line must already have been evaluated.
    #[must_use]
    pub fn sprites_on_line(&self, line: u16) -> &[SpritePattern] {
        debug_assert!(line < self.current_line, "sprite line {line} not evaluated yet");
        self.lines[line as usize].sprites()
    }

    fn check_line_mode1(&mut self, display_line: u16, vram: &VdpVram) {
        let magnified_size = self.magnified_size();
        let mask = vram.address_mask();

        let mut visible = LineSpriteBuffer::EMPTY;
        for sprite in 0..SPRITE_TABLE_LEN as u32 {
            let attr = self.attribute_base + 4 * sprite;
            let y = vram.read_raw(attr & mask);
            if y == SpriteMode::Mode1.sentinel_y() {
                break;
            }

            // Y in the table is the line *above* the first displayed line.
            let row = u16::from((display_line as u8).wrapping_sub(y).wrapping_sub(1));
            if row >= magnified_size {
                continue;
            }

            if visible.len as usize >= SpriteMode::Mode1.visible_limit() {
                if self.status & STATUS_OVERFLOW_BIT == 0 {
                    self.status =
                        (self.status & !STATUS_INDEX_MASK) | STATUS_OVERFLOW_BIT | sprite as u8;
                }
                if self.limit_sprites {
                    break;
                }
            }

            let x = i16::from(vram.read_raw((attr + 1) & mask));
            let pattern_index = vram.read_raw((attr + 2) & mask);
            let colour = vram.read_raw((attr + 3) & mask);
            let x = if colour & EARLY_CLOCK_BIT != 0 { x - 32 } else { x };

            let pattern = self.fetch_pattern(pattern_index, row, vram);
            visible.push(SpritePattern { pattern, x, colour: colour & 0x0F });
        }

        self.latch_collision(&visible, false);
        self.lines[display_line as usize] = visible;
    }

    fn check_line_mode2(&mut self, display_line: u16, vram: &VdpVram) {
        let magnified_size = self.magnified_size();
        let mask = vram.address_mask();
        // The per-line colour table sits 512 bytes below the attribute table.
        let colour_base = self.attribute_base.wrapping_sub(512);

        let mut visible = LineSpriteBuffer::EMPTY;
        for sprite in 0..SPRITE_TABLE_LEN as u32 {
            let attr = self.attribute_base + 4 * sprite;
            let y = vram.read_raw(attr & mask);
            if y == SpriteMode::Mode2.sentinel_y() {
                break;
            }

            let row = u16::from((display_line as u8).wrapping_sub(y).wrapping_sub(1));
            if row >= magnified_size {
                continue;
            }

            if visible.len as usize >= SpriteMode::Mode2.visible_limit() {
                if self.status & STATUS_OVERFLOW_BIT == 0 {
                    self.status =
                        (self.status & !STATUS_INDEX_MASK) | STATUS_OVERFLOW_BIT | sprite as u8;
                }
                if self.limit_sprites {
                    break;
                }
            }

            // 16 colour bytes per sprite, one per (unmagnified) pattern row.
            let pattern_row = row >> u8::from(self.magnified);
            let colour = vram.read_raw((colour_base + 16 * sprite + u32::from(pattern_row)) & mask);
            let x = i16::from(vram.read_raw((attr + 1) & mask));
            let x = if colour & EARLY_CLOCK_BIT != 0 { x - 32 } else { x };
            let pattern_index = vram.read_raw((attr + 2) & mask);

            let pattern = self.fetch_pattern(pattern_index, row, vram);
            visible.push(SpritePattern { pattern, x, colour });
        }

        self.latch_collision(&visible, true);
        self.lines[display_line as usize] = visible;
    }

    fn fetch_pattern(&self, pattern_index: u8, row: u16, vram: &VdpVram) -> u32 {
        let mask = vram.address_mask();
        let row = row >> u8::from(self.magnified);

        let mut pattern = if self.size == 16 {
            let base = self.pattern_base + (u32::from(pattern_index & 0xFC) << 3) + u32::from(row);
            (u32::from(vram.read_raw(base & mask)) << 24)
                | (u32::from(vram.read_raw((base + 16) & mask)) << 16)
        } else {
            let base = self.pattern_base + (u32::from(pattern_index) << 3) + u32::from(row);
            u32::from(vram.read_raw(base & mask)) << 24
        };

        if self.magnified {
            pattern = double_pattern(pattern);
        }
        pattern
    }

    /// Pairwise horizontal-overlap test; sticky until the status register is read.
    fn latch_collision(&mut self, visible: &LineSpriteBuffer, mode2: bool) {
        if self.status & STATUS_COLLISION_BIT != 0 {
            return;
        }

        let sprites = visible.sprites();
        'outer: for (i, a) in sprites.iter().enumerate() {
            if mode2 && a.colour & IGNORE_COLLISION_BIT != 0 {
                continue;
            }
            for b in &sprites[i + 1..] {
                if mode2 && b.colour & IGNORE_COLLISION_BIT != 0 {
                    continue;
                }
                let dist = i32::from(b.x) - i32::from(a.x);
                let overlap = match dist {
                    0 => a.pattern & b.pattern,
                    1..=31 => a.pattern & (b.pattern >> dist),
                    -31..=-1 => b.pattern & (a.pattern >> -dist),
                    _ => 0,
                };
                if overlap != 0 {
                    self.status |= STATUS_COLLISION_BIT;
                    break 'outer;
                }
            }
        }
    }
}

/// Expand the high 16 bits of `pattern` so each bit occupies two adjacent output bits.
#[must_use]
pub fn double_pattern(pattern: u32) -> u32 {
    let mut p = pattern >> 16;
    p = (p | (p << 8)) & 0x00FF_00FF;
    p = (p | (p << 4)) & 0x0F0F_0F0F;
    p = (p | (p << 2)) & 0x3333_3333;
    p = (p | (p << 1)) & 0x5555_5555;
    p | (p << 1)
}
