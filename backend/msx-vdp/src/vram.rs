//! VDP video memory: the single owner of the VRAM byte array.
//!
//! All consumers (CPU data port, command engine, sprite checker, pixel converters) go through
//! windowed access on this store. Reads that overlap the command engine's pending write window
//! flush the engine first, so every observer sees VRAM as of the requested virtual time.

use crate::emutime::EmuTime;
use crate::VdpConfigError;
use bincode::{Decode, Encode};
use msx_config::DirtyTracking;

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
pub enum VramSize {
    Kb16,
    Kb64,
    Kb128,
}

impl VramSize {
    #[must_use]
    pub const fn len(self) -> usize {
        match self {
            Self::Kb16 => 16 * 1024,
            Self::Kb64 => 64 * 1024,
            Self::Kb128 => 128 * 1024,
        }
    }

    #[must_use]
    pub const fn address_mask(self) -> u32 {
        (self.len() - 1) as u32
    }
}

impl TryFrom<u32> for VramSize {
    type Error = VdpConfigError;

    fn try_from(kb: u32) -> Result<Self, Self::Error> {
        match kb {
            16 => Ok(Self::Kb16),
            64 => Ok(Self::Kb64),
            128 => Ok(Self::Kb128),
            _ => Err(VdpConfigError::UnsupportedVramSize(kb)),
        }
    }
}

/// A half-open `[start, end)` VRAM address range owned by one consumer role.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
pub struct Window {
    start: u32,
    end: u32,
    enabled: bool,
}

impl Window {
    pub const DISABLED: Self = Self { start: 0, end: 0, enabled: false };

    #[must_use]
    pub fn new(start: u32, end: u32) -> Self {
        debug_assert!(start <= end);
        Self { start, end, enabled: true }
    }

    pub fn set_range(&mut self, start: u32, end: u32) {
        debug_assert!(start <= end);
        self.start = start;
        self.end = end;
        self.enabled = true;
    }

    pub fn disable(&mut self) {
        self.enabled = false;
    }

    #[must_use]
    pub const fn is_enabled(self) -> bool {
        self.enabled
    }

    #[must_use]
    pub const fn is_inside(self, address: u32) -> bool {
        self.enabled && self.start <= address && address < self.end
    }

    #[must_use]
    pub const fn overlaps(self, start: u32, end: u32) -> bool {
        self.enabled && self.start < end && start < self.end
    }
}

/// One window per VRAM consumer role.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum WindowId {
    CmdRead,
    CmdWrite,
    NameTable,
    ColorTable,
    PatternTable,
    Bitmap,
    SpriteAttribute,
    SpritePattern,
}

impl WindowId {
    pub const COUNT: usize = 8;

    const fn index(self) -> usize {
        match self {
            Self::CmdRead => 0,
            Self::CmdWrite => 1,
            Self::NameTable => 2,
            Self::ColorTable => 3,
            Self::PatternTable => 4,
            Self::Bitmap => 5,
            Self::SpriteAttribute => 6,
            Self::SpritePattern => 7,
        }
    }

    /// Windows whose contents feed rendered output (everything but the command engine's).
    pub const RENDER_WINDOWS: [Self; 6] = [
        Self::NameTable,
        Self::ColorTable,
        Self::PatternTable,
        Self::Bitmap,
        Self::SpriteAttribute,
        Self::SpritePattern,
    ];
}

pub const NAME_DIRTY_LEN: usize = 1 << 12;
pub const PATTERN_DIRTY_LEN: usize = 1 << 11;
pub const COLOUR_DIRTY_LEN: usize = 1 << 11;

/// Tracks which name/pattern/colour table entries changed since the last redraw.
///
/// In `FullRedraw` mode every query reports dirty, which is the always-correct fallback;
/// `Incremental` mode tracks real writes. Rendered output must be identical either way.
#[derive(Debug, Clone, Encode, Decode)]
pub struct DirtyTracker {
    tracking: DirtyTracking,
    name: Vec<bool>,
    pattern: Vec<bool>,
    colour: Vec<bool>,
    any_name: bool,
    any_pattern: bool,
    any_colour: bool,
}

impl DirtyTracker {
    fn new(tracking: DirtyTracking) -> Self {
        Self {
            tracking,
            name: vec![true; NAME_DIRTY_LEN],
            pattern: vec![true; PATTERN_DIRTY_LEN],
            colour: vec![true; COLOUR_DIRTY_LEN],
            any_name: true,
            any_pattern: true,
            any_colour: true,
        }
    }

    #[must_use]
    pub fn tracking(&self) -> DirtyTracking {
        self.tracking
    }

    #[must_use]
    pub fn name_dirty(&self, entry: usize) -> bool {
        match self.tracking {
            DirtyTracking::FullRedraw => true,
            DirtyTracking::Incremental => self.name[entry & (NAME_DIRTY_LEN - 1)],
        }
    }

    #[must_use]
    pub fn pattern_dirty(&self, entry: usize) -> bool {
        match self.tracking {
            DirtyTracking::FullRedraw => true,
            DirtyTracking::Incremental => self.pattern[entry & (PATTERN_DIRTY_LEN - 1)],
        }
    }

    #[must_use]
    pub fn colour_dirty(&self, entry: usize) -> bool {
        match self.tracking {
            DirtyTracking::FullRedraw => true,
            DirtyTracking::Incremental => self.colour[entry & (COLOUR_DIRTY_LEN - 1)],
        }
    }

    /// O(1) bypass: true if any table entry may have changed since the last flush.
    #[must_use]
    pub fn any_dirty(&self) -> bool {
        match self.tracking {
            DirtyTracking::FullRedraw => true,
            DirtyTracking::Incremental => self.any_name || self.any_pattern || self.any_colour,
        }
    }

    /// Per-frame bookkeeping: mark everything clean.
    pub fn flush(&mut self) {
        self.name.fill(false);
        self.pattern.fill(false);
        self.colour.fill(false);
        self.any_name = false;
        self.any_pattern = false;
        self.any_colour = false;
    }

    fn mark_name(&mut self, entry: usize) {
        self.name[entry & (NAME_DIRTY_LEN - 1)] = true;
        self.any_name = true;
    }

    fn mark_pattern(&mut self, entry: usize) {
        self.pattern[entry & (PATTERN_DIRTY_LEN - 1)] = true;
        self.any_pattern = true;
    }

    fn mark_colour(&mut self, entry: usize) {
        self.colour[entry & (COLOUR_DIRTY_LEN - 1)] = true;
        self.any_colour = true;
    }
}

/// Commit-only VRAM access handed to the command engine while it flushes pending work.
///
/// Bypasses the synchronization checks (the engine is the party being synchronized) but still
/// feeds the dirty tracker.
pub struct CmdVramView<'a> {
    vram: &'a mut VdpVram,
}

impl CmdVramView<'_> {
    #[must_use]
    pub fn read(&self, address: u32) -> u8 {
        self.vram.read_raw(address)
    }

    pub fn write(&mut self, address: u32, value: u8) {
        self.vram.commit(address, value);
    }

    #[must_use]
    pub fn address_mask(&self) -> u32 {
        self.vram.address_mask()
    }
}

/// The core's only view of the external VDP command engine (block copies, line draws).
///
/// Default method bodies describe an idle engine; [`NullCommandEngine`] uses them all.
pub trait CommandEngine {
    /// Flush pending VRAM writes up to `time`.
    fn sync(&mut self, vram: CmdVramView<'_>, time: EmuTime);

    /// Control-register write forwarded from VDP registers R#32-R#46 (0-based within the
    /// engine's register space).
    fn write_register(&mut self, reg: u8, value: u8, time: EmuTime) {
        let _ = (reg, value, time);
    }

    /// CE flag: a command is executing (S#2 bit 0).
    fn executing(&self, time: EmuTime) -> bool {
        let _ = time;
        false
    }

    /// TR flag: colour transfer ready (S#2 bit 7).
    fn transfer_ready(&self, time: EmuTime) -> bool {
        let _ = time;
        false
    }

    /// Colour-transfer byte (S#7).
    fn transfer_colour(&self) -> u8 {
        0
    }

    /// Border-detection X coordinate (S#8/S#9).
    fn border_x(&self) -> u16 {
        0
    }
}

/// Command engine stand-in for configurations without one (MSX1) and for tests.
#[derive(Debug, Clone, Copy, Default)]
pub struct NullCommandEngine;

impl CommandEngine for NullCommandEngine {
    fn sync(&mut self, _vram: CmdVramView<'_>, _time: EmuTime) {}
}

#[derive(Debug, Clone, Encode, Decode)]
pub struct VdpVram {
    data: Vec<u8>,
    size: VramSize,
    windows: [Window; WindowId::COUNT],
    dirty: DirtyTracker,
}

impl VdpVram {
    #[must_use]
    pub fn new(size: VramSize, tracking: DirtyTracking) -> Self {
        Self {
            data: vec![0; size.len()],
            size,
            windows: [Window::DISABLED; WindowId::COUNT],
            dirty: DirtyTracker::new(tracking),
        }
    }

    #[must_use]
    pub fn size(&self) -> VramSize {
        self.size
    }

    #[must_use]
    pub fn address_mask(&self) -> u32 {
        self.size.address_mask()
    }

    #[must_use]
    pub fn window(&self, id: WindowId) -> Window {
        self.windows[id.index()]
    }

    pub fn set_window(&mut self, id: WindowId, start: u32, end: u32) {
        self.windows[id.index()].set_range(start, end);
    }

    pub fn disable_window(&mut self, id: WindowId) {
        self.windows[id.index()].disable();
    }

    /// True if `address` falls inside any window a renderer or sprite checker reads from.
    #[must_use]
    pub fn render_window_covers(&self, address: u32) -> bool {
        WindowId::RENDER_WINDOWS.iter().any(|&id| self.windows[id.index()].is_inside(address))
    }

    /// Read one byte as of `time`, flushing the command engine first if its pending write
    /// window covers `address`.
    pub fn read(&mut self, address: u32, time: EmuTime, cmd: &mut dyn CommandEngine) -> u8 {
        debug_assert!((address as usize) < self.data.len(), "VRAM address {address:#07X} not pre-masked");
        if self.windows[WindowId::CmdWrite.index()].is_inside(address) {
            cmd.sync(CmdVramView { vram: self }, time);
        }
        self.data[address as usize]
    }

    /// Read a contiguous `[start, end)` area as of `time`, with the same synchronization rule
    /// as [`Self::read`]. Used by bitmap-line readers that need a whole line's bytes at once.
    pub fn read_area(
        &mut self,
        start: u32,
        end: u32,
        time: EmuTime,
        cmd: &mut dyn CommandEngine,
    ) -> &[u8] {
        debug_assert!(start <= end && (end as usize) <= self.data.len());
        if self.windows[WindowId::CmdWrite.index()].overlaps(start, end) {
            cmd.sync(CmdVramView { vram: self }, time);
        }
        &self.data[start as usize..end as usize]
    }

    /// Flush the command engine unconditionally if it has a pending write window. Consumers
    /// that then read many scattered bytes may use [`Self::read_raw`] for the rest of the
    /// same virtual-time step.
    pub fn sync(&mut self, time: EmuTime, cmd: &mut dyn CommandEngine) {
        if self.windows[WindowId::CmdWrite.index()].is_enabled() {
            cmd.sync(CmdVramView { vram: self }, time);
        }
    }

    /// Read without synchronization; only valid after a covering [`Self::sync`]/[`Self::read`]
    /// in the same virtual-time step.
    #[must_use]
    pub fn read_raw(&self, address: u32) -> u8 {
        debug_assert!((address as usize) < self.data.len(), "VRAM address {address:#07X} not pre-masked");
        self.data[address as usize]
    }

    /// Commit one byte from the CPU write path.
    ///
    /// The caller (the VDP) is responsible for notifying the renderer *before* this commit when
    /// the address falls inside a render window.
    pub fn write(&mut self, address: u32, value: u8, time: EmuTime) {
        log::trace!("VRAM write {value:02X} -> {address:#07X} at {} ticks", time.master_ticks());
        self.commit(address, value);
    }

    fn commit(&mut self, address: u32, value: u8) {
        debug_assert!((address as usize) < self.data.len(), "VRAM address {address:#07X} not pre-masked");
        self.mark_dirty(address);
        self.data[address as usize] = value;
    }

    /// Planar address remap used by the two highest-capacity bitmap modes (Graphic 6/7):
    /// even logical bytes live in the lower half of VRAM, odd bytes in the upper half.
    #[must_use]
    pub const fn planar(address: u32) -> u32 {
        ((address & 1) << 16) | (address >> 1)
    }

    #[must_use]
    pub fn dirty(&self) -> &DirtyTracker {
        &self.dirty
    }

    pub fn dirty_mut(&mut self) -> &mut DirtyTracker {
        &mut self.dirty
    }

    fn mark_dirty(&mut self, address: u32) {
        if self.dirty.tracking == DirtyTracking::FullRedraw {
            return;
        }

        let name = self.windows[WindowId::NameTable.index()];
        if name.is_inside(address) {
            self.dirty.mark_name((address - name.start) as usize);
        }
        let pattern = self.windows[WindowId::PatternTable.index()];
        if pattern.is_inside(address) {
            self.dirty.mark_pattern(((address - pattern.start) / 8) as usize);
        }
        let colour = self.windows[WindowId::ColorTable.index()];
        if colour.is_inside(address) {
            self.dirty.mark_colour(((address - colour.start) / 8) as usize);
        }
    }
}
