//! MSX VDP (video display processor) core: TMS9918A/TMS9929A, V9938, and V9958.
//!
//! Models the register/state machine, VRAM with windowed synchronized access, the per-line
//! sprite checker (sprite modes 1 and 2), per-mode pixel converters, and the incremental
//! scanline renderer. The VDP command engine and the platform display surface are external
//! collaborators reached through the [`vram::CommandEngine`] and [`renderer::RasterBackend`]
//! traits.

pub mod emutime;
pub mod render;
pub mod renderer;
pub mod sprites;
pub mod vdp;
pub mod vram;

pub use emutime::{EmuTime, MAIN_FREQUENCY, VDP_TICK_SCALE};
pub use renderer::{FrameBufferBackend, PixelFormat, PixelRenderer, RasterBackend, RenderCtx};
pub use sprites::{SpriteChecker, SpriteMode, SpritePattern};
pub use vdp::{DisplayMode, Vdp, VdpVersion};
pub use vram::{CommandEngine, NullCommandEngine, VdpVram, VramSize, Window, WindowId};

use thiserror::Error;

/// Fatal configuration errors, reported at construction time only (per-tick operation is
/// total and never fails).
#[derive(Debug, Error)]
pub enum VdpConfigError {
    #[error("unknown VDP version: {0}")]
    UnknownVersion(String),
    #[error("unsupported VRAM size: {0} KiB (supported: 16, 64, 128)")]
    UnsupportedVramSize(u32),
    #[error("VDP version {version} does not support {vram_kb} KiB of VRAM")]
    VramSizeMismatch { version: VdpVersion, vram_kb: u32 },
}
