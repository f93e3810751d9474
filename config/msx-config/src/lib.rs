//! Configuration types for the VDP video core.
//!
//! These are plain data passed into constructors; the core holds no global settings state.

use bincode::{Decode, Encode};
use std::fmt::{Display, Formatter};

/// Upper bound for manual frame skip; a value of N presents 1 out of every N+1 frames.
pub const MAX_FRAME_SKIP: u8 = 100;

/// Granularity at which the pixel renderer subdivides a frame.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum RenderAccuracy {
    /// Render up to the exact VDP tick within the current line.
    #[default]
    Pixel,
    /// Render whole lines only; mid-line state changes take effect a line late.
    Line,
    /// Render nothing until the end of the frame.
    Screen,
}

impl Display for RenderAccuracy {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Pixel => write!(f, "Pixel"),
            Self::Line => write!(f, "Line"),
            Self::Screen => write!(f, "Screen"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum FrameSkipMode {
    /// Adjust frame skip automatically from the measured emulation speed.
    #[default]
    Auto,
    /// Use the configured `frame_skip` value unchanged.
    Manual,
}

impl Display for FrameSkipMode {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Auto => write!(f, "Auto"),
            Self::Manual => write!(f, "Manual"),
        }
    }
}

/// Strategy for deciding how much of a frame must be recomputed.
///
/// `FullRedraw` is the always-correct default; `Incremental` is an optimization that must
/// produce pixel-identical output.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum DirtyTracking {
    #[default]
    FullRedraw,
    Incremental,
}

impl Display for DirtyTracking {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::FullRedraw => write!(f, "FullRedraw"),
            Self::Incremental => write!(f, "Incremental"),
        }
    }
}

/// Timing model forwarded to the external command engine.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
#[cfg_attr(feature = "clap", derive(clap::ValueEnum))]
pub enum CmdTiming {
    /// Commands take as long as they do on real hardware.
    #[default]
    Accurate,
    /// Commands complete immediately; breaks software that races the engine.
    Instant,
}

impl Display for CmdTiming {
    fn fmt(&self, f: &mut Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::Accurate => write!(f, "Accurate"),
            Self::Instant => write!(f, "Instant"),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct RendererConfig {
    pub accuracy: RenderAccuracy,
    pub deinterlace: bool,
    /// Horizontal blur percentage, 0-100.
    pub horizontal_blur: u8,
    /// Scanline darkening alpha, 0-255.
    pub scanline_alpha: u8,
    pub frame_skip_mode: FrameSkipMode,
    /// Manual frame skip value; clamped to `[0, MAX_FRAME_SKIP]`.
    pub frame_skip: u8,
    pub dirty_tracking: DirtyTracking,
}

impl RendererConfig {
    #[must_use]
    pub fn clamped(mut self) -> Self {
        self.frame_skip = self.frame_skip.min(MAX_FRAME_SKIP);
        self.horizontal_blur = self.horizontal_blur.min(100);
        self
    }
}

impl Default for RendererConfig {
    fn default() -> Self {
        Self {
            accuracy: RenderAccuracy::default(),
            deinterlace: true,
            horizontal_blur: 50,
            scanline_alpha: 20,
            frame_skip_mode: FrameSkipMode::default(),
            frame_skip: 0,
            dirty_tracking: DirtyTracking::default(),
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Encode, Decode)]
#[cfg_attr(feature = "serde", derive(serde::Serialize, serde::Deserialize))]
pub struct VdpConfig {
    /// Enforce the 4 (sprite mode 1) / 8 (sprite mode 2) visible sprites per line limit.
    ///
    /// The 5th/9th sprite status bit is reported either way; this only controls whether the
    /// extra sprites are drawn.
    pub limit_sprites: bool,
    pub cmd_timing: CmdTiming,
}

impl Default for VdpConfig {
    fn default() -> Self {
        Self { limit_sprites: true, cmd_timing: CmdTiming::default() }
    }
}
