//! Throughput-adaptive frame skipping.
//!
//! The external real-time collaborator reports a sync factor (wall-clock time consumed per
//! emulated time produced) once per frame; automatic mode raises the skip count when the
//! recent average shows the emulation falling behind and lowers it again when a long
//! stretch runs comfortably ahead.

use bincode::{Decode, Encode};
use msx_config::{FrameSkipMode, MAX_FRAME_SKIP};

const HISTORY_LEN: usize = 100;
const SHORT_WINDOW: usize = 10;

/// Short-window average above this raises the skip count.
const RAISE_THRESHOLD: f64 = 1.10;
/// Full-window average below this lowers it.
const LOWER_THRESHOLD: f64 = 0.90;

const RAISE_COOLDOWN: u16 = 100;
const LOWER_COOLDOWN: u16 = 10;

#[derive(Debug, Clone, Encode, Decode)]
pub struct FrameSkipper {
    mode: FrameSkipMode,
    frame_skip: u8,
    /// Countdown to the next presented frame; presents when it reaches 0.
    cur_frame_skip: i16,
    history: [f64; HISTORY_LEN],
    history_pos: usize,
    history_len: usize,
    cooldown: u16,
}

impl FrameSkipper {
    #[must_use]
    pub fn new(mode: FrameSkipMode, frame_skip: u8) -> Self {
        Self {
            mode,
            frame_skip: frame_skip.min(MAX_FRAME_SKIP),
            cur_frame_skip: 0,
            history: [1.0; HISTORY_LEN],
            history_pos: 0,
            history_len: 0,
            cooldown: 0,
        }
    }

    #[must_use]
    pub fn frame_skip(&self) -> u8 {
        self.frame_skip
    }

    /// Advance the per-frame countdown; returns whether this frame should be presented.
    pub fn frame_start(&mut self) -> bool {
        self.cur_frame_skip -= 1;
        if self.cur_frame_skip < 0 {
            self.cur_frame_skip = i16::from(self.frame_skip);
        }
        self.cur_frame_skip == 0
    }

    /// Feed one sync-factor sample and, in automatic mode, adjust the skip count.
    pub fn record_sync_factor(&mut self, factor: f64) {
        self.history[self.history_pos] = factor;
        self.history_pos = (self.history_pos + 1) % HISTORY_LEN;
        self.history_len = (self.history_len + 1).min(HISTORY_LEN);

        if self.mode != FrameSkipMode::Auto {
            return;
        }
        if self.cooldown > 0 {
            self.cooldown -= 1;
            return;
        }

        if self.history_len >= SHORT_WINDOW && self.average(SHORT_WINDOW) > RAISE_THRESHOLD {
            if self.frame_skip < MAX_FRAME_SKIP {
                self.frame_skip += 1;
                log::debug!("frame skip raised to {}", self.frame_skip);
            }
            self.cooldown = RAISE_COOLDOWN;
        } else if self.history_len == HISTORY_LEN
            && self.frame_skip > 0
            && self.average(HISTORY_LEN) < LOWER_THRESHOLD
        {
            self.frame_skip -= 1;
            log::debug!("frame skip lowered to {}", self.frame_skip);
            self.cooldown = LOWER_COOLDOWN;
        }
    }

    /// Average over the `window` most recent samples.
    fn average(&self, window: usize) -> f64 {
        let mut sum = 0.0;
        for i in 0..window {
            let pos = (self.history_pos + HISTORY_LEN - 1 - i) % HISTORY_LEN;
            sum += self.history[pos];
        }
        sum / window as f64
    }
}
