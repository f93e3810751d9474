//! Virtual time: a monotonic tick counter at the master crystal frequency.
//!
//! Every component schedules and compares events in this domain. An `EmuTime` pairs an
//! absolute master-tick count with a per-instance scale (master ticks per step at that
//! component's frequency); ordering and equality look at the absolute count only.

use bincode::{Decode, Encode};
use std::cmp::Ordering;
use std::ops::{Add, AddAssign};

/// Master clock frequency in Hz (24 x the 3.579545 MHz colorburst crystal).
pub const MAIN_FREQUENCY: u64 = 24 * 3_579_545;

/// Master ticks per VDP pixel-clock tick (21,477,270 Hz).
pub const VDP_TICK_SCALE: u32 = 4;

#[derive(Debug, Clone, Copy, Default, Encode, Decode)]
pub struct EmuTime {
    ticks: u64,
    scale: u32,
}

impl EmuTime {
    #[must_use]
    pub const fn zero(scale: u32) -> Self {
        Self { ticks: 0, scale }
    }

    /// Time `steps` scaled ticks after the epoch.
    #[must_use]
    pub const fn at(steps: u64, scale: u32) -> Self {
        Self { ticks: steps * scale as u64, scale }
    }

    #[must_use]
    pub const fn master_ticks(self) -> u64 {
        self.ticks
    }

    #[must_use]
    pub const fn scale(self) -> u32 {
        self.scale
    }

    /// The same instant viewed at a different scale.
    #[must_use]
    pub const fn with_scale(self, scale: u32) -> Self {
        Self { ticks: self.ticks, scale }
    }

    /// Elapsed ticks from `self` to `other` at `self`'s scale.
    ///
    /// # Panics
    ///
    /// Panics if `other` precedes `self` or if `self` has no scale set.
    #[must_use]
    pub fn ticks_till(self, other: EmuTime) -> u64 {
        assert!(other.ticks >= self.ticks, "ticks_till into the past");
        assert!(self.scale != 0, "ticks_till on an unscaled time");
        (other.ticks - self.ticks) / u64::from(self.scale)
    }

    /// Advance by one scaled tick.
    pub fn advance(&mut self) {
        *self += 1;
    }
}

impl PartialEq for EmuTime {
    fn eq(&self, other: &Self) -> bool {
        self.ticks == other.ticks
    }
}

impl Eq for EmuTime {}

impl PartialOrd for EmuTime {
    fn partial_cmp(&self, other: &Self) -> Option<Ordering> {
        Some(self.cmp(other))
    }
}

impl Ord for EmuTime {
    fn cmp(&self, other: &Self) -> Ordering {
        self.ticks.cmp(&other.ticks)
    }
}

impl Add<u64> for EmuTime {
    type Output = Self;

    fn add(self, steps: u64) -> Self {
        assert!(self.scale != 0, "advancing an unscaled time");
        Self { ticks: self.ticks + steps * u64::from(self.scale), scale: self.scale }
    }
}

impl AddAssign<u64> for EmuTime {
    fn add_assign(&mut self, steps: u64) {
        *self = *self + steps;
    }
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn ordering_ignores_scale() {
        let a = EmuTime::at(100, 4);
        let b = EmuTime::at(400, 1);
        assert_eq!(a, b);
        assert!(a < b + 1);
    }

    #[test]
    fn ticks_till_uses_own_scale() {
        let from = EmuTime::at(10, 4);
        let to = EmuTime::at(20, 4);
        assert_eq!(from.ticks_till(to), 10);
        assert_eq!(from.with_scale(2).ticks_till(to), 20);
        assert_eq!(from.ticks_till(from), 0);
    }

    #[test]
    #[should_panic(expected = "into the past")]
    fn ticks_till_backwards_panics() {
        let from = EmuTime::at(20, 4);
        let to = EmuTime::at(10, 4);
        let _ = from.ticks_till(to);
    }

    #[test]
    #[should_panic(expected = "unscaled")]
    fn advance_unscaled_panics() {
        let mut t = EmuTime::zero(0);
        t.advance();
    }

    #[test]
    fn advance_steps_by_scale() {
        let mut t = EmuTime::zero(VDP_TICK_SCALE);
        t += 1368;
        assert_eq!(t.master_ticks(), 1368 * u64::from(VDP_TICK_SCALE));
    }
}
