//! The channel-enable sequencer.
//!
//! A cyclic list of channel masks, advanced on a fixed period. Each pass of
//! the generator loop ANDs the current mask into the global enable mask,
//! which lets the host pattern output across channels without touching
//! `en_mask` itself. With a zero period or zero count the sequencer is inert
//! and masks nothing.

use platform::time::elapsed_us;

use crate::config::MAX_SEQUENCES;

/// Sequencer state.
pub struct Sequencer {
    masks: [u8; MAX_SEQUENCES],
    count: u8,
    index: u8,
    period_us: u32,
    last_advance_us: u32,
}

impl Sequencer {
    /// Inert sequencer.
    #[must_use]
    pub fn new() -> Self {
        Self {
            masks: [0; MAX_SEQUENCES],
            count: 0,
            index: 0,
            period_us: 0,
            last_advance_us: 0,
        }
    }

    /// Advance if due and return the mask to apply this pass.
    pub fn tick(&mut self, now_us: u32) -> u8 {
        if self.period_us > 0
            && self.count > 0
            && elapsed_us(now_us, self.last_advance_us) > self.period_us
        {
            self.last_advance_us = now_us;
            self.index = (self.index + 1) % self.count;
        }
        self.current_mask()
    }

    /// The active mask without advancing. All-ones while inert.
    #[must_use]
    pub fn current_mask(&self) -> u8 {
        if self.period_us == 0 || self.count == 0 {
            return 0xFF;
        }
        let index = self.index.min(self.count - 1);
        self.masks[index as usize]
    }

    /// Write `masks` into the table from slot 0. When `wrap` is set the
    /// wrap count is updated to match.
    pub fn load(&mut self, masks: &[u8], wrap: bool) {
        let n = masks.len().min(MAX_SEQUENCES);
        self.masks[..n].copy_from_slice(&masks[..n]);
        if wrap {
            self.set_count(n as u8);
        }
    }

    /// Number of slots before the index wraps.
    #[must_use]
    pub fn count(&self) -> u8 {
        self.count
    }

    /// Set the wrap count, clamping the index back into range.
    pub fn set_count(&mut self, count: u8) {
        self.count = count;
        if count > 0 && self.index >= count {
            self.index = 0;
        }
    }

    /// Rewind to slot 0.
    pub fn reset_index(&mut self) {
        self.index = 0;
    }

    /// Advance period in microseconds (0 disables).
    #[must_use]
    pub fn period_us(&self) -> u32 {
        self.period_us
    }

    /// Set the advance period in microseconds.
    pub fn set_period_us(&mut self, period_us: u32) {
        self.period_us = period_us;
    }

    /// Borrow the mask table (command-surface readback).
    #[must_use]
    pub fn masks(&self) -> &[u8; MAX_SEQUENCES] {
        &self.masks
    }
}

impl Default for Sequencer {
    fn default() -> Self {
        Self::new()
    }
}
