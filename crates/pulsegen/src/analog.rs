//! Analog capture consumption and the input gain frontend.
//!
//! The DMA IRQ only flags buffers ready; this module deinterleaves the
//! round-robin stripes into channel-private windows on demand and computes
//! their statistics once per fresh buffer. The gain frontend owns the digital
//! potentiometer (input gains + mic preamp) and the mic plug-in-power line.

use platform::capture::{
    CaptureSource, ADC_SAMPLED_CHANNELS, ADC_SAMPLE_COUNT, ADC_ZERO_POINT, READY_INDEX_BIT,
};
use platform::i2c::I2cPort;
use platform::mcp443x;
use platform::Board;

use crate::channel::AnalogChannel;
use crate::state::{Shared, ERR_HW_POT};

/// Statistics computed over one capture window at deinterleave time.
#[derive(Debug, Clone, Copy, Default)]
pub struct WindowStats {
    /// Lowest raw sample.
    pub min: u16,
    /// Highest raw sample.
    pub max: u16,
    /// Samples above the zero point.
    pub above: u16,
    /// Samples at or below the zero point.
    pub below: u16,
    /// Peak deviation from the zero point, normalized to `0.0..=1.0`.
    pub amplitude: f32,
}

/// One channel's view of the latest capture.
pub struct Window<'a> {
    /// Deinterleaved 12-bit samples.
    pub samples: &'a [u16; ADC_SAMPLE_COUNT],
    /// Timestamp of the capture's completion.
    pub capture_end_us: u32,
    /// Cached statistics (stale for the sense channel, which skips them).
    pub stats: WindowStats,
    /// True when this fetch consumed a fresh buffer.
    pub fresh: bool,
}

fn compute_stats(samples: &[u16; ADC_SAMPLE_COUNT]) -> WindowStats {
    let mut stats = WindowStats {
        min: u16::MAX,
        max: 0,
        above: 0,
        below: 0,
        amplitude: 0.0,
    };
    for &s in samples {
        stats.min = stats.min.min(s);
        stats.max = stats.max.max(s);
        if s > ADC_ZERO_POINT {
            stats.above += 1;
        } else {
            stats.below += 1;
        }
    }

    // The capture period bounds the lowest frequency that fits a full cycle.
    // Using the larger single-sided swing instead of (max - min) keeps partial
    // cycles of lower frequencies measurable.
    let above_max = i32::from(stats.max) - i32::from(ADC_ZERO_POINT);
    let below_min = i32::from(ADC_ZERO_POINT) - i32::from(stats.min);
    let level = above_max.max(below_min).max(0);
    stats.amplitude = level as f32 / f32::from(ADC_ZERO_POINT);
    stats
}

/// Channel-private windows and their cached stats.
pub struct AnalogCapture {
    buffers: [[u16; ADC_SAMPLE_COUNT]; ADC_SAMPLED_CHANNELS],
    stats: [WindowStats; ADC_SAMPLED_CHANNELS],
    end_time_us: u32,
}

impl AnalogCapture {
    /// Empty consumer state.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffers: [[0; ADC_SAMPLE_COUNT]; ADC_SAMPLED_CHANNELS],
            stats: [WindowStats::default(); ADC_SAMPLED_CHANNELS],
            end_time_us: 0,
        }
    }

    /// Fetch `channel`'s view of the latest capture, deinterleaving and
    /// recomputing stats only when the DMA has produced a fresh buffer since
    /// the last fetch of this channel.
    ///
    /// `update_stats` is forced off for the sense channel; its consumers only
    /// want raw samples.
    pub fn fetch<'a, C: CaptureSource>(
        &'a mut self,
        source: &mut C,
        channel: AnalogChannel,
        update_stats: bool,
    ) -> Option<Window<'a>> {
        let offset = channel.stripe_offset()?;
        let index = channel as usize - 1;
        let channel_bit = 1u8 << (channel as u8);
        let update_stats = update_stats && channel != AnalogChannel::Sense;

        // Local copy first; the IRQ may republish while we work.
        let ready = source.ready_flags();
        let fresh = ready & channel_bit != 0;
        if fresh {
            let src = source.raw_buffer((ready & READY_INDEX_BIT) as usize);
            for (i, slot) in self.buffers[index].iter_mut().enumerate() {
                *slot = src[i * ADC_SAMPLED_CHANNELS + offset] & 0x0FFF;
            }
            self.end_time_us = source.done_time_us();
            source.clear_ready(channel_bit);
            if update_stats {
                self.stats[index] = compute_stats(&self.buffers[index]);
            }
        }

        Some(Window {
            samples: &self.buffers[index],
            capture_end_us: self.end_time_us,
            stats: self.stats[index],
            fresh,
        })
    }
}

impl Default for AnalogCapture {
    fn default() -> Self {
        Self::new()
    }
}

/// Digipot wiper per analog input. The preamp sits on the fourth wiper.
fn gain_wiper(channel: AnalogChannel) -> Option<usize> {
    match channel {
        AnalogChannel::Right => Some(0),
        AnalogChannel::Left => Some(1),
        AnalogChannel::Mic => Some(2),
        _ => None,
    }
}

const PREAMP_WIPER: usize = 3;

/// The analog input gain stage.
pub struct Frontend {
    pot_available: bool,
    mic_power: bool,
    preamp_gain: u8,
    gains: [u8; mcp443x::MCP443X_WIPERS],
}

impl Frontend {
    /// Frontend with everything at zero gain and mic power off.
    #[must_use]
    pub fn new() -> Self {
        Self {
            pot_available: false,
            mic_power: false,
            preamp_gain: 0,
            gains: [0; mcp443x::MCP443X_WIPERS],
        }
    }

    /// Probe the pot and zero every wiper. A missing pot is not fatal: the
    /// error bit is raised and later gain writes become no-ops.
    pub fn init<B: Board>(&mut self, board: &mut B, shared: &Shared) {
        board.set_mic_power(false);
        self.mic_power = false;

        self.pot_available = board.pot_port().probe(mcp443x::MCP443X_I2C_ADDR);
        if !self.pot_available {
            log::error!(
                "no response from pot @ {:#04x}",
                mcp443x::MCP443X_I2C_ADDR
            );
            shared.raise_error(ERR_HW_POT);
            return;
        }
        for wiper in 0..mcp443x::MCP443X_WIPERS {
            self.write_pot(board, shared, wiper, 0);
        }
    }

    fn write_pot<B: Board>(&mut self, board: &mut B, shared: &Shared, wiper: usize, value: u8) {
        if !self.pot_available {
            return;
        }
        let Some(cmd) = mcp443x::build_write_cmd(wiper, value) else {
            return;
        };
        if let Err(e) = board.pot_port().write(mcp443x::MCP443X_I2C_ADDR, &cmd) {
            log::error!("pot write failed: wiper={wiper} {e}");
            shared.raise_error(ERR_HW_POT);
        }
    }

    /// Set the microphone preamp gain.
    pub fn set_preamp_gain<B: Board>(&mut self, board: &mut B, shared: &Shared, value: u8) {
        self.preamp_gain = value;
        self.write_pot(board, shared, PREAMP_WIPER, value);
    }

    /// Current preamp gain.
    #[must_use]
    pub fn preamp_gain(&self) -> u8 {
        self.preamp_gain
    }

    /// Set the input gain for one analog channel. Channels without a wiper
    /// (sense, none) are ignored.
    pub fn set_gain<B: Board>(
        &mut self,
        board: &mut B,
        shared: &Shared,
        channel: AnalogChannel,
        value: u8,
    ) {
        let Some(wiper) = gain_wiper(channel) else {
            return;
        };
        self.gains[wiper] = value;
        self.write_pot(board, shared, wiper, value);
    }

    /// Current input gain for one analog channel.
    #[must_use]
    pub fn gain(&self, channel: AnalogChannel) -> u8 {
        gain_wiper(channel).map_or(0, |w| self.gains[w])
    }

    /// Switch mic plug-in power.
    pub fn set_mic_power<B: Board>(&mut self, board: &mut B, enabled: bool) {
        self.mic_power = enabled;
        board.set_mic_power(enabled);
    }

    /// Current mic plug-in-power state.
    #[must_use]
    pub fn mic_power(&self) -> bool {
        self.mic_power
    }
}

impl Default for Frontend {
    fn default() -> Self {
        Self::new()
    }
}
