//! The output scheduler.
//!
//! Owns the four channel records, the per-channel pulse queues, and the DAC
//! power-command queue. The control core fills the queues; the realtime core
//! drains them into the pulse emitter and the DAC. Also home to the one-shot
//! self-test calibration and the scram path.

use heapless::spsc::Queue;
use thiserror_no_std::Error;

use platform::emitter::{pack_pulse, EmitterError, FIFO_DEPTH, PW_MAX};
use platform::i2c::I2cPort;
use platform::mcp4728;
use platform::time::{elapsed_us, reached};
use platform::{Board, PulseEmitter};

use crate::channel::{Channel, ChannelStatus};
use crate::config::{
    CAL_SWEEP_END, CAL_SWEEP_START, CAL_SWEEP_STEP, CHANNEL_COUNT, CH_CAL_OFFSET,
    CH_CAL_THRESHOLD_OK, CH_CAL_THRESHOLD_OVER, DAC_WRITE_INTERVAL_US, POWER_SPAN_CODES,
    PULSE_STALE_US, RAIL_IDLE_TIMEOUT_US, SENSE_VOLTS_PER_CODE,
};
use crate::state::{Shared, ERR_CAL, ERR_HW_DAC, ERR_HW_OUTPUT};

/// Queue slots per channel (heapless SPSC holds N-1).
const PULSE_QUEUE_SLOTS: usize = 16;
/// Power command queue slots.
const POWER_QUEUE_SLOTS: usize = 16;

/// A scheduled bipolar pulse.
#[derive(Debug, Clone, Copy)]
pub struct Pulse {
    /// Absolute emission deadline.
    pub abs_time_us: u32,
    /// Positive half-width in microseconds.
    pub pos_us: u16,
    /// Negative half-width in microseconds.
    pub neg_us: u16,
}

/// A queued DAC power level.
#[derive(Debug, Clone, Copy)]
pub struct PowerCmd {
    /// Target channel.
    pub channel: u8,
    /// Requested level, `0.0..=1.0` of the channel's range.
    pub power: f32,
}

/// Fatal bring-up failures. The caller scrams and halts on these.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum InitError {
    /// The emitter's pulse program could not be loaded.
    #[error("pulse program load failed: {0}")]
    Emitter(EmitterError),
    /// The DAC did not acknowledge its address.
    #[error("no response from DAC")]
    DacUnreachable,
}

/// Scheduler state.
pub struct Output {
    channels: [Channel; CHANNEL_COUNT],
    pulse_queues: [Queue<Pulse, PULSE_QUEUE_SLOTS>; CHANNEL_COUNT],
    power_queue: Queue<PowerCmd, POWER_QUEUE_SLOTS>,
    drv_enabled: bool,
    scrammed: bool,
    /// Last time a pulse actually reached the emitter (or the rail came up).
    last_traffic_us: u32,
    last_dac_write_us: [u32; CHANNEL_COUNT],
}

impl Output {
    /// Scheduler at power-up: channels uncalibrated, rail down, queues empty.
    #[must_use]
    pub fn new() -> Self {
        Self {
            channels: core::array::from_fn(|ch| Channel::new(ch as u8)),
            pulse_queues: core::array::from_fn(|_| Queue::new()),
            power_queue: Queue::new(),
            drv_enabled: false,
            scrammed: false,
            last_traffic_us: 0,
            last_dac_write_us: [0; CHANNEL_COUNT],
        }
    }

    /// Borrow a channel record.
    #[must_use]
    pub fn channel(&self, ch: usize) -> &Channel {
        &self.channels[ch]
    }

    /// Mutably borrow a channel record (control core only).
    pub fn channel_mut(&mut self, ch: usize) -> &mut Channel {
        &mut self.channels[ch]
    }

    /// True once [`scram`](Self::scram) has run.
    #[must_use]
    pub fn scrammed(&self) -> bool {
        self.scrammed
    }

    /// True while the drive rail is up.
    #[must_use]
    pub fn drive_enabled(&self) -> bool {
        self.drv_enabled
    }

    /// Bring up the output stage: emitter program, DAC probe, board
    /// presence, then calibration.
    ///
    /// # Errors
    ///
    /// Fatal hardware absences ([`InitError`]); the scheduler has already
    /// scrammed when one is returned. A missing output board is *not*
    /// fatal — it scrams, raises `ERR_HW_OUTPUT`, and returns `Ok` so the
    /// control loop can keep serving the host.
    pub fn init<B: Board>(&mut self, board: &mut B, shared: &Shared) -> Result<(), InitError> {
        log::debug!("init output...");

        self.drv_enabled = false;
        board.set_drive_enable(false);

        if let Err(e) = board.emitter().load() {
            self.scram(board, shared);
            return Err(InitError::Emitter(e));
        }

        // The DAC is soldered to the main board; silence here is a hardware
        // defect, not a recoverable condition.
        if !board.dac_port().probe(mcp4728::MCP4728_I2C_ADDR) {
            self.scram(board, shared);
            return Err(InitError::DacUnreachable);
        }

        if self.board_missing(board) {
            log::error!("output board not installed, disabling all channels");
            shared.raise_error(ERR_HW_OUTPUT);
            self.scram(board, shared);
            return Ok(());
        }

        self.calibrate(board, shared);
        Ok(())
    }

    /// Queue a pulse for `ch`. Returns `false` when the queue was full or
    /// the channel index is out of range; the pulse is dropped either way.
    pub fn queue_pulse(&mut self, ch: usize, pos_us: u16, neg_us: u16, abs_time_us: u32) -> bool {
        let Some(queue) = self.pulse_queues.get_mut(ch) else {
            return false;
        };
        let pulse = Pulse {
            abs_time_us,
            pos_us,
            neg_us,
        };
        if queue.enqueue(pulse).is_err() {
            log::warn!("pulse queue full: ch={ch}");
            return false;
        }
        true
    }

    /// Queue a power level for `ch`. Returns `false` on overflow.
    pub fn queue_power(&mut self, ch: usize, power: f32) -> bool {
        if ch >= CHANNEL_COUNT {
            return false;
        }
        let cmd = PowerCmd {
            channel: ch as u8,
            power,
        };
        if self.power_queue.enqueue(cmd).is_err() {
            log::warn!("power queue full: ch={ch}");
            return false;
        }
        true
    }

    /// Drain due pulses into the emitter. Runs on the realtime core.
    pub fn process_pulses<B: Board>(&mut self, board: &mut B, shared: &Shared) {
        let now = board.now_us();

        for ch in 0..CHANNEL_COUNT {
            for _ in 0..FIFO_DEPTH {
                let due = match self.pulse_queues[ch].peek() {
                    Some(p) => reached(now, p.abs_time_us),
                    None => false,
                };
                if !due {
                    break;
                }
                let Some(pulse) = self.pulse_queues[ch].dequeue() else {
                    break;
                };

                if shared.require_zero() & (1 << ch) != 0 {
                    continue;
                }
                if self.channels[ch].status != ChannelStatus::Ready {
                    continue;
                }
                // A pulse more than a second late is garbage, not backlog.
                if elapsed_us(now, pulse.abs_time_us) > PULSE_STALE_US {
                    continue;
                }

                if !self.drv_enabled && !self.drv_enable(board, true) {
                    continue;
                }

                let word = pack_pulse(pulse.pos_us.min(PW_MAX), pulse.neg_us.min(PW_MAX));
                if board.emitter().try_push(ch, word) {
                    self.last_traffic_us = now;
                } else {
                    log::warn!("emitter fifo full, pulse dropped: ch={ch}");
                }
            }
        }

        if self.drv_enabled && elapsed_us(now, self.last_traffic_us) > RAIL_IDLE_TIMEOUT_US {
            log::info!("no pulse traffic, dropping drive rail");
            self.drv_enable(board, false);
        }
    }

    /// Pop at most one power command and write the DAC. Runs on the
    /// realtime core.
    pub fn process_power<B: Board>(&mut self, board: &mut B, shared: &Shared) {
        // Defer (without consuming) while the bus would block.
        if board.dac_port().write_available() < 5 {
            return;
        }
        let Some(cmd) = self.power_queue.dequeue() else {
            return;
        };
        let ch = cmd.channel as usize;
        let channel = self.channels[ch];
        if channel.status != ChannelStatus::Ready {
            return;
        }

        let now = board.now_us();
        if elapsed_us(now, self.last_dac_write_us[ch])
            < CHANNEL_COUNT as u32 * DAC_WRITE_INTERVAL_US
        {
            // The DAC needs ~110 µs per channel; excess updates are dropped,
            // the generator sends fresh levels continuously anyway.
            return;
        }

        let mut clamped = cmd.power.clamp(0.0, 1.0) * channel.max_power.clamp(0.0, 1.0);
        if shared.require_zero() & (1 << ch) != 0 {
            if channel.max_power <= 0.01 {
                shared.clear_require_zero(1 << ch);
            } else {
                clamped = 0.0;
            }
        }

        let span = libm::roundf(POWER_SPAN_CODES * clamped) as i32;
        let dac_value = i32::from(channel.cal_value) + CH_CAL_OFFSET - span;
        if dac_value < 0 || dac_value > i32::from(mcp4728::MCP4728_MAX_VALUE) {
            log::warn!("invalid power calculated: ch={ch} dac={dac_value}");
            return;
        }

        self.last_dac_write_us[ch] = now;
        let _ = self.write_dac(board, shared, ch, dac_value as u16);
    }

    /// Irreversible safety stop: rail down for good, every channel faulted,
    /// gates parked, DAC forced to zero output on a best-effort basis.
    pub fn scram<B: Board>(&mut self, board: &mut B, shared: &Shared) {
        self.scrammed = true;
        self.drv_enabled = false;
        board.set_drive_enable(false);

        for ch in 0..CHANNEL_COUNT {
            self.channels[ch].status = ChannelStatus::Fault;
            board.emitter().park(ch);
        }

        for ch in 0..CHANNEL_COUNT {
            if self
                .write_dac(board, shared, ch, mcp4728::MCP4728_MAX_VALUE)
                .is_err()
            {
                break;
            }
        }
    }

    /// Probe for the output board. Only valid while the rail is down; with
    /// the rail up the line is actively driven and reads as present.
    pub fn board_missing<B: Board>(&self, board: &mut B) -> bool {
        if self.drv_enabled {
            false
        } else {
            board.probe_drive_sense()
        }
    }

    /// Switch the drive rail. Enabling is refused after a scram or when no
    /// channel is ready to use it.
    pub fn drv_enable<B: Board>(&mut self, board: &mut B, enabled: bool) -> bool {
        if enabled {
            if self.scrammed {
                return false;
            }
            if !self
                .channels
                .iter()
                .any(|c| c.status == ChannelStatus::Ready)
            {
                return false;
            }
            if !self.drv_enabled {
                log::info!("enabling drive rail");
                self.last_traffic_us = board.now_us();
            }
        } else if self.drv_enabled {
            log::info!("disabling drive rail");
        }

        self.drv_enabled = enabled;
        board.set_drive_enable(enabled);
        true
    }

    /// Trimmed-mean sense reading in volts: 10 samples, drop the two highest
    /// and two lowest, average the rest.
    pub fn read_sense_voltage<B: Board>(&self, board: &mut B) -> f32 {
        const SAMPLES: usize = 10;
        const TRIM: usize = 2;

        let mut readings = [0u16; SAMPLES];
        for r in &mut readings {
            *r = board.sense_sample();
        }
        readings.sort_unstable();

        let total: u32 = readings[TRIM..SAMPLES - TRIM]
            .iter()
            .map(|&v| u32::from(v))
            .sum();
        let counts = total / (SAMPLES - 2 * TRIM) as u32;
        counts as f32 * SENSE_VOLTS_PER_CODE
    }

    fn write_dac<B: Board>(
        &self,
        board: &mut B,
        shared: &Shared,
        ch: usize,
        value: u16,
    ) -> Result<(), platform::I2cError> {
        let cmd = mcp4728::build_write_cmd(
            self.channels[ch].dac_channel,
            value,
            mcp4728::Vref::Vdd,
            mcp4728::Gain::One,
            mcp4728::PowerDown::Normal,
            true,
        );
        board
            .dac_port()
            .write(mcp4728::MCP4728_I2C_ADDR, &cmd)
            .map_err(|e| {
                log::error!("DAC write failed: ch={ch} {e}");
                shared.raise_error(ERR_HW_DAC);
                e
            })
    }

    /// Per-channel self-test calibration.
    ///
    /// With the rail forced on, each uncalibrated channel sweeps its DAC
    /// downward from a known-quiet code while pulsing one FET leg at a time,
    /// watching the sense input for the first sign of conduction. The code
    /// where conduction first clears the OK threshold becomes `cal_value`;
    /// overshooting the OVER threshold (or exhausting the sweep, or any bus
    /// failure) faults the channel. Channels fault individually; the rest of
    /// the board keeps running.
    pub fn calibrate<B: Board>(&mut self, board: &mut B, shared: &Shared) {
        log::info!("starting channel self-test calibration...");

        // Rail on directly: drv_enable() refuses while nothing is READY yet.
        board.set_drive_enable(true);
        board.delay_ms(100);

        let mut all_ok = true;
        for ch in 0..CHANNEL_COUNT {
            if self.channels[ch].status != ChannelStatus::Invalid {
                continue;
            }

            let voltage = self.read_sense_voltage(board);
            if voltage > CH_CAL_THRESHOLD_OK {
                // Conduction before we drove anything: prior fault upstream.
                log::error!("precalibration overvoltage: ch={ch}");
                self.channels[ch].status = ChannelStatus::Fault;
                all_ok = false;
                continue;
            }

            let mut gate_flip = false;
            let mut dac_value = CAL_SWEEP_START;
            while dac_value > CAL_SWEEP_END {
                if self.write_dac(board, shared, ch, dac_value).is_err() {
                    break;
                }
                board.delay_us(100);

                // One leg at a time, alternating, to keep DC off the
                // transformer.
                board.emitter().set_gates(ch, gate_flip, !gate_flip);
                board.delay_us(50);
                let voltage = self.read_sense_voltage(board);
                board.emitter().set_gates(ch, false, false);

                if voltage > CH_CAL_THRESHOLD_OVER {
                    log::error!("calibration overvoltage: ch={ch} dac={dac_value}");
                    break;
                }
                if voltage > CH_CAL_THRESHOLD_OK {
                    log::debug!("calibration ok: ch={ch} dac={dac_value}");
                    self.channels[ch].cal_value = dac_value;
                    self.channels[ch].status = ChannelStatus::Ready;
                    break;
                }

                board.delay_ms(5);
                gate_flip = !gate_flip;
                dac_value -= CAL_SWEEP_STEP;
            }

            let _ = self.write_dac(board, shared, ch, mcp4728::MCP4728_MAX_VALUE);

            if self.channels[ch].status == ChannelStatus::Ready {
                // Gate pins hand over to the state machine from here on.
                board.emitter().attach(ch);
            } else {
                self.channels[ch].status = ChannelStatus::Fault;
                all_ok = false;
                log::error!("calibration failed: ch={ch}");
            }
        }

        board.set_drive_enable(false);

        if all_ok {
            log::info!("calibration successful");
        } else {
            shared.raise_error(ERR_CAL);
            log::error!("calibration failed for one or more channels");
        }
    }
}

impl Default for Output {
    fn default() -> Self {
        Self::new()
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn queue_pulse_rejects_bad_channel_and_overflow() {
        let mut out = Output::new();
        assert!(!out.queue_pulse(CHANNEL_COUNT, 100, 100, 0));

        for i in 0..PULSE_QUEUE_SLOTS - 1 {
            assert!(out.queue_pulse(0, 100, 100, i as u32));
        }
        assert!(!out.queue_pulse(0, 100, 100, 999), "drop on full");
    }

    #[test]
    fn queue_power_rejects_bad_channel_and_overflow() {
        let mut out = Output::new();
        assert!(!out.queue_power(CHANNEL_COUNT, 0.5));

        for _ in 0..POWER_QUEUE_SLOTS - 1 {
            assert!(out.queue_power(1, 0.5));
        }
        assert!(!out.queue_power(1, 0.5));
    }

    #[test]
    fn channels_start_invalid_with_open_ceiling() {
        let out = Output::new();
        for ch in 0..CHANNEL_COUNT {
            assert_eq!(out.channel(ch).status, ChannelStatus::Invalid);
            assert_eq!(out.channel(ch).dac_channel, ch as u8);
            assert!((out.channel(ch).max_power - 1.0).abs() < f32::EPSILON);
        }
        assert!(!out.drive_enabled());
        assert!(!out.scrammed());
    }
}
