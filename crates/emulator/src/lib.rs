//! Desktop emulation of the output-stage hardware.
//!
//! [`SimBoard`] implements the `platform::Board` seam with a manually
//! advanced virtual clock, scripted I²C ports, a gate-trace pulse emitter,
//! and synthetic analog capture injection. Engine tests drive the machine
//! against it deterministically: advance the clock, tick the loops, inspect
//! what the "hardware" saw.
//!
//! Nothing here ships to the device; this crate is a dev-dependency of the
//! engine only.

#![warn(missing_docs)]

use std::collections::VecDeque;

use platform::capture::{
    CaptureSource, ADC_CAPTURE_COUNT, ADC_SAMPLED_CHANNELS, ADC_SAMPLE_COUNT,
    ADC_SINGLE_SAMPLE_US, ADC_ZERO_POINT,
};
use platform::emitter::{unpack_pulse, EmitterError, DEADTIME_US, FIFO_DEPTH};
use platform::i2c::{I2cError, I2cPort};
use platform::mcp4728;
use platform::Board;

/// Output channels, mirroring the engine's board.
pub const SIM_CHANNELS: usize = 4;

// ---------------------------------------------------------------------------
// I²C port

/// A scripted I²C port: logs writes, decodes DAC commands, injects failures.
pub struct SimPort {
    /// Device acknowledges probes and reads.
    pub present: bool,
    /// Force every write to fail with a timeout.
    pub fail_writes: bool,
    /// Reported write capacity (the scheduler defers below 5).
    pub capacity: usize,
    /// Raw write log as `(address, bytes)`.
    pub writes: Vec<(u8, Vec<u8>)>,
    /// Decoded MCP4728 input-register codes per sub-channel.
    pub dac_codes: [u16; SIM_CHANNELS],
    /// Most recent decoded DAC write `(sub_channel, code)`.
    pub last_dac_write: Option<(u8, u16)>,
}

impl SimPort {
    /// A present, reliable port.
    #[must_use]
    pub fn new() -> Self {
        Self {
            present: true,
            fail_writes: false,
            capacity: 16,
            writes: Vec::new(),
            dac_codes: [0; SIM_CHANNELS],
            last_dac_write: None,
        }
    }

    /// Decoded DAC writes in order, filtered to one sub-channel.
    #[must_use]
    pub fn dac_history(&self, sub_channel: u8) -> Vec<u16> {
        self.writes
            .iter()
            .filter_map(|(addr, bytes)| decode_dac_write(*addr, bytes))
            .filter(|(ch, _)| *ch == sub_channel)
            .map(|(_, code)| code)
            .collect()
    }
}

impl Default for SimPort {
    fn default() -> Self {
        Self::new()
    }
}

fn decode_dac_write(addr: u8, bytes: &[u8]) -> Option<(u8, u16)> {
    if addr != mcp4728::MCP4728_I2C_ADDR || bytes.len() != 3 {
        return None;
    }
    if bytes[0] & 0xE0 != mcp4728::CMD_WRITE_MULTI_IR {
        return None;
    }
    let ch = (bytes[0] >> 1) & 0b11;
    let code = (u16::from(bytes[1] & 0x0F) << 8) | u16::from(bytes[2]);
    Some((ch, code))
}

impl I2cPort for SimPort {
    fn write(&mut self, addr: u8, bytes: &[u8]) -> Result<(), I2cError> {
        if self.fail_writes {
            return Err(I2cError::Timeout);
        }
        if !self.present {
            return Err(I2cError::Nack);
        }
        if let Some((ch, code)) = decode_dac_write(addr, bytes) {
            self.dac_codes[ch as usize] = code;
            self.last_dac_write = Some((ch, code));
        }
        self.writes.push((addr, bytes.to_vec()));
        Ok(())
    }

    fn read(&mut self, _addr: u8, buf: &mut [u8]) -> Result<(), I2cError> {
        if !self.present {
            return Err(I2cError::Nack);
        }
        buf.fill(0);
        Ok(())
    }

    fn write_available(&self) -> usize {
        self.capacity
    }
}

// ---------------------------------------------------------------------------
// Pulse emitter

/// A pulse handed to one channel's state machine.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct EmittedPulse {
    /// Channel index.
    pub channel: usize,
    /// Positive half-width, microseconds.
    pub pos_us: u16,
    /// Negative half-width, microseconds.
    pub neg_us: u16,
    /// Virtual time at which the scheduler pushed the word.
    pub pushed_at_us: u32,
}

/// One constant-level span of the two gate lines.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct GateSegment {
    /// Gate A (positive half) level.
    pub gate_a: bool,
    /// Gate B (negative half) level.
    pub gate_b: bool,
    /// Span length in microseconds.
    pub duration_us: u32,
}

/// Replay one pulse word exactly as the gate state machine executes it:
/// gate A high for the positive half, both low for the deadtime, gate B high
/// for the negative half.
#[must_use]
pub fn trace_word(word: u32) -> Vec<GateSegment> {
    let (pos_us, neg_us) = unpack_pulse(word);
    vec![
        GateSegment {
            gate_a: true,
            gate_b: false,
            duration_us: u32::from(pos_us),
        },
        GateSegment {
            gate_a: false,
            gate_b: false,
            duration_us: DEADTIME_US,
        },
        GateSegment {
            gate_a: false,
            gate_b: true,
            duration_us: u32::from(neg_us),
        },
    ]
}

#[derive(Debug, Default)]
struct SimStateMachine {
    attached: bool,
    gate_a: bool,
    gate_b: bool,
    fifo: VecDeque<(u32, u32)>, // (word, pushed_at_us)
}

/// The four gate state machines.
#[derive(Debug, Default)]
pub struct SimEmitter {
    /// Fail the program load (fatal-init testing).
    pub load_fails: bool,
    /// Set by a successful load.
    pub loaded: bool,
    machines: [SimStateMachine; SIM_CHANNELS],
}

impl SimEmitter {
    /// True while calibration is manually driving a FET leg on any channel.
    #[must_use]
    pub fn any_gate_high(&self) -> bool {
        self.machines.iter().any(|m| m.gate_a || m.gate_b)
    }

    /// True when `ch` is attached to its state machine.
    #[must_use]
    pub fn attached(&self, ch: usize) -> bool {
        self.machines[ch].attached
    }

    /// Current manual gate levels for `ch`.
    #[must_use]
    pub fn gates(&self, ch: usize) -> (bool, bool) {
        (self.machines[ch].gate_a, self.machines[ch].gate_b)
    }
}

impl platform::PulseEmitter for SimEmitter {
    fn load(&mut self) -> Result<(), EmitterError> {
        if self.load_fails {
            return Err(EmitterError::NoProgramSpace);
        }
        self.loaded = true;
        Ok(())
    }

    fn attach(&mut self, ch: usize) {
        let m = &mut self.machines[ch];
        m.attached = true;
        m.gate_a = false;
        m.gate_b = false;
    }

    fn park(&mut self, ch: usize) {
        let m = &mut self.machines[ch];
        m.attached = false;
        m.gate_a = false;
        m.gate_b = false;
    }

    fn set_gates(&mut self, ch: usize, gate_a: bool, gate_b: bool) {
        let m = &mut self.machines[ch];
        if !m.attached {
            m.gate_a = gate_a;
            m.gate_b = gate_b;
        }
    }

    fn fifo_full(&self, ch: usize) -> bool {
        self.machines[ch].fifo.len() >= FIFO_DEPTH
    }

    fn try_push(&mut self, ch: usize, word: u32) -> bool {
        if self.fifo_full(ch) {
            return false;
        }
        // pushed_at is stamped by SimBoard; raw trait pushes use 0.
        self.machines[ch].fifo.push_back((word, 0));
        true
    }
}

// ---------------------------------------------------------------------------
// Analog capture

/// The ping-pong DMA pair plus the IRQ's two published cells.
pub struct SimCapture {
    buffers: Box<[[u16; ADC_CAPTURE_COUNT]; 2]>,
    ready: u8,
    done_time_us: u32,
    next_buffer: usize,
}

impl SimCapture {
    /// Empty capture, nothing ready.
    #[must_use]
    pub fn new() -> Self {
        Self {
            buffers: Box::new([[0; ADC_CAPTURE_COUNT]; 2]),
            ready: 0,
            done_time_us: 0,
            next_buffer: 0,
        }
    }
}

impl Default for SimCapture {
    fn default() -> Self {
        Self::new()
    }
}

impl CaptureSource for SimCapture {
    fn ready_flags(&self) -> u8 {
        self.ready
    }

    fn clear_ready(&mut self, channel_bit: u8) {
        self.ready &= !channel_bit;
    }

    fn done_time_us(&self) -> u32 {
        self.done_time_us
    }

    fn raw_buffer(&self, index: usize) -> &[u16; ADC_CAPTURE_COUNT] {
        &self.buffers[index]
    }
}

// ---------------------------------------------------------------------------
// Sense model

/// What the calibration sense input reads back.
#[derive(Debug, Clone, Copy)]
pub enum SenseModel {
    /// Always ~0 V (healthy idle).
    Quiet,
    /// A fixed voltage regardless of state (fault injection).
    Constant(f32),
    /// Voltage rises linearly as the DAC code drops below `base_code`,
    /// but only while calibration is driving a FET leg. This is the healthy
    /// sweep response.
    Linear {
        /// Code at and above which nothing conducts.
        base_code: u16,
        /// Volts gained per DAC code below `base_code`.
        volts_per_code: f32,
    },
}

// ---------------------------------------------------------------------------
// Board

/// The whole simulated board.
pub struct SimBoard {
    now_us: u32,
    /// DAC bus.
    pub dac: SimPort,
    /// Pot / power-subsystem bus.
    pub pot: SimPort,
    /// Gate state machines.
    pub emitter: SimEmitter,
    /// Analog capture pair.
    pub capture: SimCapture,
    /// Calibration feedback behavior.
    pub sense: SenseModel,
    /// Raw trigger line levels (bits 0..=3).
    pub trigger_lines: u8,
    /// Output board loading the drive-enable line.
    pub board_present: bool,
    /// Level currently driven on the drive-enable line.
    pub drive_enabled: bool,
    /// Soft power latch state.
    pub power_latched: bool,
    /// Set when the engine asked for the ROM bootloader.
    pub bootloader_entered: bool,
    /// Mic plug-in power state.
    pub mic_power: bool,
}

impl SimBoard {
    /// A healthy board at time zero.
    #[must_use]
    pub fn new() -> Self {
        Self {
            now_us: 0,
            dac: SimPort::new(),
            pot: SimPort::new(),
            emitter: SimEmitter::default(),
            capture: SimCapture::new(),
            sense: SenseModel::Quiet,
            trigger_lines: 0,
            board_present: true,
            drive_enabled: false,
            power_latched: true,
            bootloader_entered: false,
            mic_power: false,
        }
    }

    /// Move the virtual clock forward.
    pub fn advance(&mut self, us: u32) {
        self.now_us = self.now_us.wrapping_add(us);
    }

    /// Jump the virtual clock to an absolute value.
    pub fn set_time(&mut self, us: u32) {
        self.now_us = us;
    }

    /// Pop everything the scheduler has pushed into the emitter FIFOs.
    pub fn drain_emitted(&mut self) -> Vec<EmittedPulse> {
        let mut pulses = Vec::new();
        for (channel, m) in self.emitter.machines.iter_mut().enumerate() {
            while let Some((word, pushed_at_us)) = m.fifo.pop_front() {
                let (pos_us, neg_us) = unpack_pulse(word);
                pulses.push(EmittedPulse {
                    channel,
                    pos_us,
                    neg_us,
                    pushed_at_us,
                });
            }
        }
        pulses.sort_by_key(|p| p.pushed_at_us);
        pulses
    }

    /// Publish one capture window: write `samples` into `stripe_offset` of
    /// the next ping-pong buffer and raise the ready flags, exactly as the
    /// DMA completion IRQ would at the current virtual time.
    pub fn feed_window(&mut self, stripe_offset: usize, samples: &[u16; ADC_SAMPLE_COUNT]) {
        let index = self.capture.next_buffer;
        for (i, &s) in samples.iter().enumerate() {
            self.capture.buffers[index][i * ADC_SAMPLED_CHANNELS + stripe_offset] = s;
        }
        self.capture.next_buffer = (index + 1) % 2;
        self.capture.ready = 0b0001_1110 | index as u8;
        self.capture.done_time_us = self.now_us;
    }

    /// Feed a sine window of `freq_hz` at `amplitude` (0.0..=1.0 of full
    /// scale) into `stripe_offset`, phase-continuous from `phase` cycles.
    /// Returns the phase to pass to the next call.
    pub fn feed_sine(
        &mut self,
        stripe_offset: usize,
        freq_hz: f32,
        amplitude: f32,
        phase: f32,
    ) -> f32 {
        let mut samples = [0u16; ADC_SAMPLE_COUNT];
        let dt = ADC_SINGLE_SAMPLE_US as f32 / 1_000_000.0;
        for (i, s) in samples.iter_mut().enumerate() {
            let t = phase + freq_hz * dt * i as f32;
            let v = (t * core::f32::consts::TAU).sin() * amplitude * 2047.0;
            *s = (f32::from(ADC_ZERO_POINT) + v) as u16;
        }
        self.feed_window(stripe_offset, &samples);
        phase + freq_hz * dt * ADC_SAMPLE_COUNT as f32
    }

    fn sense_volts(&self) -> f32 {
        match self.sense {
            SenseModel::Quiet => 0.0,
            SenseModel::Constant(v) => v,
            SenseModel::Linear {
                base_code,
                volts_per_code,
            } => {
                if !self.emitter.any_gate_high() {
                    return 0.0;
                }
                let code = self
                    .dac
                    .last_dac_write
                    .map_or(base_code, |(_, code)| code);
                volts_per_code * f32::from(base_code.saturating_sub(code))
            }
        }
    }
}

impl Default for SimBoard {
    fn default() -> Self {
        Self::new()
    }
}

impl Board for SimBoard {
    type DacPort = SimPort;
    type PotPort = SimPort;
    type Emitter = SimEmitter;
    type Capture = SimCapture;

    fn now_us(&self) -> u32 {
        self.now_us
    }

    fn delay_us(&mut self, us: u32) {
        self.advance(us);
    }

    fn dac_port(&mut self) -> &mut SimPort {
        &mut self.dac
    }

    fn pot_port(&mut self) -> &mut SimPort {
        &mut self.pot
    }

    fn emitter(&mut self) -> &mut SimEmitter {
        &mut self.emitter
    }

    fn capture(&mut self) -> &mut SimCapture {
        &mut self.capture
    }

    fn sense_sample(&mut self) -> u16 {
        let raw = self.sense_volts() / 3.3 * 4096.0;
        raw.clamp(0.0, 4095.0) as u16
    }

    fn trigger_inputs(&self) -> u8 {
        self.trigger_lines
    }

    fn set_drive_enable(&mut self, enabled: bool) {
        self.drive_enabled = enabled;
    }

    fn probe_drive_sense(&mut self) -> bool {
        // With a board installed the line is pulled low; floating otherwise.
        !self.board_present
    }

    fn set_mic_power(&mut self, enabled: bool) {
        self.mic_power = enabled;
    }

    fn release_power_latch(&mut self) {
        self.power_latched = false;
    }

    fn enter_bootloader(&mut self) {
        self.bootloader_entered = true;
    }
}

// Stamp push times: the engine pushes through the Board trait, so wrap the
// raw emitter push with the virtual clock here.
impl SimBoard {
    /// Timestamp FIFO entries pushed since the last call with `at_us`.
    ///
    /// `PulseEmitter::try_push` has no clock; tests that care about push
    /// times call this right after `realtime_tick`.
    pub fn stamp_pushed(&mut self, at_us: u32) {
        for m in &mut self.emitter.machines {
            for entry in &mut m.fifo {
                if entry.1 == 0 {
                    entry.1 = at_us;
                }
            }
        }
    }
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;
    use platform::emitter::pack_pulse;
    use platform::PulseEmitter;

    #[test]
    fn trace_never_raises_both_gates() {
        for &(pos, neg) in &[(0u16, 0u16), (150, 150), (1023, 1), (1, 1023)] {
            for seg in trace_word(pack_pulse(pos, neg)) {
                assert!(!(seg.gate_a && seg.gate_b));
            }
        }
    }

    #[test]
    fn trace_reproduces_half_widths_with_deadtime() {
        let segs = trace_word(pack_pulse(150, 75));
        assert_eq!(segs[0].duration_us, 150);
        assert!(segs[0].gate_a && !segs[0].gate_b);
        assert!(segs[1].duration_us >= 1);
        assert!(!segs[1].gate_a && !segs[1].gate_b);
        assert_eq!(segs[2].duration_us, 75);
        assert!(!segs[2].gate_a && segs[2].gate_b);
    }

    #[test]
    fn fifo_depth_is_enforced() {
        let mut em = SimEmitter::default();
        for i in 0..FIFO_DEPTH {
            assert!(em.try_push(0, i as u32));
        }
        assert!(em.fifo_full(0));
        assert!(!em.try_push(0, 99));
    }

    #[test]
    fn attached_channel_ignores_manual_gates() {
        let mut em = SimEmitter::default();
        em.set_gates(1, true, false);
        assert_eq!(em.gates(1), (true, false));
        em.attach(1);
        assert_eq!(em.gates(1), (false, false));
        em.set_gates(1, true, true);
        assert_eq!(em.gates(1), (false, false));
    }

    #[test]
    fn dac_writes_decode_into_codes() {
        let mut port = SimPort::new();
        let cmd = mcp4728::build_write_cmd(
            2,
            3000,
            mcp4728::Vref::Vdd,
            mcp4728::Gain::One,
            mcp4728::PowerDown::Normal,
            true,
        );
        port.write(mcp4728::MCP4728_I2C_ADDR, &cmd).unwrap();
        assert_eq!(port.dac_codes[2], 3000);
        assert_eq!(port.last_dac_write, Some((2, 3000)));
        assert_eq!(port.dac_history(2), vec![3000]);
    }

    #[test]
    fn feed_window_alternates_buffers_and_flags() {
        let mut board = SimBoard::new();
        board.set_time(5_000);
        let samples = [1234u16; ADC_SAMPLE_COUNT];
        board.feed_window(1, &samples);
        assert_eq!(board.capture.ready_flags() & 1, 0);
        assert_eq!(board.capture.done_time_us(), 5_000);
        assert_eq!(board.capture.raw_buffer(0)[1], 1234);

        board.feed_window(1, &samples);
        assert_eq!(board.capture.ready_flags() & 1, 1);
    }

    #[test]
    fn linear_sense_model_tracks_dac_and_gates() {
        let mut board = SimBoard::new();
        board.sense = SenseModel::Linear {
            base_code: 4000,
            volts_per_code: 1e-5,
        };
        // No gates driven: silent.
        assert_eq!(board.sense_sample(), 0);

        let cmd = mcp4728::build_write_cmd(
            0,
            2500,
            mcp4728::Vref::Vdd,
            mcp4728::Gain::One,
            mcp4728::PowerDown::Normal,
            true,
        );
        board.dac.write(mcp4728::MCP4728_I2C_ADDR, &cmd).unwrap();
        board.emitter.set_gates(0, true, false);
        // (4000-2500) * 1e-5 = 15 mV -> raw ≈ 18.6
        let raw = board.sense_sample();
        assert!((17..=20).contains(&raw), "raw={raw}");
    }
}
