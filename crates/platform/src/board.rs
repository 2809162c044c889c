//! The board seam: everything the engine needs from the hardware, in one
//! trait.
//!
//! A `Board` implementation is either the real MCU binding (HAL + PAC,
//! outside this workspace) or the desktop emulator's `SimBoard`. The engine
//! takes `&mut impl Board` at its entry points and keeps every hardware
//! borrow short-lived, so implementations can hand out their parts piecemeal.

use crate::capture::CaptureSource;
use crate::emitter::PulseEmitter;
use crate::i2c::I2cPort;

/// Hardware bundle for one machine instance.
pub trait Board {
    /// Port with the quad DAC on it (dedicated bus on the real board).
    type DacPort: I2cPort;
    /// Port shared by the digital pot and power subsystem.
    type PotPort: I2cPort;
    /// The gate-pin pulse state machines.
    type Emitter: PulseEmitter;
    /// The free-running ADC ping-pong pair.
    type Capture: CaptureSource;

    /// Free-running microsecond counter (wraps; see [`crate::time`]).
    fn now_us(&self) -> u32;

    /// Busy-wait for `us` microseconds.
    ///
    /// Only calibration and init use this; the run loops never sleep.
    fn delay_us(&mut self, us: u32);

    /// Busy-wait for `ms` milliseconds.
    fn delay_ms(&mut self, ms: u32) {
        self.delay_us(ms.saturating_mul(1_000));
    }

    /// Borrow the DAC port.
    fn dac_port(&mut self) -> &mut Self::DacPort;

    /// Borrow the pot port.
    fn pot_port(&mut self) -> &mut Self::PotPort;

    /// Borrow the pulse emitter.
    fn emitter(&mut self) -> &mut Self::Emitter;

    /// Borrow the analog capture source.
    fn capture(&mut self) -> &mut Self::Capture;

    /// One raw 12-bit sample of the calibration sense input.
    fn sense_sample(&mut self) -> u16;

    /// Current state of the four trigger input lines as bits 0..=3.
    ///
    /// Raw electrical levels; the lines are active low and any inversion is
    /// the trigger engine's business.
    fn trigger_inputs(&self) -> u8;

    /// Drive the rail-enable line.
    fn set_drive_enable(&mut self, enabled: bool);

    /// Probe the rail-enable line for board presence.
    ///
    /// Tri-states the pin with a pull-down, reads it, and restores the
    /// output state before returning. Only meaningful while the rail is
    /// disabled; a high reading means no output board is loading the line.
    fn probe_drive_sense(&mut self) -> bool;

    /// Switch microphone plug-in power (the line itself is active low).
    fn set_mic_power(&mut self, enabled: bool);

    /// Release the soft power latch; the device stays up only on USB power.
    fn release_power_latch(&mut self);

    /// Reboot into the ROM USB bootloader. Callers scram first.
    fn enter_bootloader(&mut self);
}
