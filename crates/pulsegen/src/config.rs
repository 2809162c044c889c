//! Board-level constants and safety limits.
//!
//! Everything here is fixed at build time. The calibration thresholds and the
//! frequency / pulse-width caps are safety constants; changing them changes
//! what the hardware is allowed to do to a human on the other end of the
//! transformer, so they live in one place.

/// Output channels on the board.
pub const CHANNEL_COUNT: usize = 4;

/// Action slots addressable over the command surface.
pub const MAX_ACTIONS: usize = 255;

/// Trigger slots.
pub const MAX_TRIGGERS: usize = 64;

/// Sequencer mask slots.
pub const MAX_SEQUENCES: usize = 255;

/// Sense voltage above which a calibration step is accepted, in volts.
pub const CH_CAL_THRESHOLD_OK: f32 = 0.015;

/// Sense voltage above which calibration declares a fault, in volts.
pub const CH_CAL_THRESHOLD_OVER: f32 = 0.018;

/// DAC codes added above `cal_value` so that "zero power" sits safely below
/// the conduction point discovered during calibration.
pub const CH_CAL_OFFSET: i32 = 400;

/// DAC span between zero and full output power, in codes.
pub const POWER_SPAN_CODES: f32 = 2000.0;

/// Calibration sweep bounds and step (DAC codes, descending).
pub const CAL_SWEEP_START: u16 = 4000;
/// Lower (exclusive) end of the calibration sweep.
pub const CAL_SWEEP_END: u16 = 2000;
/// Codes stepped down per calibration iteration.
pub const CAL_SWEEP_STEP: u16 = 10;

/// ADC reference voltage over full scale, for sense conversions.
pub const SENSE_VOLTS_PER_CODE: f32 = 3.3 / 4096.0;

/// Hard ceiling on pulse frequency, in decihertz (500 Hz).
pub const MAX_FREQUENCY_DHZ: u16 = 5000;

/// Hard ceiling on a pulse half-width, in microseconds.
pub const MAX_PULSE_WIDTH_US: u16 = 500;

/// The DAC needs roughly this long per channel update.
pub const DAC_WRITE_INTERVAL_US: u32 = 110;

/// Scheduling lead applied to generator-emitted pulses.
pub const PULSE_LEAD_US: u32 = 110;

/// Queued pulses older than this at pop time are discarded.
pub const PULSE_STALE_US: u32 = 1_000_000;

/// Drive rail is dropped after this long with no pulse traffic.
pub const RAIL_IDLE_TIMEOUT_US: u32 = 30_000_000;

/// Trigger table evaluation cadence.
pub const TRIGGER_PERIOD_US: u32 = 10_000;

/// Firmware version triple reported over the command surface.
pub const VERSION_PCB_REV: u8 = 1;
/// Major firmware version.
pub const VERSION_MAJOR: u8 = 0;
/// Minor firmware version.
pub const VERSION_MINOR: u8 = 1;
