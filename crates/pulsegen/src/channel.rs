//! Output channel and analog channel models.

/// Lifecycle of an output channel.
///
/// `Invalid` at power-up, `Ready` once self-test calibration succeeds,
/// `Fault` on any failure. `Fault` is absorbing: nothing at runtime clears
/// it, and the scheduler silently drops pulses for anything not `Ready`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ChannelStatus {
    /// Not yet calibrated.
    #[default]
    Invalid,
    /// Failed calibration or scrammed; sticks until reboot.
    Fault,
    /// Calibrated and allowed to emit.
    Ready,
}

impl ChannelStatus {
    /// Wire encoding.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        match self {
            ChannelStatus::Invalid => 0,
            ChannelStatus::Fault => 1,
            ChannelStatus::Ready => 2,
        }
    }

    /// Decode; unknown values collapse to `Invalid`.
    #[must_use]
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => ChannelStatus::Fault,
            2 => ChannelStatus::Ready,
            _ => ChannelStatus::Invalid,
        }
    }
}

/// One of the four analog inputs in the ADC round-robin, or none.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum AnalogChannel {
    /// No analog source selected.
    #[default]
    None = 0,
    /// Output-stage calibration feedback.
    Sense = 1,
    /// Microphone input.
    Mic = 2,
    /// Line-in left.
    Left = 3,
    /// Line-in right.
    Right = 4,
}

impl AnalogChannel {
    /// Decode a wire value; out-of-range selects `None`.
    #[must_use]
    pub fn from_u8(v: u8) -> Self {
        match v {
            1 => AnalogChannel::Sense,
            2 => AnalogChannel::Mic,
            3 => AnalogChannel::Left,
            4 => AnalogChannel::Right,
            _ => AnalogChannel::None,
        }
    }

    /// Offset of this channel's samples inside the interleaved round-robin
    /// stripe. Follows the ADC input pin order (sense, mic, right, left).
    #[must_use]
    pub fn stripe_offset(self) -> Option<usize> {
        match self {
            AnalogChannel::None => None,
            AnalogChannel::Sense => Some(0),
            AnalogChannel::Mic => Some(1),
            AnalogChannel::Right => Some(2),
            AnalogChannel::Left => Some(3),
        }
    }
}

/// Audio mode flag: modulate power by window amplitude.
pub const AUDIO_MODE_POWER: u8 = 1 << 6;
/// Audio mode flag: emit a pulse per rising zero crossing.
pub const AUDIO_MODE_PULSE: u8 = 2 << 6;
/// Mask covering both audio mode flags.
pub const AUDIO_MODE_MASK: u8 = AUDIO_MODE_POWER | AUDIO_MODE_PULSE;

/// Per-channel audio routing byte: `[pulse:1 | power:1 | source:6]`.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct AudioConfig(pub u8);

impl AudioConfig {
    /// The selected analog source.
    #[must_use]
    pub fn source(self) -> AnalogChannel {
        AnalogChannel::from_u8(self.0 & !AUDIO_MODE_MASK)
    }

    /// True when the amplitude should scale channel power.
    #[must_use]
    pub fn modulates_power(self) -> bool {
        self.0 & AUDIO_MODE_POWER != 0
    }

    /// True when zero crossings should drive pulse emission.
    #[must_use]
    pub fn generates_pulses(self) -> bool {
        self.0 & AUDIO_MODE_PULSE != 0
    }

    /// Active = a real source with at least one mode flag.
    #[must_use]
    pub fn is_active(self) -> bool {
        self.source() != AnalogChannel::None && self.0 & AUDIO_MODE_MASK != 0
    }
}

/// One isolated output stage.
#[derive(Debug, Clone, Copy)]
pub struct Channel {
    /// DAC sub-channel controlling this stage's drive bus.
    pub dac_channel: u8,
    /// Calibration / fault state.
    pub status: ChannelStatus,
    /// DAC code at which calibration first saw conduction. Set once.
    pub cal_value: u16,
    /// Operator intensity ceiling, `0.0..=1.0`.
    pub max_power: f32,
}

impl Channel {
    /// A channel at power-up defaults: uncalibrated, ceiling wide open.
    #[must_use]
    pub const fn new(dac_channel: u8) -> Self {
        Self {
            dac_channel,
            status: ChannelStatus::Invalid,
            cal_value: 0,
            max_power: 1.0,
        }
    }
}
