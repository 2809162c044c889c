//! The top-level waveform generator.
//!
//! One pass per control-loop iteration: advance the sequencer, then for every
//! effectively-enabled channel step its parameters, walk the
//! on-ramp/on/off-ramp/off envelope, and turn the result into queued pulses
//! and power levels. Channels with an audio source hand pulse timing (and
//! optionally power scaling) to the audio processor instead.

use platform::time::{elapsed_us, hz_to_us};
use platform::Board;

use crate::actions::{execute_action_list, ActionTable, Alarms};
use crate::analog::AnalogCapture;
use crate::audio::{self, AudioState};
use crate::channel::AudioConfig;
use crate::config::{
    CHANNEL_COUNT, DAC_WRITE_INTERVAL_US, MAX_FREQUENCY_DHZ, MAX_PULSE_WIDTH_US, PULSE_LEAD_US,
};
use crate::output::Output;
use crate::params::{Param, ParamBank, Target};
use crate::sequencer::Sequencer;
use crate::state::Shared;

/// Envelope states, in cycling order. Each state's dwell time is the live
/// value of the parameter it is named after.
const STATE_SEQUENCE: [Param; 4] = [
    Param::OnRampTime,
    Param::OnTime,
    Param::OffRampTime,
    Param::OffTime,
];

/// Per-channel generator runtime state.
#[derive(Debug, Default)]
struct GenChannel {
    /// Cursor into [`STATE_SEQUENCE`].
    state_index: u8,
    /// When the current envelope state was entered.
    last_state_us: u32,
    /// Last periodic pulse emission.
    last_pulse_us: u32,
    /// Last power command emission.
    last_power_us: u32,
    /// Audio routing for this channel.
    audio: AudioConfig,
    /// Audio processor state.
    audio_state: AudioState,
}

/// The generator: parameter bank, sequencer, and per-channel envelopes.
pub struct Generator {
    pub(crate) params: ParamBank,
    pub(crate) sequencer: Sequencer,
    channels: [GenChannel; CHANNEL_COUNT],
}

impl Generator {
    /// Generator at boot defaults; nothing runs until the enable mask says so.
    #[must_use]
    pub fn new() -> Self {
        Self {
            params: ParamBank::new(),
            sequencer: Sequencer::new(),
            channels: Default::default(),
        }
    }

    /// Audio routing for a channel.
    #[must_use]
    pub fn audio_config(&self, ch: usize) -> AudioConfig {
        self.channels[ch].audio
    }

    /// Set audio routing for a channel.
    pub fn set_audio_config(&mut self, ch: usize, cfg: AudioConfig) {
        self.channels[ch].audio = cfg;
    }

    /// One generator pass.
    #[allow(clippy::too_many_arguments)]
    pub fn process<B: Board>(
        &mut self,
        board: &mut B,
        shared: &Shared,
        actions: &ActionTable,
        alarms: &mut Alarms,
        analog: &mut AnalogCapture,
        output: &mut Output,
    ) {
        let now = board.now_us();
        let effective = shared.en_mask() & self.sequencer.tick(now);

        for ch in 0..CHANNEL_COUNT {
            if effective & (1 << ch) == 0 {
                // Hold the envelope at its start so re-enable always begins
                // with the on-ramp.
                self.channels[ch].state_index = 0;
                self.channels[ch].last_state_us = now;
                continue;
            }

            for param in Param::ALL {
                if let Some((start, end)) = self.params.step(ch, param, now) {
                    execute_action_list(
                        actions,
                        &mut self.params,
                        shared,
                        alarms,
                        now,
                        start,
                        end,
                    );
                }
            }

            // Envelope cursor.
            let state_duration_us = u32::from(self.params.get(
                ch,
                STATE_SEQUENCE[self.channels[ch].state_index as usize],
                Target::Value,
            )) * 1_000;
            if elapsed_us(now, self.channels[ch].last_state_us) > state_duration_us {
                self.channels[ch].state_index = (self.channels[ch].state_index + 1) % 4;
                self.channels[ch].last_state_us = now;
            }

            let state = STATE_SEQUENCE[self.channels[ch].state_index as usize];
            let in_off = state == Param::OffTime;

            let mut modifier = 1.0f32;
            match state {
                Param::OnRampTime | Param::OffRampTime => {
                    let ramp_us = u32::from(self.params.get(ch, state, Target::Value)) * 1_000;
                    if ramp_us > 0 {
                        let remaining =
                            ramp_us.saturating_sub(elapsed_us(now, self.channels[ch].last_state_us));
                        let frac = (remaining as f32 / ramp_us as f32).min(1.0);
                        modifier = if state == Param::OnRampTime {
                            1.0 - frac
                        } else {
                            frac
                        };
                    }
                }
                Param::OffTime => modifier = 0.0,
                _ => {}
            }

            let base = f32::from(self.params.get(ch, Param::Power, Target::Value)) / 65_535.0;
            let mut power = base * modifier;

            let frequency = self
                .params
                .get(ch, Param::Frequency, Target::Value)
                .min(MAX_FREQUENCY_DHZ);
            let period_us = if frequency == 0 {
                0
            } else {
                10_000_000 / u32::from(frequency)
            };
            let pulse_width = self
                .params
                .get(ch, Param::PulseWidth, Target::Value)
                .min(MAX_PULSE_WIDTH_US);

            let audio = self.channels[ch].audio;
            let mut audio_pulses = false;
            if !in_off && audio.is_active() {
                // Audio pulses stay inside the same 500 Hz safety clamp as
                // the periodic path.
                let min_period_us = period_us.max(hz_to_us(500));
                let amplitude = audio::process(
                    &mut self.channels[ch].audio_state,
                    analog,
                    board.capture(),
                    audio.source(),
                    audio.generates_pulses(),
                    ch,
                    pulse_width,
                    min_period_us,
                    output,
                );
                if audio.modulates_power() {
                    power *= amplitude;
                }
                audio_pulses = audio.generates_pulses();
            }

            if !in_off && !audio_pulses && period_us > 0 {
                if elapsed_us(now, self.channels[ch].last_pulse_us) >= period_us {
                    self.channels[ch].last_pulse_us = now;
                    output.queue_pulse(
                        ch,
                        pulse_width,
                        pulse_width,
                        now.wrapping_add(PULSE_LEAD_US),
                    );
                }
            }

            // DAC throughput bounds power updates to ~2.2 kHz across four
            // channels.
            if elapsed_us(now, self.channels[ch].last_power_us)
                >= CHANNEL_COUNT as u32 * DAC_WRITE_INTERVAL_US
            {
                self.channels[ch].last_power_us = now;
                output.queue_power(ch, power);
            }
        }
    }
}

impl Default for Generator {
    fn default() -> Self {
        Self::new()
    }
}
