//! The long-lived machine value.
//!
//! Owns every piece of mutable engine state and exposes exactly two run
//! entry points: [`Machine::control_tick`] for the control core and
//! [`Machine::realtime_tick`] for the realtime core. The startup routine
//! builds one `Machine`, runs [`Machine::init`], and passes references into
//! the two loops; nothing else holds state.

use platform::Board;

use crate::actions::{execute_action_list, ActionTable, Alarms};
use crate::analog::{AnalogCapture, Frontend};
use crate::channel::{AudioConfig, ChannelStatus};
use crate::config::CHANNEL_COUNT;
use crate::generator::Generator;
use crate::output::{InitError, Output};
use crate::params::{Param, Target};
use crate::state::Shared;
use crate::triggers::TriggerEngine;

/// The whole pulse-generation core.
pub struct Machine {
    pub(crate) shared: Shared,
    pub(crate) output: Output,
    pub(crate) generator: Generator,
    pub(crate) actions: ActionTable,
    pub(crate) triggers: TriggerEngine,
    pub(crate) analog: AnalogCapture,
    pub(crate) frontend: Frontend,
    pub(crate) alarms: Alarms,
}

impl Machine {
    /// A machine at power-on defaults.
    #[must_use]
    pub fn new() -> Self {
        Self {
            shared: Shared::new(),
            output: Output::new(),
            generator: Generator::new(),
            actions: ActionTable::new(),
            triggers: TriggerEngine::new(),
            analog: AnalogCapture::new(),
            frontend: Frontend::new(),
            alarms: Alarms::new(),
        }
    }

    /// Bring up the analog frontend and the output stage (including
    /// calibration).
    ///
    /// # Errors
    ///
    /// Propagates fatal output-stage failures; the machine has already
    /// scrammed when one is returned and the caller should halt.
    pub fn init<B: Board>(&mut self, board: &mut B) -> Result<(), InitError> {
        self.frontend.init(board, &self.shared);
        self.output.init(board, &self.shared)
    }

    /// One pass of the control loop: expire alarms, evaluate triggers, run
    /// the generator.
    pub fn control_tick<B: Board>(&mut self, board: &mut B) {
        let now = board.now_us();
        while let Some(op) = self.alarms.pop_due(now) {
            self.shared.apply(op);
        }

        self.triggers.process(
            board,
            &mut self.analog,
            &self.actions,
            &mut self.generator.params,
            &self.shared,
            &mut self.alarms,
        );

        self.generator.process(
            board,
            &self.shared,
            &self.actions,
            &mut self.alarms,
            &mut self.analog,
            &mut self.output,
        );
    }

    /// One pass of the realtime loop: drain pulse and power queues.
    pub fn realtime_tick<B: Board>(&mut self, board: &mut B) {
        self.output.process_pulses(board, &self.shared);
        self.output.process_power(board, &self.shared);
    }

    /// Irreversible safety stop.
    pub fn scram<B: Board>(&mut self, board: &mut B) {
        self.output.scram(board, &self.shared);
    }

    /// Run the action range `[start, end)` immediately.
    pub fn run_actions<B: Board>(&mut self, board: &mut B, start: u8, end: u8) {
        execute_action_list(
            &self.actions,
            &mut self.generator.params,
            &self.shared,
            &mut self.alarms,
            board.now_us(),
            start,
            end,
        );
    }

    /// Read one parameter matrix cell.
    #[must_use]
    pub fn parameter(&self, ch: usize, param: Param, target: Target) -> u16 {
        self.generator.params.get(ch, param, target)
    }

    /// Write one parameter matrix cell (VALUE writes clamp into MIN..=MAX).
    pub fn set_parameter(&mut self, ch: usize, param: Param, target: Target, value: u16) {
        self.generator.params.set(ch, param, target, value);
    }

    /// Recompute cycling cadence for one channel × parameter.
    pub fn update_parameter(&mut self, ch: usize, param: Param) {
        self.generator.params.update(ch, param);
    }

    /// Current channel enable mask.
    #[must_use]
    pub fn en_mask(&self) -> u8 {
        self.shared.en_mask()
    }

    /// Replace the channel enable mask (does not touch the require-zero
    /// latch; the host command path does).
    pub fn set_en_mask(&mut self, mask: u8) {
        self.shared.store_en_mask(mask);
    }

    /// Current require-zero latch bits.
    #[must_use]
    pub fn require_zero_mask(&self) -> u8 {
        self.shared.require_zero()
    }

    /// Current error bitfield.
    #[must_use]
    pub fn error_flags(&self) -> u16 {
        self.shared.errors()
    }

    /// One channel's calibration / fault state.
    #[must_use]
    pub fn channel_status(&self, ch: usize) -> ChannelStatus {
        self.output.channel(ch).status
    }

    /// One channel's discovered calibration code.
    #[must_use]
    pub fn cal_value(&self, ch: usize) -> u16 {
        self.output.channel(ch).cal_value
    }

    /// One channel's operator intensity ceiling.
    #[must_use]
    pub fn max_power(&self, ch: usize) -> f32 {
        self.output.channel(ch).max_power
    }

    /// Set a channel's intensity ceiling directly (front-panel path; the
    /// host command path additionally latches require-zero).
    pub fn set_max_power(&mut self, ch: usize, max_power: f32) {
        if ch < CHANNEL_COUNT {
            self.output.channel_mut(ch).max_power = max_power;
        }
    }

    /// A channel's audio routing.
    #[must_use]
    pub fn audio_config(&self, ch: usize) -> AudioConfig {
        self.generator.audio_config(ch)
    }

    /// Set a channel's audio routing directly (no require-zero latch).
    pub fn set_audio_config(&mut self, ch: usize, cfg: AudioConfig) {
        self.generator.set_audio_config(ch, cfg);
    }
}

impl Default for Machine {
    fn default() -> Self {
        Self::new()
    }
}
