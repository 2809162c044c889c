//! The trigger watcher table.
//!
//! Each slot combines up to four hardware input lines (through a mask, an
//! inversion mask, and a fixed AND/OR reduction) with an optional audio
//! amplitude threshold, and fires an action range when the combined predicate
//! matches. Evaluation runs on a 10 ms cadence from the control loop.

use platform::time::elapsed_us;
use platform::Board;

use crate::actions::{execute_action_list, ActionTable, Alarms};
use crate::analog::AnalogCapture;
use crate::channel::AnalogChannel;
use crate::config::{MAX_TRIGGERS, TRIGGER_PERIOD_US};
use crate::params::ParamBank;
use crate::state::Shared;

/// Boolean reduction applied to the four masked-and-inverted input bits.
///
/// Named by the operator between (t1, t2), (t2, t3), (t3, t4): `Ooa` reads
/// `t1 || t2 || (t3 && t4)`. `Ddd` disables line evaluation entirely.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum TriggerOp {
    /// Disabled.
    #[default]
    Ddd = 0,
    /// t1 || t2 || t3 || t4
    Ooo,
    /// t1 || t2 || (t3 && t4)
    Ooa,
    /// t1 || (t2 && t3) || t4
    Oao,
    /// t1 || (t2 && t3 && t4)
    Oaa,
    /// (t1 && t2) || t3 || t4
    Aoo,
    /// (t1 && t2) || (t3 && t4)
    Aoa,
    /// (t1 && t2 && t3) || t4
    Aao,
    /// t1 && t2 && t3 && t4
    Aaa,
}

impl TriggerOp {
    /// Decode a wire value.
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        [
            TriggerOp::Ddd,
            TriggerOp::Ooo,
            TriggerOp::Ooa,
            TriggerOp::Oao,
            TriggerOp::Oaa,
            TriggerOp::Aoo,
            TriggerOp::Aoa,
            TriggerOp::Aao,
            TriggerOp::Aaa,
        ]
        .get(v as usize)
        .copied()
    }

    /// Apply the reduction to the low four bits of `s`.
    ///
    /// Bit positions: t1 = bit 0 ... t4 = bit 3.
    #[must_use]
    pub fn eval(self, s: u8) -> bool {
        match self {
            TriggerOp::Ddd => false,
            TriggerOp::Ooo => s != 0,
            TriggerOp::Ooa => s & 0b0011 != 0 || s & 0b1100 == 0b1100,
            TriggerOp::Oao => s & 0b1001 != 0 || s & 0b0110 == 0b0110,
            TriggerOp::Oaa => s & 0b0001 != 0 || s & 0b1110 == 0b1110,
            TriggerOp::Aoo => s & 0b1100 != 0 || s & 0b0011 == 0b0011,
            TriggerOp::Aoa => s & 0b1100 == 0b1100 || s & 0b0011 == 0b0011,
            TriggerOp::Aao => s & 0b1000 != 0 || s & 0b0111 == 0b0111,
            TriggerOp::Aaa => s == 0b1111,
        }
    }
}

/// One trigger slot.
#[derive(Debug, Clone, Copy, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Trigger {
    /// Disabled slots never evaluate.
    pub enabled: bool,
    /// Input lines participating (bit 0 = line 1). Zero disables lines.
    pub input_mask: u8,
    /// Per-line inversion applied after masking.
    pub input_invert_mask: u8,
    /// Reduction over the masked lines.
    pub op: TriggerOp,
    /// Invert the reduction's result.
    pub output_invert: bool,
    /// Audio amplitude source; `None` disables threshold detection.
    pub input_audio: AnalogChannel,
    /// Amplitude threshold, `0.0..=1.0`.
    pub threshold: f32,
    /// True fires below the threshold instead of above.
    pub threshold_invert: bool,
    /// Require line *and* audio predicates rather than either.
    pub require_both: bool,
    /// Fire on every evaluation while true, not just on the rising edge.
    pub repeating: bool,
    /// Minimum spacing between fires.
    pub min_period_us: u32,
    /// Action range start.
    pub action_start: u8,
    /// Action range end (exclusive). Equal to start disables the slot.
    pub action_end: u8,
}

#[derive(Debug, Clone, Copy, Default)]
struct TriggerState {
    last_result: bool,
    last_exec_us: u32,
}

/// The 64-slot trigger table plus its runtime state.
pub struct TriggerEngine {
    triggers: [Trigger; MAX_TRIGGERS],
    states: [TriggerState; MAX_TRIGGERS],
    last_eval_us: u32,
    input_states: u8,
}

impl TriggerEngine {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            triggers: [Trigger::default(); MAX_TRIGGERS],
            states: [TriggerState::default(); MAX_TRIGGERS],
            last_eval_us: 0,
            input_states: 0,
        }
    }

    /// Read a slot; out-of-range reads as a disabled slot.
    #[must_use]
    pub fn get(&self, index: u8) -> Trigger {
        self.triggers
            .get(index as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Replace a slot.
    pub fn set(&mut self, index: u8, trigger: Trigger) {
        if let Some(slot) = self.triggers.get_mut(index as usize) {
            *slot = trigger;
        }
    }

    /// Raw line states captured at the last evaluation.
    #[must_use]
    pub fn input_states(&self) -> u8 {
        self.input_states
    }

    /// Evaluate the table if the 10 ms cadence has elapsed.
    #[allow(clippy::too_many_arguments)]
    pub fn process<B: Board>(
        &mut self,
        board: &mut B,
        analog: &mut AnalogCapture,
        actions: &ActionTable,
        params: &mut ParamBank,
        shared: &Shared,
        alarms: &mut Alarms,
    ) {
        let now = board.now_us();
        if elapsed_us(now, self.last_eval_us) < TRIGGER_PERIOD_US {
            return;
        }
        self.last_eval_us = now;
        self.input_states = board.trigger_inputs() & 0x0F;

        for index in 0..MAX_TRIGGERS {
            let trigger = self.triggers[index];

            let has_lines = trigger.input_mask != 0 && trigger.op != TriggerOp::Ddd;
            let has_audio = trigger.input_audio != AnalogChannel::None;
            if !trigger.enabled
                || (!has_lines && !has_audio)
                || trigger.action_start == trigger.action_end
            {
                continue;
            }

            let mut result = false;
            if has_lines {
                let s = (self.input_states & trigger.input_mask) ^ trigger.input_invert_mask;
                result = trigger.op.eval(s) ^ trigger.output_invert;
            }

            if has_audio {
                let amplitude = analog
                    .fetch(board.capture(), trigger.input_audio, true)
                    .map_or(0.0, |w| w.stats.amplitude);
                let peaked = (trigger.threshold > amplitude) ^ trigger.threshold_invert;
                result = if trigger.require_both {
                    result && peaked
                } else {
                    result || peaked
                };
            }

            let state = &mut self.states[index];
            if trigger.repeating || result != state.last_result {
                state.last_result = result;

                if result && elapsed_us(now, state.last_exec_us) >= trigger.min_period_us {
                    state.last_exec_us = now;
                    execute_action_list(
                        actions,
                        params,
                        shared,
                        alarms,
                        now,
                        trigger.action_start,
                        trigger.action_end,
                    );
                }
            }
        }
    }
}

impl Default for TriggerEngine {
    fn default() -> Self {
        Self::new()
    }
}
