//! The scripted action table.
//!
//! Actions are small parameterized mutations, addressable by index and run as
//! contiguous half-open ranges. They are invoked from three places: the host
//! (`RUN_ACTION_LIST`), triggers, and the parameter engine when a cycling
//! value hits an extreme.

use platform::AlarmQueue;

use crate::config::MAX_ACTIONS;
use crate::params::{Param, ParamBank, Target};
use crate::state::{BitOp, Shared};

/// Levels of `Execute` nesting allowed (a top-level list plus two deep).
const MAX_ACTION_DEPTH: u8 = 2;

/// Alarm slots for delayed enable/disable/toggle reversals.
pub const ALARM_SLOTS: usize = 16;

/// One-shot alarm queue carrying deferred enable-mask mutations.
pub type Alarms = AlarmQueue<BitOp, ALARM_SLOTS>;

/// What an action does when it runs.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Default)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ActionKind {
    /// Placeholder; slot does nothing.
    #[default]
    None,
    /// Store `value` into the addressed target.
    Set,
    /// Add `value` to the addressed target.
    Increment,
    /// Subtract `value` from the addressed target.
    Decrement,
    /// Enable channels in `ch_mask`; `value` ms later, disable them again.
    Enable,
    /// Disable channels in `ch_mask`; `value` ms later, enable them again.
    Disable,
    /// Toggle channels in `ch_mask`; `value` ms later, toggle once more.
    Toggle,
    /// Run the action range packed into `value` as `[start:8 | end:8]`.
    Execute,
    /// Recompute cycling cadence for `param` on the masked channels.
    ParamUpdate,
}

impl ActionKind {
    /// Decode a wire value.
    #[must_use]
    pub fn from_u8(v: u8) -> Option<Self> {
        [
            ActionKind::None,
            ActionKind::Set,
            ActionKind::Increment,
            ActionKind::Decrement,
            ActionKind::Enable,
            ActionKind::Disable,
            ActionKind::Toggle,
            ActionKind::Execute,
            ActionKind::ParamUpdate,
        ]
        .get(v as usize)
        .copied()
    }

    /// Wire encoding.
    #[must_use]
    pub fn to_u8(self) -> u8 {
        self as u8
    }
}

/// One action slot.
#[derive(Debug, Clone, Copy)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub struct Action {
    /// Disabled slots are skipped during list execution.
    pub enabled: bool,
    /// Operation to perform.
    pub kind: ActionKind,
    /// Channels affected (bit 0 = channel 0).
    pub ch_mask: u8,
    /// Parameter argument for Set/Increment/Decrement/ParamUpdate.
    pub param: Param,
    /// Target argument for Set/Increment/Decrement.
    pub target: Target,
    /// Main operand (amount, delay in ms, or packed range).
    pub value: u16,
}

impl Default for Action {
    fn default() -> Self {
        Self {
            enabled: false,
            kind: ActionKind::None,
            ch_mask: 0,
            param: Param::Power,
            target: Target::Value,
            value: 0,
        }
    }
}

/// The 255-slot action table. Starts empty (all slots disabled).
pub struct ActionTable {
    slots: [Action; MAX_ACTIONS],
}

impl ActionTable {
    /// Empty table.
    #[must_use]
    pub fn new() -> Self {
        Self {
            slots: [Action::default(); MAX_ACTIONS],
        }
    }

    /// Read a slot; out-of-range indices read as a disabled slot.
    #[must_use]
    pub fn get(&self, index: u8) -> Action {
        self.slots
            .get(index as usize)
            .copied()
            .unwrap_or_default()
    }

    /// Replace a slot.
    pub fn set(&mut self, index: u8, action: Action) {
        if let Some(slot) = self.slots.get_mut(index as usize) {
            *slot = action;
        }
    }
}

impl Default for ActionTable {
    fn default() -> Self {
        Self::new()
    }
}

/// Run every enabled action in `[start, end)`.
pub fn execute_action_list(
    table: &ActionTable,
    params: &mut ParamBank,
    shared: &Shared,
    alarms: &mut Alarms,
    now_us: u32,
    start: u8,
    end: u8,
) {
    execute_inner(table, params, shared, alarms, now_us, start, end, 0);
}

#[allow(clippy::too_many_arguments)]
fn execute_inner(
    table: &ActionTable,
    params: &mut ParamBank,
    shared: &Shared,
    alarms: &mut Alarms,
    now_us: u32,
    start: u8,
    end: u8,
    depth: u8,
) {
    if depth > MAX_ACTION_DEPTH {
        log::warn!("action list recursion too deep, range {start}..{end} ignored");
        return;
    }

    for index in start..end {
        let action = table.get(index);
        if !action.enabled || action.kind == ActionKind::None {
            continue;
        }

        match action.kind {
            ActionKind::Set | ActionKind::Increment | ActionKind::Decrement => {
                for ch in channels(action.ch_mask) {
                    let current = params.get(ch, action.param, action.target);
                    let value = match action.kind {
                        ActionKind::Set => action.value,
                        ActionKind::Increment => current.saturating_add(action.value),
                        _ => current.saturating_sub(action.value),
                    };
                    // set() clamps VALUE targets into [MIN, MAX]
                    params.set(ch, action.param, action.target, value);
                }
            }
            ActionKind::Enable | ActionKind::Disable | ActionKind::Toggle => {
                let op = match action.kind {
                    ActionKind::Enable => BitOp::Set(action.ch_mask),
                    ActionKind::Disable => BitOp::Clear(action.ch_mask),
                    _ => BitOp::Toggle(action.ch_mask),
                };
                shared.apply(op);
                if action.value > 0 {
                    let due = now_us.wrapping_add(u32::from(action.value) * 1_000);
                    alarms.schedule(due, op.inverse());
                }
            }
            ActionKind::Execute => {
                let (s, e) = ((action.value >> 8) as u8, (action.value & 0xFF) as u8);
                execute_inner(table, params, shared, alarms, now_us, s, e, depth + 1);
            }
            ActionKind::ParamUpdate => {
                for ch in channels(action.ch_mask) {
                    params.update(ch, action.param);
                }
            }
            ActionKind::None => {}
        }
    }
}

/// Iterate channel indices set in a mask.
pub(crate) fn channels(mask: u8) -> impl Iterator<Item = usize> {
    (0..crate::config::CHANNEL_COUNT).filter(move |ch| mask & (1 << ch) != 0)
}
