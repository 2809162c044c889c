//! The host command surface.
//!
//! Transport-agnostic: the link layer (framing, CRC, serial plumbing) hands
//! in one decoded message — an id byte followed by its payload — and collects
//! zero or more reply messages through a sink. Multi-byte integers are
//! big-endian on the wire. Masked REQUESTs reply once per selected channel so
//! the host can tell the answers apart.

use heapless::Vec;
use thiserror_no_std::Error;

use platform::Board;

use crate::actions::{channels, Action, ActionKind};
use crate::channel::{AnalogChannel, AudioConfig, ChannelStatus};
use crate::config::{VERSION_MAJOR, VERSION_MINOR, VERSION_PCB_REV};
use crate::machine::Machine;
use crate::params::{Param, Target};
use crate::triggers::{Trigger, TriggerOp};

/// Requests firmware version.
pub const MSG_ID_REQUEST_VERSION: u8 = 2;
/// Firmware version reply: `[pcb_rev, major, minor]`.
pub const MSG_ID_VERSION: u8 = 3;
/// Requests the error bitfield.
pub const MSG_ID_REQUEST_ERR: u8 = 4;
/// Error bitfield reply: `[err:16]`.
pub const MSG_ID_ERR: u8 = 5;
/// Release the soft power latch.
pub const MSG_ID_SHUTDOWN: u8 = 9;
/// Scram, then reboot into the USB bootloader.
pub const MSG_ID_RESET_TO_USB_BOOT: u8 = 10;
/// Requests mic plug-in-power state.
pub const MSG_ID_REQUEST_MIC_PIP_EN: u8 = 11;
/// Sets mic plug-in-power: `[enable]`.
pub const MSG_ID_UPDATE_MIC_PIP_EN: u8 = 12;
/// Requests mic preamp gain.
pub const MSG_ID_REQUEST_MIC_GAIN: u8 = 13;
/// Sets mic preamp gain: `[gain]`.
pub const MSG_ID_UPDATE_MIC_GAIN: u8 = 14;
/// Requests per-channel intensity ceilings: `[ch_mask]`.
pub const MSG_ID_REQUEST_MAX_POWER: u8 = 20;
/// Sets per-channel intensity ceilings: `[ch_mask, value:16]`.
pub const MSG_ID_UPDATE_MAX_POWER: u8 = 21;
/// Requests the require-zero latch.
pub const MSG_ID_REQUEST_REQUIRE_ZERO: u8 = 22;
/// Sets the require-zero latch: `[flags]`.
pub const MSG_ID_UPDATE_REQUIRE_ZERO: u8 = 23;
/// Requests per-channel audio routing: `[ch_mask]`.
pub const MSG_ID_REQUEST_CH_AUDIO: u8 = 24;
/// Sets per-channel audio routing: `[ch_mask, audio]`.
pub const MSG_ID_UPDATE_CH_AUDIO: u8 = 25;
/// Requests one analog channel's input gain: `[analog_ch]`.
pub const MSG_ID_REQUEST_GAIN: u8 = 26;
/// Sets one analog channel's input gain: `[analog_ch, gain]`.
pub const MSG_ID_UPDATE_GAIN: u8 = 27;
/// Requests the channel enable mask.
pub const MSG_ID_REQUEST_CH_EN_MASK: u8 = 28;
/// Sets the channel enable mask: `[mask]`.
pub const MSG_ID_UPDATE_CH_EN_MASK: u8 = 29;
/// Requests a parameter target: `[ch_mask, param:4|target:4]`.
pub const MSG_ID_REQUEST_CH_PARAM: u8 = 30;
/// Sets a parameter target: `[ch_mask, param:4|target:4, value:16]`.
pub const MSG_ID_UPDATE_CH_PARAM: u8 = 31;
/// Recompute cycling cadences: `[ch_mask, param]` (0xff = all params).
pub const MSG_ID_CH_PARAM_UPDATE: u8 = 32;
/// Requests channel status: `[ch_mask]`.
pub const MSG_ID_REQUEST_CH_STATUS: u8 = 33;
/// Channel status message: `[ch_mask, status]`.
pub const MSG_ID_CH_STATUS: u8 = 34;
/// Requests the sequencer masks.
pub const MSG_ID_REQUEST_SEQ: u8 = 35;
/// Sets the sequencer masks: `[wrap, count, mask × count]`.
pub const MSG_ID_UPDATE_SEQ: u8 = 36;
/// Requests the sequencer wrap count.
pub const MSG_ID_REQUEST_SEQ_COUNT: u8 = 37;
/// Sets the sequencer wrap count: `[count]`.
pub const MSG_ID_UPDATE_SEQ_COUNT: u8 = 38;
/// Rewinds the sequencer index.
pub const MSG_ID_RESET_SEQ_INDEX: u8 = 39;
/// Requests the sequencer period.
pub const MSG_ID_REQUEST_SEQ_PERIOD: u8 = 40;
/// Sets the sequencer period in milliseconds: `[period_ms:16]`.
pub const MSG_ID_UPDATE_SEQ_PERIOD: u8 = 41;
/// Requests an action slot: `[a_index]`.
pub const MSG_ID_REQUEST_ACTION: u8 = 42;
/// Sets an action slot:
/// `[a_index, enabled, type, ch_mask, param, target, value:16]`.
pub const MSG_ID_UPDATE_ACTION: u8 = 43;
/// Runs an action range: `[start, end]`.
pub const MSG_ID_RUN_ACTION_LIST: u8 = 44;
/// Requests a trigger slot: `[trig_index]`.
pub const MSG_ID_REQUEST_TRIGGER: u8 = 50;
/// Sets a trigger slot (see [`Machine::handle_message`] for the packing).
pub const MSG_ID_UPDATE_TRIGGER: u8 = 51;
/// Requests the raw trigger line states.
pub const MSG_ID_REQUEST_TRIGGER_STATE: u8 = 52;
/// Trigger line states reply: `[state_mask]`.
pub const MSG_ID_TRIGGER_STATE: u8 = 53;

/// Command decode failure. The transport reports these back however it
/// likes; the engine state is untouched when one is returned.
#[derive(Debug, Clone, Copy, PartialEq, Eq, Error)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum ProtocolError {
    /// Zero-length message.
    #[error("empty message")]
    Empty,
    /// Payload shorter than the id requires.
    #[error("message truncated")]
    Truncated,
    /// Unrecognized message id.
    #[error("unknown message id {0}")]
    UnknownId(u8),
    /// A field decoded outside its legal range.
    #[error("field out of range")]
    BadValue,
}

/// Side effects the embedding binary must carry out after the handler
/// returns (the engine cannot halt or reboot itself).
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
#[cfg_attr(feature = "defmt", derive(defmt::Format))]
pub enum SystemRequest {
    /// Power latch released; stop cleanly.
    Shutdown,
    /// Scrammed; enter the USB bootloader.
    ResetToBootloader,
}

fn byte(payload: &[u8], index: usize) -> Result<u8, ProtocolError> {
    payload
        .get(index)
        .copied()
        .ok_or(ProtocolError::Truncated)
}

fn be_u16(payload: &[u8], index: usize) -> Result<u16, ProtocolError> {
    Ok(u16::from_be_bytes([
        byte(payload, index)?,
        byte(payload, index + 1)?,
    ]))
}

fn fraction_to_u16(value: f32) -> u16 {
    libm::roundf(value.clamp(0.0, 1.0) * 65_535.0) as u16
}

impl Machine {
    /// Handle one decoded host message.
    ///
    /// `msg` is `[id, payload...]`; replies are passed to `reply` as complete
    /// messages in the same shape.
    ///
    /// # Errors
    ///
    /// [`ProtocolError`] on malformed input; the machine state is unchanged.
    pub fn handle_message<B: Board>(
        &mut self,
        board: &mut B,
        msg: &[u8],
        reply: &mut dyn FnMut(&[u8]),
    ) -> Result<Option<SystemRequest>, ProtocolError> {
        let (&id, payload) = msg.split_first().ok_or(ProtocolError::Empty)?;

        match id {
            MSG_ID_REQUEST_VERSION => {
                reply(&[MSG_ID_VERSION, VERSION_PCB_REV, VERSION_MAJOR, VERSION_MINOR]);
            }

            MSG_ID_REQUEST_ERR => {
                let err = self.shared.errors().to_be_bytes();
                reply(&[MSG_ID_ERR, err[0], err[1]]);
            }

            MSG_ID_SHUTDOWN => {
                log::info!("host requested shutdown");
                board.release_power_latch();
                return Ok(Some(SystemRequest::Shutdown));
            }

            MSG_ID_RESET_TO_USB_BOOT => {
                log::info!("host requested bootloader");
                self.output.scram(board, &self.shared);
                board.enter_bootloader();
                return Ok(Some(SystemRequest::ResetToBootloader));
            }

            MSG_ID_REQUEST_MIC_PIP_EN => {
                reply(&[MSG_ID_UPDATE_MIC_PIP_EN, u8::from(self.frontend.mic_power())]);
            }

            MSG_ID_UPDATE_MIC_PIP_EN => {
                let enable = byte(payload, 0)? != 0;
                self.frontend.set_mic_power(board, enable);
            }

            MSG_ID_REQUEST_MIC_GAIN => {
                reply(&[MSG_ID_UPDATE_MIC_GAIN, self.frontend.preamp_gain()]);
            }

            MSG_ID_UPDATE_MIC_GAIN => {
                let gain = byte(payload, 0)?;
                self.frontend.set_preamp_gain(board, &self.shared, gain);
            }

            MSG_ID_REQUEST_MAX_POWER => {
                let ch_mask = byte(payload, 0)?;
                for ch in channels(ch_mask) {
                    let value = fraction_to_u16(self.output.channel(ch).max_power).to_be_bytes();
                    reply(&[MSG_ID_UPDATE_MAX_POWER, 1 << ch, value[0], value[1]]);
                }
            }

            MSG_ID_UPDATE_MAX_POWER => {
                let ch_mask = byte(payload, 0)?;
                let raw = be_u16(payload, 1)?;
                for ch in channels(ch_mask) {
                    let old_raw = fraction_to_u16(self.output.channel(ch).max_power);
                    if raw != old_raw {
                        self.output.channel_mut(ch).max_power = f32::from(raw) / 65_535.0;
                        self.shared.latch_require_zero(1 << ch);
                    }
                }
            }

            MSG_ID_REQUEST_REQUIRE_ZERO => {
                reply(&[MSG_ID_UPDATE_REQUIRE_ZERO, self.shared.require_zero()]);
            }

            MSG_ID_UPDATE_REQUIRE_ZERO => {
                let flags = byte(payload, 0)?;
                self.shared.store_require_zero(flags);
            }

            MSG_ID_REQUEST_CH_AUDIO => {
                let ch_mask = byte(payload, 0)?;
                for ch in channels(ch_mask) {
                    reply(&[MSG_ID_UPDATE_CH_AUDIO, 1 << ch, self.generator.audio_config(ch).0]);
                }
            }

            MSG_ID_UPDATE_CH_AUDIO => {
                let ch_mask = byte(payload, 0)?;
                let audio = byte(payload, 1)?;
                for ch in channels(ch_mask) {
                    if self.generator.audio_config(ch).0 != audio {
                        self.generator.set_audio_config(ch, AudioConfig(audio));
                        self.shared.latch_require_zero(1 << ch);
                    }
                }
            }

            MSG_ID_REQUEST_GAIN => {
                let analog_ch = byte(payload, 0)?;
                let gain = self.frontend.gain(AnalogChannel::from_u8(analog_ch));
                reply(&[MSG_ID_UPDATE_GAIN, analog_ch, gain]);
            }

            MSG_ID_UPDATE_GAIN => {
                let analog_ch = AnalogChannel::from_u8(byte(payload, 0)?);
                let gain = byte(payload, 1)?;
                self.frontend.set_gain(board, &self.shared, analog_ch, gain);
            }

            MSG_ID_REQUEST_CH_EN_MASK => {
                reply(&[MSG_ID_UPDATE_CH_EN_MASK, self.shared.en_mask()]);
            }

            MSG_ID_UPDATE_CH_EN_MASK => {
                let mask = byte(payload, 0)?;
                let changed = self.shared.en_mask() ^ mask;
                self.shared.store_en_mask(mask);
                self.shared.latch_require_zero(changed);
            }

            MSG_ID_REQUEST_CH_PARAM => {
                let ch_mask = byte(payload, 0)?;
                let pt = byte(payload, 1)?;
                let (param, target) = decode_param_target(pt)?;
                for ch in channels(ch_mask) {
                    let value = self.generator.params.get(ch, param, target).to_be_bytes();
                    reply(&[MSG_ID_UPDATE_CH_PARAM, 1 << ch, pt, value[0], value[1]]);
                }
            }

            MSG_ID_UPDATE_CH_PARAM => {
                let ch_mask = byte(payload, 0)?;
                let (param, target) = decode_param_target(byte(payload, 1)?)?;
                let value = be_u16(payload, 2)?;
                for ch in channels(ch_mask) {
                    self.generator.params.set(ch, param, target, value);
                }
            }

            MSG_ID_CH_PARAM_UPDATE => {
                let ch_mask = byte(payload, 0)?;
                let param = byte(payload, 1)?;
                for ch in channels(ch_mask) {
                    if param == 0xFF {
                        for p in Param::ALL {
                            self.generator.params.update(ch, p);
                        }
                    } else {
                        let p = Param::from_u8(param).ok_or(ProtocolError::BadValue)?;
                        self.generator.params.update(ch, p);
                    }
                }
            }

            MSG_ID_REQUEST_CH_STATUS => {
                let ch_mask = byte(payload, 0)?;
                for ch in channels(ch_mask) {
                    reply(&[MSG_ID_CH_STATUS, 1 << ch, self.output.channel(ch).status.to_u8()]);
                }
            }

            MSG_ID_CH_STATUS => {
                let ch_mask = byte(payload, 0)?;
                let status = ChannelStatus::from_u8(byte(payload, 1)?);
                for ch in channels(ch_mask) {
                    // Fault is absorbing; the host cannot talk a channel out
                    // of it.
                    if self.output.channel(ch).status != ChannelStatus::Fault {
                        self.output.channel_mut(ch).status = status;
                    }
                }
            }

            MSG_ID_REQUEST_SEQ => {
                let count = self.generator.sequencer.count();
                let mut out: Vec<u8, 260> = Vec::new();
                let _ = out.push(MSG_ID_UPDATE_SEQ);
                let _ = out.push(1);
                let _ = out.push(count);
                let _ = out.extend_from_slice(&self.generator.sequencer.masks()[..count as usize]);
                reply(&out);
            }

            MSG_ID_UPDATE_SEQ => {
                let wrap = byte(payload, 0)? != 0;
                let count = byte(payload, 1)? as usize;
                let masks = payload.get(2..2 + count).ok_or(ProtocolError::Truncated)?;
                self.generator.sequencer.load(masks, wrap);
            }

            MSG_ID_REQUEST_SEQ_COUNT => {
                reply(&[MSG_ID_UPDATE_SEQ_COUNT, self.generator.sequencer.count()]);
            }

            MSG_ID_UPDATE_SEQ_COUNT => {
                self.generator.sequencer.set_count(byte(payload, 0)?);
            }

            MSG_ID_RESET_SEQ_INDEX => {
                self.generator.sequencer.reset_index();
            }

            MSG_ID_REQUEST_SEQ_PERIOD => {
                let ms = ((self.generator.sequencer.period_us() / 1_000).min(65_535) as u16)
                    .to_be_bytes();
                reply(&[MSG_ID_UPDATE_SEQ_PERIOD, ms[0], ms[1]]);
            }

            MSG_ID_UPDATE_SEQ_PERIOD => {
                let ms = be_u16(payload, 0)?;
                self.generator.sequencer.set_period_us(u32::from(ms) * 1_000);
            }

            MSG_ID_REQUEST_ACTION => {
                let index = byte(payload, 0)?;
                let action = self.actions.get(index);
                let value = action.value.to_be_bytes();
                reply(&[
                    MSG_ID_UPDATE_ACTION,
                    index,
                    u8::from(action.enabled),
                    action.kind.to_u8(),
                    action.ch_mask,
                    action.param as u8,
                    action.target as u8,
                    value[0],
                    value[1],
                ]);
            }

            MSG_ID_UPDATE_ACTION => {
                let index = byte(payload, 0)?;
                let action = Action {
                    enabled: byte(payload, 1)? != 0,
                    kind: ActionKind::from_u8(byte(payload, 2)?).ok_or(ProtocolError::BadValue)?,
                    ch_mask: byte(payload, 3)?,
                    param: Param::from_u8(byte(payload, 4)?).ok_or(ProtocolError::BadValue)?,
                    target: Target::from_u8(byte(payload, 5)?).ok_or(ProtocolError::BadValue)?,
                    value: be_u16(payload, 6)?,
                };
                self.actions.set(index, action);
            }

            MSG_ID_RUN_ACTION_LIST => {
                let start = byte(payload, 0)?;
                let end = byte(payload, 1)?;
                self.run_actions(board, start, end);
            }

            MSG_ID_REQUEST_TRIGGER => {
                let index = byte(payload, 0)?;
                let t = self.triggers.get(index);
                let threshold = fraction_to_u16(t.threshold).to_be_bytes();
                let min_period_ms =
                    (((t.min_period_us / 1_000).min(65_535)) as u16).to_be_bytes();
                reply(&[
                    MSG_ID_UPDATE_TRIGGER,
                    index,
                    (t.input_invert_mask << 4) | (t.input_mask & 0x0F),
                    (u8::from(t.repeating) << 7) | (u8::from(t.output_invert) << 6) | (t.op as u8),
                    (u8::from(t.enabled) << 7)
                        | (u8::from(t.threshold_invert) << 6)
                        | (u8::from(t.require_both) << 5)
                        | (t.input_audio as u8),
                    threshold[0],
                    threshold[1],
                    min_period_ms[0],
                    min_period_ms[1],
                    t.action_start,
                    t.action_end,
                ]);
            }

            MSG_ID_UPDATE_TRIGGER => {
                let index = byte(payload, 0)?;
                let masks = byte(payload, 1)?;
                let ops = byte(payload, 2)?;
                let flags = byte(payload, 3)?;
                let trigger = Trigger {
                    enabled: flags & 0x80 != 0,
                    input_mask: masks & 0x0F,
                    input_invert_mask: masks >> 4,
                    op: TriggerOp::from_u8(ops & 0x3F).ok_or(ProtocolError::BadValue)?,
                    output_invert: ops & 0x40 != 0,
                    repeating: ops & 0x80 != 0,
                    input_audio: AnalogChannel::from_u8(flags & 0x1F),
                    threshold: f32::from(be_u16(payload, 4)?) / 65_535.0,
                    threshold_invert: flags & 0x40 != 0,
                    require_both: flags & 0x20 != 0,
                    min_period_us: u32::from(be_u16(payload, 6)?) * 1_000,
                    action_start: byte(payload, 8)?,
                    action_end: byte(payload, 9)?,
                };
                self.triggers.set(index, trigger);
            }

            MSG_ID_REQUEST_TRIGGER_STATE => {
                reply(&[MSG_ID_TRIGGER_STATE, self.triggers.input_states()]);
            }

            _ => return Err(ProtocolError::UnknownId(id)),
        }

        Ok(None)
    }
}

fn decode_param_target(pt: u8) -> Result<(Param, Target), ProtocolError> {
    let param = Param::from_u8(pt >> 4).ok_or(ProtocolError::BadValue)?;
    let target = Target::from_u8(pt & 0x0F).ok_or(ProtocolError::BadValue)?;
    Ok((param, target))
}

#[cfg(test)]
#[allow(clippy::unwrap_used)]
mod tests {
    use super::*;

    #[test]
    fn param_target_byte_round_trip() {
        let (param, target) = decode_param_target(0x21).unwrap();
        assert_eq!(param, Param::PulseWidth);
        assert_eq!(target, Target::Min);

        assert!(decode_param_target(0xF0).is_err());
        assert!(decode_param_target(0x0F).is_err());
    }

    #[test]
    fn fraction_encoding_saturates() {
        assert_eq!(fraction_to_u16(0.0), 0);
        assert_eq!(fraction_to_u16(1.0), 65_535);
        assert_eq!(fraction_to_u16(2.0), 65_535);
        assert_eq!(fraction_to_u16(-1.0), 0);
        assert_eq!(fraction_to_u16(0.5), 32_768);
    }
}
