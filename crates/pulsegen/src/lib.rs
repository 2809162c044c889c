//! Pulse generation and output core for a four-channel isolated output stage.
//!
//! The firmware drives four transformer-isolated output channels, each an
//! adjustable DC bus (one DAC sub-channel) gated by a pair of N-FETs that
//! deliver short bipolar current pulses. This crate is the whole brain of
//! that process:
//!
//! - [`params`] — the per-channel parameter matrix and its autonomous
//!   cycling engine
//! - [`generator`] — the waveform loop turning parameters into pulse and
//!   power commands
//! - [`output`] — per-channel pulse queues, the DAC power queue, self-test
//!   calibration, and the scram path
//! - [`audio`] / [`analog`] — live audio capture, amplitude extraction, and
//!   zero-crossing pulse generation
//! - [`actions`] / [`triggers`] / [`sequencer`] — the scripting layer
//! - [`protocol`] — the transport-agnostic host command surface
//! - [`machine`] — the single long-lived value tying it all together
//!
//! Hardware is reached exclusively through the `platform` crate's traits, so
//! the entire engine runs identically against the MCU binding or the desktop
//! emulator.
//!
//! # Execution model
//!
//! Two cooperative loops share one [`Machine`]: the control loop
//! ([`Machine::control_tick`]) owns every table and the parameter matrix;
//! the realtime loop ([`Machine::realtime_tick`]) only drains the pulse and
//! power queues. The handful of words they share are atomics in
//! [`state::Shared`].

#![cfg_attr(not(test), no_std)]
#![warn(missing_docs)]

pub mod actions;
pub mod analog;
pub mod audio;
pub mod channel;
pub mod config;
pub mod generator;
pub mod machine;
pub mod output;
pub mod params;
pub mod protocol;
pub mod sequencer;
pub mod state;
pub mod triggers;

pub use channel::{AnalogChannel, AudioConfig, ChannelStatus};
pub use machine::Machine;
pub use output::InitError;
pub use params::{Param, Target};
pub use protocol::{ProtocolError, SystemRequest};
