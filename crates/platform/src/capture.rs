//! Free-running ADC capture seam.
//!
//! The hardware samples four analog inputs round-robin at
//! [`ADC_SAMPLES_PER_SECOND`] each, DMA-writing into a self-chaining
//! ping-pong buffer pair. The completion IRQ only publishes a ready byte and
//! a completion timestamp; everything else (deinterleave, statistics) happens
//! on the control core when a consumer asks.
//!
//! Ready byte layout, as published by the IRQ:
//! - bit 0: index of the buffer that just completed
//! - bits 1..=4: per-analog-channel "fresh data" flags, indexed by the
//!   channel's numeric id (sense = 1, mic = 2, left = 3, right = 4)

/// Samples per second per analog channel.
pub const ADC_SAMPLES_PER_SECOND: u32 = 44_100;

/// Channels in the ADC round-robin.
pub const ADC_SAMPLED_CHANNELS: usize = 4;

/// Interleaved samples per DMA buffer.
pub const ADC_CAPTURE_COUNT: usize = 1024;

/// Samples per channel in one capture window.
pub const ADC_SAMPLE_COUNT: usize = ADC_CAPTURE_COUNT / ADC_SAMPLED_CHANNELS;

/// Midcode of the 12-bit converter; the AC-coupled inputs idle here.
pub const ADC_ZERO_POINT: u16 = 2048;

/// Wall time covered by one per-channel capture window, in microseconds.
pub const ADC_CAPTURE_DURATION_US: u32 =
    ADC_SAMPLE_COUNT as u32 * (1_000_000 / ADC_SAMPLES_PER_SECOND);

/// Duration of a single per-channel sample, in microseconds.
pub const ADC_SINGLE_SAMPLE_US: u32 = ADC_CAPTURE_DURATION_US / ADC_SAMPLE_COUNT as u32;

/// Ready-byte bit holding the completed buffer index.
pub const READY_INDEX_BIT: u8 = 0x01;

/// The ping-pong DMA pair as seen by the control core.
///
/// `ready_flags` / `done_time_us` mirror the two volatile cells the IRQ
/// writes; implementations return fresh loads on every call and consumers
/// take a local copy before acting on it.
pub trait CaptureSource {
    /// Current ready byte (buffer index + per-channel freshness bits).
    fn ready_flags(&self) -> u8;

    /// Clear one channel's freshness bit after consuming its stripe.
    fn clear_ready(&mut self, channel_bit: u8);

    /// Timestamp of the most recent buffer completion.
    fn done_time_us(&self) -> u32;

    /// Borrow a raw interleaved capture buffer (`index` is 0 or 1).
    fn raw_buffer(&self, index: usize) -> &[u16; ADC_CAPTURE_COUNT];
}
