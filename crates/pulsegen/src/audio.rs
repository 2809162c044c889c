//! Audio-driven pulse extraction.
//!
//! Turns a live capture window into two things: a normalized amplitude for
//! power modulation, and (when asked) one queued pulse per rising zero
//! crossing, each stamped at the estimated time its sample was taken plus a
//! one-window lead so the scheduler still sees it in the future.

use platform::capture::{
    CaptureSource, ADC_CAPTURE_DURATION_US, ADC_SINGLE_SAMPLE_US, ADC_ZERO_POINT,
};
use platform::time::elapsed_us;

use crate::analog::AnalogCapture;
use crate::channel::AnalogChannel;
use crate::output::Output;

/// Amplitudes below this are treated as silence.
const NOISE_GATE: f32 = 0.05;

/// A window is "low frequency" when no full cycle fits in it, judged by the
/// imbalance between samples above and below the zero point.
const LOW_FREQ_IMBALANCE: i32 = 50;

/// Per-generator-channel audio processing state.
#[derive(Debug, Clone, Copy, Default)]
pub struct AudioState {
    /// Rolling last two signed sample values (`[0]` newest).
    last: [i32; 2],
    /// `capture_end_us` of the last window this channel processed.
    last_window_us: u32,
    /// Amplitude computed for that window (returned while it repeats).
    amplitude: f32,
    /// Timestamp of the last zero-crossing pulse this channel emitted.
    last_pulse_us: u32,
}

/// Process the latest window of `source` for generator channel `ch_index`.
///
/// Returns the window's normalized amplitude. While the capture has not
/// advanced since this channel last looked, the previously computed amplitude
/// is returned with no side effects: recomputing over identical samples would
/// waste the realtime margin and make amplitude-gated power flutter between
/// windows.
#[allow(clippy::too_many_arguments)]
pub fn process<C: CaptureSource>(
    state: &mut AudioState,
    capture: &mut AnalogCapture,
    source: &mut C,
    audio_src: AnalogChannel,
    generate_crossings: bool,
    ch_index: usize,
    pulse_width_us: u16,
    min_period_us: u32,
    output: &mut Output,
) -> f32 {
    let Some(window) = capture.fetch(source, audio_src, true) else {
        return 0.0;
    };

    if window.capture_end_us == state.last_window_us {
        return state.amplitude;
    }
    state.last_window_us = window.capture_end_us;

    let mut amplitude = window.stats.amplitude;
    if amplitude < NOISE_GATE {
        amplitude = 0.0;
    }
    state.amplitude = amplitude;
    if amplitude == 0.0 {
        return 0.0;
    }

    if generate_crossings {
        let imbalance = i32::from(window.stats.above) - i32::from(window.stats.below);
        let low_freq = imbalance.abs() > LOW_FREQ_IMBALANCE;
        let start_us = window.capture_end_us.wrapping_sub(ADC_CAPTURE_DURATION_US);

        for (i, &raw) in window.samples.iter().enumerate() {
            let value = i32::from(ADC_ZERO_POINT) - i32::from(raw);

            // Rising crossing; in low-frequency windows additionally require
            // a non-falling history to reject noise wobble around zero.
            let rising =
                value > 0 && state.last[0] <= 0 && (!low_freq || state.last[0] >= state.last[1]);

            if rising {
                let sample_time_us = start_us.wrapping_add(i as u32 * ADC_SINGLE_SAMPLE_US);
                if elapsed_us(sample_time_us, state.last_pulse_us) >= min_period_us {
                    state.last_pulse_us = sample_time_us;
                    output.queue_pulse(
                        ch_index,
                        pulse_width_us,
                        pulse_width_us,
                        sample_time_us.wrapping_add(ADC_CAPTURE_DURATION_US),
                    );
                }
            }

            state.last[1] = state.last[0];
            state.last[0] = value;
        }
    }

    amplitude
}
