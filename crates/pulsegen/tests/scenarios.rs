//! End-to-end scenarios: the machine wired to the emulated board.


#![allow(clippy::unwrap_used, clippy::expect_used)]
mod common;

use common::{ready_machine, run_for};
use platform::Board;
use pulsegen::channel::{AUDIO_MODE_POWER, AUDIO_MODE_PULSE};
use pulsegen::{AnalogChannel, AudioConfig, Param, Target};

const MIC_STRIPE: usize = 1;

/// S1: steady pulsing — 180 Hz, 150 µs, half power, 1 s on / 1 s off.
#[test]
fn steady_pulsing_alternates_on_and_off() {
    let (mut machine, mut board) = ready_machine();
    machine.set_parameter(0, Param::Frequency, Target::Value, 1800);
    machine.set_parameter(0, Param::PulseWidth, Target::Value, 150);
    machine.set_parameter(0, Param::Power, Target::Value, 32_768);
    machine.set_parameter(0, Param::OnTime, Target::Value, 1_000);
    machine.set_parameter(0, Param::OffTime, Target::Value, 1_000);
    machine.set_en_mask(0x01);

    let dac_baseline = board.dac.dac_history(0).len();
    let pulses = run_for(&mut machine, &mut board, 2_200_000, 50);

    assert!(pulses.iter().all(|p| p.channel == 0));
    assert!(pulses.iter().all(|p| p.pos_us == 150 && p.neg_us == 150));

    // One full ON second plus a slice of the next: ~180-220 pulses.
    assert!(
        (150..=260).contains(&pulses.len()),
        "pulse count {}",
        pulses.len()
    );

    // Spacing within the ON window tracks 180 Hz (5555 µs), and the OFF
    // second shows up as one large gap.
    let diffs: Vec<u32> = pulses
        .windows(2)
        .map(|w| w[1].pushed_at_us.wrapping_sub(w[0].pushed_at_us))
        .collect();
    let largest = diffs.iter().copied().max().unwrap_or(0);
    assert!(largest >= 900_000, "expected an OFF gap, largest {largest}");
    let on_diffs: Vec<u32> = diffs.into_iter().filter(|d| *d < 100_000).collect();
    assert!(!on_diffs.is_empty());
    let mean: u32 = on_diffs.iter().sum::<u32>() / on_diffs.len() as u32;
    assert!(
        (5_400..=5_800).contains(&mean),
        "mean ON spacing {mean} µs"
    );

    // Power oscillates between half output and zero output.
    let cal = machine.cal_value(0);
    let zero_code = cal + 400;
    let half_code = cal + 400 - 1000;
    let codes = &board.dac.dac_history(0)[dac_baseline..];
    assert!(codes.contains(&zero_code), "OFF writes the zero-output code");
    assert!(codes.contains(&half_code), "ON writes the half-power code");
    assert!(codes
        .iter()
        .all(|c| (half_code..=zero_code).contains(c)));
}

/// S2: UP_RESET power ramp sweeps 0→65535 and snaps back, without touching
/// the pulse cadence.
#[test]
fn power_ramp_up_reset_sweeps_and_resets() {
    let (mut machine, mut board) = ready_machine();
    machine.set_parameter(0, Param::OnTime, Target::Value, 60_000);
    machine.set_parameter(0, Param::Power, Target::Min, 0);
    machine.set_parameter(0, Param::Power, Target::Max, 65_535);
    machine.set_parameter(0, Param::Power, Target::Rate, 1_000);
    machine.set_parameter(0, Param::Power, Target::Mode, 3); // UP_RESET
    machine.update_parameter(0, Param::Power);
    machine.set_parameter(0, Param::Power, Target::Value, 0);
    machine.set_en_mask(0x01);

    let mut max_seen = 0u16;
    let mut reset_seen = false;
    let mut prev = 0u16;
    let mut pulse_count = 0usize;
    let mut elapsed = 0u32;
    while elapsed < 2_500_000 {
        machine.control_tick(&mut board);
        machine.realtime_tick(&mut board);
        pulse_count += board.drain_emitted().len();

        let v = machine.parameter(0, Param::Power, Target::Value);
        max_seen = max_seen.max(v);
        if prev > 60_000 && v < 1_000 {
            reset_seen = true;
        }
        prev = v;

        board.advance(10);
        elapsed += 10;
    }

    assert!(max_seen >= 65_000, "sweep approached MAX, saw {max_seen}");
    assert!(reset_seen, "value snapped back to MIN after MAX");
    // Cadence untouched: ~180 Hz over 2.5 s.
    assert!(
        (380..=520).contains(&pulse_count),
        "pulse count {pulse_count}"
    );
}

/// S3: an ENABLE action with a 500 ms value re-disables via the alarm.
#[test]
fn enable_action_reverses_after_delay() {
    let (mut machine, mut board) = ready_machine();

    // Slot 0: ENABLE channel 1 for 500 ms.
    machine
        .handle_message(&mut board, &[43, 0, 1, 4, 0x02, 0, 0, 0x01, 0xF4], &mut |_| {})
        .expect("program action");
    machine
        .handle_message(&mut board, &[44, 0, 1], &mut |_| {})
        .expect("run action list");
    assert_eq!(machine.en_mask() & 0x02, 0x02, "bit set immediately");

    let mut elapsed = 0u32;
    while machine.en_mask() & 0x02 != 0 {
        assert!(elapsed < 600_000, "bit should clear at ~500 ms");
        machine.control_tick(&mut board);
        board.advance(1_000);
        elapsed += 1_000;
    }
    assert!(
        (490_000..=520_000).contains(&elapsed),
        "cleared after {elapsed} µs"
    );
}

/// S4: audio in POWER mode halves the output level, adds no pulses.
#[test]
fn audio_power_mode_scales_output() {
    let (mut machine, mut board) = ready_machine();
    machine.set_parameter(2, Param::OnTime, Target::Value, 60_000);
    machine.set_audio_config(
        2,
        AudioConfig(AUDIO_MODE_POWER | AnalogChannel::Mic as u8),
    );
    machine.set_en_mask(0x04);

    board.feed_sine(MIC_STRIPE, 440.0, 0.5, 0.0);
    let dac_baseline = board.dac.dac_history(2).len();
    let pulses = run_for(&mut machine, &mut board, 100_000, 50);

    // Periodic emission still runs at the default 180 Hz — POWER mode does
    // not generate extra pulses.
    assert!(pulses.iter().all(|p| p.channel == 2));
    assert!(
        (12..=25).contains(&pulses.len()),
        "pulse count {}",
        pulses.len()
    );

    // Full POWER value × 0.5 amplitude → codes near cal + 400 − 1000.
    let cal = machine.cal_value(2);
    let codes = &board.dac.dac_history(2)[dac_baseline..];
    assert!(!codes.is_empty());
    for code in codes {
        let span = i32::from(cal) + 400 - i32::from(*code);
        assert!(
            (985..=1015).contains(&span),
            "span {span} should track amplitude 0.5"
        );
    }
}

/// S5: audio in PULSE mode emits one pulse per rising zero crossing,
/// throttled to 500 Hz.
#[test]
fn audio_pulse_mode_tracks_zero_crossings() {
    let (mut machine, mut board) = ready_machine();
    machine.set_parameter(0, Param::OnTime, Target::Value, 60_000);
    machine.set_parameter(0, Param::Frequency, Target::Value, 0);
    machine.set_audio_config(
        0,
        AudioConfig(AUDIO_MODE_PULSE | AnalogChannel::Mic as u8),
    );
    machine.set_en_mask(0x01);

    let window_us = platform::capture::ADC_CAPTURE_DURATION_US;
    let mut phase = board.feed_sine(MIC_STRIPE, 100.0, 0.8, 0.0);
    let mut since_feed = 0u32;
    let mut pulses = Vec::new();
    let mut elapsed = 0u32;
    while elapsed < 500_000 {
        machine.control_tick(&mut board);
        machine.realtime_tick(&mut board);
        board.stamp_pushed(board.now_us());
        pulses.extend(board.drain_emitted());

        board.advance(50);
        elapsed += 50;
        since_feed += 50;
        if since_feed >= window_us {
            since_feed = 0;
            phase = board.feed_sine(MIC_STRIPE, 100.0, 0.8, phase);
        }
    }

    // One rising crossing per 10 ms cycle.
    assert!(
        (35..=60).contains(&pulses.len()),
        "pulse count {}",
        pulses.len()
    );
    for w in pulses.windows(2) {
        let gap = w[1].pushed_at_us.wrapping_sub(w[0].pushed_at_us);
        assert!(gap >= 2_000, "throttle violated: {gap} µs");
    }
}

/// Require-zero latch: once an audio-source change latches a channel, power
/// is forced to the zero-output code until max_power drops to ≤ 1 %.
#[test]
fn require_zero_forces_zero_until_acknowledged() {
    let (mut machine, mut board) = ready_machine();
    machine.set_parameter(0, Param::OnTime, Target::Value, 60_000);
    machine.set_max_power(0, 0.5);
    machine.set_en_mask(0x01);

    // Changing the audio source over the wire latches require-zero.
    machine
        .handle_message(
            &mut board,
            &[25, 0x01, AUDIO_MODE_PULSE | AnalogChannel::Mic as u8],
            &mut |_| {},
        )
        .expect("audio update");
    assert_eq!(machine.require_zero_mask() & 0x01, 0x01);

    let cal = machine.cal_value(0);
    let zero_code = cal + 400;

    let baseline = board.dac.dac_history(0).len();
    run_for(&mut machine, &mut board, 50_000, 50);
    let codes = &board.dac.dac_history(0)[baseline..];
    assert!(!codes.is_empty());
    assert!(
        codes.iter().all(|c| *c == zero_code),
        "latched channel writes only the zero-output code"
    );
    assert_eq!(machine.require_zero_mask() & 0x01, 0x01, "still latched");

    // Operator acknowledges by dropping the ceiling near zero.
    machine.set_max_power(0, 0.005);
    run_for(&mut machine, &mut board, 20_000, 50);
    assert_eq!(machine.require_zero_mask() & 0x01, 0, "latch self-clears");
}

/// Trigger edge vs repeating semantics, observed through an Increment action.
#[test]
fn trigger_edge_fires_once_repeating_fires_per_tick() {
    let (mut machine, mut board) = ready_machine();

    // Action 0: Frequency += 10 on channel 0.
    machine
        .handle_message(&mut board, &[43, 0, 1, 2, 0x01, 1, 0, 0, 10], &mut |_| {})
        .expect("program action");

    // Trigger 0: line 1, OOO, edge-fire, no min period.
    machine
        .handle_message(
            &mut board,
            &[51, 0, 0x01, 0x01, 0x80, 0, 0, 0, 0, 0, 1],
            &mut |_| {},
        )
        .expect("program trigger");

    let run = |machine: &mut pulsegen::Machine, board: &mut emulator::SimBoard, us: u32| {
        let mut t = 0;
        while t < us {
            machine.control_tick(board);
            board.advance(1_000);
            t += 1_000;
        }
    };

    let base = machine.parameter(0, Param::Frequency, Target::Value);
    board.trigger_lines = 0x01;
    run(&mut machine, &mut board, 100_000);
    assert_eq!(
        machine.parameter(0, Param::Frequency, Target::Value),
        base + 10,
        "edge mode fires once per false→true transition"
    );

    board.trigger_lines = 0;
    run(&mut machine, &mut board, 30_000);
    board.trigger_lines = 0x01;
    run(&mut machine, &mut board, 30_000);
    assert_eq!(
        machine.parameter(0, Param::Frequency, Target::Value),
        base + 20,
        "a fresh edge fires again"
    );

    // Repeating with a 30 ms min period: ~4 fires in 100 ms.
    machine
        .handle_message(
            &mut board,
            &[51, 0, 0x01, 0x81, 0x80, 0, 0, 0, 30, 0, 1],
            &mut |_| {},
        )
        .expect("reprogram trigger");
    machine.set_parameter(0, Param::Frequency, Target::Value, 1800);
    run(&mut machine, &mut board, 100_000);
    let fired = (machine.parameter(0, Param::Frequency, Target::Value) - 1800) / 10;
    assert!(
        (3..=4).contains(&fired),
        "repeating honors min_period, fired {fired}"
    );
}

/// The command surface round-trips state and replies per-channel.
#[test]
fn command_surface_round_trips() {
    let (mut machine, mut board) = ready_machine();

    let mut replies: Vec<Vec<u8>> = Vec::new();

    machine
        .handle_message(&mut board, &[2], &mut |m| replies.push(m.to_vec()))
        .expect("version request");
    assert_eq!(replies.pop(), Some(vec![3, 1, 0, 1]));

    // Set channel 1's pulse width min over the wire, read it back.
    machine
        .handle_message(&mut board, &[31, 0x02, 0x21, 0x00, 0x28], &mut |_| {})
        .expect("param update");
    machine
        .handle_message(&mut board, &[30, 0x02, 0x21], &mut |m| {
            replies.push(m.to_vec());
        })
        .expect("param request");
    assert_eq!(replies.pop(), Some(vec![31, 0x02, 0x21, 0x00, 0x28]));

    // Enable-mask update latches require-zero for changed channels.
    machine
        .handle_message(&mut board, &[29, 0x05], &mut |_| {})
        .expect("en mask");
    assert_eq!(machine.en_mask(), 0x05);
    assert_eq!(machine.require_zero_mask() & 0x05, 0x05);

    // Unknown ids and truncated payloads are rejected.
    let mut ignore = |_: &[u8]| {};
    assert!(machine.handle_message(&mut board, &[99], &mut ignore).is_err());
    assert!(machine
        .handle_message(&mut board, &[21, 0x01], &mut ignore)
        .is_err());
    assert!(machine.handle_message(&mut board, &[], &mut ignore).is_err());
}
