//! Shared harness for emulator-backed engine tests.

#![allow(dead_code)]

use emulator::{EmittedPulse, SenseModel, SimBoard};
use platform::Board;
use pulsegen::Machine;

/// A board whose sense input behaves like healthy hardware: conduction
/// appears as the DAC sweeps down while a gate leg is driven.
pub fn healthy_board() -> SimBoard {
    let mut board = SimBoard::new();
    board.sense = SenseModel::Linear {
        base_code: 4000,
        volts_per_code: 1e-5,
    };
    board
}

/// Machine + healthy board, calibrated and ready to run.
pub fn ready_machine() -> (Machine, SimBoard) {
    let mut board = healthy_board();
    let mut machine = Machine::new();
    machine
        .init(&mut board)
        .expect("init on a healthy board succeeds");
    (machine, board)
}

/// Drive both loops for `duration_us` of virtual time in `step_us` slices,
/// collecting every pulse that reaches the emitter.
pub fn run_for(
    machine: &mut Machine,
    board: &mut SimBoard,
    duration_us: u32,
    step_us: u32,
) -> Vec<EmittedPulse> {
    let mut pulses = Vec::new();
    let mut elapsed = 0u32;
    while elapsed < duration_us {
        machine.control_tick(board);
        machine.realtime_tick(board);
        board.stamp_pushed(board.now_us());
        pulses.extend(board.drain_emitted());
        board.advance(step_us);
        elapsed += step_us;
    }
    pulses
}

/// First sweep code the calibration search accepts under the given linear
/// sense model, accounting for ADC quantization of the readback.
pub fn expected_cal_code(base_code: u16, volts_per_code: f32) -> Option<u16> {
    let mut code = 4000u16;
    while code > 2000 {
        let raw = (volts_per_code * f32::from(base_code.saturating_sub(code)) / 3.3 * 4096.0)
            .clamp(0.0, 4095.0) as u16;
        let volts = f32::from(raw) * 3.3 / 4096.0;
        if volts > 0.018 {
            return None;
        }
        if volts > 0.015 {
            return Some(code);
        }
        code -= 10;
    }
    None
}
