//! Property-style checks over the emitter model and the parameter engine.

use proptest::prelude::*;

use platform::emitter::{pack_pulse, unpack_pulse, PW_MAX};
use pulsegen::params::{mode, ParamBank};
use pulsegen::{Param, Target};

proptest! {
    /// Gate exclusivity and width fidelity: for any pulse word, gate A is
    /// high exactly pos µs, gate B exactly neg µs, separated by ≥ 1 µs with
    /// both low, and the two gates are never high together.
    #[test]
    fn gate_trace_is_exclusive_and_faithful(pos in 0u16..=PW_MAX, neg in 0u16..=PW_MAX) {
        let segments = emulator::trace_word(pack_pulse(pos, neg));

        for s in &segments {
            prop_assert!(!(s.gate_a && s.gate_b), "shoot-through in trace");
        }

        let a_total: u32 = segments.iter().filter(|s| s.gate_a).map(|s| s.duration_us).sum();
        let b_total: u32 = segments.iter().filter(|s| s.gate_b).map(|s| s.duration_us).sum();
        prop_assert_eq!(a_total, u32::from(pos));
        prop_assert_eq!(b_total, u32::from(neg));

        // The span between the A and B halves keeps both gates low for at
        // least a microsecond.
        prop_assert!(!segments[1].gate_a && !segments[1].gate_b);
        prop_assert!(segments[1].duration_us >= 1);
    }

    /// Word packing round-trips any representable pair of half-widths.
    #[test]
    fn pulse_word_round_trips(pos in 0u16..=PW_MAX, neg in 0u16..=PW_MAX) {
        prop_assert_eq!(unpack_pulse(pack_pulse(pos, neg)), (pos, neg));
    }

    /// MIN ≤ VALUE ≤ MAX holds after every VALUE write.
    #[test]
    fn value_writes_respect_min_max(
        bounds in (0u16..=u16::MAX, 0u16..=u16::MAX),
        value in 0u16..=u16::MAX,
    ) {
        let (a, b) = bounds;
        let (min, max) = (a.min(b), a.max(b));

        let mut bank = ParamBank::new();
        bank.set(1, Param::Power, Target::Min, min);
        bank.set(1, Param::Power, Target::Max, max);
        bank.set(1, Param::Power, Target::Value, value);

        let v = bank.get(1, Param::Power, Target::Value);
        prop_assert!(v >= min && v <= max);
    }

    /// Cycling in any mode never drives VALUE outside [MIN, MAX].
    #[test]
    fn cycling_never_escapes_min_max(
        bounds in (0u16..=u16::MAX, 0u16..=u16::MAX),
        start in 0u16..=u16::MAX,
        m in 1u16..=6,
        rate in 1u16..=u16::MAX,
    ) {
        let (a, b) = bounds;
        let (min, max) = (a.min(b), a.max(b));

        let mut bank = ParamBank::new();
        bank.set(0, Param::Power, Target::Min, min);
        bank.set(0, Param::Power, Target::Max, max);
        bank.set(0, Param::Power, Target::Rate, rate);
        bank.set(0, Param::Power, Target::Mode, m);
        bank.set(0, Param::Power, Target::Value, start);
        bank.update(0, Param::Power);

        let mut now = 0u32;
        for _ in 0..2_000 {
            now = now.wrapping_add(1_000);
            bank.step(0, Param::Power, now);
            let v = bank.get(0, Param::Power, Target::Value);
            prop_assert!(v >= min && v <= max, "v={} outside [{}, {}]", v, min, max);
        }
    }

    /// The one-shot modes end with cycling disabled and flag bits intact.
    #[test]
    fn one_shot_modes_self_disable(hidden in proptest::bool::ANY) {
        let flags = if hidden { mode::FLAG_HIDDEN } else { 0 };
        let mut bank = ParamBank::new();
        bank.set(0, Param::Power, Target::Min, 0);
        bank.set(0, Param::Power, Target::Max, 100);
        bank.set(0, Param::Power, Target::Rate, 60_000);
        bank.set(0, Param::Power, Target::Mode, mode::UP | flags);
        bank.set(0, Param::Power, Target::Value, 0);
        bank.update(0, Param::Power);

        let mut now = 0u32;
        for _ in 0..10_000 {
            now = now.wrapping_add(500);
            bank.step(0, Param::Power, now);
        }
        prop_assert_eq!(bank.get(0, Param::Power, Target::Value), 100);
        prop_assert_eq!(bank.get(0, Param::Power, Target::Mode), flags);
    }
}
