use std::sync::Arc;
use std::sync::atomic::{AtomicUsize, Ordering};
use std::time::Duration;

use runrilla_core::cancel::CancelToken;
use runrilla_core::error::RunrillaError;
use runrilla_core::flash::{FlashStage, flash_bars, weighted_zero_average};
use runrilla_core::mocks::MockBus;
use runrilla_core::protocol::Protocol;
use runrilla_core::types::{Bar, ChannelCalibration};
use runrilla_hardware::frame::UPDATE_CHALLENGE;
use runrilla_hardware::{SimBar, SimulatedBars};
use runrilla_traits::ManualClock;

fn calibrated(id: u8, mask: u8, records: &[(u64, f32)]) -> Bar {
    Bar {
        calibration: records
            .iter()
            .map(|&(z, f)| ChannelCalibration::new(z, f))
            .collect(),
        ..Bar::new(id, mask)
    }
}

fn is_challenge(tx: &[u8]) -> bool {
    tx == UPDATE_CHALLENGE.as_bytes()
}

fn is_addressed_challenge(tx: &[u8]) -> bool {
    tx.len() == UPDATE_CHALLENGE.len() + 2 && tx.ends_with(UPDATE_CHALLENGE.as_bytes())
}

/// Firmware that enters update mode but never acknowledges zero writes.
fn rejecting_zeros(tx: &[u8]) -> Vec<u8> {
    if is_challenge(tx) || is_addressed_challenge(tx) {
        return b"Enter\r\n".to_vec();
    }
    match tx.get(2) {
        Some(b'O') => b"ERR\r\n".to_vec(),
        Some(b'X') => b"OK\r\n".to_vec(),
        Some(b'R') => b"Rebooting\r\n".to_vec(),
        _ => Vec::new(),
    }
}

/// Firmware that takes zeros but never acknowledges factor writes.
fn rejecting_factors(tx: &[u8]) -> Vec<u8> {
    if is_challenge(tx) || is_addressed_challenge(tx) {
        return b"Enter\r\n".to_vec();
    }
    match tx.get(2) {
        Some(b'O') => b"OK\r\n".to_vec(),
        Some(b'X') => b"NAK\r\n".to_vec(),
        Some(b'R') => b"Rebooting\r\n".to_vec(),
        _ => Vec::new(),
    }
}

#[test]
fn weighted_zero_average_rounds_and_clamps() {
    let bar = calibrated(1, 0b0011, &[(100_000, 0.01), (101_000, 0.02)]);
    // (1000 + 2020) / 2 = 1510
    assert_eq!(weighted_zero_average(&bar), 1510);
    let negative = calibrated(1, 0b0011, &[(1000, -1.0), (10, 0.5)]);
    assert_eq!(weighted_zero_average(&negative), 0);
    let half = calibrated(1, 0b0001, &[(3, 0.5)]);
    assert_eq!(weighted_zero_average(&half), 2);
}

#[test]
fn flashes_every_bar_and_reports_stages() {
    let mut sim = SimulatedBars::new(vec![SimBar::new(1, 0b0011), SimBar::new(2, 0b1100)], "A");
    let handle = sim.handle();
    let bars = vec![
        calibrated(1, 0b0011, &[(100_000, 0.01), (101_000, 0.02)]),
        calibrated(2, 0b1100, &[(90_000, 0.05), (95_000, 0.025)]),
    ];
    let clock = ManualClock::new();
    let mut stages = Vec::new();
    let mut p = Protocol::new(&mut sim, &bars, "A").unwrap();
    flash_bars(&mut p, &bars, &clock, &CancelToken::new(), |pr| {
        stages.push((pr.stage, pr.bar_index));
    })
    .unwrap();

    assert_eq!(
        stages,
        vec![
            (FlashStage::EnterUpdate, None),
            (FlashStage::Zeros, Some(0)),
            (FlashStage::Factors, Some(0)),
            (FlashStage::Reboot, Some(0)),
            (FlashStage::Zeros, Some(1)),
            (FlashStage::Factors, Some(1)),
            (FlashStage::Reboot, Some(1)),
            (FlashStage::Done, None),
        ]
    );
    let b0 = handle.bar(0).unwrap();
    assert_eq!(b0.stored_zeros, [100_000, 101_000, 0, 0]);
    assert_eq!(b0.stored_factors, [0.01, 0.02, 1.0, 1.0]);
    assert!(!b0.update_mode);
    let b1 = handle.bar(1).unwrap();
    assert_eq!(b1.stored_zeros, [0, 0, 90_000, 95_000]);
    assert_eq!(b1.stored_factors, [1.0, 1.0, 0.05, 0.025]);
    // Nothing failed, so nothing waited.
    assert_eq!(clock.elapsed(), Duration::ZERO);
}

#[test]
fn unacknowledged_zeros_fail_after_three_attempts_without_reboot() {
    let mut bus = MockBus::new(rejecting_zeros);
    let log = bus.log();
    let bars = vec![calibrated(1, 0b0011, &[(100, 0.5), (200, 0.5)])];
    let clock = ManualClock::new();
    let mut p = Protocol::new(&mut bus, &bars, "A").unwrap();
    let err = flash_bars(&mut p, &bars, &clock, &CancelToken::new(), |_| {}).unwrap_err();

    assert_eq!(
        err.downcast_ref::<RunrillaError>(),
        Some(&RunrillaError::ZeroWriteFailure {
            bar_index: 0,
            raw_hex: "45 52 52 0D 0A".into()
        })
    );
    assert_eq!(format!("{err}"), "bar 1: cannot flash zeros [45 52 52 0D 0A]");
    assert_eq!(log.count(|l| l.starts_with("01O")), 3);
    assert_eq!(log.count(|l| l.starts_with("01X")), 0);
    assert_eq!(log.count(|l| l == "01R"), 0);
    assert_eq!(clock.elapsed(), Duration::from_millis(600));
}

#[test]
fn unacknowledged_factors_fail_after_three_attempts_without_reboot() {
    let mut bus = MockBus::new(rejecting_factors);
    let log = bus.log();
    let bars = vec![calibrated(1, 0b0011, &[(100, 0.5), (200, 0.5)])];
    let clock = ManualClock::new();
    let mut stages = Vec::new();
    let mut p = Protocol::new(&mut bus, &bars, "A").unwrap();
    let err = flash_bars(&mut p, &bars, &clock, &CancelToken::new(), |pr| {
        stages.push(pr.stage);
    })
    .unwrap_err();

    assert_eq!(
        err.downcast_ref::<RunrillaError>(),
        Some(&RunrillaError::FactorWriteFailure {
            bar_index: 0,
            raw_hex: "4E 41 4B 0D 0A".into()
        })
    );
    assert_eq!(format!("{err}"), "bar 1: cannot flash factors [4E 41 4B 0D 0A]");
    assert_eq!(log.count(|l| l.starts_with("01O")), 1);
    assert_eq!(log.count(|l| l.starts_with("01X")), 3);
    assert_eq!(log.count(|l| l == "01R"), 0);
    assert_eq!(
        stages,
        vec![FlashStage::EnterUpdate, FlashStage::Zeros, FlashStage::Factors]
    );
    assert_eq!(clock.elapsed(), Duration::from_millis(600));
}

#[test]
fn update_mode_recovers_after_rebooting_all_bars() {
    let broadcasts = Arc::new(AtomicUsize::new(0));
    let seen = Arc::clone(&broadcasts);
    let mut bus = MockBus::new(move |tx| {
        if is_challenge(tx) {
            // The first broadcast goes unanswered.
            return if seen.fetch_add(1, Ordering::SeqCst) == 0 {
                Vec::new()
            } else {
                b"Enter\r\n".to_vec()
            };
        }
        if is_addressed_challenge(tx) {
            return b"Enter\r\n".to_vec();
        }
        match tx.get(2) {
            Some(b'O' | b'X') => b"OK\r\n".to_vec(),
            Some(b'R') => b"Rebooting\r\n".to_vec(),
            _ => Vec::new(),
        }
    });
    let log = bus.log();
    let bars = vec![
        calibrated(1, 0b0001, &[(100, 0.5)]),
        calibrated(2, 0b0001, &[(100, 0.5)]),
    ];
    let clock = ManualClock::new();
    let mut p = Protocol::new(&mut bus, &bars, "A").unwrap();
    flash_bars(&mut p, &bars, &clock, &CancelToken::new(), |_| {}).unwrap();

    assert_eq!(broadcasts.load(Ordering::SeqCst), 2);
    let lines = log.lines();
    assert_eq!(&lines[1..3], &["01R".to_string(), "02R".to_string()]);
    // Two recovery reboots 100 ms apart, then 1.5 s settle.
    assert_eq!(clock.elapsed(), Duration::from_millis(1700));
}

#[test]
fn update_mode_failing_twice_is_fatal() {
    let mut bus = MockBus::new(|tx| if tx.get(2) == Some(&b'R') { b"Rebooting".to_vec() } else { b"\x00".to_vec() });
    let bars = vec![calibrated(1, 0b0001, &[(1, 1.0)])];
    let clock = ManualClock::new();
    let mut p = Protocol::new(&mut bus, &bars, "A").unwrap();
    let err = flash_bars(&mut p, &bars, &clock, &CancelToken::new(), |_| {}).unwrap_err();
    let Some(RunrillaError::UpdateModeEntryFailure { first, second }) =
        err.downcast_ref::<RunrillaError>()
    else {
        panic!("unexpected error: {err}");
    };
    assert!(first.contains("raw_hex=00"));
    assert!(second.contains("raw_len=1"));
}

#[test]
fn bar_that_never_gets_ready_is_reported() {
    let mut bus = MockBus::new(|tx| {
        if is_challenge(tx) || (is_addressed_challenge(tx) && tx.starts_with(b"01")) {
            b"Enter\r\n".to_vec()
        } else {
            Vec::new()
        }
    });
    let bars = vec![
        calibrated(1, 0b0001, &[(1, 1.0)]),
        calibrated(2, 0b0001, &[(1, 1.0)]),
    ];
    let clock = ManualClock::new();
    let mut p = Protocol::new(&mut bus, &bars, "A").unwrap();
    let err = flash_bars(&mut p, &bars, &clock, &CancelToken::new(), |_| {}).unwrap_err();
    assert_eq!(
        err.downcast_ref::<RunrillaError>(),
        Some(&RunrillaError::BarsNotReady(vec![1]))
    );
    assert_eq!(clock.elapsed(), Duration::from_millis(6 * 500));
}

#[test]
fn refuses_uncalibrated_bars_before_touching_the_bus() {
    let mut bus = MockBus::silent();
    let log = bus.log();
    let bars = vec![Bar::new(1, 0b0001)];
    let clock = ManualClock::new();
    let mut p = Protocol::new(&mut bus, &bars, "A").unwrap();
    let err = flash_bars(&mut p, &bars, &clock, &CancelToken::new(), |_| {}).unwrap_err();
    assert_eq!(
        err.downcast_ref::<RunrillaError>(),
        Some(&RunrillaError::NoCalibration { bar_index: 0 })
    );
    assert!(log.entries().is_empty());
}

#[test]
fn cancel_before_start_writes_nothing() {
    let mut bus = MockBus::new(rejecting_zeros);
    let log = bus.log();
    let bars = vec![calibrated(1, 0b0001, &[(1, 1.0)])];
    let cancel = CancelToken::new();
    cancel.cancel();
    let clock = ManualClock::new();
    let mut p = Protocol::new(&mut bus, &bars, "A").unwrap();
    let err = flash_bars(&mut p, &bars, &clock, &cancel, |_| {}).unwrap_err();
    assert_eq!(err.downcast_ref::<RunrillaError>(), Some(&RunrillaError::Canceled));
    assert!(log.entries().is_empty());
}
