use rstest::rstest;
use runrilla_hardware::frame::{self, UPDATE_CHALLENGE};
use runrilla_hardware::util::{INTER_BYTE_GAP, collect_response};
use runrilla_hardware::{Bus, SimBar, SimulatedBars};
use std::time::Duration;

fn exchange(bus: &mut SimulatedBars, bytes: &[u8]) -> String {
    bus.write_all(bytes).unwrap();
    let raw = collect_response(bus, Duration::from_millis(200), INTER_BYTE_GAP).unwrap();
    String::from_utf8_lossy(&raw).into_owned()
}

fn two_bars() -> SimulatedBars {
    SimulatedBars::new(vec![SimBar::new(1, 0b0011), SimBar::new(2, 0b0011)], "A")
}

#[rstest]
#[case(b"V".as_slice(), "Version 1.1.0")]
#[case(b"R".as_slice(), "Rebooting")]
#[case(b"O000000001|000000002|000000000|000000000|000000001|".as_slice(), "LOCKED")]
fn addressed_replies(#[case] payload: &[u8], #[case] needle: &str) {
    let mut bus = two_bars();
    let reply = exchange(&mut bus, &frame::encode(1, payload));
    assert!(reply.contains(needle), "reply was {reply:?}");
}

#[test]
fn unknown_address_is_silent() {
    let mut bus = two_bars();
    assert!(exchange(&mut bus, &frame::encode(9, b"V")).is_empty());
}

#[test]
fn writes_accepted_after_challenge() {
    let mut bus = two_bars();
    let handle = bus.handle();
    assert!(exchange(&mut bus, UPDATE_CHALLENGE.as_bytes()).contains("Enter"));
    let reply = exchange(
        &mut bus,
        &frame::encode(2, b"X0.0500000000|0.0510000000|1.0000000000|1.0000000000|"),
    );
    assert!(reply.contains("OK"));
    let bar = handle.bar(1).unwrap();
    assert!((bar.stored_factors[0] - 0.05).abs() < 1e-7);
    assert!((bar.stored_factors[1] - 0.051).abs() < 1e-7);
}

#[test]
fn load_moves_raw_counts() {
    let mut bus = two_bars();
    let handle = bus.handle();
    let before = exchange(&mut bus, &frame::encode(1, b"A"));
    handle.set_load(0, 1, 500.0);
    let after = exchange(&mut bus, &frame::encode(1, b"A"));
    let parse = |s: &str| -> Vec<i64> {
        s.trim().split('|').map(|v| v.parse().unwrap()).collect()
    };
    let (b, a) = (parse(&before), parse(&after));
    assert_eq!(b[0], a[0]);
    assert!(a[1] > b[1]);
    assert_eq!(a[2], 0, "inactive slot reads zero");
}

#[test]
fn muted_bar_does_not_answer() {
    let mut bus = two_bars();
    bus.handle().set_responsive(0, false);
    assert!(exchange(&mut bus, &frame::encode(1, b"V")).is_empty());
    assert!(exchange(&mut bus, &frame::encode(2, b"V")).contains("Version 2."));
}
