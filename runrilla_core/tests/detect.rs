use runrilla_core::detect::{auto_detect_with, probe, require_port};
use runrilla_core::error::RunrillaError;
use runrilla_core::mocks::MockBus;
use runrilla_hardware::{Bus, SimBar, SimulatedBars};

fn open(name: &str) -> Option<Box<dyn Bus>> {
    match name {
        "/dev/ttyS0" => None,
        "/dev/ttyUSB0" => Some(Box::new(MockBus::new(|_| b"garbage\r\n".to_vec()))),
        "/dev/ttyUSB1" => Some(Box::new(SimulatedBars::new(vec![SimBar::new(3, 0b0001)], "A"))),
        _ => Some(Box::new(MockBus::silent())),
    }
}

#[test]
fn first_answering_candidate_wins() {
    let ports = ["/dev/ttyS0", "/dev/ttyUSB0", "/dev/ttyUSB1", "/dev/ttyUSB2"];
    assert_eq!(
        auto_detect_with(ports, 3, open).as_deref(),
        Some("/dev/ttyUSB1")
    );
}

#[test]
fn wrong_bar_id_finds_nothing() {
    let ports = vec!["/dev/ttyUSB1".to_string(), "/dev/ttyUSB2".to_string()];
    let found = auto_detect_with(&ports, 4, open);
    assert_eq!(found, None);
    let err = require_port(found, 4).unwrap_err();
    assert_eq!(
        err.downcast_ref::<RunrillaError>(),
        Some(&RunrillaError::AutoDetectFailure { bar_id: 4 })
    );
    assert_eq!(err.to_string(), "no port answered as bar 4");
}

#[test]
fn probe_sends_addressed_version_request() {
    let mut bus = MockBus::new(|tx| {
        if tx == b"0CV\r" {
            b"Version 12.3.4\r\n".to_vec()
        } else {
            Vec::new()
        }
    });
    let log = bus.log();
    assert!(probe(&mut bus, 12));
    assert!(!probe(&mut bus, 13));
    assert_eq!(log.lines(), vec!["0CV", "0DV"]);
}
