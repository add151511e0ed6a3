//! Finding the port the bars are on by asking each candidate for a version.

use runrilla_traits::Bus;
use tracing::{debug, info};

use crate::error::{Result, RunrillaError};
use crate::protocol::{DEFAULT_TIMEOUT, Protocol};
use crate::types::Bar;

/// True if the bar at `bar_id` answers `V` with a version string on `bus`.
pub fn probe(bus: &mut dyn Bus, bar_id: u8) -> bool {
    let bars = [Bar::new(bar_id, 0b1)];
    let Ok(mut protocol) = Protocol::new(bus, &bars, "V") else {
        return false;
    };
    protocol
        .send_and_await(bar_id, b"V", DEFAULT_TIMEOUT)
        .is_ok_and(|reply| String::from_utf8_lossy(&reply).contains("Version"))
}

/// First candidate that opens and answers as `expected_bar_id`.
pub fn auto_detect_with<I, S, F>(candidates: I, expected_bar_id: u8, mut open: F) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
    F: FnMut(&str) -> Option<Box<dyn Bus>>,
{
    for candidate in candidates {
        let name = candidate.as_ref();
        let Some(mut bus) = open(name) else {
            debug!(port = name, "cannot open candidate");
            continue;
        };
        if probe(&mut *bus, expected_bar_id) {
            info!(port = name, bar = expected_bar_id, "bars found");
            return Some(name.to_string());
        }
        debug!(port = name, "no answer");
    }
    None
}

/// Probe serial `candidates` at `baud` for the bar `expected_bar_id`.
#[cfg(feature = "serial")]
pub fn auto_detect_port<I, S>(candidates: I, expected_bar_id: u8, baud: u32) -> Option<String>
where
    I: IntoIterator<Item = S>,
    S: AsRef<str>,
{
    auto_detect_with(candidates, expected_bar_id, |name| {
        runrilla_hardware::SerialBus::open(name, baud)
            .ok()
            .map(|b| Box::new(b) as Box<dyn Bus>)
    })
}

/// Like `auto_detect_with`, but a miss is `AutoDetectFailure`.
pub fn require_port(found: Option<String>, expected_bar_id: u8) -> Result<String> {
    found.ok_or_else(|| {
        eyre::Report::new(RunrillaError::AutoDetectFailure {
            bar_id: expected_bar_id,
        })
    })
}
