use std::time::{Duration, Instant};

use runrilla_traits::{Bus, BusError};

/// Once a reply has started, stop collecting after the line stays quiet this long.
pub const INTER_BYTE_GAP: Duration = Duration::from_millis(30);

/// Collect whatever the line delivers until `timeout` expires.
///
/// The first read waits for the full timeout. After the first byte arrives,
/// each further read waits at most `gap` (bounded by the remaining time), so a
/// complete reply returns early while a silent device costs exactly one
/// timeout. An empty vector means nothing arrived; that is not an error.
pub fn collect_response(
    bus: &mut dyn Bus,
    timeout: Duration,
    gap: Duration,
) -> Result<Vec<u8>, BusError> {
    let deadline = Instant::now() + timeout;
    let mut out = Vec::new();
    let mut buf = [0u8; 256];
    loop {
        let remaining = deadline.saturating_duration_since(Instant::now());
        if remaining.is_zero() {
            break;
        }
        let wait = if out.is_empty() {
            remaining
        } else {
            remaining.min(gap)
        };
        let n = bus.read_some(&mut buf, wait)?;
        if n == 0 {
            break;
        }
        out.extend_from_slice(&buf[..n]);
    }
    Ok(out)
}
