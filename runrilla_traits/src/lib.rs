pub mod clock;

pub use clock::{Clock, ManualClock, MonotonicClock};

use std::time::Duration;

/// Error type used at the transport boundary.
pub type BusError = Box<dyn std::error::Error + Send + Sync>;

/// Byte-level access to the shared half-duplex RS-485 line.
///
/// Implementations never block past the timeout they are given. A read that
/// sees no bytes before its deadline returns `Ok(0)` instead of an error; the
/// protocol layer treats silence as a normal outcome.
pub trait Bus: Send {
    /// Write the whole buffer and flush it onto the line.
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BusError>;

    /// Wait up to `timeout` for at least one byte and copy what is available
    /// into `buf`. Returns the number of bytes copied (0 on timeout).
    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, BusError>;

    /// Discard anything sitting in the receive buffer.
    fn clear_input(&mut self) -> Result<(), BusError> {
        Ok(())
    }

    /// Human-readable name of the underlying link (port path, "sim", ...).
    fn name(&self) -> &str {
        "bus"
    }
}

impl<B: Bus + ?Sized> Bus for Box<B> {
    fn write_all(&mut self, bytes: &[u8]) -> Result<(), BusError> {
        (**self).write_all(bytes)
    }

    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> Result<usize, BusError> {
        (**self).read_some(buf, timeout)
    }

    fn clear_input(&mut self) -> Result<(), BusError> {
        (**self).clear_input()
    }

    fn name(&self) -> &str {
        (**self).name()
    }
}
