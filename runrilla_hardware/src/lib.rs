//! Transport layer for the RS-485 bar bus.
//!
//! - `frame`: addressed command framing and hex dumps
//! - `util`: timeout-bounded response collection
//! - `serial` (feature `serial`): the real port, opened 8N1
//! - `sim`: simulated bars speaking the same protocol
pub mod error;
pub mod frame;
#[cfg(feature = "serial")]
pub mod serial;
pub mod sim;
pub mod util;

pub use runrilla_traits::{Bus, BusError};
#[cfg(feature = "serial")]
pub use serial::{SerialBus, candidate_ports};
pub use sim::{SimBar, SimHandle, SimulatedBars};
