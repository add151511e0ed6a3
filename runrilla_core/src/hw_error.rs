//! Maps `Box<dyn Error>` from the `Bus` boundary to typed `RunrillaError`.
//!
//! `runrilla_traits::Bus` reports failures as `Box<dyn Error + Send + Sync>`;
//! this module converts them to our enum, downcasting the transport's own
//! `HwError` where possible.

use runrilla_hardware::error::HwError;
use runrilla_traits::BusError;

use crate::error::RunrillaError;

/// Map a trait-boundary error to a typed `RunrillaError`.
pub fn map_bus_error(e: &(dyn std::error::Error + 'static)) -> RunrillaError {
    if let Some(hw) = e.downcast_ref::<HwError>() {
        return match hw {
            HwError::Open { port, reason } => RunrillaError::PortOpenFailure {
                port: port.clone(),
                reason: reason.clone(),
            },
            other => RunrillaError::Bus(other.to_string()),
        };
    }
    RunrillaError::Bus(e.to_string())
}

/// Convenience for `map_err` on bus calls.
pub(crate) fn bus_report(e: BusError) -> eyre::Report {
    eyre::Report::new(map_bus_error(e.as_ref()))
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn open_failure_is_typed() {
        let e: BusError = Box::new(HwError::Open {
            port: "/dev/ttyUSB9".into(),
            reason: "No such file".into(),
        });
        assert_eq!(
            map_bus_error(e.as_ref()),
            RunrillaError::PortOpenFailure {
                port: "/dev/ttyUSB9".into(),
                reason: "No such file".into()
            }
        );
    }

    #[test]
    fn foreign_errors_become_bus() {
        let e: BusError = "line dropped".into();
        assert_eq!(map_bus_error(e.as_ref()), RunrillaError::Bus("line dropped".into()));
    }
}
