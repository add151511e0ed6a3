//! RS-485 transport over a local serial port (8N1).

use std::io::{ErrorKind, Read, Write};
use std::time::Duration;

use runrilla_traits::{Bus, BusError};
use serialport::{ClearBuffer, DataBits, Parity, SerialPort, StopBits};
use tracing::{debug, trace};

use crate::error::{HwError, Result};

/// Read timeout the port is opened with; every read overrides it per call.
pub const DEFAULT_READ_TIMEOUT: Duration = Duration::from_millis(300);

pub struct SerialBus {
    port: Box<dyn SerialPort>,
    name: String,
    timeout: Duration,
}

impl SerialBus {
    /// Open `path` at `baud`, 8 data bits, no parity, one stop bit.
    pub fn open(path: &str, baud: u32) -> Result<Self> {
        debug!(port = path, baud, "opening serial port");
        let port = serialport::new(path, baud)
            .data_bits(DataBits::Eight)
            .parity(Parity::None)
            .stop_bits(StopBits::One)
            .timeout(DEFAULT_READ_TIMEOUT)
            .open()
            .map_err(|e| HwError::Open {
                port: path.to_string(),
                reason: e.to_string(),
            })?;
        Ok(Self {
            port,
            name: path.to_string(),
            timeout: DEFAULT_READ_TIMEOUT,
        })
    }
}

impl Bus for SerialBus {
    fn write_all(&mut self, bytes: &[u8]) -> std::result::Result<(), BusError> {
        trace!(port = %self.name, len = bytes.len(), "tx");
        self.port.write_all(bytes).map_err(HwError::Io)?;
        self.port.flush().map_err(HwError::Io)?;
        Ok(())
    }

    fn read_some(&mut self, buf: &mut [u8], timeout: Duration) -> std::result::Result<usize, BusError> {
        if timeout != self.timeout {
            self.port
                .set_timeout(timeout)
                .map_err(|e| HwError::Serial(e.to_string()))?;
            self.timeout = timeout;
        }
        match self.port.read(buf) {
            Ok(n) => Ok(n),
            Err(e) if e.kind() == ErrorKind::TimedOut => Ok(0),
            Err(e) => Err(HwError::Io(e).into()),
        }
    }

    fn clear_input(&mut self) -> std::result::Result<(), BusError> {
        self.port
            .clear(ClearBuffer::Input)
            .map_err(|e| HwError::Serial(e.to_string()))?;
        Ok(())
    }

    fn name(&self) -> &str {
        &self.name
    }
}

/// Candidate port names to probe when none is configured.
///
/// Windows gets `COM1..=COM64`. Elsewhere the enumerator's view is merged
/// with a scan of `/dev` for the usual USB-serial and on-board names.
pub fn candidate_ports() -> Vec<String> {
    if cfg!(windows) {
        return (1..=64).map(|i| format!("COM{i}")).collect();
    }
    let mut out: Vec<String> = serialport::available_ports()
        .map(|ports| ports.into_iter().map(|p| p.port_name).collect())
        .unwrap_or_default();
    const PREFIXES: [&str; 4] = ["ttyUSB", "ttyACM", "ttyS", "cu."];
    if let Ok(entries) = std::fs::read_dir("/dev") {
        let mut scanned: Vec<String> = entries
            .filter_map(|e| e.ok())
            .filter_map(|e| e.file_name().into_string().ok())
            .filter(|n| PREFIXES.iter().any(|p| n.starts_with(p)))
            .collect();
        scanned.sort_by_key(|n| {
            let rank = PREFIXES.iter().position(|p| n.starts_with(p));
            (rank, n.clone())
        });
        for name in scanned.into_iter().map(|n| format!("/dev/{n}")) {
            if !out.contains(&name) {
                out.push(name);
            }
        }
    }
    out
}
