//! CLI argument definitions and shared statics.

use clap::{ArgAction, Parser, Subcommand};
use std::path::PathBuf;
use std::sync::OnceLock;

pub static FILE_GUARD: OnceLock<tracing_appender::non_blocking::WorkerGuard> = OnceLock::new();
/// Whether the user asked for JSON output (controls structured error output).
pub static JSON_MODE: OnceLock<bool> = OnceLock::new();

#[derive(Parser, Debug)]
#[command(
    name = "runrilla",
    version,
    about = "Calibrate and flash RS-485 load-cell bars"
)]
pub struct Cli {
    /// Parameter file (`.json` device format or `.toml`)
    #[arg(long, value_name = "FILE", default_value = "etc/runrilla.json")]
    pub config: PathBuf,

    /// Talk to simulated bars instead of the serial port
    #[arg(long, action = ArgAction::SetTrue)]
    pub sim: bool,

    /// Emit JSON lines (events, results and errors) on stdout
    #[arg(long, action = ArgAction::SetTrue)]
    pub json: bool,

    /// Console log level (error|warn|info|debug|trace)
    #[arg(long = "log-level", value_name = "LEVEL", default_value = "warn")]
    pub log_level: String,

    /// Command to execute
    #[command(subcommand)]
    pub cmd: Commands,
}

#[derive(Subcommand, Debug)]
pub enum Commands {
    /// Find the serial port the first configured bar answers on
    Detect,
    /// Print the firmware version of every bar
    Version,
    /// Read the factors stored on every bar
    Factors,
    /// Print the calibration plan without touching the device
    Plan,
    /// Walk through the calibration plan, solve, and flash the result
    Calibrate {
        /// Solve and save, but leave the firmware untouched
        #[arg(long, action = ArgAction::SetTrue)]
        no_flash: bool,
        /// Do not wait for Enter before each step
        #[arg(long, action = ArgAction::SetTrue)]
        yes: bool,
    },
    /// Live weight readout from the stored calibration
    Test {
        /// Stop after this many seconds (default: until Ctrl-C)
        #[arg(long, value_name = "SECS")]
        seconds: Option<u64>,
    },
    /// Write the coefficients of a calibrated parameter file to the bars
    Flash {
        /// Calibrated parameter file (as written by `calibrate`)
        #[arg(long, value_name = "FILE")]
        calibrated: PathBuf,
    },
}
