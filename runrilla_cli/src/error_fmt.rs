//! Human-readable error descriptions and structured JSON error formatting.

use runrilla_core::error::{self, RunrillaError};
use serde_json::json;

/// Map an eyre::Report to a human-readable explanation with likely causes and fix hints.
pub fn humanize(err: &eyre::Report) -> String {
    if let Some(e) = error::find(err) {
        return match e {
            RunrillaError::PortOpenFailure { port, reason } => format!(
                "What happened: Cannot open serial port {port} ({reason}).\nLikely causes: Wrong SERIAL.PORT, adapter unplugged, or another program holds the port.\nHow to fix: Check the port name (or leave it empty to auto-detect), close other terminals, and make sure you may access the device."
            ),
            RunrillaError::AutoDetectFailure { bar_id } => format!(
                "What happened: No serial port answered as bar {bar_id}.\nLikely causes: Bars not powered, wrong BAUDRATE, or the first bar ID in BARS is wrong.\nHow to fix: Power the shelf, check the RS-485 wiring, or set SERIAL.PORT explicitly."
            ),
            RunrillaError::VersionProbeFailure { .. } | RunrillaError::InvalidVersionFormat { .. } => format!(
                "What happened: {e}.\nLikely causes: Bar not powered, wrong bar ID, or wrong BAUDRATE.\nHow to fix: Check the BARS IDs against the shelf and the line settings, then retry."
            ),
            RunrillaError::NoValidFactors { .. } => format!(
                "What happened: {e}.\nLikely causes: Firmware does not support the factor read or the reply was garbled.\nHow to fix: Re-run with --log-level=trace to see the raw exchange; check termination of the RS-485 line."
            ),
            RunrillaError::ChannelCountMismatch { .. } => format!(
                "What happened: {e}.\nLikely causes: One bar's LCS mask enables a different number of load cells.\nHow to fix: Every bar must use the same number of load cells; fix BARS[].LCS."
            ),
            RunrillaError::SvdFailed | RunrillaError::CalibrationIncomplete { .. } => format!(
                "What happened: {e}.\nLikely causes: A weight step was read with nothing placed, or the same placement was repeated.\nHow to fix: Start over with step 0 and follow every prompt before confirming."
            ),
            RunrillaError::UpdateModeEntryFailure { .. } | RunrillaError::BarsNotReady(_) => format!(
                "What happened: {e}.\nLikely causes: Bars busy or unpowered, or line noise during the challenge.\nHow to fix: Power-cycle the shelf and run `flash` again with the calibrated file."
            ),
            RunrillaError::ZeroWriteFailure { .. } | RunrillaError::FactorWriteFailure { .. } => format!(
                "What happened: {e}.\nLikely causes: The bar rejected the payload or did not answer.\nHow to fix: The bar was left in update mode; run `flash` again with the calibrated file."
            ),
            RunrillaError::NoCalibration { .. } => format!(
                "What happened: {e}.\nLikely causes: The parameter file has no LC records.\nHow to fix: Run `calibrate` first, or pass the `_calibrated.json` file it wrote."
            ),
            RunrillaError::Config(msg) | RunrillaError::InvalidArgument(msg) => format!(
                "What happened: Invalid configuration ({msg}).\nLikely causes: Missing or out-of-range values in the parameter file.\nHow to fix: Edit the parameter file, then rerun."
            ),
            RunrillaError::Canceled => "What happened: Operation canceled.\nLikely causes: Ctrl-C or a newer operation replaced it.\nHow to fix: Nothing to fix; start the operation again when ready.".to_string(),
            RunrillaError::NotConnected | RunrillaError::InvalidStepIndex { .. } | RunrillaError::Bus(_) => format!(
                "What happened: {e}.\nLikely causes: See logs.\nHow to fix: Re-run with --log-level=debug or set RUST_LOG for more detail."
            ),
        };
    }

    // Generic fallback
    let msg = err.to_string();
    let mut cause = String::new();
    if let Some(src) = err.source() {
        cause = format!(" Cause: {src}");
    }
    format!(
        "Something went wrong.{cause}\nHow to fix: Re-run with --log-level=debug for details. Original: {msg}"
    )
}

/// Stable exit codes per error family; unknown errors return 1.
pub fn exit_code_for_error(err: &eyre::Report) -> i32 {
    match error::find(err) {
        Some(RunrillaError::Config(_) | RunrillaError::InvalidArgument(_)) => 2,
        Some(
            RunrillaError::PortOpenFailure { .. }
            | RunrillaError::AutoDetectFailure { .. }
            | RunrillaError::NotConnected,
        ) => 3,
        Some(
            RunrillaError::VersionProbeFailure { .. }
            | RunrillaError::InvalidVersionFormat { .. }
            | RunrillaError::NoValidFactors { .. }
            | RunrillaError::Bus(_),
        ) => 4,
        Some(
            RunrillaError::ChannelCountMismatch { .. }
            | RunrillaError::SvdFailed
            | RunrillaError::InvalidStepIndex { .. }
            | RunrillaError::CalibrationIncomplete { .. },
        ) => 5,
        Some(
            RunrillaError::UpdateModeEntryFailure { .. }
            | RunrillaError::BarsNotReady(_)
            | RunrillaError::ZeroWriteFailure { .. }
            | RunrillaError::FactorWriteFailure { .. }
            | RunrillaError::NoCalibration { .. },
        ) => 6,
        Some(RunrillaError::Canceled) => 130,
        None => 1,
    }
}

pub const fn reason_name(e: &RunrillaError) -> &'static str {
    match e {
        RunrillaError::NotConnected => "NotConnected",
        RunrillaError::ChannelCountMismatch { .. } => "ChannelCountMismatch",
        RunrillaError::PortOpenFailure { .. } => "PortOpenFailure",
        RunrillaError::VersionProbeFailure { .. } => "VersionProbeFailure",
        RunrillaError::AutoDetectFailure { .. } => "AutoDetectFailure",
        RunrillaError::InvalidVersionFormat { .. } => "InvalidVersionFormat",
        RunrillaError::NoValidFactors { .. } => "NoValidFactors",
        RunrillaError::SvdFailed => "SvdFailed",
        RunrillaError::InvalidStepIndex { .. } => "InvalidStepIndex",
        RunrillaError::CalibrationIncomplete { .. } => "CalibrationIncomplete",
        RunrillaError::UpdateModeEntryFailure { .. } => "UpdateModeEntryFailure",
        RunrillaError::BarsNotReady(_) => "BarsNotReady",
        RunrillaError::ZeroWriteFailure { .. } => "ZeroWriteFailure",
        RunrillaError::FactorWriteFailure { .. } => "FactorWriteFailure",
        RunrillaError::Canceled => "Canceled",
        RunrillaError::NoCalibration { .. } => "NoCalibration",
        RunrillaError::InvalidArgument(_) => "InvalidArgument",
        RunrillaError::Config(_) => "Config",
        RunrillaError::Bus(_) => "Bus",
    }
}

/// Structured JSON for errors when --json is enabled.
pub fn format_error_json(err: &eyre::Report) -> String {
    let Some(e) = error::find(err) else {
        return json!({ "reason": "Error", "message": humanize(err) }).to_string();
    };
    let details = match e {
        RunrillaError::PortOpenFailure { port, reason } => {
            Some(json!({ "port": port, "reason": reason }))
        }
        RunrillaError::AutoDetectFailure { bar_id } => Some(json!({ "bar_id": bar_id })),
        RunrillaError::VersionProbeFailure { bar_index, .. }
        | RunrillaError::InvalidVersionFormat { bar_index, .. }
        | RunrillaError::NoCalibration { bar_index } => Some(json!({ "bar": bar_index + 1 })),
        RunrillaError::NoValidFactors { bar_index, raw_hex }
        | RunrillaError::ZeroWriteFailure { bar_index, raw_hex }
        | RunrillaError::FactorWriteFailure { bar_index, raw_hex } => {
            Some(json!({ "bar": bar_index + 1, "raw_hex": raw_hex }))
        }
        RunrillaError::BarsNotReady(pending) => Some(json!({
            "bars": pending.iter().map(|i| i + 1).collect::<Vec<_>>()
        })),
        RunrillaError::ChannelCountMismatch {
            bar_index,
            expected,
            found,
        } => Some(json!({ "bar": bar_index + 1, "expected": expected, "found": found })),
        _ => None,
    };
    let mut obj = json!({ "reason": reason_name(e), "message": humanize(err) });
    if let Some(d) = details {
        obj["details"] = d;
    }
    obj.to_string()
}
