//! Writing calibration coefficients into bar firmware.
//!
//! ```text
//! EnteringUpdateMode -> WaitingForAllBarsReady -> per bar:
//!     WritingZeros(i) -> WritingFactors(i) -> Rebooting(i)
//! -> Done
//! ```
//!
//! A bar whose write is never acknowledged is left in update mode (no
//! reboot) so the operator can retry without losing the bootloader.

use std::time::Duration;

use runrilla_traits::Clock;
use tracing::{info, warn};

use crate::cancel::CancelToken;
use crate::error::{Result, RunrillaError};
use crate::protocol::Protocol;
use crate::types::{Ack, Bar};

/// Spacing between recovery reboots.
pub const RECOVERY_REBOOT_SPACING: Duration = Duration::from_millis(100);
/// Settle time after the recovery reboots.
pub const RECOVERY_SETTLE: Duration = Duration::from_millis(1500);
/// Rounds of addressed ready probes.
pub const READY_ROUNDS: usize = 6;
/// Pause between ready rounds while bars are still pending.
pub const READY_ROUND_DELAY: Duration = Duration::from_millis(500);
/// Attempts per payload write.
pub const WRITE_ATTEMPTS: usize = 3;
/// Pause after a failed write attempt.
pub const WRITE_RETRY_DELAY: Duration = Duration::from_millis(200);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum FlashStage {
    EnterUpdate,
    Zeros,
    Factors,
    Reboot,
    Done,
}

impl FlashStage {
    pub const fn as_str(self) -> &'static str {
        match self {
            Self::EnterUpdate => "enter_update",
            Self::Zeros => "zeros",
            Self::Factors => "factors",
            Self::Reboot => "reboot",
            Self::Done => "done",
        }
    }
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct FlashProgress {
    pub stage: FlashStage,
    /// `None` for whole-bus stages.
    pub bar_index: Option<usize>,
    pub message: String,
}

/// `round(max(sum(zero * factor), 0) / nlcs)`, the firmware's combined zero.
pub fn weighted_zero_average(bar: &Bar) -> u64 {
    let n = bar.calibration.len();
    if n == 0 {
        return 0;
    }
    #[allow(clippy::cast_precision_loss)]
    let sum: f64 = bar
        .calibration
        .iter()
        .map(|c| c.zero as f64 * f64::from(c.factor))
        .sum();
    #[allow(
        clippy::cast_possible_truncation,
        clippy::cast_sign_loss,
        clippy::cast_precision_loss
    )]
    let avg = (sum.max(0.0) / n as f64 + 0.5) as u64;
    avg
}

fn enter_update_mode(protocol: &mut Protocol<'_>, clock: &dyn Clock, cancel: &CancelToken) -> Result<()> {
    let first = match protocol.enter_update_mode() {
        Ok(ack) if ack.accepted => return Ok(()),
        Ok(ack) => no_enter(&ack),
        Err(e) => e.to_string(),
    };
    warn!(error = %first, "update mode not entered; rebooting bars and retrying");
    for bar_index in 0..protocol.bars().len() {
        cancel.check()?;
        if let Err(e) = protocol.reboot(bar_index) {
            warn!(bar_index, error = %e, "recovery reboot failed");
        }
        clock.sleep(RECOVERY_REBOOT_SPACING);
    }
    clock.sleep(RECOVERY_SETTLE);
    cancel.check()?;
    let second = match protocol.enter_update_mode() {
        Ok(ack) if ack.accepted => return Ok(()),
        Ok(ack) => no_enter(&ack),
        Err(e) => e.to_string(),
    };
    Err(eyre::Report::new(RunrillaError::UpdateModeEntryFailure {
        first,
        second,
    }))
}

fn no_enter(ack: &Ack) -> String {
    format!(
        "no enter: raw_len={} raw_hex={} raw_str={:?}",
        ack.raw.len(),
        ack.raw_hex(),
        String::from_utf8_lossy(&ack.raw).trim()
    )
}

fn wait_all_ready(protocol: &mut Protocol<'_>, clock: &dyn Clock, cancel: &CancelToken) -> Result<()> {
    let mut pending: Vec<usize> = (0..protocol.bars().len()).collect();
    for round in 1..=READY_ROUNDS {
        if pending.is_empty() {
            break;
        }
        cancel.check()?;
        let mut still = Vec::new();
        for &bar_index in &pending {
            match protocol.probe_update_mode(bar_index) {
                Ok(ack) if ack.accepted => {}
                _ => still.push(bar_index),
            }
        }
        pending = still;
        if !pending.is_empty() {
            info!(round, ?pending, "bars not ready yet");
            clock.sleep(READY_ROUND_DELAY);
        }
    }
    if pending.is_empty() {
        Ok(())
    } else {
        Err(eyre::Report::new(RunrillaError::BarsNotReady(pending)))
    }
}

/// Up to `WRITE_ATTEMPTS` tries; `Err(last raw hex)` if none was acknowledged.
fn write_with_retry(
    clock: &dyn Clock,
    mut attempt: impl FnMut() -> Result<Ack>,
) -> std::result::Result<(), String> {
    let mut last = String::new();
    for n in 1..=WRITE_ATTEMPTS {
        match attempt() {
            Ok(ack) if ack.accepted => return Ok(()),
            Ok(ack) => last = ack.raw_hex(),
            Err(e) => last = e.to_string(),
        }
        warn!(attempt = n, reply = %last, "write not acknowledged");
        clock.sleep(WRITE_RETRY_DELAY);
    }
    Err(last)
}

/// Flash `bars` (which must carry calibration) through `protocol`.
///
/// `protocol` must address the same bars, in the same order.
pub fn flash_bars(
    protocol: &mut Protocol<'_>,
    bars: &[Bar],
    clock: &dyn Clock,
    cancel: &CancelToken,
    mut on_progress: impl FnMut(FlashProgress),
) -> Result<()> {
    if bars.is_empty() {
        return Err(eyre::Report::new(RunrillaError::InvalidArgument(
            "no bars configured".into(),
        )));
    }
    if !bars[0].is_calibrated() {
        return Err(eyre::Report::new(RunrillaError::NoCalibration { bar_index: 0 }));
    }
    if bars.len() != protocol.bars().len() {
        return Err(eyre::Report::new(RunrillaError::InvalidArgument(format!(
            "{} calibrated bars for {} bars on the bus",
            bars.len(),
            protocol.bars().len()
        ))));
    }
    let mut emit = |stage: FlashStage, bar_index: Option<usize>, message: &str| {
        on_progress(FlashProgress {
            stage,
            bar_index,
            message: message.to_string(),
        });
    };

    cancel.check()?;
    emit(FlashStage::EnterUpdate, None, "Entering update mode...");
    enter_update_mode(protocol, clock, cancel)?;
    wait_all_ready(protocol, clock, cancel)?;
    protocol.prime()?;

    for (bar_index, bar) in bars.iter().enumerate() {
        cancel.check()?;
        if !bar.is_calibrated() {
            return Err(eyre::Report::new(RunrillaError::NoCalibration { bar_index }));
        }
        emit(FlashStage::Zeros, Some(bar_index), "Flashing zeros...");
        let zeros: Vec<u64> = bar.calibration.iter().map(|c| c.zero).collect();
        let total = weighted_zero_average(bar);
        write_with_retry(clock, || protocol.write_zeros(bar_index, &zeros, total)).map_err(
            |raw_hex| eyre::Report::new(RunrillaError::ZeroWriteFailure { bar_index, raw_hex }),
        )?;

        emit(FlashStage::Factors, Some(bar_index), "Flashing factors...");
        let factors: Vec<f32> = bar.calibration.iter().map(|c| c.factor).collect();
        write_with_retry(clock, || protocol.write_factors(bar_index, &factors)).map_err(
            |raw_hex| eyre::Report::new(RunrillaError::FactorWriteFailure { bar_index, raw_hex }),
        )?;

        emit(FlashStage::Reboot, Some(bar_index), "Rebooting...");
        if let Err(e) = protocol.reboot(bar_index) {
            warn!(bar_index, error = %e, "reboot not confirmed");
        }
        info!(bar = bar.id, zero_avg = total, "bar flashed");
    }

    emit(FlashStage::Done, None, "Flashing complete");
    Ok(())
}
