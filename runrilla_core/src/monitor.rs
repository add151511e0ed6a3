//! Live weight readout ("test mode") on top of stored calibration.

use std::time::Duration;

use runrilla_traits::Clock;
use tracing::{debug, info};

use crate::cancel::CancelToken;
use crate::error::{Result, RunrillaError};
use crate::protocol::Protocol;
use crate::sampler::{TICK_DELAY, read_tick};
use crate::types::{Bar, ChannelCalibration};
use crate::util::{flat_index, mean_i64};

/// Warm-up ticks when no ignore count is configured.
pub const DEFAULT_WARMUP: usize = 5;
/// Interval between snapshots.
pub const SNAPSHOT_INTERVAL: Duration = Duration::from_millis(250);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub struct ZeroProgress {
    pub warmup_done: usize,
    pub warmup_target: usize,
    pub sample_done: usize,
    pub sample_target: usize,
}

/// One live reading of every bar.
#[derive(Debug, Clone, PartialEq)]
pub struct Snapshot {
    /// `[bar][channel]` weight.
    pub per_bar_channel_weight: Vec<Vec<f64>>,
    pub per_bar_total: Vec<f64>,
    pub grand_total: f64,
    /// `[bar][channel]` raw counts.
    pub per_bar_raw: Vec<Vec<i64>>,
}

/// Give uncalibrated bars the factors stored on the device (zero = 0).
pub fn ensure_factors(protocol: &mut Protocol<'_>, bars: &mut [Bar], cancel: &CancelToken) -> Result<()> {
    for (bar_index, bar) in bars.iter_mut().enumerate() {
        if bar.is_calibrated() {
            continue;
        }
        cancel.check()?;
        let factors = protocol.read_factors(bar_index)?;
        #[allow(clippy::cast_possible_truncation)]
        let calibration = factors
            .iter()
            .map(|&f| ChannelCalibration::new(0, f as f32))
            .collect();
        bar.calibration = calibration;
        debug!(bar = bar.id, ?factors, "factors read from device");
    }
    Ok(())
}

/// Average `samples` ticks of raw readings after `warmup` discarded ticks.
///
/// A tick counts only if at least one bar answered. If none ever did, a
/// single extra read is returned as is.
pub fn collect_averaged_zeros(
    protocol: &mut Protocol<'_>,
    clock: &dyn Clock,
    warmup: usize,
    samples: usize,
    cancel: &CancelToken,
    mut on_progress: impl FnMut(ZeroProgress),
) -> Result<Vec<i64>> {
    if samples == 0 {
        return Err(eyre::Report::new(RunrillaError::InvalidArgument(
            "samples must be > 0".into(),
        )));
    }
    let nlcs = protocol.nlcs();
    let nbars = protocol.bars().len();
    let mut progress = ZeroProgress {
        warmup_done: 0,
        warmup_target: warmup,
        sample_done: 0,
        sample_target: samples,
    };

    for w in 0..warmup {
        cancel.check()?;
        let _ = read_tick(protocol);
        progress.warmup_done = w + 1;
        on_progress(progress);
        clock.sleep(TICK_DELAY);
    }

    let mut sums = vec![0i128; nbars * nlcs];
    let mut count = 0usize;
    for s in 0..samples {
        cancel.check()?;
        let mut got_any = false;
        for bar_index in 0..nbars {
            let Ok(raw) = protocol.get_raw_channels(bar_index) else {
                continue;
            };
            if raw.is_empty() {
                continue;
            }
            got_any = true;
            for (channel, v) in raw.iter().take(nlcs).enumerate() {
                sums[flat_index(bar_index, channel, nlcs)] += i128::from(*v);
            }
        }
        if got_any {
            count += 1;
        }
        progress.sample_done = s + 1;
        on_progress(progress);
        clock.sleep(TICK_DELAY);
    }

    if count == 0 {
        info!("no bar answered while averaging zeros; using a single read");
        return Ok(read_tick(protocol).concat());
    }
    Ok(sums.iter().map(|&s| mean_i64(s, count)).collect())
}

/// Read every bar once and convert to weight: `(raw - zero) * factor`.
///
/// Channels without a stored factor use 1.0.
#[allow(clippy::cast_precision_loss)]
pub fn snapshot(protocol: &mut Protocol<'_>, bars: &[Bar], zeros: &[i64]) -> Result<Snapshot> {
    let nlcs = protocol.nlcs();
    let mut out = Snapshot {
        per_bar_channel_weight: Vec::with_capacity(bars.len()),
        per_bar_total: Vec::with_capacity(bars.len()),
        grand_total: 0.0,
        per_bar_raw: Vec::with_capacity(bars.len()),
    };
    for (bar_index, bar) in bars.iter().enumerate() {
        let raw = protocol.get_raw_channels(bar_index)?;
        let mut weights = Vec::with_capacity(nlcs);
        let mut adc_row = Vec::with_capacity(nlcs);
        for channel in 0..nlcs {
            let adc = raw.get(channel).copied().unwrap_or(0);
            let zero = zeros.get(flat_index(bar_index, channel, nlcs)).copied().unwrap_or(0);
            let factor = bar
                .calibration
                .get(channel)
                .map_or(1.0, |c| f64::from(c.factor));
            weights.push(adc.saturating_sub(zero) as f64 * factor);
            adc_row.push(adc);
        }
        let total: f64 = weights.iter().sum();
        out.grand_total += total;
        out.per_bar_total.push(total);
        out.per_bar_channel_weight.push(weights);
        out.per_bar_raw.push(adc_row);
    }
    Ok(out)
}

/// Snapshot every `SNAPSHOT_INTERVAL` until canceled.
///
/// Returns `Canceled` when stopped; read errors end the loop with that error.
pub fn run_live(
    protocol: &mut Protocol<'_>,
    bars: &[Bar],
    zeros: &[i64],
    clock: &dyn Clock,
    cancel: &CancelToken,
    mut on_snapshot: impl FnMut(Snapshot),
) -> Result<()> {
    loop {
        cancel.check()?;
        let snap = snapshot(protocol, bars, zeros)?;
        on_snapshot(snap);
        clock.sleep(SNAPSHOT_INTERVAL);
    }
}
