//! Ignore-then-average ADC acquisition across every bar.
//!
//! One tick reads each bar once. The first `ignore` ticks let the readings
//! settle and are discarded; the next `average` ticks are summed per
//! (bar, channel). Cancellation is checked before every tick, so a canceled
//! run never returns a partial average.

use std::time::Duration;

use runrilla_traits::Clock;
use tracing::{debug, warn};

use crate::cancel::CancelToken;
use crate::error::{Result, RunrillaError};
use crate::protocol::Protocol;
use crate::util::{flat_index, mean_i64};

/// Pause after every tick.
pub const TICK_DELAY: Duration = Duration::from_millis(5);

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum SamplePhase {
    Ignoring,
    Averaging,
    Finished,
}

/// Progress report for one tick (or the final result).
#[derive(Debug, Clone, PartialEq, Eq)]
pub struct SampleUpdate {
    pub phase: SamplePhase,
    pub ignore_done: usize,
    pub ignore_target: usize,
    pub avg_done: usize,
    pub avg_target: usize,
    /// Raw values read this tick, `[bar][channel]`; the averages when finished.
    pub values: Vec<Vec<i64>>,
}

/// Read every bar once. Empty readings and read errors become zeros.
pub(crate) fn read_tick(protocol: &mut Protocol<'_>) -> Vec<Vec<i64>> {
    let nlcs = protocol.nlcs();
    (0..protocol.bars().len())
        .map(|bar_index| {
            let mut row = vec![0i64; nlcs];
            match protocol.get_raw_channels(bar_index) {
                Ok(raw) => {
                    for (dst, src) in row.iter_mut().zip(raw) {
                        *dst = src;
                    }
                }
                Err(e) => warn!(bar_index, error = %e, "raw read failed; counting as zero"),
            }
            row
        })
        .collect()
}

/// Sample all bars and return bar-major averages (`bars * nlcs` values).
pub fn sample_channels(
    protocol: &mut Protocol<'_>,
    clock: &dyn Clock,
    ignore: usize,
    average: usize,
    cancel: &CancelToken,
    mut on_progress: impl FnMut(&SampleUpdate),
) -> Result<Vec<i64>> {
    if average == 0 {
        return Err(eyre::Report::new(RunrillaError::InvalidArgument(
            "average must be > 0".into(),
        )));
    }
    let nlcs = protocol.nlcs();
    let nbars = protocol.bars().len();
    let mut sums = vec![0i128; nbars * nlcs];
    let mut update = SampleUpdate {
        phase: SamplePhase::Ignoring,
        ignore_done: 0,
        ignore_target: ignore,
        avg_done: 0,
        avg_target: average,
        values: Vec::new(),
    };

    while update.ignore_done < ignore {
        cancel.check()?;
        update.values = read_tick(protocol);
        update.ignore_done += 1;
        on_progress(&update);
        clock.sleep(TICK_DELAY);
    }

    update.phase = SamplePhase::Averaging;
    while update.avg_done < average {
        cancel.check()?;
        update.values = read_tick(protocol);
        for (bar, row) in update.values.iter().enumerate() {
            for (channel, v) in row.iter().enumerate() {
                sums[flat_index(bar, channel, nlcs)] += i128::from(*v);
            }
        }
        update.avg_done += 1;
        on_progress(&update);
        clock.sleep(TICK_DELAY);
    }

    let averages: Vec<i64> = sums.iter().map(|&s| mean_i64(s, average)).collect();
    update.phase = SamplePhase::Finished;
    update.values = averages.chunks(nlcs.max(1)).map(<[i64]>::to_vec).collect();
    on_progress(&update);
    debug!(ignore, average, "sampling finished");
    Ok(averages)
}
