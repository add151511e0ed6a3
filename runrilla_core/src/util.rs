//! Small shape helpers shared across the engines.

use crate::error::{Result, RunrillaError};
use crate::types::{Bar, SLOTS};

/// Active-channel count shared by every bar.
///
/// Fails on an empty bar list, a mask with no (or out-of-range) channels,
/// or bars that disagree on the count.
pub fn common_channel_count(bars: &[Bar]) -> Result<usize> {
    let Some(first) = bars.first() else {
        return Err(eyre::Report::new(RunrillaError::InvalidArgument(
            "no bars configured".into(),
        )));
    };
    let expected = first.nlcs();
    for (bar_index, bar) in bars.iter().enumerate() {
        if bar.channel_mask == 0 || usize::from(bar.channel_mask) >> SLOTS != 0 {
            return Err(eyre::Report::new(RunrillaError::InvalidArgument(format!(
                "bar {} has channel mask {:#04x}; expected 1 to 4 channels in bits 0..=3",
                bar_index + 1,
                bar.channel_mask
            ))));
        }
        let found = bar.nlcs();
        if found != expected {
            return Err(eyre::Report::new(RunrillaError::ChannelCountMismatch {
                bar_index,
                expected,
                found,
            }));
        }
    }
    Ok(expected)
}

/// Index of (bar, channel) in a bar-major flattened vector.
#[inline]
pub const fn flat_index(bar: usize, channel: usize, nlcs: usize) -> usize {
    bar * nlcs + channel
}

/// Mean of an `i128` running sum over `count` readings, clamped to `i64`.
///
/// Sums of raw counts are kept in `i128` so garbled replies near the `i64`
/// limits cannot overflow the accumulator.
pub fn mean_i64(sum: i128, count: usize) -> i64 {
    let divisor = i128::try_from(count.max(1)).unwrap_or(i128::MAX);
    let mean = sum / divisor;
    i64::try_from(mean).unwrap_or(if mean < 0 { i64::MIN } else { i64::MAX })
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn mismatch_reports_offending_bar() {
        let bars = [Bar::new(1, 0b1111), Bar::new(2, 0b0011)];
        let err = common_channel_count(&bars).unwrap_err();
        assert_eq!(
            err.downcast_ref::<RunrillaError>(),
            Some(&RunrillaError::ChannelCountMismatch {
                bar_index: 1,
                expected: 4,
                found: 2
            })
        );
    }

    #[test]
    fn zero_mask_rejected() {
        let err = common_channel_count(&[Bar::new(1, 0)]).unwrap_err();
        assert!(matches!(
            err.downcast_ref::<RunrillaError>(),
            Some(RunrillaError::InvalidArgument(_))
        ));
    }

    #[test]
    fn sparse_masks_with_equal_counts_agree() {
        let bars = [Bar::new(1, 0b0101), Bar::new(2, 0b1010)];
        assert_eq!(common_channel_count(&bars).unwrap(), 2);
    }

    #[test]
    fn mean_survives_sums_beyond_i64() {
        let big = i128::from(i64::MAX - 1);
        assert_eq!(mean_i64(big * 2, 2), i64::MAX - 1);
        assert_eq!(mean_i64(i128::from(i64::MIN) * 3, 3), i64::MIN);
        assert_eq!(mean_i64(-7, 2), -3);
        assert_eq!(mean_i64(10, 0), 10);
    }
}
