//! `From` implementations bridging `runrilla_config` types to `runrilla_core` types.

use runrilla_config::{BarCfg, LoadCell, Parameters};

use crate::session::SessionOptions;
use crate::types::{Bar, ChannelCalibration};

// ── Bars ─────────────────────────────────────────────────────────────────────

impl From<&LoadCell> for ChannelCalibration {
    fn from(c: &LoadCell) -> Self {
        Self {
            zero: c.zero,
            factor: c.factor,
            factor_hex: if c.ieee.is_empty() {
                crate::matrix::ieee754_hex(c.factor)
            } else {
                c.ieee.clone()
            },
        }
    }
}

impl From<&ChannelCalibration> for LoadCell {
    fn from(c: &ChannelCalibration) -> Self {
        Self {
            zero: c.zero,
            factor: c.factor,
            ieee: c.factor_hex.clone(),
        }
    }
}

impl From<&BarCfg> for Bar {
    fn from(c: &BarCfg) -> Self {
        Self {
            id: c.id,
            channel_mask: c.lcs,
            calibration: c.lc.iter().map(ChannelCalibration::from).collect(),
        }
    }
}

impl From<&Bar> for BarCfg {
    fn from(b: &Bar) -> Self {
        Self {
            id: b.id,
            lcs: b.channel_mask,
            lc: b.calibration.iter().map(LoadCell::from).collect(),
        }
    }
}

/// Core bars for every configured bar, in order.
pub fn bars_from_parameters(p: &Parameters) -> Vec<Bar> {
    p.bars.iter().map(Bar::from).collect()
}

/// Copy of `p` whose bars carry the given calibration.
pub fn with_calibration(p: &Parameters, bars: &[Bar]) -> Parameters {
    Parameters {
        bars: bars.iter().map(BarCfg::from).collect(),
        ..p.clone()
    }
}

// ── SessionOptions ───────────────────────────────────────────────────────────

impl From<&Parameters> for SessionOptions {
    fn from(p: &Parameters) -> Self {
        Self {
            sample_command: p.serial.command.clone(),
            weight: p.weight,
            average: p.avg as usize,
            ignore: p.ignore as usize,
            flash_after_calibration: true,
        }
    }
}
