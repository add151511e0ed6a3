//! Calibration plan, matrix assembly and the least-squares solve.
//!
//! The operator clears the shelf once (zero step) and then places the same
//! nominal weight at `3 * (bars - 1) * nlcs` positions. Each step's averaged
//! raw readings become one row of `Adv`; every row of `Ad0` is the zero
//! reading. Solving `(Adv - Ad0) * factors = W` in the least-squares sense
//! gives one factor per channel; the zero reading gives the zeros.

use std::fmt;

use crate::error::{Result, RunrillaError};
use crate::matrix::{Matrix, Vector, ieee754_hex};
use crate::types::{Bar, ChannelCalibration};
use crate::util::common_channel_count;

const BAY_NAMES: [&str; 10] = [
    "First", "Second", "Third", "Fourth", "Fifth", "Sixth", "Seventh", "Eighth", "Ninth", "Tenth",
];

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum Side {
    Left,
    Middle,
    Right,
}

impl Side {
    const fn from_index(i: usize) -> Self {
        match i % 3 {
            0 => Self::Left,
            1 => Self::Middle,
            _ => Self::Right,
        }
    }
}

impl fmt::Display for Side {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Left => "Left",
            Self::Middle => "Middle",
            Self::Right => "Right",
        })
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq, Hash)]
pub enum FrontBack {
    Front,
    Back,
}

impl fmt::Display for FrontBack {
    fn fmt(&self, f: &mut fmt::Formatter<'_>) -> fmt::Result {
        f.write_str(match self {
            Self::Front => "Front",
            Self::Back => "Back",
        })
    }
}

/// Ordinal name of a bay: `First`, `Second`, ... then `11th`, `12th`, ...
pub fn bay_name(bay: usize) -> String {
    BAY_NAMES
        .get(bay)
        .map_or_else(|| format!("{}th", bay + 1), |s| (*s).to_string())
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum StepKind {
    Zero,
    Weight {
        /// Placement index, 0-based (`step index - 1`).
        placement: usize,
        bay: usize,
        side: Side,
        front_back: FrontBack,
    },
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct Step {
    /// Position in the plan; 0 is the zero step.
    pub index: usize,
    pub kind: StepKind,
    /// `[ZERO]` or `[0001]`-style.
    pub label: String,
    /// Instruction for the operator.
    pub prompt: String,
}

#[derive(Debug, Clone, PartialEq, Eq)]
pub struct CalibrationPlan {
    pub steps: Vec<Step>,
    /// Number of weight steps (`N`).
    pub weight_steps: usize,
}

impl CalibrationPlan {
    /// Total steps including the zero step (`N + 1`).
    pub fn len(&self) -> usize {
        self.steps.len()
    }

    pub fn is_empty(&self) -> bool {
        self.steps.is_empty()
    }
}

/// Build the ordered step list for `bar_count` bars of `nlcs` channels.
pub fn build_plan(bar_count: usize, nlcs: usize, weight: f64) -> Result<CalibrationPlan> {
    if bar_count < 1 {
        return Err(eyre::Report::new(RunrillaError::InvalidArgument(
            "no bars configured".into(),
        )));
    }
    if nlcs == 0 {
        return Err(eyre::Report::new(RunrillaError::InvalidArgument(
            "nlcs must be > 0".into(),
        )));
    }
    let n = 3 * (bar_count - 1) * nlcs;
    let mut steps = Vec::with_capacity(n + 1);
    steps.push(Step {
        index: 0,
        kind: StepKind::Zero,
        label: "[ZERO]".into(),
        prompt: "Clear the Bay(s)".into(),
    });
    for j in 0..n {
        let bay = j / 6;
        let side = Side::from_index(j / 2);
        let front_back = if j % 2 == 0 {
            FrontBack::Front
        } else {
            FrontBack::Back
        };
        steps.push(Step {
            index: j + 1,
            kind: StepKind::Weight {
                placement: j,
                bay,
                side,
                front_back,
            },
            label: format!("[{:04}]", j + 1),
            prompt: format!(
                "Put {weight} on the {} Bay on the {side} side in the {front_back} of the Shelf",
                bay_name(bay)
            ),
        });
    }
    Ok(CalibrationPlan {
        steps,
        weight_steps: n,
    })
}

#[allow(clippy::cast_precision_loss)]
fn to_f64(flat: &[i64]) -> Vec<f64> {
    flat.iter().map(|&v| v as f64).collect()
}

/// `Ad0`: `3 * (bars - 1) * nlcs` rows, each equal to the zero reading.
pub fn accumulate_zero_step(flat: &[i64], bar_count: usize, nlcs: usize) -> Matrix {
    let rows = 3 * bar_count.saturating_sub(1) * nlcs;
    let mut ad0 = Matrix::zeros(rows, flat.len());
    let row = to_f64(flat);
    for r in 0..rows {
        ad0.set_row(r, &row);
    }
    ad0
}

/// Overwrite row `step_index` (0-based placement) of `Adv` with a reading.
pub fn accumulate_weight_step(adv: &mut Matrix, flat: &[i64], step_index: usize) -> Result<()> {
    if step_index >= adv.rows() {
        return Err(eyre::Report::new(RunrillaError::InvalidStepIndex {
            index: step_index + 1,
            len: adv.rows() + 1,
        }));
    }
    if !adv.set_row(step_index, &to_f64(flat)) {
        return Err(eyre::Report::new(RunrillaError::InvalidArgument(format!(
            "reading has {} values, expected {}",
            flat.len(),
            adv.cols()
        ))));
    }
    Ok(())
}

/// Residual diagnostics of a solve.
#[derive(Debug, Clone, PartialEq)]
pub struct SolveReport {
    /// `(Adv - Ad0) * factors`, ideally all equal to the weight.
    pub check: Vec<f64>,
    /// `|check - W| / weight`.
    pub relative_error: f64,
    /// Frobenius norm of the pseudoinverse; large values mean a poorly
    /// conditioned placement set.
    pub pinv_norm: f64,
}

/// Solved coefficients, bar-major.
#[derive(Debug, Clone, PartialEq)]
pub struct Solution {
    pub bars: Vec<Bar>,
    pub report: SolveReport,
}

/// Solve for zeros and factors and attach them to copies of `bars`.
pub fn solve(adv: &Matrix, ad0: &Matrix, weight: f64, bars: &[Bar]) -> Result<Solution> {
    let nlcs = common_channel_count(bars)?;
    let diff = adv.sub(ad0).ok_or_else(|| {
        eyre::Report::new(RunrillaError::InvalidArgument(format!(
            "Adv is {}x{} but Ad0 is {}x{}",
            adv.rows(),
            adv.cols(),
            ad0.rows(),
            ad0.cols()
        )))
    })?;
    if diff.cols() != bars.len() * nlcs {
        return Err(eyre::Report::new(RunrillaError::InvalidArgument(format!(
            "matrices have {} columns for {} channels",
            diff.cols(),
            bars.len() * nlcs
        ))));
    }
    let w = Vector::filled(diff.rows(), weight);
    let pinv = diff
        .pseudo_inverse()
        .ok_or_else(|| eyre::Report::new(RunrillaError::SvdFailed))?;
    let factors = pinv
        .mul_vector(&w)
        .ok_or_else(|| eyre::Report::new(RunrillaError::SvdFailed))?;
    let check = diff
        .mul_vector(&factors)
        .ok_or_else(|| eyre::Report::new(RunrillaError::SvdFailed))?;
    let relative_error = check.sub(&w).map_or(f64::NAN, |d| d.norm()) / weight;
    let zeros = ad0.row(0);

    let solved = bars
        .iter()
        .enumerate()
        .map(|(b, bar)| {
            let calibration = (0..nlcs)
                .map(|c| {
                    let idx = b * nlcs + c;
                    #[allow(
                        clippy::cast_possible_truncation,
                        clippy::cast_sign_loss
                    )]
                    let zero = zeros[idx].round().max(0.0) as u64;
                    #[allow(clippy::cast_possible_truncation)]
                    let factor = factors.0[idx] as f32;
                    ChannelCalibration {
                        zero,
                        factor,
                        factor_hex: ieee754_hex(factor),
                    }
                })
                .collect();
            Bar {
                calibration,
                ..bar.clone()
            }
        })
        .collect();

    Ok(Solution {
        bars: solved,
        report: SolveReport {
            check: check.0,
            relative_error,
            pinv_norm: pinv.frobenius_norm(),
        },
    })
}

/// Incremental `Ad0`/`Adv` assembly for one calibration run.
///
/// Steps may arrive in any order. A repeated step overwrites its row without
/// counting twice; once every step has reported, further reports are ignored.
#[derive(Debug, Clone)]
pub struct CalibrationAccumulator {
    bar_count: usize,
    nlcs: usize,
    ad0: Matrix,
    adv: Matrix,
    received: Vec<bool>,
    complete: bool,
}

/// What happened to a reported step.
#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum Recorded {
    /// Stored; `received` of `total` distinct steps so far.
    Stored { received: usize, total: usize },
    /// The plan was already complete; nothing changed.
    Ignored,
}

impl CalibrationAccumulator {
    pub fn new(bar_count: usize, nlcs: usize) -> Self {
        let rows = 3 * bar_count.saturating_sub(1) * nlcs;
        let cols = bar_count * nlcs;
        Self {
            bar_count,
            nlcs,
            ad0: Matrix::zeros(rows, cols),
            adv: Matrix::zeros(rows, cols),
            received: vec![false; rows + 1],
            complete: false,
        }
    }

    /// Plan length (`N + 1`).
    pub fn total(&self) -> usize {
        self.received.len()
    }

    pub fn received(&self) -> usize {
        self.received.iter().filter(|&&r| r).count()
    }

    pub const fn is_complete(&self) -> bool {
        self.complete
    }

    /// Record the averaged reading for plan step `step_index`.
    pub fn record(&mut self, step_index: usize, flat: &[i64]) -> Result<Recorded> {
        if step_index >= self.total() {
            return Err(eyre::Report::new(RunrillaError::InvalidStepIndex {
                index: step_index,
                len: self.total(),
            }));
        }
        if flat.len() != self.bar_count * self.nlcs {
            return Err(eyre::Report::new(RunrillaError::InvalidArgument(format!(
                "reading has {} values, expected {}",
                flat.len(),
                self.bar_count * self.nlcs
            ))));
        }
        if self.complete {
            return Ok(Recorded::Ignored);
        }
        if step_index == 0 {
            self.ad0 = accumulate_zero_step(flat, self.bar_count, self.nlcs);
        } else {
            accumulate_weight_step(&mut self.adv, flat, step_index - 1)?;
        }
        self.received[step_index] = true;
        let received = self.received();
        self.complete = received == self.total();
        Ok(Recorded::Stored {
            received,
            total: self.total(),
        })
    }

    /// Solve once every step has reported.
    pub fn solve(&self, weight: f64, bars: &[Bar]) -> Result<Solution> {
        if !self.complete {
            return Err(eyre::Report::new(RunrillaError::CalibrationIncomplete {
                received: self.received(),
                expected: self.total(),
            }));
        }
        solve(&self.adv, &self.ad0, weight, bars)
    }

    pub const fn ad0(&self) -> &Matrix {
        &self.ad0
    }

    pub const fn adv(&self) -> &Matrix {
        &self.adv
    }
}
