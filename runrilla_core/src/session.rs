//! Connected device session: one bus, one operation at a time.
//!
//! Long operations (calibration step, live test, flashing) run on a worker
//! thread that holds the bus lock for its whole lifetime and reports through
//! a crossbeam channel of [`SessionEvent`]s. Starting a new operation cancels
//! the running one and joins its thread before the new worker starts, so
//! exchanges of two operations never interleave on the line.

use std::any::Any;
use std::panic::{self, AssertUnwindSafe};
use std::sync::{Arc, Mutex, MutexGuard, PoisonError};
use std::thread::{self, JoinHandle};

use crossbeam_channel as xch;
use runrilla_traits::{Bus, Clock, MonotonicClock};
use tracing::{debug, error, info, warn};

use crate::calibration::{CalibrationAccumulator, CalibrationPlan, Recorded, SolveReport, build_plan};
use crate::cancel::CancelToken;
use crate::error::{self, Result, RunrillaError};
use crate::flash::{FlashProgress, flash_bars};
use crate::monitor::{
    DEFAULT_WARMUP, Snapshot, ZeroProgress, collect_averaged_zeros, ensure_factors, run_live,
};
use crate::protocol::Protocol;
use crate::sampler::{SampleUpdate, sample_channels};
use crate::types::{Bar, Version};
use crate::util::common_channel_count;

/// Per-session settings taken from the parameter file.
#[derive(Debug, Clone, PartialEq)]
pub struct SessionOptions {
    /// Sampling command sent to read raw channels.
    pub sample_command: String,
    /// Nominal calibration weight.
    pub weight: f64,
    /// Ticks averaged per calibration step and for test-mode zeros.
    pub average: usize,
    /// Ticks discarded before averaging; also the test-mode warm-up (0 = default).
    pub ignore: usize,
    /// Flash the coefficients as soon as a calibration solves.
    pub flash_after_calibration: bool,
}

impl Default for SessionOptions {
    fn default() -> Self {
        Self {
            sample_command: "A".into(),
            weight: 1000.0,
            average: 10,
            ignore: 10,
            flash_after_calibration: true,
        }
    }
}

#[derive(Debug, Clone, Copy, PartialEq, Eq)]
pub enum OperationKind {
    CalibrationStep(usize),
    Test,
    Flash,
}

impl std::fmt::Display for OperationKind {
    fn fmt(&self, f: &mut std::fmt::Formatter<'_>) -> std::fmt::Result {
        match self {
            Self::CalibrationStep(i) => write!(f, "calibration-step-{i}"),
            Self::Test => f.write_str("test"),
            Self::Flash => f.write_str("flash"),
        }
    }
}

/// Everything a running operation reports.
#[derive(Debug, Clone, PartialEq)]
pub enum SessionEvent {
    /// Sampling progress for a calibration step.
    Sample { step: usize, update: SampleUpdate },
    /// A calibration step was recorded (or ignored after completion).
    StepDone {
        step: usize,
        received: usize,
        total: usize,
    },
    /// All steps reported and the solve succeeded.
    Calibrated { bars: Vec<Bar>, report: SolveReport },
    Flash(FlashProgress),
    ZeroProgress(ZeroProgress),
    ZerosDone { zeros: Vec<i64> },
    Snapshot(Snapshot),
    Finished { op: OperationKind },
    Failed {
        op: OperationKind,
        message: String,
        error: Option<RunrillaError>,
    },
    Canceled { op: OperationKind },
}

struct State {
    bars: Vec<Bar>,
    nlcs: usize,
    options: SessionOptions,
}

struct Inner {
    bus: Mutex<Option<Box<dyn Bus>>>,
    state: Mutex<State>,
    calibration: Mutex<CalibrationAccumulator>,
    clock: Arc<dyn Clock>,
    events: xch::Sender<SessionEvent>,
}

struct RunningOp {
    kind: OperationKind,
    cancel: CancelToken,
    handle: JoinHandle<()>,
}

pub struct DeviceSession {
    inner: Arc<Inner>,
    op: Mutex<Option<RunningOp>>,
    events: xch::Receiver<SessionEvent>,
}

fn lock<T>(m: &Mutex<T>) -> MutexGuard<'_, T> {
    m.lock().unwrap_or_else(PoisonError::into_inner)
}

impl Inner {
    fn emit(&self, event: SessionEvent) {
        // The receiver lives as long as the session; a failed send only
        // happens during teardown.
        let _ = self.events.send(event);
    }

    fn snapshot(&self) -> (Vec<Bar>, SessionOptions) {
        let st = lock(&self.state);
        (st.bars.clone(), st.options.clone())
    }

    /// Run `f` with exclusive use of the bus.
    fn with_protocol<R>(
        &self,
        bars: &[Bar],
        command: &str,
        f: impl FnOnce(&mut Protocol<'_>) -> Result<R>,
    ) -> Result<R> {
        let mut guard = lock(&self.bus);
        let bus = guard
            .as_mut()
            .ok_or_else(|| eyre::Report::new(RunrillaError::NotConnected))?;
        let mut protocol = Protocol::new(&mut **bus, bars, command)?;
        f(&mut protocol)
    }
}

impl DeviceSession {
    /// Open a session over any bus with the real clock.
    pub fn open(bus: Box<dyn Bus>, bars: Vec<Bar>, options: SessionOptions) -> Result<Self> {
        Self::open_with_clock(bus, bars, options, Arc::new(MonotonicClock::new()))
    }

    /// Open a session; validates the bars and probes the first bar's version.
    pub fn open_with_clock(
        mut bus: Box<dyn Bus>,
        bars: Vec<Bar>,
        options: SessionOptions,
        clock: Arc<dyn Clock>,
    ) -> Result<Self> {
        let nlcs = common_channel_count(&bars)?;
        if options.average == 0 {
            return Err(eyre::Report::new(RunrillaError::InvalidArgument(
                "average must be > 0".into(),
            )));
        }
        let version = Protocol::new(&mut *bus, &bars, &options.sample_command)?
            .get_version(0)
            .map_err(|e| match error::find(&e) {
                Some(
                    RunrillaError::VersionProbeFailure { .. }
                    | RunrillaError::InvalidVersionFormat { .. },
                ) => e,
                _ => eyre::Report::new(RunrillaError::VersionProbeFailure {
                    bar_index: 0,
                    reason: e.to_string(),
                }),
            })?;
        info!(bus = bus.name(), bars = bars.len(), nlcs, %version, "session opened");

        let (tx, rx) = xch::unbounded();
        let calibration = CalibrationAccumulator::new(bars.len(), nlcs);
        Ok(Self {
            inner: Arc::new(Inner {
                bus: Mutex::new(Some(bus)),
                state: Mutex::new(State {
                    bars,
                    nlcs,
                    options,
                }),
                calibration: Mutex::new(calibration),
                clock,
                events: tx,
            }),
            op: Mutex::new(None),
            events: rx,
        })
    }

    /// Open the configured serial port and start a session on it.
    #[cfg(feature = "serial")]
    pub fn connect(
        serial: &runrilla_config::Serial,
        bars: Vec<Bar>,
        options: SessionOptions,
    ) -> Result<Self> {
        common_channel_count(&bars)?;
        let bus = runrilla_hardware::SerialBus::open(&serial.port, serial.baudrate).map_err(|e| {
            let reason = match e {
                runrilla_hardware::error::HwError::Open { reason, .. } => reason,
                other => other.to_string(),
            };
            eyre::Report::new(RunrillaError::PortOpenFailure {
                port: serial.port.clone(),
                reason,
            })
        })?;
        Self::open(Box::new(bus), bars, options)
    }

    /// Receiver for operation events. Clones share one queue.
    pub fn events(&self) -> xch::Receiver<SessionEvent> {
        self.events.clone()
    }

    pub fn bars(&self) -> Vec<Bar> {
        lock(&self.inner.state).bars.clone()
    }

    pub fn nlcs(&self) -> usize {
        lock(&self.inner.state).nlcs
    }

    pub fn options(&self) -> SessionOptions {
        lock(&self.inner.state).options.clone()
    }

    /// The calibration plan for this session's bars and weight.
    pub fn plan(&self) -> Result<CalibrationPlan> {
        let st = lock(&self.inner.state);
        build_plan(st.bars.len(), st.nlcs, st.options.weight)
    }

    /// Kind of the operation currently running, if any.
    pub fn running(&self) -> Option<OperationKind> {
        lock(&self.op)
            .as_ref()
            .filter(|op| !op.handle.is_finished())
            .map(|op| op.kind)
    }

    /// Firmware version of one bar.
    ///
    /// Only on an idle session: a running operation owns the bus until it
    /// ends, so this fails with `InvalidArgument` instead of waiting.
    pub fn version(&self, bar_index: usize) -> Result<Version> {
        self.ensure_idle()?;
        let (bars, options) = self.inner.snapshot();
        self.inner
            .with_protocol(&bars, &options.sample_command, |p| p.get_version(bar_index))
    }

    /// Factors stored on one bar. Idle sessions only, like [`Self::version`].
    pub fn read_factors(&self, bar_index: usize) -> Result<Vec<f64>> {
        self.ensure_idle()?;
        let (bars, options) = self.inner.snapshot();
        self.inner
            .with_protocol(&bars, &options.sample_command, |p| p.read_factors(bar_index))
    }

    fn ensure_idle(&self) -> Result<()> {
        match self.running() {
            Some(op) => Err(eyre::Report::new(RunrillaError::InvalidArgument(format!(
                "operation {op} running"
            )))),
            None => Ok(()),
        }
    }

    /// Forget any recorded calibration steps.
    pub fn begin_calibration(&self) {
        let st = lock(&self.inner.state);
        *lock(&self.inner.calibration) = CalibrationAccumulator::new(st.bars.len(), st.nlcs);
        debug!("calibration accumulator reset");
    }

    /// Sample and record plan step `step_index` (0 = zero step).
    ///
    /// When the last missing step arrives the coefficients are solved,
    /// reported as `Calibrated`, stored on the session, and flashed unless
    /// `flash_after_calibration` is off. Requesting step 0 on a completed
    /// plan starts a new run. A shelf needs at least two bars to calibrate.
    pub fn run_calibration_step(&self, step_index: usize) -> Result<()> {
        let bar_count = lock(&self.inner.state).bars.len();
        if bar_count < 2 {
            return Err(eyre::Report::new(RunrillaError::InvalidArgument(format!(
                "calibration needs at least 2 bars, {bar_count} configured"
            ))));
        }
        let total = lock(&self.inner.calibration).total();
        if step_index >= total {
            return Err(eyre::Report::new(RunrillaError::InvalidStepIndex {
                index: step_index,
                len: total,
            }));
        }
        self.start(OperationKind::CalibrationStep(step_index), move |inner, cancel| {
            calibration_step(inner, cancel, step_index)
        })
    }

    /// Live weight readout until stopped.
    pub fn run_test(&self) -> Result<()> {
        self.start(OperationKind::Test, |inner, cancel| {
            let (mut bars, options) = inner.snapshot();
            let warmup = if options.ignore > 0 {
                options.ignore
            } else {
                DEFAULT_WARMUP
            };
            let protocol_bars = bars.clone();
            inner.with_protocol(&protocol_bars, &options.sample_command, |p| {
                ensure_factors(p, &mut bars, cancel)?;
                let zeros = collect_averaged_zeros(
                    p,
                    inner.clock.as_ref(),
                    warmup,
                    options.average,
                    cancel,
                    |z| inner.emit(SessionEvent::ZeroProgress(z)),
                )?;
                inner.emit(SessionEvent::ZerosDone {
                    zeros: zeros.clone(),
                });
                run_live(p, &bars, &zeros, inner.clock.as_ref(), cancel, |s| {
                    inner.emit(SessionEvent::Snapshot(s));
                })
            })
        })
    }

    /// Flash `bars` (with calibration records) to the device.
    pub fn run_flash(&self, bars: Vec<Bar>) -> Result<()> {
        if bars.first().is_none_or(|b| !b.is_calibrated()) {
            return Err(eyre::Report::new(RunrillaError::NoCalibration { bar_index: 0 }));
        }
        self.start(OperationKind::Flash, move |inner, cancel| {
            let (session_bars, options) = inner.snapshot();
            inner.with_protocol(&session_bars, &options.sample_command, |p| {
                flash_bars(p, &bars, inner.clock.as_ref(), cancel, |pr| {
                    inner.emit(SessionEvent::Flash(pr));
                })
            })?;
            lock(&inner.state).bars = bars;
            Ok(())
        })
    }

    /// Cancel the running operation and wait for its worker to exit.
    pub fn stop(&self) {
        let prev = lock(&self.op).take();
        if let Some(prev) = prev {
            Self::finish(prev);
        }
    }

    /// Stop any operation and release the bus.
    pub fn disconnect(self) {
        self.stop();
        lock(&self.inner.bus).take();
        info!("session disconnected");
    }

    fn finish(op: RunningOp) {
        op.cancel.cancel();
        match op.handle.join() {
            Ok(()) => debug!(op = %op.kind, "worker joined"),
            Err(e) => warn!(op = %op.kind, ?e, "worker panicked"),
        }
    }

    fn start<F>(&self, kind: OperationKind, body: F) -> Result<()>
    where
        F: FnOnce(&Inner, &CancelToken) -> Result<()> + Send + 'static,
    {
        let mut slot = lock(&self.op);
        if let Some(prev) = slot.take() {
            debug!(prev = %prev.kind, next = %kind, "canceling previous operation");
            Self::finish(prev);
        }
        if lock(&self.inner.bus).is_none() {
            return Err(eyre::Report::new(RunrillaError::NotConnected));
        }

        let cancel = CancelToken::new();
        let token = cancel.clone();
        let inner = Arc::clone(&self.inner);
        let handle = thread::Builder::new()
            .name(format!("runrilla-{kind}"))
            .spawn(move || {
                let result = match panic::catch_unwind(AssertUnwindSafe(|| body(&inner, &token))) {
                    Ok(result) => result,
                    Err(payload) => {
                        let message = panic_message(payload);
                        error!(op = %kind, %message, "worker panicked");
                        inner.emit(SessionEvent::Failed {
                            op: kind,
                            message: format!("worker panicked: {message}"),
                            error: None,
                        });
                        return;
                    }
                };
                let event = match result {
                    Ok(()) => {
                        info!(op = %kind, "operation finished");
                        SessionEvent::Finished { op: kind }
                    }
                    Err(e) if error::find(&e).is_some_and(RunrillaError::is_canceled) => {
                        info!(op = %kind, "operation canceled");
                        SessionEvent::Canceled { op: kind }
                    }
                    Err(e) => {
                        error!(op = %kind, error = %e, "operation failed");
                        SessionEvent::Failed {
                            op: kind,
                            message: e.to_string(),
                            error: error::find(&e).cloned(),
                        }
                    }
                };
                inner.emit(event);
            })
            .map_err(|e| eyre::eyre!("spawn {kind} worker: {e}"))?;
        *slot = Some(RunningOp {
            kind,
            cancel,
            handle,
        });
        Ok(())
    }
}

fn panic_message(payload: Box<dyn Any + Send>) -> String {
    match payload.downcast::<String>() {
        Ok(s) => *s,
        Err(payload) => payload
            .downcast_ref::<&str>()
            .map_or_else(|| "unknown panic".to_string(), |s| (*s).to_string()),
    }
}

fn calibration_step(inner: &Inner, cancel: &CancelToken, step: usize) -> Result<()> {
    let (bars, options) = inner.snapshot();
    {
        let mut acc = lock(&inner.calibration);
        if acc.is_complete() {
            if step == 0 {
                *acc = CalibrationAccumulator::new(bars.len(), common_channel_count(&bars)?);
                debug!("new calibration run");
            } else {
                inner.emit(SessionEvent::StepDone {
                    step,
                    received: acc.received(),
                    total: acc.total(),
                });
                return Ok(());
            }
        }
    }

    inner.with_protocol(&bars, &options.sample_command, |p| {
        let flat = sample_channels(
            p,
            inner.clock.as_ref(),
            options.ignore,
            options.average,
            cancel,
            |u| {
                inner.emit(SessionEvent::Sample {
                    step,
                    update: u.clone(),
                });
            },
        )?;

        let solution = {
            let mut acc = lock(&inner.calibration);
            let recorded = acc.record(step, &flat)?;
            let (received, total) = match recorded {
                Recorded::Stored { received, total } => (received, total),
                Recorded::Ignored => (acc.received(), acc.total()),
            };
            info!(step, received, total, "calibration step recorded");
            inner.emit(SessionEvent::StepDone {
                step,
                received,
                total,
            });
            if !(matches!(recorded, Recorded::Stored { .. }) && acc.is_complete()) {
                return Ok(());
            }
            acc.solve(options.weight, &bars)?
        };

        info!(
            relative_error = solution.report.relative_error,
            pinv_norm = solution.report.pinv_norm,
            "calibration solved"
        );
        lock(&inner.state).bars.clone_from(&solution.bars);
        inner.emit(SessionEvent::Calibrated {
            bars: solution.bars.clone(),
            report: solution.report.clone(),
        });

        if options.flash_after_calibration {
            flash_bars(p, &solution.bars, inner.clock.as_ref(), cancel, |pr| {
                inner.emit(SessionEvent::Flash(pr));
            })?;
        }
        Ok(())
    })
}

impl Drop for DeviceSession {
    fn drop(&mut self) {
        let prev = lock(&self.op).take();
        if let Some(prev) = prev {
            Self::finish(prev);
        }
    }
}
