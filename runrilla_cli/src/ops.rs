//! Command implementations: parameter mapping, session setup, event loops.

use std::io::BufRead;
use std::path::Path;
use std::sync::Arc;
use std::sync::atomic::{AtomicBool, Ordering};
use std::time::{Duration, Instant, SystemTime, UNIX_EPOCH};

use crossbeam_channel::RecvTimeoutError;
use runrilla_config::{DebugRow, Parameters};
use runrilla_core::calibration::StepKind;
use runrilla_core::conversions::{bars_from_parameters, with_calibration};
use runrilla_core::error::RunrillaError;
use runrilla_core::session::{DeviceSession, OperationKind, SessionEvent, SessionOptions};
use runrilla_core::types::Bar;
use runrilla_core::{Result, SolveReport, build_plan};
use runrilla_hardware::SimHandle;
use serde_json::json;

use crate::cli::{Cli, Commands};
use crate::output::{bars_json, emit_json, event_json, print_event, step_json};
use crate::sim;

/// How often the event loop looks at the Ctrl-C flag.
const POLL: Duration = Duration::from_millis(100);

/// Load and validate a parameter file; any problem is a `Config` error.
pub fn load_parameters(path: &Path) -> Result<Parameters> {
    let params = runrilla_config::load_path(path)
        .and_then(|p| p.validate().map(|()| p))
        .map_err(|e| eyre::Report::new(RunrillaError::Config(e.to_string())))?;
    tracing::debug!(path = %path.display(), bars = params.bars.len(), "parameters loaded");
    Ok(params)
}

pub struct Ctx<'a> {
    pub cli: &'a Cli,
    pub params: Parameters,
    pub shutdown: Arc<AtomicBool>,
}

impl Ctx<'_> {
    fn say(&self, text: &str, value: serde_json::Value) {
        if self.cli.json {
            emit_json(&value);
        } else {
            println!("{text}");
        }
    }
}

pub fn run(ctx: &Ctx<'_>) -> Result<()> {
    match &ctx.cli.cmd {
        Commands::Detect => detect(ctx),
        Commands::Version => version(ctx),
        Commands::Factors => factors(ctx),
        Commands::Plan => plan(ctx),
        Commands::Calibrate { no_flash, yes } => calibrate(ctx, !*no_flash, *yes),
        Commands::Test { seconds } => live_test(ctx, *seconds),
        Commands::Flash { calibrated } => flash(ctx, calibrated),
    }
}

/// Open a session on the simulated shelf or the configured serial port.
fn open_session(
    ctx: &Ctx<'_>,
    bars: Vec<Bar>,
    options: SessionOptions,
) -> Result<(DeviceSession, Option<SimHandle>)> {
    if ctx.cli.sim {
        let (bus, handle) = sim::shelf(&bars, &options.sample_command);
        let session = DeviceSession::open(Box::new(bus), bars, options)?;
        return Ok((session, Some(handle)));
    }
    open_serial(ctx, bars, options).map(|s| (s, None))
}

#[cfg(feature = "serial")]
fn open_serial(ctx: &Ctx<'_>, bars: Vec<Bar>, options: SessionOptions) -> Result<DeviceSession> {
    let mut serial = ctx.params.serial.clone();
    serial.port = ensure_port(&ctx.cli.config, &ctx.params, find_port)?;
    DeviceSession::connect(&serial, bars, options)
}

/// The configured port, or one found by `detect` and saved into `config`
/// so later runs skip the scan. A failed save only warns.
#[cfg_attr(not(feature = "serial"), allow(dead_code))]
fn ensure_port(
    config: &Path,
    params: &Parameters,
    detect: impl FnOnce(&Parameters) -> Result<String>,
) -> Result<String> {
    if !params.serial.port.is_empty() {
        return Ok(params.serial.port.clone());
    }
    let port = detect(params)?;
    let mut updated = params.clone();
    updated.serial.port.clone_from(&port);
    match runrilla_config::persist_path(config, &updated) {
        Ok(()) => tracing::info!(%port, path = %config.display(), "detected port saved"),
        Err(e) => tracing::warn!(%port, error = %e, "cannot save detected port"),
    }
    Ok(port)
}

#[cfg(not(feature = "serial"))]
fn open_serial(_ctx: &Ctx<'_>, _bars: Vec<Bar>, _options: SessionOptions) -> Result<DeviceSession> {
    Err(eyre::Report::new(RunrillaError::InvalidArgument(
        "built without serial support; use --sim".into(),
    )))
}

#[cfg(feature = "serial")]
fn find_port(params: &Parameters) -> Result<String> {
    let bar_id = params.bars.first().map_or(0, |b| b.id);
    let candidates = runrilla_hardware::candidate_ports();
    tracing::info!(candidates = candidates.len(), bar_id, "auto-detecting port");
    runrilla_core::detect::require_port(
        runrilla_core::detect::auto_detect_port(candidates, bar_id, params.serial.baudrate),
        bar_id,
    )
}

fn detect(ctx: &Ctx<'_>) -> Result<()> {
    let port = if ctx.cli.sim {
        "sim".to_string()
    } else {
        detect_serial(ctx)?
    };
    ctx.say(&port, json!({ "port": port }));
    Ok(())
}

#[cfg(feature = "serial")]
fn detect_serial(ctx: &Ctx<'_>) -> Result<String> {
    find_port(&ctx.params)
}

#[cfg(not(feature = "serial"))]
fn detect_serial(_ctx: &Ctx<'_>) -> Result<String> {
    Err(eyre::Report::new(RunrillaError::InvalidArgument(
        "built without serial support; use --sim".into(),
    )))
}

fn version(ctx: &Ctx<'_>) -> Result<()> {
    let bars = bars_from_parameters(&ctx.params);
    let (session, _) = open_session(ctx, bars.clone(), SessionOptions::from(&ctx.params))?;
    for (i, bar) in bars.iter().enumerate() {
        let v = session.version(i)?;
        ctx.say(
            &format!("bar {}: version {v}", bar.id),
            json!({ "bar": bar.id, "version": v.to_string() }),
        );
    }
    session.disconnect();
    Ok(())
}

fn factors(ctx: &Ctx<'_>) -> Result<()> {
    let bars = bars_from_parameters(&ctx.params);
    let (session, _) = open_session(ctx, bars.clone(), SessionOptions::from(&ctx.params))?;
    for (i, bar) in bars.iter().enumerate() {
        let f = session.read_factors(i)?;
        let text: Vec<String> = f.iter().map(|v| format!("{v:.10}")).collect();
        ctx.say(
            &format!("bar {}: {}", bar.id, text.join(" ")),
            json!({ "bar": bar.id, "factors": f }),
        );
    }
    session.disconnect();
    Ok(())
}

fn plan(ctx: &Ctx<'_>) -> Result<()> {
    let plan = build_plan(
        ctx.params.bars.len(),
        ctx.params.nlcs() as usize,
        ctx.params.weight,
    )?;
    for step in &plan.steps {
        ctx.say(&format!("{} {}", step.label, step.prompt), step_json(step));
    }
    Ok(())
}

/// Terminal outcome of one session operation.
enum Outcome {
    Finished,
    Canceled,
}

/// Pump events until `op` ends. Ctrl-C (or `deadline`) stops the operation.
fn drive(
    ctx: &Ctx<'_>,
    session: &DeviceSession,
    op: OperationKind,
    deadline: Option<Instant>,
    mut on_event: impl FnMut(&SessionEvent),
) -> Result<Outcome> {
    let rx = session.events();
    let mut stopping = false;
    loop {
        let expired = deadline.is_some_and(|d| Instant::now() >= d);
        if !stopping && (expired || ctx.shutdown.load(Ordering::Relaxed)) {
            tracing::info!(%op, "stopping");
            stopping = true;
            session.stop();
        }
        let ev = match rx.recv_timeout(POLL) {
            Ok(ev) => ev,
            Err(RecvTimeoutError::Timeout) => continue,
            Err(RecvTimeoutError::Disconnected) => eyre::bail!("session event stream closed"),
        };
        if ctx.cli.json {
            if let Some(v) = event_json(&ev) {
                emit_json(&v);
            }
        } else {
            print_event(&ev);
        }
        on_event(&ev);
        match ev {
            SessionEvent::Finished { op: o } if o == op => return Ok(Outcome::Finished),
            SessionEvent::Canceled { op: o } if o == op => return Ok(Outcome::Canceled),
            SessionEvent::Failed {
                op: o,
                message,
                error,
            } if o == op => {
                return Err(error.map_or_else(|| eyre::eyre!(message), eyre::Report::new));
            }
            _ => {}
        }
    }
}

fn wait_for_enter() -> Result<()> {
    let mut line = String::new();
    std::io::stdin()
        .lock()
        .read_line(&mut line)
        .map_err(|e| eyre::eyre!("read confirmation: {e}"))?;
    Ok(())
}

fn calibrate(ctx: &Ctx<'_>, flash_after: bool, yes: bool) -> Result<()> {
    let bars = bars_from_parameters(&ctx.params);
    let options = SessionOptions {
        flash_after_calibration: flash_after,
        ..SessionOptions::from(&ctx.params)
    };
    let weight = options.weight;
    let (session, sim_handle) = open_session(ctx, bars.clone(), options)?;
    let plan = session.plan()?;
    let nlcs = session.nlcs();
    tracing::info!(steps = plan.len(), weight, flash_after, "calibration started");

    let mut solved: Option<(Vec<Bar>, SolveReport)> = None;
    for step in &plan.steps {
        ctx.say(&format!("{} {}", step.label, step.prompt), step_json(step));
        if !yes {
            if !ctx.cli.json {
                println!("Press Enter when ready...");
            }
            wait_for_enter()?;
        }
        if let Some(handle) = &sim_handle {
            match step.kind {
                StepKind::Zero => handle.clear_loads(),
                StepKind::Weight { placement, .. } => {
                    sim::place(handle, &bars, nlcs, placement, weight);
                }
            }
        }
        session.run_calibration_step(step.index)?;
        let outcome = drive(
            ctx,
            &session,
            OperationKind::CalibrationStep(step.index),
            None,
            |ev| {
                if let SessionEvent::Calibrated { bars, report } = ev {
                    solved = Some((bars.clone(), report.clone()));
                }
            },
        )?;
        if matches!(outcome, Outcome::Canceled) {
            return Err(eyre::Report::new(RunrillaError::Canceled));
        }
    }
    session.disconnect();

    let Some((calibrated, report)) = solved else {
        return Err(eyre::Report::new(RunrillaError::CalibrationIncomplete {
            received: 0,
            expected: plan.len(),
        }));
    };
    save_calibration(ctx, &calibrated, &report)
}

/// Write `<config>_calibrated.json` and append the diagnostics row.
fn save_calibration(ctx: &Ctx<'_>, bars: &[Bar], report: &SolveReport) -> Result<()> {
    let out = runrilla_config::calibrated_path(&ctx.cli.config);
    runrilla_config::persist_json(&out, &with_calibration(&ctx.params, bars))?;
    tracing::info!(path = %out.display(), "calibrated parameters written");

    let cells = || bars.iter().flat_map(|b| b.calibration.iter());
    let row = DebugRow {
        timestamp_s: SystemTime::now()
            .duration_since(UNIX_EPOCH)
            .map_or(0, |d| d.as_secs()),
        bars: bars.len(),
        nlcs: bars.first().map_or(0, |b| b.calibration.len()),
        weight: ctx.params.weight,
        residual: report.relative_error,
        pinv_norm: report.pinv_norm,
        zeros: cells().map(|c| c.zero.to_string()).collect::<Vec<_>>().join(";"),
        factors: cells().map(|c| c.factor_hex.clone()).collect::<Vec<_>>().join(";"),
    };
    let csv = runrilla_config::debug_report_path(&ctx.cli.config);
    runrilla_config::append_debug_report(&csv, &row)?;

    ctx.say(
        &format!("Saved {}", out.display()),
        json!({ "event": "saved", "path": out.display().to_string(), "bars": bars_json(bars) }),
    );
    Ok(())
}

fn live_test(ctx: &Ctx<'_>, seconds: Option<u64>) -> Result<()> {
    let bars = bars_from_parameters(&ctx.params);
    let (session, sim_handle) = open_session(ctx, bars, SessionOptions::from(&ctx.params))?;
    let sim_load = std::env::var(sim::SIM_LOAD_ENV)
        .ok()
        .and_then(|s| sim::parse_load(&s));
    let deadline = seconds.map(|s| Instant::now() + Duration::from_secs(s));

    session.run_test()?;
    drive(ctx, &session, OperationKind::Test, deadline, |ev| {
        if let (SessionEvent::ZerosDone { .. }, Some(handle), Some((bar, slot, w))) =
            (ev, &sim_handle, sim_load)
        {
            handle.set_load(bar, slot, w);
        }
    })?;
    session.disconnect();
    if ctx.shutdown.load(Ordering::Relaxed) {
        return Err(eyre::Report::new(RunrillaError::Canceled));
    }
    Ok(())
}

fn flash(ctx: &Ctx<'_>, calibrated: &Path) -> Result<()> {
    let source = load_parameters(calibrated)?;
    if !source.is_calibrated() {
        return Err(eyre::Report::new(RunrillaError::NoCalibration { bar_index: 0 }));
    }
    let bars = bars_from_parameters(&source);
    let (session, _) = open_session(ctx, bars.clone(), SessionOptions::from(&ctx.params))?;
    session.run_flash(bars)?;
    let outcome = drive(ctx, &session, OperationKind::Flash, None, |_| {})?;
    session.disconnect();
    match outcome {
        Outcome::Finished => Ok(()),
        Outcome::Canceled => Err(eyre::Report::new(RunrillaError::Canceled)),
    }
}
