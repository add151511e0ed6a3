//! Rendering session events for the terminal (text or JSON lines).

use std::io::Write;

use runrilla_core::calibration::Step;
use runrilla_core::sampler::SamplePhase;
use runrilla_core::session::SessionEvent;
use runrilla_core::types::Bar;
use serde_json::{Value, json};

/// Text bar like `[#####.....]` for `done` of `total`.
pub fn render_progress_bar(done: usize, total: usize, width: usize) -> String {
    let filled = if total == 0 {
        width
    } else {
        (done.min(total) * width) / total
    };
    format!("[{}{}]", "#".repeat(filled), ".".repeat(width - filled))
}

pub fn step_json(step: &Step) -> Value {
    json!({ "step": step.index, "label": step.label, "prompt": step.prompt })
}

pub fn bars_json(bars: &[Bar]) -> Value {
    bars.iter()
        .map(|b| {
            json!({
                "id": b.id,
                "lcs": b.channel_mask,
                "lc": b.calibration.iter().map(|c| json!({
                    "zero": c.zero,
                    "factor": c.factor,
                    "ieee": c.factor_hex,
                })).collect::<Vec<_>>(),
            })
        })
        .collect()
}

/// JSON line for an event; `None` for events not worth a line.
pub fn event_json(ev: &SessionEvent) -> Option<Value> {
    Some(match ev {
        SessionEvent::Sample { step, update } if update.phase == SamplePhase::Finished => json!({
            "event": "sampled",
            "step": step,
            "values": update.values,
        }),
        SessionEvent::Sample { .. } | SessionEvent::ZeroProgress(_) => return None,
        SessionEvent::StepDone {
            step,
            received,
            total,
        } => json!({ "event": "step_done", "step": step, "received": received, "total": total }),
        SessionEvent::Calibrated { bars, report } => json!({
            "event": "calibrated",
            "bars": bars_json(bars),
            "relative_error": report.relative_error,
            "pinv_norm": report.pinv_norm,
            "check": report.check,
        }),
        SessionEvent::Flash(p) => json!({
            "event": "flash",
            "stage": p.stage.as_str(),
            "bar": p.bar_index.map(|i| i + 1),
            "message": p.message,
        }),
        SessionEvent::ZerosDone { zeros } => json!({ "event": "zeros", "zeros": zeros }),
        SessionEvent::Snapshot(s) => json!({
            "event": "snapshot",
            "grand_total": s.grand_total,
            "per_bar_total": s.per_bar_total,
            "per_bar_channel_weight": s.per_bar_channel_weight,
            "per_bar_raw": s.per_bar_raw,
        }),
        SessionEvent::Finished { op } => json!({ "event": "finished", "op": op.to_string() }),
        SessionEvent::Canceled { op } => json!({ "event": "canceled", "op": op.to_string() }),
        SessionEvent::Failed { op, message, .. } => {
            json!({ "event": "failed", "op": op.to_string(), "message": message })
        }
    })
}

/// Print an event in text mode. Progress goes to stderr, results to stdout.
pub fn print_event(ev: &SessionEvent) {
    match ev {
        SessionEvent::Sample { update, .. } => {
            let (done, total) = match update.phase {
                SamplePhase::Ignoring => (update.ignore_done, update.ignore_target),
                _ => (update.avg_done, update.avg_target),
            };
            let label = match update.phase {
                SamplePhase::Ignoring => "settling ",
                SamplePhase::Averaging => "averaging",
                SamplePhase::Finished => "done     ",
            };
            eprint!("\r{label} {} {done}/{total}", render_progress_bar(done, total, 20));
            if update.phase == SamplePhase::Finished {
                eprintln!();
            }
        }
        SessionEvent::StepDone {
            received, total, ..
        } => println!("Recorded {received}/{total}"),
        SessionEvent::Calibrated { bars, report } => {
            println!(
                "Calibration solved: relative error {:.3e}, pinv norm {:.3e}",
                report.relative_error, report.pinv_norm
            );
            for bar in bars {
                for (channel, c) in bar.calibration.iter().enumerate() {
                    println!(
                        "  bar {} cell {}: zero {} factor {} ({})",
                        bar.id,
                        channel + 1,
                        c.zero,
                        c.factor,
                        c.factor_hex
                    );
                }
            }
        }
        SessionEvent::Flash(p) => match p.bar_index {
            Some(i) => println!("Bar {}: {}", i + 1, p.message),
            None => println!("{}", p.message),
        },
        SessionEvent::ZeroProgress(z) => {
            let (done, total) = if z.warmup_done < z.warmup_target {
                (z.warmup_done, z.warmup_target)
            } else {
                (z.sample_done, z.sample_target)
            };
            eprint!("\rzeroing {} {done}/{total}", render_progress_bar(done, total, 20));
        }
        SessionEvent::ZerosDone { .. } => eprintln!("\nzeros taken"),
        SessionEvent::Snapshot(s) => {
            let per_bar: Vec<String> = s.per_bar_total.iter().map(|t| format!("{t:.1}")).collect();
            println!("total {:.1} | bars {}", s.grand_total, per_bar.join(" "));
        }
        SessionEvent::Finished { .. } | SessionEvent::Canceled { .. } => {}
        SessionEvent::Failed { message, .. } => eprintln!("failed: {message}"),
    }
}

/// Write one JSON line to stdout.
pub fn emit_json(v: &Value) {
    let mut out = std::io::stdout().lock();
    let _ = writeln!(out, "{v}");
}

#[cfg(test)]
mod tests {
    use super::*;

    #[test]
    fn progress_bar_shapes() {
        assert_eq!(render_progress_bar(0, 4, 4), "[....]");
        assert_eq!(render_progress_bar(2, 4, 4), "[##..]");
        assert_eq!(render_progress_bar(9, 4, 4), "[####]");
        assert_eq!(render_progress_bar(0, 0, 2), "[##]");
    }
}
